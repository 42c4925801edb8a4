//! Server state

use crate::apps::lifecycle::AppLifecycle;

/// Server state shared across handlers
pub struct ServerState {
    pub lifecycle: AppLifecycle,
}

impl ServerState {
    pub fn new(lifecycle: AppLifecycle) -> Self {
        Self { lifecycle }
    }
}
