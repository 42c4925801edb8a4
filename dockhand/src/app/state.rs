//! Application state management

use std::sync::Arc;

use tracing::info;

use crate::app::options::AppOptions;
use crate::apps::lifecycle::AppLifecycle;
use crate::apps::store::{AppStore, FileAppStore};
use crate::compose::chain::ChainResolver;
use crate::errors::DockhandError;
use crate::events::dispatcher::EventDispatcher;
use crate::executors::apps::AppExecutor;
use crate::executors::env::EnvGenerator;
use crate::executors::repos::{repo_id, RepoExecutor};
use crate::executors::runtime::{CommandRunner, ComposeRuntime, TokioCommandRunner};
use crate::executors::system::SystemExecutor;
use crate::executors::EventRouter;
use crate::queue::JobQueue;
use crate::storage::layout::StorageLayout;
use crate::workers::consumer::Leadership;

/// Main application state
pub struct AppState {
    pub layout: StorageLayout,

    /// Queue shared by producers and the worker
    pub queue: Arc<dyn JobQueue>,

    pub dispatcher: EventDispatcher,

    /// Executors used by the consumer worker
    pub router: Arc<EventRouter>,

    pub lifecycle: AppLifecycle,

    /// Set while this process holds the worker lease
    pub leadership: Arc<Leadership>,
}

impl AppState {
    /// Initialize application state with the real process runner and file store
    pub async fn init(options: &AppOptions, queue: Arc<dyn JobQueue>) -> Result<Self, DockhandError> {
        info!("Initializing application state...");
        options.layout.setup().await?;

        let store = Arc::new(FileAppStore::new(options.layout.apps_state_file()));
        Ok(Self::new(options, queue, Arc::new(TokioCommandRunner), store))
    }

    /// Assemble the state from explicit collaborators
    pub fn new(
        options: &AppOptions,
        queue: Arc<dyn JobQueue>,
        runner: Arc<dyn CommandRunner>,
        store: Arc<dyn AppStore>,
    ) -> Self {
        let layout = options.layout.clone();
        let repo = options.appstore_repo_url.as_deref().map(repo_id);

        let apps = AppExecutor::new(
            layout.clone(),
            ChainResolver::new(layout.clone(), &options.architecture, repo.clone()),
            ComposeRuntime::new(options.container_runtime.clone(), runner.clone()),
            EnvGenerator::new(layout.clone(), options.env.clone()),
            repo.clone(),
        );
        let repos = RepoExecutor::new(layout.clone(), runner.clone());
        let system = SystemExecutor::new(layout.clone(), runner, options.system.clone());

        let dispatcher = EventDispatcher::new(queue.clone(), options.dispatcher.clone());
        let lifecycle = AppLifecycle::new(store, dispatcher.clone(), layout.clone(), repo);

        Self {
            layout,
            queue,
            dispatcher,
            router: Arc::new(EventRouter::new(apps, repos, system)),
            lifecycle,
            leadership: Arc::new(Leadership::new()),
        }
    }
}
