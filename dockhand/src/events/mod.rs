//! Lifecycle events and their dispatch

pub mod dispatcher;
pub mod model;
