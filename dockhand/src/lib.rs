//! Dockhand Library
//!
//! Single-host app lifecycle engine: a durable event queue consumed by one worker
//! that drives the container runtime, resolves compose files and manages backups.

pub mod app;
pub mod apps;
pub mod backup;
pub mod compose;
pub mod errors;
pub mod events;
pub mod executors;
pub mod filesys;
pub mod logs;
pub mod queue;
pub mod server;
pub mod storage;
pub mod utils;
pub mod workers;
