//! Command executors
//!
//! [`EventRouter`] maps every `(type, command)` pair to exactly one executor method
//! and folds the outcome into a [`JobResult`]. Nothing raised by an executor crosses
//! this boundary.

pub mod apps;
pub mod env;
pub mod repos;
pub mod runtime;
pub mod system;

use tracing::warn;

use crate::events::model::{AppEvent, Event, JobResult, RepoEvent, SystemEvent};
use crate::executors::apps::AppExecutor;
use crate::executors::repos::RepoExecutor;
use crate::executors::system::SystemExecutor;

/// Routes events to executors
#[derive(Clone)]
pub struct EventRouter {
    apps: AppExecutor,
    repos: RepoExecutor,
    system: SystemExecutor,
}

impl EventRouter {
    pub fn new(apps: AppExecutor, repos: RepoExecutor, system: SystemExecutor) -> Self {
        Self {
            apps,
            repos,
            system,
        }
    }

    pub async fn route(&self, event: &Event) -> JobResult {
        let outcome = match event {
            Event::App(e) => match e {
                AppEvent::Install { appid, form } => self.apps.install(appid, form).await,
                AppEvent::Start { appid, form } => self.apps.start(appid, form).await,
                AppEvent::Stop { appid } => self.apps.stop(appid).await,
                AppEvent::Restart { appid, form } => self.apps.restart(appid, form).await,
                AppEvent::Uninstall { appid } => self.apps.uninstall(appid).await,
                AppEvent::Update { appid, form } => self.apps.update(appid, form).await,
                AppEvent::Reset { appid, form } => self.apps.reset(appid, form).await,
                AppEvent::GenerateEnv { appid, form } => self.apps.generate_env(appid, form).await,
                AppEvent::Backup { appid } => self.apps.backup(appid).await,
                AppEvent::Restore { appid, filename } => self.apps.restore(appid, filename).await,
            },
            Event::Repo(e) => match e {
                RepoEvent::Clone { url } => self.repos.clone_repo(url).await,
                RepoEvent::Update { url } => self.repos.update_repo(url).await,
            },
            Event::System(e) => match e {
                SystemEvent::SystemInfo => self.system.system_info().await,
                SystemEvent::Restart => self.system.restart().await,
                SystemEvent::Update { version } => self.system.update(version).await,
            },
        };

        if let Err(e) = &outcome {
            warn!("{} failed: {}", event, e);
        }
        JobResult::from(outcome)
    }
}
