//! App lifecycle service
//!
//! Glue between callers, the status store and the event queue: every operation
//! moves the app to a transient status, dispatches the matching event, waits for the
//! worker's result and settles the status from it.

use std::sync::Arc;

use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::apps::status::{AppAction, AppStatus, AppStatusMachine};
use crate::apps::store::{App, AppStore};
use crate::backup::manager::{BackupInfo, BackupManager};
use crate::errors::DockhandError;
use crate::events::dispatcher::EventDispatcher;
use crate::events::model::{
    validate_app_id, validate_filename, validate_form, AppEvent, Event, Form, FormValue,
};
use crate::executors::env::AppManifest;
use crate::storage::layout::StorageLayout;

/// One lifecycle operation, as run by [`AppLifecycle::spawn`]
#[derive(Debug, Clone, PartialEq)]
pub enum LifecycleOp {
    Install { app_id: String, form: Form },
    Start { app_id: String },
    Stop { app_id: String },
    Restart { app_id: String },
    Update { app_id: String },
    Reset { app_id: String },
    Uninstall { app_id: String },
    UpdateConfig { app_id: String, form: Form },
    Backup { app_id: String },
    Restore { app_id: String, filename: String },
}

impl LifecycleOp {
    /// Build the operation for `action`
    pub fn new(action: AppAction, app_id: &str, form: Form) -> Result<Self, DockhandError> {
        let app_id = app_id.to_string();
        Ok(match action {
            AppAction::Install => LifecycleOp::Install { app_id, form },
            AppAction::Start => LifecycleOp::Start { app_id },
            AppAction::Stop => LifecycleOp::Stop { app_id },
            AppAction::Restart => LifecycleOp::Restart { app_id },
            AppAction::Update => LifecycleOp::Update { app_id },
            AppAction::Reset => LifecycleOp::Reset { app_id },
            AppAction::Uninstall => LifecycleOp::Uninstall { app_id },
            AppAction::UpdateConfig => LifecycleOp::UpdateConfig { app_id, form },
            AppAction::Backup => LifecycleOp::Backup { app_id },
            AppAction::Restore => {
                return Err(DockhandError::ValidationError(
                    "restore requires a backup filename".to_string(),
                ))
            }
        })
    }

    pub fn app_id(&self) -> &str {
        match self {
            LifecycleOp::Install { app_id, .. }
            | LifecycleOp::Start { app_id }
            | LifecycleOp::Stop { app_id }
            | LifecycleOp::Restart { app_id }
            | LifecycleOp::Update { app_id }
            | LifecycleOp::Reset { app_id }
            | LifecycleOp::Uninstall { app_id }
            | LifecycleOp::UpdateConfig { app_id, .. }
            | LifecycleOp::Backup { app_id }
            | LifecycleOp::Restore { app_id, .. } => app_id,
        }
    }
}

/// Drives app operations through the queue and keeps statuses consistent
#[derive(Clone)]
pub struct AppLifecycle {
    store: Arc<dyn AppStore>,
    dispatcher: EventDispatcher,
    backups: BackupManager,
    layout: StorageLayout,
    repo_id: Option<String>,
}

impl AppLifecycle {
    pub fn new(
        store: Arc<dyn AppStore>,
        dispatcher: EventDispatcher,
        layout: StorageLayout,
        repo_id: Option<String>,
    ) -> Self {
        Self {
            store,
            dispatcher,
            backups: BackupManager::new(layout.clone()),
            layout,
            repo_id,
        }
    }

    pub fn store(&self) -> &Arc<dyn AppStore> {
        &self.store
    }

    pub async fn get_app(&self, app_id: &str) -> Result<App, DockhandError> {
        self.store
            .get(app_id)
            .await?
            .ok_or_else(|| DockhandError::NotFound(format!("App {} not found", app_id)))
    }

    pub async fn install_app(&self, app_id: &str, form: Form) -> Result<String, DockhandError> {
        validate_app_id(app_id)?;
        validate_form(&form)?;
        if self.store.get(app_id).await?.is_some() {
            return Err(DockhandError::ValidationError(format!(
                "App {} is already installed",
                app_id
            )));
        }
        if !self.is_available(app_id).await {
            return Err(DockhandError::NotFound(format!(
                "App {} not found in the app store",
                app_id
            )));
        }
        let transient = AppStatusMachine::begin(None, AppAction::Install)?;

        let (exposed, domain) = exposure(&form);
        self.store
            .insert(App {
                id: app_id.to_string(),
                status: transient,
                config: form.clone(),
                version: None,
                exposed,
                domain,
            })
            .await?;

        let event = Event::App(AppEvent::Install {
            appid: app_id.to_string(),
            form,
        });
        let outcome = self.dispatch(AppAction::Install, app_id, transient, &event).await;

        if outcome.is_ok() {
            match AppManifest::load(&self.layout, app_id).await {
                Ok(manifest) => {
                    if let Some(mut app) = self.store.get(app_id).await? {
                        app.version = manifest.version;
                        self.store.update(app).await?;
                    }
                }
                Err(e) => warn!("Could not read version of {}: {}", app_id, e),
            }
        }
        outcome
    }

    pub async fn start_app(&self, app_id: &str) -> Result<String, DockhandError> {
        self.simple(AppAction::Start, app_id, |appid, form| AppEvent::Start { appid, form })
            .await
    }

    pub async fn stop_app(&self, app_id: &str) -> Result<String, DockhandError> {
        self.simple(AppAction::Stop, app_id, |appid, _| AppEvent::Stop { appid })
            .await
    }

    pub async fn restart_app(&self, app_id: &str) -> Result<String, DockhandError> {
        self.simple(AppAction::Restart, app_id, |appid, form| AppEvent::Restart {
            appid,
            form,
        })
        .await
    }

    pub async fn update_app(&self, app_id: &str) -> Result<String, DockhandError> {
        let message = self
            .simple(AppAction::Update, app_id, |appid, form| AppEvent::Update { appid, form })
            .await?;
        if let (Ok(manifest), Some(mut app)) = (
            AppManifest::load(&self.layout, app_id).await,
            self.store.get(app_id).await?,
        ) {
            app.version = manifest.version;
            self.store.update(app).await?;
        }
        Ok(message)
    }

    pub async fn reset_app(&self, app_id: &str) -> Result<String, DockhandError> {
        self.simple(AppAction::Reset, app_id, |appid, form| AppEvent::Reset { appid, form })
            .await
    }

    pub async fn uninstall_app(&self, app_id: &str) -> Result<String, DockhandError> {
        self.simple(AppAction::Uninstall, app_id, |appid, _| AppEvent::Uninstall {
            appid,
        })
        .await
    }

    pub async fn backup_app(&self, app_id: &str) -> Result<String, DockhandError> {
        self.simple(AppAction::Backup, app_id, |appid, _| AppEvent::Backup { appid })
            .await
    }

    pub async fn restore_app(&self, app_id: &str, filename: &str) -> Result<String, DockhandError> {
        validate_filename(filename)?;
        self.get_app(app_id).await?;
        if !self.layout.app_backups_dir(app_id).file(filename).exists().await {
            return Err(DockhandError::FileSystemError(
                "backup file does not exist".to_string(),
            ));
        }
        let filename = filename.to_string();
        self.simple(AppAction::Restore, app_id, move |appid, _| AppEvent::Restore {
            appid,
            filename,
        })
        .await
    }

    /// Persist new form values, regenerate the env and restart a running app
    pub async fn update_app_config(&self, app_id: &str, form: Form) -> Result<String, DockhandError> {
        validate_form(&form)?;
        let mut app = self.get_app(app_id).await?;
        let prior = app.status;
        let transient = AppStatusMachine::begin(Some(prior), AppAction::UpdateConfig)?;

        let (exposed, domain) = exposure(&form);
        app.config = form.clone();
        app.exposed = exposed;
        app.domain = domain;
        app.status = transient;
        self.store.update(app).await?;

        let event = Event::App(AppEvent::GenerateEnv {
            appid: app_id.to_string(),
            form: form.clone(),
        });
        let mut result = self
            .dispatcher
            .dispatch_and_wait(&event, Some(self.dispatcher.timeout_for(&event)))
            .await;

        if result.success && prior == AppStatus::Running {
            let restart = Event::App(AppEvent::Restart {
                appid: app_id.to_string(),
                form,
            });
            result = self
                .dispatcher
                .dispatch_and_wait(&restart, Some(self.dispatcher.timeout_for(&restart)))
                .await;
        }

        self.settle(AppAction::UpdateConfig, app_id, prior, result.success)
            .await?;
        into_outcome(app_id, AppAction::UpdateConfig, result)
    }

    /// Whether `app_id` is in the cloned app store or already copied locally
    async fn is_available(&self, app_id: &str) -> bool {
        if self.layout.app_dir(app_id).exists().await {
            return true;
        }
        match &self.repo_id {
            Some(repo_id) => self.layout.repo_apps_dir(repo_id).subdir(app_id).exists().await,
            None => false,
        }
    }

    pub async fn list_backups(&self, app_id: &str) -> Result<Vec<BackupInfo>, DockhandError> {
        self.get_app(app_id).await?;
        self.backups.list_backups(app_id).await
    }

    pub async fn delete_backup(&self, app_id: &str, filename: &str) -> Result<(), DockhandError> {
        self.get_app(app_id).await?;
        self.backups.delete_backup(app_id, filename).await
    }

    /// Run `op`
    pub async fn run(&self, op: LifecycleOp) -> Result<String, DockhandError> {
        match op {
            LifecycleOp::Install { app_id, form } => self.install_app(&app_id, form).await,
            LifecycleOp::Start { app_id } => self.start_app(&app_id).await,
            LifecycleOp::Stop { app_id } => self.stop_app(&app_id).await,
            LifecycleOp::Restart { app_id } => self.restart_app(&app_id).await,
            LifecycleOp::Update { app_id } => self.update_app(&app_id).await,
            LifecycleOp::Reset { app_id } => self.reset_app(&app_id).await,
            LifecycleOp::Uninstall { app_id } => self.uninstall_app(&app_id).await,
            LifecycleOp::UpdateConfig { app_id, form } => {
                self.update_app_config(&app_id, form).await
            }
            LifecycleOp::Backup { app_id } => self.backup_app(&app_id).await,
            LifecycleOp::Restore { app_id, filename } => {
                self.restore_app(&app_id, &filename).await
            }
        }
    }

    /// Run `op` on a background task. A failure is logged once, here.
    pub fn spawn(&self, op: LifecycleOp) -> JoinHandle<Result<String, DockhandError>> {
        let lifecycle = self.clone();
        tokio::spawn(async move {
            let description = format!("{:?}", op);
            let result = lifecycle.run(op).await;
            if let Err(e) = &result {
                error!("Background operation {} failed: {}", description, e);
            }
            result
        })
    }

    async fn simple<F>(&self, action: AppAction, app_id: &str, build: F) -> Result<String, DockhandError>
    where
        F: FnOnce(String, Form) -> AppEvent,
    {
        let app = self.get_app(app_id).await?;
        let transient = AppStatusMachine::begin(Some(app.status), action)?;
        let prior = app.status;
        self.store.set_status(app_id, transient).await?;

        let event = Event::App(build(app_id.to_string(), app.config));
        self.dispatch(action, app_id, prior, &event).await
    }

    async fn dispatch(
        &self,
        action: AppAction,
        app_id: &str,
        prior: AppStatus,
        event: &Event,
    ) -> Result<String, DockhandError> {
        info!("{} {}", action.as_str(), app_id);
        let result = self
            .dispatcher
            .dispatch_and_wait(event, Some(self.dispatcher.timeout_for(event)))
            .await;
        self.settle(action, app_id, prior, result.success).await?;
        into_outcome(app_id, action, result)
    }

    async fn settle(
        &self,
        action: AppAction,
        app_id: &str,
        prior: AppStatus,
        success: bool,
    ) -> Result<(), DockhandError> {
        match AppStatusMachine::settle(action, success, prior) {
            Some(status) => self.store.set_status(app_id, status).await,
            None => self.store.delete(app_id).await,
        }
    }
}

fn into_outcome(
    app_id: &str,
    action: AppAction,
    result: crate::events::model::JobResult,
) -> Result<String, DockhandError> {
    if result.success {
        Ok(result.message)
    } else {
        let outcome = if result.timed_out() { "timed out" } else { "failed" };
        warn!("{} of {} {}: {}", action.as_str(), app_id, outcome, result.message);
        Err(result.into_error())
    }
}

fn exposure(form: &Form) -> (bool, Option<String>) {
    let exposed = form
        .get("exposed")
        .and_then(FormValue::as_bool)
        .unwrap_or(false);
    let domain = form
        .get("domain")
        .map(FormValue::to_env_string)
        .filter(|d| !d.is_empty());
    (exposed, domain)
}
