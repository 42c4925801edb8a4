//! App command executor

use tracing::{debug, info, warn};

use crate::backup::manager::BackupManager;
use crate::compose::chain::{ChainResolver, ComposeChain};
use crate::compose::dynamic::DynamicCompose;
use crate::compose::merge::resolve_document;
use crate::errors::DockhandError;
use crate::events::model::Form;
use crate::executors::env::EnvGenerator;
use crate::executors::runtime::ComposeRuntime;
use crate::storage::layout::{StorageLayout, COMPOSE_FILE, DYNAMIC_COMPOSE_FILE};

/// Runs app lifecycle commands against the container runtime
#[derive(Clone)]
pub struct AppExecutor {
    layout: StorageLayout,
    chains: ChainResolver,
    runtime: ComposeRuntime,
    env: EnvGenerator,
    backups: BackupManager,
    repo_id: Option<String>,
}

impl AppExecutor {
    pub fn new(
        layout: StorageLayout,
        chains: ChainResolver,
        runtime: ComposeRuntime,
        env: EnvGenerator,
        repo_id: Option<String>,
    ) -> Self {
        Self {
            backups: BackupManager::new(layout.clone()),
            layout,
            chains,
            runtime,
            env,
            repo_id,
        }
    }

    pub fn backups(&self) -> &BackupManager {
        &self.backups
    }

    /// Copy the app from the repository, write its env, then `up -d`
    pub async fn install(&self, app_id: &str, form: &Form) -> Result<String, DockhandError> {
        let app_dir = self.layout.app_dir(app_id);
        if !app_dir.exists().await {
            self.copy_from_repo(app_id).await?;
        }
        self.layout.app_data_dir(app_id).create().await?;
        self.env.write_app_env(app_id, form).await?;
        self.write_dynamic_compose(app_id).await?;

        self.compose(app_id, &["up", "-d"]).await
    }

    pub async fn start(&self, app_id: &str, form: &Form) -> Result<String, DockhandError> {
        self.refresh_env(app_id, form).await?;
        self.compose(app_id, &["start"]).await
    }

    pub async fn stop(&self, app_id: &str) -> Result<String, DockhandError> {
        self.compose(app_id, &["stop"]).await
    }

    pub async fn restart(&self, app_id: &str, form: &Form) -> Result<String, DockhandError> {
        self.refresh_env(app_id, form).await?;
        self.compose(app_id, &["restart"]).await
    }

    /// `down`, then remove the app's config and data directories
    pub async fn uninstall(&self, app_id: &str) -> Result<String, DockhandError> {
        let output = match self.chains.resolve(app_id).await {
            Ok(chain) => self.run(&chain, &["down", "--remove-orphans"]).await?,
            Err(DockhandError::NotFound(msg)) => {
                warn!("Skipping compose down for {}: {}", app_id, msg);
                String::new()
            }
            Err(e) => return Err(e),
        };

        self.layout.app_dir(app_id).delete().await?;
        self.layout.app_data_dir(app_id).delete().await?;
        info!("Removed files of {}", app_id);
        Ok(output)
    }

    /// Refresh the app from the repository, pull new images and recreate containers
    pub async fn update(&self, app_id: &str, form: &Form) -> Result<String, DockhandError> {
        self.ensure_installed(app_id).await?;
        match self.repo_app_dir(app_id) {
            Some(source) if source.exists().await => {
                let app_dir = self.layout.app_dir(app_id);
                app_dir.empty().await?;
                source.copy_to(&app_dir, &[]).await?;
                debug!("Refreshed {} from {}", app_id, source.path().display());
            }
            _ => warn!("No repository copy of {}, updating in place", app_id),
        }
        self.env.write_app_env(app_id, form).await?;
        self.write_dynamic_compose(app_id).await?;

        let chain = self.chains.resolve(app_id).await?;
        let pulled = self.run(&chain, &["pull"]).await?;
        let recreated = self
            .run(&chain, &["up", "-d", "--force-recreate", "--remove-orphans"])
            .await?;
        Ok(join_output(&pulled, &recreated))
    }

    /// Tear down, wipe the data directory (config kept) and recreate
    pub async fn reset(&self, app_id: &str, form: &Form) -> Result<String, DockhandError> {
        let chain = self.chains.resolve(app_id).await?;
        let down = self.run(&chain, &["down", "--remove-orphans"]).await?;

        self.layout.app_data_dir(app_id).empty().await?;
        self.env.write_app_env(app_id, form).await?;

        let up = self.compose(app_id, &["up", "-d"]).await?;
        Ok(join_output(&down, &up))
    }

    /// Recompute `app.env` only
    pub async fn generate_env(&self, app_id: &str, form: &Form) -> Result<String, DockhandError> {
        self.ensure_installed(app_id).await?;
        self.env.write_app_env(app_id, form).await?;
        Ok(format!("Environment of {} generated", app_id))
    }

    pub async fn backup(&self, app_id: &str) -> Result<String, DockhandError> {
        self.backups.backup(app_id).await
    }

    /// Stop containers, restore files from `filename`, start again
    pub async fn restore(&self, app_id: &str, filename: &str) -> Result<String, DockhandError> {
        // Fail on a missing archive before touching any container
        if !self.layout.app_backups_dir(app_id).file(filename).exists().await {
            return Err(DockhandError::FileSystemError(
                "backup file does not exist".to_string(),
            ));
        }
        if let Ok(chain) = self.chains.resolve(app_id).await {
            self.run(&chain, &["stop"]).await?;
        }

        self.backups.restore(app_id, filename).await?;
        self.compose(app_id, &["up", "-d"]).await
    }

    async fn compose(&self, app_id: &str, subcommand: &[&str]) -> Result<String, DockhandError> {
        let chain = self.chains.resolve(app_id).await?;
        self.run(&chain, subcommand).await
    }

    async fn run(&self, chain: &ComposeChain, subcommand: &[&str]) -> Result<String, DockhandError> {
        self.runtime.compose(chain, subcommand).await?.into_result()
    }

    async fn refresh_env(&self, app_id: &str, form: &Form) -> Result<(), DockhandError> {
        if !form.is_empty() {
            self.env.write_app_env(app_id, form).await?;
        }
        Ok(())
    }

    async fn ensure_installed(&self, app_id: &str) -> Result<(), DockhandError> {
        if self.layout.app_dir(app_id).exists().await {
            Ok(())
        } else {
            Err(DockhandError::NotFound(format!(
                "App {} is not installed",
                app_id
            )))
        }
    }

    fn repo_app_dir(&self, app_id: &str) -> Option<crate::filesys::dir::Dir> {
        self.repo_id
            .as_deref()
            .map(|repo_id| self.layout.repo_apps_dir(repo_id).subdir(app_id))
    }

    async fn copy_from_repo(&self, app_id: &str) -> Result<(), DockhandError> {
        let source = match self.repo_app_dir(app_id) {
            Some(source) if source.exists().await => source,
            _ => {
                return Err(DockhandError::NotFound(format!(
                    "App {} not found in the app store",
                    app_id
                )))
            }
        };
        source.copy_to(&self.layout.app_dir(app_id), &[]).await?;
        debug!("Copied {} from {}", app_id, source.path().display());
        Ok(())
    }

    /// Render `docker-compose.json` into `docker-compose.yml` for this host
    async fn write_dynamic_compose(&self, app_id: &str) -> Result<(), DockhandError> {
        let app_dir = self.layout.app_dir(app_id);
        let dynamic = app_dir.file(DYNAMIC_COMPOSE_FILE);
        if !dynamic.exists().await {
            return Ok(());
        }

        let compose: DynamicCompose = dynamic.read_json().await.map_err(|e| {
            DockhandError::ValidationError(format!(
                "Invalid {} for {}: {}",
                DYNAMIC_COMPOSE_FILE, app_id, e
            ))
        })?;
        let document = resolve_document(&compose, self.chains.architecture())?;
        app_dir
            .file(COMPOSE_FILE)
            .write_atomic(document.to_yaml()?.as_bytes())
            .await?;
        debug!(
            "Rendered {} services for {} on {}",
            document.services.len(),
            app_id,
            self.chains.architecture()
        );
        Ok(())
    }
}

fn join_output(first: &str, second: &str) -> String {
    match (first.is_empty(), second.is_empty()) {
        (true, _) => second.to_string(),
        (false, true) => first.to_string(),
        (false, false) => format!("{}\n{}", first, second),
    }
}
