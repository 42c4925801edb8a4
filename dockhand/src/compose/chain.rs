//! Compose file and env file chain resolution

use std::path::PathBuf;

use tracing::debug;

use crate::compose::merge::normalize_architecture;
use crate::errors::DockhandError;
use crate::storage::layout::{StorageLayout, APP_ENV_FILE, COMMON_COMPOSE_FILE, COMPOSE_FILE};

/// Ordered files handed to the container runtime for one app
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ComposeChain {
    /// Compose project name (the app id)
    pub project: String,

    /// `--env-file` arguments, in order
    pub env_files: Vec<PathBuf>,

    /// `-f` arguments, in order
    pub compose_files: Vec<PathBuf>,
}

/// Resolves [`ComposeChain`]s from the storage layout
#[derive(Debug, Clone)]
pub struct ChainResolver {
    layout: StorageLayout,
    architecture: String,
    repo_id: Option<String>,
}

impl ChainResolver {
    pub fn new(layout: StorageLayout, architecture: &str, repo_id: Option<String>) -> Self {
        Self {
            layout,
            architecture: normalize_architecture(architecture).to_string(),
            repo_id,
        }
    }

    pub fn architecture(&self) -> &str {
        &self.architecture
    }

    /// Resolve the chain for `app_id`.
    ///
    /// Compose files: the app's `docker-compose.<arch>.yml` when present, else its
    /// `docker-compose.yml`; then the repository's common file; then the user
    /// override. Env files: generated `app.env`, then the user override.
    pub async fn resolve(&self, app_id: &str) -> Result<ComposeChain, DockhandError> {
        let app_dir = self.layout.app_dir(app_id);
        let arch_file = app_dir.file(&format!("docker-compose.{}.yml", self.architecture));
        let default_file = app_dir.file(COMPOSE_FILE);

        let mut compose_files = Vec::new();
        if arch_file.exists().await {
            compose_files.push(arch_file.path().to_path_buf());
        } else if default_file.exists().await {
            compose_files.push(default_file.path().to_path_buf());
        } else {
            return Err(DockhandError::NotFound(format!(
                "No compose file found for app {}",
                app_id
            )));
        }

        if let Some(repo_id) = &self.repo_id {
            let common = self.layout.repo_apps_dir(repo_id).file(COMMON_COMPOSE_FILE);
            if common.exists().await {
                compose_files.push(common.path().to_path_buf());
            } else {
                debug!("No common compose file at {}", common.path().display());
            }
        }

        let user_dir = self.layout.user_config_dir(app_id);
        let user_compose = user_dir.file(COMPOSE_FILE);
        if user_compose.exists().await {
            compose_files.push(user_compose.path().to_path_buf());
        }

        let mut env_files = Vec::new();
        let app_env = self.layout.app_env_file(app_id);
        if app_env.exists().await {
            env_files.push(app_env.path().to_path_buf());
        }
        let user_env = user_dir.file(APP_ENV_FILE);
        if user_env.exists().await {
            env_files.push(user_env.path().to_path_buf());
        }

        Ok(ComposeChain {
            project: app_id.to_string(),
            env_files,
            compose_files,
        })
    }
}

impl ComposeChain {
    /// Runtime arguments for `subcommand`:
    /// `compose --project-name <id> --env-file <..> -f <..> <subcommand..>`
    pub fn args(&self, subcommand: &[&str]) -> Vec<String> {
        let mut args = vec![
            "compose".to_string(),
            "--project-name".to_string(),
            self.project.clone(),
        ];
        for env_file in &self.env_files {
            args.push("--env-file".to_string());
            args.push(env_file.display().to_string());
        }
        for compose_file in &self.compose_files {
            args.push("-f".to_string());
            args.push(compose_file.display().to_string());
        }
        args.extend(subcommand.iter().map(|s| s.to_string()));
        args
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn setup(tmp: &std::path::Path) -> StorageLayout {
        let layout = StorageLayout::new(tmp);
        let app = layout.app_dir("jellyfin");
        app.file(COMPOSE_FILE).write_string("services: {}").await.unwrap();
        layout
            .repo_apps_dir("repo")
            .file(COMMON_COMPOSE_FILE)
            .write_string("networks: {}")
            .await
            .unwrap();
        layout
            .app_env_file("jellyfin")
            .write_string("APP_ID=jellyfin\n")
            .await
            .unwrap();
        layout
    }

    #[tokio::test]
    async fn test_default_chain() {
        let tmp = tempfile::tempdir().unwrap();
        let layout = setup(tmp.path()).await;
        let chain = ChainResolver::new(layout.clone(), "amd64", Some("repo".into()))
            .resolve("jellyfin")
            .await
            .unwrap();

        assert_eq!(
            chain.compose_files,
            vec![
                layout.app_dir("jellyfin").file(COMPOSE_FILE).path().to_path_buf(),
                layout
                    .repo_apps_dir("repo")
                    .file(COMMON_COMPOSE_FILE)
                    .path()
                    .to_path_buf(),
            ]
        );
        assert_eq!(chain.env_files, vec![layout.app_env_file("jellyfin").path().to_path_buf()]);
    }

    #[tokio::test]
    async fn test_arch_file_wins_and_chain_ends_with_common() {
        let tmp = tempfile::tempdir().unwrap();
        let layout = setup(tmp.path()).await;
        let arch_file = layout.app_dir("jellyfin").file("docker-compose.arm64.yml");
        arch_file.write_string("services: {}").await.unwrap();

        let chain = ChainResolver::new(layout.clone(), "aarch64", Some("repo".into()))
            .resolve("jellyfin")
            .await
            .unwrap();
        assert_eq!(chain.compose_files[0], arch_file.path());
        assert!(chain
            .compose_files
            .last()
            .unwrap()
            .ends_with(COMMON_COMPOSE_FILE));
        assert_eq!(chain.compose_files.len(), 2);
    }

    #[tokio::test]
    async fn test_user_overrides_come_last() {
        let tmp = tempfile::tempdir().unwrap();
        let layout = setup(tmp.path()).await;
        let user = layout.user_config_dir("jellyfin");
        user.file(COMPOSE_FILE).write_string("services: {}").await.unwrap();
        user.file(APP_ENV_FILE).write_string("TZ=UTC\n").await.unwrap();

        let chain = ChainResolver::new(layout, "amd64", Some("repo".into()))
            .resolve("jellyfin")
            .await
            .unwrap();
        assert_eq!(chain.compose_files.len(), 3);
        assert_eq!(chain.compose_files[2], user.file(COMPOSE_FILE).path());
        assert_eq!(chain.env_files[1], user.file(APP_ENV_FILE).path());

        let args = chain.args(&["up", "-d"]);
        assert_eq!(&args[..3], &["compose", "--project-name", "jellyfin"]);
        assert_eq!(&args[args.len() - 2..], &["up", "-d"]);
        assert_eq!(args.iter().filter(|a| *a == "-f").count(), 3);
        assert_eq!(args.iter().filter(|a| *a == "--env-file").count(), 2);
    }

    #[tokio::test]
    async fn test_missing_compose_file() {
        let tmp = tempfile::tempdir().unwrap();
        let layout = StorageLayout::new(tmp.path());
        let err = ChainResolver::new(layout, "amd64", None)
            .resolve("ghost")
            .await
            .unwrap_err();
        assert!(matches!(err, DockhandError::NotFound(_)));
    }
}
