//! App store repository executor

use std::sync::Arc;

use tracing::{debug, info};

use crate::errors::DockhandError;
use crate::executors::runtime::CommandRunner;
use crate::storage::layout::StorageLayout;
use crate::utils::sha256_hash;

/// Directory name of a cloned repository
pub fn repo_id(url: &str) -> String {
    sha256_hash(url.as_bytes())
}

/// Clones and updates app store repositories with git
#[derive(Clone)]
pub struct RepoExecutor {
    layout: StorageLayout,
    runner: Arc<dyn CommandRunner>,
}

impl RepoExecutor {
    pub fn new(layout: StorageLayout, runner: Arc<dyn CommandRunner>) -> Self {
        Self { layout, runner }
    }

    /// Clone `url` unless it is already present
    pub async fn clone_repo(&self, url: &str) -> Result<String, DockhandError> {
        let dir = self.layout.repo_dir(&repo_id(url));
        if dir.exists().await {
            debug!("Repository {} already cloned at {}", url, dir.path().display());
            return Ok(format!("Repository {} already cloned", url));
        }

        info!("Cloning repository {}", url);
        self.layout.repos_dir().create().await?;
        let target = dir.path().display().to_string();
        self.git(&["clone", url, &target]).await?;
        Ok(format!("Repository {} cloned", url))
    }

    /// Hard-reset a clone to its remote head, cloning first when missing
    pub async fn update_repo(&self, url: &str) -> Result<String, DockhandError> {
        let dir = self.layout.repo_dir(&repo_id(url));
        if !dir.exists().await {
            return self.clone_repo(url).await;
        }

        info!("Updating repository {}", url);
        let path = dir.path().display().to_string();
        self.git(&["-C", &path, "fetch", "--all"]).await?;
        self.git(&["-C", &path, "reset", "--hard", "origin/HEAD"])
            .await?;
        Ok(format!("Repository {} updated", url))
    }

    async fn git(&self, args: &[&str]) -> Result<String, DockhandError> {
        let args: Vec<String> = args.iter().map(|a| a.to_string()).collect();
        self.runner.run("git", &args).await?.into_result()
    }
}
