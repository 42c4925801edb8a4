//! Storage layout configuration

use std::path::PathBuf;

use crate::errors::DockhandError;
use crate::filesys::dir::Dir;
use crate::filesys::file::File;

/// Name of the per-app generated env file
pub const APP_ENV_FILE: &str = "app.env";

/// Name of the default compose file
pub const COMPOSE_FILE: &str = "docker-compose.yml";

/// Name of the dynamic compose document
pub const DYNAMIC_COMPOSE_FILE: &str = "docker-compose.json";

/// Name of the repository-wide common compose file
pub const COMMON_COMPOSE_FILE: &str = "docker-compose.common.yml";

/// Name of the app manifest
pub const APP_MANIFEST_FILE: &str = "config.json";

/// Filesystem layout of the data directories
///
/// ```text
/// <data_dir>/apps/<id>/docker-compose.yml
/// <data_dir>/backups/<id>/<id>-<millis>.tar.gz
/// <data_dir>/user-config/<id>/{docker-compose.yml, app.env}
/// <data_dir>/repos/<repo_id>/apps/docker-compose.common.yml
/// <app_data_dir>/<id>/app.env
/// ```
#[derive(Debug, Clone)]
pub struct StorageLayout {
    /// Base directory for platform state
    pub data_dir: PathBuf,

    /// Base directory for per-app persistent data
    pub app_data_dir: PathBuf,
}

impl StorageLayout {
    /// Create a layout with `app_data_dir` defaulting to `<data_dir>/app-data`
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        let data_dir = data_dir.into();
        let app_data_dir = data_dir.join("app-data");
        Self {
            data_dir,
            app_data_dir,
        }
    }

    /// Override the app data directory
    pub fn with_app_data_dir(mut self, app_data_dir: impl Into<PathBuf>) -> Self {
        self.app_data_dir = app_data_dir.into();
        self
    }

    /// Installed apps root
    pub fn apps_dir(&self) -> Dir {
        Dir::new(self.data_dir.join("apps"))
    }

    /// Config directory of one app
    pub fn app_dir(&self, app_id: &str) -> Dir {
        self.apps_dir().subdir(app_id)
    }

    /// Data directory of one app
    pub fn app_data_dir(&self, app_id: &str) -> Dir {
        Dir::new(self.app_data_dir.join(app_id))
    }

    /// Generated env file of one app
    pub fn app_env_file(&self, app_id: &str) -> File {
        self.app_data_dir(app_id).file(APP_ENV_FILE)
    }

    /// Backups root
    pub fn backups_dir(&self) -> Dir {
        Dir::new(self.data_dir.join("backups"))
    }

    /// Backup directory of one app
    pub fn app_backups_dir(&self, app_id: &str) -> Dir {
        self.backups_dir().subdir(app_id)
    }

    /// User override directory of one app
    pub fn user_config_dir(&self, app_id: &str) -> Dir {
        Dir::new(self.data_dir.join("user-config").join(app_id))
    }

    /// Cloned repositories root
    pub fn repos_dir(&self) -> Dir {
        Dir::new(self.data_dir.join("repos"))
    }

    /// One cloned repository
    pub fn repo_dir(&self, repo_id: &str) -> Dir {
        self.repos_dir().subdir(repo_id)
    }

    /// Apps directory inside a cloned repository
    pub fn repo_apps_dir(&self, repo_id: &str) -> Dir {
        self.repo_dir(repo_id).subdir("apps")
    }

    /// Internal state (status store, system info)
    pub fn state_dir(&self) -> Dir {
        Dir::new(self.data_dir.join("state"))
    }

    /// App status store document
    pub fn apps_state_file(&self) -> File {
        self.state_dir().file("apps.json")
    }

    /// Last collected system info
    pub fn system_info_file(&self) -> File {
        self.state_dir().file("system-info.json")
    }

    /// Scratch space for backup staging and extraction
    pub fn tmp_dir(&self) -> Dir {
        Dir::new(self.data_dir.join("tmp"))
    }

    /// Setup the storage layout (create directories)
    pub async fn setup(&self) -> Result<(), DockhandError> {
        self.apps_dir().create().await?;
        Dir::new(&self.app_data_dir).create().await?;
        self.backups_dir().create().await?;
        self.repos_dir().create().await?;
        self.state_dir().create().await?;
        self.tmp_dir().create().await?;
        Ok(())
    }
}

impl Default for StorageLayout {
    fn default() -> Self {
        Self::new("/var/lib/dockhand")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_paths() {
        let layout = StorageLayout::new("/data");
        assert_eq!(
            layout.app_env_file("nginx").path(),
            std::path::Path::new("/data/app-data/nginx/app.env")
        );
        assert_eq!(
            layout.user_config_dir("nginx").path(),
            std::path::Path::new("/data/user-config/nginx")
        );

        let layout = layout.with_app_data_dir("/mnt/appdata");
        assert_eq!(
            layout.app_data_dir("nginx").path(),
            std::path::Path::new("/mnt/appdata/nginx")
        );
    }
}
