//! App backup and restore

use std::future::Future;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::backup::archive;
use crate::errors::DockhandError;
use crate::events::model::validate_filename;
use crate::filesys::dir::Dir;
use crate::storage::layout::StorageLayout;
use crate::utils::epoch_millis;

/// Nested directory never copied into an archive
const BACKUPS_DIR_NAME: &str = "backups";

/// Archive subtree holding the app config directory
const ARCHIVE_APP_DIR: &str = "app";

/// Archive subtree holding the app data directory
const ARCHIVE_DATA_DIR: &str = "app-data";

/// One archive in an app's backup directory
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackupInfo {
    pub filename: String,
    pub size: u64,
    pub date: DateTime<Utc>,
}

/// Archives and restores app config and data directories
#[derive(Debug, Clone)]
pub struct BackupManager {
    layout: StorageLayout,
}

impl BackupManager {
    pub fn new(layout: StorageLayout) -> Self {
        Self { layout }
    }

    /// Archive `app_id` into `backups/<id>/<id>-<millis>.tar.gz`. Returns the filename.
    pub async fn backup(&self, app_id: &str) -> Result<String, DockhandError> {
        let app_dir = self.layout.app_dir(app_id);
        if !app_dir.exists().await {
            return Err(DockhandError::NotFound(format!("App {} is not installed", app_id)));
        }

        let filename = format!("{}-{}.tar.gz", app_id, epoch_millis());
        info!("Backing up {} to {}", app_id, filename);

        let scratch = self.layout.tmp_dir();
        let staging = Dir::create_temp_dir(&scratch, &format!("backup-{}", app_id)).await?;
        let staged_archive = scratch.file(&format!("{}.partial", staging_name(&staging)));

        let result = with_cleanup(&staging, async {
            app_dir
                .copy_to(&staging.subdir(ARCHIVE_APP_DIR), &[BACKUPS_DIR_NAME])
                .await?;

            let data_dir = self.layout.app_data_dir(app_id);
            let staged_data = staging.subdir(ARCHIVE_DATA_DIR);
            if data_dir.exists().await {
                data_dir.copy_to(&staged_data, &[BACKUPS_DIR_NAME]).await?;
            } else {
                staged_data.create().await?;
            }

            archive::create_tar_gz(staging.path(), staged_archive.path()).await?;

            let backups_dir = self.layout.app_backups_dir(app_id);
            backups_dir.create().await?;
            tokio::fs::copy(staged_archive.path(), backups_dir.file(&filename).path()).await?;
            Ok::<(), DockhandError>(())
        })
        .await;

        if let Err(e) = staged_archive.delete().await {
            warn!("Failed to remove {}: {}", staged_archive.path().display(), e);
        }
        result?;

        info!("Backup of {} written: {}", app_id, filename);
        Ok(filename)
    }

    /// Replace the app's config and data directories with the archive contents.
    ///
    /// The archive is extracted and checked before anything is deleted.
    pub async fn restore(&self, app_id: &str, filename: &str) -> Result<(), DockhandError> {
        validate_filename(filename)?;
        let backup_file = self.layout.app_backups_dir(app_id).file(filename);
        if !backup_file.exists().await {
            return Err(DockhandError::FileSystemError(
                "backup file does not exist".to_string(),
            ));
        }

        info!("Restoring {} from {}", app_id, filename);
        let staging =
            Dir::create_temp_dir(&self.layout.tmp_dir(), &format!("restore-{}", app_id)).await?;

        with_cleanup(&staging, async {
            archive::extract(backup_file.path(), staging.path()).await?;

            let extracted_app = staging.subdir(ARCHIVE_APP_DIR);
            let extracted_data = staging.subdir(ARCHIVE_DATA_DIR);
            if !extracted_app.exists().await {
                return Err(DockhandError::ExecutionError(format!(
                    "Backup {} has no {}/ directory",
                    filename, ARCHIVE_APP_DIR
                )));
            }

            let app_dir = self.layout.app_dir(app_id);
            let data_dir = self.layout.app_data_dir(app_id);
            app_dir.empty().await?;
            data_dir.empty().await?;

            extracted_app.copy_to(&app_dir, &[]).await?;
            if extracted_data.exists().await {
                extracted_data.copy_to(&data_dir, &[]).await?;
            }
            Ok::<(), DockhandError>(())
        })
        .await?;

        info!("Restored {} from {}", app_id, filename);
        Ok(())
    }

    /// Archives of `app_id`, newest first. Empty when none were taken yet.
    pub async fn list_backups(&self, app_id: &str) -> Result<Vec<BackupInfo>, DockhandError> {
        let dir = self.layout.app_backups_dir(app_id);
        if !dir.exists().await {
            return Ok(Vec::new());
        }

        let mut backups = Vec::new();
        for path in dir.list_files().await? {
            let Some(filename) = path.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            let (size, modified) = dir.file(filename).stat().await?;
            backups.push(BackupInfo {
                filename: filename.to_string(),
                size,
                date: DateTime::<Utc>::from(modified),
            });
        }

        backups.sort_by(|a, b| b.date.cmp(&a.date).then_with(|| b.filename.cmp(&a.filename)));
        Ok(backups)
    }

    /// Remove one archive. No-op when already absent.
    pub async fn delete_backup(&self, app_id: &str, filename: &str) -> Result<(), DockhandError> {
        validate_filename(filename)?;
        let file = self.layout.app_backups_dir(app_id).file(filename);
        debug!("Deleting backup {}", file.path().display());
        file.delete().await
    }
}

fn staging_name(dir: &Dir) -> String {
    dir.path()
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "staging".to_string())
}

/// Run `op`, then remove `staging` whatever the outcome
async fn with_cleanup<F>(staging: &Dir, op: F) -> Result<(), DockhandError>
where
    F: Future<Output = Result<(), DockhandError>>,
{
    let result = op.await;
    if let Err(e) = staging.delete().await {
        warn!("Failed to remove {}: {}", staging.path().display(), e);
    }
    result
}
