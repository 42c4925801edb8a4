//! Directory operations

use std::path::{Path, PathBuf};

use tokio::fs;

use crate::errors::DockhandError;
use crate::filesys::file::File;

/// A directory wrapper with path
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Dir {
    path: PathBuf,
}

impl Dir {
    /// Create a new directory reference
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Get the directory path
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Check if the directory exists
    pub async fn exists(&self) -> bool {
        fs::metadata(&self.path)
            .await
            .map(|m| m.is_dir())
            .unwrap_or(false)
    }

    /// Create the directory (and parents)
    pub async fn create(&self) -> Result<(), DockhandError> {
        fs::create_dir_all(&self.path).await?;
        Ok(())
    }

    /// Delete the directory and all contents
    pub async fn delete(&self) -> Result<(), DockhandError> {
        if self.exists().await {
            fs::remove_dir_all(&self.path).await?;
        }
        Ok(())
    }

    /// Delete everything inside the directory, keeping the directory itself
    pub async fn empty(&self) -> Result<(), DockhandError> {
        self.delete().await?;
        self.create().await
    }

    /// List files in the directory
    pub async fn list_files(&self) -> Result<Vec<PathBuf>, DockhandError> {
        let mut files = Vec::new();
        let mut entries = fs::read_dir(&self.path).await?;

        while let Some(entry) = entries.next_entry().await? {
            if entry.file_type().await?.is_file() {
                files.push(entry.path());
            }
        }

        files.sort();
        Ok(files)
    }

    /// Get a file within this directory
    pub fn file(&self, name: &str) -> File {
        File::new(self.path.join(name))
    }

    /// Get a subdirectory
    pub fn subdir(&self, name: &str) -> Dir {
        Dir::new(self.path.join(name))
    }

    /// Recursively copy this directory's contents into `dest`.
    ///
    /// Any entry (at any depth) whose name is in `exclude` is skipped along with its
    /// subtree. Symlinks are recreated, not followed.
    pub async fn copy_to(&self, dest: &Dir, exclude: &[&str]) -> Result<(), DockhandError> {
        if !self.exists().await {
            return Err(DockhandError::FileSystemError(format!(
                "Source directory does not exist: {}",
                self.path.display()
            )));
        }

        let mut stack = vec![(self.path.clone(), dest.path.clone())];
        while let Some((src, dst)) = stack.pop() {
            fs::create_dir_all(&dst).await?;
            let mut entries = fs::read_dir(&src).await?;

            while let Some(entry) = entries.next_entry().await? {
                let name = entry.file_name();
                if exclude.iter().any(|ex| name.as_os_str() == *ex) {
                    continue;
                }

                let target = dst.join(&name);
                let file_type = entry.file_type().await?;
                if file_type.is_dir() {
                    stack.push((entry.path(), target));
                } else if file_type.is_symlink() {
                    copy_symlink(&entry.path(), &target).await?;
                } else {
                    fs::copy(entry.path(), &target).await?;
                }
            }
        }

        Ok(())
    }

    /// Create a uniquely named temporary directory under `parent`
    pub async fn create_temp_dir(parent: &Dir, prefix: &str) -> Result<Dir, DockhandError> {
        let temp_dir = parent
            .path
            .join(format!("{}-{}", prefix, uuid::Uuid::new_v4()));
        fs::create_dir_all(&temp_dir).await?;
        Ok(Dir::new(temp_dir))
    }
}

#[cfg(unix)]
async fn copy_symlink(src: &Path, dst: &Path) -> Result<(), DockhandError> {
    let target = fs::read_link(src).await?;
    fs::symlink(target, dst).await?;
    Ok(())
}

#[cfg(not(unix))]
async fn copy_symlink(src: &Path, dst: &Path) -> Result<(), DockhandError> {
    fs::copy(src, dst).await?;
    Ok(())
}
