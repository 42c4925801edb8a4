//! App status store

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use crate::apps::status::AppStatus;
use crate::errors::DockhandError;
use crate::events::model::Form;
use crate::filesys::file::File;

/// Persisted app record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct App {
    pub id: String,
    pub status: AppStatus,
    #[serde(default)]
    pub config: Form,
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default)]
    pub exposed: bool,
    #[serde(default)]
    pub domain: Option<String>,
}

/// Durable app records keyed by id
#[async_trait]
pub trait AppStore: Send + Sync {
    async fn get(&self, app_id: &str) -> Result<Option<App>, DockhandError>;

    async fn list(&self) -> Result<Vec<App>, DockhandError>;

    /// Insert a new record. Fails when one already exists.
    async fn insert(&self, app: App) -> Result<(), DockhandError>;

    /// Replace an existing record
    async fn update(&self, app: App) -> Result<(), DockhandError>;

    async fn set_status(&self, app_id: &str, status: AppStatus) -> Result<(), DockhandError>;

    /// Remove a record. No-op when absent.
    async fn delete(&self, app_id: &str) -> Result<(), DockhandError>;
}

fn apply_insert(apps: &mut BTreeMap<String, App>, app: App) -> Result<(), DockhandError> {
    if apps.contains_key(&app.id) {
        return Err(DockhandError::ValidationError(format!(
            "App {} is already installed",
            app.id
        )));
    }
    apps.insert(app.id.clone(), app);
    Ok(())
}

fn apply_update(apps: &mut BTreeMap<String, App>, app: App) -> Result<(), DockhandError> {
    match apps.get_mut(&app.id) {
        Some(existing) => {
            *existing = app;
            Ok(())
        }
        None => Err(not_found(&app.id)),
    }
}

fn apply_status(
    apps: &mut BTreeMap<String, App>,
    app_id: &str,
    status: AppStatus,
) -> Result<(), DockhandError> {
    match apps.get_mut(app_id) {
        Some(app) => {
            app.status = status;
            Ok(())
        }
        None => Err(not_found(app_id)),
    }
}

fn not_found(app_id: &str) -> DockhandError {
    DockhandError::NotFound(format!("App {} not found", app_id))
}

// ================================ MEMORY ===================================== //

#[derive(Default)]
pub struct MemoryAppStore {
    apps: Mutex<BTreeMap<String, App>>,
}

impl MemoryAppStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl AppStore for MemoryAppStore {
    async fn get(&self, app_id: &str) -> Result<Option<App>, DockhandError> {
        Ok(self.apps.lock().await.get(app_id).cloned())
    }

    async fn list(&self) -> Result<Vec<App>, DockhandError> {
        Ok(self.apps.lock().await.values().cloned().collect())
    }

    async fn insert(&self, app: App) -> Result<(), DockhandError> {
        apply_insert(&mut *self.apps.lock().await, app)
    }

    async fn update(&self, app: App) -> Result<(), DockhandError> {
        apply_update(&mut *self.apps.lock().await, app)
    }

    async fn set_status(&self, app_id: &str, status: AppStatus) -> Result<(), DockhandError> {
        apply_status(&mut *self.apps.lock().await, app_id, status)
    }

    async fn delete(&self, app_id: &str) -> Result<(), DockhandError> {
        self.apps.lock().await.remove(app_id);
        Ok(())
    }
}

// ================================= FILE ====================================== //

/// Records kept in one JSON document, rewritten atomically on every change
pub struct FileAppStore {
    file: File,
    lock: Mutex<()>,
}

impl FileAppStore {
    pub fn new(file: File) -> Self {
        Self {
            file,
            lock: Mutex::new(()),
        }
    }

    async fn read(&self) -> Result<BTreeMap<String, App>, DockhandError> {
        if !self.file.exists().await {
            return Ok(BTreeMap::new());
        }
        self.file.read_json().await
    }

    async fn modify<F>(&self, f: F) -> Result<(), DockhandError>
    where
        F: FnOnce(&mut BTreeMap<String, App>) -> Result<(), DockhandError> + Send,
    {
        let _guard = self.lock.lock().await;
        let mut apps = self.read().await?;
        f(&mut apps)?;
        self.file.write_json(&apps).await
    }
}

#[async_trait]
impl AppStore for FileAppStore {
    async fn get(&self, app_id: &str) -> Result<Option<App>, DockhandError> {
        let _guard = self.lock.lock().await;
        Ok(self.read().await?.remove(app_id))
    }

    async fn list(&self) -> Result<Vec<App>, DockhandError> {
        let _guard = self.lock.lock().await;
        Ok(self.read().await?.into_values().collect())
    }

    async fn insert(&self, app: App) -> Result<(), DockhandError> {
        self.modify(move |apps| apply_insert(apps, app)).await
    }

    async fn update(&self, app: App) -> Result<(), DockhandError> {
        self.modify(move |apps| apply_update(apps, app)).await
    }

    async fn set_status(&self, app_id: &str, status: AppStatus) -> Result<(), DockhandError> {
        self.modify(|apps| apply_status(apps, app_id, status)).await
    }

    async fn delete(&self, app_id: &str) -> Result<(), DockhandError> {
        self.modify(|apps| {
            apps.remove(app_id);
            Ok(())
        })
        .await
    }
}
