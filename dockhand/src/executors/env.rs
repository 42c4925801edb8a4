//! App manifest and env file generation

use std::collections::BTreeMap;
use std::path::PathBuf;

use rand::distributions::Alphanumeric;
use rand::Rng;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::errors::DockhandError;
use crate::events::model::{Form, FormValue};
use crate::storage::layout::{StorageLayout, APP_MANIFEST_FILE};

/// Length of generated secrets when a field sets no `min`
pub const DEFAULT_RANDOM_LENGTH: usize = 32;

/// `apps/<id>/config.json`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppManifest {
    pub id: String,
    pub name: String,
    pub port: u16,
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default)]
    pub tipi_version: Option<u32>,
    #[serde(default)]
    pub exposable: bool,
    #[serde(default)]
    pub form_fields: Vec<FormField>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FormField {
    pub env_variable: String,
    #[serde(rename = "type")]
    pub field_type: FieldType,
    #[serde(default)]
    pub required: bool,
    #[serde(default)]
    pub default: Option<FormValue>,
    #[serde(default)]
    pub min: Option<usize>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldType {
    Text,
    Password,
    Email,
    Number,
    Fqdn,
    Ip,
    Fqdnip,
    Url,
    Boolean,
    Random,
    #[serde(other)]
    Other,
}

impl AppManifest {
    pub async fn load(layout: &StorageLayout, app_id: &str) -> Result<Self, DockhandError> {
        let file = layout.app_dir(app_id).file(APP_MANIFEST_FILE);
        if !file.exists().await {
            return Err(DockhandError::NotFound(format!(
                "App manifest not found for {}",
                app_id
            )));
        }
        file.read_json().await
    }
}

/// Host-wide values every app env receives
#[derive(Debug, Clone)]
pub struct EnvContext {
    pub root_folder: PathBuf,
    pub timezone: String,
    pub local_domain: String,
    pub internal_host: String,

    /// Domain of exposed apps whose form sets none
    pub public_domain: Option<String>,
}

/// Parse `KEY=value` lines, ignoring blanks and comments
pub fn parse_env(contents: &str) -> BTreeMap<String, String> {
    contents
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .filter_map(|line| line.split_once('='))
        .map(|(k, v)| (k.trim().to_string(), v.to_string()))
        .collect()
}

/// Render sorted `KEY=value` lines
pub fn render_env(vars: &BTreeMap<String, String>) -> String {
    vars.iter().map(|(k, v)| format!("{}={}\n", k, v)).collect()
}

fn is_env_name(key: &str) -> bool {
    !key.is_empty()
        && key
            .chars()
            .all(|c| c.is_ascii_uppercase() || c.is_ascii_digit() || c == '_')
}

/// Random alphanumeric secret
pub fn random_secret(length: usize) -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(length)
        .map(char::from)
        .collect()
}

/// Compute the env variables of one app.
///
/// Base variables first, then form values (which may override them), then
/// `random` fields, which keep their value from `existing` when present.
pub fn generate_env(
    manifest: &AppManifest,
    form: &Form,
    ctx: &EnvContext,
    app_data_dir: &std::path::Path,
    existing: &BTreeMap<String, String>,
) -> Result<BTreeMap<String, String>, DockhandError> {
    let exposed = form
        .get("exposed")
        .and_then(FormValue::as_bool)
        .unwrap_or(false);
    let domain = form
        .get("domain")
        .map(FormValue::to_env_string)
        .filter(|d| !d.is_empty())
        .or_else(|| ctx.public_domain.clone())
        .filter(|_| exposed);

    let mut vars = BTreeMap::new();
    vars.insert("APP_ID".to_string(), manifest.id.clone());
    vars.insert("APP_PORT".to_string(), manifest.port.to_string());
    vars.insert(
        "APP_DATA_DIR".to_string(),
        app_data_dir.display().to_string(),
    );
    vars.insert(
        "ROOT_FOLDER_HOST".to_string(),
        ctx.root_folder.display().to_string(),
    );
    vars.insert("TZ".to_string(), ctx.timezone.clone());
    vars.insert("LOCAL_DOMAIN".to_string(), ctx.local_domain.clone());
    vars.insert("APP_EXPOSED".to_string(), domain.is_some().to_string());
    match &domain {
        Some(domain) => {
            vars.insert("APP_DOMAIN".to_string(), domain.clone());
            vars.insert("APP_HOST".to_string(), domain.clone());
            vars.insert("APP_PROTOCOL".to_string(), "https".to_string());
        }
        None => {
            vars.insert(
                "APP_DOMAIN".to_string(),
                format!("{}:{}", ctx.internal_host, manifest.port),
            );
            vars.insert("APP_HOST".to_string(), ctx.internal_host.clone());
            vars.insert("APP_PROTOCOL".to_string(), "http".to_string());
        }
    }

    for (key, value) in form {
        if is_env_name(key) {
            vars.insert(key.clone(), value.to_env_string());
        }
    }

    for field in &manifest.form_fields {
        let name = &field.env_variable;
        if field.field_type == FieldType::Random {
            let value = match form.get(name) {
                Some(v) => v.to_env_string(),
                None => match existing.get(name) {
                    Some(previous) => previous.clone(),
                    None => {
                        debug!("Generating secret {} for {}", name, manifest.id);
                        random_secret(field.min.unwrap_or(DEFAULT_RANDOM_LENGTH))
                    }
                },
            };
            vars.insert(name.clone(), value);
            continue;
        }

        if form.contains_key(name) {
            continue;
        }
        match &field.default {
            Some(default) => {
                vars.insert(name.clone(), default.to_env_string());
            }
            None if field.required => {
                return Err(DockhandError::ValidationError(format!(
                    "Variable {} is required",
                    name
                )));
            }
            None => {}
        }
    }

    Ok(vars)
}

/// Writes `app.env` files
#[derive(Debug, Clone)]
pub struct EnvGenerator {
    layout: StorageLayout,
    ctx: EnvContext,
}

impl EnvGenerator {
    pub fn new(layout: StorageLayout, ctx: EnvContext) -> Self {
        Self { layout, ctx }
    }

    /// Regenerate `<app_data_dir>/<id>/app.env` from the manifest and form
    pub async fn write_app_env(&self, app_id: &str, form: &Form) -> Result<(), DockhandError> {
        let manifest = AppManifest::load(&self.layout, app_id).await?;
        let env_file = self.layout.app_env_file(app_id);
        let existing = if env_file.exists().await {
            parse_env(&env_file.read_string().await?)
        } else {
            BTreeMap::new()
        };

        let vars = generate_env(
            &manifest,
            form,
            &self.ctx,
            self.layout.app_data_dir(app_id).path(),
            &existing,
        )?;
        env_file.write_atomic(render_env(&vars).as_bytes()).await?;
        debug!("Wrote {} variables to {}", vars.len(), env_file.path().display());
        Ok(())
    }
}
