//! Event, job and result models
//!
//! Wire shape of an event:
//!
//! ```json
//! {"type": "app", "command": "install", "appid": "jellyfin", "form": {"TZ": "UTC"}}
//! ```

use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

use crate::errors::{DockhandError, ErrorKind};
use crate::utils::epoch_millis;

/// A single install/config form value
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FormValue {
    Bool(bool),
    Text(String),
}

impl FormValue {
    /// Value as written to an env file
    pub fn to_env_string(&self) -> String {
        match self {
            FormValue::Bool(b) => b.to_string(),
            FormValue::Text(s) => s.clone(),
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            FormValue::Bool(b) => Some(*b),
            FormValue::Text(s) => s.parse().ok(),
        }
    }
}

/// Install/config form values keyed by variable name
pub type Form = BTreeMap<String, FormValue>;

/// A lifecycle instruction
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Event {
    App(AppEvent),
    Repo(RepoEvent),
    System(SystemEvent),
}

/// App lifecycle commands
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "command", rename_all = "snake_case")]
pub enum AppEvent {
    Install {
        appid: String,
        #[serde(default)]
        form: Form,
    },
    Start {
        appid: String,
        #[serde(default)]
        form: Form,
    },
    Stop {
        appid: String,
    },
    Restart {
        appid: String,
        #[serde(default)]
        form: Form,
    },
    Uninstall {
        appid: String,
    },
    Update {
        appid: String,
        #[serde(default)]
        form: Form,
    },
    Reset {
        appid: String,
        #[serde(default)]
        form: Form,
    },
    GenerateEnv {
        appid: String,
        #[serde(default)]
        form: Form,
    },
    Backup {
        appid: String,
    },
    Restore {
        appid: String,
        filename: String,
    },
}

/// App store repository commands
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "command", rename_all = "snake_case")]
pub enum RepoEvent {
    Clone { url: String },
    Update { url: String },
}

/// Host-level commands
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "command", rename_all = "snake_case")]
pub enum SystemEvent {
    SystemInfo,
    Restart,
    Update { version: String },
}

impl Event {
    /// Wire name of the event type
    pub fn type_name(&self) -> &'static str {
        match self {
            Event::App(_) => "app",
            Event::Repo(_) => "repo",
            Event::System(_) => "system",
        }
    }

    /// Wire name of the command
    pub fn command_name(&self) -> &'static str {
        match self {
            Event::App(e) => match e {
                AppEvent::Install { .. } => "install",
                AppEvent::Start { .. } => "start",
                AppEvent::Stop { .. } => "stop",
                AppEvent::Restart { .. } => "restart",
                AppEvent::Uninstall { .. } => "uninstall",
                AppEvent::Update { .. } => "update",
                AppEvent::Reset { .. } => "reset",
                AppEvent::GenerateEnv { .. } => "generate_env",
                AppEvent::Backup { .. } => "backup",
                AppEvent::Restore { .. } => "restore",
            },
            Event::Repo(e) => match e {
                RepoEvent::Clone { .. } => "clone",
                RepoEvent::Update { .. } => "update",
            },
            Event::System(e) => match e {
                SystemEvent::SystemInfo => "system_info",
                SystemEvent::Restart => "restart",
                SystemEvent::Update { .. } => "update",
            },
        }
    }

    /// Parse and validate a raw payload
    pub fn parse(payload: &serde_json::Value) -> Result<Self, DockhandError> {
        let event: Event = serde_json::from_value(payload.clone())
            .map_err(|e| DockhandError::ValidationError(format!("Invalid event: {}", e)))?;
        event.validate()?;
        Ok(event)
    }

    /// Check field contents beyond what the shape enforces
    pub fn validate(&self) -> Result<(), DockhandError> {
        match self {
            Event::App(e) => {
                validate_app_id(e.app_id())?;
                match e {
                    AppEvent::Restore { filename, .. } => validate_filename(filename),
                    AppEvent::Install { form, .. }
                    | AppEvent::Start { form, .. }
                    | AppEvent::Restart { form, .. }
                    | AppEvent::Update { form, .. }
                    | AppEvent::Reset { form, .. }
                    | AppEvent::GenerateEnv { form, .. } => validate_form(form),
                    _ => Ok(()),
                }
            }
            Event::Repo(RepoEvent::Clone { url } | RepoEvent::Update { url }) => {
                validate_repo_url(url)
            }
            Event::System(SystemEvent::Update { version }) => {
                if version.trim().is_empty() {
                    return Err(DockhandError::ValidationError(
                        "version must not be empty".to_string(),
                    ));
                }
                Ok(())
            }
            Event::System(_) => Ok(()),
        }
    }
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.type_name(), self.command_name())?;
        match self {
            Event::App(e) => write!(f, " {}", e.app_id()),
            Event::Repo(RepoEvent::Clone { url } | RepoEvent::Update { url }) => {
                write!(f, " {}", url)
            }
            Event::System(SystemEvent::Update { version }) => write!(f, " {}", version),
            Event::System(_) => Ok(()),
        }
    }
}

impl AppEvent {
    pub fn app_id(&self) -> &str {
        match self {
            AppEvent::Install { appid, .. }
            | AppEvent::Start { appid, .. }
            | AppEvent::Stop { appid }
            | AppEvent::Restart { appid, .. }
            | AppEvent::Uninstall { appid }
            | AppEvent::Update { appid, .. }
            | AppEvent::Reset { appid, .. }
            | AppEvent::GenerateEnv { appid, .. }
            | AppEvent::Backup { appid }
            | AppEvent::Restore { appid, .. } => appid,
        }
    }
}

/// App ids become directory names and compose project names
pub fn validate_app_id(app_id: &str) -> Result<(), DockhandError> {
    let valid = !app_id.is_empty()
        && app_id.len() <= 64
        && app_id
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-' || c == '_')
        && !app_id.starts_with(['-', '_']);
    if valid {
        Ok(())
    } else {
        Err(DockhandError::ValidationError(format!(
            "Invalid app id: '{}'",
            app_id
        )))
    }
}

/// Form values end up as single `KEY=value` env lines
pub fn validate_form(form: &Form) -> Result<(), DockhandError> {
    for (key, value) in form {
        if let FormValue::Text(text) = value {
            if text.contains(['\n', '\r', '\0']) {
                return Err(DockhandError::ValidationError(format!(
                    "Form value '{}' must be a single line",
                    key
                )));
            }
        }
    }
    Ok(())
}

/// Backup file names must stay inside the app's backup directory
pub fn validate_filename(filename: &str) -> Result<(), DockhandError> {
    if filename.is_empty()
        || filename.contains('/')
        || filename.contains('\\')
        || filename.starts_with('.')
    {
        return Err(DockhandError::ValidationError(format!(
            "Invalid backup filename: '{}'",
            filename
        )));
    }
    Ok(())
}

fn validate_repo_url(raw: &str) -> Result<(), DockhandError> {
    let parsed = url::Url::parse(raw)
        .map_err(|e| DockhandError::ValidationError(format!("Invalid repo url '{}': {}", raw, e)))?;
    match parsed.scheme() {
        "http" | "https" | "ssh" | "git" | "file" => Ok(()),
        other => Err(DockhandError::ValidationError(format!(
            "Unsupported repo url scheme: {}",
            other
        ))),
    }
}

/// Outcome of one job
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobResult {
    pub success: bool,
    #[serde(rename = "stdout", alias = "message", default)]
    pub message: String,
    /// Category of a failure, when known
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorKind>,
}

impl JobResult {
    pub fn ok(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: message.into(),
            error: None,
        }
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
            error: None,
        }
    }

    pub fn failed_with(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
            error: Some(kind),
        }
    }

    pub fn timed_out(&self) -> bool {
        self.error == Some(ErrorKind::Timeout)
    }

    /// The failure as an error, defaulting to an execution failure
    pub fn into_error(self) -> DockhandError {
        DockhandError::from_kind(self.error.unwrap_or(ErrorKind::Execution), self.message)
    }
}

impl From<Result<String, DockhandError>> for JobResult {
    fn from(result: Result<String, DockhandError>) -> Self {
        match result {
            Ok(message) => JobResult::ok(message),
            Err(e) => JobResult::failed_with(e.kind(), e.detail()),
        }
    }
}

/// Queue envelope around one event.
///
/// The payload is kept raw so a malformed event can still be carried to the worker
/// and failed there with a descriptive message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub id: String,
    pub payload: serde_json::Value,
    pub created_at: u64,
}

impl Job {
    /// Wrap an event, assigning a fresh id
    pub fn new(event: &Event) -> Result<Self, DockhandError> {
        Ok(Self {
            id: next_job_id(event.type_name()),
            payload: serde_json::to_value(event)?,
            created_at: epoch_millis(),
        })
    }

    /// Move to a fresh id with the same type prefix
    pub fn reissue(&mut self) {
        let prefix = match self.id.rsplit_once('_') {
            Some((prefix, _)) => prefix.to_string(),
            None => self.id.clone(),
        };
        self.id = next_job_id(&prefix);
    }
}

static LAST_JOB_MILLIS: AtomicU64 = AtomicU64::new(0);

/// Job ids are `{type}_{timestamp}`. The timestamp is strictly increasing within a
/// process so two dispatches in the same millisecond never collide.
pub fn next_job_id(type_name: &str) -> String {
    let now = epoch_millis();
    let mut last = LAST_JOB_MILLIS.load(Ordering::SeqCst);
    let stamp = loop {
        let candidate = now.max(last + 1);
        match LAST_JOB_MILLIS.compare_exchange(last, candidate, Ordering::SeqCst, Ordering::SeqCst)
        {
            Ok(_) => break candidate,
            Err(actual) => last = actual,
        }
    };
    format!("{}_{}", type_name, stamp)
}

/// A repeatable registration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Schedule {
    pub key: String,
    pub cron: String,
    pub event: Event,
}
