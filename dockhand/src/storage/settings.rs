//! Settings file management

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::logs::LogLevel;

/// Dockhand settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    /// Log level
    #[serde(default)]
    pub log_level: LogLevel,

    /// Directory for rolling log files. Stdout only when absent.
    #[serde(default)]
    pub log_dir: Option<PathBuf>,

    /// Emit JSON formatted logs
    #[serde(default)]
    pub json_logs: bool,

    /// Base directory for platform state
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,

    /// Base directory for app data (defaults to `<data_dir>/app-data`)
    #[serde(default)]
    pub app_data_dir: Option<PathBuf>,

    /// Host architecture override (amd64, arm64, ...)
    #[serde(default)]
    pub architecture: Option<String>,

    /// Container runtime binary
    #[serde(default = "default_container_runtime")]
    pub container_runtime: String,

    /// App store repository URL
    #[serde(default)]
    pub appstore_repo_url: Option<String>,

    /// Timezone passed to apps as TZ
    #[serde(default = "default_timezone")]
    pub timezone: String,

    /// Public domain used for exposed apps without their own domain
    #[serde(default)]
    pub domain: Option<String>,

    /// Local domain used for non-exposed apps
    #[serde(default = "default_local_domain")]
    pub local_domain: String,

    /// Address non-exposed apps are reached on
    #[serde(default = "default_internal_ip")]
    pub internal_ip: String,

    /// Queue configuration
    #[serde(default)]
    pub queue: QueueSettings,

    /// Worker configuration
    #[serde(default)]
    pub worker: WorkerSettings,

    /// Dispatch timeouts
    #[serde(default)]
    pub timeouts: TimeoutSettings,

    /// Local control API
    #[serde(default)]
    pub server: ServerSettings,

    /// System commands
    #[serde(default)]
    pub system: SystemSettings,

    /// Repeatable schedules
    #[serde(default)]
    pub schedules: ScheduleSettings,
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("/var/lib/dockhand")
}

fn default_container_runtime() -> String {
    "docker".to_string()
}

fn default_timezone() -> String {
    "Etc/UTC".to_string()
}

fn default_local_domain() -> String {
    "tipi.local".to_string()
}

fn default_internal_ip() -> String {
    "localhost".to_string()
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            log_level: LogLevel::Info,
            log_dir: None,
            json_logs: false,
            data_dir: default_data_dir(),
            app_data_dir: None,
            architecture: None,
            container_runtime: default_container_runtime(),
            appstore_repo_url: None,
            timezone: default_timezone(),
            domain: None,
            local_domain: default_local_domain(),
            internal_ip: default_internal_ip(),
            queue: QueueSettings::default(),
            worker: WorkerSettings::default(),
            timeouts: TimeoutSettings::default(),
            server: ServerSettings::default(),
            system: SystemSettings::default(),
            schedules: ScheduleSettings::default(),
        }
    }
}

impl Settings {
    /// Apply environment variable overrides on top of the file values
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    fn apply_overrides(&mut self, get: impl Fn(&str) -> Option<String>) {
        if let Some(v) = get("DOCKHAND_DATA_DIR") {
            self.data_dir = PathBuf::from(v);
        }
        if let Some(v) = get("DOCKHAND_APP_DATA_DIR") {
            self.app_data_dir = Some(PathBuf::from(v));
        }
        if let Some(v) = get("DOCKHAND_ARCH") {
            self.architecture = Some(v);
        }
        if let Some(v) = get("DOCKHAND_LOG_LEVEL") {
            match v.parse() {
                Ok(level) => self.log_level = level,
                Err(e) => warn!("Ignoring DOCKHAND_LOG_LEVEL: {}", e),
            }
        }
        if let Some(v) = get("QUEUE_BACKEND") {
            match v.to_lowercase().as_str() {
                "redis" => self.queue.backend = QueueBackend::Redis,
                "memory" => self.queue.backend = QueueBackend::Memory,
                other => warn!("Ignoring unknown QUEUE_BACKEND: {}", other),
            }
        }
        if let Some(v) = get("REDIS_HOST") {
            self.queue.host = v;
        }
        if let Some(v) = get("REDIS_PORT") {
            match v.parse() {
                Ok(port) => self.queue.port = port,
                Err(_) => warn!("Ignoring invalid REDIS_PORT: {}", v),
            }
        }
        if let Some(v) = get("REDIS_PASSWORD") {
            self.queue.password = Some(v);
        }
        if let Some(v) = get("REDIS_DB") {
            match v.parse() {
                Ok(db) => self.queue.db = db,
                Err(_) => warn!("Ignoring invalid REDIS_DB: {}", v),
            }
        }
    }
}

/// Queue transport backend
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QueueBackend {
    #[default]
    Redis,
    Memory,
}

/// Queue connection settings
#[derive(Clone, Serialize, Deserialize)]
pub struct QueueSettings {
    #[serde(default)]
    pub backend: QueueBackend,

    #[serde(default = "default_queue_host")]
    pub host: String,

    #[serde(default = "default_queue_port")]
    pub port: u16,

    /// Turned into a secret as soon as the connection config is built
    #[serde(default, skip_serializing)]
    pub password: Option<String>,

    #[serde(default)]
    pub db: i64,

    /// Queue name
    #[serde(default = "default_queue_name")]
    pub name: String,

    /// How long finished job records are retained
    #[serde(default = "default_completed_job_ttl")]
    pub completed_job_ttl_secs: u64,
}

fn default_queue_host() -> String {
    "127.0.0.1".to_string()
}

fn default_queue_port() -> u16 {
    6379
}

fn default_queue_name() -> String {
    "events".to_string()
}

fn default_completed_job_ttl() -> u64 {
    86_400
}

impl std::fmt::Debug for QueueSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueueSettings")
            .field("backend", &self.backend)
            .field("host", &self.host)
            .field("port", &self.port)
            .field("password", &self.password.as_ref().map(|_| "[REDACTED]"))
            .field("db", &self.db)
            .field("name", &self.name)
            .field("completed_job_ttl_secs", &self.completed_job_ttl_secs)
            .finish()
    }
}

impl Default for QueueSettings {
    fn default() -> Self {
        Self {
            backend: QueueBackend::default(),
            host: default_queue_host(),
            port: default_queue_port(),
            password: None,
            db: 0,
            name: default_queue_name(),
            completed_job_ttl_secs: default_completed_job_ttl(),
        }
    }
}

/// Worker settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerSettings {
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    #[serde(default = "default_lease_ttl")]
    pub lease_ttl_secs: u64,

    #[serde(default = "default_lease_renew_interval")]
    pub lease_renew_interval_secs: u64,

    #[serde(default = "default_schedule_tick_ms")]
    pub schedule_tick_ms: u64,
}

fn default_poll_interval_ms() -> u64 {
    2_000
}

fn default_lease_ttl() -> u64 {
    30
}

fn default_lease_renew_interval() -> u64 {
    10
}

fn default_schedule_tick_ms() -> u64 {
    1_000
}

impl Default for WorkerSettings {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_poll_interval_ms(),
            lease_ttl_secs: default_lease_ttl(),
            lease_renew_interval_secs: default_lease_renew_interval(),
            schedule_tick_ms: default_schedule_tick_ms(),
        }
    }
}

/// Dispatch-and-wait timeouts
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimeoutSettings {
    #[serde(default = "default_dispatch_secs")]
    pub dispatch_secs: u64,

    #[serde(default = "default_backup_secs")]
    pub backup_secs: u64,
}

fn default_dispatch_secs() -> u64 {
    300
}

fn default_backup_secs() -> u64 {
    900
}

impl Default for TimeoutSettings {
    fn default() -> Self {
        Self {
            dispatch_secs: default_dispatch_secs(),
            backup_secs: default_backup_secs(),
        }
    }
}

/// Local control API settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerSettings {
    #[serde(default)]
    pub enabled: bool,

    #[serde(default = "default_server_host")]
    pub host: String,

    #[serde(default = "default_server_port")]
    pub port: u16,
}

fn default_server_host() -> String {
    "127.0.0.1".to_string()
}

fn default_server_port() -> u16 {
    8089
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            host: default_server_host(),
            port: default_server_port(),
        }
    }
}

/// Shell commands run for system events
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SystemSettings {
    #[serde(default)]
    pub restart_command: Option<String>,

    /// `{version}` is replaced with the requested version
    #[serde(default)]
    pub update_command: Option<String>,
}

/// Cron expressions of the boot-time schedules
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduleSettings {
    #[serde(default = "default_system_info_cron")]
    pub system_info_cron: String,

    #[serde(default = "default_repo_update_cron")]
    pub repo_update_cron: String,
}

fn default_system_info_cron() -> String {
    "* * * * *".to_string()
}

fn default_repo_update_cron() -> String {
    "*/30 * * * *".to_string()
}

impl Default for ScheduleSettings {
    fn default() -> Self {
        Self {
            system_info_cron: default_system_info_cron(),
            repo_update_cron: default_repo_update_cron(),
        }
    }
}
