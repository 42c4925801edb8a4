//! Application configuration options

use std::time::Duration;

use crate::compose::merge::normalize_architecture;
use crate::events::dispatcher::DispatcherOptions;
use crate::executors::env::EnvContext;
use crate::storage::layout::StorageLayout;
use crate::storage::settings::{QueueSettings, ScheduleSettings, Settings, SystemSettings};
use crate::utils::host_architecture;
use crate::workers::{consumer, scheduler};

/// Main application options
#[derive(Debug, Clone)]
pub struct AppOptions {
    /// Lifecycle configuration
    pub lifecycle: LifecycleOptions,

    /// Storage paths
    pub layout: StorageLayout,

    /// Normalized host architecture
    pub architecture: String,

    /// Container runtime binary
    pub container_runtime: String,

    /// App store repository URL
    pub appstore_repo_url: Option<String>,

    /// Values every generated app env receives
    pub env: EnvContext,

    /// Queue transport
    pub queue: QueueSettings,

    pub dispatcher: DispatcherOptions,

    /// Consumer worker options
    pub consumer: consumer::Options,

    /// Scheduler worker options
    pub scheduler: scheduler::Options,

    /// Boot-time schedules
    pub schedules: ScheduleSettings,

    /// System commands
    pub system: SystemSettings,

    /// Enable the local control API
    pub enable_server: bool,

    /// Server configuration
    pub server: ServerOptions,
}

impl Default for AppOptions {
    fn default() -> Self {
        Self::from_settings(&Settings::default())
    }
}

impl AppOptions {
    /// Derive runtime options from loaded settings
    pub fn from_settings(settings: &Settings) -> Self {
        let mut layout = StorageLayout::new(&settings.data_dir);
        if let Some(app_data_dir) = &settings.app_data_dir {
            layout = layout.with_app_data_dir(app_data_dir);
        }

        let architecture = match &settings.architecture {
            Some(arch) => normalize_architecture(arch).to_string(),
            None => host_architecture(),
        };

        let env = EnvContext {
            root_folder: settings.data_dir.clone(),
            timezone: settings.timezone.clone(),
            local_domain: settings.local_domain.clone(),
            internal_host: settings.internal_ip.clone(),
            public_domain: settings.domain.clone(),
        };

        let worker = &settings.worker;
        let consumer = consumer::Options {
            poll_interval: Duration::from_millis(worker.poll_interval_ms),
            lease_ttl: Duration::from_secs(worker.lease_ttl_secs),
            lease_renew_interval: Duration::from_secs(worker.lease_renew_interval_secs),
            ..consumer::Options::default()
        };

        Self {
            lifecycle: LifecycleOptions::default(),
            layout,
            architecture,
            container_runtime: settings.container_runtime.clone(),
            appstore_repo_url: settings.appstore_repo_url.clone(),
            env,
            queue: settings.queue.clone(),
            dispatcher: DispatcherOptions {
                default_timeout: Duration::from_secs(settings.timeouts.dispatch_secs),
                long_timeout: Duration::from_secs(settings.timeouts.backup_secs),
            },
            consumer,
            scheduler: scheduler::Options {
                tick: Duration::from_millis(worker.schedule_tick_ms),
            },
            schedules: settings.schedules.clone(),
            system: settings.system.clone(),
            enable_server: settings.server.enabled,
            server: ServerOptions {
                host: settings.server.host.clone(),
                port: settings.server.port,
            },
        }
    }
}

/// Process lifecycle options
#[derive(Debug, Clone)]
pub struct LifecycleOptions {
    /// Maximum delay for graceful shutdown. A job still running past it is abandoned.
    pub max_shutdown_delay: Duration,
}

impl Default for LifecycleOptions {
    fn default() -> Self {
        Self {
            max_shutdown_delay: Duration::from_secs(60),
        }
    }
}

/// Local HTTP server options
#[derive(Debug, Clone)]
pub struct ServerOptions {
    /// Host to bind to
    pub host: String,

    /// Port to listen on
    pub port: u16,
}

impl Default for ServerOptions {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8089,
        }
    }
}
