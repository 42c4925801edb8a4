//! Dockhand - Entry Point
//!
//! Runs the lifecycle worker, the schedule ticker and the optional local API of a
//! single-host app platform.

use std::collections::HashMap;
use std::env;
use std::path::PathBuf;

use dockhand::app::options::AppOptions;
use dockhand::app::run::{connect_queue, run};
use dockhand::events::dispatcher::EventDispatcher;
use dockhand::events::model::{Event, SystemEvent};
use dockhand::filesys::file::File;
use dockhand::logs::{init_logging, LogOptions};
use dockhand::storage::settings::{QueueBackend, Settings};
use dockhand::utils::version_info;

use tracing::{error, info, warn};

const DEFAULT_CONFIG_DIR: &str = "/etc/dockhand";
const SETTINGS_FILE: &str = "settings.json";

#[tokio::main]
async fn main() {
    // Parse command line arguments
    let args: Vec<String> = env::args().collect();
    let mut cli_args: HashMap<String, String> = HashMap::new();

    for arg in args.iter().skip(1) {
        if let Some((key, value)) = arg.split_once('=') {
            // Handle --key=value format
            let clean_key = key.trim_start_matches('-');
            cli_args.insert(clean_key.to_string(), value.to_string());
        } else if arg.starts_with("--") {
            // Handle standalone flags like --version
            let clean_key = arg.trim_start_matches('-');
            cli_args.insert(clean_key.to_string(), "true".to_string());
        }
    }

    // Print version and exit
    let version = version_info();
    if cli_args.contains_key("version") {
        match serde_json::to_string_pretty(&version) {
            Ok(json) => println!("{}", json),
            Err(_) => println!("{}", version.version),
        }
        return;
    }

    // Retrieve the settings file
    let config_dir = cli_args
        .get("config-dir")
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_DIR));
    let settings = match load_settings(&File::new(config_dir.join(SETTINGS_FILE))).await {
        Ok(settings) => settings,
        Err(e) => {
            eprintln!("Unable to read settings file: {e}");
            std::process::exit(1);
        }
    };

    // Initialize logging
    let log_options = LogOptions {
        log_level: settings.log_level.clone(),
        log_dir: settings.log_dir.clone(),
        json_format: settings.json_logs,
        ..Default::default()
    };
    let _log_guard = match init_logging(log_options) {
        Ok(guard) => guard,
        Err(e) => {
            println!("Failed to initialize logging: {e}");
            None
        }
    };

    let options = AppOptions::from_settings(&settings);

    if cli_args.contains_key("dispatch-system-info") {
        std::process::exit(dispatch_system_info(&options).await);
    }

    info!("Running dockhand {} with options: {:?}", version.version, options);
    if let Err(e) = run(options, await_shutdown_signal()).await {
        error!("Failed to run dockhand: {e}");
        std::process::exit(1);
    }
}

/// Settings from `file`, or defaults when it does not exist. Env overrides apply last.
async fn load_settings(file: &File) -> Result<Settings, dockhand::errors::DockhandError> {
    let mut settings = if file.exists().await {
        file.read_json::<Settings>().await?
    } else {
        Settings::default()
    };
    settings.apply_env_overrides();
    Ok(settings)
}

/// Enqueue one system_info job, print its result and return the exit code
async fn dispatch_system_info(options: &AppOptions) -> i32 {
    if options.queue.backend == QueueBackend::Memory {
        warn!("The in-process queue has no worker outside a running dockhand");
    }

    let queue = match connect_queue(options).await {
        Ok(queue) => queue,
        Err(e) => {
            error!("Failed to connect to the queue: {e}");
            return 1;
        }
    };

    let dispatcher = EventDispatcher::new(queue, options.dispatcher.clone());
    let result = dispatcher
        .dispatch_and_wait(&Event::System(SystemEvent::SystemInfo), None)
        .await;
    println!("{}", result.message);
    if result.success {
        0
    } else {
        1
    }
}

async fn await_shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let (mut sigterm, mut sigint) =
            match (signal(SignalKind::terminate()), signal(SignalKind::interrupt())) {
                (Ok(sigterm), Ok(sigint)) => (sigterm, sigint),
                _ => {
                    error!("Failed to install signal handlers, waiting for Ctrl+C only");
                    let _ = tokio::signal::ctrl_c().await;
                    return;
                }
            };

        tokio::select! {
            _ = sigterm.recv() => {
                info!("SIGTERM received, shutting down...");
            }
            _ = sigint.recv() => {
                info!("SIGINT received, shutting down...");
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Ctrl+C received, shutting down...");
            }
        }
    }

    #[cfg(not(unix))]
    {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {e}");
        }
        info!("Ctrl+C received, shutting down...");
    }
}
