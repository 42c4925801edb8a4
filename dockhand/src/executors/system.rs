//! Host-level commands

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use sysinfo::{Disks, System};
use tracing::{info, warn};

use crate::errors::DockhandError;
use crate::executors::runtime::CommandRunner;
use crate::storage::layout::StorageLayout;
use crate::storage::settings::SystemSettings;
use crate::utils::host_architecture;

/// Host metrics snapshot
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SystemInfo {
    /// CPU usage percentage (0-100)
    pub cpu_usage: f32,
    pub cpu_count: usize,

    /// Memory in bytes
    pub memory_used: u64,
    pub memory_total: u64,

    /// Disk space in bytes, summed over all mounted disks
    pub disk_used: u64,
    pub disk_total: u64,

    pub uptime_secs: u64,
    pub hostname: String,
    pub architecture: String,
}

/// Collect host metrics
pub fn collect_system_info() -> SystemInfo {
    let mut sys = System::new_all();
    sys.refresh_all();

    let disks = Disks::new_with_refreshed_list();
    let (disk_used, disk_total) = disks.iter().fold((0u64, 0u64), |(used, total), disk| {
        (
            used + disk.total_space().saturating_sub(disk.available_space()),
            total + disk.total_space(),
        )
    });

    SystemInfo {
        cpu_usage: sys.global_cpu_usage(),
        cpu_count: sys.cpus().len(),
        memory_used: sys.used_memory(),
        memory_total: sys.total_memory(),
        disk_used,
        disk_total,
        uptime_secs: System::uptime(),
        hostname: System::host_name().unwrap_or_else(|| "unknown".to_string()),
        architecture: host_architecture(),
    }
}

/// Runs system commands
#[derive(Clone)]
pub struct SystemExecutor {
    layout: StorageLayout,
    runner: Arc<dyn CommandRunner>,
    settings: SystemSettings,
}

impl SystemExecutor {
    pub fn new(layout: StorageLayout, runner: Arc<dyn CommandRunner>, settings: SystemSettings) -> Self {
        Self {
            layout,
            runner,
            settings,
        }
    }

    /// Collect metrics, persist them and return them as JSON
    pub async fn system_info(&self) -> Result<String, DockhandError> {
        let info = tokio::task::spawn_blocking(collect_system_info)
            .await
            .map_err(|e| DockhandError::Internal(format!("system info task failed: {}", e)))?;
        self.layout.system_info_file().write_json(&info).await?;
        Ok(serde_json::to_string(&info)?)
    }

    pub async fn restart(&self) -> Result<String, DockhandError> {
        let command = self.settings.restart_command.as_deref();
        self.run_configured("restart", command, None).await
    }

    pub async fn update(&self, version: &str) -> Result<String, DockhandError> {
        let command = self.settings.update_command.as_deref();
        self.run_configured("update", command, Some(version)).await
    }

    async fn run_configured(
        &self,
        name: &str,
        command: Option<&str>,
        version: Option<&str>,
    ) -> Result<String, DockhandError> {
        let Some(template) = command.filter(|c| !c.trim().is_empty()) else {
            warn!("System {} requested but no command is configured", name);
            return Err(DockhandError::ConfigError(format!(
                "System {} command not configured",
                name
            )));
        };

        let command = match version {
            Some(v) => template.replace("{version}", v),
            None => template.to_string(),
        };
        info!("Running system {}: {}", name, command);
        self.runner
            .run("sh", &["-c".to_string(), command])
            .await?
            .into_result()
    }
}
