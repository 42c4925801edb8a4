//! App status state machine

use serde::{Deserialize, Serialize};

use crate::errors::DockhandError;

/// Persisted app status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AppStatus {
    Running,
    Stopped,
    /// Recorded but its files are gone
    Missing,

    Installing,
    Starting,
    Stopping,
    Restarting,
    Uninstalling,
    Updating,
    Resetting,
    BackingUp,
    Restoring,
    UpdatingConfig,
}

impl AppStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            AppStatus::Running | AppStatus::Stopped | AppStatus::Missing
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            AppStatus::Running => "running",
            AppStatus::Stopped => "stopped",
            AppStatus::Missing => "missing",
            AppStatus::Installing => "installing",
            AppStatus::Starting => "starting",
            AppStatus::Stopping => "stopping",
            AppStatus::Restarting => "restarting",
            AppStatus::Uninstalling => "uninstalling",
            AppStatus::Updating => "updating",
            AppStatus::Resetting => "resetting",
            AppStatus::BackingUp => "backing_up",
            AppStatus::Restoring => "restoring",
            AppStatus::UpdatingConfig => "updating_config",
        }
    }
}

impl std::fmt::Display for AppStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// User-triggered operation on an app
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AppAction {
    Install,
    Start,
    Stop,
    Restart,
    Update,
    Reset,
    Uninstall,
    Backup,
    Restore,
    UpdateConfig,
}

impl AppAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            AppAction::Install => "install",
            AppAction::Start => "start",
            AppAction::Stop => "stop",
            AppAction::Restart => "restart",
            AppAction::Update => "update",
            AppAction::Reset => "reset",
            AppAction::Uninstall => "uninstall",
            AppAction::Backup => "backup",
            AppAction::Restore => "restore",
            AppAction::UpdateConfig => "update_config",
        }
    }

    /// Status held while the action runs
    pub fn transient_status(&self) -> AppStatus {
        match self {
            AppAction::Install => AppStatus::Installing,
            AppAction::Start => AppStatus::Starting,
            AppAction::Stop => AppStatus::Stopping,
            AppAction::Restart => AppStatus::Restarting,
            AppAction::Update => AppStatus::Updating,
            AppAction::Reset => AppStatus::Resetting,
            AppAction::Uninstall => AppStatus::Uninstalling,
            AppAction::Backup => AppStatus::BackingUp,
            AppAction::Restore => AppStatus::Restoring,
            AppAction::UpdateConfig => AppStatus::UpdatingConfig,
        }
    }
}

impl std::str::FromStr for AppAction {
    type Err = DockhandError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "install" => Ok(AppAction::Install),
            "start" => Ok(AppAction::Start),
            "stop" => Ok(AppAction::Stop),
            "restart" => Ok(AppAction::Restart),
            "update" => Ok(AppAction::Update),
            "reset" => Ok(AppAction::Reset),
            "uninstall" => Ok(AppAction::Uninstall),
            "backup" => Ok(AppAction::Backup),
            "restore" => Ok(AppAction::Restore),
            "update_config" => Ok(AppAction::UpdateConfig),
            other => Err(DockhandError::ValidationError(format!(
                "Unknown app action: {}",
                other
            ))),
        }
    }
}

/// Transition rules between app statuses
pub struct AppStatusMachine;

impl AppStatusMachine {
    /// Check `action` is allowed from `current` (`None` = not installed) and return
    /// the transient status to hold while it runs
    pub fn begin(current: Option<AppStatus>, action: AppAction) -> Result<AppStatus, DockhandError> {
        let allowed = match (current, action) {
            (None, AppAction::Install) => true,
            (None, _) => false,
            (Some(AppStatus::Missing), a) => matches!(
                a,
                AppAction::Install | AppAction::Uninstall | AppAction::Restore
            ),
            (Some(_), AppAction::Install) => false,
            (Some(status), _) => status.is_terminal(),
        };

        if allowed {
            Ok(action.transient_status())
        } else {
            Err(DockhandError::InvalidTransition(format!(
                "Cannot {} app while {}",
                action.as_str(),
                current.map(|s| s.as_str()).unwrap_or("not installed")
            )))
        }
    }

    /// Status once `action` finished. `None` means the record is deleted.
    pub fn settle(action: AppAction, success: bool, prior: AppStatus) -> Option<AppStatus> {
        let resolved = match (action, success) {
            (AppAction::Uninstall, true) => return None,
            (AppAction::Stop, true) => AppStatus::Stopped,
            (AppAction::Stop, false) => AppStatus::Running,
            (AppAction::Backup | AppAction::UpdateConfig, _) => {
                if prior.is_terminal() && prior != AppStatus::Missing {
                    prior
                } else {
                    AppStatus::Running
                }
            }
            (_, true) => AppStatus::Running,
            (_, false) => AppStatus::Stopped,
        };
        Some(resolved)
    }
}
