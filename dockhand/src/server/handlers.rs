//! HTTP request handlers

use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::apps::lifecycle::LifecycleOp;
use crate::apps::status::AppAction;
use crate::apps::store::App;
use crate::backup::manager::BackupInfo;
use crate::errors::{DockhandError, ErrorKind};
use crate::events::model::{validate_app_id, Form};
use crate::server::state::ServerState;
use crate::utils::version_info;

/// Error body returned by every failing handler
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

/// Handler error carrying a [`DockhandError`]
#[derive(Debug)]
pub struct ApiError(pub DockhandError);

impl From<DockhandError> for ApiError {
    fn from(err: DockhandError) -> Self {
        ApiError(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match self.0.kind() {
            ErrorKind::Validation => StatusCode::BAD_REQUEST,
            ErrorKind::NotFound => StatusCode::NOT_FOUND,
            ErrorKind::Timeout => StatusCode::GATEWAY_TIMEOUT,
            ErrorKind::Infrastructure => StatusCode::SERVICE_UNAVAILABLE,
            ErrorKind::Execution | ErrorKind::FileSystem => StatusCode::INTERNAL_SERVER_ERROR,
        };
        warn!("Request failed: {}", self.0);
        (
            status,
            Json(ErrorResponse {
                error: self.0.user_message(),
            }),
        )
            .into_response()
    }
}

/// Health check response
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub service: String,
    pub version: String,
}

/// Health check handler
pub async fn health_handler() -> impl IntoResponse {
    let version = version_info();
    Json(HealthResponse {
        status: "healthy".to_string(),
        service: "dockhand".to_string(),
        version: version.version,
    })
}

/// Version handler
pub async fn version_handler() -> impl IntoResponse {
    Json(version_info())
}

pub async fn list_apps_handler(
    State(state): State<Arc<ServerState>>,
) -> Result<Json<Vec<App>>, ApiError> {
    Ok(Json(state.lifecycle.store().list().await?))
}

pub async fn get_app_handler(
    State(state): State<Arc<ServerState>>,
    Path(app_id): Path<String>,
) -> Result<Json<App>, ApiError> {
    Ok(Json(state.lifecycle.get_app(&app_id).await?))
}

#[derive(Debug, Deserialize)]
struct RestoreRequest {
    filename: String,
}

/// Accepted operation
#[derive(Debug, Serialize)]
pub struct AcceptedResponse {
    pub app_id: String,
    pub action: String,
}

/// Start an app operation in the background.
///
/// The body is the app form (may be empty), or `{"filename": ...}` for restore.
pub async fn app_action_handler(
    State(state): State<Arc<ServerState>>,
    Path((app_id, action)): Path<(String, String)>,
    body: Bytes,
) -> Result<(StatusCode, Json<AcceptedResponse>), ApiError> {
    validate_app_id(&app_id)?;
    let action: AppAction = action.parse()?;

    let op = match action {
        AppAction::Restore => {
            let request: RestoreRequest =
                serde_json::from_slice(&body).map_err(DockhandError::from)?;
            LifecycleOp::Restore {
                app_id: app_id.clone(),
                filename: request.filename,
            }
        }
        _ => LifecycleOp::new(action, &app_id, parse_form(&body)?)?,
    };

    // Reject unknown apps now rather than from the background task
    if action != AppAction::Install {
        state.lifecycle.get_app(&app_id).await?;
    }

    state.lifecycle.spawn(op);
    Ok((
        StatusCode::ACCEPTED,
        Json(AcceptedResponse {
            app_id,
            action: action.as_str().to_string(),
        }),
    ))
}

fn parse_form(body: &[u8]) -> Result<Form, DockhandError> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(Form::new());
    }
    Ok(serde_json::from_slice(body)?)
}

pub async fn list_backups_handler(
    State(state): State<Arc<ServerState>>,
    Path(app_id): Path<String>,
) -> Result<Json<Vec<BackupInfo>>, ApiError> {
    Ok(Json(state.lifecycle.list_backups(&app_id).await?))
}

pub async fn delete_backup_handler(
    State(state): State<Arc<ServerState>>,
    Path((app_id, filename)): Path<(String, String)>,
) -> Result<StatusCode, ApiError> {
    state.lifecycle.delete_backup(&app_id, &filename).await?;
    Ok(StatusCode::NO_CONTENT)
}
