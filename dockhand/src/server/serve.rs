//! HTTP server setup

use std::future::Future;
use std::sync::Arc;

use axum::{
    routing::{delete, get, post},
    Router,
};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::app::options::ServerOptions;
use crate::errors::DockhandError;
use crate::server::handlers::{
    app_action_handler, delete_backup_handler, get_app_handler, health_handler,
    list_apps_handler, list_backups_handler, version_handler,
};
use crate::server::state::ServerState;

/// Routes of the local control API
pub fn router(state: Arc<ServerState>) -> Router {
    Router::new()
        // Health and version
        .route("/health", get(health_handler))
        .route("/version", get(version_handler))
        // Apps
        .route("/apps", get(list_apps_handler))
        .route("/apps/{id}", get(get_app_handler))
        .route("/apps/{id}/backups", get(list_backups_handler))
        .route("/apps/{id}/backups/{filename}", delete(delete_backup_handler))
        .route("/apps/{id}/{action}", post(app_action_handler))
        // State and middleware
        .with_state(state)
        .layer(ServiceBuilder::new().layer(TraceLayer::new_for_http()))
}

/// Start the HTTP server
pub async fn serve(
    options: &ServerOptions,
    state: Arc<ServerState>,
    shutdown_signal: impl Future<Output = ()> + Send + 'static,
) -> Result<JoinHandle<Result<(), DockhandError>>, DockhandError> {
    let app = router(state);

    let addr = format!("{}:{}", options.host, options.port);
    info!("Starting HTTP server on {}", addr);

    let listener = TcpListener::bind(&addr)
        .await
        .map_err(|e| DockhandError::ServerError(e.to_string()))?;

    let handle = tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown_signal)
            .await
            .map_err(|e| DockhandError::ServerError(e.to_string()))
    });

    Ok(handle)
}
