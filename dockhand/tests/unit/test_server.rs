//! Local control API routes

use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use tower::ServiceExt;

use dockhand::apps::status::AppStatus;
use dockhand::server::serve::router;
use dockhand::server::state::ServerState;

use crate::common::Harness;

fn app(h: &Harness) -> Router {
    router(Arc::new(ServerState::new(h.state.lifecycle.clone())))
}

async fn send(router: Router, method: &str, uri: &str, body: &str) -> (StatusCode, serde_json::Value) {
    let request = Request::builder()
        .method(method)
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap();
    let response = router.oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let json = if bytes.is_empty() {
        serde_json::Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, json)
}

#[tokio::test]
async fn test_health() {
    let h = Harness::new("amd64").await;
    let (status, body) = send(app(&h), "GET", "/health", "").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "healthy");
}

#[tokio::test]
async fn test_unknown_app_is_404_with_generic_message() {
    let h = Harness::new("amd64").await;
    let (status, body) = send(app(&h), "GET", "/apps/ghost", "").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert!(!body["error"].as_str().unwrap().contains("ghost"));

    let (status, _) = send(app(&h), "POST", "/apps/ghost/start", "").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_unknown_action_is_400() {
    let h = Harness::new("amd64").await;
    let (status, _) = send(app(&h), "POST", "/apps/jellyfin/explode", "").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_install_is_accepted_and_runs_in_background() {
    let mut h = Harness::started("amd64").await;
    h.seed_jellyfin().await;

    let (status, body) = send(
        app(&h),
        "POST",
        "/apps/jellyfin/install",
        r#"{"TZ": "UTC", "exposed": false}"#,
    )
    .await;
    assert_eq!(status, StatusCode::ACCEPTED);
    assert_eq!(body["action"], "install");

    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    loop {
        let app = h.state.lifecycle.store().get("jellyfin").await.unwrap();
        if app.as_ref().map(|a| a.status) == Some(AppStatus::Running) {
            break;
        }
        assert!(tokio::time::Instant::now() < deadline, "install never finished");
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    let (status, body) = send(app(&h), "GET", "/apps", "").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body[0]["id"], "jellyfin");
    assert_eq!(body[0]["status"], "running");

    let (status, body) = send(app(&h), "GET", "/apps/jellyfin/backups", "").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, serde_json::json!([]));

    h.stop_worker().await;
}

#[tokio::test]
async fn test_restore_requires_filename() {
    let mut h = Harness::started("amd64").await;
    h.seed_jellyfin().await;
    h.state
        .lifecycle
        .install_app("jellyfin", Default::default())
        .await
        .unwrap();

    let (status, _) = send(app(&h), "POST", "/apps/jellyfin/restore", "{}").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = send(
        app(&h),
        "DELETE",
        "/apps/jellyfin/backups/jellyfin-1.tar.gz",
        "",
    )
    .await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    h.stop_worker().await;
}

#[tokio::test]
async fn test_restore_with_filename_is_accepted() {
    let mut h = Harness::started("amd64").await;
    h.seed_jellyfin().await;
    let lifecycle = &h.state.lifecycle;
    lifecycle.install_app("jellyfin", Default::default()).await.unwrap();
    lifecycle.backup_app("jellyfin").await.unwrap();
    let filename = lifecycle.list_backups("jellyfin").await.unwrap()[0]
        .filename
        .clone();
    let ups_before = h.runner.calls().len();

    let (status, body) = send(
        app(&h),
        "POST",
        "/apps/jellyfin/restore",
        &serde_json::json!({ "filename": filename }).to_string(),
    )
    .await;
    assert_eq!(status, StatusCode::ACCEPTED);
    assert_eq!(body["action"], "restore");

    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while h.runner.calls().len() == ups_before
        || lifecycle.get_app("jellyfin").await.unwrap().status != AppStatus::Running
    {
        assert!(tokio::time::Instant::now() < deadline, "restore never finished");
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert!(h.runner.ran(&["up", "-d"]));

    h.stop_worker().await;
}
