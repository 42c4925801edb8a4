//! App lifecycle scenarios driven through the queue and the worker

use dockhand::apps::status::AppStatus;
use dockhand::errors::{DockhandError, ErrorKind};
use dockhand::executors::env::parse_env;
use dockhand::executors::runtime::CommandOutput;

use crate::common::{form, Harness};

#[tokio::test]
async fn test_install_runs_app() {
    let mut h = Harness::started("amd64").await;
    h.seed_jellyfin().await;

    h.state
        .lifecycle
        .install_app("jellyfin", form(&[("TZ", "UTC")]))
        .await
        .unwrap();

    let app = h.state.lifecycle.get_app("jellyfin").await.unwrap();
    assert_eq!(app.status, AppStatus::Running);
    assert_eq!(app.version.as_deref(), Some("10.9.0"));

    let env = parse_env(&h.layout.app_env_file("jellyfin").read_string().await.unwrap());
    assert_eq!(env["TZ"], "UTC");
    assert_eq!(env["APP_PORT"], "8091");
    assert!(h.runner.ran(&["up", "-d"]));
    assert!(h.layout.app_dir("jellyfin").file("config.json").exists().await);

    h.stop_worker().await;
}

#[tokio::test]
async fn test_failed_install_rolls_back_to_stopped() {
    let mut h = Harness::started("amd64").await;
    h.seed_jellyfin().await;
    h.runner.fail_on(
        "up -d",
        CommandOutput {
            code: Some(1),
            stdout: String::new(),
            stderr: "Error response from daemon: pull access denied".into(),
        },
    );

    let err = h
        .state
        .lifecycle
        .install_app("jellyfin", form(&[]))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Execution);
    assert!(err.to_string().contains("pull access denied"));
    assert!(!err.user_message().contains("pull access denied"));

    let app = h.state.lifecycle.get_app("jellyfin").await.unwrap();
    assert_eq!(app.status, AppStatus::Stopped);

    h.stop_worker().await;
}

#[tokio::test]
async fn test_install_unknown_app_fails() {
    let mut h = Harness::started("amd64").await;

    let err = h
        .state
        .lifecycle
        .install_app("nope", form(&[]))
        .await
        .unwrap_err();
    assert!(err.to_string().contains("not found in the app store"));
    assert_eq!(err.kind(), ErrorKind::NotFound);
    assert!(h.runner.calls().is_empty());
    assert!(h.state.lifecycle.store().list().await.unwrap().is_empty());

    // nothing left behind blocks a later install
    h.seed_repo_app(
        "nope",
        serde_json::json!({"id": "nope", "name": "Nope", "port": 8092, "form_fields": []}),
        "services:\n  nope:\n    image: nope:1\n",
    )
    .await;
    h.state
        .lifecycle
        .install_app("nope", form(&[]))
        .await
        .unwrap();

    h.stop_worker().await;
}

#[tokio::test]
async fn test_multiline_form_value_is_rejected() {
    let mut h = Harness::started("amd64").await;
    h.seed_jellyfin().await;

    let err = h
        .state
        .lifecycle
        .install_app("jellyfin", form(&[("NOTE", "x\nAPP_PORT=1\nINJECTED=yes")]))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Validation);
    assert!(h.state.lifecycle.store().list().await.unwrap().is_empty());
    assert!(!h.layout.app_env_file("jellyfin").exists().await);

    h.state
        .lifecycle
        .install_app("jellyfin", form(&[("NOTE", "single line")]))
        .await
        .unwrap();
    let err = h
        .state
        .lifecycle
        .update_app_config("jellyfin", form(&[("NOTE", "a\rINJECTED=yes")]))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Validation);
    let env = parse_env(&h.layout.app_env_file("jellyfin").read_string().await.unwrap());
    assert_eq!(env["NOTE"], "single line");
    assert!(!env.contains_key("INJECTED"));

    h.stop_worker().await;
}

#[tokio::test]
async fn test_wait_timeout_surfaces_as_timeout() {
    // no worker consumes the job
    let h = Harness::with_dispatch_timeout("amd64", 1).await;
    h.seed_jellyfin().await;

    let err = h
        .state
        .lifecycle
        .install_app("jellyfin", form(&[]))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Timeout);
    assert!(err.user_message().contains("background"));
}

#[tokio::test]
async fn test_install_twice_is_rejected() {
    let mut h = Harness::started("amd64").await;
    h.seed_jellyfin().await;
    let lifecycle = &h.state.lifecycle;

    lifecycle.install_app("jellyfin", form(&[])).await.unwrap();
    let err = lifecycle.install_app("jellyfin", form(&[])).await.unwrap_err();
    assert!(matches!(err, DockhandError::ValidationError(_)));

    h.stop_worker().await;
}

#[tokio::test]
async fn test_operation_on_unknown_app_mutates_nothing() {
    let h = Harness::new("amd64").await;

    let err = h.state.lifecycle.start_app("ghost").await.unwrap_err();
    assert!(matches!(err, DockhandError::NotFound(_)));
    assert_eq!(h.queue.waiting_len(), 0);
    assert!(h.state.lifecycle.store().list().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_stop_then_start() {
    let mut h = Harness::started("amd64").await;
    h.seed_jellyfin().await;
    let lifecycle = &h.state.lifecycle;
    lifecycle.install_app("jellyfin", form(&[])).await.unwrap();

    lifecycle.stop_app("jellyfin").await.unwrap();
    assert_eq!(
        lifecycle.get_app("jellyfin").await.unwrap().status,
        AppStatus::Stopped
    );
    assert!(h.runner.ran(&["stop"]));

    lifecycle.start_app("jellyfin").await.unwrap();
    assert_eq!(
        lifecycle.get_app("jellyfin").await.unwrap().status,
        AppStatus::Running
    );
    assert!(h.runner.ran(&["start"]));

    h.stop_worker().await;
}

#[tokio::test]
async fn test_failed_stop_keeps_running() {
    let mut h = Harness::started("amd64").await;
    h.seed_jellyfin().await;
    let lifecycle = &h.state.lifecycle;
    lifecycle.install_app("jellyfin", form(&[])).await.unwrap();

    h.runner.fail_on(
        " stop",
        CommandOutput {
            code: Some(1),
            stdout: String::new(),
            stderr: "something went wrong".into(),
        },
    );
    assert!(lifecycle.stop_app("jellyfin").await.is_err());
    assert_eq!(
        lifecycle.get_app("jellyfin").await.unwrap().status,
        AppStatus::Running
    );

    h.stop_worker().await;
}

#[tokio::test]
async fn test_uninstall_leaves_no_residue() {
    let mut h = Harness::started("amd64").await;
    h.seed_jellyfin().await;
    let lifecycle = &h.state.lifecycle;
    lifecycle.install_app("jellyfin", form(&[])).await.unwrap();
    h.layout
        .app_data_dir("jellyfin")
        .file("data/library.db")
        .write_string("db")
        .await
        .unwrap();

    lifecycle.uninstall_app("jellyfin").await.unwrap();

    assert!(h.runner.ran(&["down", "--remove-orphans"]));
    assert!(!h.layout.app_dir("jellyfin").exists().await);
    assert!(!h.layout.app_data_dir("jellyfin").exists().await);
    assert!(lifecycle.store().get("jellyfin").await.unwrap().is_none());

    h.stop_worker().await;
}

#[tokio::test]
async fn test_update_config_regenerates_env_and_restarts() {
    let mut h = Harness::started("amd64").await;
    h.seed_jellyfin().await;
    let lifecycle = &h.state.lifecycle;
    lifecycle
        .install_app("jellyfin", form(&[("TZ", "UTC")]))
        .await
        .unwrap();

    lifecycle
        .update_app_config("jellyfin", form(&[("TZ", "Europe/Paris")]))
        .await
        .unwrap();

    let env = parse_env(&h.layout.app_env_file("jellyfin").read_string().await.unwrap());
    assert_eq!(env["TZ"], "Europe/Paris");
    assert!(h.runner.ran(&["restart"]));

    let app = lifecycle.get_app("jellyfin").await.unwrap();
    assert_eq!(app.status, AppStatus::Running);
    assert_eq!(app.config, form(&[("TZ", "Europe/Paris")]));

    h.stop_worker().await;
}

#[tokio::test]
async fn test_backup_and_restore_round_trip() {
    let mut h = Harness::started("amd64").await;
    h.seed_jellyfin().await;
    let lifecycle = &h.state.lifecycle;
    lifecycle.install_app("jellyfin", form(&[])).await.unwrap();

    let library = h.layout.app_data_dir("jellyfin").file("data/library.db");
    library.write_string("original").await.unwrap();

    let filename = lifecycle.backup_app("jellyfin").await.unwrap();
    assert!(filename.starts_with("jellyfin-") && filename.ends_with(".tar.gz"));
    assert_eq!(
        lifecycle.get_app("jellyfin").await.unwrap().status,
        AppStatus::Running
    );

    library.write_string("changed").await.unwrap();
    h.layout
        .app_data_dir("jellyfin")
        .file("stray.txt")
        .write_string("x")
        .await
        .unwrap();

    lifecycle.restore_app("jellyfin", &filename).await.unwrap();
    assert_eq!(library.read_string().await.unwrap(), "original");
    assert!(!h.layout.app_data_dir("jellyfin").file("stray.txt").exists().await);
    assert_eq!(
        lifecycle.get_app("jellyfin").await.unwrap().status,
        AppStatus::Running
    );

    let backups = lifecycle.list_backups("jellyfin").await.unwrap();
    assert_eq!(backups.len(), 1);
    assert_eq!(backups[0].filename, filename);

    lifecycle.delete_backup("jellyfin", &filename).await.unwrap();
    assert!(lifecycle.list_backups("jellyfin").await.unwrap().is_empty());

    h.stop_worker().await;
}

#[tokio::test]
async fn test_restore_missing_archive() {
    let mut h = Harness::started("amd64").await;
    h.seed_jellyfin().await;
    let lifecycle = &h.state.lifecycle;
    lifecycle.install_app("jellyfin", form(&[])).await.unwrap();
    let calls_before = h.runner.calls().len();

    let err = lifecycle
        .restore_app("jellyfin", "jellyfin-1.tar.gz")
        .await
        .unwrap_err();
    assert!(err.to_string().contains("backup file does not exist"));
    assert_eq!(err.kind(), ErrorKind::FileSystem);
    // no container was stopped
    assert_eq!(h.runner.calls().len(), calls_before);
    assert_eq!(h.queue.waiting_len(), 0);
    assert!(h.layout.app_dir("jellyfin").file("config.json").exists().await);
    assert_eq!(
        lifecycle.get_app("jellyfin").await.unwrap().status,
        AppStatus::Running
    );

    h.stop_worker().await;
}

#[tokio::test]
async fn test_restore_rejects_path_traversal() {
    let h = Harness::new("amd64").await;
    let err = h
        .state
        .lifecycle
        .restore_app("jellyfin", "../../etc/passwd")
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Validation);
    assert_eq!(h.queue.waiting_len(), 0);
}

#[tokio::test]
async fn test_spawned_operation_reports_through_handle() {
    let mut h = Harness::started("amd64").await;
    h.seed_jellyfin().await;

    let handle = h.state.lifecycle.spawn(
        dockhand::apps::lifecycle::LifecycleOp::Install {
            app_id: "jellyfin".into(),
            form: form(&[]),
        },
    );
    handle.await.unwrap().unwrap();
    assert_eq!(
        h.state.lifecycle.get_app("jellyfin").await.unwrap().status,
        AppStatus::Running
    );

    let failed = h.state.lifecycle.spawn(dockhand::apps::lifecycle::LifecycleOp::Start {
        app_id: "ghost".into(),
    });
    assert!(failed.await.unwrap().is_err());

    h.stop_worker().await;
}
