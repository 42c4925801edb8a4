//! Compose chain resolution and dynamic compose rendering

use std::path::PathBuf;

use serde_json::json;

use dockhand::compose::chain::ChainResolver;
use dockhand::executors::repos::repo_id;

use crate::common::{form, Harness, REPO_URL};

fn path_of(file: dockhand::filesys::file::File) -> PathBuf {
    file.path().to_path_buf()
}

#[tokio::test]
async fn test_arm64_chain_prefers_architecture_file() {
    let h = Harness::new("arm64").await;
    let layout = &h.layout;
    let app = layout.app_dir("jellyfin");
    app.file("docker-compose.yml").write_string("services: {}").await.unwrap();
    app.file("docker-compose.arm64.yml").write_string("services: {}").await.unwrap();
    layout
        .repo_apps_dir(&repo_id(REPO_URL))
        .file("docker-compose.common.yml")
        .write_string("networks: {}")
        .await
        .unwrap();
    let user = layout.user_config_dir("jellyfin");
    user.file("docker-compose.yml").write_string("services: {}").await.unwrap();
    user.file("app.env").write_string("EXTRA=1\n").await.unwrap();
    layout.app_env_file("jellyfin").write_string("TZ=UTC\n").await.unwrap();

    let resolver = ChainResolver::new(layout.clone(), "arm64", Some(repo_id(REPO_URL)));
    let chain = resolver.resolve("jellyfin").await.unwrap();

    assert_eq!(
        chain.compose_files,
        vec![
            path_of(app.file("docker-compose.arm64.yml")),
            path_of(layout.repo_apps_dir(&repo_id(REPO_URL)).file("docker-compose.common.yml")),
            path_of(user.file("docker-compose.yml")),
        ]
    );
    assert_eq!(
        chain.env_files,
        vec![
            path_of(layout.app_env_file("jellyfin")),
            path_of(user.file("app.env")),
        ]
    );

    // amd64 hosts ignore the arm64 file
    let resolver = ChainResolver::new(layout.clone(), "amd64", Some(repo_id(REPO_URL)));
    let chain = resolver.resolve("jellyfin").await.unwrap();
    assert_eq!(chain.compose_files[0], path_of(app.file("docker-compose.yml")));
}

#[tokio::test]
async fn test_runtime_invocation_shape() {
    let mut h = Harness::started("amd64").await;
    h.seed_jellyfin().await;
    h.state
        .lifecycle
        .install_app("jellyfin", form(&[]))
        .await
        .unwrap();

    let up = h
        .runner
        .calls()
        .into_iter()
        .find(|call| call.ends_with(&["up".to_string(), "-d".to_string()]))
        .expect("no up -d call");
    assert_eq!(up[0], "docker");
    assert_eq!(&up[1..4], &["compose", "--project-name", "jellyfin"]);
    assert_eq!(up[4], "--env-file");
    assert_eq!(up[6], "-f");

    h.stop_worker().await;
}

#[tokio::test]
async fn test_dynamic_compose_rendered_for_host_architecture() {
    let mut h = Harness::started("arm64").await;
    h.seed_jellyfin().await;
    h.layout
        .repo_apps_dir(&repo_id(REPO_URL))
        .subdir("jellyfin")
        .file("docker-compose.json")
        .write_json(&json!({
            "schemaVersion": 2,
            "services": [{
                "name": "jellyfin",
                "image": "jellyfin/jellyfin:10.9.0",
                "isMain": true,
                "internalPort": 8096,
                "volumes": [{"hostPath": "${APP_DATA_DIR}/config", "containerPath": "/config"}]
            }],
            "overrides": [{
                "architecture": "arm64",
                "services": [{"name": "jellyfin", "image": "jellyfin/jellyfin:10.9.0-arm64"}]
            }]
        }))
        .await
        .unwrap();

    h.state
        .lifecycle
        .install_app("jellyfin", form(&[]))
        .await
        .unwrap();

    let rendered = h
        .layout
        .app_dir("jellyfin")
        .file("docker-compose.yml")
        .read_string()
        .await
        .unwrap();
    let doc: serde_yaml::Value = serde_yaml::from_str(&rendered).unwrap();
    let service = &doc["services"]["jellyfin"];
    assert_eq!(service["image"].as_str(), Some("jellyfin/jellyfin:10.9.0-arm64"));
    assert_eq!(service["ports"][0].as_str(), Some("${APP_PORT}:8096"));
    assert_eq!(
        service["volumes"][0].as_str(),
        Some("${APP_DATA_DIR}/config:/config")
    );

    h.stop_worker().await;
}

#[tokio::test]
async fn test_invalid_dynamic_compose_fails_install() {
    let mut h = Harness::started("amd64").await;
    h.seed_jellyfin().await;
    h.layout
        .repo_apps_dir(&repo_id(REPO_URL))
        .subdir("jellyfin")
        .file("docker-compose.json")
        .write_string("{\"services\": [{\"name\": 1}]}")
        .await
        .unwrap();

    let err = h
        .state
        .lifecycle
        .install_app("jellyfin", form(&[]))
        .await
        .unwrap_err();
    assert!(err.to_string().contains("docker-compose.json"));
    assert!(!h.runner.ran(&["up", "-d"]));

    h.stop_worker().await;
}
