//! Shared harness: temp data dir, in-memory queue and store, recording runner

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

use dockhand::app::options::AppOptions;
use dockhand::app::state::AppState;
use dockhand::apps::store::MemoryAppStore;
use dockhand::errors::DockhandError;
use dockhand::executors::repos::repo_id;
use dockhand::executors::runtime::{CommandOutput, CommandRunner};
use dockhand::queue::memory::MemoryQueue;
use dockhand::storage::layout::StorageLayout;
use dockhand::storage::settings::{QueueBackend, Settings};
use dockhand::workers::consumer;

pub const REPO_URL: &str = "https://github.com/example/appstore";

/// Records every invocation and answers with canned outputs
#[derive(Default)]
pub struct Recorder {
    calls: Mutex<Vec<Vec<String>>>,
    failures: Mutex<Vec<(String, CommandOutput)>>,
}

impl Recorder {
    /// Answer any invocation whose arguments contain `needle` with `output`
    pub fn fail_on(&self, needle: &str, output: CommandOutput) {
        self.failures
            .lock()
            .unwrap()
            .push((needle.to_string(), output));
    }

    pub fn calls(&self) -> Vec<Vec<String>> {
        self.calls.lock().unwrap().clone()
    }

    /// Whether any recorded call ends with `tail`
    pub fn ran(&self, tail: &[&str]) -> bool {
        self.calls().iter().any(|call| {
            call.len() >= tail.len()
                && call[call.len() - tail.len()..]
                    .iter()
                    .zip(tail)
                    .all(|(a, b)| a == b)
        })
    }
}

#[async_trait]
impl CommandRunner for Recorder {
    async fn run(&self, program: &str, args: &[String]) -> Result<CommandOutput, DockhandError> {
        let mut call = vec![program.to_string()];
        call.extend(args.iter().cloned());
        let joined = call.join(" ");
        self.calls.lock().unwrap().push(call);

        let failures = self.failures.lock().unwrap();
        if let Some((_, output)) = failures.iter().find(|(needle, _)| joined.contains(needle.as_str())) {
            return Ok(output.clone());
        }
        Ok(CommandOutput::ok(""))
    }
}

pub struct Harness {
    pub tmp: tempfile::TempDir,
    pub layout: StorageLayout,
    pub queue: Arc<MemoryQueue>,
    pub runner: Arc<Recorder>,
    pub state: Arc<AppState>,
    shutdown: Option<oneshot::Sender<()>>,
    worker: Option<JoinHandle<()>>,
}

impl Harness {
    /// Build the state without starting the worker
    pub async fn new(architecture: &str) -> Self {
        Self::with_dispatch_timeout(architecture, 10).await
    }

    /// Build the state with a custom wait for dispatched jobs, in seconds
    pub async fn with_dispatch_timeout(architecture: &str, dispatch_secs: u64) -> Self {
        let tmp = tempfile::tempdir().unwrap();
        let mut settings = Settings::default();
        settings.data_dir = tmp.path().to_path_buf();
        settings.architecture = Some(architecture.to_string());
        settings.appstore_repo_url = Some(REPO_URL.to_string());
        settings.queue.backend = QueueBackend::Memory;
        settings.timeouts.dispatch_secs = dispatch_secs;
        settings.timeouts.backup_secs = 10;

        let options = AppOptions::from_settings(&settings);
        options.layout.setup().await.unwrap();

        let queue = Arc::new(MemoryQueue::new());
        let runner = Arc::new(Recorder::default());
        let state = AppState::new(
            &options,
            queue.clone(),
            runner.clone(),
            Arc::new(MemoryAppStore::new()),
        );

        Self {
            tmp,
            layout: options.layout,
            queue,
            runner,
            state: Arc::new(state),
            shutdown: None,
            worker: None,
        }
    }

    /// Build the state and start the consumer worker
    pub async fn started(architecture: &str) -> Self {
        let mut harness = Self::new(architecture).await;
        harness.start_worker();
        harness
    }

    pub fn start_worker(&mut self) {
        let (tx, rx) = oneshot::channel::<()>();
        let state = self.state.clone();
        let options = consumer::Options {
            poll_interval: Duration::from_millis(50),
            lease_ttl: Duration::from_secs(5),
            lease_renew_interval: Duration::from_secs(1),
            ..consumer::Options::default()
        };

        self.worker = Some(tokio::spawn(async move {
            consumer::run(
                &options,
                state.queue.clone(),
                state.router.as_ref(),
                state.leadership.as_ref(),
                tokio::time::sleep,
                Box::pin(async move {
                    let _ = rx.await;
                }),
            )
            .await;
        }));
        self.shutdown = Some(tx);
    }

    pub async fn stop_worker(&mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        if let Some(worker) = self.worker.take() {
            tokio::time::timeout(Duration::from_secs(5), worker)
                .await
                .expect("worker did not stop")
                .unwrap();
        }
    }

    /// Publish an app into the cloned app store repository
    pub async fn seed_repo_app(&self, app_id: &str, manifest: serde_json::Value, compose: &str) {
        let dir = self.layout.repo_apps_dir(&repo_id(REPO_URL)).subdir(app_id);
        dir.file("config.json").write_json(&manifest).await.unwrap();
        dir.file("docker-compose.yml").write_string(compose).await.unwrap();
    }

    pub async fn seed_jellyfin(&self) {
        self.seed_repo_app(
            "jellyfin",
            json!({
                "id": "jellyfin",
                "name": "Jellyfin",
                "port": 8091,
                "version": "10.9.0",
                "tipi_version": 3,
                "exposable": true,
                "form_fields": []
            }),
            "services:\n  jellyfin:\n    image: jellyfin/jellyfin:10.9.0\n",
        )
        .await;
    }
}

pub fn form(pairs: &[(&str, &str)]) -> dockhand::events::model::Form {
    pairs
        .iter()
        .map(|(k, v)| {
            (
                k.to_string(),
                dockhand::events::model::FormValue::Text(v.to_string()),
            )
        })
        .collect()
}
