//! Main application run loop

use std::future::Future;
use std::sync::Arc;

use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::app::options::{AppOptions, LifecycleOptions};
use crate::app::state::AppState;
use crate::errors::DockhandError;
use crate::events::model::{Event, RepoEvent, SystemEvent};
use crate::queue::memory::MemoryQueue;
use crate::queue::redis_queue::{RedisQueue, RedisQueueConfig};
use crate::queue::JobQueue;
use crate::server::serve::serve;
use crate::server::state::ServerState;
use crate::storage::settings::QueueBackend;
use crate::workers::{consumer, scheduler};

/// Run dockhand until `shutdown_signal` resolves
pub async fn run(
    options: AppOptions,
    shutdown_signal: impl Future<Output = ()> + Send + 'static,
) -> Result<(), DockhandError> {
    info!("Initializing dockhand...");

    // Create shutdown channel
    let (shutdown_tx, _shutdown_rx): (broadcast::Sender<()>, _) = broadcast::channel(1);
    let mut shutdown_manager = ShutdownManager::new(shutdown_tx.clone(), options.lifecycle.clone());

    if let Err(e) = init(&options, shutdown_tx.clone(), &mut shutdown_manager).await {
        error!("Failed to start dockhand: {}", e);
        shutdown_manager.shutdown().await?;
        return Err(e);
    }

    shutdown_signal.await;
    info!("Shutdown signal received, shutting down...");

    drop(shutdown_tx);
    shutdown_manager.shutdown().await
}

/// Connect the configured queue transport
pub async fn connect_queue(options: &AppOptions) -> Result<Arc<dyn JobQueue>, DockhandError> {
    match options.queue.backend {
        QueueBackend::Redis => {
            let queue = RedisQueue::connect(RedisQueueConfig::from(&options.queue)).await?;
            Ok(Arc::new(queue))
        }
        QueueBackend::Memory => {
            info!("Using in-process queue");
            Ok(Arc::new(MemoryQueue::new()))
        }
    }
}

// =============================== INITIALIZATION ================================== //

async fn init(
    options: &AppOptions,
    shutdown_tx: broadcast::Sender<()>,
    shutdown_manager: &mut ShutdownManager,
) -> Result<Arc<AppState>, DockhandError> {
    let queue = connect_queue(options).await?;
    let app_state = Arc::new(AppState::init(options, queue).await?);

    register_schedules(options, &app_state).await?;

    init_consumer_worker(
        options.consumer.clone(),
        app_state.clone(),
        shutdown_manager,
        shutdown_tx.subscribe(),
    )?;

    init_scheduler_worker(
        options.scheduler.clone(),
        app_state.clone(),
        shutdown_manager,
        shutdown_tx.subscribe(),
    )?;

    if options.enable_server {
        init_server(options, app_state.clone(), shutdown_manager, shutdown_tx.subscribe()).await?;
    }

    Ok(app_state)
}

/// Replace whatever schedules a previous run left behind
async fn register_schedules(options: &AppOptions, state: &AppState) -> Result<(), DockhandError> {
    let dispatcher = &state.dispatcher;
    dispatcher.purge_schedules().await?;

    dispatcher
        .schedule(
            Event::System(SystemEvent::SystemInfo),
            &options.schedules.system_info_cron,
        )
        .await?;

    if let Some(url) = &options.appstore_repo_url {
        // Make sure the repository exists before the first update fires
        if let Err(e) = dispatcher
            .dispatch(&Event::Repo(RepoEvent::Clone { url: url.clone() }))
            .await
        {
            warn!("Failed to queue clone of {}: {}", url, e);
        }
        dispatcher
            .schedule(
                Event::Repo(RepoEvent::Update { url: url.clone() }),
                &options.schedules.repo_update_cron,
            )
            .await?;
    }
    Ok(())
}

fn init_consumer_worker(
    options: consumer::Options,
    app_state: Arc<AppState>,
    shutdown_manager: &mut ShutdownManager,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> Result<(), DockhandError> {
    info!("Initializing consumer worker...");

    let queue = app_state.queue.clone();
    let router = app_state.router.clone();
    let leadership = app_state.leadership.clone();

    let handle = tokio::spawn(async move {
        consumer::run(
            &options,
            queue,
            router.as_ref(),
            leadership.as_ref(),
            tokio::time::sleep,
            Box::pin(async move {
                let _ = shutdown_rx.recv().await;
            }),
        )
        .await;
    });

    shutdown_manager.with_consumer_worker_handle(handle)
}

fn init_scheduler_worker(
    options: scheduler::Options,
    app_state: Arc<AppState>,
    shutdown_manager: &mut ShutdownManager,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> Result<(), DockhandError> {
    info!("Initializing scheduler worker...");

    let handle = tokio::spawn(async move {
        scheduler::run(
            &options,
            app_state.queue.clone(),
            &app_state.dispatcher,
            app_state.leadership.as_ref(),
            tokio::time::sleep,
            Box::pin(async move {
                let _ = shutdown_rx.recv().await;
            }),
        )
        .await;
    });

    shutdown_manager.with_scheduler_worker_handle(handle)
}

async fn init_server(
    options: &AppOptions,
    app_state: Arc<AppState>,
    shutdown_manager: &mut ShutdownManager,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> Result<(), DockhandError> {
    info!("Initializing local HTTP server...");

    let server_state = ServerState::new(app_state.lifecycle.clone());
    let handle = serve(&options.server, Arc::new(server_state), async move {
        let _ = shutdown_rx.recv().await;
    })
    .await?;

    shutdown_manager.with_server_handle(handle)
}

// ================================= SHUTDOWN ===================================== //

struct ShutdownManager {
    shutdown_tx: broadcast::Sender<()>,
    lifecycle_options: LifecycleOptions,
    server_handle: Option<JoinHandle<Result<(), DockhandError>>>,
    scheduler_worker_handle: Option<JoinHandle<()>>,
    consumer_worker_handle: Option<JoinHandle<()>>,
}

impl ShutdownManager {
    pub fn new(shutdown_tx: broadcast::Sender<()>, lifecycle_options: LifecycleOptions) -> Self {
        Self {
            shutdown_tx,
            lifecycle_options,
            server_handle: None,
            scheduler_worker_handle: None,
            consumer_worker_handle: None,
        }
    }

    pub fn with_consumer_worker_handle(&mut self, handle: JoinHandle<()>) -> Result<(), DockhandError> {
        if self.consumer_worker_handle.is_some() {
            return Err(DockhandError::ShutdownError(
                "consumer_handle already set".to_string(),
            ));
        }
        self.consumer_worker_handle = Some(handle);
        Ok(())
    }

    pub fn with_scheduler_worker_handle(&mut self, handle: JoinHandle<()>) -> Result<(), DockhandError> {
        if self.scheduler_worker_handle.is_some() {
            return Err(DockhandError::ShutdownError(
                "scheduler_handle already set".to_string(),
            ));
        }
        self.scheduler_worker_handle = Some(handle);
        Ok(())
    }

    pub fn with_server_handle(
        &mut self,
        handle: JoinHandle<Result<(), DockhandError>>,
    ) -> Result<(), DockhandError> {
        if self.server_handle.is_some() {
            return Err(DockhandError::ShutdownError("server_handle already set".to_string()));
        }
        self.server_handle = Some(handle);
        Ok(())
    }

    pub async fn shutdown(&mut self) -> Result<(), DockhandError> {
        let _ = self.shutdown_tx.send(());

        match tokio::time::timeout(
            self.lifecycle_options.max_shutdown_delay,
            self.shutdown_impl(),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => {
                error!(
                    "Shutdown timed out after {:?}, forcing shutdown...",
                    self.lifecycle_options.max_shutdown_delay
                );
                std::process::exit(1);
            }
        }
    }

    async fn shutdown_impl(&mut self) -> Result<(), DockhandError> {
        info!("Shutting down dockhand...");

        // 1. Stop accepting new operations
        if let Some(handle) = self.server_handle.take() {
            handle
                .await
                .map_err(|e| DockhandError::ShutdownError(e.to_string()))??;
        }

        // 2. Scheduler
        if let Some(handle) = self.scheduler_worker_handle.take() {
            handle
                .await
                .map_err(|e| DockhandError::ShutdownError(e.to_string()))?;
        }

        // 3. Consumer, after its current job
        if let Some(handle) = self.consumer_worker_handle.take() {
            handle
                .await
                .map_err(|e| DockhandError::ShutdownError(e.to_string()))?;
        }

        info!("Shutdown complete");
        Ok(())
    }
}
