//! Single-consumer job worker
//!
//! Only the holder of the `worker` lease consumes the queue, so at most one
//! container-mutating command runs at a time across every dockhand process sharing
//! the queue. A lost lease stops consumption immediately.

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::FutureExt;
use tracing::{debug, error, info, warn};

use crate::errors::DockhandError;
use crate::events::model::{Event, Job, JobResult};
use crate::executors::EventRouter;
use crate::queue::JobQueue;
use crate::utils::{calc_exp_backoff, CooldownOptions};

/// Name of the consumer lease
pub const WORKER_LEASE: &str = "worker";

/// Consumer worker options
#[derive(Debug, Clone)]
pub struct Options {
    /// How long one `next_job` call blocks
    pub poll_interval: Duration,

    /// Lease time-to-live
    pub lease_ttl: Duration,

    /// Renewal period, well below `lease_ttl`
    pub lease_renew_interval: Duration,

    /// Identity written into the lease
    pub holder_id: String,

    /// Backoff after queue failures
    pub cooldown: CooldownOptions,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(2),
            lease_ttl: Duration::from_secs(30),
            lease_renew_interval: Duration::from_secs(10),
            holder_id: holder_id(),
            cooldown: CooldownOptions::default(),
        }
    }
}

/// Unique lease holder identity of this process
pub fn holder_id() -> String {
    format!("{}-{}", std::process::id(), uuid::Uuid::new_v4())
}

/// Whether this process currently holds the worker lease
#[derive(Debug, Default)]
pub struct Leadership {
    leader: AtomicBool,
}

impl Leadership {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_leader(&self) -> bool {
        self.leader.load(Ordering::SeqCst)
    }

    fn set(&self, leader: bool) {
        self.leader.store(leader, Ordering::SeqCst);
    }
}

enum Exit {
    Shutdown,
    LeaseLost,
    QueueFailure(DockhandError),
}

/// Run the consumer worker
pub async fn run<S, F>(
    options: &Options,
    queue: Arc<dyn JobQueue>,
    router: &EventRouter,
    leadership: &Leadership,
    sleep_fn: S,
    mut shutdown_signal: Pin<Box<dyn Future<Output = ()> + Send>>,
) where
    S: Fn(Duration) -> F,
    F: Future<Output = ()>,
{
    info!("Consumer worker starting as {}", options.holder_id);
    let mut failures: u32 = 0;

    loop {
        match queue
            .try_acquire_lease(WORKER_LEASE, &options.holder_id, options.lease_ttl)
            .await
        {
            Ok(true) => {
                failures = 0;
            }
            Ok(false) => {
                debug!("Worker lease held elsewhere, waiting");
                tokio::select! {
                    _ = &mut shutdown_signal => break,
                    _ = sleep_fn(options.lease_renew_interval) => continue,
                }
            }
            Err(e) => {
                let wait = calc_exp_backoff(&options.cooldown, failures);
                failures += 1;
                error!("Failed to acquire worker lease: {} (retrying in {:?})", e, wait);
                tokio::select! {
                    _ = &mut shutdown_signal => break,
                    _ = sleep_fn(wait) => continue,
                }
            }
        }

        leadership.set(true);
        info!("Acquired worker lease");
        match queue.fail_stalled().await {
            Ok(0) => {}
            Ok(n) => warn!("Failed {} job(s) interrupted by a previous worker", n),
            Err(e) => error!("Failed to sweep interrupted jobs: {}", e),
        }

        let exit = consume(options, queue.as_ref(), router, &sleep_fn, &mut shutdown_signal).await;
        leadership.set(false);

        match exit {
            Exit::Shutdown => {
                if let Err(e) = queue.release_lease(WORKER_LEASE, &options.holder_id).await {
                    warn!("Failed to release worker lease: {}", e);
                }
                break;
            }
            Exit::LeaseLost => {
                warn!("Worker lease lost, consumption stopped");
            }
            Exit::QueueFailure(e) => {
                let wait = calc_exp_backoff(&options.cooldown, failures);
                failures += 1;
                error!("Queue failure: {} (reconnecting in {:?})", e, wait);
                tokio::select! {
                    _ = &mut shutdown_signal => break,
                    _ = sleep_fn(wait) => {}
                }
            }
        }
    }

    info!("Consumer worker shutting down...");
}

async fn consume<S, F>(
    options: &Options,
    queue: &dyn JobQueue,
    router: &EventRouter,
    sleep_fn: &S,
    shutdown_signal: &mut Pin<Box<dyn Future<Output = ()> + Send>>,
) -> Exit
where
    S: Fn(Duration) -> F,
    F: Future<Output = ()>,
{
    let mut last_renewal = Instant::now();

    loop {
        // Shutdown is only observed between jobs; a running job is never abandoned.
        if shutdown_signal.as_mut().now_or_never().is_some() {
            return Exit::Shutdown;
        }

        if last_renewal.elapsed() >= options.lease_renew_interval {
            match renew(options, queue).await {
                Ok(true) => last_renewal = Instant::now(),
                Ok(false) => return Exit::LeaseLost,
                Err(e) => return Exit::QueueFailure(e),
            }
        }

        let job = match queue.next_job(options.poll_interval).await {
            Ok(Some(job)) => job,
            Ok(None) => continue,
            Err(e) => return Exit::QueueFailure(e),
        };

        let job_id = job.id.clone();
        let processing = process_job(queue, router, job);
        tokio::pin!(processing);

        // Keep the lease alive while a long job runs
        let mut lease_ok = true;
        let completed = loop {
            tokio::select! {
                completed = &mut processing => break completed,
                _ = sleep_fn(options.lease_renew_interval) => {
                    match renew(options, queue).await {
                        Ok(true) => last_renewal = Instant::now(),
                        Ok(false) => {
                            warn!("Worker lease lost while running job {}", job_id);
                            lease_ok = false;
                        }
                        Err(e) => warn!("Failed to renew worker lease during job {}: {}", job_id, e),
                    }
                }
            }
        };

        if let Err(e) = completed {
            return Exit::QueueFailure(e);
        }
        if !lease_ok {
            return Exit::LeaseLost;
        }
    }
}

async fn renew(options: &Options, queue: &dyn JobQueue) -> Result<bool, DockhandError> {
    queue
        .renew_lease(WORKER_LEASE, &options.holder_id, options.lease_ttl)
        .await
}

/// Validate, route and complete one job
pub async fn process_job(
    queue: &dyn JobQueue,
    router: &EventRouter,
    job: Job,
) -> Result<(), DockhandError> {
    let started = Instant::now();
    let result = match Event::parse(&job.payload) {
        Ok(event) => {
            info!("Job {} received: {}", job.id, event);
            router.route(&event).await
        }
        Err(e) => {
            warn!("Job {} rejected: {}", job.id, e);
            JobResult::failed_with(e.kind(), e.detail())
        }
    };

    info!(
        "Job {} finished: success={} in {:?}",
        job.id,
        result.success,
        started.elapsed()
    );
    queue.complete(&job.id, result).await
}
