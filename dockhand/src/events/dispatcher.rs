//! Event dispatcher
//!
//! Producers never talk to the worker directly: they enqueue an [`Event`] and either
//! walk away ([`EventDispatcher::dispatch`]) or block on its result with a timeout
//! ([`EventDispatcher::dispatch_and_wait`]). Waiting never raises; queue failures,
//! worker failures and timeouts all come back as `success: false`, tagged with
//! the error kind so callers can tell a timeout from a failure.

use std::sync::Arc;
use std::time::Duration;

use croner::Cron;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::errors::DockhandError;
use crate::events::model::{Event, Job, JobResult, Schedule};
use crate::queue::JobQueue;

/// Dispatcher options
#[derive(Debug, Clone)]
pub struct DispatcherOptions {
    /// Default wait for `dispatch_and_wait`
    pub default_timeout: Duration,

    /// Wait used for backup and restore
    pub long_timeout: Duration,
}

impl Default for DispatcherOptions {
    fn default() -> Self {
        Self {
            default_timeout: Duration::from_secs(5 * 60),
            long_timeout: Duration::from_secs(15 * 60),
        }
    }
}

/// Handle to an enqueued job
pub struct JobHandle {
    pub id: String,
    queue: Arc<dyn JobQueue>,
}

impl std::fmt::Debug for JobHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobHandle").field("id", &self.id).finish()
    }
}

impl JobHandle {
    /// Wait for the job's result. Never raises.
    pub async fn wait(&self, timeout: Duration) -> JobResult {
        match self.queue.wait_for_result(&self.id, timeout).await {
            Ok(Some(result)) => result,
            Ok(None) => {
                let err = DockhandError::Timeout(format!(
                    "job {} did not finish within {:?}",
                    self.id, timeout
                ));
                warn!("{}", err);
                JobResult::failed_with(err.kind(), err.detail())
            }
            Err(e) => {
                error!("Failed waiting for job {}: {}", self.id, e);
                JobResult::failed_with(e.kind(), e.detail())
            }
        }
    }
}

/// Enqueues lifecycle events and manages repeatable schedules
#[derive(Clone)]
pub struct EventDispatcher {
    queue: Arc<dyn JobQueue>,
    options: DispatcherOptions,
}

impl EventDispatcher {
    pub fn new(queue: Arc<dyn JobQueue>, options: DispatcherOptions) -> Self {
        Self { queue, options }
    }

    pub fn options(&self) -> &DispatcherOptions {
        &self.options
    }

    /// Timeout appropriate for an event
    pub fn timeout_for(&self, event: &Event) -> Duration {
        use crate::events::model::AppEvent;
        match event {
            Event::App(AppEvent::Backup { .. } | AppEvent::Restore { .. }) => {
                self.options.long_timeout
            }
            _ => self.options.default_timeout,
        }
    }

    /// Enqueue an event without waiting
    pub async fn dispatch(&self, event: &Event) -> Result<JobHandle, DockhandError> {
        let job = Job::new(event)?;
        let id = self.queue.enqueue(job).await?;
        debug!("Dispatched {} as job {}", event, id);
        Ok(JobHandle {
            id,
            queue: self.queue.clone(),
        })
    }

    /// Enqueue an event and wait for its result.
    ///
    /// `timeout` defaults to [`DispatcherOptions::default_timeout`]. On timeout the
    /// underlying operation is not cancelled; its eventual result is simply ignored.
    pub async fn dispatch_and_wait(&self, event: &Event, timeout: Option<Duration>) -> JobResult {
        let timeout = timeout.unwrap_or(self.options.default_timeout);
        let handle = match self.dispatch(event).await {
            Ok(handle) => handle,
            Err(e) => {
                error!("Failed to dispatch {}: {}", event, e);
                return JobResult::failed_with(e.kind(), e.detail());
            }
        };

        let result = handle.wait(timeout).await;
        debug!(
            "Job {} ({}) finished: success={}",
            handle.id, event, result.success
        );
        result
    }

    /// Dispatch and wait on a background task.
    ///
    /// The task owns its error boundary: a failed result is logged exactly once here
    /// and handed back through the join handle.
    pub fn spawn_and_wait(&self, event: Event, timeout: Option<Duration>) -> JoinHandle<JobResult> {
        let dispatcher = self.clone();
        tokio::spawn(async move {
            let result = dispatcher.dispatch_and_wait(&event, timeout).await;
            if !result.success {
                error!("Background job for {} failed: {}", event, result.message);
            }
            result
        })
    }

    /// Register a repeatable event on a 5-field cron expression
    pub async fn schedule(&self, event: Event, cron: &str) -> Result<(), DockhandError> {
        parse_cron(cron)?;
        event.validate()?;

        let key = format!("{}_{}", event.type_name(), event.command_name());
        info!("Scheduling {} on '{}'", event, cron);
        self.queue
            .add_schedule(Schedule {
                key,
                cron: cron.to_string(),
                event,
            })
            .await
    }

    /// Remove every repeatable registration. Run on boot before re-registering.
    pub async fn purge_schedules(&self) -> Result<usize, DockhandError> {
        let removed = self.queue.remove_all_schedules().await?;
        if removed > 0 {
            info!("Purged {} stale schedule(s)", removed);
        }
        Ok(removed)
    }

    /// Drop all queued and scheduled work
    pub async fn reset(&self) -> Result<(), DockhandError> {
        warn!("Resetting event queue");
        self.queue.clear().await
    }
}

/// Parse a 5-field cron expression
pub fn parse_cron(expression: &str) -> Result<Cron, DockhandError> {
    Cron::new(expression).parse().map_err(|e| {
        DockhandError::ValidationError(format!("Invalid cron expression '{}': {}", expression, e))
    })
}
