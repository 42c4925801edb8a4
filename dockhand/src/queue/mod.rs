//! Job queue transport
//!
//! The queue is the only concurrency boundary between producers (anything that
//! dispatches lifecycle events) and the single consuming worker. Two transports
//! implement [`JobQueue`]: a durable Redis-backed one and an in-process one.

pub mod memory;
pub mod redis_queue;

use std::time::Duration;

use async_trait::async_trait;

use crate::errors::DockhandError;
use crate::events::model::{Job, JobResult, Schedule};

/// Message attached to jobs interrupted by a worker crash
pub const STALLED_JOB_MESSAGE: &str = "job interrupted by worker restart";

/// Durable FIFO of jobs with blocking wait-for-result
#[async_trait]
pub trait JobQueue: Send + Sync {
    /// Append a job to the tail of the queue.
    ///
    /// Returns the id the job was stored under. A job whose id is already taken,
    /// e.g. by another process dispatching in the same millisecond, is reissued.
    async fn enqueue(&self, job: Job) -> Result<String, DockhandError>;

    /// Take the next job, waiting up to `poll_timeout`. The job is marked in-flight.
    async fn next_job(&self, poll_timeout: Duration) -> Result<Option<Job>, DockhandError>;

    /// Attach a result to an in-flight job and wake any waiter
    async fn complete(&self, job_id: &str, result: JobResult) -> Result<(), DockhandError>;

    /// Block until the job has a result or `timeout` elapses (`None`)
    async fn wait_for_result(
        &self,
        job_id: &str,
        timeout: Duration,
    ) -> Result<Option<JobResult>, DockhandError>;

    /// Fail every job still marked in-flight. Returns how many were failed.
    async fn fail_stalled(&self) -> Result<usize, DockhandError>;

    /// Register (or replace) a repeatable schedule
    async fn add_schedule(&self, schedule: Schedule) -> Result<(), DockhandError>;

    /// All repeatable schedules
    async fn list_schedules(&self) -> Result<Vec<Schedule>, DockhandError>;

    /// Remove every repeatable schedule. Returns how many were removed.
    async fn remove_all_schedules(&self) -> Result<usize, DockhandError>;

    /// Drop all queued, in-flight and scheduled work
    async fn clear(&self) -> Result<(), DockhandError>;

    /// Try to take the named lease for `ttl`. True when `holder` now owns it.
    async fn try_acquire_lease(
        &self,
        name: &str,
        holder: &str,
        ttl: Duration,
    ) -> Result<bool, DockhandError>;

    /// Extend a lease still owned by `holder`. False when it was lost.
    async fn renew_lease(
        &self,
        name: &str,
        holder: &str,
        ttl: Duration,
    ) -> Result<bool, DockhandError>;

    /// Release a lease owned by `holder`
    async fn release_lease(&self, name: &str, holder: &str) -> Result<(), DockhandError>;
}
