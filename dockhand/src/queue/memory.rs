//! In-process queue transport
//!
//! Same semantics as the Redis transport without durability. Used by tests and
//! single-process installs.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::sync::Notify;

use crate::errors::DockhandError;
use crate::events::model::{Job, JobResult, Schedule};
use crate::queue::{JobQueue, STALLED_JOB_MESSAGE};

/// Number of finished results kept for late waiters
const RESULT_RETENTION: usize = 1024;

#[derive(Default)]
struct State {
    waiting: VecDeque<Job>,
    active: HashMap<String, Job>,
    results: HashMap<String, JobResult>,
    result_order: VecDeque<String>,
    schedules: Vec<Schedule>,
    leases: HashMap<String, (String, Instant)>,
}

impl State {
    fn knows(&self, job_id: &str) -> bool {
        self.active.contains_key(job_id)
            || self.results.contains_key(job_id)
            || self.waiting.iter().any(|job| job.id == job_id)
    }

    fn store_result(&mut self, job_id: &str, result: JobResult) {
        if self.results.insert(job_id.to_string(), result).is_none() {
            self.result_order.push_back(job_id.to_string());
        }
        while self.result_order.len() > RESULT_RETENTION {
            if let Some(oldest) = self.result_order.pop_front() {
                self.results.remove(&oldest);
            }
        }
    }
}

/// In-memory [`JobQueue`]
#[derive(Default)]
pub struct MemoryQueue {
    state: Mutex<State>,
    job_available: Notify,
    result_available: Notify,
}

impl MemoryQueue {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Number of jobs waiting to be consumed
    pub fn waiting_len(&self) -> usize {
        self.lock().waiting.len()
    }

    /// Number of jobs taken but not completed
    pub fn active_len(&self) -> usize {
        self.lock().active.len()
    }
}

#[async_trait]
impl JobQueue for MemoryQueue {
    async fn enqueue(&self, mut job: Job) -> Result<String, DockhandError> {
        let id = {
            let mut state = self.lock();
            while state.knows(&job.id) {
                job.reissue();
            }
            let id = job.id.clone();
            state.waiting.push_back(job);
            id
        };
        self.job_available.notify_waiters();
        Ok(id)
    }

    async fn next_job(&self, poll_timeout: Duration) -> Result<Option<Job>, DockhandError> {
        let wait = async {
            loop {
                let notified = self.job_available.notified();
                tokio::pin!(notified);
                notified.as_mut().enable();

                {
                    let mut state = self.lock();
                    if let Some(job) = state.waiting.pop_front() {
                        state.active.insert(job.id.clone(), job.clone());
                        return job;
                    }
                }

                notified.await;
            }
        };

        Ok(tokio::time::timeout(poll_timeout, wait).await.ok())
    }

    async fn complete(&self, job_id: &str, result: JobResult) -> Result<(), DockhandError> {
        {
            let mut state = self.lock();
            state.active.remove(job_id);
            state.store_result(job_id, result);
        }
        self.result_available.notify_waiters();
        Ok(())
    }

    async fn wait_for_result(
        &self,
        job_id: &str,
        timeout: Duration,
    ) -> Result<Option<JobResult>, DockhandError> {
        let wait = async {
            loop {
                let notified = self.result_available.notified();
                tokio::pin!(notified);
                notified.as_mut().enable();

                let found = self.lock().results.get(job_id).cloned();
                if let Some(result) = found {
                    return result;
                }

                notified.await;
            }
        };

        Ok(tokio::time::timeout(timeout, wait).await.ok())
    }

    async fn fail_stalled(&self) -> Result<usize, DockhandError> {
        let count = {
            let mut state = self.lock();
            let stalled: Vec<String> = state.active.drain().map(|(id, _)| id).collect();
            for id in &stalled {
                state.store_result(id, JobResult::failed(STALLED_JOB_MESSAGE));
            }
            stalled.len()
        };
        if count > 0 {
            self.result_available.notify_waiters();
        }
        Ok(count)
    }

    async fn add_schedule(&self, schedule: Schedule) -> Result<(), DockhandError> {
        let mut state = self.lock();
        state.schedules.retain(|s| s.key != schedule.key);
        state.schedules.push(schedule);
        Ok(())
    }

    async fn list_schedules(&self) -> Result<Vec<Schedule>, DockhandError> {
        Ok(self.lock().schedules.clone())
    }

    async fn remove_all_schedules(&self) -> Result<usize, DockhandError> {
        let mut state = self.lock();
        let count = state.schedules.len();
        state.schedules.clear();
        Ok(count)
    }

    async fn clear(&self) -> Result<(), DockhandError> {
        let mut state = self.lock();
        state.waiting.clear();
        state.active.clear();
        state.results.clear();
        state.result_order.clear();
        state.schedules.clear();
        Ok(())
    }

    async fn try_acquire_lease(
        &self,
        name: &str,
        holder: &str,
        ttl: Duration,
    ) -> Result<bool, DockhandError> {
        let mut state = self.lock();
        let now = Instant::now();
        match state.leases.get(name) {
            Some((owner, expires)) if *expires > now && owner != holder => Ok(false),
            _ => {
                state
                    .leases
                    .insert(name.to_string(), (holder.to_string(), now + ttl));
                Ok(true)
            }
        }
    }

    async fn renew_lease(
        &self,
        name: &str,
        holder: &str,
        ttl: Duration,
    ) -> Result<bool, DockhandError> {
        let mut state = self.lock();
        let now = Instant::now();
        match state.leases.get_mut(name) {
            Some((owner, expires)) if owner == holder && *expires > now => {
                *expires = now + ttl;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn release_lease(&self, name: &str, holder: &str) -> Result<(), DockhandError> {
        let mut state = self.lock();
        if matches!(state.leases.get(name), Some((owner, _)) if owner == holder) {
            state.leases.remove(name);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::model::{Event, SystemEvent};
    use std::sync::Arc;

    fn job() -> Job {
        Job::new(&Event::System(SystemEvent::SystemInfo)).unwrap()
    }

    #[tokio::test]
    async fn test_fifo_order() {
        let queue = MemoryQueue::new();
        let (a, b) = (job(), job());
        queue.enqueue(a.clone()).await.unwrap();
        queue.enqueue(b.clone()).await.unwrap();

        let first = queue.next_job(Duration::from_millis(10)).await.unwrap();
        let second = queue.next_job(Duration::from_millis(10)).await.unwrap();
        assert_eq!(first.map(|j| j.id), Some(a.id));
        assert_eq!(second.map(|j| j.id), Some(b.id));
        assert!(queue
            .next_job(Duration::from_millis(10))
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_taken_id_is_reissued() {
        let queue = MemoryQueue::new();
        let a = job();
        let first = queue.enqueue(a.clone()).await.unwrap();
        let second = queue.enqueue(a.clone()).await.unwrap();

        assert_eq!(first, a.id);
        assert_ne!(second, first);
        assert!(second.starts_with("system_"));
        assert_eq!(queue.waiting_len(), 2);
    }

    #[tokio::test]
    async fn test_waiter_wakes_on_complete() {
        let queue = Arc::new(MemoryQueue::new());
        let j = job();
        queue.enqueue(j.clone()).await.unwrap();

        let waiter = {
            let queue = queue.clone();
            let id = j.id.clone();
            tokio::spawn(async move { queue.wait_for_result(&id, Duration::from_secs(5)).await })
        };

        let taken = queue
            .next_job(Duration::from_secs(1))
            .await
            .unwrap()
            .unwrap();
        queue
            .complete(&taken.id, JobResult::ok("fine"))
            .await
            .unwrap();

        let result = waiter.await.unwrap().unwrap();
        assert_eq!(result, Some(JobResult::ok("fine")));
    }

    #[tokio::test]
    async fn test_wait_times_out_without_result() {
        let queue = MemoryQueue::new();
        let result = queue
            .wait_for_result("app_1", Duration::from_millis(20))
            .await
            .unwrap();
        assert!(result.is_none());
    }

    #[tokio::test]
    async fn test_fail_stalled() {
        let queue = MemoryQueue::new();
        let j = job();
        queue.enqueue(j.clone()).await.unwrap();
        queue.next_job(Duration::from_millis(10)).await.unwrap();

        assert_eq!(queue.fail_stalled().await.unwrap(), 1);
        let result = queue
            .wait_for_result(&j.id, Duration::from_millis(10))
            .await
            .unwrap()
            .unwrap();
        assert!(!result.success);
        assert_eq!(queue.active_len(), 0);
    }

    #[tokio::test]
    async fn test_lease_exclusive() {
        let queue = MemoryQueue::new();
        let ttl = Duration::from_secs(30);
        assert!(queue.try_acquire_lease("worker", "a", ttl).await.unwrap());
        assert!(!queue.try_acquire_lease("worker", "b", ttl).await.unwrap());
        assert!(queue.renew_lease("worker", "a", ttl).await.unwrap());
        assert!(!queue.renew_lease("worker", "b", ttl).await.unwrap());

        queue.release_lease("worker", "b").await.unwrap();
        assert!(!queue.try_acquire_lease("worker", "b", ttl).await.unwrap());

        queue.release_lease("worker", "a").await.unwrap();
        assert!(queue.try_acquire_lease("worker", "b", ttl).await.unwrap());
    }

    #[tokio::test]
    async fn test_expired_lease_can_be_taken() {
        let queue = MemoryQueue::new();
        assert!(queue
            .try_acquire_lease("worker", "a", Duration::from_millis(1))
            .await
            .unwrap());
        tokio::time::sleep(Duration::from_millis(5)).await;
        assert!(queue
            .try_acquire_lease("worker", "b", Duration::from_secs(30))
            .await
            .unwrap());
        assert!(!queue
            .renew_lease("worker", "a", Duration::from_secs(30))
            .await
            .unwrap());
    }
}
