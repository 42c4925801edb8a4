//! Repeatable schedule ticker
//!
//! Runs on every process but only fires while this process holds the worker lease.
//! Occurrences missed while nobody was leading are not replayed.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::{debug, error, info, warn};

use crate::events::dispatcher::{parse_cron, EventDispatcher};
use crate::events::model::Schedule;
use crate::queue::JobQueue;
use crate::workers::consumer::Leadership;

/// Scheduler worker options
#[derive(Debug, Clone)]
pub struct Options {
    /// How often schedules are checked
    pub tick: Duration,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            tick: Duration::from_secs(1),
        }
    }
}

/// Next due time per schedule key
#[derive(Debug, Default)]
pub struct Ticker {
    next: HashMap<String, (String, DateTime<Utc>)>,
}

impl Ticker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Forget all due times, e.g. after losing leadership
    pub fn reset(&mut self) {
        self.next.clear();
    }

    /// Schedules due at `now`. Due times are advanced past `now`.
    pub fn due(&mut self, schedules: &[Schedule], now: DateTime<Utc>) -> Vec<Schedule> {
        self.next
            .retain(|key, _| schedules.iter().any(|s| &s.key == key));

        let mut due = Vec::new();
        for schedule in schedules {
            let cron = match parse_cron(&schedule.cron) {
                Ok(cron) => cron,
                Err(e) => {
                    warn!("Skipping schedule {}: {}", schedule.key, e);
                    continue;
                }
            };

            // An unseen or changed schedule is only armed
            let fire = match self.next.get(&schedule.key) {
                Some((expr, at)) if expr == &schedule.cron => {
                    if now < *at {
                        continue;
                    }
                    true
                }
                _ => false,
            };
            if fire {
                due.push(schedule.clone());
            }

            match cron.find_next_occurrence(&now, false) {
                Ok(at) => {
                    self.next
                        .insert(schedule.key.clone(), (schedule.cron.clone(), at));
                }
                Err(e) => {
                    warn!("No next occurrence for {}: {}", schedule.key, e);
                    self.next.remove(&schedule.key);
                }
            }
        }
        due
    }
}

/// Run the scheduler worker
pub async fn run<S, F>(
    options: &Options,
    queue: Arc<dyn JobQueue>,
    dispatcher: &EventDispatcher,
    leadership: &Leadership,
    sleep_fn: S,
    mut shutdown_signal: Pin<Box<dyn Future<Output = ()> + Send>>,
) where
    S: Fn(Duration) -> F,
    F: Future<Output = ()>,
{
    info!("Scheduler worker starting...");
    let mut ticker = Ticker::new();

    loop {
        tokio::select! {
            _ = &mut shutdown_signal => {
                info!("Scheduler worker shutting down...");
                return;
            }
            _ = sleep_fn(options.tick) => {}
        }

        if !leadership.is_leader() {
            ticker.reset();
            continue;
        }

        let schedules = match queue.list_schedules().await {
            Ok(schedules) => schedules,
            Err(e) => {
                error!("Failed to list schedules: {}", e);
                continue;
            }
        };

        for schedule in ticker.due(&schedules, Utc::now()) {
            match dispatcher.dispatch(&schedule.event).await {
                Ok(handle) => debug!("Schedule {} fired as job {}", schedule.key, handle.id),
                Err(e) => error!("Schedule {} failed to dispatch: {}", schedule.key, e),
            }
        }
    }
}
