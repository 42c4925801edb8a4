//! Redis queue transport
//!
//! Key layout for a queue named `events`:
//!
//! ```text
//! events:wait            list of job ids waiting (LPUSH / right end is the head)
//! events:active          list of job ids taken by the worker
//! events:job:<id>        JSON job record, expires after completion
//! events:result:<id>     single-element list holding the JSON result
//! events:repeat          hash of repeatable schedules keyed by schedule key
//! events:lease:<name>    lease holder id with a PX expiry
//! ```
//!
//! Hand-off from `wait` to `active` is a single `BLMOVE`, so a crashed worker leaves
//! its job visible in `active` for [`JobQueue::fail_stalled`]. Results are read with a
//! `BLMOVE` of the result list onto itself, which blocks without consuming, so any
//! number of waiters (including late ones) observe the same result.

use std::time::Duration;

use async_trait::async_trait;
use redis::aio::{ConnectionManager, MultiplexedConnection};
use redis::{Client, ConnectionAddr, ConnectionInfo, RedisConnectionInfo, Script};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::errors::DockhandError;
use crate::events::model::{Job, JobResult, Schedule};
use crate::queue::{JobQueue, STALLED_JOB_MESSAGE};
use crate::storage::settings::QueueSettings;
use crate::utils::epoch_millis;

/// Tries at claiming a free job id before giving up
const MAX_ID_ATTEMPTS: usize = 16;

const RENEW_LEASE_SCRIPT: &str = r#"
if redis.call('GET', KEYS[1]) == ARGV[1] then
    return redis.call('PEXPIRE', KEYS[1], ARGV[2])
else
    return 0
end
"#;

const RELEASE_LEASE_SCRIPT: &str = r#"
if redis.call('GET', KEYS[1]) == ARGV[1] then
    return redis.call('DEL', KEYS[1])
else
    return 0
end
"#;

/// Connection parameters for [`RedisQueue`]
#[derive(Debug)]
pub struct RedisQueueConfig {
    pub host: String,
    pub port: u16,
    pub password: Option<SecretString>,
    pub db: i64,
    pub name: String,
    pub completed_job_ttl: Duration,
}

impl From<&QueueSettings> for RedisQueueConfig {
    fn from(settings: &QueueSettings) -> Self {
        Self {
            host: settings.host.clone(),
            port: settings.port,
            password: settings.password.clone().map(SecretString::from),
            db: settings.db,
            name: settings.name.clone(),
            completed_job_ttl: Duration::from_secs(settings.completed_job_ttl_secs),
        }
    }
}

/// Persisted job record
#[derive(Debug, Clone, Serialize, Deserialize)]
struct JobRecord {
    job: Job,
    #[serde(default)]
    result: Option<JobResult>,
    #[serde(default)]
    finished_at: Option<u64>,
}

#[derive(Debug, Clone)]
struct Keys {
    name: String,
}

impl Keys {
    fn wait(&self) -> String {
        format!("{}:wait", self.name)
    }

    fn active(&self) -> String {
        format!("{}:active", self.name)
    }

    fn job(&self, id: &str) -> String {
        format!("{}:job:{}", self.name, id)
    }

    fn result(&self, id: &str) -> String {
        format!("{}:result:{}", self.name, id)
    }

    fn repeat(&self) -> String {
        format!("{}:repeat", self.name)
    }

    fn lease(&self, name: &str) -> String {
        format!("{}:lease:{}", self.name, name)
    }
}

/// Durable [`JobQueue`] backed by Redis
pub struct RedisQueue {
    client: Client,
    conn: ConnectionManager,
    consumer: Mutex<Option<MultiplexedConnection>>,
    keys: Keys,
    completed_job_ttl: Duration,
}

impl RedisQueue {
    /// Connect to Redis
    pub async fn connect(config: RedisQueueConfig) -> Result<Self, DockhandError> {
        let info = ConnectionInfo {
            addr: ConnectionAddr::Tcp(config.host.clone(), config.port),
            redis: RedisConnectionInfo {
                db: config.db,
                password: config
                    .password
                    .as_ref()
                    .map(|p| p.expose_secret().to_string()),
                ..Default::default()
            },
        };

        let client = Client::open(info)?;
        let conn = ConnectionManager::new(client.clone()).await?;
        info!(
            "Connected to queue '{}' at {}:{}",
            config.name, config.host, config.port
        );

        Ok(Self {
            client,
            conn,
            consumer: Mutex::new(None),
            keys: Keys { name: config.name },
            completed_job_ttl: config.completed_job_ttl,
        })
    }

    /// Blocking commands get their own connection so they never stall the shared one
    async fn blocking_connection(&self) -> Result<MultiplexedConnection, DockhandError> {
        Ok(self.client.get_multiplexed_async_connection().await?)
    }

    async fn scan_keys(&self, pattern: &str) -> Result<Vec<String>, DockhandError> {
        let mut conn = self.conn.clone();
        let mut cursor: u64 = 0;
        let mut keys = Vec::new();
        loop {
            let (next, batch): (u64, Vec<String>) = redis::cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg(pattern)
                .arg("COUNT")
                .arg(200)
                .query_async(&mut conn)
                .await?;
            keys.extend(batch);
            if next == 0 {
                return Ok(keys);
            }
            cursor = next;
        }
    }
}

/// Redis blocking timeouts are seconds; zero would block forever
fn blocking_secs(timeout: Duration) -> f64 {
    timeout.as_secs_f64().max(0.01)
}

#[async_trait]
impl JobQueue for RedisQueue {
    async fn enqueue(&self, mut job: Job) -> Result<String, DockhandError> {
        let mut conn = self.conn.clone();
        for _ in 0..MAX_ID_ATTEMPTS {
            let record = JobRecord {
                job: job.clone(),
                result: None,
                finished_at: None,
            };
            // SET NX claims the id; another producer may share the millisecond
            let claimed: Option<String> = redis::cmd("SET")
                .arg(self.keys.job(&job.id))
                .arg(serde_json::to_string(&record)?)
                .arg("NX")
                .query_async(&mut conn)
                .await?;
            if claimed.is_none() {
                debug!("Job id {} already taken, reissuing", job.id);
                job.reissue();
                continue;
            }

            let _: () = redis::cmd("LPUSH")
                .arg(self.keys.wait())
                .arg(&job.id)
                .query_async(&mut conn)
                .await?;
            debug!("Enqueued job {}", job.id);
            return Ok(job.id);
        }
        Err(DockhandError::QueueError(format!(
            "no free job id after {} attempts",
            MAX_ID_ATTEMPTS
        )))
    }

    async fn next_job(&self, poll_timeout: Duration) -> Result<Option<Job>, DockhandError> {
        let mut guard = self.consumer.lock().await;
        if guard.is_none() {
            *guard = Some(self.blocking_connection().await?);
        }
        let conn = guard
            .as_mut()
            .ok_or_else(|| DockhandError::QueueError("consumer connection unavailable".into()))?;

        let popped: Result<Option<String>, redis::RedisError> = redis::cmd("BLMOVE")
            .arg(self.keys.wait())
            .arg(self.keys.active())
            .arg("RIGHT")
            .arg("LEFT")
            .arg(blocking_secs(poll_timeout))
            .query_async(conn)
            .await;

        let job_id = match popped {
            Ok(Some(id)) => id,
            Ok(None) => return Ok(None),
            Err(e) => {
                // Drop the connection so the next poll reconnects
                *guard = None;
                return Err(e.into());
            }
        };
        drop(guard);

        let mut conn = self.conn.clone();
        let raw: Option<String> = redis::cmd("GET")
            .arg(self.keys.job(&job_id))
            .query_async(&mut conn)
            .await?;

        match raw {
            Some(raw) => {
                let record: JobRecord = serde_json::from_str(&raw)?;
                Ok(Some(record.job))
            }
            None => {
                warn!("Job record {} is missing, discarding", job_id);
                let _: () = redis::cmd("LREM")
                    .arg(self.keys.active())
                    .arg(0)
                    .arg(&job_id)
                    .query_async(&mut conn)
                    .await?;
                Ok(None)
            }
        }
    }

    async fn complete(&self, job_id: &str, result: JobResult) -> Result<(), DockhandError> {
        let mut conn = self.conn.clone();
        let ttl = self.completed_job_ttl.as_secs().max(1);

        let raw: Option<String> = redis::cmd("GET")
            .arg(self.keys.job(job_id))
            .query_async(&mut conn)
            .await?;
        let record = raw
            .map(|raw| serde_json::from_str::<JobRecord>(&raw))
            .transpose()?
            .map(|mut record| {
                record.result = Some(result.clone());
                record.finished_at = Some(epoch_millis());
                record
            });

        let mut pipe = redis::pipe();
        pipe.atomic()
            .lrem(self.keys.active(), 0, job_id)
            .ignore()
            .del(self.keys.result(job_id))
            .ignore()
            .lpush(self.keys.result(job_id), serde_json::to_string(&result)?)
            .ignore()
            .expire(self.keys.result(job_id), ttl as i64)
            .ignore();
        if let Some(record) = record {
            pipe.set_ex(self.keys.job(job_id), serde_json::to_string(&record)?, ttl)
                .ignore();
        }
        let _: () = pipe.query_async(&mut conn).await?;
        Ok(())
    }

    async fn wait_for_result(
        &self,
        job_id: &str,
        timeout: Duration,
    ) -> Result<Option<JobResult>, DockhandError> {
        let mut conn = self.blocking_connection().await?;
        let key = self.keys.result(job_id);
        let raw: Option<String> = redis::cmd("BLMOVE")
            .arg(&key)
            .arg(&key)
            .arg("LEFT")
            .arg("LEFT")
            .arg(blocking_secs(timeout))
            .query_async(&mut conn)
            .await?;

        raw.map(|raw| serde_json::from_str(&raw))
            .transpose()
            .map_err(DockhandError::from)
    }

    async fn fail_stalled(&self) -> Result<usize, DockhandError> {
        let mut conn = self.conn.clone();
        let stalled: Vec<String> = redis::cmd("LRANGE")
            .arg(self.keys.active())
            .arg(0)
            .arg(-1)
            .query_async(&mut conn)
            .await?;

        for job_id in &stalled {
            warn!("Failing stalled job {}", job_id);
            self.complete(job_id, JobResult::failed(STALLED_JOB_MESSAGE))
                .await?;
        }
        Ok(stalled.len())
    }

    async fn add_schedule(&self, schedule: Schedule) -> Result<(), DockhandError> {
        let mut conn = self.conn.clone();
        let _: () = redis::cmd("HSET")
            .arg(self.keys.repeat())
            .arg(&schedule.key)
            .arg(serde_json::to_string(&schedule)?)
            .query_async(&mut conn)
            .await?;
        Ok(())
    }

    async fn list_schedules(&self) -> Result<Vec<Schedule>, DockhandError> {
        let mut conn = self.conn.clone();
        let raw: Vec<String> = redis::cmd("HVALS")
            .arg(self.keys.repeat())
            .query_async(&mut conn)
            .await?;

        let mut schedules = Vec::with_capacity(raw.len());
        for entry in raw {
            match serde_json::from_str::<Schedule>(&entry) {
                Ok(schedule) => schedules.push(schedule),
                Err(e) => warn!("Skipping unreadable schedule: {}", e),
            }
        }
        Ok(schedules)
    }

    async fn remove_all_schedules(&self) -> Result<usize, DockhandError> {
        let mut conn = self.conn.clone();
        let (count,): (usize,) = redis::pipe()
            .atomic()
            .cmd("HLEN")
            .arg(self.keys.repeat())
            .del(self.keys.repeat())
            .ignore()
            .query_async(&mut conn)
            .await?;
        Ok(count)
    }

    async fn clear(&self) -> Result<(), DockhandError> {
        let mut keys = vec![self.keys.wait(), self.keys.active(), self.keys.repeat()];
        keys.extend(self.scan_keys(&format!("{}:job:*", self.keys.name)).await?);
        keys.extend(
            self.scan_keys(&format!("{}:result:*", self.keys.name))
                .await?,
        );

        let mut conn = self.conn.clone();
        for chunk in keys.chunks(500) {
            let _: () = redis::cmd("DEL")
                .arg(chunk)
                .query_async(&mut conn)
                .await?;
        }
        info!("Cleared queue '{}'", self.keys.name);
        Ok(())
    }

    async fn try_acquire_lease(
        &self,
        name: &str,
        holder: &str,
        ttl: Duration,
    ) -> Result<bool, DockhandError> {
        let mut conn = self.conn.clone();
        let key = self.keys.lease(name);

        let set: Option<String> = redis::cmd("SET")
            .arg(&key)
            .arg(holder)
            .arg("NX")
            .arg("PX")
            .arg(ttl.as_millis() as u64)
            .query_async(&mut conn)
            .await?;
        if set.is_some() {
            return Ok(true);
        }

        // Re-acquiring a lease we already hold counts as success
        self.renew_lease(name, holder, ttl).await
    }

    async fn renew_lease(
        &self,
        name: &str,
        holder: &str,
        ttl: Duration,
    ) -> Result<bool, DockhandError> {
        let mut conn = self.conn.clone();
        let renewed: i64 = Script::new(RENEW_LEASE_SCRIPT)
            .key(self.keys.lease(name))
            .arg(holder)
            .arg(ttl.as_millis() as u64)
            .invoke_async(&mut conn)
            .await?;
        Ok(renewed == 1)
    }

    async fn release_lease(&self, name: &str, holder: &str) -> Result<(), DockhandError> {
        let mut conn = self.conn.clone();
        let _: i64 = Script::new(RELEASE_LEASE_SCRIPT)
            .key(self.keys.lease(name))
            .arg(holder)
            .invoke_async(&mut conn)
            .await?;
        Ok(())
    }
}
