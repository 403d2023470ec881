//! The queue broker: job lifecycle, multi-queue dispatch, stalled-lease
//! recovery, and the maintenance loop.

use crate::config::BrokerConfig;
use crate::error::{BrokerError, BrokerResult};
use crate::events::QueueSubscriber;
use crate::job::{Job, JobId, JobOptions, JobStatus};
use crate::metrics::JobMetrics;
use crate::store::{QueueKeys, RedisStore, Store};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::time::interval;
use tracing::{debug, error, info, warn};

/// Point-in-time queue statistics.
///
/// Collection sizes are authoritative; the `total` counter is best-effort.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueStats {
    /// Counter of all jobs ever enqueued.
    pub total: u64,
    /// Runnable jobs: pending list length plus priority set cardinality.
    pub pending: u64,
    /// Leased jobs.
    pub processing: u64,
    /// Jobs waiting for their due time.
    pub delayed: u64,
    /// Terminal successes.
    pub completed: u64,
    /// Terminal failures.
    pub failed: u64,
}

/// Distributed task queue broker over a shared backing store.
///
/// All persistent state lives in the store; broker instances in different
/// processes sharing a namespace cooperate through it with no further
/// coordination. Guarantees at-least-once execution: a job leased by a
/// crashed worker is reclaimed by the stalled sweep and redelivered.
pub struct QueueBroker {
    store: Arc<dyn Store>,
    keys: QueueKeys,
    config: BrokerConfig,
    subscribers: Vec<Arc<dyn QueueSubscriber>>,
    shutdown_tx: broadcast::Sender<()>,
    maintenance_running: AtomicBool,
}

impl QueueBroker {
    /// Creates a broker over the given store.
    pub fn new(store: Arc<dyn Store>, config: BrokerConfig) -> BrokerResult<Self> {
        config.validate()?;
        let keys = QueueKeys::new(&config.redis.key_prefix, &config.name);
        let (shutdown_tx, _) = broadcast::channel(1);

        Ok(Self {
            store,
            keys,
            config,
            subscribers: Vec::new(),
            shutdown_tx,
            maintenance_running: AtomicBool::new(false),
        })
    }

    /// Connects to Redis and creates a broker over it.
    pub async fn connect(config: BrokerConfig) -> BrokerResult<Self> {
        let store = RedisStore::connect(&config.redis).await?;
        Self::new(Arc::new(store), config)
    }

    /// Registers a lifecycle subscriber. Call before sharing the broker.
    pub fn subscribe(&mut self, subscriber: Arc<dyn QueueSubscriber>) {
        self.subscribers.push(subscriber);
    }

    /// Returns the broker configuration.
    pub fn config(&self) -> &BrokerConfig {
        &self.config
    }

    fn emit<F: Fn(&dyn QueueSubscriber)>(&self, f: F) {
        for subscriber in &self.subscribers {
            f(subscriber.as_ref());
        }
    }

    fn now_ms() -> i64 {
        Utc::now().timestamp_millis()
    }

    /// Enqueues a job.
    ///
    /// The record is persisted first, then the id is placed in exactly one
    /// of the delayed set, the priority set, or the pending list. A store
    /// failure between the two steps can leave a record with no queue
    /// membership; the error is propagated and the record is repaired by
    /// operator reconciliation.
    pub async fn add_job(
        &self,
        data: serde_json::Value,
        options: JobOptions,
    ) -> BrokerResult<JobId> {
        options.validate()?;

        let job = Job::new(data, &options, self.config.max_retries);
        let job_id = job.id.clone();

        self.store
            .hset(&self.keys.jobs(), job_id.as_str(), &job.to_json()?)
            .await?;

        let delay_ms = options.delay.as_millis() as u64;
        if delay_ms > 0 {
            let execute_at = Self::now_ms() + delay_ms as i64;
            self.store
                .zadd(&self.keys.delayed(), execute_at as f64, job_id.as_str())
                .await?;
        } else if job.priority > 0 {
            self.store
                .zadd(
                    &self.keys.priority(),
                    -f64::from(job.priority),
                    job_id.as_str(),
                )
                .await?;
        } else {
            self.store
                .rpush(&self.keys.pending(), job_id.as_str())
                .await?;
        }

        self.store.hincrby(&self.keys.stats(), "total", 1).await?;

        debug!(
            job_id = %job_id,
            queue = %self.config.name,
            priority = job.priority,
            delay_ms = delay_ms,
            "Enqueued job"
        );

        JobMetrics::job_enqueued(&self.config.name);
        self.emit(|s| s.on_job_added(&job));

        Ok(job_id)
    }

    /// Dequeues the next runnable job, draining the priority set before
    /// examining the pending list.
    ///
    /// The pop and the `processing` insertion are one indivisible store
    /// operation, so a crash at any point leaves the id in exactly one
    /// collection. Never blocks; returns `None` when both sources are
    /// empty.
    pub async fn get_next_job(&self) -> BrokerResult<Option<Job>> {
        loop {
            let lease = Self::now_ms().to_string();

            let popped = self
                .store
                .zpopmin_to_hash(&self.keys.priority(), &self.keys.processing(), &lease)
                .await?;

            let id = match popped {
                Some(id) => id,
                None => {
                    match self
                        .store
                        .lpop_to_hash(&self.keys.pending(), &self.keys.processing(), &lease)
                        .await?
                    {
                        Some(id) => id,
                        None => return Ok(None),
                    }
                }
            };

            let Some(json) = self.store.hget(&self.keys.jobs(), &id).await? else {
                // Orphaned id with no record; drop the lease and keep draining.
                warn!(job_id = %id, queue = %self.config.name, "Dequeued id has no job record");
                self.store.hdel(&self.keys.processing(), &id).await?;
                continue;
            };

            let mut job = Job::from_json(&json)?;
            job.status = JobStatus::Processing;
            self.store
                .hset(&self.keys.jobs(), &id, &job.to_json()?)
                .await?;

            debug!(
                job_id = %id,
                queue = %self.config.name,
                attempts = job.attempts,
                "Dequeued job"
            );

            JobMetrics::job_dequeued(&self.config.name);

            return Ok(Some(job));
        }
    }

    /// Marks a leased job as completed.
    ///
    /// Returns `false` without side effects when the record is missing,
    /// already terminal, or no longer leased (its lease was reclaimed by
    /// the stalled sweep). Late reports from resurrected workers are
    /// therefore benign.
    pub async fn complete_job(
        &self,
        job_id: &JobId,
        result: serde_json::Value,
    ) -> BrokerResult<bool> {
        let Some(json) = self.store.hget(&self.keys.jobs(), job_id.as_str()).await? else {
            return Ok(false);
        };
        let mut job = Job::from_json(&json)?;

        if job.status.is_terminal() {
            return Ok(false);
        }
        if self
            .store
            .hdel(&self.keys.processing(), job_id.as_str())
            .await?
            == 0
        {
            debug!(job_id = %job_id, "Completion report for a job no longer leased");
            return Ok(false);
        }

        job.status = JobStatus::Completed;
        job.completed_at = Some(Utc::now());
        job.result = Some(result);

        self.store
            .hset(&self.keys.jobs(), job_id.as_str(), &job.to_json()?)
            .await?;
        self.store
            .rpush(&self.keys.completed(), job_id.as_str())
            .await?;

        debug!(job_id = %job_id, queue = %self.config.name, "Completed job");

        let elapsed = (Utc::now() - job.created_at)
            .to_std()
            .unwrap_or(Duration::ZERO);
        JobMetrics::job_completed(&self.config.name, elapsed);
        self.emit(|s| s.on_job_completed(&job));

        Ok(true)
    }

    /// Records a failed attempt for a leased job.
    ///
    /// Schedules a retry and returns `true` while attempts remain;
    /// otherwise fails the job permanently and returns `false`. The same
    /// idempotency rules as [`complete_job`](Self::complete_job) apply.
    pub async fn fail_job(&self, job_id: &JobId, error: &str) -> BrokerResult<bool> {
        let Some(json) = self.store.hget(&self.keys.jobs(), job_id.as_str()).await? else {
            return Ok(false);
        };
        let mut job = Job::from_json(&json)?;

        if job.status.is_terminal() {
            return Ok(false);
        }
        if self
            .store
            .hdel(&self.keys.processing(), job_id.as_str())
            .await?
            == 0
        {
            debug!(job_id = %job_id, "Failure report for a job no longer leased");
            return Ok(false);
        }

        job.attempts += 1;
        job.last_error = Some(error.to_string());
        job.failed_at = Some(Utc::now());

        if !job.is_exhausted() {
            self.retry_job(job).await?;
            return Ok(true);
        }

        job.status = JobStatus::Failed;
        self.store
            .hset(&self.keys.jobs(), job_id.as_str(), &job.to_json()?)
            .await?;
        self.store
            .rpush(&self.keys.failed(), job_id.as_str())
            .await?;

        warn!(
            job_id = %job_id,
            queue = %self.config.name,
            attempts = job.attempts,
            error = %error,
            "Job failed permanently"
        );

        JobMetrics::job_failed(&self.config.name);
        self.emit(|s| s.on_job_failed(&job));

        Ok(false)
    }

    /// Schedules another attempt for a job that just failed.
    ///
    /// The caller has already removed the `processing` entry as its
    /// ownership check, so the job only has to reach the delayed set.
    async fn retry_job(&self, mut job: Job) -> BrokerResult<()> {
        let delay = self.retry_delay(job.attempts);
        let job_id = job.id.clone();

        job.status = JobStatus::Retrying;
        self.store
            .hset(&self.keys.jobs(), job_id.as_str(), &job.to_json()?)
            .await?;

        let execute_at = Self::now_ms() + delay.as_millis() as i64;
        self.store
            .zadd(&self.keys.delayed(), execute_at as f64, job_id.as_str())
            .await?;

        debug!(
            job_id = %job_id,
            queue = %self.config.name,
            attempts = job.attempts,
            delay_ms = delay.as_millis() as u64,
            "Scheduled retry"
        );

        JobMetrics::job_retried(&self.config.name, job.attempts);
        self.emit(|s| s.on_job_retry(&job, delay));

        Ok(())
    }

    /// Retry delay after `attempts` failures: `retry_delay × backoff^attempts`.
    fn retry_delay(&self, attempts: u32) -> Duration {
        let ms = self.config.retry_delay_ms as f64 * self.config.retry_backoff.powi(attempts as i32);
        Duration::from_millis(ms as u64)
    }

    /// Promotes delayed jobs whose due time has passed back to their
    /// runnable queue, in due-time order. Returns the number promoted.
    ///
    /// The record's `status` is not rewritten here; membership in the
    /// runnable queue is what makes the job dispatchable.
    pub async fn process_delayed(&self) -> BrokerResult<u64> {
        let now = Self::now_ms();
        let due = self
            .store
            .zrangebyscore(&self.keys.delayed(), f64::NEG_INFINITY, now as f64)
            .await?;

        let mut promoted = 0u64;

        for id in due {
            if self.store.zrem(&self.keys.delayed(), &id).await? == 0 {
                // Another maintenance pass promoted it first.
                continue;
            }

            let Some(json) = self.store.hget(&self.keys.jobs(), &id).await? else {
                debug!(job_id = %id, "Skipping delayed id with no job record");
                continue;
            };
            let job = Job::from_json(&json)?;

            if job.priority > 0 {
                self.store
                    .zadd(&self.keys.priority(), -f64::from(job.priority), &id)
                    .await?;
            } else {
                self.store.rpush(&self.keys.pending(), &id).await?;
            }

            promoted += 1;
        }

        if promoted > 0 {
            debug!(count = promoted, queue = %self.config.name, "Promoted delayed jobs");
        }

        Ok(promoted)
    }

    /// Fails every leased job whose lease has exceeded the job timeout.
    ///
    /// This is the crash-recovery path: a worker that died mid-job leaves
    /// its lease behind, and the sweep routes the job through the normal
    /// failure handling (retry while attempts remain). Returns the number
    /// of leases reclaimed.
    pub async fn check_stalled(&self) -> BrokerResult<u64> {
        let leases = self.store.hgetall(&self.keys.processing()).await?;
        let now = Self::now_ms();
        let limit_ms = self.config.job_timeout_ms;

        let mut recovered = 0u64;

        for (id, started) in leases {
            let Ok(started_ms) = started.parse::<i64>() else {
                warn!(job_id = %id, lease = %started, "Unparseable lease timestamp");
                continue;
            };
            let elapsed = now - started_ms;
            if elapsed <= limit_ms as i64 {
                continue;
            }

            let timeout = BrokerError::Timeout {
                elapsed_ms: elapsed.max(0) as u64,
                limit_ms,
            };
            self.fail_job(&JobId::from(id.as_str()), &timeout.to_string())
                .await?;
            recovered += 1;
        }

        if recovered > 0 {
            warn!(count = recovered, queue = %self.config.name, "Recovered stalled jobs");
            JobMetrics::jobs_recovered(&self.config.name, recovered);
            self.emit(|s| s.on_jobs_recovered(recovered));
        }

        Ok(recovered)
    }

    /// Loads a job record by id.
    pub async fn get_job(&self, job_id: &JobId) -> BrokerResult<Option<Job>> {
        let json = self.store.hget(&self.keys.jobs(), job_id.as_str()).await?;
        json.as_deref().map(Job::from_json).transpose()
    }

    /// Takes a statistics snapshot.
    ///
    /// Collection sizes are read live and are authoritative; only `total`
    /// comes from the counter hash, since no collection records jobs ever
    /// enqueued.
    pub async fn get_stats(&self) -> BrokerResult<QueueStats> {
        let pending = self.store.llen(&self.keys.pending()).await?
            + self.store.zcard(&self.keys.priority()).await?;
        let processing = self.store.hlen(&self.keys.processing()).await?;
        let delayed = self.store.zcard(&self.keys.delayed()).await?;
        let completed = self.store.llen(&self.keys.completed()).await?;
        let failed = self.store.llen(&self.keys.failed()).await?;
        let total = self
            .store
            .hget(&self.keys.stats(), "total")
            .await?
            .and_then(|v| v.parse::<u64>().ok())
            .unwrap_or(0);

        JobMetrics::update_queue_sizes(&self.config.name, pending, processing, delayed);

        Ok(QueueStats {
            total,
            pending,
            processing,
            delayed,
            completed,
            failed,
        })
    }

    /// Runs the maintenance loop: delayed promotion and the stalled sweep
    /// on the configured cadence, until [`close`](Self::close).
    pub async fn run_maintenance(&self) -> BrokerResult<()> {
        if self.maintenance_running.swap(true, Ordering::SeqCst) {
            return Err(BrokerError::Configuration(
                "maintenance loop already running".to_string(),
            ));
        }

        info!(
            queue = %self.config.name,
            cleanup_interval_ms = self.config.cleanup_interval_ms,
            "Starting maintenance loop"
        );

        let mut shutdown_rx = self.shutdown_tx.subscribe();
        let mut tick = interval(self.config.cleanup_interval());

        loop {
            tokio::select! {
                _ = shutdown_rx.recv() => {
                    break;
                }
                _ = tick.tick() => {
                    if let Err(e) = self.process_delayed().await {
                        error!(error = %e, "Failed to promote delayed jobs");
                    }
                    if let Err(e) = self.check_stalled().await {
                        error!(error = %e, "Stalled sweep failed");
                    }
                }
            }
        }

        self.maintenance_running.store(false, Ordering::SeqCst);
        info!(queue = %self.config.name, "Maintenance loop stopped");

        Ok(())
    }

    /// Spawns the maintenance loop on the current runtime.
    pub fn start_maintenance(self: Arc<Self>) {
        tokio::spawn(async move {
            if let Err(e) = self.run_maintenance().await {
                warn!(error = %e, "Maintenance loop did not start");
            }
        });
    }

    /// Stops the maintenance loop and releases the store connection.
    /// In-flight workers are not interrupted.
    pub fn close(&self) {
        let _ = self.shutdown_tx.send(());
        self.store.close();
    }
}
