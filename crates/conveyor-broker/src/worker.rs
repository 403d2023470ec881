//! Worker loop for processing jobs.

use crate::broker::QueueBroker;
use crate::config::WorkerConfig;
use crate::error::{BrokerError, BrokerResult};
use crate::events::QueueSubscriber;
use crate::job::JobId;
use async_trait::async_trait;
use futures::future::BoxFuture;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};
use uuid::Uuid;

/// User-supplied job processor.
///
/// Receives the opaque payload and produces a result value or an error.
/// The broker stores the result on success and the error message on
/// failure; a processor is never interrupted once invoked.
#[async_trait]
pub trait Processor: Send + Sync {
    /// Execute one job.
    async fn process(&self, data: &serde_json::Value) -> BrokerResult<serde_json::Value>;
}

/// Closure adapter for [`Processor`].
pub struct ProcessorFn {
    f: Box<
        dyn Fn(serde_json::Value) -> BoxFuture<'static, BrokerResult<serde_json::Value>>
            + Send
            + Sync,
    >,
}

impl ProcessorFn {
    /// Wraps a closure returning a boxed future.
    pub fn new(
        f: impl Fn(serde_json::Value) -> BoxFuture<'static, BrokerResult<serde_json::Value>>
            + Send
            + Sync
            + 'static,
    ) -> Self {
        Self { f: Box::new(f) }
    }
}

#[async_trait]
impl Processor for ProcessorFn {
    async fn process(&self, data: &serde_json::Value) -> BrokerResult<serde_json::Value> {
        (self.f)(data.clone()).await
    }
}

/// A single-threaded processing loop bound to a broker and a processor.
///
/// Executes one job at a time; scale by instantiating more workers,
/// in-process or across processes sharing the store namespace. The only
/// coordination between workers is the broker's atomic dequeue.
pub struct Worker {
    id: String,
    broker: Arc<QueueBroker>,
    processor: Arc<dyn Processor>,
    config: WorkerConfig,
    subscribers: Vec<Arc<dyn QueueSubscriber>>,
    running: Arc<AtomicBool>,
    stop_requested: Arc<AtomicBool>,
    current_job: Arc<Mutex<Option<JobId>>>,
    jobs_processed: AtomicU64,
    jobs_failed: AtomicU64,
}

impl Worker {
    /// Creates a worker with the given id.
    pub fn new(
        id: impl Into<String>,
        broker: Arc<QueueBroker>,
        processor: Arc<dyn Processor>,
        config: WorkerConfig,
    ) -> Self {
        Self {
            id: id.into(),
            broker,
            processor,
            config,
            subscribers: Vec::new(),
            running: Arc::new(AtomicBool::new(false)),
            stop_requested: Arc::new(AtomicBool::new(false)),
            current_job: Arc::new(Mutex::new(None)),
            jobs_processed: AtomicU64::new(0),
            jobs_failed: AtomicU64::new(0),
        }
    }

    /// Registers a lifecycle subscriber. Call before starting the loop.
    pub fn subscribe(&mut self, subscriber: Arc<dyn QueueSubscriber>) {
        self.subscribers.push(subscriber);
    }

    /// Returns the worker id.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Returns true while the loop is executing.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Returns the id of the job currently being processed, if any.
    pub fn current_job(&self) -> Option<JobId> {
        self.current_job.lock().clone()
    }

    /// Number of jobs this worker completed.
    pub fn jobs_processed(&self) -> u64 {
        self.jobs_processed.load(Ordering::Relaxed)
    }

    /// Number of jobs this worker reported as failed.
    pub fn jobs_failed(&self) -> u64 {
        self.jobs_failed.load(Ordering::Relaxed)
    }

    /// Requests a stop. The worker finishes its current job (if any) and
    /// exits at the next loop check; the in-flight processor call is
    /// never cancelled.
    pub fn stop(&self) {
        self.stop_requested.store(true, Ordering::SeqCst);
    }

    fn emit<F: Fn(&dyn QueueSubscriber)>(&self, f: F) {
        for subscriber in &self.subscribers {
            f(subscriber.as_ref());
        }
    }

    /// Runs the poll/execute/report loop until [`stop`](Self::stop).
    ///
    /// Broker errors are caught, emitted as `error` events, and followed
    /// by an idle sleep; the loop never dies on a transient store error.
    pub async fn run(&self) -> BrokerResult<()> {
        if self.running.swap(true, Ordering::SeqCst) {
            return Err(BrokerError::Worker(format!(
                "worker {} already running",
                self.id
            )));
        }
        self.stop_requested.store(false, Ordering::SeqCst);

        info!(worker_id = %self.id, "Worker started");
        self.emit(|s| s.on_worker_started(&self.id));

        while !self.stop_requested.load(Ordering::SeqCst) {
            match self.broker.get_next_job().await {
                Ok(Some(job)) => {
                    *self.current_job.lock() = Some(job.id.clone());
                    debug!(worker_id = %self.id, job_id = %job.id, "Processing job");
                    self.emit(|s| s.on_job_started(&job));

                    let outcome = self.processor.process(&job.data).await;

                    let report = match outcome {
                        Ok(result) => {
                            self.jobs_processed.fetch_add(1, Ordering::Relaxed);
                            self.broker.complete_job(&job.id, result).await.map(|_| ())
                        }
                        Err(e) => {
                            self.jobs_failed.fetch_add(1, Ordering::Relaxed);
                            self.broker.fail_job(&job.id, &e.to_string()).await.map(|_| ())
                        }
                    };

                    *self.current_job.lock() = None;

                    if let Err(e) = report {
                        error!(worker_id = %self.id, job_id = %job.id, error = %e, "Failed to report job outcome");
                        self.emit(|s| s.on_error(&e));
                        tokio::time::sleep(self.config.poll_interval()).await;
                    }
                }
                Ok(None) => {
                    tokio::time::sleep(self.config.poll_interval()).await;
                }
                Err(e) => {
                    error!(worker_id = %self.id, error = %e, "Failed to poll for a job");
                    self.emit(|s| s.on_error(&e));
                    tokio::time::sleep(self.config.poll_interval()).await;
                }
            }
        }

        self.running.store(false, Ordering::SeqCst);

        info!(worker_id = %self.id, "Worker stopped");
        self.emit(|s| s.on_worker_stopped(&self.id));

        Ok(())
    }

    /// Spawns the loop on the current runtime.
    pub fn spawn(self: Arc<Self>) -> JoinHandle<BrokerResult<()>> {
        tokio::spawn(async move { self.run().await })
    }
}

/// Convenience pool that runs N workers against one broker.
///
/// The pool size defaults to the broker's `max_concurrency`, which is an
/// advisory bound; nothing stops further workers from being attached to
/// the same queue elsewhere.
pub struct WorkerPool {
    workers: Vec<Arc<Worker>>,
    handles: Mutex<Vec<JoinHandle<BrokerResult<()>>>>,
}

impl WorkerPool {
    /// Creates a pool of `size` workers sharing one processor.
    pub fn new(
        broker: Arc<QueueBroker>,
        processor: Arc<dyn Processor>,
        config: WorkerConfig,
        size: usize,
    ) -> Self {
        let workers = (0..size)
            .map(|_| {
                Arc::new(Worker::new(
                    format!("worker-{}", Uuid::new_v4()),
                    Arc::clone(&broker),
                    Arc::clone(&processor),
                    config.clone(),
                ))
            })
            .collect();

        Self {
            workers,
            handles: Mutex::new(Vec::new()),
        }
    }

    /// Creates a pool sized by the broker's `max_concurrency`.
    pub fn with_default_size(
        broker: Arc<QueueBroker>,
        processor: Arc<dyn Processor>,
        config: WorkerConfig,
    ) -> Self {
        let size = broker.config().max_concurrency;
        Self::new(broker, processor, config, size)
    }

    /// Spawns every worker loop.
    pub fn start(&self) {
        let mut handles = self.handles.lock();
        for worker in &self.workers {
            handles.push(Arc::clone(worker).spawn());
        }
        info!(workers = self.workers.len(), "Worker pool started");
    }

    /// Requests a stop on every worker and waits for the loops to exit.
    pub async fn stop(&self) {
        for worker in &self.workers {
            worker.stop();
        }
        let handles: Vec<_> = self.handles.lock().drain(..).collect();
        for handle in handles {
            let _ = handle.await;
        }
        info!(workers = self.workers.len(), "Worker pool stopped");
    }

    /// The workers in this pool.
    pub fn workers(&self) -> &[Arc<Worker>] {
        &self.workers
    }

    /// Total jobs completed across the pool.
    pub fn jobs_processed(&self) -> u64 {
        self.workers.iter().map(|w| w.jobs_processed()).sum()
    }

    /// Total jobs reported failed across the pool.
    pub fn jobs_failed(&self) -> u64 {
        self.workers.iter().map(|w| w.jobs_failed()).sum()
    }
}
