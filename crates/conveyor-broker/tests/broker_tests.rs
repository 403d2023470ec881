//! End-to-end broker and worker tests over the in-memory store.

use conveyor_broker::{
    BrokerConfig, BrokerError, Job, JobId, JobOptions, MemoryStore, Processor, ProcessorFn,
    QueueBroker, QueueSubscriber, Worker, WorkerConfig,
};
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

/// Subscriber that records every event it sees.
#[derive(Default)]
struct Recorder {
    added: Mutex<Vec<JobId>>,
    started: Mutex<Vec<JobId>>,
    completed: Mutex<Vec<Job>>,
    failed: Mutex<Vec<Job>>,
    retries: Mutex<Vec<(JobId, u64)>>,
    recovered: Mutex<Vec<u64>>,
    errors: Mutex<Vec<String>>,
    worker_started: Mutex<Vec<String>>,
    worker_stopped: Mutex<Vec<String>>,
}

impl Recorder {
    fn completed_count(&self) -> usize {
        self.completed.lock().len()
    }

    fn failed_count(&self) -> usize {
        self.failed.lock().len()
    }

    fn retry_delays(&self) -> Vec<u64> {
        self.retries.lock().iter().map(|(_, d)| *d).collect()
    }
}

impl QueueSubscriber for Recorder {
    fn on_job_added(&self, job: &Job) {
        self.added.lock().push(job.id.clone());
    }

    fn on_job_started(&self, job: &Job) {
        self.started.lock().push(job.id.clone());
    }

    fn on_job_completed(&self, job: &Job) {
        self.completed.lock().push(job.clone());
    }

    fn on_job_failed(&self, job: &Job) {
        self.failed.lock().push(job.clone());
    }

    fn on_job_retry(&self, job: &Job, delay: Duration) {
        self.retries
            .lock()
            .push((job.id.clone(), delay.as_millis() as u64));
    }

    fn on_jobs_recovered(&self, count: u64) {
        self.recovered.lock().push(count);
    }

    fn on_error(&self, error: &BrokerError) {
        self.errors.lock().push(error.to_string());
    }

    fn on_worker_started(&self, worker_id: &str) {
        self.worker_started.lock().push(worker_id.to_string());
    }

    fn on_worker_stopped(&self, worker_id: &str) {
        self.worker_stopped.lock().push(worker_id.to_string());
    }
}

fn make_broker(config: BrokerConfig, recorder: &Arc<Recorder>) -> Arc<QueueBroker> {
    let mut broker = QueueBroker::new(Arc::new(MemoryStore::new()), config).unwrap();
    broker.subscribe(Arc::clone(recorder) as Arc<dyn QueueSubscriber>);
    Arc::new(broker)
}

fn fast_worker_config() -> WorkerConfig {
    WorkerConfig {
        poll_interval_ms: 5,
    }
}

fn echo_processor(result: Value) -> Arc<dyn Processor> {
    Arc::new(ProcessorFn::new(move |_| {
        let result = result.clone();
        Box::pin(async move { Ok(result) })
    }))
}

/// Processor that fails its first `failures` invocations, then succeeds.
struct FlakyProcessor {
    failures: u32,
    calls: AtomicU32,
    result: Value,
}

#[async_trait::async_trait]
impl Processor for FlakyProcessor {
    async fn process(&self, _data: &Value) -> Result<Value, BrokerError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        if call < self.failures {
            Err(BrokerError::Processor("boom".to_string()))
        } else {
            Ok(self.result.clone())
        }
    }
}

async fn wait_for(mut cond: impl FnMut() -> bool, timeout: Duration) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if cond() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    cond()
}

#[tokio::test]
async fn basic_job_completes_through_a_worker() {
    let recorder = Arc::new(Recorder::default());
    let broker = make_broker(BrokerConfig::default(), &recorder);

    let job_id = broker
        .add_job(json!({"task": "x"}), JobOptions::new())
        .await
        .unwrap();

    let worker = Arc::new(Worker::new(
        "worker-1",
        Arc::clone(&broker),
        echo_processor(json!({"ok": 1})),
        fast_worker_config(),
    ));
    let handle = Arc::clone(&worker).spawn();

    assert!(wait_for(|| recorder.completed_count() == 1, Duration::from_secs(2)).await);

    worker.stop();
    handle.await.unwrap().unwrap();

    let job = broker.get_job(&job_id).await.unwrap().unwrap();
    assert_eq!(job.status, conveyor_broker::JobStatus::Completed);
    assert_eq!(job.result, Some(json!({"ok": 1})));
    assert_eq!(job.attempts, 0);
    assert!(job.completed_at.is_some());

    let stats = broker.get_stats().await.unwrap();
    assert_eq!(stats.total, 1);
    assert_eq!(stats.completed, 1);
    assert_eq!(stats.pending, 0);
    assert_eq!(stats.processing, 0);
}

#[tokio::test]
async fn priority_jobs_dispatch_before_pending() {
    let recorder = Arc::new(Recorder::default());
    let broker = make_broker(BrokerConfig::default(), &recorder);

    broker
        .add_job(json!({"n": 1}), JobOptions::new().job_id("j1"))
        .await
        .unwrap();
    broker
        .add_job(json!({"n": 2}), JobOptions::new().job_id("j2").priority(10))
        .await
        .unwrap();
    broker
        .add_job(json!({"n": 3}), JobOptions::new().job_id("j3").priority(5))
        .await
        .unwrap();

    let order: Vec<String> = [
        broker.get_next_job().await.unwrap().unwrap(),
        broker.get_next_job().await.unwrap().unwrap(),
        broker.get_next_job().await.unwrap().unwrap(),
    ]
    .iter()
    .map(|j| j.id.to_string())
    .collect();

    assert_eq!(order, vec!["j2", "j3", "j1"]);
    assert!(broker.get_next_job().await.unwrap().is_none());
}

#[tokio::test]
async fn priority_band_is_fifo() {
    let recorder = Arc::new(Recorder::default());
    let broker = make_broker(BrokerConfig::default(), &recorder);

    for n in 0..3 {
        broker
            .add_job(
                json!({"n": n}),
                JobOptions::new().job_id(format!("p{n}")).priority(7),
            )
            .await
            .unwrap();
    }

    for n in 0..3 {
        let job = broker.get_next_job().await.unwrap().unwrap();
        assert_eq!(job.id.to_string(), format!("p{n}"));
    }
}

#[tokio::test]
async fn failing_job_retries_with_backoff_then_completes() {
    let recorder = Arc::new(Recorder::default());
    let config = BrokerConfig {
        max_retries: 3,
        retry_delay_ms: 40,
        retry_backoff: 2.0,
        cleanup_interval_ms: 10,
        ..BrokerConfig::default()
    };
    let broker = make_broker(config, &recorder);
    Arc::clone(&broker).start_maintenance();

    let job_id = broker
        .add_job(json!({"task": "flaky"}), JobOptions::new())
        .await
        .unwrap();

    let processor = Arc::new(FlakyProcessor {
        failures: 2,
        calls: AtomicU32::new(0),
        result: json!({"done": true}),
    });
    let worker = Arc::new(Worker::new(
        "worker-1",
        Arc::clone(&broker),
        processor,
        fast_worker_config(),
    ));
    let handle = Arc::clone(&worker).spawn();

    assert!(wait_for(|| recorder.completed_count() == 1, Duration::from_secs(5)).await);

    worker.stop();
    handle.await.unwrap().unwrap();
    broker.close();

    let job = broker.get_job(&job_id).await.unwrap().unwrap();
    assert_eq!(job.status, conveyor_broker::JobStatus::Completed);
    assert_eq!(job.attempts, 2);
    assert_eq!(job.result, Some(json!({"done": true})));

    // delay = retry_delay × backoff^attempts with post-increment attempts.
    assert_eq!(recorder.retry_delays(), vec![80, 160]);
}

#[tokio::test]
async fn exhausted_retries_fail_permanently() {
    let recorder = Arc::new(Recorder::default());
    let config = BrokerConfig {
        max_retries: 2,
        retry_delay_ms: 10,
        retry_backoff: 1.0,
        cleanup_interval_ms: 10,
        ..BrokerConfig::default()
    };
    let broker = make_broker(config, &recorder);
    Arc::clone(&broker).start_maintenance();

    let job_id = broker
        .add_job(json!({"task": "doomed"}), JobOptions::new())
        .await
        .unwrap();

    let processor = Arc::new(FlakyProcessor {
        failures: u32::MAX,
        calls: AtomicU32::new(0),
        result: json!(null),
    });
    let worker = Arc::new(Worker::new(
        "worker-1",
        Arc::clone(&broker),
        processor,
        fast_worker_config(),
    ));
    let handle = Arc::clone(&worker).spawn();

    assert!(wait_for(|| recorder.failed_count() == 1, Duration::from_secs(5)).await);

    worker.stop();
    handle.await.unwrap().unwrap();
    broker.close();

    let job = broker.get_job(&job_id).await.unwrap().unwrap();
    assert_eq!(job.status, conveyor_broker::JobStatus::Failed);
    assert_eq!(job.attempts, 2);
    assert_eq!(job.last_error.as_deref(), Some("processor error: boom"));
    assert!(job.failed_at.is_some());

    let stats = broker.get_stats().await.unwrap();
    assert_eq!(stats.failed, 1);
    assert_eq!(stats.processing, 0);
    assert_eq!(stats.pending, 0);
}

#[tokio::test]
async fn stalled_job_is_reclaimed_and_redelivered() {
    let recorder = Arc::new(Recorder::default());
    let config = BrokerConfig {
        job_timeout_ms: 50,
        retry_delay_ms: 10,
        retry_backoff: 1.0,
        ..BrokerConfig::default()
    };
    let broker = make_broker(config, &recorder);

    let job_id = broker
        .add_job(json!({"task": "abandoned"}), JobOptions::new())
        .await
        .unwrap();

    // A worker dequeues the job and then dies without reporting.
    let leased = broker.get_next_job().await.unwrap().unwrap();
    assert_eq!(leased.id, job_id);

    tokio::time::sleep(Duration::from_millis(70)).await;
    assert_eq!(broker.check_stalled().await.unwrap(), 1);
    assert_eq!(*recorder.recovered.lock(), vec![1]);

    let job = broker.get_job(&job_id).await.unwrap().unwrap();
    assert_eq!(job.attempts, 1);
    assert!(job.last_error.as_deref().unwrap().contains("timed out"));

    // The retry sits in the delayed set until promoted.
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(broker.process_delayed().await.unwrap(), 1);

    let redelivered = broker.get_next_job().await.unwrap().unwrap();
    assert_eq!(redelivered.id, job_id);
    assert_eq!(redelivered.attempts, 1);
}

#[tokio::test]
async fn late_report_from_a_dead_worker_is_benign() {
    let recorder = Arc::new(Recorder::default());
    let config = BrokerConfig {
        job_timeout_ms: 30,
        retry_delay_ms: 10,
        retry_backoff: 1.0,
        ..BrokerConfig::default()
    };
    let broker = make_broker(config, &recorder);

    let job_id = broker
        .add_job(json!({"task": "slow"}), JobOptions::new())
        .await
        .unwrap();
    broker.get_next_job().await.unwrap().unwrap();

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(broker.check_stalled().await.unwrap(), 1);

    // The original worker resurfaces and reports; the lease is gone.
    assert!(!broker.complete_job(&job_id, json!({"ok": 1})).await.unwrap());
    assert!(!broker.fail_job(&job_id, "late failure").await.unwrap());

    // The retry still goes through normally.
    tokio::time::sleep(Duration::from_millis(20)).await;
    broker.process_delayed().await.unwrap();
    let job = broker.get_next_job().await.unwrap().unwrap();
    assert!(broker.complete_job(&job.id, json!({"ok": 2})).await.unwrap());
}

#[tokio::test]
async fn delayed_job_is_invisible_until_promoted() {
    let recorder = Arc::new(Recorder::default());
    let broker = make_broker(BrokerConfig::default(), &recorder);

    let job_id = broker
        .add_job(
            json!({"task": "later"}),
            JobOptions::new().delay(Duration::from_millis(80)),
        )
        .await
        .unwrap();

    assert!(broker.get_next_job().await.unwrap().is_none());
    assert_eq!(broker.process_delayed().await.unwrap(), 0);
    assert_eq!(broker.get_stats().await.unwrap().delayed, 1);

    tokio::time::sleep(Duration::from_millis(100)).await;

    // Due but not yet promoted: still not dispatchable.
    assert!(broker.get_next_job().await.unwrap().is_none());

    assert_eq!(broker.process_delayed().await.unwrap(), 1);
    let job = broker.get_next_job().await.unwrap().unwrap();
    assert_eq!(job.id, job_id);
}

#[tokio::test]
async fn delayed_job_keeps_its_priority_on_promotion() {
    let recorder = Arc::new(Recorder::default());
    let broker = make_broker(BrokerConfig::default(), &recorder);

    broker
        .add_job(
            json!({"n": 1}),
            JobOptions::new()
                .job_id("urgent")
                .priority(9)
                .delay(Duration::from_millis(20)),
        )
        .await
        .unwrap();
    broker
        .add_job(json!({"n": 2}), JobOptions::new().job_id("plain"))
        .await
        .unwrap();

    tokio::time::sleep(Duration::from_millis(40)).await;
    assert_eq!(broker.process_delayed().await.unwrap(), 1);

    // The promoted job lands in the priority set and wins the next poll.
    let job = broker.get_next_job().await.unwrap().unwrap();
    assert_eq!(job.id.to_string(), "urgent");
}

#[tokio::test]
async fn terminal_transitions_are_idempotent() {
    let recorder = Arc::new(Recorder::default());
    let broker = make_broker(BrokerConfig::default(), &recorder);

    let job_id = broker
        .add_job(json!({"task": "once"}), JobOptions::new())
        .await
        .unwrap();
    broker.get_next_job().await.unwrap().unwrap();

    assert!(broker.complete_job(&job_id, json!({"ok": 1})).await.unwrap());
    assert!(!broker.complete_job(&job_id, json!({"ok": 2})).await.unwrap());
    assert!(!broker.fail_job(&job_id, "too late").await.unwrap());

    let job = broker.get_job(&job_id).await.unwrap().unwrap();
    assert_eq!(job.result, Some(json!({"ok": 1})));
    assert_eq!(job.attempts, 0);

    let stats = broker.get_stats().await.unwrap();
    assert_eq!(stats.completed, 1);
    assert_eq!(stats.failed, 0);
}

#[tokio::test]
async fn unknown_ids_report_false() {
    let recorder = Arc::new(Recorder::default());
    let broker = make_broker(BrokerConfig::default(), &recorder);

    let ghost = JobId::from("no-such-job");
    assert!(!broker.complete_job(&ghost, json!(null)).await.unwrap());
    assert!(!broker.fail_job(&ghost, "nope").await.unwrap());
    assert!(broker.get_job(&ghost).await.unwrap().is_none());
}

#[tokio::test]
async fn every_job_lives_in_exactly_one_collection() {
    let recorder = Arc::new(Recorder::default());
    let config = BrokerConfig {
        retry_delay_ms: 10_000,
        ..BrokerConfig::default()
    };
    let broker = make_broker(config, &recorder);

    // One pending, one priority, one delayed, one leased, one retrying.
    broker
        .add_job(json!({"n": 1}), JobOptions::new().job_id("plain"))
        .await
        .unwrap();
    broker
        .add_job(json!({"n": 2}), JobOptions::new().job_id("urgent").priority(3))
        .await
        .unwrap();
    broker
        .add_job(
            json!({"n": 3}),
            JobOptions::new().job_id("later").delay(Duration::from_secs(60)),
        )
        .await
        .unwrap();
    broker
        .add_job(json!({"n": 4}), JobOptions::new().job_id("leased").priority(99))
        .await
        .unwrap();
    broker
        .add_job(json!({"n": 5}), JobOptions::new().job_id("shaky").priority(98))
        .await
        .unwrap();

    let leased = broker.get_next_job().await.unwrap().unwrap();
    assert_eq!(leased.id.to_string(), "leased");
    let shaky = broker.get_next_job().await.unwrap().unwrap();
    assert_eq!(shaky.id.to_string(), "shaky");
    assert!(broker.fail_job(&shaky.id, "first failure").await.unwrap());

    let stats = broker.get_stats().await.unwrap();
    assert_eq!(stats.total, 5);
    assert_eq!(stats.pending, 2); // plain + urgent
    assert_eq!(stats.processing, 1); // leased
    assert_eq!(stats.delayed, 2); // later + shaky's retry
    assert_eq!(stats.completed, 0);
    assert_eq!(stats.failed, 0);
    assert_eq!(
        stats.pending + stats.processing + stats.delayed,
        stats.total
    );
}

#[tokio::test]
async fn retry_attempts_increase_monotonically() {
    let recorder = Arc::new(Recorder::default());
    let config = BrokerConfig {
        max_retries: 4,
        retry_delay_ms: 10,
        retry_backoff: 1.0,
        ..BrokerConfig::default()
    };
    let broker = make_broker(config, &recorder);

    let job_id = broker
        .add_job(json!({"task": "flaky"}), JobOptions::new())
        .await
        .unwrap();

    for expected_attempts in 1..=3u32 {
        let job = broker.get_next_job().await.unwrap().unwrap();
        assert_eq!(job.attempts, expected_attempts - 1);
        assert!(broker.fail_job(&job.id, "boom").await.unwrap());

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(broker.process_delayed().await.unwrap(), 1);

        let job = broker.get_job(&job_id).await.unwrap().unwrap();
        assert_eq!(job.attempts, expected_attempts);
    }
}

#[tokio::test]
async fn maintenance_loop_promotes_and_recovers_on_its_own() {
    let recorder = Arc::new(Recorder::default());
    let config = BrokerConfig {
        cleanup_interval_ms: 15,
        job_timeout_ms: 40,
        retry_delay_ms: 10,
        retry_backoff: 1.0,
        ..BrokerConfig::default()
    };
    let broker = make_broker(config, &recorder);
    Arc::clone(&broker).start_maintenance();

    let job_id = broker
        .add_job(json!({"task": "abandoned"}), JobOptions::new())
        .await
        .unwrap();

    // Lease the job and never report.
    broker.get_next_job().await.unwrap().unwrap();

    // The loop must reclaim the lease and promote the retry unprompted.
    let redelivered = wait_for(
        || !recorder.recovered.lock().is_empty(),
        Duration::from_secs(2),
    )
    .await;
    assert!(redelivered);

    let deadline = Instant::now() + Duration::from_secs(2);
    loop {
        if broker.get_stats().await.unwrap().pending == 1 {
            break;
        }
        assert!(Instant::now() < deadline, "retry was never promoted");
        tokio::time::sleep(Duration::from_millis(5)).await;
    }

    broker.close();

    let job = broker.get_job(&job_id).await.unwrap().unwrap();
    assert_eq!(job.attempts, 1);
}

#[tokio::test]
async fn worker_pool_drains_a_burst() {
    let recorder = Arc::new(Recorder::default());
    let broker = make_broker(BrokerConfig::default(), &recorder);

    for n in 0..20 {
        broker
            .add_job(json!({"n": n}), JobOptions::new())
            .await
            .unwrap();
    }

    let pool = conveyor_broker::WorkerPool::new(
        Arc::clone(&broker),
        echo_processor(json!({"ok": true})),
        fast_worker_config(),
        4,
    );
    pool.start();

    assert!(wait_for(|| recorder.completed_count() == 20, Duration::from_secs(5)).await);

    pool.stop().await;
    assert_eq!(pool.jobs_processed(), 20);
    assert_eq!(pool.jobs_failed(), 0);

    let stats = broker.get_stats().await.unwrap();
    assert_eq!(stats.completed, 20);
    assert_eq!(stats.pending, 0);
    assert_eq!(stats.processing, 0);
}

#[tokio::test]
async fn worker_emits_lifecycle_events() {
    let recorder = Arc::new(Recorder::default());
    let broker = make_broker(BrokerConfig::default(), &recorder);

    let worker_recorder = Arc::new(Recorder::default());
    let mut worker = Worker::new(
        "observable",
        Arc::clone(&broker),
        echo_processor(json!(null)),
        fast_worker_config(),
    );
    worker.subscribe(Arc::clone(&worker_recorder) as Arc<dyn QueueSubscriber>);
    let worker = Arc::new(worker);

    broker
        .add_job(json!({"task": "observe"}), JobOptions::new())
        .await
        .unwrap();

    let handle = Arc::clone(&worker).spawn();
    assert!(wait_for(|| recorder.completed_count() == 1, Duration::from_secs(2)).await);
    worker.stop();
    handle.await.unwrap().unwrap();

    assert_eq!(*worker_recorder.worker_started.lock(), vec!["observable"]);
    assert_eq!(*worker_recorder.worker_stopped.lock(), vec!["observable"]);
    assert_eq!(worker_recorder.started.lock().len(), 1);
    assert!(worker.current_job().is_none());
}

#[tokio::test]
async fn rejects_invalid_enqueue_options() {
    let recorder = Arc::new(Recorder::default());
    let broker = make_broker(BrokerConfig::default(), &recorder);

    let result = broker
        .add_job(json!({}), JobOptions::new().max_retries(0))
        .await;
    assert!(matches!(result, Err(BrokerError::InvalidArgument(_))));
    assert!(recorder.added.lock().is_empty());
}
