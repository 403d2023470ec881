//! Metrics for queue monitoring.
//!
//! Recorded through the `metrics` facade; installing an exporter is the
//! embedding application's concern.

use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use std::time::Duration;

/// Metric names for the broker.
pub mod names {
    /// Total jobs enqueued.
    pub const JOBS_ENQUEUED_TOTAL: &str = "conveyor_jobs_enqueued_total";
    /// Total jobs dequeued for processing.
    pub const JOBS_DEQUEUED_TOTAL: &str = "conveyor_jobs_dequeued_total";
    /// Total jobs completed successfully.
    pub const JOBS_COMPLETED_TOTAL: &str = "conveyor_jobs_completed_total";
    /// Total jobs permanently failed.
    pub const JOBS_FAILED_TOTAL: &str = "conveyor_jobs_failed_total";
    /// Total retry attempts scheduled.
    pub const JOBS_RETRIED_TOTAL: &str = "conveyor_jobs_retried_total";
    /// Total stalled leases reclaimed.
    pub const JOBS_RECOVERED_TOTAL: &str = "conveyor_jobs_recovered_total";

    /// Current runnable jobs (pending list + priority set).
    pub const JOBS_PENDING: &str = "conveyor_jobs_pending";
    /// Current leased jobs.
    pub const JOBS_PROCESSING: &str = "conveyor_jobs_processing";
    /// Current delayed jobs.
    pub const JOBS_DELAYED: &str = "conveyor_jobs_delayed";

    /// Time from enqueue to completion, in seconds.
    pub const JOB_DURATION_SECONDS: &str = "conveyor_job_duration_seconds";
}

/// Register all metric descriptions.
pub fn register_metrics() {
    describe_counter!(names::JOBS_ENQUEUED_TOTAL, "Total number of jobs enqueued");
    describe_counter!(
        names::JOBS_DEQUEUED_TOTAL,
        "Total number of jobs dequeued for processing"
    );
    describe_counter!(
        names::JOBS_COMPLETED_TOTAL,
        "Total number of jobs completed successfully"
    );
    describe_counter!(
        names::JOBS_FAILED_TOTAL,
        "Total number of jobs that failed permanently"
    );
    describe_counter!(names::JOBS_RETRIED_TOTAL, "Total number of job retries");
    describe_counter!(
        names::JOBS_RECOVERED_TOTAL,
        "Total number of stalled leases reclaimed"
    );

    describe_gauge!(names::JOBS_PENDING, "Current number of runnable jobs");
    describe_gauge!(names::JOBS_PROCESSING, "Current number of leased jobs");
    describe_gauge!(names::JOBS_DELAYED, "Current number of delayed jobs");

    describe_histogram!(
        names::JOB_DURATION_SECONDS,
        "Time from enqueue to completion in seconds"
    );
}

/// Job metrics recorder.
#[derive(Clone)]
pub struct JobMetrics;

impl JobMetrics {
    /// Record a job enqueued.
    pub fn job_enqueued(queue: &str) {
        counter!(names::JOBS_ENQUEUED_TOTAL, "queue" => queue.to_string()).increment(1);
    }

    /// Record a job dequeued.
    pub fn job_dequeued(queue: &str) {
        counter!(names::JOBS_DEQUEUED_TOTAL, "queue" => queue.to_string()).increment(1);
    }

    /// Record a job completed.
    pub fn job_completed(queue: &str, duration: Duration) {
        counter!(names::JOBS_COMPLETED_TOTAL, "queue" => queue.to_string()).increment(1);
        histogram!(names::JOB_DURATION_SECONDS, "queue" => queue.to_string())
            .record(duration.as_secs_f64());
    }

    /// Record a job permanently failed.
    pub fn job_failed(queue: &str) {
        counter!(names::JOBS_FAILED_TOTAL, "queue" => queue.to_string()).increment(1);
    }

    /// Record a retry scheduled.
    pub fn job_retried(queue: &str, attempt: u32) {
        counter!(
            names::JOBS_RETRIED_TOTAL,
            "queue" => queue.to_string(),
            "attempt" => attempt.to_string()
        )
        .increment(1);
    }

    /// Record stalled leases reclaimed.
    pub fn jobs_recovered(queue: &str, count: u64) {
        counter!(names::JOBS_RECOVERED_TOTAL, "queue" => queue.to_string()).increment(count);
    }

    /// Update queue depth gauges.
    pub fn update_queue_sizes(queue: &str, pending: u64, processing: u64, delayed: u64) {
        gauge!(names::JOBS_PENDING, "queue" => queue.to_string()).set(pending as f64);
        gauge!(names::JOBS_PROCESSING, "queue" => queue.to_string()).set(processing as f64);
        gauge!(names::JOBS_DELAYED, "queue" => queue.to_string()).set(delayed as f64);
    }
}
