//! Lifecycle event surface.
//!
//! Subscribers register at broker or worker construction and are invoked
//! synchronously, in registration order, on the task that triggered the
//! event. Implementations must not block.

use crate::error::BrokerError;
use crate::job::Job;
use std::time::Duration;

/// Observer for broker and worker lifecycle events.
///
/// Every method has a no-op default; implement only the events you care
/// about.
pub trait QueueSubscriber: Send + Sync {
    /// A job was enqueued.
    fn on_job_added(&self, _job: &Job) {}

    /// A worker began executing a job.
    fn on_job_started(&self, _job: &Job) {}

    /// A job finished successfully.
    fn on_job_completed(&self, _job: &Job) {}

    /// A job exhausted its attempts and failed permanently.
    fn on_job_failed(&self, _job: &Job) {}

    /// A failed job was scheduled for another attempt after `delay`.
    fn on_job_retry(&self, _job: &Job, _delay: Duration) {}

    /// The stalled sweep reclaimed `count` abandoned leases.
    fn on_jobs_recovered(&self, _count: u64) {}

    /// A broker call failed inside a worker loop.
    fn on_error(&self, _error: &BrokerError) {}

    /// A worker loop started.
    fn on_worker_started(&self, _worker_id: &str) {}

    /// A worker loop exited.
    fn on_worker_stopped(&self, _worker_id: &str) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    struct Counting(std::sync::atomic::AtomicU32);

    impl QueueSubscriber for Counting {
        fn on_job_added(&self, _job: &Job) {
            self.0.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        }
    }

    #[test]
    fn test_default_methods_are_no_ops() {
        let subscriber = Counting(std::sync::atomic::AtomicU32::new(0));
        let job = Job::new(json!({}), &crate::job::JobOptions::new(), 3);

        subscriber.on_job_added(&job);
        subscriber.on_job_started(&job);
        subscriber.on_jobs_recovered(2);
        subscriber.on_worker_started("w1");

        assert_eq!(subscriber.0.load(std::sync::atomic::Ordering::SeqCst), 1);
    }
}
