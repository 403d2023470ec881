//! Job records, status, enqueue options, and the wire codec.

use crate::error::{BrokerError, BrokerResult};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use uuid::Uuid;

/// Unique job identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct JobId(String);

impl JobId {
    /// Creates a new time-prefixed random job ID.
    pub fn new() -> Self {
        Self(Uuid::now_v7().to_string())
    }

    /// Returns the job ID as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for JobId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for JobId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Job lifecycle status.
///
/// The stored status is advisory for jobs sitting in a runnable queue:
/// `process_delayed` moves retrying jobs back to `pending`/`priority`
/// without rewriting the record, so collection membership is the source
/// of truth until the next dequeue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// Waiting in a runnable queue or the delayed set.
    Pending,
    /// Failed at least once and waiting for its retry delay to elapse.
    Retrying,
    /// Leased by a worker.
    Processing,
    /// Finished successfully. Terminal.
    Completed,
    /// Exhausted its attempts. Terminal.
    Failed,
}

impl JobStatus {
    /// Returns true for terminal states.
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }
}

impl Default for JobStatus {
    fn default() -> Self {
        JobStatus::Pending
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JobStatus::Pending => write!(f, "pending"),
            JobStatus::Retrying => write!(f, "retrying"),
            JobStatus::Processing => write!(f, "processing"),
            JobStatus::Completed => write!(f, "completed"),
            JobStatus::Failed => write!(f, "failed"),
        }
    }
}

/// The canonical job record persisted in the backing store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    /// Job ID.
    pub id: JobId,

    /// Opaque payload. Never inspected by the broker.
    pub data: serde_json::Value,

    /// Priority. 0 = normal; higher = more urgent.
    pub priority: u32,

    /// Number of failed attempts so far.
    pub attempts: u32,

    /// Upper bound on `attempts` before permanent failure.
    pub max_retries: u32,

    /// Current status.
    pub status: JobStatus,

    /// Enqueue timestamp.
    pub created_at: DateTime<Utc>,

    /// Set on success.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,

    /// Set on each failure, overwritten.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failed_at: Option<DateTime<Utc>>,

    /// Error message from the last failed attempt.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,

    /// Processor return value on success.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
}

impl Job {
    /// Creates a new pending job record.
    pub fn new(data: serde_json::Value, options: &JobOptions, default_max_retries: u32) -> Self {
        Self {
            id: options
                .job_id
                .clone()
                .map(JobId::from)
                .unwrap_or_default(),
            data,
            priority: options.priority,
            attempts: 0,
            max_retries: options.max_retries.unwrap_or(default_max_retries),
            status: JobStatus::Pending,
            created_at: Utc::now(),
            completed_at: None,
            failed_at: None,
            last_error: None,
            result: None,
        }
    }

    /// Returns true if no retry attempts remain.
    pub fn is_exhausted(&self) -> bool {
        self.attempts >= self.max_retries
    }

    /// Serialize to the wire form.
    pub fn to_json(&self) -> BrokerResult<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Deserialize from the wire form.
    pub fn from_json(json: &str) -> BrokerResult<Self> {
        Ok(serde_json::from_str(json)?)
    }
}

/// Options recognized at enqueue time.
#[derive(Debug, Clone, Default)]
pub struct JobOptions {
    /// Caller-supplied job ID. Generated when absent.
    pub job_id: Option<String>,

    /// Priority. 0 = normal; higher = more urgent.
    pub priority: u32,

    /// Delivery delay. Zero means immediately runnable.
    pub delay: Duration,

    /// Per-job override of the broker's `max_retries`.
    pub max_retries: Option<u32>,
}

impl JobOptions {
    /// Creates options with every field at its default.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets an explicit job ID.
    pub fn job_id(mut self, id: impl Into<String>) -> Self {
        self.job_id = Some(id.into());
        self
    }

    /// Sets the priority.
    pub fn priority(mut self, priority: u32) -> Self {
        self.priority = priority;
        self
    }

    /// Sets a delivery delay.
    pub fn delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Overrides the retry bound for this job.
    pub fn max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = Some(max_retries);
        self
    }

    /// Validates the options.
    pub fn validate(&self) -> BrokerResult<()> {
        if self.max_retries == Some(0) {
            return Err(BrokerError::InvalidArgument(
                "max_retries must be positive".to_string(),
            ));
        }
        if let Some(id) = &self.job_id {
            if id.is_empty() {
                return Err(BrokerError::InvalidArgument(
                    "job_id must not be empty".to_string(),
                ));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_job_id_generation() {
        let id1 = JobId::new();
        let id2 = JobId::new();
        assert_ne!(id1, id2);
    }

    #[test]
    fn test_generated_ids_are_time_ordered() {
        let ids: Vec<JobId> = (0..4)
            .map(|_| {
                // Cross a millisecond boundary so the time prefix differs.
                std::thread::sleep(std::time::Duration::from_millis(2));
                JobId::new()
            })
            .collect();
        let mut sorted = ids.clone();
        sorted.sort_by(|a, b| a.as_str().cmp(b.as_str()));
        assert_eq!(ids, sorted);
    }

    #[test]
    fn test_new_job_record() {
        let options = JobOptions::new().priority(5);
        let job = Job::new(json!({"task": "x"}), &options, 3);

        assert_eq!(job.priority, 5);
        assert_eq!(job.attempts, 0);
        assert_eq!(job.max_retries, 3);
        assert_eq!(job.status, JobStatus::Pending);
        assert!(job.result.is_none());
        assert!(job.last_error.is_none());
    }

    #[test]
    fn test_max_retries_override() {
        let options = JobOptions::new().max_retries(7);
        let job = Job::new(json!(null), &options, 3);
        assert_eq!(job.max_retries, 7);
    }

    #[test]
    fn test_codec_preserves_payload() {
        let options = JobOptions::new().job_id("job-42");
        let job = Job::new(json!({"nested": {"k": [1, 2, 3]}}), &options, 3);

        let restored = Job::from_json(&job.to_json().unwrap()).unwrap();
        assert_eq!(restored.id.as_str(), "job-42");
        assert_eq!(restored.data, job.data);
        assert_eq!(restored.status, JobStatus::Pending);
    }

    #[test]
    fn test_options_validation() {
        assert!(JobOptions::new().validate().is_ok());
        assert!(JobOptions::new().max_retries(0).validate().is_err());
        assert!(JobOptions::new().job_id("").validate().is_err());
    }

    #[test]
    fn test_status_terminality() {
        assert!(JobStatus::Completed.is_terminal());
        assert!(JobStatus::Failed.is_terminal());
        assert!(!JobStatus::Retrying.is_terminal());
        assert!(!JobStatus::Processing.is_terminal());
    }
}
