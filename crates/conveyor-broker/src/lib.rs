//! Conveyor Broker - Distributed Task Queue
//!
//! A Redis-backed distributed task queue broker with:
//! - At-least-once execution with bounded retries and exponential backoff
//! - Priority ordering and scheduled (delayed) delivery
//! - Atomic dequeue: jobs never leak between queues on a crash
//! - Stalled-lease recovery for jobs abandoned by dead workers
//! - A synchronous lifecycle event surface for monitoring and tests
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                       queue:<name>:*                         │
//! │                                                              │
//! │  ┌──────────┐  ┌──────────┐  ┌──────────┐                    │
//! │  │ priority │  │ pending  │  │ delayed  │   runnable state   │
//! │  └────┬─────┘  └────┬─────┘  └────▲─────┘                    │
//! │       │  atomic pop │            │ retry / delay             │
//! │       ▼             ▼            │                           │
//! │  ┌─────────────────────────┐     │     ┌──────────────────┐  │
//! │  │       processing        ├─────┴────▶│ completed/failed │  │
//! │  └─────────────────────────┘           └──────────────────┘  │
//! │              ▲                                               │
//! └──────────────┼───────────────────────────────────────────────┘
//!                │ get_next_job / complete_job / fail_job
//!     ┌──────────┴──────────┐
//!     │ Worker 1 … Worker N │  one job at a time, per worker
//!     └─────────────────────┘
//! ```
//!
//! # Example
//!
//! ```rust,ignore
//! use conveyor_broker::{
//!     BrokerConfig, JobOptions, Processor, ProcessorFn, QueueBroker, Worker, WorkerConfig,
//! };
//! use serde_json::json;
//! use std::sync::Arc;
//!
//! let broker = Arc::new(QueueBroker::connect(BrokerConfig::named("emails")).await?);
//! Arc::clone(&broker).start_maintenance();
//!
//! broker
//!     .add_job(json!({"to": "user@example.com"}), JobOptions::new().priority(5))
//!     .await?;
//!
//! let processor = Arc::new(ProcessorFn::new(|data| {
//!     Box::pin(async move {
//!         // Send the email...
//!         Ok(json!({"sent": true}))
//!     })
//! }));
//!
//! let worker = Arc::new(Worker::new("worker-1", broker, processor, WorkerConfig::default()));
//! worker.spawn();
//! ```

pub mod broker;
pub mod config;
pub mod error;
pub mod events;
pub mod job;
pub mod metrics;
pub mod store;
pub mod worker;

pub use broker::{QueueBroker, QueueStats};
pub use config::{BrokerConfig, RedisConfig, WorkerConfig};
pub use error::{BrokerError, BrokerResult};
pub use events::QueueSubscriber;
pub use job::{Job, JobId, JobOptions, JobStatus};
pub use crate::metrics::{register_metrics, JobMetrics};
pub use store::{MemoryStore, QueueKeys, RedisStore, Store};
pub use worker::{Processor, ProcessorFn, Worker, WorkerPool};

/// Re-export of commonly used types.
pub mod prelude {
    pub use crate::broker::QueueBroker;
    pub use crate::config::{BrokerConfig, WorkerConfig};
    pub use crate::error::{BrokerError, BrokerResult};
    pub use crate::events::QueueSubscriber;
    pub use crate::job::{Job, JobId, JobOptions, JobStatus};
    pub use crate::worker::{Processor, ProcessorFn, Worker};
}
