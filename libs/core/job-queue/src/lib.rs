//! Job Queue Framework
//!
//! Named background job queues with a fixed per-queue retry policy.
//!
//! ## Features
//!
//! - **Queue registry**: one slot per named queue, live or unavailable,
//!   connected independently at start-up
//! - **Dispatcher**: resolves queue names, merges caller options over the
//!   queue defaults, and hands out mock acknowledgements for unavailable queues
//! - **Brokers**: Redis (durable) and in-memory, both owning delay, retry,
//!   backoff and retention
//! - **Failed-job store**: dead-lettered jobs stay queryable per queue
//! - **Workers**: bounded-concurrency poll loop, follow-on job dispatch,
//!   graceful drain on shutdown
//! - **Lifecycle monitor**: completion/failure logging, dead-letter notices,
//!   broadcast events and Prometheus metrics
//!
//! ## Example
//!
//! ```rust,ignore
//! use job_queue::{Dispatcher, JobOptions, QueueRegistry, RedisConnector};
//!
//! let connector = RedisConnector::new("redis://localhost:6379", Duration::from_secs(2))?;
//! let registry = Arc::new(QueueRegistry::connect(&connector).await);
//! let dispatcher = Dispatcher::new(registry.clone());
//!
//! dispatcher
//!     .submit("emailNotifications", "send-email", payload, JobOptions::new())
//!     .await?;
//! ```

pub mod broker;
mod config;
mod dispatcher;
mod error;
mod job;
pub mod metrics;
mod monitor;
mod policy;
mod processor;
mod registry;
mod shutdown;
mod worker;

// Re-export main types
pub use broker::{
    Broker, BrokerConnector, JobCounts, MemoryBroker, MemoryConnector, RedisBroker, RedisConnector, STALLED_REASON,
};
pub use config::WorkerConfig;
pub use dispatcher::Dispatcher;
pub use error::{JobError, QueueError};
pub use job::{
    Dispatched, FailOutcome, FollowUp, Job, JobId, JobOptions, JobResult, MOCK_JOB_ID,
    MockAcknowledgement, ResolvedOptions,
};
pub use metrics::{QueueMetrics, init_metrics};
pub use monitor::{LifecycleEvent, LifecycleMonitor};
pub use policy::{Backoff, QueueConfig, QueueName};
pub use processor::{HandlerSet, JobHandler};
pub use registry::{QueueRegistry, QueueRegistryBuilder, QueueSlot};
pub use shutdown::{ShutdownCoordinator, ShutdownReport};
pub use worker::QueueWorker;
