//! Asynchronous job processing with progress reporting and failure isolation.
//!
//! ## Components
//!
//! - `QueueMessage`: validated job description consumed from the queue
//! - `JobRecord`: status record polled by dashboards
//! - `JobStatusStore`: persistence for status records (in-memory or Postgres)
//! - `JobProcessor`: runs one message through its kind-specific pipeline

pub mod processor;
pub mod store;
pub mod types;

pub use processor::{JobError, JobOutcome, JobProcessor, ProcessorConfig, ProcessorStats};
pub use store::{InMemoryJobStatusStore, JobStatusStore, JobStoreError, PostgresJobStatusStore};
pub use types::{
    BackoffStrategy, JobKind, JobRecord, JobStatus, ProcessingResult, QueueMessage, RecordVersion,
    RetryPolicy,
};
