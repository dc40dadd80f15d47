//! Typed domain model: job specs, execution records, derived statistics.

pub mod execution;
pub mod job;
pub mod stats;

pub use execution::{new_execution_id, ExecutionRecord, ExecutionStatus};
pub use job::{JobId, JobSpec, JobStatus, JobType, DEFAULT_PRIORITY};
pub use stats::{FailureCount, JobStatistics, Trend};
