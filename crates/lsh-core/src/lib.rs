//! lsh core library
//!
//! Domain model, scheduler, execution registry, and process supervisor
//! for the lsh job daemon.

pub mod config;
pub mod domain;
pub mod error;
pub mod metrics;
pub mod registry;
pub mod report;
pub mod schedule;
pub mod scheduler;
pub mod supervisor;
pub mod telemetry;

pub use config::{is_dangerous_command, Paths, Settings};
pub use domain::{
    new_execution_id, ExecutionRecord, ExecutionStatus, FailureCount, JobId, JobSpec,
    JobStatistics, JobStatus, JobType, Trend, DEFAULT_PRIORITY,
};
pub use error::{Error, Result};
pub use registry::{
    CleanupReport, ExecutionRegistry, OutputStream, RegistryConfig, RegistryEvent, SearchCriteria,
};
pub use report::{ReportFormat, ReportOptions};
pub use schedule::{CronExpr, Schedule, ScheduleError};
pub use scheduler::{JobDue, Scheduler, SchedulerConfig, SchedulerMetrics};
pub use supervisor::{signal_number, StopRequest, Supervisor, SupervisorConfig};

pub use metrics::METRICS;
pub use telemetry::init_tracing;

/// lsh version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
