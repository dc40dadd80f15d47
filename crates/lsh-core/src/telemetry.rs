//! Centralised tracing initialisation for lsh binaries.
//!
//! Call [`init_tracing`] once at program start to configure the global
//! subscriber with an `EnvFilter` and optional JSON formatting.
//!
//! Safe to call more than once — subsequent calls are silently ignored
//! (the global subscriber can only be set once per process).

use tracing::Level;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

/// Initialise the global tracing subscriber.
///
/// * `json` — when `true`, emit newline-delimited JSON log lines
///   (useful for log aggregation pipelines).
/// * `level` — default verbosity when `RUST_LOG` is not set.
pub fn init_tracing(json: bool, level: Level) {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level.as_str()));

    if json {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt::layer().with_target(false).json())
            .try_init()
            .ok();
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt::layer().with_target(false))
            .try_init()
            .ok();
    }
}

/// Emit event: a job came due and was dispatched.
pub fn emit_job_due(job_id: &str, scheduled_for_ms: i64) {
    tracing::info!(event = "scheduler.job_due", job_id = %job_id, scheduled_for_ms);
}

/// Emit event: an execution started.
pub fn emit_execution_started(job_id: &str, execution_id: &str, pid: Option<u32>) {
    tracing::info!(event = "execution.started", job_id = %job_id, execution_id = %execution_id, pid);
}

/// Emit event: an execution sealed with a terminal status.
pub fn emit_execution_finished(
    job_id: &str,
    execution_id: &str,
    status: &str,
    duration_ms: Option<u64>,
) {
    tracing::info!(
        event = "execution.finished",
        job_id = %job_id,
        execution_id = %execution_id,
        status = %status,
        duration_ms,
    );
}
