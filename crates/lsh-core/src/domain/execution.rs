//! Execution records: the durable log of one invocation of a job.

use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};

use super::job::{JobId, JobSpec, JobType};

/// Terminal and in-flight states of a single execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionStatus {
    Running,
    Completed,
    Failed,
    Killed,
    Timeout,
}

impl ExecutionStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, ExecutionStatus::Running)
    }
}

impl fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ExecutionStatus::Running => "running",
            ExecutionStatus::Completed => "completed",
            ExecutionStatus::Failed => "failed",
            ExecutionStatus::Killed => "killed",
            ExecutionStatus::Timeout => "timeout",
        };
        write!(f, "{s}")
    }
}

/// Allocate a new execution id: `exec_<epochms>_<rand>`.
pub fn new_execution_id() -> String {
    let ms = Utc::now().timestamp_millis();
    let suffix: u32 = rand::thread_rng().gen();
    format!("exec_{ms}_{suffix:08x}")
}

/// One invocation of a job: timing, exit, output, resources.
///
/// Created at spawn, mutated only by its supervising task, sealed on
/// completion and immutable afterwards.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionRecord {
    pub execution_id: String,
    pub job_id: JobId,
    pub job_name: String,
    pub command: String,
    pub start_time: DateTime<Utc>,
    #[serde(default)]
    pub end_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub duration_ms: Option<u64>,
    pub status: ExecutionStatus,
    #[serde(default)]
    pub exit_code: Option<i32>,
    #[serde(default)]
    pub signal: Option<String>,
    #[serde(default)]
    pub pid: Option<u32>,
    #[serde(default)]
    pub ppid: Option<u32>,
    #[serde(default)]
    pub stdout: String,
    #[serde(default)]
    pub stderr: String,
    /// Total bytes seen on both streams, including dropped overflow.
    #[serde(default)]
    pub output_size: u64,
    /// Set when the per-execution output cap dropped data.
    #[serde(default)]
    pub truncated: bool,
    #[serde(default)]
    pub log_file: Option<PathBuf>,
    #[serde(default)]
    pub max_memory_mb: Option<f64>,
    #[serde(default)]
    pub avg_cpu_pct: Option<f64>,
    #[serde(default)]
    pub disk_io_mb: Option<f64>,
    pub environment: HashMap<String, String>,
    #[serde(default)]
    pub working_directory: Option<PathBuf>,
    pub user: String,
    pub hostname: String,
    #[serde(default)]
    pub tags: Vec<String>,
    pub priority: i32,
    pub scheduled: bool,
    #[serde(default)]
    pub retry_count: u32,
    #[serde(default)]
    pub parent_job_id: Option<JobId>,
    #[serde(default)]
    pub error_type: Option<String>,
    #[serde(default)]
    pub error_message: Option<String>,
    #[serde(default)]
    pub stack_trace: Option<String>,
}

impl ExecutionRecord {
    /// Snapshot a job spec into a fresh `running` record.
    pub fn start(spec: &JobSpec, execution_id: Option<String>) -> Self {
        let host = hostname::get()
            .map(|h| h.to_string_lossy().into_owned())
            .unwrap_or_else(|_| "unknown".to_string());
        let user = spec
            .user
            .clone()
            .or_else(|| std::env::var("USER").ok())
            .unwrap_or_else(|| "unknown".to_string());

        ExecutionRecord {
            execution_id: execution_id.unwrap_or_else(new_execution_id),
            job_id: spec.id.clone(),
            job_name: spec.name.clone(),
            command: spec.command.clone(),
            start_time: Utc::now(),
            end_time: None,
            duration_ms: None,
            status: ExecutionStatus::Running,
            exit_code: None,
            signal: None,
            pid: None,
            ppid: Some(std::process::id()),
            stdout: String::new(),
            stderr: String::new(),
            output_size: 0,
            truncated: false,
            log_file: None,
            max_memory_mb: None,
            avg_cpu_pct: None,
            disk_io_mb: None,
            environment: spec.env.clone(),
            working_directory: spec.cwd.clone(),
            user,
            hostname: host,
            tags: spec.tags.clone(),
            priority: spec.priority,
            scheduled: spec.job_type == JobType::Scheduled,
            retry_count: 0,
            parent_job_id: None,
            error_type: None,
            error_message: None,
            stack_trace: None,
        }
    }

    /// Seal the record with a terminal status. After this the record is
    /// immutable.
    pub fn seal(&mut self, status: ExecutionStatus, exit_code: Option<i32>, signal: Option<String>) {
        let end = Utc::now();
        self.end_time = Some(end);
        self.duration_ms = Some((end - self.start_time).num_milliseconds().max(0) as u64);
        self.status = status;
        self.exit_code = exit_code;
        self.signal = signal;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn execution_ids_are_unique() {
        let mut seen = std::collections::HashSet::new();
        for _ in 0..1000 {
            assert!(seen.insert(new_execution_id()));
        }
    }

    #[test]
    fn execution_id_format() {
        let id = new_execution_id();
        assert!(id.starts_with("exec_"));
        let parts: Vec<&str> = id.splitn(3, '_').collect();
        assert_eq!(parts.len(), 3);
        parts[1].parse::<i64>().unwrap();
    }

    #[test]
    fn start_snapshots_spec() {
        let mut spec = JobSpec::new("j1", "greet", "echo hi");
        spec.tags = vec!["smoke".into()];
        spec.env.insert("FOO".into(), "bar".into());

        let record = ExecutionRecord::start(&spec, None);
        assert_eq!(record.job_id, spec.id);
        assert_eq!(record.status, ExecutionStatus::Running);
        assert_eq!(record.environment.get("FOO").map(String::as_str), Some("bar"));
        assert_eq!(record.tags, vec!["smoke".to_string()]);
        assert!(record.scheduled);
        assert_eq!(record.ppid, Some(std::process::id()));
    }

    #[test]
    fn seal_sets_duration_and_status() {
        let spec = JobSpec::new("j1", "greet", "echo hi");
        let mut record = ExecutionRecord::start(&spec, None);
        record.seal(ExecutionStatus::Completed, Some(0), None);

        assert!(record.status.is_terminal());
        assert_eq!(record.exit_code, Some(0));
        assert!(record.end_time.is_some());
        assert!(record.duration_ms.is_some());
    }

    #[test]
    fn explicit_execution_id_is_kept() {
        let spec = JobSpec::new("j1", "greet", "echo hi");
        let record = ExecutionRecord::start(&spec, Some("exec_custom".into()));
        assert_eq!(record.execution_id, "exec_custom");
    }
}
