//! Job specification: the persistent description of a command, its
//! schedule, and the environment it runs in.

use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::schedule::Schedule;

/// Opaque job identifier, unique across the daemon.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct JobId(pub String);

impl JobId {
    /// Generate a fresh random identifier.
    pub fn generate() -> Self {
        JobId(uuid::Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for JobId {
    fn from(s: &str) -> Self {
        JobId(s.to_string())
    }
}

/// Lifecycle status of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    #[default]
    Created,
    Scheduled,
    Running,
    Completed,
    Failed,
    Killed,
    Stopped,
    Paused,
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            JobStatus::Created => "created",
            JobStatus::Scheduled => "scheduled",
            JobStatus::Running => "running",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
            JobStatus::Killed => "killed",
            JobStatus::Stopped => "stopped",
            JobStatus::Paused => "paused",
        };
        write!(f, "{s}")
    }
}

impl std::str::FromStr for JobStatus {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "created" => Ok(JobStatus::Created),
            "scheduled" => Ok(JobStatus::Scheduled),
            "running" => Ok(JobStatus::Running),
            "completed" => Ok(JobStatus::Completed),
            "failed" => Ok(JobStatus::Failed),
            "killed" => Ok(JobStatus::Killed),
            "stopped" => Ok(JobStatus::Stopped),
            "paused" => Ok(JobStatus::Paused),
            other => Err(format!("unknown job status: {other}")),
        }
    }
}

/// Whether a job was registered with a schedule or fired ad hoc.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum JobType {
    #[default]
    Scheduled,
    Adhoc,
}

/// Default job priority. Lower numeric priority sorts later when several
/// jobs come due in the same sweep.
pub const DEFAULT_PRIORITY: i32 = 5;

/// The persistent description of a command-plus-schedule-plus-environment.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobSpec {
    pub id: JobId,
    pub name: String,
    /// Whole shell command line, run via `sh -c`.
    pub command: String,
    /// Absolute working directory for the child process.
    #[serde(default)]
    pub cwd: Option<PathBuf>,
    /// Extra environment overlaid on a minimal inherited base.
    #[serde(default)]
    pub env: HashMap<String, String>,
    /// User to run as; `None` means the daemon's own user.
    #[serde(default)]
    pub user: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default = "default_priority")]
    pub priority: i32,
    #[serde(default)]
    pub schedule: Schedule,
    #[serde(default)]
    pub status: JobStatus,
    #[serde(default, rename = "type")]
    pub job_type: JobType,
    #[serde(default)]
    pub max_retries: u32,
    /// Wall-clock limit per execution in milliseconds; 0 disables it.
    #[serde(default)]
    pub timeout_ms: u64,
    #[serde(default)]
    pub database_sync: bool,
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
    #[serde(default = "Utc::now")]
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub next_run: Option<DateTime<Utc>>,
}

fn default_priority() -> i32 {
    DEFAULT_PRIORITY
}

impl JobSpec {
    /// Create a spec with defaults for everything but id, name, and command.
    pub fn new(id: impl Into<String>, name: impl Into<String>, command: impl Into<String>) -> Self {
        let now = Utc::now();
        JobSpec {
            id: JobId(id.into()),
            name: name.into(),
            command: command.into(),
            cwd: None,
            env: HashMap::new(),
            user: None,
            tags: Vec::new(),
            priority: DEFAULT_PRIORITY,
            schedule: Schedule::None,
            status: JobStatus::Created,
            job_type: JobType::Scheduled,
            max_retries: 0,
            timeout_ms: 0,
            database_sync: false,
            created_at: now,
            updated_at: now,
            started_at: None,
            completed_at: None,
            next_run: None,
        }
    }

    /// Validate the fields a client is allowed to get wrong.
    pub fn validate(&self) -> Result<()> {
        if self.id.as_str().is_empty() {
            return Err(Error::InvalidInput("job id must not be empty".into()));
        }
        if self.command.trim().is_empty() {
            return Err(Error::InvalidInput("command must not be empty".into()));
        }
        if let Some(cwd) = &self.cwd {
            if !cwd.is_absolute() {
                return Err(Error::InvalidInput(format!(
                    "cwd must be an absolute path: {}",
                    cwd.display()
                )));
            }
        }
        self.schedule.validate()?;
        Ok(())
    }

    /// Whether the scheduler should hold an entry for this job.
    pub fn is_recurring(&self) -> bool {
        !matches!(self.schedule, Schedule::None)
    }
}
