//! Job schedules: fixed intervals, cron expressions, or one-shot.

mod cron;

pub use cron::CronExpr;

use chrono::{DateTime, Duration, Local, Utc};
use serde::{Deserialize, Serialize};

use crate::error::Error;

/// Errors from schedule parsing and validation.
#[derive(Debug, thiserror::Error)]
pub enum ScheduleError {
    #[error("cron expression {expression:?} has {found} fields, expected 5")]
    FieldCount { expression: String, found: usize },

    #[error("invalid cron {field} field: {value:?}")]
    InvalidField { field: String, value: String },

    #[error("interval must be a positive number of milliseconds")]
    ZeroInterval,
}

impl ScheduleError {
    pub(crate) fn bad_field(field: &str, value: &str) -> Self {
        ScheduleError::InvalidField {
            field: field.to_string(),
            value: value.to_string(),
        }
    }
}

impl From<ScheduleError> for Error {
    fn from(e: ScheduleError) -> Self {
        Error::InvalidInput(e.to_string())
    }
}

/// When a job runs.
///
/// Wire shape: `{"interval": 500}`, `{"cron": "*/5 * * * *"}`, or `"none"`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Schedule {
    /// Fixed interval in milliseconds between run starts.
    Interval(u64),
    /// Classic five-field cron expression, host local time.
    Cron(CronExpr),
    /// One-shot: runs only on demand.
    #[default]
    None,
}

impl Schedule {
    pub fn validate(&self) -> Result<(), ScheduleError> {
        match self {
            Schedule::Interval(0) => Err(ScheduleError::ZeroInterval),
            // Cron expressions are validated at parse time.
            _ => Ok(()),
        }
    }

    /// Next run strictly after `from`. `None` for one-shot schedules and
    /// for cron expressions with no reachable instant.
    pub fn next_run(&self, from: DateTime<Utc>) -> Option<DateTime<Utc>> {
        match self {
            Schedule::Interval(ms) => Some(from + Duration::milliseconds(*ms as i64)),
            Schedule::Cron(expr) => expr
                .next_after(from.with_timezone(&Local))
                .map(|t| t.with_timezone(&Utc)),
            Schedule::None => None,
        }
    }
}
