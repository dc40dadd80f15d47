//! Derived per-job statistics, recomputed on every completion.

use serde::{Deserialize, Serialize};

use super::execution::{ExecutionRecord, ExecutionStatus};
use super::job::JobId;

/// Direction of the last five completions relative to the overall rate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Trend {
    Improving,
    Degrading,
    #[default]
    Stable,
}

/// One row of the common-failure table, keyed verbatim by error message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FailureCount {
    pub message: String,
    pub count: u64,
    /// Share of all failed executions, in percent.
    pub percentage: f64,
}

/// Aggregate statistics for one job.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobStatistics {
    pub job_id: JobId,
    pub job_name: String,
    pub total_executions: u64,
    pub completed: u64,
    pub failed: u64,
    pub killed: u64,
    pub timed_out: u64,
    /// `completed / total * 100`.
    pub success_rate: f64,
    pub min_duration_ms: Option<u64>,
    pub avg_duration_ms: Option<f64>,
    pub max_duration_ms: Option<u64>,
    pub total_duration_ms: u64,
    pub avg_memory_mb: Option<f64>,
    pub avg_cpu_pct: Option<f64>,
    pub recent_trend: Trend,
    /// Top-10 failures by message with percentages.
    pub common_failures: Vec<FailureCount>,
}

/// How many of the most recent completions feed the trend rule.
const TREND_WINDOW: usize = 5;
/// Dead band around the overall success rate before a trend is declared.
const TREND_MARGIN: f64 = 0.1;
/// Rows kept in the common-failure table.
const MAX_COMMON_FAILURES: usize = 10;

impl JobStatistics {
    /// Recompute everything from the job's records, oldest first.
    ///
    /// Records still `running` are excluded from every aggregate.
    pub fn compute(job_id: &JobId, job_name: &str, records: &[ExecutionRecord]) -> Self {
        let sealed: Vec<&ExecutionRecord> =
            records.iter().filter(|r| r.status.is_terminal()).collect();

        let mut completed = 0u64;
        let mut failed = 0u64;
        let mut killed = 0u64;
        let mut timed_out = 0u64;
        for r in &sealed {
            match r.status {
                ExecutionStatus::Completed => completed += 1,
                ExecutionStatus::Failed => failed += 1,
                ExecutionStatus::Killed => killed += 1,
                ExecutionStatus::Timeout => timed_out += 1,
                ExecutionStatus::Running => {}
            }
        }
        let total = sealed.len() as u64;
        let success_rate = if total == 0 {
            0.0
        } else {
            completed as f64 / total as f64 * 100.0
        };

        let durations: Vec<u64> = sealed.iter().filter_map(|r| r.duration_ms).collect();
        let total_duration_ms: u64 = durations.iter().sum();
        let min_duration_ms = durations.iter().min().copied();
        let max_duration_ms = durations.iter().max().copied();
        let avg_duration_ms = if durations.is_empty() {
            None
        } else {
            Some(total_duration_ms as f64 / durations.len() as f64)
        };

        let avg_memory_mb = mean(sealed.iter().filter_map(|r| r.max_memory_mb));
        let avg_cpu_pct = mean(sealed.iter().filter_map(|r| r.avg_cpu_pct));

        JobStatistics {
            job_id: job_id.clone(),
            job_name: job_name.to_string(),
            total_executions: total,
            completed,
            failed,
            killed,
            timed_out,
            success_rate,
            min_duration_ms,
            avg_duration_ms,
            max_duration_ms,
            total_duration_ms,
            avg_memory_mb,
            avg_cpu_pct,
            recent_trend: compute_trend(&sealed, success_rate),
            common_failures: compute_common_failures(&sealed),
        }
    }
}

fn mean(values: impl Iterator<Item = f64>) -> Option<f64> {
    let values: Vec<f64> = values.collect();
    if values.is_empty() {
        None
    } else {
        Some(values.iter().sum::<f64>() / values.len() as f64)
    }
}

/// Compare the last five completions against the overall success rate.
fn compute_trend(sealed: &[&ExecutionRecord], success_rate: f64) -> Trend {
    if sealed.len() < TREND_WINDOW {
        return Trend::Stable;
    }
    let recent = &sealed[sealed.len() - TREND_WINDOW..];
    let successful = recent
        .iter()
        .filter(|r| r.status == ExecutionStatus::Completed)
        .count();
    let r = successful as f64 / TREND_WINDOW as f64;
    let o = success_rate / 100.0;
    if r > o + TREND_MARGIN {
        Trend::Improving
    } else if r < o - TREND_MARGIN {
        Trend::Degrading
    } else {
        Trend::Stable
    }
}

fn compute_common_failures(sealed: &[&ExecutionRecord]) -> Vec<FailureCount> {
    let mut counts: std::collections::HashMap<&str, u64> = std::collections::HashMap::new();
    let mut failures = 0u64;
    for r in sealed {
        if r.status == ExecutionStatus::Failed {
            failures += 1;
            let message = r.error_message.as_deref().unwrap_or("unknown failure");
            *counts.entry(message).or_insert(0) += 1;
        }
    }
    if failures == 0 {
        return Vec::new();
    }

    let mut rows: Vec<FailureCount> = counts
        .into_iter()
        .map(|(message, count)| FailureCount {
            message: message.to_string(),
            count,
            percentage: count as f64 / failures as f64 * 100.0,
        })
        .collect();
    rows.sort_by(|a, b| b.count.cmp(&a.count).then_with(|| a.message.cmp(&b.message)));
    rows.truncate(MAX_COMMON_FAILURES);
    rows
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::job::JobSpec;

    fn sealed(status: ExecutionStatus, duration_ms: u64, error: Option<&str>) -> ExecutionRecord {
        let spec = JobSpec::new("j1", "job", "true");
        let mut r = ExecutionRecord::start(&spec, None);
        r.seal(status, None, None);
        r.duration_ms = Some(duration_ms);
        r.error_message = error.map(str::to_string);
        r
    }

    #[test]
    fn totals_partition_by_status() {
        let records = vec![
            sealed(ExecutionStatus::Completed, 10, None),
            sealed(ExecutionStatus::Failed, 20, Some("boom")),
            sealed(ExecutionStatus::Killed, 30, None),
            sealed(ExecutionStatus::Timeout, 40, None),
        ];
        let stats = JobStatistics::compute(&JobId::from("j1"), "job", &records);
        assert_eq!(
            stats.total_executions,
            stats.completed + stats.failed + stats.killed + stats.timed_out
        );
        assert!((stats.success_rate - 25.0).abs() < 1e-9);
        assert_eq!(stats.min_duration_ms, Some(10));
        assert_eq!(stats.max_duration_ms, Some(40));
        assert_eq!(stats.total_duration_ms, 100);
    }

    #[test]
    fn running_records_are_excluded() {
        let spec = JobSpec::new("j1", "job", "true");
        let running = ExecutionRecord::start(&spec, None);
        let records = vec![running, sealed(ExecutionStatus::Completed, 5, None)];
        let stats = JobStatistics::compute(&JobId::from("j1"), "job", &records);
        assert_eq!(stats.total_executions, 1);
    }

    #[test]
    fn trend_stable_under_five_records() {
        let records = vec![
            sealed(ExecutionStatus::Failed, 1, Some("x")),
            sealed(ExecutionStatus::Failed, 1, Some("x")),
        ];
        let stats = JobStatistics::compute(&JobId::from("j1"), "job", &records);
        assert_eq!(stats.recent_trend, Trend::Stable);
    }

    #[test]
    fn trend_improving_when_recent_beats_overall() {
        // Five failures followed by five successes: recent rate 1.0,
        // overall 0.5.
        let mut records: Vec<_> = (0..5)
            .map(|_| sealed(ExecutionStatus::Failed, 1, Some("x")))
            .collect();
        records.extend((0..5).map(|_| sealed(ExecutionStatus::Completed, 1, None)));
        let stats = JobStatistics::compute(&JobId::from("j1"), "job", &records);
        assert_eq!(stats.recent_trend, Trend::Improving);
    }

    #[test]
    fn trend_degrading_when_recent_lags() {
        let mut records: Vec<_> = (0..5)
            .map(|_| sealed(ExecutionStatus::Completed, 1, None))
            .collect();
        records.extend((0..5).map(|_| sealed(ExecutionStatus::Failed, 1, Some("x"))));
        let stats = JobStatistics::compute(&JobId::from("j1"), "job", &records);
        assert_eq!(stats.recent_trend, Trend::Degrading);
    }

    #[test]
    fn common_failures_ranked_with_percentages() {
        let mut records = vec![];
        for _ in 0..3 {
            records.push(sealed(ExecutionStatus::Failed, 1, Some("disk full")));
        }
        records.push(sealed(ExecutionStatus::Failed, 1, Some("oom")));
        let stats = JobStatistics::compute(&JobId::from("j1"), "job", &records);

        assert_eq!(stats.common_failures.len(), 2);
        assert_eq!(stats.common_failures[0].message, "disk full");
        assert!((stats.common_failures[0].percentage - 75.0).abs() < 1e-9);
        assert!((stats.common_failures[1].percentage - 25.0).abs() < 1e-9);
    }

    #[test]
    fn failure_table_caps_at_ten() {
        let mut records = vec![];
        for i in 0..15 {
            records.push(sealed(ExecutionStatus::Failed, 1, Some(&format!("err-{i}"))));
        }
        let stats = JobStatistics::compute(&JobId::from("j1"), "job", &records);
        assert_eq!(stats.common_failures.len(), 10);
    }
}
