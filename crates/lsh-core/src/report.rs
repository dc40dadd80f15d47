//! Execution report rendering: plain text, CSV, or JSON.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::{ExecutionRecord, JobId, JobStatistics};
use crate::error::Result;
use crate::registry::{ExecutionRegistry, SearchCriteria};

/// Output format for [`render`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ReportFormat {
    #[default]
    Text,
    Csv,
    Json,
}

/// Report filters.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportOptions {
    #[serde(default)]
    pub format: ReportFormat,
    pub job_id: Option<JobId>,
    pub since: Option<DateTime<Utc>>,
    pub until: Option<DateTime<Utc>>,
}

/// Render a report over the registry's records, honoring the job and
/// time-window filters.
pub fn render(registry: &ExecutionRegistry, options: &ReportOptions) -> Result<String> {
    let records = registry.search(&SearchCriteria {
        job_id: options.job_id.clone(),
        started_after: options.since,
        started_before: options.until,
        ..Default::default()
    })?;
    let stats = match &options.job_id {
        Some(id) => registry.get_statistics(id).into_iter().collect(),
        None => registry.get_all_statistics(),
    };

    Ok(match options.format {
        ReportFormat::Text => render_text(&records, &stats),
        ReportFormat::Csv => render_csv(&records),
        ReportFormat::Json => serde_json::to_string_pretty(&records)
            .map_err(|e| crate::error::Error::StorageFailure(e.to_string()))?,
    })
}

fn render_text(records: &[ExecutionRecord], stats: &[JobStatistics]) -> String {
    let mut out = String::new();
    out.push_str("Job Execution Report\n");
    out.push_str("====================\n\n");

    for s in stats {
        out.push_str(&format!(
            "{} ({}): {} runs, {:.1}% success, trend {:?}\n",
            s.job_name,
            s.job_id,
            s.total_executions,
            s.success_rate,
            s.recent_trend,
        ));
        if let Some(avg) = s.avg_duration_ms {
            out.push_str(&format!(
                "  duration min/avg/max: {}ms / {:.0}ms / {}ms\n",
                s.min_duration_ms.unwrap_or(0),
                avg,
                s.max_duration_ms.unwrap_or(0),
            ));
        }
        for failure in &s.common_failures {
            out.push_str(&format!(
                "  failure: {} ({}x, {:.1}%)\n",
                failure.message, failure.count, failure.percentage,
            ));
        }
    }

    out.push_str(&format!("\nExecutions ({}):\n", records.len()));
    for r in records {
        out.push_str(&format!(
            "  {} {} [{}] {} exit={}\n",
            r.start_time.format("%Y-%m-%d %H:%M:%S"),
            r.execution_id,
            r.status,
            r.job_name,
            r.exit_code.map_or("-".to_string(), |c| c.to_string()),
        ));
    }
    out
}

fn render_csv(records: &[ExecutionRecord]) -> String {
    let mut out =
        String::from("executionId,jobId,jobName,status,startTime,durationMs,exitCode\n");
    for r in records {
        out.push_str(&format!(
            "{},{},{},{},{},{},{}\n",
            r.execution_id,
            r.job_id,
            csv_escape(&r.job_name),
            r.status,
            r.start_time.to_rfc3339(),
            r.duration_ms.map_or(String::new(), |d| d.to_string()),
            r.exit_code.map_or(String::new(), |c| c.to_string()),
        ));
    }
    out
}

fn csv_escape(field: &str) -> String {
    if field.contains(',') || field.contains('"') || field.contains('\n') {
        format!("\"{}\"", field.replace('"', "\"\""))
    } else {
        field.to_string()
    }
}
