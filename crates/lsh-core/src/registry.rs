//! In-memory execution registry with bounded history, derived
//! statistics, search, and write-through persistence.
//!
//! The registry owns the authoritative map of execution records per job.
//! Mutations go through a single write lock; lifecycle notifications are
//! broadcast on a channel so the scheduler and supervisors never call
//! into each other on a caller's stack.

use std::collections::{HashMap, VecDeque};
use std::io::Write;
use std::path::PathBuf;
use std::sync::{Arc, RwLock};

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::{debug, warn};

use lsh_store::{Collection, StorageBackend};

use crate::domain::{ExecutionRecord, ExecutionStatus, JobId, JobSpec, JobStatistics};
use crate::error::{Error, Result};

/// Registry bounds and log-mirroring configuration.
#[derive(Debug, Clone)]
pub struct RegistryConfig {
    /// Records retained per job before oldest-first eviction.
    pub max_records_per_job: usize,
    /// Records retained across all jobs.
    pub max_total_records: usize,
    /// Combined stdout+stderr bytes kept in memory per execution.
    pub max_output_bytes: usize,
    /// Age past which `cleanup` evicts sealed records.
    pub retention_days: i64,
    /// When set, output is mirrored to `<log_dir>/<executionId>.log`.
    pub log_dir: Option<PathBuf>,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        RegistryConfig {
            max_records_per_job: 100,
            max_total_records: 10_000,
            max_output_bytes: 256 * 1024,
            retention_days: 30,
            log_dir: None,
        }
    }
}

/// Which child stream a chunk of output came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputStream {
    Stdout,
    Stderr,
}

/// Lifecycle notifications broadcast to interested tasks.
#[derive(Debug, Clone)]
pub enum RegistryEvent {
    ExecutionStarted {
        execution_id: String,
        job_id: JobId,
    },
    OutputRecorded {
        execution_id: String,
        stream: OutputStream,
        bytes: usize,
    },
    ExecutionCompleted {
        execution_id: String,
        job_id: JobId,
        status: ExecutionStatus,
    },
}

/// Composite search criteria over execution records.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchCriteria {
    pub job_id: Option<JobId>,
    pub statuses: Option<Vec<ExecutionStatus>>,
    pub started_after: Option<DateTime<Utc>>,
    pub started_before: Option<DateTime<Utc>>,
    pub min_duration_ms: Option<u64>,
    pub max_duration_ms: Option<u64>,
    pub tags: Option<Vec<String>>,
    pub user: Option<String>,
    /// Regex matched against the command line.
    pub command_pattern: Option<String>,
    pub exit_codes: Option<Vec<i32>>,
    pub limit: Option<usize>,
}

/// What `cleanup` removed.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CleanupReport {
    pub records_removed: usize,
    pub log_files_deleted: usize,
}

#[derive(Default)]
struct Inner {
    records: HashMap<JobId, Vec<ExecutionRecord>>,
    /// executionId -> owning job, for O(1) lookup.
    index: HashMap<String, JobId>,
    /// executionIds in insertion order, for global eviction.
    arrival: VecDeque<String>,
    stats: HashMap<JobId, JobStatistics>,
    total: usize,
}

impl Inner {
    fn record_mut(&mut self, execution_id: &str) -> Option<&mut ExecutionRecord> {
        let job_id = self.index.get(execution_id)?.clone();
        self.records
            .get_mut(&job_id)?
            .iter_mut()
            .find(|r| r.execution_id == execution_id)
    }

    /// Remove one record by id; returns its log file, if any.
    fn remove(&mut self, execution_id: &str) -> Option<PathBuf> {
        let job_id = self.index.remove(execution_id)?;
        let vec = self.records.get_mut(&job_id)?;
        let pos = vec.iter().position(|r| r.execution_id == execution_id)?;
        let record = vec.remove(pos);
        if vec.is_empty() {
            self.records.remove(&job_id);
        }
        self.arrival.retain(|id| id != execution_id);
        self.total -= 1;
        record.log_file
    }

    /// Evict oldest sealed records until both caps hold. Running records
    /// are never evicted.
    fn evict_overflow(&mut self, config: &RegistryConfig, evicted_logs: &mut Vec<PathBuf>) {
        while self.total > config.max_total_records {
            let Some(victim) = self.oldest_sealed(None) else {
                break;
            };
            if let Some(log) = self.remove(&victim) {
                evicted_logs.push(log);
            }
        }

        let over_cap: Vec<JobId> = self
            .records
            .iter()
            .filter(|(_, v)| v.len() > config.max_records_per_job)
            .map(|(k, _)| k.clone())
            .collect();
        for job_id in over_cap {
            while self
                .records
                .get(&job_id)
                .is_some_and(|v| v.len() > config.max_records_per_job)
            {
                let Some(victim) = self.oldest_sealed(Some(&job_id)) else {
                    break;
                };
                if let Some(log) = self.remove(&victim) {
                    evicted_logs.push(log);
                }
            }
        }
    }

    fn oldest_sealed(&self, job: Option<&JobId>) -> Option<String> {
        for id in &self.arrival {
            let Some(job_id) = self.index.get(id) else {
                continue;
            };
            if let Some(filter) = job {
                if job_id != filter {
                    continue;
                }
            }
            let sealed = self
                .records
                .get(job_id)
                .and_then(|v| v.iter().find(|r| r.execution_id == *id))
                .is_some_and(|r| r.status.is_terminal());
            if sealed {
                return Some(id.clone());
            }
        }
        None
    }
}

/// The execution registry.
pub struct ExecutionRegistry {
    config: RegistryConfig,
    store: Option<Arc<dyn StorageBackend>>,
    inner: RwLock<Inner>,
    events: broadcast::Sender<RegistryEvent>,
}

impl ExecutionRegistry {
    pub fn new(config: RegistryConfig, store: Option<Arc<dyn StorageBackend>>) -> Self {
        let (events, _) = broadcast::channel(256);
        ExecutionRegistry {
            config,
            store,
            inner: RwLock::new(Inner::default()),
            events,
        }
    }

    /// Subscribe to lifecycle notifications.
    pub fn subscribe(&self) -> broadcast::Receiver<RegistryEvent> {
        self.events.subscribe()
    }

    /// Allocate (or adopt) an execution id and open a `running` record
    /// snapshotting the job's env, cwd, user, tags, and priority.
    pub fn record_start(
        &self,
        spec: &JobSpec,
        execution_id: Option<String>,
    ) -> Result<ExecutionRecord> {
        let mut record = ExecutionRecord::start(spec, execution_id);
        if let Some(dir) = &self.config.log_dir {
            record.log_file = Some(dir.join(format!("{}.log", record.execution_id)));
        }

        let mut evicted_logs = Vec::new();
        {
            let mut inner = self.inner.write().expect("registry lock poisoned");
            if inner.index.contains_key(&record.execution_id) {
                return Err(Error::AlreadyExists(format!(
                    "execution {}",
                    record.execution_id
                )));
            }
            inner
                .index
                .insert(record.execution_id.clone(), record.job_id.clone());
            inner.arrival.push_back(record.execution_id.clone());
            inner
                .records
                .entry(record.job_id.clone())
                .or_default()
                .push(record.clone());
            inner.total += 1;
            inner.evict_overflow(&self.config, &mut evicted_logs);
        }
        delete_log_files(&evicted_logs);

        let _ = self.events.send(RegistryEvent::ExecutionStarted {
            execution_id: record.execution_id.clone(),
            job_id: record.job_id.clone(),
        });
        Ok(record)
    }

    /// Set the child pid on the active record.
    pub fn record_pid(&self, execution_id: &str, pid: u32) {
        let mut inner = self.inner.write().expect("registry lock poisoned");
        if let Some(record) = inner.record_mut(execution_id) {
            record.pid = Some(pid);
        }
    }

    /// Append a chunk of child output. In-memory buffers are capped;
    /// overflow is dropped and the record marked truncated. The log
    /// file, when configured, always receives the full chunk.
    pub fn record_output(&self, execution_id: &str, stream: OutputStream, data: &[u8]) -> Result<()> {
        let log_file = {
            let mut inner = self.inner.write().expect("registry lock poisoned");
            let max = self.config.max_output_bytes;
            let record = inner
                .record_mut(execution_id)
                .ok_or_else(|| Error::NotFound(format!("execution {execution_id}")))?;
            if record.status != ExecutionStatus::Running {
                return Err(Error::InvalidInput(format!(
                    "execution {execution_id} is sealed"
                )));
            }

            record.output_size += data.len() as u64;
            let used = record.stdout.len() + record.stderr.len();
            let room = max.saturating_sub(used);
            let keep = room.min(data.len());
            if keep < data.len() {
                record.truncated = true;
            }
            if keep > 0 {
                let text = String::from_utf8_lossy(&data[..keep]);
                match stream {
                    OutputStream::Stdout => record.stdout.push_str(&text),
                    OutputStream::Stderr => record.stderr.push_str(&text),
                }
            }
            record.log_file.clone()
        };

        if let Some(path) = log_file {
            if let Err(e) = append_log(&path, data) {
                warn!(execution_id, error = %e, "failed to mirror output to log file");
            }
        }

        let _ = self.events.send(RegistryEvent::OutputRecorded {
            execution_id: execution_id.to_string(),
            stream,
            bytes: data.len(),
        });
        Ok(())
    }

    /// Mark which retry attempt an execution belongs to.
    pub fn record_retry(&self, execution_id: &str, retry_count: u32) {
        let mut inner = self.inner.write().expect("registry lock poisoned");
        if let Some(record) = inner.record_mut(execution_id) {
            record.retry_count = retry_count;
        }
    }

    /// Record a best-effort resource sample on the active record.
    pub fn record_resources(
        &self,
        execution_id: &str,
        max_memory_mb: Option<f64>,
        avg_cpu_pct: Option<f64>,
    ) {
        let mut inner = self.inner.write().expect("registry lock poisoned");
        if let Some(record) = inner.record_mut(execution_id) {
            if max_memory_mb.is_some() {
                record.max_memory_mb = max_memory_mb;
            }
            if avg_cpu_pct.is_some() {
                record.avg_cpu_pct = avg_cpu_pct;
            }
        }
    }

    /// Seal the record, recompute the job's statistics, and flush the
    /// record through the storage backend.
    pub async fn record_completion(
        &self,
        execution_id: &str,
        status: ExecutionStatus,
        exit_code: Option<i32>,
        signal: Option<String>,
        error_message: Option<String>,
    ) -> Result<ExecutionRecord> {
        if !status.is_terminal() {
            return Err(Error::InvalidInput(
                "completion status must be terminal".into(),
            ));
        }

        let record = {
            let mut inner = self.inner.write().expect("registry lock poisoned");
            let record = inner
                .record_mut(execution_id)
                .ok_or_else(|| Error::NotFound(format!("execution {execution_id}")))?;
            record.seal(status, exit_code, signal);
            if let Some(message) = error_message {
                record.error_type = Some(status.to_string());
                record.error_message = Some(message);
            }
            let record = record.clone();

            let job_records = inner
                .records
                .get(&record.job_id)
                .cloned()
                .unwrap_or_default();
            let stats =
                JobStatistics::compute(&record.job_id, &record.job_name, &job_records);
            inner.stats.insert(record.job_id.clone(), stats);
            record
        };

        let _ = self.events.send(RegistryEvent::ExecutionCompleted {
            execution_id: record.execution_id.clone(),
            job_id: record.job_id.clone(),
            status,
        });

        if let Some(store) = &self.store {
            let value = serde_json::to_value(&record)
                .map_err(|e| Error::StorageFailure(e.to_string()))?;
            store
                .upsert(Collection::Executions, &record.execution_id, value)
                .await?;
            store.flush().await?;
        }
        Ok(record)
    }

    /// Most recent executions for a job, newest first.
    pub fn get_history(&self, job_id: &JobId, limit: usize) -> Vec<ExecutionRecord> {
        let inner = self.inner.read().expect("registry lock poisoned");
        let mut records = inner.records.get(job_id).cloned().unwrap_or_default();
        records.sort_by(|a, b| b.start_time.cmp(&a.start_time));
        records.truncate(limit);
        records
    }

    /// Recent executions across all jobs, newest first.
    pub fn get_recent(&self, limit: usize) -> Vec<ExecutionRecord> {
        let inner = self.inner.read().expect("registry lock poisoned");
        let mut records: Vec<ExecutionRecord> =
            inner.records.values().flatten().cloned().collect();
        records.sort_by(|a, b| b.start_time.cmp(&a.start_time));
        records.truncate(limit);
        records
    }

    pub fn get_statistics(&self, job_id: &JobId) -> Option<JobStatistics> {
        self.inner
            .read()
            .expect("registry lock poisoned")
            .stats
            .get(job_id)
            .cloned()
    }

    pub fn get_all_statistics(&self) -> Vec<JobStatistics> {
        let inner = self.inner.read().expect("registry lock poisoned");
        let mut all: Vec<JobStatistics> = inner.stats.values().cloned().collect();
        all.sort_by(|a, b| a.job_id.cmp(&b.job_id));
        all
    }

    /// Number of records currently held (all jobs).
    pub fn len(&self) -> usize {
        self.inner.read().expect("registry lock poisoned").total
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Search records by composite criteria, newest first.
    pub fn search(&self, criteria: &SearchCriteria) -> Result<Vec<ExecutionRecord>> {
        let pattern = criteria
            .command_pattern
            .as_deref()
            .map(regex::Regex::new)
            .transpose()
            .map_err(|e| Error::InvalidInput(format!("bad command pattern: {e}")))?;

        let inner = self.inner.read().expect("registry lock poisoned");
        let mut hits: Vec<ExecutionRecord> = inner
            .records
            .iter()
            .filter(|(job_id, _)| criteria.job_id.as_ref().is_none_or(|want| want == *job_id))
            .flat_map(|(_, v)| v.iter())
            .filter(|r| {
                criteria
                    .statuses
                    .as_ref()
                    .is_none_or(|s| s.contains(&r.status))
            })
            .filter(|r| criteria.started_after.is_none_or(|t| r.start_time >= t))
            .filter(|r| criteria.started_before.is_none_or(|t| r.start_time <= t))
            .filter(|r| {
                criteria
                    .min_duration_ms
                    .is_none_or(|min| r.duration_ms.is_some_and(|d| d >= min))
            })
            .filter(|r| {
                criteria
                    .max_duration_ms
                    .is_none_or(|max| r.duration_ms.is_some_and(|d| d <= max))
            })
            .filter(|r| {
                criteria
                    .tags
                    .as_ref()
                    .is_none_or(|tags| tags.iter().all(|t| r.tags.contains(t)))
            })
            .filter(|r| criteria.user.as_deref().is_none_or(|u| r.user == u))
            .filter(|r| pattern.as_ref().is_none_or(|p| p.is_match(&r.command)))
            .filter(|r| {
                criteria
                    .exit_codes
                    .as_ref()
                    .is_none_or(|codes| r.exit_code.is_some_and(|c| codes.contains(&c)))
            })
            .cloned()
            .collect();

        hits.sort_by(|a, b| b.start_time.cmp(&a.start_time));
        if let Some(limit) = criteria.limit {
            hits.truncate(limit);
        }
        Ok(hits)
    }

    /// Evict records older than the retention window, enforce the
    /// per-job cap, and unlink associated log files.
    pub fn cleanup(&self) -> CleanupReport {
        let cutoff = Utc::now() - Duration::days(self.config.retention_days);
        let mut logs = Vec::new();
        let removed = {
            let mut inner = self.inner.write().expect("registry lock poisoned");

            let expired: Vec<String> = inner
                .records
                .values()
                .flatten()
                .filter(|r| r.status.is_terminal() && r.start_time < cutoff)
                .map(|r| r.execution_id.clone())
                .collect();
            for id in &expired {
                if let Some(log) = inner.remove(id) {
                    logs.push(log);
                }
            }
            let mut removed = expired.len();

            let before = inner.total;
            inner.evict_overflow(&self.config, &mut logs);
            removed += before - inner.total;
            removed
        };

        let deleted = delete_log_files(&logs);
        debug!(removed, deleted, "registry cleanup complete");
        CleanupReport {
            records_removed: removed,
            log_files_deleted: deleted,
        }
    }
}

fn append_log(path: &PathBuf, data: &[u8]) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let mut file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)?;
    file.write_all(data)
}

fn delete_log_files(paths: &[PathBuf]) -> usize {
    let mut deleted = 0;
    for path in paths {
        match std::fs::remove_file(path) {
            Ok(()) => deleted += 1,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!(path = %path.display(), error = %e, "failed to delete log file"),
        }
    }
    deleted
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::JobSpec;

    fn registry() -> ExecutionRegistry {
        ExecutionRegistry::new(RegistryConfig::default(), None)
    }

    fn spec(id: &str) -> JobSpec {
        JobSpec::new(id, id, "echo hi")
    }

    #[tokio::test]
    async fn start_output_completion_ordering() {
        let registry = registry();
        let record = registry.record_start(&spec("j1"), None).unwrap();

        registry
            .record_output(&record.execution_id, OutputStream::Stdout, b"hi\n")
            .unwrap();
        let sealed = registry
            .record_completion(&record.execution_id, ExecutionStatus::Completed, Some(0), None, None)
            .await
            .unwrap();

        assert_eq!(sealed.stdout, "hi\n");
        assert_eq!(sealed.exit_code, Some(0));
        assert_eq!(sealed.output_size, 3);

        // Sealed records refuse further output.
        assert!(registry
            .record_output(&record.execution_id, OutputStream::Stdout, b"more")
            .is_err());
    }

    #[tokio::test]
    async fn duplicate_execution_id_rejected() {
        let registry = registry();
        registry
            .record_start(&spec("j1"), Some("exec_fixed".into()))
            .unwrap();
        let err = registry
            .record_start(&spec("j1"), Some("exec_fixed".into()))
            .unwrap_err();
        assert!(matches!(err, Error::AlreadyExists(_)));
    }

    #[tokio::test]
    async fn output_cap_truncates_and_counts_full_size() {
        let config = RegistryConfig {
            max_output_bytes: 8,
            ..RegistryConfig::default()
        };
        let registry = ExecutionRegistry::new(config, None);
        let record = registry.record_start(&spec("j1"), None).unwrap();

        registry
            .record_output(&record.execution_id, OutputStream::Stdout, b"0123456789")
            .unwrap();
        let sealed = registry
            .record_completion(&record.execution_id, ExecutionStatus::Completed, Some(0), None, None)
            .await
            .unwrap();

        assert_eq!(sealed.stdout, "01234567");
        assert!(sealed.truncated);
        assert_eq!(sealed.output_size, 10);
    }

    #[tokio::test]
    async fn statistics_recomputed_on_completion() {
        let registry = registry();
        let job = spec("j1");

        for ok in [true, true, false] {
            let record = registry.record_start(&job, None).unwrap();
            let (status, code, err) = if ok {
                (ExecutionStatus::Completed, Some(0), None)
            } else {
                (ExecutionStatus::Failed, Some(1), Some("boom".to_string()))
            };
            registry
                .record_completion(&record.execution_id, status, code, None, err)
                .await
                .unwrap();
        }

        let stats = registry.get_statistics(&job.id).unwrap();
        assert_eq!(stats.total_executions, 3);
        assert_eq!(stats.completed, 2);
        assert_eq!(stats.failed, 1);
        assert!((stats.success_rate - 200.0 / 3.0).abs() < 1e-9);
        assert_eq!(stats.common_failures[0].message, "boom");
    }

    #[tokio::test]
    async fn history_is_newest_first_and_limited() {
        let registry = registry();
        let job = spec("j1");
        for _ in 0..5 {
            let record = registry.record_start(&job, None).unwrap();
            registry
                .record_completion(&record.execution_id, ExecutionStatus::Completed, Some(0), None, None)
                .await
                .unwrap();
        }
        let history = registry.get_history(&job.id, 3);
        assert_eq!(history.len(), 3);
        assert!(history[0].start_time >= history[1].start_time);
        assert!(history[1].start_time >= history[2].start_time);
    }

    #[tokio::test]
    async fn per_job_cap_evicts_oldest_sealed() {
        let config = RegistryConfig {
            max_records_per_job: 2,
            ..RegistryConfig::default()
        };
        let registry = ExecutionRegistry::new(config, None);
        let job = spec("j1");

        let mut ids = Vec::new();
        for _ in 0..3 {
            let record = registry.record_start(&job, None).unwrap();
            ids.push(record.execution_id.clone());
            registry
                .record_completion(&record.execution_id, ExecutionStatus::Completed, Some(0), None, None)
                .await
                .unwrap();
        }

        let history = registry.get_history(&job.id, 10);
        assert_eq!(history.len(), 2);
        assert!(!history.iter().any(|r| r.execution_id == ids[0]));
    }

    #[tokio::test]
    async fn running_records_survive_eviction() {
        let config = RegistryConfig {
            max_records_per_job: 1,
            ..RegistryConfig::default()
        };
        let registry = ExecutionRegistry::new(config, None);
        let job = spec("j1");

        let running = registry.record_start(&job, None).unwrap();
        let second = registry.record_start(&job, None).unwrap();
        registry
            .record_completion(&second.execution_id, ExecutionStatus::Completed, Some(0), None, None)
            .await
            .unwrap();

        let history = registry.get_history(&job.id, 10);
        assert!(history.iter().any(|r| r.execution_id == running.execution_id));
    }

    #[tokio::test]
    async fn search_filters_compose() {
        let registry = registry();
        let mut a = spec("a");
        a.command = "echo alpha".into();
        a.tags = vec!["web".into()];
        let mut b = spec("b");
        b.command = "sleep 60".into();

        let ra = registry.record_start(&a, None).unwrap();
        registry
            .record_completion(&ra.execution_id, ExecutionStatus::Completed, Some(0), None, None)
            .await
            .unwrap();
        let rb = registry.record_start(&b, None).unwrap();
        registry
            .record_completion(&rb.execution_id, ExecutionStatus::Failed, Some(1), None, Some("bad".into()))
            .await
            .unwrap();

        let hits = registry
            .search(&SearchCriteria {
                statuses: Some(vec![ExecutionStatus::Failed]),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].job_id, b.id);

        let hits = registry
            .search(&SearchCriteria {
                command_pattern: Some("^echo".into()),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].job_id, a.id);

        let hits = registry
            .search(&SearchCriteria {
                tags: Some(vec!["web".into()]),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(hits.len(), 1);

        let hits = registry
            .search(&SearchCriteria {
                exit_codes: Some(vec![1]),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(hits.len(), 1);
    }

    #[tokio::test]
    async fn bad_regex_is_invalid_input() {
        let registry = registry();
        let err = registry
            .search(&SearchCriteria {
                command_pattern: Some("(".into()),
                ..Default::default()
            })
            .unwrap_err();
        assert!(matches!(err, Error::InvalidInput(_)));
    }

    #[tokio::test]
    async fn cleanup_removes_expired_records_and_logs() {
        let dir = tempfile::tempdir().unwrap();
        let config = RegistryConfig {
            retention_days: 7,
            log_dir: Some(dir.path().to_path_buf()),
            ..RegistryConfig::default()
        };
        let registry = ExecutionRegistry::new(config, None);
        let job = spec("j1");

        let record = registry.record_start(&job, None).unwrap();
        registry
            .record_output(&record.execution_id, OutputStream::Stdout, b"old output\n")
            .unwrap();
        registry
            .record_completion(&record.execution_id, ExecutionStatus::Completed, Some(0), None, None)
            .await
            .unwrap();
        let log_path = record.log_file.clone().unwrap();
        assert!(log_path.exists());

        // Backdate the record past the retention window.
        {
            let mut inner = registry.inner.write().unwrap();
            let r = inner.record_mut(&record.execution_id).unwrap();
            r.start_time = Utc::now() - Duration::days(30);
        }

        let report = registry.cleanup();
        assert_eq!(report.records_removed, 1);
        assert_eq!(report.log_files_deleted, 1);
        assert!(!log_path.exists());
        assert!(registry.get_history(&job.id, 10).is_empty());
    }

    #[tokio::test]
    async fn events_are_broadcast() {
        let registry = registry();
        let mut rx = registry.subscribe();

        let record = registry.record_start(&spec("j1"), None).unwrap();
        registry
            .record_output(&record.execution_id, OutputStream::Stdout, b"x")
            .unwrap();
        registry
            .record_completion(&record.execution_id, ExecutionStatus::Completed, Some(0), None, None)
            .await
            .unwrap();

        assert!(matches!(
            rx.recv().await.unwrap(),
            RegistryEvent::ExecutionStarted { .. }
        ));
        assert!(matches!(
            rx.recv().await.unwrap(),
            RegistryEvent::OutputRecorded { .. }
        ));
        assert!(matches!(
            rx.recv().await.unwrap(),
            RegistryEvent::ExecutionCompleted { .. }
        ));
    }
}
