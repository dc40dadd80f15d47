//! The job daemon service: owns the scheduler, registry, supervisor,
//! and the authoritative in-memory job table, and exposes the control
//! operations served by the IPC and HTTP surfaces.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::{Duration, Instant};

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, oneshot, Notify};
use tracing::{debug, info, warn};

use lsh_core::{
    is_dangerous_command, telemetry, Error, ExecutionRecord, ExecutionStatus, JobDue, JobId,
    JobSpec, JobStatistics, JobStatus, JobType, Result, Scheduler, SchedulerMetrics, Settings,
    StopRequest, Supervisor, METRICS,
};
use lsh_store::{Collection, StorageBackend};

use crate::protocol::JobFilter;

/// How long shutdown waits for supervisors before exiting anyway.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(30);

/// `getStatus` payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DaemonStatus {
    pub version: String,
    pub uptime_secs: u64,
    pub jobs_total: usize,
    pub jobs_running: usize,
    pub records_held: usize,
    pub scheduler: SchedulerMetrics,
}

/// `triggerJob` payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TriggerResult {
    pub exit_code: Option<i32>,
    pub output: String,
}

struct RunningJob {
    stop_tx: mpsc::Sender<StopRequest>,
}

/// The daemon service. Construct once, share via `Arc`.
pub struct JobDaemon {
    pub settings: Settings,
    store: Arc<dyn StorageBackend>,
    registry: Arc<lsh_core::ExecutionRegistry>,
    scheduler: Arc<Scheduler>,
    supervisor: Arc<Supervisor>,
    jobs: RwLock<HashMap<JobId, JobSpec>>,
    running: Mutex<HashMap<JobId, RunningJob>>,
    shutdown: Notify,
    shutting_down: AtomicBool,
    restart_requested: AtomicBool,
    started_at: Instant,
}

impl JobDaemon {
    pub fn new(
        settings: Settings,
        store: Arc<dyn StorageBackend>,
        registry: Arc<lsh_core::ExecutionRegistry>,
        scheduler: Arc<Scheduler>,
        supervisor: Arc<Supervisor>,
    ) -> Arc<Self> {
        Arc::new(JobDaemon {
            settings,
            store,
            registry,
            scheduler,
            supervisor,
            jobs: RwLock::new(HashMap::new()),
            running: Mutex::new(HashMap::new()),
            shutdown: Notify::new(),
            shutting_down: AtomicBool::new(false),
            restart_requested: AtomicBool::new(false),
            started_at: Instant::now(),
        })
    }

    /// Load persisted job specs into memory and re-arm their schedules.
    pub async fn load_jobs(&self) -> Result<usize> {
        let rows = self.store.read_all(Collection::Jobs).await?;
        let mut loaded = 0;
        for row in rows {
            match serde_json::from_value::<JobSpec>(row.value) {
                Ok(mut spec) => {
                    // Jobs cannot still be running across a restart.
                    if spec.status == JobStatus::Running {
                        spec.status = JobStatus::Scheduled;
                    }
                    if spec.is_recurring() && spec.status == JobStatus::Scheduled {
                        spec.next_run = self.scheduler.add_job(&spec)?;
                    }
                    self.jobs.write().expect("jobs lock").insert(spec.id.clone(), spec);
                    loaded += 1;
                }
                Err(e) => warn!(id = %row.id, error = %e, "skipping undecodable job spec"),
            }
        }
        info!(loaded, "job specs loaded from storage");
        Ok(loaded)
    }

    // -----------------------------------------------------------------
    // Control operations
    // -----------------------------------------------------------------

    pub fn status(&self) -> DaemonStatus {
        DaemonStatus {
            version: lsh_core::VERSION.to_string(),
            uptime_secs: self.started_at.elapsed().as_secs(),
            jobs_total: self.jobs.read().expect("jobs lock").len(),
            jobs_running: self.running.lock().expect("running lock").len(),
            records_held: self.registry.len(),
            scheduler: self.scheduler.metrics(),
        }
    }

    pub fn list_jobs(&self, filter: Option<&JobFilter>) -> Vec<JobSpec> {
        let jobs = self.jobs.read().expect("jobs lock");
        let mut specs: Vec<JobSpec> = jobs
            .values()
            .filter(|spec| {
                let Some(filter) = filter else { return true };
                filter.status.is_none_or(|s| spec.status == s)
                    && filter
                        .tag
                        .as_deref()
                        .is_none_or(|t| spec.tags.iter().any(|tag| tag == t))
                    && filter
                        .name_contains
                        .as_deref()
                        .is_none_or(|n| spec.name.contains(n))
            })
            .cloned()
            .collect();
        specs.sort_by(|a, b| a.id.cmp(&b.id));
        specs
    }

    pub fn get_job(&self, id: &JobId) -> Result<JobSpec> {
        self.jobs
            .read()
            .expect("jobs lock")
            .get(id)
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("job {id}")))
    }

    pub async fn create_job(&self, mut spec: JobSpec) -> Result<JobSpec> {
        self.ensure_accepting()?;
        spec.validate()?;
        if is_dangerous_command(&spec.command) && !self.settings.allow_dangerous_commands {
            return Err(Error::Forbidden(format!(
                "command matches the dangerous-command denylist: {}",
                spec.name
            )));
        }

        {
            let jobs = self.jobs.read().expect("jobs lock");
            if jobs.contains_key(&spec.id) {
                return Err(Error::AlreadyExists(format!("job {}", spec.id)));
            }
        }

        let now = Utc::now();
        spec.created_at = now;
        spec.updated_at = now;
        spec.status = if spec.is_recurring() {
            spec.next_run = self.scheduler.add_job(&spec)?;
            JobStatus::Scheduled
        } else {
            JobStatus::Created
        };

        self.persist_job(&spec).await?;
        self.jobs
            .write()
            .expect("jobs lock")
            .insert(spec.id.clone(), spec.clone());
        info!(job_id = %spec.id, name = %spec.name, "job created");
        Ok(spec)
    }

    /// Arm a job: recurring specs re-enter the scheduler; one-shot specs
    /// execute immediately in the background.
    pub async fn start_job(self: &Arc<Self>, id: &JobId) -> Result<JobSpec> {
        self.ensure_accepting()?;
        let mut spec = self.get_job(id)?;

        if spec.is_recurring() {
            spec.next_run = self.scheduler.add_job(&spec)?;
            spec.status = JobStatus::Scheduled;
            spec.updated_at = Utc::now();
            self.update_job(spec.clone()).await?;
        } else {
            if self.is_running(id) {
                return Err(Error::AlreadyExists(format!("job {id} is already running")));
            }
            let _ = self.spawn_execution(spec.clone());
        }
        Ok(spec)
    }

    /// Unschedule a job and signal its live execution, if any.
    pub async fn stop_job(&self, id: &JobId, signal: Option<String>) -> Result<JobSpec> {
        let mut spec = self.get_job(id)?;
        self.scheduler.remove_job(id);

        let stop_tx = {
            let running = self.running.lock().expect("running lock");
            running.get(id).map(|r| r.stop_tx.clone())
        };
        if let Some(stop_tx) = stop_tx {
            let _ = stop_tx.send(StopRequest { signal }).await;
        }

        spec.status = JobStatus::Stopped;
        spec.next_run = None;
        spec.updated_at = Utc::now();
        self.update_job(spec.clone()).await?;
        info!(job_id = %id, "job stopped");
        Ok(spec)
    }

    /// Suspend scheduling without touching a live execution.
    pub async fn pause_job(&self, id: &JobId) -> Result<JobSpec> {
        let mut spec = self.get_job(id)?;
        self.scheduler.remove_job(id);
        spec.status = JobStatus::Paused;
        spec.next_run = None;
        spec.updated_at = Utc::now();
        self.update_job(spec.clone()).await?;
        Ok(spec)
    }

    pub async fn resume_job(&self, id: &JobId) -> Result<JobSpec> {
        self.ensure_accepting()?;
        let mut spec = self.get_job(id)?;
        if spec.status != JobStatus::Paused {
            return Err(Error::InvalidInput(format!(
                "job {id} is {}, not paused",
                spec.status
            )));
        }
        if spec.is_recurring() {
            spec.next_run = self.scheduler.add_job(&spec)?;
            spec.status = JobStatus::Scheduled;
        } else {
            spec.status = JobStatus::Created;
        }
        spec.updated_at = Utc::now();
        self.update_job(spec.clone()).await?;
        Ok(spec)
    }

    /// Immediate ad-hoc execution; waits for completion.
    pub async fn trigger_job(self: &Arc<Self>, id: &JobId) -> Result<TriggerResult> {
        self.ensure_accepting()?;
        let mut spec = self.get_job(id)?;
        if self.is_running(id) {
            return Err(Error::AlreadyExists(format!("job {id} is already running")));
        }
        spec.job_type = JobType::Adhoc;

        let done = self.spawn_execution(spec);
        let record = done
            .await
            .map_err(|_| Error::StorageFailure("execution task dropped".into()))??;
        Ok(TriggerResult {
            exit_code: record.exit_code,
            output: record.stdout,
        })
    }

    pub async fn remove_job(&self, id: &JobId, force: bool) -> Result<JobSpec> {
        let spec = self.get_job(id)?;

        if self.is_running(id) {
            if !force {
                return Err(Error::InvalidInput(format!(
                    "job {id} has a live execution; pass force to kill it"
                )));
            }
            let stop_tx = {
                let running = self.running.lock().expect("running lock");
                running.get(id).map(|r| r.stop_tx.clone())
            };
            if let Some(stop_tx) = stop_tx {
                let _ = stop_tx.send(StopRequest { signal: None }).await;
            }
        }

        self.scheduler.remove_job(id);
        self.jobs.write().expect("jobs lock").remove(id);
        self.store.delete(Collection::Jobs, id.as_str()).await?;
        info!(job_id = %id, "job removed");
        Ok(spec)
    }

    pub fn get_history(&self, job_id: Option<&JobId>, limit: usize) -> Vec<ExecutionRecord> {
        match job_id {
            Some(id) => self.registry.get_history(id, limit),
            None => self.registry.get_recent(limit),
        }
    }

    pub fn get_statistics(&self, job_id: Option<&JobId>) -> Result<Vec<JobStatistics>> {
        match job_id {
            Some(id) => {
                let stats = self
                    .registry
                    .get_statistics(id)
                    .ok_or_else(|| Error::NotFound(format!("no statistics for job {id}")))?;
                Ok(vec![stats])
            }
            None => Ok(self.registry.get_all_statistics()),
        }
    }

    pub fn registry(&self) -> &Arc<lsh_core::ExecutionRegistry> {
        &self.registry
    }

    // -----------------------------------------------------------------
    // Lifecycle
    // -----------------------------------------------------------------

    pub fn is_shutting_down(&self) -> bool {
        self.shutting_down.load(Ordering::SeqCst)
    }

    pub fn restart_requested(&self) -> bool {
        self.restart_requested.load(Ordering::SeqCst)
    }

    /// Begin shutdown: stop the scheduler, signal supervisors, wake the
    /// drive loop. Idempotent.
    pub fn begin_shutdown(&self, restart: bool) {
        if self.shutting_down.swap(true, Ordering::SeqCst) {
            return;
        }
        if restart {
            self.restart_requested.store(true, Ordering::SeqCst);
        }
        info!(restart, "daemon shutdown requested");
        self.scheduler.stop();

        let stops: Vec<mpsc::Sender<StopRequest>> = {
            let running = self.running.lock().expect("running lock");
            running.values().map(|r| r.stop_tx.clone()).collect()
        };
        for stop_tx in stops {
            let _ = stop_tx.try_send(StopRequest { signal: None });
        }
        // notify_one stores a permit, so a loop that is between polls
        // still observes the shutdown on its next await.
        self.shutdown.notify_one();
    }

    /// Wait (bounded) for live executions to seal, then flush storage
    /// and drop a jobs+statistics snapshot next to it.
    pub async fn finish_shutdown(&self) {
        let deadline = Instant::now() + SHUTDOWN_GRACE;
        while Instant::now() < deadline {
            if self.running.lock().expect("running lock").is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
        if let Err(e) = self.store.flush().await {
            warn!(error = %e, "final store flush failed");
        }
        self.write_registry_snapshot();
        METRICS.flush();
        info!("daemon shutdown complete");
    }

    /// Best-effort `registry.json`: the job table and derived
    /// statistics at one instant, for dashboards that read the file
    /// directly.
    pub fn write_registry_snapshot(&self) {
        let snapshot = serde_json::json!({
            "takenAt": Utc::now(),
            "jobs": self.list_jobs(None),
            "statistics": self.registry.get_all_statistics(),
        });
        let path = self.settings.paths().registry;
        if let Some(parent) = path.parent() {
            let _ = std::fs::create_dir_all(parent);
        }
        let bytes = match serde_json::to_vec_pretty(&snapshot) {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!(error = %e, "cannot serialize registry snapshot");
                return;
            }
        };
        if let Err(e) = std::fs::write(&path, bytes) {
            warn!(path = %path.display(), error = %e, "cannot write registry snapshot");
        }
    }

    /// Drive loop: consume `jobDue` messages until shutdown.
    pub async fn run(self: Arc<Self>, mut due_rx: mpsc::Receiver<JobDue>) {
        self.scheduler.start();
        loop {
            tokio::select! {
                Some(due) = due_rx.recv() => self.dispatch(due),
                _ = self.shutdown.notified() => break,
            }
            if self.is_shutting_down() {
                break;
            }
        }
    }

    fn dispatch(self: &Arc<Self>, due: JobDue) {
        let spec = {
            let jobs = self.jobs.read().expect("jobs lock");
            jobs.get(&due.job_id).cloned()
        };
        let Some(spec) = spec else {
            // Raced with removal; drop the stray heap entry too.
            self.scheduler.remove_job(&due.job_id);
            return;
        };
        if spec.status == JobStatus::Paused || spec.status == JobStatus::Stopped {
            return;
        }
        // One concurrent execution per job: a still-running previous
        // sweep wins and this firing is skipped.
        if self.is_running(&due.job_id) {
            debug!(job_id = %due.job_id, "previous execution still live; skipping firing");
            return;
        }
        telemetry::emit_job_due(due.job_id.as_str(), due.scheduled_for.timestamp_millis());
        METRICS.inc_jobs_dispatched();
        let _ = self.spawn_execution(spec);
    }

    fn is_running(&self, id: &JobId) -> bool {
        self.running.lock().expect("running lock").contains_key(id)
    }

    /// Spawn a supervised execution; the returned channel yields the
    /// sealed record.
    fn spawn_execution(
        self: &Arc<Self>,
        spec: JobSpec,
    ) -> oneshot::Receiver<Result<ExecutionRecord>> {
        let (done_tx, done_rx) = oneshot::channel();
        let (stop_tx, mut stop_rx) = mpsc::channel(4);

        self.running
            .lock()
            .expect("running lock")
            .insert(spec.id.clone(), RunningJob { stop_tx });

        let daemon = Arc::clone(self);
        tokio::spawn(async move {
            daemon.mark_job(&spec.id, JobStatus::Running, true).await;

            let result = daemon
                .supervisor
                .run_with_retries(&spec, &mut stop_rx)
                .await;

            daemon.running.lock().expect("running lock").remove(&spec.id);
            METRICS.inc_executions_completed();

            match &result {
                Ok(record) => {
                    telemetry::emit_execution_finished(
                        spec.id.as_str(),
                        &record.execution_id,
                        &record.status.to_string(),
                        record.duration_ms,
                    );
                    let after = match record.status {
                        _ if spec.is_recurring() => JobStatus::Scheduled,
                        ExecutionStatus::Completed => JobStatus::Completed,
                        ExecutionStatus::Killed => JobStatus::Killed,
                        _ => JobStatus::Failed,
                    };
                    daemon.mark_job(&spec.id, after, false).await;
                }
                Err(e) => {
                    warn!(job_id = %spec.id, error = %e, "execution failed to record");
                    daemon.mark_job(&spec.id, JobStatus::Failed, false).await;
                }
            }
            let _ = done_tx.send(result);
        });
        done_rx
    }

    /// Update a job's status and timestamps, best-effort persisted.
    async fn mark_job(&self, id: &JobId, status: JobStatus, starting: bool) {
        let updated = {
            let mut jobs = self.jobs.write().expect("jobs lock");
            let Some(spec) = jobs.get_mut(id) else { return };
            // A stop/pause issued while the execution ran wins over the
            // terminal status bookkeeping.
            if !starting
                && (spec.status == JobStatus::Stopped || spec.status == JobStatus::Paused)
            {
                return;
            }
            let now = Utc::now();
            spec.status = status;
            spec.updated_at = now;
            if starting {
                spec.started_at = Some(now);
            } else {
                spec.completed_at = Some(now);
            }
            spec.clone()
        };
        if let Err(e) = self.persist_job(&updated).await {
            warn!(job_id = %id, error = %e, "failed to persist job update");
        }
    }

    async fn update_job(&self, spec: JobSpec) -> Result<()> {
        self.persist_job(&spec).await?;
        self.jobs
            .write()
            .expect("jobs lock")
            .insert(spec.id.clone(), spec);
        Ok(())
    }

    async fn persist_job(&self, spec: &JobSpec) -> Result<()> {
        let value =
            serde_json::to_value(spec).map_err(|e| Error::StorageFailure(e.to_string()))?;
        self.store
            .upsert(Collection::Jobs, spec.id.as_str(), value)
            .await?;
        Ok(())
    }

    fn ensure_accepting(&self) -> Result<()> {
        if self.is_shutting_down() {
            Err(Error::ServiceShutdown)
        } else {
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lsh_core::{
        ExecutionRegistry, RegistryConfig, Schedule, SchedulerConfig, SupervisorConfig,
    };
    use lsh_store::JsonFileStore;

    async fn daemon_in(dir: &tempfile::TempDir) -> (Arc<JobDaemon>, mpsc::Receiver<JobDue>) {
        let vars = std::collections::HashMap::from([
            ("HOME".to_string(), dir.path().display().to_string()),
            ("USER".to_string(), "tester".to_string()),
        ]);
        let settings = Settings::from_vars(&vars).unwrap();
        let store: Arc<dyn StorageBackend> =
            Arc::new(JsonFileStore::open(dir.path().join("storage.json")).unwrap());
        let registry = Arc::new(ExecutionRegistry::new(
            RegistryConfig::default(),
            Some(Arc::clone(&store)),
        ));
        let (scheduler, due_rx) = Scheduler::new(SchedulerConfig {
            min_check_interval: Duration::from_millis(5),
            ..SchedulerConfig::default()
        });
        let supervisor = Arc::new(Supervisor::new(
            Arc::clone(&registry),
            SupervisorConfig::default(),
        ));
        let daemon = JobDaemon::new(settings, store, registry, scheduler, supervisor);
        (daemon, due_rx)
    }

    fn one_shot(id: &str, command: &str) -> JobSpec {
        JobSpec::new(id, id, command)
    }

    #[tokio::test]
    async fn create_and_get_job() {
        let dir = tempfile::tempdir().unwrap();
        let (daemon, _rx) = daemon_in(&dir).await;

        let created = daemon.create_job(one_shot("j1", "echo hi")).await.unwrap();
        assert_eq!(created.status, JobStatus::Created);

        let fetched = daemon.get_job(&JobId::from("j1")).unwrap();
        assert_eq!(fetched.command, "echo hi");
    }

    #[tokio::test]
    async fn duplicate_job_id_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let (daemon, _rx) = daemon_in(&dir).await;

        daemon.create_job(one_shot("j1", "echo hi")).await.unwrap();
        let err = daemon.create_job(one_shot("j1", "echo again")).await.unwrap_err();
        assert!(matches!(err, Error::AlreadyExists(_)));
    }

    #[tokio::test]
    async fn recurring_job_is_scheduled_on_create() {
        let dir = tempfile::tempdir().unwrap();
        let (daemon, _rx) = daemon_in(&dir).await;

        let mut spec = one_shot("tick", "true");
        spec.schedule = Schedule::Interval(60_000);
        let created = daemon.create_job(spec).await.unwrap();

        assert_eq!(created.status, JobStatus::Scheduled);
        assert!(created.next_run.is_some());
    }

    #[tokio::test]
    async fn dangerous_command_refused_by_default() {
        let dir = tempfile::tempdir().unwrap();
        let (daemon, _rx) = daemon_in(&dir).await;
        let err = daemon
            .create_job(one_shot("bad", "rm -rf /"))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Forbidden(_)));
    }

    #[tokio::test]
    async fn trigger_waits_and_returns_output() {
        let dir = tempfile::tempdir().unwrap();
        let (daemon, _rx) = daemon_in(&dir).await;

        daemon.create_job(one_shot("j1", "echo hi")).await.unwrap();
        let result = daemon.trigger_job(&JobId::from("j1")).await.unwrap();
        assert_eq!(result.exit_code, Some(0));
        assert!(result.output.starts_with("hi"));

        let history = daemon.get_history(Some(&JobId::from("j1")), 10);
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].status, ExecutionStatus::Completed);
    }

    #[tokio::test]
    async fn trigger_rejects_concurrent_run() {
        let dir = tempfile::tempdir().unwrap();
        let (daemon, _rx) = daemon_in(&dir).await;

        daemon.create_job(one_shot("slow", "sleep 5")).await.unwrap();
        let long = Arc::clone(&daemon);
        let handle =
            tokio::spawn(async move { long.trigger_job(&JobId::from("slow")).await });
        tokio::time::sleep(Duration::from_millis(200)).await;

        let err = daemon.trigger_job(&JobId::from("slow")).await.unwrap_err();
        assert!(matches!(err, Error::AlreadyExists(_)));

        daemon
            .stop_job(&JobId::from("slow"), None)
            .await
            .unwrap();
        let _ = handle.await.unwrap();
    }

    #[tokio::test]
    async fn stop_kills_live_execution() {
        let dir = tempfile::tempdir().unwrap();
        let (daemon, _rx) = daemon_in(&dir).await;

        daemon.create_job(one_shot("sleeper", "sleep 60")).await.unwrap();
        let runner = Arc::clone(&daemon);
        let handle =
            tokio::spawn(async move { runner.trigger_job(&JobId::from("sleeper")).await });
        tokio::time::sleep(Duration::from_millis(200)).await;

        let stopped = daemon
            .stop_job(&JobId::from("sleeper"), Some("SIGTERM".into()))
            .await
            .unwrap();
        assert_eq!(stopped.status, JobStatus::Stopped);
        let _ = handle.await.unwrap();

        let history = daemon.get_history(Some(&JobId::from("sleeper")), 1);
        assert_eq!(history[0].status, ExecutionStatus::Killed);
        assert_eq!(history[0].signal.as_deref(), Some("SIGTERM"));
    }

    #[tokio::test]
    async fn pause_and_resume_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let (daemon, _rx) = daemon_in(&dir).await;

        let mut spec = one_shot("tick", "true");
        spec.schedule = Schedule::Interval(60_000);
        daemon.create_job(spec).await.unwrap();

        let paused = daemon.pause_job(&JobId::from("tick")).await.unwrap();
        assert_eq!(paused.status, JobStatus::Paused);
        assert!(paused.next_run.is_none());

        let resumed = daemon.resume_job(&JobId::from("tick")).await.unwrap();
        assert_eq!(resumed.status, JobStatus::Scheduled);
        assert!(resumed.next_run.is_some());

        // Resuming a non-paused job is invalid.
        assert!(daemon.resume_job(&JobId::from("tick")).await.is_err());
    }

    #[tokio::test]
    async fn remove_requires_force_for_live_execution() {
        let dir = tempfile::tempdir().unwrap();
        let (daemon, _rx) = daemon_in(&dir).await;

        daemon.create_job(one_shot("sleeper", "sleep 60")).await.unwrap();
        let runner = Arc::clone(&daemon);
        let handle =
            tokio::spawn(async move { runner.trigger_job(&JobId::from("sleeper")).await });
        tokio::time::sleep(Duration::from_millis(200)).await;

        let err = daemon.remove_job(&JobId::from("sleeper"), false).await.unwrap_err();
        assert!(matches!(err, Error::InvalidInput(_)));

        daemon.remove_job(&JobId::from("sleeper"), true).await.unwrap();
        assert!(daemon.get_job(&JobId::from("sleeper")).is_err());
        let _ = handle.await.unwrap();
    }

    #[tokio::test]
    async fn list_jobs_filters() {
        let dir = tempfile::tempdir().unwrap();
        let (daemon, _rx) = daemon_in(&dir).await;

        let mut tagged = one_shot("a", "true");
        tagged.tags = vec!["web".into()];
        daemon.create_job(tagged).await.unwrap();
        daemon.create_job(one_shot("b", "true")).await.unwrap();

        assert_eq!(daemon.list_jobs(None).len(), 2);
        let filtered = daemon.list_jobs(Some(&JobFilter {
            tag: Some("web".into()),
            ..Default::default()
        }));
        assert_eq!(filtered.len(), 1);
        assert_eq!(filtered[0].id, JobId::from("a"));
    }

    #[tokio::test]
    async fn jobs_reload_after_restart() {
        let dir = tempfile::tempdir().unwrap();
        {
            let (daemon, _rx) = daemon_in(&dir).await;
            let mut spec = one_shot("tick", "true");
            spec.schedule = Schedule::Interval(60_000);
            daemon.create_job(spec).await.unwrap();
        }

        let (daemon, _rx) = daemon_in(&dir).await;
        assert_eq!(daemon.load_jobs().await.unwrap(), 1);
        let spec = daemon.get_job(&JobId::from("tick")).unwrap();
        assert_eq!(spec.status, JobStatus::Scheduled);
    }

    #[tokio::test]
    async fn interval_job_executes_repeatedly() {
        let dir = tempfile::tempdir().unwrap();
        let (daemon, due_rx) = daemon_in(&dir).await;

        let driver = Arc::clone(&daemon);
        tokio::spawn(driver.run(due_rx));

        let mut spec = one_shot("fast", "echo hi");
        spec.schedule = Schedule::Interval(100);
        daemon.create_job(spec).await.unwrap();

        let deadline = Instant::now() + Duration::from_secs(5);
        loop {
            let history = daemon.get_history(Some(&JobId::from("fast")), 10);
            let completed = history
                .iter()
                .filter(|r| r.status == ExecutionStatus::Completed)
                .count();
            if completed >= 3 {
                for record in history
                    .iter()
                    .filter(|r| r.status == ExecutionStatus::Completed)
                {
                    assert_eq!(record.exit_code, Some(0));
                    assert!(record.stdout.starts_with("hi"));
                }
                break;
            }
            assert!(Instant::now() < deadline, "expected 3 completions in time");
            tokio::time::sleep(Duration::from_millis(25)).await;
        }
        daemon.begin_shutdown(false);
    }

    #[tokio::test]
    async fn shutdown_rejects_new_work() {
        let dir = tempfile::tempdir().unwrap();
        let (daemon, _rx) = daemon_in(&dir).await;

        daemon.begin_shutdown(false);
        let err = daemon.create_job(one_shot("late", "true")).await.unwrap_err();
        assert!(matches!(err, Error::ServiceShutdown));
        assert!(daemon.is_shutting_down());
    }

    #[tokio::test]
    async fn registry_snapshot_lands_on_disk() {
        let dir = tempfile::tempdir().unwrap();
        let (daemon, _rx) = daemon_in(&dir).await;
        daemon.create_job(one_shot("snap", "true")).await.unwrap();

        daemon.write_registry_snapshot();
        let path = dir.path().join(".lsh").join("registry.json");
        let snapshot: serde_json::Value =
            serde_json::from_slice(&std::fs::read(path).unwrap()).unwrap();
        assert_eq!(snapshot["jobs"].as_array().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn status_reports_counts() {
        let dir = tempfile::tempdir().unwrap();
        let (daemon, _rx) = daemon_in(&dir).await;
        daemon.create_job(one_shot("j1", "true")).await.unwrap();

        let status = daemon.status();
        assert_eq!(status.jobs_total, 1);
        assert_eq!(status.jobs_running, 0);
        assert_eq!(status.version, lsh_core::VERSION);
    }
}
