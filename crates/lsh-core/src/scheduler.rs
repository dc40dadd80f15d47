//! Priority-queue scheduler over "next run time".
//!
//! A min-heap keyed by `next_run` plus an id map gives O(log n)
//! insertion and O(1) membership; removal is lazy via generation
//! counters, so stale heap entries are skipped on pop. A single control
//! loop owns the sweep; mutations from other tasks go through one mutex
//! and wake the loop so an earlier `next_run` takes effect immediately.

use std::cmp::{Ordering, Reverse};
use std::collections::{BinaryHeap, HashMap};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering as AtomicOrdering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, Notify};
use tracing::{debug, warn};

use crate::domain::{JobId, JobSpec};
use crate::error::Result;
use crate::schedule::Schedule;

/// Scheduler tuning knobs.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Floor on the sleep between sweeps.
    pub min_check_interval: Duration,
    /// Ceiling on the sleep between sweeps (idle heartbeat).
    pub max_check_interval: Duration,
    /// Jobs within this window of `now` count as due.
    pub due_buffer: Duration,
    /// Capacity of the `JobDue` channel.
    pub channel_capacity: usize,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        SchedulerConfig {
            min_check_interval: Duration::from_millis(100),
            max_check_interval: Duration::from_secs(60),
            due_buffer: Duration::from_millis(50),
            channel_capacity: 64,
        }
    }
}

/// Message emitted for each job whose `next_run` has arrived.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobDue {
    pub job_id: JobId,
    pub scheduled_for: DateTime<Utc>,
}

/// Point-in-time scheduler counters.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SchedulerMetrics {
    pub jobs_scheduled: usize,
    pub sweeps: u64,
    pub jobs_dispatched: u64,
    /// Epoch-ms of the earliest pending entry, if any.
    pub next_run_ms: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct HeapEntry {
    next_run_ms: i64,
    priority: i32,
    job_id: JobId,
    generation: u64,
}

// Sweep order: earliest first, then higher numeric priority (lower
// numeric priority means later), then id.
impl Ord for HeapEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        self.next_run_ms
            .cmp(&other.next_run_ms)
            .then_with(|| other.priority.cmp(&self.priority))
            .then_with(|| self.job_id.cmp(&other.job_id))
    }
}

impl PartialOrd for HeapEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

struct ScheduledJob {
    schedule: Schedule,
    priority: i32,
    generation: u64,
}

#[derive(Default)]
struct Inner {
    heap: BinaryHeap<Reverse<HeapEntry>>,
    jobs: HashMap<JobId, ScheduledJob>,
    next_generation: u64,
}

impl Inner {
    fn push_entry(&mut self, job_id: &JobId, next_run: DateTime<Utc>, priority: i32, generation: u64) {
        self.heap.push(Reverse(HeapEntry {
            next_run_ms: next_run.timestamp_millis(),
            priority,
            job_id: job_id.clone(),
            generation,
        }));
    }

    /// True when the entry still describes a live job.
    fn is_live(&self, entry: &HeapEntry) -> bool {
        self.jobs
            .get(&entry.job_id)
            .is_some_and(|job| job.generation == entry.generation)
    }

    /// Drop stale entries off the top of the heap.
    fn prune_top(&mut self) {
        while let Some(Reverse(top)) = self.heap.peek() {
            if self.is_live(top) {
                break;
            }
            self.heap.pop();
        }
    }
}

/// The scheduling engine. Construct with [`Scheduler::new`], then call
/// [`Scheduler::start`] to spawn the control loop.
pub struct Scheduler {
    config: SchedulerConfig,
    inner: Mutex<Inner>,
    notify: Notify,
    running: AtomicBool,
    sweeps: AtomicU64,
    dispatched: AtomicU64,
    due_tx: mpsc::Sender<JobDue>,
}

impl Scheduler {
    /// Create a scheduler and the receiving end of its `JobDue` channel.
    pub fn new(config: SchedulerConfig) -> (Arc<Self>, mpsc::Receiver<JobDue>) {
        let (due_tx, due_rx) = mpsc::channel(config.channel_capacity);
        let scheduler = Arc::new(Scheduler {
            config,
            inner: Mutex::new(Inner::default()),
            notify: Notify::new(),
            running: AtomicBool::new(false),
            sweeps: AtomicU64::new(0),
            dispatched: AtomicU64::new(0),
            due_tx,
        });
        (scheduler, due_rx)
    }

    /// Register a job. One-shot schedules are accepted but never enter
    /// the heap. Returns the computed `next_run`, if any.
    pub fn add_job(&self, spec: &JobSpec) -> Result<Option<DateTime<Utc>>> {
        spec.schedule.validate()?;

        let now = Utc::now();
        let next = match spec.schedule.next_run(now) {
            Some(next) => next,
            None => {
                if matches!(spec.schedule, Schedule::Cron(_)) {
                    warn!(job_id = %spec.id, "cron expression has no reachable instant");
                }
                self.remove_job(&spec.id);
                return Ok(None);
            }
        };

        {
            let mut inner = self.inner.lock().expect("scheduler mutex poisoned");
            inner.next_generation += 1;
            let generation = inner.next_generation;
            inner.jobs.insert(
                spec.id.clone(),
                ScheduledJob {
                    schedule: spec.schedule.clone(),
                    priority: spec.priority,
                    generation,
                },
            );
            inner.push_entry(&spec.id, next, spec.priority, generation);
        }
        self.notify.notify_one();
        debug!(job_id = %spec.id, next_run = %next, "job scheduled");
        Ok(Some(next))
    }

    /// Drop a job from the heap. Returns whether it was scheduled.
    pub fn remove_job(&self, id: &JobId) -> bool {
        let removed = {
            let mut inner = self.inner.lock().expect("scheduler mutex poisoned");
            inner.jobs.remove(id).is_some()
        };
        if removed {
            self.notify.notify_one();
        }
        removed
    }

    /// Replace a job's schedule and priority; equivalent to remove + add.
    pub fn update_job(&self, spec: &JobSpec) -> Result<Option<DateTime<Utc>>> {
        self.add_job(spec)
    }

    /// Whether a job currently holds a heap entry.
    pub fn contains(&self, id: &JobId) -> bool {
        self.inner
            .lock()
            .expect("scheduler mutex poisoned")
            .jobs
            .contains_key(id)
    }

    /// Number of scheduled jobs.
    pub fn len(&self) -> usize {
        self.inner.lock().expect("scheduler mutex poisoned").jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Jobs due as of now, in sweep order, each rescheduled to its next
    /// instant. The lock is released before the caller sees the result.
    pub fn due_jobs(&self) -> Vec<JobDue> {
        let now_ms = Utc::now().timestamp_millis() + self.config.due_buffer.as_millis() as i64;
        self.collect_due(now_ms)
    }

    fn collect_due(&self, horizon_ms: i64) -> Vec<JobDue> {
        let mut due = Vec::new();
        let mut inner = self.inner.lock().expect("scheduler mutex poisoned");

        loop {
            inner.prune_top();
            match inner.heap.peek() {
                Some(Reverse(top)) if top.next_run_ms <= horizon_ms => {}
                _ => break,
            }
            let Reverse(entry) = inner.heap.pop().expect("peeked entry");

            let scheduled_for = DateTime::from_timestamp_millis(entry.next_run_ms)
                .unwrap_or_else(Utc::now);
            due.push(JobDue {
                job_id: entry.job_id.clone(),
                scheduled_for,
            });

            // Reschedule from the emission instant, not the (possibly
            // late) planned one.
            let job = inner.jobs.get(&entry.job_id).expect("live entry has job");
            match job.schedule.next_run(Utc::now()) {
                Some(next) => {
                    let (priority, generation) = (job.priority, job.generation);
                    inner.push_entry(&entry.job_id, next, priority, generation);
                }
                None => {
                    warn!(job_id = %entry.job_id, "no further run computable; unscheduling");
                    inner.jobs.remove(&entry.job_id);
                }
            }
        }
        due
    }

    /// Register a job with an explicit next run, bypassing schedule
    /// computation. Test-only: lets tie-break tests pin identical
    /// instants.
    #[cfg(test)]
    fn schedule_at(&self, spec: &JobSpec, next_run: DateTime<Utc>) {
        let mut inner = self.inner.lock().expect("scheduler mutex poisoned");
        inner.next_generation += 1;
        let generation = inner.next_generation;
        inner.jobs.insert(
            spec.id.clone(),
            ScheduledJob {
                schedule: spec.schedule.clone(),
                priority: spec.priority,
                generation,
            },
        );
        inner.push_entry(&spec.id, next_run, spec.priority, generation);
    }

    /// Current counters.
    pub fn metrics(&self) -> SchedulerMetrics {
        let next_run_ms = {
            let mut inner = self.inner.lock().expect("scheduler mutex poisoned");
            inner.prune_top();
            inner.heap.peek().map(|Reverse(e)| e.next_run_ms)
        };
        SchedulerMetrics {
            jobs_scheduled: self.len(),
            sweeps: self.sweeps.load(AtomicOrdering::Relaxed),
            jobs_dispatched: self.dispatched.load(AtomicOrdering::Relaxed),
            next_run_ms,
        }
    }

    /// Spawn the control loop. Idempotent: a second call is a no-op.
    pub fn start(self: &Arc<Self>) {
        if self.running.swap(true, AtomicOrdering::SeqCst) {
            return;
        }
        let scheduler = Arc::clone(self);
        tokio::spawn(async move { scheduler.run_loop().await });
    }

    /// Stop the control loop after its current sweep.
    pub fn stop(&self) {
        self.running.store(false, AtomicOrdering::SeqCst);
        self.notify.notify_one();
    }

    async fn run_loop(self: Arc<Self>) {
        debug!("scheduler loop started");
        while self.running.load(AtomicOrdering::SeqCst) {
            self.sweeps.fetch_add(1, AtomicOrdering::Relaxed);

            // Emission happens without holding the heap mutex.
            for due in self.due_jobs() {
                self.dispatched.fetch_add(1, AtomicOrdering::Relaxed);
                if self.due_tx.send(due).await.is_err() {
                    debug!("jobDue receiver dropped; stopping scheduler loop");
                    self.running.store(false, AtomicOrdering::SeqCst);
                    return;
                }
            }

            let sleep_for = self.sleep_duration();
            tokio::select! {
                _ = tokio::time::sleep(sleep_for) => {}
                _ = self.notify.notified() => {}
            }
        }
        debug!("scheduler loop stopped");
    }

    /// `max(min_check, min(max_check, time_until_next))`; the idle
    /// heartbeat when the heap is empty.
    fn sleep_duration(&self) -> Duration {
        let next_run_ms = {
            let mut inner = self.inner.lock().expect("scheduler mutex poisoned");
            inner.prune_top();
            inner.heap.peek().map(|Reverse(e)| e.next_run_ms)
        };
        let Some(next_ms) = next_run_ms else {
            return self.config.max_check_interval;
        };
        let until = (next_ms - Utc::now().timestamp_millis()).max(0) as u64;
        Duration::from_millis(until)
            .min(self.config.max_check_interval)
            .max(self.config.min_check_interval)
    }
}
