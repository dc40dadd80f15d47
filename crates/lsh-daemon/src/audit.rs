//! Audit log for mutating control-plane operations.
//!
//! Writes are append-only JSON lines. A failed write is retried inline
//! with exponential backoff (base 100 ms, cap 2 s, 3 attempts), then
//! parked in a bounded in-memory queue drained every 60 s; queued
//! entries older than 24 h are dropped with a log line.

use std::collections::VecDeque;
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, warn};

/// Inline retry attempts before an entry is queued.
const INLINE_ATTEMPTS: u32 = 3;
/// Backoff base between inline attempts.
const BACKOFF_BASE: Duration = Duration::from_millis(100);
/// Backoff ceiling.
const BACKOFF_CAP: Duration = Duration::from_secs(2);
/// Bounded queue of entries awaiting a successful write.
const MAX_QUEUED: usize = 1000;
/// Queued entries older than this are dropped.
const MAX_QUEUE_AGE: chrono::Duration = chrono::Duration::hours(24);
/// Drain cadence for the retry queue.
const DRAIN_INTERVAL: Duration = Duration::from_secs(60);

/// One audit line.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditEvent {
    pub timestamp: DateTime<Utc>,
    pub actor: String,
    pub action: String,
    pub target: String,
    pub success: bool,
}

impl AuditEvent {
    pub fn new(actor: &str, action: &str, target: &str, success: bool) -> Self {
        AuditEvent {
            timestamp: Utc::now(),
            actor: actor.to_string(),
            action: action.to_string(),
            target: target.to_string(),
            success,
        }
    }
}

/// Buffered audit logger.
pub struct AuditLogger {
    path: PathBuf,
    queue: Mutex<VecDeque<AuditEvent>>,
}

impl AuditLogger {
    /// Create a logger and spawn its drain task.
    pub fn spawn(path: PathBuf) -> Arc<Self> {
        let logger = Arc::new(AuditLogger {
            path,
            queue: Mutex::new(VecDeque::new()),
        });
        let drainer = Arc::clone(&logger);
        tokio::spawn(async move {
            let mut tick = tokio::time::interval(DRAIN_INTERVAL);
            tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                tick.tick().await;
                drainer.drain().await;
            }
        });
        logger
    }

    /// Record one event; never fails the caller.
    pub async fn record(&self, event: AuditEvent) {
        let mut backoff = BACKOFF_BASE;
        for attempt in 1..=INLINE_ATTEMPTS {
            match self.write_line(&event) {
                Ok(()) => return,
                Err(e) => {
                    debug!(attempt, error = %e, "audit write failed");
                    if attempt < INLINE_ATTEMPTS {
                        tokio::time::sleep(backoff).await;
                        backoff = (backoff * 2).min(BACKOFF_CAP);
                    }
                }
            }
        }

        let mut queue = self.queue.lock().await;
        if queue.len() >= MAX_QUEUED {
            warn!("audit queue full; dropping oldest entry");
            queue.pop_front();
        }
        queue.push_back(event);
    }

    /// Retry queued entries; drop the stale ones.
    pub async fn drain(&self) {
        let mut queue = self.queue.lock().await;
        if queue.is_empty() {
            return;
        }
        let cutoff = Utc::now() - MAX_QUEUE_AGE;
        let mut kept = VecDeque::new();
        while let Some(event) = queue.pop_front() {
            if event.timestamp < cutoff {
                warn!(action = %event.action, "dropping audit entry older than 24h");
                continue;
            }
            if self.write_line(&event).is_err() {
                kept.push_back(event);
            }
        }
        *queue = kept;
    }

    /// Entries still waiting for a successful write.
    pub async fn pending(&self) -> usize {
        self.queue.lock().await.len()
    }

    fn write_line(&self, event: &AuditEvent) -> std::io::Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        let line = serde_json::to_string(event)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
        writeln!(file, "{line}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn events_append_as_json_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("audit.log");
        let logger = AuditLogger {
            path: path.clone(),
            queue: Mutex::new(VecDeque::new()),
        };

        logger
            .record(AuditEvent::new("alice", "createJob", "j1", true))
            .await;
        logger
            .record(AuditEvent::new("alice", "removeJob", "j1", true))
            .await;

        let contents = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = contents.lines().collect();
        assert_eq!(lines.len(), 2);
        let event: AuditEvent = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(event.action, "createJob");
        assert_eq!(logger.pending().await, 0);
    }

    #[tokio::test]
    async fn unwritable_path_queues_instead_of_failing() {
        // A directory path cannot be opened for append.
        let dir = tempfile::tempdir().unwrap();
        let logger = AuditLogger {
            path: dir.path().to_path_buf(),
            queue: Mutex::new(VecDeque::new()),
        };

        tokio::time::pause();
        let record = logger.record(AuditEvent::new("alice", "createJob", "j1", true));
        tokio::pin!(record);
        // Drive through the inline backoff sleeps.
        loop {
            tokio::select! {
                _ = &mut record => break,
                _ = tokio::time::advance(Duration::from_millis(100)) => {}
            }
        }
        assert_eq!(logger.pending().await, 1);
    }

    #[tokio::test]
    async fn drain_flushes_once_path_is_writable() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("audit.log");
        let logger = AuditLogger {
            path: path.clone(),
            queue: Mutex::new(VecDeque::new()),
        };

        logger
            .queue
            .lock()
            .await
            .push_back(AuditEvent::new("alice", "stopJob", "j1", true));
        logger.drain().await;

        assert_eq!(logger.pending().await, 0);
        assert!(std::fs::read_to_string(&path).unwrap().contains("stopJob"));
    }

    #[tokio::test]
    async fn drain_drops_entries_past_max_age() {
        let dir = tempfile::tempdir().unwrap();
        let logger = AuditLogger {
            path: dir.path().join("audit.log"),
            queue: Mutex::new(VecDeque::new()),
        };

        let mut stale = AuditEvent::new("alice", "createJob", "j1", true);
        stale.timestamp = Utc::now() - chrono::Duration::hours(25);
        logger.queue.lock().await.push_back(stale);
        logger.drain().await;

        assert_eq!(logger.pending().await, 0);
        // Nothing was written for the stale entry.
        assert!(!dir.path().join("audit.log").exists());
    }
}
