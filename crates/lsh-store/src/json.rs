//! Local JSON-file storage backend.
//!
//! A single JSON document per user holds all collections. The document
//! is loaded once at open; mutations mark it dirty and are flushed
//! either immediately (the default) or by a periodic tick. Writes are
//! whole-file replacements via write-to-temp + rename. A pid-based
//! advisory lock file prevents a second process from opening the same
//! store for write.

use std::collections::{BTreeMap, HashMap};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::error::{StorageError, StorageResult};
use crate::{Collection, Row, StorageBackend};

/// When mutations reach disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FlushMode {
    /// Every mutation flushes before returning.
    #[default]
    Immediate,
    /// Mutations only mark the document dirty; an external tick (see
    /// [`JsonFileStore::start_periodic_flush`]) writes it out.
    Deferred,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct Document {
    collections: HashMap<Collection, BTreeMap<String, Row>>,
}

#[derive(Debug)]
struct DocState {
    doc: Document,
    dirty: bool,
}

/// Single-writer JSON document store.
#[derive(Debug)]
pub struct JsonFileStore {
    path: PathBuf,
    lock_path: PathBuf,
    flush_mode: FlushMode,
    state: Mutex<DocState>,
}

impl JsonFileStore {
    /// Open (or create) the store at `path`, acquiring the advisory
    /// lock. A malformed on-disk document is treated as empty with a
    /// logged warning; it is not auto-repaired.
    pub fn open(path: impl AsRef<Path>) -> StorageResult<Self> {
        Self::open_with_mode(path, FlushMode::Immediate)
    }

    pub fn open_with_mode(path: impl AsRef<Path>, flush_mode: FlushMode) -> StorageResult<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let lock_path = path.with_extension("lock");
        acquire_lock(&path, &lock_path)?;

        let doc = match std::fs::read(&path) {
            Ok(bytes) => match serde_json::from_slice::<Document>(&bytes) {
                Ok(doc) => doc,
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "malformed store document; starting empty");
                    Document::default()
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Document::default(),
            Err(e) => return Err(e.into()),
        };

        debug!(path = %path.display(), "json store opened");
        Ok(JsonFileStore {
            path,
            lock_path,
            flush_mode,
            state: Mutex::new(DocState { doc, dirty: false }),
        })
    }

    /// Spawn a task flushing the document every `interval` while dirty.
    pub fn start_periodic_flush(
        self: &Arc<Self>,
        interval: Duration,
    ) -> tokio::task::JoinHandle<()> {
        let store = Arc::clone(self);
        tokio::spawn(async move {
            let mut tick = tokio::time::interval(interval);
            tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                tick.tick().await;
                if let Err(e) = store.flush().await {
                    warn!(error = %e, "periodic store flush failed");
                }
            }
        })
    }

    async fn flush_locked(&self, state: &mut DocState) -> StorageResult<()> {
        if !state.dirty {
            return Ok(());
        }
        let bytes = serde_json::to_vec_pretty(&state.doc)?;

        // Atomic write: temp file in the same directory, then rename.
        let dir = self.path.parent().unwrap_or_else(|| Path::new("."));
        let mut tmp = NamedTempFile::new_in(dir)?;
        tmp.write_all(&bytes)?;
        tmp.persist(&self.path).map_err(|e| e.error)?;

        state.dirty = false;
        Ok(())
    }
}

impl Drop for JsonFileStore {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.lock_path);
    }
}

/// Refuse to open when another live process holds the lock; reclaim a
/// lock left behind by a dead one.
fn acquire_lock(store_path: &Path, lock_path: &Path) -> StorageResult<()> {
    if let Ok(contents) = std::fs::read_to_string(lock_path) {
        if let Ok(pid) = contents.trim().parse::<u32>() {
            if pid != std::process::id() && process_alive(pid) {
                return Err(StorageError::Locked {
                    path: store_path.to_path_buf(),
                    pid,
                });
            }
            debug!(pid, "reclaiming stale store lock");
        }
    }
    std::fs::write(lock_path, std::process::id().to_string())?;
    Ok(())
}

#[cfg(target_os = "linux")]
fn process_alive(pid: u32) -> bool {
    Path::new(&format!("/proc/{pid}")).exists()
}

#[cfg(not(target_os = "linux"))]
fn process_alive(_pid: u32) -> bool {
    // Without /proc we cannot tell; err on the side of refusing.
    true
}

#[async_trait]
impl StorageBackend for JsonFileStore {
    async fn upsert(
        &self,
        collection: Collection,
        id: &str,
        value: serde_json::Value,
    ) -> StorageResult<()> {
        let mut state = self.state.lock().await;
        let now = Utc::now();
        let rows = state.doc.collections.entry(collection).or_default();
        match rows.get_mut(id) {
            Some(row) => {
                row.value = value;
                row.updated_at = now;
            }
            None => {
                rows.insert(
                    id.to_string(),
                    Row {
                        id: id.to_string(),
                        value,
                        inserted_at: now,
                        updated_at: now,
                    },
                );
            }
        }
        state.dirty = true;
        if self.flush_mode == FlushMode::Immediate {
            self.flush_locked(&mut state).await?;
        }
        Ok(())
    }

    async fn read(&self, collection: Collection, id: &str) -> StorageResult<Option<Row>> {
        let state = self.state.lock().await;
        Ok(state
            .doc
            .collections
            .get(&collection)
            .and_then(|rows| rows.get(id))
            .cloned())
    }

    async fn delete(&self, collection: Collection, id: &str) -> StorageResult<bool> {
        let mut state = self.state.lock().await;
        let existed = state
            .doc
            .collections
            .get_mut(&collection)
            .is_some_and(|rows| rows.remove(id).is_some());
        if existed {
            state.dirty = true;
            if self.flush_mode == FlushMode::Immediate {
                self.flush_locked(&mut state).await?;
            }
        }
        Ok(existed)
    }

    async fn read_all(&self, collection: Collection) -> StorageResult<Vec<Row>> {
        let state = self.state.lock().await;
        let mut rows: Vec<Row> = state
            .doc
            .collections
            .get(&collection)
            .map(|rows| rows.values().cloned().collect())
            .unwrap_or_default();
        rows.sort_by(|a, b| a.inserted_at.cmp(&b.inserted_at).then_with(|| a.id.cmp(&b.id)));
        Ok(rows)
    }

    async fn list_recent(&self, collection: Collection, limit: usize) -> StorageResult<Vec<Row>> {
        let mut rows = self.read_all(collection).await?;
        rows.reverse();
        rows.truncate(limit);
        Ok(rows)
    }

    async fn flush(&self) -> StorageResult<()> {
        let mut state = self.state.lock().await;
        self.flush_locked(&mut state).await
    }
}
