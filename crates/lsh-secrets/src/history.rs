//! Append-only sync history: every successful push and pull.
//!
//! Consulted as a fallback when `pull` is asked for a (repo, env)
//! without a metadata entry.

use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;
use tracing::warn;

use crate::error::Result;

/// One history line.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncHistoryEntry {
    pub cid: String,
    pub filename: String,
    pub timestamp: DateTime<Utc>,
    pub size: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub environment: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub git_repo: Option<String>,
}

/// Append-only JSON array on disk.
pub struct SyncHistory {
    path: PathBuf,
}

impl SyncHistory {
    pub fn new(path: impl AsRef<Path>) -> Self {
        SyncHistory {
            path: path.as_ref().to_path_buf(),
        }
    }

    pub fn entries(&self) -> Vec<SyncHistoryEntry> {
        match std::fs::read(&self.path) {
            Ok(bytes) => serde_json::from_slice(&bytes).unwrap_or_else(|e| {
                warn!(path = %self.path.display(), error = %e, "malformed sync history; starting empty");
                Vec::new()
            }),
            Err(_) => Vec::new(),
        }
    }

    pub fn append(&self, entry: SyncHistoryEntry) -> Result<()> {
        let mut entries = self.entries();
        entries.push(entry);

        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let dir = self.path.parent().unwrap_or_else(|| Path::new("."));
        let mut tmp = NamedTempFile::new_in(dir)?;
        tmp.write_all(&serde_json::to_vec_pretty(&entries)?)?;
        tmp.persist(&self.path).map_err(|e| e.error)?;
        Ok(())
    }

    /// Most recent entry matching the (repo, env) pair.
    pub fn find_latest(
        &self,
        git_repo: Option<&str>,
        environment: &str,
    ) -> Option<SyncHistoryEntry> {
        self.entries()
            .into_iter()
            .rev()
            .find(|e| {
                e.environment.as_deref() == Some(environment)
                    && e.git_repo.as_deref() == git_repo
            })
    }
}
