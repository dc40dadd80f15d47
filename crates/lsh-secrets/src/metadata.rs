//! Metadata index: latest bundle per (git repo, environment).

use std::collections::HashMap;
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;
use tracing::warn;

use crate::error::Result;

/// Latest pushed bundle for one (repo, environment) pair.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SecretBundleMetadata {
    pub environment: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub git_repo: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub git_branch: Option<String>,
    pub cid: String,
    pub timestamp: DateTime<Utc>,
    pub keys_count: usize,
    pub encrypted: bool,
}

/// Index key: `"<gitRepo>_<env>"`, or `"<env>"` when no repo is set.
pub fn entry_key(git_repo: Option<&str>, environment: &str) -> String {
    match git_repo {
        Some(repo) => format!("{repo}_{environment}"),
        None => environment.to_string(),
    }
}

/// JSON-file index with atomic full-file replacement.
pub struct MetadataIndex {
    path: PathBuf,
}

impl MetadataIndex {
    pub fn new(path: impl AsRef<Path>) -> Self {
        MetadataIndex {
            path: path.as_ref().to_path_buf(),
        }
    }

    fn load(&self) -> HashMap<String, SecretBundleMetadata> {
        match std::fs::read(&self.path) {
            Ok(bytes) => serde_json::from_slice(&bytes).unwrap_or_else(|e| {
                warn!(path = %self.path.display(), error = %e, "malformed metadata index; starting empty");
                HashMap::new()
            }),
            Err(_) => HashMap::new(),
        }
    }

    fn save(&self, index: &HashMap<String, SecretBundleMetadata>) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let dir = self.path.parent().unwrap_or_else(|| Path::new("."));
        let mut tmp = NamedTempFile::new_in(dir)?;
        tmp.write_all(&serde_json::to_vec_pretty(index)?)?;
        tmp.persist(&self.path).map_err(|e| e.error)?;
        Ok(())
    }

    pub fn get(&self, git_repo: Option<&str>, environment: &str) -> Option<SecretBundleMetadata> {
        self.load().get(&entry_key(git_repo, environment)).cloned()
    }

    /// Replace the entry for the bundle's (repo, env) pair.
    pub fn upsert(&self, metadata: SecretBundleMetadata) -> Result<()> {
        let mut index = self.load();
        let key = entry_key(metadata.git_repo.as_deref(), &metadata.environment);
        index.insert(key, metadata);
        self.save(&index)
    }

    /// Explicit local delete; returns whether the entry existed.
    pub fn remove(&self, git_repo: Option<&str>, environment: &str) -> Result<bool> {
        let mut index = self.load();
        let existed = index.remove(&entry_key(git_repo, environment)).is_some();
        if existed {
            self.save(&index)?;
        }
        Ok(existed)
    }

    /// All entries, sorted by key for stable listings.
    pub fn all(&self) -> Vec<SecretBundleMetadata> {
        let index = self.load();
        let mut keys: Vec<&String> = index.keys().collect();
        keys.sort();
        keys.into_iter().map(|k| index[k].clone()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn meta(env: &str, repo: Option<&str>, cid: &str) -> SecretBundleMetadata {
        SecretBundleMetadata {
            environment: env.to_string(),
            git_repo: repo.map(str::to_string),
            git_branch: None,
            cid: cid.to_string(),
            timestamp: Utc::now(),
            keys_count: 3,
            encrypted: true,
        }
    }

    #[test]
    fn entry_key_shapes() {
        assert_eq!(entry_key(None, "dev"), "dev");
        assert_eq!(entry_key(Some("org/app"), "dev"), "org/app_dev");
    }

    #[test]
    fn upsert_get_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let index = MetadataIndex::new(dir.path().join("secrets-metadata.json"));

        index.upsert(meta("dev", None, "bafkreione")).unwrap();
        let got = index.get(None, "dev").unwrap();
        assert_eq!(got.cid, "bafkreione");
        assert!(got.encrypted);
    }

    #[test]
    fn push_replaces_cid_and_timestamp() {
        let dir = tempfile::tempdir().unwrap();
        let index = MetadataIndex::new(dir.path().join("secrets-metadata.json"));

        index.upsert(meta("dev", Some("org/app"), "bafkreione")).unwrap();
        index.upsert(meta("dev", Some("org/app"), "bafkreitwo")).unwrap();

        assert_eq!(index.get(Some("org/app"), "dev").unwrap().cid, "bafkreitwo");
        assert_eq!(index.all().len(), 1);
    }

    #[test]
    fn repo_scoped_and_bare_env_are_distinct() {
        let dir = tempfile::tempdir().unwrap();
        let index = MetadataIndex::new(dir.path().join("secrets-metadata.json"));

        index.upsert(meta("dev", None, "bafkreibare")).unwrap();
        index.upsert(meta("dev", Some("org/app"), "bafkreirepo")).unwrap();

        assert_eq!(index.get(None, "dev").unwrap().cid, "bafkreibare");
        assert_eq!(index.get(Some("org/app"), "dev").unwrap().cid, "bafkreirepo");
    }

    #[test]
    fn remove_deletes_entry() {
        let dir = tempfile::tempdir().unwrap();
        let index = MetadataIndex::new(dir.path().join("secrets-metadata.json"));

        index.upsert(meta("dev", None, "bafkreione")).unwrap();
        assert!(index.remove(None, "dev").unwrap());
        assert!(index.get(None, "dev").is_none());
        assert!(!index.remove(None, "dev").unwrap());
    }

    #[test]
    fn malformed_index_starts_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("secrets-metadata.json");
        std::fs::write(&path, b"{{{{").unwrap();

        let index = MetadataIndex::new(&path);
        assert!(index.all().is_empty());
    }
}
