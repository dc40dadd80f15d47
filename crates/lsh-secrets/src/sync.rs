//! The secret-sync engine: encrypt-then-upload pushes, cache-first
//! pulls with daemon and gateway fallback.
//!
//! Per (repo, environment) pair operations are serialized: overlapping
//! pushes and pulls queue on a keyed mutex in arrival order. A push
//! that reaches the cache but not the network is a partial success —
//! the bundle stays usable locally and is marked "not yet on network".

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::cache::BundleCache;
use crate::cid::local_cid;
use crate::crypto::{decrypt_bundle, encrypt_bundle, Secret};
use crate::error::{Result, SecretsError};
use crate::history::{SyncHistory, SyncHistoryEntry};
use crate::ipfs::{IpfsClient, IpfsConfig};
use crate::metadata::{entry_key, MetadataIndex, SecretBundleMetadata};

/// Result of a push.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PushOutcome {
    pub cid: String,
    /// `false` means the daemon was unreachable and only the local
    /// cache holds the bundle.
    pub uploaded: bool,
    pub keys_count: usize,
}

/// Scope of one push or pull.
#[derive(Debug, Clone, Default)]
pub struct SyncScope {
    pub environment: String,
    pub git_repo: Option<String>,
    pub git_branch: Option<String>,
}

impl SyncScope {
    pub fn env(environment: impl Into<String>) -> Self {
        SyncScope {
            environment: environment.into(),
            git_repo: None,
            git_branch: None,
        }
    }

    fn key(&self) -> String {
        entry_key(self.git_repo.as_deref(), &self.environment)
    }
}

/// The sync engine. One instance per daemon or CLI invocation.
pub struct SecretSync {
    cache: BundleCache,
    index: MetadataIndex,
    history: SyncHistory,
    ipfs: IpfsClient,
    locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl SecretSync {
    /// Open the engine over the standard per-user layout:
    /// `<root>/secrets-cache/`, `<root>/secrets-metadata.json`,
    /// `<root>/sync-history.json`.
    pub fn open(root: impl AsRef<Path>) -> Result<Self> {
        Self::open_with_ipfs(root, IpfsConfig::default())
    }

    pub fn open_with_ipfs(root: impl AsRef<Path>, ipfs: IpfsConfig) -> Result<Self> {
        let root = root.as_ref();
        Ok(SecretSync {
            cache: BundleCache::new(root.join("secrets-cache"))?,
            index: MetadataIndex::new(root.join("secrets-metadata.json")),
            history: SyncHistory::new(root.join("sync-history.json")),
            ipfs: IpfsClient::new(ipfs),
            locks: Mutex::new(HashMap::new()),
        })
    }

    async fn scope_lock(&self, scope: &SyncScope) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock().await;
        Arc::clone(locks.entry(scope.key()).or_default())
    }

    /// Encrypt and store a bundle, uploading when the daemon is up.
    ///
    /// State machine: encrypt, local CID, cache write, daemon upload
    /// (or skip), metadata update, history append. Any failure after
    /// the cache write leaves a usable local copy.
    pub async fn push(
        &self,
        secrets: &[Secret],
        scope: &SyncScope,
        key: &str,
    ) -> Result<PushOutcome> {
        let lock = self.scope_lock(scope).await;
        let _guard = lock.lock().await;

        let envelope = encrypt_bundle(secrets, key)?;
        let ciphertext = envelope.into_bytes();
        let mut cid = local_cid(&ciphertext);
        self.cache.store(&cid, &ciphertext)?;

        let mut uploaded = false;
        if self.ipfs.daemon_available().await {
            match self.ipfs.add(ciphertext.clone()).await {
                Ok(server_cid) => {
                    if server_cid != cid {
                        // Keep the cache keyed by the authoritative CID
                        // as well, so every persisted CID resolves
                        // locally.
                        self.cache.store(&server_cid, &ciphertext)?;
                        cid = server_cid;
                    }
                    uploaded = true;
                }
                Err(e) => {
                    warn!(error = %e, "daemon upload failed; bundle kept local only");
                }
            }
        } else {
            debug!("ipfs daemon unreachable; bundle not yet on network");
        }

        self.index.upsert(SecretBundleMetadata {
            environment: scope.environment.clone(),
            git_repo: scope.git_repo.clone(),
            git_branch: scope.git_branch.clone(),
            cid: cid.clone(),
            timestamp: Utc::now(),
            keys_count: secrets.len(),
            encrypted: true,
        })?;
        self.history.append(SyncHistoryEntry {
            cid: cid.clone(),
            filename: format!("secrets-{}.json.encrypted", scope.environment),
            timestamp: Utc::now(),
            size: self.cache.load(&cid)?.map(|b| b.len()).unwrap_or(0),
            environment: Some(scope.environment.clone()),
            git_repo: scope.git_repo.clone(),
        })?;

        info!(cid = %cid, environment = %scope.environment, uploaded, "bundle pushed");
        Ok(PushOutcome {
            cid,
            uploaded,
            keys_count: secrets.len(),
        })
    }

    /// Fetch and decrypt the latest bundle for the scope.
    ///
    /// Download order: local cache, local daemon, public gateways. The
    /// payload is written through to the cache before it is returned.
    pub async fn pull(&self, scope: &SyncScope, key: &str) -> Result<Vec<Secret>> {
        let lock = self.scope_lock(scope).await;
        let _guard = lock.lock().await;

        let cid = match self.index.get(scope.git_repo.as_deref(), &scope.environment) {
            Some(metadata) => metadata.cid,
            // A missing metadata entry is recoverable via history.
            None => self
                .history
                .find_latest(scope.git_repo.as_deref(), &scope.environment)
                .map(|e| e.cid)
                .ok_or_else(|| SecretsError::NotFound(scope.key()))?,
        };

        let ciphertext = self.retrieve(&cid).await?;
        let envelope = String::from_utf8(ciphertext)
            .map_err(|_| SecretsError::InvalidEnvelope("bundle is not UTF-8".into()))?;
        decrypt_bundle(&envelope, key)
    }

    async fn retrieve(&self, cid: &str) -> Result<Vec<u8>> {
        if let Some(bytes) = self.cache.load(cid)? {
            debug!(cid, "bundle served from local cache");
            return Ok(bytes);
        }

        if self.ipfs.daemon_available().await {
            match self.ipfs.cat(cid).await {
                Ok(bytes) => {
                    self.cache.store(cid, &bytes)?;
                    return Ok(bytes);
                }
                Err(e) => warn!(cid, error = %e, "daemon cat failed; trying gateways"),
            }
        }

        let bytes = self.ipfs.fetch_from_gateways(cid).await?;
        self.cache.store(cid, &bytes)?;
        Ok(bytes)
    }

    /// All known bundle metadata entries.
    pub fn list(&self) -> Vec<SecretBundleMetadata> {
        self.index.all()
    }

    /// Full sync history, oldest first.
    pub fn history(&self) -> Vec<SyncHistoryEntry> {
        self.history.entries()
    }

    /// Explicit local delete of a metadata entry.
    pub fn forget(&self, scope: &SyncScope) -> Result<bool> {
        self.index
            .remove(scope.git_repo.as_deref(), &scope.environment)
    }
}
