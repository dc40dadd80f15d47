//! lsh secret sync
//!
//! Encrypt-then-upload/download pipeline over a content-addressed
//! store: AES-256-CBC bundle envelopes, a local cache, a metadata index
//! per (repo, environment), an append-only sync history, and IPFS
//! daemon/gateway transport.

mod cache;
mod cid;
mod crypto;
mod error;
mod history;
mod ipfs;
mod metadata;
mod sync;

pub use cache::BundleCache;
pub use cid::local_cid;
pub use crypto::{
    decrypt_bundle, derive_key, encrypt_bundle, Secret, PBKDF2_ITERATIONS, PBKDF2_SALT,
};
pub use error::{Result, SecretsError};
pub use history::{SyncHistory, SyncHistoryEntry};
pub use ipfs::{IpfsClient, IpfsConfig, DEFAULT_API_URL, DEFAULT_GATEWAYS};
pub use metadata::{entry_key, MetadataIndex, SecretBundleMetadata};
pub use sync::{PushOutcome, SecretSync, SyncScope};
