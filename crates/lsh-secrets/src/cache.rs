//! Local write-through cache of encrypted bundles, keyed by CID.

use std::io::Write;
use std::path::{Path, PathBuf};

use tempfile::NamedTempFile;
use tracing::debug;

use crate::error::Result;

/// Filesystem cache: `<dir>/<cid>.encrypted`.
pub struct BundleCache {
    dir: PathBuf,
}

impl BundleCache {
    pub fn new(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        std::fs::create_dir_all(&dir)?;
        Ok(BundleCache { dir })
    }

    pub fn path(&self, cid: &str) -> PathBuf {
        self.dir.join(format!("{cid}.encrypted"))
    }

    /// Atomic write: temp file in the cache directory, then rename.
    pub fn store(&self, cid: &str, ciphertext: &[u8]) -> Result<()> {
        let path = self.path(cid);
        if path.exists() {
            return Ok(());
        }
        let mut tmp = NamedTempFile::new_in(&self.dir)?;
        tmp.write_all(ciphertext)?;
        tmp.persist(&path).map_err(|e| e.error)?;
        debug!(cid, "bundle cached");
        Ok(())
    }

    /// Cache lookup; a miss is `Ok(None)`, not an error.
    pub fn load(&self, cid: &str) -> Result<Option<Vec<u8>>> {
        match std::fs::read(self.path(cid)) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    pub fn contains(&self, cid: &str) -> bool {
        self.path(cid).exists()
    }
}
