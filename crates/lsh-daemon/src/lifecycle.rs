//! Daemon lifecycle: PID file ownership and socket setup.
//!
//! On startup a stale socket file is removed only if the recorded PID
//! file's process is no longer running; a live PID means another daemon
//! owns the socket and startup is refused.

use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

use tokio::net::UnixListener;
use tracing::{debug, info};

use lsh_core::{Error, Result};

/// Exclusive ownership of the daemon PID file; removed on drop.
#[derive(Debug)]
pub struct PidFile {
    path: PathBuf,
}

impl PidFile {
    /// Claim the PID file, refusing if another daemon is alive.
    pub fn acquire(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(pid) = read_pid(&path) {
            if pid != std::process::id() && process_alive(pid) {
                return Err(Error::AlreadyExists(format!(
                    "daemon already running with pid {pid}"
                )));
            }
            debug!(pid, "reclaiming stale pid file");
        }
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| Error::StorageFailure(e.to_string()))?;
        }
        std::fs::write(&path, std::process::id().to_string())
            .map_err(|e| Error::StorageFailure(e.to_string()))?;
        Ok(PidFile { path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for PidFile {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.path);
    }
}

fn read_pid(path: &Path) -> Option<u32> {
    std::fs::read_to_string(path).ok()?.trim().parse().ok()
}

#[cfg(target_os = "linux")]
fn process_alive(pid: u32) -> bool {
    Path::new(&format!("/proc/{pid}")).exists()
}

#[cfg(not(target_os = "linux"))]
fn process_alive(_pid: u32) -> bool {
    true
}

/// Bind the control socket with mode 0600.
///
/// The PID file must already be owned (via [`PidFile::acquire`]) before
/// calling this; any socket file left on disk at that point belongs to
/// a dead daemon and is safe to remove.
pub fn bind_socket(socket_path: &Path) -> Result<UnixListener> {
    if socket_path.exists() {
        info!(path = %socket_path.display(), "removing stale socket");
        std::fs::remove_file(socket_path)
            .map_err(|e| Error::StorageFailure(format!("cannot remove stale socket: {e}")))?;
    }

    let listener = UnixListener::bind(socket_path)
        .map_err(|e| Error::StorageFailure(format!("cannot bind socket: {e}")))?;
    std::fs::set_permissions(socket_path, std::fs::Permissions::from_mode(0o600))
        .map_err(|e| Error::StorageFailure(format!("cannot set socket mode: {e}")))?;
    info!(path = %socket_path.display(), "control socket bound");
    Ok(listener)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pid_file_acquire_and_release() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("daemon.pid");
        {
            let pid_file = PidFile::acquire(&path).unwrap();
            assert_eq!(pid_file.path(), path);
            let pid: u32 = std::fs::read_to_string(&path).unwrap().parse().unwrap();
            assert_eq!(pid, std::process::id());
        }
        assert!(!path.exists());
    }

    #[test]
    fn live_foreign_pid_refuses_startup() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("daemon.pid");
        std::fs::write(&path, "1").unwrap(); // pid 1 is always alive

        match PidFile::acquire(&path) {
            Err(Error::AlreadyExists(message)) => assert!(message.contains("pid 1")),
            other => panic!("expected AlreadyExists, got {other:?}"),
        }
    }

    #[test]
    fn dead_pid_is_reclaimed() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("daemon.pid");
        std::fs::write(&path, "4294967294").unwrap();
        assert!(PidFile::acquire(&path).is_ok());
    }

    #[tokio::test]
    async fn socket_bound_with_owner_only_mode() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("daemon.sock");

        let _listener = bind_socket(&path).unwrap();
        let mode = std::fs::metadata(&path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }

    #[tokio::test]
    async fn stale_socket_file_is_replaced() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("daemon.sock");
        std::fs::write(&path, b"stale").unwrap();

        let _listener = bind_socket(&path).unwrap();
        // A real socket now, not the stale regular file.
        let metadata = std::fs::symlink_metadata(&path).unwrap();
        assert!(!metadata.is_file());
    }
}
