//! IPC client: connects to the per-user daemon socket and issues one
//! request per call.

use std::path::PathBuf;

use tokio::net::UnixStream;

use lsh_core::{Error, Result};
use lsh_daemon::protocol::{self, Op, Request, Response};

/// Client over the daemon's unix socket.
pub struct DaemonClient {
    socket_path: PathBuf,
}

impl DaemonClient {
    pub fn new(socket_path: PathBuf) -> Self {
        DaemonClient { socket_path }
    }

    /// Issue one operation; maps connection failures to
    /// `DaemonUnavailable` so the CLI can exit with code 3.
    pub async fn call(&self, op: Op) -> Result<serde_json::Value> {
        let mut stream = UnixStream::connect(&self.socket_path).await.map_err(|e| {
            Error::DaemonUnavailable(format!(
                "cannot connect to {}: {e}",
                self.socket_path.display()
            ))
        })?;

        let request = Request {
            id: uuid::Uuid::new_v4().to_string(),
            op,
        };
        let bytes = protocol::encode(&request)
            .map_err(|e| Error::InvalidInput(format!("cannot encode request: {e}")))?;
        protocol::write_frame(&mut stream, &bytes)
            .await
            .map_err(|e| Error::DaemonUnavailable(format!("write failed: {e}")))?;

        let frame = tokio::time::timeout(protocol::DEFAULT_TIMEOUT, protocol::read_frame(&mut stream))
            .await
            .map_err(|_| Error::DaemonUnavailable("daemon did not answer in time".into()))?
            .map_err(|e| Error::DaemonUnavailable(format!("read failed: {e}")))?;
        let response: Response = protocol::decode(&frame)
            .map_err(|e| Error::DaemonUnavailable(format!("undecodable response: {e}")))?;

        if response.ok {
            Ok(response.value.unwrap_or(serde_json::Value::Null))
        } else {
            let body = response.error.unwrap_or(lsh_daemon::protocol::ErrorBody {
                code: "STORAGE_FAILURE".to_string(),
                message: "daemon returned an empty error".to_string(),
            });
            Err(error_from_code(&body.code, body.message))
        }
    }
}

/// Rehydrate a daemon error from its stable code.
fn error_from_code(code: &str, message: String) -> Error {
    match code {
        "NOT_FOUND" => Error::NotFound(message),
        "ALREADY_EXISTS" => Error::AlreadyExists(message),
        "INVALID_INPUT" => Error::InvalidInput(message),
        "UNAUTHORIZED" => Error::Unauthorized,
        "FORBIDDEN" => Error::Forbidden(message),
        "TIER_LIMIT_EXCEEDED" => Error::TierLimitExceeded(message),
        "DAEMON_UNAVAILABLE" => Error::DaemonUnavailable(message),
        "ENCRYPTION_FAILURE" => Error::EncryptionFailure(message),
        "DECRYPTION_FAILURE" => Error::DecryptionFailure(message),
        "NETWORK_UNAVAILABLE" => Error::NetworkUnavailable(message),
        "SERVICE_SHUTDOWN" => Error::ServiceShutdown,
        _ => Error::StorageFailure(message),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn missing_socket_is_daemon_unavailable() {
        let dir = tempfile::tempdir().unwrap();
        let client = DaemonClient::new(dir.path().join("no-such.sock"));
        let err = client.call(Op::GetStatus).await.unwrap_err();
        assert!(matches!(err, Error::DaemonUnavailable(_)));
        assert_eq!(err.exit_code(), 3);
    }

    #[test]
    fn error_codes_rehydrate() {
        assert!(matches!(
            error_from_code("NOT_FOUND", "x".into()),
            Error::NotFound(_)
        ));
        assert!(matches!(
            error_from_code("SERVICE_SHUTDOWN", String::new()),
            Error::ServiceShutdown
        ));
        assert!(matches!(
            error_from_code("SOMETHING_ELSE", "x".into()),
            Error::StorageFailure(_)
        ));
    }
}
