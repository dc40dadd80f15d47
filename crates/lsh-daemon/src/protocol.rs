//! IPC protocol between the `lsh` CLI and `lshd`.
//!
//! Wire format: 4-byte big-endian length prefix + UTF-8 JSON payload.
//! Each request carries `{id, op, args}`; each response `{id, ok,
//! value|error}`. No server-initiated pushes; long-running operations
//! return immediately and are polled via history/statistics queries.

use serde::{de::DeserializeOwned, Deserialize, Serialize};
use thiserror::Error;

use lsh_core::{JobId, JobSpec, JobStatus};

/// Maximum frame size (16 MB). Captured output is bounded upstream, so
/// anything larger is a protocol violation.
pub const MAX_FRAME_SIZE: usize = 16 * 1024 * 1024;

/// Default per-call IPC timeout.
pub const DEFAULT_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(30);

/// Framing and codec errors.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("frame too large: {size} bytes (max {max})")]
    FrameTooLarge { size: usize, max: usize },

    #[error("connection closed")]
    ConnectionClosed,

    #[error("timeout")]
    Timeout,
}

/// Optional filter for `listJobs`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobFilter {
    pub status: Option<JobStatus>,
    pub tag: Option<String>,
    pub name_contains: Option<String>,
}

/// Control-plane operations.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "op", content = "args", rename_all = "camelCase")]
pub enum Op {
    GetStatus,
    ListJobs {
        #[serde(default)]
        filter: Option<JobFilter>,
    },
    GetJob {
        id: JobId,
    },
    CreateJob {
        spec: JobSpec,
    },
    StartJob {
        id: JobId,
    },
    StopJob {
        id: JobId,
        #[serde(default)]
        signal: Option<String>,
    },
    /// Immediate execution; waits for completion and returns
    /// `{exitCode, output}`.
    TriggerJob {
        id: JobId,
    },
    RemoveJob {
        id: JobId,
        #[serde(default)]
        force: bool,
    },
    PauseJob {
        id: JobId,
    },
    ResumeJob {
        id: JobId,
    },
    GetJobHistory {
        #[serde(default)]
        job_id: Option<JobId>,
        #[serde(default)]
        limit: Option<usize>,
    },
    GetJobStatistics {
        #[serde(default)]
        job_id: Option<JobId>,
    },
    StopDaemon,
    RestartDaemon,
}

/// A request frame.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Request {
    pub id: String,
    #[serde(flatten)]
    pub op: Op,
}

/// Machine-readable error body.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorBody {
    pub code: String,
    pub message: String,
}

/// A response frame.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Response {
    pub id: String,
    pub ok: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorBody>,
}

impl Response {
    pub fn success(id: &str, value: serde_json::Value) -> Self {
        Response {
            id: id.to_string(),
            ok: true,
            value: Some(value),
            error: None,
        }
    }

    pub fn failure(id: &str, error: &lsh_core::Error) -> Self {
        Response {
            id: id.to_string(),
            ok: false,
            value: None,
            error: Some(ErrorBody {
                code: error.code().to_string(),
                message: error.to_string(),
            }),
        }
    }
}

/// Encode a message to JSON bytes (the length prefix is added by
/// [`write_frame`]).
pub fn encode<T: Serialize>(message: &T) -> Result<Vec<u8>, ProtocolError> {
    let json = serde_json::to_vec(message)?;
    if json.len() > MAX_FRAME_SIZE {
        return Err(ProtocolError::FrameTooLarge {
            size: json.len(),
            max: MAX_FRAME_SIZE,
        });
    }
    Ok(json)
}

/// Decode a message from its JSON bytes.
pub fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, ProtocolError> {
    Ok(serde_json::from_slice(bytes)?)
}

/// Read one length-prefixed frame.
pub async fn read_frame<R: tokio::io::AsyncReadExt + Unpin>(
    reader: &mut R,
) -> Result<Vec<u8>, ProtocolError> {
    let mut len_buf = [0u8; 4];
    match reader.read_exact(&mut len_buf).await {
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
            return Err(ProtocolError::ConnectionClosed);
        }
        Err(e) => return Err(ProtocolError::Io(e)),
    }
    let len = u32::from_be_bytes(len_buf) as usize;
    if len > MAX_FRAME_SIZE {
        return Err(ProtocolError::FrameTooLarge {
            size: len,
            max: MAX_FRAME_SIZE,
        });
    }

    let mut buf = vec![0u8; len];
    reader.read_exact(&mut buf).await?;
    Ok(buf)
}

/// Write one length-prefixed frame.
pub async fn write_frame<W: tokio::io::AsyncWriteExt + Unpin>(
    writer: &mut W,
    data: &[u8],
) -> Result<(), ProtocolError> {
    if data.len() > MAX_FRAME_SIZE {
        return Err(ProtocolError::FrameTooLarge {
            size: data.len(),
            max: MAX_FRAME_SIZE,
        });
    }
    writer.write_all(&(data.len() as u32).to_be_bytes()).await?;
    writer.write_all(data).await?;
    writer.flush().await?;
    Ok(())
}
