//! Daemon-wide error taxonomy.
//!
//! Every error kind carries a stable machine-readable code, a CLI exit
//! code, and an HTTP status so the IPC server, the HTTP API, and the CLI
//! all map failures the same way.

/// lsh daemon errors.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("already exists: {0}")]
    AlreadyExists(String),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("unauthorized")]
    Unauthorized,

    #[error("forbidden: {0}")]
    Forbidden(String),

    #[error("tier limit exceeded: {0}")]
    TierLimitExceeded(String),

    #[error("daemon unavailable: {0}")]
    DaemonUnavailable(String),

    #[error("storage failure: {0}")]
    StorageFailure(String),

    #[error("encryption failure: {0}")]
    EncryptionFailure(String),

    #[error("decryption failure: {0}")]
    DecryptionFailure(String),

    #[error("network unavailable: {0}")]
    NetworkUnavailable(String),

    #[error("daemon is shutting down")]
    ServiceShutdown,
}

impl Error {
    /// Stable identifier used in IPC and HTTP error bodies.
    pub fn code(&self) -> &'static str {
        match self {
            Error::NotFound(_) => "NOT_FOUND",
            Error::AlreadyExists(_) => "ALREADY_EXISTS",
            Error::InvalidInput(_) => "INVALID_INPUT",
            Error::Unauthorized => "UNAUTHORIZED",
            Error::Forbidden(_) => "FORBIDDEN",
            Error::TierLimitExceeded(_) => "TIER_LIMIT_EXCEEDED",
            Error::DaemonUnavailable(_) => "DAEMON_UNAVAILABLE",
            Error::StorageFailure(_) => "STORAGE_FAILURE",
            Error::EncryptionFailure(_) => "ENCRYPTION_FAILURE",
            Error::DecryptionFailure(_) => "DECRYPTION_FAILURE",
            Error::NetworkUnavailable(_) => "NETWORK_UNAVAILABLE",
            Error::ServiceShutdown => "SERVICE_SHUTDOWN",
        }
    }

    /// Process exit code for the CLI wrapper.
    pub fn exit_code(&self) -> i32 {
        match self {
            Error::InvalidInput(_) => 2,
            Error::DaemonUnavailable(_) => 3,
            Error::Unauthorized => 4,
            Error::Forbidden(_) => 5,
            _ => 1,
        }
    }

    /// HTTP status for the control API.
    pub fn http_status(&self) -> u16 {
        match self {
            Error::InvalidInput(_) => 400,
            Error::Unauthorized => 401,
            Error::TierLimitExceeded(_) => 402,
            Error::Forbidden(_) => 403,
            Error::NotFound(_) => 404,
            Error::AlreadyExists(_) => 409,
            Error::ServiceShutdown => 503,
            Error::DaemonUnavailable(_) => 503,
            _ => 500,
        }
    }
}

impl From<lsh_store::StorageError> for Error {
    fn from(e: lsh_store::StorageError) -> Self {
        Error::StorageFailure(e.to_string())
    }
}

/// Result type for lsh daemon operations.
pub type Result<T> = std::result::Result<T, Error>;
