//! Secret-sync error types.
//!
//! Decryption failures deliberately carry a fixed hint instead of any
//! detail derived from the key or ciphertext.

/// Errors from the secret bundle encryptor and sync engine.
#[derive(Debug, thiserror::Error)]
pub enum SecretsError {
    #[error("invalid key: {0}")]
    InvalidKey(String),

    #[error("invalid envelope: {0}")]
    InvalidEnvelope(String),

    #[error(
        "decryption failed: wrong key, corrupted ciphertext, or a bundle \
         from a different salt/iteration version"
    )]
    DecryptFailed,

    #[error("malformed payload: {0}")]
    MalformedPayload(String),

    #[error("no bundle found for {0}")]
    NotFound(String),

    #[error("network unavailable: {0}")]
    NetworkUnavailable(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Result type for secret-sync operations.
pub type Result<T> = std::result::Result<T, SecretsError>;
