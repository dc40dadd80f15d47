//! Storage error types.

use std::path::PathBuf;

/// Errors from storage backends.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("store at {path} is locked by pid {pid}")]
    Locked { path: PathBuf, pid: u32 },

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("database connection failed: {0}")]
    Connection(String),

    #[error("database error: {0}")]
    Database(#[from] surrealdb::Error),

    #[error("schema setup failed: {0}")]
    SchemaSetup(String),
}

/// Result type for storage operations.
pub type StorageResult<T> = std::result::Result<T, StorageError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn locked_error_names_path_and_pid() {
        let err = StorageError::Locked {
            path: PathBuf::from("/home/u/.lsh/storage.json"),
            pid: 4242,
        };
        let msg = err.to_string();
        assert!(msg.contains("storage.json"));
        assert!(msg.contains("4242"));
    }
}
