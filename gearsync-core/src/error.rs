use std::path::PathBuf;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum SyncError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("File not found: {}", path.display())]
    FileNotFound { path: PathBuf },

    #[error("File is empty: {}", path.display())]
    EmptyFile { path: PathBuf },

    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("Unexpected engine reply: {0}")]
    Protocol(String),

    #[error("Unknown registration '{0}'")]
    UnknownRegistration(String),

    #[error("Invalid file pattern: {0}")]
    Pattern(#[from] globset::Error),

    #[error("Watcher error: {0}")]
    Watch(#[from] notify::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Coarse classification used when logging failed actions.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ErrorClass {
    /// The file on disk cannot be submitted (missing, empty, unreadable).
    Precondition,
    /// Talking to the remote engine failed or was rejected.
    Remote,
    /// Local index and remote state disagree.
    Consistency,
    /// Wiring failures that are only fatal during startup.
    Setup,
    Internal,
}

impl SyncError {
    pub fn class(&self) -> ErrorClass {
        match self {
            SyncError::Io(_) | SyncError::FileNotFound { .. } | SyncError::EmptyFile { .. } => {
                ErrorClass::Precondition
            }
            SyncError::Redis(_) | SyncError::Protocol(_) => ErrorClass::Remote,
            SyncError::UnknownRegistration(_) => ErrorClass::Consistency,
            SyncError::Pattern(_) | SyncError::Watch(_) => ErrorClass::Setup,
            SyncError::Internal(_) => ErrorClass::Internal,
        }
    }
}

pub type Result<T> = std::result::Result<T, SyncError>;
