//! Core error types

use thiserror::Error;

/// Kind of remote object an operation was looking for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoteObject {
    /// A stream spec
    Stream,
    /// A depot file
    File,
    /// A pending or submitted changelist
    Changelist,
}

impl std::fmt::Display for RemoteObject {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RemoteObject::Stream => write!(f, "stream"),
            RemoteObject::File => write!(f, "file"),
            RemoteObject::Changelist => write!(f, "changelist"),
        }
    }
}

/// Core error type for streamkeeper
#[derive(Debug, Error)]
pub enum Error {
    /// Operation attempted without an active server session
    #[error("Not connected to the depot server")]
    NotConnected,

    /// Stream, file or changelist absent on the server
    #[error("Remote {kind} not found: {path}")]
    RemoteObjectNotFound { kind: RemoteObject, path: String },

    /// Open, reopen, save or submit rejected by the server
    #[error("Remote write rejected: {0}")]
    RemoteWriteConflict(String),

    /// Snapshot content could not be deserialized
    #[error("Malformed snapshot: {0}")]
    MalformedSnapshot(String),

    /// A depot path could not be mapped to a local workspace path
    #[error("Cannot resolve workspace path for {depot_path}: {reason}")]
    PathResolutionFailure { depot_path: String, reason: String },

    /// Stream is not part of the loaded hierarchy
    #[error("Stream not in hierarchy: {0}")]
    StreamNotFound(String),

    /// Structural edit would break the tree
    #[error("Invalid hierarchy edit: {0}")]
    InvalidHierarchy(String),

    /// Another publish for the same hierarchy root has not finished
    #[error("Publish already in progress for {0}")]
    PublishInProgress(String),

    /// Any other server-side failure
    #[error("Server error: {0}")]
    Remote(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Shorthand for a missing stream on the server.
    pub fn stream_not_found(path: impl Into<String>) -> Self {
        Error::RemoteObjectNotFound {
            kind: RemoteObject::Stream,
            path: path.into(),
        }
    }

    /// Shorthand for a missing depot file.
    pub fn file_not_found(path: impl Into<String>) -> Self {
        Error::RemoteObjectNotFound {
            kind: RemoteObject::File,
            path: path.into(),
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::MalformedSnapshot(err.to_string())
    }
}

/// Result alias for core operations
pub type Result<T> = std::result::Result<T, Error>;
