//! Error types for every layer of the thumbnail pipeline.

use thiserror::Error;

/// Errors raised by an [`ObjectStore`](crate::ports::storage::ObjectStore).
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Object not found: {container}/{key}")]
    NotFound { container: String, key: String },

    #[error("Storage request failed: {0}")]
    Transient(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl StorageError {
    pub fn not_found(container: impl Into<String>, key: impl Into<String>) -> Self {
        Self::NotFound {
            container: container.into(),
            key: key.into(),
        }
    }

    pub fn transient(msg: impl Into<String>) -> Self {
        Self::Transient(msg.into())
    }
}

/// Errors raised by a [`NotificationSource`](crate::ports::source::NotificationSource).
#[derive(Debug, Error)]
pub enum SourceError {
    /// The source could not be reached; the worker backs off and retries.
    #[error("Notification source unavailable: {0}")]
    Unavailable(String),

    #[error("Failed to acknowledge {receipt}: {reason}")]
    Acknowledge { receipt: String, reason: String },

    #[error("Runtime protocol error: {0}")]
    Runtime(String),
}

/// A delivery payload that cannot be turned into notifications.
#[derive(Debug, Error)]
pub enum NotificationError {
    #[error("Payload is not a valid event envelope: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Payload carries no records")]
    NoRecords,

    #[error("Record {index} is missing {field}")]
    MissingField { index: usize, field: &'static str },

    #[error("Record {index} has an undecodable object key: {key}")]
    KeyEncoding { index: usize, key: String },
}

/// Failures of the pure image transformation.
#[derive(Debug, Error)]
pub enum TranscodeError {
    #[error("Failed to decode image: {0}")]
    Decode(String),

    #[error("Cannot resize a {width}x{height} image")]
    Resize { width: u32, height: u32 },

    #[error("Failed to encode thumbnail: {0}")]
    Encode(String),

    #[error("Transcode task aborted: {0}")]
    Join(String),
}

/// Terminal failure of one unit of work, named by the stage it failed in.
#[derive(Debug, Error)]
pub enum UnitError {
    #[error("fetch failed: {0}")]
    Fetch(#[source] StorageError),

    #[error("decode failed: {0}")]
    Decode(#[source] TranscodeError),

    #[error("resize failed: {0}")]
    Resize(#[source] TranscodeError),

    #[error("encode failed: {0}")]
    Encode(#[source] TranscodeError),

    #[error("store failed: {0}")]
    Store(#[source] StorageError),

    /// The unit's task panicked or was cancelled.
    #[error("unit aborted: {0}")]
    Aborted(String),
}

impl UnitError {
    /// The stage reported in `Failed(reason)`.
    pub fn stage(&self) -> &'static str {
        match self {
            UnitError::Fetch(_) => "fetch",
            UnitError::Decode(_) => "decode",
            UnitError::Resize(_) => "resize",
            UnitError::Encode(_) => "encode",
            UnitError::Store(_) => "store",
            UnitError::Aborted(_) => "aborted",
        }
    }
}

/// Invalid configuration; always fatal at startup.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{0} is required")]
    Missing(&'static str),

    #[error("{name} has an invalid value {value:?}: {reason}")]
    Invalid {
        name: &'static str,
        value: String,
        reason: String,
    },
}

impl ConfigError {
    pub fn invalid(name: &'static str, value: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Invalid {
            name,
            value: value.into(),
            reason: reason.into(),
        }
    }
}

/// Process-level failures surfaced by the binaries.
#[derive(Debug, Error)]
pub enum WorkerError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("Could not find queue {name}: {reason}")]
    QueueResolution { name: String, reason: String },

    #[error("Unable to update queue {name}: {reason}")]
    QueueAttributes { name: String, reason: String },

    #[error(transparent)]
    Source(#[from] SourceError),
}
