//! Error types
//!
//! A single error enum covers every failure the core reports. Each variant maps
//! to a stable machine-readable code via [`Error::code`] so that a request layer
//! can forward failures without string matching.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Crate-wide error type
#[derive(Error, Debug)]
pub enum Error {
    /// The capture device could not be acquired within the lock timeout
    #[error("capture device busy, could not start source {source_id}")]
    CaptureBusy { source_id: String },

    /// A pending start was abandoned because the source was stopped
    #[error("start of {source_id} cancelled by stop")]
    StartCancelled { source_id: String },

    /// The encoder process could not be spawned
    #[error("failed to spawn encoder for {source_id}: {reason}")]
    SpawnFailed { source_id: String, reason: String },

    /// Unknown profile or source on a targeted operation
    #[error("{what} not found: {name}")]
    NotFound { what: &'static str, name: String },

    /// A targeted start named a source that is configured but disabled
    #[error("source is disabled: {0}")]
    SourceDisabled(String),

    /// An orphaned encoder could not be terminated (logged, never returned to callers)
    #[error("failed to kill orphaned encoder {pid}: {reason}")]
    OrphanKillFailed { pid: u32, reason: String },

    /// A subscriber fell too far behind the live stream and was disconnected
    #[error("subscriber overrun, {skipped} units skipped")]
    SubscriberOverrun { skipped: u64 },

    /// The hub feeding a subscription was replaced or dropped
    #[error("stream hub closed")]
    HubClosed,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl Error {
    pub(crate) fn profile_not_found(name: impl Into<String>) -> Self {
        Error::NotFound {
            what: "profile",
            name: name.into(),
        }
    }

    pub(crate) fn source_not_found(name: impl Into<String>) -> Self {
        Error::NotFound {
            what: "source",
            name: name.into(),
        }
    }

    /// Machine-readable error code
    pub fn code(&self) -> &'static str {
        match self {
            Error::CaptureBusy { .. } => "CAPTURE_BUSY",
            Error::StartCancelled { .. } => "START_CANCELLED",
            Error::SpawnFailed { .. } => "SPAWN_FAILED",
            Error::NotFound { .. } => "NOT_FOUND",
            Error::SourceDisabled(_) => "SOURCE_DISABLED",
            Error::OrphanKillFailed { .. } => "ORPHAN_KILL_FAILED",
            Error::SubscriberOverrun { .. } => "SUBSCRIBER_OVERRUN",
            Error::HubClosed => "HUB_CLOSED",
            Error::Io(_) => "IO_ERROR",
            Error::Serialization(_) => "SERIALIZATION_ERROR",
        }
    }

    /// Whether retrying the same request later may succeed
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::CaptureBusy { .. })
    }
}

/// Serializable error form handed to the request layer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub code: String,
    pub message: String,
}

impl From<&Error> for ErrorResponse {
    fn from(error: &Error) -> Self {
        ErrorResponse {
            code: error.code().to_string(),
            message: error.to_string(),
        }
    }
}

impl From<Error> for ErrorResponse {
    fn from(error: Error) -> Self {
        ErrorResponse::from(&error)
    }
}

/// Result type alias using [`Error`]
pub type Result<T> = std::result::Result<T, Error>;
