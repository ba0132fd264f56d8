//! Domain-specific error types for the connector core.
//!
//! Internal steps return `Result<T, ConnectorError>`. The public protocol
//! operations on [`ProtocolEngine`](crate::ProtocolEngine) never surface
//! these: each one is folded into the operation's sentinel return value.

use std::time::Duration;
use thiserror::Error;

/// The canonical error type for the connector core.
#[derive(Debug, Error)]
pub enum ConnectorError {
    // ── Credential Errors ────────────────────────────────────────
    /// No shared secret has been configured.
    #[error("secret is not configured")]
    SecretMissing,

    /// The secret did not split into `password||username` parts.
    #[error("secret is malformed: expected 2 parts separated by '||', got {parts}")]
    SecretMalformed { parts: usize },

    /// A stored credential digest is not valid hex.
    #[error("invalid credential hash: {0}")]
    InvalidHash(String),

    // ── Catalog Errors ───────────────────────────────────────────
    /// A request payload source could not be read.
    #[error("cannot load request source '{source_id}': {source}")]
    CatalogSource {
        source_id: String,
        #[source]
        source: std::io::Error,
    },

    // ── Payload Errors ───────────────────────────────────────────
    /// A response payload failed XML parsing.
    #[error("xml error: {0}")]
    Xml(#[from] quick_xml::Error),

    // ── Dispatch Errors ──────────────────────────────────────────
    /// Handing a response to its handler failed.
    #[error("dispatch error: {0}")]
    Dispatch(#[from] DispatchError),

    /// Catch-all for errors that do not fit another variant.
    #[error("{0}")]
    Other(String),
}

// ── DispatchError ────────────────────────────────────────────────

/// Typed error for background handler jobs.
#[derive(Debug, Error)]
pub enum DispatchError {
    /// The bounded job queue is full; the job was dropped.
    #[error("handler queue is full")]
    QueueFull,

    /// The dispatcher's worker side has shut down.
    #[error("dispatcher is closed")]
    Closed,

    /// The handler exceeded its deadline and was abandoned.
    #[error("handler timed out after {0:?}")]
    Timeout(Duration),

    /// The handler panicked.
    #[error("handler panicked: {0}")]
    Panicked(String),

    /// The handler returned an error.
    #[error("handler failed: {0}")]
    Handler(String),
}

// ── Convenient From implementations ──────────────────────────────

impl From<String> for ConnectorError {
    fn from(s: String) -> Self {
        ConnectorError::Other(s)
    }
}

impl From<&str> for ConnectorError {
    fn from(s: &str) -> Self {
        ConnectorError::Other(s.to_string())
    }
}

impl<T> From<tokio::sync::mpsc::error::TrySendError<T>> for DispatchError {
    fn from(e: tokio::sync::mpsc::error::TrySendError<T>) -> Self {
        match e {
            tokio::sync::mpsc::error::TrySendError::Full(_) => DispatchError::QueueFull,
            tokio::sync::mpsc::error::TrySendError::Closed(_) => DispatchError::Closed,
        }
    }
}
