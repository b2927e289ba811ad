//! SDK error types.
//!
//! [`LinkError`] is the single error type returned by every fallible
//! operation in the SDK. Decode misses on the wire are *not* errors; the
//! reader loop recovers from them locally and subscribers never see them.

use std::time::Duration;

use groundlink_models::ProtocolError;

/// Error type for all link-manager operations.
#[derive(Debug, thiserror::Error)]
pub enum LinkError {
    /// Invalid or missing configuration, or an operation issued in the
    /// wrong session state (already connected, not connected).
    #[error("configuration error: {0}")]
    Config(String),

    /// No liveness frame arrived within the connection-verification window.
    #[error("connection verification timed out after {0:?}")]
    ConnectTimeout(Duration),

    /// Fatal transport failure (device unplugged, socket closed).
    #[error("transport failure: {0}")]
    Transport(String),

    /// A command was sent but no acknowledgment arrived within the bound.
    #[error("no acknowledgment within {0:?}")]
    AckTimeout(Duration),

    /// The active protocol cannot express this command.
    #[error("unsupported on the active protocol: {0}")]
    Unsupported(&'static str),

    /// Wire-level encode failure.
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// Generic I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl LinkError {
    /// Shorthand for the not-connected configuration error.
    pub fn not_connected() -> Self {
        LinkError::Config("no active session".to_string())
    }
}
