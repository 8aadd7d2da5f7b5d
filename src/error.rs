//! Error types for the simulation–autonomy bridge.
//!
//! All errors implement the `std::error::Error` trait and carry structured
//! context for debugging and recovery decisions.
//!
//! ## Error Categories
//!
//! - **Transport Errors**: socket open/send/receive failures; recovered
//!   locally via reconnect-with-backoff and surfaced only as a `Degraded`
//!   session state
//! - **Decode Errors**: malformed, truncated, or corrupted frames; the
//!   offending frame is discarded and counted
//! - **Handshake Errors**: protocol version negotiation failures; fatal at
//!   bridge startup
//! - **Timeout Errors**: bounded waits that elapsed (handshake, shutdown)
//! - **Config Errors**: invalid endpoint or limit configuration
//!
//! ## Recovery and Retry
//!
//! Errors expose [`BridgeError::is_retryable`] so callers can distinguish
//! transient transport conditions from fatal protocol violations:
//!
//! ```rust
//! use simbridge::BridgeError;
//!
//! let error = BridgeError::transport_failed("peer unreachable");
//! assert!(error.is_retryable());
//! ```

use std::time::Duration;
use thiserror::Error;

use crate::codec::DecodeError;

/// Result type alias for bridge operations.
pub type Result<T, E = BridgeError> = std::result::Result<T, E>;

/// Main error type for bridge operations.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum BridgeError {
    #[error("Transport failure: {reason}")]
    Transport {
        reason: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    #[error(transparent)]
    Decode(#[from] DecodeError),

    #[error("Protocol version mismatch: local {local:#06x}, peer {peer:#06x}")]
    VersionMismatch { local: u16, peer: u16 },

    #[error("Handshake failed: {reason}")]
    Handshake { reason: String },

    #[error("Operation timed out after {duration:?}")]
    Timeout { duration: Duration },

    #[error("Invalid configuration: {reason}")]
    Config { reason: String },

    #[error("State for tick {tick_id} already published")]
    DuplicatePublish { tick_id: u64 },

    #[error("Bridge is shut down")]
    Shutdown,
}

impl BridgeError {
    /// Returns whether this error is potentially recoverable through retry.
    ///
    /// Transport and timeout conditions are transient; protocol violations
    /// (version mismatch, malformed config) are not.
    pub fn is_retryable(&self) -> bool {
        match self {
            BridgeError::Transport { .. } => true,
            BridgeError::Timeout { .. } => true,
            BridgeError::Decode(e) => e.is_recoverable(),
            BridgeError::VersionMismatch { .. } => false,
            BridgeError::Handshake { .. } => false,
            BridgeError::Config { .. } => false,
            BridgeError::DuplicatePublish { .. } => false,
            BridgeError::Shutdown => false,
        }
    }

    /// Helper constructor for transport errors.
    pub fn transport_failed(reason: impl Into<String>) -> Self {
        BridgeError::Transport { reason: reason.into(), source: None }
    }

    /// Helper constructor for transport errors with a source.
    pub fn transport_failed_with_source(
        reason: impl Into<String>,
        source: Box<dyn std::error::Error + Send + Sync>,
    ) -> Self {
        BridgeError::Transport { reason: reason.into(), source: Some(source) }
    }

    /// Helper constructor for handshake errors.
    pub fn handshake_failed(reason: impl Into<String>) -> Self {
        BridgeError::Handshake { reason: reason.into() }
    }

    /// Helper constructor for configuration errors.
    pub fn invalid_config(reason: impl Into<String>) -> Self {
        BridgeError::Config { reason: reason.into() }
    }

    /// Helper constructor for timeouts.
    pub fn timed_out(duration: Duration) -> Self {
        BridgeError::Timeout { duration }
    }
}

impl From<std::io::Error> for BridgeError {
    fn from(err: std::io::Error) -> Self {
        BridgeError::Transport { reason: err.kind().to_string(), source: Some(Box::new(err)) }
    }
}
