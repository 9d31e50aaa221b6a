// ============================================
// File: crates/peerlink-node/src/error.rs
// ============================================
//! # Node Error Types
//!
//! ## Main Functionality
//! - `NodeError`: Errors of the swarm, the muxer and the `NetCore`
//! - Lower-layer errors pass through unchanged (`#[error(transparent)]`)
//!
//! ## ⚠️ Important Note for Next Developer
//! - The `DhtUnavailable` message is matched on by callers, keep it stable
//!
//! ## Last Modified
//! v0.1.0 - Initial node errors

use thiserror::Error;

use peerlink_common::error::CommonError;
use peerlink_common::PeerId;
use peerlink_core::error::CoreError;
use peerlink_transport::error::TransportError;

/// Result type for node operations.
pub type Result<T> = std::result::Result<T, NodeError>;

/// Node error types.
#[derive(Error, Debug)]
pub enum NodeError {
    // ========================================
    // Configuration
    // ========================================

    /// Configuration file could not be read or parsed.
    #[error("Failed to load configuration from '{path}': {reason}")]
    ConfigLoad {
        /// File path
        path: String,
        /// Underlying reason
        reason: String,
    },

    /// A configuration value is out of range.
    #[error("Invalid configuration: {field} - {reason}")]
    ConfigInvalid {
        /// Offending field
        field: String,
        /// What is wrong with it
        reason: String,
    },

    // ========================================
    // Lifecycle
    // ========================================

    /// The operation needs a started node.
    #[error("Node is not started")]
    NotStarted,

    /// No DHT was configured.
    #[error("DHT is not available")]
    DhtUnavailable,

    // ========================================
    // Peers and Dialing
    // ========================================

    /// The input does not name a peer.
    #[error("Invalid peer reference '{input}': {reason}")]
    InvalidPeerRef {
        /// Text or address given
        input: String,
        /// Why it was rejected
        reason: String,
    },

    /// No registered transport can dial any known address of the peer.
    #[error("No dialable address for peer {peer}")]
    NoAddresses {
        /// Peer being dialed
        peer: PeerId,
    },

    /// Every address of the peer failed.
    #[error("All dials to {peer} failed: {}", errors.join("; "))]
    DialFailed {
        /// Peer being dialed
        peer: PeerId,
        /// One entry per attempted address
        errors: Vec<String>,
    },

    /// Attempt to dial our own peer id.
    #[error("Refusing to dial the local peer")]
    DialSelf,

    // ========================================
    // Protocols and Streams
    // ========================================

    /// The remote answered `na` to a protocol proposal.
    #[error("Protocol {protocol} not supported by remote")]
    ProtocolNotSupported {
        /// Proposed protocol tag
        protocol: String,
    },

    /// Protocol negotiation went wrong.
    #[error("Protocol negotiation failed: {reason}")]
    Negotiation {
        /// Details
        reason: String,
    },

    /// Malformed multiplexer frame or closed connection.
    #[error("Stream multiplexer error: {reason}")]
    Muxer {
        /// Details
        reason: String,
    },

    /// The substream was closed.
    #[error("Stream closed")]
    StreamClosed,

    /// The ping echo did not match.
    #[error("Ping payload mismatch")]
    PingMismatch,

    // ========================================
    // Collaborators
    // ========================================

    /// A discovery service failed.
    #[error("Discovery '{tag}' failed: {reason}")]
    Discovery {
        /// Discovery tag
        tag: String,
        /// Details
        reason: String,
    },

    /// The DHT failed.
    #[error("DHT error: {reason}")]
    Dht {
        /// Details
        reason: String,
    },

    /// Step timed out.
    #[error("{operation} timed out")]
    Timeout {
        /// What timed out
        operation: String,
    },

    // ========================================
    // Wrapped Errors
    // ========================================

    /// Error from peerlink-common.
    #[error(transparent)]
    Common(#[from] CommonError),

    /// Error from peerlink-core.
    #[error(transparent)]
    Core(#[from] CoreError),

    /// Error from peerlink-transport.
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl NodeError {
    /// Creates a `ConfigLoad` error.
    pub fn config_load(path: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::ConfigLoad {
            path: path.into(),
            reason: reason.into(),
        }
    }

    /// Creates a `ConfigInvalid` error.
    pub fn config_invalid(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::ConfigInvalid {
            field: field.into(),
            reason: reason.into(),
        }
    }

    /// Creates an `InvalidPeerRef` error.
    pub fn invalid_peer_ref(input: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidPeerRef {
            input: input.into(),
            reason: reason.into(),
        }
    }

    /// Creates a `Negotiation` error.
    pub fn negotiation(reason: impl Into<String>) -> Self {
        Self::Negotiation {
            reason: reason.into(),
        }
    }

    /// Creates a `Muxer` error.
    pub fn muxer(reason: impl Into<String>) -> Self {
        Self::Muxer {
            reason: reason.into(),
        }
    }

    /// Creates a `Discovery` error.
    pub fn discovery(tag: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Discovery {
            tag: tag.into(),
            reason: reason.into(),
        }
    }

    /// Creates a `Dht` error.
    pub fn dht(reason: impl Into<String>) -> Self {
        Self::Dht {
            reason: reason.into(),
        }
    }

    /// Creates a `Timeout` error.
    pub fn timeout(operation: impl Into<String>) -> Self {
        Self::Timeout {
            operation: operation.into(),
        }
    }

    // ========================================
    // Classification
    // ========================================

    /// Returns `true` for configuration errors.
    #[must_use]
    pub const fn is_config_error(&self) -> bool {
        matches!(self, Self::ConfigLoad { .. } | Self::ConfigInvalid { .. })
    }

    /// Returns `true` if dialing the peer again later may succeed.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::DialFailed { .. } | Self::Timeout { .. } | Self::Io(_) => true,
            Self::Transport(e) => e.is_retryable(),
            Self::Core(e) => e.is_retryable(),
            _ => false,
        }
    }

    /// Returns `true` if the secure channel handshake itself was rejected.
    #[must_use]
    pub fn is_handshake_failure(&self) -> bool {
        matches!(self, Self::Core(e) if e.is_fatal())
    }

    /// Returns `true` if a required collaborator was not configured.
    #[must_use]
    pub const fn is_unavailable(&self) -> bool {
        matches!(self, Self::DhtUnavailable | Self::NotStarted)
    }
}

// ============================================
// Tests
// ============================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dht_unavailable_message() {
        assert_eq!(NodeError::DhtUnavailable.to_string(), "DHT is not available");
        assert!(NodeError::DhtUnavailable.is_unavailable());
    }

    #[test]
    fn test_dial_failed_lists_every_attempt() {
        let peer = PeerId::from_public_key(b"key");
        let err = NodeError::DialFailed {
            peer,
            errors: vec!["/memory/1: refused".into(), "/memory/2: refused".into()],
        };
        let text = err.to_string();
        assert!(text.contains("/memory/1: refused; /memory/2: refused"));
        assert!(err.is_retryable());
    }

    #[test]
    fn test_core_errors_pass_through() {
        let err: NodeError = CoreError::SelfDial.into();
        assert_eq!(err.to_string(), "talking to yourself");
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_retry_and_handshake_classification() {
        let refused: NodeError = TransportError::ConnectionRefused {
            addr: "/memory/1".parse().unwrap(),
        }
        .into();
        assert!(refused.is_retryable());
        assert!(!refused.is_handshake_failure());

        let rejected: NodeError = CoreError::SelfDial.into();
        assert!(rejected.is_handshake_failure());
        assert!(!rejected.is_retryable());

        let misuse: NodeError = CoreError::invalid_state("send", "Established").into();
        assert!(!misuse.is_handshake_failure());
    }

    #[test]
    fn test_config_classification() {
        assert!(NodeError::config_invalid("network", "empty").is_config_error());
        assert!(!NodeError::StreamClosed.is_config_error());
    }
}
