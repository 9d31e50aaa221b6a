// ============================================
// File: crates/peerlink-core/src/error.rs
// ============================================
//! # Core Error Types
//!
//! ## Creation Reason
//! Defines error types for the secure channel handshake, the symmetric
//! transport that follows it, and the wire codec both rely on.
//!
//! ## Main Functionality
//! - `CoreError`: Primary error enum for core operations
//! - `Result<T>`: Type alias using `CoreError`
//!
//! ## Error Categories
//! 1. **Crypto Errors**: Key handling, signature, key exchange, MAC failures
//! 2. **Protocol Errors**: Malformed messages, negotiation and identity failures
//! 3. **State Errors**: Steps run out of order, channel already torn down
//! 4. **I/O Errors**: The underlying stream failed or closed
//!
//! ## ⚠️ Important Note for Next Developer
//! - NEVER include key material in error messages
//! - `NoCommonAlgorithms` and `SelfDial` texts are matched by peers and tests
//!
//! ## Last Modified
//! v0.1.0 - Initial error definitions

use std::time::Duration;

use thiserror::Error;

use peerlink_common::error::CommonError;
use peerlink_common::types::PeerId;

// ============================================
// Result Type Alias
// ============================================

/// Result type for core operations.
pub type Result<T> = std::result::Result<T, CoreError>;

// ============================================
// CoreError
// ============================================

/// Core error types for the handshake and secure transport.
///
/// # Security Note
/// Messages are informative for debugging without revealing key material.
#[derive(Error, Debug)]
pub enum CoreError {
    // ========================================
    // Cryptographic Errors
    // ========================================

    /// A key could not be parsed or generated.
    #[error("Invalid key: {context}")]
    InvalidKey {
        /// Which key and what went wrong
        context: String,
    },

    /// The marshalled public key uses a type this node cannot verify.
    #[error("Unsupported public key type: {0}")]
    UnsupportedKeyType(u64),

    /// Signature verification failed.
    #[error("Signature verification failed")]
    SignatureVerification,

    /// Ephemeral key agreement failed.
    #[error("Key exchange failed: {reason}")]
    KeyExchange {
        /// Why key exchange failed
        reason: String,
    },

    /// Key derivation failed.
    #[error("Key derivation failed: {reason}")]
    KeyDerivation {
        /// Why derivation failed
        reason: String,
    },

    /// A secure frame failed its MAC check.
    #[error("MAC verification failed")]
    MacMismatch,

    // ========================================
    // Protocol Errors
    // ========================================

    /// Message is malformed or truncated.
    #[error("Malformed message: {reason}")]
    MalformedMessage {
        /// What's wrong with the message
        reason: String,
    },

    /// Frame exceeds maximum allowed size.
    #[error("Message too large: max {max} bytes, got {actual}")]
    MessageTooLarge {
        /// Maximum allowed size
        max: usize,
        /// Actual size announced
        actual: usize,
    },

    /// The two proposals share no entry in some capability list.
    #[error("no algorithms in common ({kind})")]
    NoCommonAlgorithms {
        /// Which list failed: exchanges, ciphers or hashes
        kind: &'static str,
    },

    /// Both proposals hash to the same order: we dialed ourselves.
    #[error("talking to yourself")]
    SelfDial,

    /// The authenticated peer is not the one that was dialed.
    #[error("Peer identity mismatch: expected {expected}, got {actual}")]
    IdentityMismatch {
        /// Peer id the caller asked for
        expected: PeerId,
        /// Peer id derived from the remote proposal
        actual: PeerId,
    },

    /// The remote echoed back a nonce other than ours.
    #[error("Nonce mismatch: remote failed to echo our nonce")]
    NonceMismatch,

    /// The handshake did not finish in time.
    #[error("Handshake timed out after {0:?}")]
    Timeout(Duration),

    // ========================================
    // State Errors
    // ========================================

    /// Operation not valid in current state.
    #[error("Invalid state for operation: {operation} requires {required_state}")]
    InvalidState {
        /// What operation was attempted
        operation: String,
        /// What state was required
        required_state: String,
    },

    /// The channel is no longer usable.
    #[error("Channel closed: {reason}")]
    ChannelClosed {
        /// Why the channel went away
        reason: String,
    },

    // ========================================
    // Wrapped Errors
    // ========================================

    /// I/O failure on the underlying stream.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Error from common crate.
    #[error(transparent)]
    Common(#[from] CommonError),
}

impl CoreError {
    // ========================================
    // Convenience Constructors
    // ========================================

    /// Creates an `InvalidKey` error.
    pub fn invalid_key(context: impl Into<String>) -> Self {
        Self::InvalidKey {
            context: context.into(),
        }
    }

    /// Creates a `KeyExchange` error.
    pub fn key_exchange(reason: impl Into<String>) -> Self {
        Self::KeyExchange {
            reason: reason.into(),
        }
    }

    /// Creates a `KeyDerivation` error.
    pub fn key_derivation(reason: impl Into<String>) -> Self {
        Self::KeyDerivation {
            reason: reason.into(),
        }
    }

    /// Creates a `MalformedMessage` error.
    pub fn malformed(reason: impl Into<String>) -> Self {
        Self::MalformedMessage {
            reason: reason.into(),
        }
    }

    /// Creates an `InvalidState` error.
    pub fn invalid_state(operation: impl Into<String>, required: impl Into<String>) -> Self {
        Self::InvalidState {
            operation: operation.into(),
            required_state: required.into(),
        }
    }

    /// Creates a `ChannelClosed` error.
    pub fn closed(reason: impl Into<String>) -> Self {
        Self::ChannelClosed {
            reason: reason.into(),
        }
    }

    // ========================================
    // Classification
    // ========================================

    /// Returns `true` if the remote broke the handshake protocol.
    #[must_use]
    pub const fn is_protocol_violation(&self) -> bool {
        matches!(
            self,
            Self::MalformedMessage { .. }
                | Self::MessageTooLarge { .. }
                | Self::NoCommonAlgorithms { .. }
                | Self::SelfDial
                | Self::IdentityMismatch { .. }
                | Self::NonceMismatch
                | Self::UnsupportedKeyType(_)
        )
    }

    /// Returns `true` if this is a cryptographic failure.
    #[must_use]
    pub const fn is_crypto_error(&self) -> bool {
        matches!(
            self,
            Self::InvalidKey { .. }
                | Self::SignatureVerification
                | Self::KeyExchange { .. }
                | Self::KeyDerivation { .. }
                | Self::MacMismatch
        )
    }

    /// Returns `true` if the handshake or channel cannot continue.
    #[must_use]
    pub const fn is_fatal(&self) -> bool {
        self.is_protocol_violation()
            || self.is_crypto_error()
            || matches!(self, Self::Timeout(_) | Self::ChannelClosed { .. })
    }

    /// Returns `true` if this error may indicate an active attack.
    ///
    /// Used for logging with elevated severity.
    #[must_use]
    pub const fn is_suspicious(&self) -> bool {
        matches!(
            self,
            Self::SignatureVerification
                | Self::MacMismatch
                | Self::IdentityMismatch { .. }
                | Self::NonceMismatch
        )
    }

    /// Returns `true` if the caller may retry on a fresh connection.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::Timeout(_) | Self::Io(_))
    }
}

// ============================================
// Tests
// ============================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages() {
        let err = CoreError::NoCommonAlgorithms { kind: "ciphers" };
        assert!(err.to_string().contains("no algorithms in common"));

        assert_eq!(CoreError::SelfDial.to_string(), "talking to yourself");

        let err = CoreError::malformed("truncated varint");
        assert!(err.to_string().contains("truncated varint"));
    }

    #[test]
    fn test_error_classification() {
        assert!(CoreError::SignatureVerification.is_crypto_error());
        assert!(CoreError::SignatureVerification.is_suspicious());
        assert!(CoreError::SelfDial.is_protocol_violation());
        assert!(!CoreError::SelfDial.is_crypto_error());
        assert!(CoreError::Timeout(Duration::from_secs(1)).is_retryable());
        assert!(!CoreError::MacMismatch.is_retryable());
        assert!(CoreError::MacMismatch.is_fatal());
        assert!(!CoreError::invalid_state("send", "Established").is_fatal());
    }
}
