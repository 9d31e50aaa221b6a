// ============================================
// File: crates/peerlink-transport/src/error.rs
// ============================================
//! # Transport Error Types
//!
//! ## Creation Reason
//! Defines error types for dialing and listening on stream transports.
//!
//! ## Main Functionality
//! - `TransportError`: Primary error enum for transport operations
//! - Categorization of retryable vs fatal errors
//!
//! ## Error Categories
//! 1. **Dial Errors**: Refused, unreachable, unresolvable
//! 2. **Listen Errors**: Bind failures, address in use
//! 3. **Address Errors**: Multiaddr not handled by this transport
//! 4. **System Errors**: Wrapped I/O errors with context
//!
//! ## ⚠️ Important Note for Next Developer
//! - Dial errors are usually transient; the swarm tries the next address
//! - `UnsupportedAddress` means "ask another transport", not "peer is down"
//!
//! ## Last Modified
//! v0.1.0 - Initial error definitions

use std::io;

use thiserror::Error;

use peerlink_common::error::CommonError;
use peerlink_common::Multiaddr;

// ============================================
// Result Type Alias
// ============================================

/// Result type for transport operations.
pub type Result<T> = std::result::Result<T, TransportError>;

// ============================================
// TransportError
// ============================================

/// Transport layer error types.
#[derive(Error, Debug)]
pub enum TransportError {
    // ========================================
    // Dial Errors
    // ========================================

    /// Nobody is listening at the address.
    #[error("Connection refused: {addr}")]
    ConnectionRefused {
        /// Address that was dialed
        addr: Multiaddr,
    },

    /// Dialing failed for another reason.
    #[error("Failed to dial {addr}: {reason}")]
    DialFailed {
        /// Address that was dialed
        addr: Multiaddr,
        /// Why dialing failed
        reason: String,
    },

    // ========================================
    // Listen Errors
    // ========================================

    /// Failed to bind to address.
    #[error("Failed to listen on {addr}: {reason}")]
    BindFailed {
        /// Address we tried to bind to
        addr: Multiaddr,
        /// Why binding failed
        reason: String,
    },

    /// Address already in use.
    #[error("Address {addr} already in use")]
    AddressInUse {
        /// The address that's in use
        addr: Multiaddr,
    },

    /// The listener was closed.
    #[error("Listener closed")]
    ListenerClosed,

    // ========================================
    // Address Errors
    // ========================================

    /// This transport cannot handle the address.
    #[error("Unsupported address for {transport}: {addr}")]
    UnsupportedAddress {
        /// Transport tag
        transport: &'static str,
        /// The address
        addr: Multiaddr,
    },

    // ========================================
    // Wrapped Errors
    // ========================================

    /// I/O error from the system.
    #[error("I/O error: {context}")]
    Io {
        /// What was happening when the error occurred
        context: String,
        /// Underlying I/O error
        #[source]
        source: io::Error,
    },

    /// Error from common crate.
    #[error(transparent)]
    Common(#[from] CommonError),
}

impl TransportError {
    // ========================================
    // Convenience Constructors
    // ========================================

    /// Creates a `DialFailed` error.
    pub fn dial_failed(addr: &Multiaddr, reason: impl Into<String>) -> Self {
        Self::DialFailed {
            addr: addr.clone(),
            reason: reason.into(),
        }
    }

    /// Creates a `BindFailed` error.
    pub fn bind_failed(addr: &Multiaddr, reason: impl Into<String>) -> Self {
        Self::BindFailed {
            addr: addr.clone(),
            reason: reason.into(),
        }
    }

    /// Creates an `UnsupportedAddress` error.
    #[must_use]
    pub fn unsupported(transport: &'static str, addr: &Multiaddr) -> Self {
        Self::UnsupportedAddress {
            transport,
            addr: addr.clone(),
        }
    }

    /// Creates an `Io` error with context.
    pub fn io(context: impl Into<String>, source: io::Error) -> Self {
        Self::Io {
            context: context.into(),
            source,
        }
    }

    // ========================================
    // Classification
    // ========================================

    /// Returns `true` if retrying later might succeed.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::ConnectionRefused { .. } | Self::DialFailed { .. } => true,
            Self::Io { source, .. } => matches!(
                source.kind(),
                io::ErrorKind::ConnectionRefused
                    | io::ErrorKind::ConnectionReset
                    | io::ErrorKind::TimedOut
                    | io::ErrorKind::Interrupted
            ),
            _ => false,
        }
    }
}

// ============================================
// Tests
// ============================================
