// ============================================
// File: crates/peerlink-common/src/error.rs
// ============================================
//! # Common Error Types
//!
//! ## Creation Reason
//! Provides foundational error types used across all peerlink crates
//! for parsing identifiers and addresses.
//!
//! ## Main Functionality
//! - `CommonError`: Base error enum for common operations
//! - `Result<T>`: Type alias using `CommonError`
//!
//! ## ⚠️ Important Note for Next Developer
//! - Never include key material in error messages
//! - Each crate wraps `CommonError` transparently in its own error enum
//!
//! ## Last Modified
//! v0.1.0 - Initial error definitions

use thiserror::Error;

// ============================================
// Result Type Alias
// ============================================

/// Common result type for operations that may fail.
pub type Result<T> = std::result::Result<T, CommonError>;

// ============================================
// CommonError
// ============================================

/// Common error types shared across peerlink crates.
///
/// # Example
/// ```
/// use peerlink_common::error::{CommonError, Result};
///
/// fn non_empty(data: &[u8]) -> Result<()> {
///     if data.is_empty() {
///         return Err(CommonError::invalid_input("data", "cannot be empty"));
///     }
///     Ok(())
/// }
/// ```
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CommonError {
    // ========================================
    // Validation Errors
    // ========================================

    /// Invalid input data provided.
    #[error("Invalid input for '{field}': {reason}")]
    InvalidInput {
        /// Name of the field or parameter
        field: String,
        /// Description of what's wrong
        reason: String,
    },

    /// Data length doesn't match expected size.
    #[error("Invalid length: expected {expected}, got {actual}")]
    InvalidLength {
        /// Expected length in bytes
        expected: usize,
        /// Actual length received
        actual: usize,
    },

    // ========================================
    // Address Errors
    // ========================================

    /// A multiaddr string could not be parsed.
    #[error("Invalid multiaddr '{addr}': {reason}")]
    InvalidMultiaddr {
        /// The offending address text
        addr: String,
        /// What went wrong
        reason: String,
    },

    /// A peer id could not be parsed.
    #[error("Invalid peer id: {reason}")]
    InvalidPeerId {
        /// What went wrong
        reason: String,
    },
}

impl CommonError {
    // ========================================
    // Convenience Constructors
    // ========================================

    /// Creates an `InvalidInput` error.
    pub fn invalid_input(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidInput {
            field: field.into(),
            reason: reason.into(),
        }
    }

    /// Creates an `InvalidLength` error.
    #[must_use]
    pub const fn invalid_length(expected: usize, actual: usize) -> Self {
        Self::InvalidLength { expected, actual }
    }

    /// Creates an `InvalidMultiaddr` error.
    pub fn invalid_multiaddr(addr: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidMultiaddr {
            addr: addr.into(),
            reason: reason.into(),
        }
    }

    /// Creates an `InvalidPeerId` error.
    pub fn invalid_peer_id(reason: impl Into<String>) -> Self {
        Self::InvalidPeerId {
            reason: reason.into(),
        }
    }
}

// ============================================
// Tests
// ============================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = CommonError::invalid_input("nonce", "must be 16 bytes");
        assert!(err.to_string().contains("nonce"));
        assert!(err.to_string().contains("16 bytes"));

        let err = CommonError::invalid_multiaddr("/ip4/x", "bad address");
        assert!(err.to_string().contains("/ip4/x"));
    }
}
