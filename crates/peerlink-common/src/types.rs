// ============================================
// File: crates/peerlink-common/src/types.rs
// ============================================
//! # Core Type Definitions
//!
//! ## Creation Reason
//! Centralizes the peer identifier so that the handshake (which derives it)
//! and the swarm (which indexes connections by it) share one definition.
//!
//! ## Main Functionality
//! - `PeerId`: SHA-256 multihash of a marshalled public key
//!
//! ## Wire Format
//! ```text
//! ┌──────────┬──────────┬──────────────────────────────┐
//! │ 0x12     │ 0x20     │ SHA-256(marshalled pubkey)   │
//! │ (sha256) │ (len 32) │ (32 bytes)                   │
//! └──────────┴──────────┴──────────────────────────────┘
//! ```
//!
//! ## Last Modified
//! v0.1.0 - Initial implementation

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::CommonError;

// ============================================
// Constants
// ============================================

/// Multihash code for SHA2-256.
const MULTIHASH_SHA2_256: u8 = 0x12;

/// Digest length of SHA2-256.
const SHA2_256_LEN: u8 = 32;

/// Size of an encoded `PeerId` in bytes (code + length + digest).
pub const PEER_ID_SIZE: usize = 2 + SHA2_256_LEN as usize;

// ============================================
// PeerId
// ============================================

/// Stable identifier of a peer, derived from its long-term public key.
///
/// # Example
/// ```
/// use peerlink_common::types::PeerId;
///
/// let id = PeerId::from_public_key(b"marshalled public key");
/// let parsed: PeerId = id.to_string().parse().unwrap();
/// assert_eq!(id, parsed);
/// ```
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PeerId([u8; PEER_ID_SIZE]);

impl PeerId {
    /// Derives the peer id of a marshalled public key.
    #[must_use]
    pub fn from_public_key(marshalled: &[u8]) -> Self {
        let digest = Sha256::digest(marshalled);
        let mut bytes = [0u8; PEER_ID_SIZE];
        bytes[0] = MULTIHASH_SHA2_256;
        bytes[1] = SHA2_256_LEN;
        bytes[2..].copy_from_slice(&digest);
        Self(bytes)
    }

    /// Parses a peer id from its multihash bytes.
    ///
    /// # Errors
    /// Returns an error if the length or multihash header is wrong.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, CommonError> {
        if bytes.len() != PEER_ID_SIZE {
            return Err(CommonError::invalid_length(PEER_ID_SIZE, bytes.len()));
        }
        if bytes[0] != MULTIHASH_SHA2_256 || bytes[1] != SHA2_256_LEN {
            return Err(CommonError::invalid_peer_id("unsupported multihash header"));
        }
        let mut id = [0u8; PEER_ID_SIZE];
        id.copy_from_slice(bytes);
        Ok(Self(id))
    }

    /// Returns the raw multihash bytes.
    #[must_use]
    pub const fn as_bytes(&self) -> &[u8; PEER_ID_SIZE] {
        &self.0
    }

    /// Returns a short form suitable for log lines.
    #[must_use]
    pub fn short(&self) -> String {
        hex::encode(&self.0[2..8])
    }
}

impl fmt::Debug for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PeerId({}..)", self.short())
    }
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

impl FromStr for PeerId {
    type Err = CommonError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bytes = hex::decode(s).map_err(|e| CommonError::invalid_peer_id(e.to_string()))?;
        Self::from_bytes(&bytes)
    }
}

impl Serialize for PeerId {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for PeerId {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

impl AsRef<[u8]> for PeerId {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

// ============================================
// Tests
// ============================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_peer_id_is_deterministic() {
        let a = PeerId::from_public_key(b"key-a");
        let b = PeerId::from_public_key(b"key-a");
        let c = PeerId::from_public_key(b"key-b");

        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(a.as_bytes()[0], 0x12);
        assert_eq!(a.as_bytes()[1], 32);
    }

    #[test]
    fn test_peer_id_string_roundtrip() {
        let id = PeerId::from_public_key(b"some key");
        let text = id.to_string();
        assert_eq!(text.len(), PEER_ID_SIZE * 2);
        assert_eq!(text.parse::<PeerId>().unwrap(), id);
    }

    #[test]
    fn test_peer_id_rejects_bad_input() {
        assert!("zz".parse::<PeerId>().is_err());
        assert!(PeerId::from_bytes(&[0x12, 0x20]).is_err());

        let mut bytes = *PeerId::from_public_key(b"k").as_bytes();
        bytes[0] = 0x13;
        assert!(PeerId::from_bytes(&bytes).is_err());
    }

    #[test]
    fn test_peer_id_serde() {
        #[derive(Serialize, Deserialize)]
        struct Holder {
            id: PeerId,
        }

        let holder = Holder {
            id: PeerId::from_public_key(b"serde"),
        };
        let text = toml::to_string(&holder).unwrap();
        let back: Holder = toml::from_str(&text).unwrap();
        assert_eq!(back.id, holder.id);
    }
}
