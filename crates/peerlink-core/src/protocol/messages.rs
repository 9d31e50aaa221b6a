// ============================================
// File: crates/peerlink-core/src/protocol/messages.rs
// ============================================
//! # Handshake Message Definitions
//!
//! ## Creation Reason
//! Defines the structure of the messages exchanged during the secure
//! channel handshake.
//!
//! ## Main Functionality
//! - `Propose`: Nonce, identity key and capability lists
//! - `Exchange`: Ephemeral public key and its signature
//! - `PublicKeyMessage`: Typed envelope around long-term public keys
//!
//! ## Field Numbers
//! | Message | Field | Number | Kind |
//! |---------|-------|--------|------|
//! | Propose | rand | 1 | bytes |
//! | Propose | pubkey | 2 | bytes |
//! | Propose | exchanges | 3 | string |
//! | Propose | ciphers | 4 | string |
//! | Propose | hashes | 5 | string |
//! | Exchange | epubkey | 1 | bytes |
//! | Exchange | signature | 2 | bytes |
//! | PublicKey | type | 1 | enum |
//! | PublicKey | data | 2 | bytes |
//!
//! ## Last Modified
//! v0.1.0 - Initial message definitions

// ============================================
// KeyType
// ============================================

/// Algorithm of a marshalled long-term public key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u64)]
pub enum KeyType {
    /// RSA (recognized on the wire, not supported for verification).
    Rsa = 0,
    /// Ed25519.
    Ed25519 = 1,
    /// secp256k1 (recognized on the wire, not supported for verification).
    Secp256k1 = 2,
}

impl KeyType {
    /// Converts a wire value to a key type.
    #[must_use]
    pub const fn from_wire(value: u64) -> Option<Self> {
        match value {
            0 => Some(Self::Rsa),
            1 => Some(Self::Ed25519),
            2 => Some(Self::Secp256k1),
            _ => None,
        }
    }

    /// Returns the wire value.
    #[must_use]
    pub const fn as_wire(self) -> u64 {
        self as u64
    }
}

// ============================================
// PublicKeyMessage
// ============================================

/// Marshalled form of a long-term public key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublicKeyMessage {
    /// Key algorithm.
    pub key_type: KeyType,
    /// Raw key bytes.
    pub data: Vec<u8>,
}

// ============================================
// Propose
// ============================================

/// First handshake message, sent by both sides simultaneously.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Propose {
    /// Random nonce of the sender.
    pub rand: Vec<u8>,
    /// Marshalled long-term public key of the sender.
    pub pubkey: Vec<u8>,
    /// Comma-separated key agreement curves, most preferred first.
    pub exchanges: String,
    /// Comma-separated ciphers, most preferred first.
    pub ciphers: String,
    /// Comma-separated hashes, most preferred first.
    pub hashes: String,
}

// ============================================
// Exchange
// ============================================

/// Second handshake message carrying the signed ephemeral key.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Exchange {
    /// Uncompressed SEC1 ephemeral public key.
    pub epubkey: Vec<u8>,
    /// Signature over both proposals and `epubkey`.
    pub signature: Vec<u8>,
}
