// ============================================
// File: crates/peerlink-core/src/lib.rs
// ============================================
//! # Peerlink Core - Secure Channel & Cryptography Library
//!
//! ## Creation Reason
//! Provides the secure channel every peerlink connection runs through: a
//! mutually authenticated handshake that negotiates algorithms, agrees on
//! ephemeral keys and then encrypts and authenticates every frame.
//!
//! ## Main Functionality
//!
//! ### Protocol Module ([`protocol`])
//! - `Propose` / `Exchange` message definitions
//! - Protobuf-compatible codec and length-prefixed framing
//!
//! ### Crypto Module ([`crypto`])
//! - Key types (`IdentityKeyPair`, `IdentityPublicKey`, `EphemeralKeyPair`)
//! - Capability lists and `select_best`
//! - Key stretcher and per-direction AES-CTR + HMAC
//!
//! ### Handshake Module ([`handshake`])
//! - `HandshakeState` state machine and its steps
//!
//! ### Channel Module ([`channel`])
//! - `SecureChannel::encrypt` wrapping a raw stream
//! - `SecureConnection` message handle
//!
//! ## Architecture Position
//! ```text
//! ┌─────────────────────────────────────────────────────┐
//! │                 peerlink-node                       │
//! │                    │                                │
//! │         ┌──────────┴──────────┐                    │
//! │         ▼                     ▼                    │
//! │   peerlink-core  ◄──    peerlink-transport         │
//! │   You are here                │                    │
//! │         │                     │                    │
//! │         └──────────┬──────────┘                    │
//! │                    ▼                               │
//! │             peerlink-common                        │
//! └─────────────────────────────────────────────────────┘
//! ```
//!
//! ## Security Guarantees
//! - **Authenticity**: Ed25519 signatures bind both proposals and the
//!   ephemeral key
//! - **Forward Secrecy**: Fresh ECDH keys per handshake
//! - **Integrity**: HMAC on every frame, checked before decryption
//! - **Liveness**: Each side echoes the other's nonce under the new keys
//!
//! ## ⚠️ Important Note for Next Developer
//! - ALL cryptographic code uses audited RustCrypto implementations
//! - Wire formats here are shared with other implementations
//!
//! ## Last Modified
//! v0.1.0 - Initial implementation

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod channel;
pub mod crypto;
pub mod error;
pub mod handshake;
pub mod protocol;

// Re-export commonly used items at crate root
pub use channel::{ChannelState, SecioConfig, SecureChannel, SecureConnection};
pub use crypto::{Capabilities, CipherKind, Curve, HashKind, IdentityKeyPair, IdentityPublicKey};
pub use error::{CoreError, Result};
pub use handshake::{HandshakeState, Phase};
pub use protocol::SECIO_PROTOCOL;
