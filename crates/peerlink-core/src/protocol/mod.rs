// ============================================
// File: crates/peerlink-core/src/protocol/mod.rs
// ============================================
//! # Protocol Module
//!
//! ## Creation Reason
//! Defines the handshake wire format: the messages exchanged while
//! establishing a secure channel and the framing that carries them.
//!
//! ## Main Functionality
//!
//! ### Submodules
//! - [`messages`]: `Propose`, `Exchange` and marshalled `PublicKeyMessage`
//! - [`codec`]: Protobuf-compatible encoding and length-prefixed framing
//!
//! ## Protocol Overview
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │  A ──────────── Propose (nonce, pubkey, lists) ─────────► B │
//! │  A ◄─────────── Propose (nonce, pubkey, lists) ────────── B │
//! │  A ──────────── Exchange (epubkey, signature) ──────────► B │
//! │  A ◄─────────── Exchange (epubkey, signature) ─────────── B │
//! ├─────────────────────────────────────────────────────────────┤
//! │  A ═══════════ seal(B's nonce) ═════════════════════════► B │
//! │  A ◄══════════ seal(A's nonce) ══════════════════════════ B │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//! Both sides send first; neither waits for the other before writing.
//!
//! ## ⚠️ Important Note for Next Developer
//! - Field numbers are shared with other implementations, never renumber
//! - Capability lists travel as comma-separated strings
//!
//! ## Last Modified
//! v0.1.0 - Initial protocol definitions

pub mod codec;
pub mod messages;

pub use codec::{read_frame, write_frame, Codec, ProtobufCodec, MAX_FRAME_SIZE};
pub use messages::{Exchange, KeyType, Propose, PublicKeyMessage};

/// Protocol tag advertised during stream negotiation.
pub const SECIO_PROTOCOL: &str = "/secio/1.0.0";
