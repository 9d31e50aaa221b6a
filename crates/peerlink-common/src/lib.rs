// ============================================
// File: crates/peerlink-common/src/lib.rs
// ============================================
//! # Peerlink Common - Shared Types Library
//!
//! ## Creation Reason
//! Provides the identifiers and addresses every other peerlink crate speaks
//! in, so that the handshake, the transports and the swarm agree on what a
//! peer is and where it can be reached.
//!
//! ## Main Functionality
//! - [`types`]: `PeerId` (multihash of a marshalled public key)
//! - [`address`]: `Multiaddr` from the multiaddr crate plus peer id helpers
//! - [`error`]: Common error types and result aliases
//!
//! ## Architecture Position
//! ```text
//! ┌─────────────────────────────────────────────────────┐
//! │                 peerlink-node                       │
//! │                    │                                │
//! │         ┌──────────┴──────────┐                    │
//! │         ▼                     ▼                    │
//! │   peerlink-core       peerlink-transport           │
//! │         │                     │                    │
//! │         └──────────┬──────────┘                    │
//! │                    ▼                               │
//! │             peerlink-common  ◄── You are here     │
//! └─────────────────────────────────────────────────────┘
//! ```
//!
//! ## ⚠️ Important Note for Next Developer
//! - This crate is the foundation - changes affect everything
//! - Keep dependencies minimal (no async runtime here)
//! - `PeerId` derivation must stay byte-identical with the handshake
//!
//! ## Last Modified
//! v0.1.0 - Initial implementation

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod address;
pub mod error;
pub mod types;

// Re-export commonly used items at crate root
pub use error::{CommonError, Result};
pub use address::{Multiaddr, MultiaddrExt, Protocol};
pub use types::{PeerId, PEER_ID_SIZE};
