// ============================================
// File: crates/peerlink-transport/src/lib.rs
// ============================================
//! # Peerlink Transport - Stream Connection Layer
//!
//! ## Creation Reason
//! Provides the raw byte-stream connections the swarm upgrades into
//! secure, multiplexed peer connections.
//!
//! ## Main Functionality
//!
//! ### Modules
//! - [`traits`]: `Transport` and `Listener` abstractions
//! - [`memory`]: In-process transport for tests and embedding
//! - [`tcp`]: TCP transport
//! - [`error`]: Transport-specific error types
//!
//! ## Architecture Position
//! ```text
//! ┌─────────────────────────────────────────────────────┐
//! │               peerlink-node                         │
//! │                    │                                │
//! │         ┌──────────┴──────────┐                    │
//! │         ▼                     ▼                    │
//! │   peerlink-core       peerlink-transport           │
//! │                        You are here ◄──            │
//! │         │                     │                    │
//! │         └──────────┬──────────┘                    │
//! │                    ▼                               │
//! │             peerlink-common                        │
//! └─────────────────────────────────────────────────────┘
//! ```
//!
//! ## ⚠️ Important Note for Next Developer
//! - Always use the traits for testability
//! - Streams are plain bytes; framing and encryption live above this crate
//!
//! ## Last Modified
//! v0.1.0 - Initial transport layer implementation

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod error;
pub mod memory;
pub mod tcp;
pub mod traits;

// Re-export primary types
pub use error::{Result, TransportError};
pub use memory::{MemoryHub, MemoryTransport};
pub use tcp::TcpTransport;
pub use traits::{AsyncStream, BoxedStream, Listener, Transport};
