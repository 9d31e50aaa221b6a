// ============================================
// File: crates/peerlink-node/src/services/mod.rs
// ============================================
//! # Node Services
//!
//! ## Creation Reason
//! Connection-level machinery of a node, kept apart from the `NetCore`
//! lifecycle and from application protocol handlers.
//!
//! ## Main Functionality
//!
//! ### Submodules
//! - [`swarm`]: Transports, listeners, connection upgrade and reuse
//! - [`muxer`]: Substreams over one secure connection
//! - [`negotiate`]: Protocol tag negotiation on a framed stream
//! - [`peer_book`]: Known peers and their addresses
//!
//! ## Service Architecture
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │                         Swarm                            │
//! │                                                          │
//! │  Transport ──► negotiate(secio) ──► SecureChannel        │
//! │                                         │                │
//! │                 negotiate(mplex) ◄──────┘                │
//! │                        │                                 │
//! │                        ▼                                 │
//! │                 MuxedConnection ──► Substream            │
//! │                                         │                │
//! │                 negotiate(protocol) ◄───┘                │
//! └──────────────────────────────────────────────────────────┘
//!             ▲
//!             │ dial targets
//!      ┌──────┴──────┐
//!      │  PeerBook   │
//!      └─────────────┘
//! ```
//!
//! ## ⚠️ Important Note for Next Developer
//! - All services are `Send + Sync` and shared through `Arc`
//! - The peer book never stores `/p2p/` suffixes on addresses
//!
//! ## Last Modified
//! v0.1.0 - Initial services structure

pub mod muxer;
pub mod negotiate;
pub mod peer_book;
pub mod swarm;

// Re-export primary types
pub use muxer::{Endpoint, FrameMuxer, MuxedConnection, Muxer, Substream, MPLEX_PROTOCOL};
pub use negotiate::{MessageIo, RawFramed};
pub use peer_book::{PeerBook, PeerInfo};
pub use swarm::Swarm;
