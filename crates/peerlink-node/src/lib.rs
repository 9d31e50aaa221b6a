// ============================================
// File: crates/peerlink-node/src/lib.rs
// ============================================
//! # Peerlink Node Library
//!
//! ## Creation Reason
//! Turns the secure channel of `peerlink-core` and the transports of
//! `peerlink-transport` into a working peer-to-peer node.
//!
//! ## Main Functionality
//!
//! ### Modules
//! - [`netcore`]: Node lifecycle and dialing entry point
//! - [`services`]: Swarm, muxer, negotiation and peer book
//!   - [`services::swarm`]: Connection management
//!   - [`services::muxer`]: Stream multiplexing
//!   - [`services::negotiate`]: Protocol negotiation
//!   - [`services::peer_book`]: Known peers
//! - [`handlers`]: Application protocol handlers (ping)
//! - [`discovery`]: Peer discovery services
//! - [`dht`]: DHT interface and routing views
//! - [`events`]: Node events
//! - [`config`]: Node configuration
//! - [`error`]: Node error types
//!
//! ## Architecture Overview
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                          NetCore                            │
//! ├─────────────────────────────────────────────────────────────┤
//! │                                                             │
//! │  ┌─────────────┐    ┌─────────────┐    ┌─────────────────┐  │
//! │  │  Discovery  │───►│  PeerBook   │◄───│  PeerRouting    │  │
//! │  │  services   │    │             │    │  (DHT)          │  │
//! │  └─────────────┘    └──────┬──────┘    └─────────────────┘  │
//! │                            │ dial                           │
//! │                            ▼                                │
//! │  ┌─────────────────────────────────────────────────────┐    │
//! │  │                       Swarm                         │    │
//! │  │  SecureChannel ─► Muxer ─► Substreams ─► Handlers   │    │
//! │  └──────────────────────────┬──────────────────────────┘    │
//! │                             │                               │
//! ├─────────────────────────────┼───────────────────────────────┤
//! │                   Transport Layer                           │
//! │        ┌──────────────┐          ┌──────────────┐           │
//! │        │     TCP      │          │    Memory    │           │
//! │        └──────────────┘          └──────────────┘           │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## ⚠️ Important Note for Next Developer
//! - Configuration changes require restart (no hot-reload)
//! - `NetCore::stop` closes every connection; handlers see their
//!   substreams end
//!
//! ## Last Modified
//! v0.1.0 - Initial node library

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod config;
pub mod dht;
pub mod discovery;
pub mod error;
pub mod events;
pub mod handlers;
pub mod netcore;
pub mod services;

// Re-export primary types
pub use config::NodeConfig;
pub use dht::{ContentRouting, Dht, DhtRecords, PeerRouting};
pub use discovery::{BootstrapDiscovery, Discovery, DiscoverySink};
pub use error::{NodeError, Result};
pub use events::{EventBus, NodeEvent};
pub use handlers::{PingHandler, StreamHandler, PING_PROTOCOL};
pub use netcore::{NetCore, NetCoreBuilder, PeerRef};
pub use services::{PeerBook, PeerInfo, Swarm};
