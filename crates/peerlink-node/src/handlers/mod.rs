// ============================================
// File: crates/peerlink-node/src/handlers/mod.rs
// ============================================
//! # Protocol Handlers
//!
//! ## Creation Reason
//! Application protocols run over negotiated substreams. A handler is
//! registered per protocol tag and receives every inbound substream that
//! negotiated that tag.
//!
//! ## Main Functionality
//!
//! ### Submodules
//! - [`ping`]: `/ipfs/ping/1.0.0` echo and round-trip measurement
//!
//! ## Handler Flow
//! ```text
//! remote opens substream
//!        │
//!        ▼
//! negotiate tag ──unknown──► "na"
//!        │ known
//!        ▼
//! StreamHandler::handle(remote, substream)   (own task)
//! ```
//!
//! ## ⚠️ Important Note for Next Developer
//! - Each handler call runs in its own task; long-lived handlers are fine
//! - Drain or drop the substream, an unread one stalls its connection
//!
//! ## Last Modified
//! v0.1.0 - Initial handlers structure

pub mod ping;

use async_trait::async_trait;

use peerlink_common::PeerId;

use crate::services::muxer::Substream;

pub use ping::{PingHandler, PING_PROTOCOL};

/// Serves one application protocol.
#[async_trait]
pub trait StreamHandler: Send + Sync {
    /// Handles an inbound substream that negotiated this protocol.
    async fn handle(&self, remote: PeerId, stream: Substream);
}
