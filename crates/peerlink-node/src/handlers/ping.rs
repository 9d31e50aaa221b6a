// ============================================
// File: crates/peerlink-node/src/handlers/ping.rs
// ============================================
//! # Ping Protocol
//!
//! ## Main Functionality
//! - `PingHandler`: Echoes every message back
//! - `ping`: Sends 32 random bytes and times the echo
//!
//! ## Last Modified
//! v0.1.0 - Initial ping protocol

use std::time::{Duration, Instant};

use async_trait::async_trait;
use rand::RngCore;
use tracing::{debug, trace};

use peerlink_common::PeerId;

use super::StreamHandler;
use crate::error::{NodeError, Result};
use crate::services::muxer::Substream;

/// Protocol tag.
pub const PING_PROTOCOL: &str = "/ipfs/ping/1.0.0";

/// Payload size of one ping.
pub const PING_SIZE: usize = 32;

/// Echo side of the ping protocol.
#[derive(Debug, Clone, Copy, Default)]
pub struct PingHandler;

#[async_trait]
impl StreamHandler for PingHandler {
    async fn handle(&self, remote: PeerId, mut stream: Substream) {
        while let Some(payload) = stream.recv().await {
            trace!(peer = %remote.short(), len = payload.len(), "Ping received");
            if stream.send(&payload).is_err() {
                break;
            }
        }
    }
}

/// Pings over a substream that negotiated [`PING_PROTOCOL`].
///
/// # Errors
/// - `StreamClosed` if the remote closed before echoing
/// - `PingMismatch` if the echo differs
pub async fn ping(stream: &mut Substream) -> Result<Duration> {
    let mut payload = [0u8; PING_SIZE];
    rand::thread_rng().fill_bytes(&mut payload);

    let started = Instant::now();
    stream.send(payload)?;
    let echo = stream.recv().await.ok_or(NodeError::StreamClosed)?;
    let rtt = started.elapsed();

    if echo[..] != payload[..] {
        return Err(NodeError::PingMismatch);
    }

    debug!(peer = %stream.remote_peer().short(), ?rtt, "Ping answered");
    Ok(rtt)
}
