// ============================================
// File: crates/peerlink-node/src/events.rs
// ============================================
//! # Node Events
//!
//! ## Main Functionality
//! - `NodeEvent`: Lifecycle and peer notifications
//! - `EventBus`: Broadcast sender shared by the swarm and the `NetCore`
//!
//! ## ⚠️ Important Note for Next Developer
//! - Emitting with no subscriber is not an error
//! - Slow subscribers see `RecvError::Lagged`, they do not block the node
//!
//! ## Last Modified
//! v0.1.0 - Initial event definitions

use tokio::sync::broadcast;
use tracing::trace;

use peerlink_common::PeerId;

use crate::services::peer_book::PeerInfo;

/// Events buffered per subscriber before it starts lagging.
pub const EVENT_CAPACITY: usize = 256;

/// Notification published by a node.
///
/// Connection-manager level notifications (`left`, `joined`, `fullsetup`
/// and the catch-all `all`) are not published; subscribers derive them from
/// `PeerConnect` and `PeerDisconnect`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodeEvent {
    /// A muxed connection to the peer was established.
    PeerConnect(PeerId),
    /// The last connection to the peer closed.
    PeerDisconnect(PeerId),
    /// A discovery service reported the peer.
    PeerDiscovery(PeerInfo),
    /// `start()` completed.
    Start,
    /// `stop()` completed.
    Stop,
}

/// Cloneable broadcast handle for [`NodeEvent`]s.
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<NodeEvent>,
}

impl EventBus {
    /// Creates a bus with [`EVENT_CAPACITY`].
    #[must_use]
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(EVENT_CAPACITY);
        Self { tx }
    }

    /// Publishes an event to every current subscriber.
    pub fn emit(&self, event: NodeEvent) {
        trace!(?event, "Emitting node event");
        let _ = self.tx.send(event);
    }

    /// Subscribes to events published from now on.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<NodeEvent> {
        self.tx.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}
