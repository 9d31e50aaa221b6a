// ============================================
// File: crates/peerlink-node/src/discovery.rs
// ============================================
//! # Peer Discovery
//!
//! ## Creation Reason
//! Discovery services find peers the node did not know about. Whatever
//! they find goes into the peer book and out as `PeerDiscovery` events.
//!
//! ## Main Functionality
//! - `Discovery`: Trait every discovery service implements
//! - `BootstrapDiscovery`: Reports a fixed list of peers once on start
//!
//! ## ⚠️ Important Note for Next Developer
//! - `start` must return promptly; long-running discovery spawns its own task
//! - Sends to a closed sink are not errors, the node may be stopping
//!
//! ## Last Modified
//! v0.1.0 - Initial discovery services

use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use tokio::sync::mpsc;
use tracing::{debug, info};

use peerlink_common::{Multiaddr, MultiaddrExt};

use crate::error::{NodeError, Result};
use crate::services::peer_book::PeerInfo;

/// Channel discovered peers are reported on.
pub type DiscoverySink = mpsc::Sender<PeerInfo>;

// ============================================
// Discovery Trait
// ============================================

/// A source of peers.
#[async_trait]
pub trait Discovery: Send + Sync {
    /// Short name used in logs.
    fn tag(&self) -> &'static str;

    /// Starts reporting peers to `sink`.
    ///
    /// # Errors
    /// `Discovery` if the service cannot start.
    async fn start(&self, sink: DiscoverySink) -> Result<()>;

    /// Stops reporting peers.
    ///
    /// # Errors
    /// `Discovery` if shutting down failed.
    async fn stop(&self) -> Result<()>;
}

// ============================================
// BootstrapDiscovery
// ============================================

/// Reports a fixed list of bootstrap peers.
#[derive(Debug)]
pub struct BootstrapDiscovery {
    peers: Vec<PeerInfo>,
    running: AtomicBool,
}

impl BootstrapDiscovery {
    /// Tag used in logs.
    pub const TAG: &'static str = "bootstrap";

    /// Creates the service from known peers.
    #[must_use]
    pub fn new(peers: Vec<PeerInfo>) -> Self {
        Self {
            peers,
            running: AtomicBool::new(false),
        }
    }

    /// Creates the service from `/.../p2p/<id>` addresses.
    ///
    /// Addresses of the same peer are grouped into one entry.
    ///
    /// # Errors
    /// `InvalidPeerRef` if an address has no `/p2p/` component.
    pub fn from_multiaddrs(addrs: &[Multiaddr]) -> Result<Self> {
        let mut peers: Vec<PeerInfo> = Vec::new();
        for addr in addrs {
            let id = addr
                .peer_id()
                .ok_or_else(|| NodeError::invalid_peer_ref(addr.to_string(), "missing /p2p/<id>"))?;
            match peers.iter_mut().find(|p| p.id == id) {
                Some(existing) => {
                    existing.add_multiaddr(addr.clone());
                }
                None => peers.push(PeerInfo::with_addrs(id, [addr.clone()])),
            }
        }
        Ok(Self::new(peers))
    }

    /// Configured peers.
    #[must_use]
    pub fn peers(&self) -> &[PeerInfo] {
        &self.peers
    }

    /// Returns `true` between `start` and `stop`.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }
}

#[async_trait]
impl Discovery for BootstrapDiscovery {
    fn tag(&self) -> &'static str {
        Self::TAG
    }

    async fn start(&self, sink: DiscoverySink) -> Result<()> {
        if self.running.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        info!(peers = self.peers.len(), "Bootstrap discovery started");
        for peer in &self.peers {
            if sink.send(peer.clone()).await.is_err() {
                debug!("Discovery sink closed");
                break;
            }
        }
        Ok(())
    }

    async fn stop(&self) -> Result<()> {
        self.running.store(false, Ordering::Release);
        debug!("Bootstrap discovery stopped");
        Ok(())
    }
}

// ============================================
// Tests
// ============================================

#[cfg(test)]
mod tests {
    use peerlink_common::{address, PeerId};

    use super::*;

    #[tokio::test]
    async fn test_reports_each_peer_once() {
        let a = PeerId::from_public_key(b"a");
        let b = PeerId::from_public_key(b"b");
        let discovery = BootstrapDiscovery::from_multiaddrs(&[
            address::memory(1).with_peer_id(&a).unwrap(),
            address::memory(2).with_peer_id(&b).unwrap(),
            address::memory(3).with_peer_id(&a).unwrap(),
        ])
        .unwrap();
        assert_eq!(discovery.peers().len(), 2);
        assert_eq!(discovery.peers()[0].multiaddrs().len(), 2);

        let (tx, mut rx) = mpsc::channel(8);
        discovery.start(tx.clone()).await.unwrap();
        discovery.start(tx).await.unwrap();
        assert!(discovery.is_running());

        assert_eq!(rx.recv().await.unwrap().id, a);
        assert_eq!(rx.recv().await.unwrap().id, b);
        assert!(rx.recv().await.is_none());

        discovery.stop().await.unwrap();
        assert!(!discovery.is_running());
    }

    #[test]
    fn test_requires_peer_id() {
        let err = BootstrapDiscovery::from_multiaddrs(&[address::memory(9)]).unwrap_err();
        assert!(matches!(err, NodeError::InvalidPeerRef { .. }));
    }
}
