// ============================================
// File: crates/peerlink-node/src/services/peer_book.rs
// ============================================
//! # Peer Book
//!
//! ## Creation Reason
//! Remembers what the node knows about other peers: their addresses and
//! the protocols they speak. Owned by the `NetCore`, shared by `Arc` with
//! discovery and dialing.
//!
//! ## Main Functionality
//! - `PeerInfo`: Peer id, ordered address set, protocol set
//! - `PeerBook`: Concurrent `PeerId → PeerInfo` map with merge-on-put
//!
//! ## ⚠️ Important Note for Next Developer
//! - `put` MERGES into an existing entry, it never drops known addresses
//! - Returned `PeerInfo`s are snapshots; mutate through the book
//!
//! ## Last Modified
//! v0.1.0 - Initial peer book

use std::collections::BTreeSet;

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tracing::trace;

use peerlink_common::{Multiaddr, MultiaddrExt, PeerId};

// ============================================
// PeerInfo
// ============================================

/// What is known about one peer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerInfo {
    /// Peer identity.
    pub id: PeerId,
    /// Known addresses, in dial preference order, without duplicates.
    multiaddrs: Vec<Multiaddr>,
    /// Protocol tags the peer is known to support.
    pub protocols: BTreeSet<String>,
}

impl PeerInfo {
    /// Creates an entry with no addresses.
    #[must_use]
    pub const fn new(id: PeerId) -> Self {
        Self {
            id,
            multiaddrs: Vec::new(),
            protocols: BTreeSet::new(),
        }
    }

    /// Creates an entry with the given addresses.
    #[must_use]
    pub fn with_addrs(id: PeerId, addrs: impl IntoIterator<Item = Multiaddr>) -> Self {
        let mut info = Self::new(id);
        for addr in addrs {
            info.add_multiaddr(addr);
        }
        info
    }

    /// Addresses in dial order.
    #[must_use]
    pub fn multiaddrs(&self) -> &[Multiaddr] {
        &self.multiaddrs
    }

    /// Appends an address unless already present.
    ///
    /// A trailing `/p2p/<id>` is stripped. Returns `true` if added.
    pub fn add_multiaddr(&mut self, addr: Multiaddr) -> bool {
        let addr = addr.without_peer_id();
        if addr.is_empty() || self.multiaddrs.contains(&addr) {
            return false;
        }
        self.multiaddrs.push(addr);
        true
    }

    /// Replaces the address list, keeping order and dropping duplicates.
    pub fn set_multiaddrs(&mut self, addrs: impl IntoIterator<Item = Multiaddr>) {
        self.multiaddrs.clear();
        for addr in addrs {
            self.add_multiaddr(addr);
        }
    }

    /// Removes an address. Returns `true` if it was present.
    pub fn remove_multiaddr(&mut self, addr: &Multiaddr) -> bool {
        let before = self.multiaddrs.len();
        self.multiaddrs.retain(|a| a != addr);
        before != self.multiaddrs.len()
    }

    /// Folds the addresses and protocols of `other` into `self`.
    ///
    /// Existing addresses keep their position; new ones are appended.
    pub fn merge(&mut self, other: &Self) {
        for addr in &other.multiaddrs {
            self.add_multiaddr(addr.clone());
        }
        self.protocols.extend(other.protocols.iter().cloned());
    }
}

// ============================================
// PeerBook
// ============================================

/// Concurrent store of known peers.
#[derive(Debug, Default)]
pub struct PeerBook {
    peers: DashMap<PeerId, PeerInfo>,
}

impl PeerBook {
    /// Creates an empty book.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores `info`, merging with an existing entry. Returns the result.
    pub fn put(&self, info: PeerInfo) -> PeerInfo {
        let mut entry = self
            .peers
            .entry(info.id)
            .or_insert_with(|| PeerInfo::new(info.id));
        entry.merge(&info);
        trace!(peer = %info.id.short(), addrs = entry.multiaddrs.len(), "Peer book updated");
        entry.clone()
    }

    /// Returns a snapshot of the entry for `id`.
    #[must_use]
    pub fn get(&self, id: &PeerId) -> Option<PeerInfo> {
        self.peers.get(id).map(|e| e.value().clone())
    }

    /// Returns `true` if the peer is known.
    #[must_use]
    pub fn has(&self, id: &PeerId) -> bool {
        self.peers.contains_key(id)
    }

    /// Forgets a peer.
    pub fn remove(&self, id: &PeerId) -> Option<PeerInfo> {
        self.peers.remove(id).map(|(_, info)| info)
    }

    /// Snapshot of every entry.
    #[must_use]
    pub fn peers(&self) -> Vec<PeerInfo> {
        self.peers.iter().map(|e| e.value().clone()).collect()
    }

    /// Number of known peers.
    #[must_use]
    pub fn len(&self) -> usize {
        self.peers.len()
    }

    /// Returns `true` if no peer is known.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }
}

// ============================================
// Tests
// ============================================

#[cfg(test)]
mod tests {
    use super::*;
    use peerlink_common::address;

    fn peer(seed: &[u8]) -> PeerId {
        PeerId::from_public_key(seed)
    }

    #[test]
    fn test_addresses_are_an_ordered_set() {
        let id = peer(b"a");
        let info = PeerInfo::with_addrs(
            id,
            [
                address::memory(1),
                address::memory(2),
                address::memory(1).with_peer_id(&id).unwrap(),
            ],
        );
        assert_eq!(
            info.multiaddrs(),
            &[address::memory(1), address::memory(2)]
        );
    }

    #[test]
    fn test_put_merges() {
        let book = PeerBook::new();
        let id = peer(b"a");

        book.put(PeerInfo::with_addrs(id, [address::memory(1)]));
        let mut second = PeerInfo::with_addrs(id, [address::memory(2), address::memory(1)]);
        second.protocols.insert("/ipfs/ping/1.0.0".into());
        let merged = book.put(second);

        assert_eq!(
            merged.multiaddrs(),
            &[address::memory(1), address::memory(2)]
        );
        assert!(merged.protocols.contains("/ipfs/ping/1.0.0"));
        assert_eq!(book.len(), 1);
        assert_eq!(book.get(&id), Some(merged));
    }

    #[test]
    fn test_remove() {
        let book = PeerBook::new();
        let id = peer(b"a");
        book.put(PeerInfo::new(id));
        assert!(book.has(&id));
        assert!(book.remove(&id).is_some());
        assert!(book.is_empty());
    }

    #[test]
    fn test_set_and_remove_multiaddr() {
        let mut info = PeerInfo::new(peer(b"a"));
        info.set_multiaddrs([address::memory(8), address::memory(9)]);
        assert!(info.remove_multiaddr(&address::memory(8)));
        assert!(!info.remove_multiaddr(&address::memory(8)));
        assert_eq!(info.multiaddrs(), &[address::memory(9)]);
    }
}
