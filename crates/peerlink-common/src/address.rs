// ============================================
// File: crates/peerlink-common/src/address.rs
// ============================================
//! # Addresses
//!
//! ## Creation Reason
//! Peers advertise where they can be reached with multiaddrs. The type and
//! its text and binary forms come from the `multiaddr` crate; this module
//! adds the few questions the swarm and the transports ask of an address.
//!
//! ## Main Functionality
//! - Re-exports `Multiaddr` and `Protocol`
//! - `MultiaddrExt`: `/p2p/` peer id access and circuit detection
//! - `memory`: Builds a `/memory/<port>` address
//! - `parse`: Parses text into a `Multiaddr` with a `CommonError`
//!
//! ## Text Form
//! ```text
//! /ip4/127.0.0.1/tcp/4001
//! /ip6/::1/tcp/4001/ws
//! /dns4/example.com/tcp/443/ws
//! /memory/1001
//! /ip4/1.2.3.4/tcp/4001/p2p/Qm...
//! /p2p-circuit/p2p/Qm...
//! ```
//!
//! ## ⚠️ Important Note for Next Developer
//! - `/p2p/` carries the peer id multihash, printed in base58
//! - A `/p2p/` multihash that is not a SHA2-256 peer id reads as no peer id
//!
//! ## Last Modified
//! v0.1.0 - Built on the multiaddr crate

use multiaddr::multihash::Multihash;
pub use multiaddr::{Multiaddr, Protocol};

use crate::error::{CommonError, Result};
use crate::types::PeerId;

// ============================================
// Constructors
// ============================================

/// Creates a `/memory/<port>` address.
///
/// # Example
/// ```
/// use peerlink_common::address;
///
/// assert_eq!(address::memory(7).to_string(), "/memory/7");
/// ```
#[must_use]
pub fn memory(port: u64) -> Multiaddr {
    Multiaddr::empty().with(Protocol::Memory(port))
}

/// Parses the text form of a multiaddr.
///
/// # Errors
/// `InvalidMultiaddr` naming the text and the parse failure.
pub fn parse(text: &str) -> Result<Multiaddr> {
    text.parse()
        .map_err(|e: multiaddr::Error| CommonError::invalid_multiaddr(text, e.to_string()))
}

// ============================================
// PeerId <-> Multihash
// ============================================

impl PeerId {
    /// Returns the peer id as a multihash for `/p2p/` components.
    ///
    /// # Errors
    /// `InvalidPeerId` if the multihash cannot be built.
    pub fn to_multihash(&self) -> Result<Multihash> {
        Multihash::from_bytes(self.as_bytes()).map_err(|e| CommonError::invalid_peer_id(e.to_string()))
    }

    /// Reads a peer id out of a `/p2p/` multihash.
    ///
    /// # Errors
    /// `InvalidPeerId` for anything but a SHA2-256 peer id.
    pub fn from_multihash(hash: &Multihash) -> Result<Self> {
        Self::from_bytes(&hash.to_bytes())
    }
}

// ============================================
// MultiaddrExt
// ============================================

/// Peer id and relay helpers over a [`Multiaddr`].
pub trait MultiaddrExt: Sized {
    /// Returns the peer id of the last `/p2p/` component, if any.
    fn peer_id(&self) -> Option<PeerId>;

    /// Returns `true` if the address goes through a circuit relay.
    fn is_circuit(&self) -> bool;

    /// Returns the address with any trailing `/p2p/` components removed.
    #[must_use]
    fn without_peer_id(&self) -> Self;

    /// Returns the address with a `/p2p/<peer>` suffix appended.
    ///
    /// # Errors
    /// `InvalidPeerId` if the peer id cannot be encoded.
    fn with_peer_id(self, peer: &PeerId) -> Result<Self>;
}

impl MultiaddrExt for Multiaddr {
    fn peer_id(&self) -> Option<PeerId> {
        self.iter()
            .filter_map(|p| match p {
                Protocol::P2p(hash) => Some(hash),
                _ => None,
            })
            .last()
            .and_then(|hash| PeerId::from_multihash(&hash).ok())
    }

    fn is_circuit(&self) -> bool {
        self.iter().any(|p| matches!(p, Protocol::P2pCircuit))
    }

    fn without_peer_id(&self) -> Self {
        let mut addr = self.clone();
        while matches!(addr.iter().last(), Some(Protocol::P2p(_))) {
            addr.pop();
        }
        addr
    }

    fn with_peer_id(self, peer: &PeerId) -> Result<Self> {
        Ok(self.with(Protocol::P2p(peer.to_multihash()?)))
    }
}

// ============================================
// Tests
// ============================================

#[cfg(test)]
mod tests {
    use std::net::Ipv4Addr;

    use super::*;

    #[test]
    fn test_parse_tcp() {
        let addr = parse("/ip4/127.0.0.1/tcp/9090").unwrap();
        let parts: Vec<_> = addr.iter().collect();
        assert_eq!(
            parts,
            vec![Protocol::Ip4(Ipv4Addr::LOCALHOST), Protocol::Tcp(9090)]
        );
        assert_eq!(addr.to_string(), "/ip4/127.0.0.1/tcp/9090");
    }

    #[test]
    fn test_peer_suffix_goes_through_multihash() {
        let id = PeerId::from_public_key(b"peer");
        let addr = parse("/ip4/10.0.0.1/tcp/1/ws").unwrap().with_peer_id(&id).unwrap();

        let text = addr.to_string();
        assert!(text.starts_with("/ip4/10.0.0.1/tcp/1/ws/p2p/Qm"));
        let back = parse(&text).unwrap();
        assert_eq!(back.peer_id(), Some(id));
        assert_eq!(back.without_peer_id().to_string(), "/ip4/10.0.0.1/tcp/1/ws");
        assert_eq!(back, addr);
    }

    #[test]
    fn test_foreign_multihash_is_not_a_peer_id() {
        let identity = Multihash::wrap(0x00, b"inline key").unwrap();
        let addr = memory(1).with(Protocol::P2p(identity));
        assert_eq!(addr.peer_id(), None);
        assert_eq!(addr.without_peer_id(), memory(1));
    }

    #[test]
    fn test_circuit_detection() {
        let id = PeerId::from_public_key(b"relay");
        let addr = parse("/p2p-circuit").unwrap().with_peer_id(&id).unwrap();
        assert!(addr.is_circuit());
        assert!(!memory(3).is_circuit());
    }

    #[test]
    fn test_parse_errors() {
        for bad in ["ip4/1.2.3.4", "/ip4/999.1.1.1", "/tcp/notaport", "/ip4", "/memory/name"] {
            match parse(bad) {
                Err(CommonError::InvalidMultiaddr { addr, .. }) => assert_eq!(addr, bad),
                other => panic!("expected InvalidMultiaddr for {bad}, got {other:?}"),
            }
        }
    }

    #[test]
    fn test_serde_as_text() {
        #[derive(serde::Serialize, serde::Deserialize)]
        struct Holder {
            addr: Multiaddr,
        }

        let holder: Holder = toml::from_str("addr = \"/dns4/example.com/tcp/443\"").unwrap();
        assert_eq!(
            holder.addr.iter().next(),
            Some(Protocol::Dns4("example.com".into()))
        );
        assert!(toml::to_string(&holder).unwrap().contains("/dns4/example.com/tcp/443"));
    }
}
