// ============================================
// File: crates/peerlink-transport/src/memory.rs
// ============================================
//! # In-Memory Transport
//!
//! ## Creation Reason
//! Lets several nodes in one process connect to each other without
//! sockets, for tests and embedded setups.
//!
//! ## Main Functionality
//! - `MemoryHub`: Registry of listening ports, shared by the transports
//!   that should see each other
//! - `MemoryTransport`: Dials and listens on `/memory/<port>`
//! - `MemoryListener`: Receives the far end of each dialed duplex pipe
//! - Listening on `/memory/0` picks a free port
//!
//! ## Usage in Tests
//! ```
//! use peerlink_common::address;
//! use peerlink_transport::memory::{MemoryHub, MemoryTransport};
//! use peerlink_transport::traits::Transport;
//!
//! # #[tokio::main]
//! # async fn main() {
//! let hub = MemoryHub::new();
//! let a = MemoryTransport::new(hub.clone());
//! let b = MemoryTransport::new(hub);
//!
//! let mut listener = b.listen(&address::memory(2)).await.unwrap();
//! let _stream = a.dial(&address::memory(2)).await.unwrap();
//! let (_inbound, _from) = listener.accept().await.unwrap();
//! # }
//! ```
//!
//! ## ⚠️ Important Note for Next Developer
//! - There is no global hub: transports only see ports in the hub they got
//! - Dropping the listener frees the port
//! - Dialers get ports from the ephemeral range so they never collide
//!   with a port someone asked for
//!
//! ## Last Modified
//! v0.1.0 - Initial memory transport

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::io::DuplexStream;
use tokio::sync::mpsc;
use tracing::debug;

use peerlink_common::{address, Multiaddr, Protocol};

use crate::error::{Result, TransportError};
use crate::traits::{BoxedStream, Listener, Transport};

// ============================================
// Constants
// ============================================

/// Bytes buffered in each direction of a memory pipe.
const PIPE_BUFFER: usize = 256 * 1024;

/// Pending inbound connections per listener.
const ACCEPT_BACKLOG: usize = 64;

/// First port handed out for `/memory/0` listens and dialer addresses.
const EPHEMERAL_PORT_BASE: u64 = 1 << 32;

type Incoming = (DuplexStream, Multiaddr);

// ============================================
// MemoryHub
// ============================================

/// Registry connecting memory transports.
#[derive(Clone)]
pub struct MemoryHub {
    listeners: Arc<DashMap<u64, mpsc::Sender<Incoming>>>,
    next_port: Arc<AtomicU64>,
}

impl MemoryHub {
    /// Creates an empty hub.
    #[must_use]
    pub fn new() -> Self {
        Self {
            listeners: Arc::new(DashMap::new()),
            next_port: Arc::new(AtomicU64::new(EPHEMERAL_PORT_BASE)),
        }
    }

    /// Returns `true` if something listens on `port`.
    #[must_use]
    pub fn is_listening(&self, port: u64) -> bool {
        self.listeners
            .get(&port)
            .is_some_and(|tx| !tx.is_closed())
    }

    fn ephemeral_port(&self) -> u64 {
        self.next_port.fetch_add(1, Ordering::Relaxed)
    }
}

impl Default for MemoryHub {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for MemoryHub {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryHub")
            .field("listeners", &self.listeners.len())
            .finish()
    }
}

// ============================================
// MemoryTransport
// ============================================

/// Transport over in-process duplex pipes.
#[derive(Debug, Clone)]
pub struct MemoryTransport {
    hub: MemoryHub,
}

impl MemoryTransport {
    /// Transport tag.
    pub const TAG: &'static str = "memory";

    /// Creates a transport attached to `hub`.
    #[must_use]
    pub const fn new(hub: MemoryHub) -> Self {
        Self { hub }
    }

    fn port_of(addr: &Multiaddr) -> Option<u64> {
        let mut parts = addr.iter();
        let port = match parts.next() {
            Some(Protocol::Memory(port)) => port,
            _ => return None,
        };
        match parts.next() {
            None | Some(Protocol::P2p(_)) => Some(port),
            Some(_) => None,
        }
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    fn tag(&self) -> &'static str {
        Self::TAG
    }

    fn can_dial(&self, addr: &Multiaddr) -> bool {
        Self::port_of(addr).is_some()
    }

    async fn dial(&self, addr: &Multiaddr) -> Result<BoxedStream> {
        let port = Self::port_of(addr).ok_or_else(|| TransportError::unsupported(Self::TAG, addr))?;
        let tx = self
            .hub
            .listeners
            .get(&port)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| TransportError::ConnectionRefused { addr: addr.clone() })?;

        let dialer_addr = address::memory(self.hub.ephemeral_port());
        let (local, remote) = tokio::io::duplex(PIPE_BUFFER);

        tx.send((remote, dialer_addr))
            .await
            .map_err(|_| TransportError::ConnectionRefused { addr: addr.clone() })?;

        debug!(addr = %addr, "Memory dial connected");
        Ok(Box::new(local))
    }

    async fn listen(&self, addr: &Multiaddr) -> Result<Box<dyn Listener>> {
        let port = match Self::port_of(addr) {
            Some(0) => self.hub.ephemeral_port(),
            Some(port) => port,
            None => return Err(TransportError::unsupported(Self::TAG, addr)),
        };

        let (tx, rx) = mpsc::channel(ACCEPT_BACKLOG);
        match self.hub.listeners.entry(port) {
            dashmap::mapref::entry::Entry::Occupied(mut entry) => {
                if !entry.get().is_closed() {
                    return Err(TransportError::AddressInUse { addr: addr.clone() });
                }
                entry.insert(tx.clone());
            }
            dashmap::mapref::entry::Entry::Vacant(entry) => {
                entry.insert(tx.clone());
            }
        }

        debug!(port, "Memory listener registered");
        Ok(Box::new(MemoryListener {
            hub: self.hub.clone(),
            local_addr: address::memory(port),
            port,
            tx,
            rx,
        }))
    }
}

// ============================================
// MemoryListener
// ============================================

/// Listener side of a memory address.
pub struct MemoryListener {
    hub: MemoryHub,
    port: u64,
    local_addr: Multiaddr,
    tx: mpsc::Sender<Incoming>,
    rx: mpsc::Receiver<Incoming>,
}

#[async_trait]
impl Listener for MemoryListener {
    fn local_addr(&self) -> &Multiaddr {
        &self.local_addr
    }

    async fn accept(&mut self) -> Result<(BoxedStream, Multiaddr)> {
        let (stream, from) = self.rx.recv().await.ok_or(TransportError::ListenerClosed)?;
        Ok((Box::new(stream), from))
    }
}

impl Drop for MemoryListener {
    fn drop(&mut self) {
        self.hub
            .listeners
            .remove_if(&self.port, |_, tx| tx.same_channel(&self.tx));
        debug!(port = self.port, "Memory listener removed");
    }
}

// ============================================
// Tests
// ============================================

#[cfg(test)]
mod tests {
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    use super::*;
    use peerlink_common::{MultiaddrExt, PeerId};

    #[tokio::test]
    async fn test_dial_and_accept() {
        let hub = MemoryHub::new();
        let transport = MemoryTransport::new(hub.clone());

        let mut listener = transport.listen(&address::memory(10)).await.unwrap();
        assert_eq!(listener.local_addr(), &address::memory(10));
        assert!(hub.is_listening(10));

        let mut client = transport.dial(&address::memory(10)).await.unwrap();
        let (mut server, from) = listener.accept().await.unwrap();
        assert_eq!(from, address::memory(EPHEMERAL_PORT_BASE));

        client.write_all(b"ping").await.unwrap();
        let mut buf = [0u8; 4];
        server.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"ping");
    }

    #[tokio::test]
    async fn test_dial_without_listener_is_refused() {
        let transport = MemoryTransport::new(MemoryHub::new());
        let err = transport.dial(&address::memory(404)).await.err().unwrap();
        assert!(matches!(err, TransportError::ConnectionRefused { .. }));
    }

    #[tokio::test]
    async fn test_port_in_use_until_dropped() {
        let hub = MemoryHub::new();
        let transport = MemoryTransport::new(hub.clone());

        let listener = transport.listen(&address::memory(5)).await.unwrap();
        assert!(matches!(
            transport.listen(&address::memory(5)).await.err().unwrap(),
            TransportError::AddressInUse { .. }
        ));

        drop(listener);
        assert!(!hub.is_listening(5));
        assert!(transport.listen(&address::memory(5)).await.is_ok());
    }

    #[tokio::test]
    async fn test_port_zero_picks_free_port() {
        let hub = MemoryHub::new();
        let transport = MemoryTransport::new(hub.clone());

        let first = transport.listen(&address::memory(0)).await.unwrap();
        let second = transport.listen(&address::memory(0)).await.unwrap();
        assert_ne!(first.local_addr(), second.local_addr());
        assert_ne!(first.local_addr(), &address::memory(0));
        assert!(transport.dial(second.local_addr()).await.is_ok());
    }

    #[tokio::test]
    async fn test_separate_hubs_are_isolated() {
        let a = MemoryTransport::new(MemoryHub::new());
        let b = MemoryTransport::new(MemoryHub::new());
        let _listener = a.listen(&address::memory(7)).await.unwrap();
        assert!(b.dial(&address::memory(7)).await.is_err());
    }

    #[test]
    fn test_filter() {
        let transport = MemoryTransport::new(MemoryHub::new());
        let id = PeerId::from_public_key(b"k");
        let addrs = vec![
            address::memory(1),
            address::memory(2).with_peer_id(&id).unwrap(),
            "/ip4/127.0.0.1/tcp/1".parse().unwrap(),
            "/memory/3/ws".parse().unwrap(),
        ];
        assert_eq!(transport.filter(&addrs).len(), 2);
    }
}
