// ============================================
// File: crates/peerlink-node/src/services/swarm.rs
// ============================================
//! # Swarm
//!
//! ## Creation Reason
//! Owns every transport, listener and peer connection of a node, and
//! turns raw transport streams into authenticated, multiplexed
//! connections.
//!
//! ## Main Functionality
//! - Listening and dialing through registered transports
//! - Connection upgrade: crypto negotiation, SECIO handshake, muxer
//!   negotiation
//! - At most one primary connection per peer, reused for every stream
//! - Per-substream protocol negotiation and handler dispatch
//!
//! ## Connection Upgrade
//! ```text
//! raw stream ──"/secio/1.0.0"──► SECIO handshake ──"/mplex/6.7.0"──► MuxedConnection
//!                                                                        │
//!                      substream ──"<protocol>"──► StreamHandler ◄───────┘
//! ```
//!
//! ## ⚠️ Important Note for Next Developer
//! - Never hold a `parking_lot` guard across an `.await`
//! - A second connection to an already connected peer is served but not
//!   made primary; only the primary emits connect/disconnect events
//! - Background tasks hold a `Weak<Swarm>` and stop once it is gone
//!
//! ## Last Modified
//! v0.1.0 - Initial swarm implementation

use std::collections::HashMap;
use std::sync::{Arc, Weak};
use std::time::Duration;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};

use peerlink_common::{Multiaddr, MultiaddrExt, PeerId};
use peerlink_core::{IdentityKeyPair, SecioConfig, SecureChannel, SECIO_PROTOCOL};
use peerlink_transport::{BoxedStream, Transport};

use crate::error::{NodeError, Result};
use crate::events::{EventBus, NodeEvent};
use crate::handlers::StreamHandler;
use crate::services::muxer::{Endpoint, FrameMuxer, MuxedConnection, Muxer, Substream};
use crate::services::negotiate::{self, RawFramed};
use crate::services::peer_book::PeerInfo;

// ============================================
// Swarm
// ============================================

/// Connection manager of a node.
///
/// Always used behind an `Arc`; methods that spawn tasks take
/// `self: &Arc<Self>`.
pub struct Swarm {
    local_peer: PeerId,
    channel: SecureChannel,
    upgrade_timeout: Duration,
    muxer: Arc<dyn Muxer>,
    transports: RwLock<Vec<Arc<dyn Transport>>>,
    listen_addrs: RwLock<Vec<Multiaddr>>,
    listeners: Mutex<Vec<JoinHandle<()>>>,
    connections: DashMap<PeerId, Arc<MuxedConnection>>,
    handlers: RwLock<HashMap<String, Arc<dyn StreamHandler>>>,
    events: EventBus,
}

impl Swarm {
    /// Creates a swarm using the built-in frame muxer.
    #[must_use]
    pub fn new(identity: Arc<IdentityKeyPair>, secio: SecioConfig, events: EventBus) -> Arc<Self> {
        Self::with_muxer(identity, secio, events, Arc::new(FrameMuxer))
    }

    /// Creates a swarm with a specific muxer.
    #[must_use]
    pub fn with_muxer(
        identity: Arc<IdentityKeyPair>,
        secio: SecioConfig,
        events: EventBus,
        muxer: Arc<dyn Muxer>,
    ) -> Arc<Self> {
        let local_peer = identity.peer_id();
        let upgrade_timeout = secio.handshake_timeout;
        Arc::new(Self {
            local_peer,
            channel: SecureChannel::new(identity, secio),
            upgrade_timeout,
            muxer,
            transports: RwLock::new(Vec::new()),
            listen_addrs: RwLock::new(Vec::new()),
            listeners: Mutex::new(Vec::new()),
            connections: DashMap::new(),
            handlers: RwLock::new(HashMap::new()),
            events,
        })
    }

    /// Our peer id.
    #[must_use]
    pub const fn local_peer(&self) -> PeerId {
        self.local_peer
    }

    // ========================================
    // Transports
    // ========================================

    /// Registers a transport for dialing.
    ///
    /// Only one transport per tag is kept; later ones are ignored.
    pub fn add_transport(&self, transport: Arc<dyn Transport>) {
        let mut transports = self.transports.write();
        if transports.iter().any(|t| t.tag() == transport.tag()) {
            return;
        }
        debug!(transport = transport.tag(), "Transport registered");
        transports.push(transport);
    }

    /// Registered transports.
    #[must_use]
    pub fn transports(&self) -> Vec<Arc<dyn Transport>> {
        self.transports.read().clone()
    }

    fn transport_for(&self, addr: &Multiaddr) -> Option<Arc<dyn Transport>> {
        self.transports.read().iter().find(|t| t.can_dial(addr)).cloned()
    }

    /// Returns `true` if a registered transport can dial `addr`.
    #[must_use]
    pub fn can_dial(&self, addr: &Multiaddr) -> bool {
        self.transport_for(addr).is_some()
    }

    /// Keeps addresses a registered transport can dial, plus relay
    /// (`/p2p-circuit`) addresses.
    #[must_use]
    pub fn filter_addrs(&self, addrs: &[Multiaddr]) -> Vec<Multiaddr> {
        addrs
            .iter()
            .filter(|a| a.is_circuit() || self.can_dial(a))
            .cloned()
            .collect()
    }

    // ========================================
    // Listening
    // ========================================

    /// Listens on `addr` and serves inbound connections.
    ///
    /// Also registers `transport` for dialing. Returns the bound address.
    ///
    /// # Errors
    /// The transport error if listening fails.
    pub async fn listen(
        self: &Arc<Self>,
        transport: Arc<dyn Transport>,
        addr: &Multiaddr,
    ) -> Result<Multiaddr> {
        let mut listener = transport.listen(addr).await?;
        let bound = listener.local_addr().clone();
        self.add_transport(transport);

        let swarm = Arc::downgrade(self);
        let accept_addr = bound.clone();
        let handle = tokio::spawn(async move {
            loop {
                let (stream, remote_addr) = match listener.accept().await {
                    Ok(accepted) => accepted,
                    Err(e) => {
                        debug!(addr = %accept_addr, error = %e, "Listener stopped");
                        break;
                    }
                };
                let Some(swarm) = swarm.upgrade() else { break };
                trace!(addr = %accept_addr, remote = %remote_addr, "Inbound connection");
                tokio::spawn(async move {
                    match swarm.accept_connection(stream).await {
                        Ok(()) => {}
                        Err(e) if e.is_handshake_failure() => {
                            warn!(remote = %remote_addr, error = %e, "Inbound handshake rejected");
                        }
                        Err(e) => debug!(remote = %remote_addr, error = %e, "Inbound upgrade failed"),
                    }
                });
            }
        });

        self.listeners.lock().push(handle);
        self.listen_addrs.write().push(bound.clone());
        info!(addr = %bound, "Listening");
        Ok(bound)
    }

    /// Addresses currently listened on.
    #[must_use]
    pub fn listen_addrs(&self) -> Vec<Multiaddr> {
        self.listen_addrs.read().clone()
    }

    // ========================================
    // Protocol Handlers
    // ========================================

    /// Serves `protocol` on inbound substreams with `handler`.
    pub fn handle(&self, protocol: impl Into<String>, handler: Arc<dyn StreamHandler>) {
        let protocol = protocol.into();
        debug!(protocol = %protocol, "Handler registered");
        self.handlers.write().insert(protocol, handler);
    }

    /// Stops serving `protocol`. Returns `true` if it was handled.
    pub fn unhandle(&self, protocol: &str) -> bool {
        self.handlers.write().remove(protocol).is_some()
    }

    /// Protocols with a registered handler.
    #[must_use]
    pub fn protocols(&self) -> Vec<String> {
        let mut protocols: Vec<String> = self.handlers.read().keys().cloned().collect();
        protocols.sort();
        protocols
    }

    // ========================================
    // Dialing
    // ========================================

    /// Returns the open primary connection to `peer`, if any.
    #[must_use]
    pub fn connection(&self, peer: &PeerId) -> Option<Arc<MuxedConnection>> {
        self.connections
            .get(peer)
            .map(|e| e.value().clone())
            .filter(|c| !c.is_closed())
    }

    /// Returns `true` if an open connection to `peer` exists.
    #[must_use]
    pub fn is_connected(&self, peer: &PeerId) -> bool {
        self.connection(peer).is_some()
    }

    /// Peers with an open primary connection.
    #[must_use]
    pub fn connected_peers(&self) -> Vec<PeerId> {
        self.connections
            .iter()
            .filter(|e| !e.value().is_closed())
            .map(|e| *e.key())
            .collect()
    }

    /// Returns a connection to `peer`, dialing if needed.
    ///
    /// Addresses are tried in order.
    ///
    /// # Errors
    /// - `DialSelf` for our own id
    /// - `NoAddresses` if no registered transport handles any address
    /// - The error of the only attempt, or `DialFailed` listing all of them
    pub async fn connect(self: &Arc<Self>, peer: &PeerInfo) -> Result<Arc<MuxedConnection>> {
        if peer.id == self.local_peer {
            return Err(NodeError::DialSelf);
        }
        if let Some(conn) = self.connection(&peer.id) {
            trace!(peer = %peer.id.short(), "Reusing connection");
            return Ok(conn);
        }

        let mut failures: Vec<(Multiaddr, NodeError)> = Vec::new();
        for addr in peer.multiaddrs() {
            let Some(transport) = self.transport_for(addr) else {
                continue;
            };
            match self.dial_addr(transport.as_ref(), addr, peer.id).await {
                Ok(conn) => return Ok(self.register(conn)),
                Err(e) => {
                    if e.is_retryable() {
                        debug!(peer = %peer.id.short(), addr = %addr, error = %e, "Dial attempt failed");
                    } else {
                        warn!(peer = %peer.id.short(), addr = %addr, error = %e, "Dial attempt failed permanently");
                    }
                    failures.push((addr.clone(), e));
                }
            }
        }

        match failures.len() {
            0 => Err(NodeError::NoAddresses { peer: peer.id }),
            1 => Err(failures.remove(0).1),
            _ => Err(NodeError::DialFailed {
                peer: peer.id,
                errors: failures
                    .iter()
                    .map(|(addr, e)| format!("{addr}: {e}"))
                    .collect(),
            }),
        }
    }

    /// Opens a substream to `peer` speaking `protocol`.
    ///
    /// # Errors
    /// Dial errors, or `ProtocolNotSupported` if the remote refused.
    pub async fn new_stream(self: &Arc<Self>, peer: &PeerInfo, protocol: &str) -> Result<Substream> {
        let conn = self.connect(peer).await?;
        let mut stream = conn.open_stream()?;
        negotiate::select(&mut stream, protocol).await?;
        stream.set_protocol(protocol);
        Ok(stream)
    }

    /// Closes the connection to `peer`. Returns `true` if there was one.
    pub fn disconnect(&self, peer: &PeerId) -> bool {
        match self.connections.remove(peer) {
            Some((_, conn)) => {
                conn.close();
                info!(peer = %peer.short(), "Peer disconnected");
                self.events.emit(NodeEvent::PeerDisconnect(*peer));
                true
            }
            None => false,
        }
    }

    /// Stops every listener and closes every connection.
    ///
    /// Registered transports and handlers are kept, so the swarm can
    /// listen again.
    pub fn close(&self) {
        for handle in self.listeners.lock().drain(..) {
            handle.abort();
        }
        self.listen_addrs.write().clear();

        let peers: Vec<PeerId> = self.connections.iter().map(|e| *e.key()).collect();
        for peer in peers {
            self.disconnect(&peer);
        }
        info!("Swarm closed");
    }

    // ========================================
    // Connection Upgrade
    // ========================================

    async fn dial_addr(
        &self,
        transport: &dyn Transport,
        addr: &Multiaddr,
        expected: PeerId,
    ) -> Result<Arc<MuxedConnection>> {
        let stream = transport.dial(addr).await?;
        tokio::time::timeout(self.upgrade_timeout, self.upgrade_outbound(stream, expected))
            .await
            .map_err(|_| NodeError::timeout("outbound connection upgrade"))?
    }

    async fn upgrade_outbound(&self, stream: BoxedStream, expected: PeerId) -> Result<Arc<MuxedConnection>> {
        let mut framed = RawFramed::new(stream);
        negotiate::select(&mut framed, SECIO_PROTOCOL).await?;

        let mut secure = self
            .channel
            .handshake(framed.into_inner(), Some(expected))
            .await?;

        negotiate::select(&mut secure, self.muxer.protocol()).await?;
        self.muxer.upgrade(secure, Endpoint::Dialer)
    }

    async fn accept_connection(self: &Arc<Self>, stream: BoxedStream) -> Result<()> {
        let conn = tokio::time::timeout(self.upgrade_timeout, self.upgrade_inbound(stream))
            .await
            .map_err(|_| NodeError::timeout("inbound connection upgrade"))??;
        self.register(conn);
        Ok(())
    }

    async fn upgrade_inbound(&self, stream: BoxedStream) -> Result<Arc<MuxedConnection>> {
        let mut framed = RawFramed::new(stream);
        negotiate::accept(&mut framed, |p| p == SECIO_PROTOCOL).await?;

        let mut secure = self.channel.handshake(framed.into_inner(), None).await?;

        let tag = self.muxer.protocol();
        negotiate::accept(&mut secure, |p| p == tag).await?;
        self.muxer.upgrade(secure, Endpoint::Listener)
    }

    fn register(self: &Arc<Self>, conn: Arc<MuxedConnection>) -> Arc<MuxedConnection> {
        let peer = conn.remote_peer();
        let primary = match self.connections.entry(peer) {
            Entry::Occupied(mut entry) => {
                if entry.get().is_closed() {
                    entry.insert(conn.clone());
                    true
                } else {
                    false
                }
            }
            Entry::Vacant(entry) => {
                entry.insert(conn.clone());
                true
            }
        };

        if primary {
            info!(peer = %peer.short(), endpoint = ?conn.endpoint(), "Peer connected");
            self.events.emit(NodeEvent::PeerConnect(peer));
        } else {
            debug!(peer = %peer.short(), "Extra connection to connected peer");
        }

        tokio::spawn(serve_connection(Arc::downgrade(self), conn.clone()));
        conn
    }

    fn connection_closed(&self, conn: &Arc<MuxedConnection>) {
        let peer = conn.remote_peer();
        if self
            .connections
            .remove_if(&peer, |_, current| Arc::ptr_eq(current, conn))
            .is_some()
        {
            info!(peer = %peer.short(), "Peer disconnected");
            self.events.emit(NodeEvent::PeerDisconnect(peer));
        }
    }

    // ========================================
    // Inbound Streams
    // ========================================

    async fn serve_stream(self: Arc<Self>, mut stream: Substream) {
        let remote = stream.remote_peer();
        let handlers = &self.handlers;
        let protocol = match negotiate::accept(&mut stream, |p| handlers.read().contains_key(p)).await {
            Ok(protocol) => protocol,
            Err(e) => {
                trace!(peer = %remote.short(), error = %e, "Substream negotiation ended");
                return;
            }
        };

        let handler = self.handlers.read().get(&protocol).cloned();
        match handler {
            Some(handler) => {
                stream.set_protocol(protocol);
                handler.handle(remote, stream).await;
            }
            None => warn!(protocol = %protocol, "Handler removed during negotiation"),
        }
    }
}

impl std::fmt::Debug for Swarm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Swarm")
            .field("local_peer", &self.local_peer)
            .field("connections", &self.connections.len())
            .field("listen_addrs", &*self.listen_addrs.read())
            .finish_non_exhaustive()
    }
}

/// Dispatches inbound substreams until the connection closes.
async fn serve_connection(swarm: Weak<Swarm>, conn: Arc<MuxedConnection>) {
    while let Some(stream) = conn.accept_stream().await {
        let Some(swarm) = swarm.upgrade() else {
            conn.close();
            return;
        };
        tokio::spawn(swarm.serve_stream(stream));
    }

    if let Some(swarm) = swarm.upgrade() {
        swarm.connection_closed(&conn);
    }
}

// ============================================
// Tests
// ============================================

#[cfg(test)]
mod tests {
    use tokio::sync::broadcast;

    use peerlink_common::address;
    use peerlink_transport::{MemoryHub, MemoryTransport};

    use super::*;
    use crate::handlers::PingHandler;

    struct Node {
        swarm: Arc<Swarm>,
        info: PeerInfo,
        events: broadcast::Receiver<NodeEvent>,
    }

    async fn node(hub: &MemoryHub, port: u64) -> Node {
        let identity = Arc::new(IdentityKeyPair::generate());
        let bus = EventBus::new();
        let events = bus.subscribe();
        let swarm = Swarm::new(identity, SecioConfig::default(), bus);
        let addr = swarm
            .listen(Arc::new(MemoryTransport::new(hub.clone())), &address::memory(port))
            .await
            .unwrap();
        let info = PeerInfo::with_addrs(swarm.local_peer(), [addr]);
        Node { swarm, info, events }
    }

    async fn next_event(rx: &mut broadcast::Receiver<NodeEvent>) -> NodeEvent {
        tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .unwrap()
            .unwrap()
    }

    #[tokio::test]
    async fn test_connect_emits_events_on_both_sides() {
        let hub = MemoryHub::new();
        let mut a = node(&hub, 1).await;
        let mut b = node(&hub, 2).await;

        let conn = a.swarm.connect(&b.info).await.unwrap();
        assert_eq!(conn.remote_peer(), b.info.id);
        assert_eq!(next_event(&mut a.events).await, NodeEvent::PeerConnect(b.info.id));
        assert_eq!(next_event(&mut b.events).await, NodeEvent::PeerConnect(a.info.id));
    }

    #[tokio::test]
    async fn test_connection_is_reused() {
        let hub = MemoryHub::new();
        let a = node(&hub, 1).await;
        let b = node(&hub, 2).await;

        let first = a.swarm.connect(&b.info).await.unwrap();
        let second = a.swarm.connect(&b.info).await.unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(a.swarm.connected_peers(), vec![b.info.id]);
    }

    #[tokio::test]
    async fn test_stream_to_handled_protocol() {
        let hub = MemoryHub::new();
        let a = node(&hub, 1).await;
        let b = node(&hub, 2).await;
        b.swarm.handle("/echo/1.0.0", Arc::new(PingHandler));

        let mut stream = a.swarm.new_stream(&b.info, "/echo/1.0.0").await.unwrap();
        assert_eq!(stream.protocol(), Some("/echo/1.0.0"));
        stream.send(b"hello").unwrap();
        assert_eq!(&stream.recv().await.unwrap()[..], b"hello");
    }

    #[tokio::test]
    async fn test_unknown_protocol_refused() {
        let hub = MemoryHub::new();
        let a = node(&hub, 1).await;
        let b = node(&hub, 2).await;

        let err = a.swarm.new_stream(&b.info, "/nope/1.0.0").await.unwrap_err();
        assert!(matches!(err, NodeError::ProtocolNotSupported { .. }));

        b.swarm.handle("/late/1.0.0", Arc::new(PingHandler));
        assert!(a.swarm.new_stream(&b.info, "/late/1.0.0").await.is_ok());
        assert!(b.swarm.unhandle("/late/1.0.0"));
        assert!(a.swarm.new_stream(&b.info, "/late/1.0.0").await.is_err());
    }

    #[tokio::test]
    async fn test_wrong_identity_rejected() {
        let hub = MemoryHub::new();
        let a = node(&hub, 1).await;
        let b = node(&hub, 2).await;

        let impostor = PeerInfo::with_addrs(
            IdentityKeyPair::generate().peer_id(),
            b.info.multiaddrs().to_vec(),
        );
        let err = a.swarm.connect(&impostor).await.unwrap_err();
        assert!(matches!(
            err,
            NodeError::Core(peerlink_core::CoreError::IdentityMismatch { .. })
        ));
        assert!(err.is_handshake_failure());
        assert!(!err.is_retryable());
        assert!(!a.swarm.is_connected(&b.info.id));
    }

    #[tokio::test]
    async fn test_dial_failures() {
        let hub = MemoryHub::new();
        let a = node(&hub, 1).await;
        let id = IdentityKeyPair::generate().peer_id();

        let tcp_only = PeerInfo::with_addrs(id, ["/ip4/127.0.0.1/tcp/1".parse().unwrap()]);
        assert!(matches!(
            a.swarm.connect(&tcp_only).await.unwrap_err(),
            NodeError::NoAddresses { .. }
        ));

        let nobody = PeerInfo::with_addrs(id, [address::memory(8), address::memory(9)]);
        let err = a.swarm.connect(&nobody).await.unwrap_err();
        assert!(matches!(err, NodeError::DialFailed { ref errors, .. } if errors.len() == 2));
        assert!(err.is_retryable());

        assert!(matches!(
            a.swarm.connect(&a.info).await.unwrap_err(),
            NodeError::DialSelf
        ));
    }

    #[tokio::test]
    async fn test_disconnect_reaches_remote() {
        let hub = MemoryHub::new();
        let mut a = node(&hub, 1).await;
        let mut b = node(&hub, 2).await;

        a.swarm.connect(&b.info).await.unwrap();
        next_event(&mut a.events).await;
        next_event(&mut b.events).await;

        assert!(a.swarm.disconnect(&b.info.id));
        assert!(!a.swarm.disconnect(&b.info.id));
        assert_eq!(next_event(&mut a.events).await, NodeEvent::PeerDisconnect(b.info.id));
        assert_eq!(next_event(&mut b.events).await, NodeEvent::PeerDisconnect(a.info.id));
        assert!(!b.swarm.is_connected(&a.info.id));
    }

    #[tokio::test]
    async fn test_filter_addrs() {
        let hub = MemoryHub::new();
        let a = node(&hub, 1).await;
        let addrs: Vec<Multiaddr> = vec![
            address::memory(3),
            "/ip4/1.2.3.4/tcp/4001".parse().unwrap(),
            "/ip4/1.2.3.4/tcp/4001/p2p-circuit".parse().unwrap(),
        ];
        let kept = a.swarm.filter_addrs(&addrs);
        assert_eq!(kept.len(), 2);
        assert!(kept[1].is_circuit());
    }
}
