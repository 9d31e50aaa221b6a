// ============================================
// File: crates/peerlink-node/src/netcore.rs
// ============================================
//! # NetCore
//!
//! ## Creation Reason
//! The single entry point applications use: it owns the local identity,
//! the peer book and the swarm, wires discovery into the peer book, and
//! exposes the DHT through narrow routing views.
//!
//! ## Main Functionality
//! - `NetCoreBuilder`: Collects transports, discovery services and the DHT
//! - `NetCore::start` / `NetCore::stop`: Lifecycle with `Start`/`Stop` events
//! - `NetCore::connect`: Dial by multiaddr, peer id or peer info
//! - `NetCore::ping`: Round-trip time to a peer
//! - `PeerRef`: Anything a peer can be addressed by
//!
//! ## Start Sequence
//! ```text
//! listen on configured addrs ─► register dial-only transports
//!        ─► start discovery ─► mark started ─► start DHT
//!        ─► keep dialable addrs ─► emit Start
//! ```
//!
//! ## ⚠️ Important Note for Next Developer
//! - `stop` on a started node always closes the swarm, even if the DHT
//!   fails to stop; the DHT error is still returned
//! - `stop` on a node that is not started does nothing and emits no event
//! - A failed `start` tears down whatever it had brought up
//! - Discovery failures during `stop` are logged and ignored
//! - A bare peer id can only be dialed through the peer book or the DHT
//!
//! ## Last Modified
//! v0.1.0 - Initial NetCore implementation

use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use peerlink_common::{address, Multiaddr, MultiaddrExt, PeerId};
use peerlink_core::{IdentityKeyPair, SecioConfig};
use peerlink_transport::{TcpTransport, Transport};

use crate::config::NodeConfig;
use crate::dht::{ContentRouting, Dht, DhtRecords, PeerRouting};
use crate::discovery::Discovery;
use crate::error::{NodeError, Result};
use crate::events::{EventBus, NodeEvent};
use crate::handlers::{ping, PingHandler, StreamHandler, PING_PROTOCOL};
use crate::services::muxer::Substream;
use crate::services::peer_book::{PeerBook, PeerInfo};
use crate::services::swarm::Swarm;

/// Capacity of the channel between discovery services and the peer book.
const DISCOVERY_BUFFER: usize = 64;

// ============================================
// PeerRef
// ============================================

/// A way of naming the peer to dial.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PeerRef {
    /// An address ending in `/p2p/<id>`.
    Multiaddr(Multiaddr),
    /// Just the identity; addresses come from the peer book or the DHT.
    PeerId(PeerId),
    /// Identity and addresses.
    PeerInfo(PeerInfo),
}

impl PeerRef {
    /// The peer id, when the reference carries one.
    #[must_use]
    pub fn peer_id(&self) -> Option<PeerId> {
        match self {
            Self::Multiaddr(addr) => addr.peer_id(),
            Self::PeerId(id) => Some(*id),
            Self::PeerInfo(info) => Some(info.id),
        }
    }
}

impl fmt::Display for PeerRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Multiaddr(addr) => write!(f, "{addr}"),
            Self::PeerId(id) => write!(f, "{id}"),
            Self::PeerInfo(info) => write!(f, "{}", info.id),
        }
    }
}

impl FromStr for PeerRef {
    type Err = NodeError;

    /// Parses a multiaddr string.
    fn from_str(s: &str) -> Result<Self> {
        address::parse(s)
            .map(Self::Multiaddr)
            .map_err(|e| NodeError::invalid_peer_ref(s, e.to_string()))
    }
}

impl From<Multiaddr> for PeerRef {
    fn from(addr: Multiaddr) -> Self {
        Self::Multiaddr(addr)
    }
}

impl From<PeerId> for PeerRef {
    fn from(id: PeerId) -> Self {
        Self::PeerId(id)
    }
}

impl From<PeerInfo> for PeerRef {
    fn from(info: PeerInfo) -> Self {
        Self::PeerInfo(info)
    }
}

// ============================================
// NetCoreBuilder
// ============================================

/// Assembles a [`NetCore`].
pub struct NetCoreBuilder {
    identity: Arc<IdentityKeyPair>,
    listen_addrs: Vec<Multiaddr>,
    transports: Vec<Arc<dyn Transport>>,
    dial_only: Vec<Arc<dyn Transport>>,
    discovery: Vec<Arc<dyn Discovery>>,
    dht: Option<Arc<dyn Dht>>,
    secio: SecioConfig,
    peer_book: Option<Arc<PeerBook>>,
}

impl NetCoreBuilder {
    /// Starts a builder for `identity`.
    #[must_use]
    pub fn new(identity: Arc<IdentityKeyPair>) -> Self {
        Self {
            identity,
            listen_addrs: Vec::new(),
            transports: Vec::new(),
            dial_only: Vec::new(),
            discovery: Vec::new(),
            dht: None,
            secio: SecioConfig::default(),
            peer_book: None,
        }
    }

    /// Adds an address to listen on.
    #[must_use]
    pub fn listen(mut self, addr: Multiaddr) -> Self {
        self.listen_addrs.push(addr);
        self
    }

    /// Adds a transport used for listening and dialing.
    #[must_use]
    pub fn transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transports.push(transport);
        self
    }

    /// Adds a transport used for dialing only.
    #[must_use]
    pub fn dial_only_transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.dial_only.push(transport);
        self
    }

    /// Adds a discovery service.
    #[must_use]
    pub fn discovery(mut self, discovery: Arc<dyn Discovery>) -> Self {
        self.discovery.push(discovery);
        self
    }

    /// Sets the DHT.
    #[must_use]
    pub fn dht(mut self, dht: Arc<dyn Dht>) -> Self {
        self.dht = Some(dht);
        self
    }

    /// Sets the secure channel configuration.
    #[must_use]
    pub fn secio(mut self, secio: SecioConfig) -> Self {
        self.secio = secio;
        self
    }

    /// Shares an existing peer book instead of creating one.
    #[must_use]
    pub fn peer_book(mut self, peer_book: Arc<PeerBook>) -> Self {
        self.peer_book = Some(peer_book);
        self
    }

    /// Builds the node. The ping protocol is handled by default.
    #[must_use]
    pub fn build(self) -> NetCore {
        let events = EventBus::new();
        let swarm = Swarm::new(self.identity.clone(), self.secio, events.clone());
        swarm.handle(PING_PROTOCOL, Arc::new(PingHandler));

        let mut local = PeerInfo::with_addrs(self.identity.peer_id(), self.listen_addrs);
        local.protocols.insert(PING_PROTOCOL.to_string());

        NetCore {
            local: RwLock::new(local),
            peer_book: self.peer_book.unwrap_or_default(),
            swarm,
            transports: self.transports,
            dial_only: self.dial_only,
            discovery: self.discovery,
            dht: self.dht,
            events,
            started: AtomicBool::new(false),
            discovery_task: Mutex::new(None),
        }
    }
}

// ============================================
// NetCore
// ============================================

/// A peer-to-peer node.
///
/// # Example
/// ```no_run
/// use std::sync::Arc;
/// use peerlink_core::IdentityKeyPair;
/// use peerlink_node::NetCore;
/// use peerlink_transport::TcpTransport;
///
/// # async fn run() -> peerlink_node::Result<()> {
/// let node = NetCore::builder(Arc::new(IdentityKeyPair::generate()))
///     .transport(Arc::new(TcpTransport::new()))
///     .listen(peerlink_common::address::parse("/ip4/0.0.0.0/tcp/4001")?)
///     .build();
///
/// node.start().await?;
/// let rtt = node.ping("/ip4/10.0.0.2/tcp/4001/p2p/QmYyQSo1c1Ym7orWxLYvCrM2EmxFTANf8wXmmE7DWjhx5N".parse::<peerlink_node::PeerRef>()?).await?;
/// println!("rtt: {rtt:?}");
/// node.stop().await?;
/// # Ok(())
/// # }
/// ```
pub struct NetCore {
    local: RwLock<PeerInfo>,
    peer_book: Arc<PeerBook>,
    swarm: Arc<Swarm>,
    transports: Vec<Arc<dyn Transport>>,
    dial_only: Vec<Arc<dyn Transport>>,
    discovery: Vec<Arc<dyn Discovery>>,
    dht: Option<Arc<dyn Dht>>,
    events: EventBus,
    started: AtomicBool,
    discovery_task: Mutex<Option<JoinHandle<()>>>,
}

impl NetCore {
    /// Starts building a node for `identity`.
    #[must_use]
    pub fn builder(identity: Arc<IdentityKeyPair>) -> NetCoreBuilder {
        NetCoreBuilder::new(identity)
    }

    /// Builds a TCP node from configuration.
    ///
    /// # Errors
    /// `InvalidPeerRef` for a bootstrap address without `/p2p/`.
    pub fn from_config(config: &NodeConfig, identity: Arc<IdentityKeyPair>) -> Result<Self> {
        let mut builder = Self::builder(identity)
            .secio(config.secio_config())
            .transport(Arc::new(TcpTransport::new()));
        for addr in &config.network.listen_addrs {
            builder = builder.listen(addr.clone());
        }
        if !config.discovery.bootstrap.is_empty() {
            builder = builder.discovery(Arc::new(config.bootstrap_discovery()?));
        }
        Ok(builder.build())
    }

    // ========================================
    // Accessors
    // ========================================

    /// Our peer id.
    #[must_use]
    pub fn local_peer(&self) -> PeerId {
        self.swarm.local_peer()
    }

    /// Snapshot of our own peer info.
    #[must_use]
    pub fn peer_info(&self) -> PeerInfo {
        self.local.read().clone()
    }

    /// The peer book.
    #[must_use]
    pub const fn peer_book(&self) -> &Arc<PeerBook> {
        &self.peer_book
    }

    /// The swarm.
    #[must_use]
    pub const fn swarm(&self) -> &Arc<Swarm> {
        &self.swarm
    }

    /// Returns `true` between `start` and `stop`.
    #[must_use]
    pub fn is_started(&self) -> bool {
        self.started.load(Ordering::Acquire)
    }

    /// Subscribes to node events.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<NodeEvent> {
        self.events.subscribe()
    }

    /// Peer routing through the DHT.
    #[must_use]
    pub fn peer_routing(&self) -> PeerRouting<'_> {
        PeerRouting::new(self.dht.as_ref())
    }

    /// Content routing through the DHT.
    #[must_use]
    pub fn content_routing(&self) -> ContentRouting<'_> {
        ContentRouting::new(self.dht.as_ref())
    }

    /// DHT record storage.
    #[must_use]
    pub fn dht(&self) -> DhtRecords<'_> {
        DhtRecords::new(self.dht.as_ref())
    }

    // ========================================
    // Lifecycle
    // ========================================

    /// Starts listening, discovery and the DHT, then emits `Start`.
    ///
    /// Calling it on a started node does nothing.
    ///
    /// # Errors
    /// The first listen, discovery or DHT start error.
    pub async fn start(&self) -> Result<()> {
        if self.is_started() {
            debug!("Node already started");
            return Ok(());
        }
        info!(peer = %self.local_peer(), "Starting node");

        if let Err(e) = self.bring_up().await {
            warn!(error = %e, "Node failed to start");
            self.started.store(false, Ordering::Release);
            if let Err(cleanup) = self.shut_down().await {
                debug!(error = %cleanup, "Cleanup after failed start");
            }
            return Err(e);
        }

        self.events.emit(NodeEvent::Start);
        info!(
            peer = %self.local_peer(),
            addrs = ?self.local.read().multiaddrs(),
            "Node started"
        );
        Ok(())
    }

    async fn bring_up(&self) -> Result<()> {
        let requested = self.local.read().multiaddrs().to_vec();
        let mut addrs = Vec::with_capacity(requested.len());
        for addr in requested {
            match self.transports.iter().find(|t| t.can_dial(&addr)) {
                Some(transport) => addrs.push(self.swarm.listen(transport.clone(), &addr).await?),
                None => addrs.push(addr),
            }
        }
        for transport in self.transports.iter().chain(&self.dial_only) {
            self.swarm.add_transport(transport.clone());
        }

        self.start_discovery().await?;
        self.started.store(true, Ordering::Release);

        if let Some(dht) = &self.dht {
            dht.start().await?;
        }

        let addrs = self.swarm.filter_addrs(&addrs);
        self.local.write().set_multiaddrs(addrs);
        Ok(())
    }

    async fn start_discovery(&self) -> Result<()> {
        if self.discovery.is_empty() {
            return Ok(());
        }

        let (sink, mut found) = mpsc::channel::<PeerInfo>(DISCOVERY_BUFFER);
        let peer_book = self.peer_book.clone();
        let events = self.events.clone();
        let local = self.local_peer();
        let task = tokio::spawn(async move {
            while let Some(info) = found.recv().await {
                if info.id == local {
                    continue;
                }
                let merged = peer_book.put(info);
                debug!(peer = %merged.id.short(), "Peer discovered");
                events.emit(NodeEvent::PeerDiscovery(merged));
            }
        });
        let previous = self.discovery_task.lock().replace(task);
        if let Some(previous) = previous {
            previous.abort();
        }

        for service in &self.discovery {
            service.start(sink.clone()).await?;
            debug!(discovery = service.tag(), "Discovery started");
        }
        Ok(())
    }

    /// Stops discovery and the DHT, closes the swarm and emits `Stop`.
    ///
    /// Calling it on a node that is not started does nothing.
    ///
    /// # Errors
    /// The DHT stop error, after everything else has been shut down.
    pub async fn stop(&self) -> Result<()> {
        if !self.started.swap(false, Ordering::AcqRel) {
            debug!("Node not started");
            return Ok(());
        }
        info!(peer = %self.local_peer(), "Stopping node");

        let result = self.shut_down().await;
        self.events.emit(NodeEvent::Stop);
        info!("Node stopped");
        result
    }

    async fn shut_down(&self) -> Result<()> {
        for service in &self.discovery {
            if let Err(e) = service.stop().await {
                warn!(discovery = service.tag(), error = %e, "Discovery failed to stop");
            }
        }
        let task = self.discovery_task.lock().take();
        if let Some(task) = task {
            task.abort();
        }

        let dht_result = match &self.dht {
            Some(dht) => dht.stop().await,
            None => Ok(()),
        };
        if let Err(e) = &dht_result {
            warn!(error = %e, "DHT failed to stop");
        }

        self.swarm.close();
        dht_result
    }

    // ========================================
    // Protocol Handlers
    // ========================================

    /// Serves `protocol` on inbound substreams.
    pub fn handle(&self, protocol: impl Into<String>, handler: Arc<dyn StreamHandler>) {
        let protocol = protocol.into();
        self.local.write().protocols.insert(protocol.clone());
        self.swarm.handle(protocol, handler);
    }

    /// Stops serving `protocol`. Returns `true` if it was handled.
    pub fn unhandle(&self, protocol: &str) -> bool {
        self.local.write().protocols.remove(protocol);
        self.swarm.unhandle(protocol)
    }

    // ========================================
    // Dialing
    // ========================================

    /// Connects to `peer`, optionally opening a substream for `protocol`.
    ///
    /// Returns the substream when a protocol was given. The dialed peer is
    /// recorded in the peer book.
    ///
    /// # Errors
    /// - `NotStarted` before `start`
    /// - `InvalidPeerRef` for a multiaddr without `/p2p/`
    /// - `DhtUnavailable` for an unknown peer id without a DHT
    /// - Dial and negotiation errors from the swarm
    pub async fn connect(
        &self,
        peer: impl Into<PeerRef>,
        protocol: Option<&str>,
    ) -> Result<Option<Substream>> {
        if !self.is_started() {
            return Err(NodeError::NotStarted);
        }
        let info = self.resolve(peer.into()).await?;

        let stream = match protocol {
            Some(protocol) => Some(self.swarm.new_stream(&info, protocol).await?),
            None => {
                self.swarm.connect(&info).await?;
                None
            }
        };
        self.peer_book.put(info);
        Ok(stream)
    }

    /// Closes the connection to `peer`. Returns `true` if there was one.
    ///
    /// # Errors
    /// `InvalidPeerRef` if `peer` carries no peer id.
    pub fn disconnect(&self, peer: impl Into<PeerRef>) -> Result<bool> {
        let peer = peer.into();
        let id = peer
            .peer_id()
            .ok_or_else(|| NodeError::invalid_peer_ref(peer.to_string(), "missing /p2p/<id>"))?;
        Ok(self.swarm.disconnect(&id))
    }

    /// Measures the round-trip time to `peer`.
    ///
    /// # Errors
    /// Everything `connect` returns, plus ping protocol errors.
    pub async fn ping(&self, peer: impl Into<PeerRef>) -> Result<Duration> {
        let mut stream = self
            .connect(peer, Some(PING_PROTOCOL))
            .await?
            .ok_or(NodeError::StreamClosed)?;
        ping::ping(&mut stream).await
    }

    async fn resolve(&self, peer: PeerRef) -> Result<PeerInfo> {
        match peer {
            PeerRef::PeerInfo(mut info) => {
                if let Some(known) = self.peer_book.get(&info.id) {
                    info.merge(&known);
                }
                Ok(info)
            }
            PeerRef::Multiaddr(addr) => {
                let id = addr.peer_id().ok_or_else(|| {
                    NodeError::invalid_peer_ref(addr.to_string(), "missing /p2p/<id>")
                })?;
                let mut info = PeerInfo::with_addrs(id, [addr]);
                if let Some(known) = self.peer_book.get(&id) {
                    info.merge(&known);
                }
                Ok(info)
            }
            PeerRef::PeerId(id) => {
                if let Some(known) = self.peer_book.get(&id) {
                    if !known.multiaddrs().is_empty() {
                        return Ok(known);
                    }
                }
                debug!(peer = %id.short(), "Looking up peer in the DHT");
                self.peer_routing().find_peer(&id).await
            }
        }
    }
}

impl fmt::Debug for NetCore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NetCore")
            .field("peer", &self.local_peer())
            .field("started", &self.is_started())
            .field("discovery", &self.discovery.len())
            .field("dht", &self.dht.is_some())
            .finish_non_exhaustive()
    }
}

// ============================================
// Tests
// ============================================

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use async_trait::async_trait;
    use bytes::Bytes;
    use tokio::sync::broadcast::error::TryRecvError;

    use peerlink_transport::{MemoryHub, MemoryTransport};

    use super::*;
    use crate::discovery::{BootstrapDiscovery, DiscoverySink};

    #[derive(Default)]
    struct MockDht {
        started: AtomicBool,
        fail_stop: bool,
        peers: Mutex<HashMap<PeerId, PeerInfo>>,
        records: Mutex<HashMap<Vec<u8>, Vec<Bytes>>>,
        provided: Mutex<Vec<Vec<u8>>>,
    }

    #[async_trait]
    impl Dht for MockDht {
        async fn start(&self) -> Result<()> {
            self.started.store(true, Ordering::SeqCst);
            Ok(())
        }

        async fn stop(&self) -> Result<()> {
            self.started.store(false, Ordering::SeqCst);
            if self.fail_stop {
                return Err(NodeError::dht("stop failed"));
            }
            Ok(())
        }

        async fn find_peer(&self, id: &PeerId) -> Result<PeerInfo> {
            self.peers
                .lock()
                .get(id)
                .cloned()
                .ok_or_else(|| NodeError::dht("peer not found"))
        }

        async fn find_providers(&self, key: &[u8]) -> Result<Vec<PeerInfo>> {
            let provided = self.provided.lock().iter().any(|k| k == key);
            Ok(if provided {
                self.peers.lock().values().cloned().collect()
            } else {
                Vec::new()
            })
        }

        async fn provide(&self, key: &[u8]) -> Result<()> {
            self.provided.lock().push(key.to_vec());
            Ok(())
        }

        async fn put(&self, key: &[u8], value: Bytes) -> Result<()> {
            self.records.lock().entry(key.to_vec()).or_default().push(value);
            Ok(())
        }

        async fn get(&self, key: &[u8]) -> Result<Bytes> {
            self.records
                .lock()
                .get(key)
                .and_then(|v| v.last().cloned())
                .ok_or_else(|| NodeError::dht("record not found"))
        }

        async fn get_many(&self, key: &[u8], count: usize) -> Result<Vec<Bytes>> {
            Ok(self
                .records
                .lock()
                .get(key)
                .map(|v| v.iter().take(count).cloned().collect())
                .unwrap_or_default())
        }
    }

    struct FailingDiscovery;

    #[async_trait]
    impl Discovery for FailingDiscovery {
        fn tag(&self) -> &'static str {
            "failing"
        }

        async fn start(&self, _sink: DiscoverySink) -> Result<()> {
            Ok(())
        }

        async fn stop(&self) -> Result<()> {
            Err(NodeError::discovery("failing", "cannot stop"))
        }
    }

    struct RefusingDiscovery;

    #[async_trait]
    impl Discovery for RefusingDiscovery {
        fn tag(&self) -> &'static str {
            "refusing"
        }

        async fn start(&self, _sink: DiscoverySink) -> Result<()> {
            Err(NodeError::discovery("refusing", "cannot start"))
        }

        async fn stop(&self) -> Result<()> {
            Ok(())
        }
    }

    fn builder(hub: &MemoryHub, port: u64) -> NetCoreBuilder {
        NetCore::builder(Arc::new(IdentityKeyPair::generate()))
            .transport(Arc::new(MemoryTransport::new(hub.clone())))
            .listen(address::memory(port))
    }

    async fn started(hub: &MemoryHub, port: u64) -> NetCore {
        let node = builder(hub, port).build();
        node.start().await.unwrap();
        node
    }

    fn drain(rx: &mut broadcast::Receiver<NodeEvent>) -> Vec<NodeEvent> {
        let mut events = Vec::new();
        loop {
            match rx.try_recv() {
                Ok(event) => events.push(event),
                Err(TryRecvError::Lagged(_)) => continue,
                Err(_) => return events,
            }
        }
    }

    async fn wait_for<F: Fn(&NodeEvent) -> bool>(
        rx: &mut broadcast::Receiver<NodeEvent>,
        matches: F,
    ) -> NodeEvent {
        tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                let event = rx.recv().await.unwrap();
                if matches(&event) {
                    return event;
                }
            }
        })
        .await
        .unwrap()
    }

    // ============================================
    // Lifecycle
    // ============================================

    #[tokio::test]
    async fn test_start_with_single_transport() {
        let hub = MemoryHub::new();
        let node = builder(&hub, 1)
            .listen("/ip4/127.0.0.1/tcp/4001".parse().unwrap())
            .listen("/p2p-circuit".parse().unwrap())
            .build();
        let mut events = node.subscribe();

        node.start().await.unwrap();
        assert!(node.is_started());
        assert_eq!(
            node.peer_info().multiaddrs(),
            &[address::memory(1), "/p2p-circuit".parse().unwrap()]
        );

        node.start().await.unwrap();
        assert_eq!(drain(&mut events), vec![NodeEvent::Start]);
    }

    #[tokio::test]
    async fn test_stop_closes_connections() {
        let hub = MemoryHub::new();
        let a = started(&hub, 1).await;
        let b = started(&hub, 2).await;
        let mut a_events = a.subscribe();
        let mut b_events = b.subscribe();

        a.connect(b.peer_info(), None).await.unwrap();
        assert!(a.swarm().is_connected(&b.local_peer()));

        a.stop().await.unwrap();
        assert!(!a.is_started());
        assert!(a.swarm().connected_peers().is_empty());
        assert!(a.swarm().listen_addrs().is_empty());

        let stops = drain(&mut a_events)
            .into_iter()
            .filter(|e| *e == NodeEvent::Stop)
            .count();
        assert_eq!(stops, 1);

        let a_id = a.local_peer();
        wait_for(&mut b_events, |e| *e == NodeEvent::PeerDisconnect(a_id)).await;
    }

    #[tokio::test]
    async fn test_stop_returns_dht_error_after_closing() {
        let hub = MemoryHub::new();
        let dht = Arc::new(MockDht {
            fail_stop: true,
            ..MockDht::default()
        });
        let node = builder(&hub, 1)
            .dht(dht.clone())
            .discovery(Arc::new(FailingDiscovery))
            .build();
        node.start().await.unwrap();
        assert!(dht.started.load(Ordering::SeqCst));
        let mut events = node.subscribe();

        let err = node.stop().await.unwrap_err();
        assert!(matches!(err, NodeError::Dht { .. }));
        assert!(!node.is_started());
        assert!(node.swarm().listen_addrs().is_empty());
        assert_eq!(drain(&mut events), vec![NodeEvent::Stop]);
    }

    #[tokio::test]
    async fn test_stop_emits_stop_once() {
        let hub = MemoryHub::new();
        let node = started(&hub, 1).await;
        let mut events = node.subscribe();

        node.stop().await.unwrap();
        node.stop().await.unwrap();
        assert_eq!(drain(&mut events), vec![NodeEvent::Stop]);

        let idle = builder(&hub, 2).build();
        let mut events = idle.subscribe();
        idle.stop().await.unwrap();
        assert!(drain(&mut events).is_empty());
    }

    #[tokio::test]
    async fn test_failed_start_releases_listeners() {
        let hub = MemoryHub::new();
        let node = NetCore::builder(Arc::new(IdentityKeyPair::generate()))
            .transport(Arc::new(MemoryTransport::new(hub.clone())))
            .listen(address::memory(1))
            .discovery(Arc::new(RefusingDiscovery))
            .build();
        let mut events = node.subscribe();

        assert!(node.start().await.is_err());
        assert!(!node.is_started());
        assert!(node.swarm().listen_addrs().is_empty());
        assert!(drain(&mut events).is_empty());
    }

    #[tokio::test]
    async fn test_connect_requires_start() {
        let hub = MemoryHub::new();
        let node = builder(&hub, 1).build();
        let peer = IdentityKeyPair::generate().peer_id();
        assert!(matches!(
            node.connect(peer, None).await,
            Err(NodeError::NotStarted)
        ));
    }

    // ============================================
    // Dialing
    // ============================================

    #[tokio::test]
    async fn test_unknown_peer_id_without_dht() {
        let hub = MemoryHub::new();
        let node = started(&hub, 1).await;
        let unknown = IdentityKeyPair::generate().peer_id();

        let err = node.connect(unknown, None).await.unwrap_err();
        assert_eq!(err.to_string(), "DHT is not available");
    }

    #[tokio::test]
    async fn test_connect_by_multiaddr_string() {
        let hub = MemoryHub::new();
        let a = started(&hub, 1).await;
        let b = started(&hub, 2).await;
        b.handle("/echo/1.0.0", Arc::new(PingHandler));

        let text = address::memory(2).with_peer_id(&b.local_peer()).unwrap().to_string();
        let target: PeerRef = text.parse().unwrap();
        assert_eq!(target.peer_id(), Some(b.local_peer()));
        let mut stream = a
            .connect(target, Some("/echo/1.0.0"))
            .await
            .unwrap()
            .unwrap();
        stream.send(b"hi").unwrap();
        assert_eq!(&stream.recv().await.unwrap()[..], b"hi");

        let known = a.peer_book().get(&b.local_peer()).unwrap();
        assert_eq!(known.multiaddrs(), &[address::memory(2)]);
    }

    #[tokio::test]
    async fn test_multiaddr_without_peer_id_rejected() {
        let hub = MemoryHub::new();
        let a = started(&hub, 1).await;
        let err = a.connect(address::memory(2), None).await.unwrap_err();
        assert!(matches!(err, NodeError::InvalidPeerRef { .. }));
        assert!("not a multiaddr".parse::<PeerRef>().is_err());
    }

    #[tokio::test]
    async fn test_peer_id_resolved_through_dht() {
        let hub = MemoryHub::new();
        let b = started(&hub, 2).await;
        let dht = Arc::new(MockDht::default());
        dht.peers.lock().insert(b.local_peer(), b.peer_info());

        let a = builder(&hub, 1).dht(dht).build();
        a.start().await.unwrap();

        a.connect(b.local_peer(), None).await.unwrap();
        assert!(a.swarm().is_connected(&b.local_peer()));
        assert!(a.peer_book().has(&b.local_peer()));
    }

    #[tokio::test]
    async fn test_ping() {
        let hub = MemoryHub::new();
        let a = started(&hub, 1).await;
        let b = started(&hub, 2).await;

        let rtt = a.ping(b.peer_info()).await.unwrap();
        assert!(rtt < Duration::from_secs(5));
        assert!(a.disconnect(b.local_peer()).unwrap());
        assert!(!a.disconnect(b.local_peer()).unwrap());
    }

    #[tokio::test]
    async fn test_unhandled_ping_refused() {
        let hub = MemoryHub::new();
        let a = started(&hub, 1).await;
        let b = started(&hub, 2).await;
        assert!(b.unhandle(PING_PROTOCOL));
        assert!(!b.peer_info().protocols.contains(PING_PROTOCOL));

        assert!(matches!(
            a.ping(b.peer_info()).await,
            Err(NodeError::ProtocolNotSupported { .. })
        ));
    }

    // ============================================
    // Discovery & DHT
    // ============================================

    #[tokio::test]
    async fn test_bootstrap_discovery_fills_peer_book() {
        let hub = MemoryHub::new();
        let b = started(&hub, 2).await;
        let local = Arc::new(IdentityKeyPair::generate());
        let bootstrap = BootstrapDiscovery::from_multiaddrs(&[
            address::memory(2).with_peer_id(&b.local_peer()).unwrap(),
            address::memory(3).with_peer_id(&local.peer_id()).unwrap(),
        ])
        .unwrap();

        let a = NetCore::builder(local)
            .transport(Arc::new(MemoryTransport::new(hub.clone())))
            .listen(address::memory(1))
            .discovery(Arc::new(bootstrap))
            .build();
        let mut events = a.subscribe();
        a.start().await.unwrap();

        let b_id = b.local_peer();
        let event = wait_for(&mut events, |e| matches!(e, NodeEvent::PeerDiscovery(_))).await;
        assert_eq!(event, NodeEvent::PeerDiscovery(PeerInfo::with_addrs(b_id, [address::memory(2)])));
        assert!(a.peer_book().has(&b_id));
        assert_eq!(a.peer_book().len(), 1);

        a.connect(b_id, None).await.unwrap();
        assert!(a.swarm().is_connected(&b_id));
    }

    #[tokio::test]
    async fn test_dht_views() {
        let hub = MemoryHub::new();
        let dht = Arc::new(MockDht::default());
        let provider = PeerInfo::new(IdentityKeyPair::generate().peer_id());
        dht.peers.lock().insert(provider.id, provider.clone());
        let node = builder(&hub, 1).dht(dht).build();

        assert!(node.dht().is_available());
        node.dht().put(b"key", Bytes::from_static(b"v1")).await.unwrap();
        node.dht().put(b"key", Bytes::from_static(b"v2")).await.unwrap();
        assert_eq!(node.dht().get(b"key").await.unwrap(), Bytes::from_static(b"v2"));
        assert_eq!(node.dht().get_many(b"key", 5).await.unwrap().len(), 2);

        node.content_routing().provide(b"cid").await.unwrap();
        assert_eq!(
            node.content_routing().find_providers(b"cid").await.unwrap(),
            vec![provider.clone()]
        );
        assert_eq!(node.peer_routing().find_peer(&provider.id).await.unwrap(), provider);
    }

    #[tokio::test]
    async fn test_dht_views_without_dht() {
        let hub = MemoryHub::new();
        let node = builder(&hub, 1).build();
        assert!(!node.dht().is_available());
        assert!(node.dht().get(b"key").await.unwrap_err().is_unavailable());
        assert!(node.content_routing().provide(b"cid").await.unwrap_err().is_unavailable());
    }
}
