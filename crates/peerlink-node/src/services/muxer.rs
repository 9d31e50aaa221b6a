// ============================================
// File: crates/peerlink-node/src/services/muxer.rs
// ============================================
//! # Stream Multiplexer
//!
//! ## Creation Reason
//! One secure connection per peer carries many independent protocol
//! conversations. The muxer splits the connection into substreams.
//!
//! ## Main Functionality
//! - `Muxer`: Upgrades a `SecureConnection` into a `MuxedConnection`
//! - `FrameMuxer`: Built-in `/mplex/6.7.0` implementation
//! - `MuxedConnection`: Opens and accepts substreams
//! - `Substream`: Message-oriented duplex bound to one stream id
//!
//! ## Frame Format (inside one secure frame)
//! ```text
//! ┌────────────────┬──────────┬──────────────────┐
//! │ stream id (u32)│ flag (u8)│ payload (rest)   │
//! └────────────────┴──────────┴──────────────────┘
//! flag: 0 = Open, 1 = Data, 2 = Close
//! ```
//!
//! ## Stream Ids
//! The dialer allocates odd ids, the listener even ids, so both sides can
//! open streams without coordination.
//!
//! ## ⚠️ Important Note for Next Developer
//! - A substream that stops reading eventually stalls the whole
//!   connection (head-of-line blocking), handlers must drain or drop
//! - Closing the connection closes every substream
//!
//! ## Last Modified
//! v0.1.0 - Initial frame multiplexer

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use bytes::{Buf, BufMut, Bytes, BytesMut};
use dashmap::DashMap;
use tokio::sync::{mpsc, watch, Mutex};
use tracing::{debug, trace, warn};

use peerlink_common::PeerId;
use peerlink_core::SecureConnection;

use crate::error::{NodeError, Result};
use crate::services::negotiate::MessageIo;

/// Protocol tag of the built-in multiplexer.
pub const MPLEX_PROTOCOL: &str = "/mplex/6.7.0";

/// Size of the frame header.
const HEADER_SIZE: usize = 5;

/// Messages buffered per substream.
const STREAM_BUFFER: usize = 64;

/// Inbound substreams waiting to be accepted.
const ACCEPT_BACKLOG: usize = 32;

type StreamTable = Arc<DashMap<u32, mpsc::Sender<Bytes>>>;

// ============================================
// Endpoint
// ============================================

/// Which side of the connection we are.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Endpoint {
    /// We dialed.
    Dialer,
    /// We accepted.
    Listener,
}

// ============================================
// Muxer Trait
// ============================================

/// Turns a secure connection into a multiplexed one.
pub trait Muxer: Send + Sync {
    /// Protocol tag negotiated before [`Muxer::upgrade`].
    fn protocol(&self) -> &'static str;

    /// Takes ownership of `conn` and starts demultiplexing it.
    ///
    /// # Errors
    /// `Muxer` if the connection is not established.
    fn upgrade(&self, conn: SecureConnection, endpoint: Endpoint) -> Result<Arc<MuxedConnection>>;
}

/// The built-in `/mplex/6.7.0` multiplexer.
#[derive(Debug, Clone, Copy, Default)]
pub struct FrameMuxer;

impl Muxer for FrameMuxer {
    fn protocol(&self) -> &'static str {
        MPLEX_PROTOCOL
    }

    fn upgrade(&self, conn: SecureConnection, endpoint: Endpoint) -> Result<Arc<MuxedConnection>> {
        MuxedConnection::spawn(conn, endpoint)
    }
}

// ============================================
// Frames
// ============================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Flag {
    Open = 0,
    Data = 1,
    Close = 2,
}

impl Flag {
    fn from_wire(value: u8) -> Result<Self> {
        match value {
            0 => Ok(Self::Open),
            1 => Ok(Self::Data),
            2 => Ok(Self::Close),
            other => Err(NodeError::muxer(format!("unknown frame flag {other}"))),
        }
    }
}

fn encode_frame(id: u32, flag: Flag, payload: &[u8]) -> Bytes {
    let mut buf = BytesMut::with_capacity(HEADER_SIZE + payload.len());
    buf.put_u32(id);
    buf.put_u8(flag as u8);
    buf.put_slice(payload);
    buf.freeze()
}

fn decode_frame(mut frame: Bytes) -> Result<(u32, Flag, Bytes)> {
    if frame.len() < HEADER_SIZE {
        return Err(NodeError::muxer(format!(
            "frame of {} bytes is shorter than its header",
            frame.len()
        )));
    }
    let id = frame.get_u32();
    let flag = Flag::from_wire(frame.get_u8())?;
    Ok((id, flag, frame))
}

// ============================================
// MuxedConnection
// ============================================

/// A secure connection carrying substreams.
pub struct MuxedConnection {
    remote_peer: PeerId,
    endpoint: Endpoint,
    conn: Arc<SecureConnection>,
    streams: StreamTable,
    next_id: AtomicU32,
    incoming: Mutex<mpsc::Receiver<Substream>>,
    closed: watch::Sender<bool>,
}

impl MuxedConnection {
    fn spawn(conn: SecureConnection, endpoint: Endpoint) -> Result<Arc<Self>> {
        let remote_peer = conn
            .remote_peer()
            .ok_or_else(|| NodeError::muxer("connection is not established"))?;

        let conn = Arc::new(conn);
        let streams: StreamTable = Arc::new(DashMap::new());
        let (incoming_tx, incoming_rx) = mpsc::channel(ACCEPT_BACKLOG);
        let (closed_tx, closed_rx) = watch::channel(false);

        let first_id = match endpoint {
            Endpoint::Dialer => 1,
            Endpoint::Listener => 2,
        };

        let muxed = Arc::new(Self {
            remote_peer,
            endpoint,
            conn: conn.clone(),
            streams: streams.clone(),
            next_id: AtomicU32::new(first_id),
            incoming: Mutex::new(incoming_rx),
            closed: closed_tx,
        });

        let reader = Demuxer {
            remote_peer,
            conn,
            streams,
            incoming: incoming_tx,
        };
        let closed = muxed.closed.clone();
        tokio::spawn(reader.run(closed_rx, closed));

        debug!(peer = %remote_peer.short(), ?endpoint, "Muxed connection ready");
        Ok(muxed)
    }

    /// Authenticated remote peer.
    #[must_use]
    pub const fn remote_peer(&self) -> PeerId {
        self.remote_peer
    }

    /// Which side opened the connection.
    #[must_use]
    pub const fn endpoint(&self) -> Endpoint {
        self.endpoint
    }

    /// Number of open substreams.
    #[must_use]
    pub fn stream_count(&self) -> usize {
        self.streams.len()
    }

    /// Opens a new outbound substream.
    ///
    /// # Errors
    /// `Muxer` if the connection is closed.
    pub fn open_stream(&self) -> Result<Substream> {
        if self.is_closed() {
            return Err(NodeError::muxer("connection closed"));
        }
        let id = self.next_id.fetch_add(2, Ordering::Relaxed);
        let (tx, rx) = mpsc::channel(STREAM_BUFFER);
        self.streams.insert(id, tx);

        if let Err(e) = self.conn.send(encode_frame(id, Flag::Open, &[])) {
            self.streams.remove(&id);
            return Err(e.into());
        }
        trace!(stream = id, "Substream opened");
        Ok(Substream::new(id, self.remote_peer, self.conn.clone(), self.streams.clone(), rx))
    }

    /// Waits for the next substream opened by the remote.
    ///
    /// Returns `None` once the connection is closed.
    pub async fn accept_stream(&self) -> Option<Substream> {
        self.incoming.lock().await.recv().await
    }

    /// Returns `true` once the connection closed.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        *self.closed.borrow()
    }

    /// Waits until the connection closed.
    pub async fn closed(&self) {
        let mut rx = self.closed.subscribe();
        let _ = rx.wait_for(|closed| *closed).await;
    }

    /// Closes the connection and every substream.
    pub fn close(&self) {
        if !self.closed.send_replace(true) {
            debug!(peer = %self.remote_peer.short(), "Closing muxed connection");
        }
        self.streams.clear();
        self.conn.close();
    }
}

impl std::fmt::Debug for MuxedConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MuxedConnection")
            .field("remote", &self.remote_peer)
            .field("endpoint", &self.endpoint)
            .field("streams", &self.streams.len())
            .field("closed", &self.is_closed())
            .finish()
    }
}

// ============================================
// Demuxer Task
// ============================================

struct Demuxer {
    remote_peer: PeerId,
    conn: Arc<SecureConnection>,
    streams: StreamTable,
    incoming: mpsc::Sender<Substream>,
}

impl Demuxer {
    async fn run(self, mut closed_rx: watch::Receiver<bool>, closed: watch::Sender<bool>) {
        loop {
            let frame = tokio::select! {
                frame = self.conn.recv() => frame,
                _ = closed_rx.wait_for(|closed| *closed) => break,
            };

            match frame {
                Ok(Some(frame)) => {
                    if let Err(e) = self.dispatch(frame).await {
                        warn!(peer = %self.remote_peer.short(), error = %e, "Dropping muxed connection");
                        break;
                    }
                }
                Ok(None) => break,
                Err(e) => {
                    debug!(peer = %self.remote_peer.short(), error = %e, "Secure connection failed");
                    break;
                }
            }
        }

        self.streams.clear();
        closed.send_replace(true);
        self.conn.close();
        debug!(peer = %self.remote_peer.short(), "Muxed connection closed");
    }

    async fn dispatch(&self, frame: Bytes) -> Result<()> {
        let (id, flag, payload) = decode_frame(frame)?;
        trace!(stream = id, ?flag, len = payload.len(), "Muxer frame");

        match flag {
            Flag::Open => {
                let (tx, rx) = mpsc::channel(STREAM_BUFFER);
                self.streams.insert(id, tx);
                let stream = Substream::new(
                    id,
                    self.remote_peer,
                    self.conn.clone(),
                    self.streams.clone(),
                    rx,
                );
                if self.incoming.send(stream).await.is_err() {
                    trace!(stream = id, "No acceptor for inbound substream");
                }
            }
            Flag::Data => {
                let sender = self.streams.get(&id).map(|e| e.value().clone());
                match sender {
                    Some(tx) => {
                        if tx.send(payload).await.is_err() {
                            self.streams.remove(&id);
                        }
                    }
                    None => trace!(stream = id, "Data for unknown substream"),
                }
            }
            Flag::Close => {
                self.streams.remove(&id);
            }
        }
        Ok(())
    }
}

// ============================================
// Substream
// ============================================

/// One multiplexed conversation.
///
/// Messages keep their boundaries. `recv` returns `None` once the remote
/// closed the substream or the connection went down.
pub struct Substream {
    id: u32,
    remote_peer: PeerId,
    protocol: Option<String>,
    conn: Arc<SecureConnection>,
    streams: StreamTable,
    rx: mpsc::Receiver<Bytes>,
    closed: bool,
}

impl Substream {
    fn new(
        id: u32,
        remote_peer: PeerId,
        conn: Arc<SecureConnection>,
        streams: StreamTable,
        rx: mpsc::Receiver<Bytes>,
    ) -> Self {
        Self {
            id,
            remote_peer,
            protocol: None,
            conn,
            streams,
            rx,
            closed: false,
        }
    }

    /// Stream id on the connection.
    #[must_use]
    pub const fn id(&self) -> u32 {
        self.id
    }

    /// Peer at the other end.
    #[must_use]
    pub const fn remote_peer(&self) -> PeerId {
        self.remote_peer
    }

    /// Negotiated protocol, once set.
    #[must_use]
    pub fn protocol(&self) -> Option<&str> {
        self.protocol.as_deref()
    }

    /// Records the negotiated protocol.
    pub fn set_protocol(&mut self, protocol: impl Into<String>) {
        self.protocol = Some(protocol.into());
    }

    /// Sends one message.
    ///
    /// # Errors
    /// `StreamClosed` after `close`, or the connection error.
    pub fn send(&self, data: impl AsRef<[u8]>) -> Result<()> {
        if self.closed {
            return Err(NodeError::StreamClosed);
        }
        self.conn.send(encode_frame(self.id, Flag::Data, data.as_ref()))?;
        Ok(())
    }

    /// Receives the next message.
    pub async fn recv(&mut self) -> Option<Bytes> {
        self.rx.recv().await
    }

    /// Closes the substream in both directions.
    pub fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        self.streams.remove(&self.id);
        self.rx.close();
        let _ = self.conn.send(encode_frame(self.id, Flag::Close, &[]));
        trace!(stream = self.id, "Substream closed");
    }
}

impl Drop for Substream {
    fn drop(&mut self) {
        self.close();
    }
}

impl std::fmt::Debug for Substream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Substream")
            .field("id", &self.id)
            .field("remote", &self.remote_peer)
            .field("protocol", &self.protocol)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl MessageIo for Substream {
    async fn send_message(&mut self, msg: Bytes) -> Result<()> {
        self.send(msg)
    }

    async fn recv_message(&mut self) -> Result<Option<Bytes>> {
        Ok(self.recv().await)
    }
}

// ============================================
// Tests
// ============================================

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use peerlink_core::{IdentityKeyPair, SecioConfig, SecureChannel};

    use super::*;

    async fn connected() -> (Arc<MuxedConnection>, Arc<MuxedConnection>) {
        let (a, b) = tokio::io::duplex(64 * 1024);
        let ca = SecureChannel::new(Arc::new(IdentityKeyPair::generate()), SecioConfig::default());
        let cb = SecureChannel::new(Arc::new(IdentityKeyPair::generate()), SecioConfig::default());
        let (sa, sb) = tokio::join!(ca.handshake(a, None), cb.handshake(b, None));
        (
            FrameMuxer.upgrade(sa.unwrap(), Endpoint::Dialer).unwrap(),
            FrameMuxer.upgrade(sb.unwrap(), Endpoint::Listener).unwrap(),
        )
    }

    #[test]
    fn test_frame_header() {
        let frame = encode_frame(7, Flag::Data, b"abc");
        assert_eq!(&frame[..5], &[0, 0, 0, 7, 1]);
        let (id, flag, payload) = decode_frame(frame).unwrap();
        assert_eq!((id, flag), (7, Flag::Data));
        assert_eq!(&payload[..], b"abc");

        assert!(decode_frame(Bytes::from_static(&[0, 0, 1])).is_err());
        assert!(decode_frame(Bytes::from_static(&[0, 0, 0, 1, 9])).is_err());
    }

    #[tokio::test]
    async fn test_substreams_are_independent() {
        let (dialer, listener) = connected().await;

        let mut s1 = dialer.open_stream().unwrap();
        let mut s2 = dialer.open_stream().unwrap();
        assert_eq!(s1.id() % 2, 1);
        assert_eq!(s2.id(), s1.id() + 2);

        let mut r1 = listener.accept_stream().await.unwrap();
        let mut r2 = listener.accept_stream().await.unwrap();
        assert_eq!(r1.id(), s1.id());
        assert_eq!(r2.remote_peer(), dialer.conn.local_peer());

        s2.send(b"two").unwrap();
        s1.send(b"one").unwrap();
        assert_eq!(&r1.recv().await.unwrap()[..], b"one");
        assert_eq!(&r2.recv().await.unwrap()[..], b"two");

        r1.send(b"back").unwrap();
        assert_eq!(&s1.recv().await.unwrap()[..], b"back");
    }

    #[tokio::test]
    async fn test_listener_opens_even_ids() {
        let (dialer, listener) = connected().await;
        let mut out = listener.open_stream().unwrap();
        assert_eq!(out.id() % 2, 0);

        let mut inbound = dialer.accept_stream().await.unwrap();
        out.send(b"hi").unwrap();
        assert_eq!(&inbound.recv().await.unwrap()[..], b"hi");
    }

    #[tokio::test]
    async fn test_close_substream() {
        let (dialer, listener) = connected().await;
        let mut s = dialer.open_stream().unwrap();
        let mut r = listener.accept_stream().await.unwrap();

        s.close();
        assert!(matches!(s.send(b"late"), Err(NodeError::StreamClosed)));
        assert!(r.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_close_connection_ends_everything() {
        let (dialer, listener) = connected().await;
        let _s = dialer.open_stream().unwrap();
        let mut r = listener.accept_stream().await.unwrap();

        dialer.close();
        assert!(dialer.is_closed());
        assert!(dialer.open_stream().is_err());

        tokio::time::timeout(Duration::from_secs(5), listener.closed())
            .await
            .unwrap();
        assert!(r.recv().await.is_none());
        assert!(listener.accept_stream().await.is_none());
    }
}
