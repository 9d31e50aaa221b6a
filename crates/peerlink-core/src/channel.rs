// ============================================
// File: crates/peerlink-core/src/channel.rs
// ============================================
//! # Secure Channel
//!
//! ## Creation Reason
//! Wraps an insecure byte stream into an encrypted, authenticated message
//! channel. The wrapper is returned immediately so callers can queue
//! writes while the handshake is still running.
//!
//! ## Main Functionality
//! - `SecureChannel`: Crypto module holding the local identity and config
//! - `SecureConnection`: Message-oriented handle on one secured stream
//! - `SecioConfig`: Handshake timeout, capability lists and frame limit
//!
//! ## Connection Lifecycle
//! ```text
//!  encrypt() ──► Handshaking ──ok──► Established ──close/EOF──► Closed
//!                    │
//!                    └──error/timeout──► Failed (stream torn down)
//!
//!  Handshaking: send() buffers, recv() waits
//!  Established: writer task seals, reader task opens
//! ```
//!
//! ## ⚠️ Important Note for Next Developer
//! - `on_complete` runs exactly once, with the remote id or the error
//! - The stream is shut down exactly once, by the task that owns it
//! - A MAC failure on any frame fails the whole connection
//!
//! ## Last Modified
//! v0.1.0 - Initial secure channel

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::sync::{mpsc, oneshot, watch, Mutex};
use tracing::{debug, info, warn};

use peerlink_common::types::PeerId;

use crate::crypto::keys::IdentityKeyPair;
use crate::crypto::support::Capabilities;
use crate::error::{CoreError, Result};
use crate::handshake::{self, EstablishedSession, HandshakeState};
use crate::protocol::codec::{read_frame, write_frame, MAX_FRAME_SIZE};

// ============================================
// Constants
// ============================================

/// Default bound on the whole handshake.
pub const DEFAULT_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(5 * 60);

/// Decrypted messages buffered ahead of the reader.
const INBOUND_BUFFER: usize = 256;

// ============================================
// SecioConfig
// ============================================

/// Configuration of the secure channel.
#[derive(Debug, Clone)]
pub struct SecioConfig {
    /// Maximum time allowed for the whole handshake.
    pub handshake_timeout: Duration,
    /// Algorithms offered, most preferred first.
    pub capabilities: Capabilities,
    /// Largest encrypted frame accepted after the handshake.
    pub max_frame_size: usize,
}

impl Default for SecioConfig {
    fn default() -> Self {
        Self {
            handshake_timeout: DEFAULT_HANDSHAKE_TIMEOUT,
            capabilities: Capabilities::default(),
            max_frame_size: MAX_FRAME_SIZE,
        }
    }
}

// ============================================
// ChannelState
// ============================================

/// Observable state of a `SecureConnection`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelState {
    /// The handshake is running.
    Handshaking,
    /// The remote proved this identity.
    Established(PeerId),
    /// The handshake or the transport failed.
    Failed(String),
    /// The connection was closed.
    Closed,
}

impl ChannelState {
    /// Returns `true` once the connection can no longer carry data.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Failed(_) | Self::Closed)
    }
}

enum Outbound {
    Data(Bytes),
    Close,
}

// ============================================
// SecureChannel
// ============================================

/// Secure channel crypto module.
///
/// # Example
/// ```no_run
/// use std::sync::Arc;
/// use peerlink_core::channel::{SecioConfig, SecureChannel};
/// use peerlink_core::crypto::IdentityKeyPair;
///
/// # async fn run(stream: tokio::net::TcpStream) -> peerlink_core::Result<()> {
/// let channel = SecureChannel::new(Arc::new(IdentityKeyPair::generate()), SecioConfig::default());
/// let conn = channel.handshake(stream, None).await?;
/// conn.send(&b"hello"[..])?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct SecureChannel {
    identity: Arc<IdentityKeyPair>,
    config: SecioConfig,
}

impl SecureChannel {
    /// Protocol tag advertised during stream negotiation.
    pub const PROTOCOL: &'static str = crate::protocol::SECIO_PROTOCOL;

    /// Creates a channel module for `identity`.
    #[must_use]
    pub fn new(identity: Arc<IdentityKeyPair>, config: SecioConfig) -> Self {
        Self { identity, config }
    }

    /// Our peer id.
    #[must_use]
    pub fn local_peer(&self) -> PeerId {
        self.identity.peer_id()
    }

    /// Returns the configuration.
    #[must_use]
    pub const fn config(&self) -> &SecioConfig {
        &self.config
    }

    /// Wraps `insecure` and starts the handshake in the background.
    ///
    /// Returns at once. Writes issued before the handshake completes are
    /// buffered and flushed afterwards; reads wait for it. `on_complete` is
    /// invoked exactly once with the authenticated remote id or the error.
    pub fn encrypt<S, F>(
        &self,
        insecure: S,
        expected_remote: Option<PeerId>,
        on_complete: F,
    ) -> SecureConnection
    where
        S: AsyncRead + AsyncWrite + Send + Unpin + 'static,
        F: FnOnce(Result<PeerId>) + Send + 'static,
    {
        let (state_tx, state_rx) = watch::channel(ChannelState::Handshaking);
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let (inbound_tx, inbound_rx) = mpsc::channel(INBOUND_BUFFER);

        let handshake = HandshakeState::new(
            self.identity.clone(),
            self.config.capabilities.clone(),
            expected_remote,
        );
        let task = ChannelTask {
            state: Arc::new(state_tx),
            outbound_rx,
            outbound_tx: outbound_tx.downgrade(),
            inbound_tx,
            timeout: self.config.handshake_timeout,
            max_frame_size: self.config.max_frame_size,
        };
        tokio::spawn(task.run(insecure, handshake, on_complete));

        SecureConnection {
            local_peer: self.local_peer(),
            state: state_rx,
            outbound: outbound_tx,
            inbound: Mutex::new(inbound_rx),
        }
    }

    /// Wraps `insecure` and waits for the handshake to finish.
    ///
    /// # Errors
    /// The handshake error, including `Timeout`.
    pub async fn handshake<S>(
        &self,
        insecure: S,
        expected_remote: Option<PeerId>,
    ) -> Result<SecureConnection>
    where
        S: AsyncRead + AsyncWrite + Send + Unpin + 'static,
    {
        let (done_tx, done_rx) = oneshot::channel();
        let conn = self.encrypt(insecure, expected_remote, move |result| {
            let _ = done_tx.send(result);
        });
        done_rx
            .await
            .map_err(|_| CoreError::closed("handshake task ended without a result"))??;
        Ok(conn)
    }
}

// ============================================
// Background Task
// ============================================

struct ChannelTask {
    state: Arc<watch::Sender<ChannelState>>,
    outbound_rx: mpsc::UnboundedReceiver<Outbound>,
    outbound_tx: mpsc::WeakUnboundedSender<Outbound>,
    inbound_tx: mpsc::Sender<Bytes>,
    timeout: Duration,
    max_frame_size: usize,
}

impl ChannelTask {
    async fn run<S, F>(self, mut stream: S, mut handshake: HandshakeState, on_complete: F)
    where
        S: AsyncRead + AsyncWrite + Send + Unpin + 'static,
        F: FnOnce(Result<PeerId>) + Send + 'static,
    {
        let timed =
            tokio::time::timeout(self.timeout, handshake::perform(&mut handshake, &mut stream)).await;
        let outcome = match timed {
            Ok(result) => result.and_then(|()| handshake.into_established()),
            Err(_) => {
                handshake.fail();
                Err(CoreError::Timeout(self.timeout))
            }
        };

        let session = match outcome {
            Ok(session) => session,
            Err(e) => {
                let _ = stream.shutdown().await;
                drop(stream);
                self.state.send_replace(ChannelState::Failed(e.to_string()));
                on_complete(Err(e));
                return;
            }
        };

        let remote = session.remote_peer;
        info!(
            remote = %remote.short(),
            cipher = %session.selected.cipher,
            curve = %session.selected.curve,
            "Secure channel established"
        );
        self.state.send_replace(ChannelState::Established(remote));
        on_complete(Ok(remote));

        self.pump(stream, session).await;
    }

    async fn pump<S>(self, stream: S, session: EstablishedSession)
    where
        S: AsyncRead + AsyncWrite + Send + Unpin + 'static,
    {
        let EstablishedSession {
            mut outbound,
            mut inbound,
            remote_peer,
            ..
        } = session;
        let (mut reader, mut writer) = tokio::io::split(stream);

        let Self {
            state,
            mut outbound_rx,
            outbound_tx,
            inbound_tx,
            max_frame_size,
            ..
        } = self;

        let reader_state = state.clone();
        tokio::spawn(async move {
            loop {
                match read_frame(&mut reader, max_frame_size).await {
                    Ok(Some(frame)) => match inbound.open(&frame) {
                        Ok(plain) => {
                            if inbound_tx.send(Bytes::from(plain)).await.is_err() {
                                break;
                            }
                        }
                        Err(e) => {
                            warn!(remote = %remote_peer.short(), error = %e, "Dropping connection on bad frame");
                            reader_state.send_replace(ChannelState::Failed(e.to_string()));
                            break;
                        }
                    },
                    Ok(None) => break,
                    Err(e) => {
                        debug!(remote = %remote_peer.short(), error = %e, "Secure read failed");
                        break;
                    }
                }
            }
            if let Some(tx) = outbound_tx.upgrade() {
                let _ = tx.send(Outbound::Close);
            }
        });

        while let Some(msg) = outbound_rx.recv().await {
            match msg {
                Outbound::Data(data) => {
                    let sealed = outbound.seal(&data);
                    if let Err(e) = write_frame(&mut writer, &sealed).await {
                        debug!(remote = %remote_peer.short(), error = %e, "Secure write failed");
                        break;
                    }
                }
                Outbound::Close => break,
            }
        }

        let _ = writer.shutdown().await;
        state.send_if_modified(|s| {
            if s.is_terminal() {
                false
            } else {
                *s = ChannelState::Closed;
                true
            }
        });
        debug!(remote = %remote_peer.short(), "Secure channel closed");
    }
}

// ============================================
// SecureConnection
// ============================================

/// Handle on one secured stream.
///
/// Message boundaries are preserved: every `send` arrives as one `recv`.
/// All methods take `&self`, so the handle can be shared behind an `Arc`
/// between a reading and a writing task.
pub struct SecureConnection {
    local_peer: PeerId,
    state: watch::Receiver<ChannelState>,
    outbound: mpsc::UnboundedSender<Outbound>,
    inbound: Mutex<mpsc::Receiver<Bytes>>,
}

impl SecureConnection {
    /// Our peer id.
    #[must_use]
    pub const fn local_peer(&self) -> PeerId {
        self.local_peer
    }

    /// Remote peer id, once established.
    #[must_use]
    pub fn remote_peer(&self) -> Option<PeerId> {
        match &*self.state.borrow() {
            ChannelState::Established(id) => Some(*id),
            _ => None,
        }
    }

    /// Snapshot of the connection state.
    #[must_use]
    pub fn state(&self) -> ChannelState {
        self.state.borrow().clone()
    }

    /// Returns `true` once the connection failed or closed.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.state.borrow().is_terminal()
    }

    /// Waits for the handshake and returns the remote peer id.
    ///
    /// # Errors
    /// `ChannelClosed` if the handshake failed or the connection closed first.
    pub async fn established(&self) -> Result<PeerId> {
        let mut rx = self.state.clone();
        let state = rx
            .wait_for(|s| !matches!(s, ChannelState::Handshaking))
            .await
            .map_err(|_| CoreError::closed("channel task ended"))?
            .clone();
        match state {
            ChannelState::Established(id) => Ok(id),
            ChannelState::Failed(reason) => Err(CoreError::closed(reason)),
            ChannelState::Closed | ChannelState::Handshaking => Err(CoreError::closed("closed")),
        }
    }

    /// Waits until the connection failed or closed.
    pub async fn closed(&self) {
        let mut rx = self.state.clone();
        let _ = rx.wait_for(ChannelState::is_terminal).await;
    }

    /// Queues one message. Buffered until the handshake completes.
    ///
    /// # Errors
    /// `ChannelClosed` if the connection already failed or closed.
    pub fn send(&self, data: impl Into<Bytes>) -> Result<()> {
        if let ChannelState::Failed(reason) = &*self.state.borrow() {
            return Err(CoreError::closed(reason.clone()));
        }
        if *self.state.borrow() == ChannelState::Closed {
            return Err(CoreError::closed("connection closed"));
        }
        self.outbound
            .send(Outbound::Data(data.into()))
            .map_err(|_| CoreError::closed("connection closed"))
    }

    /// Receives the next message. `Ok(None)` on a clean end of stream.
    ///
    /// # Errors
    /// `ChannelClosed` if the handshake or the transport failed.
    pub async fn recv(&self) -> Result<Option<Bytes>> {
        let mut inbound = self.inbound.lock().await;
        match inbound.recv().await {
            Some(data) => Ok(Some(data)),
            None => match self.state() {
                ChannelState::Failed(reason) => Err(CoreError::closed(reason)),
                _ => Ok(None),
            },
        }
    }

    /// Closes the connection after flushing queued messages.
    pub fn close(&self) {
        let _ = self.outbound.send(Outbound::Close);
    }
}

impl std::fmt::Debug for SecureConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SecureConnection")
            .field("local", &self.local_peer)
            .field("state", &*self.state.borrow())
            .finish_non_exhaustive()
    }
}

// ============================================
// Tests
// ============================================
