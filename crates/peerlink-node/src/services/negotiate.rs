// ============================================
// File: crates/peerlink-node/src/services/negotiate.rs
// ============================================
//! # Protocol Negotiation
//!
//! ## Creation Reason
//! Both ends of a connection or substream must agree on what runs over it
//! before any payload is exchanged: first the crypto protocol on the raw
//! stream, then the muxer on the secure connection, then the application
//! protocol on each substream.
//!
//! ## Exchange
//! ```text
//! Dialer                         Listener
//!   │── "/secio/1.0.0" ──────────►│   supported: echo
//!   │◄───────── "/secio/1.0.0" ───│
//!   │                             │
//!   │── "/unknown/1.0.0" ────────►│   unsupported
//!   │◄───────────────────── "na" ─│
//! ```
//! Each tag travels as one message of whatever `MessageIo` carries it.
//!
//! ## ⚠️ Important Note for Next Developer
//! - `RawFramed` must not read ahead: the stream is handed on to the
//!   secure channel right after negotiation
//!
//! ## Last Modified
//! v0.1.0 - Initial negotiation

use async_trait::async_trait;
use bytes::Bytes;
use tracing::{debug, trace};

use peerlink_core::protocol::{read_frame, write_frame};
use peerlink_core::SecureConnection;
use peerlink_transport::BoxedStream;

use crate::error::{NodeError, Result};

/// Reply refusing a protocol.
pub const NOT_AVAILABLE: &str = "na";

/// Longest accepted protocol tag.
pub const MAX_TAG_SIZE: usize = 1024;

// ============================================
// MessageIo
// ============================================

/// Message-oriented duplex that negotiation runs over.
#[async_trait]
pub trait MessageIo: Send {
    /// Sends one message.
    async fn send_message(&mut self, msg: Bytes) -> Result<()>;

    /// Receives one message, `None` at end of stream.
    async fn recv_message(&mut self) -> Result<Option<Bytes>>;
}

/// Length-prefixed framing over a raw transport stream.
pub struct RawFramed {
    stream: BoxedStream,
}

impl RawFramed {
    /// Wraps a raw stream.
    #[must_use]
    pub fn new(stream: BoxedStream) -> Self {
        Self { stream }
    }

    /// Returns the stream for the next layer.
    #[must_use]
    pub fn into_inner(self) -> BoxedStream {
        self.stream
    }
}

#[async_trait]
impl MessageIo for RawFramed {
    async fn send_message(&mut self, msg: Bytes) -> Result<()> {
        write_frame(&mut self.stream, &msg).await?;
        Ok(())
    }

    async fn recv_message(&mut self) -> Result<Option<Bytes>> {
        Ok(read_frame(&mut self.stream, MAX_TAG_SIZE).await?)
    }
}

#[async_trait]
impl MessageIo for SecureConnection {
    async fn send_message(&mut self, msg: Bytes) -> Result<()> {
        self.send(msg)?;
        Ok(())
    }

    async fn recv_message(&mut self) -> Result<Option<Bytes>> {
        Ok(self.recv().await?)
    }
}

// ============================================
// Negotiation
// ============================================

/// Proposes `protocol` and waits for the listener to confirm it.
///
/// # Errors
/// - `ProtocolNotSupported` if the listener answered `na`
/// - `Negotiation` on an unexpected reply or end of stream
pub async fn select<M>(io: &mut M, protocol: &str) -> Result<()>
where
    M: MessageIo + ?Sized,
{
    trace!(protocol, "Proposing protocol");
    io.send_message(Bytes::copy_from_slice(protocol.as_bytes()))
        .await?;

    let reply = io
        .recv_message()
        .await?
        .ok_or_else(|| NodeError::negotiation(format!("stream closed while selecting {protocol}")))?;

    if reply.as_ref() == protocol.as_bytes() {
        debug!(protocol, "Protocol selected");
        Ok(())
    } else if reply.as_ref() == NOT_AVAILABLE.as_bytes() {
        Err(NodeError::ProtocolNotSupported {
            protocol: protocol.to_string(),
        })
    } else {
        Err(NodeError::negotiation(format!(
            "unexpected reply to {protocol}: {}",
            String::from_utf8_lossy(&reply)
        )))
    }
}

/// Answers proposals until one satisfies `supported`, and returns it.
///
/// Unsupported proposals are refused with `na` and the dialer may try
/// again on the same stream.
///
/// # Errors
/// `Negotiation` if the stream ends first or a tag is not UTF-8.
pub async fn accept<M, F>(io: &mut M, supported: F) -> Result<String>
where
    M: MessageIo + ?Sized,
    F: Fn(&str) -> bool + Send,
{
    loop {
        let proposal = io
            .recv_message()
            .await?
            .ok_or_else(|| NodeError::negotiation("stream closed before a protocol was agreed"))?;
        let protocol = std::str::from_utf8(&proposal)
            .map_err(|_| NodeError::negotiation("protocol tag is not UTF-8"))?
            .to_string();

        if supported(&protocol) {
            io.send_message(proposal).await?;
            debug!(protocol = %protocol, "Protocol accepted");
            return Ok(protocol);
        }

        debug!(protocol = %protocol, "Protocol refused");
        io.send_message(Bytes::from_static(NOT_AVAILABLE.as_bytes()))
            .await?;
    }
}

// ============================================
// Tests
// ============================================

#[cfg(test)]
mod tests {
    use super::*;

    fn pair() -> (RawFramed, RawFramed) {
        let (a, b) = tokio::io::duplex(4096);
        (RawFramed::new(Box::new(a)), RawFramed::new(Box::new(b)))
    }

    #[tokio::test]
    async fn test_select_accepted() {
        let (mut dialer, mut listener) = pair();
        let server = tokio::spawn(async move {
            accept(&mut listener, |p| p == "/secio/1.0.0").await.unwrap()
        });

        select(&mut dialer, "/secio/1.0.0").await.unwrap();
        assert_eq!(server.await.unwrap(), "/secio/1.0.0");
    }

    #[tokio::test]
    async fn test_refused_then_retry() {
        let (mut dialer, mut listener) = pair();
        let server = tokio::spawn(async move {
            accept(&mut listener, |p| p == "/echo/1.0.0").await.unwrap()
        });

        let err = select(&mut dialer, "/chat/1.0.0").await.unwrap_err();
        assert!(matches!(err, NodeError::ProtocolNotSupported { .. }));

        select(&mut dialer, "/echo/1.0.0").await.unwrap();
        assert_eq!(server.await.unwrap(), "/echo/1.0.0");
    }

    #[tokio::test]
    async fn test_stream_closed_during_accept() {
        let (dialer, mut listener) = pair();
        drop(dialer);
        let err = accept(&mut listener, |_| true).await.unwrap_err();
        assert!(matches!(err, NodeError::Negotiation { .. }));
    }

    #[tokio::test]
    async fn test_stream_usable_after_negotiation() {
        use tokio::io::{AsyncReadExt, AsyncWriteExt};

        let (mut dialer, mut listener) = pair();
        let server = tokio::spawn(async move {
            accept(&mut listener, |_| true).await.unwrap();
            let mut stream = listener.into_inner();
            let mut buf = [0u8; 3];
            stream.read_exact(&mut buf).await.unwrap();
            buf
        });

        select(&mut dialer, "/raw/1.0.0").await.unwrap();
        let mut stream = dialer.into_inner();
        stream.write_all(b"raw").await.unwrap();
        assert_eq!(&server.await.unwrap(), b"raw");
    }
}
