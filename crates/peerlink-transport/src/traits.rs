// ============================================
// File: crates/peerlink-transport/src/traits.rs
// ============================================
//! # Transport Traits
//!
//! ## Creation Reason
//! Defines the abstract interface the swarm dials and listens through, so
//! in-memory, TCP and future transports are interchangeable.
//!
//! ## Main Functionality
//! - `Transport`: Dial, listen and address filtering
//! - `Listener`: Stream of inbound connections
//! - `BoxedStream`: Type-erased bidirectional byte stream
//!
//! ## ⚠️ Important Note for Next Developer
//! - Implementations must be Send + Sync for use in async contexts
//! - Dropping a `Listener` stops listening
//!
//! ## Last Modified
//! v0.1.0 - Initial trait definitions

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncWrite};

use peerlink_common::Multiaddr;

use crate::error::Result;

// ============================================
// Stream Types
// ============================================

/// A bidirectional byte stream usable across tasks.
pub trait AsyncStream: AsyncRead + AsyncWrite + Send + Unpin + 'static {}

impl<T> AsyncStream for T where T: AsyncRead + AsyncWrite + Send + Unpin + 'static {}

/// Type-erased connection returned by every transport.
pub type BoxedStream = Box<dyn AsyncStream>;

// ============================================
// Transport Trait
// ============================================

/// Abstract interface for stream transports.
///
/// # Example
/// ```ignore
/// async fn connect(transport: &dyn Transport, addr: &Multiaddr) -> Result<BoxedStream> {
///     if !transport.can_dial(addr) {
///         return Err(TransportError::unsupported(transport.tag(), addr));
///     }
///     transport.dial(addr).await
/// }
/// ```
#[async_trait]
pub trait Transport: Send + Sync {
    /// Short name used in logs, such as `"tcp"`.
    fn tag(&self) -> &'static str;

    /// Returns `true` if this transport can dial or listen on `addr`.
    fn can_dial(&self, addr: &Multiaddr) -> bool;

    /// Keeps the addresses this transport handles.
    fn filter(&self, addrs: &[Multiaddr]) -> Vec<Multiaddr> {
        addrs.iter().filter(|a| self.can_dial(a)).cloned().collect()
    }

    /// Opens a connection to `addr`.
    ///
    /// # Errors
    /// `UnsupportedAddress`, `ConnectionRefused` or `DialFailed`.
    async fn dial(&self, addr: &Multiaddr) -> Result<BoxedStream>;

    /// Starts listening on `addr`.
    ///
    /// # Errors
    /// `UnsupportedAddress`, `AddressInUse` or `BindFailed`.
    async fn listen(&self, addr: &Multiaddr) -> Result<Box<dyn Listener>>;
}

// ============================================
// Listener Trait
// ============================================

/// Source of inbound connections.
#[async_trait]
pub trait Listener: Send {
    /// Address actually bound, with wildcard ports resolved.
    fn local_addr(&self) -> &Multiaddr;

    /// Waits for the next inbound connection.
    ///
    /// Returns the stream and the remote address.
    ///
    /// # Errors
    /// `ListenerClosed` once the listener can no longer accept.
    async fn accept(&mut self) -> Result<(BoxedStream, Multiaddr)>;
}
