// ============================================
// File: crates/peerlink-node/src/dht.rs
// ============================================
//! # DHT Routing
//!
//! ## Creation Reason
//! Peer and content routing come from a distributed hash table that lives
//! outside this crate. The node only needs a narrow interface to it, and
//! must keep working when none is configured.
//!
//! ## Main Functionality
//! - `Dht`: Interface a DHT implementation provides
//! - `PeerRouting`, `ContentRouting`, `DhtRecords`: Borrowed views the
//!   `NetCore` hands out; each fails with `DhtUnavailable` without a DHT
//!
//! ## ⚠️ Important Note for Next Developer
//! - Views are cheap borrows, create them per call
//! - Timeouts are the caller's business (`tokio::time::timeout`)
//!
//! ## Last Modified
//! v0.1.0 - Initial DHT interface

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;

use peerlink_common::PeerId;

use crate::error::{NodeError, Result};
use crate::services::peer_book::PeerInfo;

// ============================================
// Dht Trait
// ============================================

/// Distributed hash table collaborator.
#[async_trait]
pub trait Dht: Send + Sync {
    /// Joins the table.
    async fn start(&self) -> Result<()>;

    /// Leaves the table.
    async fn stop(&self) -> Result<()>;

    /// Looks up the addresses of a peer.
    async fn find_peer(&self, id: &PeerId) -> Result<PeerInfo>;

    /// Finds peers providing `key`.
    async fn find_providers(&self, key: &[u8]) -> Result<Vec<PeerInfo>>;

    /// Announces that we provide `key`.
    async fn provide(&self, key: &[u8]) -> Result<()>;

    /// Stores a record.
    async fn put(&self, key: &[u8], value: Bytes) -> Result<()>;

    /// Fetches the best record for `key`.
    async fn get(&self, key: &[u8]) -> Result<Bytes>;

    /// Fetches up to `count` records for `key`.
    async fn get_many(&self, key: &[u8], count: usize) -> Result<Vec<Bytes>>;
}

fn require(dht: Option<&Arc<dyn Dht>>) -> Result<&Arc<dyn Dht>> {
    dht.ok_or(NodeError::DhtUnavailable)
}

// ============================================
// Views
// ============================================

/// Peer routing through the DHT.
#[derive(Clone, Copy)]
pub struct PeerRouting<'a> {
    dht: Option<&'a Arc<dyn Dht>>,
}

impl<'a> PeerRouting<'a> {
    pub(crate) const fn new(dht: Option<&'a Arc<dyn Dht>>) -> Self {
        Self { dht }
    }

    /// Looks up the addresses of a peer.
    ///
    /// # Errors
    /// `DhtUnavailable` without a DHT, otherwise the DHT error.
    pub async fn find_peer(&self, id: &PeerId) -> Result<PeerInfo> {
        require(self.dht)?.find_peer(id).await
    }
}

/// Content routing through the DHT.
#[derive(Clone, Copy)]
pub struct ContentRouting<'a> {
    dht: Option<&'a Arc<dyn Dht>>,
}

impl<'a> ContentRouting<'a> {
    pub(crate) const fn new(dht: Option<&'a Arc<dyn Dht>>) -> Self {
        Self { dht }
    }

    /// Finds peers providing `key`.
    ///
    /// # Errors
    /// `DhtUnavailable` without a DHT, otherwise the DHT error.
    pub async fn find_providers(&self, key: &[u8]) -> Result<Vec<PeerInfo>> {
        require(self.dht)?.find_providers(key).await
    }

    /// Announces that we provide `key`.
    ///
    /// # Errors
    /// `DhtUnavailable` without a DHT, otherwise the DHT error.
    pub async fn provide(&self, key: &[u8]) -> Result<()> {
        require(self.dht)?.provide(key).await
    }
}

/// Record storage in the DHT.
#[derive(Clone, Copy)]
pub struct DhtRecords<'a> {
    dht: Option<&'a Arc<dyn Dht>>,
}

impl<'a> DhtRecords<'a> {
    pub(crate) const fn new(dht: Option<&'a Arc<dyn Dht>>) -> Self {
        Self { dht }
    }

    /// Returns `true` if a DHT is configured.
    #[must_use]
    pub const fn is_available(&self) -> bool {
        self.dht.is_some()
    }

    /// Stores a record.
    ///
    /// # Errors
    /// `DhtUnavailable` without a DHT, otherwise the DHT error.
    pub async fn put(&self, key: &[u8], value: Bytes) -> Result<()> {
        require(self.dht)?.put(key, value).await
    }

    /// Fetches the best record for `key`.
    ///
    /// # Errors
    /// `DhtUnavailable` without a DHT, otherwise the DHT error.
    pub async fn get(&self, key: &[u8]) -> Result<Bytes> {
        require(self.dht)?.get(key).await
    }

    /// Fetches up to `count` records for `key`.
    ///
    /// # Errors
    /// `DhtUnavailable` without a DHT, otherwise the DHT error.
    pub async fn get_many(&self, key: &[u8], count: usize) -> Result<Vec<Bytes>> {
        require(self.dht)?.get_many(key, count).await
    }
}

// ============================================
// Tests
// ============================================
