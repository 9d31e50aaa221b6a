// ============================================
// File: crates/peerlink-node/src/config.rs
// ============================================
//! # Node Configuration
//!
//! ## Creation Reason
//! Provides configuration management for a peerlink node, loaded from
//! TOML files.
//!
//! ## Main Functionality
//! - `NodeConfig`: Main configuration structure
//! - TOML file loading and parsing
//! - Configuration validation
//! - Conversion into the secure channel and discovery settings
//!
//! ## Configuration Sections
//! - `network`: Addresses to listen on
//! - `secio`: Handshake timeout and offered algorithms
//! - `discovery`: Bootstrap peers
//! - `identity`: Key file path
//! - `logging`: Log level
//!
//! ## Example Configuration
//! ```toml
//! [network]
//! listen_addrs = ["/ip4/0.0.0.0/tcp/4001"]
//!
//! [secio]
//! handshake_timeout_secs = 300
//! exchanges = ["P-256", "P-384"]
//! ciphers = ["AES-256", "AES-128"]
//! hashes = ["SHA256"]
//!
//! [discovery]
//! bootstrap = ["/dns4/boot.example.org/tcp/4001/p2p/Qm..."]
//!
//! [identity]
//! key_file = "/var/lib/peerlink/identity.json"
//!
//! [logging]
//! level = "info"
//! ```
//!
//! ## ⚠️ Important Note for Next Developer
//! - All config changes require a node restart
//! - Every section has defaults; an empty file is a valid config
//!
//! ## Last Modified
//! v0.1.0 - Initial configuration implementation

use std::net::Ipv4Addr;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::info;

use peerlink_common::{Multiaddr, MultiaddrExt, Protocol};
use peerlink_core::channel::DEFAULT_HANDSHAKE_TIMEOUT;
use peerlink_core::protocol::MAX_FRAME_SIZE;
use peerlink_core::{Capabilities, CipherKind, Curve, HashKind, SecioConfig};

use crate::discovery::BootstrapDiscovery;
use crate::error::{NodeError, Result};

/// Accepted `logging.level` values.
const LOG_LEVELS: &[&str] = &["trace", "debug", "info", "warn", "error"];

/// Upper bound for `secio.handshake_timeout_secs`.
const MAX_HANDSHAKE_TIMEOUT_SECS: u64 = 3600;

// ============================================
// NodeConfig
// ============================================

/// Main node configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NodeConfig {
    /// Network configuration.
    #[serde(default)]
    pub network: NetworkConfig,

    /// Secure channel configuration.
    #[serde(default)]
    pub secio: SecioSection,

    /// Discovery configuration.
    #[serde(default)]
    pub discovery: DiscoveryConfig,

    /// Identity key configuration.
    #[serde(default)]
    pub identity: IdentityConfig,

    /// Logging configuration.
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl NodeConfig {
    /// Loads configuration from a TOML file.
    ///
    /// # Errors
    /// `ConfigLoad` if the file cannot be read or parsed, `ConfigInvalid`
    /// if a value is out of range.
    pub async fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let path_str = path.display().to_string();

        info!("Loading configuration from: {}", path_str);

        let content = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| NodeError::config_load(&path_str, e.to_string()))?;

        let config: Self = toml::from_str(&content)
            .map_err(|e| NodeError::config_load(&path_str, e.to_string()))?;

        config.validate()?;

        info!("Configuration loaded successfully");
        Ok(config)
    }

    /// Loads configuration from a string (useful for testing).
    ///
    /// # Errors
    /// Same as [`NodeConfig::load`].
    pub fn from_str(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content)
            .map_err(|e| NodeError::config_load("<string>", e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Validates the configuration.
    ///
    /// # Errors
    /// `ConfigInvalid` naming the first bad field.
    pub fn validate(&self) -> Result<()> {
        self.network.validate()?;
        self.secio.validate()?;
        self.discovery.validate()?;
        self.identity.validate()?;
        self.logging.validate()?;
        Ok(())
    }

    /// Serializes configuration to TOML string.
    #[must_use]
    pub fn to_toml(&self) -> String {
        toml::to_string_pretty(self).unwrap_or_default()
    }

    // ========================================
    // Conversions
    // ========================================

    /// Secure channel settings.
    #[must_use]
    pub fn secio_config(&self) -> SecioConfig {
        SecioConfig {
            handshake_timeout: self.secio.handshake_timeout(),
            capabilities: self.secio.capabilities(),
            max_frame_size: MAX_FRAME_SIZE,
        }
    }

    /// Bootstrap discovery over the configured peers.
    ///
    /// # Errors
    /// `InvalidPeerRef` if an address has no `/p2p/` component.
    pub fn bootstrap_discovery(&self) -> Result<BootstrapDiscovery> {
        BootstrapDiscovery::from_multiaddrs(&self.discovery.bootstrap)
    }
}

// ============================================
// NetworkConfig
// ============================================

/// Network configuration section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkConfig {
    /// Addresses to listen on.
    #[serde(default = "default_listen_addrs")]
    pub listen_addrs: Vec<Multiaddr>,
}

fn default_listen_addrs() -> Vec<Multiaddr> {
    vec![Multiaddr::empty()
        .with(Protocol::Ip4(Ipv4Addr::UNSPECIFIED))
        .with(Protocol::Tcp(4001))]
}

impl NetworkConfig {
    fn validate(&self) -> Result<()> {
        if self.listen_addrs.is_empty() {
            return Err(NodeError::config_invalid(
                "network.listen_addrs",
                "at least one address is required",
            ));
        }
        if let Some(addr) = self.listen_addrs.iter().find(|a| a.peer_id().is_some()) {
            return Err(NodeError::config_invalid(
                "network.listen_addrs",
                format!("{addr} must not carry a /p2p/ component"),
            ));
        }
        Ok(())
    }
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            listen_addrs: default_listen_addrs(),
        }
    }
}

// ============================================
// SecioSection
// ============================================

/// Secure channel configuration section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecioSection {
    /// Handshake timeout in seconds.
    #[serde(default = "default_handshake_timeout_secs")]
    pub handshake_timeout_secs: u64,

    /// Offered curves, most preferred first.
    #[serde(default = "default_exchanges")]
    pub exchanges: Vec<Curve>,

    /// Offered ciphers, most preferred first.
    #[serde(default = "default_ciphers")]
    pub ciphers: Vec<CipherKind>,

    /// Offered hashes, most preferred first.
    #[serde(default = "default_hashes")]
    pub hashes: Vec<HashKind>,
}

fn default_handshake_timeout_secs() -> u64 {
    DEFAULT_HANDSHAKE_TIMEOUT.as_secs()
}

fn default_exchanges() -> Vec<Curve> {
    Capabilities::default().exchanges
}

fn default_ciphers() -> Vec<CipherKind> {
    Capabilities::default().ciphers
}

fn default_hashes() -> Vec<HashKind> {
    Capabilities::default().hashes
}

impl SecioSection {
    fn validate(&self) -> Result<()> {
        if self.handshake_timeout_secs == 0 {
            return Err(NodeError::config_invalid(
                "secio.handshake_timeout_secs",
                "must be greater than 0",
            ));
        }
        if self.handshake_timeout_secs > MAX_HANDSHAKE_TIMEOUT_SECS {
            return Err(NodeError::config_invalid(
                "secio.handshake_timeout_secs",
                format!("cannot exceed {MAX_HANDSHAKE_TIMEOUT_SECS}"),
            ));
        }
        for (field, empty) in [
            ("secio.exchanges", self.exchanges.is_empty()),
            ("secio.ciphers", self.ciphers.is_empty()),
            ("secio.hashes", self.hashes.is_empty()),
        ] {
            if empty {
                return Err(NodeError::config_invalid(field, "cannot be empty"));
            }
        }
        Ok(())
    }

    /// Handshake timeout.
    #[must_use]
    pub const fn handshake_timeout(&self) -> Duration {
        Duration::from_secs(self.handshake_timeout_secs)
    }

    /// Offered algorithms.
    #[must_use]
    pub fn capabilities(&self) -> Capabilities {
        Capabilities {
            exchanges: self.exchanges.clone(),
            ciphers: self.ciphers.clone(),
            hashes: self.hashes.clone(),
        }
    }
}

impl Default for SecioSection {
    fn default() -> Self {
        Self {
            handshake_timeout_secs: default_handshake_timeout_secs(),
            exchanges: default_exchanges(),
            ciphers: default_ciphers(),
            hashes: default_hashes(),
        }
    }
}

// ============================================
// DiscoveryConfig
// ============================================

/// Discovery configuration section.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DiscoveryConfig {
    /// Bootstrap peers, each with a `/p2p/<id>` suffix.
    #[serde(default)]
    pub bootstrap: Vec<Multiaddr>,
}

impl DiscoveryConfig {
    fn validate(&self) -> Result<()> {
        if let Some(addr) = self.bootstrap.iter().find(|a| a.peer_id().is_none()) {
            return Err(NodeError::config_invalid(
                "discovery.bootstrap",
                format!("{addr} is missing a /p2p/<id> component"),
            ));
        }
        Ok(())
    }
}

// ============================================
// IdentityConfig
// ============================================

/// Identity key configuration section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdentityConfig {
    /// Path of the identity key file.
    #[serde(default = "default_key_file")]
    pub key_file: String,
}

fn default_key_file() -> String {
    "peerlink-identity.json".to_string()
}

impl IdentityConfig {
    fn validate(&self) -> Result<()> {
        if self.key_file.is_empty() {
            return Err(NodeError::config_invalid("identity.key_file", "cannot be empty"));
        }
        Ok(())
    }
}

impl Default for IdentityConfig {
    fn default() -> Self {
        Self {
            key_file: default_key_file(),
        }
    }
}

// ============================================
// LoggingConfig
// ============================================

/// Logging configuration section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Default log level, overridden by `RUST_LOG`.
    #[serde(default = "default_log_level")]
    pub level: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl LoggingConfig {
    fn validate(&self) -> Result<()> {
        if !LOG_LEVELS.contains(&self.level.as_str()) {
            return Err(NodeError::config_invalid(
                "logging.level",
                format!("must be one of {}", LOG_LEVELS.join(", ")),
            ));
        }
        Ok(())
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

// ============================================
// Tests
// ============================================
