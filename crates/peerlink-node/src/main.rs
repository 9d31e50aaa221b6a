// ============================================
// File: crates/peerlink-node/src/main.rs
// ============================================
//! # Peerlink Node Entry Point
//!
//! ## Creation Reason
//! Main entry point for the peerlink node binary.
//! Handles CLI parsing, logging setup, identity keys and node startup.
//!
//! ## Main Functionality
//! - CLI argument parsing with clap
//! - Logging initialization with tracing
//! - Configuration loading
//! - Identity key generation and loading
//! - Node execution until Ctrl-C
//!
//! ## Usage
//! ```bash
//! peerlink keygen                                   # Create identity key
//! peerlink start                                    # Run the node
//! peerlink id                                       # Show peer id
//! peerlink validate                                 # Validate config file
//! peerlink ping --peer /ip4/10.0.0.2/tcp/4001/p2p/<id>
//! ```
//!
//! ## ⚠️ Important Note for Next Developer
//! - `start` generates a key on first run if none exists
//! - Logging is set up once, after the config file is read, so that
//!   `[logging] level` applies; `RUST_LOG` still wins
//! - The key file holds the private seed; it is written with mode 0600
//!
//! ## Last Modified
//! v0.1.0 - Initial CLI implementation

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use base64::Engine;
use clap::{Parser, Subcommand};
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use peerlink_common::{address, MultiaddrExt};
use peerlink_core::IdentityKeyPair;
use peerlink_node::{NetCore, NodeConfig, NodeEvent, PeerRef};

// ============================================
// CLI Definition
// ============================================

/// Peerlink peer-to-peer node
#[derive(Parser, Debug)]
#[command(name = "peerlink")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Subcommand to execute
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Start the node
    Start {
        /// Path to configuration file
        #[arg(short, long, default_value = "/etc/peerlink/node.toml")]
        config: PathBuf,
    },

    /// Generate an identity key
    Keygen {
        /// Where to write the key file
        #[arg(short, long, default_value = "peerlink-identity.json")]
        out: PathBuf,

        /// Overwrite an existing key file
        #[arg(long)]
        force: bool,
    },

    /// Show the peer id of the configured identity
    Id {
        /// Path to configuration file
        #[arg(short, long, default_value = "/etc/peerlink/node.toml")]
        config: PathBuf,

        /// Print the hex public key instead of the peer id
        #[arg(long)]
        public_key: bool,
    },

    /// Validate configuration file
    Validate {
        /// Path to configuration file
        #[arg(short, long, default_value = "/etc/peerlink/node.toml")]
        config: PathBuf,
    },

    /// Ping a peer once and print the round-trip time
    Ping {
        /// Path to configuration file
        #[arg(short, long, default_value = "/etc/peerlink/node.toml")]
        config: PathBuf,

        /// Peer address ending in /p2p/<id>
        #[arg(short, long)]
        peer: String,
    },
}

impl Commands {
    /// Config file the command reads, if any.
    fn config_path(&self) -> Option<&Path> {
        match self {
            Self::Start { config }
            | Self::Validate { config }
            | Self::Id { config, .. }
            | Self::Ping { config, .. } => Some(config.as_path()),
            Self::Keygen { .. } => None,
        }
    }
}

// ============================================
// Main
// ============================================

const DEFAULT_LOG_LEVEL: &str = "info";

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let level = match cli.command.config_path() {
        Some(path) => configured_log_level(path).await,
        None => DEFAULT_LOG_LEVEL.to_string(),
    };
    init_logging(&level);

    let result = match cli.command {
        Commands::Start { config } => cmd_start(config).await,
        Commands::Keygen { out, force } => cmd_keygen(out, force).await,
        Commands::Id { config, public_key } => cmd_id(config, public_key).await,
        Commands::Validate { config } => cmd_validate(config).await,
        Commands::Ping { config, peer } => cmd_ping(config, peer).await,
    };

    if let Err(e) = result {
        error!("{:#}", e);
        std::process::exit(1);
    }
}

// ============================================
// Commands
// ============================================

/// Runs the node until Ctrl-C.
async fn cmd_start(config_path: PathBuf) -> anyhow::Result<()> {
    info!("Starting peerlink node...");

    let config = load_or_default_config(&config_path).await?;

    let key_path = PathBuf::from(&config.identity.key_file);
    let identity = if key_path.exists() {
        load_key(&key_path).await?
    } else {
        info!("No identity key found, generating one at {}", key_path.display());
        let identity = IdentityKeyPair::generate();
        save_key(&identity, &key_path).await?;
        identity
    };

    let node = NetCore::from_config(&config, Arc::new(identity))?;
    let mut events = node.subscribe();
    node.start().await?;

    info!("════════════════════════════════════════");
    info!("Peer ID:  {}", node.local_peer());
    for addr in node.peer_info().multiaddrs() {
        info!("Address:  {}", addr.clone().with_peer_id(&node.local_peer())?);
    }
    info!("════════════════════════════════════════");

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            event = events.recv() => match event {
                Ok(NodeEvent::PeerConnect(peer)) => info!(peer = %peer.short(), "Connected"),
                Ok(NodeEvent::PeerDisconnect(peer)) => info!(peer = %peer.short(), "Disconnected"),
                Ok(NodeEvent::PeerDiscovery(peer)) => {
                    info!(peer = %peer.id.short(), addrs = peer.multiaddrs().len(), "Discovered");
                }
                Ok(_) => {}
                Err(e) => warn!("Event stream: {}", e),
            },
        }
    }

    info!("Shutdown signal received");
    node.stop().await?;
    Ok(())
}

/// Generates an identity key file.
async fn cmd_keygen(out: PathBuf, force: bool) -> anyhow::Result<()> {
    if out.exists() && !force {
        anyhow::bail!(
            "{} already exists, pass --force to overwrite it",
            out.display()
        );
    }

    let identity = IdentityKeyPair::generate();
    save_key(&identity, &out).await?;

    println!("✅ Identity key written to {}", out.display());
    println!();
    println!("════════════════════════════════════════");
    println!("   Peer ID:     {}", identity.peer_id());
    println!("   Public Key:  {}", hex::encode(identity.public_key().to_bytes()));
    println!("════════════════════════════════════════");
    Ok(())
}

/// Prints the peer id of the configured identity.
async fn cmd_id(config_path: PathBuf, public_key: bool) -> anyhow::Result<()> {
    let config = load_or_default_config(&config_path).await?;
    let key_path = PathBuf::from(&config.identity.key_file);
    if !key_path.exists() {
        println!("❌ Identity key not found: {}", key_path.display());
        println!("   Create one with: peerlink keygen --out {}", key_path.display());
        std::process::exit(1);
    }

    let identity = load_key(&key_path).await?;
    if public_key {
        println!("{}", hex::encode(identity.public_key().to_bytes()));
    } else {
        println!("{}", identity.peer_id());
    }
    Ok(())
}

/// Validates configuration file.
async fn cmd_validate(config_path: PathBuf) -> anyhow::Result<()> {
    if !config_path.exists() {
        println!("⚠️  Config file not found: {}", config_path.display());
        println!("   Node will use default values.");
        return Ok(());
    }

    let config = NodeConfig::load(&config_path).await?;

    println!("✅ Configuration is valid");
    println!();
    println!("Network:");
    for addr in &config.network.listen_addrs {
        println!("   Listen:     {addr}");
    }
    println!();
    println!("Secure Channel:");
    println!("   Timeout:    {}s", config.secio.handshake_timeout_secs);
    println!("   Exchanges:  {}", join(&config.secio.exchanges));
    println!("   Ciphers:    {}", join(&config.secio.ciphers));
    println!("   Hashes:     {}", join(&config.secio.hashes));
    println!();
    println!("Discovery:");
    println!("   Bootstrap:  {} peer address(es)", config.discovery.bootstrap.len());
    println!();
    println!("Identity:");
    println!("   Key File:   {}", config.identity.key_file);
    println!();

    Ok(())
}

/// Pings one peer.
async fn cmd_ping(config_path: PathBuf, peer: String) -> anyhow::Result<()> {
    let mut config = load_or_default_config(&config_path).await?;
    config.network.listen_addrs = vec![address::parse("/ip4/0.0.0.0/tcp/0")?];
    config.discovery.bootstrap.clear();

    let identity = IdentityKeyPair::generate();
    let node = NetCore::from_config(&config, Arc::new(identity))?;
    let target: PeerRef = peer.parse()?;

    node.start().await?;
    let result = node.ping(target).await;
    node.stop().await?;

    let rtt = result.with_context(|| format!("ping {peer}"))?;
    println!("Pong from {peer}: {:.2} ms", rtt.as_secs_f64() * 1000.0);
    Ok(())
}

// ============================================
// Helper Functions
// ============================================

/// Initializes the tracing subscriber.
fn init_logging(level: &str) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(level));

    tracing_subscriber::registry()
        .with(fmt::layer().with_target(true))
        .with(filter)
        .try_init()
        .ok();
}

/// Log level from the config file, or the default when it cannot be read.
///
/// Load errors are reported later by the command itself.
async fn configured_log_level(path: &Path) -> String {
    if !path.exists() {
        return DEFAULT_LOG_LEVEL.to_string();
    }
    NodeConfig::load(path)
        .await
        .map_or_else(|_| DEFAULT_LOG_LEVEL.to_string(), |config| config.logging.level)
}

/// Loads config, or returns the default when the file does not exist.
async fn load_or_default_config(path: &Path) -> anyhow::Result<NodeConfig> {
    if path.exists() {
        Ok(NodeConfig::load(path).await?)
    } else {
        info!("Config file not found, using defaults");
        Ok(NodeConfig::default())
    }
}

fn join<T: std::fmt::Display>(items: &[T]) -> String {
    items
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

/// Loads an identity key from a JSON file.
async fn load_key(path: &Path) -> anyhow::Result<IdentityKeyPair> {
    let content = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("reading {}", path.display()))?;
    let key_data: KeyFile = serde_json::from_str(&content)?;

    if key_data.key_type != KEY_TYPE {
        anyhow::bail!("unsupported key type '{}'", key_data.key_type);
    }

    let private_bytes = base64::engine::general_purpose::STANDARD.decode(&key_data.private_key)?;
    let identity = IdentityKeyPair::from_bytes(&private_bytes)?;

    let public_bytes = base64::engine::general_purpose::STANDARD.decode(&key_data.public_key)?;
    if public_bytes != identity.public_key().to_bytes() {
        anyhow::bail!("public key in {} does not match its private key", path.display());
    }

    Ok(identity)
}

/// Saves an identity key to a JSON file.
async fn save_key(identity: &IdentityKeyPair, path: &Path) -> anyhow::Result<()> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }

    let key_data = KeyFile {
        version: "1.0".to_string(),
        key_type: KEY_TYPE.to_string(),
        public_key: base64::engine::general_purpose::STANDARD.encode(identity.public_key().to_bytes()),
        private_key: base64::engine::general_purpose::STANDARD.encode(identity.secret_bytes().as_slice()),
        created_at: unix_timestamp(),
    };

    let content = serde_json::to_string_pretty(&key_data)?;
    tokio::fs::write(path, content).await?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let mut perms = tokio::fs::metadata(path).await?.permissions();
        perms.set_mode(0o600);
        tokio::fs::set_permissions(path, perms).await?;
    }

    Ok(())
}

/// Returns the current Unix time as `<secs>Z`.
fn unix_timestamp() -> String {
    use std::time::{SystemTime, UNIX_EPOCH};

    let duration = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default();

    format!("{}Z", duration.as_secs())
}

const KEY_TYPE: &str = "ed25519";

/// Identity key file format.
#[derive(serde::Serialize, serde::Deserialize)]
struct KeyFile {
    version: String,
    key_type: String,
    public_key: String,
    private_key: String,
    created_at: String,
}

// ============================================
// Tests
// ============================================
