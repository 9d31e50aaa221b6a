// ============================================
// File: crates/peerlink-core/src/handshake/state.rs
// ============================================
//! # Handshake State
//!
//! ## Creation Reason
//! Holds everything one side learns while establishing a secure channel:
//! both proposals, both exchanges, both ephemeral keys, both nonces and
//! both identities, together with the phase the handshake has reached.
//!
//! ## State Machine
//! ```text
//! Init ─► ProposeSent ─► Identified ─► ProtocolsSelected ─► ExchangeSent
//!                                                              │
//!   Established ◄─ KeysDerived ◄─ ExchangeVerified ◄───────────┘
//!
//! any step ──error──► Failed (terminal)
//! ```
//!
//! ## ⚠️ Important Note for Next Developer
//! - Each step checks the phase it expects before touching anything
//! - The shared secret and ephemeral private key are dropped once the
//!   directional ciphers exist; the nonces survive for the echo step
//!
//! ## Last Modified
//! v0.1.0 - Initial handshake state

use std::cmp::Ordering;
use std::fmt;
use std::sync::Arc;

use bytes::Bytes;
use zeroize::Zeroizing;

use peerlink_common::types::PeerId;

use crate::crypto::keys::{EphemeralKeyPair, IdentityKeyPair, IdentityPublicKey};
use crate::crypto::support::{Capabilities, CipherKind, Curve, HashKind};
use crate::crypto::transport::DirectionalCipher;
use crate::crypto::{random_nonce, NONCE_SIZE};
use crate::error::{CoreError, Result};
use crate::protocol::messages::{Exchange, Propose};

// ============================================
// Phase
// ============================================

/// Progress of a handshake.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Phase {
    /// Nothing sent yet.
    Init,
    /// Our proposal has been produced.
    ProposeSent,
    /// The remote proposal was parsed and its identity derived.
    Identified,
    /// Order computed and algorithms chosen.
    ProtocolsSelected,
    /// Our signed exchange has been produced.
    ExchangeSent,
    /// The remote exchange signature checked out.
    ExchangeVerified,
    /// Directional ciphers derived.
    KeysDerived,
    /// The nonce echo succeeded.
    Established,
    /// A step failed; the handshake cannot continue.
    Failed,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

// ============================================
// Selected Protocols
// ============================================

/// Outcome of capability negotiation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SelectedProtocols {
    /// Curve for the ephemeral key agreement.
    pub curve: Curve,
    /// Cipher for both directions.
    pub cipher: CipherKind,
    /// Hash for the stretcher and the MACs.
    pub hash: HashKind,
    /// Order computed by this side. Never `Equal`.
    pub order: Ordering,
}

/// Which stretched bundle this side sends with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyRole {
    /// Sends with k1, receives with k2.
    K1,
    /// Sends with k2, receives with k1.
    K2,
}

impl KeyRole {
    /// Role implied by the handshake order.
    #[must_use]
    pub const fn from_order(order: Ordering) -> Self {
        match order {
            Ordering::Greater => Self::K1,
            Ordering::Less | Ordering::Equal => Self::K2,
        }
    }
}

// ============================================
// Record Groups
// ============================================

/// Our side of the handshake.
pub(crate) struct LocalParty {
    pub(crate) identity: Arc<IdentityKeyPair>,
    pub(crate) peer_id: PeerId,
    pub(crate) marshalled_key: Vec<u8>,
    pub(crate) nonce: [u8; NONCE_SIZE],
}

/// What we learned about the remote.
#[derive(Default)]
pub(crate) struct RemoteParty {
    pub(crate) expected: Option<PeerId>,
    pub(crate) peer_id: Option<PeerId>,
    pub(crate) key: Option<IdentityPublicKey>,
    pub(crate) marshalled_key: Vec<u8>,
    pub(crate) nonce: Vec<u8>,
}

#[derive(Default)]
pub(crate) struct Proposals {
    pub(crate) out: Option<Propose>,
    pub(crate) out_encoded: Bytes,
    pub(crate) inbound: Option<Propose>,
    pub(crate) in_encoded: Bytes,
}

#[derive(Default)]
pub(crate) struct Exchanges {
    pub(crate) out: Option<Exchange>,
    pub(crate) inbound: Option<Exchange>,
}

#[derive(Default)]
pub(crate) struct EphemeralKeys {
    pub(crate) local: Option<EphemeralKeyPair>,
    pub(crate) local_public: Vec<u8>,
    pub(crate) remote: Vec<u8>,
}

/// Outbound (`local`) and inbound (`remote`) ciphers.
pub(crate) struct Crypters {
    pub(crate) local: DirectionalCipher,
    pub(crate) remote: DirectionalCipher,
}

// ============================================
// HandshakeState
// ============================================

/// State of one side of a secure channel handshake.
///
/// Steps live in [`super::propose`] and [`super::exchange`]; each takes
/// `&mut HandshakeState` and advances the phase on success.
pub struct HandshakeState {
    pub(crate) phase: Phase,
    pub(crate) capabilities: Capabilities,
    pub(crate) local: LocalParty,
    pub(crate) remote: RemoteParty,
    pub(crate) proposal: Proposals,
    pub(crate) exchange: Exchanges,
    pub(crate) ephemeral: EphemeralKeys,
    pub(crate) shared_secret: Option<Zeroizing<Vec<u8>>>,
    pub(crate) selected: Option<SelectedProtocols>,
    pub(crate) role: Option<KeyRole>,
    pub(crate) crypters: Option<Crypters>,
}

impl HandshakeState {
    /// Creates a fresh handshake for `identity`.
    ///
    /// `expected_remote`, when set, makes the handshake fail unless the
    /// remote proves that identity.
    #[must_use]
    pub fn new(
        identity: Arc<IdentityKeyPair>,
        capabilities: Capabilities,
        expected_remote: Option<PeerId>,
    ) -> Self {
        let public = identity.public_key();
        let local = LocalParty {
            peer_id: public.peer_id(),
            marshalled_key: public.marshal(),
            nonce: random_nonce(),
            identity,
        };

        Self {
            phase: Phase::Init,
            capabilities,
            local,
            remote: RemoteParty {
                expected: expected_remote,
                ..RemoteParty::default()
            },
            proposal: Proposals::default(),
            exchange: Exchanges::default(),
            ephemeral: EphemeralKeys::default(),
            shared_secret: None,
            selected: None,
            role: None,
            crypters: None,
        }
    }

    // ========================================
    // Accessors
    // ========================================

    /// Current phase.
    #[must_use]
    pub const fn phase(&self) -> Phase {
        self.phase
    }

    /// Our peer id.
    #[must_use]
    pub const fn local_peer(&self) -> PeerId {
        self.local.peer_id
    }

    /// Remote peer id, once identified.
    #[must_use]
    pub const fn remote_peer(&self) -> Option<PeerId> {
        self.remote.peer_id
    }

    /// Remote public key, once identified.
    #[must_use]
    pub const fn remote_key(&self) -> Option<&IdentityPublicKey> {
        self.remote.key.as_ref()
    }

    /// Negotiated algorithms, once selected.
    #[must_use]
    pub const fn selected(&self) -> Option<&SelectedProtocols> {
        self.selected.as_ref()
    }

    /// Which bundle this side sends with, once keys are derived.
    #[must_use]
    pub const fn key_role(&self) -> Option<KeyRole> {
        self.role
    }

    /// Our nonce.
    #[must_use]
    pub const fn local_nonce(&self) -> &[u8; NONCE_SIZE] {
        &self.local.nonce
    }

    /// Returns `true` while secret material from the key agreement is held.
    #[must_use]
    pub const fn holds_secrets(&self) -> bool {
        self.shared_secret.is_some() || self.ephemeral.local.is_some()
    }

    // ========================================
    // Transitions
    // ========================================

    pub(crate) fn expect(&self, phase: Phase, operation: &str) -> Result<()> {
        if self.phase == phase {
            Ok(())
        } else {
            Err(CoreError::invalid_state(
                format!("{operation} (in {})", self.phase),
                phase.to_string(),
            ))
        }
    }

    pub(crate) fn advance(&mut self, phase: Phase) {
        tracing::trace!(from = %self.phase, to = %phase, "Handshake phase change");
        self.phase = phase;
    }

    /// Marks the handshake as failed and drops secret material.
    pub fn fail(&mut self) {
        self.purge_secrets();
        self.crypters = None;
        self.phase = Phase::Failed;
    }

    pub(crate) fn purge_secrets(&mut self) {
        self.shared_secret = None;
        self.ephemeral.local = None;
    }

    /// Hands out the directional ciphers of an established handshake.
    ///
    /// # Errors
    /// `InvalidState` unless the phase is `Established`.
    pub fn into_established(mut self) -> Result<EstablishedSession> {
        self.expect(Phase::Established, "into_established")?;
        let crypters = self
            .crypters
            .take()
            .ok_or_else(|| CoreError::invalid_state("into_established", "derived ciphers"))?;
        let remote_peer = self
            .remote
            .peer_id
            .ok_or_else(|| CoreError::invalid_state("into_established", "identified remote"))?;
        let remote_key = self
            .remote
            .key
            .ok_or_else(|| CoreError::invalid_state("into_established", "identified remote"))?;
        let selected = self
            .selected
            .ok_or_else(|| CoreError::invalid_state("into_established", "selected protocols"))?;

        Ok(EstablishedSession {
            local_peer: self.local.peer_id,
            remote_peer,
            remote_key,
            selected,
            outbound: crypters.local,
            inbound: crypters.remote,
        })
    }
}

impl fmt::Debug for HandshakeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandshakeState")
            .field("phase", &self.phase)
            .field("local", &self.local.peer_id)
            .field("remote", &self.remote.peer_id)
            .field("selected", &self.selected)
            .finish_non_exhaustive()
    }
}

// ============================================
// EstablishedSession
// ============================================

/// Result of a completed handshake.
#[derive(Debug)]
pub struct EstablishedSession {
    /// Our peer id.
    pub local_peer: PeerId,
    /// Authenticated remote peer id.
    pub remote_peer: PeerId,
    /// Authenticated remote public key.
    pub remote_key: IdentityPublicKey,
    /// Negotiated algorithms.
    pub selected: SelectedProtocols,
    /// Cipher for frames we send.
    pub outbound: DirectionalCipher,
    /// Cipher for frames we receive.
    pub inbound: DirectionalCipher,
}
