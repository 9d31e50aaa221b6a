// ============================================
// File: crates/peerlink-core/src/handshake/propose.rs
// ============================================
//! # Proposal Steps
//!
//! ## Main Functionality
//! - `create_proposal`: Build and encode our `Propose`
//! - `identify`: Parse the remote `Propose` and derive its identity
//! - `select_protocols`: Compute the order and pick algorithms
//!
//! ## Order
//! ```text
//! oh1   = SHA-256(remote pubkey ‖ local nonce)
//! oh2   = SHA-256(local pubkey ‖ remote nonce)
//! order = compare(oh1, oh2)     (Equal ⇒ we dialed ourselves)
//! ```
//!
//! ## Last Modified
//! v0.1.0 - Initial proposal steps

use std::cmp::Ordering;

use bytes::Bytes;
use sha2::{Digest, Sha256};
use tracing::debug;

use super::state::{HandshakeState, Phase, SelectedProtocols};
use crate::crypto::keys::IdentityPublicKey;
use crate::crypto::support::{select_best, to_csv};
use crate::crypto::NONCE_SIZE;
use crate::error::{CoreError, Result};
use crate::protocol::codec::{decode_message, encode_message};
use crate::protocol::messages::Propose;

/// Builds our proposal and returns its encoding.
///
/// # Errors
/// `InvalidState` outside `Init` or with an empty capability list.
pub fn create_proposal(state: &mut HandshakeState) -> Result<Bytes> {
    state.expect(Phase::Init, "create_proposal")?;
    state.capabilities.validate()?;

    let propose = Propose {
        rand: state.local.nonce.to_vec(),
        pubkey: state.local.marshalled_key.clone(),
        exchanges: to_csv(&state.capabilities.exchanges),
        ciphers: to_csv(&state.capabilities.ciphers),
        hashes: to_csv(&state.capabilities.hashes),
    };
    let encoded = encode_message(&propose);

    state.proposal.out = Some(propose);
    state.proposal.out_encoded = encoded.clone();
    state.advance(Phase::ProposeSent);
    Ok(encoded)
}

/// Parses the remote proposal and derives the remote identity.
///
/// # Errors
/// - `MalformedMessage` on undecodable input or a bad nonce
/// - `UnsupportedKeyType` / `InvalidKey` for an unusable public key
/// - `IdentityMismatch` if a specific peer was expected and someone else answered
pub fn identify(state: &mut HandshakeState, encoded: Bytes) -> Result<()> {
    state.expect(Phase::ProposeSent, "identify")?;

    let propose: Propose = decode_message(&encoded)?;
    if propose.rand.len() != NONCE_SIZE {
        return Err(CoreError::malformed(format!(
            "proposal nonce must be {NONCE_SIZE} bytes, got {}",
            propose.rand.len()
        )));
    }

    let key = IdentityPublicKey::unmarshal(&propose.pubkey)?;
    let peer_id = key.peer_id();
    if let Some(expected) = state.remote.expected {
        if expected != peer_id {
            return Err(CoreError::IdentityMismatch {
                expected,
                actual: peer_id,
            });
        }
    }

    debug!(remote = %peer_id.short(), "Remote identified");

    state.remote.peer_id = Some(peer_id);
    state.remote.key = Some(key);
    state.remote.marshalled_key = propose.pubkey.clone();
    state.remote.nonce = propose.rand.clone();
    state.proposal.inbound = Some(propose);
    state.proposal.in_encoded = encoded;
    state.advance(Phase::Identified);
    Ok(())
}

/// Computes the handshake order of this side.
#[must_use]
pub fn compute_order(
    local_key: &[u8],
    local_nonce: &[u8],
    remote_key: &[u8],
    remote_nonce: &[u8],
) -> Ordering {
    let oh1 = Sha256::new()
        .chain_update(remote_key)
        .chain_update(local_nonce)
        .finalize();
    let oh2 = Sha256::new()
        .chain_update(local_key)
        .chain_update(remote_nonce)
        .finalize();
    oh1.as_slice().cmp(oh2.as_slice())
}

/// Computes the order and picks a curve, a cipher and a hash.
///
/// # Errors
/// - `SelfDial` when the remote key is our own key, or both proposals hash
///   to the same order
/// - `NoCommonAlgorithms` when any list has no overlap
pub fn select_protocols(state: &mut HandshakeState) -> Result<SelectedProtocols> {
    state.expect(Phase::Identified, "select_protocols")?;
    let remote = state
        .proposal
        .inbound
        .as_ref()
        .ok_or_else(|| CoreError::invalid_state("select_protocols", "remote proposal"))?;

    // Nonces differ per session, so a shared keypair never yields an equal order.
    if state.remote.marshalled_key == state.local.marshalled_key {
        return Err(CoreError::SelfDial);
    }

    let order = compute_order(
        &state.local.marshalled_key,
        &state.local.nonce,
        &state.remote.marshalled_key,
        &state.remote.nonce,
    );
    if order == Ordering::Equal {
        return Err(CoreError::SelfDial);
    }

    let selected = SelectedProtocols {
        curve: select_best(order, &state.capabilities.exchanges, &remote.exchanges)?,
        cipher: select_best(order, &state.capabilities.ciphers, &remote.ciphers)?,
        hash: select_best(order, &state.capabilities.hashes, &remote.hashes)?,
        order,
    };

    debug!(
        curve = %selected.curve,
        cipher = %selected.cipher,
        hash = %selected.hash,
        ?order,
        "Protocols selected"
    );

    state.selected = Some(selected);
    state.advance(Phase::ProtocolsSelected);
    Ok(selected)
}

// ============================================
// Tests
// ============================================

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::crypto::keys::IdentityKeyPair;
    use crate::crypto::support::{Capabilities, CipherKind, Curve};

    fn state(caps: Capabilities) -> HandshakeState {
        HandshakeState::new(Arc::new(IdentityKeyPair::generate()), caps, None)
    }

    #[test]
    fn test_order_is_antisymmetric() {
        let (ka, na, kb, nb) = (b"key a", b"nonce a", b"key b", b"nonce b");
        let ab = compute_order(ka, na, kb, nb);
        let ba = compute_order(kb, nb, ka, na);
        assert_ne!(ab, Ordering::Equal);
        assert_eq!(ab, ba.reverse());
    }

    #[test]
    fn test_order_equal_for_same_inputs() {
        assert_eq!(compute_order(b"k", b"n", b"k", b"n"), Ordering::Equal);
    }

    #[test]
    fn test_proposal_exchange_selects_same_protocols() {
        let mut a = state(Capabilities {
            exchanges: vec![Curve::P384, Curve::P256],
            ..Capabilities::default()
        });
        let mut b = state(Capabilities {
            ciphers: vec![CipherKind::Aes128, CipherKind::Aes256],
            ..Capabilities::default()
        });

        let pa = create_proposal(&mut a).unwrap();
        let pb = create_proposal(&mut b).unwrap();
        identify(&mut a, pb).unwrap();
        identify(&mut b, pa).unwrap();

        assert_eq!(a.remote_peer(), Some(b.local_peer()));
        assert_eq!(b.remote_peer(), Some(a.local_peer()));

        let sa = select_protocols(&mut a).unwrap();
        let sb = select_protocols(&mut b).unwrap();
        assert_eq!(sa.curve, sb.curve);
        assert_eq!(sa.cipher, sb.cipher);
        assert_eq!(sa.hash, sb.hash);
        assert_eq!(sa.order, sb.order.reverse());
        assert_eq!(a.phase(), Phase::ProtocolsSelected);
    }

    #[test]
    fn test_no_common_cipher() {
        let mut a = state(Capabilities {
            ciphers: vec![CipherKind::Aes128],
            ..Capabilities::default()
        });
        let mut b = state(Capabilities {
            ciphers: vec![CipherKind::Aes256],
            ..Capabilities::default()
        });

        let pa = create_proposal(&mut a).unwrap();
        let pb = create_proposal(&mut b).unwrap();
        identify(&mut a, pb).unwrap();
        identify(&mut b, pa).unwrap();

        let err = select_protocols(&mut a).unwrap_err();
        assert!(err.to_string().contains("no algorithms in common"));
    }

    #[test]
    fn test_identify_rejects_unexpected_peer() {
        let identity = Arc::new(IdentityKeyPair::generate());
        let wrong = IdentityKeyPair::generate().peer_id();
        let mut a = HandshakeState::new(identity, Capabilities::default(), Some(wrong));
        let mut b = state(Capabilities::default());

        create_proposal(&mut a).unwrap();
        let pb = create_proposal(&mut b).unwrap();
        assert!(matches!(
            identify(&mut a, pb),
            Err(CoreError::IdentityMismatch { .. })
        ));
    }

    #[test]
    fn test_identify_rejects_short_nonce() {
        let mut a = state(Capabilities::default());
        create_proposal(&mut a).unwrap();

        let bogus = encode_message(&Propose {
            rand: vec![1, 2, 3],
            pubkey: IdentityKeyPair::generate().public_key().marshal(),
            ..Propose::default()
        });
        assert!(matches!(
            identify(&mut a, bogus),
            Err(CoreError::MalformedMessage { .. })
        ));
    }

    #[test]
    fn test_steps_require_their_phase() {
        let mut a = state(Capabilities::default());
        assert!(matches!(
            select_protocols(&mut a),
            Err(CoreError::InvalidState { .. })
        ));
        create_proposal(&mut a).unwrap();
        assert!(create_proposal(&mut a).is_err());
    }

    #[test]
    fn test_self_dial_detected() {
        let identity = Arc::new(IdentityKeyPair::generate());
        let mut a = HandshakeState::new(identity.clone(), Capabilities::default(), None);
        let encoded = create_proposal(&mut a).unwrap();

        // Our own proposal reflected straight back.
        identify(&mut a, encoded).unwrap();
        assert!(matches!(select_protocols(&mut a), Err(CoreError::SelfDial)));
    }

    #[test]
    fn test_shared_identity_detected_despite_fresh_nonces() {
        let identity = Arc::new(IdentityKeyPair::generate());
        let mut a = HandshakeState::new(identity.clone(), Capabilities::default(), None);
        let mut b = HandshakeState::new(identity, Capabilities::default(), None);

        let pa = create_proposal(&mut a).unwrap();
        let pb = create_proposal(&mut b).unwrap();
        identify(&mut a, pb).unwrap();
        identify(&mut b, pa).unwrap();
        assert_ne!(a.local.nonce, b.local.nonce);

        assert!(matches!(select_protocols(&mut a), Err(CoreError::SelfDial)));
        assert!(matches!(select_protocols(&mut b), Err(CoreError::SelfDial)));
        assert!(a.selected.is_none());
        assert!(b.selected.is_none());
    }
}
