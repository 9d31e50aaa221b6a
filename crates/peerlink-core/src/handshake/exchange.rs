// ============================================
// File: crates/peerlink-core/src/handshake/exchange.rs
// ============================================
//! # Exchange Steps
//!
//! ## Main Functionality
//! - `create_exchange`: Generate the ephemeral key and sign it
//! - `verify`: Check the remote signature and record its ephemeral key
//! - `generate_keys`: Agree, stretch and build the directional ciphers
//! - `seal_remote_nonce` / `verify_nonce`: The encrypted nonce echo
//!
//! ## Signed Corpus
//! ```text
//! ours:   proposal_out ‖ proposal_in ‖ our epubkey
//! theirs: proposal_in  ‖ proposal_out ‖ their epubkey
//! ```
//! Binding both proposals stops a man in the middle from downgrading the
//! negotiated algorithms.
//!
//! ## Last Modified
//! v0.1.0 - Initial exchange steps

use bytes::Bytes;
use tracing::{debug, warn};

use super::state::{Crypters, HandshakeState, KeyRole, Phase, SelectedProtocols};
use crate::crypto::kdf::stretch_keys;
use crate::crypto::keys::EphemeralKeyPair;
use crate::crypto::transport::DirectionalCipher;
use crate::error::{CoreError, Result};
use crate::protocol::codec::{decode_message, encode_message};
use crate::protocol::messages::Exchange;

/// Generates our ephemeral key, signs it and returns the encoded exchange.
///
/// # Errors
/// `InvalidState` outside `ProtocolsSelected`.
pub fn create_exchange(state: &mut HandshakeState) -> Result<Bytes> {
    state.expect(Phase::ProtocolsSelected, "create_exchange")?;
    let selected = state
        .selected
        .ok_or_else(|| CoreError::invalid_state("create_exchange", "selected protocols"))?;

    let ephemeral = EphemeralKeyPair::generate(selected.curve);
    let epubkey = ephemeral.public_key_bytes().to_vec();

    let mut corpus = Vec::with_capacity(
        state.proposal.out_encoded.len() + state.proposal.in_encoded.len() + epubkey.len(),
    );
    corpus.extend_from_slice(&state.proposal.out_encoded);
    corpus.extend_from_slice(&state.proposal.in_encoded);
    corpus.extend_from_slice(&epubkey);

    let exchange = Exchange {
        signature: state.local.identity.sign(&corpus).to_vec(),
        epubkey: epubkey.clone(),
    };
    let encoded = encode_message(&exchange);

    state.ephemeral.local = Some(ephemeral);
    state.ephemeral.local_public = epubkey;
    state.exchange.out = Some(exchange);
    state.advance(Phase::ExchangeSent);
    Ok(encoded)
}

/// Verifies the remote exchange signature and records its ephemeral key.
///
/// # Errors
/// - `MalformedMessage` on undecodable input
/// - `SignatureVerification` if the signature does not match
pub fn verify(state: &mut HandshakeState, encoded: &[u8]) -> Result<()> {
    state.expect(Phase::ExchangeSent, "verify")?;
    let remote_key = state
        .remote
        .key
        .ok_or_else(|| CoreError::invalid_state("verify", "identified remote"))?;

    let exchange: Exchange = decode_message(encoded)?;
    if exchange.epubkey.is_empty() {
        return Err(CoreError::malformed("exchange without ephemeral key"));
    }

    let mut corpus = Vec::with_capacity(
        state.proposal.in_encoded.len() + state.proposal.out_encoded.len() + exchange.epubkey.len(),
    );
    corpus.extend_from_slice(&state.proposal.in_encoded);
    corpus.extend_from_slice(&state.proposal.out_encoded);
    corpus.extend_from_slice(&exchange.epubkey);

    if let Err(e) = remote_key.verify(&corpus, &exchange.signature) {
        warn!(
            remote = ?state.remote.peer_id,
            "Exchange signature verification failed"
        );
        return Err(e);
    }

    state.ephemeral.remote = exchange.epubkey.clone();
    state.exchange.inbound = Some(exchange);
    state.advance(Phase::ExchangeVerified);
    Ok(())
}

/// Derives the shared secret, stretches it and builds both ciphers.
///
/// Secret material is dropped before returning, whatever the outcome.
///
/// # Errors
/// - `KeyExchange` if the remote ephemeral key is not on the curve
/// - `KeyDerivation` if the stretched keys do not fit the cipher
pub fn generate_keys(state: &mut HandshakeState) -> Result<()> {
    state.expect(Phase::ExchangeVerified, "generate_keys")?;
    let selected = state
        .selected
        .ok_or_else(|| CoreError::invalid_state("generate_keys", "selected protocols"))?;
    let ephemeral = state
        .ephemeral
        .local
        .take()
        .ok_or_else(|| CoreError::invalid_state("generate_keys", "local ephemeral key"))?;

    let result = derive_crypters(state, ephemeral, selected);
    state.purge_secrets();
    let (role, crypters) = result?;

    debug!(?role, "Session keys derived");

    state.role = Some(role);
    state.crypters = Some(crypters);
    state.advance(Phase::KeysDerived);
    Ok(())
}

fn derive_crypters(
    state: &mut HandshakeState,
    ephemeral: EphemeralKeyPair,
    selected: SelectedProtocols,
) -> Result<(KeyRole, Crypters)> {
    let secret = state
        .shared_secret
        .insert(ephemeral.agree(&state.ephemeral.remote)?);
    let keys = stretch_keys(selected.cipher, selected.hash, secret.as_slice())?;

    let role = KeyRole::from_order(selected.order);
    let (out_keys, in_keys) = match role {
        KeyRole::K1 => (&keys.k1, &keys.k2),
        KeyRole::K2 => (&keys.k2, &keys.k1),
    };
    let crypters = Crypters {
        local: DirectionalCipher::new(selected.cipher, selected.hash, out_keys)?,
        remote: DirectionalCipher::new(selected.cipher, selected.hash, in_keys)?,
    };
    Ok((role, crypters))
}

/// Encrypts the remote nonce for the echo.
///
/// # Errors
/// `InvalidState` outside `KeysDerived`.
pub fn seal_remote_nonce(state: &mut HandshakeState) -> Result<Vec<u8>> {
    state.expect(Phase::KeysDerived, "seal_remote_nonce")?;
    let crypters = state
        .crypters
        .as_mut()
        .ok_or_else(|| CoreError::invalid_state("seal_remote_nonce", "derived ciphers"))?;
    Ok(crypters.local.seal(&state.remote.nonce))
}

/// Decrypts the echoed nonce and checks it is ours.
///
/// # Errors
/// - `MacMismatch` if the echo frame fails authentication
/// - `NonceMismatch` if the remote echoed a different nonce
pub fn verify_nonce(state: &mut HandshakeState, sealed: &[u8]) -> Result<()> {
    state.expect(Phase::KeysDerived, "verify_nonce")?;
    let crypters = state
        .crypters
        .as_mut()
        .ok_or_else(|| CoreError::invalid_state("verify_nonce", "derived ciphers"))?;

    let echoed = crypters.remote.open(sealed)?;
    if echoed.as_slice() != state.local.nonce.as_slice() {
        return Err(CoreError::NonceMismatch);
    }

    state.advance(Phase::Established);
    Ok(())
}

// ============================================
// Tests
// ============================================

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::crypto::keys::IdentityKeyPair;
    use crate::crypto::support::Capabilities;
    use crate::handshake::propose::{create_proposal, identify, select_protocols};

    fn identified_pair() -> (HandshakeState, HandshakeState) {
        let mut a = HandshakeState::new(
            Arc::new(IdentityKeyPair::generate()),
            Capabilities::default(),
            None,
        );
        let mut b = HandshakeState::new(
            Arc::new(IdentityKeyPair::generate()),
            Capabilities::default(),
            None,
        );
        let pa = create_proposal(&mut a).unwrap();
        let pb = create_proposal(&mut b).unwrap();
        identify(&mut a, pb).unwrap();
        identify(&mut b, pa).unwrap();
        select_protocols(&mut a).unwrap();
        select_protocols(&mut b).unwrap();
        (a, b)
    }

    #[test]
    fn test_full_exchange_in_memory() {
        let (mut a, mut b) = identified_pair();
        let ea = create_exchange(&mut a).unwrap();
        let eb = create_exchange(&mut b).unwrap();
        verify(&mut a, &eb).unwrap();
        verify(&mut b, &ea).unwrap();
        generate_keys(&mut a).unwrap();
        generate_keys(&mut b).unwrap();

        assert!(!a.holds_secrets());
        assert!(!b.holds_secrets());
        assert_ne!(a.key_role(), b.key_role());

        let na = seal_remote_nonce(&mut a).unwrap();
        let nb = seal_remote_nonce(&mut b).unwrap();
        verify_nonce(&mut a, &nb).unwrap();
        verify_nonce(&mut b, &na).unwrap();
        assert_eq!(a.phase(), Phase::Established);

        let mut sa = a.into_established().unwrap();
        let mut sb = b.into_established().unwrap();
        let sealed = sa.outbound.seal(b"ping");
        assert_eq!(sb.inbound.open(&sealed).unwrap(), b"ping");
        let sealed = sb.outbound.seal(b"pong");
        assert_eq!(sa.inbound.open(&sealed).unwrap(), b"pong");
    }

    #[test]
    fn test_tampered_signature_rejected() {
        let (mut a, mut b) = identified_pair();
        create_exchange(&mut a).unwrap();
        let eb = create_exchange(&mut b).unwrap();

        let mut exchange: Exchange = decode_message(&eb).unwrap();
        exchange.signature[0] ^= 0xff;
        let tampered = encode_message(&exchange);

        assert!(matches!(
            verify(&mut a, &tampered),
            Err(CoreError::SignatureVerification)
        ));
    }

    #[test]
    fn test_swapped_ephemeral_key_rejected() {
        let (mut a, mut b) = identified_pair();
        create_exchange(&mut a).unwrap();
        let eb = create_exchange(&mut b).unwrap();

        let mut exchange: Exchange = decode_message(&eb).unwrap();
        let curve = a.selected().unwrap().curve;
        exchange.epubkey = EphemeralKeyPair::generate(curve).public_key_bytes().to_vec();

        assert!(verify(&mut a, &encode_message(&exchange)).is_err());
    }

    #[test]
    fn test_wrong_nonce_echo_rejected() {
        let (mut a, mut b) = identified_pair();
        let ea = create_exchange(&mut a).unwrap();
        let eb = create_exchange(&mut b).unwrap();
        verify(&mut a, &eb).unwrap();
        verify(&mut b, &ea).unwrap();
        generate_keys(&mut a).unwrap();
        generate_keys(&mut b).unwrap();

        // B echoes garbage instead of A's nonce, using the right keys.
        let bogus = b.crypters.as_mut().unwrap().local.seal(&[0u8; 16]);
        assert!(matches!(
            verify_nonce(&mut a, &bogus),
            Err(CoreError::NonceMismatch)
        ));
    }

    #[test]
    fn test_generate_keys_requires_verified_exchange() {
        let (mut a, _) = identified_pair();
        create_exchange(&mut a).unwrap();
        assert!(matches!(
            generate_keys(&mut a),
            Err(CoreError::InvalidState { .. })
        ));
    }
}
