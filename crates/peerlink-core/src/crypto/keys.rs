// ============================================
// File: crates/peerlink-core/src/crypto/keys.rs
// ============================================
//! # Cryptographic Key Types
//!
//! ## Creation Reason
//! Defines the long-term identity keys that authenticate a peer and the
//! per-handshake ephemeral keys that give each channel forward secrecy.
//!
//! ## Main Functionality
//! - `IdentityKeyPair`: Long-term Ed25519 signing keys
//! - `IdentityPublicKey`: Remote identity, parsed from its marshalled form
//! - `EphemeralKeyPair`: Per-handshake ECDH keys on P-256, P-384 or P-521
//!
//! ## Key Lifecycle
//! ```text
//! ┌────────────────────────────────────────────────────────────┐
//! │  IdentityKeyPair (Long-term)                               │
//! │  ├─ Marshalled into every Propose                          │
//! │  ├─ Signs the Exchange message                             │
//! │  └─ Hashes into the PeerId                                 │
//! │                                                            │
//! │  EphemeralKeyPair (Per-handshake)                          │
//! │  ├─ Generated after protocols are selected                 │
//! │  ├─ Consumed by `agree` (cannot be reused)                 │
//! │  └─ Shared secret zeroized once keys are stretched         │
//! └────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## ⚠️ Important Note for Next Developer
//! - Private keys must never be logged; `Debug` shows the public half only
//! - Marshalled keys must stay byte-identical: the PeerId depends on them
//!
//! ## Last Modified
//! v0.1.0 - Initial key type definitions

use std::fmt;

use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use p256::elliptic_curve::sec1::ToEncodedPoint;
use rand::rngs::OsRng;
use zeroize::{Zeroize, Zeroizing};

use peerlink_common::types::PeerId;

use super::support::Curve;
use super::{ED25519_PUBLIC_KEY_SIZE, ED25519_SIGNATURE_SIZE};
use crate::error::{CoreError, Result};
use crate::protocol::codec::{decode_message, encode_message};
use crate::protocol::messages::{KeyType, PublicKeyMessage};

// ============================================
// IdentityKeyPair (Ed25519)
// ============================================

/// Long-term Ed25519 identity key pair.
///
/// # Example
/// ```
/// use peerlink_core::crypto::IdentityKeyPair;
///
/// let identity = IdentityKeyPair::generate();
/// let signature = identity.sign(b"hello");
/// assert!(identity.public_key().verify(b"hello", &signature).is_ok());
/// ```
#[derive(Clone)]
pub struct IdentityKeyPair {
    signing_key: SigningKey,
}

impl IdentityKeyPair {
    /// Generates a new random identity key pair.
    #[must_use]
    pub fn generate() -> Self {
        Self {
            signing_key: SigningKey::generate(&mut OsRng),
        }
    }

    /// Creates an identity from a 32-byte Ed25519 seed.
    ///
    /// # Errors
    /// Returns `InvalidKey` if the length is wrong.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() != 32 {
            return Err(CoreError::invalid_key(format!(
                "Ed25519 seed must be 32 bytes, got {}",
                bytes.len()
            )));
        }
        let mut seed = [0u8; 32];
        seed.copy_from_slice(bytes);
        let signing_key = SigningKey::from_bytes(&seed);
        seed.zeroize();
        Ok(Self { signing_key })
    }

    /// Returns the 32-byte seed. Handle with care.
    #[must_use]
    pub fn secret_bytes(&self) -> Zeroizing<[u8; 32]> {
        Zeroizing::new(self.signing_key.to_bytes())
    }

    /// Returns the public half.
    #[must_use]
    pub fn public_key(&self) -> IdentityPublicKey {
        IdentityPublicKey(self.signing_key.verifying_key())
    }

    /// Returns the peer id derived from the marshalled public key.
    #[must_use]
    pub fn peer_id(&self) -> PeerId {
        self.public_key().peer_id()
    }

    /// Signs a message.
    #[must_use]
    pub fn sign(&self, message: &[u8]) -> [u8; ED25519_SIGNATURE_SIZE] {
        self.signing_key.sign(message).to_bytes()
    }
}

impl fmt::Debug for IdentityKeyPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IdentityKeyPair")
            .field("peer_id", &self.peer_id())
            .finish_non_exhaustive()
    }
}

// ============================================
// IdentityPublicKey
// ============================================

/// Long-term public key of a peer.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct IdentityPublicKey(VerifyingKey);

impl IdentityPublicKey {
    /// Parses a raw 32-byte Ed25519 public key.
    ///
    /// # Errors
    /// Returns `InvalidKey` if the bytes are not a valid point.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let raw: [u8; ED25519_PUBLIC_KEY_SIZE] = bytes.try_into().map_err(|_| {
            CoreError::invalid_key(format!(
                "Ed25519 public key must be {ED25519_PUBLIC_KEY_SIZE} bytes, got {}",
                bytes.len()
            ))
        })?;
        VerifyingKey::from_bytes(&raw)
            .map(Self)
            .map_err(|_| CoreError::invalid_key("Ed25519 public key is not a valid point"))
    }

    /// Parses a marshalled public key as carried in a `Propose`.
    ///
    /// # Errors
    /// - `MalformedMessage` if the envelope is not decodable
    /// - `UnsupportedKeyType` for any key type other than Ed25519
    /// - `InvalidKey` if the key bytes are invalid
    pub fn unmarshal(marshalled: &[u8]) -> Result<Self> {
        let msg: PublicKeyMessage = decode_message(marshalled)?;
        if msg.key_type != KeyType::Ed25519 {
            return Err(CoreError::UnsupportedKeyType(msg.key_type.as_wire()));
        }
        Self::from_bytes(&msg.data)
    }

    /// Returns the marshalled envelope of this key.
    #[must_use]
    pub fn marshal(&self) -> Vec<u8> {
        encode_message(&PublicKeyMessage {
            key_type: KeyType::Ed25519,
            data: self.0.to_bytes().to_vec(),
        })
        .to_vec()
    }

    /// Returns the raw key bytes.
    #[must_use]
    pub fn to_bytes(&self) -> [u8; ED25519_PUBLIC_KEY_SIZE] {
        self.0.to_bytes()
    }

    /// Returns the peer id of this key.
    #[must_use]
    pub fn peer_id(&self) -> PeerId {
        PeerId::from_public_key(&self.marshal())
    }

    /// Verifies a signature made by the matching private key.
    ///
    /// # Errors
    /// Returns `SignatureVerification` on a malformed or invalid signature.
    pub fn verify(&self, message: &[u8], signature: &[u8]) -> Result<()> {
        let signature =
            Signature::from_slice(signature).map_err(|_| CoreError::SignatureVerification)?;
        self.0
            .verify(message, &signature)
            .map_err(|_| CoreError::SignatureVerification)
    }
}

impl fmt::Debug for IdentityPublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "IdentityPublicKey({})", hex::encode(&self.0.as_bytes()[..8]))
    }
}

// ============================================
// EphemeralKeyPair (ECDH)
// ============================================

enum EphemeralSecret {
    P256(p256::ecdh::EphemeralSecret),
    P384(p384::ecdh::EphemeralSecret),
    P521(p521::ecdh::EphemeralSecret),
}

/// Ephemeral ECDH key pair on the negotiated curve.
///
/// # Security
/// - Single-use: `agree` consumes the key pair
/// - The returned shared secret zeroizes on drop
pub struct EphemeralKeyPair {
    curve: Curve,
    secret: EphemeralSecret,
    public: Vec<u8>,
}

impl EphemeralKeyPair {
    /// Generates a fresh key pair on `curve`.
    #[must_use]
    pub fn generate(curve: Curve) -> Self {
        let (secret, public) = match curve {
            Curve::P256 => {
                let secret = p256::ecdh::EphemeralSecret::random(&mut OsRng);
                let public = secret.public_key().to_encoded_point(false).as_bytes().to_vec();
                (EphemeralSecret::P256(secret), public)
            }
            Curve::P384 => {
                let secret = p384::ecdh::EphemeralSecret::random(&mut OsRng);
                let public = secret.public_key().to_encoded_point(false).as_bytes().to_vec();
                (EphemeralSecret::P384(secret), public)
            }
            Curve::P521 => {
                let secret = p521::ecdh::EphemeralSecret::random(&mut OsRng);
                let public = secret.public_key().to_encoded_point(false).as_bytes().to_vec();
                (EphemeralSecret::P521(secret), public)
            }
        };
        Self {
            curve,
            secret,
            public,
        }
    }

    /// Returns the curve of this key pair.
    #[must_use]
    pub const fn curve(&self) -> Curve {
        self.curve
    }

    /// Returns the uncompressed SEC1 public key.
    #[must_use]
    pub fn public_key_bytes(&self) -> &[u8] {
        &self.public
    }

    /// Computes the shared secret with a remote SEC1 public key.
    ///
    /// # Errors
    /// Returns `KeyExchange` if the remote key is not a valid point on
    /// this curve.
    pub fn agree(self, remote_public: &[u8]) -> Result<Zeroizing<Vec<u8>>> {
        let invalid = |_| CoreError::key_exchange(format!("invalid {} public key", self.curve));
        let shared = match &self.secret {
            EphemeralSecret::P256(secret) => {
                let remote = p256::PublicKey::from_sec1_bytes(remote_public).map_err(invalid)?;
                secret.diffie_hellman(&remote).raw_secret_bytes().to_vec()
            }
            EphemeralSecret::P384(secret) => {
                let remote = p384::PublicKey::from_sec1_bytes(remote_public).map_err(invalid)?;
                secret.diffie_hellman(&remote).raw_secret_bytes().to_vec()
            }
            EphemeralSecret::P521(secret) => {
                let remote = p521::PublicKey::from_sec1_bytes(remote_public).map_err(invalid)?;
                secret.diffie_hellman(&remote).raw_secret_bytes().to_vec()
            }
        };
        Ok(Zeroizing::new(shared))
    }
}

impl fmt::Debug for EphemeralKeyPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EphemeralKeyPair")
            .field("curve", &self.curve)
            .field("public", &hex::encode(&self.public[..self.public.len().min(8)]))
            .finish_non_exhaustive()
    }
}

// ============================================
// Tests
// ============================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identity_sign_verify() {
        let identity = IdentityKeyPair::generate();
        let signature = identity.sign(b"message");

        let public = identity.public_key();
        assert!(public.verify(b"message", &signature).is_ok());
        assert!(public.verify(b"other", &signature).is_err());
        assert!(public.verify(b"message", &signature[..10]).is_err());
    }

    #[test]
    fn test_identity_from_bytes_roundtrip() {
        let identity = IdentityKeyPair::generate();
        let restored = IdentityKeyPair::from_bytes(&identity.secret_bytes()[..]).unwrap();
        assert_eq!(identity.peer_id(), restored.peer_id());

        assert!(IdentityKeyPair::from_bytes(&[0u8; 31]).is_err());
    }

    #[test]
    fn test_marshal_roundtrip_and_peer_id() {
        let identity = IdentityKeyPair::generate();
        let marshalled = identity.public_key().marshal();

        assert_eq!(marshalled[0], 0x08);
        assert_eq!(marshalled[1], 0x01);
        assert_eq!(marshalled.len(), 4 + ED25519_PUBLIC_KEY_SIZE);

        let parsed = IdentityPublicKey::unmarshal(&marshalled).unwrap();
        assert_eq!(parsed, identity.public_key());
        assert_eq!(parsed.peer_id(), PeerId::from_public_key(&marshalled));
    }

    #[test]
    fn test_unmarshal_rejects_other_key_types() {
        let msg = encode_message(&PublicKeyMessage {
            key_type: KeyType::Rsa,
            data: vec![0u8; 32],
        });
        assert!(matches!(
            IdentityPublicKey::unmarshal(&msg),
            Err(CoreError::UnsupportedKeyType(0))
        ));
    }

    #[test]
    fn test_debug_hides_private_key() {
        let identity = IdentityKeyPair::generate();
        let debug = format!("{identity:?}");
        let secret_hex = hex::encode(&identity.secret_bytes()[..]);
        assert!(!debug.contains(&secret_hex));
    }

    #[test]
    fn test_ephemeral_agreement_all_curves() {
        for curve in [Curve::P256, Curve::P384, Curve::P521] {
            let alice = EphemeralKeyPair::generate(curve);
            let bob = EphemeralKeyPair::generate(curve);
            assert_eq!(alice.public_key_bytes()[0], 0x04);

            let alice_pub = alice.public_key_bytes().to_vec();
            let bob_pub = bob.public_key_bytes().to_vec();

            let a = alice.agree(&bob_pub).unwrap();
            let b = bob.agree(&alice_pub).unwrap();
            assert_eq!(*a, *b);
        }
    }

    #[test]
    fn test_ephemeral_rejects_wrong_curve() {
        let alice = EphemeralKeyPair::generate(Curve::P256);
        let bob = EphemeralKeyPair::generate(Curve::P384);
        assert!(matches!(
            alice.agree(bob.public_key_bytes()),
            Err(CoreError::KeyExchange { .. })
        ));
    }
}
