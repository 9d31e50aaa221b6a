// ============================================
// File: crates/peerlink-core/src/crypto/kdf.rs
// ============================================
//! # Key Stretcher
//!
//! ## Creation Reason
//! Expands the ECDH shared secret into two independent key bundles, one per
//! direction, each holding an IV, a cipher key and a MAC key.
//!
//! ## Algorithm
//! ```text
//! seed = "key expansion"
//! a    = HMAC(secret, seed)
//! loop until 2 · (iv + key + mac) bytes:
//!     b = HMAC(secret, a ‖ seed);  out ‖= b
//!     a = HMAC(secret, a)
//! k1 = out[..half]  = iv ‖ cipher key ‖ mac key
//! k2 = out[half..]  = iv ‖ cipher key ‖ mac key
//! ```
//!
//! ## ⚠️ Important Note for Next Developer
//! - Output layout is shared with other implementations, do not reorder
//! - The MAC key is 20 bytes regardless of the negotiated hash
//!
//! ## Last Modified
//! v0.1.0 - Initial key stretcher

use hmac::digest::KeyInit;
use hmac::{Hmac, Mac};
use sha2::{Sha256, Sha512};
use zeroize::{Zeroize, ZeroizeOnDrop, Zeroizing};

use super::support::{CipherKind, HashKind};
use super::MAC_KEY_SIZE;
use crate::error::{CoreError, Result};

/// Seed mixed into every stretcher round.
const STRETCH_SEED: &[u8] = b"key expansion";

// ============================================
// KeyBundle
// ============================================

/// Keys for one direction of the secure channel.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct KeyBundle {
    /// Initial CTR counter block.
    pub iv: Vec<u8>,
    /// Cipher key, 16 or 32 bytes.
    pub cipher_key: Vec<u8>,
    /// MAC key.
    pub mac_key: Vec<u8>,
}

impl std::fmt::Debug for KeyBundle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyBundle")
            .field("cipher_key_len", &self.cipher_key.len())
            .finish_non_exhaustive()
    }
}

/// Both bundles produced by the stretcher.
#[derive(Debug, Clone)]
pub struct StretchedKeys {
    /// First half of the output.
    pub k1: KeyBundle,
    /// Second half of the output.
    pub k2: KeyBundle,
}

// ============================================
// Key Stretching
// ============================================

/// Expands `secret` into two key bundles sized for `cipher`.
///
/// # Errors
/// Returns `KeyDerivation` if `secret` is empty.
pub fn stretch_keys(cipher: CipherKind, hash: HashKind, secret: &[u8]) -> Result<StretchedKeys> {
    if secret.is_empty() {
        return Err(CoreError::key_derivation("empty shared secret"));
    }

    let iv_size = cipher.iv_size();
    let key_size = cipher.key_size();
    let half = iv_size + key_size + MAC_KEY_SIZE;
    let total = 2 * half;

    let mut output = Zeroizing::new(Vec::with_capacity(total + hash.output_size()));
    let mut a = Zeroizing::new(hmac(hash, secret, &[STRETCH_SEED])?);

    while output.len() < total {
        let b = Zeroizing::new(hmac(hash, secret, &[a.as_slice(), STRETCH_SEED])?);
        output.extend_from_slice(&b);
        a = Zeroizing::new(hmac(hash, secret, &[a.as_slice()])?);
    }

    let split = |bundle: &[u8]| KeyBundle {
        iv: bundle[..iv_size].to_vec(),
        cipher_key: bundle[iv_size..iv_size + key_size].to_vec(),
        mac_key: bundle[iv_size + key_size..half].to_vec(),
    };

    Ok(StretchedKeys {
        k1: split(&output[..half]),
        k2: split(&output[half..total]),
    })
}

/// Computes `HMAC_hash(key, parts...)`.
///
/// # Errors
/// Returns `KeyDerivation` if the MAC rejects the key.
pub fn hmac(hash: HashKind, key: &[u8], parts: &[&[u8]]) -> Result<Vec<u8>> {
    fn run<M: Mac + KeyInit>(key: &[u8], parts: &[&[u8]]) -> Result<Vec<u8>> {
        let mut mac = <M as Mac>::new_from_slice(key)
            .map_err(|_| CoreError::key_derivation("invalid HMAC key length"))?;
        for part in parts {
            mac.update(part);
        }
        Ok(mac.finalize().into_bytes().to_vec())
    }

    match hash {
        HashKind::Sha256 => run::<Hmac<Sha256>>(key, parts),
        HashKind::Sha512 => run::<Hmac<Sha512>>(key, parts),
    }
}

// ============================================
// Tests
// ============================================
