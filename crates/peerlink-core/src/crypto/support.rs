// ============================================
// File: crates/peerlink-core/src/crypto/support.rs
// ============================================
//! # Supported Algorithms
//!
//! ## Creation Reason
//! Both peers advertise ordered capability lists in their proposals. This
//! module names the algorithms, renders and parses the comma-separated wire
//! form, and picks the common choice deterministically on both sides.
//!
//! ## Main Functionality
//! - `Curve`, `CipherKind`, `HashKind`: Supported algorithm enums
//! - `Capabilities`: The three ordered lists a node proposes
//! - `select_best`: Deterministic choice given the handshake order
//!
//! ## Selection Rule
//! ```text
//! order > 0  →  walk the local list, pick the first entry the remote has
//! order < 0  →  walk the remote list, pick the first entry we have
//! ```
//! Both peers compute opposite orders, so both walk the same list.
//!
//! ## Last Modified
//! v0.1.0 - Initial capability negotiation

use std::cmp::Ordering;
use std::fmt;

use serde::{Deserialize, Serialize};

use super::IV_SIZE;
use crate::error::{CoreError, Result};

// ============================================
// Algorithm Trait
// ============================================

/// A negotiable algorithm with a stable wire name.
pub trait Algorithm: Copy + PartialEq + Sized + 'static {
    /// Label used in `NoCommonAlgorithms` errors.
    const KIND: &'static str;

    /// Every supported value, in default preference order.
    const ALL: &'static [Self];

    /// Wire name of this algorithm.
    fn name(self) -> &'static str;

    /// Looks up an algorithm by wire name.
    fn from_name(name: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|a| a.name() == name)
    }
}

// ============================================
// Curve
// ============================================

/// Elliptic curve used for the ephemeral key agreement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Curve {
    /// NIST P-256.
    #[serde(rename = "P-256")]
    P256,
    /// NIST P-384.
    #[serde(rename = "P-384")]
    P384,
    /// NIST P-521.
    #[serde(rename = "P-521")]
    P521,
}

impl Algorithm for Curve {
    const KIND: &'static str = "exchanges";
    const ALL: &'static [Self] = &[Self::P256, Self::P384, Self::P521];

    fn name(self) -> &'static str {
        match self {
            Self::P256 => "P-256",
            Self::P384 => "P-384",
            Self::P521 => "P-521",
        }
    }
}

// ============================================
// CipherKind
// ============================================

/// Symmetric cipher used after the handshake. Both run in CTR mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CipherKind {
    /// AES with a 256-bit key.
    #[serde(rename = "AES-256")]
    Aes256,
    /// AES with a 128-bit key.
    #[serde(rename = "AES-128")]
    Aes128,
}

impl CipherKind {
    /// Cipher key length in bytes.
    #[must_use]
    pub const fn key_size(self) -> usize {
        match self {
            Self::Aes256 => 32,
            Self::Aes128 => 16,
        }
    }

    /// IV length in bytes.
    #[must_use]
    pub const fn iv_size(self) -> usize {
        IV_SIZE
    }
}

impl Algorithm for CipherKind {
    const KIND: &'static str = "ciphers";
    const ALL: &'static [Self] = &[Self::Aes256, Self::Aes128];

    fn name(self) -> &'static str {
        match self {
            Self::Aes256 => "AES-256",
            Self::Aes128 => "AES-128",
        }
    }
}

// ============================================
// HashKind
// ============================================

/// Hash used for the key stretcher and frame MACs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum HashKind {
    /// SHA-256.
    #[serde(rename = "SHA256")]
    Sha256,
    /// SHA-512.
    #[serde(rename = "SHA512")]
    Sha512,
}

impl HashKind {
    /// Output length of the HMAC in bytes.
    #[must_use]
    pub const fn output_size(self) -> usize {
        match self {
            Self::Sha256 => 32,
            Self::Sha512 => 64,
        }
    }
}

impl Algorithm for HashKind {
    const KIND: &'static str = "hashes";
    const ALL: &'static [Self] = &[Self::Sha256, Self::Sha512];

    fn name(self) -> &'static str {
        match self {
            Self::Sha256 => "SHA256",
            Self::Sha512 => "SHA512",
        }
    }
}

macro_rules! display_by_name {
    ($($ty:ty),*) => {
        $(impl fmt::Display for $ty {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.name())
            }
        })*
    };
}

display_by_name!(Curve, CipherKind, HashKind);

// ============================================
// Capabilities
// ============================================

/// Ordered capability lists proposed by this node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Capabilities {
    /// Key agreement curves, most preferred first.
    pub exchanges: Vec<Curve>,
    /// Ciphers, most preferred first.
    pub ciphers: Vec<CipherKind>,
    /// Hashes, most preferred first.
    pub hashes: Vec<HashKind>,
}

impl Default for Capabilities {
    fn default() -> Self {
        Self {
            exchanges: Curve::ALL.to_vec(),
            ciphers: CipherKind::ALL.to_vec(),
            hashes: HashKind::ALL.to_vec(),
        }
    }
}

impl Capabilities {
    /// Checks that no list is empty.
    ///
    /// # Errors
    /// Returns `InvalidState` naming the empty list.
    pub fn validate(&self) -> Result<()> {
        for (name, empty) in [
            (Curve::KIND, self.exchanges.is_empty()),
            (CipherKind::KIND, self.ciphers.is_empty()),
            (HashKind::KIND, self.hashes.is_empty()),
        ] {
            if empty {
                return Err(CoreError::invalid_state(
                    "propose",
                    format!("at least one entry in {name}"),
                ));
            }
        }
        Ok(())
    }
}

/// Renders a list in its comma-separated wire form.
#[must_use]
pub fn to_csv<A: Algorithm>(list: &[A]) -> String {
    list.iter().map(|a| a.name()).collect::<Vec<_>>().join(",")
}

// ============================================
// Selection
// ============================================

/// Picks the common algorithm both peers will agree on.
///
/// `order` is the handshake order computed by this side. Entries of the
/// remote list this node does not know are ignored.
///
/// # Errors
/// Returns `NoCommonAlgorithms` if the lists share nothing, and `SelfDial`
/// if `order` is `Equal`.
pub fn select_best<A: Algorithm>(order: Ordering, local: &[A], remote_csv: &str) -> Result<A> {
    let remote: Vec<&str> = remote_csv
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .collect();

    let chosen = match order {
        Ordering::Equal => return Err(CoreError::SelfDial),
        Ordering::Greater => local.iter().copied().find(|a| remote.contains(&a.name())),
        Ordering::Less => remote
            .iter()
            .filter_map(|name| A::from_name(name))
            .find(|a| local.contains(a)),
    };

    chosen.ok_or(CoreError::NoCommonAlgorithms { kind: A::KIND })
}

// ============================================
// Tests
// ============================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_csv_rendering() {
        assert_eq!(to_csv(Curve::ALL), "P-256,P-384,P-521");
        assert_eq!(to_csv(CipherKind::ALL), "AES-256,AES-128");
        assert_eq!(to_csv(HashKind::ALL), "SHA256,SHA512");
    }

    #[test]
    fn test_select_best_uses_order() {
        let local = [CipherKind::Aes128, CipherKind::Aes256];
        let remote = "AES-256,AES-128";

        assert_eq!(
            select_best(Ordering::Greater, &local, remote).unwrap(),
            CipherKind::Aes128
        );
        assert_eq!(
            select_best(Ordering::Less, &local, remote).unwrap(),
            CipherKind::Aes256
        );
    }

    #[test]
    fn test_select_best_is_symmetric() {
        let a = [Curve::P521, Curve::P256];
        let b = [Curve::P384, Curve::P256, Curve::P521];

        let from_a = select_best(Ordering::Greater, &a, &to_csv(&b)).unwrap();
        let from_b = select_best(Ordering::Less, &b, &to_csv(&a)).unwrap();
        assert_eq!(from_a, from_b);
        assert_eq!(from_a, Curve::P521);
    }

    #[test]
    fn test_select_best_no_overlap() {
        let err = select_best(Ordering::Greater, &[HashKind::Sha256], "SHA512,BLAKE2").unwrap_err();
        assert!(err.to_string().contains("no algorithms in common"));

        let err = select_best(Ordering::Less, &[HashKind::Sha256], "").unwrap_err();
        assert!(matches!(err, CoreError::NoCommonAlgorithms { kind: "hashes" }));
    }

    #[test]
    fn test_select_best_ignores_unknown_names() {
        let chosen = select_best(Ordering::Less, HashKind::ALL, "BLAKE2, SHA512").unwrap();
        assert_eq!(chosen, HashKind::Sha512);
    }

    #[test]
    fn test_select_best_equal_order_is_self_dial() {
        assert!(matches!(
            select_best(Ordering::Equal, Curve::ALL, "P-256"),
            Err(CoreError::SelfDial)
        ));
    }

    #[test]
    fn test_capabilities_serde_names() {
        let caps: Capabilities = toml::from_str(
            r#"
            exchanges = ["P-384"]
            ciphers = ["AES-128"]
            "#,
        )
        .unwrap();
        assert_eq!(caps.exchanges, vec![Curve::P384]);
        assert_eq!(caps.ciphers, vec![CipherKind::Aes128]);
        assert_eq!(caps.hashes, HashKind::ALL.to_vec());

        let empty = Capabilities {
            ciphers: vec![],
            ..Capabilities::default()
        };
        assert!(empty.validate().is_err());
    }
}
