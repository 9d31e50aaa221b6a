// ============================================
// File: crates/peerlink-core/src/handshake/mod.rs
// ============================================
//! # Handshake Module
//!
//! ## Creation Reason
//! Runs the secure channel handshake over any byte stream: proposals,
//! signed ephemeral exchange, key derivation and the nonce echo.
//!
//! ## Main Functionality
//! - [`state`]: `HandshakeState`, `Phase` and the established result
//! - [`propose`]: Proposal, identification and protocol selection steps
//! - [`exchange`]: Exchange, verification, key generation and nonce echo
//! - `perform`: Drives all steps over a stream
//!
//! ## Flow
//! ```text
//! create_proposal ─► write ─► read ─► identify ─► select_protocols
//!       ─► create_exchange ─► write ─► read ─► verify ─► generate_keys
//!       ─► seal_remote_nonce ─► write ─► read ─► verify_nonce
//! ```
//!
//! ## ⚠️ Important Note for Next Developer
//! - Any error moves the state to `Failed`; callers must drop the stream
//! - `perform` has no timeout of its own, wrap it
//!
//! ## Last Modified
//! v0.1.0 - Initial handshake driver

pub mod exchange;
pub mod propose;
pub mod state;

pub use state::{EstablishedSession, HandshakeState, KeyRole, Phase, SelectedProtocols};

use bytes::Bytes;
use tokio::io::{AsyncRead, AsyncWrite};
use tracing::{debug, warn};

use crate::error::{CoreError, Result};
use crate::protocol::codec::{read_frame, write_frame, MAX_FRAME_SIZE};

/// Runs every handshake step over `stream`.
///
/// On success the phase is `Established`; on error it is `Failed`.
///
/// # Errors
/// Any error of the individual steps, or the I/O error of the stream.
pub async fn perform<S>(state: &mut HandshakeState, stream: &mut S) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin + ?Sized,
{
    match drive(state, stream).await {
        Ok(()) => {
            debug!(
                local = %state.local_peer().short(),
                remote = ?state.remote_peer(),
                "Handshake established"
            );
            Ok(())
        }
        Err(e) => {
            if e.is_suspicious() {
                warn!(phase = %state.phase(), error = %e, "Handshake failed: possible attack");
            } else {
                debug!(phase = %state.phase(), error = %e, "Handshake failed");
            }
            state.fail();
            Err(e)
        }
    }
}

async fn drive<S>(state: &mut HandshakeState, stream: &mut S) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin + ?Sized,
{
    let proposal = propose::create_proposal(state)?;
    write_frame(stream, &proposal).await?;
    let remote = expect_frame(stream, "proposal").await?;
    propose::identify(state, remote)?;
    propose::select_protocols(state)?;

    let ours = exchange::create_exchange(state)?;
    write_frame(stream, &ours).await?;
    let remote = expect_frame(stream, "exchange").await?;
    exchange::verify(state, &remote)?;
    exchange::generate_keys(state)?;

    let echo = exchange::seal_remote_nonce(state)?;
    write_frame(stream, &echo).await?;
    let remote = expect_frame(stream, "nonce echo").await?;
    exchange::verify_nonce(state, &remote)
}

async fn expect_frame<S>(stream: &mut S, what: &str) -> Result<Bytes>
where
    S: AsyncRead + Unpin + ?Sized,
{
    read_frame(stream, MAX_FRAME_SIZE)
        .await?
        .ok_or_else(|| CoreError::closed(format!("stream ended before remote {what}")))
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

    fn new_state(expected: Option<peerlink_common::PeerId>) -> HandshakeState {
        HandshakeState::new(
            Arc::new(IdentityKeyPair::generate()),
            Capabilities::default(),
            expected,
        )
    }

    #[tokio::test]
    async fn test_perform_over_duplex() {
        let (mut left, mut right) = tokio::io::duplex(64 * 1024);
        let mut a = new_state(None);
        let mut b = new_state(None);

        let (ra, rb) = tokio::join!(perform(&mut a, &mut left), perform(&mut b, &mut right));
        ra.unwrap();
        rb.unwrap();

        assert_eq!(a.phase(), Phase::Established);
        assert_eq!(a.remote_peer(), Some(b.local_peer()));
        assert_eq!(b.remote_peer(), Some(a.local_peer()));
        assert_eq!(a.selected().unwrap().curve, b.selected().unwrap().curve);
    }

    #[tokio::test]
    async fn test_perform_fails_on_closed_stream() {
        let (mut left, right) = tokio::io::duplex(64 * 1024);
        drop(right);

        let mut a = new_state(None);
        assert!(perform(&mut a, &mut left).await.is_err());
        assert_eq!(a.phase(), Phase::Failed);
        assert!(!a.holds_secrets());
    }

    #[tokio::test]
    async fn test_perform_rejects_wrong_expected_peer() {
        let (mut left, mut right) = tokio::io::duplex(64 * 1024);
        let stranger = IdentityKeyPair::generate().peer_id();
        let mut a = new_state(Some(stranger));
        let mut b = new_state(None);

        let b_task = tokio::spawn(async move {
            let _ = perform(&mut b, &mut right).await;
        });

        let err = perform(&mut a, &mut left).await.unwrap_err();
        assert!(matches!(err, CoreError::IdentityMismatch { .. }));
        assert_eq!(a.phase(), Phase::Failed);

        drop(left);
        b_task.await.unwrap();
    }
}
