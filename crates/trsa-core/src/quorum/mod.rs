//! Quorum coordination
//!
//! A [`QuorumCoordinator`] owns every registered party, tracks which of them
//! are active and drives presigning and signing for the current membership.
//!
//! ```text
//!   Idle ──sign──▶ AwaitingPresign ──presign──▶ Ready ──sign──▶ Signing ──▶ Settled
//!                        ▲                                                   │
//!                        └────────────── activate / deactivate ──────────────┘
//! ```
//!
//! A membership change bumps the epoch and discards every bundle. The next
//! `sign` call fails with `StaleBundle` after regenerating bundles for the new
//! membership, so the call after it succeeds.

mod coordinator;

pub use coordinator::QuorumCoordinator;

use crate::arith::{CryptoRandom, RandomSource};
use crate::presign::PresignatureBundle;
use crate::{KeyShare, PartyId, RsaSignature};
use serde::{Deserialize, Serialize};

/// Coordinator lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum QuorumState {
    /// Keys loaded, nothing presigned yet
    Idle,
    /// Membership changed since the last presign
    AwaitingPresign,
    /// Every active party holds a bundle for the current membership
    Ready,
    /// A signature is being produced
    Signing,
    /// The last signature completed; bundles remain usable
    Settled,
}

/// One registered party and its private state
pub struct Party {
    /// Stable party ID
    pub id: PartyId,
    /// Whether the party takes part in the current quorum
    pub active: bool,
    /// Long-term key material
    pub key: KeyShare,
    /// Bundle for the current membership, if any
    pub bundle: Option<PresignatureBundle>,
    rng: Box<dyn RandomSource>,
}

impl Party {
    /// Party drawing randomness from the operating system
    pub fn new(key: KeyShare) -> Self {
        Self::with_rng(key, Box::new(CryptoRandom::os()))
    }

    /// Party with a caller-supplied random source
    pub fn with_rng(key: KeyShare, rng: Box<dyn RandomSource>) -> Self {
        Self {
            id: key.party_id,
            active: false,
            key,
            bundle: None,
            rng,
        }
    }
}

impl std::fmt::Debug for Party {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Party")
            .field("id", &self.id)
            .field("active", &self.active)
            .field("bundle", &self.bundle)
            .finish_non_exhaustive()
    }
}

/// A completed signature and the quorum that produced it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignOutcome {
    /// The RSA signature
    pub signature: RsaSignature,
    /// Active members at signing time, ascending
    pub members: Vec<PartyId>,
}
