//! Key setup message types

use crate::mpc::Addressed;
use crate::PartyId;
use num_bigint::BigInt;
use serde::{Deserialize, Serialize};

/// Evaluation of the sender's backup polynomial at the receiver's point
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackupShare {
    /// Sender party ID
    pub from: PartyId,
    /// Receiver party ID
    pub to: PartyId,
    /// Value in `[0, P)`
    pub value: BigInt,
}

/// Public result of a candidate modulus, broadcast by every party
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum CandidateOutcome {
    /// The sender accepts the revealed modulus
    Accepted { from: PartyId, modulus: BigInt },
    /// The sender's verifier rejected the candidate
    Rejected { from: PartyId, reason: String },
}

/// φ_i reduced modulo the public exponent
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PhiResidue {
    /// Sender party ID
    pub from: PartyId,
    /// φ_i mod e
    pub residue: u64,
}

/// m₀^{d_i} mod N, used to fix the rounding deficit of the exponent shares
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExponentProbe {
    /// Sender party ID
    pub from: PartyId,
    /// Probe value
    pub value: BigInt,
}

impl Addressed for BackupShare {
    fn sender(&self) -> PartyId {
        self.from
    }
}

impl Addressed for CandidateOutcome {
    fn sender(&self) -> PartyId {
        match self {
            CandidateOutcome::Accepted { from, .. } => *from,
            CandidateOutcome::Rejected { from, .. } => *from,
        }
    }
}

impl Addressed for PhiResidue {
    fn sender(&self) -> PartyId {
        self.from
    }
}

impl Addressed for ExponentProbe {
    fn sender(&self) -> PartyId {
        self.from
    }
}
