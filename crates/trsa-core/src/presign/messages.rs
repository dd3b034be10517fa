//! Presign message types

use crate::mpc::Addressed;
use crate::PartyId;
use num_bigint::BigInt;
use serde::{Deserialize, Serialize};

/// Fresh blinding exponent sent to the ring successor
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BlindingExponent {
    /// Sender party ID
    pub from: PartyId,
    /// Receiver party ID
    pub to: PartyId,
    /// lambda_t_i in `[0, P)`
    pub value: BigInt,
}

/// Commitment to a placeholder share
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Commitment {
    /// Sender party ID
    pub from: PartyId,
    /// h_t_i
    pub digest: [u8; 32],
}

/// Opened placeholder share c'_t_i
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlaceholderShare {
    /// Sender party ID
    pub from: PartyId,
    /// H(m₀)^{s_t_i} mod N
    pub value: BigInt,
}

/// The sender's view of the quorum correction x_I
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct XValue {
    /// Sender party ID
    pub from: PartyId,
    /// x_I = c * P
    pub x: BigInt,
}

impl Addressed for BlindingExponent {
    fn sender(&self) -> PartyId {
        self.from
    }
}

impl Addressed for Commitment {
    fn sender(&self) -> PartyId {
        self.from
    }
}

impl Addressed for PlaceholderShare {
    fn sender(&self) -> PartyId {
        self.from
    }
}

impl Addressed for XValue {
    fn sender(&self) -> PartyId {
        self.from
    }
}
