//! BGW message types

use crate::mpc::Addressed;
use crate::PartyId;
use num_bigint::BigInt;
use serde::{Deserialize, Serialize};

/// Evaluations of the sender's masking polynomials at the receiver's point
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CrossTerms {
    /// Sender party ID
    pub from: PartyId,
    /// Receiver party ID
    pub to: PartyId,
    /// f_i(j) for each batched product
    pub f: Vec<BigInt>,
    /// g_i(j) for each batched product
    pub g: Vec<BigInt>,
    /// h_i(j) for each batched product
    pub h: Vec<BigInt>,
}

/// Degree-2l point share of each batched product, broadcast to reveal them
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PointShare {
    /// Sender party ID
    pub from: PartyId,
    /// N_j for each batched product
    pub values: Vec<BigInt>,
}

impl Addressed for CrossTerms {
    fn sender(&self) -> PartyId {
        self.from
    }
}

impl Addressed for PointShare {
    fn sender(&self) -> PartyId {
        self.from
    }
}
