//! Sieve message types

use crate::mpc::Addressed;
use crate::PartyId;
use serde::{Deserialize, Serialize};

/// A party's blinded residues, one per sieving prime
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SievePartial {
    /// Sender party ID
    pub from: PartyId,
    /// Share of a * p reduced modulo each sieving prime
    pub u_row: Vec<u64>,
    /// Share of b * q reduced modulo each sieving prime
    pub v_row: Vec<u64>,
}

impl Addressed for SievePartial {
    fn sender(&self) -> PartyId {
        self.from
    }
}
