//! Signing message types

use crate::mpc::Addressed;
use crate::PartyId;
use num_bigint::BigInt;
use serde::{Deserialize, Serialize};

/// A member's signature share c_i = H(m)^{S_I_t_i} mod N
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignatureShare {
    /// Sender party ID
    pub from: PartyId,
    /// c_i
    pub value: BigInt,
}

impl Addressed for SignatureShare {
    fn sender(&self) -> PartyId {
        self.from
    }
}
