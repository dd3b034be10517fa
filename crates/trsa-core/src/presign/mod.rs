//! Presigning
//!
//! The offline phase for one quorum I and membership epoch. Each member turns
//! its polynomial key share into an exponent share s_t_i with
//! `sum s_t_i = d + x_I` over the integers, and everyone learns the public
//! correction x_I. Signing then costs one exponentiation and one broadcast.

mod engine;
mod messages;

pub use engine::{commit_placeholder, run_presign, DUMMY_MESSAGE};
pub use messages::*;

use crate::{Error, PartyId, Result, SessionId};
use num_bigint::BigInt;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// One member's published placeholder in D_I
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitmentEntry {
    /// Member the entry belongs to
    pub party_id: PartyId,
    /// h_t_i
    pub digest: [u8; 32],
    /// c'_t_i
    pub placeholder: BigInt,
}

/// Public signing commitment D_I of a quorum
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SigningCommitment {
    /// x_I
    pub x_quorum: BigInt,
    /// One entry per member, ascending by ID
    pub entries: Vec<CommitmentEntry>,
}

/// Everything a member keeps from a presign run
#[derive(Clone, Serialize, Deserialize)]
pub struct PresignatureBundle {
    /// Session the bundle was produced in
    pub session_id: SessionId,
    /// Quorum I, ascending
    pub members: Vec<PartyId>,
    /// Membership epoch
    pub epoch: u64,
    /// lambda_t_i, the blinding exponent sent to the successor
    pub lambda_t_i: BigInt,
    /// s_t_i
    pub s_t_i: BigInt,
    /// h_t_i
    pub h_t_i: [u8; 32],
    /// Commitments received from the other members
    pub received_h_t_i: BTreeMap<PartyId, [u8; 32]>,
    /// sigma_I_t_i = c'_t_i
    pub sigma_t_i: BigInt,
    /// x_I
    pub x_quorum: BigInt,
    /// x_I as announced by the other members
    pub received_x: BTreeMap<PartyId, BigInt>,
    /// D_I
    pub commitment: SigningCommitment,
    /// S_I_t_i, the exponent used for every signature share
    pub signing_exponent: BigInt,
}

impl PresignatureBundle {
    /// Whether the bundle was generated for exactly this membership.
    pub fn is_valid_for(&self, members: &[PartyId], epoch: u64) -> bool {
        self.epoch == epoch && self.members == members
    }

    /// `StaleBundle` unless the bundle matches `members` and `epoch`.
    pub fn ensure_current(&self, members: &[PartyId], epoch: u64) -> Result<()> {
        if self.is_valid_for(members, epoch) {
            Ok(())
        } else {
            Err(Error::StaleBundle {
                epoch,
                members: members.to_vec(),
            })
        }
    }
}

impl std::fmt::Debug for PresignatureBundle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PresignatureBundle")
            .field("members", &self.members)
            .field("epoch", &self.epoch)
            .field("x_quorum", &self.x_quorum)
            .finish_non_exhaustive()
    }
}
