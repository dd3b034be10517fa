//! Threshold signing
//!
//! The online phase: one exponentiation per member and a single broadcast,
//! using a presignature bundle for the current quorum.

mod messages;
mod threshold;

pub use messages::*;
pub use threshold::{combine_signature_shares, create_signature_share, run_threshold_sign};
