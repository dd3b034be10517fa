//! # Threshold RSA Core
//!
//! Protocol machinery for distributed RSA key generation and threshold
//! signing among mutually distrusting parties.
//!
//! This crate provides the building blocks for:
//! - Secret sharing (additive and Shamir)
//! - BGW multiplication of shared values
//! - Distributed sieving and modulus generation
//! - Presigning and threshold signing for a changing quorum
//!
//! ## Protocol Overview
//!
//! Parties jointly hold an RSA private exponent d. Any quorum of at least
//! `threshold` active parties runs an offline presign phase once per
//! membership, after which every signature costs one exponentiation and one
//! broadcast per member. Membership changes invalidate the presign material.
//!
//! ## Example
//!
//! ```rust,ignore
//! use trsa_core::{mpc::MemoryRelay, quorum::QuorumCoordinator, ProtocolParams};
//!
//! let mut coordinator =
//!     QuorumCoordinator::with_dealer(MemoryRelay::new(), &[0, 1, 2, 5, 6], 3, &[0, 1, 2], ProtocolParams::default())
//!         .await?;
//! let outcome = coordinator.sign(b"apples").await?;
//! assert!(coordinator.public_key().verify(b"apples", &outcome.signature));
//! ```

pub mod arith;
pub mod bgw;
pub mod error;
pub mod keygen;
pub mod mpc;
pub mod presign;
pub mod quorum;
pub mod sharing;
pub mod sieve;
pub mod sign;
pub mod types;

#[cfg(test)]
mod testing;

pub use error::{Error, Result};
pub use types::{
    KeyShare, PartyId, ProtocolParams, RsaPublicKey, RsaSignature, SessionConfig, SessionId,
};

/// Protocol version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Default bit length of each RSA prime
pub const DEFAULT_PRIME_BITS: u64 = 512;

/// Default public exponent
pub const DEFAULT_PUBLIC_EXPONENT: u64 = 65537;

/// Default sieve bound B1
pub const DEFAULT_SIEVE_BOUND: u64 = 1000;

/// Attempts allowed for rejection sampling of random values
pub const CRYPTOGRAPHIC_RETRY_MAX: usize = 100;
