//! Trusted dealer key setup

use crate::arith::{self, RandomSource};
use crate::sharing::split_additive;
use crate::{Error, PartyId, ProtocolParams, Result, RsaPublicKey};
use num_bigint::BigInt;
use num_integer::Integer;
use num_traits::One;
use std::collections::BTreeMap;
use tracing::{debug, info, instrument};

/// Everything a dealer hands out
#[derive(Debug, Clone)]
pub struct DealerOutput {
    /// Group public key
    pub public_key: RsaPublicKey,
    /// Public prime `P` in `(N, 2N)` for the polynomial backup
    pub backup_prime: BigInt,
    /// Additive share d_i of the private exponent per registered party
    pub additive_shares: BTreeMap<PartyId, BigInt>,
}

/// Generate an RSA key from safe primes and split the private exponent.
///
/// The dealer sees the factorization; use [`super::run_modulus_generation`]
/// when no party may learn it.
#[instrument(skip(params, rng), fields(prime_bits = params.prime_bits))]
pub fn deal<S: RandomSource + ?Sized>(
    registry: &[PartyId],
    params: &ProtocolParams,
    rng: &mut S,
) -> Result<DealerOutput> {
    let mut registry = registry.to_vec();
    registry.sort_unstable();
    registry.dedup();
    if registry.is_empty() {
        return Err(Error::InvalidConfig("empty registry".into()));
    }

    let e = BigInt::from(params.public_exponent);
    let range = arith::bit_range(params.prime_bits);

    for attempt in 0..crate::CRYPTOGRAPHIC_RETRY_MAX {
        let p = rng.random_safe_prime(&range)?;
        let q = rng.random_safe_prime(&range)?;
        if p == q {
            continue;
        }
        let phi = (&p - 1u32) * (&q - 1u32);
        if !e.gcd(&phi).is_one() {
            debug!(attempt, "e shares a factor with phi, resampling");
            continue;
        }

        let modulus = &p * &q;
        let d = arith::mod_inverse(&e, &phi)?;
        let backup_range = (&modulus + 1u32)..(&modulus << 1usize);
        let backup_prime = rng.random_prime(&backup_range)?;

        let shares = split_additive(&d, registry.len(), rng)?;
        let additive_shares = registry.iter().copied().zip(shares).collect();

        info!(
            parties = registry.len(),
            modulus_bits = modulus.bits(),
            "Dealt threshold RSA key"
        );
        return Ok(DealerOutput {
            public_key: RsaPublicKey::new(modulus, e),
            backup_prime,
            additive_shares,
        });
    }

    Err(Error::Crypto(
        "failed to find primes compatible with the public exponent".into(),
    ))
}
