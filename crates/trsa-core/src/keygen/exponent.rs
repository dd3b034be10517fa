//! Distributed derivation of the private exponent

use super::{ExponentProbe, GeneratedModulus, PhiResidue};
use crate::arith;
use crate::mpc::{self, Relay};
use crate::types::{message_representative, product_mod};
use crate::{Error, Result, SessionConfig};
use num_bigint::BigInt;
use num_integer::Integer;
use num_traits::{One, Zero};
use tracing::{debug, info, instrument};

/// Relay round carrying φ residues
const ROUND_PHI: u32 = 1;

/// Relay round carrying exponent probes
const ROUND_PROBE: u32 = 2;

/// Message whose representative fixes the rounding deficit
const PROBE_MESSAGE: &[u8] = b"trsa exponent probe";

/// This party's additive share of φ(N) = N - p - q + 1.
fn phi_share(config: &SessionConfig, generated: &GeneratedModulus) -> BigInt {
    let own = &generated.p_share + &generated.q_share;
    if config.position() == 0 {
        &generated.modulus + 1u32 - own
    } else {
        -own
    }
}

/// Derive additive shares d_i with `e * sum d_i = 1 mod φ(N)`.
///
/// With ζ = -φ⁻¹ mod e, the integer `(1 + ζφ) / e` is such an exponent. Each
/// party divides its own term with floor division, which leaves the sum short
/// by some r in `[0, k)`. A probe on a fixed message finds r and the first
/// member adds it to its share.
///
/// Both φ ≡ 0 mod e and a probe with no fitting r (N is not a product of two
/// primes) reject the candidate with `CandidateRejected`.
#[instrument(skip_all, fields(party_id = config.party_id))]
pub async fn derive_exponent_shares<R: Relay>(
    config: &SessionConfig,
    generated: &GeneratedModulus,
    public_exponent: u64,
    relay: &R,
) -> Result<BigInt> {
    let e = BigInt::from(public_exponent);
    let modulus = &generated.modulus;
    let phi_i = phi_share(config, generated);

    let residue = u64::try_from(&arith::modulo(&phi_i, &e))
        .map_err(|err| Error::Internal(err.to_string()))?;
    let message = PhiResidue {
        from: config.party_id,
        residue,
    };
    let residues = mpc::exchange_broadcast(
        relay,
        &config.subsession("phi", 0),
        ROUND_PHI,
        &message,
        "phi residues",
    )
    .await?;

    let mut phi_mod_e = BigInt::zero();
    for (from, r) in &residues {
        if r.residue >= public_exponent {
            return Err(Error::invalid_share(*from, "phi residue not reduced"));
        }
        phi_mod_e += r.residue;
    }
    let phi_mod_e = arith::modulo(&phi_mod_e, &e);
    if phi_mod_e.is_zero() {
        return Err(Error::CandidateRejected(
            "phi is divisible by the public exponent".into(),
        ));
    }
    let zeta = arith::modulo(&-arith::mod_inverse(&phi_mod_e, &e)?, &e);

    let first = config.position() == 0;
    let numerator = if first {
        BigInt::one() + &zeta * &phi_i
    } else {
        &zeta * &phi_i
    };
    let mut d_i = numerator.div_floor(&e);
    debug!("Exponent share derived, probing for deficit");

    let m0 = message_representative(PROBE_MESSAGE, modulus);
    let probe = ExponentProbe {
        from: config.party_id,
        value: arith::powmod_signed(&m0, &d_i, modulus)?,
    };
    let probes = mpc::exchange_broadcast(
        relay,
        &config.subsession("probe", 0),
        ROUND_PROBE,
        &probe,
        "exponent probes",
    )
    .await?;
    let mut accumulated = product_mod(probes.values().map(|p| &p.value), modulus);

    let k = config.n_parties();
    for deficit in 0..k {
        if arith::powmod(&accumulated, &e, modulus) == m0 {
            if first {
                d_i += deficit;
            }
            info!(deficit, "Exponent shares fixed");
            return Ok(d_i);
        }
        accumulated = arith::modulo(&(accumulated * &m0), modulus);
    }

    Err(Error::CandidateRejected(
        "no exponent correction fits; modulus is not a biprime".into(),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arith::CryptoRandom;
    use crate::mpc::MemoryRelay;
    use crate::sharing::split_additive;
    use crate::testing::session_configs;
    use futures_util::future::join_all;
    use std::time::Duration;

    async fn derive_for(p: u64, q: u64, e: u64) -> Vec<Result<BigInt>> {
        let relay = MemoryRelay::new();
        let parties = [0, 1, 2, 5];
        let configs = session_configs(&parties, 2, Duration::from_secs(5));
        let mut rng = CryptoRandom::seeded(110);
        let p_shares = split_additive(&BigInt::from(p), 4, &mut rng).unwrap();
        let q_shares = split_additive(&BigInt::from(q), 4, &mut rng).unwrap();
        let modulus = BigInt::from(p) * BigInt::from(q);

        let generated: Vec<GeneratedModulus> = p_shares
            .into_iter()
            .zip(q_shares)
            .map(|(p_share, q_share)| GeneratedModulus {
                modulus: modulus.clone(),
                p_share,
                q_share,
                attempts: 1,
            })
            .collect();

        let relay = &relay;
        let futures = configs
            .iter()
            .zip(&generated)
            .map(|(config, g)| async move { derive_exponent_shares(config, g, e, relay).await });
        join_all(futures).await
    }

    #[tokio::test]
    async fn test_derived_exponent_inverts_e() {
        let (p, q) = (1_000_003u64, 999_983u64);
        let shares: Vec<BigInt> = derive_for(p, q, 65537)
            .await
            .into_iter()
            .map(|r| r.unwrap())
            .collect();

        let d = shares.iter().fold(BigInt::zero(), |acc, d_i| acc + d_i);
        let phi = BigInt::from(p - 1) * BigInt::from(q - 1);
        assert_eq!(
            arith::modulo(&(d * BigInt::from(65537u32)), &phi),
            BigInt::one()
        );
    }

    #[tokio::test]
    async fn test_phi_multiple_of_e_rejected() {
        // 23 - 1 is divisible by e = 11
        let results = derive_for(23, 1_000_003, 11).await;
        for result in results {
            assert!(matches!(result, Err(Error::CandidateRejected(_))));
        }
    }

    #[tokio::test]
    async fn test_composite_factor_fails_probe() {
        // 1_000_001 = 101 * 9901
        let results = derive_for(1_000_001, 999_983, 65537).await;
        for result in results {
            match result {
                Err(Error::CandidateRejected(reason)) => assert!(reason.contains("biprime")),
                other => panic!("expected rejection, got {:?}", other),
            }
        }
    }
}
