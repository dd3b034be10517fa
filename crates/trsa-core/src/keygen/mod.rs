//! Key setup
//!
//! Two ways to reach a [`KeyShare`]:
//! - [`deal`] followed by [`run_share_backup`], where a dealer knows the
//!   factorization for a moment
//! - [`run_distributed_keygen`], which chains [`run_modulus_generation`],
//!   [`derive_exponent_shares`] and [`run_share_backup`] so that no party ever
//!   holds p, q or d

mod backup;
mod dealer;
mod exponent;
mod messages;
mod modulus;

pub use backup::run_share_backup;
pub use dealer::{deal, DealerOutput};
pub use exponent::derive_exponent_shares;
pub use messages::*;
pub use modulus::{
    run_modulus_generation, CandidateVerifier, GeneratedModulus, PublicTrialDivision, SieveOnly,
};

use crate::arith::{self, RandomSource};
use crate::mpc::Relay;
use crate::{Error, KeyShare, ProtocolParams, Result, RsaPublicKey, SessionConfig};
use num_bigint::BigInt;
use tracing::{info, instrument, warn};

/// Public backup prime for a modulus: the smallest prime above N.
pub fn backup_prime_for(modulus: &BigInt) -> BigInt {
    arith::next_prime(modulus)
}

/// Generate a key with no trusted party.
///
/// Candidates whose exponent derivation fails are discarded and a new modulus
/// is generated, up to `params.max_sieve_attempts` times.
#[instrument(skip_all, fields(party_id = config.party_id, participants = ?config.parties))]
pub async fn run_distributed_keygen<R, S, V>(
    config: &SessionConfig,
    params: &ProtocolParams,
    verifier: &V,
    rng: &mut S,
    relay: &R,
) -> Result<KeyShare>
where
    R: Relay,
    S: RandomSource + ?Sized,
    V: CandidateVerifier + ?Sized,
{
    let mut attempts = 0;

    for round in 0..params.max_sieve_attempts {
        let modulus_round = config.subsession("modulus", round as u64);
        let generated =
            run_modulus_generation(&modulus_round, params, verifier, &mut *rng, relay).await?;
        attempts += generated.attempts;

        let exponent_round = config.subsession("exponent", round as u64);
        let additive_share = match derive_exponent_shares(
            &exponent_round,
            &generated,
            params.public_exponent,
            relay,
        )
        .await
        {
            Ok(d_i) => d_i,
            Err(e @ Error::CandidateRejected(_)) => {
                warn!(round, error = %e, "Discarding modulus");
                continue;
            }
            Err(e) => return Err(e),
        };

        let public_key = RsaPublicKey::new(
            generated.modulus.clone(),
            BigInt::from(params.public_exponent),
        );
        let backup_prime = backup_prime_for(&generated.modulus);
        let key = run_share_backup(
            &config.subsession("backup", 0),
            &public_key,
            &backup_prime,
            &additive_share,
            rng,
            relay,
        )
        .await?;

        info!(
            attempts,
            modulus_bits = public_key.modulus.bits(),
            "Distributed key generation complete"
        );
        return Ok(key);
    }

    Err(Error::SieveExhausted { attempts })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arith::CryptoRandom;
    use crate::mpc::MemoryRelay;
    use crate::testing::session_configs;
    use crate::RsaSignature;
    use futures_util::future::join_all;
    use num_traits::Zero;
    use std::time::Duration;

    #[tokio::test]
    async fn test_distributed_key_signs() {
        let relay = MemoryRelay::new();
        let params = ProtocolParams {
            prime_bits: 24,
            sieve_bound: 200,
            trial_division_bound: 2000,
            max_sieve_attempts: 2000,
            ..Default::default()
        };
        let verifier = PublicTrialDivision::from_params(&params);
        let configs = session_configs(&[0, 1, 2], 2, Duration::from_secs(10));
        let mut rngs: Vec<_> = (0..3).map(|i| CryptoRandom::seeded(120 + i)).collect();

        let (relay, params, verifier) = (&relay, &params, &verifier);
        let futures = configs.iter().zip(rngs.iter_mut()).map(|(config, rng)| async move {
            run_distributed_keygen(config, params, verifier, rng, relay).await
        });
        let keys: Vec<KeyShare> = join_all(futures)
            .await
            .into_iter()
            .map(|r| r.unwrap())
            .collect();

        let public_key = &keys[0].public_key;
        assert!(keys.iter().all(|k| &k.public_key == public_key));

        let d = keys
            .iter()
            .fold(BigInt::zero(), |acc, k| acc + &k.additive_share);
        let h = public_key.message_representative(b"apples");
        let sigma = arith::powmod_signed(&h, &d, &public_key.modulus).unwrap();
        assert!(public_key.verify(b"apples", &RsaSignature::new(sigma)));
    }
}
