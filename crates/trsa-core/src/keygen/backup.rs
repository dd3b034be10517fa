//! Polynomial backup of additive exponent shares

use super::BackupShare;
use crate::arith::{self, RandomSource};
use crate::mpc::{self, Relay};
use crate::sharing::ShamirPolynomial;
use crate::{Error, KeyShare, Result, RsaPublicKey, SessionConfig};
use num_bigint::BigInt;
use num_traits::Signed;
use tracing::{debug, info, instrument};

/// Relay round carrying backup shares
const ROUND_BACKUP: u32 = 1;

/// Re-share this party's additive exponent share over `F_P`.
///
/// Every member of `config.parties` (the full registry) deals its d_i with a
/// random polynomial of degree `threshold - 1` evaluated at `id + 1`. The sum
/// of the evaluations a party receives is its polynomial share y_i, so any
/// `threshold` members can later interpolate d without the rest.
#[instrument(skip_all, fields(party_id = config.party_id, parties = config.n_parties()))]
pub async fn run_share_backup<R, S>(
    config: &SessionConfig,
    public_key: &RsaPublicKey,
    backup_prime: &BigInt,
    additive_share: &BigInt,
    rng: &mut S,
    relay: &R,
) -> Result<KeyShare>
where
    R: Relay,
    S: RandomSource + ?Sized,
{
    info!(threshold = config.threshold, "Starting key backup");

    if backup_prime <= &public_key.modulus {
        return Err(Error::InvalidConfig(
            "backup prime must exceed the modulus".into(),
        ));
    }

    let polynomial = ShamirPolynomial::random(
        additive_share,
        config.threshold - 1,
        backup_prime,
        rng,
    );

    for peer in config.peers() {
        let share = BackupShare {
            from: config.party_id,
            to: peer,
            value: polynomial.evaluate(peer as u64 + 1),
        };
        relay
            .send_direct(&config.session_id, ROUND_BACKUP, peer, &share)
            .await?;
    }

    let received: Vec<BackupShare> = mpc::collect_direct_within(
        relay,
        config,
        ROUND_BACKUP,
        config.n_parties() - 1,
        "backup shares",
    )
    .await?;
    let received = mpc::index_by_sender(config, received)?;

    let mut total = polynomial.evaluate(config.party_id as u64 + 1);
    for (from, share) in received {
        if from == config.party_id || share.to != config.party_id {
            return Err(Error::invalid_share(from, "backup share misaddressed"));
        }
        if share.value.is_negative() || &share.value >= backup_prime {
            return Err(Error::invalid_share(from, "backup share outside F_P"));
        }
        total += share.value;
    }
    let polynomial_share = arith::modulo(&total, backup_prime);
    debug!("Backup shares combined");

    Ok(KeyShare {
        party_id: config.party_id,
        registry: config.parties.clone(),
        threshold: config.threshold,
        public_key: public_key.clone(),
        backup_prime: backup_prime.clone(),
        additive_share: additive_share.clone(),
        polynomial_share,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arith::CryptoRandom;
    use crate::keygen::deal;
    use crate::mpc::MemoryRelay;
    use crate::sharing::interpolate_at_zero;
    use crate::testing::session_configs;
    use crate::ProtocolParams;
    use futures_util::future::join_all;
    use num_traits::Zero;
    use std::time::Duration;

    #[tokio::test]
    async fn test_any_threshold_subset_recovers_exponent() {
        let registry = [0, 1, 2, 5, 6];
        let params = ProtocolParams {
            prime_bits: 48,
            ..Default::default()
        };
        let dealt = deal(&registry, &params, &mut CryptoRandom::seeded(70)).unwrap();
        let relay = MemoryRelay::new();
        let configs = session_configs(&registry, 3, Duration::from_secs(5));
        let mut rngs: Vec<_> = (0..5).map(|i| CryptoRandom::seeded(71 + i)).collect();

        let relay = &relay;
        let dealt = &dealt;
        let futures = configs.iter().zip(rngs.iter_mut()).map(|(config, rng)| async move {
            run_share_backup(
                config,
                &dealt.public_key,
                &dealt.backup_prime,
                &dealt.additive_shares[&config.party_id],
                rng,
                relay,
            )
            .await
        });
        let shares: Vec<KeyShare> = join_all(futures)
            .await
            .into_iter()
            .map(|r| r.unwrap())
            .collect();

        let d = dealt
            .additive_shares
            .values()
            .fold(BigInt::zero(), |acc, v| acc + v);
        let d = arith::modulo(&d, &dealt.backup_prime);

        for subset in [[0usize, 1, 2], [0, 3, 4], [1, 2, 4]] {
            let evaluations: Vec<(u64, BigInt)> = subset
                .iter()
                .map(|&i| (shares[i].party_id as u64 + 1, shares[i].polynomial_share.clone()))
                .collect();
            assert_eq!(
                interpolate_at_zero(&evaluations, &dealt.backup_prime).unwrap(),
                d
            );
        }
        assert_eq!(shares[3].registry, registry.to_vec());
    }
}
