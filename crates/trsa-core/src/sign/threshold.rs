//! Signature share generation and combination

use super::SignatureShare;
use crate::arith;
use crate::mpc::{self, Relay};
use crate::presign::PresignatureBundle;
use crate::types::product_mod;
use crate::{Error, KeyShare, PartyId, Result, RsaPublicKey, RsaSignature, SessionConfig};
use num_bigint::BigInt;
use num_traits::Signed;
use std::collections::BTreeMap;
use tracing::{debug, info, instrument};

/// Relay round carrying signature shares
const ROUND_SHARES: u32 = 1;

/// c_i = H(m)^{S_I_t_i} mod N.
pub fn create_signature_share(
    public_key: &RsaPublicKey,
    bundle: &PresignatureBundle,
    message: &[u8],
) -> BigInt {
    let h = public_key.message_representative(message);
    arith::powmod(&h, &bundle.signing_exponent, &public_key.modulus)
}

/// Combine one share per member: σ = (prod c_j) * (H(m)^{x_I})⁻¹ mod N.
///
/// The result is checked against the public key before it is returned.
pub fn combine_signature_shares(
    public_key: &RsaPublicKey,
    x_quorum: &BigInt,
    message: &[u8],
    shares: &BTreeMap<PartyId, BigInt>,
) -> Result<RsaSignature> {
    let n = &public_key.modulus;
    let h = public_key.message_representative(message);
    let product = product_mod(shares.values(), n);
    let correction = arith::powmod_signed(&h, &-x_quorum, n)?;
    let signature = RsaSignature::new(arith::modulo(&(product * correction), n));
    public_key.verify_strict(message, &signature)?;
    Ok(signature)
}

/// Produce a signature on `message` with the quorum of `config.parties`.
///
/// The bundle must have been generated for exactly `config.parties` at
/// `config.epoch`; anything else is `StaleBundle` and nothing is sent.
#[instrument(skip_all, fields(party_id = config.party_id, epoch = config.epoch))]
pub async fn run_threshold_sign<R: Relay>(
    key: &KeyShare,
    bundle: &PresignatureBundle,
    config: &SessionConfig,
    message: &[u8],
    relay: &R,
) -> Result<RsaSignature> {
    info!(participants = ?config.parties, "Starting threshold sign");
    bundle.ensure_current(&config.parties, config.epoch)?;

    let own = SignatureShare {
        from: config.party_id,
        value: create_signature_share(&key.public_key, bundle, message),
    };
    let received =
        mpc::exchange_broadcast(relay, config, ROUND_SHARES, &own, "signature shares").await?;

    let n = &key.public_key.modulus;
    let mut shares = BTreeMap::new();
    for (from, share) in received {
        if share.value.is_negative() || &share.value >= n {
            return Err(Error::invalid_share(from, "signature share outside Z_N"));
        }
        shares.insert(from, share.value);
    }
    debug!(shares = shares.len(), "Signature shares collected");

    let signature = combine_signature_shares(&key.public_key, &bundle.x_quorum, message, &shares)?;
    info!("Threshold signature complete");
    Ok(signature)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arith::CryptoRandom;
    use crate::mpc::MemoryRelay;
    use crate::presign::run_presign;
    use crate::testing::{dealt_keys, session_configs};
    use futures_util::future::join_all;
    use std::time::Duration;

    async fn presigned(keys: &[KeyShare], quorum: &[PartyId]) -> Vec<PresignatureBundle> {
        let relay = MemoryRelay::new();
        let configs = session_configs(quorum, 1, Duration::from_secs(5));
        let mut rngs: Vec<_> = (0..quorum.len() as u64)
            .map(|i| CryptoRandom::seeded(150 + i))
            .collect();
        let relay = &relay;
        let futures = configs.iter().zip(rngs.iter_mut()).map(|(config, rng)| {
            let key = keys.iter().find(|k| k.party_id == config.party_id).unwrap();
            async move { run_presign(key, config, rng, relay).await.unwrap() }
        });
        join_all(futures).await
    }

    fn key_of(keys: &[KeyShare], id: PartyId) -> &KeyShare {
        keys.iter().find(|k| k.party_id == id).unwrap()
    }

    #[tokio::test]
    async fn test_quorum_signature_verifies() {
        let keys = dealt_keys(&[0, 1, 2, 5, 6], 3, 64, 160);
        let quorum = [1, 5, 6];
        let bundles = presigned(&keys, &quorum).await;

        let relay = MemoryRelay::new();
        let configs = session_configs(&quorum, 1, Duration::from_secs(5));
        let relay = &relay;
        let keys = &keys;
        let futures = configs.iter().zip(&bundles).map(|(config, bundle)| async move {
            let key = key_of(keys, config.party_id);
            run_threshold_sign(key, bundle, config, b"apples", relay).await
        });
        let signatures: Vec<RsaSignature> = join_all(futures)
            .await
            .into_iter()
            .map(|r| r.unwrap())
            .collect();

        let public_key = &keys[0].public_key;
        assert!(signatures.iter().all(|s| s == &signatures[0]));
        assert!(public_key.verify(b"apples", &signatures[0]));
        assert!(!public_key.verify(b"bloop", &signatures[0]));
    }

    #[tokio::test]
    async fn test_bundle_reusable_offline() {
        let keys = dealt_keys(&[0, 1, 2], 2, 64, 161);
        let bundles = presigned(&keys, &[0, 2]).await;
        let public_key = &keys[0].public_key;

        for message in [&b"apples"[..], b"bloop", b""] {
            let shares: BTreeMap<PartyId, BigInt> = bundles
                .iter()
                .zip([0, 2])
                .map(|(b, id)| (id, create_signature_share(public_key, b, message)))
                .collect();
            let signature =
                combine_signature_shares(public_key, &bundles[0].x_quorum, message, &shares)
                    .unwrap();
            assert!(public_key.verify(message, &signature));
        }
    }

    #[tokio::test]
    async fn test_missing_share_fails_verification() {
        let keys = dealt_keys(&[0, 1, 2], 2, 64, 162);
        let bundles = presigned(&keys, &[0, 1, 2]).await;
        let public_key = &keys[0].public_key;

        let shares: BTreeMap<PartyId, BigInt> = bundles[..2]
            .iter()
            .zip([0, 1])
            .map(|(b, id)| (id, create_signature_share(public_key, b, b"apples")))
            .collect();
        assert!(matches!(
            combine_signature_shares(public_key, &bundles[0].x_quorum, b"apples", &shares),
            Err(Error::InvalidSignature)
        ));
    }

    #[tokio::test]
    async fn test_stale_bundle_refused() {
        let keys = dealt_keys(&[0, 1, 2], 2, 64, 163);
        let bundles = presigned(&keys, &[0, 1]).await;
        let relay = MemoryRelay::new();

        let config = SessionConfig::new([9u8; 32], 0, &[0, 1, 2], 1).unwrap();
        let result = run_threshold_sign(&keys[0], &bundles[0], &config, b"apples", &relay).await;
        match result {
            Err(Error::StaleBundle { members, .. }) => assert_eq!(members, vec![0, 1, 2]),
            other => panic!("expected stale bundle, got {:?}", other),
        }
        assert_eq!(relay.pending(), 0);

        let later = SessionConfig::new([9u8; 32], 0, &[0, 1], 1)
            .unwrap()
            .with_epoch(1);
        assert!(matches!(
            run_threshold_sign(&keys[0], &bundles[0], &later, b"apples", &relay).await,
            Err(Error::StaleBundle { epoch: 1, .. })
        ));
    }
}
