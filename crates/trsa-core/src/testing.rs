//! Shared fixtures for protocol tests

use crate::arith::CryptoRandom;
use crate::keygen::deal;
use crate::mpc::{async_trait, MemoryRelay, Relay};
use crate::sharing::split_polynomial;
use crate::{KeyShare, PartyId, ProtocolParams, Result, SessionConfig, SessionId};
use num_bigint::BigInt;
use num_traits::Zero;
use serde::{de::DeserializeOwned, Serialize};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// One session configuration per party, all on the same session id.
pub(crate) fn session_configs(
    parties: &[PartyId],
    threshold: usize,
    timeout: Duration,
) -> Vec<SessionConfig> {
    parties
        .iter()
        .map(|&id| {
            SessionConfig::new([7u8; 32], id, parties, threshold)
                .unwrap()
                .with_timeout(timeout)
        })
        .collect()
}

/// Dealer key shares with the backup computed locally instead of over a relay.
pub(crate) fn dealt_keys(
    registry: &[PartyId],
    threshold: usize,
    prime_bits: u64,
    seed: u64,
) -> Vec<KeyShare> {
    let mut rng = CryptoRandom::seeded(seed);
    let params = ProtocolParams {
        prime_bits,
        ..Default::default()
    };
    let dealt = deal(registry, &params, &mut rng).unwrap();
    let d = dealt
        .additive_shares
        .values()
        .fold(BigInt::zero(), |acc, d_i| acc + d_i);
    let owners: Vec<PartyId> = dealt.additive_shares.keys().copied().collect();
    let shares =
        split_polynomial(&d, &owners, threshold - 1, &dealt.backup_prime, &mut rng).unwrap();

    shares
        .into_iter()
        .map(|share| KeyShare {
            party_id: share.owner,
            registry: owners.clone(),
            threshold,
            public_key: dealt.public_key.clone(),
            backup_prime: dealt.backup_prime.clone(),
            additive_share: dealt.additive_shares[&share.owner].clone(),
            polynomial_share: share.value,
        })
        .collect()
}

/// Relay that loses or rewrites chosen broadcasts on top of a `MemoryRelay`.
#[derive(Clone, Default)]
pub(crate) struct FaultyRelay {
    pub(crate) inner: MemoryRelay,
    dropped_broadcasts: Arc<AtomicUsize>,
    rewrite: Option<Rewrite>,
}

#[derive(Clone)]
struct Rewrite {
    round: u32,
    from: PartyId,
    field: &'static str,
    value: serde_json::Value,
}

impl FaultyRelay {
    /// Swallow the next `count` broadcasts of any session.
    pub(crate) fn drop_next_broadcasts(&self, count: usize) {
        self.dropped_broadcasts.store(count, Ordering::SeqCst);
    }

    /// Replace `field` in every broadcast `from` sends in `round`.
    pub(crate) fn rewriting<T: Serialize>(
        round: u32,
        from: PartyId,
        field: &'static str,
        value: &T,
    ) -> Self {
        Self {
            rewrite: Some(Rewrite {
                round,
                from,
                field,
                value: serde_json::to_value(value).unwrap(),
            }),
            ..Default::default()
        }
    }

    fn take_drop(&self) -> bool {
        self.dropped_broadcasts
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

#[async_trait]
impl Relay for FaultyRelay {
    async fn broadcast<T: Serialize + Send + Sync>(
        &self,
        session_id: &SessionId,
        round: u32,
        message: &T,
    ) -> Result<()> {
        if self.take_drop() {
            return Ok(());
        }
        let mut value = serde_json::to_value(message)?;
        if let Some(rewrite) = &self.rewrite {
            let sender = serde_json::Value::from(rewrite.from);
            if rewrite.round == round
                && value.get("from") == Some(&sender)
                && value.get(rewrite.field).is_some()
            {
                value[rewrite.field] = rewrite.value.clone();
            }
        }
        self.inner.broadcast(session_id, round, &value).await
    }

    async fn send_direct<T: Serialize + Send + Sync>(
        &self,
        session_id: &SessionId,
        round: u32,
        to: PartyId,
        message: &T,
    ) -> Result<()> {
        self.inner.send_direct(session_id, round, to, message).await
    }

    async fn collect_broadcasts<T: DeserializeOwned + Send>(
        &self,
        session_id: &SessionId,
        round: u32,
        count: usize,
    ) -> Result<Vec<T>> {
        self.inner.collect_broadcasts(session_id, round, count).await
    }

    async fn collect_direct<T: DeserializeOwned + Send>(
        &self,
        session_id: &SessionId,
        round: u32,
        my_id: PartyId,
        count: usize,
    ) -> Result<Vec<T>> {
        self.inner.collect_direct(session_id, round, my_id, count).await
    }

    fn discard_session(&self, session_id: &SessionId) {
        self.inner.discard_session(session_id);
    }
}
