//! Quorum state machine

use super::{Party, QuorumState, SignOutcome};
use crate::arith::CryptoRandom;
use crate::keygen::{deal, run_share_backup};
use crate::mpc::Relay;
use crate::presign::run_presign;
use crate::sign::run_threshold_sign;
use crate::types::derive_session_id;
use crate::{
    Error, KeyShare, PartyId, ProtocolParams, Result, RsaPublicKey, RsaSignature, SessionConfig,
    SessionId,
};
use futures_util::future::join_all;
use std::collections::BTreeMap;
use tracing::{debug, info, instrument, warn};

/// Owns the parties of one key and runs presign and sign for the active set
pub struct QuorumCoordinator<R: Relay> {
    relay: R,
    params: ProtocolParams,
    public_key: RsaPublicKey,
    threshold: usize,
    parties: BTreeMap<PartyId, Party>,
    epoch: u64,
    state: QuorumState,
    presign_counter: u64,
    sign_counter: u64,
}

impl<R: Relay> QuorumCoordinator<R> {
    /// Coordinator over parties holding shares of the same key.
    ///
    /// Every party starts inactive; the state is `Idle`.
    pub fn new(relay: R, parties: Vec<Party>, params: ProtocolParams) -> Result<Self> {
        let first = parties
            .first()
            .ok_or_else(|| Error::InvalidConfig("no parties".into()))?;
        let public_key = first.key.public_key.clone();
        let threshold = first.key.threshold;
        let registry = first.key.registry.clone();

        let mut map = BTreeMap::new();
        for party in parties {
            let key = &party.key;
            if key.public_key != public_key
                || key.threshold != threshold
                || key.registry != registry
            {
                return Err(Error::InvalidConfig(format!(
                    "party {} holds a share of a different key",
                    party.id
                )));
            }
            if !registry.contains(&party.id) {
                return Err(Error::InvalidPartyId(party.id));
            }
            if map.insert(party.id, party).is_some() {
                return Err(Error::InvalidConfig("duplicate party".into()));
            }
        }

        Ok(Self {
            relay,
            params,
            public_key,
            threshold,
            parties: map,
            epoch: 0,
            state: QuorumState::Idle,
            presign_counter: 0,
            sign_counter: 0,
        })
    }

    /// Coordinator over key shares loaded from storage.
    pub fn from_key_shares(
        relay: R,
        keys: Vec<KeyShare>,
        active: &[PartyId],
        params: ProtocolParams,
    ) -> Result<Self> {
        let parties = keys.into_iter().map(Party::new).collect();
        let mut coordinator = Self::new(relay, parties, params)?;
        for id in active {
            coordinator
                .parties
                .get_mut(id)
                .ok_or(Error::InvalidPartyId(*id))?
                .active = true;
        }
        Ok(coordinator)
    }

    /// Deal a fresh key to `registry`, back it up and presign for `active`.
    ///
    /// Ends in `Ready` when `active` reaches the threshold, otherwise in
    /// `AwaitingPresign`.
    #[instrument(skip(relay, params))]
    pub async fn with_dealer(
        relay: R,
        registry: &[PartyId],
        threshold: usize,
        active: &[PartyId],
        params: ProtocolParams,
    ) -> Result<Self> {
        let mut dealer_rng = CryptoRandom::os();
        let dealt = deal(registry, &params, &mut dealer_rng)?;
        let registry: Vec<PartyId> = dealt.additive_shares.keys().copied().collect();
        let session_id = derive_session_id("backup", &registry, 0, 0);

        let mut rngs: Vec<CryptoRandom> = registry.iter().map(|_| CryptoRandom::os()).collect();
        let futures = registry
            .iter()
            .zip(rngs.iter_mut())
            .map(|(&id, rng)| {
                let relay = &relay;
                let dealt = &dealt;
                let registry = &registry;
                let timeout = params.round_timeout;
                async move {
                    let config = SessionConfig::new(session_id, id, registry, threshold)?
                        .with_timeout(timeout);
                    run_share_backup(
                        &config,
                        &dealt.public_key,
                        &dealt.backup_prime,
                        &dealt.additive_shares[&id],
                        rng,
                        relay,
                    )
                    .await
                }
            });
        let keys = join_all(futures)
            .await
            .into_iter()
            .collect::<Result<Vec<KeyShare>>>()?;

        let mut coordinator = Self::from_key_shares(relay, keys, active, params)?;
        if coordinator.active_members().len() >= threshold {
            coordinator.refresh_presignatures().await?;
        } else {
            coordinator.state = QuorumState::AwaitingPresign;
        }
        Ok(coordinator)
    }

    /// Group public key
    pub fn public_key(&self) -> &RsaPublicKey {
        &self.public_key
    }

    /// Minimum quorum size
    pub fn threshold(&self) -> usize {
        self.threshold
    }

    /// Current membership epoch
    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    /// Current lifecycle state
    pub fn state(&self) -> QuorumState {
        self.state
    }

    /// Every registered party ID
    pub fn registry(&self) -> Vec<PartyId> {
        self.parties.keys().copied().collect()
    }

    /// Active party IDs, ascending
    pub fn active_members(&self) -> Vec<PartyId> {
        self.parties
            .values()
            .filter(|p| p.active)
            .map(|p| p.id)
            .collect()
    }

    /// A registered party
    pub fn party(&self, id: PartyId) -> Option<&Party> {
        self.parties.get(&id)
    }

    /// Bring a party into the quorum.
    pub fn activate(&mut self, id: PartyId) -> Result<()> {
        self.set_active(id, true)
    }

    /// Take a party out of the quorum.
    pub fn deactivate(&mut self, id: PartyId) -> Result<()> {
        self.set_active(id, false)
    }

    fn set_active(&mut self, id: PartyId, active: bool) -> Result<()> {
        let party = self.parties.get_mut(&id).ok_or(Error::InvalidPartyId(id))?;
        if party.active == active {
            return Ok(());
        }
        party.active = active;

        self.epoch += 1;
        for party in self.parties.values_mut() {
            party.bundle = None;
        }
        self.state = QuorumState::AwaitingPresign;
        info!(
            party_id = id,
            active,
            epoch = self.epoch,
            members = ?self.active_members(),
            "Membership changed"
        );
        Ok(())
    }

    fn session_config(
        &self,
        session_id: SessionId,
        id: PartyId,
        members: &[PartyId],
    ) -> Result<SessionConfig> {
        Ok(SessionConfig::new(session_id, id, members, self.threshold)?
            .with_epoch(self.epoch)
            .with_timeout(self.params.round_timeout))
    }

    /// Run presign for the current membership, retrying timed out rounds.
    #[instrument(skip(self), fields(epoch = self.epoch))]
    pub async fn refresh_presignatures(&mut self) -> Result<()> {
        let members = self.active_members();
        if members.len() < self.threshold {
            return Err(Error::InsufficientQuorum {
                required: self.threshold,
                actual: members.len(),
            });
        }

        let mut last_error = None;
        for attempt in 0..=self.params.max_round_retries {
            let session_id =
                derive_session_id("presign", &members, self.epoch, self.presign_counter);
            self.presign_counter += 1;

            let configs = members
                .iter()
                .map(|&id| self.session_config(session_id, id, &members))
                .collect::<Result<Vec<_>>>()?;

            let relay = &self.relay;
            let futures = self
                .parties
                .values_mut()
                .filter(|p| p.active)
                .zip(&configs)
                .map(|(party, config)| async move {
                    let Party { id, key, rng, .. } = party;
                    run_presign(key, config, rng.as_mut(), relay)
                        .await
                        .map(|bundle| (*id, bundle))
                });
            let results = join_all(futures).await;
            self.relay.discard_session(&session_id);

            match results.into_iter().collect::<Result<Vec<_>>>() {
                Ok(bundles) => {
                    for (id, bundle) in bundles {
                        if let Some(party) = self.parties.get_mut(&id) {
                            party.bundle = Some(bundle);
                        }
                    }
                    self.state = QuorumState::Ready;
                    info!(members = ?members, "Presignatures ready");
                    return Ok(());
                }
                Err(e) if e.is_recoverable() => {
                    warn!(attempt, error = %e, "Presign round failed, retrying");
                    last_error = Some(e);
                }
                Err(e) => return Err(e),
            }
        }

        Err(last_error.unwrap_or_else(|| Error::Internal("presign never ran".into())))
    }

    /// Sign `message` with the current quorum.
    ///
    /// Without bundles for the current membership this regenerates them and
    /// returns `StaleBundle`; calling again then succeeds.
    #[instrument(skip(self, message), fields(epoch = self.epoch))]
    pub async fn sign(&mut self, message: &[u8]) -> Result<SignOutcome> {
        let members = self.active_members();
        if members.len() < self.threshold {
            return Err(Error::InsufficientQuorum {
                required: self.threshold,
                actual: members.len(),
            });
        }

        match self.state {
            QuorumState::Idle | QuorumState::AwaitingPresign => {
                debug!("No bundles for the current membership");
                self.refresh_presignatures().await?;
                return Err(Error::StaleBundle {
                    epoch: self.epoch,
                    members,
                });
            }
            QuorumState::Ready | QuorumState::Settled | QuorumState::Signing => {}
        }

        self.state = QuorumState::Signing;
        let mut last_error = None;
        for attempt in 0..=self.params.max_round_retries {
            match self.sign_with_bundles(&members, message).await {
                Ok(signature) => {
                    self.state = QuorumState::Settled;
                    info!(members = ?members, "Message signed");
                    return Ok(SignOutcome { signature, members });
                }
                Err(e) if e.is_recoverable() => {
                    warn!(attempt, error = %e, "Sign round failed, retrying");
                    last_error = Some(e);
                }
                Err(e) => {
                    self.state = QuorumState::Ready;
                    return Err(e);
                }
            }
        }

        self.state = QuorumState::Ready;
        Err(last_error.unwrap_or_else(|| Error::Internal("sign never ran".into())))
    }

    async fn sign_with_bundles(
        &mut self,
        members: &[PartyId],
        message: &[u8],
    ) -> Result<RsaSignature> {
        let session_id = derive_session_id("sign", members, self.epoch, self.sign_counter);
        self.sign_counter += 1;

        let configs = members
            .iter()
            .map(|&id| self.session_config(session_id, id, members))
            .collect::<Result<Vec<_>>>()?;

        let relay = &self.relay;
        let epoch = self.epoch;
        let futures = self
            .parties
            .values()
            .filter(|p| p.active)
            .zip(&configs)
            .map(|(party, config)| async move {
                let bundle = party.bundle.as_ref().ok_or_else(|| Error::StaleBundle {
                    epoch,
                    members: config.parties.clone(),
                })?;
                run_threshold_sign(&party.key, bundle, config, message, relay).await
            });

        let results = join_all(futures).await;
        self.relay.discard_session(&session_id);

        let signatures = results.into_iter().collect::<Result<Vec<_>>>()?;
        let signature = signatures
            .into_iter()
            .next()
            .ok_or_else(|| Error::Internal("no signers".into()))?;
        Ok(signature)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mpc::MemoryRelay;
    use crate::testing::{dealt_keys, FaultyRelay};
    use std::time::Duration;

    fn params() -> ProtocolParams {
        ProtocolParams {
            prime_bits: 64,
            round_timeout: Duration::from_secs(5),
            ..Default::default()
        }
    }

    fn seeded_coordinator(active: &[PartyId]) -> QuorumCoordinator<MemoryRelay> {
        let parties = dealt_keys(&[0, 1, 2, 5, 6], 3, 64, 170)
            .into_iter()
            .map(|key| {
                let seed = 180 + key.party_id as u64;
                Party::with_rng(key, Box::new(CryptoRandom::seeded(seed)))
            })
            .collect();
        let mut coordinator =
            QuorumCoordinator::new(MemoryRelay::new(), parties, params()).unwrap();
        for id in active {
            coordinator.activate(*id).unwrap();
        }
        coordinator
    }

    async fn assert_signs(
        coordinator: &mut QuorumCoordinator<MemoryRelay>,
        message: &[u8],
        members: &[PartyId],
    ) {
        let outcome = coordinator.sign(message).await.unwrap();
        assert_eq!(outcome.members, members);
        assert!(coordinator.public_key().verify(message, &outcome.signature));
        assert_eq!(coordinator.state(), QuorumState::Settled);
    }

    async fn assert_stale(
        coordinator: &mut QuorumCoordinator<MemoryRelay>,
        message: &[u8],
        members: &[PartyId],
    ) {
        match coordinator.sign(message).await {
            Err(Error::StaleBundle { members: reported, epoch }) => {
                assert_eq!(reported, members);
                assert_eq!(epoch, coordinator.epoch());
            }
            other => panic!("expected stale bundle, got {:?}", other),
        }
        assert_eq!(coordinator.state(), QuorumState::Ready);
    }

    #[tokio::test]
    async fn test_first_sign_presigns() {
        let keys = dealt_keys(&[0, 1, 2], 2, 64, 171);
        let mut coordinator =
            QuorumCoordinator::from_key_shares(MemoryRelay::new(), keys, &[0, 2], params())
                .unwrap();
        assert_eq!(coordinator.state(), QuorumState::Idle);
        assert_eq!(coordinator.epoch(), 0);

        assert_stale(&mut coordinator, b"apples", &[0, 2]).await;
        assert_signs(&mut coordinator, b"apples", &[0, 2]).await;
    }

    #[tokio::test]
    async fn test_quorum_churn() {
        let mut coordinator = seeded_coordinator(&[0, 1, 2]);
        coordinator.refresh_presignatures().await.unwrap();
        assert_eq!(coordinator.state(), QuorumState::Ready);
        assert_signs(&mut coordinator, b"apples", &[0, 1, 2]).await;

        coordinator.activate(5).unwrap();
        assert_eq!(coordinator.state(), QuorumState::AwaitingPresign);
        assert_stale(&mut coordinator, b"bloop", &[0, 1, 2, 5]).await;
        assert_signs(&mut coordinator, b"bloop", &[0, 1, 2, 5]).await;

        coordinator.activate(6).unwrap();
        assert_stale(&mut coordinator, b"candy", &[0, 1, 2, 5, 6]).await;
        assert_signs(&mut coordinator, b"candy", &[0, 1, 2, 5, 6]).await;

        coordinator.deactivate(5).unwrap();
        assert_stale(&mut coordinator, b"doodle", &[0, 1, 2, 6]).await;
        assert_signs(&mut coordinator, b"doodle", &[0, 1, 2, 6]).await;

        coordinator.activate(5).unwrap();
        assert_stale(&mut coordinator, b"elephant", &[0, 1, 2, 5, 6]).await;
        assert_signs(&mut coordinator, b"elephant", &[0, 1, 2, 5, 6]).await;
    }

    #[tokio::test]
    async fn test_repeated_signing_reuses_bundles() {
        let mut coordinator = seeded_coordinator(&[0, 2, 6]);
        coordinator.refresh_presignatures().await.unwrap();
        let epoch = coordinator.epoch();

        let first = coordinator.sign(b"apples").await.unwrap();
        let second = coordinator.sign(b"apples").await.unwrap();
        assert_eq!(first, second);
        assert_signs(&mut coordinator, b"bloop", &[0, 2, 6]).await;
        assert_eq!(coordinator.epoch(), epoch);
    }

    #[tokio::test]
    async fn test_relay_drained_after_each_round() {
        let mut coordinator = seeded_coordinator(&[0, 1, 2]);
        coordinator.refresh_presignatures().await.unwrap();
        assert_eq!(coordinator.relay.pending(), 0);

        for _ in 0..20 {
            coordinator.sign(b"apples").await.unwrap();
        }
        assert_eq!(coordinator.relay.pending(), 0);
    }

    fn flaky_coordinator(
        relay: &FaultyRelay,
        max_round_retries: usize,
    ) -> QuorumCoordinator<FaultyRelay> {
        let params = ProtocolParams {
            round_timeout: Duration::from_millis(300),
            max_round_retries,
            ..params()
        };
        let parties = dealt_keys(&[0, 1, 2], 2, 64, 172)
            .into_iter()
            .map(|key| {
                let seed = 190 + key.party_id as u64;
                Party::with_rng(key, Box::new(CryptoRandom::seeded(seed)))
            })
            .collect();
        let mut coordinator = QuorumCoordinator::new(relay.clone(), parties, params).unwrap();
        coordinator.activate(0).unwrap();
        coordinator.activate(2).unwrap();
        coordinator
    }

    #[tokio::test]
    async fn test_timed_out_rounds_are_retried() {
        let relay = FaultyRelay::default();
        let mut coordinator = flaky_coordinator(&relay, 3);

        relay.drop_next_broadcasts(1);
        coordinator.refresh_presignatures().await.unwrap();
        assert_eq!(coordinator.state(), QuorumState::Ready);

        relay.drop_next_broadcasts(1);
        let outcome = coordinator.sign(b"apples").await.unwrap();
        assert_eq!(outcome.members, vec![0, 2]);
        assert!(coordinator.public_key().verify(b"apples", &outcome.signature));
        assert_eq!(coordinator.state(), QuorumState::Settled);
        assert_eq!(relay.inner.pending(), 0);
    }

    #[tokio::test]
    async fn test_sign_retries_exhausted() {
        let relay = FaultyRelay::default();
        let mut coordinator = flaky_coordinator(&relay, 1);
        coordinator.refresh_presignatures().await.unwrap();

        relay.drop_next_broadcasts(usize::MAX);
        assert!(matches!(
            coordinator.sign(b"apples").await,
            Err(Error::CommunicationTimeout(_))
        ));
        assert_eq!(coordinator.state(), QuorumState::Ready);
        assert!(coordinator.party(0).unwrap().bundle.is_some());
    }

    #[tokio::test]
    async fn test_below_threshold() {
        let mut coordinator = seeded_coordinator(&[0, 1, 2]);
        coordinator.refresh_presignatures().await.unwrap();
        coordinator.deactivate(1).unwrap();

        assert!(matches!(
            coordinator.sign(b"apples").await,
            Err(Error::InsufficientQuorum { required: 3, actual: 2 })
        ));
        // no regeneration happened
        assert_eq!(coordinator.state(), QuorumState::AwaitingPresign);
        assert!(coordinator.party(0).unwrap().bundle.is_none());
    }

    #[test]
    fn test_membership_events() {
        let mut coordinator = seeded_coordinator(&[0, 1, 2]);
        let epoch = coordinator.epoch();

        coordinator.activate(1).unwrap();
        assert_eq!(coordinator.epoch(), epoch);

        coordinator.deactivate(2).unwrap();
        assert_eq!(coordinator.epoch(), epoch + 1);
        assert_eq!(coordinator.active_members(), vec![0, 1]);

        assert!(matches!(
            coordinator.activate(3),
            Err(Error::InvalidPartyId(3))
        ));
        assert_eq!(coordinator.registry(), vec![0, 1, 2, 5, 6]);
    }

    #[tokio::test]
    async fn test_dealer_bootstrap_is_ready() {
        let registry = [0, 1, 2, 5, 6];
        let mut coordinator =
            QuorumCoordinator::with_dealer(MemoryRelay::new(), &registry, 3, &[0, 1, 2], params())
                .await
                .unwrap();
        assert_eq!(coordinator.state(), QuorumState::Ready);
        assert_signs(&mut coordinator, b"apples", &[0, 1, 2]).await;
    }
}
