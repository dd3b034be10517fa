//! MPC coordination utilities

use crate::{Error, PartyId, Result, SessionConfig, SessionId};
use serde::{de::DeserializeOwned, Serialize};
use std::collections::BTreeMap;
use std::future::Future;
use std::time::Duration;
use tracing::warn;

pub use ::async_trait::async_trait;

/// Message relay trait for MPC communication
#[async_trait]
pub trait Relay: Send + Sync {
    /// Broadcast a message to all parties
    async fn broadcast<T: Serialize + Send + Sync>(
        &self,
        session_id: &SessionId,
        round: u32,
        message: &T,
    ) -> Result<()>;

    /// Send a direct message to a specific party
    async fn send_direct<T: Serialize + Send + Sync>(
        &self,
        session_id: &SessionId,
        round: u32,
        to: PartyId,
        message: &T,
    ) -> Result<()>;

    /// Collect broadcast messages from all parties
    async fn collect_broadcasts<T: DeserializeOwned + Send>(
        &self,
        session_id: &SessionId,
        round: u32,
        count: usize,
    ) -> Result<Vec<T>>;

    /// Collect direct messages sent to this party
    async fn collect_direct<T: DeserializeOwned + Send>(
        &self,
        session_id: &SessionId,
        round: u32,
        my_id: PartyId,
        count: usize,
    ) -> Result<Vec<T>>;

    /// Drop whatever the relay still holds for a finished session
    fn discard_session(&self, _session_id: &SessionId) {}
}

/// In-memory relay for testing
pub mod memory;

pub use memory::MemoryRelay;

/// Protocol messages that name their sender.
pub trait Addressed {
    /// Sender party ID
    fn sender(&self) -> PartyId;
}

async fn within<F, T>(timeout: Duration, what: &str, fut: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    match tokio::time::timeout(timeout, fut).await {
        Ok(result) => result,
        Err(_) => {
            warn!(what, ?timeout, "Collection deadline elapsed");
            Err(Error::CommunicationTimeout(what.to_string()))
        }
    }
}

/// Collect `count` broadcasts of a round before the session deadline.
pub async fn collect_broadcasts_within<R, T>(
    relay: &R,
    config: &SessionConfig,
    round: u32,
    count: usize,
    what: &str,
) -> Result<Vec<T>>
where
    R: Relay,
    T: DeserializeOwned + Send,
{
    within(
        config.timeout,
        what,
        relay.collect_broadcasts(&config.session_id, round, count),
    )
    .await
}

/// Collect `count` direct messages of a round before the session deadline.
pub async fn collect_direct_within<R, T>(
    relay: &R,
    config: &SessionConfig,
    round: u32,
    count: usize,
    what: &str,
) -> Result<Vec<T>>
where
    R: Relay,
    T: DeserializeOwned + Send,
{
    within(
        config.timeout,
        what,
        relay.collect_direct(&config.session_id, round, config.party_id, count),
    )
    .await
}

/// Broadcast this party's message and collect one from every member.
pub async fn exchange_broadcast<R, T>(
    relay: &R,
    config: &SessionConfig,
    round: u32,
    message: &T,
    what: &str,
) -> Result<BTreeMap<PartyId, T>>
where
    R: Relay,
    T: Serialize + DeserializeOwned + Addressed + Send + Sync,
{
    relay.broadcast(&config.session_id, round, message).await?;
    let messages =
        collect_broadcasts_within(relay, config, round, config.n_parties(), what).await?;
    index_by_sender(config, messages)
}

/// Key messages by sender, rejecting strangers and duplicates.
pub fn index_by_sender<T: Addressed>(
    config: &SessionConfig,
    messages: Vec<T>,
) -> Result<BTreeMap<PartyId, T>> {
    let mut indexed = BTreeMap::new();
    for message in messages {
        let from = message.sender();
        if config.position_of(from).is_err() {
            return Err(Error::invalid_share(from, "sender is not a session member"));
        }
        if indexed.insert(from, message).is_some() {
            return Err(Error::invalid_share(from, "duplicate message"));
        }
    }
    Ok(indexed)
}
