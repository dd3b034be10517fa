//! In-memory relay shared by parties running in one process

use super::{async_trait, Relay};
use crate::{Error, PartyId, Result, SessionId};
use dashmap::DashMap;
use serde::{de::DeserializeOwned, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;

/// Poll interval used in case a notification is missed
const POLL_INTERVAL: Duration = Duration::from_millis(100);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum Mailbox {
    Broadcast { session_id: SessionId, round: u32 },
    Direct { session_id: SessionId, round: u32, to: PartyId },
}

impl Mailbox {
    fn session_id(&self) -> &SessionId {
        match self {
            Mailbox::Broadcast { session_id, .. } => session_id,
            Mailbox::Direct { session_id, .. } => session_id,
        }
    }
}

/// In-memory message relay for local simulation and tests
#[derive(Clone)]
pub struct MemoryRelay {
    /// Serialized messages per mailbox, in arrival order
    mailboxes: Arc<DashMap<Mailbox, Vec<Vec<u8>>>>,
    /// Wakes collectors when a message lands
    notify: broadcast::Sender<()>,
}

impl MemoryRelay {
    /// Create a new in-memory relay
    pub fn new() -> Self {
        let (notify, _) = broadcast::channel(256);
        Self {
            mailboxes: Arc::new(DashMap::new()),
            notify,
        }
    }

    /// Number of messages currently held
    pub fn pending(&self) -> usize {
        self.mailboxes.iter().map(|entry| entry.value().len()).sum()
    }

    fn deposit(&self, mailbox: Mailbox, bytes: Vec<u8>) {
        self.mailboxes.entry(mailbox).or_default().push(bytes);
        let _ = self.notify.send(());
    }

    async fn collect<T: DeserializeOwned>(
        &self,
        mailbox: Mailbox,
        count: usize,
    ) -> Result<Vec<T>> {
        let mut rx = self.notify.subscribe();

        loop {
            if let Some(messages) = self.mailboxes.get(&mailbox) {
                if messages.len() >= count {
                    return messages
                        .iter()
                        .take(count)
                        .map(|bytes| deserialize(bytes))
                        .collect();
                }
            }

            tokio::select! {
                _ = rx.recv() => continue,
                _ = tokio::time::sleep(POLL_INTERVAL) => continue,
            }
        }
    }
}

impl Default for MemoryRelay {
    fn default() -> Self {
        Self::new()
    }
}

fn serialize<T: Serialize>(value: &T) -> Result<Vec<u8>> {
    serde_json::to_vec(value).map_err(|e| Error::Serialization(e.to_string()))
}

fn deserialize<T: DeserializeOwned>(bytes: &[u8]) -> Result<T> {
    serde_json::from_slice(bytes).map_err(|e| Error::Deserialization(e.to_string()))
}

#[async_trait]
impl Relay for MemoryRelay {
    async fn broadcast<T: Serialize + Send + Sync>(
        &self,
        session_id: &SessionId,
        round: u32,
        message: &T,
    ) -> Result<()> {
        let bytes = serialize(message)?;
        self.deposit(
            Mailbox::Broadcast {
                session_id: *session_id,
                round,
            },
            bytes,
        );
        Ok(())
    }

    async fn send_direct<T: Serialize + Send + Sync>(
        &self,
        session_id: &SessionId,
        round: u32,
        to: PartyId,
        message: &T,
    ) -> Result<()> {
        let bytes = serialize(message)?;
        self.deposit(
            Mailbox::Direct {
                session_id: *session_id,
                round,
                to,
            },
            bytes,
        );
        Ok(())
    }

    async fn collect_broadcasts<T: DeserializeOwned + Send>(
        &self,
        session_id: &SessionId,
        round: u32,
        count: usize,
    ) -> Result<Vec<T>> {
        self.collect(
            Mailbox::Broadcast {
                session_id: *session_id,
                round,
            },
            count,
        )
        .await
    }

    async fn collect_direct<T: DeserializeOwned + Send>(
        &self,
        session_id: &SessionId,
        round: u32,
        my_id: PartyId,
        count: usize,
    ) -> Result<Vec<T>> {
        self.collect(
            Mailbox::Direct {
                session_id: *session_id,
                round,
                to: my_id,
            },
            count,
        )
        .await
    }

    fn discard_session(&self, session_id: &SessionId) {
        self.mailboxes.retain(|mailbox, _| mailbox.session_id() != session_id);
    }
}
