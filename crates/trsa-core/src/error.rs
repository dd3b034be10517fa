//! Error types for threshold RSA operations

use crate::PartyId;
use thiserror::Error;

/// Result type alias for threshold RSA operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur during protocol execution
#[derive(Debug, Error)]
pub enum Error {
    /// Invalid party or protocol configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Not enough active contributors for reconstruction or multiplication
    #[error("Insufficient quorum: required {required}, got {actual}")]
    InsufficientQuorum { required: usize, actual: usize },

    /// A candidate factor was divisible by a sieving prime
    #[error("Candidate rejected: {0}")]
    CandidateRejected(String),

    /// Presignature material does not match the active membership
    #[error("Stale presignature bundle: current epoch {epoch}, members {members:?}")]
    StaleBundle { epoch: u64, members: Vec<PartyId> },

    /// A blocking collection did not complete before its deadline
    #[error("Timeout waiting for {0}")]
    CommunicationTimeout(String),

    /// A received share failed a local consistency check
    #[error("Invalid share from party {from}: {reason}")]
    InvalidShare { from: PartyId, reason: String },

    /// Invalid party ID
    #[error("Invalid party ID: {0}")]
    InvalidPartyId(PartyId),

    /// Verification of a public value failed
    #[error("Verification failed: {0}")]
    VerificationFailed(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Deserialization error
    #[error("Deserialization error: {0}")]
    Deserialization(String),

    /// Arithmetic or primitive failure
    #[error("Cryptographic error: {0}")]
    Crypto(String),

    /// Network/relay error
    #[error("Relay error: {0}")]
    Relay(String),

    /// Combined signature does not verify under the public key
    #[error("Invalid signature")]
    InvalidSignature,

    /// Modulus generation ran out of candidate attempts
    #[error("No candidate modulus accepted after {attempts} attempts")]
    SieveExhausted { attempts: usize },

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Whether the failed round may be retried with fresh randomness.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Error::CandidateRejected(_) | Error::CommunicationTimeout(_)
        )
    }

    pub(crate) fn invalid_share(from: PartyId, reason: impl Into<String>) -> Self {
        Error::InvalidShare {
            from,
            reason: reason.into(),
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}
