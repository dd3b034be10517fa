//! Core types for the threshold RSA protocols

use crate::arith;
use crate::{Error, Result};
use num_bigint::BigInt;
use num_traits::{One, Zero};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::time::Duration;

/// Unique identifier for a party in the network
pub type PartyId = usize;

/// Unique identifier for a session
pub type SessionId = [u8; 32];

/// Public RSA key shared by the group
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RsaPublicKey {
    /// Modulus N = p * q
    pub modulus: BigInt,
    /// Public exponent e
    pub exponent: BigInt,
}

impl RsaPublicKey {
    /// Create a new public key
    pub fn new(modulus: BigInt, exponent: BigInt) -> Self {
        Self { modulus, exponent }
    }

    /// Hash a message onto `Z_N`.
    pub fn message_representative(&self, message: &[u8]) -> BigInt {
        message_representative(message, &self.modulus)
    }

    /// Check `sigma^e == H(m) mod N`.
    pub fn verify(&self, message: &[u8], signature: &RsaSignature) -> bool {
        let expected = self.message_representative(message);
        arith::powmod(&signature.value, &self.exponent, &self.modulus) == expected
    }

    /// Like [`RsaPublicKey::verify`] but as a `Result`.
    pub fn verify_strict(&self, message: &[u8], signature: &RsaSignature) -> Result<()> {
        if self.verify(message, signature) {
            Ok(())
        } else {
            Err(Error::InvalidSignature)
        }
    }
}

/// SHA-256 of the message, read as an integer and reduced modulo `modulus`.
pub fn message_representative(message: &[u8], modulus: &BigInt) -> BigInt {
    let digest = Sha256::digest(message);
    arith::modulo(&arith::from_bytes(&digest), modulus)
}

/// RSA signature value
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RsaSignature {
    /// sigma in `[0, N)`
    pub value: BigInt,
}

impl RsaSignature {
    /// Create a new signature
    pub fn new(value: BigInt) -> Self {
        Self { value }
    }

    /// Big-endian bytes of the signature value
    pub fn to_bytes(&self) -> Vec<u8> {
        arith::to_bytes(&self.value)
    }

    /// Hex encoding of the signature value
    pub fn to_hex(&self) -> String {
        hex::encode(self.to_bytes())
    }
}

/// Key material held by a party after key setup
#[derive(Clone, Serialize, Deserialize)]
pub struct KeyShare {
    /// This party's ID
    pub party_id: PartyId,

    /// Every party registered at key setup
    pub registry: Vec<PartyId>,

    /// Minimum quorum size able to sign
    pub threshold: usize,

    /// Group public key
    pub public_key: RsaPublicKey,

    /// Prime field used for the polynomial backup of the private exponent
    pub backup_prime: BigInt,

    /// Additive share d_i of the private exponent
    pub additive_share: BigInt,

    /// Polynomial share y_i of the private exponent over the backup field
    pub polynomial_share: BigInt,
}

impl std::fmt::Debug for KeyShare {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyShare")
            .field("party_id", &self.party_id)
            .field("registry", &self.registry)
            .field("threshold", &self.threshold)
            .field("public_key", &self.public_key)
            .finish_non_exhaustive()
    }
}

/// Protocol parameters agreed by every party out of band
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProtocolParams {
    /// Bit length of each RSA prime
    pub prime_bits: u64,

    /// Public exponent e
    pub public_exponent: u64,

    /// Sieve bound B1
    pub sieve_bound: u64,

    /// Upper bound for public trial division of an accepted modulus
    pub trial_division_bound: u64,

    /// Maximum candidates tried by distributed modulus generation
    pub max_sieve_attempts: usize,

    /// Maximum retries of a timed-out presign round
    pub max_round_retries: usize,

    /// Deadline for every blocking collection
    pub round_timeout: Duration,
}

impl Default for ProtocolParams {
    fn default() -> Self {
        Self {
            prime_bits: crate::DEFAULT_PRIME_BITS,
            public_exponent: crate::DEFAULT_PUBLIC_EXPONENT,
            sieve_bound: crate::DEFAULT_SIEVE_BOUND,
            trial_division_bound: crate::DEFAULT_SIEVE_BOUND * 8,
            max_sieve_attempts: 10_000,
            max_round_retries: 3,
            round_timeout: Duration::from_secs(30),
        }
    }
}

/// Configuration of one protocol session
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Session identifier
    pub session_id: SessionId,

    /// This party's ID
    pub party_id: PartyId,

    /// Participating party IDs, sorted ascending
    pub parties: Vec<PartyId>,

    /// Minimum number of parties able to reconstruct
    pub threshold: usize,

    /// Membership epoch the session belongs to
    pub epoch: u64,

    /// Deadline for each blocking collection
    pub timeout: Duration,
}

impl SessionConfig {
    /// Create a new session configuration
    pub fn new(
        session_id: SessionId,
        party_id: PartyId,
        parties: &[PartyId],
        threshold: usize,
    ) -> Result<Self> {
        let mut parties = parties.to_vec();
        parties.sort_unstable();
        parties.dedup();

        if parties.is_empty() {
            return Err(Error::InvalidConfig("Session has no parties".into()));
        }
        if !parties.contains(&party_id) {
            return Err(Error::InvalidPartyId(party_id));
        }
        if threshold == 0 || threshold > parties.len() {
            return Err(Error::InvalidConfig(format!(
                "Threshold {} invalid for {} parties",
                threshold,
                parties.len()
            )));
        }

        Ok(Self {
            session_id,
            party_id,
            parties,
            threshold,
            epoch: 0,
            timeout: Duration::from_secs(30),
        })
    }

    /// Set the membership epoch
    pub fn with_epoch(mut self, epoch: u64) -> Self {
        self.epoch = epoch;
        self
    }

    /// Set the collection deadline
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Number of participating parties
    pub fn n_parties(&self) -> usize {
        self.parties.len()
    }

    /// BGW polynomial degree l = floor((n - 1) / 2)
    pub fn degree(&self) -> usize {
        (self.n_parties() - 1) / 2
    }

    /// Position of a party in the sorted member list
    pub fn position_of(&self, party_id: PartyId) -> Result<usize> {
        self.parties
            .binary_search(&party_id)
            .map_err(|_| Error::InvalidPartyId(party_id))
    }

    /// This party's position in the sorted member list
    pub fn position(&self) -> usize {
        self.position_of(self.party_id).unwrap_or_default()
    }

    /// Every party except this one
    pub fn peers(&self) -> impl Iterator<Item = PartyId> + '_ {
        self.parties
            .iter()
            .copied()
            .filter(move |id| *id != self.party_id)
    }

    /// Derive a child session with its own identifier.
    ///
    /// Every party deriving with the same label and index lands on the same id.
    pub fn subsession(&self, label: &str, index: u64) -> SessionConfig {
        let mut hasher = blake3::Hasher::new();
        hasher.update(&self.session_id);
        hasher.update(label.as_bytes());
        hasher.update(&index.to_le_bytes());
        let mut child = self.clone();
        child.session_id = *hasher.finalize().as_bytes();
        child
    }
}

/// Deterministic session id from a label and the member set.
pub fn derive_session_id(label: &str, parties: &[PartyId], epoch: u64, counter: u64) -> SessionId {
    let mut hasher = blake3::Hasher::new();
    hasher.update(label.as_bytes());
    for party in parties {
        hasher.update(&(*party as u64).to_le_bytes());
    }
    hasher.update(&epoch.to_le_bytes());
    hasher.update(&counter.to_le_bytes());
    *hasher.finalize().as_bytes()
}

/// Product of values modulo `modulus`.
pub(crate) fn product_mod<'a, I>(values: I, modulus: &BigInt) -> BigInt
where
    I: IntoIterator<Item = &'a BigInt>,
{
    values
        .into_iter()
        .fold(BigInt::one(), |acc, v| arith::modulo(&(acc * v), modulus))
}

/// Sum of values modulo `modulus`.
pub(crate) fn sum_mod<'a, I>(values: I, modulus: &BigInt) -> BigInt
where
    I: IntoIterator<Item = &'a BigInt>,
{
    let total = values.into_iter().fold(BigInt::zero(), |acc, v| acc + v);
    arith::modulo(&total, modulus)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_config_positions() {
        let config = SessionConfig::new([0u8; 32], 5, &[6, 0, 5, 2, 1], 3).unwrap();
        assert_eq!(config.parties, vec![0, 1, 2, 5, 6]);
        assert_eq!(config.position(), 3);
        assert_eq!(config.degree(), 2);
        assert_eq!(config.peers().collect::<Vec<_>>(), vec![0, 1, 2, 6]);
        assert!(config.position_of(4).is_err());
    }

    #[test]
    fn test_session_config_rejects_bad_threshold() {
        assert!(SessionConfig::new([0u8; 32], 0, &[0, 1], 3).is_err());
        assert!(SessionConfig::new([0u8; 32], 7, &[0, 1], 2).is_err());
    }

    #[test]
    fn test_subsession_is_deterministic() {
        let a = SessionConfig::new([1u8; 32], 0, &[0, 1, 2], 2).unwrap();
        let b = SessionConfig::new([1u8; 32], 2, &[0, 1, 2], 2).unwrap();
        assert_eq!(
            a.subsession("bgw", 4).session_id,
            b.subsession("bgw", 4).session_id
        );
        assert_ne!(
            a.subsession("bgw", 4).session_id,
            a.subsession("bgw", 5).session_id
        );
    }

    #[test]
    fn test_public_key_verify() {
        // p = 61, q = 53, e = 17, d = 2753
        let key = RsaPublicKey::new(BigInt::from(3233), BigInt::from(17));
        let h = key.message_representative(b"apples");
        let sigma = arith::powmod(&h, &BigInt::from(2753), &key.modulus);
        assert!(key.verify(b"apples", &RsaSignature::new(sigma.clone())));
        assert!(key
            .verify_strict(b"bloop", &RsaSignature::new(sigma))
            .is_err());
    }
}
