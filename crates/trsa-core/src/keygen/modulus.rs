//! Distributed generation of an RSA modulus

use super::CandidateOutcome;
use crate::arith::{self, RandomSource};
use crate::bgw::{reveal_products, run_bgw_multiply};
use crate::mpc::{self, Relay};
use crate::sieve::{public_small_factor, run_sieve};
use crate::{Error, ProtocolParams, Result, SessionConfig};
use num_bigint::BigInt;
use num_traits::{One, Zero};
use tracing::{debug, info, instrument, warn};

/// Relay round carrying candidate outcomes
const ROUND_OUTCOME: u32 = 1;

/// Final public check of a modulus that survived the sieve
pub trait CandidateVerifier: Send + Sync {
    /// `CandidateRejected` when `modulus` must be discarded.
    fn verify(&self, modulus: &BigInt) -> Result<()>;
}

/// Accept every candidate that survived the sieve
#[derive(Debug, Clone, Copy, Default)]
pub struct SieveOnly;

impl CandidateVerifier for SieveOnly {
    fn verify(&self, _modulus: &BigInt) -> Result<()> {
        Ok(())
    }
}

/// Reject moduli with a prime factor in `[lower, upper)`.
///
/// N = p * q is public, so this costs no interaction.
#[derive(Debug, Clone)]
pub struct PublicTrialDivision {
    primes: Vec<u64>,
}

impl PublicTrialDivision {
    /// Trial divide by every prime in `[lower, upper)`
    pub fn new(lower: u64, upper: u64) -> Self {
        let primes = arith::small_primes(upper)
            .into_iter()
            .filter(|&r| r >= lower)
            .collect();
        Self { primes }
    }

    /// Bounds taken from the protocol parameters
    pub fn from_params(params: &ProtocolParams) -> Self {
        Self::new(params.sieve_bound, params.trial_division_bound)
    }
}

impl CandidateVerifier for PublicTrialDivision {
    fn verify(&self, modulus: &BigInt) -> Result<()> {
        for &r in &self.primes {
            if (modulus % BigInt::from(r)).is_zero() {
                return Err(Error::CandidateRejected(format!(
                    "modulus is divisible by {}",
                    r
                )));
            }
        }
        Ok(())
    }
}

/// An accepted modulus and this party's factor shares
#[derive(Debug, Clone)]
pub struct GeneratedModulus {
    /// Public modulus N = p * q
    pub modulus: BigInt,
    /// This party's additive share p_i
    pub p_share: BigInt,
    /// This party's additive share q_i
    pub q_share: BigInt,
    /// Candidates tried, including the accepted one
    pub attempts: usize,
}

/// Bits of each party's factor share, leaving headroom for the sum.
fn share_bits(prime_bits: u64, n_parties: usize) -> u64 {
    let spread = (usize::BITS - (n_parties.max(1) - 1).leading_zeros()) as u64;
    prime_bits.saturating_sub(spread).max(3)
}

/// Public prime larger than any possible product of two summed shares.
fn working_prime(share_bits: u64, n_parties: usize) -> BigInt {
    let spread = (usize::BITS - n_parties.leading_zeros()) as u64;
    let bits = 2 * (share_bits + spread) + 2;
    arith::next_prime(&(BigInt::one() << bits as usize))
}

/// Draw a factor share so that the sum over all parties is 3 mod 4.
fn sample_factor_share<S: RandomSource + ?Sized>(
    bits: u64,
    first: bool,
    rng: &mut S,
) -> BigInt {
    let raw = rng.random_int(&(BigInt::one() << bits as usize));
    let four = BigInt::from(4u32);
    let base = &raw - arith::modulo(&raw, &four);
    if first {
        base + 3u32
    } else {
        base
    }
}

/// This party's outcome for a revealed modulus.
///
/// Primes up to the party count are outside the sieve and are checked on the
/// public N before `verifier` runs.
fn judge_candidate<V>(
    config: &SessionConfig,
    params: &ProtocolParams,
    verifier: &V,
    modulus: &BigInt,
) -> Result<CandidateOutcome>
where
    V: CandidateVerifier + ?Sized,
{
    let from = config.party_id;
    if let Some(r) = public_small_factor(modulus, config.n_parties(), params.sieve_bound) {
        return Ok(CandidateOutcome::Rejected {
            from,
            reason: format!("modulus is divisible by {}", r),
        });
    }
    match verifier.verify(modulus) {
        Ok(()) => Ok(CandidateOutcome::Accepted {
            from,
            modulus: modulus.clone(),
        }),
        Err(Error::CandidateRejected(reason)) => Ok(CandidateOutcome::Rejected { from, reason }),
        Err(e) => Err(e),
    }
}

/// Check that every party broadcast the same acceptance.
///
/// Returns the modulus when all accepted it, `None` when any party rejected.
fn settle_outcomes<I>(outcomes: I, expected: &BigInt) -> Result<Option<BigInt>>
where
    I: IntoIterator<Item = CandidateOutcome>,
{
    let mut rejected = false;
    for outcome in outcomes {
        match outcome {
            CandidateOutcome::Accepted { from, modulus } => {
                if &modulus != expected {
                    return Err(Error::invalid_share(from, "accepted a different modulus"));
                }
            }
            CandidateOutcome::Rejected { from, reason } => {
                debug!(from, %reason, "Peer rejected candidate");
                rejected = true;
            }
        }
    }
    Ok(if rejected { None } else { Some(expected.clone()) })
}

/// Jointly generate N = p * q where p and q are never held by any party.
///
/// Each attempt samples fresh shares, sieves them, multiplies them with BGW
/// over a public prime, reveals N, trial divides it by the primes the sieve
/// skips, runs `verifier` and agrees on the outcome.
/// Sieve and verifier rejections are retried; after
/// `params.max_sieve_attempts` candidates the run fails with `SieveExhausted`.
#[instrument(skip_all, fields(party_id = config.party_id, participants = ?config.parties))]
pub async fn run_modulus_generation<R, S, V>(
    config: &SessionConfig,
    params: &ProtocolParams,
    verifier: &V,
    rng: &mut S,
    relay: &R,
) -> Result<GeneratedModulus>
where
    R: Relay,
    S: RandomSource + ?Sized,
    V: CandidateVerifier + ?Sized,
{
    info!(prime_bits = params.prime_bits, "Starting modulus generation");

    let k = config.n_parties();
    let bits = share_bits(params.prime_bits, k);
    let field = working_prime(bits, k);
    let first = config.position() == 0;

    for attempt in 0..params.max_sieve_attempts {
        let round = config.subsession("candidate", attempt as u64);
        let p_share = sample_factor_share(bits, first, rng);
        let q_share = sample_factor_share(bits, first, rng);

        let candidate = run_sieve(
            &round.subsession("sieve", 0),
            params.sieve_bound,
            &p_share,
            &q_share,
            &mut *rng,
            relay,
        )
        .await?;
        if let Err(e) = candidate.ensure_survived() {
            debug!(attempt, error = %e, "Sieve rejected candidate");
            continue;
        }

        let product_round = round.subsession("product", 0);
        let shares = run_bgw_multiply(
            &product_round,
            &field,
            &[p_share.clone()],
            &[q_share.clone()],
            &mut *rng,
            relay,
        )
        .await?;
        let modulus = reveal_products(&product_round, &shares, relay)
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| Error::Internal("empty BGW reveal".into()))?;

        let outcome = judge_candidate(config, params, verifier, &modulus)?;
        let outcomes = mpc::exchange_broadcast(
            relay,
            &round.subsession("outcome", 0),
            ROUND_OUTCOME,
            &outcome,
            "candidate outcomes",
        )
        .await?;

        match settle_outcomes(outcomes.into_values(), &modulus)? {
            Some(modulus) => {
                info!(
                    attempts = attempt + 1,
                    modulus_bits = modulus.bits(),
                    "Modulus accepted"
                );
                return Ok(GeneratedModulus {
                    modulus,
                    p_share,
                    q_share,
                    attempts: attempt + 1,
                });
            }
            None => warn!(attempt, "Candidate modulus rejected"),
        }
    }

    Err(Error::SieveExhausted {
        attempts: params.max_sieve_attempts,
    })
}
