//! Distributed sieving of candidate RSA factors
//!
//! The parties hold additive shares of p and q. Before paying for a joint
//! product they check that neither factor is divisible by a small prime, without
//! revealing the residues of p or q themselves:
//!
//! 1. every party draws units a_i, b_i of `Z_M`, where M is the product of the
//!    sieving primes (all primes in `(k, B1)`)
//! 2. `k - 1` chained BGW rounds over `Z_M` turn those into additive shares of
//!    `a = prod a_i` and `b = prod b_i`
//! 3. a last BGW round yields shares of `a * p` and `b * q` modulo M
//! 4. each party broadcasts its shares reduced modulo every sieving prime
//!
//! Column sums of the broadcast rows are `a * p mod r`. Since `a` is a unit,
//! the sum is zero exactly when `r` divides p, and uniformly random otherwise.
//!
//! Primes up to k never enter M. Once N is public they are checked by
//! [`public_small_factor`], so every prime below B1 is covered.

mod messages;

pub use messages::SievePartial;

use crate::arith::{self, RandomSource};
use crate::bgw::run_bgw_multiply;
use crate::mpc::{self, Relay};
use crate::{Error, PartyId, Result, SessionConfig};
use num_bigint::BigInt;
use num_traits::{One, Zero};
use std::collections::BTreeMap;
use std::fmt;
use tracing::{debug, instrument, warn};

/// Relay round carrying sieve partials
const ROUND_PARTIALS: u32 = 1;

/// Primes `r` with `n_parties < r < bound`.
///
/// Excluding primes up to the party count keeps every BGW evaluation point
/// difference invertible modulo their product.
pub fn sieving_primes(n_parties: usize, bound: u64) -> Vec<u64> {
    arith::small_primes(bound)
        .into_iter()
        .filter(|&r| r > n_parties as u64)
        .collect()
}

/// Primes below `bound` that cannot be sieved blindly: `r <= n_parties`.
pub fn unsieved_primes(n_parties: usize, bound: u64) -> Vec<u64> {
    arith::small_primes(bound)
        .into_iter()
        .filter(|&r| r <= n_parties as u64)
        .collect()
}

/// Smallest unsieved prime dividing the public modulus, if any.
pub fn public_small_factor(modulus: &BigInt, n_parties: usize, bound: u64) -> Option<u64> {
    unsieved_primes(n_parties, bound)
        .into_iter()
        .find(|&r| (modulus % BigInt::from(r)).is_zero())
}

/// Which factor a rejection concerns
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Factor {
    P,
    Q,
}

impl fmt::Display for Factor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Factor::P => write!(f, "p"),
            Factor::Q => write!(f, "q"),
        }
    }
}

/// Outcome of sieving a candidate
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SieveVerdict {
    /// No sieving prime divides either factor
    Survived,
    /// `prime` divides the named factor
    Rejected { prime: u64, factor: Factor },
}

/// State of one candidate after the sieve exchange
#[derive(Debug, Clone)]
pub struct ModulusCandidate {
    /// Product M of the sieving primes
    pub bound: BigInt,
    /// Sieving primes, ascending
    pub primes: Vec<u64>,
    /// This party's blinding factor for p
    pub blinding_a: BigInt,
    /// This party's blinding factor for q
    pub blinding_b: BigInt,
    /// Additive share of `prod a_i mod M`
    pub product_a: BigInt,
    /// Additive share of `prod b_i mod M`
    pub product_b: BigInt,
    /// Residue rows for `a * p`, by sender
    pub u: BTreeMap<PartyId, Vec<u64>>,
    /// Residue rows for `b * q`, by sender
    pub v: BTreeMap<PartyId, Vec<u64>>,
}

impl ModulusCandidate {
    /// Sum the residue tables column-wise and report the first zero column.
    pub fn verdict(&self) -> SieveVerdict {
        for (t, &prime) in self.primes.iter().enumerate() {
            if column_sum(&self.u, t, prime) == 0 {
                return SieveVerdict::Rejected {
                    prime,
                    factor: Factor::P,
                };
            }
            if column_sum(&self.v, t, prime) == 0 {
                return SieveVerdict::Rejected {
                    prime,
                    factor: Factor::Q,
                };
            }
        }
        SieveVerdict::Survived
    }

    /// `CandidateRejected` unless the candidate survived.
    pub fn ensure_survived(&self) -> Result<()> {
        match self.verdict() {
            SieveVerdict::Survived => Ok(()),
            SieveVerdict::Rejected { prime, factor } => Err(Error::CandidateRejected(format!(
                "{} is divisible by {}",
                factor, prime
            ))),
        }
    }
}

fn column_sum(table: &BTreeMap<PartyId, Vec<u64>>, column: usize, prime: u64) -> u64 {
    table
        .values()
        .fold(0u64, |acc, row| (acc + row[column]) % prime)
}

/// Reduce `value` modulo each prime.
#[cfg(feature = "rayon")]
fn residues(value: &BigInt, primes: &[u64]) -> Result<Vec<u64>> {
    use rayon::prelude::*;

    primes
        .par_iter()
        .map(|&prime| residue(value, prime))
        .collect()
}

/// Reduce `value` modulo each prime.
#[cfg(not(feature = "rayon"))]
fn residues(value: &BigInt, primes: &[u64]) -> Result<Vec<u64>> {
    primes.iter().map(|&prime| residue(value, prime)).collect()
}

fn residue(value: &BigInt, prime: u64) -> Result<u64> {
    let reduced = arith::modulo(value, &BigInt::from(prime));
    u64::try_from(&reduced).map_err(|e| Error::Internal(e.to_string()))
}

fn check_row(from: PartyId, row: &[u64], primes: &[u64]) -> Result<()> {
    if row.len() != primes.len() {
        return Err(Error::invalid_share(
            from,
            format!("expected {} residues, got {}", primes.len(), row.len()),
        ));
    }
    if row.iter().zip(primes).any(|(r, p)| r >= p) {
        return Err(Error::invalid_share(from, "residue not reduced"));
    }
    Ok(())
}

/// Sieve the jointly held factors `p = sum p_i` and `q = sum q_i`.
///
/// Returns the candidate whatever the verdict; callers decide with
/// [`ModulusCandidate::ensure_survived`].
#[instrument(skip_all, fields(party_id = config.party_id, bound = sieve_bound))]
pub async fn run_sieve<R, S>(
    config: &SessionConfig,
    sieve_bound: u64,
    p_share: &BigInt,
    q_share: &BigInt,
    rng: &mut S,
    relay: &R,
) -> Result<ModulusCandidate>
where
    R: Relay,
    S: RandomSource + ?Sized,
{
    let k = config.n_parties();
    let primes = sieving_primes(k, sieve_bound);
    if primes.is_empty() {
        return Err(Error::InvalidConfig(format!(
            "sieve bound {} leaves no primes above {}",
            sieve_bound, k
        )));
    }
    let bound = primes
        .iter()
        .fold(BigInt::one(), |acc, &r| acc * BigInt::from(r));

    let blinding_a = rng.random_unit(&bound)?;
    let blinding_b = rng.random_unit(&bound)?;
    let position = config.position();
    let zero = BigInt::zero();

    // additive sharing of a_0 and b_0: the first member holds them outright
    let mut accumulated = if position == 0 {
        vec![blinding_a.clone(), blinding_b.clone()]
    } else {
        vec![zero.clone(), zero.clone()]
    };

    for turn in 1..k {
        let factor = if position == turn {
            vec![blinding_a.clone(), blinding_b.clone()]
        } else {
            vec![zero.clone(), zero.clone()]
        };
        let round = config.subsession("sieve-blinding", turn as u64);
        let shares =
            run_bgw_multiply(&round, &bound, &accumulated, &factor, &mut *rng, relay).await?;
        accumulated = shares.additive()?;
        debug!(turn, "Folded blinding factor");
    }

    let (product_a, product_b) = (accumulated[0].clone(), accumulated[1].clone());
    let factors = vec![arith::modulo(p_share, &bound), arith::modulo(q_share, &bound)];
    let round = config.subsession("sieve-mask", 0);
    let masked = run_bgw_multiply(&round, &bound, &accumulated, &factors, &mut *rng, relay)
        .await?
        .additive()?;

    let partial = SievePartial {
        from: config.party_id,
        u_row: residues(&masked[0], &primes)?,
        v_row: residues(&masked[1], &primes)?,
    };
    let exchange = config.subsession("sieve-partials", 0);
    let received =
        mpc::exchange_broadcast(relay, &exchange, ROUND_PARTIALS, &partial, "sieve partials")
            .await?;

    let mut u = BTreeMap::new();
    let mut v = BTreeMap::new();
    for (from, partial) in received {
        check_row(from, &partial.u_row, &primes)?;
        check_row(from, &partial.v_row, &primes)?;
        u.insert(from, partial.u_row);
        v.insert(from, partial.v_row);
    }

    let candidate = ModulusCandidate {
        bound,
        primes,
        blinding_a,
        blinding_b,
        product_a,
        product_b,
        u,
        v,
    };
    match candidate.verdict() {
        SieveVerdict::Survived => debug!(primes = candidate.primes.len(), "Candidate survived"),
        SieveVerdict::Rejected { prime, factor } => {
            warn!(prime, %factor, "Candidate rejected by sieve")
        }
    }
    Ok(candidate)
}
