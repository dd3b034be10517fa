//! BGW secure multiplication

use super::{CrossTerms, PointShare};
use crate::arith::{self, RandomSource};
use crate::mpc::{self, Relay};
use crate::sharing::{interpolate_at_zero, lagrange_at_zero, ShamirPolynomial};
use crate::{Error, PartyId, Result, SessionConfig};
use num_bigint::BigInt;
use num_traits::{Signed, Zero};
use std::collections::BTreeMap;
use tracing::{debug, instrument};

/// Relay round carrying cross terms
const ROUND_CROSS_TERMS: u32 = 1;

/// Relay round carrying point shares for a reveal
const ROUND_REVEAL: u32 = 2;

/// One party's state for a single (batched) BGW multiplication.
///
/// Inputs are additive shares of X and Y. Evaluation points are session
/// positions plus one, so the working modulus only has to be coprime to the
/// differences `1..n`.
pub struct BgwRound {
    party_id: PartyId,
    parties: Vec<PartyId>,
    degree: usize,
    modulus: BigInt,
    f: Vec<ShamirPolynomial>,
    g: Vec<ShamirPolynomial>,
    h: Vec<ShamirPolynomial>,
    received_fgh: BTreeMap<PartyId, CrossTerms>,
}

impl BgwRound {
    /// Draw masking polynomials for each `(lhs[k], rhs[k])` pair.
    pub fn new<S: RandomSource + ?Sized>(
        config: &SessionConfig,
        modulus: &BigInt,
        lhs: &[BigInt],
        rhs: &[BigInt],
        rng: &mut S,
    ) -> Result<Self> {
        if lhs.len() != rhs.len() || lhs.is_empty() {
            return Err(Error::InvalidConfig(format!(
                "BGW batch sizes differ or are empty: {} vs {}",
                lhs.len(),
                rhs.len()
            )));
        }
        let n = config.n_parties();
        let degree = config.degree();
        if n < 2 * degree + 1 {
            return Err(Error::InsufficientQuorum {
                required: 2 * degree + 1,
                actual: n,
            });
        }
        if modulus <= &BigInt::from(n) {
            return Err(Error::InvalidConfig(
                "BGW working modulus must exceed the party count".into(),
            ));
        }

        let zero = BigInt::zero();
        let f = lhs
            .iter()
            .map(|x| ShamirPolynomial::random(x, degree, modulus, rng))
            .collect();
        let g = rhs
            .iter()
            .map(|y| ShamirPolynomial::random(y, degree, modulus, rng))
            .collect();
        let h = (0..lhs.len())
            .map(|_| ShamirPolynomial::random(&zero, 2 * degree, modulus, rng))
            .collect();

        let mut round = Self {
            party_id: config.party_id,
            parties: config.parties.clone(),
            degree,
            modulus: modulus.clone(),
            f,
            g,
            h,
            received_fgh: BTreeMap::new(),
        };
        let own = round.cross_terms_for(config.party_id)?;
        round.received_fgh.insert(config.party_id, own);
        Ok(round)
    }

    fn point_of(&self, party_id: PartyId) -> Result<u64> {
        self.parties
            .binary_search(&party_id)
            .map(|pos| pos as u64 + 1)
            .map_err(|_| Error::InvalidPartyId(party_id))
    }

    fn points(&self) -> Vec<u64> {
        (1..=self.parties.len() as u64).collect()
    }

    /// Number of products in the batch
    pub fn batch_len(&self) -> usize {
        self.f.len()
    }

    /// Evaluations f_i(j), g_i(j), h_i(j) destined for `peer`.
    pub fn cross_terms_for(&self, peer: PartyId) -> Result<CrossTerms> {
        let x = self.point_of(peer)?;
        Ok(CrossTerms {
            from: self.party_id,
            to: peer,
            f: self.f.iter().map(|p| p.evaluate(x)).collect(),
            g: self.g.iter().map(|p| p.evaluate(x)).collect(),
            h: self.h.iter().map(|p| p.evaluate(x)).collect(),
        })
    }

    /// Cross terms for every other member.
    pub fn outgoing(&self) -> Result<Vec<CrossTerms>> {
        self.parties
            .iter()
            .filter(|id| **id != self.party_id)
            .map(|id| self.cross_terms_for(*id))
            .collect()
    }

    /// Record the cross terms received from a peer.
    pub fn absorb(&mut self, terms: CrossTerms) -> Result<()> {
        let from = terms.from;
        if terms.to != self.party_id {
            return Err(Error::invalid_share(from, "cross terms addressed to another party"));
        }
        self.point_of(from)
            .map_err(|_| Error::invalid_share(from, "sender is not a session member"))?;
        let batch = self.batch_len();
        if terms.f.len() != batch || terms.g.len() != batch || terms.h.len() != batch {
            return Err(Error::invalid_share(
                from,
                format!("expected {} cross terms per polynomial", batch),
            ));
        }
        let out_of_range = terms
            .f
            .iter()
            .chain(&terms.g)
            .chain(&terms.h)
            .any(|v| v.is_negative() || v >= &self.modulus);
        if out_of_range {
            return Err(Error::invalid_share(from, "cross term outside the working modulus"));
        }
        if self.received_fgh.contains_key(&from) {
            return Err(Error::invalid_share(from, "duplicate cross terms"));
        }
        self.received_fgh.insert(from, terms);
        Ok(())
    }

    /// Whether every member's cross terms are in.
    pub fn is_complete(&self) -> bool {
        self.received_fgh.len() == self.parties.len()
    }

    /// Combine the received cross terms into N_j for each product.
    pub fn finish(self) -> Result<ProductShares> {
        if !self.is_complete() {
            return Err(Error::InsufficientQuorum {
                required: self.parties.len(),
                actual: self.received_fgh.len(),
            });
        }

        let point = self.point_of(self.party_id)?;
        let values = (0..self.batch_len())
            .map(|k| {
                let f = self.received_fgh.values().map(|t| &t.f[k]);
                let g = self.received_fgh.values().map(|t| &t.g[k]);
                let h = self.received_fgh.values().map(|t| &t.h[k]);
                let f_sum = crate::types::sum_mod(f, &self.modulus);
                let g_sum = crate::types::sum_mod(g, &self.modulus);
                let h_sum = crate::types::sum_mod(h, &self.modulus);
                arith::modulo(&(f_sum * g_sum + h_sum), &self.modulus)
            })
            .collect();

        Ok(ProductShares {
            party_id: self.party_id,
            point,
            points: self.points(),
            degree: self.degree,
            modulus: self.modulus,
            values,
        })
    }
}

/// This party's degree-2l point shares of the batched products
#[derive(Debug, Clone)]
pub struct ProductShares {
    /// Owning party
    pub party_id: PartyId,
    /// Evaluation point of the owner
    pub point: u64,
    /// Evaluation points of every member
    pub points: Vec<u64>,
    /// Masking degree l
    pub degree: usize,
    /// Working modulus
    pub modulus: BigInt,
    /// N_j per product
    pub values: Vec<BigInt>,
}

impl ProductShares {
    /// Convert to additive shares of the products over the working modulus.
    pub fn additive(&self) -> Result<Vec<BigInt>> {
        let lambda = lagrange_at_zero(self.point, &self.points, &self.modulus)?;
        Ok(self
            .values
            .iter()
            .map(|v| arith::modulo(&(v * &lambda), &self.modulus))
            .collect())
    }
}

/// Interpolate a product from at least `2l + 1` point shares.
pub fn reconstruct_product(
    evaluations: &[(u64, BigInt)],
    degree: usize,
    modulus: &BigInt,
) -> Result<BigInt> {
    if evaluations.len() < 2 * degree + 1 {
        return Err(Error::InsufficientQuorum {
            required: 2 * degree + 1,
            actual: evaluations.len(),
        });
    }
    interpolate_at_zero(evaluations, modulus)
}

/// Run one batched BGW multiplication of additively shared values.
///
/// `config` must be a fresh (sub)session: the relay rounds are fixed.
#[instrument(skip_all, fields(party_id = config.party_id, batch = lhs.len()))]
pub async fn run_bgw_multiply<R, S>(
    config: &SessionConfig,
    modulus: &BigInt,
    lhs: &[BigInt],
    rhs: &[BigInt],
    rng: &mut S,
    relay: &R,
) -> Result<ProductShares>
where
    R: Relay,
    S: RandomSource + ?Sized,
{
    let mut round = BgwRound::new(config, modulus, lhs, rhs, rng)?;

    for terms in round.outgoing()? {
        relay
            .send_direct(&config.session_id, ROUND_CROSS_TERMS, terms.to, &terms)
            .await?;
    }

    let received: Vec<CrossTerms> = mpc::collect_direct_within(
        relay,
        config,
        ROUND_CROSS_TERMS,
        config.n_parties() - 1,
        "BGW cross terms",
    )
    .await?;
    for terms in received {
        round.absorb(terms)?;
    }

    debug!(degree = config.degree(), "BGW cross terms complete");
    round.finish()
}

/// Broadcast point shares and interpolate every product in the batch.
///
/// Only `2l + 1` point shares are awaited.
#[instrument(skip_all, fields(party_id = config.party_id))]
pub async fn reveal_products<R: Relay>(
    config: &SessionConfig,
    shares: &ProductShares,
    relay: &R,
) -> Result<Vec<BigInt>> {
    let message = PointShare {
        from: config.party_id,
        values: shares.values.clone(),
    };
    relay
        .broadcast(&config.session_id, ROUND_REVEAL, &message)
        .await?;

    let needed = 2 * shares.degree + 1;
    let received: Vec<PointShare> =
        mpc::collect_broadcasts_within(relay, config, ROUND_REVEAL, needed, "BGW point shares")
            .await?;
    let received = mpc::index_by_sender(config, received)?;

    let batch = shares.values.len();
    let mut evaluations: Vec<Vec<(u64, BigInt)>> = vec![Vec::with_capacity(needed); batch];
    for (from, share) in received {
        if share.values.len() != batch {
            return Err(Error::invalid_share(from, "point share batch size mismatch"));
        }
        let point = config.position_of(from)? as u64 + 1;
        for (k, value) in share.values.into_iter().enumerate() {
            evaluations[k].push((point, value));
        }
    }

    evaluations
        .iter()
        .map(|evals| reconstruct_product(evals, shares.degree, &shares.modulus))
        .collect()
}
