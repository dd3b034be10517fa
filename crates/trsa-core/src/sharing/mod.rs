//! Secret sharing
//!
//! Two schemes are supported:
//! - additive splitting, where the shares sum to the secret over the integers
//! - polynomial (Shamir) sharing over a prime field, evaluated at `id + 1`
//!
//! The additive splitter draws the first `n - 1` shares from `[0, secret / 10)`
//! and fixes the last one, so the final share is correlated with the secret.
//! It does not hide the secret. Every additive share handed out by the dealer
//! is re-shared with a random polynomial in `keygen::run_share_backup`, and
//! signing only ever touches the polynomial shares.

mod polynomial;

pub use polynomial::{interpolate_at_zero, lagrange_at_zero, ShamirPolynomial};

use crate::arith::{self, RandomSource};
use crate::{Error, PartyId, Result};
use num_bigint::BigInt;
use num_traits::{Signed, Zero};
use serde::{Deserialize, Serialize};

/// One party's portion of a jointly held secret
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecretShare {
    /// Party holding the share
    pub owner: PartyId,
    /// Share value
    pub value: BigInt,
    /// Field modulus for polynomial shares, `None` for additive shares
    pub modulus: Option<BigInt>,
}

impl SecretShare {
    /// Evaluation point used for this share
    pub fn point(&self) -> u64 {
        self.owner as u64 + 1
    }
}

/// How a secret is split
#[derive(Debug, Clone)]
pub enum SharingScheme {
    /// Shares sum to the secret over the integers
    Additive,
    /// Shamir sharing of the given degree over `Z_modulus`
    Polynomial { degree: usize, modulus: BigInt },
}

/// Splits secrets among a fixed set of owners.
pub struct SecretSharer<'a, S: RandomSource + ?Sized> {
    scheme: SharingScheme,
    rng: &'a mut S,
}

impl<'a, S: RandomSource + ?Sized> SecretSharer<'a, S> {
    /// Create a sharer for the given scheme
    pub fn new(scheme: SharingScheme, rng: &'a mut S) -> Self {
        Self { scheme, rng }
    }

    /// Split `secret` into one share per owner, in owner order.
    pub fn split(&mut self, secret: &BigInt, owners: &[PartyId]) -> Result<Vec<SecretShare>> {
        match &self.scheme {
            SharingScheme::Additive => {
                let values = split_additive(secret, owners.len(), &mut *self.rng)?;
                Ok(owners
                    .iter()
                    .zip(values)
                    .map(|(&owner, value)| SecretShare {
                        owner,
                        value,
                        modulus: None,
                    })
                    .collect())
            }
            SharingScheme::Polynomial { degree, modulus } => {
                split_polynomial(secret, owners, *degree, modulus, &mut *self.rng)
            }
        }
    }

    /// Recombine shares produced by [`SecretSharer::split`].
    pub fn reconstruct(&self, shares: &[SecretShare]) -> Result<BigInt> {
        match &self.scheme {
            SharingScheme::Additive => Ok(reconstruct_additive(shares)),
            SharingScheme::Polynomial { degree, modulus } => {
                if shares.len() < degree + 1 {
                    return Err(Error::InsufficientQuorum {
                        required: degree + 1,
                        actual: shares.len(),
                    });
                }
                reconstruct_polynomial(shares, modulus)
            }
        }
    }
}

/// Split `secret` into `n` integers summing to it.
pub fn split_additive<S: RandomSource + ?Sized>(
    secret: &BigInt,
    n: usize,
    rng: &mut S,
) -> Result<Vec<BigInt>> {
    if n == 0 {
        return Err(Error::InvalidConfig("cannot split among zero parties".into()));
    }

    let bound = arith::divide(secret, &BigInt::from(10u32));
    let mut shares: Vec<BigInt> = (0..n - 1)
        .map(|_| {
            if bound.is_positive() {
                rng.random_int(&bound)
            } else {
                BigInt::zero()
            }
        })
        .collect();

    let remainder = shares
        .iter()
        .fold(secret.clone(), |acc, share| arith::subtract(&acc, share));
    shares.push(remainder);
    Ok(shares)
}

/// Sum additive shares.
pub fn reconstruct_additive(shares: &[SecretShare]) -> BigInt {
    shares.iter().fold(BigInt::zero(), |acc, s| acc + &s.value)
}

/// Shamir-share `secret` among `owners` with a random polynomial of `degree`.
pub fn split_polynomial<S: RandomSource + ?Sized>(
    secret: &BigInt,
    owners: &[PartyId],
    degree: usize,
    modulus: &BigInt,
    rng: &mut S,
) -> Result<Vec<SecretShare>> {
    if owners.len() < degree + 1 {
        return Err(Error::InsufficientQuorum {
            required: degree + 1,
            actual: owners.len(),
        });
    }
    let poly = ShamirPolynomial::random(secret, degree, modulus, rng);
    Ok(owners
        .iter()
        .map(|&owner| SecretShare {
            owner,
            value: poly.evaluate(owner as u64 + 1),
            modulus: Some(modulus.clone()),
        })
        .collect())
}

/// Interpolate the secret from polynomial shares.
pub fn reconstruct_polynomial(shares: &[SecretShare], modulus: &BigInt) -> Result<BigInt> {
    let evaluations: Vec<(u64, BigInt)> = shares
        .iter()
        .map(|share| (share.point(), share.value.clone()))
        .collect();
    interpolate_at_zero(&evaluations, modulus)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arith::CryptoRandom;

    #[test]
    fn test_additive_split_sums_to_secret() {
        let mut rng = CryptoRandom::seeded(1);
        for n in 1..8 {
            let secret = rng.random_int(&(BigInt::from(1u32) << 256usize));
            let shares = split_additive(&secret, n, &mut rng).unwrap();
            assert_eq!(shares.len(), n);
            let total = shares.iter().fold(BigInt::zero(), |acc, s| acc + s);
            assert_eq!(total, secret);
        }
    }

    #[test]
    fn test_additive_split_bounds() {
        let mut rng = CryptoRandom::seeded(2);
        let secret = BigInt::from(1_000_000u32);
        let shares = split_additive(&secret, 5, &mut rng).unwrap();
        for share in &shares[..4] {
            assert!(*share >= BigInt::zero() && *share < BigInt::from(100_000u32));
        }
        assert!(split_additive(&secret, 0, &mut rng).is_err());
    }

    #[test]
    fn test_small_secret_split() {
        let mut rng = CryptoRandom::seeded(3);
        let shares = split_additive(&BigInt::from(7u32), 3, &mut rng).unwrap();
        assert_eq!(shares, vec![BigInt::zero(), BigInt::zero(), BigInt::from(7u32)]);
    }

    #[test]
    fn test_any_quorum_reconstructs() {
        let mut rng = CryptoRandom::seeded(4);
        let modulus = arith::next_prime(&(BigInt::from(1u32) << 127usize));
        let secret = rng.random_int(&modulus);
        let owners = [0, 1, 2, 5, 6];
        let degree = (owners.len() - 1) / 2;

        let mut sharer = SecretSharer::new(
            SharingScheme::Polynomial {
                degree,
                modulus: modulus.clone(),
            },
            &mut rng,
        );
        let shares = sharer.split(&secret, &owners).unwrap();

        let subsets: [&[usize]; 4] = [&[0, 1, 2], &[2, 3, 4], &[0, 2, 4], &[1, 3, 4]];
        for subset in subsets {
            let picked: Vec<SecretShare> = subset.iter().map(|&i| shares[i].clone()).collect();
            assert_eq!(sharer.reconstruct(&picked).unwrap(), secret);
        }

        // l shares are not enough, and interpolating them anyway gives
        // subset-dependent values unrelated to the secret
        let short = vec![shares[0].clone(), shares[1].clone()];
        assert!(matches!(
            sharer.reconstruct(&short),
            Err(Error::InsufficientQuorum { required: 3, actual: 2 })
        ));
        let guess_a = reconstruct_polynomial(&short, &modulus).unwrap();
        let guess_b =
            reconstruct_polynomial(&[shares[3].clone(), shares[4].clone()], &modulus).unwrap();
        assert_ne!(guess_a, secret);
        assert_ne!(guess_a, guess_b);
    }

    #[test]
    fn test_additive_sharer_round_trip() {
        let mut rng = CryptoRandom::seeded(5);
        let secret = BigInt::from(987_654_321u64);
        let mut sharer = SecretSharer::new(SharingScheme::Additive, &mut rng);
        let shares = sharer.split(&secret, &[3, 4, 9]).unwrap();
        assert_eq!(shares[2].owner, 9);
        assert_eq!(sharer.reconstruct(&shares).unwrap(), secret);
    }
}
