//! Shamir polynomials and Lagrange interpolation over `Z_m`

use crate::arith::{self, RandomSource};
use crate::{Error, Result};
use num_bigint::BigInt;
use num_traits::{One, Zero};

/// Random polynomial used to mask a secret, constant term first
#[derive(Debug, Clone)]
pub struct ShamirPolynomial {
    coefficients: Vec<BigInt>,
    modulus: BigInt,
}

impl ShamirPolynomial {
    /// Polynomial of the given degree with constant term `constant` and
    /// uniformly random higher coefficients.
    pub fn random<S: RandomSource + ?Sized>(
        constant: &BigInt,
        degree: usize,
        modulus: &BigInt,
        rng: &mut S,
    ) -> Self {
        let mut coefficients = Vec::with_capacity(degree + 1);
        coefficients.push(arith::modulo(constant, modulus));
        for _ in 0..degree {
            coefficients.push(rng.random_int(modulus));
        }
        Self {
            coefficients,
            modulus: modulus.clone(),
        }
    }

    /// Polynomial from explicit coefficients, constant term first.
    pub fn from_coefficients(coefficients: Vec<BigInt>, modulus: &BigInt) -> Result<Self> {
        if coefficients.is_empty() {
            return Err(Error::InvalidConfig("polynomial has no coefficients".into()));
        }
        let coefficients = coefficients
            .iter()
            .map(|c| arith::modulo(c, modulus))
            .collect();
        Ok(Self {
            coefficients,
            modulus: modulus.clone(),
        })
    }

    /// Degree of the polynomial
    pub fn degree(&self) -> usize {
        self.coefficients.len().saturating_sub(1)
    }

    /// Value at zero
    pub fn constant(&self) -> &BigInt {
        &self.coefficients[0]
    }

    /// Coefficients above the constant term
    pub fn masks(&self) -> &[BigInt] {
        &self.coefficients[1..]
    }

    /// Evaluate at `x` with Horner's rule.
    pub fn evaluate(&self, x: u64) -> BigInt {
        let x = BigInt::from(x);
        let acc = self
            .coefficients
            .iter()
            .rev()
            .fold(BigInt::zero(), |acc, coef| acc * &x + coef);
        arith::modulo(&acc, &self.modulus)
    }
}

/// Lagrange coefficient at zero for `point` over the set `points`.
///
/// Requires every difference of points to be invertible modulo `modulus`.
pub fn lagrange_at_zero(point: u64, points: &[u64], modulus: &BigInt) -> Result<BigInt> {
    let i = BigInt::from(point);
    let mut numerator = BigInt::one();
    let mut denominator = BigInt::one();

    for &other in points {
        if other == point {
            continue;
        }
        let j = BigInt::from(other);
        numerator = arith::modulo(&(numerator * &j), modulus);
        denominator = arith::modulo(&(denominator * (&j - &i)), modulus);
    }

    let inverse = arith::mod_inverse(&denominator, modulus)
        .map_err(|_| Error::Crypto(format!("evaluation points {:?} are not distinct", points)))?;
    Ok(arith::modulo(&(numerator * inverse), modulus))
}

/// Interpolate the value at zero from `(x, y)` evaluations.
pub fn interpolate_at_zero(evaluations: &[(u64, BigInt)], modulus: &BigInt) -> Result<BigInt> {
    let points: Vec<u64> = evaluations.iter().map(|(x, _)| *x).collect();
    let mut total = BigInt::zero();
    for (x, y) in evaluations {
        let lambda = lagrange_at_zero(*x, &points, modulus)?;
        total += lambda * y;
    }
    Ok(arith::modulo(&total, modulus))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arith::CryptoRandom;

    #[test]
    fn test_evaluate() {
        // 3 + 2x + x^2 mod 11
        let poly = ShamirPolynomial::from_coefficients(
            vec![BigInt::from(3), BigInt::from(2), BigInt::from(1)],
            &BigInt::from(11),
        )
        .unwrap();
        assert_eq!(poly.degree(), 2);
        assert_eq!(poly.evaluate(0), BigInt::from(3));
        assert_eq!(poly.evaluate(2), BigInt::from(0));
        assert_eq!(poly.evaluate(4), BigInt::from(5));
    }

    #[test]
    fn test_empty_coefficients_rejected() {
        let result = ShamirPolynomial::from_coefficients(Vec::new(), &BigInt::from(11));
        assert!(matches!(result, Err(Error::InvalidConfig(_))));

        let constant =
            ShamirPolynomial::from_coefficients(vec![BigInt::from(15)], &BigInt::from(11)).unwrap();
        assert_eq!(constant.constant(), &BigInt::from(4));
        assert!(constant.masks().is_empty());
    }

    #[test]
    fn test_interpolation_recovers_constant() {
        let mut rng = CryptoRandom::seeded(21);
        let modulus = BigInt::from(1_000_000_007u64);
        let secret = BigInt::from(424_242u32);
        let poly = ShamirPolynomial::random(&secret, 3, &modulus, &mut rng);

        let evaluations: Vec<(u64, BigInt)> =
            [2u64, 5, 7, 9].iter().map(|&x| (x, poly.evaluate(x))).collect();
        assert_eq!(interpolate_at_zero(&evaluations, &modulus).unwrap(), secret);
    }

    #[test]
    fn test_lagrange_rejects_repeated_points() {
        let modulus = BigInt::from(13);
        // 1 and 14 coincide modulo 13
        assert!(lagrange_at_zero(1, &[1, 14, 3], &modulus).is_err());
    }
}
