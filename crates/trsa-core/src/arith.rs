//! Big integer helpers and randomness sources
//!
//! Thin wrappers over `num-bigint` that pin down the semantics the protocols
//! rely on: every reduction lands in `[0, m)`, division truncates toward zero,
//! and primes are found by a random start followed by an upward scan.

use crate::{Error, Result};
use num_bigint::{BigInt, RandBigInt, Sign};
use num_integer::Integer;
use num_traits::{One, Signed, Zero};
use rand::rngs::OsRng;
use rand::{CryptoRng, Rng, RngCore, SeedableRng};
use rand_chacha::ChaCha20Rng;
use std::ops::Range;
use std::sync::OnceLock;

/// Miller-Rabin rounds for randomly generated primes.
const MILLER_RABIN_ROUNDS: usize = 32;

/// Fixed witnesses used where every party must reach the same verdict.
const FIXED_WITNESSES: [u32; 13] = [2, 3, 5, 7, 11, 13, 17, 19, 23, 29, 31, 37, 41];

/// Bound for the trial division pre-check.
const TRIAL_DIVISION_BOUND: u64 = 1000;

/// Compute `x^y mod m` for a non-negative exponent.
pub fn powmod(x: &BigInt, y: &BigInt, m: &BigInt) -> BigInt {
    modulo(x, m).modpow(y, m)
}

/// Compute `x^y mod m` where `y` may be negative.
///
/// A negative exponent requires `x` to be invertible modulo `m`.
pub fn powmod_signed(x: &BigInt, y: &BigInt, m: &BigInt) -> Result<BigInt> {
    if y.is_negative() {
        let inverse = mod_inverse(x, m)?;
        Ok(powmod(&inverse, &-y, m))
    } else {
        Ok(powmod(x, y, m))
    }
}

/// Multiply `x * y`.
pub fn multiply(x: &BigInt, y: &BigInt) -> BigInt {
    x * y
}

/// Divide `x / y`, truncating toward zero.
pub fn divide(x: &BigInt, y: &BigInt) -> BigInt {
    x / y
}

/// Subtract `x - y`.
pub fn subtract(x: &BigInt, y: &BigInt) -> BigInt {
    x - y
}

/// Reduce `x` modulo `m`, always returning a value in `[0, m)`.
pub fn modulo(x: &BigInt, m: &BigInt) -> BigInt {
    x.mod_floor(m)
}

/// Multiplicative inverse of `x` modulo `m`.
pub fn mod_inverse(x: &BigInt, m: &BigInt) -> Result<BigInt> {
    let reduced = modulo(x, m);
    let egcd = reduced.extended_gcd(m);
    if !egcd.gcd.is_one() {
        return Err(Error::Crypto(format!(
            "value is not invertible modulo a {}-bit modulus",
            m.bits()
        )));
    }
    Ok(modulo(&egcd.x, m))
}

/// All primes strictly below `bound`.
pub fn small_primes(bound: u64) -> Vec<u64> {
    if bound < 3 {
        return Vec::new();
    }
    let size = bound as usize;
    let mut composite = vec![false; size];
    let mut primes = Vec::new();
    for i in 2..size {
        if composite[i] {
            continue;
        }
        primes.push(i as u64);
        let mut j = i * i;
        while j < size {
            composite[j] = true;
            j += i;
        }
    }
    primes
}

fn trial_primes() -> &'static [u64] {
    static PRIMES: OnceLock<Vec<u64>> = OnceLock::new();
    PRIMES.get_or_init(|| small_primes(TRIAL_DIVISION_BOUND))
}

/// Returns `Some(verdict)` when trial division alone decides primality.
fn trial_division(n: &BigInt) -> Option<bool> {
    if n < &BigInt::from(2u32) {
        return Some(false);
    }
    for &p in trial_primes() {
        let p = BigInt::from(p);
        if n == &p {
            return Some(true);
        }
        if (n % &p).is_zero() {
            return Some(false);
        }
    }
    None
}

fn miller_rabin<I>(n: &BigInt, witnesses: I) -> bool
where
    I: IntoIterator<Item = BigInt>,
{
    let n_minus_one = n - 1u32;
    let s = n_minus_one.trailing_zeros().unwrap_or(0);
    let d = &n_minus_one >> s as usize;
    let two = BigInt::from(2u32);

    'witness: for a in witnesses {
        let mut x = a.modpow(&d, n);
        if x.is_one() || x == n_minus_one {
            continue;
        }
        for _ in 1..s {
            x = x.modpow(&two, n);
            if x == n_minus_one {
                continue 'witness;
            }
        }
        return false;
    }
    true
}

/// Probabilistic primality test with random witnesses.
pub fn is_probable_prime<R: Rng + ?Sized>(n: &BigInt, rng: &mut R) -> bool {
    if let Some(verdict) = trial_division(n) {
        return verdict;
    }
    let low = BigInt::from(2u32);
    let high = n - 1u32;
    let witnesses: Vec<BigInt> = (0..MILLER_RABIN_ROUNDS)
        .map(|_| rng.gen_bigint_range(&low, &high))
        .collect();
    miller_rabin(n, witnesses)
}

/// Primality test with fixed witnesses, so independent parties agree.
pub fn is_probable_prime_fixed(n: &BigInt) -> bool {
    if let Some(verdict) = trial_division(n) {
        return verdict;
    }
    miller_rabin(n, FIXED_WITNESSES.iter().map(|&w| BigInt::from(w)))
}

/// Smallest prime strictly greater than `n`, using fixed witnesses.
pub fn next_prime(n: &BigInt) -> BigInt {
    let mut candidate = n + 1u32;
    if candidate <= BigInt::from(2u32) {
        return BigInt::from(2u32);
    }
    if candidate.is_even() {
        candidate += 1u32;
    }
    while !is_probable_prime_fixed(&candidate) {
        candidate += 2u32;
    }
    candidate
}

/// Interpret a big-endian byte string as a non-negative integer.
pub fn from_bytes(bytes: &[u8]) -> BigInt {
    BigInt::from_bytes_be(Sign::Plus, bytes)
}

/// Big-endian encoding of a non-negative integer.
pub fn to_bytes(value: &BigInt) -> Vec<u8> {
    value.to_bytes_be().1
}

/// Source of uniformly distributed integers and primes.
pub trait RandomSource: Send {
    /// Uniform integer in `[0, bound)`. Returns zero for a non-positive bound.
    fn random_int(&mut self, bound: &BigInt) -> BigInt;

    /// Prime found by scanning upward from a uniform start in `range`.
    fn random_prime(&mut self, range: &Range<BigInt>) -> Result<BigInt>;

    /// Prime `p` in `range` such that `(p - 1) / 2` is also prime.
    fn random_safe_prime(&mut self, range: &Range<BigInt>) -> Result<BigInt>;

    /// Integer in `[1, modulus)` coprime to `modulus`.
    fn random_unit(&mut self, modulus: &BigInt) -> Result<BigInt> {
        for _ in 0..crate::CRYPTOGRAPHIC_RETRY_MAX {
            let candidate = self.random_int(modulus);
            if !candidate.is_zero() && candidate.gcd(modulus).is_one() {
                return Ok(candidate);
            }
        }
        Err(Error::Crypto("failed to sample a unit".into()))
    }
}

/// [`RandomSource`] backed by a cryptographically secure generator.
pub struct CryptoRandom<R = OsRng> {
    rng: R,
}

impl CryptoRandom<OsRng> {
    /// Random source drawing from the operating system.
    pub fn os() -> Self {
        Self { rng: OsRng }
    }
}

impl Default for CryptoRandom<OsRng> {
    fn default() -> Self {
        Self::os()
    }
}

impl CryptoRandom<ChaCha20Rng> {
    /// Reproducible random source for simulations and tests.
    pub fn seeded(seed: u64) -> Self {
        Self {
            rng: ChaCha20Rng::seed_from_u64(seed),
        }
    }
}

impl<R: RngCore + CryptoRng> CryptoRandom<R> {
    /// Wrap an existing generator.
    pub fn new(rng: R) -> Self {
        Self { rng }
    }

    fn scan_for_prime<F>(&mut self, range: &Range<BigInt>, mut accept: F) -> Result<BigInt>
    where
        F: FnMut(&BigInt, &mut R) -> bool,
    {
        let width = &range.end - &range.start;
        if !width.is_positive() {
            return Err(Error::InvalidConfig("empty prime range".into()));
        }
        let first = &range.start + self.rng.gen_bigint_range(&BigInt::zero(), &width);
        let mut candidate = first | BigInt::one();
        // every odd value in the range is visited at most once
        let mut remaining = (&width >> 1usize) + 1u32;
        while remaining.is_positive() {
            if candidate >= range.end {
                candidate = &range.start | BigInt::one();
            }
            if accept(&candidate, &mut self.rng) {
                return Ok(candidate);
            }
            candidate += 2u32;
            remaining -= 1u32;
        }
        Err(Error::Crypto("no prime in the requested range".into()))
    }
}

impl<R: RngCore + CryptoRng + Send> RandomSource for CryptoRandom<R> {
    fn random_int(&mut self, bound: &BigInt) -> BigInt {
        if !bound.is_positive() {
            return BigInt::zero();
        }
        self.rng.gen_bigint_range(&BigInt::zero(), bound)
    }

    fn random_prime(&mut self, range: &Range<BigInt>) -> Result<BigInt> {
        self.scan_for_prime(range, |candidate, rng| is_probable_prime(candidate, rng))
    }

    fn random_safe_prime(&mut self, range: &Range<BigInt>) -> Result<BigInt> {
        self.scan_for_prime(range, |candidate, rng| {
            let half: BigInt = (candidate - 1u32) >> 1usize;
            is_probable_prime(&half, rng) && is_probable_prime(candidate, rng)
        })
    }
}

/// The range `[2^(bits-1), 2^bits)`.
pub fn bit_range(bits: u64) -> Range<BigInt> {
    let high = BigInt::one() << bits as usize;
    let low = BigInt::one() << (bits.saturating_sub(1)) as usize;
    low..high
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_modulo_is_non_negative() {
        let m = BigInt::from(7);
        assert_eq!(modulo(&BigInt::from(-3), &m), BigInt::from(4));
        assert_eq!(modulo(&BigInt::from(-14), &m), BigInt::zero());
        assert_eq!(modulo(&BigInt::from(15), &m), BigInt::one());
    }

    #[test]
    fn test_divide_truncates() {
        assert_eq!(divide(&BigInt::from(-7), &BigInt::from(2)), BigInt::from(-3));
        assert_eq!(divide(&BigInt::from(7), &BigInt::from(2)), BigInt::from(3));
    }

    #[test]
    fn test_powmod_signed_inverse() {
        let m = BigInt::from(101);
        let x = BigInt::from(17);
        let inv = powmod_signed(&x, &BigInt::from(-1), &m).unwrap();
        assert_eq!(modulo(&(x * inv), &m), BigInt::one());
        assert!(mod_inverse(&BigInt::from(6), &BigInt::from(9)).is_err());
    }

    #[test]
    fn test_small_primes() {
        assert_eq!(small_primes(20), vec![2, 3, 5, 7, 11, 13, 17, 19]);
        assert!(small_primes(2).is_empty());
    }

    #[test]
    fn test_primality() {
        let mut rng = ChaCha20Rng::seed_from_u64(7);
        // 2^61 - 1 is a Mersenne prime
        let mersenne = (BigInt::one() << 61usize) - 1u32;
        assert!(is_probable_prime(&mersenne, &mut rng));
        assert!(is_probable_prime_fixed(&mersenne));
        assert!(!is_probable_prime_fixed(&(&mersenne * BigInt::from(1_000_003u32))));
        // Carmichael number
        assert!(!is_probable_prime(&BigInt::from(561u32), &mut rng));
        assert_eq!(next_prime(&BigInt::from(1000u32)), BigInt::from(1009u32));
    }

    #[test]
    fn test_random_primes_in_range() {
        let mut source = CryptoRandom::seeded(11);
        let range = bit_range(48);
        let p = source.random_prime(&range).unwrap();
        assert!(range.contains(&p));
        assert!(is_probable_prime_fixed(&p));

        let safe = source.random_safe_prime(&bit_range(40)).unwrap();
        let half: BigInt = (&safe - 1u32) >> 1usize;
        assert!(is_probable_prime_fixed(&safe));
        assert!(is_probable_prime_fixed(&half));
    }

    #[test]
    fn test_random_int_and_unit() {
        let mut source = CryptoRandom::seeded(3);
        let bound = BigInt::from(1000u32);
        for _ in 0..100 {
            let v = source.random_int(&bound);
            assert!(v >= BigInt::zero() && v < bound);
        }
        assert!(source.random_int(&BigInt::zero()).is_zero());

        let modulus = BigInt::from(2u32 * 3 * 5 * 7);
        let unit = source.random_unit(&modulus).unwrap();
        assert!(unit.gcd(&modulus).is_one());
    }
}
