//! Feldman verifiable secret sharing primitives
//!
//! A dealer samples `f(x) = a_0 + a_1 x + ... + a_{t-1} x^{t-1}` and publishes
//! `C_k = a_k G`. The share for index `j` is `f(j)`, and the receiver checks
//! `f(j) G == sum_k j^k C_k` without learning any `a_k`.

use crate::ec::{inv_mod, Curve, Point};
use crate::{Error, Result};
use num_bigint::BigUint;
use num_traits::{One, Zero};
use rand_core::{CryptoRng, RngCore};
use std::collections::HashSet;
use zeroize::{Zeroize, ZeroizeOnDrop};

/// Secret polynomial over `Z_q`, lowest coefficient first.
///
/// Coefficients are held as fixed-width big-endian scalars and wiped on drop.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct Polynomial {
    coefficients: Vec<Vec<u8>>,
}

impl Polynomial {
    /// Number of coefficients (the threshold)
    pub fn len(&self) -> usize {
        self.coefficients.len()
    }

    pub fn is_empty(&self) -> bool {
        self.coefficients.is_empty()
    }

    /// Constant term `a_0`
    pub fn constant(&self) -> BigUint {
        BigUint::from_bytes_be(&self.coefficients[0])
    }

    fn scalars(&self) -> impl DoubleEndedIterator<Item = BigUint> + '_ {
        self.coefficients.iter().map(|a| BigUint::from_bytes_be(a))
    }
}

impl std::fmt::Debug for Polynomial {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Polynomial")
            .field("degree", &(self.coefficients.len().saturating_sub(1)))
            .finish_non_exhaustive()
    }
}

/// Sample `t` uniformly random coefficients
pub fn poly_generate<R: RngCore + CryptoRng>(
    curve: &Curve,
    t: usize,
    rng: &mut R,
) -> Result<Polynomial> {
    if t == 0 {
        return Err(Error::InvalidConfig("polynomial needs at least one coefficient".into()));
    }
    let coefficients = (0..t)
        .map(|_| curve.scalar_to_bytes(&curve.random_scalar(rng)))
        .collect();
    Ok(Polynomial { coefficients })
}

/// Sample `t` coefficients with a fixed constant term
pub fn poly_generate_with_constant<R: RngCore + CryptoRng>(
    curve: &Curve,
    constant: &BigUint,
    t: usize,
    rng: &mut R,
) -> Result<Polynomial> {
    let mut poly = poly_generate(curve, t, rng)?;
    poly.coefficients[0].zeroize();
    poly.coefficients[0] = curve.scalar_to_bytes(&curve.reduce(constant));
    Ok(poly)
}

/// `[a_k G]` for every coefficient
pub fn poly_commitments(curve: &Curve, poly: &Polynomial) -> Result<Vec<Point>> {
    poly.scalars().map(|a| curve.mul_base(&a)).collect()
}

/// Horner evaluation mod q. Index 0 would reveal the secret and is rejected.
pub fn poly_eval_at(curve: &Curve, poly: &Polynomial, x: u32) -> Result<BigUint> {
    if x == 0 {
        return Err(Error::InvalidIndex(0));
    }
    let x = BigUint::from(x);
    let q = curve.order();

    let mut acc = BigUint::zero();
    for a in poly.scalars().rev() {
        acc = (acc * &x + a) % q;
    }
    Ok(acc)
}

/// `sum_k x^k C_k`, the public image of the shared value at `x`
pub fn commitment_eval(curve: &Curve, commitments: &[Point], x: u32) -> Result<Point> {
    let x = BigUint::from(x);

    let mut acc = Point::Infinity;
    for c in commitments.iter().rev() {
        acc = curve.add(&curve.mul(&x, &acc)?, c)?;
    }
    Ok(acc)
}

/// Check `share G == sum_k x^k C_k`
pub fn verify_share(curve: &Curve, x: u32, share: &BigUint, commitments: &[Point]) -> Result<bool> {
    if x == 0 {
        return Err(Error::InvalidIndex(0));
    }
    if commitments.is_empty() {
        return Ok(false);
    }
    let expected = curve.mul_base(share)?;
    let actual = commitment_eval(curve, commitments, x)?;
    Ok(expected == actual)
}

/// Lagrange basis coefficient of index `j` for interpolating the value at `x`
/// from points at `indices`: `prod_{m != j} (x - m) / (j - m) mod q`.
pub fn lagrange_coefficient(q: &BigUint, indices: &[u32], j: u32, x: u32) -> Result<BigUint> {
    let mut seen = HashSet::with_capacity(indices.len());
    for &m in indices {
        if m == 0 {
            return Err(Error::InvalidIndex(0));
        }
        if !seen.insert(m) {
            return Err(Error::DuplicateIndex(m));
        }
    }
    if !seen.contains(&j) {
        return Err(Error::InvalidIndex(j));
    }

    let diff = |a: u32, b: u32| (BigUint::from(a) + q - (BigUint::from(b) % q)) % q;

    let mut numerator = BigUint::one();
    let mut denominator = BigUint::one();
    for &m in indices.iter().filter(|&&m| m != j) {
        numerator = (numerator * diff(x, m)) % q;
        denominator = (denominator * diff(j, m)) % q;
    }

    Ok((numerator * inv_mod(&denominator, q)?) % q)
}
