//! Prime-field elliptic curve group
//!
//! Short-Weierstrass curves `y^2 = x^3 + ax + b` over `F_p` with a base point
//! of prime order `q`. Coordinates are reduced mod `p`; scalars are reduced
//! mod `q` before multiplication. The deployment curve is secp256k1, see
//! [`Curve::secp256k1`].

mod point;

pub use point::Point;

use crate::{Error, Result};
use num_bigint::BigUint;
use num_traits::{One, Zero};
use rand_core::{CryptoRng, RngCore};
use std::sync::OnceLock;

const SECP256K1_P: &str = "fffffffffffffffffffffffffffffffffffffffffffffffffffffffefffffc2f";
const SECP256K1_Q: &str = "fffffffffffffffffffffffffffffffebaaedce6af48a03bbfd25e8cd0364141";
const SECP256K1_GX: &str = "79be667ef9dcbbac55a06295ce870b07029bfcdb2dce28d959f2815b16f81798";
const SECP256K1_GY: &str = "483ada7726a3c4655da4fbfc0e1108a8fd17b448a68554199c47d08ffb10d4b8";

/// Curve parameters and group operations
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Curve {
    p: BigUint,
    a: BigUint,
    b: BigUint,
    q: BigUint,
    g: Point,
}

impl Curve {
    /// Create a curve from its parameters, checking that the base point lies on it
    pub fn new(
        p: BigUint,
        a: BigUint,
        b: BigUint,
        q: BigUint,
        gx: BigUint,
        gy: BigUint,
    ) -> Result<Self> {
        if p <= BigUint::from(3u32) || q <= BigUint::one() {
            return Err(Error::InvalidConfig("curve modulus and order too small".into()));
        }
        let a = a % &p;
        let b = b % &p;

        // 4a^3 + 27b^2 != 0 mod p
        let disc = (BigUint::from(4u32) * a.modpow(&BigUint::from(3u32), &p)
            + BigUint::from(27u32) * &b * &b)
            % &p;
        if disc.is_zero() {
            return Err(Error::InvalidConfig("singular curve".into()));
        }

        let curve = Self {
            p,
            a,
            b,
            q,
            g: Point::Infinity,
        };
        let g = curve.point(gx, gy)?;
        Ok(Self { g, ..curve })
    }

    /// The secp256k1 curve
    pub fn secp256k1() -> &'static Curve {
        static SECP256K1: OnceLock<Curve> = OnceLock::new();
        SECP256K1.get_or_init(|| {
            let hex = |s: &str| BigUint::parse_bytes(s.as_bytes(), 16).unwrap_or_default();
            Curve {
                p: hex(SECP256K1_P),
                a: BigUint::zero(),
                b: BigUint::from(7u32),
                q: hex(SECP256K1_Q),
                g: Point::affine(hex(SECP256K1_GX), hex(SECP256K1_GY)),
            }
        })
    }

    /// Base point G
    pub fn generator(&self) -> &Point {
        &self.g
    }

    /// Group order q
    pub fn order(&self) -> &BigUint {
        &self.q
    }

    /// Field modulus p
    pub fn modulus(&self) -> &BigUint {
        &self.p
    }

    /// Build a validated point
    pub fn point(&self, x: BigUint, y: BigUint) -> Result<Point> {
        let point = Point::affine(x, y);
        self.validate(&point)?;
        Ok(point)
    }

    /// Whether `point` is the identity or satisfies the curve equation
    pub fn is_on_curve(&self, point: &Point) -> bool {
        match point {
            Point::Infinity => true,
            Point::Affine { x, y } => {
                if x >= &self.p || y >= &self.p {
                    return false;
                }
                let lhs = (y * y) % &self.p;
                let rhs = (x * x * x + &self.a * x + &self.b) % &self.p;
                lhs == rhs
            }
        }
    }

    /// Reject points that are not on this curve
    pub fn validate(&self, point: &Point) -> Result<()> {
        if self.is_on_curve(point) {
            Ok(())
        } else {
            Err(Error::InvalidPoint("point is not on the curve".into()))
        }
    }

    /// -P
    pub fn neg(&self, point: &Point) -> Point {
        match point {
            Point::Infinity => Point::Infinity,
            Point::Affine { x, y } => Point::affine(x.clone(), sub_mod(&BigUint::zero(), y, &self.p)),
        }
    }

    /// P + Q
    pub fn add(&self, lhs: &Point, rhs: &Point) -> Result<Point> {
        let ((x1, y1), (x2, y2)) = match (lhs.coordinates(), rhs.coordinates()) {
            (None, _) => return Ok(rhs.clone()),
            (_, None) => return Ok(lhs.clone()),
            (Some(l), Some(r)) => (l, r),
        };

        if x1 == x2 {
            if ((y1 + y2) % &self.p).is_zero() {
                return Ok(Point::Infinity);
            }
            return self.double(lhs);
        }

        let p = &self.p;
        let lambda = mul_mod(&sub_mod(y2, y1, p), &inv_mod(&sub_mod(x2, x1, p), p)?, p);
        let x3 = sub_mod(&sub_mod(&mul_mod(&lambda, &lambda, p), x1, p), x2, p);
        let y3 = sub_mod(&mul_mod(&lambda, &sub_mod(x1, &x3, p), p), y1, p);
        Ok(Point::affine(x3, y3))
    }

    /// 2P
    pub fn double(&self, point: &Point) -> Result<Point> {
        let (x, y) = match point.coordinates() {
            None => return Ok(Point::Infinity),
            Some(c) => c,
        };
        if y.is_zero() {
            return Ok(Point::Infinity);
        }

        let p = &self.p;
        let numerator = (BigUint::from(3u32) * x * x + &self.a) % p;
        let lambda = mul_mod(&numerator, &inv_mod(&((y << 1u8) % p), p)?, p);
        let x3 = sub_mod(&mul_mod(&lambda, &lambda, p), &((x << 1u8) % p), p);
        let y3 = sub_mod(&mul_mod(&lambda, &sub_mod(x, &x3, p), p), y, p);
        Ok(Point::affine(x3, y3))
    }

    /// k * P by double-and-add; k is reduced mod q first
    pub fn mul(&self, k: &BigUint, point: &Point) -> Result<Point> {
        let k = k % &self.q;
        if k.is_zero() || point.is_infinity() {
            return Ok(Point::Infinity);
        }

        let base = Jacobian::from_affine(point);
        let mut acc = Jacobian::infinity();
        for i in (0..k.bits()).rev() {
            acc = acc.double(self);
            if k.bit(i) {
                acc = acc.add(&base, self);
            }
        }
        acc.to_affine(self)
    }

    /// k * G
    pub fn mul_base(&self, k: &BigUint) -> Result<Point> {
        self.mul(k, &self.g)
    }

    /// Sum of a sequence of points
    pub fn sum<'a, I>(&self, points: I) -> Result<Point>
    where
        I: IntoIterator<Item = &'a Point>,
    {
        let mut acc = Jacobian::infinity();
        for point in points {
            acc = acc.add(&Jacobian::from_affine(point), self);
        }
        acc.to_affine(self)
    }

    /// Reduce an integer mod q
    pub fn reduce(&self, k: &BigUint) -> BigUint {
        k % &self.q
    }

    /// Uniform scalar in `[1, q)`
    pub fn random_scalar<R: RngCore + CryptoRng>(&self, rng: &mut R) -> BigUint {
        let bits = self.q.bits();
        let mut buf = vec![0u8; self.scalar_len()];
        let excess = (buf.len() as u64 * 8 - bits) as u32;

        loop {
            rng.fill_bytes(&mut buf);
            buf[0] &= 0xffu8 >> excess;
            let k = BigUint::from_bytes_be(&buf);
            if !k.is_zero() && k < self.q {
                return k;
            }
        }
    }

    /// Byte length of a scalar
    pub fn scalar_len(&self) -> usize {
        ((self.q.bits() + 7) / 8) as usize
    }

    /// Byte length of a coordinate
    pub fn coordinate_len(&self) -> usize {
        ((self.p.bits() + 7) / 8) as usize
    }

    /// Fixed-width big-endian scalar encoding
    pub fn scalar_to_bytes(&self, k: &BigUint) -> Vec<u8> {
        left_pad(&self.reduce(k).to_bytes_be(), self.scalar_len())
    }

    /// Decode a fixed-width scalar, rejecting values >= q
    pub fn scalar_from_bytes(&self, bytes: &[u8]) -> Result<BigUint> {
        if bytes.len() != self.scalar_len() {
            return Err(Error::Deserialization(format!(
                "scalar must be {} bytes, got {}",
                self.scalar_len(),
                bytes.len()
            )));
        }
        let k = BigUint::from_bytes_be(bytes);
        if k >= self.q {
            return Err(Error::Deserialization("scalar out of range".into()));
        }
        Ok(k)
    }

    /// SEC1 uncompressed encoding (`0x04 || x || y`); the identity is `0x00`
    pub fn encode_point(&self, point: &Point) -> Vec<u8> {
        match point.coordinates() {
            None => vec![0x00],
            Some((x, y)) => {
                let len = self.coordinate_len();
                let mut out = Vec::with_capacity(1 + 2 * len);
                out.push(0x04);
                out.extend_from_slice(&left_pad(&x.to_bytes_be(), len));
                out.extend_from_slice(&left_pad(&y.to_bytes_be(), len));
                out
            }
        }
    }

    /// Decode and validate a SEC1 uncompressed point
    pub fn decode_point(&self, bytes: &[u8]) -> Result<Point> {
        let len = self.coordinate_len();
        match bytes {
            [0x00] => Ok(Point::Infinity),
            [0x04, rest @ ..] if rest.len() == 2 * len => self.point(
                BigUint::from_bytes_be(&rest[..len]),
                BigUint::from_bytes_be(&rest[len..]),
            ),
            _ => Err(Error::InvalidPoint(format!(
                "expected {} byte uncompressed encoding",
                1 + 2 * len
            ))),
        }
    }
}

/// Modular inverse; a non-invertible element is an arithmetic error
pub fn inv_mod(a: &BigUint, m: &BigUint) -> Result<BigUint> {
    let a = a % m;
    if a.is_zero() {
        return Err(Error::Arithmetic("inverse of zero".into()));
    }
    a.modinv(m)
        .ok_or_else(|| Error::Arithmetic(format!("{a} is not invertible mod {m}")))
}

fn mul_mod(a: &BigUint, b: &BigUint, m: &BigUint) -> BigUint {
    (a * b) % m
}

fn add_mod(a: &BigUint, b: &BigUint, m: &BigUint) -> BigUint {
    (a + b) % m
}

/// a - b mod m
fn sub_mod(a: &BigUint, b: &BigUint, m: &BigUint) -> BigUint {
    let (a, b) = (a % m, b % m);
    if a >= b {
        a - b
    } else {
        m - (b - a)
    }
}

fn left_pad(bytes: &[u8], len: usize) -> Vec<u8> {
    let mut out = vec![0u8; len.saturating_sub(bytes.len())];
    out.extend_from_slice(bytes);
    out
}

/// Jacobian coordinates `(X, Y, Z)` for `(X/Z^2, Y/Z^3)`; `Z = 0` is the identity
#[derive(Clone)]
struct Jacobian {
    x: BigUint,
    y: BigUint,
    z: BigUint,
}

impl Jacobian {
    fn infinity() -> Self {
        Self {
            x: BigUint::one(),
            y: BigUint::one(),
            z: BigUint::zero(),
        }
    }

    fn from_affine(point: &Point) -> Self {
        match point.coordinates() {
            None => Self::infinity(),
            Some((x, y)) => Self {
                x: x.clone(),
                y: y.clone(),
                z: BigUint::one(),
            },
        }
    }

    fn is_infinity(&self) -> bool {
        self.z.is_zero()
    }

    fn double(&self, curve: &Curve) -> Self {
        if self.is_infinity() || self.y.is_zero() {
            return Self::infinity();
        }
        let p = &curve.p;

        let xx = mul_mod(&self.x, &self.x, p);
        let yy = mul_mod(&self.y, &self.y, p);
        let yyyy = mul_mod(&yy, &yy, p);
        let zz = mul_mod(&self.z, &self.z, p);
        let s = (mul_mod(&self.x, &yy, p) << 2u8) % p;
        let m = add_mod(&(&xx * 3u32), &mul_mod(&curve.a, &mul_mod(&zz, &zz, p), p), p);

        let x3 = sub_mod(&mul_mod(&m, &m, p), &((&s << 1u8) % p), p);
        let y3 = sub_mod(
            &mul_mod(&m, &sub_mod(&s, &x3, p), p),
            &((yyyy << 3u8) % p),
            p,
        );
        let z3 = (mul_mod(&self.y, &self.z, p) << 1u8) % p;

        Self { x: x3, y: y3, z: z3 }
    }

    fn add(&self, other: &Self, curve: &Curve) -> Self {
        if self.is_infinity() {
            return other.clone();
        }
        if other.is_infinity() {
            return self.clone();
        }
        let p = &curve.p;

        let z1z1 = mul_mod(&self.z, &self.z, p);
        let z2z2 = mul_mod(&other.z, &other.z, p);
        let u1 = mul_mod(&self.x, &z2z2, p);
        let u2 = mul_mod(&other.x, &z1z1, p);
        let s1 = mul_mod(&mul_mod(&self.y, &other.z, p), &z2z2, p);
        let s2 = mul_mod(&mul_mod(&other.y, &self.z, p), &z1z1, p);

        if u1 == u2 {
            if s1 == s2 {
                return self.double(curve);
            }
            return Self::infinity();
        }

        let h = sub_mod(&u2, &u1, p);
        let r = sub_mod(&s2, &s1, p);
        let hh = mul_mod(&h, &h, p);
        let hhh = mul_mod(&h, &hh, p);
        let v = mul_mod(&u1, &hh, p);

        let x3 = sub_mod(
            &sub_mod(&mul_mod(&r, &r, p), &hhh, p),
            &((&v << 1u8) % p),
            p,
        );
        let y3 = sub_mod(
            &mul_mod(&r, &sub_mod(&v, &x3, p), p),
            &mul_mod(&s1, &hhh, p),
            p,
        );
        let z3 = mul_mod(&mul_mod(&self.z, &other.z, p), &h, p);

        Self { x: x3, y: y3, z: z3 }
    }

    fn to_affine(&self, curve: &Curve) -> Result<Point> {
        if self.is_infinity() {
            return Ok(Point::Infinity);
        }
        let p = &curve.p;
        let z_inv = inv_mod(&self.z, p)?;
        let z_inv2 = mul_mod(&z_inv, &z_inv, p);
        let x = mul_mod(&self.x, &z_inv2, p);
        let y = mul_mod(&self.y, &mul_mod(&z_inv2, &z_inv, p), p);
        Ok(Point::affine(x, y))
    }
}
