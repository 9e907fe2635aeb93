//! Curve point value type

use num_bigint::BigUint;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// A point on a short-Weierstrass curve in affine form.
///
/// A `Point` carries no curve reference; points that cross a trust boundary
/// must be checked with [`Curve::validate`](super::Curve::validate).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Point {
    /// Identity element
    Infinity,
    /// Affine coordinates, each reduced mod p
    Affine { x: BigUint, y: BigUint },
}

impl Point {
    /// Build an affine point without validation
    pub fn affine(x: BigUint, y: BigUint) -> Self {
        Point::Affine { x, y }
    }

    pub fn is_infinity(&self) -> bool {
        matches!(self, Point::Infinity)
    }

    /// Affine coordinates, `None` for the identity
    pub fn coordinates(&self) -> Option<(&BigUint, &BigUint)> {
        match self {
            Point::Infinity => None,
            Point::Affine { x, y } => Some((x, y)),
        }
    }
}

impl Default for Point {
    fn default() -> Self {
        Point::Infinity
    }
}

/// Serialized form: `{ "x": hex, "y": hex }`, or `null` for the identity
#[derive(Serialize, Deserialize)]
struct Coordinates {
    x: String,
    y: String,
}

impl Serialize for Point {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let coordinates = self.coordinates().map(|(x, y)| Coordinates {
            x: x.to_str_radix(16),
            y: y.to_str_radix(16),
        });
        coordinates.serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Point {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let parse = |s: &str| {
            BigUint::parse_bytes(s.as_bytes(), 16)
                .ok_or_else(|| serde::de::Error::custom(format!("invalid coordinate: {s}")))
        };

        match Option::<Coordinates>::deserialize(deserializer)? {
            None => Ok(Point::Infinity),
            Some(c) => Ok(Point::Affine {
                x: parse(&c.x)?,
                y: parse(&c.y)?,
            }),
        }
    }
}
