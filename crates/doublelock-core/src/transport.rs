//! Transport encryption for DKG shares
//!
//! ECIES to a participant's long-lived transport key. The key pair is
//! independent of the threshold key being generated; it only carries
//! `s_{i->j}` from sender to receiver. The additional authenticated data binds
//! `(session, from, to)` so a share cannot be replayed into another context.

use crate::ec::{Curve, Point};
use crate::seal::{self, SealKeys};
use crate::types::{hex_bytes, Envelope, ParticipantIndex};
use crate::{Error, Result};
use num_bigint::BigUint;
use num_traits::Zero;
use rand_core::{CryptoRng, RngCore};
use serde::{Deserialize, Serialize};
use zeroize::{Zeroize, ZeroizeOnDrop};

const SHARE_LABEL: &[u8] = b"doublelock/transport/v1";

/// Long-lived transport key pair
#[derive(Clone, Serialize, Deserialize, Zeroize, ZeroizeOnDrop)]
pub struct TransportKeyPair {
    #[serde(with = "hex_bytes")]
    secret: Vec<u8>,
    #[zeroize(skip)]
    public: Point,
}

impl TransportKeyPair {
    /// Generate a fresh key pair
    pub fn generate<R: RngCore + CryptoRng>(curve: &Curve, rng: &mut R) -> Result<Self> {
        let secret = curve.random_scalar(rng);
        let public = curve.mul_base(&secret)?;
        Ok(Self {
            secret: curve.scalar_to_bytes(&secret),
            public,
        })
    }

    /// Rebuild a key pair from its secret scalar
    pub fn from_secret(curve: &Curve, secret: &[u8]) -> Result<Self> {
        let k = curve.scalar_from_bytes(secret)?;
        if k.is_zero() {
            return Err(Error::InvalidConfig("transport secret is zero".into()));
        }
        Ok(Self {
            secret: secret.to_vec(),
            public: curve.mul_base(&k)?,
        })
    }

    pub fn public_key(&self) -> &Point {
        &self.public
    }

    fn secret(&self) -> BigUint {
        BigUint::from_bytes_be(&self.secret)
    }
}

impl std::fmt::Debug for TransportKeyPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransportKeyPair")
            .field("public", &self.public)
            .finish_non_exhaustive()
    }
}

/// AAD binding a share to its session and direction
pub fn share_aad(session_id: &str, from: ParticipantIndex, to: ParticipantIndex) -> Vec<u8> {
    let mut aad = Vec::with_capacity(session_id.len() + 16);
    aad.extend_from_slice(&(session_id.len() as u64).to_be_bytes());
    aad.extend_from_slice(session_id.as_bytes());
    aad.extend_from_slice(&from.to_be_bytes());
    aad.extend_from_slice(&to.to_be_bytes());
    aad
}

/// Encrypt `plaintext` to `recipient`
pub fn encrypt<R: RngCore + CryptoRng>(
    curve: &Curve,
    recipient: &Point,
    aad: &[u8],
    plaintext: &[u8],
    rng: &mut R,
) -> Result<Envelope> {
    seal_to_point(curve, SHARE_LABEL, recipient, aad, plaintext, rng)
}

/// Decrypt an envelope addressed to `keypair`; the MAC is checked first
pub fn decrypt(curve: &Curve, keypair: &TransportKeyPair, envelope: &Envelope, aad: &[u8]) -> Result<Vec<u8>> {
    check_ephemeral(curve, envelope)?;
    let shared = curve.mul(&keypair.secret(), &envelope.ephemeral)?;
    let keys = envelope_keys(curve, SHARE_LABEL, &envelope.ephemeral, &shared, aad)?;
    seal::open(&keys, aad, &envelope.ciphertext, &envelope.tag)
}

/// ECIES to an arbitrary public point under a domain label
pub(crate) fn seal_to_point<R: RngCore + CryptoRng>(
    curve: &Curve,
    label: &[u8],
    public: &Point,
    aad: &[u8],
    plaintext: &[u8],
    rng: &mut R,
) -> Result<Envelope> {
    curve.validate(public)?;
    if public.is_infinity() {
        return Err(Error::InvalidPoint("cannot encrypt to the identity".into()));
    }

    let r = curve.random_scalar(rng);
    let ephemeral = curve.mul_base(&r)?;
    let shared = curve.mul(&r, public)?;

    let keys = envelope_keys(curve, label, &ephemeral, &shared, aad)?;
    let (ciphertext, tag) = seal::seal(&keys, aad, plaintext)?;

    Ok(Envelope {
        ephemeral,
        ciphertext,
        tag: tag.to_vec(),
    })
}

/// Keys from `encode(R) || encode(shared)`, bound to the label and AAD
pub(crate) fn envelope_keys(
    curve: &Curve,
    label: &[u8],
    ephemeral: &Point,
    shared: &Point,
    aad: &[u8],
) -> Result<SealKeys> {
    if shared.is_infinity() {
        return Err(Error::InvalidPoint("shared point is the identity".into()));
    }
    let mut ikm = curve.encode_point(ephemeral);
    ikm.extend_from_slice(&curve.encode_point(shared));

    let mut info = label.to_vec();
    info.extend_from_slice(aad);

    let keys = seal::derive_keys(&ikm, &info);
    ikm.zeroize();
    keys
}

/// The ephemeral point must be a non-identity curve point
pub(crate) fn check_ephemeral(curve: &Curve, envelope: &Envelope) -> Result<()> {
    curve.validate(&envelope.ephemeral)?;
    if envelope.ephemeral.is_infinity() {
        return Err(Error::InvalidPoint("ephemeral point is the identity".into()));
    }
    Ok(())
}
