//! Threshold ECIES
//!
//! Anyone encrypts once to the aggregate key `Q`. Each share holder answers
//! with `s_i R`, which reveals nothing about `s_i`; any `t` of these combine
//! through Lagrange interpolation in the exponent into `Z = d R`, the shared
//! point the sender derived its keys from.

use crate::ec::{Curve, Point};
use crate::seal;
use crate::transport::{self, check_ephemeral};
use crate::types::{Envelope, KeyShare, ParticipantIndex};
use crate::vss::lagrange_coefficient;
use crate::{Error, Result};
use rand_core::{CryptoRng, RngCore};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use tracing::{debug, instrument};

const ECIES_LABEL: &[u8] = b"doublelock/ecies/v1";

/// `s_i R` from one share holder
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PartialDecryption {
    pub index: ParticipantIndex,
    pub point: Point,
}

/// Encrypt `plaintext` to the aggregate public key
pub fn encrypt<R: RngCore + CryptoRng>(
    curve: &Curve,
    public_key: &Point,
    plaintext: &[u8],
    aad: &[u8],
    rng: &mut R,
) -> Result<Envelope> {
    transport::seal_to_point(curve, ECIES_LABEL, public_key, aad, plaintext, rng)
}

/// This share holder's contribution to decrypting `envelope`
pub fn partial_decrypt(curve: &Curve, key_share: &KeyShare, envelope: &Envelope) -> Result<PartialDecryption> {
    check_ephemeral(curve, envelope)?;
    Ok(PartialDecryption {
        index: key_share.index,
        point: curve.mul(&key_share.secret_share(), &envelope.ephemeral)?,
    })
}

/// `Z = sum_i lambda_i (s_i R)`
///
/// Indices must be non-zero and pairwise distinct, and at least `threshold`
/// partials are required. All partials supplied are used.
#[instrument(skip(curve, partials), fields(count = partials.len()))]
pub fn combine(curve: &Curve, partials: &[PartialDecryption], threshold: u32) -> Result<Point> {
    let mut seen = HashSet::with_capacity(partials.len());
    for partial in partials {
        if partial.index == 0 {
            return Err(Error::InvalidIndex(0));
        }
        if !seen.insert(partial.index) {
            return Err(Error::DuplicateIndex(partial.index));
        }
        curve.validate(&partial.point)?;
    }
    if partials.len() < threshold as usize {
        return Err(Error::ThresholdNotMet {
            required: threshold as usize,
            actual: partials.len(),
        });
    }

    let indices: Vec<u32> = partials.iter().map(|p| p.index).collect();
    let mut weighted = Vec::with_capacity(partials.len());
    for partial in partials {
        let lambda = lagrange_coefficient(curve.order(), &indices, partial.index, 0)?;
        weighted.push(curve.mul(&lambda, &partial.point)?);
    }

    debug!(?indices, "partials combined");
    curve.sum(&weighted)
}

/// Decrypt with the combined point. The MAC is checked before decryption.
pub fn decrypt(curve: &Curve, shared: &Point, envelope: &Envelope, aad: &[u8]) -> Result<Vec<u8>> {
    check_ephemeral(curve, envelope)?;
    curve.validate(shared)?;
    let keys = transport::envelope_keys(curve, ECIES_LABEL, &envelope.ephemeral, shared, aad)?;
    seal::open(&keys, aad, &envelope.ciphertext, &envelope.tag)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keygen::testing::{drive_round_robin, new_session};
    use crate::keygen::DkgParticipant;
    use crate::policy::tests::sample_policy;
    use crate::policy::{
        combine_groups, group_partial, member_partial, open_double_locked, seal_double_locked,
    };
    use crate::store::MemoryStore;
    use crate::types::SessionParams;
    use rand::SeedableRng;
    use rand_chacha::ChaCha20Rng;

    async fn shares(n: u32, t: u32, seed: u64) -> Vec<DkgParticipant> {
        let store = MemoryStore::default();
        let mut rng = ChaCha20Rng::seed_from_u64(seed);
        let session_id = new_session(&store, SessionParams::new(n, t, 1).unwrap()).await;
        drive_round_robin(&store, &session_id, n, &mut rng).await
    }

    fn partials(curve: &Curve, parties: &[DkgParticipant], which: &[usize], env: &Envelope) -> Vec<PartialDecryption> {
        which
            .iter()
            .map(|&i| partial_decrypt(curve, parties[i].key_share().unwrap(), env).unwrap())
            .collect()
    }

    #[tokio::test]
    async fn test_any_quorum_decrypts() {
        let curve = Curve::secp256k1();
        let parties = shares(5, 3, 91).await;
        let public_key = &parties[0].key_share().unwrap().public_key;
        let mut rng = ChaCha20Rng::seed_from_u64(92);

        let envelope = encrypt(curve, public_key, b"quorum secret", b"doc-1", &mut rng).unwrap();

        for quorum in [&[0, 1, 2][..], &[2, 3, 4], &[0, 2, 4], &[0, 1, 2, 3, 4]] {
            let z = combine(curve, &partials(curve, &parties, quorum, &envelope), 3).unwrap();
            assert_eq!(
                decrypt(curve, &z, &envelope, b"doc-1").unwrap(),
                b"quorum secret"
            );
        }
    }

    #[tokio::test]
    async fn test_sub_threshold_quorum_fails() {
        let curve = Curve::secp256k1();
        let parties = shares(4, 3, 93).await;
        let public_key = &parties[0].key_share().unwrap().public_key;
        let mut rng = ChaCha20Rng::seed_from_u64(94);
        let envelope = encrypt(curve, public_key, b"m", b"", &mut rng).unwrap();

        let two = partials(curve, &parties, &[0, 1], &envelope);
        assert!(matches!(
            combine(curve, &two, 3),
            Err(Error::ThresholdNotMet { required: 3, actual: 2 })
        ));

        // interpolating anyway yields the wrong point and the MAC rejects it
        let z = combine(curve, &two, 2).unwrap();
        assert!(matches!(
            decrypt(curve, &z, &envelope, b""),
            Err(Error::MacMismatch)
        ));
    }

    #[tokio::test]
    async fn test_combine_guards() {
        let curve = Curve::secp256k1();
        let parties = shares(3, 2, 95).await;
        let public_key = &parties[0].key_share().unwrap().public_key;
        let mut rng = ChaCha20Rng::seed_from_u64(96);
        let envelope = encrypt(curve, public_key, b"m", b"", &mut rng).unwrap();

        let mut dup = partials(curve, &parties, &[0, 0], &envelope);
        assert!(matches!(combine(curve, &dup, 2), Err(Error::DuplicateIndex(1))));
        dup[1].index = 0;
        assert!(matches!(combine(curve, &dup, 2), Err(Error::InvalidIndex(0))));

        let good = partials(curve, &parties, &[0, 2], &envelope);
        let z = combine(curve, &good, 2).unwrap();
        assert!(matches!(
            decrypt(curve, &z, &envelope, b"other aad"),
            Err(Error::MacMismatch)
        ));
    }

    #[tokio::test]
    async fn test_double_locked_end_to_end() {
        let curve = Curve::secp256k1();
        let store = MemoryStore::default();
        let mut rng = ChaCha20Rng::seed_from_u64(97);
        let policy = sample_policy();
        let params = SessionParams::new(5, 3, 1)
            .unwrap()
            .with_policy(policy.clone())
            .unwrap();
        let session_id = new_session(&store, params).await;
        let parties = drive_round_robin(&store, &session_id, 5, &mut rng).await;
        let share = |i: u32| parties[i as usize - 1].key_share().unwrap();

        let envelope = seal_double_locked(
            curve,
            &share(1).public_key,
            share(1).group_key.as_ref().unwrap(),
            b"board minutes",
            b"doc-9",
            &mut rng,
        )
        .unwrap();

        // person quorum {1, 3, 5}
        let person: Vec<_> = [1, 3, 5]
            .iter()
            .map(|&i| partial_decrypt(curve, share(i), &envelope).unwrap())
            .collect();
        let z = combine(curve, &person, 3).unwrap();

        // group quorum {board, legal}
        let participating = vec!["board".to_string(), "legal".to_string()];
        let board: Vec<_> = [1, 2]
            .iter()
            .map(|&i| member_partial(curve, share(i), "board", &envelope).unwrap())
            .collect();
        let legal = vec![member_partial(curve, share(4), "legal", &envelope).unwrap()];
        let partials = vec![
            group_partial(curve, &policy, "board", &board, &participating).unwrap(),
            group_partial(curve, &policy, "legal", &legal, &participating).unwrap(),
        ];
        let s = combine_groups(curve, &policy, &partials, &participating).unwrap();

        assert_eq!(
            open_double_locked(curve, &z, &s, &envelope, b"doc-9").unwrap(),
            b"board minutes"
        );
        // the person quorum alone cannot stand in for the group lock
        assert!(matches!(
            open_double_locked(curve, &z, &z, &envelope, b"doc-9"),
            Err(Error::MacMismatch)
        ));
    }
}
