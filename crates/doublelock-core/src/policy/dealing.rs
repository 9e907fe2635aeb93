//! Hierarchical dealing of the group-quorum secret
//!
//! Every DKG participant `m` contributes an outer polynomial `F_m` with
//! `outer_threshold` coefficients and, for each group at position `g`, an
//! inner polynomial `f_{m,g}` with the group's inner threshold and
//! `f_{m,g}(0) = F_m(g)`. Summed over all honest dealers, member `j` of group
//! `g` ends up holding `f_g(local_j)` where `f_g(0) = F(g)` and `F(0) = e`.

use super::GroupPolicy;
use crate::ec::{Curve, Point};
use crate::types::ParticipantIndex;
use crate::vss::{self, Polynomial};
use crate::{Error, Result};
use num_bigint::BigUint;
use rand_core::{CryptoRng, RngCore};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// One participant's secret group polynomials. Never persisted; each
/// polynomial wipes its coefficients when the dealing is dropped.
pub struct GroupDealing {
    outer: Polynomial,
    inner: BTreeMap<String, Polynomial>,
}

impl GroupDealing {
    /// Sample the outer polynomial and one inner polynomial per group
    pub fn generate<R: RngCore + CryptoRng>(
        curve: &Curve,
        policy: &GroupPolicy,
        rng: &mut R,
    ) -> Result<Self> {
        let outer = vss::poly_generate(curve, policy.outer_threshold as usize, rng)?;

        let mut inner = BTreeMap::new();
        for group in policy.groups.keys() {
            let anchor = vss::poly_eval_at(curve, &outer, policy.position(group)?)?;
            let poly =
                vss::poly_generate_with_constant(curve, &anchor, policy.inner_threshold(group)?, rng)?;
            inner.insert(group.clone(), poly);
        }

        Ok(Self { outer, inner })
    }

    /// Public commitments to every polynomial
    pub fn commitments(&self, curve: &Curve) -> Result<GroupCommitments> {
        let inner = self
            .inner
            .iter()
            .map(|(group, poly)| Ok((group.clone(), vss::poly_commitments(curve, poly)?)))
            .collect::<Result<_>>()?;

        Ok(GroupCommitments {
            outer: vss::poly_commitments(curve, &self.outer)?,
            inner,
        })
    }

    /// Inner shares for `participant`, one per group it belongs to
    pub fn shares_for(
        &self,
        curve: &Curve,
        policy: &GroupPolicy,
        participant: ParticipantIndex,
    ) -> Result<BTreeMap<String, BigUint>> {
        policy
            .groups_of(participant)
            .into_iter()
            .map(|group| {
                let poly = self
                    .inner
                    .get(group)
                    .ok_or_else(|| Error::InvalidState(format!("no polynomial for group {group}")))?;
                let local = policy.local_index(group, participant)?;
                Ok((group.to_string(), vss::poly_eval_at(curve, poly, local)?))
            })
            .collect()
    }
}

impl std::fmt::Debug for GroupDealing {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GroupDealing")
            .field("groups", &self.inner.keys().collect::<Vec<_>>())
            .finish_non_exhaustive()
    }
}

/// Published commitments to one participant's group polynomials
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroupCommitments {
    /// `[b_k G]` for the outer polynomial
    pub outer: Vec<Point>,
    /// Group name to the commitments of its inner polynomial
    pub inner: BTreeMap<String, Vec<Point>>,
}

impl GroupCommitments {
    /// This dealer's contribution to the group key `E`
    pub fn group_key_contribution(&self) -> Result<&Point> {
        self.outer
            .first()
            .ok_or_else(|| Error::VerificationFailed("empty outer commitments".into()))
    }

    /// Check shape and on-curve points, and that each inner constant commits
    /// to the outer polynomial at the group's position
    pub fn verify_structure(&self, curve: &Curve, policy: &GroupPolicy) -> Result<()> {
        if self.outer.len() != policy.outer_threshold as usize {
            return Err(Error::VerificationFailed(format!(
                "expected {} outer commitments, got {}",
                policy.outer_threshold,
                self.outer.len()
            )));
        }
        if self.inner.len() != policy.groups.len() {
            return Err(Error::VerificationFailed(format!(
                "expected {} inner commitment vectors, got {}",
                policy.groups.len(),
                self.inner.len()
            )));
        }
        for point in &self.outer {
            curve.validate(point)?;
        }

        for group in policy.groups.keys() {
            let inner = self.inner.get(group).ok_or_else(|| {
                Error::VerificationFailed(format!("missing commitments for group {group}"))
            })?;
            if inner.len() != policy.inner_threshold(group)? {
                return Err(Error::VerificationFailed(format!(
                    "wrong commitment count for group {group}"
                )));
            }
            for point in inner {
                curve.validate(point)?;
            }

            let anchor = vss::commitment_eval(curve, &self.outer, policy.position(group)?)?;
            if inner[0] != anchor {
                return Err(Error::VerificationFailed(format!(
                    "inner commitments of group {group} are not anchored to the outer polynomial"
                )));
            }
        }

        Ok(())
    }

    /// Feldman check of an inner share received by `participant` for `group`
    pub fn verify_share(
        &self,
        curve: &Curve,
        policy: &GroupPolicy,
        group: &str,
        participant: ParticipantIndex,
        share: &BigUint,
    ) -> Result<bool> {
        let commitments = self
            .inner
            .get(group)
            .ok_or_else(|| Error::VerificationFailed(format!("missing commitments for group {group}")))?;
        let local = policy.local_index(group, participant)?;
        vss::verify_share(curve, local, share, commitments)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policy::tests::sample_policy;
    use num_bigint::BigUint;
    use rand::SeedableRng;
    use rand_chacha::ChaCha20Rng;

    #[test]
    fn test_dealing_is_consistent() {
        let curve = Curve::secp256k1();
        let policy = sample_policy();
        let mut rng = ChaCha20Rng::seed_from_u64(41);

        let dealing = GroupDealing::generate(curve, &policy, &mut rng).unwrap();
        let commitments = dealing.commitments(curve).unwrap();
        commitments.verify_structure(curve, &policy).unwrap();

        for participant in 1..=5 {
            let shares = dealing.shares_for(curve, &policy, participant).unwrap();
            assert_eq!(shares.len(), policy.groups_of(participant).len());
            for (group, share) in &shares {
                assert!(commitments
                    .verify_share(curve, &policy, group, participant, share)
                    .unwrap());
                let wrong = (share + BigUint::from(1u32)) % curve.order();
                assert!(!commitments
                    .verify_share(curve, &policy, group, participant, &wrong)
                    .unwrap());
            }
        }
    }

    #[test]
    fn test_unanchored_inner_commitments_are_rejected() {
        let curve = Curve::secp256k1();
        let policy = sample_policy();
        let mut rng = ChaCha20Rng::seed_from_u64(42);

        let mut commitments = GroupDealing::generate(curve, &policy, &mut rng)
            .unwrap()
            .commitments(curve)
            .unwrap();
        let other = GroupDealing::generate(curve, &policy, &mut rng)
            .unwrap()
            .commitments(curve)
            .unwrap();
        commitments
            .inner
            .insert("legal".into(), other.inner["legal"].clone());

        assert!(matches!(
            commitments.verify_structure(curve, &policy),
            Err(Error::VerificationFailed(_))
        ));
    }

    #[test]
    fn test_wrong_shape_is_rejected() {
        let curve = Curve::secp256k1();
        let policy = sample_policy();
        let mut rng = ChaCha20Rng::seed_from_u64(43);

        let mut commitments = GroupDealing::generate(curve, &policy, &mut rng)
            .unwrap()
            .commitments(curve)
            .unwrap();
        commitments.outer.pop();
        assert!(commitments.verify_structure(curve, &policy).is_err());
    }
}
