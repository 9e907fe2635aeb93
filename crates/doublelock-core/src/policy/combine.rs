//! Hierarchical threshold evaluation and content-key derivation

use super::GroupPolicy;
use crate::ec::{Curve, Point};
use crate::seal::{self, SealKeys};
use crate::transport::check_ephemeral;
use crate::types::{Envelope, KeyShare, ParticipantIndex};
use crate::vss::lagrange_coefficient;
use crate::{Error, Result};
use rand_core::{CryptoRng, RngCore};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use tracing::{debug, instrument};
use zeroize::Zeroize;

const CEK_LABEL: &[u8] = b"doublelock/cek/v1";

/// `s_{j,g} R` from one member of one group
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemberPartial {
    pub group: String,
    pub index: ParticipantIndex,
    pub point: Point,
}

/// A group's weighted contribution to `S = e R`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroupPartial {
    pub group: String,
    /// Members whose partials were combined, ascending
    pub contributors: Vec<ParticipantIndex>,
    /// Participating groups the outer weight was computed for, sorted
    pub participating: Vec<String>,
    pub point: Point,
}

/// Compute this member's partial for `group` against the envelope's ephemeral point
pub fn member_partial(
    curve: &Curve,
    key_share: &KeyShare,
    group: &str,
    envelope: &Envelope,
) -> Result<MemberPartial> {
    let share = key_share.group_share(group).ok_or_else(|| {
        Error::InvalidConfig(format!(
            "participant {} holds no share for group {group}",
            key_share.index
        ))
    })?;
    check_ephemeral(curve, envelope)?;

    let point = curve.mul(&share.secret(), &envelope.ephemeral)?;

    Ok(MemberPartial {
        group: group.to_string(),
        index: key_share.index,
        point,
    })
}

/// Combine the present members of one group
///
/// The result is `mu_g * sum_j lambda_j s_{j,g} R`, with `lambda_j` over the
/// present members' local indices and `mu_g` over the positions of the
/// participating groups.
#[instrument(skip(curve, policy, member_partials), fields(count = member_partials.len()))]
pub fn group_partial(
    curve: &Curve,
    policy: &GroupPolicy,
    group: &str,
    member_partials: &[MemberPartial],
    participating: &[String],
) -> Result<GroupPartial> {
    if !participating.iter().any(|g| g == group) {
        return Err(Error::InvalidConfig(format!(
            "group {group} is not among the participating groups"
        )));
    }
    let positions = policy.participating_positions(participating)?;
    let position = policy.position(group)?;
    let required = policy.inner_threshold(group)?;

    let mut seen = HashSet::new();
    let mut locals = Vec::with_capacity(member_partials.len());
    for partial in member_partials {
        if partial.group != group {
            return Err(Error::InvalidConfig(format!(
                "partial for group {} passed to group {group}",
                partial.group
            )));
        }
        if !seen.insert(partial.index) {
            return Err(Error::DuplicateIndex(partial.index));
        }
        curve.validate(&partial.point)?;
        locals.push(policy.local_index(group, partial.index)?);
    }

    if member_partials.len() < required {
        return Err(Error::InnerThresholdNotMet {
            group: group.to_string(),
            required,
            actual: member_partials.len(),
        });
    }

    let q = curve.order();
    let mu = lagrange_coefficient(q, &positions, position, 0)?;

    let mut weighted = Vec::with_capacity(member_partials.len());
    for (partial, &local) in member_partials.iter().zip(&locals) {
        let lambda = lagrange_coefficient(q, &locals, local, 0)?;
        weighted.push(curve.mul(&((lambda * &mu) % q), &partial.point)?);
    }
    let point = curve.sum(&weighted)?;

    let mut contributors: Vec<_> = member_partials.iter().map(|p| p.index).collect();
    contributors.sort_unstable();
    let mut participating = participating.to_vec();
    participating.sort();

    debug!(group, ?contributors, "group partial combined");
    Ok(GroupPartial {
        group: group.to_string(),
        contributors,
        participating,
        point,
    })
}

/// Evaluate the policy over the participating groups and return `S`
///
/// Fails closed when the veto group is absent or short of its inner
/// threshold, or when fewer than `outer_threshold` groups participate.
#[instrument(skip(curve, policy, partials))]
pub fn combine_groups(
    curve: &Curve,
    policy: &GroupPolicy,
    partials: &[GroupPartial],
    participating: &[String],
) -> Result<Point> {
    policy.participating_positions(participating)?;

    if let Some(veto) = &policy.veto_group {
        if !participating.contains(veto) {
            return Err(Error::VetoGroupMissing(veto.clone()));
        }
        check_inner_threshold(policy, partials.iter().filter(|p| &p.group == veto))?;
    }

    let required = policy.outer_threshold as usize;
    if participating.len() < required {
        return Err(Error::OuterThresholdNotMet {
            required,
            actual: participating.len(),
        });
    }

    let mut expected_set = participating.to_vec();
    expected_set.sort();

    let mut covered = HashSet::new();
    for partial in partials {
        if !participating.contains(&partial.group) {
            return Err(Error::InvalidConfig(format!(
                "partial from non-participating group {}",
                partial.group
            )));
        }
        if !covered.insert(partial.group.as_str()) {
            return Err(Error::InvalidConfig(format!(
                "more than one partial for group {}",
                partial.group
            )));
        }
        if partial.participating != expected_set {
            return Err(Error::InvalidConfig(format!(
                "partial for group {} was weighted for a different set of groups",
                partial.group
            )));
        }
        check_inner_threshold(policy, std::iter::once(partial))?;
        curve.validate(&partial.point)?;
    }

    if let Some(missing) = participating.iter().find(|g| !covered.contains(g.as_str())) {
        return Err(Error::InvalidConfig(format!("no partial for group {missing}")));
    }

    curve.sum(partials.iter().map(|p| &p.point))
}

fn check_inner_threshold<'a>(
    policy: &GroupPolicy,
    partials: impl IntoIterator<Item = &'a GroupPartial>,
) -> Result<()> {
    for partial in partials {
        let required = policy.inner_threshold(&partial.group)?;
        if partial.contributors.len() < required {
            return Err(Error::InnerThresholdNotMet {
                group: partial.group.clone(),
                required,
                actual: partial.contributors.len(),
            });
        }
    }
    Ok(())
}

/// Content keys from the person-quorum point `Z` and the group-quorum point `S`
pub fn derive_cek(curve: &Curve, z: &Point, s: &Point, aad: &[u8]) -> Result<SealKeys> {
    for (name, point) in [("person", z), ("group", s)] {
        curve.validate(point)?;
        if point.is_infinity() {
            return Err(Error::InvalidPoint(format!("{name} quorum point is the identity")));
        }
    }

    let mut ikm = curve.encode_point(z);
    ikm.extend_from_slice(&curve.encode_point(s));
    let mut info = CEK_LABEL.to_vec();
    info.extend_from_slice(aad);

    let keys = seal::derive_keys(&ikm, &info);
    ikm.zeroize();
    keys
}

/// Encrypt so that opening needs both `Z = r Q` and `S = r E`
pub fn seal_double_locked<R: RngCore + CryptoRng>(
    curve: &Curve,
    public_key: &Point,
    group_key: &Point,
    plaintext: &[u8],
    aad: &[u8],
    rng: &mut R,
) -> Result<Envelope> {
    for key in [public_key, group_key] {
        curve.validate(key)?;
        if key.is_infinity() {
            return Err(Error::InvalidPoint("cannot encrypt to the identity".into()));
        }
    }

    let r = curve.random_scalar(rng);
    let ephemeral = curve.mul_base(&r)?;
    let z = curve.mul(&r, public_key)?;
    let s = curve.mul(&r, group_key)?;

    let keys = derive_cek(curve, &z, &s, aad)?;
    let (ciphertext, tag) = seal::seal(&keys, aad, plaintext)?;

    Ok(Envelope {
        ephemeral,
        ciphertext,
        tag: tag.to_vec(),
    })
}

/// Open a double-locked envelope with both reconstructed points
pub fn open_double_locked(
    curve: &Curve,
    z: &Point,
    s: &Point,
    envelope: &Envelope,
    aad: &[u8],
) -> Result<Vec<u8>> {
    check_ephemeral(curve, envelope)?;
    let keys = derive_cek(curve, z, s, aad)?;
    seal::open(&keys, aad, &envelope.ciphertext, &envelope.tag)
}
