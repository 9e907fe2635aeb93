//! Group policy combiner ("double lock")
//!
//! A [`GroupPolicy`] names groups of participants, gives each an inner
//! threshold, requires an outer threshold of groups and optionally a veto
//! group. Content sealed with [`seal_double_locked`] needs two independent
//! quorums: a person quorum reconstructing `Z = d R` through threshold ECIES,
//! and a group quorum reconstructing `S = e R` through [`group_partial`] and
//! [`combine_groups`].
//!
//! The group secret `e` is dealt hierarchically during the DKG (see
//! [`GroupDealing`]): each group holds a share `F(g)` of an outer polynomial,
//! itself shared among the group's members with the group's inner threshold.
//! A group's partial folds in both its inner Lagrange weights and the outer
//! weight of its position among the participating groups, so combining
//! groups is a plain point sum.

mod combine;
mod dealing;

pub use combine::{
    combine_groups, derive_cek, group_partial, member_partial, open_double_locked,
    seal_double_locked, GroupPartial, MemberPartial,
};
pub use dealing::{GroupCommitments, GroupDealing};

use crate::types::ParticipantIndex;
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};

/// Declarative group policy document
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupPolicy {
    /// Group name to member participant indices
    pub groups: BTreeMap<String, Vec<ParticipantIndex>>,
    /// Number of groups that must take part
    pub outer_threshold: u32,
    /// Group name to the number of members that must take part
    pub inner_thresholds: BTreeMap<String, u32>,
    /// Group that must always take part
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub veto_group: Option<String>,
}

impl GroupPolicy {
    /// Parse a JSON policy document
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(|e| Error::InvalidConfig(format!("policy: {e}")))
    }

    /// Validate the policy for a session of `n` participants
    pub fn validate(&self, n: u32) -> Result<()> {
        if self.groups.is_empty() {
            return Err(Error::InvalidConfig("policy has no groups".into()));
        }

        for (name, members) in &self.groups {
            if members.is_empty() {
                return Err(Error::InvalidConfig(format!("group {name} has no members")));
            }
            let mut seen = HashSet::new();
            for &member in members {
                if member == 0 || member > n {
                    return Err(Error::InvalidIndex(member));
                }
                if !seen.insert(member) {
                    return Err(Error::DuplicateIndex(member));
                }
            }

            let inner = self.inner_thresholds.get(name).copied().ok_or_else(|| {
                Error::InvalidConfig(format!("group {name} has no inner threshold"))
            })?;
            if inner == 0 || inner as usize > members.len() {
                return Err(Error::InvalidConfig(format!(
                    "inner threshold {inner} of group {name} must be in 1..={}",
                    members.len()
                )));
            }
        }

        if let Some(unknown) = self
            .inner_thresholds
            .keys()
            .find(|name| !self.groups.contains_key(*name))
        {
            return Err(Error::InvalidConfig(format!(
                "inner threshold for unknown group {unknown}"
            )));
        }

        if self.outer_threshold == 0 || self.outer_threshold as usize > self.groups.len() {
            return Err(Error::InvalidConfig(format!(
                "outer threshold {} must be in 1..={}",
                self.outer_threshold,
                self.groups.len()
            )));
        }

        if let Some(veto) = &self.veto_group {
            if !self.groups.contains_key(veto) {
                return Err(Error::InvalidConfig(format!(
                    "veto group {veto} is not a configured group"
                )));
            }
        }

        Ok(())
    }

    /// 1-based position of a group in name order
    pub fn position(&self, group: &str) -> Result<u32> {
        self.groups
            .keys()
            .position(|name| name == group)
            .map(|p| p as u32 + 1)
            .ok_or_else(|| Error::InvalidConfig(format!("unknown group {group}")))
    }

    /// Members of a group in ascending index order
    pub fn members(&self, group: &str) -> Result<Vec<ParticipantIndex>> {
        let mut members = self
            .groups
            .get(group)
            .cloned()
            .ok_or_else(|| Error::InvalidConfig(format!("unknown group {group}")))?;
        members.sort_unstable();
        Ok(members)
    }

    /// 1-based position of `participant` among the group's sorted members
    pub fn local_index(&self, group: &str, participant: ParticipantIndex) -> Result<u32> {
        self.members(group)?
            .iter()
            .position(|&m| m == participant)
            .map(|p| p as u32 + 1)
            .ok_or(Error::InvalidIndex(participant))
    }

    pub fn inner_threshold(&self, group: &str) -> Result<usize> {
        self.inner_thresholds
            .get(group)
            .map(|&t| t as usize)
            .ok_or_else(|| Error::InvalidConfig(format!("unknown group {group}")))
    }

    /// Names of the groups `participant` belongs to
    pub fn groups_of(&self, participant: ParticipantIndex) -> Vec<&str> {
        self.groups
            .iter()
            .filter(|(_, members)| members.contains(&participant))
            .map(|(name, _)| name.as_str())
            .collect()
    }

    /// Positions of the participating groups, rejecting unknown or repeated names
    pub(crate) fn participating_positions(&self, participating: &[String]) -> Result<Vec<u32>> {
        let mut seen = HashSet::new();
        participating
            .iter()
            .map(|name| {
                if !seen.insert(name.as_str()) {
                    return Err(Error::InvalidConfig(format!("group {name} listed twice")));
                }
                self.position(name)
            })
            .collect()
    }
}
