//! Core types for the key generation session and its outputs

use crate::ec::Point;
use crate::keygen::{CommitmentSet, EncryptedShare, ReadyMarker};
use crate::policy::GroupPolicy;
use crate::{Error, Result};
use num_bigint::BigUint;
use serde::{Deserialize, Serialize};
use zeroize::{Zeroize, ZeroizeOnDrop};

/// 1-based position of a participant in a session, assigned in join order
pub type ParticipantIndex = u32;

/// Unique identifier for a session, assigned by the store
pub type SessionId = String;

/// Parameters chosen by whoever creates a session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionParams {
    /// Number of participants
    pub n: u32,
    /// Threshold (t-of-n)
    pub t: u32,
    /// Caller-defined epoch, bound into every transcript
    pub epoch: u64,
    /// Optional group policy for double-locked content
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub policy: Option<GroupPolicy>,
}

impl SessionParams {
    /// Create new session parameters
    pub fn new(n: u32, t: u32, epoch: u64) -> Result<Self> {
        let params = Self {
            n,
            t,
            epoch,
            policy: None,
        };
        params.validate()?;
        Ok(params)
    }

    /// Attach a group policy
    pub fn with_policy(mut self, policy: GroupPolicy) -> Result<Self> {
        self.policy = Some(policy);
        self.validate()?;
        Ok(self)
    }

    /// Check `1 <= t <= n` and the policy, if any, against `n`
    pub fn validate(&self) -> Result<()> {
        if self.t == 0 {
            return Err(Error::InvalidConfig("Threshold must be at least 1".into()));
        }
        if self.t > self.n {
            return Err(Error::InvalidConfig(
                "Threshold cannot exceed number of parties".into(),
            ));
        }
        if let Some(policy) = &self.policy {
            policy.validate(self.n)?;
        }
        Ok(())
    }
}

/// An immutable session as published by the store
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionInfo {
    pub id: SessionId,
    pub n: u32,
    pub t: u32,
    pub epoch: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub policy: Option<GroupPolicy>,
}

impl SessionInfo {
    pub fn from_params(id: SessionId, params: SessionParams) -> Self {
        Self {
            id,
            n: params.n,
            t: params.t,
            epoch: params.epoch,
            policy: params.policy,
        }
    }
}

/// A participant that joined a session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Participant {
    pub index: ParticipantIndex,
    pub participant_id: String,
    pub transport_public_key: Point,
}

/// Everything a participant can observe about a session
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionState {
    pub session: SessionInfo,
    /// Participants in index order
    pub participants: Vec<Participant>,
    /// Published commitment sets, ordered by sender
    pub commitment_sets: Vec<CommitmentSet>,
    /// Every submitted share; each is readable only by its receiver
    pub share_inbox: Vec<EncryptedShare>,
    pub ready_markers: Vec<ReadyMarker>,
}

impl SessionState {
    pub fn participant(&self, index: ParticipantIndex) -> Option<&Participant> {
        self.participants.iter().find(|p| p.index == index)
    }

    pub fn commitments_of(&self, index: ParticipantIndex) -> Option<&CommitmentSet> {
        self.commitment_sets.iter().find(|c| c.from == index)
    }

    /// Shares addressed to `index`
    pub fn inbox_for(&self, index: ParticipantIndex) -> impl Iterator<Item = &EncryptedShare> {
        self.share_inbox.iter().filter(move |s| s.to == index)
    }
}

/// ECIES envelope: ephemeral point, ciphertext and MAC tag
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    pub ephemeral: Point,
    #[serde(with = "hex_bytes")]
    pub ciphertext: Vec<u8>,
    #[serde(with = "hex_bytes")]
    pub tag: Vec<u8>,
}

/// A participant's share of one group's secret
#[derive(Clone, Serialize, Deserialize, Zeroize, ZeroizeOnDrop)]
pub struct GroupShare {
    /// Group name
    pub group: String,
    /// 1-based position of the group in name order
    pub position: u32,
    /// 1-based position of the participant in the group's sorted member list
    pub local_index: u32,
    #[serde(with = "hex_bytes")]
    secret: Vec<u8>,
}

impl GroupShare {
    pub fn new(group: String, position: u32, local_index: u32, secret: Vec<u8>) -> Self {
        Self {
            group,
            position,
            local_index,
            secret,
        }
    }

    pub fn secret(&self) -> BigUint {
        BigUint::from_bytes_be(&self.secret)
    }
}

impl std::fmt::Debug for GroupShare {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GroupShare")
            .field("group", &self.group)
            .field("local_index", &self.local_index)
            .finish_non_exhaustive()
    }
}

/// Key share held by a participant after DKG
#[derive(Clone, Serialize, Deserialize, Zeroize, ZeroizeOnDrop)]
pub struct KeyShare {
    /// Session the share belongs to
    pub session_id: SessionId,

    /// This participant's index
    pub index: ParticipantIndex,

    /// Total number of parties
    pub n_parties: u32,

    /// Threshold
    pub threshold: u32,

    /// This participant's secret share s_i, fixed-width big-endian
    #[serde(with = "hex_bytes")]
    secret_share: Vec<u8>,

    /// Aggregate public key Q
    #[zeroize(skip)]
    pub public_key: Point,

    /// Senders whose contribution failed decryption or verification
    pub excluded: Vec<ParticipantIndex>,

    /// Shares of the group-quorum secret, one per group this participant belongs to
    #[serde(default)]
    pub group_shares: Vec<GroupShare>,

    /// Group-quorum public key E
    #[zeroize(skip)]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group_key: Option<Point>,

    /// Policy the group shares were dealt under
    #[zeroize(skip)]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub policy: Option<GroupPolicy>,
}

impl KeyShare {
    pub(crate) fn new(
        session: &SessionInfo,
        index: ParticipantIndex,
        secret_share: Vec<u8>,
        public_key: Point,
        excluded: Vec<ParticipantIndex>,
    ) -> Self {
        Self {
            session_id: session.id.clone(),
            index,
            n_parties: session.n,
            threshold: session.t,
            secret_share,
            public_key,
            excluded,
            group_shares: Vec::new(),
            group_key: None,
            policy: None,
        }
    }

    /// The secret share as an integer
    pub fn secret_share(&self) -> BigUint {
        BigUint::from_bytes_be(&self.secret_share)
    }

    /// This participant's share for `group`, if it is a member
    pub fn group_share(&self, group: &str) -> Option<&GroupShare> {
        self.group_shares.iter().find(|g| g.group == group)
    }
}

impl std::fmt::Debug for KeyShare {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyShare")
            .field("session_id", &self.session_id)
            .field("index", &self.index)
            .field("threshold", &self.threshold)
            .field("public_key", &self.public_key)
            .field("excluded", &self.excluded)
            .finish_non_exhaustive()
    }
}

pub(crate) mod hex_bytes {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&hex::encode(bytes))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Vec<u8>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        hex::decode(s).map_err(serde::de::Error::custom)
    }
}
