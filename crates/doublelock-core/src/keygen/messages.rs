//! DKG artifacts exchanged through the session store

use crate::ec::Point;
use crate::policy::GroupCommitments;
use crate::types::{hex_bytes, Envelope, ParticipantIndex};
use serde::{Deserialize, Serialize};
use zeroize::{Zeroize, ZeroizeOnDrop};

/// Round 1: Feldman commitments of one participant
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommitmentSet {
    /// Sender index
    pub from: ParticipantIndex,
    /// `[a_k G]` for `k` in `0..t`
    pub coefficients: Vec<Point>,
    /// Commitments to the group polynomials, present when the session has a policy
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group: Option<GroupCommitments>,
}

/// Round 2: a share encrypted to its receiver's transport key
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EncryptedShare {
    pub from: ParticipantIndex,
    pub to: ParticipantIndex,
    pub envelope: Envelope,
    /// Roster hash the sender dealt against
    pub transcript_hash: String,
}

/// Plaintext inside an [`EncryptedShare`]
#[derive(Serialize, Deserialize, Zeroize, ZeroizeOnDrop)]
pub(crate) struct SharePayload {
    /// `s_{i->j}`
    #[serde(with = "hex_bytes")]
    pub value: Vec<u8>,
    /// Inner shares, one for each group the receiver belongs to
    #[serde(default)]
    pub groups: Vec<GroupValue>,
}

#[derive(Serialize, Deserialize, Zeroize)]
pub(crate) struct GroupValue {
    pub group: String,
    #[serde(with = "hex_bytes")]
    pub value: Vec<u8>,
}

/// Round 3: published once a participant has finalized
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReadyMarker {
    pub from: ParticipantIndex,
    /// SHA-256 of the encoded public key, followed by the group key if any
    pub key_hash: String,
    /// SHA-256 over the roster and every valid commitment set
    pub transcript_hash: String,
}
