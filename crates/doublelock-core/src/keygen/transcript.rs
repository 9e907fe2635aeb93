//! Hashes that bind a DKG run together

use super::CommitmentSet;
use crate::ec::{Curve, Point};
use crate::types::SessionState;
use crate::Result;
use sha2::{Digest, Sha256};

const ROSTER_LABEL: &[u8] = b"doublelock/roster/v1";
const TRANSCRIPT_LABEL: &[u8] = b"doublelock/transcript/v1";

fn update_bytes(hasher: &mut Sha256, bytes: &[u8]) {
    hasher.update((bytes.len() as u64).to_be_bytes());
    hasher.update(bytes);
}

fn update_points(curve: &Curve, hasher: &mut Sha256, points: &[Point]) {
    hasher.update((points.len() as u64).to_be_bytes());
    for point in points {
        update_bytes(hasher, &curve.encode_point(point));
    }
}

/// Session parameters and every participant with its transport key
pub fn roster_hash(curve: &Curve, state: &SessionState) -> Result<String> {
    let session = &state.session;
    let mut hasher = Sha256::new();
    hasher.update(ROSTER_LABEL);
    update_bytes(&mut hasher, session.id.as_bytes());
    hasher.update(session.n.to_be_bytes());
    hasher.update(session.t.to_be_bytes());
    hasher.update(session.epoch.to_be_bytes());
    match &session.policy {
        Some(policy) => update_bytes(&mut hasher, &serde_json::to_vec(policy)?),
        None => update_bytes(&mut hasher, &[]),
    }

    for participant in &state.participants {
        hasher.update(participant.index.to_be_bytes());
        update_bytes(&mut hasher, participant.participant_id.as_bytes());
        update_bytes(&mut hasher, &curve.encode_point(&participant.transport_public_key));
    }
    Ok(hex::encode(hasher.finalize()))
}

/// Roster hash followed by the accepted commitment sets in sender order
pub fn transcript_hash(curve: &Curve, roster: &str, accepted: &[&CommitmentSet]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(TRANSCRIPT_LABEL);
    update_bytes(&mut hasher, roster.as_bytes());

    for set in accepted {
        hasher.update(set.from.to_be_bytes());
        update_points(curve, &mut hasher, &set.coefficients);
        if let Some(group) = &set.group {
            update_points(curve, &mut hasher, &group.outer);
            for (name, inner) in &group.inner {
                update_bytes(&mut hasher, name.as_bytes());
                update_points(curve, &mut hasher, inner);
            }
        }
    }
    hex::encode(hasher.finalize())
}

/// `SHA-256(encode(Q) [|| encode(E)])`
pub fn key_hash(curve: &Curve, public_key: &Point, group_key: Option<&Point>) -> String {
    let mut hasher = Sha256::new();
    hasher.update(curve.encode_point(public_key));
    if let Some(group_key) = group_key {
        hasher.update(curve.encode_point(group_key));
    }
    hex::encode(hasher.finalize())
}
