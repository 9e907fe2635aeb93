//! Mapping between DKG artifacts and session-store records
//!
//! The session descriptor is the JSON of [`SessionParams`], an enrollment
//! carries the participant's transport key, and each artifact is one record
//! keyed by `(session, kind, from, to)`.

use crate::ec::Point;
use crate::keygen::{CommitmentSet, EncryptedShare, ReadyMarker};
use crate::types::{Participant, SessionInfo, SessionParams, SessionState};
use crate::{Error, Result};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use session_store::{RecordId, RecordKind, SessionSnapshot};
use tracing::warn;

/// Enrollment payload
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnrollmentPayload {
    pub transport_public_key: Point,
}

fn serialize<T: Serialize>(value: &T) -> Result<Vec<u8>> {
    serde_json::to_vec(value).map_err(|e| Error::Serialization(e.to_string()))
}

fn deserialize<T: DeserializeOwned>(bytes: &[u8]) -> Result<T> {
    serde_json::from_slice(bytes).map_err(|e| Error::Deserialization(e.to_string()))
}

/// Validated session descriptor
pub fn encode_params(params: &SessionParams) -> Result<Vec<u8>> {
    params.validate()?;
    serialize(params)
}

pub fn encode_enrollment(transport_public_key: &Point) -> Result<Vec<u8>> {
    serialize(&EnrollmentPayload {
        transport_public_key: transport_public_key.clone(),
    })
}

pub fn commitments_record(
    session_id: &str,
    commitments: &CommitmentSet,
) -> Result<(RecordId, Vec<u8>)> {
    let id = RecordId::new(session_id, RecordKind::Commitments, commitments.from, None);
    Ok((id, serialize(commitments)?))
}

pub fn share_record(session_id: &str, share: &EncryptedShare) -> Result<(RecordId, Vec<u8>)> {
    let id = RecordId::new(session_id, RecordKind::Share, share.from, Some(share.to));
    Ok((id, serialize(share)?))
}

pub fn ready_record(session_id: &str, marker: &ReadyMarker) -> Result<(RecordId, Vec<u8>)> {
    let id = RecordId::new(session_id, RecordKind::Ready, marker.from, None);
    Ok((id, serialize(marker)?))
}

/// Decode a snapshot into typed session state
///
/// The descriptor must decode into valid session parameters. Enrollments and records written by peers that fail to decode, or
/// whose body disagrees with the record key, are dropped with a warning.
pub fn decode_snapshot(snapshot: SessionSnapshot) -> Result<SessionState> {
    let params: SessionParams = deserialize(&snapshot.descriptor)?;
    params.validate()?;
    let session = SessionInfo::from_params(snapshot.session_id.clone(), params);

    let mut participants = Vec::with_capacity(snapshot.participants.len());
    for enrollment in snapshot.participants {
        match deserialize::<EnrollmentPayload>(&enrollment.payload) {
            Ok(payload) => participants.push(Participant {
                index: enrollment.index,
                participant_id: enrollment.participant_id,
                transport_public_key: payload.transport_public_key,
            }),
            Err(e) => warn!(
                session_id = %snapshot.session_id,
                index = enrollment.index,
                error = %e,
                "Dropping malformed enrollment"
            ),
        }
    }
    participants.sort_by_key(|p| p.index);

    let mut state = SessionState {
        session,
        participants,
        commitment_sets: Vec::new(),
        share_inbox: Vec::new(),
        ready_markers: Vec::new(),
    };

    for record in snapshot.records {
        let id = &record.id;
        let decoded = match id.kind {
            RecordKind::Commitments => deserialize::<CommitmentSet>(&record.payload).and_then(|c| {
                check_key(c.from == id.from && id.to.is_none())?;
                state.commitment_sets.push(c);
                Ok(())
            }),
            RecordKind::Share => deserialize::<EncryptedShare>(&record.payload).and_then(|s| {
                check_key(s.from == id.from && Some(s.to) == id.to)?;
                state.share_inbox.push(s);
                Ok(())
            }),
            RecordKind::Ready => deserialize::<ReadyMarker>(&record.payload).and_then(|r| {
                check_key(r.from == id.from && id.to.is_none())?;
                state.ready_markers.push(r);
                Ok(())
            }),
        };
        if let Err(e) = decoded {
            warn!(
                session_id = %snapshot.session_id,
                kind = id.kind.as_str(),
                from = id.from,
                error = %e,
                "Dropping malformed record"
            );
        }
    }

    state.commitment_sets.sort_by_key(|c| c.from);
    state.share_inbox.sort_by_key(|s| (s.from, s.to));
    state.ready_markers.sort_by_key(|r| r.from);
    Ok(state)
}

fn check_key(matches: bool) -> Result<()> {
    if matches {
        Ok(())
    } else {
        Err(Error::Deserialization("record body does not match its key".into()))
    }
}
