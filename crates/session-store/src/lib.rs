//! Session Store Library
//!
//! Append-only record store shared by the participants of a key generation
//! session. The store is payload-agnostic: descriptors, enrollments and
//! records are opaque bytes, and the only rules enforced here are the ones
//! that keep the store append-only:
//!
//! - a participant id can join a session once, and indices are handed out in
//!   join order starting at 1;
//! - a record is keyed by `(session, kind, from, to)` and can be written once;
//! - sessions expire after a TTL and are then swept by [`RecordStore::cleanup`].

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use thiserror::Error;
use uuid::Uuid;

/// Session lifetime when none is configured
pub const DEFAULT_TTL_SECONDS: i64 = 3600;

/// Store error types
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("Duplicate: {0}")]
    Duplicate(String),
    #[error("Session {session_id} is full ({capacity} participants)")]
    SessionFull { session_id: String, capacity: u32 },
    #[error("Invalid record: {0}")]
    InvalidFormat(String),
    #[error("Session expired: {0}")]
    SessionExpired(String),
}

impl StoreError {
    /// Stable machine-readable error code
    pub fn code(&self) -> &'static str {
        match self {
            StoreError::NotFound(_) => "not_found",
            StoreError::Duplicate(_) => "duplicate",
            StoreError::SessionFull { .. } => "session_full",
            StoreError::InvalidFormat(_) => "invalid_format",
            StoreError::SessionExpired(_) => "session_expired",
        }
    }
}

pub type Result<T> = std::result::Result<T, StoreError>;

/// Kind of an appended record
#[derive(Debug, Clone, Copy, Hash, Eq, PartialEq, Ord, PartialOrd, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordKind {
    /// Feldman commitment set of one participant
    Commitments,
    /// Encrypted share from one participant to another
    Share,
    /// Finalization marker
    Ready,
}

impl RecordKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            RecordKind::Commitments => "commitments",
            RecordKind::Share => "share",
            RecordKind::Ready => "ready",
        }
    }
}

/// Record identifier
#[derive(Debug, Clone, Hash, Eq, PartialEq, Serialize, Deserialize)]
pub struct RecordId {
    /// Session identifier
    pub session_id: String,
    /// Record kind
    pub kind: RecordKind,
    /// Sender index
    pub from: u32,
    /// Receiver index (shares only)
    pub to: Option<u32>,
}

impl RecordId {
    /// Create a new record ID
    pub fn new(session_id: &str, kind: RecordKind, from: u32, to: Option<u32>) -> Self {
        Self {
            session_id: session_id.to_string(),
            kind,
            from,
            to,
        }
    }

    /// Compute hash for lookup
    pub fn hash(&self) -> String {
        let data = format!(
            "{}:{}:{}:{}",
            self.session_id,
            self.kind.as_str(),
            self.from,
            self.to.map(|v| v.to_string()).unwrap_or_default(),
        );
        hex::encode(blake3::hash(data.as_bytes()).as_bytes())
    }
}

/// Stored record
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredRecord {
    /// Record ID
    pub id: RecordId,
    /// Record payload
    #[serde(with = "b64")]
    pub payload: Vec<u8>,
    /// Creation timestamp
    pub created_at: DateTime<Utc>,
}

/// A participant that joined a session
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Enrollment {
    /// 1-based index, assigned in join order
    pub index: u32,
    /// Caller-chosen participant identifier
    pub participant_id: String,
    /// Enrollment payload (transport public key)
    #[serde(with = "b64")]
    pub payload: Vec<u8>,
    /// Join timestamp
    pub joined_at: DateTime<Utc>,
}

/// Point-in-time view of one session
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionSnapshot {
    pub session_id: String,
    pub capacity: u32,
    #[serde(with = "b64")]
    pub descriptor: Vec<u8>,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    /// Participants in index order
    pub participants: Vec<Enrollment>,
    /// Records ordered by `(kind, from, to)`
    pub records: Vec<StoredRecord>,
}

struct SessionEntry {
    capacity: u32,
    descriptor: Vec<u8>,
    created_at: DateTime<Utc>,
    expires_at: DateTime<Utc>,
    participants: Vec<Enrollment>,
    records: BTreeMap<String, StoredRecord>,
}

impl SessionEntry {
    fn is_enrolled(&self, index: u32) -> bool {
        index >= 1 && (index as usize) <= self.participants.len()
    }
}

/// Session record store
#[derive(Clone)]
pub struct RecordStore {
    /// Sessions indexed by ID
    sessions: Arc<DashMap<String, SessionEntry>>,
    /// Session TTL in seconds
    ttl_seconds: i64,
}

impl RecordStore {
    /// Create a new record store
    pub fn new(ttl_seconds: i64) -> Self {
        Self {
            sessions: Arc::new(DashMap::new()),
            ttl_seconds,
        }
    }

    /// Create a session for `capacity` participants
    pub fn create_session(&self, capacity: u32, descriptor: Vec<u8>) -> Result<String> {
        if capacity == 0 {
            return Err(StoreError::InvalidFormat("capacity must be positive".into()));
        }

        let now = Utc::now();
        let session_id = Uuid::new_v4().to_string();
        let entry = SessionEntry {
            capacity,
            descriptor,
            created_at: now,
            expires_at: now + chrono::Duration::seconds(self.ttl_seconds),
            participants: Vec::new(),
            records: BTreeMap::new(),
        };

        self.sessions.insert(session_id.clone(), entry);
        Ok(session_id)
    }

    /// Enroll a participant and return its index
    pub fn join(&self, session_id: &str, participant_id: &str, payload: Vec<u8>) -> Result<u32> {
        let mut entry = self.live_entry(session_id)?;

        if entry
            .participants
            .iter()
            .any(|p| p.participant_id == participant_id)
        {
            return Err(StoreError::Duplicate(format!(
                "participant {participant_id} already joined {session_id}"
            )));
        }
        if entry.participants.len() as u32 >= entry.capacity {
            return Err(StoreError::SessionFull {
                session_id: session_id.to_string(),
                capacity: entry.capacity,
            });
        }

        let index = entry.participants.len() as u32 + 1;
        entry.participants.push(Enrollment {
            index,
            participant_id: participant_id.to_string(),
            payload,
            joined_at: Utc::now(),
        });
        Ok(index)
    }

    /// Append a record. Writing the same record id twice is rejected.
    pub fn put(&self, id: RecordId, payload: Vec<u8>) -> Result<String> {
        let mut entry = self.live_entry(&id.session_id)?;

        match (id.kind, id.to) {
            (RecordKind::Share, None) => {
                return Err(StoreError::InvalidFormat("share record without receiver".into()))
            }
            (RecordKind::Commitments | RecordKind::Ready, Some(_)) => {
                return Err(StoreError::InvalidFormat(format!(
                    "{} record cannot have a receiver",
                    id.kind.as_str()
                )))
            }
            _ => {}
        }
        if !entry.is_enrolled(id.from) {
            return Err(StoreError::InvalidFormat(format!(
                "sender {} has not joined",
                id.from
            )));
        }
        if let Some(to) = id.to {
            if !entry.is_enrolled(to) {
                return Err(StoreError::InvalidFormat(format!("receiver {to} has not joined")));
            }
        }

        let hash = id.hash();
        if entry.records.contains_key(&hash) {
            return Err(StoreError::Duplicate(format!(
                "{} record from {} already stored",
                id.kind.as_str(),
                id.from
            )));
        }

        entry.records.insert(
            hash.clone(),
            StoredRecord {
                id,
                payload,
                created_at: Utc::now(),
            },
        );
        Ok(hash)
    }

    /// Take a snapshot of a session
    pub fn snapshot(&self, session_id: &str) -> Result<SessionSnapshot> {
        let entry = self.live_entry(session_id)?;

        let mut records: Vec<StoredRecord> = entry.records.values().cloned().collect();
        records.sort_by_key(|r| (r.id.kind, r.id.from, r.id.to));

        Ok(SessionSnapshot {
            session_id: session_id.to_string(),
            capacity: entry.capacity,
            descriptor: entry.descriptor.clone(),
            created_at: entry.created_at,
            expires_at: entry.expires_at,
            participants: entry.participants.clone(),
            records,
        })
    }

    /// Remove expired sessions
    pub fn cleanup(&self) {
        let now = Utc::now();
        self.sessions.retain(|_, v| v.expires_at > now);
    }

    /// Number of sessions currently held
    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    fn live_entry(
        &self,
        session_id: &str,
    ) -> Result<dashmap::mapref::one::RefMut<'_, String, SessionEntry>> {
        let entry = self
            .sessions
            .get_mut(session_id)
            .ok_or_else(|| StoreError::NotFound(format!("session {session_id}")))?;
        if entry.expires_at <= Utc::now() {
            return Err(StoreError::SessionExpired(session_id.to_string()));
        }
        Ok(entry)
    }
}

impl Default for RecordStore {
    fn default() -> Self {
        Self::new(DEFAULT_TTL_SECONDS)
    }
}

/// Request and response bodies of the HTTP service. Payloads travel as base64.
pub mod wire {
    use super::{b64, RecordKind, StoreError};
    use serde::{Deserialize, Serialize};

    #[derive(Debug, Clone, Serialize, Deserialize)]
    pub struct CreateSessionRequest {
        pub capacity: u32,
        #[serde(with = "b64")]
        pub descriptor: Vec<u8>,
    }

    #[derive(Debug, Clone, Serialize, Deserialize)]
    pub struct CreateSessionResponse {
        pub session_id: String,
    }

    #[derive(Debug, Clone, Serialize, Deserialize)]
    pub struct JoinRequest {
        pub participant_id: String,
        #[serde(with = "b64")]
        pub payload: Vec<u8>,
    }

    #[derive(Debug, Clone, Serialize, Deserialize)]
    pub struct JoinResponse {
        pub index: u32,
    }

    #[derive(Debug, Clone, Serialize, Deserialize)]
    pub struct PutRecordRequest {
        pub kind: RecordKind,
        pub from: u32,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        pub to: Option<u32>,
        #[serde(with = "b64")]
        pub payload: Vec<u8>,
    }

    #[derive(Debug, Clone, Serialize, Deserialize)]
    pub struct PutRecordResponse {
        pub hash: String,
    }

    /// Error body; `code` is [`StoreError::code`]
    #[derive(Debug, Clone, Serialize, Deserialize)]
    pub struct ErrorBody {
        pub error: String,
        pub code: String,
    }

    impl From<&StoreError> for ErrorBody {
        fn from(e: &StoreError) -> Self {
            Self {
                error: e.to_string(),
                code: e.code().to_string(),
            }
        }
    }

    impl ErrorBody {
        /// Rebuild the store error on the client side
        pub fn into_store_error(self) -> StoreError {
            match self.code.as_str() {
                "not_found" => StoreError::NotFound(self.error),
                "duplicate" => StoreError::Duplicate(self.error),
                "session_expired" => StoreError::SessionExpired(self.error),
                _ => StoreError::InvalidFormat(self.error),
            }
        }
    }
}

mod b64 {
    use base64::{engine::general_purpose::STANDARD, Engine};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Vec<u8>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        STANDARD.decode(s).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_body_round_trip() {
        let body = wire::ErrorBody::from(&StoreError::Duplicate("share 1->2".into()));
        assert_eq!(body.code, "duplicate");
        assert!(matches!(body.into_store_error(), StoreError::Duplicate(_)));

        let body = wire::ErrorBody::from(&StoreError::NotFound("session x".into()));
        assert!(matches!(body.into_store_error(), StoreError::NotFound(_)));
    }

    #[test]
    fn test_put_request_payload_is_base64() {
        let req = wire::PutRecordRequest {
            kind: RecordKind::Share,
            from: 1,
            to: Some(2),
            payload: b"hi".to_vec(),
        };
        let json = serde_json::to_value(&req).unwrap();
        assert_eq!(json["payload"], "aGk=");
        assert_eq!(json["kind"], "share");
    }

    #[test]
    fn test_record_id_hash() {
        let id1 = RecordId::new("session1", RecordKind::Share, 1, Some(2));
        let id2 = RecordId::new("session1", RecordKind::Share, 1, Some(2));
        let id3 = RecordId::new("session1", RecordKind::Share, 2, Some(1));

        assert_eq!(id1.hash(), id2.hash());
        assert_ne!(id1.hash(), id3.hash());
    }

    #[test]
    fn test_join_assigns_indices_in_order() {
        let store = RecordStore::new(3600);
        let session = store.create_session(2, b"{}".to_vec()).unwrap();

        assert_eq!(store.join(&session, "alice", vec![1]).unwrap(), 1);
        assert_eq!(store.join(&session, "bob", vec![2]).unwrap(), 2);
        assert!(matches!(
            store.join(&session, "alice", vec![1]),
            Err(StoreError::Duplicate(_))
        ));
        assert!(matches!(
            store.join(&session, "carol", vec![3]),
            Err(StoreError::SessionFull { capacity: 2, .. })
        ));
    }

    #[test]
    fn test_records_are_append_only() {
        let store = RecordStore::new(3600);
        let session = store.create_session(2, Vec::new()).unwrap();
        store.join(&session, "alice", Vec::new()).unwrap();
        store.join(&session, "bob", Vec::new()).unwrap();

        let id = RecordId::new(&session, RecordKind::Commitments, 1, None);
        store.put(id.clone(), vec![1, 2, 3]).unwrap();
        assert!(matches!(
            store.put(id.clone(), vec![9]),
            Err(StoreError::Duplicate(_))
        ));

        let records = store.snapshot(&session).unwrap().records;
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].id, id);
        assert_eq!(records[0].payload, vec![1, 2, 3]);
    }

    #[test]
    fn test_put_rejects_unknown_parties() {
        let store = RecordStore::new(3600);
        let session = store.create_session(3, Vec::new()).unwrap();
        store.join(&session, "alice", Vec::new()).unwrap();

        let from_stranger = RecordId::new(&session, RecordKind::Ready, 2, None);
        assert!(matches!(
            store.put(from_stranger, Vec::new()),
            Err(StoreError::InvalidFormat(_))
        ));

        let to_stranger = RecordId::new(&session, RecordKind::Share, 1, Some(3));
        assert!(matches!(
            store.put(to_stranger, Vec::new()),
            Err(StoreError::InvalidFormat(_))
        ));

        let share_without_receiver = RecordId::new(&session, RecordKind::Share, 1, None);
        assert!(store.put(share_without_receiver, Vec::new()).is_err());
    }

    #[test]
    fn test_snapshot_orders_records() {
        let store = RecordStore::new(3600);
        let session = store.create_session(2, b"desc".to_vec()).unwrap();
        store.join(&session, "alice", Vec::new()).unwrap();
        store.join(&session, "bob", Vec::new()).unwrap();

        store
            .put(RecordId::new(&session, RecordKind::Ready, 2, None), vec![4])
            .unwrap();
        store
            .put(RecordId::new(&session, RecordKind::Commitments, 2, None), vec![2])
            .unwrap();
        store
            .put(RecordId::new(&session, RecordKind::Commitments, 1, None), vec![1])
            .unwrap();

        let snapshot = store.snapshot(&session).unwrap();
        assert_eq!(snapshot.descriptor, b"desc".to_vec());
        assert_eq!(snapshot.participants.len(), 2);
        let payloads: Vec<_> = snapshot.records.iter().map(|r| r.payload[0]).collect();
        assert_eq!(payloads, vec![1, 2, 4]);
    }

    #[test]
    fn test_expired_sessions() {
        let store = RecordStore::new(-1);
        let session = store.create_session(1, Vec::new()).unwrap();

        assert!(matches!(
            store.snapshot(&session),
            Err(StoreError::SessionExpired(_))
        ));
        store.cleanup();
        assert_eq!(store.session_count(), 0);
    }

    #[test]
    fn test_snapshot_serde() {
        let store = RecordStore::new(3600);
        let session = store.create_session(1, vec![0xde, 0xad]).unwrap();
        store.join(&session, "alice", vec![7]).unwrap();

        let json = serde_json::to_string(&store.snapshot(&session).unwrap()).unwrap();
        let decoded: SessionSnapshot = serde_json::from_str(&json).unwrap();
        assert_eq!(decoded.descriptor, vec![0xde, 0xad]);
        assert_eq!(decoded.participants[0].payload, vec![7]);
    }
}
