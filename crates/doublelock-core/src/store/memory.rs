//! In-memory session store for tests and single-process runs

use super::{async_trait, codec, SessionStore};
use crate::ec::Point;
use crate::keygen::{CommitmentSet, EncryptedShare, ReadyMarker};
use crate::types::{ParticipantIndex, SessionId, SessionParams, SessionState};
use crate::Result;
use session_store::{RecordId, RecordStore};
use std::time::Duration;
use tokio::sync::broadcast;

/// Session store backed by a local [`RecordStore`]
#[derive(Clone)]
pub struct MemoryStore {
    records: RecordStore,
    /// Fires on every successful write
    notify: broadcast::Sender<()>,
}

impl MemoryStore {
    /// Create a store whose sessions live for `ttl_seconds`
    pub fn new(ttl_seconds: i64) -> Self {
        let (notify, _) = broadcast::channel(100);
        Self {
            records: RecordStore::new(ttl_seconds),
            notify,
        }
    }

    /// The underlying record store
    pub fn records(&self) -> &RecordStore {
        &self.records
    }

    fn put(&self, (id, payload): (RecordId, Vec<u8>)) -> Result<()> {
        self.records.put(id, payload)?;
        let _ = self.notify.send(());
        Ok(())
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new(session_store::DEFAULT_TTL_SECONDS)
    }
}

#[async_trait]
impl SessionStore for MemoryStore {
    async fn create_session(&self, params: &SessionParams) -> Result<SessionId> {
        let descriptor = codec::encode_params(params)?;
        Ok(self.records.create_session(params.n, descriptor)?)
    }

    async fn join(
        &self,
        session_id: &str,
        participant_id: &str,
        transport_public_key: &Point,
    ) -> Result<ParticipantIndex> {
        let payload = codec::encode_enrollment(transport_public_key)?;
        let index = self.records.join(session_id, participant_id, payload)?;
        let _ = self.notify.send(());
        Ok(index)
    }

    async fn publish_commitments(&self, session_id: &str, commitments: &CommitmentSet) -> Result<()> {
        self.put(codec::commitments_record(session_id, commitments)?)
    }

    async fn submit_share(&self, session_id: &str, share: &EncryptedShare) -> Result<()> {
        self.put(codec::share_record(session_id, share)?)
    }

    async fn fetch_state(&self, session_id: &str) -> Result<SessionState> {
        codec::decode_snapshot(self.records.snapshot(session_id)?)
    }

    async fn publish_ready(&self, session_id: &str, marker: &ReadyMarker) -> Result<()> {
        self.put(codec::ready_record(session_id, marker)?)
    }

    async fn wait_for_update(&self, _session_id: &str, timeout: Duration) {
        let mut rx = self.notify.subscribe();
        tokio::select! {
            _ = rx.recv() => {}
            _ = tokio::time::sleep(timeout) => {}
        }
    }
}
