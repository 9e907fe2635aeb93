//! Session store boundary
//!
//! Participants never talk to each other directly. Every artifact goes
//! through an append-only session store and is observed by polling
//! [`SessionStore::fetch_state`]. The store itself is payload-agnostic (see
//! the `session-store` crate); the [`codec`] functions map the DKG artifacts
//! onto its records.

pub mod codec;
pub mod memory;

pub use memory::MemoryStore;

use crate::ec::Point;
use crate::keygen::{CommitmentSet, EncryptedShare, ReadyMarker};
use crate::types::{ParticipantIndex, SessionId, SessionParams, SessionState};
use crate::Result;
use std::time::Duration;

pub use ::async_trait::async_trait;

/// Asynchronous, append-only view of the shared session state
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Create a session and return its id
    async fn create_session(&self, params: &SessionParams) -> Result<SessionId>;

    /// Register a participant and return its index
    async fn join(
        &self,
        session_id: &str,
        participant_id: &str,
        transport_public_key: &Point,
    ) -> Result<ParticipantIndex>;

    /// Publish a Round 1 commitment set
    async fn publish_commitments(&self, session_id: &str, commitments: &CommitmentSet) -> Result<()>;

    /// Submit a Round 2 share
    async fn submit_share(&self, session_id: &str, share: &EncryptedShare) -> Result<()>;

    /// Everything published so far
    async fn fetch_state(&self, session_id: &str) -> Result<SessionState>;

    /// Publish a Round 3 ready marker
    async fn publish_ready(&self, session_id: &str, marker: &ReadyMarker) -> Result<()>;

    /// Suspend until the session may have changed, or at most `timeout`
    async fn wait_for_update(&self, _session_id: &str, timeout: Duration) {
        tokio::time::sleep(timeout).await;
    }
}
