//! Helpers for driving DKG runs in tests

use super::{CommitmentSet, DkgConfig, DkgParticipant, DkgState, EncryptedShare, ReadyMarker, SharePayload};
use crate::ec::{Curve, Point};
use crate::store::{async_trait, MemoryStore, SessionStore};
use crate::transport::{self, share_aad, TransportKeyPair};
use crate::types::{ParticipantIndex, SessionId, SessionParams, SessionState};
use crate::{Error, Result};
use rand::SeedableRng;
use rand_chacha::ChaCha20Rng;
use rand_core::{CryptoRng, RngCore};
use std::collections::BTreeSet;
use std::sync::Mutex;
use std::time::Duration;

pub(crate) async fn new_session<S: SessionStore>(store: &S, params: SessionParams) -> SessionId {
    store.create_session(&params).await.unwrap()
}

/// Join `n` participants with fresh transport keys
pub(crate) async fn join_all<S, R>(
    store: &S,
    session_id: &str,
    n: u32,
    rng: &mut R,
) -> Vec<DkgParticipant>
where
    S: SessionStore,
    R: RngCore + CryptoRng + Send,
{
    let curve = Curve::secp256k1();
    let mut participants = Vec::new();
    for i in 1..=n {
        let transport = TransportKeyPair::generate(curve, rng).unwrap();
        let participant = DkgParticipant::join(
            curve,
            store,
            session_id,
            &format!("party-{i}"),
            transport,
            DkgConfig::default(),
        )
        .await
        .unwrap();
        participants.push(participant);
    }
    participants
}

/// Join `n` participants, then advance them in turn until all have finalized
pub(crate) async fn drive_round_robin<S, R>(
    store: &S,
    session_id: &str,
    n: u32,
    rng: &mut R,
) -> Vec<DkgParticipant>
where
    S: SessionStore,
    R: RngCore + CryptoRng + Send,
{
    let mut participants = join_all(store, session_id, n, rng).await;

    for _ in 0..10 {
        for participant in participants.iter_mut() {
            participant.advance(store, rng).await.unwrap();
        }
        if participants.iter().all(|p| p.state() == DkgState::Finalized) {
            return participants;
        }
    }
    panic!("DKG did not finalize");
}

#[derive(Debug, Clone, Copy)]
pub(crate) enum Tampering {
    /// Flip a ciphertext byte; the receiver sees a MAC failure
    FlipCiphertext,
    /// Replace the share with a well-formed encryption of a wrong value
    ReplaceValue,
}

/// Wraps a store and corrupts the share from one sender to one receiver
pub(crate) struct TamperingStore {
    inner: MemoryStore,
    from: ParticipantIndex,
    to: ParticipantIndex,
    tampering: Tampering,
    rng: Mutex<ChaCha20Rng>,
}

impl TamperingStore {
    pub(crate) fn new(
        inner: MemoryStore,
        from: ParticipantIndex,
        to: ParticipantIndex,
        tampering: Tampering,
    ) -> Self {
        Self {
            inner,
            from,
            to,
            tampering,
            rng: Mutex::new(ChaCha20Rng::seed_from_u64(0xbad)),
        }
    }

    async fn corrupt(&self, session_id: &str, share: &EncryptedShare) -> Result<EncryptedShare> {
        let mut share = share.clone();
        match self.tampering {
            Tampering::FlipCiphertext => share.envelope.ciphertext[0] ^= 0x01,
            Tampering::ReplaceValue => {
                let curve = Curve::secp256k1();
                let state = self.inner.fetch_state(session_id).await?;
                let recipient = state
                    .participant(share.to)
                    .map(|p| p.transport_public_key.clone())
                    .unwrap();

                let mut rng = self.rng.lock().unwrap();
                let payload = SharePayload {
                    value: curve.scalar_to_bytes(&curve.random_scalar(&mut *rng)),
                    groups: Vec::new(),
                };
                let plaintext = serde_json::to_vec(&payload)?;
                let aad = share_aad(session_id, share.from, share.to);
                share.envelope = transport::encrypt(curve, &recipient, &aad, &plaintext, &mut *rng)?;
            }
        }
        Ok(share)
    }
}

#[async_trait]
impl SessionStore for TamperingStore {
    async fn create_session(&self, params: &SessionParams) -> Result<SessionId> {
        self.inner.create_session(params).await
    }

    async fn join(
        &self,
        session_id: &str,
        participant_id: &str,
        transport_public_key: &Point,
    ) -> Result<ParticipantIndex> {
        self.inner
            .join(session_id, participant_id, transport_public_key)
            .await
    }

    async fn publish_commitments(&self, session_id: &str, commitments: &CommitmentSet) -> Result<()> {
        self.inner.publish_commitments(session_id, commitments).await
    }

    async fn submit_share(&self, session_id: &str, share: &EncryptedShare) -> Result<()> {
        if share.from == self.from && share.to == self.to {
            let corrupted = self.corrupt(session_id, share).await?;
            return self.inner.submit_share(session_id, &corrupted).await;
        }
        self.inner.submit_share(session_id, share).await
    }

    async fn fetch_state(&self, session_id: &str) -> Result<SessionState> {
        self.inner.fetch_state(session_id).await
    }

    async fn publish_ready(&self, session_id: &str, marker: &ReadyMarker) -> Result<()> {
        self.inner.publish_ready(session_id, marker).await
    }

    async fn wait_for_update(&self, session_id: &str, timeout: Duration) {
        self.inner.wait_for_update(session_id, timeout).await
    }
}

/// Wraps a store; the first write of each kind by one sender is applied,
/// then answered with a store fault as if the reply was lost
pub(crate) struct LossyStore {
    inner: MemoryStore,
    from: ParticipantIndex,
    lost: Mutex<BTreeSet<&'static str>>,
}

impl LossyStore {
    pub(crate) fn new(inner: MemoryStore, from: ParticipantIndex) -> Self {
        Self {
            inner,
            from,
            lost: Mutex::new(BTreeSet::new()),
        }
    }

    /// Replies lost so far
    pub(crate) fn lost(&self) -> usize {
        self.lost.lock().unwrap().len()
    }

    fn reply(&self, from: ParticipantIndex, kind: &'static str, written: Result<()>) -> Result<()> {
        written?;
        if from == self.from && self.lost.lock().unwrap().insert(kind) {
            return Err(Error::Store(format!("connection reset after {kind} write")));
        }
        Ok(())
    }
}

#[async_trait]
impl SessionStore for LossyStore {
    async fn create_session(&self, params: &SessionParams) -> Result<SessionId> {
        self.inner.create_session(params).await
    }

    async fn join(
        &self,
        session_id: &str,
        participant_id: &str,
        transport_public_key: &Point,
    ) -> Result<ParticipantIndex> {
        self.inner
            .join(session_id, participant_id, transport_public_key)
            .await
    }

    async fn publish_commitments(&self, session_id: &str, commitments: &CommitmentSet) -> Result<()> {
        let written = self.inner.publish_commitments(session_id, commitments).await;
        self.reply(commitments.from, "commitments", written)
    }

    async fn submit_share(&self, session_id: &str, share: &EncryptedShare) -> Result<()> {
        let written = self.inner.submit_share(session_id, share).await;
        self.reply(share.from, "share", written)
    }

    async fn fetch_state(&self, session_id: &str) -> Result<SessionState> {
        self.inner.fetch_state(session_id).await
    }

    async fn publish_ready(&self, session_id: &str, marker: &ReadyMarker) -> Result<()> {
        let written = self.inner.publish_ready(session_id, marker).await;
        self.reply(marker.from, "ready", written)
    }

    async fn wait_for_update(&self, session_id: &str, timeout: Duration) {
        self.inner.wait_for_update(session_id, timeout).await
    }
}
