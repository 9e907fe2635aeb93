//! DKG protocol implementation

use super::transcript;
use super::{CommitmentSet, EncryptedShare, GroupValue, ReadyMarker, SharePayload};
use crate::ec::{Curve, Point};
use crate::policy::GroupDealing;
use crate::store::SessionStore;
use crate::transport::{self, share_aad, TransportKeyPair};
use crate::types::{GroupShare, KeyShare, ParticipantIndex, SessionInfo, SessionState};
use crate::vss::{self, Polynomial};
use crate::{Error, Result};
use num_bigint::BigUint;
use num_traits::Zero;
use rand_core::{CryptoRng, RngCore};
use std::collections::{BTreeMap, BTreeSet};
use std::time::Duration;
use tracing::{debug, info, instrument, warn};
use zeroize::Zeroize;

#[cfg(feature = "multi-thread")]
use rayon::prelude::*;

/// Polling and patience settings
#[derive(Debug, Clone)]
pub struct DkgConfig {
    /// Pause between polls that made no progress
    pub poll_interval: Duration,
    /// Polls without progress before giving up with [`Error::Timeout`]
    pub max_polls: u32,
    /// Polls to wait for missing shares before finalizing without them
    pub share_patience: u32,
}

impl Default for DkgConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(100),
            max_polls: 300,
            share_patience: 50,
        }
    }
}

/// Protocol state of one participant
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DkgState {
    Joined,
    CommitmentsPublished,
    SharesSent,
    Finalized,
}

/// A share that decrypted and verified
struct Contribution {
    value: BigUint,
    groups: BTreeMap<String, BigUint>,
}

/// One participant's view of a DKG run
pub struct DkgParticipant {
    curve: Curve,
    session: SessionInfo,
    index: ParticipantIndex,
    transport: TransportKeyPair,
    config: DkgConfig,
    state: DkgState,
    polynomial: Option<Polynomial>,
    dealing: Option<GroupDealing>,
    roster: Option<String>,
    /// Recipients whose Round 2 share the store has accepted
    sent: BTreeSet<ParticipantIndex>,
    waited: u32,
    /// Finalized share and marker awaiting an accepted ready write
    pending: Option<(KeyShare, ReadyMarker)>,
    key_hash: Option<String>,
    key_share: Option<KeyShare>,
}

impl DkgParticipant {
    /// Register with the session and learn this participant's index
    #[instrument(skip(curve, store, transport, config))]
    pub async fn join<S: SessionStore + ?Sized>(
        curve: &Curve,
        store: &S,
        session_id: &str,
        participant_id: &str,
        transport: TransportKeyPair,
        config: DkgConfig,
    ) -> Result<Self> {
        let state = store.fetch_state(session_id).await?;
        let index = store
            .join(session_id, participant_id, transport.public_key())
            .await?;

        info!(
            index,
            n = state.session.n,
            t = state.session.t,
            grouped = state.session.policy.is_some(),
            "Joined DKG session"
        );

        Ok(Self {
            curve: curve.clone(),
            session: state.session,
            index,
            transport,
            config,
            state: DkgState::Joined,
            polynomial: None,
            dealing: None,
            roster: None,
            sent: BTreeSet::new(),
            waited: 0,
            pending: None,
            key_hash: None,
            key_share: None,
        })
    }

    pub fn index(&self) -> ParticipantIndex {
        self.index
    }

    pub fn state(&self) -> DkgState {
        self.state
    }

    pub fn session(&self) -> &SessionInfo {
        &self.session
    }

    /// Key hash published in this participant's ready marker
    pub fn key_hash(&self) -> Option<&str> {
        self.key_hash.as_deref()
    }

    pub fn key_share(&self) -> Option<&KeyShare> {
        self.key_share.as_ref()
    }

    /// Take the final key share out of a finalized participant
    pub fn into_key_share(mut self) -> Result<KeyShare> {
        self.key_share
            .take()
            .ok_or_else(|| Error::InvalidState(format!("DKG is in state {:?}", self.state)))
    }

    /// Make at most one round of progress. Never waits on other participants.
    ///
    /// A failed call can be repeated: the polynomials are sampled once, and a
    /// write the store already holds is not sent again.
    #[instrument(skip_all, fields(session_id = %self.session.id, index = self.index))]
    pub async fn advance<S, R>(&mut self, store: &S, rng: &mut R) -> Result<DkgState>
    where
        S: SessionStore + ?Sized,
        R: RngCore + CryptoRng + Send,
    {
        match self.state {
            DkgState::Joined => self.publish_commitments(store, rng).await?,
            DkgState::CommitmentsPublished => self.send_shares(store, rng).await?,
            DkgState::SharesSent => self.try_finalize(store).await?,
            DkgState::Finalized => {}
        }
        Ok(self.state)
    }

    async fn publish_commitments<S, R>(&mut self, store: &S, rng: &mut R) -> Result<()>
    where
        S: SessionStore + ?Sized,
        R: RngCore + CryptoRng + Send,
    {
        let curve = &self.curve;
        if self.polynomial.is_none() {
            self.dealing = self
                .session
                .policy
                .as_ref()
                .map(|policy| GroupDealing::generate(curve, policy, rng))
                .transpose()?;
            self.polynomial = Some(vss::poly_generate(curve, self.session.t as usize, rng)?);
        }
        let polynomial = self
            .polynomial
            .as_ref()
            .ok_or_else(|| Error::InvalidState("polynomial missing in round 1".into()))?;

        let commitments = CommitmentSet {
            from: self.index,
            coefficients: vss::poly_commitments(curve, polynomial)?,
            group: self.dealing.as_ref().map(|d| d.commitments(curve)).transpose()?,
        };
        match store.publish_commitments(&self.session.id, &commitments).await {
            Ok(()) => {}
            Err(Error::Duplicate(what)) => {
                let state = store.fetch_state(&self.session.id).await?;
                if state.commitments_of(self.index) != Some(&commitments) {
                    return Err(Error::Duplicate(what));
                }
                debug!("Commitments already stored by an earlier attempt");
            }
            Err(e) => return Err(e),
        }

        self.state = DkgState::CommitmentsPublished;
        info!("Round 1: commitments published");
        Ok(())
    }

    async fn send_shares<S, R>(&mut self, store: &S, rng: &mut R) -> Result<()>
    where
        S: SessionStore + ?Sized,
        R: RngCore + CryptoRng + Send,
    {
        let state = store.fetch_state(&self.session.id).await?;
        if state.participants.len() < self.session.n as usize {
            debug!(
                joined = state.participants.len(),
                n = self.session.n,
                "Waiting for participants"
            );
            return Ok(());
        }

        let curve = &self.curve;
        let roster = transcript::roster_hash(curve, &state)?;
        let polynomial = self
            .polynomial
            .as_ref()
            .ok_or_else(|| Error::InvalidState("polynomial missing in round 2".into()))?;

        for participant in &state.participants {
            let to = participant.index;
            if self.sent.contains(&to) {
                continue;
            }
            let groups = match (&self.dealing, &self.session.policy) {
                (Some(dealing), Some(policy)) => dealing
                    .shares_for(curve, policy, to)?
                    .into_iter()
                    .map(|(group, value)| GroupValue {
                        group,
                        value: curve.scalar_to_bytes(&value),
                    })
                    .collect(),
                _ => Vec::new(),
            };
            let payload = SharePayload {
                value: curve.scalar_to_bytes(&vss::poly_eval_at(curve, polynomial, to)?),
                groups,
            };

            let mut plaintext = serde_json::to_vec(&payload)?;
            let aad = share_aad(&self.session.id, self.index, to);
            let envelope =
                transport::encrypt(curve, &participant.transport_public_key, &aad, &plaintext, rng);
            plaintext.zeroize();

            let envelope = match envelope {
                Ok(envelope) => envelope,
                Err(e) => {
                    warn!(to, error = %e, "Cannot encrypt to participant, skipping");
                    continue;
                }
            };
            let share = EncryptedShare {
                from: self.index,
                to,
                envelope,
                transcript_hash: roster.clone(),
            };
            match store.submit_share(&self.session.id, &share).await {
                Ok(()) => {}
                // the (share, from, to) key is ours: an earlier attempt landed
                Err(Error::Duplicate(_)) => debug!(to, "Share already stored by an earlier attempt"),
                Err(e) => return Err(e),
            }
            self.sent.insert(to);
        }

        self.polynomial = None;
        self.dealing = None;
        self.roster = Some(roster);
        self.state = DkgState::SharesSent;
        info!("Round 2: shares sent");
        Ok(())
    }

    async fn try_finalize<S>(&mut self, store: &S) -> Result<()>
    where
        S: SessionStore + ?Sized,
    {
        if self.pending.is_none() {
            let Some(pending) = self.prepare_ready(store).await? else {
                return Ok(());
            };
            self.pending = Some(pending);
        }
        let marker = self
            .pending
            .as_ref()
            .map(|(_, marker)| marker.clone())
            .ok_or_else(|| Error::InvalidState("ready marker missing in round 3".into()))?;

        match store.publish_ready(&self.session.id, &marker).await {
            Ok(()) => {}
            Err(Error::Duplicate(what)) => {
                let state = store.fetch_state(&self.session.id).await?;
                if !state.ready_markers.contains(&marker) {
                    return Err(Error::Duplicate(what));
                }
                debug!("Ready marker already stored by an earlier attempt");
            }
            Err(e) => return Err(e),
        }

        let (key_share, marker) = self
            .pending
            .take()
            .ok_or_else(|| Error::InvalidState("ready marker missing in round 3".into()))?;
        info!(
            public_key = hex::encode(self.curve.encode_point(&key_share.public_key)),
            excluded = ?key_share.excluded,
            "Round 3: DKG finalized"
        );
        self.key_hash = Some(marker.key_hash);
        self.key_share = Some(key_share);
        self.state = DkgState::Finalized;
        Ok(())
    }

    /// Finalize locally once the shares are in or patience runs out
    async fn prepare_ready<S>(&mut self, store: &S) -> Result<Option<(KeyShare, ReadyMarker)>>
    where
        S: SessionStore + ?Sized,
    {
        let state = store.fetch_state(&self.session.id).await?;
        let n = self.session.n;

        let complete = (1..=n).all(|m| {
            state.commitments_of(m).is_some() && state.inbox_for(self.index).any(|s| s.from == m)
        });
        if !complete {
            if self.waited < self.config.share_patience {
                self.waited += 1;
                debug!(waited = self.waited, "Waiting for shares");
                return Ok(None);
            }
            warn!(
                waited = self.waited,
                "Share patience exhausted, finalizing with the shares that arrived"
            );
        }

        let key_share = self.finalize(&state)?;
        let accepted = self.accepted_commitments(&state);
        let roster = self.roster()?;
        let key_hash = transcript::key_hash(
            &self.curve,
            &key_share.public_key,
            key_share.group_key.as_ref(),
        );
        let marker = ReadyMarker {
            from: self.index,
            key_hash,
            transcript_hash: transcript::transcript_hash(&self.curve, roster, &accepted),
        };
        Ok(Some((key_share, marker)))
    }

    fn roster(&self) -> Result<&str> {
        self.roster
            .as_deref()
            .ok_or_else(|| Error::InvalidState("roster hash missing in round 3".into()))
    }

    /// Commitment sets that are well formed, in sender order
    fn accepted_commitments<'a>(&self, state: &'a SessionState) -> Vec<&'a CommitmentSet> {
        state
            .commitment_sets
            .iter()
            .filter(|set| set.from >= 1 && set.from <= self.session.n)
            .filter(|set| match self.check_commitments(set) {
                Ok(()) => true,
                Err(e) => {
                    debug!(from = set.from, error = %e, "Ignoring malformed commitment set");
                    false
                }
            })
            .collect()
    }

    fn check_commitments(&self, set: &CommitmentSet) -> Result<()> {
        if set.coefficients.len() != self.session.t as usize {
            return Err(Error::VerificationFailed(format!(
                "expected {} commitments, got {}",
                self.session.t,
                set.coefficients.len()
            )));
        }
        for point in &set.coefficients {
            self.curve.validate(point)?;
        }

        match (&self.session.policy, &set.group) {
            (Some(policy), Some(group)) => group.verify_structure(&self.curve, policy),
            (None, None) => Ok(()),
            (Some(_), None) => Err(Error::VerificationFailed("missing group commitments".into())),
            (None, Some(_)) => Err(Error::VerificationFailed(
                "unexpected group commitments".into(),
            )),
        }
    }

    /// Verify the inbox and build the key share
    fn finalize(&self, state: &SessionState) -> Result<KeyShare> {
        let curve = &self.curve;
        let q = curve.order();
        let accepted = self.accepted_commitments(state);
        for set in &state.commitment_sets {
            if !accepted.iter().any(|a| a.from == set.from) {
                warn!(from = set.from, "Commitment set rejected");
            }
        }
        let roster = self.roster()?;

        let inbox: Vec<&EncryptedShare> = state.inbox_for(self.index).collect();
        let commitments_of =
            |from: ParticipantIndex| accepted.iter().copied().find(|set| set.from == from);

        #[cfg(feature = "multi-thread")]
        let results: Vec<_> = inbox
            .par_iter()
            .map(|share| (share.from, self.verify_incoming(share, commitments_of(share.from), roster)))
            .collect();
        #[cfg(not(feature = "multi-thread"))]
        let results: Vec<_> = inbox
            .iter()
            .map(|share| (share.from, self.verify_incoming(share, commitments_of(share.from), roster)))
            .collect();

        let mut secret = BigUint::zero();
        let mut group_secrets: BTreeMap<String, BigUint> = BTreeMap::new();
        let mut verified = Vec::new();
        for (from, result) in results {
            match result {
                Ok(contribution) => {
                    secret = (secret + contribution.value) % q;
                    for (group, value) in contribution.groups {
                        let sum = group_secrets.entry(group).or_default();
                        *sum = (&*sum + value) % q;
                    }
                    verified.push(from);
                }
                Err(e) => warn!(from, error = %e, class = ?e.class(), "Excluding sender"),
            }
        }

        let required = self.session.t as usize;
        if verified.len() < required {
            return Err(Error::ThresholdNotMet {
                required,
                actual: verified.len(),
            });
        }

        let public_key = curve.sum(accepted.iter().map(|set| &set.coefficients[0]))?;
        let group_key = match &self.session.policy {
            Some(_) => {
                let contributions = accepted
                    .iter()
                    .filter_map(|set| set.group.as_ref())
                    .map(|group| group.group_key_contribution())
                    .collect::<Result<Vec<&Point>>>()?;
                Some(curve.sum(contributions)?)
            }
            None => None,
        };

        let excluded = (1..=self.session.n)
            .filter(|m| !verified.contains(m))
            .collect();
        let mut key_share = KeyShare::new(
            &self.session,
            self.index,
            curve.scalar_to_bytes(&secret),
            public_key,
            excluded,
        );

        if let Some(policy) = &self.session.policy {
            for group in policy.groups_of(self.index) {
                let total = group_secrets.remove(group).unwrap_or_default();
                key_share.group_shares.push(GroupShare::new(
                    group.to_string(),
                    policy.position(group)?,
                    policy.local_index(group, self.index)?,
                    curve.scalar_to_bytes(&total),
                ));
            }
            key_share.group_key = group_key;
            key_share.policy = Some(policy.clone());
        }

        Ok(key_share)
    }

    /// Decrypt and Feldman-check one incoming share
    fn verify_incoming(
        &self,
        share: &EncryptedShare,
        commitments: Option<&CommitmentSet>,
        roster: &str,
    ) -> Result<Contribution> {
        let curve = &self.curve;
        let commitments = commitments.ok_or_else(|| {
            Error::VerificationFailed(format!("no valid commitments from sender {}", share.from))
        })?;
        if share.transcript_hash != roster {
            return Err(Error::VerificationFailed(format!(
                "sender {} dealt against a different roster",
                share.from
            )));
        }

        let aad = share_aad(&self.session.id, share.from, self.index);
        let mut plaintext = transport::decrypt(curve, &self.transport, &share.envelope, &aad)?;
        let payload: std::result::Result<SharePayload, _> = serde_json::from_slice(&plaintext);
        plaintext.zeroize();
        let payload = payload.map_err(|e| Error::Deserialization(e.to_string()))?;

        let value = curve.scalar_from_bytes(&payload.value)?;
        if !vss::verify_share(curve, self.index, &value, &commitments.coefficients)? {
            return Err(Error::VerificationFailed(format!(
                "share from sender {} does not match its commitments",
                share.from
            )));
        }

        let mut groups = BTreeMap::new();
        if let Some(policy) = &self.session.policy {
            let expected = policy.groups_of(self.index);
            let group_commitments = commitments
                .group
                .as_ref()
                .ok_or_else(|| Error::VerificationFailed("missing group commitments".into()))?;

            for entry in &payload.groups {
                if !expected.contains(&entry.group.as_str()) {
                    return Err(Error::VerificationFailed(format!(
                        "unexpected share for group {}",
                        entry.group
                    )));
                }
                let value = curve.scalar_from_bytes(&entry.value)?;
                if !group_commitments.verify_share(curve, policy, &entry.group, self.index, &value)? {
                    return Err(Error::VerificationFailed(format!(
                        "group {} share from sender {} does not match its commitments",
                        entry.group, share.from
                    )));
                }
                groups.insert(entry.group.clone(), value);
            }
            if groups.len() != expected.len() {
                return Err(Error::VerificationFailed(format!(
                    "sender {} sent {} group shares, expected {}",
                    share.from,
                    groups.len(),
                    expected.len()
                )));
            }
        }

        Ok(Contribution { value, groups })
    }
}

impl std::fmt::Debug for DkgParticipant {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DkgParticipant")
            .field("session_id", &self.session.id)
            .field("index", &self.index)
            .field("state", &self.state)
            .finish_non_exhaustive()
    }
}

/// Agreed key hash once at least `t` ready markers match
///
/// Ready markers carrying different key hashes are a [`Error::ConsistencyFault`]
/// and the session must be abandoned.
pub fn check_termination(state: &SessionState) -> Result<Option<String>> {
    let mut counts: BTreeMap<&str, usize> = BTreeMap::new();
    for marker in &state.ready_markers {
        *counts.entry(marker.key_hash.as_str()).or_default() += 1;
    }

    if counts.len() > 1 {
        return Err(Error::ConsistencyFault {
            session_id: state.session.id.clone(),
            distinct: counts.len(),
        });
    }

    let transcripts: std::collections::BTreeSet<&str> = state
        .ready_markers
        .iter()
        .map(|m| m.transcript_hash.as_str())
        .collect();
    if transcripts.len() > 1 {
        warn!(
            session_id = %state.session.id,
            distinct = transcripts.len(),
            "Participants finalized over different transcripts"
        );
    }

    Ok(counts
        .into_iter()
        .next()
        .filter(|(_, count)| *count >= state.session.t as usize)
        .map(|(hash, _)| hash.to_string()))
}

/// Poll until the session is usable and return the agreed key hash
#[instrument(skip(store, config))]
pub async fn wait_until_usable<S: SessionStore + ?Sized>(
    store: &S,
    session_id: &str,
    config: &DkgConfig,
) -> Result<String> {
    for attempt in 0..config.max_polls {
        let state = store.fetch_state(session_id).await?;
        if let Some(key_hash) = check_termination(&state)? {
            info!(key_hash = %key_hash, "Session usable");
            return Ok(key_hash);
        }
        debug!(attempt, ready = state.ready_markers.len(), "Waiting for ready markers");
        store.wait_for_update(session_id, config.poll_interval).await;
    }
    Err(Error::Timeout(format!("ready markers in session {session_id}")))
}

/// Run the distributed key generation protocol to completion
///
/// Joins the session, drives [`DkgParticipant::advance`] until finalized,
/// then waits until the session is usable and checks that the agreed key
/// hash is this participant's own.
#[instrument(skip(curve, store, transport, config, rng))]
pub async fn run_dkg<S, R>(
    curve: &Curve,
    store: &S,
    session_id: &str,
    participant_id: &str,
    transport: TransportKeyPair,
    config: DkgConfig,
    rng: &mut R,
) -> Result<KeyShare>
where
    S: SessionStore + ?Sized,
    R: RngCore + CryptoRng + Send,
{
    info!("Starting DKG");
    let mut participant =
        DkgParticipant::join(curve, store, session_id, participant_id, transport, config.clone())
            .await?;

    let mut idle = 0;
    while participant.state() != DkgState::Finalized {
        let before = participant.state();
        match participant.advance(store, rng).await {
            Ok(after) if after != before => {
                idle = 0;
                continue;
            }
            Ok(_) => {}
            Err(Error::Store(e)) => warn!(state = ?before, error = %e, "Store fault, retrying"),
            Err(e) => return Err(e),
        }
        idle += 1;
        if idle >= config.max_polls {
            return Err(Error::Timeout(format!("DKG round after {before:?}")));
        }
        store.wait_for_update(session_id, config.poll_interval).await;
    }

    let agreed = wait_until_usable(store, session_id, &config).await?;
    if participant.key_hash() != Some(agreed.as_str()) {
        return Err(Error::ConsistencyFault {
            session_id: session_id.to_string(),
            distinct: 2,
        });
    }

    let key_share = participant.into_key_share()?;
    info!(index = key_share.index, "DKG completed successfully");
    Ok(key_share)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keygen::testing::{
        drive_round_robin, join_all, new_session, LossyStore, TamperingStore, Tampering,
    };
    use crate::policy::tests::sample_policy;
    use crate::store::MemoryStore;
    use crate::types::SessionParams;
    use crate::vss::lagrange_coefficient;
    use rand::SeedableRng;
    use rand_chacha::ChaCha20Rng;

    fn reconstruct(curve: &Curve, shares: &[&KeyShare]) -> BigUint {
        let indices: Vec<u32> = shares.iter().map(|s| s.index).collect();
        shares.iter().fold(BigUint::zero(), |acc, s| {
            let lambda = lagrange_coefficient(curve.order(), &indices, s.index, 0).unwrap();
            (acc + lambda * s.secret_share()) % curve.order()
        })
    }

    #[tokio::test]
    async fn test_honest_run_agrees_on_key() {
        let curve = Curve::secp256k1();
        let store = MemoryStore::default();
        let mut rng = ChaCha20Rng::seed_from_u64(71);
        let session_id = new_session(&store, SessionParams::new(4, 3, 1).unwrap()).await;

        let participants = drive_round_robin(&store, &session_id, 4, &mut rng).await;
        let shares: Vec<&KeyShare> = participants
            .iter()
            .map(|p| p.key_share().unwrap())
            .collect();

        let state = store.fetch_state(&session_id).await.unwrap();
        let expected = curve
            .sum(state.commitment_sets.iter().map(|c| &c.coefficients[0]))
            .unwrap();
        for share in &shares {
            assert_eq!(share.public_key, expected);
            assert!(share.excluded.is_empty());
            assert!(share.group_key.is_none());
        }

        // any t shares interpolate the same secret d with d G == Q
        let d = reconstruct(curve, &shares[..3]);
        assert_eq!(d, reconstruct(curve, &shares[1..]));
        assert_eq!(curve.mul_base(&d).unwrap(), expected);

        assert!(check_termination(&state).unwrap().is_some());
    }

    #[tokio::test]
    async fn test_run_dkg_concurrently() {
        let store = MemoryStore::default();
        let session_id = new_session(&store, SessionParams::new(3, 2, 1).unwrap()).await;
        let config = DkgConfig {
            poll_interval: Duration::from_millis(10),
            ..DkgConfig::default()
        };

        let handles: Vec<_> = (0..3u64)
            .map(|i| {
                let store = store.clone();
                let session_id = session_id.clone();
                let config = config.clone();
                tokio::spawn(async move {
                    let curve = Curve::secp256k1();
                    let mut rng = ChaCha20Rng::seed_from_u64(80 + i);
                    let transport = TransportKeyPair::generate(curve, &mut rng).unwrap();
                    run_dkg(
                        curve,
                        &store,
                        &session_id,
                        &format!("party-{i}"),
                        transport,
                        config,
                        &mut rng,
                    )
                    .await
                })
            })
            .collect();

        let mut public_keys = Vec::new();
        for handle in handles {
            public_keys.push(handle.await.unwrap().unwrap().public_key.clone());
        }
        assert!(public_keys.windows(2).all(|w| w[0] == w[1]));
    }

    #[tokio::test]
    async fn test_lost_write_replies_are_not_resent() {
        let curve = Curve::secp256k1();
        let store = LossyStore::new(MemoryStore::default(), 1);
        let mut rng = ChaCha20Rng::seed_from_u64(91);
        let session_id = new_session(&store, SessionParams::new(2, 2, 1).unwrap()).await;
        let mut participants = join_all(&store, &session_id, 2, &mut rng).await;

        let mut faults = 0;
        for _ in 0..10 {
            for participant in participants.iter_mut() {
                match participant.advance(&store, &mut rng).await {
                    Ok(_) => {}
                    Err(Error::Store(_)) => faults += 1,
                    Err(e) => panic!("unexpected error: {e}"),
                }
            }
            if participants.iter().all(|p| p.state() == DkgState::Finalized) {
                break;
            }
        }

        // commitments, first share and ready marker each lost one reply
        assert_eq!(faults, 3);
        assert_eq!(store.lost(), 3);
        assert!(participants.iter().all(|p| p.state() == DkgState::Finalized));

        let state = store.fetch_state(&session_id).await.unwrap();
        assert_eq!(state.commitment_sets.len(), 2);
        assert_eq!(state.share_inbox.len(), 4);
        assert_eq!(state.ready_markers.len(), 2);

        let shares: Vec<&KeyShare> = participants
            .iter()
            .map(|p| p.key_share().unwrap())
            .collect();
        assert!(shares.iter().all(|s| s.excluded.is_empty()));
        let d = reconstruct(curve, &shares);
        assert_eq!(curve.mul_base(&d).unwrap(), shares[0].public_key);
        assert_eq!(check_termination(&state).unwrap().as_deref(), participants[0].key_hash());
    }

    #[tokio::test]
    async fn test_run_dkg_retries_store_faults() {
        let store = std::sync::Arc::new(LossyStore::new(MemoryStore::default(), 2));
        let session_id = new_session(&*store, SessionParams::new(3, 2, 1).unwrap()).await;
        let config = DkgConfig {
            poll_interval: Duration::from_millis(10),
            ..DkgConfig::default()
        };

        let handles: Vec<_> = (0..3u64)
            .map(|i| {
                let store = store.clone();
                let session_id = session_id.clone();
                let config = config.clone();
                tokio::spawn(async move {
                    let curve = Curve::secp256k1();
                    let mut rng = ChaCha20Rng::seed_from_u64(95 + i);
                    let transport = TransportKeyPair::generate(curve, &mut rng).unwrap();
                    run_dkg(
                        curve,
                        &*store,
                        &session_id,
                        &format!("party-{i}"),
                        transport,
                        config,
                        &mut rng,
                    )
                    .await
                })
            })
            .collect();

        let mut public_keys = Vec::new();
        for handle in handles {
            public_keys.push(handle.await.unwrap().unwrap().public_key.clone());
        }
        assert!(public_keys.windows(2).all(|w| w[0] == w[1]));
        assert_eq!(store.lost(), 3);
    }

    async fn corrupted_run(tampering: Tampering, seed: u64) {
        let _ = tracing_subscriber::fmt().with_test_writer().try_init();
        let curve = Curve::secp256k1();
        let store = TamperingStore::new(MemoryStore::default(), 4, 2, tampering);
        let mut rng = ChaCha20Rng::seed_from_u64(seed);
        let session_id = new_session(&store, SessionParams::new(5, 3, 1).unwrap()).await;

        let participants = drive_round_robin(&store, &session_id, 5, &mut rng).await;
        let shares: Vec<&KeyShare> = participants
            .iter()
            .map(|p| p.key_share().unwrap())
            .collect();

        assert_eq!(shares[1].index, 2);
        assert_eq!(shares[1].excluded, vec![4]);
        for share in &shares {
            assert_eq!(share.public_key, shares[0].public_key);
            if share.index != 2 {
                assert!(share.excluded.is_empty());
            }
        }
        let state = store.fetch_state(&session_id).await.unwrap();
        assert!(check_termination(&state).unwrap().is_some());
    }

    #[tokio::test]
    async fn test_corrupted_ciphertext_excludes_sender() {
        corrupted_run(Tampering::FlipCiphertext, 72).await;
    }

    #[tokio::test]
    async fn test_wrong_share_value_excludes_sender() {
        corrupted_run(Tampering::ReplaceValue, 73).await;
    }

    #[tokio::test]
    async fn test_patience_finalizes_without_silent_participant() {
        let curve = Curve::secp256k1();
        let store = MemoryStore::default();
        let mut rng = ChaCha20Rng::seed_from_u64(74);
        let session_id = new_session(&store, SessionParams::new(3, 2, 1).unwrap()).await;
        let config = DkgConfig {
            share_patience: 3,
            ..DkgConfig::default()
        };

        let mut active = Vec::new();
        for id in ["a", "b"] {
            let transport = TransportKeyPair::generate(curve, &mut rng).unwrap();
            active.push(
                DkgParticipant::join(curve, &store, &session_id, id, transport, config.clone())
                    .await
                    .unwrap(),
            );
        }
        // joins but never publishes anything
        let silent = TransportKeyPair::generate(curve, &mut rng).unwrap();
        store
            .join(&session_id, "silent", silent.public_key())
            .await
            .unwrap();

        for _ in 0..10 {
            for participant in active.iter_mut() {
                participant.advance(&store, &mut rng).await.unwrap();
            }
        }

        for participant in &active {
            let share = participant.key_share().unwrap();
            assert_eq!(share.excluded, vec![3]);
        }
        let state = store.fetch_state(&session_id).await.unwrap();
        assert_eq!(
            active[0].key_share().unwrap().public_key,
            curve
                .sum(state.commitment_sets.iter().map(|c| &c.coefficients[0]))
                .unwrap()
        );
        assert!(check_termination(&state).unwrap().is_some());
    }

    #[tokio::test]
    async fn test_threshold_not_met() {
        let curve = Curve::secp256k1();
        let store = MemoryStore::default();
        let mut rng = ChaCha20Rng::seed_from_u64(75);
        let session_id = new_session(&store, SessionParams::new(3, 3, 1).unwrap()).await;
        let config = DkgConfig {
            share_patience: 1,
            ..DkgConfig::default()
        };

        let mut active = Vec::new();
        for id in ["a", "b"] {
            let transport = TransportKeyPair::generate(curve, &mut rng).unwrap();
            active.push(
                DkgParticipant::join(curve, &store, &session_id, id, transport, config.clone())
                    .await
                    .unwrap(),
            );
        }
        let silent = TransportKeyPair::generate(curve, &mut rng).unwrap();
        store
            .join(&session_id, "silent", silent.public_key())
            .await
            .unwrap();

        let mut outcome = Ok(DkgState::Joined);
        for _ in 0..5 {
            outcome = active[0].advance(&store, &mut rng).await;
            if outcome.is_err() {
                break;
            }
            let _ = active[1].advance(&store, &mut rng).await;
        }
        assert!(matches!(
            outcome,
            Err(Error::ThresholdNotMet {
                required: 3,
                actual: 2
            })
        ));
    }

    #[tokio::test]
    async fn test_timeout_when_roster_incomplete() {
        let curve = Curve::secp256k1();
        let store = MemoryStore::default();
        let mut rng = ChaCha20Rng::seed_from_u64(76);
        let session_id = new_session(&store, SessionParams::new(2, 2, 1).unwrap()).await;
        let config = DkgConfig {
            poll_interval: Duration::from_millis(1),
            max_polls: 3,
            share_patience: 1,
        };

        let transport = TransportKeyPair::generate(curve, &mut rng).unwrap();
        let result = run_dkg(curve, &store, &session_id, "alone", transport, config, &mut rng).await;
        assert!(matches!(result, Err(Error::Timeout(_))));
    }

    #[tokio::test]
    async fn test_divergent_ready_markers() {
        let store = MemoryStore::default();
        let session_id = new_session(&store, SessionParams::new(2, 1, 1).unwrap()).await;
        let g = Curve::secp256k1().generator();
        for id in ["a", "b"] {
            store.join(&session_id, id, g).await.unwrap();
        }
        for (from, key_hash) in [(1, "aa"), (2, "bb")] {
            let marker = ReadyMarker {
                from,
                key_hash: key_hash.into(),
                transcript_hash: "cc".into(),
            };
            store.publish_ready(&session_id, &marker).await.unwrap();
        }

        let state = store.fetch_state(&session_id).await.unwrap();
        assert!(matches!(
            check_termination(&state),
            Err(Error::ConsistencyFault { distinct: 2, .. })
        ));
    }

    #[tokio::test]
    async fn test_group_shares_are_dealt() {
        let curve = Curve::secp256k1();
        let store = MemoryStore::default();
        let mut rng = ChaCha20Rng::seed_from_u64(77);
        let policy = sample_policy();
        let params = SessionParams::new(5, 3, 1)
            .unwrap()
            .with_policy(policy.clone())
            .unwrap();
        let session_id = new_session(&store, params).await;

        let participants = drive_round_robin(&store, &session_id, 5, &mut rng).await;
        let state = store.fetch_state(&session_id).await.unwrap();
        let expected_e = curve
            .sum(
                state
                    .commitment_sets
                    .iter()
                    .map(|c| &c.group.as_ref().unwrap().outer[0]),
            )
            .unwrap();

        for participant in &participants {
            let share = participant.key_share().unwrap();
            assert_eq!(share.group_key.as_ref(), Some(&expected_e));
            assert_eq!(share.group_shares.len(), policy.groups_of(share.index).len());
        }
        // participant 2 sits on the board and on ops
        let second = participants[1].key_share().unwrap();
        assert_eq!(second.group_share("board").unwrap().local_index, 2);
        assert_eq!(second.group_share("ops").unwrap().local_index, 1);
        assert!(second.group_share("legal").is_none());
    }
}
