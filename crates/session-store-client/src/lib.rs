//! Session Store Client
//!
//! [`SessionStore`] implementation that talks to `session-store-svc` over
//! HTTP. Artifacts are encoded with the same codec the in-memory store uses,
//! so a participant behaves identically against either backend.

use doublelock_core::keygen::{CommitmentSet, EncryptedShare, ReadyMarker};
use doublelock_core::store::{async_trait, codec, SessionStore};
use doublelock_core::{Error, ParticipantIndex, Point, Result, SessionId, SessionParams, SessionState};
use reqwest::{Client, RequestBuilder, StatusCode};
use serde::de::DeserializeOwned;
use session_store::wire::{
    CreateSessionRequest, CreateSessionResponse, ErrorBody, JoinRequest, JoinResponse,
    PutRecordRequest, PutRecordResponse,
};
use session_store::{RecordId, SessionSnapshot};
use std::time::Duration;
use tracing::{debug, instrument, warn};

/// Pause between attempts of a failed read
const RETRY_DELAY: Duration = Duration::from_millis(100);

/// Why a request failed
#[derive(Debug)]
enum Failure {
    /// No answer came back from the service
    Network(String),
    /// The service answered, and the answer was an error or undecodable
    Rejected(Error),
}

impl From<Failure> for Error {
    fn from(failure: Failure) -> Self {
        match failure {
            Failure::Network(e) => Error::Store(e),
            Failure::Rejected(e) => e,
        }
    }
}

/// HTTP-backed session store
#[derive(Clone)]
pub struct HttpStore {
    /// HTTP client
    client: Client,
    /// Store service URL
    url: String,
    /// Request timeout
    timeout: Duration,
    /// Attempts for snapshot reads that fail at the network level
    read_attempts: usize,
}

impl HttpStore {
    /// Create a client for the service at `url`
    pub fn new(url: &str) -> Self {
        Self {
            client: Client::new(),
            url: url.trim_end_matches('/').to_string(),
            timeout: Duration::from_secs(30),
            read_attempts: 3,
        }
    }

    /// Set request timeout
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Set how many times a snapshot read is attempted
    pub fn with_read_attempts(mut self, attempts: usize) -> Self {
        self.read_attempts = attempts.max(1);
        self
    }

    /// Service URL
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Raw snapshot of a session
    #[instrument(skip(self))]
    pub async fn snapshot(&self, session_id: &str) -> Result<SessionSnapshot> {
        let mut attempt = 1;
        loop {
            let request = self
                .client
                .get(format!("{}/v1/sessions/{}", self.url, session_id));
            match self.send(request).await {
                Ok(snapshot) => return Ok(snapshot),
                Err(Failure::Network(e)) if attempt < self.read_attempts => {
                    warn!(attempt, error = %e, "Snapshot read failed, retrying");
                    tokio::time::sleep(RETRY_DELAY).await;
                    attempt += 1;
                }
                Err(failure) => return Err(failure.into()),
            }
        }
    }

    #[instrument(skip(self, payload), fields(kind = id.kind.as_str(), from = id.from, to = ?id.to))]
    async fn put(&self, (id, payload): (RecordId, Vec<u8>)) -> Result<()> {
        let req = PutRecordRequest {
            kind: id.kind,
            from: id.from,
            to: id.to,
            payload,
        };
        let request = self
            .client
            .post(format!("{}/v1/sessions/{}/records", self.url, id.session_id))
            .json(&req);
        let response: PutRecordResponse = self.send(request).await?;
        debug!(hash = %response.hash, "Record stored");
        Ok(())
    }

    async fn send<T: DeserializeOwned>(
        &self,
        request: RequestBuilder,
    ) -> std::result::Result<T, Failure> {
        let response = request
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| Failure::Network(e.to_string()))?;

        let status = response.status();
        let body = response
            .bytes()
            .await
            .map_err(|e| Failure::Network(e.to_string()))?;

        if !status.is_success() {
            return Err(Failure::Rejected(error_from_response(status, &body)));
        }
        serde_json::from_slice(&body)
            .map_err(|e| Failure::Rejected(Error::Deserialization(e.to_string())))
    }
}

/// Map a failed response onto the core error type
fn error_from_response(status: StatusCode, body: &[u8]) -> Error {
    match serde_json::from_slice::<ErrorBody>(body) {
        Ok(body) => body.into_store_error().into(),
        Err(_) => Error::Store(format!("Request failed with status: {}", status)),
    }
}

#[async_trait]
impl SessionStore for HttpStore {
    #[instrument(skip(self, params), fields(n = params.n, t = params.t))]
    async fn create_session(&self, params: &SessionParams) -> Result<SessionId> {
        let req = CreateSessionRequest {
            capacity: params.n,
            descriptor: codec::encode_params(params)?,
        };
        let request = self
            .client
            .post(format!("{}/v1/sessions", self.url))
            .json(&req);
        let response: CreateSessionResponse = self.send(request).await?;
        debug!(session_id = %response.session_id, "Session created");
        Ok(response.session_id)
    }

    #[instrument(skip(self, transport_public_key))]
    async fn join(
        &self,
        session_id: &str,
        participant_id: &str,
        transport_public_key: &Point,
    ) -> Result<ParticipantIndex> {
        let req = JoinRequest {
            participant_id: participant_id.to_string(),
            payload: codec::encode_enrollment(transport_public_key)?,
        };
        let request = self
            .client
            .post(format!("{}/v1/sessions/{}/join", self.url, session_id))
            .json(&req);
        let response: JoinResponse = self.send(request).await?;
        Ok(response.index)
    }

    async fn publish_commitments(&self, session_id: &str, commitments: &CommitmentSet) -> Result<()> {
        self.put(codec::commitments_record(session_id, commitments)?)
            .await
    }

    async fn submit_share(&self, session_id: &str, share: &EncryptedShare) -> Result<()> {
        self.put(codec::share_record(session_id, share)?).await
    }

    async fn fetch_state(&self, session_id: &str) -> Result<SessionState> {
        codec::decode_snapshot(self.snapshot(session_id).await?)
    }

    async fn publish_ready(&self, session_id: &str, marker: &ReadyMarker) -> Result<()> {
        self.put(codec::ready_record(session_id, marker)?).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    /// Local server that answers every request with `response`, or hangs up
    /// without answering when it is `None`. Returns its URL and a request count.
    async fn canned_service(response: Option<&'static str>) -> (String, Arc<AtomicUsize>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("http://{}", listener.local_addr().unwrap());
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = hits.clone();

        tokio::spawn(async move {
            loop {
                let (mut socket, _) = listener.accept().await.unwrap();
                counter.fetch_add(1, Ordering::SeqCst);
                let mut buf = [0u8; 4096];
                let _ = socket.read(&mut buf).await;
                if let Some(body) = response {
                    let reply = format!(
                        "HTTP/1.1 410 Gone\r\ncontent-type: application/json\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{}",
                        body.len(),
                        body
                    );
                    let _ = socket.write_all(reply.as_bytes()).await;
                }
                let _ = socket.shutdown().await;
            }
        });
        (url, hits)
    }

    #[test]
    fn test_trailing_slash_is_trimmed() {
        let store = HttpStore::new("http://localhost:8080/").with_read_attempts(0);
        assert_eq!(store.url(), "http://localhost:8080");
        assert_eq!(store.read_attempts, 1);
    }

    #[test]
    fn test_error_bodies_map_to_core_errors() {
        let body = br#"{"error":"Duplicate: share","code":"duplicate"}"#;
        assert!(matches!(
            error_from_response(StatusCode::CONFLICT, body),
            Error::Duplicate(_)
        ));

        let body = br#"{"error":"Not found: s1","code":"not_found"}"#;
        assert!(matches!(
            error_from_response(StatusCode::NOT_FOUND, body),
            Error::SessionNotFound(_)
        ));

        assert!(matches!(
            error_from_response(StatusCode::BAD_GATEWAY, b"<html>"),
            Error::Store(_)
        ));
    }

    #[tokio::test]
    async fn test_unreachable_service_is_a_store_error() {
        let store = HttpStore::new("http://127.0.0.1:1")
            .with_timeout(Duration::from_millis(200))
            .with_read_attempts(2);
        let err = store.fetch_state("missing").await.unwrap_err();
        assert!(matches!(err, Error::Store(_)));
        assert_eq!(err.class(), doublelock_core::ErrorClass::Transport);
    }

    #[tokio::test]
    async fn test_service_answers_are_not_retried() {
        let (url, hits) =
            canned_service(Some(r#"{"error":"Session expired: s1","code":"session_expired"}"#)).await;
        let store = HttpStore::new(&url).with_read_attempts(3);

        let err = store.snapshot("s1").await.unwrap_err();
        assert!(matches!(err, Error::Store(_)));
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_dropped_connections_are_retried() {
        let (url, hits) = canned_service(None).await;
        let store = HttpStore::new(&url)
            .with_timeout(Duration::from_secs(2))
            .with_read_attempts(3);

        let err = store.snapshot("s1").await.unwrap_err();
        assert!(matches!(err, Error::Store(_)));
        assert_eq!(hits.load(Ordering::SeqCst), 3);
    }
}
