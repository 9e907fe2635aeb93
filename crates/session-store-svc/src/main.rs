//! Session Store Service
//!
//! HTTP service holding the append-only session records that DKG
//! participants coordinate through.

use anyhow::Result;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use clap::Parser;
use session_store::wire::{
    CreateSessionRequest, CreateSessionResponse, ErrorBody, JoinRequest, JoinResponse,
    PutRecordRequest, PutRecordResponse,
};
use session_store::{RecordId, RecordStore, StoreError};
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{info, warn, Level};

/// Session store service CLI arguments
#[derive(Parser, Debug)]
#[command(name = "session-store-svc")]
#[command(about = "Session store service for dealerless key generation")]
struct Args {
    /// Listen address
    #[arg(short, long, env = "LISTEN", default_value = "0.0.0.0:8080")]
    listen: String,

    /// Session TTL in seconds
    #[arg(long, env = "SESSION_TTL", default_value_t = session_store::DEFAULT_TTL_SECONDS)]
    ttl: i64,

    /// Seconds between sweeps of expired sessions
    #[arg(long, default_value = "60")]
    cleanup_interval: u64,
}

/// Application state
struct AppState {
    store: RecordStore,
}

/// A store error rendered as an HTTP response
struct ApiError(StoreError);

impl From<StoreError> for ApiError {
    fn from(e: StoreError) -> Self {
        Self(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            StoreError::NotFound(_) => StatusCode::NOT_FOUND,
            StoreError::SessionExpired(_) => StatusCode::GONE,
            StoreError::Duplicate(_) | StoreError::SessionFull { .. } => StatusCode::CONFLICT,
            StoreError::InvalidFormat(_) => StatusCode::BAD_REQUEST,
        };
        if status != StatusCode::NOT_FOUND {
            warn!(status = status.as_u16(), error = %self.0, "Request rejected");
        }
        (status, Json(ErrorBody::from(&self.0))).into_response()
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_max_level(Level::INFO)
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(Level::INFO.into()),
        )
        .init();

    let args = Args::parse();

    info!(
        listen = %args.listen,
        ttl = args.ttl,
        "Starting session store service"
    );

    let state = Arc::new(AppState {
        store: RecordStore::new(args.ttl),
    });

    // Spawn cleanup task
    let cleanup_store = state.store.clone();
    let cleanup_every = std::time::Duration::from_secs(args.cleanup_interval.max(1));
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(cleanup_every);
        loop {
            interval.tick().await;
            let before = cleanup_store.session_count();
            cleanup_store.cleanup();
            let swept = before.saturating_sub(cleanup_store.session_count());
            if swept > 0 {
                info!(swept, "Expired sessions removed");
            }
        }
    });

    let app = router(state);

    let listener = tokio::net::TcpListener::bind(&args.listen).await?;
    info!(address = %args.listen, "Listening");

    axum::serve(listener, app).await?;

    Ok(())
}

fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/v1/sessions", post(create_session))
        .route("/v1/sessions/:id", get(get_session))
        .route("/v1/sessions/:id/join", post(join_session))
        .route("/v1/sessions/:id/records", post(put_record))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Health check endpoint
async fn health(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "service": "session-store-svc",
        "version": env!("CARGO_PKG_VERSION"),
        "sessions": state.store.session_count(),
    }))
}

async fn create_session(
    State(state): State<Arc<AppState>>,
    Json(req): Json<CreateSessionRequest>,
) -> Result<(StatusCode, Json<CreateSessionResponse>), ApiError> {
    let session_id = state.store.create_session(req.capacity, req.descriptor)?;
    info!(session_id = %session_id, capacity = req.capacity, "Session created");
    Ok((StatusCode::CREATED, Json(CreateSessionResponse { session_id })))
}

async fn join_session(
    State(state): State<Arc<AppState>>,
    Path(session_id): Path<String>,
    Json(req): Json<JoinRequest>,
) -> Result<Json<JoinResponse>, ApiError> {
    let index = state
        .store
        .join(&session_id, &req.participant_id, req.payload)?;
    info!(
        session_id = %session_id,
        participant_id = %req.participant_id,
        index,
        "Participant joined"
    );
    Ok(Json(JoinResponse { index }))
}

async fn put_record(
    State(state): State<Arc<AppState>>,
    Path(session_id): Path<String>,
    Json(req): Json<PutRecordRequest>,
) -> Result<Json<PutRecordResponse>, ApiError> {
    let id = RecordId::new(&session_id, req.kind, req.from, req.to);
    let hash = state.store.put(id, req.payload)?;
    info!(
        session_id = %session_id,
        kind = req.kind.as_str(),
        from = req.from,
        to = ?req.to,
        "Record stored"
    );
    Ok(Json(PutRecordResponse { hash }))
}

async fn get_session(
    State(state): State<Arc<AppState>>,
    Path(session_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    Ok(Json(state.store.snapshot(&session_id)?))
}
