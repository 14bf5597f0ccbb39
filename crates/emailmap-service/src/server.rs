use anyhow::Result;
use axum::{
    body::Bytes,
    extract::State,
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use chrono::SecondsFormat;
use emailmap_core::{ChangeEvent, SyncError, SyncOutcome, Timestamp};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{info, warn};

use crate::error::AppError;
use crate::state::AppState;

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/triggers/users", post(user_trigger))
        .route("/index/lookup", post(lookup))
        .route("/docs/text", post(doc_text))
        .with_state(state)
}

pub async fn serve<F>(bind: SocketAddr, state: Arc<AppState>, shutdown: F) -> Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let listener = TcpListener::bind(bind).await?;
    info!(addr = %listener.local_addr()?, backend = state.sync.backend(), "listening");
    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown)
        .await?;
    Ok(())
}

/// One trigger invocation: sync the index, then journal what changed.
/// A journal failure is logged only; the index commit already happened.
pub async fn apply_event(state: &AppState, event: &ChangeEvent) -> Result<SyncOutcome, SyncError> {
    let outcome = state.sync.handle(event).await?;
    if let Some(journal) = state.journal.clone() {
        let applied = outcome.clone();
        // file appends stay off the async workers
        match tokio::task::spawn_blocking(move || journal.record(&applied)).await {
            Ok(Ok(_)) => {}
            Ok(Err(err)) => {
                warn!(error = %err, user_id = event.user_id(), "journal append failed")
            }
            Err(err) => {
                warn!(error = %err, user_id = event.user_id(), "journal task failed")
            }
        }
    }
    Ok(outcome)
}

#[derive(Serialize)]
struct Health {
    status: &'static str,
    store: &'static str,
}

async fn healthz(State(state): State<Arc<AppState>>) -> Json<Health> {
    Json(Health {
        status: "ok",
        store: state.sync.backend(),
    })
}

async fn user_trigger(
    State(state): State<Arc<AppState>>,
    body: Bytes,
) -> Result<StatusCode, AppError> {
    let event = ChangeEvent::from_slice(&body)?;
    apply_event(&state, &event).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Deserialize)]
pub struct LookupRequest {
    pub email: String,
}

#[derive(Serialize, Deserialize, Debug, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct LookupResponse {
    pub uid: String,
    pub created_at: Option<String>,
}

async fn lookup(
    State(state): State<Arc<AppState>>,
    Json(req): Json<LookupRequest>,
) -> Result<Json<LookupResponse>, AppError> {
    let entry = state
        .sync
        .index()
        .lookup_email(&req.email)
        .await?
        .ok_or(AppError::NotFound)?;
    let created_at = match entry.created_at {
        Timestamp::At(at) => Some(at.to_rfc3339_opts(SecondsFormat::Millis, true)),
        Timestamp::ServerTimestamp => None,
    };
    Ok(Json(LookupResponse {
        uid: entry.uid,
        created_at,
    }))
}

async fn doc_text(
    State(state): State<Arc<AppState>>,
    Json(url): Json<String>,
) -> Result<String, AppError> {
    Ok(state.gdoc.fetch_text(&url).await?)
}
