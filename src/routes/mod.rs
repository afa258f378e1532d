//! HTTP surface over the session engine.
//!
//! - `GET /api/health`
//! - `GET /api/sessions`             -- full catalog, newest first
//! - `GET /api/sessions/:id`         -- one session with its messages
//! - `GET /api/sessions/:id/events`  -- SSE stream of live updates
//! - `GET /api/projects`             -- projects with session counts
//! - `GET /api/tags`                 -- tag usage counts

use std::collections::BTreeMap;
use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::{Path, State},
    response::sse::{Event, Sse},
    routing::get,
    Json, Router,
};
use futures::Stream;
use serde::Serialize;
use serde_json::json;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing::{info, warn};

use crate::error::ApiError;
use crate::live::{WatcherEvent, WatcherEventKind};
use crate::session::{ProjectSummary, Session, SessionDetail, SessionStatus, Tag};
use crate::AppState;

const PING_INTERVAL: Duration = Duration::from_secs(30);

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/api/health", get(health))
        .route("/api/sessions", get(list_sessions))
        .route("/api/sessions/:id", get(get_session))
        .route("/api/sessions/:id/events", get(session_events))
        .route("/api/projects", get(list_projects))
        .route("/api/tags", get(list_tags))
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .with_state(state)
}

// Response bodies. Serialized by `Json`, so a path that is not valid UTF-8
// turns into a 500 instead of a panic.

#[derive(Serialize)]
struct SessionsResponse {
    sessions: Vec<Session>,
}

#[derive(Serialize)]
struct SessionResponse {
    session: SessionDetail,
}

#[derive(Serialize)]
struct ProjectsResponse {
    projects: Vec<ProjectSummary>,
}

#[derive(Serialize)]
struct TagsResponse {
    tags: BTreeMap<Tag, usize>,
}

async fn health() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok" }))
}

async fn list_sessions(
    State(state): State<Arc<AppState>>,
) -> Result<Json<SessionsResponse>, ApiError> {
    let directory = state.directory.clone();
    let sessions = tokio::task::spawn_blocking(move || directory.discover()).await?;
    Ok(Json(SessionsResponse { sessions }))
}

async fn get_session(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<SessionResponse>, ApiError> {
    let directory = state.directory.clone();
    let lookup = id.clone();
    let detail = tokio::task::spawn_blocking(move || directory.get_by_id(&lookup))
        .await?
        .ok_or(ApiError::SessionNotFound(id))?;
    Ok(Json(SessionResponse { session: detail }))
}

async fn list_projects(
    State(state): State<Arc<AppState>>,
) -> Result<Json<ProjectsResponse>, ApiError> {
    let directory = state.directory.clone();
    let projects = tokio::task::spawn_blocking(move || directory.projects()).await?;
    Ok(Json(ProjectsResponse { projects }))
}

async fn list_tags(State(state): State<Arc<AppState>>) -> Result<Json<TagsResponse>, ApiError> {
    let directory = state.directory.clone();
    let tags = tokio::task::spawn_blocking(move || directory.tag_counts()).await?;
    Ok(Json(TagsResponse { tags }))
}

// =============================================================================
// SSE Endpoint
// =============================================================================

/// GET /api/sessions/:id/events -- live updates for one session.
///
/// | Event     | Payload                         |
/// |-----------|---------------------------------|
/// | `status`  | `{"status": "..."}`; sent first |
/// | `message` | a new message                   |
/// | `error`   | `{"error": "..."}`              |
/// | `ping`    | `{"time": <ms>}` every 30s      |
///
/// Closing the connection drops the subscription, which releases the file
/// watch once nobody else is viewing the session.
async fn session_events(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, ApiError> {
    let directory = state.directory.clone();
    let lookup = id.clone();
    let detail = tokio::task::spawn_blocking(move || directory.get_by_id(&lookup))
        .await?
        .ok_or(ApiError::SessionNotFound(id))?;

    let session = detail.session;
    // Watch setup reads the transcript and registers with the OS.
    let distributor = state.distributor.clone();
    let (watch_id, watch_path) = (session.id.clone(), session.file_path.clone());
    let subscription =
        tokio::task::spawn_blocking(move || distributor.subscribe(&watch_id, &watch_path)).await?;
    let initial_status = session.status;
    info!("live stream opened for session {}", session.id);

    let stream = async_stream::stream! {
        yield Ok(status_event(initial_status));

        match subscription {
            Ok(mut subscription) => {
                let mut ping = tokio::time::interval(PING_INTERVAL);
                ping.tick().await;
                loop {
                    tokio::select! {
                        event = subscription.recv() => match event {
                            Some(event) => yield Ok(to_sse(&event)),
                            None => break,
                        },
                        _ = ping.tick() => {
                            let now = chrono::Utc::now().timestamp_millis();
                            yield Ok(Event::default().event("ping").data(json!({ "time": now }).to_string()));
                        }
                    }
                }
            }
            Err(e) => {
                warn!("cannot watch session {}: {e:#}", session.id);
                yield Ok(error_event(&format!("{e:#}")));
            }
        }
    };

    Ok(Sse::new(stream))
}

fn status_event(status: SessionStatus) -> Event {
    Event::default()
        .event("status")
        .data(json!({ "status": status }).to_string())
}

fn error_event(message: &str) -> Event {
    Event::default()
        .event("error")
        .data(json!({ "error": message }).to_string())
}

fn to_sse(event: &WatcherEvent) -> Event {
    match &event.kind {
        WatcherEventKind::Message(message) => Event::default()
            .event(event.kind.label())
            .data(serde_json::to_string(message).unwrap_or_default()),
        WatcherEventKind::Status(status) => status_event(*status),
        WatcherEventKind::Error(message) => error_event(message),
    }
}
