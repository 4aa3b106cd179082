//! Internal API consumed by the room server.
//!
//! ## Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | POST   | `/_herald/v1/send_event`  | Queue an event for a set of destinations |
//! | POST   | `/_herald/v1/update_room` | Apply a membership delta to a room |
//! | GET    | `/health`                 | Database reachability and queue count |

use std::sync::Arc;

use axum::{
    extract::State,
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use herald_common::{error::HeraldResult, models::JoinedHost};
use herald_federation::{FederationSender, Pdu, TransactionSender};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

/// Shared state available to all route handlers.
pub struct AppState<S: TransactionSender> {
    pub sender: FederationSender<S>,
}

/// Build the internal API router.
pub fn build_router<S: TransactionSender>(state: AppState<S>) -> Router {
    Router::new()
        .route("/_herald/v1/send_event", post(send_event::<S>))
        .route("/_herald/v1/update_room", post(update_room::<S>))
        .route("/health", get(health_check::<S>))
        .layer(tower_http::trace::TraceLayer::new_for_http())
        .with_state(Arc::new(state))
}

// ─── Send event ───────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct SendEventRequest {
    /// Raw event JSON; turned into a [`Pdu`] by the handler.
    event: Value,
    origin: String,
    destinations: Vec<String>,
}

/// `POST /_herald/v1/send_event`
async fn send_event<S: TransactionSender>(
    State(state): State<Arc<AppState<S>>>,
    Json(req): Json<SendEventRequest>,
) -> HeraldResult<(StatusCode, Json<Value>)> {
    let event = Pdu::from_json(req.event)?;
    let event_id = event.event_id().to_owned();
    state.sender.send_event(event, &req.origin, &req.destinations).await?;
    Ok((StatusCode::ACCEPTED, Json(json!({ "event_id": event_id }))))
}

// ─── Update room ──────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct UpdateRoomRequest {
    room_id: String,
    old_last_sent_event_id: String,
    new_last_sent_event_id: String,
    #[serde(default)]
    add_hosts: Vec<JoinedHost>,
    #[serde(default)]
    remove_hosts: Vec<String>,
}

#[derive(Debug, Serialize)]
struct UpdateRoomResponse {
    /// Joined hosts before the delta was applied.
    joined_hosts: Vec<JoinedHost>,
}

/// `POST /_herald/v1/update_room`
async fn update_room<S: TransactionSender>(
    State(state): State<Arc<AppState<S>>>,
    Json(req): Json<UpdateRoomRequest>,
) -> HeraldResult<Json<UpdateRoomResponse>> {
    let joined_hosts = state
        .sender
        .update_room(
            &req.room_id,
            &req.old_last_sent_event_id,
            &req.new_last_sent_event_id,
            &req.add_hosts,
            &req.remove_hosts,
        )
        .await?;
    Ok(Json(UpdateRoomResponse { joined_hosts }))
}

// ─── Health ───────────────────────────────────────────────────────────────────

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
    destination_queues: usize,
}

async fn health_check<S: TransactionSender>(
    State(state): State<Arc<AppState<S>>>,
) -> Json<HealthResponse> {
    let db_ok = state.sender.database().health_check().await;

    Json(HealthResponse {
        status: if db_ok { "healthy".into() } else { "degraded".into() },
        version: env!("CARGO_PKG_VERSION").to_string(),
        destination_queues: state.sender.queues().len().await,
    })
}
