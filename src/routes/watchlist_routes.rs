use axum::{
    extract::{Path, State},
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use serde_json::{json, Value};

use crate::errors::ApiError;
use crate::persistence::{AddOutcome, RemoveOutcome};
use crate::services::watchlist_service;
use crate::state::app::AppState;
use crate::state::course::SubscriptionKey;

/// Body of /watchlist/subscribe and /watchlist/unsubscribe.
#[derive(Debug, Deserialize)]
pub struct WatchRequest {
    pub subscriber_id: String,
    pub crn: String,
    /// Term label (`"Fall 2025"`) or 6-digit term code.
    pub term: String,
}

/// Build all watchlist routes under /watchlist
pub fn routes(state: AppState) -> Router {
    Router::new()
        .route("/subscribe", post(subscribe))
        .route("/unsubscribe", post(unsubscribe))
        .route("/:subscriber_id", get(list))
        .route("/:subscriber_id/seats", get(list_with_seats))
        .with_state(state)
}

fn status_body(status: &str, key: &SubscriptionKey) -> Json<Value> {
    Json(json!({
        "status": status,
        "crn": key.crn(),
        "term": key.term(),
    }))
}

//
// ─────────────────────────────────────────────────────────────
// POST /watchlist/subscribe
// Start watching a section (must exist upstream)
// ─────────────────────────────────────────────────────────────
//
async fn subscribe(
    State(state): State<AppState>,
    Json(req): Json<WatchRequest>,
) -> Result<Json<Value>, ApiError>
{
    let (key, outcome) = watchlist_service::subscribe(
        state.store.as_ref(),
        state.provider.as_ref(),
        state.fetch_timeout,
        &req.subscriber_id,
        &req.crn,
        &req.term,
    )
    .await?;

    let status = match outcome {
        AddOutcome::Added => "watching",
        AddOutcome::AlreadyWatching => "already_watching",
    };
    Ok(status_body(status, &key))
}

//
// ─────────────────────────────────────────────────────────────
// POST /watchlist/unsubscribe
// Stop watching a section
// ─────────────────────────────────────────────────────────────
//
async fn unsubscribe(
    State(state): State<AppState>,
    Json(req): Json<WatchRequest>,
) -> Result<Json<Value>, ApiError>
{
    let (key, outcome) =
        watchlist_service::unsubscribe(state.store.as_ref(), &req.subscriber_id, &req.crn, &req.term)
            .await?;

    let status = match outcome {
        RemoveOutcome::Removed => "removed",
        RemoveOutcome::NotWatching => "not_watching",
    };
    Ok(status_body(status, &key))
}

//
// ─────────────────────────────────────────────────────────────
// GET /watchlist/{subscriber_id}
// Watched sections as [{ crn, term }]
// ─────────────────────────────────────────────────────────────
//
async fn list(
    Path(subscriber_id): Path<String>,
    State(state): State<AppState>,
) -> Result<Json<Vec<SubscriptionKey>>, ApiError>
{
    Ok(Json(
        watchlist_service::list(state.store.as_ref(), &subscriber_id).await?,
    ))
}

//
// ─────────────────────────────────────────────────────────────
// GET /watchlist/{subscriber_id}/seats
// Watched sections with live seat numbers
// ─────────────────────────────────────────────────────────────
//
async fn list_with_seats(
    Path(subscriber_id): Path<String>,
    State(state): State<AppState>,
) -> Result<Json<Vec<Value>>, ApiError>
{
    let seats = watchlist_service::list_with_seats(
        state.store.as_ref(),
        state.provider.as_ref(),
        state.fetch_timeout,
        &subscriber_id,
    )
    .await?;

    Ok(Json(
        seats
            .into_iter()
            .map(|(key, record)| {
                json!({
                    "crn": key.crn(),
                    "term": key.term(),
                    "title": record.short_title(),
                    "record": record,
                })
            })
            .collect(),
    ))
}
