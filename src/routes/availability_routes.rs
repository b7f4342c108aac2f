use axum::{
    extract::{Query, State},
    routing::get,
    Json, Router,
};
use serde::Deserialize;

use crate::errors::ApiError;
use crate::services::availability_service;
use crate::state::app::AppState;
use crate::state::course::AvailabilityRecord;

#[derive(Debug, Deserialize)]
pub struct CheckParams {
    #[serde(default)]
    pub crn: String,
    #[serde(default)]
    pub term: String,
}

pub fn routes(state: AppState) -> Router {
    Router::new()
        .route("/check_seats", get(check_seats))
        .with_state(state)
}

//
// ─────────────────────────────────────────────────────────────
// GET /check_seats?crn=12384&term=202610
// Live seat numbers, or { "error": ... } with a non-2xx status
// ─────────────────────────────────────────────────────────────
//
async fn check_seats(
    State(state): State<AppState>,
    Query(params): Query<CheckParams>,
) -> Result<Json<AvailabilityRecord>, ApiError>
{
    let (_key, record) = availability_service::check(
        state.provider.as_ref(),
        &params.crn,
        &params.term,
        state.fetch_timeout,
    )
    .await?;

    Ok(Json(record))
}
