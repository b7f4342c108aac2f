use axum::{
    extract::State,
    routing::get,
    Json, Router,
};
use serde_json::json;

use crate::poller::CycleReport;
use crate::state::app::AppState;

pub fn routes(state: AppState) -> Router {
    Router::new()
        .route("/alive", get(is_alive))
        .route("/version", get(version))
        .route("/poller", get(poller))
        .with_state(state)
}

/// GET /system/alive
async fn is_alive() -> &'static str {
    "OK"
}

/// GET /system/version
async fn version(State(state): State<AppState>) -> Json<serde_json::Value> {
    Json(json!({
        "version": state.server_version
    }))
}

/// GET /system/poller
///
/// Report of the last finished poll cycle, `null` before the first one.
async fn poller(State(state): State<AppState>) -> Json<Option<CycleReport>> {
    Json(state.poller_status.borrow().clone())
}
