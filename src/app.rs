use axum::Router;
use tower_http::trace::{DefaultMakeSpan, DefaultOnResponse, TraceLayer};
use tracing::Level;

use crate::routes::{availability_routes, system_routes, watchlist_routes};
use crate::state::app::AppState;

/// Build the complete Axum application:
/// - /check_seats  (on-demand seat lookup)
/// - /watchlist    (subscribe / unsubscribe / list)
/// - /system       (alive + version + poller status)
pub fn build_app(state: AppState) -> Router {
    Router::new()
        // /check_seats
        .merge(availability_routes::routes(state.clone()))

        // /watchlist/*
        .nest("/watchlist", watchlist_routes::routes(state.clone()))

        // /system/*
        .nest("/system", system_routes::routes(state))

        // Logging middleware
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
                .on_response(DefaultOnResponse::new().level(Level::INFO)),
        )
}
