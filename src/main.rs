/*****************************************************************************************
 *
 *  seatwatch – Course Seat Availability Watcher
 *  --------------------------------------------
 *
 *  On-demand seat lookups, a JSON-file watchlist, and a background poller
 *  that reports seat count changes for every watched section.
 *
 *****************************************************************************************/

mod app;
mod config;
mod errors;
mod html;
mod persistence;
mod poller;
mod routes;
mod services;
mod state;

use std::sync::Arc;

use axum::serve;
use tokio::net::TcpListener;
use tokio::task;
use tokio_util::sync::CancellationToken;

use tracing::level_filters::LevelFilter;
use tracing_subscriber::FmtSubscriber;

use crate::config::{AppConfig, ProviderKind};
use crate::persistence::{JsonWatchlist, SubscriptionStore};
use crate::poller::{Poller, PollerSettings};
use crate::services::notify_service::Notifier;
use crate::services::provider::{ProviderRef, SimulatedProvider};
use crate::services::registration::RegistrationClient;
use crate::state::app::AppState;

#[tokio::main]
async fn main() {
    //
    // ────────────────────────────────────────────────────────
    //  Locate config.json (EXE folder or project root)
    // ────────────────────────────────────────────────────────
    //
    let exe_path = std::env::current_exe().expect("Cannot get executable path");
    let exe_dir = exe_path.parent().expect("Cannot get executable directory");

    let config_path = config::locate(exe_dir)
        .unwrap_or_else(|e| panic!("{e}\nCopy config.json to one of these paths."));

    //
    // ────────────────────────────────────────────────────────
    //  Load configuration
    // ────────────────────────────────────────────────────────
    //
    let cfg = AppConfig::load_from_file(&config_path)
        .unwrap_or_else(|e| panic!("Cannot load configuration: {e}"));

    //
    // ────────────────────────────────────────────────────────
    //  Configure logging
    // ────────────────────────────────────────────────────────
    //
    let level = match cfg.log_level.to_lowercase().as_str() {
        "trace" => LevelFilter::TRACE,
        "debug" => LevelFilter::DEBUG,
        "info"  => LevelFilter::INFO,
        "warn"  => LevelFilter::WARN,
        "error" => LevelFilter::ERROR,
        _ => LevelFilter::INFO,
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .finish();

    tracing::subscriber::set_global_default(subscriber)
        .expect("Failed to set tracing subscriber");

    tracing::info!("Starting seatwatch…");
    tracing::info!("Loaded {} : {:?}", config_path.display(), cfg);

    //
    // ────────────────────────────────────────────────────────
    //  Availability provider + watchlist
    // ────────────────────────────────────────────────────────
    //
    let provider: ProviderRef = match cfg.provider {
        ProviderKind::Registration => Arc::new(
            RegistrationClient::new(
                cfg.registration_url.clone(),
                &cfg.user_agent,
                cfg.fetch_timeout(),
            )
            .unwrap_or_else(|e| panic!("Cannot build registration client: {e}")),
        ),
        ProviderKind::Simulated => {
            tracing::warn!("Using simulated seat data; no requests reach the registration system");
            Arc::new(SimulatedProvider::new())
        }
    };

    let store: Arc<dyn SubscriptionStore> = Arc::new(JsonWatchlist::new(&cfg.watchlist_path));

    //
    // ────────────────────────────────────────────────────────
    //  Start poller + notifier
    // ────────────────────────────────────────────────────────
    //
    let shutdown_token = CancellationToken::new();

    let poller = Poller::new(store.clone(), provider.clone(), PollerSettings::from(&cfg));
    let events = poller.subscribe();
    let poller_status = poller.status();

    let poller_task = task::spawn(poller.run(shutdown_token.child_token()));

    let notifier = Notifier::new(store.clone(), cfg.notify_webhook.clone());
    let notifier_task = task::spawn(notifier.run(events, shutdown_token.child_token()));

    //
    // ────────────────────────────────────────────────────────
    //  Build Axum app (seats + watchlist + system routes)
    // ────────────────────────────────────────────────────────
    //
    let state = AppState::new(&cfg, store, provider, poller_status);
    let app = app::build_app(state);

    //
    // ────────────────────────────────────────────────────────
    //  Bind server and start listening
    // ────────────────────────────────────────────────────────
    //
    let addr = std::net::SocketAddr::from(([0, 0, 0, 0], cfg.port));
    let listener = TcpListener::bind(addr)
        .await
        .expect("Failed to bind address");

    tracing::info!("Listening on http://{}", addr);

    serve(listener, app)
        .with_graceful_shutdown(shutdown(shutdown_token.clone()))
        .await
        .expect("Server error");

    shutdown_token.cancel();
    for (name, handle) in [("poller", poller_task), ("notifier", notifier_task)] {
        if let Err(e) = handle.await {
            tracing::error!("{name} task ended abnormally: {e}");
        }
    }
    tracing::info!("Goodbye.");
}

//
// ─────────────────────────────────────────────────────────────
//  Graceful shutdown handler
// ─────────────────────────────────────────────────────────────
//
async fn shutdown(token: CancellationToken) {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {e}");
        std::future::pending::<()>().await;
    }

    tracing::warn!("CTRL+C received — stopping poller…");
    token.cancel();
}
