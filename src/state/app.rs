use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;

use crate::config::AppConfig;
use crate::persistence::SubscriptionStore;
use crate::poller::CycleReport;
use crate::services::provider::ProviderRef;

/// Shared state handed to every HTTP handler.
///
/// Handlers never see the poller's tracker, only its latest cycle report.
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn SubscriptionStore>,
    pub provider: ProviderRef,
    pub fetch_timeout: Duration,
    pub server_version: String,
    pub poller_status: watch::Receiver<Option<CycleReport>>,
}

impl AppState {
    pub fn new(
        cfg: &AppConfig,
        store: Arc<dyn SubscriptionStore>,
        provider: ProviderRef,
        poller_status: watch::Receiver<Option<CycleReport>>,
    ) -> Self {
        Self {
            store,
            provider,
            fetch_timeout: cfg.fetch_timeout(),
            server_version: cfg.server_version.clone(),
            poller_status,
        }
    }
}
