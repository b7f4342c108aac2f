use std::sync::Arc;

use reqwest::Client;
use serde_json::Value;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::persistence::SubscriptionStore;
use crate::state::tracker::ChangeEvent;

/// Fans each seat change out to the subscribers watching that section.
///
/// Every notice is logged; if a webhook is configured it is also POSTed there,
/// fire-and-forget.
pub struct Notifier {
    store: Arc<dyn SubscriptionStore>,
    webhook: Option<(Client, String)>,
}

/// JSON body sent to the webhook for one subscriber.
pub fn notification_body(subscriber_id: &str, event: &ChangeEvent) -> Value {
    serde_json::json!({
        "subscriber_id": subscriber_id,
        "crn": event.key.crn(),
        "term": event.key.term(),
        "event": "seats_changed",
        "previous": event.previous,
        "current": event.current,
        "timestamp": event.observed_at.to_rfc3339(),
    })
}

impl Notifier {
    pub fn new(store: Arc<dyn SubscriptionStore>, webhook: Option<String>) -> Self {
        Self {
            store,
            webhook: webhook.map(|url| (Client::new(), url)),
        }
    }

    /// Notify everyone watching `event.key`; returns who was notified.
    pub async fn notify(&self, event: &ChangeEvent) -> Vec<String> {
        let subscribers: Vec<String> = match self.store.list_all().await {
            Ok(subs) => subs
                .into_iter()
                .filter(|s| s.key == event.key)
                .map(|s| s.subscriber_id)
                .collect(),
            Err(e) => {
                warn!(key = %event.key, "Cannot load watchlist for notification: {e}");
                return Vec::new();
            }
        };

        for subscriber in &subscribers {
            tracing::info!(
                subscriber = %subscriber,
                crn = event.key.crn(),
                term = event.key.term(),
                previous = ?event.previous,
                current = %event.current,
                "Seat availability changed"
            );

            if let Some((client, url)) = &self.webhook {
                let client = client.clone();
                let url = url.clone();
                let body = notification_body(subscriber, event);

                tokio::spawn(async move {
                    let res = client.post(&url).json(&body).send().await;
                    if let Err(e) = res {
                        warn!("Error sending webhook to {}: {}", url, e);
                    }
                });
            }
        }

        subscribers
    }

    /// Consume change events until the channel closes or `cancel` fires.
    pub async fn run(self, mut events: broadcast::Receiver<ChangeEvent>, cancel: CancellationToken) {
        loop {
            let event = tokio::select! {
                res = events.recv() => res,
                _ = cancel.cancelled() => break,
            };

            match event {
                Ok(event) => {
                    self.notify(&event).await;
                }
                Err(RecvError::Lagged(n)) => {
                    warn!("Notifier fell behind; {n} seat changes were not delivered");
                }
                Err(RecvError::Closed) => break,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persistence::JsonWatchlist;
    use crate::state::course::SubscriptionKey;
    use chrono::{TimeZone, Utc};
    use tempfile::tempdir;

    fn event(crn: &str) -> ChangeEvent {
        ChangeEvent {
            key: SubscriptionKey::parse(crn, "202610").unwrap(),
            previous: Some("2".into()),
            current: "0".into(),
            observed_at: Utc.with_ymd_and_hms(2025, 8, 1, 12, 0, 0).unwrap(),
        }
    }

    #[tokio::test]
    async fn notifies_every_watching_subscriber() {
        let dir = tempdir().unwrap();
        let store = Arc::new(JsonWatchlist::new(dir.path().join("watchlist.json")));
        let k = SubscriptionKey::parse("12384", "202610").unwrap();
        store.add("1", &k).await.unwrap();
        store.add("2", &k).await.unwrap();
        store
            .add("3", &SubscriptionKey::parse("12385", "202610").unwrap())
            .await
            .unwrap();

        let notifier = Notifier::new(store, None);
        let mut notified = notifier.notify(&event("12384")).await;
        notified.sort();
        assert_eq!(notified, vec!["1".to_string(), "2".to_string()]);
    }

    #[test]
    fn webhook_body_carries_transition() {
        let body = notification_body("7", &event("12384"));
        assert_eq!(body["subscriber_id"], "7");
        assert_eq!(body["crn"], "12384");
        assert_eq!(body["term"], "202610");
        assert_eq!(body["previous"], "2");
        assert_eq!(body["current"], "0");
        assert_eq!(body["timestamp"], "2025-08-01T12:00:00+00:00");
    }

    #[tokio::test]
    async fn run_stops_when_channel_closes() {
        let dir = tempdir().unwrap();
        let store = Arc::new(JsonWatchlist::new(dir.path().join("watchlist.json")));
        let (tx, rx) = broadcast::channel(4);
        tx.send(event("12384")).unwrap();
        drop(tx);

        Notifier::new(store, None)
            .run(rx, CancellationToken::new())
            .await;
    }
}
