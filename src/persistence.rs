use std::collections::BTreeMap;
use std::io::ErrorKind;
use std::path::PathBuf;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::{fs, sync::Mutex};

use crate::errors::StoreError;
use crate::state::course::{Subscription, SubscriptionKey};

/// Result of a subscribe request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddOutcome {
    Added,
    AlreadyWatching,
}

/// Result of an unsubscribe request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoveOutcome {
    Removed,
    NotWatching,
}

/// Durable subscriber -> watched keys mapping.
#[async_trait]
pub trait SubscriptionStore: Send + Sync {
    /// Every (subscriber, key) pair currently stored.
    async fn list_all(&self) -> Result<Vec<Subscription>, StoreError>;

    /// Keys watched by one subscriber, in subscription order.
    async fn list_for(&self, subscriber_id: &str) -> Result<Vec<SubscriptionKey>, StoreError>;

    async fn add(&self, subscriber_id: &str, key: &SubscriptionKey) -> Result<AddOutcome, StoreError>;

    async fn remove(&self, subscriber_id: &str, key: &SubscriptionKey) -> Result<RemoveOutcome, StoreError>;
}

/// On-disk form of a single watched entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
struct WatchEntry {
    crn: String,
    term: String,
}

impl From<&SubscriptionKey> for WatchEntry {
    fn from(key: &SubscriptionKey) -> Self {
        Self {
            crn: key.crn().to_string(),
            term: key.term().to_string(),
        }
    }
}

type Watchlist = BTreeMap<String, Vec<WatchEntry>>;

/// Watchlist kept in a pretty-printed JSON file:
///
/// ```json
/// { "<subscriber>": [ { "crn": "12384", "term": "202610" } ] }
/// ```
///
/// Mutations are serialized through a mutex and written via a temp file +
/// rename, so readers never see a half-written file.
pub struct JsonWatchlist {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl JsonWatchlist {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    async fn load(&self) -> Result<Watchlist, StoreError> {
        let data = match fs::read_to_string(&self.path).await {
            Ok(d) => d,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Watchlist::new()),
            Err(e) => return Err(e.into()),
        };

        if data.trim().is_empty() {
            return Ok(Watchlist::new());
        }

        Ok(serde_json::from_str(&data)?)
    }

    async fn save(&self, list: &Watchlist) -> Result<(), StoreError> {
        let json = serde_json::to_string_pretty(list)?;

        let mut tmp = self.path.clone().into_os_string();
        tmp.push(".tmp");
        let tmp = PathBuf::from(tmp);

        fs::write(&tmp, json.as_bytes()).await?;
        fs::rename(&tmp, &self.path).await?;
        Ok(())
    }
}

/// Turn a stored entry back into a key, dropping entries that no longer validate.
fn entry_key(subscriber_id: &str, entry: &WatchEntry) -> Option<SubscriptionKey> {
    match SubscriptionKey::parse(&entry.crn, &entry.term) {
        Ok(key) => Some(key),
        Err(e) => {
            tracing::warn!(subscriber = subscriber_id, "Skipping invalid watchlist entry: {e}");
            None
        }
    }
}

#[async_trait]
impl SubscriptionStore for JsonWatchlist {
    async fn list_all(&self) -> Result<Vec<Subscription>, StoreError> {
        let list = self.load().await?;

        let mut out = Vec::new();
        for (subscriber_id, entries) in &list {
            for entry in entries {
                if let Some(key) = entry_key(subscriber_id, entry) {
                    out.push(Subscription {
                        subscriber_id: subscriber_id.clone(),
                        key,
                    });
                }
            }
        }
        Ok(out)
    }

    async fn list_for(&self, subscriber_id: &str) -> Result<Vec<SubscriptionKey>, StoreError> {
        let list = self.load().await?;

        Ok(list
            .get(subscriber_id)
            .map(|entries| {
                entries
                    .iter()
                    .filter_map(|e| entry_key(subscriber_id, e))
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn add(&self, subscriber_id: &str, key: &SubscriptionKey) -> Result<AddOutcome, StoreError> {
        let _guard = self.write_lock.lock().await;
        let mut list = self.load().await?;

        let entry = WatchEntry::from(key);
        let entries = list.entry(subscriber_id.to_string()).or_default();
        if entries.contains(&entry) {
            return Ok(AddOutcome::AlreadyWatching);
        }
        entries.push(entry);

        self.save(&list).await?;
        tracing::info!(subscriber = subscriber_id, %key, "Subscription added");
        Ok(AddOutcome::Added)
    }

    async fn remove(&self, subscriber_id: &str, key: &SubscriptionKey) -> Result<RemoveOutcome, StoreError> {
        let _guard = self.write_lock.lock().await;
        let mut list = self.load().await?;

        let entry = WatchEntry::from(key);
        let Some(entries) = list.get_mut(subscriber_id) else {
            return Ok(RemoveOutcome::NotWatching);
        };

        let before = entries.len();
        entries.retain(|e| *e != entry);
        if entries.len() == before {
            return Ok(RemoveOutcome::NotWatching);
        }
        if entries.is_empty() {
            list.remove(subscriber_id);
        }

        self.save(&list).await?;
        tracing::info!(subscriber = subscriber_id, %key, "Subscription removed");
        Ok(RemoveOutcome::Removed)
    }
}
