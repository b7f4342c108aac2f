use std::time::Duration;

use futures::future::join_all;

use crate::errors::ApiError;
use crate::persistence::{AddOutcome, RemoveOutcome, SubscriptionStore};
use crate::services::provider::{fetch_with_timeout, AvailabilityProvider};
use crate::state::course::{AvailabilityRecord, SubscriptionKey};

/// Start watching `crn`/`term` for `subscriber_id`.
///
/// The section must currently be visible in the registration system;
/// a CRN that cannot be fetched is refused and nothing is stored.
pub async fn subscribe(
    store: &dyn SubscriptionStore,
    provider: &dyn AvailabilityProvider,
    timeout: Duration,
    subscriber_id: &str,
    crn: &str,
    term: &str,
) -> Result<(SubscriptionKey, AddOutcome), ApiError> {
    let key = SubscriptionKey::parse(crn, term)?;

    if let Err(e) = fetch_with_timeout(provider, &key, timeout).await {
        tracing::info!(%key, reason = e.as_label(), "Refusing to watch unknown section: {e}");
        return Err(ApiError::UnknownCrn(key.crn().to_string()));
    }

    let outcome = store.add(subscriber_id, &key).await?;
    Ok((key, outcome))
}

pub async fn unsubscribe(
    store: &dyn SubscriptionStore,
    subscriber_id: &str,
    crn: &str,
    term: &str,
) -> Result<(SubscriptionKey, RemoveOutcome), ApiError> {
    let key = SubscriptionKey::parse(crn, term)?;
    let outcome = store.remove(subscriber_id, &key).await?;
    Ok((key, outcome))
}

pub async fn list(
    store: &dyn SubscriptionStore,
    subscriber_id: &str,
) -> Result<Vec<SubscriptionKey>, ApiError> {
    Ok(store.list_for(subscriber_id).await?)
}

/// A subscriber's watched sections with live seat numbers.
/// Sections whose fetch fails are left out.
pub async fn list_with_seats(
    store: &dyn SubscriptionStore,
    provider: &dyn AvailabilityProvider,
    timeout: Duration,
    subscriber_id: &str,
) -> Result<Vec<(SubscriptionKey, AvailabilityRecord)>, ApiError> {
    let keys = store.list_for(subscriber_id).await?;

    let fetches = keys.into_iter().map(|key| async move {
        match fetch_with_timeout(provider, &key, timeout).await {
            Ok(record) => Some((key, record)),
            Err(e) => {
                tracing::debug!(%key, "Omitting section from listing: {e}");
                None
            }
        }
    });

    Ok(join_all(fetches).await.into_iter().flatten().collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::{FetchError, StoreError, ValidationError};
    use crate::persistence::JsonWatchlist;
    use crate::services::provider::SimulatedProvider;
    use tempfile::tempdir;

    const TIMEOUT: Duration = Duration::from_secs(10);

    #[tokio::test]
    async fn subscribe_stores_resolved_key() {
        let dir = tempdir().unwrap();
        let store = JsonWatchlist::new(dir.path().join("watchlist.json"));
        let provider = SimulatedProvider::new();

        let (key, outcome) = subscribe(&store, &provider, TIMEOUT, "1", "12384", "Fall 2025")
            .await
            .unwrap();

        assert_eq!(outcome, AddOutcome::Added);
        assert_eq!(key, SubscriptionKey::parse("12384", "202610").unwrap());
        assert_eq!(list(&store, "1").await.unwrap(), vec![key]);
    }

    #[tokio::test]
    async fn subscribe_twice_reports_already_watching() {
        let dir = tempdir().unwrap();
        let store = JsonWatchlist::new(dir.path().join("watchlist.json"));
        let provider = SimulatedProvider::new();

        subscribe(&store, &provider, TIMEOUT, "1", "12384", "202610").await.unwrap();
        let (_, outcome) = subscribe(&store, &provider, TIMEOUT, "1", "12384", "Fall 2025")
            .await
            .unwrap();

        assert_eq!(outcome, AddOutcome::AlreadyWatching);
        assert_eq!(list(&store, "1").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn subscribe_rejects_bad_input_and_unknown_sections() {
        let dir = tempdir().unwrap();
        let store = JsonWatchlist::new(dir.path().join("watchlist.json"));
        let provider = SimulatedProvider::new();

        let err = subscribe(&store, &provider, TIMEOUT, "1", "12384", "Foo")
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::Validation(ValidationError::InvalidTerm(_))));

        let missing = SubscriptionKey::parse("54321", "202610").unwrap();
        provider.set(missing, Err(FetchError::Structure("no table".into())));
        let err = subscribe(&store, &provider, TIMEOUT, "1", "54321", "202610")
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::UnknownCrn(crn) if crn == "54321"));

        assert!(list(&store, "1").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn unsubscribe_removes_only_the_matching_entry() {
        let dir = tempdir().unwrap();
        let store = JsonWatchlist::new(dir.path().join("watchlist.json"));
        let provider = SimulatedProvider::new();

        subscribe(&store, &provider, TIMEOUT, "1", "12384", "202610").await.unwrap();
        subscribe(&store, &provider, TIMEOUT, "1", "12385", "202610").await.unwrap();

        let (_, outcome) = unsubscribe(&store, "1", "12384", "Fall 2025").await.unwrap();
        assert_eq!(outcome, RemoveOutcome::Removed);

        let (_, outcome) = unsubscribe(&store, "1", "12384", "202610").await.unwrap();
        assert_eq!(outcome, RemoveOutcome::NotWatching);

        let remaining = list(&store, "1").await.unwrap();
        assert_eq!(remaining, vec![SubscriptionKey::parse("12385", "202610").unwrap()]);
    }

    #[tokio::test]
    async fn list_with_seats_skips_failed_fetches() {
        let dir = tempdir().unwrap();
        let store = JsonWatchlist::new(dir.path().join("watchlist.json"));
        let provider = SimulatedProvider::new();

        subscribe(&store, &provider, TIMEOUT, "1", "12384", "202610").await.unwrap();
        subscribe(&store, &provider, TIMEOUT, "1", "12385", "202610").await.unwrap();

        let broken = SubscriptionKey::parse("12384", "202610").unwrap();
        provider.set(broken, Err(FetchError::Transport("down".into())));

        let seats = list_with_seats(&store, &provider, TIMEOUT, "1").await.unwrap();
        assert_eq!(seats.len(), 1);
        assert_eq!(seats[0].0.crn(), "12385");
        assert_eq!(seats[0].1.remaining, "0");
    }

    #[tokio::test]
    async fn corrupt_store_surfaces_to_caller() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("watchlist.json");
        std::fs::write(&path, "[1, 2").unwrap();
        let store = JsonWatchlist::new(&path);

        let err = list(&store, "1").await.unwrap_err();
        assert!(matches!(err, ApiError::Store(StoreError::Corrupt(_))));
    }
}
