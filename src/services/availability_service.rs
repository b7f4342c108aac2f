use std::time::Duration;

use crate::errors::ApiError;
use crate::services::provider::{fetch_with_timeout, AvailabilityProvider};
use crate::state::course::{AvailabilityRecord, SubscriptionKey};

/// Validate `crn`/`term` and fetch the current seat numbers.
///
/// Validation happens before any network call.
pub async fn check(
    provider: &dyn AvailabilityProvider,
    crn: &str,
    term: &str,
    timeout: Duration,
) -> Result<(SubscriptionKey, AvailabilityRecord), ApiError> {
    let key = SubscriptionKey::parse(crn, term)?;

    match fetch_with_timeout(provider, &key, timeout).await {
        Ok(record) => Ok((key, record)),
        Err(e) => {
            tracing::warn!(%key, reason = e.as_label(), "Seat check failed: {e}");
            Err(e.into())
        }
    }
}
