use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use crate::errors::FetchError;
use crate::state::course::{AvailabilityRecord, SubscriptionKey};

/// Source of live seat numbers.
///
/// Implementations report every failure as a [`FetchError`] and never touch
/// caller state.
#[async_trait]
pub trait AvailabilityProvider: Send + Sync {
    async fn fetch(&self, key: &SubscriptionKey) -> Result<AvailabilityRecord, FetchError>;
}

pub type ProviderRef = Arc<dyn AvailabilityProvider>;

/// Fetch `key`, treating anything slower than `timeout` as a failure.
pub async fn fetch_with_timeout(
    provider: &dyn AvailabilityProvider,
    key: &SubscriptionKey,
    timeout: Duration,
) -> Result<AvailabilityRecord, FetchError> {
    match tokio::time::timeout(timeout, provider.fetch(key)).await {
        Ok(res) => res,
        Err(_elapsed) => Err(FetchError::Timeout(timeout)),
    }
}

/// Canned seat numbers for running without the registration system.
///
/// Tests override individual keys to script seat changes.
#[derive(Default)]
pub struct SimulatedProvider {
    overrides: Mutex<HashMap<SubscriptionKey, Result<AvailabilityRecord, FetchError>>>,
}

impl SimulatedProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every following fetch of `key` return `result`.
    #[cfg(test)]
    pub fn set(&self, key: SubscriptionKey, result: Result<AvailabilityRecord, FetchError>) {
        self.overrides
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(key, result);
    }

    /// Replace only the remaining seat count reported for `key`.
    #[cfg(test)]
    pub fn set_remaining(&self, key: &SubscriptionKey, remaining: &str) {
        let mut record = self.default_record(key);
        record.remaining = remaining.to_string();
        self.set(key.clone(), Ok(record));
    }

    fn default_record(&self, key: &SubscriptionKey) -> AvailabilityRecord {
        let (title, capacity, actual, remaining) = match key.crn() {
            "12384" => ("Policy, Regulation, And Globalization In IT".to_string(), "72", "70", "2"),
            "12385" => ("Systems Programming".to_string(), "65", "65", "0"),
            crn => (format!("[SIMULATED] Example Course - {crn}"), "60", "58", "2"),
        };

        AvailabilityRecord {
            course_title: title,
            capacity: capacity.to_string(),
            actual: actual.to_string(),
            remaining: remaining.to_string(),
        }
    }
}

#[async_trait]
impl AvailabilityProvider for SimulatedProvider {
    async fn fetch(&self, key: &SubscriptionKey) -> Result<AvailabilityRecord, FetchError> {
        let scripted = self
            .overrides
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(key)
            .cloned();

        tracing::debug!(%key, "Simulated seat fetch");
        scripted.unwrap_or_else(|| Ok(self.default_record(key)))
    }
}
