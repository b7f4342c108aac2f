use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::state::course::SubscriptionKey;

/// A detected transition of the `remaining` seat count for one key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChangeEvent {
    pub key: SubscriptionKey,
    pub previous: Option<String>,
    pub current: String,
    pub observed_at: DateTime<Utc>,
}

/// Result of feeding one observation into the tracker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Observation {
    /// First value seen for this key; stored, nothing to report.
    Baseline,
    Unchanged,
    Changed { previous: String },
}

/// Last observed `remaining` value per key.
///
/// Lives for the process lifetime only. Not shared: the poller owns it and
/// is the single writer.
#[derive(Debug, Default)]
pub struct ChangeTracker {
    last_seen: HashMap<SubscriptionKey, String>,
}

impl ChangeTracker {
    pub fn new() -> Self {
        Self::default()
    }

    #[cfg_attr(not(test), allow(dead_code))]
    pub fn get(&self, key: &SubscriptionKey) -> Option<&str> {
        self.last_seen.get(key).map(String::as_str)
    }

    #[cfg_attr(not(test), allow(dead_code))]
    pub fn set(&mut self, key: SubscriptionKey, value: String) {
        self.last_seen.insert(key, value);
    }

    /// Compare `value` against the stored one and remember it.
    pub fn observe(&mut self, key: &SubscriptionKey, value: &str) -> Observation {
        match self.last_seen.get_mut(key) {
            None => {
                self.last_seen.insert(key.clone(), value.to_string());
                Observation::Baseline
            }
            Some(prev) if prev == value => Observation::Unchanged,
            Some(prev) => {
                let previous = std::mem::replace(prev, value.to_string());
                Observation::Changed { previous }
            }
        }
    }

    pub fn len(&self) -> usize {
        self.last_seen.len()
    }

    #[cfg(test)]
    pub fn is_empty(&self) -> bool {
        self.last_seen.is_empty()
    }
}
