use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;

use crate::errors::FetchError;
use crate::html;
use crate::services::provider::AvailabilityProvider;
use crate::state::course::{AvailabilityRecord, SubscriptionKey};

const UNKNOWN_TITLE: &str = "Unknown Course";
const MISSING_COUNT: &str = "N/A";

/// Scrapes the registration system's "detailed class information" page.
pub struct RegistrationClient {
    client: Client,
    base_url: String,
    timeout: Duration,
}

impl RegistrationClient {
    pub fn new(base_url: impl Into<String>, user_agent: &str, timeout: Duration) -> Result<Self, FetchError> {
        let client = Client::builder()
            .user_agent(user_agent)
            .timeout(timeout)
            .build()
            .map_err(|e| FetchError::Transport(e.to_string()))?;

        Ok(Self {
            client,
            base_url: base_url.into(),
            timeout,
        })
    }

    fn map_err(&self, e: reqwest::Error) -> FetchError {
        if e.is_timeout() {
            FetchError::Timeout(self.timeout)
        } else {
            FetchError::Transport(e.to_string())
        }
    }
}

#[async_trait]
impl AvailabilityProvider for RegistrationClient {
    async fn fetch(&self, key: &SubscriptionKey) -> Result<AvailabilityRecord, FetchError> {
        let resp = self
            .client
            .get(&self.base_url)
            .query(&[("term_in", key.term()), ("crn_in", key.crn())])
            .send()
            .await
            .map_err(|e| self.map_err(e))?;

        let status = resp.status();
        if !status.is_success() {
            return Err(FetchError::Status(status.as_u16()));
        }

        let body = resp.text().await.map_err(|e| self.map_err(e))?;
        tracing::debug!(%key, bytes = body.len(), "Fetched seat page");

        parse_seat_page(&body)
    }
}

fn or_missing(value: String, fallback: &str) -> String {
    if value.is_empty() {
        fallback.to_string()
    } else {
        value
    }
}

/// Extract title and seat counts from a detail page.
pub fn parse_seat_page(page: &str) -> Result<AvailabilityRecord, FetchError> {
    let title = html::find_element(page, "th", |attrs| attrs.contains("ddlabel"))
        .map(html::text)
        .unwrap_or_default();

    let table = html::find_element(page, "table", |attrs| {
        attrs.contains("datadisplaytable") && attrs.contains("seating numbers")
    })
    .ok_or_else(|| FetchError::Structure("could not find the seating information table".into()))?;

    let rows = html::elements(table, "tr");
    if rows.len() < 2 {
        return Err(FetchError::Structure(
            "unexpected structure in seating table".into(),
        ));
    }

    // Row 0 is the header; row 1 holds the section's own seats.
    let cells = html::elements(rows[1], "td");
    let [capacity, actual, remaining] = cells.as_slice() else {
        return Err(FetchError::Structure(format!(
            "unexpected number of columns in seats row: {}",
            cells.len()
        )));
    };

    Ok(AvailabilityRecord {
        course_title: or_missing(title, UNKNOWN_TITLE),
        capacity: or_missing(html::text(capacity), MISSING_COUNT),
        actual: or_missing(html::text(actual), MISSING_COUNT),
        remaining: or_missing(html::text(remaining), MISSING_COUNT),
    })
}
