use std::fmt;

use serde::{Deserialize, Serialize};

use crate::errors::ValidationError;

/// Human term labels accepted in place of a term code.
pub const TERM_LABELS: &[(&str, &str)] = &[("Fall 2025", "202610"), ("Spring 2026", "202620")];

fn all_digits(s: &str, len: usize) -> bool {
    s.len() == len && s.bytes().all(|b| b.is_ascii_digit())
}

/// Check that `crn` is exactly five digits (surrounding whitespace ignored).
pub fn validate_crn(crn: &str) -> Result<String, ValidationError> {
    let crn = crn.trim();
    if all_digits(crn, 5) {
        Ok(crn.to_string())
    } else {
        Err(ValidationError::InvalidCrn(crn.to_string()))
    }
}

/// Resolve a term label (`"Fall 2025"`) or a raw 6-digit code (`"202610"`)
/// to its canonical term code.
pub fn resolve_term(term: &str) -> Result<String, ValidationError> {
    let term = term.trim();

    if let Some((_, code)) = TERM_LABELS.iter().find(|(label, _)| *label == term) {
        return Ok((*code).to_string());
    }

    if all_digits(term, 6) {
        Ok(term.to_string())
    } else {
        Err(ValidationError::InvalidTerm(term.to_string()))
    }
}

/// A (CRN, term code) pair. Only built through [`SubscriptionKey::parse`],
/// so both halves are always well-formed.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct SubscriptionKey {
    crn: String,
    term: String,
}

impl SubscriptionKey {
    pub fn parse(crn: &str, term: &str) -> Result<Self, ValidationError> {
        Ok(Self {
            crn: validate_crn(crn)?,
            term: resolve_term(term)?,
        })
    }

    pub fn crn(&self) -> &str {
        &self.crn
    }

    pub fn term(&self) -> &str {
        &self.term
    }
}

impl fmt::Display for SubscriptionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.crn, self.term)
    }
}

/// One subscriber watching one key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Subscription {
    pub subscriber_id: String,
    pub key: SubscriptionKey,
}

/// Seat numbers for a course section as shown by the registration system.
///
/// Counts stay textual so sentinel values like `"N/A"` survive untouched.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AvailabilityRecord {
    #[serde(rename = "CourseTitle")]
    pub course_title: String,
    #[serde(rename = "Capacity")]
    pub capacity: String,
    #[serde(rename = "Actual")]
    pub actual: String,
    #[serde(rename = "Remaining")]
    pub remaining: String,
}

impl AvailabilityRecord {
    /// Title without the trailing ` - CRN - SUBJ NUM - SEC` decoration.
    pub fn short_title(&self) -> &str {
        self.course_title
            .split(" - ")
            .next()
            .unwrap_or_default()
            .trim()
    }
}
