//! Database model types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Label used wherever a missing country code has to be shown or grouped.
pub const UNKNOWN_COUNTRY: &str = "Unknown";

/// A monitored endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Target {
    pub id: i64,
    pub url: String,
    pub group: String,
    pub country_code: Option<String>,
}

/// A target that passed import validation and can be written to the store.
///
/// Built by [`crate::registry::TargetInput::validate`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewTarget {
    pub url: String,
    pub group: String,
    pub country_code: Option<String>,
}

/// Optional filter for listing targets.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TargetFilter {
    pub group: Option<String>,
    #[serde(alias = "country")]
    pub country_code: Option<String>,
}

/// One outcome of checking one target.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProbeResult {
    /// Row id, 0 until persisted.
    pub id: i64,
    pub target_id: i64,
    pub timestamp: DateTime<Utc>,
    pub status_code: Option<u16>,
    pub response_time_ms: Option<f64>,
    pub error_message: Option<String>,
    pub success: bool,
}

impl ProbeResult {
    /// A response was received; `success` follows the status class.
    pub fn responded(target_id: i64, timestamp: DateTime<Utc>, status: u16, response_time_ms: f64) -> Self {
        Self {
            id: 0,
            target_id,
            timestamp,
            status_code: Some(status),
            response_time_ms: Some(response_time_ms),
            error_message: None,
            success: is_success_status(Some(status)),
        }
    }

    /// No usable response was obtained.
    pub fn failed(target_id: i64, timestamp: DateTime<Utc>, error_message: impl Into<String>) -> Self {
        Self {
            id: 0,
            target_id,
            timestamp,
            status_code: None,
            response_time_ms: None,
            error_message: Some(error_message.into()),
            success: false,
        }
    }
}

/// True for a status in the inclusive 2xx range.
pub fn is_success_status(status: Option<u16>) -> bool {
    matches!(status, Some(200..=299))
}

/// A probe result joined with the target it belongs to.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AnnotatedResult {
    #[serde(flatten)]
    pub result: ProbeResult,
    pub url: String,
    pub group: String,
    pub country_code: Option<String>,
}

impl AnnotatedResult {
    pub fn country_label(&self) -> &str {
        self.country_code.as_deref().unwrap_or(UNKNOWN_COUNTRY)
    }
}
