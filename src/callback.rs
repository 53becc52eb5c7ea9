use crate::util::{de_opt_string_or_number, de_string_or_number};
use serde::{Deserialize, Serialize};

/// A status notification posted by the scanning service.
///
/// Delivery is at-least-once and unordered, even for a single job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallbackEvent {
    #[serde(alias = "report_id", deserialize_with = "de_string_or_number")]
    pub job_id: String,
    #[serde(default)]
    pub status: String,
    #[serde(
        default,
        alias = "plagiarism_report_url",
        deserialize_with = "de_opt_string_or_number"
    )]
    pub report_ref: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallbackStatus {
    Queued,
    Completed,
    Other(String),
}

impl CallbackEvent {
    pub fn kind(&self) -> CallbackStatus {
        let s = self.status.trim();
        if s.eq_ignore_ascii_case("queued") {
            CallbackStatus::Queued
        } else if s.eq_ignore_ascii_case("completed") {
            CallbackStatus::Completed
        } else {
            CallbackStatus::Other(s.to_string())
        }
    }

    pub fn from_json(raw: &[u8]) -> serde_json::Result<Self> {
        serde_json::from_slice(raw)
    }
}
