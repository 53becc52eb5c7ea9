use crate::config::Scan;
use crate::util::de_opt_string_or_number;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmitRequest {
    pub input_ref: String,
    pub filename: String,
    pub options: Scan,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanResponse {
    pub ok: bool,
    #[serde(default, alias = "report_id", deserialize_with = "de_opt_string_or_number")]
    pub job_id: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "cmd", rename_all = "snake_case")]
pub enum NotifyRequest {
    Text {
        to: String,
        text: String,
    },
    Document {
        to: String,
        doc_ref: String,
        filename: String,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotifyResponse {
    pub ok: bool,
    #[serde(default)]
    pub error: Option<String>,
}
