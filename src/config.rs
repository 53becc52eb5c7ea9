use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub ledger: Ledger,
    #[serde(default)]
    pub collaborators: Collaborators,
    #[serde(default)]
    pub scan: Scan,
    #[serde(default)]
    pub delivery: Delivery,
    #[serde(default)]
    pub messages: Messages,
    #[serde(default)]
    pub retention: Retention,
    #[serde(default)]
    pub logging: Logging,
    #[serde(default)]
    pub debug: Debug,
}

impl Config {
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("reading config: {}", path.display()))?;
        let cfg: Config = toml::from_str(&raw).with_context(|| "parsing TOML")?;
        Ok(cfg)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Ledger {
    pub path: String,
    pub busy_timeout_ms: u64,
}
impl Default for Ledger {
    fn default() -> Self {
        Self {
            path: "docrelay-ledger.sqlite3".into(),
            busy_timeout_ms: 5_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Collaborators {
    #[serde(default = "Command::default_scanner")]
    pub scanner: Command,
    #[serde(default = "Command::default_notifier")]
    pub notifier: Command,
}
impl Default for Collaborators {
    fn default() -> Self {
        Self {
            scanner: Command::default_scanner(),
            notifier: Command::default_notifier(),
        }
    }
}

/// An external program speaking JSON over stdin/stdout.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Command {
    pub program: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub env: BTreeMap<String, String>,
    #[serde(default = "Command::default_timeout_seconds")]
    pub timeout_seconds: u64,
}
impl Command {
    fn default_timeout_seconds() -> u64 {
        60
    }

    fn default_scanner() -> Self {
        Self {
            program: "scripts/scan_submit".into(),
            args: Vec::new(),
            env: Default::default(),
            timeout_seconds: 120,
        }
    }

    fn default_notifier() -> Self {
        Self {
            program: "scripts/notify".into(),
            args: Vec::new(),
            env: Default::default(),
            timeout_seconds: 60,
        }
    }
}

/// Options forwarded verbatim to the scanning service on every submission.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Scan {
    pub submission_type: String,
    pub exclude_bibliography: bool,
    pub exclude_quotes: bool,
    pub accepted_mime_types: Vec<String>,
}
impl Default for Scan {
    fn default() -> Self {
        Self {
            submission_type: "file".into(),
            exclude_bibliography: true,
            exclude_quotes: false,
            accepted_mime_types: vec!["application/pdf".into()],
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Delivery {
    pub report_filename: String,
}
impl Default for Delivery {
    fn default() -> Self {
        Self {
            report_filename: "Similarity_Report.pdf".into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Messages {
    pub received: String,
    pub submitted: String,
    pub queued: String,
    pub submission_failed: String,
    pub send_a_document: String,
}
impl Default for Messages {
    fn default() -> Self {
        Self {
            received: "PDF received! Processing your document...".into(),
            submitted: "Your document has been submitted for analysis. You will receive a PDF when the report is ready.".into(),
            queued: "Your document is queued for analysis.".into(),
            submission_failed: "There was an error processing your document. Please try again later.".into(),
            send_a_document: "Please send your PDF document for analysis.".into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Retention {
    /// SUBMITTED records without a job id older than this are abandoned by `sweep`.
    pub stale_submission_seconds: u64,
    /// DELIVERED/ABANDONED records untouched for this long are deleted by `purge`. 0 disables.
    pub purge_after_seconds: u64,
}
impl Default for Retention {
    fn default() -> Self {
        Self {
            stale_submission_seconds: 3_600,
            purge_after_seconds: 30 * 24 * 3_600,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Logging {
    pub level: String,
    pub json: bool,
    pub write_to_file: bool,
    pub file_path: String,
}
impl Default for Logging {
    fn default() -> Self {
        Self {
            level: "info".into(),
            json: false,
            write_to_file: false,
            file_path: "".into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Debug {
    pub keep_collaborator_stderr: bool,
    pub dump_effective_config: bool,
}
impl Default for Debug {
    fn default() -> Self {
        Self {
            keep_collaborator_stderr: true,
            dump_effective_config: false,
        }
    }
}
