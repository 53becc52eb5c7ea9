use crate::{
    collab::{Notifier, ScanClient},
    config::Config,
    intake::Intake,
    ledger::Ledger,
    util::redact,
};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

/// A message from an end user, already unwrapped from the platform envelope.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InboundMessage {
    pub from: String,
    #[serde(default)]
    pub document: Option<InboundDocument>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InboundDocument {
    /// Platform media reference the scanner collaborator knows how to fetch.
    pub media_ref: String,
    #[serde(default = "InboundDocument::default_filename")]
    pub filename: String,
    #[serde(default)]
    pub mime_type: String,
}

impl InboundDocument {
    fn default_filename() -> String {
        "document.pdf".into()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum RelayOutcome {
    /// Not a supported document; the user was asked to send one.
    Prompted,
    Submitted { job_id: String },
    Failed { error: String },
}

/// The user-facing side of intake: acknowledgements around a submission.
pub struct Relay<'a> {
    cfg: &'a Config,
    ledger: &'a Ledger,
    scanner: &'a dyn ScanClient,
    notifier: &'a dyn Notifier,
}

impl<'a> Relay<'a> {
    pub fn new(
        cfg: &'a Config,
        ledger: &'a Ledger,
        scanner: &'a dyn ScanClient,
        notifier: &'a dyn Notifier,
    ) -> Self {
        Self {
            cfg,
            ledger,
            scanner,
            notifier,
        }
    }

    pub fn on_message(&self, msg: &InboundMessage) -> RelayOutcome {
        let from = msg.from.as_str();
        let Some(doc) = msg.document.as_ref().filter(|d| self.accepts(d)) else {
            info!("non-document message from={}", redact(from));
            self.say(from, &self.cfg.messages.send_a_document);
            return RelayOutcome::Prompted;
        };

        self.say(from, &self.cfg.messages.received);

        let intake = Intake::new(self.ledger, &self.cfg.scan);
        match intake.submit(from, &doc.media_ref, &doc.filename, self.scanner) {
            Ok(job_id) => {
                self.say(from, &self.cfg.messages.submitted);
                RelayOutcome::Submitted { job_id }
            }
            Err(err) => {
                warn!("submission failed from={}: {err}", redact(from));
                self.say(from, &self.cfg.messages.submission_failed);
                RelayOutcome::Failed {
                    error: err.to_string(),
                }
            }
        }
    }

    fn accepts(&self, doc: &InboundDocument) -> bool {
        self.cfg
            .scan
            .accepted_mime_types
            .iter()
            .any(|m| m.eq_ignore_ascii_case(doc.mime_type.trim()))
    }

    // Text failures never affect ledger state.
    fn say(&self, to: &str, text: &str) {
        if let Err(err) = self.notifier.notify_text(to, text) {
            warn!("text message to={} failed: {err:#}", redact(to));
        }
    }
}
