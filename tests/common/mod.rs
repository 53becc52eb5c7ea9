#![allow(dead_code)]

use anyhow::{anyhow, Result};
use docrelay::{
    collab::Notifier,
    ledger::{Ledger, SubmissionHandle},
};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Duration;
use tempfile::TempDir;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Sent {
    Text { to: String, text: String },
    Document { to: String, doc_ref: String, filename: String },
}

/// Records every dispatch; can be told to fail documents or texts.
#[derive(Default)]
pub struct RecordingNotifier {
    pub sent: Mutex<Vec<Sent>>,
    pub fail_documents: Mutex<bool>,
    pub fail_texts: bool,
}

impl RecordingNotifier {
    pub fn failing_documents() -> Self {
        Self {
            fail_documents: Mutex::new(true),
            ..Self::default()
        }
    }

    pub fn set_fail_documents(&self, fail: bool) {
        *self.fail_documents.lock().unwrap() = fail;
    }

    pub fn sent(&self) -> Vec<Sent> {
        self.sent.lock().unwrap().clone()
    }

    pub fn documents(&self) -> Vec<Sent> {
        self.sent()
            .into_iter()
            .filter(|s| matches!(s, Sent::Document { .. }))
            .collect()
    }

    pub fn texts_to(&self, to: &str) -> Vec<String> {
        self.sent()
            .into_iter()
            .filter_map(|s| match s {
                Sent::Text { to: t, text } if t == to => Some(text),
                _ => None,
            })
            .collect()
    }
}

impl Notifier for RecordingNotifier {
    fn notify_text(&self, user_ref: &str, text: &str) -> Result<()> {
        if self.fail_texts {
            return Err(anyhow!("text channel down"));
        }
        self.sent.lock().unwrap().push(Sent::Text {
            to: user_ref.into(),
            text: text.into(),
        });
        Ok(())
    }

    fn notify_document(&self, user_ref: &str, doc_ref: &str, filename: &str) -> Result<()> {
        if *self.fail_documents.lock().unwrap() {
            return Err(anyhow!("media upload rejected"));
        }
        self.sent.lock().unwrap().push(Sent::Document {
            to: user_ref.into(),
            doc_ref: doc_ref.into(),
            filename: filename.into(),
        });
        Ok(())
    }
}

pub struct TempLedger {
    _dir: TempDir,
    pub path: PathBuf,
}

impl TempLedger {
    pub fn new() -> Self {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("ledger.sqlite3");
        Self { _dir: dir, path }
    }

    pub fn open(&self) -> Ledger {
        open_at(&self.path)
    }
}

pub fn open_at(path: &Path) -> Ledger {
    Ledger::open(path, Duration::from_secs(10)).expect("open ledger")
}

/// A submission that already carries `job_id`.
pub fn seed(ledger: &Ledger, user: &str, job_id: &str) -> SubmissionHandle {
    let handle = ledger.create(user, "media:doc", "doc.pdf").unwrap();
    ledger.attach_job_id(handle, job_id).unwrap();
    handle
}
