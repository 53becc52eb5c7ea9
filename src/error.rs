//! Error types for the ledger and the submission path.

use crate::ledger::{SubmissionHandle, SubmissionStatus};
use thiserror::Error;

/// Result type alias for ledger operations.
pub type LedgerResult<T> = std::result::Result<T, LedgerError>;

/// Errors raised by [`crate::ledger::Ledger`].
#[derive(Debug, Error)]
pub enum LedgerError {
    /// The job id is already bound to another submission.
    #[error("job id {job_id} is already bound to submission {owner}")]
    DuplicateJobId {
        job_id: String,
        owner: SubmissionHandle,
    },

    /// The submission already carries a different job id.
    #[error("submission {handle} is already bound to job id {existing}")]
    HandleAlreadyBound {
        handle: SubmissionHandle,
        existing: String,
    },

    #[error("no submission with handle {0}")]
    UnknownHandle(SubmissionHandle),

    /// The submission left SUBMITTED (swept or abandoned) before its job id arrived.
    #[error("submission {handle} is {current} and can no longer take a job id")]
    NotAttachable {
        handle: SubmissionHandle,
        current: SubmissionStatus,
    },

    /// No submission carries this job id (never created, lost or purged).
    #[error("no submission for job id {0}")]
    NotFound(String),

    /// The requested move would go backwards or break the output_ref rule.
    #[error("invalid transition {from:?} -> {to:?}: {reason}")]
    InvalidTransition {
        from: SubmissionStatus,
        to: SubmissionStatus,
        reason: &'static str,
    },

    #[error("storage error: {0}")]
    Storage(#[from] rusqlite::Error),
}

/// Why an intake attempt did not produce a job id.
#[derive(Debug, Error)]
pub enum SubmissionError {
    /// The scanning service rejected the document or could not be reached.
    #[error("external submission failed: {0:#}")]
    External(anyhow::Error),

    /// The scanning service handed back a job id we already track.
    #[error("correlation failure: {0}")]
    Correlation(LedgerError),

    #[error(transparent)]
    Ledger(#[from] LedgerError),
}
