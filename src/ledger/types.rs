use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ToSql, ToSqlOutput, ValueRef};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Internal row id of a submission, usable before the scanning service assigns a job id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SubmissionHandle(pub i64);

impl fmt::Display for SubmissionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SubmissionStatus {
    Submitted,
    Queued,
    Completed,
    Delivered,
    Abandoned,
}

impl SubmissionStatus {
    pub const ALL: [SubmissionStatus; 5] = [
        SubmissionStatus::Submitted,
        SubmissionStatus::Queued,
        SubmissionStatus::Completed,
        SubmissionStatus::Delivered,
        SubmissionStatus::Abandoned,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            SubmissionStatus::Submitted => "SUBMITTED",
            SubmissionStatus::Queued => "QUEUED",
            SubmissionStatus::Completed => "COMPLETED",
            SubmissionStatus::Delivered => "DELIVERED",
            SubmissionStatus::Abandoned => "ABANDONED",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|s| s.as_str().eq_ignore_ascii_case(raw.trim()))
    }

    /// Whether `output_ref` must be present in this state.
    pub fn carries_output(self) -> bool {
        matches!(self, SubmissionStatus::Completed | SubmissionStatus::Delivered)
    }

    /// Still waiting on the scanning service.
    pub fn is_pending(self) -> bool {
        matches!(self, SubmissionStatus::Submitted | SubmissionStatus::Queued)
    }

    /// Forward-only lifecycle: SUBMITTED -> QUEUED -> COMPLETED -> DELIVERED,
    /// QUEUED optional, ABANDONED only out of a pending state.
    pub fn can_move_to(self, next: SubmissionStatus) -> bool {
        use SubmissionStatus::*;
        match (self, next) {
            (Submitted | Queued, Abandoned) => true,
            (Abandoned, _) | (_, Abandoned) => false,
            (from, to) => chain_rank(to) > chain_rank(from),
        }
    }
}

fn chain_rank(status: SubmissionStatus) -> u8 {
    match status {
        SubmissionStatus::Submitted => 0,
        SubmissionStatus::Queued => 1,
        SubmissionStatus::Completed => 2,
        SubmissionStatus::Delivered => 3,
        SubmissionStatus::Abandoned => u8::MAX,
    }
}

impl fmt::Display for SubmissionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl ToSql for SubmissionStatus {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::from(self.as_str()))
    }
}

impl FromSql for SubmissionStatus {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        let raw = value.as_str()?;
        SubmissionStatus::parse(raw)
            .ok_or_else(|| FromSqlError::Other(format!("unknown submission status: {raw}").into()))
    }
}

/// One accepted document, as stored in the ledger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Submission {
    pub handle: SubmissionHandle,
    pub job_id: Option<String>,
    pub user_ref: String,
    pub input_ref: String,
    pub filename: String,
    pub output_ref: Option<String>,
    pub status: SubmissionStatus,
    pub last_error: Option<String>,
    /// Unix seconds.
    pub created_at: i64,
    /// Unix seconds.
    pub updated_at: i64,
    /// Operator redelivery claims taken so far.
    pub dispatch_attempts: u32,
}

/// Result of a conditional status update.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum Transition {
    /// This caller won the compare-and-swap.
    Transitioned,
    /// Someone else moved the record first; nothing was written.
    AlreadyTransitioned { current: SubmissionStatus },
}

impl Transition {
    pub fn won(self) -> bool {
        matches!(self, Transition::Transitioned)
    }
}
