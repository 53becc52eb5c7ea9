pub mod types;

use crate::{
    config::Config,
    error::{LedgerError, LedgerResult},
    util::now_unix,
};
use rusqlite::{
    params, params_from_iter, types::Value, Connection, OptionalExtension, Row, Transaction,
    TransactionBehavior,
};
use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;
use tracing::{debug, info};

pub use types::{Submission, SubmissionHandle, SubmissionStatus, Transition};

const SCHEMA_VERSION: i64 = 1;

const SUBMISSION_COLUMNS: &str = "id, job_id, user_ref, input_ref, filename, output_ref, status, last_error, created_at, updated_at, dispatch_attempts";

/// Durable store of submissions backed by a SQLite file.
///
/// A `Ledger` wraps a single connection. Concurrent handlers open their own
/// `Ledger` on the same path; exclusivity comes from SQLite's conditional
/// updates, never from an in-process lock.
pub struct Ledger {
    conn: Connection,
}

impl Ledger {
    pub fn open(path: &Path, busy_timeout: Duration) -> LedgerResult<Self> {
        let conn = Connection::open(path)?;
        conn.busy_timeout(busy_timeout)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "synchronous", "FULL")?;
        let ledger = Self { conn };
        ledger.bootstrap()?;
        debug!("ledger open path={}", path.display());
        Ok(ledger)
    }

    pub fn open_from_config(cfg: &Config) -> LedgerResult<Self> {
        Self::open(
            Path::new(&cfg.ledger.path),
            Duration::from_millis(cfg.ledger.busy_timeout_ms),
        )
    }

    pub fn in_memory() -> LedgerResult<Self> {
        let ledger = Self {
            conn: Connection::open_in_memory()?,
        };
        ledger.bootstrap()?;
        Ok(ledger)
    }

    fn bootstrap(&self) -> LedgerResult<()> {
        self.conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS submissions (
              id INTEGER PRIMARY KEY AUTOINCREMENT,
              job_id TEXT,
              user_ref TEXT NOT NULL,
              input_ref TEXT NOT NULL,
              filename TEXT NOT NULL,
              output_ref TEXT,
              status TEXT NOT NULL
                CHECK (status IN ('SUBMITTED', 'QUEUED', 'COMPLETED', 'DELIVERED', 'ABANDONED')),
              last_error TEXT,
              created_at INTEGER NOT NULL,
              updated_at INTEGER NOT NULL,
              dispatch_attempts INTEGER NOT NULL DEFAULT 0,
              CHECK ((output_ref IS NOT NULL) = (status IN ('COMPLETED', 'DELIVERED')))
            );
            -- NULL job ids do not collide; assigned ones must be unique.
            CREATE UNIQUE INDEX IF NOT EXISTS idx_submissions_job_id ON submissions(job_id);
            CREATE INDEX IF NOT EXISTS idx_submissions_status ON submissions(status, updated_at);
            "#,
        )?;
        let version: i64 = self
            .conn
            .pragma_query_value(None, "user_version", |row| row.get(0))?;
        if version < SCHEMA_VERSION {
            self.conn
                .pragma_update(None, "user_version", SCHEMA_VERSION)?;
        }
        Ok(())
    }

    /// Insert a SUBMITTED record with no job id yet.
    pub fn create(
        &self,
        user_ref: &str,
        input_ref: &str,
        filename: &str,
    ) -> LedgerResult<SubmissionHandle> {
        let now = now_unix();
        self.conn.execute(
            "INSERT INTO submissions (user_ref, input_ref, filename, status, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?5)",
            params![user_ref, input_ref, filename, SubmissionStatus::Submitted, now],
        )?;
        let handle = SubmissionHandle(self.conn.last_insert_rowid());
        debug!("ledger create handle={handle}");
        Ok(handle)
    }

    /// Bind the scanning service's job id to a submission.
    ///
    /// Re-attaching the same pair is a no-op. A job id owned by another
    /// submission yields [`LedgerError::DuplicateJobId`] and nothing is written.
    /// Only a SUBMITTED record takes a job id; one that was swept or abandoned
    /// meanwhile yields [`LedgerError::NotAttachable`].
    pub fn attach_job_id(&self, handle: SubmissionHandle, job_id: &str) -> LedgerResult<()> {
        let tx = Transaction::new_unchecked(&self.conn, TransactionBehavior::Immediate)?;

        let current: Option<(Option<String>, SubmissionStatus)> = tx
            .query_row(
                "SELECT job_id, status FROM submissions WHERE id = ?1",
                params![handle.0],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;

        match current {
            None => return Err(LedgerError::UnknownHandle(handle)),
            Some((Some(existing), _)) if existing == job_id => {
                tx.commit()?;
                return Ok(());
            }
            Some((Some(existing), _)) => {
                return Err(LedgerError::HandleAlreadyBound { handle, existing });
            }
            Some((None, SubmissionStatus::Submitted)) => {}
            Some((None, current)) => {
                return Err(LedgerError::NotAttachable { handle, current });
            }
        }

        let owner: Option<i64> = tx
            .query_row(
                "SELECT id FROM submissions WHERE job_id = ?1",
                params![job_id],
                |row| row.get(0),
            )
            .optional()?;
        if let Some(owner) = owner {
            return Err(LedgerError::DuplicateJobId {
                job_id: job_id.to_string(),
                owner: SubmissionHandle(owner),
            });
        }

        tx.execute(
            "UPDATE submissions SET job_id = ?1, updated_at = ?2
             WHERE id = ?3 AND status = ?4 AND job_id IS NULL",
            params![job_id, now_unix(), handle.0, SubmissionStatus::Submitted],
        )?;
        tx.commit()?;
        info!("ledger attach handle={handle} job_id={job_id}");
        Ok(())
    }

    pub fn get(&self, handle: SubmissionHandle) -> LedgerResult<Option<Submission>> {
        let sql = format!("SELECT {SUBMISSION_COLUMNS} FROM submissions WHERE id = ?1");
        Ok(self
            .conn
            .query_row(&sql, params![handle.0], map_row)
            .optional()?)
    }

    pub fn find_by_job_id(&self, job_id: &str) -> LedgerResult<Option<Submission>> {
        let sql = format!("SELECT {SUBMISSION_COLUMNS} FROM submissions WHERE job_id = ?1");
        Ok(self
            .conn
            .query_row(&sql, params![job_id], map_row)
            .optional()?)
    }

    /// The single status mutation primitive.
    ///
    /// Runs one `UPDATE ... WHERE status IN (expected)`; among callers racing
    /// on the same job id and expected set exactly one sees
    /// [`Transition::Transitioned`]. `output_ref` must be given when entering
    /// COMPLETED and only then.
    pub fn try_transition(
        &self,
        job_id: &str,
        expected: &[SubmissionStatus],
        new: SubmissionStatus,
        output_ref: Option<&str>,
    ) -> LedgerResult<Transition> {
        validate_transition(expected, new, output_ref)?;

        let placeholders = (0..expected.len())
            .map(|i| format!("?{}", i + 5))
            .collect::<Vec<_>>()
            .join(", ");
        let sql = format!(
            "UPDATE submissions
             SET status = ?1, output_ref = COALESCE(?2, output_ref), updated_at = ?3
             WHERE job_id = ?4 AND status IN ({placeholders})"
        );

        let mut values: Vec<Value> = vec![
            Value::Text(new.as_str().to_string()),
            output_ref.map_or(Value::Null, |r| Value::Text(r.to_string())),
            Value::Integer(now_unix()),
            Value::Text(job_id.to_string()),
        ];
        values.extend(expected.iter().map(|s| Value::Text(s.as_str().to_string())));

        let changed = self.conn.execute(&sql, params_from_iter(values.iter()))?;
        if changed == 1 {
            debug!("ledger transition job_id={job_id} -> {new}");
            return Ok(Transition::Transitioned);
        }

        let current: Option<SubmissionStatus> = self
            .conn
            .query_row(
                "SELECT status FROM submissions WHERE job_id = ?1",
                params![job_id],
                |row| row.get(0),
            )
            .optional()?;
        match current {
            Some(current) => Ok(Transition::AlreadyTransitioned { current }),
            None => Err(LedgerError::NotFound(job_id.to_string())),
        }
    }

    /// Give up on a pending submission that has no job id. Works by handle
    /// because a failed submission never received one. A record that already
    /// carries a job id is left alone: its callback may still arrive.
    pub fn abandon(&self, handle: SubmissionHandle, reason: &str) -> LedgerResult<Transition> {
        let changed = self.conn.execute(
            "UPDATE submissions SET status = ?1, last_error = ?2, updated_at = ?3
             WHERE id = ?4 AND status IN (?5, ?6) AND job_id IS NULL",
            params![
                SubmissionStatus::Abandoned,
                reason,
                now_unix(),
                handle.0,
                SubmissionStatus::Submitted,
                SubmissionStatus::Queued,
            ],
        )?;
        if changed == 1 {
            info!("ledger abandon handle={handle} reason={reason}");
            return Ok(Transition::Transitioned);
        }
        match self.get(handle)? {
            Some(sub) => Ok(Transition::AlreadyTransitioned {
                current: sub.status,
            }),
            None => Err(LedgerError::UnknownHandle(handle)),
        }
    }

    /// Take the operator's right to redispatch a COMPLETED record.
    ///
    /// `seen_attempts` is the `dispatch_attempts` value the caller read; the
    /// counter is bumped only if it is still that value, so of several
    /// operators redelivering the same record exactly one wins.
    pub fn claim_redelivery(&self, job_id: &str, seen_attempts: u32) -> LedgerResult<Transition> {
        let changed = self.conn.execute(
            "UPDATE submissions SET dispatch_attempts = dispatch_attempts + 1, updated_at = ?1
             WHERE job_id = ?2 AND status = ?3 AND dispatch_attempts = ?4",
            params![now_unix(), job_id, SubmissionStatus::Completed, seen_attempts],
        )?;
        if changed == 1 {
            debug!("ledger redelivery claim job_id={job_id} attempt={}", seen_attempts + 1);
            return Ok(Transition::Transitioned);
        }
        match self.find_by_job_id(job_id)? {
            Some(sub) => Ok(Transition::AlreadyTransitioned {
                current: sub.status,
            }),
            None => Err(LedgerError::NotFound(job_id.to_string())),
        }
    }

    /// Annotate a record without touching its status.
    pub fn record_error(&self, job_id: &str, text: &str) -> LedgerResult<()> {
        let changed = self.conn.execute(
            "UPDATE submissions SET last_error = ?1, updated_at = ?2 WHERE job_id = ?3",
            params![text, now_unix(), job_id],
        )?;
        if changed == 0 {
            return Err(LedgerError::NotFound(job_id.to_string()));
        }
        Ok(())
    }

    /// Oldest first.
    pub fn list_by_status(
        &self,
        status: SubmissionStatus,
        limit: usize,
    ) -> LedgerResult<Vec<Submission>> {
        let sql = format!(
            "SELECT {SUBMISSION_COLUMNS} FROM submissions
             WHERE status = ?1 ORDER BY updated_at ASC, id ASC LIMIT ?2"
        );
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map(params![status, limit], map_row)?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    /// SUBMITTED records that never received a job id and were created at or before `cutoff`.
    pub fn stale_unassigned(&self, cutoff: i64) -> LedgerResult<Vec<SubmissionHandle>> {
        let mut stmt = self.conn.prepare(
            "SELECT id FROM submissions
             WHERE status = ?1 AND job_id IS NULL AND created_at <= ?2
             ORDER BY id ASC",
        )?;
        let rows = stmt.query_map(params![SubmissionStatus::Submitted, cutoff], |row| {
            row.get(0).map(SubmissionHandle)
        })?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    /// Delete DELIVERED and ABANDONED records last touched at or before `cutoff`.
    pub fn purge_finished(&self, cutoff: i64) -> LedgerResult<usize> {
        let deleted = self.conn.execute(
            "DELETE FROM submissions WHERE status IN (?1, ?2) AND updated_at <= ?3",
            params![
                SubmissionStatus::Delivered,
                SubmissionStatus::Abandoned,
                cutoff
            ],
        )?;
        Ok(deleted)
    }

    pub fn counts(&self) -> LedgerResult<BTreeMap<String, u64>> {
        let mut out: BTreeMap<String, u64> = SubmissionStatus::ALL
            .iter()
            .map(|s| (s.as_str().to_string(), 0))
            .collect();
        let mut stmt = self
            .conn
            .prepare("SELECT status, COUNT(*) FROM submissions GROUP BY status")?;
        let rows = stmt.query_map([], |row| {
            let status: SubmissionStatus = row.get(0)?;
            let n: i64 = row.get(1)?;
            Ok((status, n))
        })?;
        for row in rows {
            let (status, n) = row?;
            out.insert(status.as_str().to_string(), u64::try_from(n).unwrap_or(0));
        }
        Ok(out)
    }

    /// Rebuild the job-id index from the table contents.
    pub fn rebuild_index(&self) -> LedgerResult<()> {
        self.conn.execute_batch("REINDEX idx_submissions_job_id;")?;
        info!("ledger job_id index rebuilt");
        Ok(())
    }
}

fn validate_transition(
    expected: &[SubmissionStatus],
    new: SubmissionStatus,
    output_ref: Option<&str>,
) -> LedgerResult<()> {
    if expected.is_empty() {
        return Err(LedgerError::InvalidTransition {
            from: new,
            to: new,
            reason: "no expected status given",
        });
    }
    for &from in expected {
        if !from.can_move_to(new) {
            return Err(LedgerError::InvalidTransition {
                from,
                to: new,
                reason: "status only moves forward",
            });
        }
        if new == SubmissionStatus::Completed && output_ref.is_none() {
            return Err(LedgerError::InvalidTransition {
                from,
                to: new,
                reason: "entering COMPLETED requires an output_ref",
            });
        }
        if new != SubmissionStatus::Completed && output_ref.is_some() {
            return Err(LedgerError::InvalidTransition {
                from,
                to: new,
                reason: "output_ref is only set when entering COMPLETED",
            });
        }
    }
    Ok(())
}

fn map_row(row: &Row<'_>) -> rusqlite::Result<Submission> {
    Ok(Submission {
        handle: SubmissionHandle(row.get(0)?),
        job_id: row.get(1)?,
        user_ref: row.get(2)?,
        input_ref: row.get(3)?,
        filename: row.get(4)?,
        output_ref: row.get(5)?,
        status: row.get(6)?,
        last_error: row.get(7)?,
        created_at: row.get(8)?,
        updated_at: row.get(9)?,
        dispatch_attempts: row.get(10)?,
    })
}
