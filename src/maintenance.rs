//! Operator passes over the ledger. Nothing here runs on its own; the CLI
//! exposes each pass as a subcommand.

use crate::{
    collab::Notifier,
    error::LedgerResult,
    guard::{DeliveryGuard, DeliveryOutcome, Rejection},
    ledger::{Ledger, Submission, SubmissionHandle, SubmissionStatus, Transition},
};
use serde::Serialize;
use tracing::info;

#[derive(Debug, Clone, Default, Serialize)]
pub struct SweepReport {
    pub cutoff: i64,
    pub abandoned: Vec<SubmissionHandle>,
    /// Rows that moved on between listing and abandoning.
    pub raced: usize,
}

/// Abandon SUBMITTED records that never got a job id within `ttl_seconds`.
pub fn sweep_stale(ledger: &Ledger, ttl_seconds: u64, now: i64) -> LedgerResult<SweepReport> {
    let cutoff = now.saturating_sub(i64::try_from(ttl_seconds).unwrap_or(i64::MAX));
    let mut report = SweepReport {
        cutoff,
        ..SweepReport::default()
    };
    for handle in ledger.stale_unassigned(cutoff)? {
        match ledger.abandon(handle, "no job id before submission TTL")? {
            Transition::Transitioned => report.abandoned.push(handle),
            Transition::AlreadyTransitioned { .. } => report.raced += 1,
        }
    }
    info!(
        "sweep cutoff={} abandoned={} raced={}",
        cutoff,
        report.abandoned.len(),
        report.raced
    );
    Ok(report)
}

/// Records that won the delivery claim but never reached DELIVERED.
pub fn stranded(ledger: &Ledger, limit: usize) -> LedgerResult<Vec<Submission>> {
    ledger.list_by_status(SubmissionStatus::Completed, limit)
}

/// Retry dispatch for one stranded record. Operator-triggered only.
///
/// Concurrent redeliveries of the same record race on
/// [`Ledger::claim_redelivery`]; only the winner dispatches. A crash between
/// dispatch and DELIVERED still leaves the record stranded, so a later
/// redelivery may resend a report that already arrived.
pub fn redeliver(
    ledger: &Ledger,
    notifier: &dyn Notifier,
    job_id: &str,
    filename: &str,
) -> LedgerResult<DeliveryOutcome> {
    let Some(sub) = ledger.find_by_job_id(job_id)? else {
        return Ok(DeliveryOutcome::Rejected(Rejection::UnknownJob));
    };
    if sub.status != SubmissionStatus::Completed {
        return Ok(DeliveryOutcome::Rejected(Rejection::AlreadyClaimed {
            current: sub.status,
        }));
    }
    if let Transition::AlreadyTransitioned { current } =
        ledger.claim_redelivery(job_id, sub.dispatch_attempts)?
    {
        info!("redelivery of job_id={job_id} already taken current={current}");
        return Ok(DeliveryOutcome::Rejected(Rejection::AlreadyClaimed { current }));
    }
    info!(
        "operator redelivery job_id={job_id} attempt={}",
        sub.dispatch_attempts + 1
    );
    DeliveryGuard::new(ledger).dispatch_claimed(notifier, &sub, filename)
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct PurgeReport {
    pub enabled: bool,
    pub cutoff: i64,
    pub deleted: usize,
}

/// Delete DELIVERED/ABANDONED records older than `older_than_seconds`; 0 disables.
pub fn purge(ledger: &Ledger, older_than_seconds: u64, now: i64) -> LedgerResult<PurgeReport> {
    if older_than_seconds == 0 {
        return Ok(PurgeReport::default());
    }
    let cutoff = now.saturating_sub(i64::try_from(older_than_seconds).unwrap_or(i64::MAX));
    let deleted = ledger.purge_finished(cutoff)?;
    info!("purge cutoff={cutoff} deleted={deleted}");
    Ok(PurgeReport {
        enabled: true,
        cutoff,
        deleted,
    })
}
