use crate::{
    collab::Notifier,
    error::{LedgerError, LedgerResult},
    ledger::{Ledger, Submission, SubmissionStatus, Transition},
    util::redact,
};
use serde::Serialize;
use tracing::{error, info, warn};

/// Outcome of claiming the right to notify for a job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Admission {
    /// This caller moved the record to COMPLETED and alone may dispatch.
    Admitted(Submission),
    Rejected(Rejection),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum Rejection {
    /// Another caller already claimed, or the job is past the pending states.
    AlreadyClaimed { current: SubmissionStatus },
    UnknownJob,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum DeliveryOutcome {
    Delivered,
    Rejected(Rejection),
    /// The claim stands (record stays COMPLETED); dispatch must be retried out of band.
    DispatchFailed { error: String },
}

/// Admits at most one "deliver the report" action per job.
pub struct DeliveryGuard<'a> {
    ledger: &'a Ledger,
}

impl<'a> DeliveryGuard<'a> {
    pub fn new(ledger: &'a Ledger) -> Self {
        Self { ledger }
    }

    pub fn guard_delivery(&self, job_id: &str, output_ref: &str) -> LedgerResult<Admission> {
        let transition = match self.ledger.try_transition(
            job_id,
            &[SubmissionStatus::Submitted, SubmissionStatus::Queued],
            SubmissionStatus::Completed,
            Some(output_ref),
        ) {
            Ok(t) => t,
            Err(LedgerError::NotFound(_)) => {
                return Ok(Admission::Rejected(Rejection::UnknownJob));
            }
            Err(e) => return Err(e),
        };

        match transition {
            Transition::Transitioned => {
                let sub = self
                    .ledger
                    .find_by_job_id(job_id)?
                    .ok_or_else(|| LedgerError::NotFound(job_id.to_string()))?;
                info!("delivery admitted job_id={job_id}");
                Ok(Admission::Admitted(sub))
            }
            Transition::AlreadyTransitioned { current } => {
                info!("delivery rejected job_id={job_id} current={current}");
                Ok(Admission::Rejected(Rejection::AlreadyClaimed { current }))
            }
        }
    }

    /// Claim, dispatch, then mark DELIVERED.
    pub fn deliver(
        &self,
        notifier: &dyn Notifier,
        job_id: &str,
        output_ref: &str,
        filename: &str,
    ) -> LedgerResult<DeliveryOutcome> {
        match self.guard_delivery(job_id, output_ref)? {
            Admission::Admitted(sub) => self.dispatch_claimed(notifier, &sub, filename),
            Admission::Rejected(r) => Ok(DeliveryOutcome::Rejected(r)),
        }
    }

    /// Second phase: send the report of a COMPLETED record and move it to DELIVERED.
    ///
    /// Callers must hold the claim (won `guard_delivery`, or an operator
    /// acting on a stranded record).
    pub fn dispatch_claimed(
        &self,
        notifier: &dyn Notifier,
        sub: &Submission,
        filename: &str,
    ) -> LedgerResult<DeliveryOutcome> {
        let (Some(job_id), Some(output_ref)) = (sub.job_id.as_deref(), sub.output_ref.as_deref())
        else {
            return Ok(DeliveryOutcome::Rejected(Rejection::AlreadyClaimed {
                current: sub.status,
            }));
        };

        if let Err(err) = notifier.notify_document(&sub.user_ref, output_ref, filename) {
            let text = format!("{err:#}");
            error!(
                "report dispatch failed job_id={job_id} to={}: {text}",
                redact(&sub.user_ref)
            );
            self.ledger.record_error(job_id, &text)?;
            return Ok(DeliveryOutcome::DispatchFailed { error: text });
        }

        match self.ledger.try_transition(
            job_id,
            &[SubmissionStatus::Completed],
            SubmissionStatus::Delivered,
            None,
        )? {
            Transition::Transitioned => {
                info!("report delivered job_id={job_id} to={}", redact(&sub.user_ref));
            }
            Transition::AlreadyTransitioned { current } => {
                warn!("report sent but job_id={job_id} was already {current}");
            }
        }
        Ok(DeliveryOutcome::Delivered)
    }
}
