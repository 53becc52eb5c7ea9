use crate::{
    callback::{CallbackEvent, CallbackStatus},
    collab::Notifier,
    config::Config,
    error::LedgerResult,
    guard::{DeliveryGuard, DeliveryOutcome, Rejection},
    ledger::{Ledger, SubmissionStatus},
    util::redact,
};
use serde::Serialize;
use tracing::{debug, info, warn};

/// What happened to one callback event. Every variant is acknowledged to
/// the sender; only a storage failure surfaces as `Err`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum CallbackOutcome {
    QueuedNoticeSent,
    QueuedNoticeFailed { error: String },
    Delivered,
    DispatchFailed { error: String },
    Duplicate { current: SubmissionStatus },
    Ignored { reason: IgnoreReason },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum IgnoreReason {
    UnknownJob,
    /// A queue notice that arrived after the job moved on.
    StaleQueued { current: SubmissionStatus },
    MissingReportRef,
    /// The record was given up on before the report arrived.
    Abandoned,
    UnsupportedStatus { status: String },
}

pub struct CorrelationEngine<'a> {
    cfg: &'a Config,
    ledger: &'a Ledger,
    notifier: &'a dyn Notifier,
}

impl<'a> CorrelationEngine<'a> {
    pub fn new(cfg: &'a Config, ledger: &'a Ledger, notifier: &'a dyn Notifier) -> Self {
        Self {
            cfg,
            ledger,
            notifier,
        }
    }

    pub fn handle_callback(&self, event: &CallbackEvent) -> LedgerResult<CallbackOutcome> {
        let job_id = event.job_id.as_str();
        let outcome = match event.kind() {
            CallbackStatus::Queued => self.on_queued(job_id)?,
            CallbackStatus::Completed => match event.report_ref.as_deref() {
                Some(report_ref) => self.on_completed(job_id, report_ref)?,
                None => {
                    warn!("completed callback without report ref job_id={job_id}; dropped");
                    CallbackOutcome::Ignored {
                        reason: IgnoreReason::MissingReportRef,
                    }
                }
            },
            CallbackStatus::Other(status) => {
                debug!("callback status={status} job_id={job_id}; nothing to do");
                CallbackOutcome::Ignored {
                    reason: IgnoreReason::UnsupportedStatus { status },
                }
            }
        };
        Ok(outcome)
    }

    fn on_queued(&self, job_id: &str) -> LedgerResult<CallbackOutcome> {
        let Some(sub) = self.ledger.find_by_job_id(job_id)? else {
            warn!("queued callback for unknown job_id={job_id}; dropped");
            return Ok(CallbackOutcome::Ignored {
                reason: IgnoreReason::UnknownJob,
            });
        };

        if !sub.status.is_pending() {
            debug!(
                "queued callback after job_id={job_id} reached {}; dropped",
                sub.status
            );
            return Ok(CallbackOutcome::Ignored {
                reason: IgnoreReason::StaleQueued {
                    current: sub.status,
                },
            });
        }

        // Transient notice only: QUEUED is not persisted.
        match self
            .notifier
            .notify_text(&sub.user_ref, &self.cfg.messages.queued)
        {
            Ok(()) => {
                info!("queued notice sent job_id={job_id} to={}", redact(&sub.user_ref));
                Ok(CallbackOutcome::QueuedNoticeSent)
            }
            Err(err) => {
                warn!("queued notice failed job_id={job_id}: {err:#}");
                Ok(CallbackOutcome::QueuedNoticeFailed {
                    error: format!("{err:#}"),
                })
            }
        }
    }

    fn on_completed(&self, job_id: &str, report_ref: &str) -> LedgerResult<CallbackOutcome> {
        let guard = DeliveryGuard::new(self.ledger);
        let outcome = guard.deliver(
            self.notifier,
            job_id,
            report_ref,
            &self.cfg.delivery.report_filename,
        )?;
        Ok(match outcome {
            DeliveryOutcome::Delivered => CallbackOutcome::Delivered,
            DeliveryOutcome::DispatchFailed { error } => CallbackOutcome::DispatchFailed { error },
            DeliveryOutcome::Rejected(Rejection::AlreadyClaimed {
                current: SubmissionStatus::Abandoned,
            }) => {
                warn!("completed callback for abandoned job_id={job_id}; report not sent");
                CallbackOutcome::Ignored {
                    reason: IgnoreReason::Abandoned,
                }
            }
            DeliveryOutcome::Rejected(Rejection::AlreadyClaimed { current }) => {
                info!("duplicate completed callback job_id={job_id} current={current}");
                CallbackOutcome::Duplicate { current }
            }
            DeliveryOutcome::Rejected(Rejection::UnknownJob) => {
                warn!(
                    "completed callback for unknown job_id={job_id}; mapping lost or never created"
                );
                CallbackOutcome::Ignored {
                    reason: IgnoreReason::UnknownJob,
                }
            }
        })
    }
}
