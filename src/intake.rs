use crate::{
    collab::{ScanClient, SubmitRequest},
    config::Scan,
    error::{LedgerError, SubmissionError},
    ledger::{Ledger, SubmissionHandle},
    util::redact,
};
use anyhow::anyhow;
use tracing::{error, info, warn};

/// Records accepted documents and hands them to the scanning service.
pub struct Intake<'a> {
    ledger: &'a Ledger,
    options: &'a Scan,
}

impl<'a> Intake<'a> {
    pub fn new(ledger: &'a Ledger, options: &'a Scan) -> Self {
        Self { ledger, options }
    }

    /// Ledger row first, then the external call, then the job id binding.
    /// Any failure after the row exists leaves it ABANDONED.
    pub fn submit(
        &self,
        user_ref: &str,
        input_ref: &str,
        filename: &str,
        scanner: &dyn ScanClient,
    ) -> Result<String, SubmissionError> {
        let handle = self.ledger.create(user_ref, input_ref, filename)?;
        info!("intake handle={handle} from={} file={filename}", redact(user_ref));

        let req = SubmitRequest {
            input_ref: input_ref.to_string(),
            filename: filename.to_string(),
            options: self.options.clone(),
        };

        let job_id = match scanner.submit(&req) {
            Ok(job_id) if !job_id.trim().is_empty() => job_id.trim().to_string(),
            Ok(_) => {
                let err = anyhow!("scanning service returned an empty job id");
                self.abandon(handle, &format!("{err:#}"));
                return Err(SubmissionError::External(err));
            }
            Err(err) => {
                warn!("external submission failed handle={handle}: {err:#}");
                self.abandon(handle, &format!("{err:#}"));
                return Err(SubmissionError::External(err));
            }
        };

        match self.ledger.attach_job_id(handle, &job_id) {
            Ok(()) => {
                info!("intake handle={handle} job_id={job_id}");
                Ok(job_id)
            }
            Err(e @ LedgerError::DuplicateJobId { .. }) => {
                error!("scanning service reused a job id: {e}");
                self.abandon(handle, &e.to_string());
                Err(SubmissionError::Correlation(e))
            }
            Err(e @ LedgerError::NotAttachable { .. }) => {
                warn!("job_id={job_id} arrived after the record was abandoned: {e}");
                Err(SubmissionError::Ledger(e))
            }
            Err(e) => {
                self.abandon(handle, &e.to_string());
                Err(SubmissionError::Ledger(e))
            }
        }
    }

    fn abandon(&self, handle: SubmissionHandle, reason: &str) {
        if let Err(e) = self.ledger.abandon(handle, reason) {
            error!("could not abandon handle={handle}: {e}");
        }
    }
}
