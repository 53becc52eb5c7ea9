pub mod command;
pub mod types;

use anyhow::Result;

pub use types::{NotifyRequest, NotifyResponse, ScanResponse, SubmitRequest};

/// Client for the asynchronous scanning service.
///
/// `submit` returns the service's job id; the finished report arrives later
/// through a callback, never through this call.
pub trait ScanClient {
    fn submit(&self, req: &SubmitRequest) -> Result<String>;
}

impl<F> ScanClient for F
where
    F: Fn(&SubmitRequest) -> Result<String>,
{
    fn submit(&self, req: &SubmitRequest) -> Result<String> {
        self(req)
    }
}

/// Outbound messaging channel. Calls are attempted once; retry policy lives
/// outside this crate.
pub trait Notifier {
    fn notify_text(&self, user_ref: &str, text: &str) -> Result<()>;
    fn notify_document(&self, user_ref: &str, doc_ref: &str, filename: &str) -> Result<()>;
}
