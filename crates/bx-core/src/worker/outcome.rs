//! What a [`super::TaskWorker`] run produced.

use crate::error::TransferError;
use crate::store::ResumeData;

/// Response metadata a `StatusUpdate` may carry.
#[derive(Debug, Clone, Default)]
pub struct ResponseInfo {
    pub response_code: Option<u16>,
    pub response_headers: Option<Vec<(String, String)>>,
    pub response_body: Option<Vec<u8>>,
    pub mime_type: Option<String>,
    pub charset: Option<String>,
}

/// The terminal (or pausing) outcome of one worker attempt.
#[derive(Debug)]
pub enum WorkerOutcome {
    Complete(ResponseInfo),
    NotFound(ResponseInfo),
    /// Non-retryable or retryable failure; the caller (retry controller)
    /// decides which based on `TransferError::is_retryable`.
    Failed(TransferError),
    Paused(ResumeData),
    Canceled,
}
