//! Resumability capture, the inverse of [`crate::safe_resume::validate_for_resume`]:
//! instead of refusing resume on a mismatch, this decides whether
//! the *current* response is trustworthy enough to let a future attempt
//! resume from it at all.

use crate::fetch_head::HeadResult;
use crate::store::Validator;

/// Whether a `ResumeData` row should be written for this attempt, mirroring
/// [`crate::safe_resume::is_resumable`]'s precondition but named from the
/// producing side.
pub fn capture_is_resumable(head: &HeadResult, allow_weak_etag: bool) -> bool {
    crate::safe_resume::is_resumable(head, allow_weak_etag)
}

/// The validator to persist alongside a `ResumeData` row for this attempt.
pub fn validator_from_head(head: &HeadResult) -> Validator {
    Validator {
        etag: head.etag.clone(),
        last_modified: head.last_modified.clone(),
        size: head.content_length.map(|n| n as i64),
    }
}
