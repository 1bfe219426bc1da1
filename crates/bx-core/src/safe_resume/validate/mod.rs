//! Compares a stored resume validator with a fresh HEAD result.

mod error;

use crate::fetch_head::HeadResult;

pub use error::{ValidationError, ValidationErrorKind};

/// The validator captured in [`crate::store::ResumeData`] at pause/failure
/// time: what we must still see from the server to trust a byte-range
/// resume.
#[derive(Debug, Clone, Default)]
pub struct StoredValidator {
    pub etag: Option<String>,
    pub last_modified: Option<String>,
    pub size: Option<i64>,
}

/// Returns `Ok(())` if a paused/failed task can be safely resumed against
/// the current HEAD result. If nothing was stored yet (first attempt),
/// returns `Ok(())` so the caller proceeds with a normal probe. Otherwise
/// compares ETag, Last-Modified, and size; returns `Err` if any differ.
pub fn validate_for_resume(
    stored: &StoredValidator,
    head: &HeadResult,
) -> Result<(), ValidationError> {
    let has_stored = stored.size.is_some() || stored.etag.is_some() || stored.last_modified.is_some();
    if !has_stored {
        return Ok(());
    }

    let etag_changed = match (&stored.etag, &head.etag) {
        (None, None) => false,
        (Some(a), Some(b)) => a != b,
        _ => true,
    };

    let last_modified_changed = match (&stored.last_modified, &head.last_modified) {
        (None, None) => false,
        (Some(a), Some(b)) => a != b,
        _ => true,
    };

    let head_size = head.content_length.map(|u| u as i64);
    let size_changed = match (stored.size, head_size) {
        (None, None) => false,
        (Some(a), Some(b)) => a != b,
        _ => true,
    };

    if etag_changed || last_modified_changed || size_changed {
        return Err(ValidationError {
            kind: ValidationErrorKind::RemoteChanged {
                etag_changed,
                last_modified_changed,
                size_changed,
            },
        });
    }

    Ok(())
}

/// Resumability precondition, checked before a `ResumeData` record is
/// ever written: the server must advertise `Accept-Ranges: bytes` and
/// supply a strong `ETag`, or (if `allow_weak_etag`) at least a
/// `Last-Modified`.
pub fn is_resumable(head: &HeadResult, allow_weak_etag: bool) -> bool {
    if !head.accept_ranges {
        return false;
    }
    if head.etag.as_deref().is_some_and(|e| !e.starts_with("W/")) {
        return true;
    }
    allow_weak_etag && head.last_modified.is_some()
}

#[cfg(test)]
mod tests;
