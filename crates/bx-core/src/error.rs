//! The error taxonomy surfaced to engine callers.
//!
//! Internally most plumbing still returns `anyhow::Result` (HEAD probes,
//! storage setup, database access) exactly as the rest of this crate does;
//! `TransferError` is the typed value that ends up attached to a terminal
//! `StatusUpdate` so a caller can match on *why* a task failed without
//! string-matching a message.

use serde::{Deserialize, Serialize};
use std::fmt;

/// The reason a task left its run in a non-`complete` terminal state.
#[derive(Debug, Clone, thiserror::Error, Serialize, Deserialize)]
pub enum TransferError {
    /// A response was received with a non-success status code.
    #[error("http error: {code} {reason}")]
    Http { code: u16, reason: String },

    /// Missing source file for upload, cannot create destination directory,
    /// or the final rename failed.
    #[error("filesystem error: {0}")]
    Filesystem(String),

    /// The server's validator did not match on resume, or resumability
    /// preconditions (`Accept-Ranges`, strong `ETag`) were not met.
    #[error("resume error: {0}")]
    Resume(ResumeErrorKind),

    /// DNS/TCP/TLS/stream errors and timeouts. Retryable.
    #[error("connection error: {0}")]
    Connection(String),

    /// Malformed URL at enqueue time. The enqueue call itself fails; no
    /// task is created, so this variant never reaches a TaskRecord.
    #[error("url error: {0}")]
    Url(String),

    /// Catch-all for anything the worker or coordinator does not recognize.
    #[error("general error: {0}")]
    General(String),
}

impl TransferError {
    /// Whether the retry controller should consider this retryable, absent
    /// the caller's remaining-retries check.
    pub fn is_retryable(&self) -> bool {
        match self {
            TransferError::Http { code, .. } => *code != 404,
            TransferError::Connection(_) => true,
            TransferError::Filesystem(_) => false,
            TransferError::Resume(_) => false,
            TransferError::Url(_) => false,
            TransferError::General(_) => false,
        }
    }

    /// Whether this error corresponds to the `notFound` terminal state
    /// rather than `failed`.
    pub fn is_not_found(&self) -> bool {
        matches!(self, TransferError::Http { code: 404, .. })
    }
}

/// Sub-kind for [`TransferError::Resume`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ResumeErrorKind {
    /// The server's ETag/Last-Modified no longer matches the stored validator.
    ValidatorMismatch,
    /// The server did not advertise `Accept-Ranges: bytes`.
    RangesNotSupported,
    /// Only a weak ETag (or none) was available and `allow_weak_etag` is off.
    WeakEtagNotAllowed,
}

impl fmt::Display for ResumeErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResumeErrorKind::ValidatorMismatch => {
                write!(f, "cannot resume: ETag not identical, or is weak")
            }
            ResumeErrorKind::RangesNotSupported => {
                write!(f, "cannot resume: server does not support byte ranges")
            }
            ResumeErrorKind::WeakEtagNotAllowed => {
                write!(f, "cannot resume: only a weak validator is available")
            }
        }
    }
}
