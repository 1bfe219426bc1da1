//! Tests for safe-resume validation.

use crate::fetch_head::HeadResult;

use super::{validate_for_resume, StoredValidator, ValidationErrorKind};

fn stored(total_size: Option<i64>, etag: Option<&str>, last_modified: Option<&str>) -> StoredValidator {
    StoredValidator {
        etag: etag.map(String::from),
        last_modified: last_modified.map(String::from),
        size: total_size,
    }
}

fn head_result(
    content_length: Option<u64>,
    etag: Option<&str>,
    last_modified: Option<&str>,
) -> HeadResult {
    HeadResult {
        content_length,
        accept_ranges: true,
        etag: etag.map(String::from),
        last_modified: last_modified.map(String::from),
        content_disposition: None,
    }
}

#[test]
fn no_stored_metadata_ok() {
    let s = stored(None, None, None);
    let head = head_result(
        Some(1000),
        Some("e1"),
        Some("Wed, 21 Oct 2015 07:28:00 GMT"),
    );
    assert!(validate_for_resume(&s, &head).is_ok());
}

#[test]
fn same_etag_and_size_ok() {
    let s = stored(
        Some(1000),
        Some("e1"),
        Some("Wed, 21 Oct 2015 07:28:00 GMT"),
    );
    let head = head_result(
        Some(1000),
        Some("e1"),
        Some("Wed, 21 Oct 2015 07:28:00 GMT"),
    );
    assert!(validate_for_resume(&s, &head).is_ok());
}

#[test]
fn etag_changed_err() {
    let s = stored(
        Some(1000),
        Some("e1"),
        Some("Wed, 21 Oct 2015 07:28:00 GMT"),
    );
    let head = head_result(
        Some(1000),
        Some("e2"),
        Some("Wed, 21 Oct 2015 07:28:00 GMT"),
    );
    let r = validate_for_resume(&s, &head);
    assert!(r.is_err());
    let e = r.unwrap_err();
    assert!(matches!(
        e.kind,
        ValidationErrorKind::RemoteChanged {
            etag_changed: true,
            ..
        }
    ));
}

#[test]
fn size_changed_err() {
    let s = stored(Some(1000), Some("e1"), None);
    let head = head_result(Some(2000), Some("e1"), None);
    let r = validate_for_resume(&s, &head);
    assert!(r.is_err());
    let e = r.unwrap_err();
    assert!(matches!(
        e.kind,
        ValidationErrorKind::RemoteChanged {
            size_changed: true,
            ..
        }
    ));
}

#[test]
fn last_modified_changed_err() {
    let s = stored(Some(1000), None, Some("Wed, 21 Oct 2015 07:28:00 GMT"));
    let head = head_result(Some(1000), None, Some("Thu, 22 Oct 2015 08:00:00 GMT"));
    let r = validate_for_resume(&s, &head);
    assert!(r.is_err());
    let e = r.unwrap_err();
    assert!(matches!(
        e.kind,
        ValidationErrorKind::RemoteChanged {
            last_modified_changed: true,
            ..
        }
    ));
}

#[test]
fn strong_etag_is_resumable() {
    let head = head_result(Some(1000), Some("\"abc\""), None);
    assert!(super::is_resumable(&head, false));
}

#[test]
fn weak_etag_requires_allow_weak_etag_and_last_modified() {
    let head = head_result(
        Some(1000),
        Some("W/\"abc\""),
        Some("Wed, 21 Oct 2015 07:28:00 GMT"),
    );
    assert!(!super::is_resumable(&head, false));
    assert!(super::is_resumable(&head, true));
}

#[test]
fn no_accept_ranges_never_resumable() {
    let mut head = head_result(Some(1000), Some("\"abc\""), None);
    head.accept_ranges = false;
    assert!(!super::is_resumable(&head, true));
}
