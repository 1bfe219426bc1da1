//! Download worker: single-stream GET with byte-accurate resume.
//!
//! Uses a curl easy handle for the transfer and `fetch_head::probe` for
//! response metadata, generalized to cover both a fresh attempt and a
//! resumed one (`Range`/`If-Range`). A
//! `ParallelDownloadTask` chunk is just a `DownloadTask` with its own
//! bounded `Range` request header, set by `crate::parallel_download`, so
//! this same worker drives both a plain download and every chunk of a
//! parallel one.

use crate::config::BxConfig;
use crate::control::{StopReason, StopToken};
use crate::error::{ResumeErrorKind, TransferError};
use crate::fetch_head::{self, HeadResult};
use crate::safe_resume;
use crate::storage::{self, StorageWriter, StorageWriterBuilder};
use crate::store::{ResumeData, Validator};
use crate::task::Task;
use crate::worker::context::{ByteProgress, WorkerContext};
use crate::worker::destination;
use crate::worker::outcome::{ResponseInfo, WorkerOutcome};
use crate::worker::resume as resume_capture;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::str;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc::UnboundedSender;

pub struct DownloadWorker;

#[async_trait::async_trait]
impl crate::worker::TaskWorker for DownloadWorker {
    async fn run(&self, ctx: WorkerContext) -> WorkerOutcome {
        let WorkerContext {
            task,
            cancel,
            progress_tx,
            config,
            resume,
        } = ctx;
        tokio::task::spawn_blocking(move || run_blocking(task, config, cancel, progress_tx, resume))
            .await
            .unwrap_or_else(|e| WorkerOutcome::Failed(TransferError::General(format!("worker task panicked: {e}"))))
    }
}

fn run_blocking(
    task: Task,
    config: BxConfig,
    cancel: StopToken,
    progress_tx: UnboundedSender<ByteProgress>,
    resume: Option<ResumeData>,
) -> WorkerOutcome {
    let url = task.meta().url.clone();
    let probe_headers = headers_to_map(&task);

    let head = match fetch_head::probe(&url, &probe_headers) {
        Ok(h) => h,
        Err(e) => return WorkerOutcome::Failed(TransferError::Connection(e.to_string())),
    };

    let expected_len = expected_length(&task, &head);

    let prepared = match resume {
        Some(r) if r.required_start_byte > 0 => {
            let stored: safe_resume::StoredValidator = r.validator.clone().into();
            if let Err(_e) = safe_resume::validate_for_resume(&stored, &head) {
                return WorkerOutcome::Failed(TransferError::Resume(ResumeErrorKind::ValidatorMismatch));
            }
            let temp_path = PathBuf::from(&r.data);
            let final_path = final_path_from_temp(&temp_path);
            match StorageWriter::open_existing(&temp_path) {
                Ok(storage) => Prepared {
                    final_path,
                    temp_path,
                    start_offset: r.required_start_byte as u64,
                    storage,
                },
                Err(e) => return WorkerOutcome::Failed(TransferError::Filesystem(e.to_string())),
            }
        }
        // No stored progress yet, or a prior pause couldn't establish a
        // resumable byte offset: start the attempt fresh.
        Some(r) => match start_fresh(&task, &head, &config, Some(PathBuf::from(&r.data))) {
            Ok(p) => p,
            Err(outcome) => return outcome,
        },
        None => match start_fresh(&task, &head, &config, None) {
            Ok(p) => p,
            Err(outcome) => return outcome,
        },
    };

    if prepared.start_offset == 0 && config.skip_existing_files && prepared.final_path.exists() {
        return WorkerOutcome::Complete(ResponseInfo::default());
    }

    let request_headers = request_headers_for(&task, &head, prepared.start_offset);

    let result = run_transfer(
        &url,
        &request_headers,
        &prepared.storage,
        prepared.start_offset,
        expected_len,
        &cancel,
        &progress_tx,
        &config,
    );

    match result {
        Ok(total_written) => finish_success(prepared, total_written, expected_len),
        Err(TransferAttemptError::Stopped(reason, offset_reached)) => {
            finish_stopped(&task, prepared, reason, offset_reached, &head, &config)
        }
        Err(TransferAttemptError::Http(code, offset_reached)) => {
            if code == 404 {
                let body = read_body_prefix(&prepared.temp_path, prepared.start_offset, offset_reached);
                let _ = std::fs::remove_file(&prepared.temp_path);
                WorkerOutcome::NotFound(ResponseInfo {
                    response_code: Some(code as u16),
                    response_body: body,
                    ..Default::default()
                })
            } else {
                WorkerOutcome::Failed(TransferError::Http {
                    code: code as u16,
                    reason: format!("HTTP {code}"),
                })
            }
        }
        Err(TransferAttemptError::Curl(e)) => WorkerOutcome::Failed(TransferError::Connection(e.to_string())),
    }
}

struct Prepared {
    final_path: PathBuf,
    temp_path: PathBuf,
    start_offset: u64,
    storage: StorageWriter,
}

fn start_fresh(
    task: &Task,
    head: &HeadResult,
    config: &BxConfig,
    known_temp_path: Option<PathBuf>,
) -> Result<Prepared, WorkerOutcome> {
    let final_path = resolve_destination(task, head)
        .map_err(|e| WorkerOutcome::Failed(TransferError::Filesystem(e.to_string())))?;
    let temp_path = known_temp_path.unwrap_or_else(|| storage::temp_path(&final_path));

    let mut builder = StorageWriterBuilder::create(&temp_path)
        .map_err(|e| WorkerOutcome::Failed(TransferError::Filesystem(e.to_string())))?;
    if let Some(len) = expected_length(task, head) {
        if let Err(e) = builder.preallocate(len) {
            tracing::debug!(error = %e, "preallocate failed, continuing without it");
        }
    }
    Ok(Prepared {
        final_path,
        temp_path,
        start_offset: 0,
        storage: builder.build(),
    })
}

fn finish_success(prepared: Prepared, total_written: u64, expected_len: Option<u64>) -> WorkerOutcome {
    if let Err(e) = prepared.storage.sync() {
        return WorkerOutcome::Failed(TransferError::Filesystem(e.to_string()));
    }
    if let Some(exp) = expected_len {
        if total_written != exp {
            return WorkerOutcome::Failed(TransferError::Connection(format!(
                "partial transfer: wrote {total_written} of {exp}"
            )));
        }
    }
    match prepared.storage.finalize(&prepared.final_path) {
        Ok(()) => WorkerOutcome::Complete(ResponseInfo {
            response_code: Some(200),
            ..Default::default()
        }),
        Err(e) => WorkerOutcome::Failed(TransferError::Filesystem(e.to_string())),
    }
}

fn finish_stopped(
    task: &Task,
    prepared: Prepared,
    reason: StopReason,
    offset_reached: u64,
    head: &HeadResult,
    config: &BxConfig,
) -> WorkerOutcome {
    match reason {
        StopReason::Cancel | StopReason::None => {
            let _ = std::fs::remove_file(&prepared.temp_path);
            WorkerOutcome::Canceled
        }
        StopReason::Pause => {
            if !task.is_pause_capable() {
                let _ = std::fs::remove_file(&prepared.temp_path);
                return WorkerOutcome::Canceled;
            }
            let resumable = resume_capture::capture_is_resumable(head, config.allow_weak_etag);
            let (required_start_byte, validator): (i64, Validator) = if resumable {
                (offset_reached as i64, resume_capture::validator_from_head(head))
            } else {
                let _ = std::fs::remove_file(&prepared.temp_path);
                (0, Validator::default())
            };
            WorkerOutcome::Paused(ResumeData {
                task_id: task.task_id().to_string(),
                data: prepared.temp_path.to_string_lossy().to_string(),
                required_start_byte,
                validator,
            })
        }
    }
}

fn resolve_destination(task: &Task, head: &HeadResult) -> anyhow::Result<PathBuf> {
    match task {
        Task::Download(dt) => destination::resolve_download_path(
            &dt.destination,
            &dt.meta.url,
            head.content_disposition.as_deref(),
            true,
        ),
        Task::UriDownload(udt) => {
            let path = PathBuf::from(&udt.destination_uri);
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            Ok(path)
        }
        other => anyhow::bail!("{:?} is not a download task", other.meta().task_id),
    }
}

fn headers_to_map(task: &Task) -> HashMap<String, String> {
    task.meta()
        .headers
        .iter()
        .filter(|(k, _)| !k.eq_ignore_ascii_case("Range") && !k.eq_ignore_ascii_case("Known-Content-Length"))
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect()
}

/// Precedence: a total derived from a fully-bounded `Range` request
/// header (a parallel download chunk's own span, or a caller-supplied
/// `Range`), since the HEAD probe is always issued un-ranged and so
/// reports the full resource length rather than the span this attempt
/// actually transfers; then the HEAD response's `Content-Length`; then
/// the task's `Known-Content-Length` header (a caller-supplied hint for
/// servers that omit `Content-Length`, e.g. chunked transfer encoding).
fn expected_length(task: &Task, head: &HeadResult) -> Option<u64> {
    if let Some(range) = task.meta().headers.get("Range") {
        if let Some(total) = range_span(range) {
            return Some(total);
        }
    }
    if let Some(len) = head.content_length {
        return Some(len);
    }
    task.meta()
        .headers
        .get("Known-Content-Length")
        .and_then(|v| v.parse().ok())
}

fn range_span(range: &str) -> Option<u64> {
    let spec = range.strip_prefix("bytes=")?;
    let (start_s, end_s) = spec.split_once('-')?;
    let start: u64 = start_s.parse().ok()?;
    let end: u64 = end_s.parse().ok()?;
    end.checked_sub(start)?.checked_add(1)
}

/// Builds the request header set for one attempt: the task's own headers
/// (minus `Range`, recomputed here) plus, when resuming, a `Range` that
/// respects a pre-existing bounded span (a parallel-download chunk)
/// instead of clobbering it with an unbounded one.
fn request_headers_for(task: &Task, head: &HeadResult, start_offset: u64) -> HashMap<String, String> {
    let mut headers = headers_to_map(task);
    if start_offset == 0 {
        if let Some(range) = task.meta().headers.get("Range") {
            headers.insert("Range".to_string(), range.to_string());
        }
        return headers;
    }
    let range_value = match task.meta().headers.get("Range").and_then(range_end) {
        Some(end) => format!("bytes={start_offset}-{end}"),
        None => format!("bytes={start_offset}-"),
    };
    headers.insert("Range".to_string(), range_value);
    if let Some(etag) = &head.etag {
        headers.insert("If-Range".to_string(), etag.clone());
    }
    headers
}

fn range_end(range: &str) -> Option<u64> {
    let spec = range.strip_prefix("bytes=")?;
    let (_, end_s) = spec.split_once('-')?;
    end_s.parse().ok()
}

fn final_path_from_temp(temp_path: &Path) -> PathBuf {
    let s = temp_path.to_string_lossy();
    match s.strip_suffix(storage::TEMP_SUFFIX) {
        Some(stripped) => PathBuf::from(stripped),
        None => temp_path.to_path_buf(),
    }
}

/// Reads back the bytes this attempt itself just wrote to the temp file,
/// between `start_offset` (where this attempt began writing) and
/// `end_offset` (where it stopped) — e.g. an error page body on a non-2xx
/// response. Best effort: a read failure just means no body is attached
/// to the status update.
fn read_body_prefix(temp_path: &Path, start_offset: u64, end_offset: u64) -> Option<Vec<u8>> {
    let data = std::fs::read(temp_path).ok()?;
    let start = (start_offset as usize).min(data.len());
    let end = (end_offset as usize).min(data.len());
    if end <= start {
        return Some(Vec::new());
    }
    Some(data[start..end].to_vec())
}

enum TransferAttemptError {
    Stopped(StopReason, u64),
    Http(u32, u64),
    Curl(curl::Error),
}

#[allow(clippy::too_many_arguments)]
fn run_transfer(
    url: &str,
    headers: &HashMap<String, String>,
    storage: &StorageWriter,
    start_offset: u64,
    expected_len: Option<u64>,
    cancel: &StopToken,
    progress_tx: &UnboundedSender<ByteProgress>,
    config: &BxConfig,
) -> Result<u64, TransferAttemptError> {
    let offset = Arc::new(AtomicU64::new(start_offset));
    let offset_cb = Arc::clone(&offset);
    let stop_state: Arc<Mutex<Option<StopReason>>> = Arc::new(Mutex::new(None));
    let stop_cb = Arc::clone(&stop_state);
    let cancel_cb = cancel.clone();
    let storage_cb = storage.clone();
    let progress_tx_cb = progress_tx.clone();

    let mut easy = curl::easy::Easy::new();
    easy.url(url).map_err(TransferAttemptError::Curl)?;
    easy.follow_location(true).map_err(TransferAttemptError::Curl)?;
    easy.max_redirections(10).map_err(TransferAttemptError::Curl)?;
    easy.connect_timeout(config.request_timeout())
        .map_err(TransferAttemptError::Curl)?;
    easy.low_speed_limit(1024).map_err(TransferAttemptError::Curl)?;
    easy.low_speed_time(Duration::from_secs(60))
        .map_err(TransferAttemptError::Curl)?;
    easy.timeout(config.resource_timeout()).map_err(TransferAttemptError::Curl)?;

    let mut list = curl::easy::List::new();
    for (k, v) in headers {
        list.append(&format!("{}: {}", k.trim(), v.trim()))
            .map_err(TransferAttemptError::Curl)?;
    }
    if !headers.is_empty() {
        easy.http_headers(list).map_err(TransferAttemptError::Curl)?;
    }

    let perform_result;
    {
        let mut transfer = easy.transfer();
        transfer
            .header_function(|data| {
                let _ = str::from_utf8(data);
                true
            })
            .map_err(TransferAttemptError::Curl)?;
        transfer
            .write_function(move |data| {
                if let Some(reason) = cancel_cb.check() {
                    *stop_cb.lock().unwrap() = Some(reason);
                    return Ok(0);
                }
                let off = offset_cb.fetch_add(data.len() as u64, Ordering::Relaxed);
                if let Err(e) = storage_cb.write_at(off, data) {
                    tracing::warn!("download write failed: {e}");
                    return Ok(0);
                }
                let written = off + data.len() as u64;
                let _ = progress_tx_cb.send(ByteProgress {
                    written,
                    expected: expected_len,
                });
                Ok(data.len())
            })
            .map_err(TransferAttemptError::Curl)?;
        perform_result = transfer.perform();
    }

    if let Err(e) = perform_result {
        let offset_reached = offset.load(Ordering::Relaxed);
        if let Some(reason) = *stop_state.lock().unwrap() {
            return Err(TransferAttemptError::Stopped(reason, offset_reached));
        }
        return Err(TransferAttemptError::Curl(e));
    }

    let code = easy.response_code().map_err(TransferAttemptError::Curl)?;
    if !(200..300).contains(&code) {
        return Err(TransferAttemptError::Http(code, offset.load(Ordering::Relaxed)));
    }
    Ok(offset.load(Ordering::Relaxed))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn range_span_computes_length() {
        assert_eq!(range_span("bytes=0-999"), Some(1000));
        assert_eq!(range_span("bytes=1000-1999"), Some(1000));
        assert_eq!(range_span("not a range"), None);
    }

    #[test]
    fn range_end_extracts_upper_bound() {
        assert_eq!(range_end("bytes=0-999"), Some(999));
        assert_eq!(range_end("bytes=0-"), None);
    }

    #[test]
    fn final_path_from_temp_strips_suffix() {
        assert_eq!(
            final_path_from_temp(Path::new("/tmp/a.iso.part")),
            Path::new("/tmp/a.iso")
        );
    }

    fn task_with_range(range: Option<&str>) -> Task {
        let mut meta = crate::task::TaskMeta::new("t1", "https://example.com/f");
        if let Some(r) = range {
            meta.headers.set("Range", r);
        }
        Task::Download(crate::task::DownloadTask {
            meta,
            destination: crate::task::Destination {
                base_directory: crate::task::BaseDirectory::Temporary,
                sub_directory: String::new(),
                filename: crate::task::SUGGEST_FILENAME.to_string(),
            },
        })
    }

    fn head_with_len(len: Option<u64>) -> HeadResult {
        HeadResult {
            content_length: len,
            accept_ranges: false,
            etag: None,
            last_modified: None,
            content_disposition: None,
        }
    }

    #[test]
    fn expected_length_prefers_range_span_over_full_content_length() {
        // A parallel-download chunk: the HEAD probe is always unranged and
        // reports the full resource, but this attempt only transfers its span.
        let task = task_with_range(Some("bytes=1000-1999"));
        let head = head_with_len(Some(1_000_000));
        assert_eq!(expected_length(&task, &head), Some(1000));
    }

    #[test]
    fn expected_length_falls_back_to_content_length_without_range() {
        let task = task_with_range(None);
        let head = head_with_len(Some(1_000_000));
        assert_eq!(expected_length(&task, &head), Some(1_000_000));
    }

    #[test]
    fn expected_length_falls_back_to_known_content_length_header() {
        let mut task = task_with_range(None);
        task.meta_mut().headers.set("Known-Content-Length", "42");
        let head = head_with_len(None);
        assert_eq!(expected_length(&task, &head), Some(42));
    }

    #[test]
    fn read_body_prefix_slices_between_offsets() {
        let f = tempfile::NamedTempFile::new().unwrap();
        std::fs::write(f.path(), b"0123456789").unwrap();
        assert_eq!(read_body_prefix(f.path(), 2, 5).as_deref(), Some(&b"234"[..]));
        assert_eq!(read_body_prefix(f.path(), 5, 5).as_deref(), Some(&b""[..]));
    }
}
