//! Binary upload worker: streams one file as the request body.
//!
//! Uses the same curl easy-handle transfer idiom as the download worker,
//! mirrored for the opposite direction (`read_function` instead of
//! `write_function`).

use crate::config::BxConfig;
use crate::control::{StopReason, StopToken};
use crate::error::TransferError;
use crate::task::{HttpMethod, Task};
use crate::worker::context::{ByteProgress, WorkerContext};
use crate::worker::destination;
use crate::worker::outcome::{ResponseInfo, WorkerOutcome};
use std::fs::File;
use std::io::Read;
use std::path::Path;
use std::str;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc::UnboundedSender;

pub struct UploadWorker;

#[async_trait::async_trait]
impl crate::worker::TaskWorker for UploadWorker {
    async fn run(&self, ctx: WorkerContext) -> WorkerOutcome {
        let WorkerContext {
            task,
            cancel,
            progress_tx,
            config,
            ..
        } = ctx;
        tokio::task::spawn_blocking(move || run_blocking(task, config, cancel, progress_tx))
            .await
            .unwrap_or_else(|e| WorkerOutcome::Failed(TransferError::General(format!("worker task panicked: {e}"))))
    }
}

fn run_blocking(
    task: Task,
    config: BxConfig,
    cancel: StopToken,
    progress_tx: UnboundedSender<ByteProgress>,
) -> WorkerOutcome {
    let source_path = match &task {
        Task::Upload(t) => t.source_path.clone(),
        Task::UriUpload(t) => t.source_uri.clone(),
        other => return WorkerOutcome::Failed(TransferError::General(format!("{:?} is not an upload task", other.task_id()))),
    };
    let source_path = match destination::resolve_upload_source(&source_path) {
        Ok(p) => p,
        Err(e) => return WorkerOutcome::Failed(TransferError::Filesystem(e.to_string())),
    };

    let file = match File::open(&source_path) {
        Ok(f) => f,
        Err(e) => return WorkerOutcome::Failed(TransferError::Filesystem(e.to_string())),
    };
    let file_len = match file.metadata() {
        Ok(m) => m.len(),
        Err(e) => return WorkerOutcome::Failed(TransferError::Filesystem(e.to_string())),
    };

    match run_transfer(&task, &source_path, file, file_len, &cancel, &progress_tx, &config) {
        Ok(response) => {
            if response.response_code.is_some_and(|c| (200..300).contains(&c)) {
                WorkerOutcome::Complete(response)
            } else if response.response_code == Some(404) {
                WorkerOutcome::NotFound(response)
            } else {
                WorkerOutcome::Failed(TransferError::Http {
                    code: response.response_code.unwrap_or(0),
                    reason: "upload rejected".to_string(),
                })
            }
        }
        Err(TransferAttemptError::Stopped(StopReason::Cancel | StopReason::None)) => WorkerOutcome::Canceled,
        Err(TransferAttemptError::Stopped(StopReason::Pause)) => WorkerOutcome::Canceled,
        Err(TransferAttemptError::Curl(e)) => WorkerOutcome::Failed(TransferError::Connection(e.to_string())),
    }
}

enum TransferAttemptError {
    Stopped(StopReason),
    Curl(curl::Error),
}

fn content_disposition_header(task: &Task, source_path: &Path) -> Option<(String, String)> {
    if let Some(existing) = task.meta().headers.get("Content-Disposition") {
        return if existing.is_empty() {
            None
        } else {
            Some(("Content-Disposition".to_string(), existing.to_string()))
        };
    }
    let filename = source_path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| "upload.bin".to_string());
    Some((
        "Content-Disposition".to_string(),
        format!("attachment; filename=\"{filename}\""),
    ))
}

#[allow(clippy::too_many_arguments)]
fn run_transfer(
    task: &Task,
    source_path: &Path,
    mut file: File,
    file_len: u64,
    cancel: &StopToken,
    progress_tx: &UnboundedSender<ByteProgress>,
    config: &BxConfig,
) -> Result<ResponseInfo, TransferAttemptError> {
    let sent = Arc::new(AtomicU64::new(0));
    let sent_cb = Arc::clone(&sent);
    let stop_state: Arc<Mutex<Option<StopReason>>> = Arc::new(Mutex::new(None));
    let stop_cb = Arc::clone(&stop_state);
    let cancel_cb = cancel.clone();
    let progress_tx_cb = progress_tx.clone();

    let mut easy = curl::easy::Easy::new();
    easy.url(&task.meta().url).map_err(TransferAttemptError::Curl)?;
    easy.follow_location(true).map_err(TransferAttemptError::Curl)?;
    easy.upload(true).map_err(TransferAttemptError::Curl)?;
    easy.in_filesize(file_len).map_err(TransferAttemptError::Curl)?;
    let method = match task.meta().http_method {
        HttpMethod::Put => "PUT",
        other => other.as_str(),
    };
    easy.custom_request(method).map_err(TransferAttemptError::Curl)?;
    easy.connect_timeout(config.request_timeout())
        .map_err(TransferAttemptError::Curl)?;
    easy.timeout(config.resource_timeout()).map_err(TransferAttemptError::Curl)?;

    let mut list = curl::easy::List::new();
    for (k, v) in task.meta().headers.iter() {
        if k.eq_ignore_ascii_case("Content-Disposition") {
            continue;
        }
        list.append(&format!("{}: {}", k.trim(), v.trim()))
            .map_err(TransferAttemptError::Curl)?;
    }
    if let Some((name, value)) = content_disposition_header(task, source_path) {
        list.append(&format!("{name}: {value}")).map_err(TransferAttemptError::Curl)?;
    }
    easy.http_headers(list).map_err(TransferAttemptError::Curl)?;

    let response_headers = Arc::new(Mutex::new(Vec::<(String, String)>::new()));
    let response_headers_cb = Arc::clone(&response_headers);
    let response_body = Arc::new(Mutex::new(Vec::<u8>::new()));
    let response_body_cb = Arc::clone(&response_body);

    let perform_result;
    {
        let mut transfer = easy.transfer();
        transfer
            .header_function(move |data| {
                if let Ok(s) = str::from_utf8(data) {
                    if let Some((name, value)) = s.trim_end().split_once(':') {
                        response_headers_cb
                            .lock()
                            .unwrap()
                            .push((name.trim().to_string(), value.trim().to_string()));
                    }
                }
                true
            })
            .map_err(TransferAttemptError::Curl)?;
        transfer
            .write_function(move |data| {
                response_body_cb.lock().unwrap().extend_from_slice(data);
                Ok(data.len())
            })
            .map_err(TransferAttemptError::Curl)?;
        transfer
            .read_function(move |buf| {
                if cancel_cb.check().is_some() {
                    *stop_cb.lock().unwrap() = cancel_cb.check();
                    return Err(curl::easy::ReadError::Abort);
                }
                match file.read(buf) {
                    Ok(n) => {
                        let total = sent_cb.fetch_add(n as u64, Ordering::Relaxed) + n as u64;
                        let _ = progress_tx_cb.send(ByteProgress {
                            written: total,
                            expected: Some(file_len),
                        });
                        Ok(n)
                    }
                    Err(_) => Err(curl::easy::ReadError::Abort),
                }
            })
            .map_err(TransferAttemptError::Curl)?;
        perform_result = transfer.perform();
    }

    if let Err(e) = perform_result {
        if let Some(reason) = *stop_state.lock().unwrap() {
            return Err(TransferAttemptError::Stopped(reason));
        }
        return Err(TransferAttemptError::Curl(e));
    }

    let response_code = easy.response_code().ok().map(|c| c as u16);
    let headers = response_headers.lock().unwrap().clone();
    let (mime_type, charset) = headers
        .iter()
        .find(|(k, _)| k.eq_ignore_ascii_case("Content-Type"))
        .map(|(_, v)| parse_content_type(v))
        .unwrap_or((None, None));

    Ok(ResponseInfo {
        response_code,
        response_headers: Some(headers),
        response_body: Some(response_body.lock().unwrap().clone()),
        mime_type,
        charset,
    })
}

pub(super) fn parse_content_type(value: &str) -> (Option<String>, Option<String>) {
    let mut parts = value.split(';');
    let mime = parts.next().map(|s| s.trim().to_string());
    let charset = parts
        .map(|p| p.trim())
        .find_map(|p| p.strip_prefix("charset="))
        .map(|s| s.trim_matches('"').to_string());
    (mime, charset)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_content_type_splits_charset() {
        let (mime, charset) = parse_content_type("application/json; charset=utf-8");
        assert_eq!(mime.as_deref(), Some("application/json"));
        assert_eq!(charset.as_deref(), Some("utf-8"));
    }

    #[test]
    fn parse_content_type_no_charset() {
        let (mime, charset) = parse_content_type("text/plain");
        assert_eq!(mime.as_deref(), Some("text/plain"));
        assert_eq!(charset, None);
    }
}
