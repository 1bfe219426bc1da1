//! Multipart upload worker: RFC 7578 multipart/form-data.
//!
//! Builds one `curl::easy::Form` per file/field and lets curl own boundary
//! construction and the file reads, so progress here comes from curl's own
//! transfer counters (`progress_function`) rather than a custom
//! `read_function` like the binary upload worker uses.

use crate::config::BxConfig;
use crate::control::{StopReason, StopToken};
use crate::error::TransferError;
use crate::task::{MultipartUploadTask, Task};
use crate::worker::context::{ByteProgress, WorkerContext};
use crate::worker::outcome::{ResponseInfo, WorkerOutcome};
use std::collections::HashSet;
use std::str;
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc::UnboundedSender;

pub struct MultipartWorker;

#[async_trait::async_trait]
impl crate::worker::TaskWorker for MultipartWorker {
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
    let mt = match &task {
        Task::MultipartUpload(mt) => mt.clone(),
        other => {
            return WorkerOutcome::Failed(TransferError::General(format!(
                "{:?} is not a multipart upload task",
                other.task_id()
            )))
        }
    };

    let form = match build_form(&mt) {
        Ok(f) => f,
        Err(e) => return WorkerOutcome::Failed(TransferError::Filesystem(e)),
    };

    match run_transfer(&task, form, &cancel, &progress_tx, &config) {
        Ok(response) => {
            if response.response_code.is_some_and(|c| (200..300).contains(&c)) {
                WorkerOutcome::Complete(response)
            } else if response.response_code == Some(404) {
                WorkerOutcome::NotFound(response)
            } else {
                WorkerOutcome::Failed(TransferError::Http {
                    code: response.response_code.unwrap_or(0),
                    reason: "multipart upload rejected".to_string(),
                })
            }
        }
        Err(TransferAttemptError::Stopped(StopReason::Cancel | StopReason::None)) => WorkerOutcome::Canceled,
        Err(TransferAttemptError::Stopped(StopReason::Pause)) => WorkerOutcome::Canceled,
        Err(TransferAttemptError::Curl(e)) => WorkerOutcome::Failed(TransferError::Connection(e.to_string())),
    }
}

/// Builds one `curl::easy::Form` part per (field, file) and per text field,
/// in task order, keeping only the first occurrence of a repeated field
/// name (see DESIGN.md).
fn build_form(mt: &MultipartUploadTask) -> Result<curl::easy::Form, String> {
    let mut form = curl::easy::Form::new();
    let mut seen: HashSet<String> = HashSet::new();

    for file in &mt.files {
        if !seen.insert(file.field.clone()) {
            continue;
        }
        let mut part = form.part(&file.field);
        part.file(&file.path);
        if let Some(mime) = &file.mime_type {
            part.content_type(mime);
        }
        part.add().map_err(|e| format!("multipart field '{}': {}", file.field, e))?;
    }

    for (name, value) in &mt.fields {
        if !seen.insert(name.clone()) {
            continue;
        }
        form.part(name)
            .contents(value.as_bytes())
            .add()
            .map_err(|e| format!("multipart field '{name}': {e}"))?;
    }

    Ok(form)
}

enum TransferAttemptError {
    Stopped(StopReason),
    Curl(curl::Error),
}

fn run_transfer(
    task: &Task,
    form: curl::easy::Form,
    cancel: &StopToken,
    progress_tx: &UnboundedSender<ByteProgress>,
    config: &BxConfig,
) -> Result<ResponseInfo, TransferAttemptError> {
    let stop_state: Arc<Mutex<Option<StopReason>>> = Arc::new(Mutex::new(None));
    let stop_cb = Arc::clone(&stop_state);
    let cancel_cb = cancel.clone();
    let progress_tx_cb = progress_tx.clone();

    let mut easy = curl::easy::Easy::new();
    easy.url(&task.meta().url).map_err(TransferAttemptError::Curl)?;
    easy.follow_location(true).map_err(TransferAttemptError::Curl)?;
    easy.httppost(form).map_err(TransferAttemptError::Curl)?;
    easy.progress(true).map_err(TransferAttemptError::Curl)?;
    easy.connect_timeout(config.request_timeout())
        .map_err(TransferAttemptError::Curl)?;
    easy.timeout(config.resource_timeout()).map_err(TransferAttemptError::Curl)?;

    let mut list = curl::easy::List::new();
    for (k, v) in task.meta().headers.iter() {
        list.append(&format!("{}: {}", k.trim(), v.trim()))
            .map_err(TransferAttemptError::Curl)?;
    }
    if !task.meta().headers.0.is_empty() {
        easy.http_headers(list).map_err(TransferAttemptError::Curl)?;
    }

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
            .progress_function(move |_dltotal, _dlnow, ultotal, ulnow| {
                if cancel_cb.check().is_some() {
                    *stop_cb.lock().unwrap() = cancel_cb.check();
                    return false;
                }
                if ultotal > 0.0 {
                    let _ = progress_tx_cb.send(ByteProgress {
                        written: ulnow as u64,
                        expected: Some(ultotal as u64),
                    });
                }
                true
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
        .map(|(_, v)| super::upload::parse_content_type(v))
        .unwrap_or((None, None));

    Ok(ResponseInfo {
        response_code,
        response_headers: Some(headers),
        response_body: Some(response_body.lock().unwrap().clone()),
        mime_type,
        charset,
    })
}
