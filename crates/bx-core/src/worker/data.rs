//! Data worker: issues one HTTP request and captures the response
//! entirely in memory. Never touches the filesystem — there is no
//! `Destination`, no temp file, and no resumability for this task kind.

use crate::config::BxConfig;
use crate::control::{StopReason, StopToken};
use crate::error::TransferError;
use crate::task::{Task, TaskBody};
use crate::worker::context::WorkerContext;
use crate::worker::outcome::{ResponseInfo, WorkerOutcome};
use std::str;

pub struct DataWorker;

#[async_trait::async_trait]
impl crate::worker::TaskWorker for DataWorker {
    async fn run(&self, ctx: WorkerContext) -> WorkerOutcome {
        let WorkerContext { task, cancel, config, .. } = ctx;
        tokio::task::spawn_blocking(move || run_blocking(task, config, cancel))
            .await
            .unwrap_or_else(|e| WorkerOutcome::Failed(TransferError::General(format!("worker task panicked: {e}"))))
    }
}

fn run_blocking(task: Task, config: BxConfig, cancel: StopToken) -> WorkerOutcome {
    if !matches!(task, Task::Data(_)) {
        return WorkerOutcome::Failed(TransferError::General(format!(
            "{} is not a data task",
            task.task_id()
        )));
    }

    match run_transfer(&task, &cancel, &config) {
        Ok(response) => {
            if response.response_code.is_some_and(|c| (200..300).contains(&c)) {
                WorkerOutcome::Complete(response)
            } else if response.response_code == Some(404) {
                WorkerOutcome::NotFound(response)
            } else {
                WorkerOutcome::Failed(TransferError::Http {
                    code: response.response_code.unwrap_or(0),
                    reason: "data request rejected".to_string(),
                })
            }
        }
        Err(TransferAttemptError::Stopped(_)) => WorkerOutcome::Canceled,
        Err(TransferAttemptError::Curl(e)) => WorkerOutcome::Failed(TransferError::Connection(e.to_string())),
    }
}

enum TransferAttemptError {
    Stopped(StopReason),
    Curl(curl::Error),
}

fn run_transfer(task: &Task, cancel: &StopToken, config: &BxConfig) -> Result<ResponseInfo, TransferAttemptError> {
    let mut easy = curl::easy::Easy::new();
    easy.url(&task.meta().url).map_err(TransferAttemptError::Curl)?;
    easy.follow_location(true).map_err(TransferAttemptError::Curl)?;
    easy.custom_request(task.meta().http_method.as_str())
        .map_err(TransferAttemptError::Curl)?;
    easy.connect_timeout(config.request_timeout())
        .map_err(TransferAttemptError::Curl)?;
    easy.timeout(config.resource_timeout()).map_err(TransferAttemptError::Curl)?;

    let body_bytes: Vec<u8> = match &task.meta().body {
        TaskBody::Empty => Vec::new(),
        TaskBody::Text(s) => s.as_bytes().to_vec(),
        TaskBody::Bytes(b) => b.clone(),
        TaskBody::Json(v) => v.to_string().into_bytes(),
    };
    if !body_bytes.is_empty() {
        easy.post(true).map_err(TransferAttemptError::Curl)?;
        easy.post_field_size(body_bytes.len() as u64)
            .map_err(TransferAttemptError::Curl)?;
    }

    let mut list = curl::easy::List::new();
    for (k, v) in task.meta().headers.iter() {
        list.append(&format!("{}: {}", k.trim(), v.trim()))
            .map_err(TransferAttemptError::Curl)?;
    }
    if !task.meta().headers.0.is_empty() {
        easy.http_headers(list).map_err(TransferAttemptError::Curl)?;
    }

    let response_headers = std::sync::Arc::new(std::sync::Mutex::new(Vec::<(String, String)>::new()));
    let response_headers_cb = std::sync::Arc::clone(&response_headers);
    let response_body = std::sync::Arc::new(std::sync::Mutex::new(Vec::<u8>::new()));
    let response_body_cb = std::sync::Arc::clone(&response_body);
    let cancel_cb = cancel.clone();
    let stopped = std::sync::Arc::new(std::sync::Mutex::new(None::<StopReason>));
    let stopped_cb = std::sync::Arc::clone(&stopped);

    let mut body_cursor = std::io::Cursor::new(body_bytes);

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
                if let Some(reason) = cancel_cb.check() {
                    *stopped_cb.lock().unwrap() = Some(reason);
                    return Ok(0);
                }
                response_body_cb.lock().unwrap().extend_from_slice(data);
                Ok(data.len())
            })
            .map_err(TransferAttemptError::Curl)?;
        transfer
            .read_function(move |buf| Ok(std::io::Read::read(&mut body_cursor, buf).unwrap_or(0)))
            .map_err(TransferAttemptError::Curl)?;
        perform_result = transfer.perform();
    }

    if let Err(e) = perform_result {
        if let Some(reason) = *stopped.lock().unwrap() {
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
