//! Parallel Download Coordinator.
//!
//! A `ParallelDownloadTask` never runs through [`crate::worker::worker_for`];
//! this module drives one directly. Each chunk becomes its own synthetic
//! `DownloadTask` — its own `Range` header, its own temp file under a
//! reserved group, its own [`crate::control::StopToken`] — and runs through
//! the very same [`crate::worker::download::DownloadWorker`] a plain
//! download uses. Once every chunk reaches a terminal state the chunk files
//! are concatenated in range order into the parent's destination (no extra
//! copy of the bytes already landed at the right offset; just the chunk
//! files end to end) and removed.

use crate::config::BxConfig;
use crate::control::{CancelRegistry, StopReason, StopToken};
use crate::error::TransferError;
use crate::fetch_head;
use crate::segmenter::plan_segments;
use crate::status::TaskStatus;
use crate::store::{sanitize_task_id_for_storage_key, ResumeData, Validator};
use crate::task::{BaseDirectory, Destination, DownloadTask, ParallelDownloadTask, Task, TaskMeta};
use crate::worker::context::{ByteProgress, WorkerContext};
use crate::worker::destination;
use crate::worker::outcome::{ResponseInfo, WorkerOutcome};
use crate::worker::{worker_for, TaskWorker};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::UnboundedSender;
use tokio::task::JoinSet;

/// A chunk's resume state, captured when the parent pauses mid-flight so a
/// later `run` with `resume = Some(..)` can re-issue only the unfinished
/// chunks. Serialized into the parent [`ResumeData::data`] field as JSON;
/// the parent's own `required_start_byte` is the sentinel `-1` (see this
/// field rather than a single byte offset, since chunks resume independently).
#[derive(Debug, Clone, Serialize, Deserialize)]
struct ChunkResume {
    index: usize,
    url: String,
    complete: bool,
    temp_path: String,
    required_start_byte: i64,
    validator: Validator,
}

/// Sentinel `required_start_byte` on the parent `ResumeData`, meaning
/// "see `data` for the per-chunk resume list" rather than a single offset.
const PARALLEL_RESUME_SENTINEL: i64 = -1;

fn chunk_group(parent_task_id: &str) -> String {
    format!("__bx_chunks__{}", sanitize_task_id_for_storage_key(parent_task_id))
}

fn chunk_child_id(parent_task_id: &str, index: usize) -> String {
    format!("{parent_task_id}#chunk{index}")
}

fn status_for_outcome(outcome: &WorkerOutcome) -> TaskStatus {
    match outcome {
        WorkerOutcome::Complete(_) => TaskStatus::Complete,
        WorkerOutcome::NotFound(_) => TaskStatus::NotFound,
        WorkerOutcome::Failed(_) => TaskStatus::Failed,
        WorkerOutcome::Paused(_) => TaskStatus::Paused,
        WorkerOutcome::Canceled => TaskStatus::Canceled,
    }
}

/// Round-robins chunk `index` across `primary` plus the task's
/// `mirror_urls`.
fn pick_url(primary: &str, mirrors: &[String], index: usize) -> String {
    if mirrors.is_empty() {
        return primary.to_string();
    }
    let all_len = mirrors.len() + 1;
    let pos = index % all_len;
    if pos == 0 {
        primary.to_string()
    } else {
        mirrors[pos - 1].clone()
    }
}

fn chunk_destination(parent_task_id: &str, index: usize) -> Destination {
    Destination {
        base_directory: BaseDirectory::Temporary,
        sub_directory: format!("bx-chunks/{}", sanitize_task_id_for_storage_key(parent_task_id)),
        filename: format!("chunk{index}"),
    }
}

/// Drives one attempt of a `ParallelDownloadTask` to completion, pause, or
/// failure. Mirrors [`crate::worker::TaskWorker::run`]'s shape so the
/// retry controller can treat a parallel download the same as any other
/// task kind once it special-cases the dispatch.
pub async fn run(
    task: ParallelDownloadTask,
    config: BxConfig,
    cancel: StopToken,
    cancel_registry: Arc<CancelRegistry>,
    progress_tx: UnboundedSender<ByteProgress>,
    resume: Option<ResumeData>,
) -> WorkerOutcome {
    let meta = task.meta.clone();
    let url = meta.url.clone();
    let probe_headers: std::collections::HashMap<String, String> = meta
        .headers
        .iter()
        .filter(|(k, _)| !k.eq_ignore_ascii_case("Range"))
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect();

    let head = {
        let url = url.clone();
        let headers = probe_headers.clone();
        match tokio::task::spawn_blocking(move || fetch_head::probe(&url, &headers)).await {
            Ok(Ok(h)) => h,
            Ok(Err(e)) => return WorkerOutcome::Failed(TransferError::Connection(e.to_string())),
            Err(e) => {
                return WorkerOutcome::Failed(TransferError::General(format!(
                    "HEAD probe task panicked: {e}"
                )))
            }
        }
    };

    let total = match head.content_length {
        Some(n) if n > 0 => n,
        _ => {
            return WorkerOutcome::Failed(TransferError::General(
                "parallel download requires a known Content-Length".to_string(),
            ))
        }
    };

    let segment_count = (task.chunks.max(1) as usize)
        .clamp(config.min_segments.max(1), config.max_segments.max(1).max(config.min_segments.max(1)));
    let segments = plan_segments(total, segment_count);
    if segments.is_empty() {
        return WorkerOutcome::Failed(TransferError::General("nothing to download".to_string()));
    }

    let final_path = match destination::resolve_download_path(
        &task.destination,
        &url,
        head.content_disposition.as_deref(),
        true,
    ) {
        Ok(p) => p,
        Err(e) => return WorkerOutcome::Failed(TransferError::Filesystem(e.to_string())),
    };

    if config.skip_existing_files && final_path.exists() {
        return WorkerOutcome::Complete(ResponseInfo::default());
    }

    // Prior resume state, keyed by chunk index.
    let prior: Vec<Option<ChunkResume>> = match &resume {
        Some(r) if r.required_start_byte == PARALLEL_RESUME_SENTINEL => {
            match serde_json::from_str::<Vec<ChunkResume>>(&r.data) {
                Ok(list) => {
                    let mut by_index: Vec<Option<ChunkResume>> = (0..segments.len()).map(|_| None).collect();
                    for entry in list {
                        if entry.index < by_index.len() {
                            by_index[entry.index] = Some(entry);
                        }
                    }
                    by_index
                }
                Err(_) => (0..segments.len()).map(|_| None).collect(),
            }
        }
        _ => (0..segments.len()).map(|_| None).collect(),
    };

    let written = Arc::new(
        segments
            .iter()
            .enumerate()
            .map(|(i, s)| {
                let done = prior[i].as_ref().map(|c| c.complete).unwrap_or(false);
                AtomicU64::new(if done { s.len() } else { 0 })
            })
            .collect::<Vec<_>>(),
    );

    let group = chunk_group(&meta.task_id);
    let child_ids: Vec<String> = (0..segments.len())
        .map(|i| chunk_child_id(&meta.task_id, i))
        .collect();

    let mut set: JoinSet<(usize, WorkerOutcome)> = JoinSet::new();
    for (i, segment) in segments.iter().enumerate() {
        let chunk_id = child_ids[i].clone();
        let chunk_url = pick_url(&url, &task.mirror_urls, i);

        let mut child_meta = TaskMeta::new(chunk_id.clone(), chunk_url);
        child_meta.headers = meta.headers.clone();
        child_meta
            .headers
            .set("Range", format!("bytes={}-{}", segment.start, segment.end.saturating_sub(1)));
        child_meta.group = group.clone();
        child_meta.requires_wifi = meta.requires_wifi;
        child_meta.allow_pause = meta.allow_pause;
        child_meta.priority = meta.priority;
        child_meta.retries = 0;
        child_meta.retries_remaining = 0;
        child_meta.creation_time = meta.creation_time;

        let child_task = Task::Download(DownloadTask {
            meta: child_meta,
            destination: chunk_destination(&meta.task_id, i),
        });

        let child_resume = prior[i].as_ref().filter(|c| !c.complete).map(|c| ResumeData {
            task_id: chunk_id.clone(),
            data: c.temp_path.clone(),
            required_start_byte: c.required_start_byte,
            validator: c.validator.clone(),
        });

        if prior[i].as_ref().map(|c| c.complete).unwrap_or(false) {
            // Already fully downloaded on a previous attempt; its chunk file
            // is already sitting at its resolved path, nothing to run.
            set.spawn(async move {
                (
                    i,
                    WorkerOutcome::Complete(ResponseInfo {
                        response_code: Some(200),
                        ..Default::default()
                    }),
                )
            });
            continue;
        }

        let child_token = cancel_registry.register(&chunk_id);
        let worker: &'static dyn TaskWorker = worker_for(&child_task);
        let child_config = config.clone();
        let written_for_child = Arc::clone(&written);
        let progress_tx_for_child = progress_tx.clone();
        let expected_total = total;
        let segment_count_for_progress = segments.len();

        set.spawn(async move {
            let (child_tx, mut child_rx) = tokio::sync::mpsc::unbounded_channel();
            let ctx = WorkerContext {
                task: child_task,
                cancel: child_token,
                progress_tx: child_tx,
                config: child_config,
                resume: child_resume,
            };
            let reader = async {
                while let Some(p) = child_rx.recv().await {
                    written_for_child[i].store(p.written, Ordering::Relaxed);
                    let total_written: u64 =
                        written_for_child.iter().map(|a| a.load(Ordering::Relaxed)).sum();
                    let _ = progress_tx_for_child.send(ByteProgress {
                        written: total_written,
                        expected: Some(expected_total),
                    });
                }
            };
            let _ = segment_count_for_progress;
            let (outcome, _) = tokio::join!(worker.run(ctx), reader);
            (i, outcome)
        });
    }

    let mut outcomes: Vec<Option<WorkerOutcome>> = (0..segments.len()).map(|_| None).collect();
    let mut finished: HashSet<usize> = HashSet::new();
    let mut cancel_sent = false;
    let mut ticker = tokio::time::interval(Duration::from_millis(200));

    loop {
        if set.is_empty() {
            break;
        }
        tokio::select! {
            res = set.join_next(), if !set.is_empty() => {
                match res {
                    Some(Ok((i, outcome))) => {
                        finished.insert(i);
                        let fatal = matches!(outcome, WorkerOutcome::Failed(_));
                        outcomes[i] = Some(outcome);
                        if fatal && !cancel_sent {
                            cancel_sent = true;
                            for (j, id) in child_ids.iter().enumerate() {
                                if !finished.contains(&j) {
                                    cancel_registry.request_cancel(id);
                                }
                            }
                        }
                    }
                    Some(Err(_join_err)) => {
                        // A chunk task panicked; we don't know its index, so signal
                        // every still-unfinished chunk to cancel and let the loop
                        // drain them. The panicked chunk's slot stays `None` and is
                        // filled in below.
                        cancel_sent = true;
                        for (j, id) in child_ids.iter().enumerate() {
                            if !finished.contains(&j) {
                                cancel_registry.request_cancel(id);
                            }
                        }
                    }
                    None => {}
                }
            }
            _ = ticker.tick() => {
                if let Some(reason) = cancel.check() {
                    for id in &child_ids {
                        match reason {
                            StopReason::Pause => { cancel_registry.request_pause(id); }
                            StopReason::Cancel => { cancel_registry.request_cancel(id); }
                            StopReason::None => {}
                        }
                    }
                }
            }
        }
    }

    for id in &child_ids {
        cancel_registry.unregister(id);
    }

    let outcomes: Vec<WorkerOutcome> = outcomes
        .into_iter()
        .enumerate()
        .map(|(i, o)| {
            o.unwrap_or_else(|| WorkerOutcome::Failed(TransferError::General(format!("chunk {i} ended abnormally"))))
        })
        .collect();

    let statuses: Vec<TaskStatus> = outcomes.iter().map(status_for_outcome).collect();
    let overall = TaskStatus::aggregate(statuses.iter().copied()).unwrap_or(TaskStatus::Failed);

    let chunk_paths: Vec<PathBuf> = (0..segments.len())
        .map(|i| {
            destination::resolve_download_path(&chunk_destination(&meta.task_id, i), &url, None, false)
                .unwrap_or_else(|_| PathBuf::from(format!("chunk{i}")))
        })
        .collect();

    match overall {
        TaskStatus::Complete => {
            let result = concatenate_chunks(&chunk_paths, &final_path);
            cleanup_chunk_files(&chunk_paths);
            match result {
                Ok(()) => WorkerOutcome::Complete(ResponseInfo {
                    response_code: Some(200),
                    ..Default::default()
                }),
                Err(e) => WorkerOutcome::Failed(TransferError::Filesystem(e.to_string())),
            }
        }
        TaskStatus::NotFound => {
            cleanup_chunk_files(&chunk_paths);
            let response = outcomes.into_iter().find_map(|o| match o {
                WorkerOutcome::NotFound(r) => Some(r),
                _ => None,
            });
            WorkerOutcome::NotFound(response.unwrap_or_default())
        }
        TaskStatus::Canceled => {
            cleanup_chunk_files(&chunk_paths);
            WorkerOutcome::Canceled
        }
        TaskStatus::Paused => {
            let entries: Vec<ChunkResume> = outcomes
                .iter()
                .enumerate()
                .map(|(i, o)| match o {
                    WorkerOutcome::Complete(_) => ChunkResume {
                        index: i,
                        url: pick_url(&url, &task.mirror_urls, i),
                        complete: true,
                        temp_path: chunk_paths[i].to_string_lossy().to_string(),
                        required_start_byte: segments[i].len() as i64,
                        validator: Validator::default(),
                    },
                    WorkerOutcome::Paused(r) => ChunkResume {
                        index: i,
                        url: pick_url(&url, &task.mirror_urls, i),
                        complete: false,
                        temp_path: r.data.clone(),
                        required_start_byte: r.required_start_byte,
                        validator: r.validator.clone(),
                    },
                    _ => ChunkResume {
                        index: i,
                        url: pick_url(&url, &task.mirror_urls, i),
                        complete: false,
                        temp_path: String::new(),
                        required_start_byte: 0,
                        validator: Validator::default(),
                    },
                })
                .collect();
            let data = serde_json::to_string(&entries)
                .unwrap_or_else(|_| "[]".to_string());
            WorkerOutcome::Paused(ResumeData {
                task_id: meta.task_id.clone(),
                data,
                required_start_byte: PARALLEL_RESUME_SENTINEL,
                validator: Validator::default(),
            })
        }
        // Failed is the only remaining terminal in this rank ordering; a
        // parallel attempt never itself produces Running/Enqueued/WaitingToRetry.
        _ => {
            cleanup_chunk_files(&chunk_paths);
            let err = outcomes.into_iter().find_map(|o| match o {
                WorkerOutcome::Failed(e) => Some(e),
                _ => None,
            });
            WorkerOutcome::Failed(err.unwrap_or_else(|| TransferError::General("chunk failed".to_string())))
        }
    }
}

/// Writes each chunk file, in range order, into `final_path`. Chunks already
/// land at the right byte offset via their own `Range` request, so this is
/// a plain end-to-end concatenation, not a merge.
fn concatenate_chunks(chunk_paths: &[PathBuf], final_path: &Path) -> io::Result<()> {
    use std::io::Write;
    if let Some(parent) = final_path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let mut out = std::fs::File::create(final_path)?;
    for path in chunk_paths {
        let mut input = std::fs::File::open(path)?;
        io::copy(&mut input, &mut out)?;
    }
    out.flush()?;
    Ok(())
}

fn cleanup_chunk_files(chunk_paths: &[PathBuf]) {
    for path in chunk_paths {
        let _ = std::fs::remove_file(path);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pick_url_round_robins_over_mirrors() {
        let mirrors = vec!["https://m1".to_string(), "https://m2".to_string()];
        assert_eq!(pick_url("https://primary", &mirrors, 0), "https://primary");
        assert_eq!(pick_url("https://primary", &mirrors, 1), "https://m1");
        assert_eq!(pick_url("https://primary", &mirrors, 2), "https://m2");
        assert_eq!(pick_url("https://primary", &mirrors, 3), "https://primary");
    }

    #[test]
    fn pick_url_with_no_mirrors_always_primary() {
        assert_eq!(pick_url("https://primary", &[], 0), "https://primary");
        assert_eq!(pick_url("https://primary", &[], 5), "https://primary");
    }

    #[test]
    fn chunk_group_is_stable_and_sanitized() {
        let g = chunk_group("a/b:c");
        assert_eq!(g, "__bx_chunks__a_b_c");
    }

    #[test]
    fn status_for_outcome_matches_variants() {
        assert_eq!(
            status_for_outcome(&WorkerOutcome::Complete(ResponseInfo::default())),
            TaskStatus::Complete
        );
        assert_eq!(status_for_outcome(&WorkerOutcome::Canceled), TaskStatus::Canceled);
        assert_eq!(
            status_for_outcome(&WorkerOutcome::Failed(TransferError::General("x".to_string()))),
            TaskStatus::Failed
        );
    }

    #[test]
    fn concatenate_chunks_preserves_order() {
        let dir = tempfile::tempdir().unwrap();
        let c0 = dir.path().join("c0");
        let c1 = dir.path().join("c1");
        std::fs::write(&c0, b"hello ").unwrap();
        std::fs::write(&c1, b"world").unwrap();
        let out = dir.path().join("out.bin");
        concatenate_chunks(&[c0, c1], &out).unwrap();
        assert_eq!(std::fs::read(&out).unwrap(), b"hello world");
    }
}
