//! `bx run` – enqueue one or more downloads in a fresh in-process engine
//! and drive them to completion, printing status/progress as they arrive.

use anyhow::{Context, Result};
use bx_core::config::BxConfig;
use bx_core::dispatch::Update;
use bx_core::engine::Engine;
use bx_core::status::TaskStatus;
use bx_core::store::{self, Store};
use bx_core::task::{BaseDirectory, Destination, DownloadTask, Task, TaskMeta, SUGGEST_FILENAME};
use std::path::PathBuf;
use std::time::Instant;

/// Parsed `bx run` arguments.
pub struct RunArgs {
    pub urls: Vec<String>,
    pub dest: Option<PathBuf>,
    pub group: String,
    pub priority: u8,
    pub retries: u32,
    pub max_concurrent: Option<usize>,
    pub max_concurrent_by_host: Option<usize>,
    pub max_concurrent_by_group: Option<usize>,
}

pub async fn run_engine(args: RunArgs) -> Result<()> {
    if args.urls.is_empty() {
        println!("No URLs given.");
        return Ok(());
    }

    let mut cfg = bx_core::config::load_or_init().unwrap_or_default();
    if let Some(n) = args.max_concurrent {
        cfg.max_concurrent = n;
    }
    if let Some(n) = args.max_concurrent_by_host {
        cfg.max_concurrent_by_host = n;
    }
    if let Some(n) = args.max_concurrent_by_group {
        cfg.max_concurrent_by_group = n;
    }

    let store = Store::connect(&store::default_path()?)
        .await
        .context("open task store")?;
    let engine = Engine::new(store, cfg).await;

    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
    engine.attach_listener(tx);

    // `Destination` only expresses the platform-neutral `BaseDirectory`
    // enum, not an arbitrary absolute path; a user-supplied `--dest` is
    // placed as a sub-directory under `Documents`.
    let (base_directory, sub_directory) = match &args.dest {
        Some(dest) => (BaseDirectory::Documents, dest.to_string_lossy().into_owned()),
        None => (BaseDirectory::Temporary, String::new()),
    };

    let mut task_ids = Vec::with_capacity(args.urls.len());
    let mut tasks = Vec::with_capacity(args.urls.len());
    for (i, url) in args.urls.iter().enumerate() {
        let task_id = format!("cli-{}-{}", std::process::id(), i);
        let mut meta = TaskMeta::new(&task_id, url);
        meta.group = args.group.clone();
        meta.priority = args.priority;
        meta.retries = args.retries;
        task_ids.push(task_id);
        tasks.push(Task::Download(DownloadTask {
            meta,
            destination: Destination {
                base_directory,
                sub_directory: sub_directory.clone(),
                filename: SUGGEST_FILENAME.to_string(),
            },
        }));
    }

    let accepted = engine.enqueue_all(tasks).await;
    let enqueued = accepted.iter().filter(|a| **a).count();
    tracing::info!(total = args.urls.len(), enqueued, "tasks submitted");

    let mut remaining: std::collections::HashSet<String> = task_ids
        .iter()
        .zip(accepted.iter())
        .filter(|(_, ok)| **ok)
        .map(|(id, _)| id.clone())
        .collect();

    if remaining.is_empty() {
        println!("No tasks were accepted.");
        return Ok(());
    }

    let mut last_print = Instant::now();
    const PROGRESS_INTERVAL: std::time::Duration = std::time::Duration::from_millis(500);
    let mut failures = 0usize;

    while !remaining.is_empty() {
        let Some(update) = rx.recv().await else {
            break;
        };
        match update {
            Update::Status(s) => {
                if s.status.is_terminal() {
                    remaining.remove(&s.task_id);
                    if !matches!(s.status, TaskStatus::Complete) {
                        failures += 1;
                    }
                    println!("{}: {:?}", s.task_id, s.status);
                }
            }
            Update::Progress(p) => {
                if last_print.elapsed() >= PROGRESS_INTERVAL {
                    let pct = p.progress * 100.0;
                    let rate = p
                        .network_speed
                        .map(|b| format!("{:.2} MiB/s", b / 1_048_576.0))
                        .unwrap_or_else(|| "?".to_string());
                    println!("{}: {:.1}%  {}", p.task_id, pct, rate);
                    last_print = Instant::now();
                }
            }
        }
    }

    if failures == 0 {
        tracing::info!("run completed, all tasks succeeded");
    } else {
        tracing::warn!(failures, "run completed with failures");
    }
    Ok(())
}
