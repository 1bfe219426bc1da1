//! Integration test: local HTTP server with Range support, driving a real
//! download task end to end through the engine.

mod common;

use bx_core::config::BxConfig;
use bx_core::dispatch::Update;
use bx_core::engine::Engine;
use bx_core::status::TaskStatus;
use bx_core::store::Store;
use bx_core::task::{BaseDirectory, Destination, DownloadTask, Task, TaskMeta, SUGGEST_FILENAME};
use bx_core::worker::destination::resolve_base_directory;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Once;
use tempfile::tempdir;
use tokio::sync::mpsc;

static XDG_INIT: Once = Once::new();
static TASK_SEQ: AtomicU32 = AtomicU32::new(0);

/// Points `XDG_CACHE_HOME` at a process-wide scratch directory once, so every
/// test's `BaseDirectory::Temporary` resolves under a location this test
/// binary owns rather than the real user cache.
fn scratch_cache_home() -> std::path::PathBuf {
    static DIR: std::sync::OnceLock<tempfile::TempDir> = std::sync::OnceLock::new();
    let dir = DIR.get_or_init(|| tempdir().unwrap());
    XDG_INIT.call_once(|| {
        std::env::set_var("XDG_CACHE_HOME", dir.path());
    });
    dir.path().to_path_buf()
}

async fn run_download(url: &str) -> (TaskStatus, Vec<u8>) {
    scratch_cache_home();
    let sub_directory = format!("test-{}", TASK_SEQ.fetch_add(1, Ordering::Relaxed));

    let store = Store::connect_in_memory().await.unwrap();
    let engine = Engine::new(store, BxConfig::default()).await;

    let (tx, mut rx) = mpsc::unbounded_channel();
    engine.attach_listener(tx);

    let meta = TaskMeta::new("dl-1", url);
    let task = Task::Download(DownloadTask {
        meta,
        destination: Destination {
            base_directory: BaseDirectory::Temporary,
            sub_directory: sub_directory.clone(),
            filename: SUGGEST_FILENAME.to_string(),
        },
    });

    assert!(engine.enqueue(task).await);

    let mut final_status = None;
    while let Some(update) = rx.recv().await {
        if let Update::Status(status_update) = update {
            if status_update.status.is_terminal() {
                final_status = Some(status_update.status);
                break;
            }
        }
    }
    let status = final_status.expect("engine should emit a terminal status");

    let dir = resolve_base_directory(BaseDirectory::Temporary)
        .unwrap()
        .join(&sub_directory);
    let entries: Vec<_> = std::fs::read_dir(&dir)
        .map(|it| it.filter_map(|e| e.ok()).collect())
        .unwrap_or_default();
    let content = if entries.len() == 1 {
        std::fs::read(entries[0].path()).unwrap_or_default()
    } else {
        Vec::new()
    };
    (status, content)
}

#[tokio::test]
async fn range_capable_server_download_completes_and_file_matches() {
    let body: Vec<u8> = (0u8..100).cycle().take(64 * 1024).collect();
    let url = common::range_server::start(body.clone());

    let (status, content) = run_download(&format!("{}file.bin", url)).await;
    assert_eq!(status, TaskStatus::Complete);
    assert_eq!(content.len(), body.len());
    assert_eq!(content, body);
}

#[tokio::test]
async fn head_blocked_falls_back_to_range_probe_and_completes() {
    let body: Vec<u8> = (0u8..100).cycle().take(32 * 1024).collect();
    let url = common::range_server::start_with_options(
        body.clone(),
        common::range_server::RangeServerOptions {
            head_allowed: false,
            support_ranges: true,
            advertise_ranges: true,
        },
    );

    let (status, content) = run_download(&format!("{}file.bin", url)).await;
    assert_eq!(status, TaskStatus::Complete);
    assert_eq!(content, body);
}

#[tokio::test]
async fn no_range_server_falls_back_to_single_stream_get() {
    let body: Vec<u8> = (0u8..100).cycle().take(32 * 1024).collect();
    let url = common::range_server::start_with_options(
        body.clone(),
        common::range_server::RangeServerOptions {
            head_allowed: true,
            support_ranges: false,
            advertise_ranges: false,
        },
    );

    let (status, content) = run_download(&format!("{}file.bin", url)).await;
    assert_eq!(status, TaskStatus::Complete);
    assert_eq!(content, body);
}
