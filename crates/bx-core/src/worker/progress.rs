//! Progress rate-limiting for downloads and uploads.
//!
//! A channel-fed background task with a throttle predicate (≤1/500ms,
//! ≥0.02 absolute delta) computing `networkSpeed`/`timeRemaining` fields
//! over a trailing window. Mandatory first/last emissions are the
//! caller's responsibility via the `Running`/terminal status transitions,
//! which always carry their own
//! progress sentinel — this forwarder only throttles the interim
//! fractional stream.

use super::context::ByteProgress;
use crate::dispatch::UpdateDispatcher;
use crate::status::ProgressUpdate;
use crate::task::Task;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc::UnboundedReceiver;

const MIN_EMIT_INTERVAL: Duration = Duration::from_millis(500);
const MIN_PROGRESS_DELTA: f64 = 0.02;
/// Trailing window over which `networkSpeed` is averaged.
const SPEED_WINDOW: Duration = Duration::from_secs(2);

/// Consumes raw byte-count samples and forwards throttled `ProgressUpdate`s
/// to the dispatcher until the channel closes (the worker drops its sender
/// when its attempt ends).
pub async fn forward_progress(
    task: Task,
    dispatcher: Arc<UpdateDispatcher>,
    mut rx: UnboundedReceiver<ByteProgress>,
) {
    let mut last_emit_at: Option<Instant> = None;
    let mut last_emitted_progress = -1.0f64;
    let mut window_start = Instant::now();
    let mut window_start_bytes = 0u64;

    while let Some(sample) = rx.recv().await {
        let Some(expected) = sample.expected.filter(|&e| e > 0) else {
            continue;
        };
        let now = Instant::now();
        let fraction = (sample.written as f64 / expected as f64).min(1.0);

        if now.duration_since(window_start) >= SPEED_WINDOW {
            window_start = now;
            window_start_bytes = sample.written;
        }
        let elapsed = now.duration_since(window_start).as_secs_f64();
        let network_speed = if elapsed > 0.0 {
            Some((sample.written.saturating_sub(window_start_bytes)) as f64 / elapsed)
        } else {
            None
        };
        let time_remaining = network_speed.filter(|&s| s > 0.0).map(|s| {
            let remaining = expected.saturating_sub(sample.written) as f64;
            remaining / s
        });

        let due_by_time = last_emit_at.map_or(true, |t| now.duration_since(t) >= MIN_EMIT_INTERVAL);
        let due_by_delta = (fraction - last_emitted_progress).abs() >= MIN_PROGRESS_DELTA;
        if !(due_by_time && due_by_delta) {
            continue;
        }

        let update = ProgressUpdate {
            task_id: task.task_id().to_string(),
            progress: fraction,
            expected_file_size: Some(expected as i64),
            network_speed,
            time_remaining,
        };
        if dispatcher.emit_progress(&task, update).await.is_err() {
            return;
        }
        last_emit_at = Some(now);
        last_emitted_progress = fraction;
    }
}
