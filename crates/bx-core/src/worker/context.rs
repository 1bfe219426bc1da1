//! Everything a [`super::TaskWorker`] needs to run one attempt.

use crate::config::BxConfig;
use crate::control::StopToken;
use crate::store::ResumeData;
use crate::task::Task;
use tokio::sync::mpsc::UnboundedSender;

/// A raw byte-count sample, fed to the progress-throttling background task
/// (the ≤1/500ms, ≥0.02-delta rate limit lives downstream of this).
#[derive(Debug, Clone, Copy)]
pub struct ByteProgress {
    pub written: u64,
    pub expected: Option<u64>,
}

pub struct WorkerContext {
    pub task: Task,
    pub cancel: StopToken,
    pub progress_tx: UnboundedSender<ByteProgress>,
    pub config: BxConfig,
    /// Present when this attempt is a resume: the worker issues
    /// `Range: bytes=requiredStartByte-` and verifies the validator.
    pub resume: Option<ResumeData>,
}
