//! HTTP Worker.
//!
//! Unifies single-stream transfer and HEAD-probe logic into one trait,
//! implemented once per `Task` kind.

pub mod context;
pub mod data;
pub mod destination;
pub mod download;
pub mod multipart;
pub mod outcome;
pub mod progress;
pub mod resume;
pub mod upload;

pub use context::{ByteProgress, WorkerContext};
pub use outcome::{ResponseInfo, WorkerOutcome};

/// Runs one attempt of a task and reports how it ended.
///
/// A "kind mismatch" (a `WorkerContext` built for the wrong `Task` variant)
/// is a programmer error in the dispatch layer, not something the caller
/// retries around; implementations return `WorkerOutcome::Failed` with
/// `TransferError::General` in that case.
#[async_trait::async_trait]
pub trait TaskWorker: Send + Sync {
    async fn run(&self, ctx: WorkerContext) -> WorkerOutcome;
}

/// Picks the worker implementation for a task's kind. The scheduler holds
/// one instance of each and looks it up per attempt rather than
/// constructing a fresh worker for every run.
///
/// `ParallelDownload` is deliberately absent: it never runs one attempt
/// through this trait directly, the coordinator in
/// [`crate::parallel_download`] drives its chunk children through
/// `DownloadWorker` itself.
pub fn worker_for(task: &crate::task::Task) -> &'static dyn TaskWorker {
    match task {
        crate::task::Task::Download(_) | crate::task::Task::UriDownload(_) => {
            &download::DownloadWorker
        }
        crate::task::Task::Upload(_) | crate::task::Task::UriUpload(_) => &upload::UploadWorker,
        crate::task::Task::MultipartUpload(_) => &multipart::MultipartWorker,
        crate::task::Task::Data(_) => &data::DataWorker,
        crate::task::Task::ParallelDownload(_) => unreachable!(
            "ParallelDownload is driven by the parallel download coordinator, not dispatched as one attempt"
        ),
    }
}
