//! Task status, progress sentinels, and the ranking used to aggregate a
//! `ParallelDownloadTask`'s children into one parent status.

use crate::error::TransferError;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TaskStatus {
    Enqueued,
    Running,
    Complete,
    Failed,
    NotFound,
    Canceled,
    Paused,
    WaitingToRetry,
}

impl TaskStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            TaskStatus::Complete | TaskStatus::Failed | TaskStatus::NotFound | TaskStatus::Canceled
        )
    }

    /// Progress sentinel associated with a status that isn't a plain
    /// `[0,1]` fraction.
    pub fn progress_sentinel(self) -> Option<f64> {
        match self {
            TaskStatus::Complete => Some(1.0),
            TaskStatus::Failed => Some(-1.0),
            TaskStatus::Canceled => Some(-2.0),
            TaskStatus::NotFound => Some(-3.0),
            TaskStatus::WaitingToRetry => Some(-4.0),
            TaskStatus::Paused => Some(-5.0),
            TaskStatus::Enqueued | TaskStatus::Running => None,
        }
    }

    /// Rank used for parallel-download parent status aggregation: lower
    /// rank wins. `complete > paused > running > enqueued > waitingToRetry
    /// > failed > notFound > canceled`.
    fn rank(self) -> u8 {
        match self {
            TaskStatus::Complete => 0,
            TaskStatus::Paused => 1,
            TaskStatus::Running => 2,
            TaskStatus::Enqueued => 3,
            TaskStatus::WaitingToRetry => 4,
            TaskStatus::Failed => 5,
            TaskStatus::NotFound => 6,
            TaskStatus::Canceled => 7,
        }
    }

    /// Given the statuses of all chunks of a parallel download, returns the
    /// lowest-ranking (i.e. "worst", per the documented ordering) status.
    pub fn aggregate(children: impl IntoIterator<Item = TaskStatus>) -> Option<TaskStatus> {
        children.into_iter().max_by_key(|s| s.rank())
    }
}

/// `StatusUpdate(task, status, exception?, responseCode?, responseHeaders?,
/// responseBody?, mimeType?, charset?)`.
#[derive(Debug, Clone)]
pub struct StatusUpdate {
    pub task_id: String,
    pub status: TaskStatus,
    pub exception: Option<TransferError>,
    pub response_code: Option<u16>,
    pub response_headers: Option<Vec<(String, String)>>,
    pub response_body: Option<Vec<u8>>,
    pub mime_type: Option<String>,
    pub charset: Option<String>,
}

impl StatusUpdate {
    pub fn simple(task_id: impl Into<String>, status: TaskStatus) -> Self {
        StatusUpdate {
            task_id: task_id.into(),
            status,
            exception: None,
            response_code: None,
            response_headers: None,
            response_body: None,
            mime_type: None,
            charset: None,
        }
    }

    pub fn failed(task_id: impl Into<String>, status: TaskStatus, err: TransferError) -> Self {
        StatusUpdate {
            task_id: task_id.into(),
            status,
            exception: Some(err),
            response_code: None,
            response_headers: None,
            response_body: None,
            mime_type: None,
            charset: None,
        }
    }
}

/// `ProgressUpdate(task, progress, expectedFileSize?, networkSpeed?,
/// timeRemaining?)`.
#[derive(Debug, Clone)]
pub struct ProgressUpdate {
    pub task_id: String,
    pub progress: f64,
    pub expected_file_size: Option<i64>,
    /// Bytes/second over a trailing window.
    pub network_speed: Option<f64>,
    /// Seconds, derived from `expected_file_size / network_speed`.
    pub time_remaining: Option<f64>,
}

impl ProgressUpdate {
    /// Maps a status to its canonical progress value when no finer-grained
    /// fractional progress is available.
    pub fn for_status(task_id: impl Into<String>, status: TaskStatus) -> Self {
        let progress = match status {
            TaskStatus::Enqueued | TaskStatus::Running => 0.0,
            other => other.progress_sentinel().unwrap_or(0.0),
        };
        ProgressUpdate {
            task_id: task_id.into(),
            progress,
            expected_file_size: None,
            network_speed: None,
            time_remaining: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sentinels_match_spec() {
        assert_eq!(TaskStatus::Complete.progress_sentinel(), Some(1.0));
        assert_eq!(TaskStatus::Failed.progress_sentinel(), Some(-1.0));
        assert_eq!(TaskStatus::Canceled.progress_sentinel(), Some(-2.0));
        assert_eq!(TaskStatus::NotFound.progress_sentinel(), Some(-3.0));
        assert_eq!(TaskStatus::WaitingToRetry.progress_sentinel(), Some(-4.0));
        assert_eq!(TaskStatus::Paused.progress_sentinel(), Some(-5.0));
        assert_eq!(TaskStatus::Running.progress_sentinel(), None);
    }

    #[test]
    fn aggregate_prefers_complete_over_failed() {
        let statuses = [TaskStatus::Complete, TaskStatus::Failed, TaskStatus::Running];
        assert_eq!(TaskStatus::aggregate(statuses), Some(TaskStatus::Failed));
    }

    #[test]
    fn aggregate_picks_the_lower_ranking_of_paused_and_running() {
        // complete > paused > running > ... so running outranks paused in
        // severity; a parent with one running and one paused chunk is not
        // yet fully paused.
        let statuses = [TaskStatus::Running, TaskStatus::Paused];
        assert_eq!(TaskStatus::aggregate(statuses), Some(TaskStatus::Running));
    }

    #[test]
    fn terminal_set_matches_spec() {
        assert!(TaskStatus::Complete.is_terminal());
        assert!(TaskStatus::Failed.is_terminal());
        assert!(TaskStatus::NotFound.is_terminal());
        assert!(TaskStatus::Canceled.is_terminal());
        assert!(!TaskStatus::Paused.is_terminal());
        assert!(!TaskStatus::WaitingToRetry.is_terminal());
    }
}
