//! Row types for the persistent store's named collections.

use crate::error::TransferError;
use crate::task::Task;
use serde::{Deserialize, Serialize};

/// `(task, status, progress, expectedFileSize, exception?)` — created on the
/// first update for a *tracked* group, updated on every subsequent
/// status/progress update, and surviving process restarts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskRecord {
    pub task: Task,
    pub status: crate::status::TaskStatus,
    pub progress: f64,
    pub expected_file_size: Option<i64>,
    pub exception: Option<TransferError>,
}

/// The validator captured alongside a paused or retryable-failed download's
/// temp file. Mirrors `safe_resume::StoredValidator` but this is
/// the durable form written to the `resume_data` collection.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Validator {
    pub etag: Option<String>,
    pub last_modified: Option<String>,
    pub size: Option<i64>,
}

impl From<Validator> for crate::safe_resume::StoredValidator {
    fn from(v: Validator) -> Self {
        crate::safe_resume::StoredValidator {
            etag: v.etag,
            last_modified: v.last_modified,
            size: v.size,
        }
    }
}

/// `(taskId, data, requiredStartByte, validator)`. `data` is the
/// temp-file path for downloads.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResumeData {
    pub task_id: String,
    pub data: String,
    pub required_start_byte: i64,
    pub validator: Validator,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SerializedStatusUpdate {
    pub status: crate::status::TaskStatus,
    pub exception: Option<TransferError>,
    pub response_code: Option<u16>,
    pub response_headers: Option<Vec<(String, String)>>,
    pub response_body: Option<Vec<u8>>,
    pub mime_type: Option<String>,
    pub charset: Option<String>,
}

impl From<&crate::status::StatusUpdate> for SerializedStatusUpdate {
    fn from(u: &crate::status::StatusUpdate) -> Self {
        SerializedStatusUpdate {
            status: u.status,
            exception: u.exception.clone(),
            response_code: u.response_code,
            response_headers: u.response_headers.clone(),
            response_body: u.response_body.clone(),
            mime_type: u.mime_type.clone(),
            charset: u.charset.clone(),
        }
    }
}

impl SerializedStatusUpdate {
    pub fn into_update(self, task_id: String) -> crate::status::StatusUpdate {
        crate::status::StatusUpdate {
            task_id,
            status: self.status,
            exception: self.exception,
            response_code: self.response_code,
            response_headers: self.response_headers,
            response_body: self.response_body,
            mime_type: self.mime_type,
            charset: self.charset,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SerializedProgressUpdate {
    pub progress: f64,
    pub expected_file_size: Option<i64>,
    pub network_speed: Option<f64>,
    pub time_remaining: Option<f64>,
}

impl From<&crate::status::ProgressUpdate> for SerializedProgressUpdate {
    fn from(u: &crate::status::ProgressUpdate) -> Self {
        SerializedProgressUpdate {
            progress: u.progress,
            expected_file_size: u.expected_file_size,
            network_speed: u.network_speed,
            time_remaining: u.time_remaining,
        }
    }
}

impl SerializedProgressUpdate {
    pub fn into_update(self, task_id: String) -> crate::status::ProgressUpdate {
        crate::status::ProgressUpdate {
            task_id,
            progress: self.progress,
            expected_file_size: self.expected_file_size,
            network_speed: self.network_speed,
            time_remaining: self.time_remaining,
        }
    }
}
