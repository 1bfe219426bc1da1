//! Task model: the sum type clients enqueue and the engine schedules.
//!
//! Shared fields live in [`TaskMeta`] and are embedded by composition in
//! every variant of [`Task`], rather than modeled as a base class — see
//! DESIGN.md for why.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::hash::{Hash, Hasher};
use std::time::{SystemTime, UNIX_EPOCH};

/// How eagerly the client wants to hear about a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum UpdatePreference {
    None,
    Status,
    Progress,
    StatusAndProgress,
}

impl Default for UpdatePreference {
    fn default() -> Self {
        UpdatePreference::StatusAndProgress
    }
}

impl UpdatePreference {
    pub fn wants_status(self) -> bool {
        matches!(self, UpdatePreference::Status | UpdatePreference::StatusAndProgress)
    }

    pub fn wants_progress(self) -> bool {
        matches!(self, UpdatePreference::Progress | UpdatePreference::StatusAndProgress)
    }
}

/// Platform-neutral stand-in for the base-directory enum named in the
/// source ecosystem (application support / temporary / documents /
/// external storage). This crate resolves each to a directory under the
/// XDG state/home tree; see `worker::destination::resolve_base_directory`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BaseDirectory {
    ApplicationSupport,
    Temporary,
    Documents,
    ExternalStorage,
}

/// Sentinel filename value meaning "derive it from the response".
pub const SUGGEST_FILENAME: &str = "suggest";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Destination {
    pub base_directory: BaseDirectory,
    pub sub_directory: String,
    /// May be [`SUGGEST_FILENAME`].
    pub filename: String,
}

impl Destination {
    pub fn wants_suggested_filename(&self) -> bool {
        self.filename == SUGGEST_FILENAME
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum HttpMethod {
    Get,
    Post,
    Put,
    Patch,
    Delete,
    Head,
}

impl HttpMethod {
    pub fn as_str(self) -> &'static str {
        match self {
            HttpMethod::Get => "GET",
            HttpMethod::Post => "POST",
            HttpMethod::Put => "PUT",
            HttpMethod::Patch => "PATCH",
            HttpMethod::Delete => "DELETE",
            HttpMethod::Head => "HEAD",
        }
    }
}

/// A request body. Never populated on a task with `allow_pause = true`:
/// pause-capable tasks are GET-shaped.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum TaskBody {
    Empty,
    Text(String),
    Bytes(Vec<u8>),
    Json(serde_json::Value),
}

impl TaskBody {
    pub fn is_empty(&self) -> bool {
        matches!(self, TaskBody::Empty)
            || matches!(self, TaskBody::Text(s) if s.is_empty())
            || matches!(self, TaskBody::Bytes(b) if b.is_empty())
    }
}

impl Default for TaskBody {
    fn default() -> Self {
        TaskBody::Empty
    }
}

/// Case-insensitive-on-lookup, order-preserving header map.
///
/// Plain `BTreeMap<String,String>` keyed by a lowercased header name would
/// lose the client's original casing on the wire; this keeps the original
/// key and lowercases only for comparisons, matching the trade `fetch_head`
/// makes when scanning response headers.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Headers(pub Vec<(String, String)>);

impl Headers {
    pub fn new() -> Self {
        Headers(Vec::new())
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.0
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn set(&mut self, name: &str, value: impl Into<String>) {
        if let Some(entry) = self.0.iter_mut().find(|(k, _)| k.eq_ignore_ascii_case(name)) {
            entry.1 = value.into();
        } else {
            self.0.push((name.to_string(), value.into()));
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = &(String, String)> {
        self.0.iter()
    }
}

/// Identifier a client chooses (or the engine generates) for a task.
pub type TaskId = String;

/// Fields shared by every task variant.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskMeta {
    pub task_id: TaskId,
    pub url: String,
    pub headers: Headers,
    pub http_method: HttpMethod,
    pub body: TaskBody,
    pub group: String,
    pub updates: UpdatePreference,
    pub retries: u32,
    pub retries_remaining: u32,
    pub requires_wifi: bool,
    pub allow_pause: bool,
    pub priority: u8,
    pub meta_data: String,
    pub display_name: String,
    pub creation_time: i64,
}

impl TaskMeta {
    pub fn new(task_id: impl Into<String>, url: impl Into<String>) -> Self {
        TaskMeta {
            task_id: task_id.into(),
            url: url.into(),
            headers: Headers::new(),
            http_method: HttpMethod::Get,
            body: TaskBody::Empty,
            group: "default".to_string(),
            updates: UpdatePreference::default(),
            retries: 0,
            retries_remaining: 0,
            requires_wifi: false,
            allow_pause: false,
            priority: 5,
            meta_data: String::new(),
            display_name: String::new(),
            creation_time: 0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DownloadTask {
    pub meta: TaskMeta,
    pub destination: Destination,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParallelDownloadTask {
    pub meta: TaskMeta,
    pub destination: Destination,
    pub chunks: u32,
    pub mirror_urls: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadTask {
    pub meta: TaskMeta,
    pub source_path: String,
    pub file_field: String,
    pub mime_type: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MultipartFilePart {
    pub field: String,
    pub path: String,
    pub mime_type: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MultipartUploadTask {
    pub meta: TaskMeta,
    pub files: Vec<MultipartFilePart>,
    pub fields: Vec<(String, String)>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UriDownloadTask {
    pub meta: TaskMeta,
    pub destination_uri: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UriUploadTask {
    pub meta: TaskMeta,
    pub source_uri: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DataTask {
    pub meta: TaskMeta,
}

/// The task sum type. Dispatch by kind rather than inheritance: a tagged
/// variant per kind, not a deep inheritance hierarchy.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum Task {
    Download(DownloadTask),
    ParallelDownload(ParallelDownloadTask),
    Upload(UploadTask),
    MultipartUpload(MultipartUploadTask),
    UriDownload(UriDownloadTask),
    UriUpload(UriUploadTask),
    Data(DataTask),
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum TaskValidationError {
    #[error("allow_pause requires an empty request body")]
    PauseRequiresEmptyBody,
    #[error("malformed url: {0}")]
    MalformedUrl(String),
}

impl Task {
    pub fn meta(&self) -> &TaskMeta {
        match self {
            Task::Download(t) => &t.meta,
            Task::ParallelDownload(t) => &t.meta,
            Task::Upload(t) => &t.meta,
            Task::MultipartUpload(t) => &t.meta,
            Task::UriDownload(t) => &t.meta,
            Task::UriUpload(t) => &t.meta,
            Task::Data(t) => &t.meta,
        }
    }

    pub fn meta_mut(&mut self) -> &mut TaskMeta {
        match self {
            Task::Download(t) => &mut t.meta,
            Task::ParallelDownload(t) => &mut t.meta,
            Task::Upload(t) => &mut t.meta,
            Task::MultipartUpload(t) => &mut t.meta,
            Task::UriDownload(t) => &mut t.meta,
            Task::UriUpload(t) => &mut t.meta,
            Task::Data(t) => &mut t.meta,
        }
    }

    pub fn task_id(&self) -> &str {
        &self.meta().task_id
    }

    pub fn is_pause_capable(&self) -> bool {
        self.meta().allow_pause
    }

    pub fn host(&self) -> Option<String> {
        url::Url::parse(&self.meta().url)
            .ok()
            .and_then(|u| u.host_str().map(|h| h.to_string()))
    }

    /// Invariants checked at construction time, before the task ever
    /// reaches the registry or scheduler.
    pub fn validate(&self) -> Result<(), TaskValidationError> {
        let meta = self.meta();
        if url::Url::parse(&meta.url).is_err() {
            return Err(TaskValidationError::MalformedUrl(meta.url.clone()));
        }
        if meta.allow_pause && !meta.body.is_empty() {
            return Err(TaskValidationError::PauseRequiresEmptyBody);
        }
        Ok(())
    }

    /// Normalizes `retries`/`priority` into their documented ranges and
    /// stamps `creation_time`/`retries_remaining` for a freshly built task.
    pub fn finalize_for_enqueue(&mut self) {
        let meta = self.meta_mut();
        meta.retries = meta.retries.min(10);
        meta.priority = meta.priority.min(10);
        meta.retries_remaining = meta.retries;
        meta.creation_time = unix_timestamp_millis();
    }

    /// A stable hash of the request shape, used for dedup diagnostics and
    /// in tests. Uses a normalize-then-hash idiom applied to the whole
    /// request instead of just the host.
    pub fn fingerprint(&self) -> u64 {
        use std::collections::hash_map::DefaultHasher;
        let meta = self.meta();
        let mut hasher = DefaultHasher::new();
        meta.url.hash(&mut hasher);
        meta.http_method.as_str().hash(&mut hasher);
        let mut sorted: BTreeMap<&str, &str> = BTreeMap::new();
        for (k, v) in meta.headers.iter() {
            sorted.insert(k.as_str(), v.as_str());
        }
        for (k, v) in sorted {
            k.hash(&mut hasher);
            v.hash(&mut hasher);
        }
        match &meta.body {
            TaskBody::Empty => 0u8.hash(&mut hasher),
            TaskBody::Text(s) => s.hash(&mut hasher),
            TaskBody::Bytes(b) => b.hash(&mut hasher),
            TaskBody::Json(v) => v.to_string().hash(&mut hasher),
        }
        hasher.finish()
    }
}

fn unix_timestamp_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as i64
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_download(id: &str) -> Task {
        Task::Download(DownloadTask {
            meta: TaskMeta::new(id, "https://example.com/file.bin"),
            destination: Destination {
                base_directory: BaseDirectory::Temporary,
                sub_directory: String::new(),
                filename: SUGGEST_FILENAME.to_string(),
            },
        })
    }

    #[test]
    fn pause_requires_empty_body() {
        let mut t = sample_download("t1");
        t.meta_mut().allow_pause = true;
        t.meta_mut().body = TaskBody::Text("x".to_string());
        assert!(matches!(
            t.validate(),
            Err(TaskValidationError::PauseRequiresEmptyBody)
        ));

        t.meta_mut().body = TaskBody::Empty;
        assert!(t.validate().is_ok());
    }

    #[test]
    fn malformed_url_rejected() {
        let mut t = sample_download("t2");
        t.meta_mut().url = "not a url".to_string();
        assert!(matches!(t.validate(), Err(TaskValidationError::MalformedUrl(_))));
    }

    #[test]
    fn finalize_clamps_and_stamps() {
        let mut t = sample_download("t3");
        t.meta_mut().retries = 99;
        t.meta_mut().priority = 99;
        t.finalize_for_enqueue();
        assert_eq!(t.meta().retries, 10);
        assert_eq!(t.meta().retries_remaining, 10);
        assert_eq!(t.meta().priority, 10);
        assert!(t.meta().creation_time > 0);
    }

    #[test]
    fn fingerprint_stable_and_sensitive() {
        let a = sample_download("same-id-irrelevant-a");
        let mut b = sample_download("same-id-irrelevant-b");
        assert_eq!(a.fingerprint(), b.fingerprint());
        b.meta_mut().url = "https://example.com/other.bin".to_string();
        assert_ne!(a.fingerprint(), b.fingerprint());
    }

    #[test]
    fn headers_lookup_is_case_insensitive() {
        let mut h = Headers::new();
        h.set("Content-Type", "application/json");
        assert_eq!(h.get("content-type"), Some("application/json"));
        h.set("content-type", "text/plain");
        assert_eq!(h.0.len(), 1);
        assert_eq!(h.get("Content-Type"), Some("text/plain"));
    }
}
