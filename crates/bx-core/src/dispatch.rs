//! Update Pipeline: produces, orders, and dispatches
//! `StatusUpdate`/`ProgressUpdate`s.
//!
//! A persist-then-notify pair covering any task's status/progress
//! update: each task's worker is the sole
//! writer for that task id, so the program order in which it calls
//! `emit_status`/`emit_progress` *is* the delivery order — no sequence
//! numbers needed within one process.

use crate::status::{ProgressUpdate, StatusUpdate, TaskStatus};
use crate::store::{Store, TaskRecord};
use crate::task::{Task, UpdatePreference};
use anyhow::Result;
use std::collections::{HashMap, HashSet};
use std::sync::RwLock;
use tokio::sync::mpsc;

/// One dispatched update, as seen by a listener.
#[derive(Debug, Clone)]
pub enum Update {
    Status(StatusUpdate),
    Progress(ProgressUpdate),
}

/// Which undelivered collection `popUndeliveredData` drains.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UndeliveredKind {
    Status,
    Progress,
}

/// Owns the listener registrations and routes every update either to a
/// listener or into the undelivered-updates store.
pub struct UpdateDispatcher {
    store: Store,
    tracked_groups: RwLock<HashSet<String>>,
    /// A single subscription stream, the alternative to per-group
    /// callbacks.
    global_listener: RwLock<Option<mpsc::UnboundedSender<Update>>>,
    group_listeners: RwLock<HashMap<String, mpsc::UnboundedSender<Update>>>,
}

impl UpdateDispatcher {
    pub fn new(store: Store) -> Self {
        UpdateDispatcher {
            store,
            tracked_groups: RwLock::new(HashSet::new()),
            global_listener: RwLock::new(None),
            group_listeners: RwLock::new(HashMap::new()),
        }
    }

    pub fn attach_listener(&self, tx: mpsc::UnboundedSender<Update>) {
        *self.global_listener.write().unwrap() = Some(tx);
    }

    pub fn detach_listener(&self) {
        *self.global_listener.write().unwrap() = None;
    }

    pub fn attach_group_listener(&self, group: impl Into<String>, tx: mpsc::UnboundedSender<Update>) {
        self.group_listeners.write().unwrap().insert(group.into(), tx);
    }

    pub fn detach_group_listener(&self, group: &str) {
        self.group_listeners.write().unwrap().remove(group);
    }

    /// Opts a group into TaskRecord persistence on every update (a
    /// *tracked group*).
    pub fn track_group(&self, group: impl Into<String>) {
        self.tracked_groups.write().unwrap().insert(group.into());
    }

    pub fn is_tracked(&self, group: &str) -> bool {
        self.tracked_groups.read().unwrap().contains(group)
    }

    fn has_listener(&self, group: &str) -> bool {
        self.global_listener.read().unwrap().is_some()
            || self.group_listeners.read().unwrap().contains_key(group)
    }

    fn send_to_listener(&self, group: &str, update: Update) -> bool {
        let mut delivered = false;
        if let Some(tx) = self.global_listener.read().unwrap().as_ref() {
            delivered = tx.send(update.clone()).is_ok();
        }
        if let Some(tx) = self.group_listeners.read().unwrap().get(group) {
            delivered = tx.send(update).is_ok() || delivered;
        }
        delivered
    }

    /// Emits a status update for `task`: per-task filtering by `updates`
    /// preference, tracked-group `TaskRecord` persistence, dispatch to a
    /// listener if attached, else persistence into the undelivered store.
    pub async fn emit_status(&self, task: &Task, update: StatusUpdate) -> Result<()> {
        let meta = task.meta();
        if self.is_tracked(&meta.group) {
            self.upsert_record_from_status(task, &update).await?;
        }
        if !meta.updates.wants_status() {
            return Ok(());
        }
        if self.has_listener(&meta.group) {
            self.send_to_listener(&meta.group, Update::Status(update));
        } else {
            self.store.push_undelivered_status(&update).await?;
        }
        Ok(())
    }

    /// Emits a progress update, following the same rules as `emit_status`.
    pub async fn emit_progress(&self, task: &Task, update: ProgressUpdate) -> Result<()> {
        let meta = task.meta();
        if self.is_tracked(&meta.group) {
            self.upsert_record_from_progress(task, &update).await?;
        }
        if !meta.updates.wants_progress() {
            return Ok(());
        }
        if self.has_listener(&meta.group) {
            self.send_to_listener(&meta.group, Update::Progress(update));
        } else {
            self.store.push_undelivered_progress(&update).await?;
        }
        Ok(())
    }

    async fn upsert_record_from_status(&self, task: &Task, update: &StatusUpdate) -> Result<()> {
        let mut record = self
            .store
            .get_task_record(task.task_id())
            .await?
            .unwrap_or_else(|| TaskRecord {
                task: task.clone(),
                status: update.status,
                progress: 0.0,
                expected_file_size: None,
                exception: None,
            });
        record.task = task.clone();
        record.status = update.status;
        record.progress = progress_for_status(update.status);
        record.exception = update.exception.clone();
        self.store.put_task_record(task.task_id(), &record).await
    }

    async fn upsert_record_from_progress(&self, task: &Task, update: &ProgressUpdate) -> Result<()> {
        let mut record = self
            .store
            .get_task_record(task.task_id())
            .await?
            .unwrap_or_else(|| TaskRecord {
                task: task.clone(),
                status: TaskStatus::Running,
                progress: update.progress,
                expected_file_size: update.expected_file_size,
                exception: None,
            });
        record.task = task.clone();
        record.progress = update.progress;
        if update.expected_file_size.is_some() {
            record.expected_file_size = update.expected_file_size;
        }
        self.store.put_task_record(task.task_id(), &record).await
    }

    /// Drains the requested undelivered collection, keyed by task id.
    pub async fn pop_undelivered(&self, kind: UndeliveredKind) -> Result<HashMap<String, Vec<Update>>> {
        match kind {
            UndeliveredKind::Status => {
                let map = self.store.pop_undelivered_status().await?;
                Ok(map
                    .into_iter()
                    .map(|(k, v)| (k, v.into_iter().map(Update::Status).collect()))
                    .collect())
            }
            UndeliveredKind::Progress => {
                let map = self.store.pop_undelivered_progress().await?;
                Ok(map
                    .into_iter()
                    .map(|(k, v)| (k, v.into_iter().map(Update::Progress).collect()))
                    .collect())
            }
        }
    }
}

/// Unknown status -> progress mapping for tracked-group `TaskRecord`s:
/// enqueued/running -> 0.0; complete -> 1.0; other terminals use
/// their sentinel.
fn progress_for_status(status: TaskStatus) -> f64 {
    match status {
        TaskStatus::Enqueued | TaskStatus::Running => 0.0,
        other => other.progress_sentinel().unwrap_or(0.0),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::{BaseDirectory, Destination, DownloadTask, TaskMeta, SUGGEST_FILENAME};

    fn sample_task(id: &str, group: &str) -> Task {
        let mut meta = TaskMeta::new(id, "https://example.com/f");
        meta.group = group.to_string();
        Task::Download(DownloadTask {
            meta,
            destination: Destination {
                base_directory: BaseDirectory::Temporary,
                sub_directory: String::new(),
                filename: SUGGEST_FILENAME.to_string(),
            },
        })
    }

    #[tokio::test]
    async fn untracked_group_leaves_no_task_record() {
        let store = Store::connect_in_memory().await.unwrap();
        let dispatcher = UpdateDispatcher::new(store.clone());
        let task = sample_task("t1", "default");
        dispatcher
            .emit_status(&task, StatusUpdate::simple("t1", TaskStatus::Running))
            .await
            .unwrap();
        assert!(store.get_task_record("t1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn tracked_group_persists_record_with_sentinel_progress() {
        let store = Store::connect_in_memory().await.unwrap();
        let dispatcher = UpdateDispatcher::new(store.clone());
        dispatcher.track_group("tracked");
        let task = sample_task("t2", "tracked");
        dispatcher
            .emit_status(&task, StatusUpdate::simple("t2", TaskStatus::Failed))
            .await
            .unwrap();
        let record = store.get_task_record("t2").await.unwrap().unwrap();
        assert_eq!(record.status, TaskStatus::Failed);
        assert_eq!(record.progress, -1.0);
    }

    #[tokio::test]
    async fn no_listener_persists_undelivered() {
        let store = Store::connect_in_memory().await.unwrap();
        let dispatcher = UpdateDispatcher::new(store.clone());
        let task = sample_task("t3", "default");
        dispatcher
            .emit_status(&task, StatusUpdate::simple("t3", TaskStatus::Complete))
            .await
            .unwrap();
        let popped = dispatcher.pop_undelivered(UndeliveredKind::Status).await.unwrap();
        assert_eq!(popped.len(), 1);
    }

    #[tokio::test]
    async fn listener_attached_skips_undelivered_store() {
        let store = Store::connect_in_memory().await.unwrap();
        let dispatcher = UpdateDispatcher::new(store.clone());
        let (tx, mut rx) = mpsc::unbounded_channel();
        dispatcher.attach_listener(tx);
        let task = sample_task("t4", "default");
        dispatcher
            .emit_status(&task, StatusUpdate::simple("t4", TaskStatus::Complete))
            .await
            .unwrap();
        assert!(rx.try_recv().is_ok());
        let popped = dispatcher.pop_undelivered(UndeliveredKind::Status).await.unwrap();
        assert!(popped.is_empty());
    }

    #[tokio::test]
    async fn updates_none_preference_suppresses_status_and_progress() {
        let store = Store::connect_in_memory().await.unwrap();
        let dispatcher = UpdateDispatcher::new(store.clone());
        let mut task = sample_task("t5", "default");
        task.meta_mut().updates = UpdatePreference::None;
        dispatcher
            .emit_status(&task, StatusUpdate::simple("t5", TaskStatus::Running))
            .await
            .unwrap();
        let popped = dispatcher.pop_undelivered(UndeliveredKind::Status).await.unwrap();
        assert!(popped.is_empty());
    }
}
