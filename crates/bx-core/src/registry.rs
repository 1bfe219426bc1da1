//! In-memory lookup of live tasks by id.
//!
//! The registry is the source of truth for "is this taskId currently
//! live"; the persistent store is the source of truth for durable
//! record contents. The two are kept in step by the scheduler and update
//! pipeline: fast in-memory lookups here, durable records in the store.

use crate::task::{Task, TaskId};
use std::collections::HashMap;
use std::sync::RwLock;

#[derive(Debug, Clone, thiserror::Error)]
pub enum RegistryError {
    #[error("task id {0:?} is already live")]
    DuplicateTaskId(TaskId),
}

/// In-memory map of live (non-terminal) tasks.
#[derive(Default)]
pub struct TaskRegistry {
    tasks: RwLock<HashMap<TaskId, Task>>,
}

impl TaskRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a new live task. Fails if the invariant that `taskId` is
    /// unique across all live (non-terminal) tasks would be violated.
    pub fn insert(&self, task: Task) -> Result<(), RegistryError> {
        let mut map = self.tasks.write().unwrap();
        let id = task.task_id().to_string();
        if map.contains_key(&id) {
            return Err(RegistryError::DuplicateTaskId(id));
        }
        map.insert(id, task);
        Ok(())
    }

    pub fn get(&self, task_id: &str) -> Option<Task> {
        self.tasks.read().unwrap().get(task_id).cloned()
    }

    pub fn remove(&self, task_id: &str) -> Option<Task> {
        self.tasks.write().unwrap().remove(task_id)
    }

    pub fn contains(&self, task_id: &str) -> bool {
        self.tasks.read().unwrap().contains_key(task_id)
    }

    pub fn update(&self, task: Task) {
        let id = task.task_id().to_string();
        self.tasks.write().unwrap().insert(id, task);
    }

    /// All live tasks, optionally filtered to one group.
    pub fn all(&self, group: Option<&str>) -> Vec<Task> {
        self.tasks
            .read()
            .unwrap()
            .values()
            .filter(|t| group.map_or(true, |g| t.meta().group == g))
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.tasks.read().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::{BaseDirectory, Destination, DownloadTask, TaskMeta, SUGGEST_FILENAME};

    fn sample(id: &str, group: &str) -> Task {
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

    #[test]
    fn duplicate_id_rejected() {
        let reg = TaskRegistry::new();
        reg.insert(sample("a", "g1")).unwrap();
        assert!(matches!(
            reg.insert(sample("a", "g1")),
            Err(RegistryError::DuplicateTaskId(_))
        ));
    }

    #[test]
    fn filter_by_group() {
        let reg = TaskRegistry::new();
        reg.insert(sample("a", "g1")).unwrap();
        reg.insert(sample("b", "g2")).unwrap();
        assert_eq!(reg.all(Some("g1")).len(), 1);
        assert_eq!(reg.all(None).len(), 2);
    }

    #[test]
    fn remove_makes_id_reusable() {
        let reg = TaskRegistry::new();
        reg.insert(sample("a", "g1")).unwrap();
        reg.remove("a");
        assert!(reg.insert(sample("a", "g1")).is_ok());
    }
}
