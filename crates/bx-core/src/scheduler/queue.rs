//! Holding Queue / Scheduler: admission control across three independent
//! concurrency caps — global, per-host, per-group — plus a
//! priority/creation-time ordered waiting list.
//!
//! A task is admitted only if all three caps would remain satisfied,
//! reserving from all three atomically (or from none, on a waiting-list
//! append).
//!
//! `0` on any cap means that dimension is unlimited.

use crate::task::{Task, TaskId};
use std::collections::HashMap;
use std::sync::Mutex;

/// The three concurrency caps checked on admission.
#[derive(Debug, Clone, Copy)]
pub struct QueueCaps {
    pub max_concurrent: usize,
    pub max_concurrent_by_host: usize,
    pub max_concurrent_by_group: usize,
}

impl From<&crate::config::BxConfig> for QueueCaps {
    fn from(cfg: &crate::config::BxConfig) -> Self {
        QueueCaps {
            max_concurrent: cfg.max_concurrent,
            max_concurrent_by_host: cfg.max_concurrent_by_host,
            max_concurrent_by_group: cfg.max_concurrent_by_group,
        }
    }
}

#[derive(Default)]
struct Counts {
    global: usize,
    by_host: HashMap<String, usize>,
    by_group: HashMap<String, usize>,
}

/// Admission-controlled waiting list plus the running reservation counts it
/// is checked against. One instance shared by the whole engine.
pub struct HoldingQueue {
    caps: Mutex<QueueCaps>,
    waiting: Mutex<Vec<Task>>,
    running: Mutex<Counts>,
}

impl HoldingQueue {
    pub fn new(caps: QueueCaps) -> Self {
        HoldingQueue {
            caps: Mutex::new(caps),
            waiting: Mutex::new(Vec::new()),
            running: Mutex::new(Counts::default()),
        }
    }

    pub fn set_caps(&self, caps: QueueCaps) {
        *self.caps.lock().unwrap() = caps;
    }

    pub fn caps(&self) -> QueueCaps {
        *self.caps.lock().unwrap()
    }

    /// Attempts immediate admission. Returns `true` and reserves a slot on
    /// all three dimensions if the task fits; otherwise appends it to the
    /// ordered waiting list and returns `false`.
    pub fn try_admit(&self, task: &Task) -> bool {
        let caps = self.caps();
        let host = task.host();
        let group = task.meta().group.clone();
        let mut running = self.running.lock().unwrap();
        if fits(&running, &caps, host.as_deref(), &group) {
            reserve(&mut running, host.as_deref(), &group);
            true
        } else {
            drop(running);
            self.push_waiting(task.clone());
            false
        }
    }

    fn push_waiting(&self, task: Task) {
        let mut waiting = self.waiting.lock().unwrap();
        waiting.push(task);
        // Primary key priority ascending (0 first), secondary creation_time
        // ascending.
        waiting.sort_by(|a, b| {
            a.meta()
                .priority
                .cmp(&b.meta().priority)
                .then(a.meta().creation_time.cmp(&b.meta().creation_time))
        });
    }

    /// Releases the reservation held by `task` (it left `running` terminal
    /// or paused) and admits the first waiting task that now fits, if any.
    /// Caller is responsible for starting whatever task is returned.
    pub fn release(&self, task: &Task) -> Option<Task> {
        let host = task.host();
        let group = task.meta().group.clone();
        let mut running = self.running.lock().unwrap();
        running.global = running.global.saturating_sub(1);
        if let Some(h) = &host {
            if let Some(c) = running.by_host.get_mut(h.as_str()) {
                *c = c.saturating_sub(1);
            }
        }
        if let Some(c) = running.by_group.get_mut(&group) {
            *c = c.saturating_sub(1);
        }
        self.admit_next(&mut running)
    }

    /// Re-evaluates the waiting list without releasing anything — used
    /// after a cap change widens availability, or whenever a task enters a
    /// terminal state or is paused.
    pub fn admit_any_fitting(&self) -> Vec<Task> {
        let mut running = self.running.lock().unwrap();
        let mut admitted = Vec::new();
        while let Some(task) = self.admit_next(&mut running) {
            admitted.push(task);
        }
        admitted
    }

    fn admit_next(&self, running: &mut Counts) -> Option<Task> {
        let caps = self.caps();
        let mut waiting = self.waiting.lock().unwrap();
        let idx = waiting
            .iter()
            .position(|t| fits(running, &caps, t.host().as_deref(), &t.meta().group))?;
        let task = waiting.remove(idx);
        reserve(running, task.host().as_deref(), &task.meta().group);
        Some(task)
    }

    /// Removes a still-waiting task by id, e.g. for `cancelTasksWithIds`.
    pub fn remove_waiting(&self, task_id: &str) -> Option<Task> {
        let mut waiting = self.waiting.lock().unwrap();
        let idx = waiting.iter().position(|t| t.task_id() == task_id)?;
        Some(waiting.remove(idx))
    }

    /// Removes every waiting task belonging to `group`.
    pub fn remove_waiting_in_group(&self, group: &str) -> Vec<Task> {
        let mut waiting = self.waiting.lock().unwrap();
        let (removed, kept): (Vec<Task>, Vec<Task>) =
            waiting.drain(..).partition(|t| t.meta().group == group);
        *waiting = kept;
        removed
    }

    pub fn waiting_tasks(&self) -> Vec<Task> {
        self.waiting.lock().unwrap().clone()
    }

    pub fn running_global(&self) -> usize {
        self.running.lock().unwrap().global
    }

    pub fn contains_waiting(&self, task_id: &TaskId) -> bool {
        self.waiting.lock().unwrap().iter().any(|t| t.task_id() == task_id)
    }
}

fn fits(running: &Counts, caps: &QueueCaps, host: Option<&str>, group: &str) -> bool {
    if caps.max_concurrent != 0 && running.global >= caps.max_concurrent {
        return false;
    }
    if caps.max_concurrent_by_host != 0 {
        if let Some(h) = host {
            if *running.by_host.get(h).unwrap_or(&0) >= caps.max_concurrent_by_host {
                return false;
            }
        }
    }
    if caps.max_concurrent_by_group != 0
        && *running.by_group.get(group).unwrap_or(&0) >= caps.max_concurrent_by_group
    {
        return false;
    }
    true
}

fn reserve(running: &mut Counts, host: Option<&str>, group: &str) {
    running.global += 1;
    if let Some(h) = host {
        *running.by_host.entry(h.to_string()).or_insert(0) += 1;
    }
    *running.by_group.entry(group.to_string()).or_insert(0) += 1;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::{BaseDirectory, Destination, DownloadTask, TaskMeta, SUGGEST_FILENAME};

    fn task_with(id: &str, group: &str, priority: u8, creation_time: i64) -> Task {
        let mut meta = TaskMeta::new(id, "https://example.com/f");
        meta.group = group.to_string();
        meta.priority = priority;
        meta.creation_time = creation_time;
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
    fn admits_up_to_global_cap_then_waits() {
        let q = HoldingQueue::new(QueueCaps {
            max_concurrent: 2,
            max_concurrent_by_host: 0,
            max_concurrent_by_group: 0,
        });
        assert!(q.try_admit(&task_with("a", "g", 5, 0)));
        assert!(q.try_admit(&task_with("b", "g", 5, 1)));
        assert!(!q.try_admit(&task_with("c", "g", 5, 2)));
        assert_eq!(q.running_global(), 2);
        assert_eq!(q.waiting_tasks().len(), 1);
    }

    #[test]
    fn release_admits_next_waiting_by_priority_then_creation_time() {
        let q = HoldingQueue::new(QueueCaps {
            max_concurrent: 1,
            max_concurrent_by_host: 0,
            max_concurrent_by_group: 0,
        });
        let a = task_with("a", "g", 5, 0);
        assert!(q.try_admit(&a));
        assert!(!q.try_admit(&task_with("b", "g", 9, 1)));
        assert!(!q.try_admit(&task_with("c", "g", 1, 2)));
        // c has higher priority (lower number) than b, so it's admitted first.
        let next = q.release(&a).expect("a waiting task should be admitted");
        assert_eq!(next.task_id(), "c");
    }

    #[test]
    fn per_group_cap_is_independent_of_global() {
        let q = HoldingQueue::new(QueueCaps {
            max_concurrent: 10,
            max_concurrent_by_host: 0,
            max_concurrent_by_group: 1,
        });
        assert!(q.try_admit(&task_with("a", "g1", 5, 0)));
        assert!(!q.try_admit(&task_with("b", "g1", 5, 1)));
        assert!(q.try_admit(&task_with("c", "g2", 5, 2)));
    }

    #[test]
    fn per_host_cap_applies_across_groups() {
        let q = HoldingQueue::new(QueueCaps {
            max_concurrent: 10,
            max_concurrent_by_host: 1,
            max_concurrent_by_group: 0,
        });
        assert!(q.try_admit(&task_with("a", "g1", 5, 0)));
        assert!(!q.try_admit(&task_with("b", "g2", 5, 1)));
    }

    #[test]
    fn remove_waiting_by_id() {
        let q = HoldingQueue::new(QueueCaps {
            max_concurrent: 0,
            max_concurrent_by_host: 0,
            max_concurrent_by_group: 1,
        });
        assert!(q.try_admit(&task_with("a", "g", 5, 0)));
        assert!(!q.try_admit(&task_with("b", "g", 5, 1)));
        let removed = q.remove_waiting("b");
        assert!(removed.is_some());
        assert!(q.waiting_tasks().is_empty());
    }
}
