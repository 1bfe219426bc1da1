//! Cooperative cancellation: shared stop tokens keyed by task id.
//!
//! Every running worker is registered with a token before its first byte of
//! I/O; the token is polled at each chunk boundary. A
//! [`StopReason`] distinguishes pause (keep the partial file, capture
//! [`crate::store::ResumeData`]) from cancel (delete it, unless the task is
//! pause-capable).

use std::collections::HashMap;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, RwLock};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    None,
    Pause,
    Cancel,
}

impl From<u8> for StopReason {
    fn from(v: u8) -> Self {
        match v {
            1 => StopReason::Pause,
            2 => StopReason::Cancel,
            _ => StopReason::None,
        }
    }
}

impl From<StopReason> for u8 {
    fn from(r: StopReason) -> Self {
        match r {
            StopReason::None => 0,
            StopReason::Pause => 1,
            StopReason::Cancel => 2,
        }
    }
}

/// Error type surfaced by a worker's I/O loop when it observes a stop token.
#[derive(Debug, Clone, Copy)]
pub struct TaskStopped(pub StopReason);

impl std::fmt::Display for TaskStopped {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.0 {
            StopReason::Pause => write!(f, "task paused"),
            StopReason::Cancel => write!(f, "task canceled"),
            StopReason::None => write!(f, "task stopped"),
        }
    }
}

impl std::error::Error for TaskStopped {}

/// A single task's stop token: an `AtomicU8` standing in for `StopReason`,
/// cheap to clone into a blocking worker thread.
#[derive(Clone)]
pub struct StopToken(Arc<AtomicU8>);

impl StopToken {
    fn new() -> Self {
        StopToken(Arc::new(AtomicU8::new(0)))
    }

    pub fn check(&self) -> Option<StopReason> {
        match StopReason::from(self.0.load(Ordering::Relaxed)) {
            StopReason::None => None,
            other => Some(other),
        }
    }

    fn set(&self, reason: StopReason) {
        self.0.store(reason.into(), Ordering::Relaxed);
    }
}

/// Shared registry of task id -> stop token, used by the scheduler to hand
/// a token to each running worker and by the client API (`pause`/`cancel`)
/// to signal it.
#[derive(Default)]
pub struct CancelRegistry {
    tokens: RwLock<HashMap<String, StopToken>>,
}

impl CancelRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a task about to run; returns the token to pass into its worker.
    pub fn register(&self, task_id: &str) -> StopToken {
        let token = StopToken::new();
        self.tokens
            .write()
            .unwrap()
            .insert(task_id.to_string(), token.clone());
        token
    }

    /// Unregister a task once its run has ended, success or failure.
    pub fn unregister(&self, task_id: &str) {
        self.tokens.write().unwrap().remove(task_id);
    }

    pub fn request_pause(&self, task_id: &str) -> bool {
        self.signal(task_id, StopReason::Pause)
    }

    pub fn request_cancel(&self, task_id: &str) -> bool {
        self.signal(task_id, StopReason::Cancel)
    }

    fn signal(&self, task_id: &str, reason: StopReason) -> bool {
        if let Some(token) = self.tokens.read().unwrap().get(task_id) {
            token.set(reason);
            true
        } else {
            false
        }
    }

    pub fn is_running(&self, task_id: &str) -> bool {
        self.tokens.read().unwrap().contains_key(task_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn register_then_pause_is_observed() {
        let reg = CancelRegistry::new();
        let token = reg.register("t1");
        assert!(token.check().is_none());
        assert!(reg.request_pause("t1"));
        assert_eq!(token.check(), Some(StopReason::Pause));
    }

    #[test]
    fn signal_on_unknown_task_is_noop() {
        let reg = CancelRegistry::new();
        assert!(!reg.request_cancel("missing"));
    }

    #[test]
    fn unregister_drops_signaling_ability() {
        let reg = CancelRegistry::new();
        reg.register("t1");
        reg.unregister("t1");
        assert!(!reg.request_cancel("t1"));
    }
}
