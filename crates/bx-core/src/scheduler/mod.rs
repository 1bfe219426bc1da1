//! Admission control shared across the engine.
//!
//! The actual per-task transfer pipeline lives in [`crate::worker`]; this
//! module holds the holding queue that arbitrates concurrency across tasks.

pub mod queue;

pub use queue::{HoldingQueue, QueueCaps};
