//! Range math and segment planning.
//!
//! Splits a download into N segments and computes HTTP Range header bounds.
//! Per-chunk resume state itself is tracked by `parallel_download`'s own
//! `ChunkResume` list, not by anything in this module.

mod range;

pub use range::{plan_segments, Segment};
