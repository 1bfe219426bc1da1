//! CLI command handlers. Each command is in its own file for clarity.

mod checksum;
mod run;

pub use checksum::run_checksum;
pub use run::{run_engine, RunArgs};
