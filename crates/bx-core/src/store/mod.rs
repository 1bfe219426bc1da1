//! Persistent Store: a small embedded key/value layer
//! over sqlite, exposing the named collections `task_records`, `paused_tasks`,
//! `resume_data`, `modified_tasks`, `undelivered_status_updates`,
//! `undelivered_progress_updates`, and `metadata`.
//!
//! Each collection gets its own table and single-row upserts via
//! `INSERT ... ON CONFLICT DO UPDATE`, last-write-wins.

mod keys;
mod metadata;
mod modified;
mod paused;
mod records;
mod resume_data;
mod task_records;
mod undelivered;

pub use keys::sanitize_task_id_for_storage_key;
pub use records::{ResumeData, TaskRecord, Validator};

use anyhow::{Context, Result};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::SqlitePool;
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// Default on-disk location for the store: `~/.local/state/bx/tasks.db`.
pub fn default_path() -> Result<PathBuf> {
    let xdg_dirs = xdg::BaseDirectories::with_prefix("bx")?;
    Ok(xdg_dirs.place_state_file("tasks.db")?)
}

/// The schema version this build knows how to read and write.
/// An on-disk version newer than this is a fatal initialization error.
pub const CURRENT_SCHEMA_VERSION: i64 = 1;

#[derive(Debug, Clone, thiserror::Error)]
pub enum StoreInitError {
    #[error("database schema version {found} is newer than this build supports ({known})")]
    FutureSchemaVersion { found: i64, known: i64 },
}

/// Handle to the persistent store. Cheap to clone (wraps a pooled
/// connection).
#[derive(Clone)]
pub struct Store {
    pool: SqlitePool,
}

impl Store {
    /// Opens (creating if missing) the sqlite database at `path` and runs
    /// any pending migrations.
    pub async fn connect(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("create store directory: {}", parent.display()))?;
        }
        let options = SqliteConnectOptions::from_str(&format!("sqlite://{}", path.display()))
            .with_context(|| format!("invalid store path: {}", path.display()))?
            .create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(8)
            .connect_with(options)
            .await
            .context("connect to store database")?;
        let store = Store { pool };
        store.migrate().await?;
        Ok(store)
    }

    /// In-memory store, for tests and short-lived CLI invocations.
    pub async fn connect_in_memory() -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .context("connect to in-memory store")?;
        let store = Store { pool };
        store.migrate().await?;
        Ok(store)
    }

    pub(crate) fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Reads `metadata.version`, applies in-order migrations to reach
    /// [`CURRENT_SCHEMA_VERSION`], and treats an already-newer on-disk
    /// version as a fatal initialization error.
    async fn migrate(&self) -> Result<()> {
        metadata::ensure_metadata_table(&self.pool).await?;
        let current = metadata::read_version(&self.pool).await?;

        if current > CURRENT_SCHEMA_VERSION {
            return Err(StoreInitError::FutureSchemaVersion {
                found: current,
                known: CURRENT_SCHEMA_VERSION,
            }
            .into());
        }

        let mut version = current;
        while version < CURRENT_SCHEMA_VERSION {
            version = metadata::apply_migration(&self.pool, version).await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn fresh_store_is_at_current_version() {
        let store = Store::connect_in_memory().await.unwrap();
        let v = metadata::read_version(&store.pool).await.unwrap();
        assert_eq!(v, CURRENT_SCHEMA_VERSION);
    }

    #[tokio::test]
    async fn newer_on_disk_version_is_fatal() {
        let store = Store::connect_in_memory().await.unwrap();
        metadata::set_version(&store.pool, CURRENT_SCHEMA_VERSION + 1)
            .await
            .unwrap();
        let err = store.migrate().await.unwrap_err();
        assert!(err.downcast_ref::<StoreInitError>().is_some());
    }
}
