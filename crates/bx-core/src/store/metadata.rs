//! The `metadata` collection: schema version tracking and migrations.

use anyhow::{Context, Result};
use sqlx::{Row, SqlitePool};

pub(super) async fn ensure_metadata_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query("CREATE TABLE IF NOT EXISTS metadata (key TEXT PRIMARY KEY, value TEXT NOT NULL)")
        .execute(pool)
        .await
        .context("create metadata table")?;
    Ok(())
}

pub(super) async fn read_version(pool: &SqlitePool) -> Result<i64> {
    let row = sqlx::query("SELECT value FROM metadata WHERE key = 'version'")
        .fetch_optional(pool)
        .await
        .context("read schema version")?;
    match row {
        Some(row) => {
            let value: String = row.get("value");
            value.parse::<i64>().context("parse schema version")
        }
        None => Ok(0),
    }
}

pub(super) async fn set_version(pool: &SqlitePool, version: i64) -> Result<()> {
    sqlx::query(
        "INSERT INTO metadata (key, value) VALUES ('version', ?1)
         ON CONFLICT(key) DO UPDATE SET value = excluded.value",
    )
    .bind(version.to_string())
    .execute(pool)
    .await
    .context("write schema version")?;
    Ok(())
}

/// Applies the migration taking schema `from -> from + 1`, returning the new
/// version. Migrations are additive `CREATE TABLE IF NOT EXISTS` statements,
/// so re-running one (e.g. after a crash mid-migration) is safe.
pub(super) async fn apply_migration(pool: &SqlitePool, from: i64) -> Result<i64> {
    match from {
        0 => {
            sqlx::query(
                "CREATE TABLE IF NOT EXISTS task_records (
                    task_id TEXT PRIMARY KEY,
                    task_json TEXT NOT NULL,
                    status TEXT NOT NULL,
                    progress REAL NOT NULL,
                    expected_file_size INTEGER,
                    exception_json TEXT
                )",
            )
            .execute(pool)
            .await
            .context("create task_records table")?;

            sqlx::query(
                "CREATE TABLE IF NOT EXISTS paused_tasks (
                    task_id TEXT PRIMARY KEY,
                    task_json TEXT NOT NULL
                )",
            )
            .execute(pool)
            .await
            .context("create paused_tasks table")?;

            sqlx::query(
                "CREATE TABLE IF NOT EXISTS resume_data (
                    task_id TEXT PRIMARY KEY,
                    data TEXT NOT NULL,
                    required_start_byte INTEGER NOT NULL,
                    validator_json TEXT NOT NULL
                )",
            )
            .execute(pool)
            .await
            .context("create resume_data table")?;

            sqlx::query(
                "CREATE TABLE IF NOT EXISTS modified_tasks (
                    task_id TEXT PRIMARY KEY,
                    task_json TEXT NOT NULL,
                    modified_at INTEGER NOT NULL
                )",
            )
            .execute(pool)
            .await
            .context("create modified_tasks table")?;

            sqlx::query(
                "CREATE TABLE IF NOT EXISTS undelivered_status_updates (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    task_id TEXT NOT NULL,
                    payload_json TEXT NOT NULL
                )",
            )
            .execute(pool)
            .await
            .context("create undelivered_status_updates table")?;

            sqlx::query(
                "CREATE TABLE IF NOT EXISTS undelivered_progress_updates (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    task_id TEXT NOT NULL,
                    payload_json TEXT NOT NULL
                )",
            )
            .execute(pool)
            .await
            .context("create undelivered_progress_updates table")?;

            set_version(pool, 1).await?;
            Ok(1)
        }
        other => anyhow::bail!("no migration defined from schema version {other}"),
    }
}
