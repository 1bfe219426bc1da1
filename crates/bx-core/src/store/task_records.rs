//! The `task_records` collection.

use super::{sanitize_task_id_for_storage_key, Store, TaskRecord};
use crate::status::TaskStatus;
use anyhow::{Context, Result};
use sqlx::Row;

impl Store {
    /// Upsert a tracked group's `TaskRecord`, last-write-wins.
    pub async fn put_task_record(&self, task_id: &str, record: &TaskRecord) -> Result<()> {
        let key = sanitize_task_id_for_storage_key(task_id);
        let task_json = serde_json::to_string(&record.task).context("serialize task")?;
        let status_json = serde_json::to_string(&record.status).context("serialize status")?;
        let exception_json = match &record.exception {
            Some(e) => Some(serde_json::to_string(e).context("serialize exception")?),
            None => None,
        };
        sqlx::query(
            "INSERT INTO task_records (task_id, task_json, status, progress, expected_file_size, exception_json)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)
             ON CONFLICT(task_id) DO UPDATE SET
               task_json = excluded.task_json,
               status = excluded.status,
               progress = excluded.progress,
               expected_file_size = excluded.expected_file_size,
               exception_json = excluded.exception_json",
        )
        .bind(&key)
        .bind(&task_json)
        .bind(&status_json)
        .bind(record.progress)
        .bind(record.expected_file_size)
        .bind(&exception_json)
        .execute(&self.pool)
        .await
        .context("upsert task_record")?;
        Ok(())
    }

    pub async fn get_task_record(&self, task_id: &str) -> Result<Option<TaskRecord>> {
        let key = sanitize_task_id_for_storage_key(task_id);
        let row = sqlx::query(
            "SELECT task_json, status, progress, expected_file_size, exception_json
             FROM task_records WHERE task_id = ?1",
        )
        .bind(&key)
        .fetch_optional(&self.pool)
        .await
        .context("select task_record")?;
        row.map(row_to_record).transpose()
    }

    pub async fn all_task_records(&self) -> Result<Vec<TaskRecord>> {
        let rows = sqlx::query(
            "SELECT task_json, status, progress, expected_file_size, exception_json FROM task_records",
        )
        .fetch_all(&self.pool)
        .await
        .context("select all task_records")?;
        rows.into_iter().map(row_to_record).collect()
    }

    pub async fn delete_task_record(&self, task_id: &str) -> Result<()> {
        let key = sanitize_task_id_for_storage_key(task_id);
        sqlx::query("DELETE FROM task_records WHERE task_id = ?1")
            .bind(&key)
            .execute(&self.pool)
            .await
            .context("delete task_record")?;
        Ok(())
    }
}

fn row_to_record(row: sqlx::sqlite::SqliteRow) -> Result<TaskRecord> {
    let task_json: String = row.get("task_json");
    let status_json: String = row.get("status");
    let exception_json: Option<String> = row.get("exception_json");
    Ok(TaskRecord {
        task: serde_json::from_str(&task_json).context("deserialize task")?,
        status: serde_json::from_str::<TaskStatus>(&status_json).context("deserialize status")?,
        progress: row.get("progress"),
        expected_file_size: row.get("expected_file_size"),
        exception: exception_json
            .map(|s| serde_json::from_str(&s))
            .transpose()
            .context("deserialize exception")?,
    })
}
