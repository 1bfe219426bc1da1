//! The `paused_tasks` collection.

use super::{sanitize_task_id_for_storage_key, Store};
use crate::task::Task;
use anyhow::{Context, Result};
use sqlx::Row;

impl Store {
    pub async fn put_paused_task(&self, task: &Task) -> Result<()> {
        let key = sanitize_task_id_for_storage_key(task.task_id());
        let task_json = serde_json::to_string(task).context("serialize paused task")?;
        sqlx::query(
            "INSERT INTO paused_tasks (task_id, task_json) VALUES (?1, ?2)
             ON CONFLICT(task_id) DO UPDATE SET task_json = excluded.task_json",
        )
        .bind(&key)
        .bind(&task_json)
        .execute(&self.pool)
        .await
        .context("upsert paused_task")?;
        Ok(())
    }

    pub async fn get_paused_task(&self, task_id: &str) -> Result<Option<Task>> {
        let key = sanitize_task_id_for_storage_key(task_id);
        let row = sqlx::query("SELECT task_json FROM paused_tasks WHERE task_id = ?1")
            .bind(&key)
            .fetch_optional(&self.pool)
            .await
            .context("select paused_task")?;
        match row {
            Some(row) => {
                let task_json: String = row.get("task_json");
                Ok(Some(
                    serde_json::from_str(&task_json).context("deserialize paused task")?,
                ))
            }
            None => Ok(None),
        }
    }

    pub async fn remove_paused_task(&self, task_id: &str) -> Result<()> {
        let key = sanitize_task_id_for_storage_key(task_id);
        sqlx::query("DELETE FROM paused_tasks WHERE task_id = ?1")
            .bind(&key)
            .execute(&self.pool)
            .await
            .context("delete paused_task")?;
        Ok(())
    }

    pub async fn all_paused_tasks(&self) -> Result<Vec<Task>> {
        let rows = sqlx::query("SELECT task_json FROM paused_tasks")
            .fetch_all(&self.pool)
            .await
            .context("select all paused_tasks")?;
        rows.into_iter()
            .map(|row| {
                let task_json: String = row.get("task_json");
                serde_json::from_str(&task_json).context("deserialize paused task")
            })
            .collect()
    }
}
