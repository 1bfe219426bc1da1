//! The `modified_tasks` collection.
//!
//! No mutator is exposed on the client API today (there is no `updateTask`
//! operation), but the named collection is part of the persisted-state
//! layout and must exist for forward compatibility; kept minimal.

use super::{sanitize_task_id_for_storage_key, Store};
use crate::task::Task;
use anyhow::{Context, Result};
use sqlx::Row;

impl Store {
    pub async fn put_modified_task(&self, task: &Task, modified_at: i64) -> Result<()> {
        let key = sanitize_task_id_for_storage_key(task.task_id());
        let task_json = serde_json::to_string(task).context("serialize modified task")?;
        sqlx::query(
            "INSERT INTO modified_tasks (task_id, task_json, modified_at) VALUES (?1, ?2, ?3)
             ON CONFLICT(task_id) DO UPDATE SET
               task_json = excluded.task_json,
               modified_at = excluded.modified_at",
        )
        .bind(&key)
        .bind(&task_json)
        .bind(modified_at)
        .execute(&self.pool)
        .await
        .context("upsert modified_task")?;
        Ok(())
    }

    pub async fn all_modified_tasks(&self) -> Result<Vec<Task>> {
        let rows = sqlx::query("SELECT task_json FROM modified_tasks")
            .fetch_all(&self.pool)
            .await
            .context("select modified_tasks")?;
        rows.into_iter()
            .map(|row| {
                let task_json: String = row.get("task_json");
                serde_json::from_str(&task_json).context("deserialize modified task")
            })
            .collect()
    }
}
