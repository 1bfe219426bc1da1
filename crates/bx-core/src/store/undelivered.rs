//! `undelivered_status_updates` / `undelivered_progress_updates`.
//!
//! Persisted when no client listener is attached at emission time;
//! `pop_undelivered_data` drains a task's queue atomically inside one
//! transaction so a concurrent emission can't be lost or double-delivered.

use super::records::{SerializedProgressUpdate, SerializedStatusUpdate};
use super::{sanitize_task_id_for_storage_key, Store};
use crate::status::{ProgressUpdate, StatusUpdate};
use anyhow::{Context, Result};
use sqlx::Row;
use std::collections::HashMap;

impl Store {
    pub async fn push_undelivered_status(&self, update: &StatusUpdate) -> Result<()> {
        let key = sanitize_task_id_for_storage_key(&update.task_id);
        let payload = serde_json::to_string(&SerializedStatusUpdate::from(update))
            .context("serialize status update")?;
        sqlx::query(
            "INSERT INTO undelivered_status_updates (task_id, payload_json) VALUES (?1, ?2)",
        )
        .bind(&key)
        .bind(&payload)
        .execute(&self.pool)
        .await
        .context("insert undelivered status update")?;
        Ok(())
    }

    pub async fn push_undelivered_progress(&self, update: &ProgressUpdate) -> Result<()> {
        let key = sanitize_task_id_for_storage_key(&update.task_id);
        let payload = serde_json::to_string(&SerializedProgressUpdate::from(update))
            .context("serialize progress update")?;
        sqlx::query(
            "INSERT INTO undelivered_progress_updates (task_id, payload_json) VALUES (?1, ?2)",
        )
        .bind(&key)
        .bind(&payload)
        .execute(&self.pool)
        .await
        .context("insert undelivered progress update")?;
        Ok(())
    }

    /// Drains all undelivered status updates, grouped by task id, deleting
    /// them from the store in the same transaction.
    pub async fn pop_undelivered_status(&self) -> Result<HashMap<String, Vec<StatusUpdate>>> {
        let mut tx = self.pool.begin().await.context("begin transaction")?;
        let rows = sqlx::query(
            "SELECT id, task_id, payload_json FROM undelivered_status_updates ORDER BY id ASC",
        )
        .fetch_all(&mut *tx)
        .await
        .context("select undelivered status updates")?;

        let mut out: HashMap<String, Vec<StatusUpdate>> = HashMap::new();
        for row in &rows {
            let task_id: String = row.get("task_id");
            let payload_json: String = row.get("payload_json");
            let payload: SerializedStatusUpdate =
                serde_json::from_str(&payload_json).context("deserialize status update")?;
            out.entry(task_id.clone())
                .or_default()
                .push(payload.into_update(task_id));
        }

        sqlx::query("DELETE FROM undelivered_status_updates")
            .execute(&mut *tx)
            .await
            .context("clear undelivered status updates")?;
        tx.commit().await.context("commit pop_undelivered_status")?;
        Ok(out)
    }

    pub async fn pop_undelivered_progress(&self) -> Result<HashMap<String, Vec<ProgressUpdate>>> {
        let mut tx = self.pool.begin().await.context("begin transaction")?;
        let rows = sqlx::query(
            "SELECT id, task_id, payload_json FROM undelivered_progress_updates ORDER BY id ASC",
        )
        .fetch_all(&mut *tx)
        .await
        .context("select undelivered progress updates")?;

        let mut out: HashMap<String, Vec<ProgressUpdate>> = HashMap::new();
        for row in &rows {
            let task_id: String = row.get("task_id");
            let payload_json: String = row.get("payload_json");
            let payload: SerializedProgressUpdate =
                serde_json::from_str(&payload_json).context("deserialize progress update")?;
            out.entry(task_id.clone())
                .or_default()
                .push(payload.into_update(task_id));
        }

        sqlx::query("DELETE FROM undelivered_progress_updates")
            .execute(&mut *tx)
            .await
            .context("clear undelivered progress updates")?;
        tx.commit()
            .await
            .context("commit pop_undelivered_progress")?;
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::status::TaskStatus;

    #[tokio::test]
    async fn pop_drains_exactly_once() {
        let store = Store::connect_in_memory().await.unwrap();
        store
            .push_undelivered_status(&StatusUpdate::simple("t1", TaskStatus::Complete))
            .await
            .unwrap();
        store
            .push_undelivered_status(&StatusUpdate::simple("t2", TaskStatus::Failed))
            .await
            .unwrap();

        let popped = store.pop_undelivered_status().await.unwrap();
        assert_eq!(popped.len(), 2);
        assert_eq!(popped["t1"][0].status, TaskStatus::Complete);

        let popped_again = store.pop_undelivered_status().await.unwrap();
        assert!(popped_again.is_empty());
    }
}
