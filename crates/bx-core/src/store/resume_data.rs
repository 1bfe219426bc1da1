//! The `resume_data` collection.

use super::{sanitize_task_id_for_storage_key, ResumeData, Store, Validator};
use anyhow::{Context, Result};
use sqlx::Row;

impl Store {
    pub async fn put_resume_data(&self, resume: &ResumeData) -> Result<()> {
        let key = sanitize_task_id_for_storage_key(&resume.task_id);
        let validator_json =
            serde_json::to_string(&resume.validator).context("serialize validator")?;
        sqlx::query(
            "INSERT INTO resume_data (task_id, data, required_start_byte, validator_json)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(task_id) DO UPDATE SET
               data = excluded.data,
               required_start_byte = excluded.required_start_byte,
               validator_json = excluded.validator_json",
        )
        .bind(&key)
        .bind(&resume.data)
        .bind(resume.required_start_byte)
        .bind(&validator_json)
        .execute(&self.pool)
        .await
        .context("upsert resume_data")?;
        Ok(())
    }

    pub async fn get_resume_data(&self, task_id: &str) -> Result<Option<ResumeData>> {
        let key = sanitize_task_id_for_storage_key(task_id);
        let row = sqlx::query(
            "SELECT task_id, data, required_start_byte, validator_json FROM resume_data WHERE task_id = ?1",
        )
        .bind(&key)
        .fetch_optional(&self.pool)
        .await
        .context("select resume_data")?;
        match row {
            Some(row) => {
                let validator_json: String = row.get("validator_json");
                Ok(Some(ResumeData {
                    task_id: task_id.to_string(),
                    data: row.get("data"),
                    required_start_byte: row.get("required_start_byte"),
                    validator: serde_json::from_str::<Validator>(&validator_json)
                        .context("deserialize validator")?,
                }))
            }
            None => Ok(None),
        }
    }

    pub async fn remove_resume_data(&self, task_id: &str) -> Result<()> {
        let key = sanitize_task_id_for_storage_key(task_id);
        sqlx::query("DELETE FROM resume_data WHERE task_id = ?1")
            .bind(&key)
            .execute(&self.pool)
            .await
            .context("delete resume_data")?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::super::Store;
    use super::*;

    #[tokio::test]
    async fn roundtrip_resume_data() {
        let store = Store::connect_in_memory().await.unwrap();
        let rd = ResumeData {
            task_id: "t/1:weird".to_string(),
            data: "/tmp/t1.part".to_string(),
            required_start_byte: 4096,
            validator: Validator {
                etag: Some("abc".to_string()),
                last_modified: None,
                size: Some(1_000_000),
            },
        };
        store.put_resume_data(&rd).await.unwrap();
        let fetched = store.get_resume_data(&rd.task_id).await.unwrap().unwrap();
        assert_eq!(fetched.required_start_byte, 4096);
        assert_eq!(fetched.validator.etag.as_deref(), Some("abc"));

        store.remove_resume_data(&rd.task_id).await.unwrap();
        assert!(store.get_resume_data(&rd.task_id).await.unwrap().is_none());
    }
}
