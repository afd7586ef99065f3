//! Merged task and provenance operations
//!
//! Both write paths run in a single transaction. The source-task update
//! is conditional on `merged_task_id IS NULL`, so two callers racing to
//! merge overlapping task sets cannot both succeed.

use super::{parse_uuid, MergeStore, SqliteStore};
use crate::utils::{begin_monitored, retry_on_lock};
use async_trait::async_trait;
use sqlx::sqlite::SqliteRow;
use sqlx::Row;
use taskmerge_common::dedup::TaskSource;
use taskmerge_common::{Error, MergedBy, MergedTask, Priority, Result, SourceKind, TaskStatus};
use uuid::Uuid;

const MERGED_COLUMNS: &str = r#"
    id, user_id, title, description, status, priority, due_date,
    merged_by, confidence, created_at, updated_at
"#;

fn merged_task_from_row(row: &SqliteRow, sources: Vec<TaskSource>) -> Result<MergedTask> {
    let id: String = row.try_get("id")?;
    let status: String = row.try_get("status")?;
    let priority: Option<String> = row.try_get("priority")?;
    let merged_by: String = row.try_get("merged_by")?;

    Ok(MergedTask {
        id: parse_uuid(&id)?,
        user_id: row.try_get("user_id")?,
        title: row.try_get("title")?,
        description: row.try_get("description")?,
        status: status.parse::<TaskStatus>()?,
        priority: priority.as_deref().map(str::parse::<Priority>).transpose()?,
        due_date: row.try_get("due_date")?,
        merged_by: merged_by.parse::<MergedBy>()?,
        confidence: row.try_get("confidence")?,
        sources,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn task_source_from_row(row: &SqliteRow) -> Result<TaskSource> {
    let task_id: String = row.try_get("original_task_id")?;
    let source: String = row.try_get("source")?;
    let status: String = row.try_get("original_status")?;

    Ok(TaskSource {
        task_id: parse_uuid(&task_id)?,
        source: source.parse::<SourceKind>()?,
        original_title: row.try_get("original_title")?,
        original_description: row.try_get("original_description")?,
        original_status: status.parse::<TaskStatus>()?,
        integration_id: row.try_get("integration_id")?,
        last_sync_at: row.try_get("last_sync_at")?,
    })
}

impl SqliteStore {
    async fn load_task_sources(&self, merged_task_id: &str) -> Result<Vec<TaskSource>> {
        let rows = sqlx::query(
            r#"
            SELECT original_task_id, source, original_title, original_description,
                   original_status, integration_id, last_sync_at
            FROM merged_task_sources
            WHERE merged_task_id = ?
            ORDER BY position
            "#,
        )
        .bind(merged_task_id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(task_source_from_row).collect()
    }

    async fn write_merged_task(&self, merged: &MergedTask) -> Result<()> {
        let merged_id = merged.id.to_string();
        let mut tx = begin_monitored(&self.pool, "merge_store::create_merged_task").await?;

        sqlx::query(
            r#"
            INSERT INTO merged_tasks (
                id, user_id, title, description, status, priority, due_date,
                merged_by, confidence, created_at, updated_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&merged_id)
        .bind(&merged.user_id)
        .bind(&merged.title)
        .bind(&merged.description)
        .bind(merged.status.as_str())
        .bind(merged.priority.map(|p| p.as_str()))
        .bind(merged.due_date)
        .bind(merged.merged_by.as_str())
        .bind(merged.confidence)
        .bind(merged.created_at)
        .bind(merged.updated_at)
        .execute(&mut **tx.conn()?)
        .await?;

        let mut linked = 0u64;
        for source in &merged.sources {
            let result = sqlx::query(
                r#"
                UPDATE tasks SET is_merged = 1, merged_task_id = ?
                WHERE id = ? AND user_id = ? AND merged_task_id IS NULL
                "#,
            )
            .bind(&merged_id)
            .bind(source.task_id.to_string())
            .bind(&merged.user_id)
            .execute(&mut **tx.conn()?)
            .await?;
            linked += result.rows_affected();
        }

        if linked != merged.sources.len() as u64 {
            tracing::warn!(
                merged_task_id = %merged.id,
                expected = merged.sources.len(),
                linked,
                "Source task merged concurrently, rolling back"
            );
            tx.rollback().await?;
            return Err(Error::Conflict("One or more tasks are already merged".into()));
        }

        for (position, source) in merged.sources.iter().enumerate() {
            sqlx::query(
                r#"
                INSERT INTO merged_task_sources (
                    merged_task_id, original_task_id, position, source, original_title,
                    original_description, original_status, integration_id, last_sync_at
                ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(&merged_id)
            .bind(source.task_id.to_string())
            .bind(position as i64)
            .bind(source.source.as_str())
            .bind(&source.original_title)
            .bind(&source.original_description)
            .bind(source.original_status.as_str())
            .bind(&source.integration_id)
            .bind(source.last_sync_at)
            .execute(&mut **tx.conn()?)
            .await?;
        }

        tx.commit().await
    }

    async fn remove_merged_task(&self, id: Uuid) -> Result<Vec<Uuid>> {
        let merged_id = id.to_string();
        let mut tx = begin_monitored(&self.pool, "merge_store::delete_merged_task").await?;

        let linked: Vec<String> =
            sqlx::query_scalar("SELECT id FROM tasks WHERE merged_task_id = ? ORDER BY id")
                .bind(&merged_id)
                .fetch_all(&mut **tx.conn()?)
                .await?;

        sqlx::query("UPDATE tasks SET is_merged = 0, merged_task_id = NULL WHERE merged_task_id = ?")
            .bind(&merged_id)
            .execute(&mut **tx.conn()?)
            .await?;

        sqlx::query("DELETE FROM merged_task_sources WHERE merged_task_id = ?")
            .bind(&merged_id)
            .execute(&mut **tx.conn()?)
            .await?;

        let deleted = sqlx::query("DELETE FROM merged_tasks WHERE id = ?")
            .bind(&merged_id)
            .execute(&mut **tx.conn()?)
            .await?;

        if deleted.rows_affected() == 0 {
            tx.rollback().await?;
            return Err(Error::NotFound("Merged task not found".into()));
        }

        tx.commit().await?;
        linked.iter().map(|s| parse_uuid(s)).collect()
    }
}

#[async_trait]
impl MergeStore for SqliteStore {
    async fn create_merged_task(&self, merged: &MergedTask) -> Result<()> {
        let store = self;
        retry_on_lock("create_merged_task", self.lock_retry_max_wait_ms, move || {
            store.write_merged_task(merged)
        })
        .await
    }

    async fn find_merged_task(&self, id: Uuid, user_id: &str) -> Result<Option<MergedTask>> {
        let sql = format!(
            "SELECT {} FROM merged_tasks WHERE id = ? AND user_id = ?",
            MERGED_COLUMNS
        );
        let row = sqlx::query(&sql)
            .bind(id.to_string())
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(row) => {
                let sources = self.load_task_sources(&id.to_string()).await?;
                Ok(Some(merged_task_from_row(&row, sources)?))
            }
            None => Ok(None),
        }
    }

    async fn list_merged_tasks(&self, user_id: &str) -> Result<Vec<MergedTask>> {
        let sql = format!(
            "SELECT {} FROM merged_tasks WHERE user_id = ? ORDER BY created_at DESC, id",
            MERGED_COLUMNS
        );
        let rows = sqlx::query(&sql)
            .bind(user_id)
            .fetch_all(&self.pool)
            .await?;

        let mut merged = Vec::with_capacity(rows.len());
        for row in &rows {
            let id: String = row.try_get("id")?;
            let sources = self.load_task_sources(&id).await?;
            merged.push(merged_task_from_row(row, sources)?);
        }
        Ok(merged)
    }

    async fn delete_merged_task_and_sources(&self, id: Uuid) -> Result<Vec<Uuid>> {
        let store = self;
        retry_on_lock("delete_merged_task", self.lock_retry_max_wait_ms, move || {
            store.remove_merged_task(id)
        })
        .await
    }

    async fn count_merged_tasks(&self, user_id: &str) -> Result<u64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM merged_tasks WHERE user_id = ?")
            .bind(user_id)
            .fetch_one(&self.pool)
            .await?;
        Ok(count as u64)
    }
}
