//! Task table operations

use super::{parse_optional_uuid, parse_uuid, placeholders, SqliteStore, TaskStore};
use crate::utils::retry_on_lock;
use async_trait::async_trait;
use sqlx::sqlite::SqliteRow;
use sqlx::Row;
use std::collections::HashMap;
use taskmerge_common::{Priority, Result, SourceKind, Task, TaskStatus};
use uuid::Uuid;

const TASK_COLUMNS: &str = r#"
    id, user_id, integration_id, external_id, source, title, description,
    status, priority, due_date, connectwise_owner, connectwise_assigned_to,
    processplan_assigned_to, is_merged, merged_task_id, created_at, updated_at
"#;

pub(super) fn task_from_row(row: &SqliteRow) -> Result<Task> {
    let id: String = row.try_get("id")?;
    let source: String = row.try_get("source")?;
    let status: String = row.try_get("status")?;
    let priority: Option<String> = row.try_get("priority")?;

    Ok(Task {
        id: parse_uuid(&id)?,
        user_id: row.try_get("user_id")?,
        integration_id: row.try_get("integration_id")?,
        external_id: row.try_get("external_id")?,
        source: source.parse::<SourceKind>()?,
        title: row.try_get("title")?,
        description: row.try_get("description")?,
        status: status.parse::<TaskStatus>()?,
        priority: priority.as_deref().map(str::parse::<Priority>).transpose()?,
        due_date: row.try_get("due_date")?,
        connectwise_owner: row.try_get("connectwise_owner")?,
        connectwise_assigned_to: row.try_get("connectwise_assigned_to")?,
        processplan_assigned_to: row.try_get("processplan_assigned_to")?,
        is_merged: row.try_get("is_merged")?,
        merged_task_id: parse_optional_uuid(row.try_get("merged_task_id")?)?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

impl SqliteStore {
    /// Insert or refresh a task from its tracker
    ///
    /// Keyed on `(source, external_id)`: an existing row keeps its id and
    /// merge linkage and takes the incoming content, owner included, since
    /// the tracker is authoritative for who a task belongs to. Returns the
    /// stored row.
    pub async fn save_task(&self, task: &Task) -> Result<Task> {
        let store = self;
        retry_on_lock("save_task", self.lock_retry_max_wait_ms, move || {
            store.upsert_task(task)
        })
        .await?;

        self.find_task_by_external_id(task.source, &task.external_id)
            .await?
            .ok_or_else(|| {
                taskmerge_common::Error::Internal(format!(
                    "Task {}:{} missing after save",
                    task.source, task.external_id
                ))
            })
    }

    async fn upsert_task(&self, task: &Task) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO tasks (
                id, user_id, integration_id, external_id, source, title, description,
                status, priority, due_date, connectwise_owner, connectwise_assigned_to,
                processplan_assigned_to, is_merged, merged_task_id, created_at, updated_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, 0, NULL, ?, ?)
            ON CONFLICT(source, external_id) DO UPDATE SET
                user_id = excluded.user_id,
                integration_id = excluded.integration_id,
                title = excluded.title,
                description = excluded.description,
                status = excluded.status,
                priority = excluded.priority,
                due_date = excluded.due_date,
                connectwise_owner = excluded.connectwise_owner,
                connectwise_assigned_to = excluded.connectwise_assigned_to,
                processplan_assigned_to = excluded.processplan_assigned_to,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(task.id.to_string())
        .bind(&task.user_id)
        .bind(&task.integration_id)
        .bind(&task.external_id)
        .bind(task.source.as_str())
        .bind(&task.title)
        .bind(&task.description)
        .bind(task.status.as_str())
        .bind(task.priority.map(|p| p.as_str()))
        .bind(task.due_date)
        .bind(&task.connectwise_owner)
        .bind(&task.connectwise_assigned_to)
        .bind(&task.processplan_assigned_to)
        .bind(task.created_at)
        .bind(task.updated_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    pub async fn find_task_by_external_id(
        &self,
        source: SourceKind,
        external_id: &str,
    ) -> Result<Option<Task>> {
        let sql = format!(
            "SELECT {} FROM tasks WHERE source = ? AND external_id = ?",
            TASK_COLUMNS
        );
        let row = sqlx::query(&sql)
            .bind(source.as_str())
            .bind(external_id)
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(task_from_row).transpose()
    }
}

#[async_trait]
impl TaskStore for SqliteStore {
    async fn list_non_merged_tasks_for_user(&self, user_id: &str) -> Result<Vec<Task>> {
        let sql = format!(
            "SELECT {} FROM tasks WHERE user_id = ? AND is_merged = 0 ORDER BY created_at, id",
            TASK_COLUMNS
        );
        let rows = sqlx::query(&sql)
            .bind(user_id)
            .fetch_all(&self.pool)
            .await?;

        rows.iter().map(task_from_row).collect()
    }

    async fn find_tasks_by_ids(&self, ids: &[Uuid], user_id: &str) -> Result<Vec<Task>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let sql = format!(
            "SELECT {} FROM tasks WHERE user_id = ? AND id IN ({})",
            TASK_COLUMNS,
            placeholders(ids.len())
        );
        let mut query = sqlx::query(&sql).bind(user_id);
        for id in ids {
            query = query.bind(id.to_string());
        }
        let rows = query.fetch_all(&self.pool).await?;

        let mut by_id: HashMap<Uuid, Task> = HashMap::with_capacity(rows.len());
        for row in &rows {
            let task = task_from_row(row)?;
            by_id.insert(task.id, task);
        }

        Ok(ids.iter().filter_map(|id| by_id.remove(id)).collect())
    }

    async fn count_tasks_for_user(&self, user_id: &str) -> Result<u64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM tasks WHERE user_id = ?")
            .bind(user_id)
            .fetch_one(&self.pool)
            .await?;
        Ok(count as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use taskmerge_common::db::init_memory_database;

    async fn store() -> SqliteStore {
        SqliteStore::new(init_memory_database().await.unwrap(), 1000)
    }

    #[tokio::test]
    async fn test_save_and_reload_task() {
        let store = store().await;
        let mut task = Task::new("u1", SourceKind::ConnectWise, "cw-1", "Replace switch");
        task.description = Some("Core switch in rack 4".into());
        task.priority = Some(Priority::High);
        task.status = TaskStatus::InProgress;
        task.connectwise_owner = Some("Dana".into());

        let saved = store.save_task(&task).await.unwrap();
        assert_eq!(saved.id, task.id);
        assert_eq!(saved.priority, Some(Priority::High));
        assert_eq!(saved.status, TaskStatus::InProgress);
        assert_eq!(saved.assignee(), Some("Dana"));
        assert!(!saved.is_merged);
    }

    #[tokio::test]
    async fn test_save_is_upsert_on_external_identity() {
        let store = store().await;
        let first = Task::new("u1", SourceKind::Microsoft, "ms-1", "Draft agenda");
        let saved = store.save_task(&first).await.unwrap();

        let mut resync = Task::new("u1", SourceKind::Microsoft, "ms-1", "Draft agenda v2");
        resync.status = TaskStatus::Completed;
        let updated = store.save_task(&resync).await.unwrap();

        assert_eq!(updated.id, saved.id);
        assert_eq!(updated.title, "Draft agenda v2");
        assert_eq!(updated.status, TaskStatus::Completed);
        assert_eq!(store.count_tasks_for_user("u1").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_resync_moves_task_to_new_owner() {
        let store = store().await;
        let saved = store
            .save_task(&Task::new("u1", SourceKind::ConnectWise, "cw-7", "Patch server"))
            .await
            .unwrap();

        let reassigned = Task::new("u2", SourceKind::ConnectWise, "cw-7", "Patch server");
        let updated = store.save_task(&reassigned).await.unwrap();

        assert_eq!(updated.id, saved.id);
        assert_eq!(updated.user_id, "u2");
        assert_eq!(store.count_tasks_for_user("u1").await.unwrap(), 0);
        assert_eq!(store.count_tasks_for_user("u2").await.unwrap(), 1);
        assert!(store
            .find_tasks_by_ids(&[saved.id], "u1")
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn test_find_tasks_by_ids_filters_owner_and_keeps_order() {
        let store = store().await;
        let a = store
            .save_task(&Task::new("u1", SourceKind::Microsoft, "a", "A"))
            .await
            .unwrap();
        let b = store
            .save_task(&Task::new("u1", SourceKind::ConnectWise, "b", "B"))
            .await
            .unwrap();
        let other = store
            .save_task(&Task::new("u2", SourceKind::ProcessPlan, "c", "C"))
            .await
            .unwrap();

        let found = store
            .find_tasks_by_ids(&[b.id, other.id, a.id, Uuid::new_v4()], "u1")
            .await
            .unwrap();
        let ids: Vec<Uuid> = found.iter().map(|t| t.id).collect();
        assert_eq!(ids, vec![b.id, a.id]);
    }
}
