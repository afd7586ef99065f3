//! Merge Engine
//!
//! Consolidates two or more tasks into a merged task and reverses that
//! consolidation on unmerge.
//!
//! **Field resolution (order-independent):**
//! - status: completed > in_progress > pending
//! - priority: highest set priority, or none
//! - due date: earliest set due date, or none
//! - title/description: taken from the primary task

use crate::db::DedupStore;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use taskmerge_common::dedup::{
    MergeTaskRequest, MergeTaskResponse, TaskSource, UnmergeTaskRequest, UnmergeTaskResponse,
};
use taskmerge_common::events::{DedupEvent, EventBus};
use taskmerge_common::{Error, MergedBy, MergedTask, Priority, Result, Task, TaskStatus};
use tracing::{debug, info};
use uuid::Uuid;

/// Confidence recorded on every automatic merge
pub const AUTO_MERGE_CONFIDENCE: f64 = 0.75;

/// Merges and unmerges tasks through the store
#[derive(Clone)]
pub struct TaskMerger {
    store: Arc<dyn DedupStore>,
    events: EventBus,
}

impl TaskMerger {
    pub fn new(store: Arc<dyn DedupStore>, events: EventBus) -> Self {
        Self { store, events }
    }

    /// Merge the requested tasks into one merged task
    ///
    /// Preconditions, checked in order before any write:
    /// 1. at least two distinct task ids (`InvalidInput`)
    /// 2. every id names a task owned by the user (`NotFound`)
    /// 3. no task is already merged (`Conflict`)
    ///
    /// A concurrent merge that claims one of the tasks between the check and
    /// the write also yields `Conflict`, with nothing written.
    pub async fn merge_tasks(&self, request: &MergeTaskRequest) -> Result<MergeTaskResponse> {
        let task_ids = distinct_in_order(&request.task_ids);
        if task_ids.len() < 2 {
            return Err(Error::InvalidInput(
                "At least 2 tasks are required for merging".into(),
            ));
        }

        let tasks = self
            .store
            .find_tasks_by_ids(&task_ids, &request.user_id)
            .await?;
        if tasks.len() != task_ids.len() {
            return Err(Error::NotFound(
                "One or more tasks not found or not owned by user".into(),
            ));
        }

        if tasks.iter().any(|t| t.is_merged || t.merged_task_id.is_some()) {
            return Err(Error::Conflict("One or more tasks are already merged".into()));
        }

        let merged_task = build_merged_task(
            &request.user_id,
            &tasks,
            request.merged_by,
            request.primary_task_id,
        )?;
        self.store.create_merged_task(&merged_task).await?;

        info!(
            merged_task_id = %merged_task.id,
            user_id = %request.user_id,
            task_count = task_ids.len(),
            merged_by = merged_task.merged_by.as_str(),
            "Tasks merged"
        );

        self.events.emit(DedupEvent::TasksMerged {
            merged_task_id: merged_task.id,
            user_id: request.user_id.clone(),
            task_ids: task_ids.clone(),
            merged_by: merged_task.merged_by,
            timestamp: Utc::now(),
        });

        Ok(MergeTaskResponse {
            merged_task,
            original_tasks: task_ids,
        })
    }

    /// Dissolve a merged task, restoring its source tasks
    pub async fn unmerge_tasks(&self, request: &UnmergeTaskRequest) -> Result<UnmergeTaskResponse> {
        let merged = self
            .store
            .find_merged_task(request.merged_task_id, &request.user_id)
            .await?
            .ok_or_else(|| Error::NotFound("Merged task not found".into()))?;

        let restored = self
            .store
            .delete_merged_task_and_sources(merged.id)
            .await?;

        // Report in provenance order
        let restored_tasks: Vec<Uuid> = merged
            .source_ids()
            .into_iter()
            .filter(|id| restored.contains(id))
            .collect();

        info!(
            merged_task_id = %merged.id,
            user_id = %request.user_id,
            restored = restored_tasks.len(),
            "Merged task dissolved"
        );

        self.events.emit(DedupEvent::TasksUnmerged {
            merged_task_id: merged.id,
            user_id: request.user_id.clone(),
            restored_task_ids: restored_tasks.clone(),
            timestamp: Utc::now(),
        });

        Ok(UnmergeTaskResponse { restored_tasks })
    }

    pub async fn get_merged_task_by_id(&self, id: Uuid, user_id: &str) -> Result<MergedTask> {
        self.store
            .find_merged_task(id, user_id)
            .await?
            .ok_or_else(|| Error::NotFound("Merged task not found".into()))
    }

    pub async fn get_merged_tasks_by_user_id(&self, user_id: &str) -> Result<Vec<MergedTask>> {
        let merged = self.store.list_merged_tasks(user_id).await?;
        debug!(user_id, count = merged.len(), "Loaded merged tasks");
        Ok(merged)
    }
}

fn distinct_in_order(ids: &[Uuid]) -> Vec<Uuid> {
    let mut seen = Vec::with_capacity(ids.len());
    for id in ids {
        if !seen.contains(id) {
            seen.push(*id);
        }
    }
    seen
}

fn build_merged_task(
    user_id: &str,
    tasks: &[Task],
    merged_by: MergedBy,
    primary_task_id: Option<Uuid>,
) -> Result<MergedTask> {
    let primary = select_primary(tasks, primary_task_id)
        .ok_or_else(|| Error::InvalidInput("No tasks to merge".into()))?;
    let now = Utc::now();

    Ok(MergedTask {
        id: Uuid::new_v4(),
        user_id: user_id.to_string(),
        title: primary.title.clone(),
        description: primary.description.clone(),
        status: resolve_status(tasks),
        priority: resolve_priority(tasks),
        due_date: resolve_due_date(tasks),
        merged_by,
        confidence: match merged_by {
            MergedBy::Auto => Some(AUTO_MERGE_CONFIDENCE),
            MergedBy::Manual => None,
        },
        sources: tasks.iter().map(TaskSource::snapshot).collect(),
        created_at: now,
        updated_at: now,
    })
}

/// The requested primary task if it is part of the set, else the first task
pub fn select_primary(tasks: &[Task], primary_task_id: Option<Uuid>) -> Option<&Task> {
    primary_task_id
        .and_then(|id| tasks.iter().find(|t| t.id == id))
        .or_else(|| tasks.first())
}

pub fn resolve_status(tasks: &[Task]) -> TaskStatus {
    if tasks.iter().any(|t| t.status == TaskStatus::Completed) {
        TaskStatus::Completed
    } else if tasks.iter().any(|t| t.status == TaskStatus::InProgress) {
        TaskStatus::InProgress
    } else {
        TaskStatus::Pending
    }
}

pub fn resolve_priority(tasks: &[Task]) -> Option<Priority> {
    tasks.iter().filter_map(|t| t.priority).max()
}

pub fn resolve_due_date(tasks: &[Task]) -> Option<DateTime<Utc>> {
    tasks.iter().filter_map(|t| t.due_date).min()
}
