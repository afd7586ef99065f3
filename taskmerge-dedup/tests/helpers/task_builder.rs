//! Fluent builder for test tasks

use chrono::{DateTime, TimeZone, Utc};
use taskmerge_common::{Priority, SourceKind, Task, TaskStatus};

/// Fixed creation instant so temporal proximity is deterministic
pub fn base_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 1, 2, 9, 0, 0).unwrap()
}

pub struct TaskBuilder {
    task: Task,
}

impl TaskBuilder {
    pub fn new(user_id: &str, source: SourceKind, external_id: &str) -> Self {
        let mut task = Task::new(user_id, source, external_id, format!("Task {}", external_id));
        task.created_at = base_time();
        task.updated_at = base_time();
        Self { task }
    }

    pub fn title(mut self, title: &str) -> Self {
        self.task.title = title.to_string();
        self
    }

    pub fn description(mut self, description: &str) -> Self {
        self.task.description = Some(description.to_string());
        self
    }

    pub fn priority(mut self, priority: Priority) -> Self {
        self.task.priority = Some(priority);
        self
    }

    pub fn status(mut self, status: TaskStatus) -> Self {
        self.task.status = status;
        self
    }

    pub fn due(mut self, due: DateTime<Utc>) -> Self {
        self.task.due_date = Some(due);
        self
    }

    pub fn created_at(mut self, created_at: DateTime<Utc>) -> Self {
        self.task.created_at = created_at;
        self
    }

    pub fn created_days_ago(mut self, days: i64) -> Self {
        self.task.created_at = base_time() - chrono::Duration::days(days);
        self
    }

    pub fn build(self) -> Task {
        self.task
    }
}
