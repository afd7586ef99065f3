//! Normalized task records
//!
//! Tasks are produced by the ingestion layer from the external trackers and
//! are read-only to the deduplication engine, apart from the merge linkage
//! (`is_merged` / `merged_task_id`).

use crate::{Error, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// External tracker a task was collected from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    Microsoft,
    ConnectWise,
    ProcessPlan,
}

impl SourceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceKind::Microsoft => "microsoft",
            SourceKind::ConnectWise => "connectwise",
            SourceKind::ProcessPlan => "processplan",
        }
    }
}

impl FromStr for SourceKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "microsoft" => Ok(SourceKind::Microsoft),
            "connectwise" => Ok(SourceKind::ConnectWise),
            "processplan" => Ok(SourceKind::ProcessPlan),
            other => Err(Error::InvalidInput(format!("Unknown task source: {}", other))),
        }
    }
}

impl fmt::Display for SourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Task workflow status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    InProgress,
    Completed,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::InProgress => "in_progress",
            TaskStatus::Completed => "completed",
        }
    }
}

impl FromStr for TaskStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "pending" => Ok(TaskStatus::Pending),
            "in_progress" => Ok(TaskStatus::InProgress),
            "completed" => Ok(TaskStatus::Completed),
            other => Err(Error::InvalidInput(format!("Unknown task status: {}", other))),
        }
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Task priority, ordered `Low < Medium < High`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Low,
    Medium,
    High,
}

impl Priority {
    pub fn as_str(&self) -> &'static str {
        match self {
            Priority::Low => "low",
            Priority::Medium => "medium",
            Priority::High => "high",
        }
    }
}

impl FromStr for Priority {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "low" => Ok(Priority::Low),
            "medium" => Ok(Priority::Medium),
            "high" => Ok(Priority::High),
            other => Err(Error::InvalidInput(format!("Unknown priority: {}", other))),
        }
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Normalized task record
///
/// `(source, external_id)` identifies the record; two values sharing that
/// pair are the same task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    pub id: Uuid,
    pub user_id: String,
    pub integration_id: String,
    pub external_id: String,
    pub source: SourceKind,
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    pub status: TaskStatus,
    #[serde(default)]
    pub priority: Option<Priority>,
    #[serde(default)]
    pub due_date: Option<DateTime<Utc>>,

    /// ConnectWise ticket owner
    #[serde(default)]
    pub connectwise_owner: Option<String>,
    /// ConnectWise assigned member
    #[serde(default)]
    pub connectwise_assigned_to: Option<String>,
    /// Process Plan step assignee
    #[serde(default)]
    pub processplan_assigned_to: Option<String>,

    #[serde(default)]
    pub is_merged: bool,
    /// Back-reference to the merged task that consolidates this one
    #[serde(default)]
    pub merged_task_id: Option<Uuid>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Task {
    /// Create a pending task with no optional fields set
    pub fn new(
        user_id: impl Into<String>,
        source: SourceKind,
        external_id: impl Into<String>,
        title: impl Into<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            user_id: user_id.into(),
            integration_id: String::new(),
            external_id: external_id.into(),
            source,
            title: title.into(),
            description: None,
            status: TaskStatus::Pending,
            priority: None,
            due_date: None,
            connectwise_owner: None,
            connectwise_assigned_to: None,
            processplan_assigned_to: None,
            is_merged: false,
            merged_task_id: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Assignee as understood by this task's source
    ///
    /// Microsoft To Do has no assignee concept and always yields `None`.
    pub fn assignee(&self) -> Option<&str> {
        let value = match self.source {
            SourceKind::ConnectWise => self
                .connectwise_assigned_to
                .as_deref()
                .filter(|s| !s.is_empty())
                .or(self.connectwise_owner.as_deref()),
            SourceKind::ProcessPlan => self.processplan_assigned_to.as_deref(),
            SourceKind::Microsoft => None,
        };
        value.filter(|s| !s.is_empty())
    }

    /// True when both values describe the same external record
    pub fn is_same_record(&self, other: &Task) -> bool {
        self.source == other.source && self.external_id == other.external_id
    }
}
