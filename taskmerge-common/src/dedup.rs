//! Deduplication data model
//!
//! Scores, duplicate candidates, merged tasks and their provenance rows,
//! plus the request/response shapes of the engine's exposed operations.

use crate::task::{Priority, SourceKind, Task, TaskStatus};
use crate::{Error, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Confidence bucket derived from the overall score and the two thresholds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Confidence {
    High,
    Medium,
    Low,
}

impl Confidence {
    pub fn as_str(&self) -> &'static str {
        match self {
            Confidence::High => "high",
            Confidence::Medium => "medium",
            Confidence::Low => "low",
        }
    }
}

impl FromStr for Confidence {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "high" => Ok(Confidence::High),
            "medium" => Ok(Confidence::Medium),
            "low" => Ok(Confidence::Low),
            other => Err(Error::InvalidInput(format!("Unknown confidence: {}", other))),
        }
    }
}

/// Multi-factor similarity between two tasks
///
/// Every component lies in `[0, 1]`; `overall_score` is their weighted sum.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DuplicateScore {
    pub title_similarity: f64,
    pub description_similarity: f64,
    pub temporal_proximity: f64,
    pub assignee_match: f64,
    pub priority_match: f64,
    pub overall_score: f64,
    pub confidence: Confidence,
}

impl DuplicateScore {
    /// Score for pairs that must never be treated as duplicates
    pub fn zero() -> Self {
        Self {
            title_similarity: 0.0,
            description_similarity: 0.0,
            temporal_proximity: 0.0,
            assignee_match: 0.0,
            priority_match: 0.0,
            overall_score: 0.0,
            confidence: Confidence::Low,
        }
    }
}

/// Review lifecycle of a duplicate candidate
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CandidateStatus {
    Pending,
    Approved,
    Rejected,
    AutoMerged,
}

impl CandidateStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CandidateStatus::Pending => "pending",
            CandidateStatus::Approved => "approved",
            CandidateStatus::Rejected => "rejected",
            CandidateStatus::AutoMerged => "auto_merged",
        }
    }

    /// Resolved candidates are immutable
    pub fn is_resolved(&self) -> bool {
        !matches!(self, CandidateStatus::Pending)
    }
}

impl FromStr for CandidateStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "pending" => Ok(CandidateStatus::Pending),
            "approved" => Ok(CandidateStatus::Approved),
            "rejected" => Ok(CandidateStatus::Rejected),
            "auto_merged" => Ok(CandidateStatus::AutoMerged),
            other => Err(Error::InvalidInput(format!(
                "Unknown candidate status: {}",
                other
            ))),
        }
    }
}

impl fmt::Display for CandidateStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Scored pairing of two tasks suspected to be the same work item
///
/// The pair is unordered: `(a, b)` and `(b, a)` name the same candidate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DuplicateCandidate {
    pub id: Uuid,
    pub task1_id: Uuid,
    pub task2_id: Uuid,
    pub score: DuplicateScore,
    pub status: CandidateStatus,
    pub reviewed_by: Option<String>,
    pub reviewed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl DuplicateCandidate {
    /// New pending candidate for a task pair
    pub fn new(task1_id: Uuid, task2_id: Uuid, score: DuplicateScore) -> Self {
        Self {
            id: Uuid::new_v4(),
            task1_id,
            task2_id,
            score,
            status: CandidateStatus::Pending,
            reviewed_by: None,
            reviewed_at: None,
            created_at: Utc::now(),
        }
    }

    /// Order-independent key for the task pair
    pub fn pair_key(&self) -> (Uuid, Uuid) {
        pair_key(self.task1_id, self.task2_id)
    }

    pub fn references(&self, task_id: Uuid) -> bool {
        self.task1_id == task_id || self.task2_id == task_id
    }
}

/// Normalize an unordered task pair to `(low, high)`
pub fn pair_key(a: Uuid, b: Uuid) -> (Uuid, Uuid) {
    if a <= b {
        (a, b)
    } else {
        (b, a)
    }
}

/// Who initiated a merge
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MergedBy {
    Auto,
    Manual,
}

impl MergedBy {
    pub fn as_str(&self) -> &'static str {
        match self {
            MergedBy::Auto => "auto",
            MergedBy::Manual => "manual",
        }
    }
}

impl FromStr for MergedBy {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "auto" => Ok(MergedBy::Auto),
            "manual" => Ok(MergedBy::Manual),
            other => Err(Error::InvalidInput(format!("Unknown merge origin: {}", other))),
        }
    }
}

/// Provenance snapshot linking a merged task to one original task
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskSource {
    pub task_id: Uuid,
    pub source: SourceKind,
    pub original_title: String,
    pub original_description: Option<String>,
    pub original_status: TaskStatus,
    pub integration_id: String,
    pub last_sync_at: Option<DateTime<Utc>>,
}

impl TaskSource {
    /// Snapshot a task as it is at merge time
    pub fn snapshot(task: &Task) -> Self {
        Self {
            task_id: task.id,
            source: task.source,
            original_title: task.title.clone(),
            original_description: task.description.clone(),
            original_status: task.status,
            integration_id: task.integration_id.clone(),
            last_sync_at: Some(task.updated_at),
        }
    }
}

/// Consolidated task produced by merging two or more tasks
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MergedTask {
    pub id: Uuid,
    pub user_id: String,
    pub title: String,
    pub description: Option<String>,
    pub status: TaskStatus,
    pub priority: Option<Priority>,
    pub due_date: Option<DateTime<Utc>>,
    pub merged_by: MergedBy,
    /// Fixed 0.75 for automatic merges, absent for manual ones
    pub confidence: Option<f64>,
    pub sources: Vec<TaskSource>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl MergedTask {
    /// Original task ids, in provenance order
    pub fn source_ids(&self) -> Vec<Uuid> {
        self.sources.iter().map(|s| s.task_id).collect()
    }

    /// Distinct trackers contributing to this merge, in first-seen order
    pub fn all_sources(&self) -> Vec<SourceKind> {
        let mut kinds = Vec::new();
        for source in &self.sources {
            if !kinds.contains(&source.source) {
                kinds.push(source.source);
            }
        }
        kinds
    }

    pub fn merged_at(&self) -> DateTime<Utc> {
        self.created_at
    }
}

/// Input to a merge
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MergeTaskRequest {
    pub task_ids: Vec<Uuid>,
    pub user_id: String,
    pub merged_by: MergedBy,
    /// Task whose title/description become the merged task's
    #[serde(default)]
    pub primary_task_id: Option<Uuid>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MergeTaskResponse {
    pub merged_task: MergedTask,
    pub original_tasks: Vec<Uuid>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UnmergeTaskRequest {
    pub merged_task_id: Uuid,
    pub user_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UnmergeTaskResponse {
    pub restored_tasks: Vec<Uuid>,
}

/// Human decision on a pending candidate
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReviewAction {
    Approve,
    Reject,
}

impl FromStr for ReviewAction {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "approve" => Ok(ReviewAction::Approve),
            "reject" => Ok(ReviewAction::Reject),
            other => Err(Error::InvalidInput(format!("Unknown review action: {}", other))),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DuplicateReviewRequest {
    pub candidate_id: Uuid,
    pub user_id: String,
    pub action: ReviewAction,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DuplicateReviewResponse {
    pub candidate: DuplicateCandidate,
    pub merged_task: Option<MergedTask>,
}

/// Outcome of a batch detection run over one user's tasks
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DuplicateDetectionResult {
    /// Every candidate created by this run
    pub duplicates: Vec<DuplicateCandidate>,
    /// Ids of merged tasks produced by auto-merge
    pub auto_merged: Vec<Uuid>,
    /// Candidates left pending for human review
    pub suggestions: Vec<DuplicateCandidate>,
    /// Eligible (non-merged) tasks examined
    pub tasks_examined: usize,
    /// Pairs scored during this run
    pub pairs_compared: usize,
    /// Pairs skipped because a storage call failed
    pub errors: usize,
    /// True when the run stopped early on cancellation or deadline
    pub cancelled: bool,
}

/// Page of candidates for review
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CandidatePage {
    pub candidates: Vec<DuplicateCandidate>,
    pub total: u64,
    pub page: u32,
    pub limit: u32,
    pub has_more: bool,
}

/// Per-user deduplication counters
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeduplicationStats {
    pub total_tasks: u64,
    pub merged_tasks: u64,
    pub pending_candidates: u64,
    pub approved_candidates: u64,
    pub rejected_candidates: u64,
    pub auto_merged_candidates: u64,
    pub total_candidates: u64,
}

/// Outcome of checking one newly ingested task against the user's others
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewTaskDetectionResult {
    pub is_duplicate: bool,
    pub merged_task_id: Option<Uuid>,
    pub duplicate_candidate_id: Option<Uuid>,
    pub auto_merged: bool,
}

/// Unpersisted scored pair from an analysis sweep
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScoredPair {
    pub task1: Task,
    pub task2: Task,
    pub score: DuplicateScore,
}

/// Result of the source-bucketed analysis sweep
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OptimizedDetectionResult {
    pub candidates: Vec<ScoredPair>,
    pub pairs_compared: usize,
    /// Wall clock time in milliseconds
    pub processing_time: u64,
    pub cancelled: bool,
}

/// Aggregate counters reported by a background sweep
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SweepSummary {
    pub processed: usize,
    pub duplicates_found: usize,
    pub auto_merged: usize,
    pub errors: usize,
    pub cancelled: bool,
}
