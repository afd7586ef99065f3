//! Persistence seams
//!
//! The detection and merge services depend on these traits only. The
//! SQLite implementation lives in the sibling modules; tests may swap in
//! their own.

use async_trait::async_trait;
use taskmerge_common::{CandidateStatus, DuplicateCandidate, MergedTask, Result, Task};
use uuid::Uuid;

/// Read access to normalized tasks
#[async_trait]
pub trait TaskStore: Send + Sync {
    /// All tasks of `user_id` that are not part of a merge
    async fn list_non_merged_tasks_for_user(&self, user_id: &str) -> Result<Vec<Task>>;

    /// Tasks among `ids` owned by `user_id`, in the order of `ids`
    ///
    /// Ids that do not exist or belong to another user are silently absent.
    async fn find_tasks_by_ids(&self, ids: &[Uuid], user_id: &str) -> Result<Vec<Task>>;

    async fn count_tasks_for_user(&self, user_id: &str) -> Result<u64>;
}

/// Duplicate candidate bookkeeping
#[async_trait]
pub trait CandidateStore: Send + Sync {
    /// Candidate for the unordered pair `{a, b}`, in either stored order
    async fn find_existing_candidate(&self, a: Uuid, b: Uuid) -> Result<Option<DuplicateCandidate>>;

    /// Insert unless the pair already has a candidate
    ///
    /// Returns `false` when another candidate for the pair won the race.
    async fn create_candidate(&self, candidate: &DuplicateCandidate) -> Result<bool>;

    /// Resolve a pending candidate
    ///
    /// Fails with `NotFound` for an unknown id and `Conflict` when the
    /// candidate is no longer pending.
    async fn update_candidate_status(
        &self,
        id: Uuid,
        status: CandidateStatus,
        reviewed_by: Option<&str>,
    ) -> Result<DuplicateCandidate>;

    async fn find_candidate(&self, id: Uuid) -> Result<Option<DuplicateCandidate>>;

    /// One page of candidates touching the user's tasks, best score first,
    /// plus the total number of matching candidates.
    async fn list_candidates(
        &self,
        user_id: &str,
        status: Option<CandidateStatus>,
        page: u32,
        limit: u32,
    ) -> Result<(Vec<DuplicateCandidate>, u64)>;

    async fn count_candidates(&self, user_id: &str, status: Option<CandidateStatus>)
        -> Result<u64>;
}

/// Merged task persistence
#[async_trait]
pub trait MergeStore: Send + Sync {
    /// Persist a merged task, link its source tasks and write provenance
    ///
    /// Atomic: if any source task is already linked to a merge by the time
    /// the write happens, nothing is written and `Conflict` is returned.
    async fn create_merged_task(&self, merged: &MergedTask) -> Result<()>;

    async fn find_merged_task(&self, id: Uuid, user_id: &str) -> Result<Option<MergedTask>>;

    /// Newest first
    async fn list_merged_tasks(&self, user_id: &str) -> Result<Vec<MergedTask>>;

    /// Unlink the source tasks and delete the merged task with its
    /// provenance, atomically. Returns the ids of the restored tasks.
    async fn delete_merged_task_and_sources(&self, id: Uuid) -> Result<Vec<Uuid>>;

    async fn count_merged_tasks(&self, user_id: &str) -> Result<u64>;
}

/// Everything the deduplication services need from storage
pub trait DedupStore: TaskStore + CandidateStore + MergeStore {}

impl<T: TaskStore + CandidateStore + MergeStore> DedupStore for T {}
