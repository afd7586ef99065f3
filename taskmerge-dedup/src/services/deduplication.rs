//! Candidate review and reporting
//!
//! Human review of pending candidates (approve merges the pair, reject
//! only records the decision), paginated candidate listing and per-user
//! counters.

use crate::db::DedupStore;
use crate::services::task_merger::TaskMerger;
use chrono::Utc;
use std::sync::Arc;
use taskmerge_common::dedup::{
    CandidatePage, DeduplicationStats, DuplicateReviewRequest, DuplicateReviewResponse,
    MergeTaskRequest, ReviewAction,
};
use taskmerge_common::events::{DedupEvent, EventBus};
use taskmerge_common::{CandidateStatus, Error, MergedBy, Result};
use tracing::info;

/// Largest page size accepted by [`DeduplicationService::get_duplicate_candidates`]
pub const MAX_PAGE_LIMIT: u32 = 100;

#[derive(Clone)]
pub struct DeduplicationService {
    store: Arc<dyn DedupStore>,
    merger: TaskMerger,
    events: EventBus,
}

impl DeduplicationService {
    pub fn new(store: Arc<dyn DedupStore>, merger: TaskMerger, events: EventBus) -> Self {
        Self {
            store,
            merger,
            events,
        }
    }

    /// Approve or reject a pending candidate
    ///
    /// The caller must own at least one of the candidate's tasks; otherwise
    /// the candidate is reported as not found.
    pub async fn review_duplicate_candidate(
        &self,
        request: &DuplicateReviewRequest,
    ) -> Result<DuplicateReviewResponse> {
        let not_found = || Error::NotFound("Duplicate candidate not found".into());

        let candidate = self
            .store
            .find_candidate(request.candidate_id)
            .await?
            .ok_or_else(not_found)?;

        let owned = self
            .store
            .find_tasks_by_ids(&[candidate.task1_id, candidate.task2_id], &request.user_id)
            .await?;
        if owned.is_empty() {
            return Err(not_found());
        }

        if candidate.status != CandidateStatus::Pending {
            return Err(Error::Conflict("Duplicate candidate already reviewed".into()));
        }

        let (status, merged_task) = match request.action {
            ReviewAction::Approve => {
                let response = self
                    .merger
                    .merge_tasks(&MergeTaskRequest {
                        task_ids: vec![candidate.task1_id, candidate.task2_id],
                        user_id: request.user_id.clone(),
                        merged_by: MergedBy::Manual,
                        primary_task_id: None,
                    })
                    .await?;
                (CandidateStatus::Approved, Some(response.merged_task))
            }
            ReviewAction::Reject => (CandidateStatus::Rejected, None),
        };

        let updated = self
            .store
            .update_candidate_status(candidate.id, status, Some(&request.user_id))
            .await?;

        info!(
            candidate_id = %candidate.id,
            user_id = %request.user_id,
            status = status.as_str(),
            "Duplicate candidate reviewed"
        );

        self.events.emit(DedupEvent::CandidateReviewed {
            candidate_id: candidate.id,
            reviewed_by: request.user_id.clone(),
            status,
            timestamp: Utc::now(),
        });

        Ok(DuplicateReviewResponse {
            candidate: updated,
            merged_task,
        })
    }

    /// Page through candidates touching the user's tasks, best score first
    pub async fn get_duplicate_candidates(
        &self,
        user_id: &str,
        status: Option<CandidateStatus>,
        page: u32,
        limit: u32,
    ) -> Result<CandidatePage> {
        if page < 1 || limit < 1 || limit > MAX_PAGE_LIMIT {
            return Err(Error::InvalidInput("Invalid pagination parameters".into()));
        }

        let (candidates, total) = self
            .store
            .list_candidates(user_id, status, page, limit)
            .await?;

        Ok(CandidatePage {
            candidates,
            total,
            page,
            limit,
            has_more: u64::from(page) * u64::from(limit) < total,
        })
    }

    pub async fn get_deduplication_stats(&self, user_id: &str) -> Result<DeduplicationStats> {
        let total_tasks = self.store.count_tasks_for_user(user_id).await?;
        let merged_tasks = self.store.count_merged_tasks(user_id).await?;

        let pending_candidates = self
            .store
            .count_candidates(user_id, Some(CandidateStatus::Pending))
            .await?;
        let approved_candidates = self
            .store
            .count_candidates(user_id, Some(CandidateStatus::Approved))
            .await?;
        let rejected_candidates = self
            .store
            .count_candidates(user_id, Some(CandidateStatus::Rejected))
            .await?;
        let auto_merged_candidates = self
            .store
            .count_candidates(user_id, Some(CandidateStatus::AutoMerged))
            .await?;

        Ok(DeduplicationStats {
            total_tasks,
            merged_tasks,
            pending_candidates,
            approved_candidates,
            rejected_candidates,
            auto_merged_candidates,
            total_candidates: pending_candidates
                + approved_candidates
                + rejected_candidates
                + auto_merged_candidates,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{CandidateStore, SqliteStore};
    use taskmerge_common::db::init_memory_database;
    use taskmerge_common::{Confidence, DuplicateCandidate, DuplicateScore, SourceKind, Task};
    use uuid::Uuid;

    async fn setup() -> (DeduplicationService, SqliteStore, DuplicateCandidate) {
        let store = SqliteStore::new(init_memory_database().await.unwrap(), 1000);
        let shared: Arc<dyn DedupStore> = Arc::new(store.clone());
        let events = EventBus::default();
        let merger = TaskMerger::new(shared.clone(), events.clone());
        let service = DeduplicationService::new(shared, merger, events);

        let a = store
            .save_task(&Task::new("u1", SourceKind::Microsoft, "a", "Patch server"))
            .await
            .unwrap();
        let b = store
            .save_task(&Task::new("u1", SourceKind::ConnectWise, "b", "Patch servers"))
            .await
            .unwrap();
        let candidate = DuplicateCandidate::new(
            a.id,
            b.id,
            DuplicateScore {
                overall_score: 0.7,
                confidence: Confidence::Medium,
                ..DuplicateScore::zero()
            },
        );
        store.create_candidate(&candidate).await.unwrap();
        (service, store, candidate)
    }

    fn review(candidate_id: Uuid, user_id: &str, action: ReviewAction) -> DuplicateReviewRequest {
        DuplicateReviewRequest {
            candidate_id,
            user_id: user_id.into(),
            action,
        }
    }

    #[tokio::test]
    async fn test_reject_creates_no_merge() {
        let (service, _store, candidate) = setup().await;
        let response = service
            .review_duplicate_candidate(&review(candidate.id, "u1", ReviewAction::Reject))
            .await
            .unwrap();

        assert_eq!(response.candidate.status, CandidateStatus::Rejected);
        assert_eq!(response.candidate.reviewed_by.as_deref(), Some("u1"));
        assert!(response.merged_task.is_none());

        let stats = service.get_deduplication_stats("u1").await.unwrap();
        assert_eq!(stats.merged_tasks, 0);
        assert_eq!(stats.rejected_candidates, 1);
        assert_eq!(stats.total_candidates, 1);
    }

    #[tokio::test]
    async fn test_approve_merges_pair() {
        let (service, _store, candidate) = setup().await;
        let response = service
            .review_duplicate_candidate(&review(candidate.id, "u1", ReviewAction::Approve))
            .await
            .unwrap();

        assert_eq!(response.candidate.status, CandidateStatus::Approved);
        let merged = response.merged_task.unwrap();
        assert_eq!(merged.merged_by, MergedBy::Manual);
        assert_eq!(merged.confidence, None);
        assert_eq!(merged.source_ids(), vec![candidate.task1_id, candidate.task2_id]);

        let again = service
            .review_duplicate_candidate(&review(candidate.id, "u1", ReviewAction::Reject))
            .await;
        assert!(matches!(again, Err(Error::Conflict(_))));
    }

    #[tokio::test]
    async fn test_review_by_stranger_is_not_found() {
        let (service, _store, candidate) = setup().await;
        let result = service
            .review_duplicate_candidate(&review(candidate.id, "u2", ReviewAction::Reject))
            .await;
        assert!(matches!(result, Err(Error::NotFound(_))));

        let missing = service
            .review_duplicate_candidate(&review(Uuid::new_v4(), "u1", ReviewAction::Reject))
            .await;
        assert!(matches!(missing, Err(Error::NotFound(_))));
    }

    #[tokio::test]
    async fn test_pagination_validation() {
        let (service, _store, _candidate) = setup().await;
        for (page, limit) in [(0, 10), (1, 0), (1, 101)] {
            let result = service.get_duplicate_candidates("u1", None, page, limit).await;
            assert!(matches!(result, Err(Error::InvalidInput(_))));
        }

        let page = service
            .get_duplicate_candidates("u1", Some(CandidateStatus::Pending), 1, 10)
            .await
            .unwrap();
        assert_eq!(page.total, 1);
        assert!(!page.has_more);
        assert_eq!(page.candidates.len(), 1);
    }
}
