//! Detection Orchestrator
//!
//! Drives pairwise scoring over a user's tasks, records duplicate
//! candidates and triggers automatic merges for high-confidence pairs.
//!
//! **Modes:**
//! - Batch: every unordered pair of the user's non-merged tasks; every
//!   qualifying pair becomes a candidate
//! - Incremental: one new task against the others; only the single best
//!   qualifying match becomes a candidate
//! - Analysis: cross-source pairs only, scored but never persisted

use crate::db::DedupStore;
use crate::services::similarity_scorer::calculate_duplicate_score;
use crate::services::task_merger::TaskMerger;
use chrono::Utc;
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use std::time::Instant;
use taskmerge_common::dedup::{
    DuplicateDetectionResult, MergeTaskRequest, NewTaskDetectionResult, OptimizedDetectionResult,
    ScoredPair,
};
use taskmerge_common::events::{DedupEvent, EventBus};
use taskmerge_common::{
    CandidateStatus, Confidence, DuplicateCandidate, DuplicateDetectionConfig, DuplicateScore,
    MergedBy, Result, SourceKind, Task,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// True when a sweep must stop before scoring its next pair
fn should_stop(cancel: &CancellationToken, deadline: Option<Instant>) -> bool {
    cancel.is_cancelled() || deadline.is_some_and(|d| Instant::now() >= d)
}

fn qualifies_for_auto_merge(score: &DuplicateScore, config: &DuplicateDetectionConfig) -> bool {
    score.confidence == Confidence::High && score.overall_score >= config.auto_merge_threshold
}

/// What a batch run did with one pair
enum PairOutcome {
    /// The pair already had a candidate and was not scored
    AlreadyKnown,
    /// Scored below the suggestion threshold, or another run recorded it first
    NoCandidate,
    Suggested(DuplicateCandidate),
    AutoMerged(Uuid, DuplicateCandidate),
}

/// Duplicate detection over stored tasks
#[derive(Clone)]
pub struct DuplicateDetector {
    store: Arc<dyn DedupStore>,
    merger: TaskMerger,
    events: EventBus,
}

impl DuplicateDetector {
    pub fn new(store: Arc<dyn DedupStore>, merger: TaskMerger, events: EventBus) -> Self {
        Self {
            store,
            merger,
            events,
        }
    }

    /// Batch detection over all of the user's non-merged tasks
    pub async fn detect_for_user(
        &self,
        user_id: &str,
        config: &DuplicateDetectionConfig,
    ) -> Result<DuplicateDetectionResult> {
        self.detect_for_user_with_cancel(user_id, config, &CancellationToken::new(), None)
            .await
    }

    /// Batch detection that stops at the next pair once `cancel` fires or
    /// `deadline` passes
    ///
    /// On stop the partial result is returned with `cancelled` set. Merges
    /// already performed stay committed. A pair whose storage calls fail is
    /// skipped and counted in `errors`; only failing to list the user's
    /// tasks aborts the run.
    pub async fn detect_for_user_with_cancel(
        &self,
        user_id: &str,
        config: &DuplicateDetectionConfig,
        cancel: &CancellationToken,
        deadline: Option<Instant>,
    ) -> Result<DuplicateDetectionResult> {
        let tasks = self.store.list_non_merged_tasks_for_user(user_id).await?;
        let mut result = DuplicateDetectionResult {
            tasks_examined: tasks.len(),
            ..Default::default()
        };

        info!(user_id, tasks = tasks.len(), "Starting duplicate detection");

        if tasks.len() < 2 {
            return Ok(result);
        }

        // Tasks consumed by an auto-merge during this run are no longer eligible
        let mut merged_in_run: HashSet<Uuid> = HashSet::new();

        'outer: for i in 0..tasks.len() {
            for j in (i + 1)..tasks.len() {
                if should_stop(cancel, deadline) {
                    result.cancelled = true;
                    break 'outer;
                }

                let (task1, task2) = (&tasks[i], &tasks[j]);
                if merged_in_run.contains(&task1.id) || merged_in_run.contains(&task2.id) {
                    continue;
                }

                match self.evaluate_pair(user_id, task1, task2, config).await {
                    Ok(PairOutcome::AlreadyKnown) => {}
                    Ok(PairOutcome::NoCandidate) => result.pairs_compared += 1,
                    Ok(PairOutcome::Suggested(candidate)) => {
                        result.pairs_compared += 1;
                        result.suggestions.push(candidate.clone());
                        result.duplicates.push(candidate);
                    }
                    Ok(PairOutcome::AutoMerged(merged_task_id, candidate)) => {
                        result.pairs_compared += 1;
                        merged_in_run.insert(task1.id);
                        merged_in_run.insert(task2.id);
                        result.auto_merged.push(merged_task_id);
                        result.duplicates.push(candidate);
                    }
                    Err(e) => {
                        result.errors += 1;
                        warn!(
                            user_id,
                            task1_id = %task1.id,
                            task2_id = %task2.id,
                            error = %e,
                            "Skipping pair after storage failure"
                        );
                    }
                }
            }
        }

        info!(
            user_id,
            duplicates = result.duplicates.len(),
            auto_merged = result.auto_merged.len(),
            pairs = result.pairs_compared,
            errors = result.errors,
            cancelled = result.cancelled,
            "Duplicate detection completed"
        );

        Ok(result)
    }

    /// Score one pair and record a candidate when it qualifies
    async fn evaluate_pair(
        &self,
        user_id: &str,
        task1: &Task,
        task2: &Task,
        config: &DuplicateDetectionConfig,
    ) -> Result<PairOutcome> {
        if self
            .store
            .find_existing_candidate(task1.id, task2.id)
            .await?
            .is_some()
        {
            return Ok(PairOutcome::AlreadyKnown);
        }

        let score = calculate_duplicate_score(task1, task2, config);
        if score.overall_score < config.suggestion_threshold {
            return Ok(PairOutcome::NoCandidate);
        }

        let Some(candidate) = self.record_candidate(task1, task2, score).await? else {
            return Ok(PairOutcome::NoCandidate);
        };

        if qualifies_for_auto_merge(&score, config) {
            if let Some((merged_task_id, updated)) =
                self.try_auto_merge(&candidate, user_id).await
            {
                return Ok(PairOutcome::AutoMerged(merged_task_id, updated));
            }
        }

        Ok(PairOutcome::Suggested(candidate))
    }

    /// Check one newly ingested task against the user's other tasks
    ///
    /// Only the best-scoring qualifying match is recorded. Ties keep the
    /// earliest match in `existing_tasks` order. Matches a reviewer already
    /// rejected are passed over; a match with any other existing candidate
    /// is reported through that candidate without writing a new one.
    pub async fn process_new_task_for_duplicates(
        &self,
        new_task: &Task,
        existing_tasks: &[Task],
        config: &DuplicateDetectionConfig,
    ) -> Result<NewTaskDetectionResult> {
        if new_task.is_merged {
            return Ok(NewTaskDetectionResult::default());
        }

        let mut matches: Vec<(&Task, DuplicateScore)> = existing_tasks
            .iter()
            .filter(|t| !t.is_merged && t.id != new_task.id)
            .map(|other| (other, calculate_duplicate_score(new_task, other, config)))
            .filter(|(_, score)| score.overall_score >= config.suggestion_threshold)
            .collect();
        // Stable sort: equal scores keep input order
        matches.sort_by(|a, b| b.1.overall_score.total_cmp(&a.1.overall_score));

        for (matched, score) in matches {
            match self
                .store
                .find_existing_candidate(new_task.id, matched.id)
                .await?
            {
                Some(existing) if existing.status == CandidateStatus::Rejected => {
                    debug!(
                        task_id = %new_task.id,
                        other_id = %matched.id,
                        "Skipping match rejected in review"
                    );
                }
                Some(existing) => return Ok(known_duplicate(&existing)),
                None => return self.record_new_task_match(new_task, matched, score, config).await,
            }
        }

        debug!(task_id = %new_task.id, "No duplicate found for new task");
        Ok(NewTaskDetectionResult::default())
    }

    async fn record_new_task_match(
        &self,
        new_task: &Task,
        matched: &Task,
        score: DuplicateScore,
        config: &DuplicateDetectionConfig,
    ) -> Result<NewTaskDetectionResult> {
        let Some(candidate) = self.record_candidate(new_task, matched, score).await? else {
            // Another run recorded the pair in the meantime
            let existing = self
                .store
                .find_existing_candidate(new_task.id, matched.id)
                .await?;
            return Ok(existing
                .filter(|c| c.status != CandidateStatus::Rejected)
                .map(|c| known_duplicate(&c))
                .unwrap_or_default());
        };

        if qualifies_for_auto_merge(&score, config) {
            if let Some((merged_task_id, _)) =
                self.try_auto_merge(&candidate, &new_task.user_id).await
            {
                return Ok(NewTaskDetectionResult {
                    is_duplicate: true,
                    merged_task_id: Some(merged_task_id),
                    duplicate_candidate_id: Some(candidate.id),
                    auto_merged: true,
                });
            }
        }

        Ok(NewTaskDetectionResult {
            is_duplicate: true,
            merged_task_id: None,
            duplicate_candidate_id: Some(candidate.id),
            auto_merged: false,
        })
    }

    /// Create the candidate for a pair unless one already exists
    async fn record_candidate(
        &self,
        task1: &Task,
        task2: &Task,
        score: DuplicateScore,
    ) -> Result<Option<DuplicateCandidate>> {
        let candidate = DuplicateCandidate::new(task1.id, task2.id, score);
        if !self.store.create_candidate(&candidate).await? {
            return Ok(None);
        }

        debug!(
            candidate_id = %candidate.id,
            task1_id = %task1.id,
            task2_id = %task2.id,
            overall_score = score.overall_score,
            confidence = score.confidence.as_str(),
            "Duplicate candidate recorded"
        );

        self.events.emit(DedupEvent::CandidateCreated {
            candidate_id: candidate.id,
            task1_id: task1.id,
            task2_id: task2.id,
            overall_score: score.overall_score,
            timestamp: Utc::now(),
        });

        Ok(Some(candidate))
    }

    /// Merge the candidate's pair automatically
    ///
    /// A failed merge is logged and yields `None`; the candidate stays
    /// pending as a suggestion. Once the merge has committed, a failure to
    /// mark the candidate is only logged and the pending candidate is
    /// returned alongside the merge.
    async fn try_auto_merge(
        &self,
        candidate: &DuplicateCandidate,
        user_id: &str,
    ) -> Option<(Uuid, DuplicateCandidate)> {
        let request = MergeTaskRequest {
            task_ids: vec![candidate.task1_id, candidate.task2_id],
            user_id: user_id.to_string(),
            merged_by: MergedBy::Auto,
            primary_task_id: None,
        };

        let merged_task_id = match self.merger.merge_tasks(&request).await {
            Ok(response) => response.merged_task.id,
            Err(e) => {
                warn!(
                    candidate_id = %candidate.id,
                    task1_id = %candidate.task1_id,
                    task2_id = %candidate.task2_id,
                    error = %e,
                    "Auto-merge failed, keeping candidate as suggestion"
                );
                return None;
            }
        };

        info!(
            candidate_id = %candidate.id,
            merged_task_id = %merged_task_id,
            "Auto-merged duplicate pair"
        );

        match self
            .store
            .update_candidate_status(candidate.id, CandidateStatus::AutoMerged, None)
            .await
        {
            Ok(updated) => Some((merged_task_id, updated)),
            Err(e) => {
                warn!(
                    candidate_id = %candidate.id,
                    merged_task_id = %merged_task_id,
                    error = %e,
                    "Merged pair but could not mark candidate auto-merged"
                );
                Some((merged_task_id, candidate.clone()))
            }
        }
    }
}

/// Result for a new task whose best match already has a candidate
fn known_duplicate(candidate: &DuplicateCandidate) -> NewTaskDetectionResult {
    NewTaskDetectionResult {
        is_duplicate: true,
        merged_task_id: None,
        duplicate_candidate_id: Some(candidate.id),
        auto_merged: candidate.status == CandidateStatus::AutoMerged,
    }
}

/// Score only cross-source pairs of `tasks`, without persisting anything
///
/// Tasks are bucketed by source; same-source pairs are never compared.
/// Pairs scoring at or above the suggestion threshold are returned.
pub fn optimized_duplicate_detection(
    tasks: &[Task],
    config: &DuplicateDetectionConfig,
    cancel: &CancellationToken,
    deadline: Option<Instant>,
) -> OptimizedDetectionResult {
    let started = Instant::now();
    let mut result = OptimizedDetectionResult::default();

    let mut buckets: BTreeMap<SourceKind, Vec<&Task>> = BTreeMap::new();
    for task in tasks {
        buckets.entry(task.source).or_default().push(task);
    }
    let buckets: Vec<&Vec<&Task>> = buckets.values().collect();

    'outer: for (i, bucket1) in buckets.iter().enumerate() {
        for bucket2 in &buckets[i + 1..] {
            for task1 in bucket1.iter() {
                for task2 in bucket2.iter() {
                    if should_stop(cancel, deadline) {
                        result.cancelled = true;
                        break 'outer;
                    }

                    let score = calculate_duplicate_score(task1, task2, config);
                    result.pairs_compared += 1;
                    if score.overall_score >= config.suggestion_threshold {
                        result.candidates.push(ScoredPair {
                            task1: (*task1).clone(),
                            task2: (*task2).clone(),
                            score,
                        });
                    }
                }
            }
        }
    }

    result.processing_time = started.elapsed().as_millis() as u64;
    info!(
        tasks = tasks.len(),
        pairs = result.pairs_compared,
        candidates = result.candidates.len(),
        processing_time_ms = result.processing_time,
        "Optimized duplicate detection completed"
    );
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{CandidateStore, MergeStore, SqliteStore, TaskStore};
    use async_trait::async_trait;
    use chrono::{DateTime, TimeZone};
    use taskmerge_common::db::init_memory_database;
    use taskmerge_common::dedup::{DuplicateReviewRequest, ReviewAction};
    use taskmerge_common::{Error, MergedTask, Priority};

    /// SQLite store that fails chosen calls
    struct FailingStore {
        inner: SqliteStore,
        /// Candidate lookups touching this task fail
        broken_task: Option<Uuid>,
        fail_status_updates: bool,
    }

    fn injected() -> Error {
        Error::Internal("injected storage failure".into())
    }

    #[async_trait]
    impl TaskStore for FailingStore {
        async fn list_non_merged_tasks_for_user(&self, user_id: &str) -> Result<Vec<Task>> {
            self.inner.list_non_merged_tasks_for_user(user_id).await
        }

        async fn find_tasks_by_ids(&self, ids: &[Uuid], user_id: &str) -> Result<Vec<Task>> {
            self.inner.find_tasks_by_ids(ids, user_id).await
        }

        async fn count_tasks_for_user(&self, user_id: &str) -> Result<u64> {
            self.inner.count_tasks_for_user(user_id).await
        }
    }

    #[async_trait]
    impl CandidateStore for FailingStore {
        async fn find_existing_candidate(
            &self,
            a: Uuid,
            b: Uuid,
        ) -> Result<Option<DuplicateCandidate>> {
            if self.broken_task.is_some_and(|t| t == a || t == b) {
                return Err(injected());
            }
            self.inner.find_existing_candidate(a, b).await
        }

        async fn create_candidate(&self, candidate: &DuplicateCandidate) -> Result<bool> {
            self.inner.create_candidate(candidate).await
        }

        async fn update_candidate_status(
            &self,
            id: Uuid,
            status: CandidateStatus,
            reviewed_by: Option<&str>,
        ) -> Result<DuplicateCandidate> {
            if self.fail_status_updates {
                return Err(injected());
            }
            self.inner.update_candidate_status(id, status, reviewed_by).await
        }

        async fn find_candidate(&self, id: Uuid) -> Result<Option<DuplicateCandidate>> {
            self.inner.find_candidate(id).await
        }

        async fn list_candidates(
            &self,
            user_id: &str,
            status: Option<CandidateStatus>,
            page: u32,
            limit: u32,
        ) -> Result<(Vec<DuplicateCandidate>, u64)> {
            self.inner.list_candidates(user_id, status, page, limit).await
        }

        async fn count_candidates(
            &self,
            user_id: &str,
            status: Option<CandidateStatus>,
        ) -> Result<u64> {
            self.inner.count_candidates(user_id, status).await
        }
    }

    #[async_trait]
    impl MergeStore for FailingStore {
        async fn create_merged_task(&self, merged: &MergedTask) -> Result<()> {
            self.inner.create_merged_task(merged).await
        }

        async fn find_merged_task(&self, id: Uuid, user_id: &str) -> Result<Option<MergedTask>> {
            self.inner.find_merged_task(id, user_id).await
        }

        async fn list_merged_tasks(&self, user_id: &str) -> Result<Vec<MergedTask>> {
            self.inner.list_merged_tasks(user_id).await
        }

        async fn delete_merged_task_and_sources(&self, id: Uuid) -> Result<Vec<Uuid>> {
            self.inner.delete_merged_task_and_sources(id).await
        }

        async fn count_merged_tasks(&self, user_id: &str) -> Result<u64> {
            self.inner.count_merged_tasks(user_id).await
        }
    }

    fn detector_over(store: FailingStore) -> DuplicateDetector {
        let shared: Arc<dyn DedupStore> = Arc::new(store);
        let events = EventBus::default();
        let merger = TaskMerger::new(shared.clone(), events.clone());
        DuplicateDetector::new(shared, merger, events)
    }

    fn created() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 2, 1, 12, 0, 0).unwrap()
    }

    fn task(source: SourceKind, ext: &str, title: &str) -> Task {
        let mut task = Task::new("u1", source, ext, title);
        task.description = Some("Users cannot sign in".into());
        task.priority = Some(Priority::High);
        task.created_at = created();
        task.updated_at = created();
        task
    }

    async fn setup() -> (DuplicateDetector, SqliteStore) {
        let store = SqliteStore::new(init_memory_database().await.unwrap(), 1000);
        let shared: Arc<dyn DedupStore> = Arc::new(store.clone());
        let events = EventBus::default();
        let merger = TaskMerger::new(shared.clone(), events.clone());
        (DuplicateDetector::new(shared, merger, events), store)
    }

    #[tokio::test]
    async fn test_batch_auto_merges_high_confidence_pair() {
        let (detector, store) = setup().await;
        let a = store.save_task(&task(SourceKind::Microsoft, "ms-1", "Fix login bug")).await.unwrap();
        let b = store.save_task(&task(SourceKind::ConnectWise, "cw-1", "Fix login bug")).await.unwrap();

        let result = detector
            .detect_for_user("u1", &DuplicateDetectionConfig::default())
            .await
            .unwrap();

        assert_eq!(result.duplicates.len(), 1);
        assert_eq!(result.auto_merged.len(), 1);
        assert!(result.suggestions.is_empty());
        assert_eq!(result.duplicates[0].status, CandidateStatus::AutoMerged);

        let merged = store.find_tasks_by_ids(&[a.id, b.id], "u1").await.unwrap();
        assert!(merged.iter().all(|t| t.merged_task_id == Some(result.auto_merged[0])));
    }

    #[tokio::test]
    async fn test_batch_is_idempotent_for_suggestions() {
        let (detector, store) = setup().await;
        // Medium band: same title, one description missing
        let mut a = task(SourceKind::Microsoft, "ms-1", "Quarterly budget review");
        let mut b = task(SourceKind::ProcessPlan, "pp-1", "Quarterly budget review");
        a.description = Some("Collect numbers".into());
        b.description = None;
        store.save_task(&a).await.unwrap();
        store.save_task(&b).await.unwrap();

        let config = DuplicateDetectionConfig::default();
        let first = detector.detect_for_user("u1", &config).await.unwrap();
        assert_eq!(first.suggestions.len(), 1);
        assert!(first.auto_merged.is_empty());

        let second = detector.detect_for_user("u1", &config).await.unwrap();
        assert!(second.duplicates.is_empty());
        assert_eq!(second.pairs_compared, 0);
        assert_eq!(store.count_candidates("u1", None).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_batch_with_fewer_than_two_tasks() {
        let (detector, store) = setup().await;
        store.save_task(&task(SourceKind::Microsoft, "ms-1", "Solo")).await.unwrap();
        let result = detector
            .detect_for_user("u1", &DuplicateDetectionConfig::default())
            .await
            .unwrap();
        assert_eq!(result.tasks_examined, 1);
        assert!(result.duplicates.is_empty());
    }

    #[tokio::test]
    async fn test_cancelled_sweep_stops_before_first_pair() {
        let (detector, store) = setup().await;
        store.save_task(&task(SourceKind::Microsoft, "ms-1", "Fix login bug")).await.unwrap();
        store.save_task(&task(SourceKind::ConnectWise, "cw-1", "Fix login bug")).await.unwrap();

        let cancel = CancellationToken::new();
        cancel.cancel();
        let result = detector
            .detect_for_user_with_cancel("u1", &DuplicateDetectionConfig::default(), &cancel, None)
            .await
            .unwrap();

        assert!(result.cancelled);
        assert_eq!(result.pairs_compared, 0);
        assert_eq!(store.count_candidates("u1", None).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_new_task_keeps_only_best_match() {
        let (detector, store) = setup().await;
        let exact = store.save_task(&task(SourceKind::ConnectWise, "cw-1", "Fix login bug")).await.unwrap();
        let close = store.save_task(&task(SourceKind::ProcessPlan, "pp-1", "Fix logon bug")).await.unwrap();
        let new_task = store.save_task(&task(SourceKind::Microsoft, "ms-1", "Fix login bug")).await.unwrap();

        let config = DuplicateDetectionConfig {
            auto_merge_threshold: 0.99,
            ..Default::default()
        };
        let outcome = detector
            .process_new_task_for_duplicates(&new_task, &[close.clone(), exact.clone(), new_task.clone()], &config)
            .await
            .unwrap();

        assert!(outcome.is_duplicate);
        assert!(!outcome.auto_merged);
        let candidate = store
            .find_candidate(outcome.duplicate_candidate_id.unwrap())
            .await
            .unwrap()
            .unwrap();
        assert!(candidate.references(exact.id));
        assert!(candidate.references(new_task.id));
        assert_eq!(store.count_candidates("u1", None).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_new_task_auto_merge() {
        let (detector, store) = setup().await;
        let existing = store.save_task(&task(SourceKind::ConnectWise, "cw-1", "Fix login bug")).await.unwrap();
        let new_task = store.save_task(&task(SourceKind::Microsoft, "ms-1", "Fix login bug")).await.unwrap();

        let outcome = detector
            .process_new_task_for_duplicates(&new_task, &[existing], &DuplicateDetectionConfig::default())
            .await
            .unwrap();

        assert!(outcome.is_duplicate);
        assert!(outcome.auto_merged);
        assert!(outcome.merged_task_id.is_some());
    }

    #[tokio::test]
    async fn test_new_task_without_match() {
        let (detector, store) = setup().await;
        let existing = store.save_task(&task(SourceKind::ConnectWise, "cw-1", "Order toner")).await.unwrap();
        let mut unrelated = task(SourceKind::Microsoft, "ms-1", "Plan offsite");
        unrelated.description = Some("Venue shortlist and catering".into());
        unrelated.priority = None;
        unrelated.created_at = created() + chrono::Duration::days(30);
        let new_task = store.save_task(&unrelated).await.unwrap();

        let outcome = detector
            .process_new_task_for_duplicates(&new_task, &[existing], &DuplicateDetectionConfig::default())
            .await
            .unwrap();
        assert_eq!(outcome, NewTaskDetectionResult::default());
    }

    #[test]
    fn test_optimized_detection_skips_same_source_pairs() {
        let tasks = vec![
            task(SourceKind::Microsoft, "ms-1", "Fix login bug"),
            task(SourceKind::Microsoft, "ms-2", "Fix login bug"),
            task(SourceKind::ConnectWise, "cw-1", "Fix login bug"),
        ];

        let result = optimized_duplicate_detection(
            &tasks,
            &DuplicateDetectionConfig::default(),
            &CancellationToken::new(),
            None,
        );

        assert_eq!(result.pairs_compared, 2);
        assert_eq!(result.candidates.len(), 2);
        assert!(result
            .candidates
            .iter()
            .all(|pair| pair.task1.source != pair.task2.source));
        assert!(!result.cancelled);
    }

    #[tokio::test]
    async fn test_failing_pairs_are_counted_and_sweep_continues() {
        let (_, store) = setup().await;
        // Listed first, so both of its pairs fail before the good pair runs
        let mut early = task(SourceKind::ProcessPlan, "pp-1", "Fix login bug");
        early.created_at = created() - chrono::Duration::days(1);
        let broken = store.save_task(&early).await.unwrap();
        let a = store.save_task(&task(SourceKind::Microsoft, "ms-1", "Fix login bug")).await.unwrap();
        let b = store.save_task(&task(SourceKind::ConnectWise, "cw-1", "Fix login bug")).await.unwrap();

        let detector = detector_over(FailingStore {
            inner: store.clone(),
            broken_task: Some(broken.id),
            fail_status_updates: false,
        });
        let result = detector
            .detect_for_user("u1", &DuplicateDetectionConfig::default())
            .await
            .unwrap();

        assert_eq!(result.errors, 2);
        assert_eq!(result.auto_merged.len(), 1);
        assert_eq!(result.pairs_compared, 1);
        let merged = store.find_tasks_by_ids(&[a.id, b.id], "u1").await.unwrap();
        assert!(merged.iter().all(|t| t.merged_task_id == Some(result.auto_merged[0])));
    }

    #[tokio::test]
    async fn test_committed_merge_survives_candidate_update_failure() {
        let (_, store) = setup().await;
        let a = store.save_task(&task(SourceKind::Microsoft, "ms-1", "Fix login bug")).await.unwrap();
        let b = store.save_task(&task(SourceKind::ConnectWise, "cw-1", "Fix login bug")).await.unwrap();

        let detector = detector_over(FailingStore {
            inner: store.clone(),
            broken_task: None,
            fail_status_updates: true,
        });
        let result = detector
            .detect_for_user("u1", &DuplicateDetectionConfig::default())
            .await
            .unwrap();

        assert_eq!(result.errors, 0);
        assert_eq!(result.auto_merged.len(), 1);
        assert!(result.suggestions.is_empty());
        assert_eq!(result.duplicates[0].status, CandidateStatus::Pending);
        assert_eq!(store.count_merged_tasks("u1").await.unwrap(), 1);
        let merged = store.find_tasks_by_ids(&[a.id, b.id], "u1").await.unwrap();
        assert!(merged.iter().all(|t| t.is_merged));
    }

    #[tokio::test]
    async fn test_new_task_ignores_rejected_pair() {
        let (detector, store) = setup().await;
        let existing = store.save_task(&task(SourceKind::ConnectWise, "cw-1", "Fix login bug")).await.unwrap();
        let new_task = store.save_task(&task(SourceKind::Microsoft, "ms-1", "Fix login bug")).await.unwrap();

        // Suggestion only, so the pair stays reviewable
        let config = DuplicateDetectionConfig {
            auto_merge_threshold: 0.99,
            ..Default::default()
        };
        let first = detector
            .process_new_task_for_duplicates(&new_task, &[existing.clone()], &config)
            .await
            .unwrap();
        assert!(first.is_duplicate);

        let shared: Arc<dyn DedupStore> = Arc::new(store.clone());
        let review = crate::services::DeduplicationService::new(
            shared.clone(),
            TaskMerger::new(shared, EventBus::default()),
            EventBus::default(),
        );
        review
            .review_duplicate_candidate(&DuplicateReviewRequest {
                candidate_id: first.duplicate_candidate_id.unwrap(),
                user_id: "u1".into(),
                action: ReviewAction::Reject,
            })
            .await
            .unwrap();

        let again = detector
            .process_new_task_for_duplicates(&new_task, &[existing], &config)
            .await
            .unwrap();
        assert_eq!(again, NewTaskDetectionResult::default());
        assert_eq!(store.count_candidates("u1", None).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_new_task_reports_pending_pair_without_new_candidate() {
        let (detector, store) = setup().await;
        let existing = store.save_task(&task(SourceKind::ConnectWise, "cw-1", "Fix login bug")).await.unwrap();
        let new_task = store.save_task(&task(SourceKind::Microsoft, "ms-1", "Fix login bug")).await.unwrap();
        let config = DuplicateDetectionConfig {
            auto_merge_threshold: 0.99,
            ..Default::default()
        };

        let first = detector
            .process_new_task_for_duplicates(&new_task, &[existing.clone()], &config)
            .await
            .unwrap();
        let second = detector
            .process_new_task_for_duplicates(&new_task, &[existing], &config)
            .await
            .unwrap();

        assert!(second.is_duplicate);
        assert_eq!(second.duplicate_candidate_id, first.duplicate_candidate_id);
        assert_eq!(store.count_candidates("u1", None).await.unwrap(), 1);
    }
}
