//! Duplicate candidate table operations

use super::{parse_uuid, CandidateStore, SqliteStore};
use crate::utils::retry_on_lock;
use async_trait::async_trait;
use chrono::Utc;
use sqlx::sqlite::SqliteRow;
use sqlx::Row;
use taskmerge_common::dedup::pair_key;
use taskmerge_common::{
    CandidateStatus, Confidence, DuplicateCandidate, DuplicateScore, Error, Result,
};
use uuid::Uuid;

const CANDIDATE_COLUMNS: &str = r#"
    c.id, c.task1_id, c.task2_id, c.title_similarity, c.description_similarity,
    c.temporal_proximity, c.assignee_match, c.priority_match, c.overall_score,
    c.confidence, c.status, c.reviewed_by, c.reviewed_at, c.created_at
"#;

/// Candidates touching at least one of the user's tasks
const USER_SCOPE: &str = r#"
    FROM duplicate_candidates c
    JOIN tasks t1 ON t1.id = c.task1_id
    JOIN tasks t2 ON t2.id = c.task2_id
    WHERE (t1.user_id = ? OR t2.user_id = ?)
      AND (? IS NULL OR c.status = ?)
"#;

fn candidate_from_row(row: &SqliteRow) -> Result<DuplicateCandidate> {
    let id: String = row.try_get("id")?;
    let task1_id: String = row.try_get("task1_id")?;
    let task2_id: String = row.try_get("task2_id")?;
    let confidence: String = row.try_get("confidence")?;
    let status: String = row.try_get("status")?;

    Ok(DuplicateCandidate {
        id: parse_uuid(&id)?,
        task1_id: parse_uuid(&task1_id)?,
        task2_id: parse_uuid(&task2_id)?,
        score: DuplicateScore {
            title_similarity: row.try_get("title_similarity")?,
            description_similarity: row.try_get("description_similarity")?,
            temporal_proximity: row.try_get("temporal_proximity")?,
            assignee_match: row.try_get("assignee_match")?,
            priority_match: row.try_get("priority_match")?,
            overall_score: row.try_get("overall_score")?,
            confidence: confidence.parse::<Confidence>()?,
        },
        status: status.parse::<CandidateStatus>()?,
        reviewed_by: row.try_get("reviewed_by")?,
        reviewed_at: row.try_get("reviewed_at")?,
        created_at: row.try_get("created_at")?,
    })
}

impl SqliteStore {
    async fn insert_candidate(&self, candidate: &DuplicateCandidate) -> Result<bool> {
        let (low, high) = candidate.pair_key();
        let score = &candidate.score;

        let result = sqlx::query(
            r#"
            INSERT INTO duplicate_candidates (
                id, task1_id, task2_id, pair_low, pair_high,
                title_similarity, description_similarity, temporal_proximity,
                assignee_match, priority_match, overall_score, confidence,
                status, reviewed_by, reviewed_at, created_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(pair_low, pair_high) DO NOTHING
            "#,
        )
        .bind(candidate.id.to_string())
        .bind(candidate.task1_id.to_string())
        .bind(candidate.task2_id.to_string())
        .bind(low.to_string())
        .bind(high.to_string())
        .bind(score.title_similarity)
        .bind(score.description_similarity)
        .bind(score.temporal_proximity)
        .bind(score.assignee_match)
        .bind(score.priority_match)
        .bind(score.overall_score)
        .bind(score.confidence.as_str())
        .bind(candidate.status.as_str())
        .bind(&candidate.reviewed_by)
        .bind(candidate.reviewed_at)
        .bind(candidate.created_at)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn resolve_pending_candidate(
        &self,
        id: Uuid,
        status: CandidateStatus,
        reviewed_by: Option<&str>,
    ) -> Result<u64> {
        let reviewed_at = Utc::now();
        let result = sqlx::query(
            r#"
            UPDATE duplicate_candidates
            SET status = ?, reviewed_by = ?, reviewed_at = ?
            WHERE id = ? AND status = 'pending'
            "#,
        )
        .bind(status.as_str())
        .bind(reviewed_by)
        .bind(reviewed_at)
        .bind(id.to_string())
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }
}

#[async_trait]
impl CandidateStore for SqliteStore {
    async fn find_existing_candidate(&self, a: Uuid, b: Uuid) -> Result<Option<DuplicateCandidate>> {
        let (low, high) = pair_key(a, b);
        let sql = format!(
            "SELECT {} FROM duplicate_candidates c WHERE c.pair_low = ? AND c.pair_high = ?",
            CANDIDATE_COLUMNS
        );
        let row = sqlx::query(&sql)
            .bind(low.to_string())
            .bind(high.to_string())
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(candidate_from_row).transpose()
    }

    async fn create_candidate(&self, candidate: &DuplicateCandidate) -> Result<bool> {
        let store = self;
        let inserted = retry_on_lock("create_candidate", self.lock_retry_max_wait_ms, move || {
            store.insert_candidate(candidate)
        })
        .await?;

        if !inserted {
            tracing::debug!(
                task1_id = %candidate.task1_id,
                task2_id = %candidate.task2_id,
                "Candidate already exists for pair"
            );
        }
        Ok(inserted)
    }

    async fn update_candidate_status(
        &self,
        id: Uuid,
        status: CandidateStatus,
        reviewed_by: Option<&str>,
    ) -> Result<DuplicateCandidate> {
        let store = self;
        let updated = retry_on_lock(
            "update_candidate_status",
            self.lock_retry_max_wait_ms,
            move || store.resolve_pending_candidate(id, status, reviewed_by),
        )
        .await?;

        match self.find_candidate(id).await? {
            Some(candidate) if updated == 1 => Ok(candidate),
            Some(_) => Err(Error::Conflict("Duplicate candidate already reviewed".into())),
            None => Err(Error::NotFound("Duplicate candidate not found".into())),
        }
    }

    async fn find_candidate(&self, id: Uuid) -> Result<Option<DuplicateCandidate>> {
        let sql = format!(
            "SELECT {} FROM duplicate_candidates c WHERE c.id = ?",
            CANDIDATE_COLUMNS
        );
        let row = sqlx::query(&sql)
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(candidate_from_row).transpose()
    }

    async fn list_candidates(
        &self,
        user_id: &str,
        status: Option<CandidateStatus>,
        page: u32,
        limit: u32,
    ) -> Result<(Vec<DuplicateCandidate>, u64)> {
        let status = status.map(|s| s.as_str());
        let offset = i64::from(page.saturating_sub(1)) * i64::from(limit);

        let sql = format!(
            "SELECT {} {} ORDER BY c.overall_score DESC, c.created_at DESC, c.id LIMIT ? OFFSET ?",
            CANDIDATE_COLUMNS, USER_SCOPE
        );
        let rows = sqlx::query(&sql)
            .bind(user_id)
            .bind(user_id)
            .bind(status)
            .bind(status)
            .bind(i64::from(limit))
            .bind(offset)
            .fetch_all(&self.pool)
            .await?;
        let candidates = rows
            .iter()
            .map(candidate_from_row)
            .collect::<Result<Vec<_>>>()?;

        let total = self.count_candidates_str(user_id, status).await?;
        Ok((candidates, total))
    }

    async fn count_candidates(
        &self,
        user_id: &str,
        status: Option<CandidateStatus>,
    ) -> Result<u64> {
        self.count_candidates_str(user_id, status.map(|s| s.as_str()))
            .await
    }
}

impl SqliteStore {
    async fn count_candidates_str(&self, user_id: &str, status: Option<&str>) -> Result<u64> {
        let sql = format!("SELECT COUNT(*) {}", USER_SCOPE);
        let count: i64 = sqlx::query_scalar(&sql)
            .bind(user_id)
            .bind(user_id)
            .bind(status)
            .bind(status)
            .fetch_one(&self.pool)
            .await?;
        Ok(count as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::TaskStore;
    use taskmerge_common::db::init_memory_database;
    use taskmerge_common::{SourceKind, Task};

    async fn store_with_tasks() -> (SqliteStore, Task, Task) {
        let store = SqliteStore::new(init_memory_database().await.unwrap(), 1000);
        let a = store
            .save_task(&Task::new("u1", SourceKind::Microsoft, "a", "Fix login bug"))
            .await
            .unwrap();
        let b = store
            .save_task(&Task::new("u1", SourceKind::ConnectWise, "b", "Fix login bug"))
            .await
            .unwrap();
        (store, a, b)
    }

    fn score(overall: f64) -> DuplicateScore {
        DuplicateScore {
            overall_score: overall,
            confidence: Confidence::Medium,
            ..DuplicateScore::zero()
        }
    }

    #[tokio::test]
    async fn test_create_candidate_is_idempotent_per_unordered_pair() {
        let (store, a, b) = store_with_tasks().await;

        let first = DuplicateCandidate::new(a.id, b.id, score(0.7));
        assert!(store.create_candidate(&first).await.unwrap());

        let reversed = DuplicateCandidate::new(b.id, a.id, score(0.7));
        assert!(!store.create_candidate(&reversed).await.unwrap());

        let found = store.find_existing_candidate(b.id, a.id).await.unwrap().unwrap();
        assert_eq!(found.id, first.id);
        assert_eq!(store.count_candidates("u1", None).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_resolved_candidate_is_immutable() {
        let (store, a, b) = store_with_tasks().await;
        let candidate = DuplicateCandidate::new(a.id, b.id, score(0.65));
        store.create_candidate(&candidate).await.unwrap();

        let rejected = store
            .update_candidate_status(candidate.id, CandidateStatus::Rejected, Some("u1"))
            .await
            .unwrap();
        assert_eq!(rejected.status, CandidateStatus::Rejected);
        assert_eq!(rejected.reviewed_by.as_deref(), Some("u1"));
        assert!(rejected.reviewed_at.is_some());

        let again = store
            .update_candidate_status(candidate.id, CandidateStatus::Approved, Some("u1"))
            .await;
        assert!(matches!(again, Err(Error::Conflict(_))));

        let missing = store
            .update_candidate_status(Uuid::new_v4(), CandidateStatus::Rejected, None)
            .await;
        assert!(matches!(missing, Err(Error::NotFound(_))));
    }

    #[tokio::test]
    async fn test_list_candidates_orders_and_pages() {
        let store = SqliteStore::new(init_memory_database().await.unwrap(), 1000);
        let mut ids = Vec::new();
        for i in 0..4 {
            let task = store
                .save_task(&Task::new("u1", SourceKind::Microsoft, format!("t{}", i), "T"))
                .await
                .unwrap();
            ids.push(task.id);
        }
        store
            .create_candidate(&DuplicateCandidate::new(ids[0], ids[1], score(0.61)))
            .await
            .unwrap();
        store
            .create_candidate(&DuplicateCandidate::new(ids[0], ids[2], score(0.90)))
            .await
            .unwrap();
        store
            .create_candidate(&DuplicateCandidate::new(ids[2], ids[3], score(0.70)))
            .await
            .unwrap();

        let (page1, total) = store.list_candidates("u1", None, 1, 2).await.unwrap();
        assert_eq!(total, 3);
        let scores: Vec<f64> = page1.iter().map(|c| c.score.overall_score).collect();
        assert_eq!(scores, vec![0.90, 0.70]);

        let (page2, _) = store.list_candidates("u1", None, 2, 2).await.unwrap();
        assert_eq!(page2.len(), 1);
        assert_eq!(page2[0].score.overall_score, 0.61);

        let (others, other_total) = store.list_candidates("u2", None, 1, 10).await.unwrap();
        assert!(others.is_empty());
        assert_eq!(other_total, 0);
        assert_eq!(store.count_tasks_for_user("u1").await.unwrap(), 4);
    }
}
