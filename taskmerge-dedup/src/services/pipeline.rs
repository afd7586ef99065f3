//! Pipeline Runner
//!
//! Entry points for external triggers: the real-time hook run per newly
//! synced task, the background sweep per user, and the cross-source
//! analysis sweep. Failures are logged and counted here rather than
//! propagated, so a trigger never aborts on one user's bad data.

use crate::db::DedupStore;
use crate::services::duplicate_detector::{optimized_duplicate_detection, DuplicateDetector};
use chrono::Utc;
use std::sync::Arc;
use std::time::{Duration, Instant};
use taskmerge_common::dedup::{
    DuplicateDetectionResult, NewTaskDetectionResult, OptimizedDetectionResult, SweepSummary,
};
use taskmerge_common::events::{DedupEvent, EventBus};
use taskmerge_common::{ConfigOverrides, DuplicateDetectionConfig, PipelineConfig, Result, Task};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

pub struct PipelineRunner {
    store: Arc<dyn DedupStore>,
    detector: DuplicateDetector,
    events: EventBus,
    config: DuplicateDetectionConfig,
    pipeline: PipelineConfig,
    /// Parent of every sweep's token; cancelling it stops all running sweeps
    root_token: CancellationToken,
}

impl PipelineRunner {
    pub fn new(
        store: Arc<dyn DedupStore>,
        detector: DuplicateDetector,
        events: EventBus,
        config: DuplicateDetectionConfig,
        pipeline: PipelineConfig,
    ) -> Self {
        Self {
            store,
            detector,
            events,
            config,
            pipeline,
            root_token: CancellationToken::new(),
        }
    }

    pub fn config(&self) -> &DuplicateDetectionConfig {
        &self.config
    }

    fn effective_config(
        &self,
        overrides: Option<&ConfigOverrides>,
    ) -> Result<DuplicateDetectionConfig> {
        match overrides {
            Some(o) => o.apply_to(&self.config),
            None => Ok(self.config),
        }
    }

    fn sweep_deadline(&self) -> Option<Instant> {
        self.pipeline
            .sweep_timeout_ms
            .map(|ms| Instant::now() + Duration::from_millis(ms))
    }

    /// Stop every running and future sweep of this runner
    pub fn cancel_all(&self) {
        info!("Cancelling all duplicate detection sweeps");
        self.root_token.cancel();
    }

    /// Real-time hook for one newly synced task
    ///
    /// Never fails: errors are logged and reported as "not a duplicate".
    pub async fn process_new_task(
        &self,
        task: &Task,
        overrides: Option<&ConfigOverrides>,
    ) -> NewTaskDetectionResult {
        match self.check_new_task(task, overrides).await {
            Ok(outcome) => {
                if outcome.is_duplicate {
                    info!(
                        task_id = %task.id,
                        auto_merged = outcome.auto_merged,
                        "New task matched an existing task"
                    );
                }
                outcome
            }
            Err(e) => {
                error!(task_id = %task.id, error = %e, "Duplicate check for new task failed");
                NewTaskDetectionResult::default()
            }
        }
    }

    async fn check_new_task(
        &self,
        task: &Task,
        overrides: Option<&ConfigOverrides>,
    ) -> Result<NewTaskDetectionResult> {
        let config = self.effective_config(overrides)?;
        let existing = self.store.list_non_merged_tasks_for_user(&task.user_id).await?;
        self.detector
            .process_new_task_for_duplicates(task, &existing, &config)
            .await
    }

    /// Background sweep over one user's tasks
    ///
    /// `processed` is the number of eligible tasks examined. Pairs that fail
    /// are counted in `errors` and the sweep moves on. A sweep that cannot
    /// start (invalid overrides, task listing failure) reports `errors = 1`
    /// instead of propagating.
    pub async fn run_background_duplicate_detection(
        &self,
        user_id: &str,
        overrides: Option<&ConfigOverrides>,
    ) -> SweepSummary {
        let cancel = self.root_token.child_token();
        let started = Instant::now();

        info!(user_id, "Starting background duplicate detection");

        let summary = match self.sweep(user_id, overrides, &cancel).await {
            Ok(result) => SweepSummary {
                processed: result.tasks_examined,
                duplicates_found: result.duplicates.len(),
                auto_merged: result.auto_merged.len(),
                errors: result.errors,
                cancelled: result.cancelled,
            },
            Err(e) => {
                error!(user_id, error = %e, kind = e.kind(), "Background duplicate detection failed");
                SweepSummary {
                    errors: 1,
                    ..Default::default()
                }
            }
        };

        if summary.cancelled {
            warn!(user_id, processed = summary.processed, "Background sweep stopped early");
        }
        info!(
            user_id,
            processed = summary.processed,
            duplicates_found = summary.duplicates_found,
            auto_merged = summary.auto_merged,
            errors = summary.errors,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Background duplicate detection finished"
        );

        self.events.emit(DedupEvent::SweepCompleted {
            user_id: user_id.to_string(),
            processed: summary.processed,
            duplicates_found: summary.duplicates_found,
            auto_merged: summary.auto_merged,
            errors: summary.errors,
            cancelled: summary.cancelled,
            timestamp: Utc::now(),
        });

        summary
    }

    async fn sweep(
        &self,
        user_id: &str,
        overrides: Option<&ConfigOverrides>,
        cancel: &CancellationToken,
    ) -> Result<DuplicateDetectionResult> {
        let config = self.effective_config(overrides)?;
        self.detector
            .detect_for_user_with_cancel(user_id, &config, cancel, self.sweep_deadline())
            .await
    }

    /// Cross-source analysis over one user's non-merged tasks; nothing is
    /// persisted
    pub async fn run_optimized_detection(
        &self,
        user_id: &str,
        overrides: Option<&ConfigOverrides>,
    ) -> Result<OptimizedDetectionResult> {
        let config = self.effective_config(overrides)?;
        let tasks = self.store.list_non_merged_tasks_for_user(user_id).await?;
        let cancel = self.root_token.child_token();
        Ok(optimized_duplicate_detection(
            &tasks,
            &config,
            &cancel,
            self.sweep_deadline(),
        ))
    }
}
