//! Deduplication events
//!
//! Broadcast to any interested listener (UI push, audit log). Emitting with
//! nobody subscribed is normal and silently dropped.

use crate::dedup::{CandidateStatus, MergedBy};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use uuid::Uuid;

/// Events published by the deduplication engine
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum DedupEvent {
    /// A new duplicate candidate was recorded
    CandidateCreated {
        candidate_id: Uuid,
        task1_id: Uuid,
        task2_id: Uuid,
        overall_score: f64,
        timestamp: DateTime<Utc>,
    },

    /// Tasks were consolidated into a merged task
    TasksMerged {
        merged_task_id: Uuid,
        user_id: String,
        task_ids: Vec<Uuid>,
        merged_by: MergedBy,
        timestamp: DateTime<Utc>,
    },

    /// A merged task was dissolved back into its originals
    TasksUnmerged {
        merged_task_id: Uuid,
        user_id: String,
        restored_task_ids: Vec<Uuid>,
        timestamp: DateTime<Utc>,
    },

    /// A human resolved a candidate
    CandidateReviewed {
        candidate_id: Uuid,
        reviewed_by: String,
        status: CandidateStatus,
        timestamp: DateTime<Utc>,
    },

    /// A background sweep finished (possibly cut short)
    SweepCompleted {
        user_id: String,
        processed: usize,
        duplicates_found: usize,
        auto_merged: usize,
        errors: usize,
        cancelled: bool,
        timestamp: DateTime<Utc>,
    },
}

/// Broadcast channel for [`DedupEvent`]s
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<DedupEvent>,
}

impl EventBus {
    /// Create a bus buffering up to `capacity` events per lagging receiver
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    /// Subscribe to all future events
    pub fn subscribe(&self) -> broadcast::Receiver<DedupEvent> {
        self.tx.subscribe()
    }

    /// Publish an event, returning how many subscribers received it
    pub fn emit(&self, event: DedupEvent) -> usize {
        match self.tx.send(event) {
            Ok(count) => count,
            Err(_) => {
                tracing::trace!("Dedup event dropped: no subscribers");
                0
            }
        }
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}
