//! taskmerge-dedup library interface
//!
//! Duplicate detection and merge engine for tasks collected from several
//! trackers. Exposes the services and the SQLite store for the CLI and for
//! integration testing.

pub mod db;
pub mod services;
pub mod utils;

use services::{DeduplicationService, DuplicateDetector, PipelineRunner, TaskMerger};
use std::sync::Arc;
use taskmerge_common::events::EventBus;
use taskmerge_common::{DuplicateDetectionConfig, PipelineConfig};

use crate::db::DedupStore;

/// All deduplication services wired to one store and event bus
pub struct DedupEngine {
    pub merger: TaskMerger,
    pub detector: DuplicateDetector,
    pub deduplication: DeduplicationService,
    pub pipeline: PipelineRunner,
    pub event_bus: EventBus,
}

impl DedupEngine {
    pub fn new(
        store: Arc<dyn DedupStore>,
        event_bus: EventBus,
        config: DuplicateDetectionConfig,
        pipeline_config: PipelineConfig,
    ) -> Self {
        let merger = TaskMerger::new(store.clone(), event_bus.clone());
        let detector = DuplicateDetector::new(store.clone(), merger.clone(), event_bus.clone());
        let deduplication =
            DeduplicationService::new(store.clone(), merger.clone(), event_bus.clone());
        let pipeline = PipelineRunner::new(
            store,
            detector.clone(),
            event_bus.clone(),
            config,
            pipeline_config,
        );

        Self {
            merger,
            detector,
            deduplication,
            pipeline,
            event_bus,
        }
    }
}
