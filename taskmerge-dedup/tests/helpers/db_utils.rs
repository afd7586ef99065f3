//! Database Test Utilities

use std::sync::Arc;
use taskmerge_common::db::{init_database, init_memory_database};
use taskmerge_common::events::EventBus;
use taskmerge_common::{DuplicateDetectionConfig, PipelineConfig};
use taskmerge_dedup::db::SqliteStore;
use taskmerge_dedup::DedupEngine;
use tempfile::TempDir;

/// Single-connection in-memory store
pub async fn create_memory_store() -> SqliteStore {
    let pool = init_memory_database().await.unwrap();
    SqliteStore::new(pool, 2000)
}

/// File-backed store with a real connection pool
///
/// Returns (TempDir, SqliteStore) - TempDir must be kept alive for duration of test
pub async fn create_file_store() -> (TempDir, SqliteStore) {
    let temp_dir = TempDir::new().unwrap();
    let pool = init_database(&temp_dir.path().join("taskmerge_test.db"))
        .await
        .unwrap();
    (temp_dir, SqliteStore::new(pool, 5000))
}

/// Engine with default thresholds over `store`
pub fn engine_for(store: &SqliteStore) -> DedupEngine {
    DedupEngine::new(
        Arc::new(store.clone()),
        EventBus::default(),
        DuplicateDetectionConfig::default(),
        PipelineConfig::default(),
    )
}
