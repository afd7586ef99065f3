//! Database access for taskmerge-dedup
//!
//! `SqliteStore` implements the persistence seams in [`store`] over the
//! schema created by `taskmerge_common::db::init_schema`.

mod candidates;
mod merged_tasks;
pub mod store;
mod tasks;

pub use store::{CandidateStore, DedupStore, MergeStore, TaskStore};

use sqlx::SqlitePool;
use taskmerge_common::{Error, Result};
use uuid::Uuid;

/// SQLite-backed store for tasks, candidates and merges
#[derive(Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
    lock_retry_max_wait_ms: u64,
}

impl SqliteStore {
    pub fn new(pool: SqlitePool, lock_retry_max_wait_ms: u64) -> Self {
        Self {
            pool,
            lock_retry_max_wait_ms,
        }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

fn parse_uuid(value: &str) -> Result<Uuid> {
    Uuid::parse_str(value).map_err(|e| Error::Internal(format!("Invalid id '{}' in database: {}", value, e)))
}

fn parse_optional_uuid(value: Option<String>) -> Result<Option<Uuid>> {
    value.as_deref().map(parse_uuid).transpose()
}

/// `?, ?, ?` for an IN clause of `n` values
fn placeholders(n: usize) -> String {
    vec!["?"; n].join(", ")
}
