//! Database initialization
//!
//! Opens (creating if needed) the SQLite database and brings the
//! deduplication schema up idempotently. Safe to call on every start.

use crate::Result;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::SqlitePool;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;
use tracing::info;

/// SQLite busy timeout applied to every pooled connection
const BUSY_TIMEOUT_MS: u64 = 250;

/// Initialize database connection pool and create tables if needed
pub async fn init_database(db_path: &Path) -> Result<SqlitePool> {
    let newly_created = !db_path.exists();

    if let Some(parent) = db_path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }

    // WAL lets the sweep read while the ingestion hook writes. The short
    // busy timeout hands longer contention to the caller's retry loop.
    let options = SqliteConnectOptions::new()
        .filename(db_path)
        .create_if_missing(true)
        .foreign_keys(true)
        .journal_mode(SqliteJournalMode::Wal)
        .busy_timeout(Duration::from_millis(BUSY_TIMEOUT_MS));

    let pool = SqlitePoolOptions::new()
        .max_connections(8)
        .min_connections(1)
        .connect_with(options)
        .await?;

    if newly_created {
        info!("Initialized new database: {}", db_path.display());
    } else {
        info!("Opened existing database: {}", db_path.display());
    }

    init_schema(&pool).await?;

    Ok(pool)
}

/// Open a private in-memory database with the full schema
///
/// Limited to one connection: every `:memory:` connection is its own database.
pub async fn init_memory_database() -> Result<SqlitePool> {
    let options = SqliteConnectOptions::from_str("sqlite::memory:")?.foreign_keys(true);
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect_with(options)
        .await?;
    init_schema(&pool).await?;
    Ok(pool)
}

/// Create all deduplication tables and indexes
pub async fn init_schema(pool: &SqlitePool) -> Result<()> {
    create_merged_tasks_table(pool).await?;
    create_tasks_table(pool).await?;
    create_duplicate_candidates_table(pool).await?;
    create_merged_task_sources_table(pool).await?;
    Ok(())
}

async fn create_merged_tasks_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS merged_tasks (
            id TEXT PRIMARY KEY,
            user_id TEXT NOT NULL,
            title TEXT NOT NULL,
            description TEXT,
            status TEXT NOT NULL,
            priority TEXT,
            due_date TIMESTAMP,
            merged_by TEXT NOT NULL CHECK (merged_by IN ('auto', 'manual')),
            confidence REAL,
            created_at TIMESTAMP NOT NULL,
            updated_at TIMESTAMP NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_merged_tasks_user ON merged_tasks(user_id)")
        .execute(pool)
        .await?;

    Ok(())
}

async fn create_tasks_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS tasks (
            id TEXT PRIMARY KEY,
            user_id TEXT NOT NULL,
            integration_id TEXT NOT NULL DEFAULT '',
            external_id TEXT NOT NULL,
            source TEXT NOT NULL,
            title TEXT NOT NULL,
            description TEXT,
            status TEXT NOT NULL,
            priority TEXT,
            due_date TIMESTAMP,
            connectwise_owner TEXT,
            connectwise_assigned_to TEXT,
            processplan_assigned_to TEXT,
            is_merged INTEGER NOT NULL DEFAULT 0,
            merged_task_id TEXT REFERENCES merged_tasks(id) ON DELETE SET NULL,
            created_at TIMESTAMP NOT NULL,
            updated_at TIMESTAMP NOT NULL,
            UNIQUE (source, external_id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_tasks_user ON tasks(user_id, is_merged)")
        .execute(pool)
        .await?;

    Ok(())
}

async fn create_duplicate_candidates_table(pool: &SqlitePool) -> Result<()> {
    // pair_low/pair_high hold the task ids in sorted order so the unique
    // constraint covers both orderings of the pair.
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS duplicate_candidates (
            id TEXT PRIMARY KEY,
            task1_id TEXT NOT NULL REFERENCES tasks(id) ON DELETE CASCADE,
            task2_id TEXT NOT NULL REFERENCES tasks(id) ON DELETE CASCADE,
            pair_low TEXT NOT NULL,
            pair_high TEXT NOT NULL,
            title_similarity REAL NOT NULL,
            description_similarity REAL NOT NULL,
            temporal_proximity REAL NOT NULL,
            assignee_match REAL NOT NULL,
            priority_match REAL NOT NULL,
            overall_score REAL NOT NULL,
            confidence TEXT NOT NULL,
            status TEXT NOT NULL DEFAULT 'pending'
                CHECK (status IN ('pending', 'approved', 'rejected', 'auto_merged')),
            reviewed_by TEXT,
            reviewed_at TIMESTAMP,
            created_at TIMESTAMP NOT NULL,
            UNIQUE (pair_low, pair_high)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_candidates_status ON duplicate_candidates(status, overall_score)",
    )
    .execute(pool)
    .await?;

    Ok(())
}

async fn create_merged_task_sources_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS merged_task_sources (
            merged_task_id TEXT NOT NULL REFERENCES merged_tasks(id) ON DELETE CASCADE,
            original_task_id TEXT NOT NULL REFERENCES tasks(id),
            position INTEGER NOT NULL,
            source TEXT NOT NULL,
            original_title TEXT NOT NULL,
            original_description TEXT,
            original_status TEXT NOT NULL,
            integration_id TEXT NOT NULL,
            last_sync_at TIMESTAMP,
            PRIMARY KEY (merged_task_id, original_task_id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}
