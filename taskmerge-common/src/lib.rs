//! # TaskMerge Common Library
//!
//! Shared code for the task deduplication services including:
//! - Task and deduplication data model
//! - Error type used across the workspace
//! - Detection configuration and TOML loading
//! - SQLite schema initialization
//! - Deduplication event bus
//! - Time helpers

pub mod config;
pub mod db;
pub mod dedup;
pub mod error;
pub mod events;
pub mod task;
pub mod time;

pub use config::{ConfigOverrides, DuplicateDetectionConfig, PipelineConfig};
pub use dedup::{
    CandidateStatus, Confidence, DuplicateCandidate, DuplicateScore, MergedBy, MergedTask,
    TaskSource,
};
pub use error::{Error, Result};
pub use task::{Priority, SourceKind, Task, TaskStatus};
