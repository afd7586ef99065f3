//! Test Helper Utilities
//!
//! Shared setup for taskmerge-dedup integration tests

pub mod db_utils;
pub mod task_builder;

pub use db_utils::{create_file_store, create_memory_store, engine_for};
pub use task_builder::TaskBuilder;
