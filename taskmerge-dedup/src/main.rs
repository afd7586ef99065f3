//! taskmerge-dedup - task duplicate detection and merge CLI
//!
//! Runs the deduplication engine against a local SQLite database:
//! importing normalized tasks, sweeping for duplicates, reviewing
//! candidates and merging/unmerging tasks. Results are printed as JSON.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use taskmerge_common::config::{default_config_path, resolve_database_path, TomlConfig};
use taskmerge_common::dedup::{
    DuplicateReviewRequest, MergeTaskRequest, NewTaskDetectionResult, ReviewAction,
    UnmergeTaskRequest,
};
use taskmerge_common::events::EventBus;
use taskmerge_common::{
    CandidateStatus, MergedBy, Priority, SourceKind, Task, TaskStatus,
};
use tracing::info;
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

use taskmerge_dedup::db::SqliteStore;
use taskmerge_dedup::DedupEngine;

#[derive(Parser)]
#[command(name = "taskmerge-dedup", version, about = "Task duplicate detection and merge engine")]
struct Cli {
    /// SQLite database file (overrides TASKMERGE_DATABASE and the config file)
    #[arg(long, global = true)]
    database: Option<PathBuf>,

    /// TOML configuration file
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Upsert tasks from a JSON array and check each one for duplicates
    Import { file: PathBuf },
    /// Full duplicate sweep over a user's tasks
    Sweep {
        #[arg(long)]
        user: String,
    },
    /// Cross-source analysis sweep; nothing is recorded
    Analyze {
        #[arg(long)]
        user: String,
    },
    /// List duplicate candidates, best score first
    Candidates {
        #[arg(long)]
        user: String,
        #[arg(long)]
        status: Option<CandidateStatus>,
        #[arg(long, default_value_t = 1)]
        page: u32,
        #[arg(long, default_value_t = 10)]
        limit: u32,
    },
    /// Approve or reject a pending candidate
    Review {
        #[arg(long)]
        user: String,
        #[arg(long)]
        candidate: Uuid,
        #[arg(long)]
        action: ReviewAction,
    },
    /// Merge two or more tasks
    Merge {
        #[arg(long)]
        user: String,
        #[arg(long = "task", required = true)]
        tasks: Vec<Uuid>,
        #[arg(long)]
        primary: Option<Uuid>,
    },
    /// Dissolve a merged task
    Unmerge {
        #[arg(long)]
        user: String,
        #[arg(long)]
        merged: Uuid,
    },
    /// Show one merged task, or all of a user's merged tasks
    Merged {
        #[arg(long)]
        user: String,
        #[arg(long)]
        id: Option<Uuid>,
    },
    /// Deduplication counters for a user
    Stats {
        #[arg(long)]
        user: String,
    },
}

/// Task record as accepted by `import`
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ImportedTask {
    user_id: String,
    source: SourceKind,
    external_id: String,
    title: String,
    #[serde(default)]
    integration_id: String,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    status: Option<TaskStatus>,
    #[serde(default)]
    priority: Option<Priority>,
    #[serde(default)]
    due_date: Option<chrono::DateTime<chrono::Utc>>,
    #[serde(default)]
    connectwise_owner: Option<String>,
    #[serde(default)]
    connectwise_assigned_to: Option<String>,
    #[serde(default)]
    processplan_assigned_to: Option<String>,
    #[serde(default)]
    created_at: Option<chrono::DateTime<chrono::Utc>>,
}

impl ImportedTask {
    fn into_task(self) -> Task {
        let mut task = Task::new(self.user_id, self.source, self.external_id, self.title);
        task.integration_id = self.integration_id;
        task.description = self.description;
        task.status = self.status.unwrap_or(TaskStatus::Pending);
        task.priority = self.priority;
        task.due_date = self.due_date;
        task.connectwise_owner = self.connectwise_owner;
        task.connectwise_assigned_to = self.connectwise_assigned_to;
        task.processplan_assigned_to = self.processplan_assigned_to;
        if let Some(created_at) = self.created_at {
            task.created_at = created_at;
        }
        task
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ImportOutcome {
    task_id: Uuid,
    source: SourceKind,
    external_id: String,
    #[serde(flatten)]
    detection: NewTaskDetectionResult,
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config_path = cli.config.clone().or_else(default_config_path);
    let config = TomlConfig::load_or_default(config_path.as_deref())
        .context("Failed to load configuration")?;

    // Logs go to stderr; stdout carries the JSON result
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.logging.level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    info!("Starting taskmerge-dedup {}", env!("CARGO_PKG_VERSION"));

    let db_path = resolve_database_path(cli.database.as_deref(), &config);
    info!("Database: {}", db_path.display());
    let pool = taskmerge_common::db::init_database(&db_path)
        .await
        .with_context(|| format!("Failed to open database {}", db_path.display()))?;

    let store = SqliteStore::new(pool, config.pipeline.lock_retry_max_wait_ms);
    let engine = DedupEngine::new(
        Arc::new(store.clone()),
        EventBus::default(),
        config.detection,
        config.pipeline,
    );

    match cli.command {
        Command::Import { file } => {
            let raw = std::fs::read_to_string(&file)
                .with_context(|| format!("Failed to read {}", file.display()))?;
            let imported: Vec<ImportedTask> =
                serde_json::from_str(&raw).context("Import file must be a JSON array of tasks")?;

            let mut outcomes = Vec::with_capacity(imported.len());
            for record in imported {
                let stored = store.save_task(&record.into_task()).await?;
                let detection = engine.pipeline.process_new_task(&stored, None).await;
                outcomes.push(ImportOutcome {
                    task_id: stored.id,
                    source: stored.source,
                    external_id: stored.external_id,
                    detection,
                });
            }
            info!(count = outcomes.len(), "Import finished");
            print_json(&outcomes)?;
        }
        Command::Sweep { user } => {
            let summary = engine
                .pipeline
                .run_background_duplicate_detection(&user, None)
                .await;
            print_json(&summary)?;
        }
        Command::Analyze { user } => {
            let result = engine.pipeline.run_optimized_detection(&user, None).await?;
            print_json(&result)?;
        }
        Command::Candidates {
            user,
            status,
            page,
            limit,
        } => {
            let page = engine
                .deduplication
                .get_duplicate_candidates(&user, status, page, limit)
                .await?;
            print_json(&page)?;
        }
        Command::Review {
            user,
            candidate,
            action,
        } => {
            let response = engine
                .deduplication
                .review_duplicate_candidate(&DuplicateReviewRequest {
                    candidate_id: candidate,
                    user_id: user,
                    action,
                })
                .await?;
            print_json(&response)?;
        }
        Command::Merge {
            user,
            tasks,
            primary,
        } => {
            let response = engine
                .merger
                .merge_tasks(&MergeTaskRequest {
                    task_ids: tasks,
                    user_id: user,
                    merged_by: MergedBy::Manual,
                    primary_task_id: primary,
                })
                .await?;
            print_json(&response)?;
        }
        Command::Unmerge { user, merged } => {
            let response = engine
                .merger
                .unmerge_tasks(&UnmergeTaskRequest {
                    merged_task_id: merged,
                    user_id: user,
                })
                .await?;
            print_json(&response)?;
        }
        Command::Merged { user, id } => match id {
            Some(id) => print_json(&engine.merger.get_merged_task_by_id(id, &user).await?)?,
            None => print_json(&engine.merger.get_merged_tasks_by_user_id(&user).await?)?,
        },
        Command::Stats { user } => {
            let stats = engine.deduplication.get_deduplication_stats(&user).await?;
            print_json(&stats)?;
        }
    }

    Ok(())
}
