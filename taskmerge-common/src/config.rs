//! Detection configuration, TOML loading and database path resolution

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Environment variable overriding the database location
pub const DATABASE_ENV_VAR: &str = "TASKMERGE_DATABASE";

/// Tunables for duplicate scoring and auto-merge decisions
///
/// **Defaults:**
/// - Auto-merge threshold: 0.75
/// - Suggestion threshold: 0.60
/// - Weights: title 0.40, description 0.25, temporal 0.15, assignee 0.10, priority 0.10
/// - Temporal proximity window: 7 days
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DuplicateDetectionConfig {
    pub auto_merge_threshold: f64,
    pub suggestion_threshold: f64,
    pub title_weight: f64,
    pub description_weight: f64,
    pub temporal_weight: f64,
    pub assignee_weight: f64,
    pub priority_weight: f64,
    pub max_days_for_temporal_proximity: f64,
}

impl Default for DuplicateDetectionConfig {
    fn default() -> Self {
        Self {
            auto_merge_threshold: 0.75,
            suggestion_threshold: 0.60,
            title_weight: 0.40,
            description_weight: 0.25,
            temporal_weight: 0.15,
            assignee_weight: 0.10,
            priority_weight: 0.10,
            max_days_for_temporal_proximity: 7.0,
        }
    }
}

impl DuplicateDetectionConfig {
    /// Sum of the five component weights
    pub fn weight_sum(&self) -> f64 {
        self.title_weight
            + self.description_weight
            + self.temporal_weight
            + self.assignee_weight
            + self.priority_weight
    }

    /// Reject out-of-range values
    ///
    /// Weights that do not sum to 1.0 are only logged: the overall score is
    /// still a weighted sum, just no longer guaranteed to stay within `[0, 1]`.
    pub fn validate(&self) -> Result<()> {
        let unit_values = [
            ("auto_merge_threshold", self.auto_merge_threshold),
            ("suggestion_threshold", self.suggestion_threshold),
            ("title_weight", self.title_weight),
            ("description_weight", self.description_weight),
            ("temporal_weight", self.temporal_weight),
            ("assignee_weight", self.assignee_weight),
            ("priority_weight", self.priority_weight),
        ];
        for (name, value) in unit_values {
            if !(0.0..=1.0).contains(&value) {
                return Err(Error::Config(format!(
                    "{} must be within [0, 1], got {}",
                    name, value
                )));
            }
        }

        if self.suggestion_threshold > self.auto_merge_threshold {
            return Err(Error::Config(format!(
                "suggestion_threshold ({}) exceeds auto_merge_threshold ({})",
                self.suggestion_threshold, self.auto_merge_threshold
            )));
        }

        if self.max_days_for_temporal_proximity <= 0.0 {
            return Err(Error::Config(
                "max_days_for_temporal_proximity must be positive".to_string(),
            ));
        }

        let sum = self.weight_sum();
        if (sum - 1.0).abs() > 1e-6 {
            warn!(weight_sum = sum, "Duplicate detection weights do not sum to 1.0");
        }

        Ok(())
    }
}

/// Per-invocation overrides layered over a base configuration
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConfigOverrides {
    pub auto_merge_threshold: Option<f64>,
    pub suggestion_threshold: Option<f64>,
    pub title_weight: Option<f64>,
    pub description_weight: Option<f64>,
    pub temporal_weight: Option<f64>,
    pub assignee_weight: Option<f64>,
    pub priority_weight: Option<f64>,
    pub max_days_for_temporal_proximity: Option<f64>,
}

impl ConfigOverrides {
    /// Resolve overrides against `base`; unset fields keep the base value
    ///
    /// The combined configuration is validated, so an override that breaks
    /// threshold ordering or ranges is a `Config` error.
    pub fn apply_to(&self, base: &DuplicateDetectionConfig) -> Result<DuplicateDetectionConfig> {
        let resolved = DuplicateDetectionConfig {
            auto_merge_threshold: self.auto_merge_threshold.unwrap_or(base.auto_merge_threshold),
            suggestion_threshold: self.suggestion_threshold.unwrap_or(base.suggestion_threshold),
            title_weight: self.title_weight.unwrap_or(base.title_weight),
            description_weight: self.description_weight.unwrap_or(base.description_weight),
            temporal_weight: self.temporal_weight.unwrap_or(base.temporal_weight),
            assignee_weight: self.assignee_weight.unwrap_or(base.assignee_weight),
            priority_weight: self.priority_weight.unwrap_or(base.priority_weight),
            max_days_for_temporal_proximity: self
                .max_days_for_temporal_proximity
                .unwrap_or(base.max_days_for_temporal_proximity),
        };
        resolved.validate()?;
        Ok(resolved)
    }
}

/// Pipeline runner settings
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Deadline for one background sweep; unscored pairs are skipped once exceeded
    pub sweep_timeout_ms: Option<u64>,
    /// Upper bound on retrying a write while SQLite reports the database locked
    pub lock_retry_max_wait_ms: u64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            sweep_timeout_ms: None,
            lock_retry_max_wait_ms: 5000,
        }
    }
}

/// Logging section of the TOML file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// tracing filter directive, e.g. "info" or "taskmerge_dedup=debug"
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

/// Contents of `taskmerge.toml`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TomlConfig {
    pub database_path: Option<PathBuf>,
    pub logging: LoggingConfig,
    pub detection: DuplicateDetectionConfig,
    pub pipeline: PipelineConfig,
}

impl TomlConfig {
    /// Parse and validate a TOML file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: TomlConfig = toml::from_str(&content)
            .map_err(|e| Error::Config(format!("Parse TOML failed ({}): {}", path.display(), e)))?;
        config.detection.validate()?;
        Ok(config)
    }

    /// Load the file if present, otherwise fall back to defaults
    ///
    /// A missing file is not an error; a malformed one is.
    pub fn load_or_default(path: Option<&Path>) -> Result<Self> {
        let path = match path {
            Some(p) => p.to_path_buf(),
            None => match default_config_path() {
                Some(p) => p,
                None => {
                    warn!("Could not determine config directory, using defaults");
                    return Ok(Self::default());
                }
            },
        };

        if !path.exists() {
            warn!(path = %path.display(), "Config file not found, using defaults");
            return Ok(Self::default());
        }

        let config = Self::load(&path)?;
        info!(path = %path.display(), "Loaded configuration");
        Ok(config)
    }
}

/// Platform config file location (`<config_dir>/taskmerge/taskmerge.toml`)
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("taskmerge").join("taskmerge.toml"))
}

/// OS-dependent default database location
pub fn default_database_path() -> PathBuf {
    dirs::data_local_dir()
        .map(|d| d.join("taskmerge").join("taskmerge.db"))
        .unwrap_or_else(|| PathBuf::from("./taskmerge_data/taskmerge.db"))
}

/// Database path resolution, highest priority first:
/// 1. Command-line argument
/// 2. `TASKMERGE_DATABASE` environment variable
/// 3. TOML `database_path`
/// 4. OS-dependent default
pub fn resolve_database_path(cli_arg: Option<&Path>, toml_config: &TomlConfig) -> PathBuf {
    if let Some(path) = cli_arg {
        return path.to_path_buf();
    }

    if let Ok(path) = std::env::var(DATABASE_ENV_VAR) {
        if !path.trim().is_empty() {
            return PathBuf::from(path);
        }
    }

    if let Some(path) = &toml_config.database_path {
        return path.clone();
    }

    default_database_path()
}
