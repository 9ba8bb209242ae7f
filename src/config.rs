//! Recommender configuration
//!
//! Layered configuration: built-in defaults, an optional TOML file, then
//! `PLANTWISE__SECTION__KEY` environment variables. Every section carries
//! `#[serde(default)]` so partial files are valid.

use crate::error::{PlantwiseError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

/// Environment variable prefix for overrides
const ENV_PREFIX: &str = "PLANTWISE";

/// Main recommender configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RecommenderConfig {
    pub paths: PathsConfig,
    pub mining: MiningConfig,
    pub scoring: ScoringConfig,
    pub retrain: RetrainConfig,
    pub kb: KbConfig,
    pub maintenance: MaintenanceConfig,
}

/// File locations; unset entries resolve under `data_dir`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PathsConfig {
    pub data_dir: PathBuf,
    pub database: Option<PathBuf>,
    pub knowledge_base: Option<PathBuf>,
    pub parsed_rules: Option<PathBuf>,
    pub mining_cursor: Option<PathBuf>,
    pub model: Option<PathBuf>,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            database: None,
            knowledge_base: None,
            parsed_rules: None,
            mining_cursor: None,
            model: None,
        }
    }
}

/// Default data directory using XDG_DATA_HOME standard
fn default_data_dir() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("plantwise")
}

impl PathsConfig {
    /// All paths under a single directory
    pub fn in_dir(dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: dir.into(),
            ..Self::default()
        }
    }

    fn resolve(&self, explicit: &Option<PathBuf>, file_name: &str) -> PathBuf {
        explicit
            .clone()
            .unwrap_or_else(|| self.data_dir.join(file_name))
    }

    pub fn database_path(&self) -> PathBuf {
        self.resolve(&self.database, "plantwise.db")
    }

    pub fn knowledge_base_path(&self) -> PathBuf {
        self.resolve(&self.knowledge_base, "knowledge_base.json")
    }

    pub fn parsed_rules_path(&self) -> PathBuf {
        self.resolve(&self.parsed_rules, "parsed_rules.json")
    }

    pub fn mining_cursor_path(&self) -> PathBuf {
        self.resolve(&self.mining_cursor, ".rule_miner_state.json")
    }

    pub fn model_path(&self) -> PathBuf {
        self.resolve(&self.model, "feedback_model.json")
    }
}

/// Association-rule mining settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MiningConfig {
    pub min_support: f64,
    pub min_confidence: f64,
    /// Feedback records processed per mining run
    pub chunk_size: usize,
    /// Rules kept per polarity after lift ranking
    pub top_k: usize,
}

impl Default for MiningConfig {
    fn default() -> Self {
        Self {
            min_support: 0.01,
            min_confidence: 0.01,
            chunk_size: 250,
            top_k: 20,
        }
    }
}

/// Hybrid scoring settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScoringConfig {
    pub ml_weight: f64,
    pub rule_weight: f64,
    /// Candidates requested from the rule engine
    pub candidate_count: usize,
    /// Top scores considered for session-aware selection
    pub selection_pool: usize,
    /// Attempts per model invocation before the candidate is skipped
    pub model_attempts: u32,
}

impl Default for ScoringConfig {
    fn default() -> Self {
        Self {
            ml_weight: 0.7,
            rule_weight: 0.3,
            candidate_count: 5,
            selection_pool: 5,
            model_attempts: 2,
        }
    }
}

/// How the retrain pipeline is executed once triggered
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum RetrainMode {
    /// Caller awaits the pipeline
    Blocking,
    /// Pipeline runs on a background task
    #[default]
    Background,
}

/// Retrain orchestration settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrainConfig {
    /// Retrain whenever accepted-feedback count is divisible by this
    pub threshold: u64,
    pub mode: RetrainMode,
    /// Maximum duration of a single stage (in seconds)
    #[serde(with = "serde_duration")]
    pub stage_timeout: Duration,
    /// Pipeline runs kept in memory
    pub history_limit: usize,
}

impl Default for RetrainConfig {
    fn default() -> Self {
        Self {
            threshold: 3,
            mode: RetrainMode::Background,
            stage_timeout: Duration::from_secs(300), // 5 minutes
            history_limit: 20,
        }
    }
}

/// Key used to detect positive/negative conflicts during KB merges
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ConflictKey {
    /// Conditions plus suggested item
    #[default]
    ConditionsAndItem,
    /// Conditions only; rules for different items with identical
    /// conditions conflict with each other (legacy behaviour)
    ConditionsOnly,
}

/// Knowledge base settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct KbConfig {
    pub conflict_key: ConflictKey,
    /// Compare-and-swap attempts before a write gives up
    pub max_write_attempts: u32,
}

impl Default for KbConfig {
    fn default() -> Self {
        Self {
            conflict_key: ConflictKey::ConditionsAndItem,
            max_write_attempts: 3,
        }
    }
}

/// Feedback log maintenance settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MaintenanceConfig {
    /// Records kept by `prune_to_latest`
    pub keep_latest: usize,
}

impl Default for MaintenanceConfig {
    fn default() -> Self {
        Self { keep_latest: 5000 }
    }
}

// Custom serde module for Duration (serialize/deserialize as seconds)
mod serde_duration {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_secs())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = u64::deserialize(deserializer)?;
        Ok(Duration::from_secs(secs))
    }
}

impl RecommenderConfig {
    /// Load configuration from an optional TOML file plus environment overrides
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = config::Config::builder();

        if let Some(path) = path {
            debug!("Loading configuration from {}", path.display());
            builder = builder.add_source(config::File::from(path).required(true));
        }

        builder = builder.add_source(
            config::Environment::with_prefix(ENV_PREFIX)
                .separator("__")
                .try_parsing(true),
        );

        let config: RecommenderConfig = builder.build()?.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from TOML string
    pub fn from_toml(toml_str: &str) -> Result<Self> {
        let config: RecommenderConfig = toml::from_str(toml_str)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        let m = &self.mining;
        if !(m.min_support > 0.0 && m.min_support <= 1.0) {
            return Err(invalid("mining.min_support must be in (0, 1]"));
        }
        if !(0.0..=1.0).contains(&m.min_confidence) {
            return Err(invalid("mining.min_confidence must be in [0, 1]"));
        }
        if m.chunk_size == 0 {
            return Err(invalid("mining.chunk_size must be at least 1"));
        }
        if m.top_k == 0 {
            return Err(invalid("mining.top_k must be at least 1"));
        }

        let s = &self.scoring;
        if s.ml_weight < 0.0 || s.rule_weight < 0.0 {
            return Err(invalid("scoring weights must be non-negative"));
        }
        if ((s.ml_weight + s.rule_weight) - 1.0).abs() > 1e-6 {
            return Err(invalid("scoring.ml_weight + scoring.rule_weight must equal 1.0"));
        }
        if s.candidate_count == 0 || s.selection_pool == 0 {
            return Err(invalid(
                "scoring.candidate_count and scoring.selection_pool must be at least 1",
            ));
        }
        if s.model_attempts == 0 {
            return Err(invalid("scoring.model_attempts must be at least 1"));
        }

        if self.retrain.threshold == 0 {
            return Err(invalid("retrain.threshold must be at least 1"));
        }
        if self.retrain.stage_timeout < Duration::from_secs(1) {
            return Err(invalid("retrain.stage_timeout must be at least 1 second"));
        }
        if self.kb.max_write_attempts == 0 {
            return Err(invalid("kb.max_write_attempts must be at least 1"));
        }
        if self.maintenance.keep_latest == 0 {
            return Err(invalid("maintenance.keep_latest must be at least 1"));
        }

        Ok(())
    }
}

fn invalid(message: &str) -> PlantwiseError {
    PlantwiseError::Config(message.to_string())
}
