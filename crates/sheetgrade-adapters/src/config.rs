//! Configuration loading.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use sheetgrade_core::engine::{EvaluationConfig, InvalidKeyPolicy};
use sheetgrade_core::grading::{GradeTable, GradeThreshold};
use sheetgrade_core::pipeline::BatchConfig;
use sheetgrade_core::scorer::ScoringPolicy;

/// `[grading]` section.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GradingSection {
    /// Credit taken per wrong multi-choice selection.
    #[serde(default = "default_penalty")]
    pub wrong_option_penalty: f64,
    #[serde(default)]
    pub invalid_key_policy: InvalidKeyPolicy,
}

impl Default for GradingSection {
    fn default() -> Self {
        Self {
            wrong_option_penalty: default_penalty(),
            invalid_key_policy: InvalidKeyPolicy::default(),
        }
    }
}

/// `[store]` section.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoreSection {
    /// Root directory of the result store.
    #[serde(default = "default_store_dir")]
    pub dir: PathBuf,
}

impl Default for StoreSection {
    fn default() -> Self {
        Self {
            dir: default_store_dir(),
        }
    }
}

/// Top-level sheetgrade configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SheetgradeConfig {
    #[serde(default)]
    pub grading: GradingSection,
    /// Grade boundaries. Empty means the built-in scale.
    #[serde(default)]
    pub grade_scale: Vec<GradeThreshold>,
    #[serde(default)]
    pub store: StoreSection,
    /// Where paper TOML files live.
    #[serde(default = "default_papers_dir")]
    pub papers_dir: PathBuf,
    /// Max sheets graded concurrently.
    #[serde(default = "default_parallelism")]
    pub parallelism: usize,
    /// Max retries on transient detector errors.
    #[serde(default = "default_retries")]
    pub max_retries: u32,
    /// Initial delay between retries in milliseconds.
    #[serde(default = "default_retry_delay")]
    pub retry_delay_ms: u64,
}

fn default_penalty() -> f64 {
    ScoringPolicy::default().wrong_option_penalty
}
fn default_store_dir() -> PathBuf {
    PathBuf::from("./sheetgrade-results")
}
fn default_papers_dir() -> PathBuf {
    PathBuf::from("./papers")
}
fn default_parallelism() -> usize {
    4
}
fn default_retries() -> u32 {
    3
}
fn default_retry_delay() -> u64 {
    1000
}

impl Default for SheetgradeConfig {
    fn default() -> Self {
        Self {
            grading: GradingSection::default(),
            grade_scale: Vec::new(),
            store: StoreSection::default(),
            papers_dir: default_papers_dir(),
            parallelism: default_parallelism(),
            max_retries: default_retries(),
            retry_delay_ms: default_retry_delay(),
        }
    }
}

impl SheetgradeConfig {
    /// Build the engine configuration, validating the grade scale.
    pub fn evaluation_config(&self) -> Result<EvaluationConfig> {
        let penalty = self.grading.wrong_option_penalty;
        if !penalty.is_finite() || penalty < 0.0 {
            anyhow::bail!("wrong_option_penalty must be a non-negative number, got {penalty}");
        }

        let grade_table = if self.grade_scale.is_empty() {
            GradeTable::default()
        } else {
            GradeTable::new(self.grade_scale.clone()).context("invalid [[grade_scale]]")?
        };

        Ok(EvaluationConfig {
            scoring: ScoringPolicy {
                wrong_option_penalty: penalty,
            },
            grade_table,
            invalid_key_policy: self.grading.invalid_key_policy,
        })
    }

    pub fn batch_config(&self) -> BatchConfig {
        BatchConfig {
            parallelism: self.parallelism.max(1),
            max_detection_retries: self.max_retries,
            retry_delay: Duration::from_millis(self.retry_delay_ms),
        }
    }
}

/// Resolve environment variable references like `${VAR_NAME}` in a string.
fn resolve_env_vars(s: &str) -> String {
    let mut result = s.to_string();
    while let Some(start) = result.find("${") {
        let Some(end) = result[start..].find('}') else {
            break;
        };
        let var_name = &result[start + 2..start + end];
        let value = std::env::var(var_name).unwrap_or_default();
        result = format!("{}{}{}", &result[..start], value, &result[start + end + 1..]);
    }
    result
}

fn resolve_path(path: &Path) -> PathBuf {
    PathBuf::from(resolve_env_vars(&path.to_string_lossy()))
}

/// Load configuration from well-known paths.
///
/// Search order:
/// 1. `sheetgrade.toml` in the current directory
/// 2. `~/.config/sheetgrade/config.toml`
///
/// Environment variable overrides: `SHEETGRADE_STORE_DIR`, `SHEETGRADE_PAPERS_DIR`.
pub fn load_config() -> Result<SheetgradeConfig> {
    load_config_from(None)
}

/// Load config from an explicit path, or search the default locations.
pub fn load_config_from(path: Option<&Path>) -> Result<SheetgradeConfig> {
    let config_path = match path {
        Some(p) if p.exists() => Some(p.to_path_buf()),
        Some(p) => anyhow::bail!("config file not found: {}", p.display()),
        None => {
            let local = PathBuf::from("sheetgrade.toml");
            if local.exists() {
                Some(local)
            } else {
                config_dir()
                    .map(|dir| dir.join("config.toml"))
                    .filter(|global| global.exists())
            }
        }
    };

    let mut config = match config_path {
        Some(path) => {
            tracing::debug!(path = %path.display(), "loading config");
            let content = std::fs::read_to_string(&path)
                .with_context(|| format!("failed to read config: {}", path.display()))?;
            parse_config(&content)
                .with_context(|| format!("failed to parse config: {}", path.display()))?
        }
        None => SheetgradeConfig::default(),
    };

    if let Ok(dir) = std::env::var("SHEETGRADE_STORE_DIR") {
        config.store.dir = PathBuf::from(dir);
    }
    if let Ok(dir) = std::env::var("SHEETGRADE_PAPERS_DIR") {
        config.papers_dir = PathBuf::from(dir);
    }

    config.store.dir = resolve_path(&config.store.dir);
    config.papers_dir = resolve_path(&config.papers_dir);

    Ok(config)
}

/// Parse configuration TOML.
pub fn parse_config(content: &str) -> Result<SheetgradeConfig> {
    Ok(toml::from_str(content)?)
}

fn config_dir() -> Option<PathBuf> {
    std::env::var("HOME")
        .ok()
        .map(|h| PathBuf::from(h).join(".config").join("sheetgrade"))
}
