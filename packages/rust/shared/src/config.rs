//! Application configuration for dealscout.
//!
//! User config lives at `~/.dealscout/dealscout.toml`.
//! Caller-supplied overrides win over config file values, which win over
//! defaults. Matching thresholds are deliberately configuration, not
//! constants, pending product calibration.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{DealscoutError, Result};
use crate::types::SourceType;

/// Default configuration file name.
const CONFIG_FILE_NAME: &str = "dealscout.toml";

/// Default config directory name under the user's home.
const CONFIG_DIR_NAME: &str = ".dealscout";

// ---------------------------------------------------------------------------
// Config structs (matching dealscout.toml schema)
// ---------------------------------------------------------------------------

/// Top-level application config, deserialized from TOML.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Global defaults.
    #[serde(default)]
    pub defaults: DefaultsConfig,

    /// Dedup thresholds and retry policy.
    #[serde(default)]
    pub matching: MatchingConfig,

    /// Registered discovery sources.
    #[serde(default)]
    pub sources: Vec<SourceEntry>,
}

/// `[defaults]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DefaultsConfig {
    /// Path to the company index database.
    #[serde(default = "default_database_path")]
    pub database_path: String,

    /// Maximum candidates pulled from one source per run.
    #[serde(default = "default_run_limit")]
    pub run_limit: u32,
}

impl Default for DefaultsConfig {
    fn default() -> Self {
        Self {
            database_path: default_database_path(),
            run_limit: default_run_limit(),
        }
    }
}

fn default_database_path() -> String {
    "~/.dealscout/dealscout.db".into()
}
fn default_run_limit() -> u32 {
    500
}

/// `[matching]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MatchingConfig {
    /// Confidence at or above which a candidate merges without review.
    #[serde(default = "default_auto_merge_threshold")]
    pub auto_merge_threshold: f64,

    /// Confidence at or above which an ambiguous match is queued for review.
    /// Below this a new canonical record is created.
    #[serde(default = "default_review_floor")]
    pub review_floor: f64,

    /// Minimum token similarity for the fuzzy name stage to report a match.
    #[serde(default = "default_fuzzy_floor")]
    pub fuzzy_floor: f64,

    /// Attempts for the decide-and-write step before surfacing a conflict.
    #[serde(default = "default_max_write_retries")]
    pub max_write_retries: u32,
}

impl Default for MatchingConfig {
    fn default() -> Self {
        Self {
            auto_merge_threshold: default_auto_merge_threshold(),
            review_floor: default_review_floor(),
            fuzzy_floor: default_fuzzy_floor(),
            max_write_retries: default_max_write_retries(),
        }
    }
}

fn default_auto_merge_threshold() -> f64 {
    0.95
}
fn default_review_floor() -> f64 {
    0.75
}
fn default_fuzzy_floor() -> f64 {
    0.8
}
fn default_max_write_retries() -> u32 {
    3
}

impl MatchingConfig {
    /// Reject threshold configurations that cannot band correctly.
    pub fn validate(&self) -> Result<()> {
        for (name, v) in [
            ("auto_merge_threshold", self.auto_merge_threshold),
            ("review_floor", self.review_floor),
            ("fuzzy_floor", self.fuzzy_floor),
        ] {
            if !(0.0..=1.0).contains(&v) {
                return Err(DealscoutError::config(format!(
                    "{name} must be in [0,1], got {v}"
                )));
            }
        }
        if self.review_floor >= self.auto_merge_threshold {
            return Err(DealscoutError::config(
                "review_floor must be below auto_merge_threshold",
            ));
        }
        Ok(())
    }
}

/// `[[sources]]` entry — a registered discovery source.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceEntry {
    /// Source identifier, also the rate-limiter key.
    pub name: String,
    /// Trust class of records this source yields.
    pub source_type: SourceType,
    /// Countries this source covers (empty = all).
    #[serde(default)]
    pub countries: Vec<String>,
    /// Minimum ms between requests to this source.
    #[serde(default = "default_min_interval_ms")]
    pub min_interval_ms: u64,
    /// Burst allowance before throttling kicks in.
    #[serde(default = "default_burst")]
    pub burst: u32,
}

fn default_min_interval_ms() -> u64 {
    1000
}
fn default_burst() -> u32 {
    1
}

// ---------------------------------------------------------------------------
// Config loading
// ---------------------------------------------------------------------------

/// Get the path to the config directory (`~/.dealscout/`).
pub fn config_dir() -> Result<PathBuf> {
    let home = dirs::home_dir()
        .ok_or_else(|| DealscoutError::config("could not determine home directory"))?;
    Ok(home.join(CONFIG_DIR_NAME))
}

/// Get the path to the config file (`~/.dealscout/dealscout.toml`).
pub fn config_file_path() -> Result<PathBuf> {
    Ok(config_dir()?.join(CONFIG_FILE_NAME))
}

/// Load the application config from disk. Returns defaults if the file does
/// not exist.
pub fn load_config() -> Result<AppConfig> {
    let path = config_file_path()?;

    if !path.exists() {
        tracing::debug!(?path, "config file not found, using defaults");
        return Ok(AppConfig::default());
    }

    load_config_from(&path)
}

/// Load the application config from a specific file path.
pub fn load_config_from(path: &Path) -> Result<AppConfig> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| DealscoutError::config(format!("failed to read {}: {e}", path.display())))?;

    let config: AppConfig = toml::from_str(&content)
        .map_err(|e| DealscoutError::config(format!("failed to parse {}: {e}", path.display())))?;

    config.matching.validate()?;
    Ok(config)
}

/// Create the config directory and write a default config file.
/// Returns the path to the created file.
pub fn init_config() -> Result<PathBuf> {
    let dir = config_dir()?;
    std::fs::create_dir_all(&dir)
        .map_err(|e| DealscoutError::config(format!("failed to create {}: {e}", dir.display())))?;

    let path = dir.join(CONFIG_FILE_NAME);
    let config = AppConfig::default();
    let content =
        toml::to_string_pretty(&config).map_err(|e| DealscoutError::config(e.to_string()))?;

    std::fs::write(&path, content)
        .map_err(|e| DealscoutError::config(format!("failed to write {}: {e}", path.display())))?;
    tracing::info!(?path, "created default config file");

    Ok(path)
}
