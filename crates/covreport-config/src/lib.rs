//! Configuration parsing and management for covreport.
//!
//! This crate provides:
//! - Configuration types (`Config`, `ThresholdConfig`)
//! - TOML and JSON parsing
//! - Validation of threshold values
//! - Precedence handling (CLI > config file > defaults)

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use covreport_types::{GLOBAL_SCOPE, Metric, ThresholdRules};
use serde::Deserialize;
use thiserror::Error;

/// File name searched for by [`discover_config`].
pub const CONFIG_FILE_NAME: &str = "covreport.toml";

/// Token substituted with the resolved root directory in path settings.
pub const ROOT_DIR_TOKEN: &str = "<rootDir>";

/// Writers used when none are configured.
pub const DEFAULT_REPORTERS: [&str; 3] = ["json", "text", "lcov"];

// ============================================================================
// Errors
// ============================================================================

/// Errors that can occur during configuration loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read the configuration file.
    #[error("Failed to read config file: {0}")]
    IoError(#[from] std::io::Error),

    /// Failed to parse a TOML configuration file.
    #[error("Failed to parse config file: {0}")]
    ParseError(#[from] toml::de::Error),

    /// Failed to parse a JSON configuration file.
    #[error("Failed to parse JSON config file: {0}")]
    JsonError(#[from] serde_json::Error),

    /// Invalid configuration value.
    #[error("Invalid config value: {0}")]
    InvalidValue(String),
}

// ============================================================================
// Configuration Types
// ============================================================================

/// Threshold configuration, keyed by scope.
///
/// Only the `global` scope is evaluated; any other key is rejected by
/// validation.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(transparent)]
pub struct ThresholdConfig {
    pub scopes: BTreeMap<String, ThresholdRules>,
}

impl ThresholdConfig {
    /// Rules for the global scope, if configured.
    pub fn global(&self) -> Option<&ThresholdRules> {
        self.scopes.get(GLOBAL_SCOPE)
    }
}

/// Full configuration for covreport, as read from a file.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    /// Base directory for relative paths and `collectCoverageFrom` globs.
    #[serde(default)]
    pub root_dir: Option<String>,

    /// Directory receiving file-based reports.
    #[serde(default)]
    pub coverage_directory: Option<String>,

    /// Ordered writer names.
    #[serde(default)]
    pub coverage_reporters: Option<Vec<String>>,

    /// Route console output to stderr and skip the forced summary.
    #[serde(default)]
    pub use_stderr: Option<bool>,

    /// Threshold rules by scope.
    #[serde(default)]
    pub coverage_threshold: Option<ThresholdConfig>,

    /// Globs selecting files that must appear in the report even if never run.
    #[serde(default)]
    pub collect_coverage_from: Option<Vec<String>>,

    /// Project coverage through registered source maps before reporting.
    #[serde(default)]
    pub map_coverage: Option<bool>,
}

// ============================================================================
// Effective Configuration
// ============================================================================

/// Effective configuration with all values resolved.
///
/// This represents the final configuration after applying:
/// 1. Defaults
/// 2. Config file values
/// 3. CLI overrides
#[derive(Debug, Clone, PartialEq)]
pub struct EffectiveConfig {
    pub root_dir: PathBuf,
    pub coverage_directory: PathBuf,
    pub coverage_reporters: Vec<String>,
    pub use_stderr: bool,
    /// Global threshold rules; `None` disables evaluation.
    pub thresholds: Option<ThresholdRules>,
    pub collect_coverage_from: Vec<String>,
    pub map_coverage: bool,
}

impl Default for EffectiveConfig {
    fn default() -> Self {
        let root_dir = PathBuf::from(".");
        Self {
            coverage_directory: root_dir.join("coverage"),
            root_dir,
            coverage_reporters: DEFAULT_REPORTERS.iter().map(|s| s.to_string()).collect(),
            use_stderr: false,
            thresholds: None,
            collect_coverage_from: Vec::new(),
            map_coverage: false,
        }
    }
}

// ============================================================================
// Configuration Loading
// ============================================================================

/// Load configuration from a file. Files ending in `.json` are read as JSON,
/// anything else as TOML.
pub fn load_config(path: &Path) -> Result<Config, ConfigError> {
    let content = std::fs::read_to_string(path)?;
    let is_json = path
        .extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("json"));
    if is_json {
        parse_json_config(&content)
    } else {
        parse_config(&content)
    }
}

/// Load configuration from a TOML string.
pub fn parse_config(content: &str) -> Result<Config, ConfigError> {
    let config: Config = toml::from_str(content)?;
    validate_config(&config)?;
    Ok(config)
}

/// Load configuration from a JSON string.
pub fn parse_json_config(content: &str) -> Result<Config, ConfigError> {
    let config: Config = serde_json::from_str(content)?;
    validate_config(&config)?;
    Ok(config)
}

/// Validate configuration values.
fn validate_config(config: &Config) -> Result<(), ConfigError> {
    if let Some(thresholds) = &config.coverage_threshold {
        for (scope, rules) in &thresholds.scopes {
            if scope != GLOBAL_SCOPE {
                return Err(ConfigError::InvalidValue(format!(
                    "coverageThreshold scope '{}' is not supported; only '{}' is",
                    scope, GLOBAL_SCOPE
                )));
            }
            validate_thresholds(rules)?;
        }
    }

    if let Some(reporters) = &config.coverage_reporters
        && let Some(blank) = reporters.iter().position(|name| name.trim().is_empty())
    {
        return Err(ConfigError::InvalidValue(format!(
            "coverageReporters[{}] must not be empty",
            blank
        )));
    }

    Ok(())
}

/// Validate threshold values: finite, and at most 100.
///
/// Negative values are uncovered-count ceilings and have no lower bound.
pub fn validate_thresholds(rules: &ThresholdRules) -> Result<(), ConfigError> {
    for metric in Metric::ALL {
        if let Some(value) = rules.value(metric)
            && (!value.is_finite() || value > 100.0)
        {
            return Err(ConfigError::InvalidValue(format!(
                "coverageThreshold.global.{} must be a finite number no greater than 100, got {}",
                metric, value
            )));
        }
    }
    Ok(())
}

/// Try to find and load configuration from the standard location.
///
/// Searches for `covreport.toml` in the current directory and parent directories.
/// A file that exists but cannot be read or validated is an error, not a miss.
pub fn discover_config() -> Result<Option<(PathBuf, Config)>, ConfigError> {
    let current = std::env::current_dir()?;
    discover_config_from(&current)
}

/// Like [`discover_config`], starting at `start`.
pub fn discover_config_from(start: &Path) -> Result<Option<(PathBuf, Config)>, ConfigError> {
    let mut current = start.to_path_buf();

    loop {
        let config_path = current.join(CONFIG_FILE_NAME);
        if config_path.is_file() {
            let config = load_config(&config_path)?;
            return Ok(Some((config_path, config)));
        }

        if !current.pop() {
            break;
        }
    }

    Ok(None)
}

// ============================================================================
// Precedence Resolution
// ============================================================================

/// CLI override options.
#[derive(Debug, Clone, Default)]
pub struct CliOverrides {
    pub root_dir: Option<PathBuf>,
    pub coverage_directory: Option<PathBuf>,
    pub coverage_reporters: Option<Vec<String>>,
    pub use_stderr: Option<bool>,
    pub collect_coverage_from: Option<Vec<String>>,
    pub map_coverage: Option<bool>,
    /// Per-metric threshold overrides; set metrics replace the file's value.
    pub thresholds: ThresholdRules,
}

/// Substitute the `<rootDir>` token and anchor relative paths at `root_dir`.
pub fn resolve_root_path(root_dir: &Path, value: &str) -> PathBuf {
    if let Some(rest) = value.strip_prefix(ROOT_DIR_TOKEN) {
        return root_dir.join(rest.trim_start_matches(['/', '\\']));
    }
    let path = Path::new(value);
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        root_dir.join(path)
    }
}

fn strip_root_token(pattern: &str) -> String {
    let (negated, body) = match pattern.strip_prefix('!') {
        Some(rest) => (true, rest),
        None => (false, pattern),
    };
    let body = body
        .strip_prefix(ROOT_DIR_TOKEN)
        .map(|rest| rest.trim_start_matches(['/', '\\']))
        .unwrap_or(body);
    if negated {
        format!("!{}", body)
    } else {
        body.to_string()
    }
}

/// Resolve effective configuration from config file and CLI overrides.
///
/// Precedence: CLI > config file > defaults
///
/// `config_dir` is the directory holding the config file. A relative
/// `rootDir` is anchored there, and the root defaults to it when the file
/// names none. `coverageDirectory` from the file is resolved against the
/// final root, after any CLI root override.
pub fn resolve_config(
    config: Option<&Config>,
    config_dir: Option<&Path>,
    cli: &CliOverrides,
) -> EffectiveConfig {
    let mut effective = EffectiveConfig::default();
    let mut coverage_directory: Option<PathBuf> = None;
    let mut config_coverage_directory: Option<&str> = None;
    let mut thresholds: Option<ThresholdRules> = None;

    if let Some(dir) = config_dir {
        effective.root_dir = dir.to_path_buf();
    }

    // Apply config file values
    if let Some(config) = config {
        if let Some(root) = &config.root_dir {
            effective.root_dir = match config_dir {
                Some(dir) => dir.join(root),
                None => PathBuf::from(root),
            };
        }
        config_coverage_directory = config.coverage_directory.as_deref();
        if let Some(reporters) = &config.coverage_reporters {
            effective.coverage_reporters = reporters.clone();
        }
        if let Some(use_stderr) = config.use_stderr {
            effective.use_stderr = use_stderr;
        }
        if let Some(global) = config.coverage_threshold.as_ref().and_then(|t| t.global()) {
            thresholds = Some(*global);
        }
        if let Some(patterns) = &config.collect_coverage_from {
            effective.collect_coverage_from = patterns.clone();
        }
        if let Some(map) = config.map_coverage {
            effective.map_coverage = map;
        }
    }

    // Apply CLI overrides
    if let Some(root) = &cli.root_dir {
        effective.root_dir = root.clone();
    }
    if let Some(dir) = &cli.coverage_directory {
        coverage_directory = Some(dir.clone());
    }
    if let Some(reporters) = &cli.coverage_reporters {
        effective.coverage_reporters = reporters.clone();
    }
    if let Some(use_stderr) = cli.use_stderr {
        effective.use_stderr = use_stderr;
    }
    if let Some(patterns) = &cli.collect_coverage_from {
        effective.collect_coverage_from = patterns.clone();
    }
    if let Some(map) = cli.map_coverage {
        effective.map_coverage = map;
    }
    if !cli.thresholds.is_empty() {
        let rules = thresholds.get_or_insert_with(ThresholdRules::default);
        for metric in Metric::ALL {
            if let Some(value) = cli.thresholds.value(metric) {
                rules.set(metric, Some(value));
            }
        }
    }

    if coverage_directory.is_none() {
        coverage_directory = config_coverage_directory
            .map(|dir| resolve_root_path(&effective.root_dir, dir));
    }
    effective.coverage_directory =
        coverage_directory.unwrap_or_else(|| effective.root_dir.join("coverage"));
    effective.thresholds = thresholds.filter(|rules| !rules.is_empty());
    effective.collect_coverage_from = effective
        .collect_coverage_from
        .iter()
        .map(|pattern| strip_root_token(pattern))
        .collect();

    effective
}

// ============================================================================
// Tests
// ============================================================================
