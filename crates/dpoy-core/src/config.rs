// Configuration loading and parsing (sources.toml, analysis.toml).

use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};

use serde::Deserialize;
use thiserror::Error;
use tracing::info;

use crate::rank::{RankDirection, RankedMetric};
use crate::sources::SourceId;
use crate::table::ColumnMap;

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("config file not found: {path}")]
    FileNotFound { path: PathBuf },

    #[error("failed to read config file {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to parse config file {path}: {source}")]
    ParseError {
        path: PathBuf,
        source: toml::de::Error,
    },

    #[error("validation error for field `{field}`: {message}")]
    ValidationError { field: String, message: String },

    #[error("failed to initialize config from defaults: {message}")]
    DefaultsCopyError { message: String },
}

// ---------------------------------------------------------------------------
// Top-level assembled Config
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct Config {
    pub data_paths: BTreeMap<SourceId, String>,
    pub renames: RenameTables,
    pub ranking: RankingConfig,
    pub per_game_totals: Vec<PerGameTotal>,
    pub votes: VoteConfig,
    pub positions: PositionConfig,
    pub output: OutputConfig,
}

// ---------------------------------------------------------------------------
// sources.toml structs
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
struct SourcesFile {
    data_paths: BTreeMap<SourceId, String>,
    #[serde(default)]
    renames: RenameTables,
}

/// Rename maps keyed by the source (or merge step) they apply to. Each map
/// is validated against the table's real columns when applied.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RenameTables {
    #[serde(default)]
    pub defense_2pt: ColumnMap,
    #[serde(default)]
    pub defense_3pt: ColumnMap,
    /// Opponent block of the team stats export (`FG.1` -> `opp_FG`).
    #[serde(default)]
    pub team_stats_opponent: ColumnMap,
    /// Team's own stats (`FG` -> `tm_FG`), applied after the opponent block.
    #[serde(default)]
    pub team_stats_team: ColumnMap,
    #[serde(default)]
    pub team_advanced_opponent: ColumnMap,
    #[serde(default)]
    pub team_advanced_team: ColumnMap,
    #[serde(default)]
    pub combine: ColumnMap,
    #[serde(default)]
    pub wingspans: ColumnMap,
    /// Per-game rate columns on the merged table (`BLK` -> `BPG`), renamed
    /// before season totals reuse the names.
    #[serde(default)]
    pub per_game_rates: ColumnMap,
}

// ---------------------------------------------------------------------------
// analysis.toml structs
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
struct AnalysisFile {
    ranking: RankingConfig,
    #[serde(default)]
    per_game_totals: Vec<PerGameTotal>,
    votes: VoteConfig,
    positions: PositionConfig,
    output: OutputConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RankingConfig {
    #[serde(default)]
    pub higher_is_better: Vec<String>,
    #[serde(default)]
    pub lower_is_better: Vec<String>,
}

impl RankingConfig {
    /// Higher-is-better metrics first, then lower-is-better, each in the
    /// configured order.
    pub fn metrics(&self) -> Vec<RankedMetric> {
        let higher = self.higher_is_better.iter().map(|c| RankedMetric {
            column: c.clone(),
            direction: RankDirection::HigherIsBetter,
        });
        let lower = self.lower_is_better.iter().map(|c| RankedMetric {
            column: c.clone(),
            direction: RankDirection::LowerIsBetter,
        });
        higher.chain(lower).collect()
    }
}

/// `total = rate * games`, e.g. season blocks from blocks per game.
#[derive(Debug, Clone, Deserialize)]
pub struct PerGameTotal {
    pub total: String,
    pub rate: String,
    pub games: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct VoteConfig {
    /// Award-voting columns where a missing value means zero votes.
    pub zero_fill: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PositionConfig {
    pub column: String,
    #[serde(default)]
    pub replacements: ColumnMap,
}

#[derive(Debug, Clone, Deserialize)]
pub struct OutputConfig {
    pub path: String,
}

// ---------------------------------------------------------------------------
// Loading logic
// ---------------------------------------------------------------------------

/// Load and validate configuration from `config/sources.toml` and
/// `config/analysis.toml`, relative to the given `base_dir`.
///
/// Does not copy defaults; prefer `load_config()` for that.
pub fn load_config_from(base_dir: &Path) -> Result<Config, ConfigError> {
    let config_dir = base_dir.join("config");

    let sources_path = config_dir.join("sources.toml");
    let sources_text = read_file(&sources_path)?;
    let sources: SourcesFile =
        toml::from_str(&sources_text).map_err(|e| ConfigError::ParseError {
            path: sources_path.clone(),
            source: e,
        })?;

    let analysis_path = config_dir.join("analysis.toml");
    let analysis_text = read_file(&analysis_path)?;
    let analysis: AnalysisFile =
        toml::from_str(&analysis_text).map_err(|e| ConfigError::ParseError {
            path: analysis_path.clone(),
            source: e,
        })?;

    let config = Config {
        data_paths: sources.data_paths,
        renames: sources.renames,
        ranking: analysis.ranking,
        per_game_totals: analysis.per_game_totals,
        votes: analysis.votes,
        positions: analysis.positions,
        output: analysis.output,
    };

    validate(&config)?;

    Ok(config)
}

/// Copy every file in `defaults/` that has no counterpart in `config/`.
/// Existing config files are never touched and `*.example` files are
/// skipped. Returns the paths written.
pub fn ensure_config_files(base_dir: &Path) -> Result<Vec<PathBuf>, ConfigError> {
    let defaults_dir = base_dir.join("defaults");
    let config_dir = base_dir.join("config");

    if !defaults_dir.is_dir() {
        if config_dir.is_dir() {
            return Ok(Vec::new());
        }
        return Err(ConfigError::DefaultsCopyError {
            message: format!(
                "neither defaults/ nor config/ directory found in {}; \
                 run from the project root",
                base_dir.display()
            ),
        });
    }

    let copy_err = |what: String| ConfigError::DefaultsCopyError { message: what };

    std::fs::create_dir_all(&config_dir)
        .map_err(|e| copy_err(format!("cannot create {}: {e}", config_dir.display())))?;

    let entries = std::fs::read_dir(&defaults_dir)
        .map_err(|e| copy_err(format!("cannot read {}: {e}", defaults_dir.display())))?;

    let mut copied = Vec::new();
    for entry in entries {
        let source = entry
            .map_err(|e| copy_err(format!("cannot list defaults: {e}")))?
            .path();
        let Some(file_name) = source.file_name().and_then(|n| n.to_str()) else {
            continue;
        };
        if !source.is_file() || file_name.ends_with(".example") {
            continue;
        }
        let target = config_dir.join(file_name);
        if target.exists() {
            continue;
        }
        std::fs::copy(&source, &target).map_err(|e| {
            copy_err(format!(
                "cannot copy {} to {}: {e}",
                source.display(),
                target.display()
            ))
        })?;
        info!("created {} from defaults", target.display());
        copied.push(target);
    }

    copied.sort();
    Ok(copied)
}

/// Convenience wrapper: loads config relative to the current working directory.
/// Ensures default config files are copied before loading.
pub fn load_config() -> Result<Config, ConfigError> {
    let cwd = std::env::current_dir().map_err(|e| ConfigError::Io {
        path: PathBuf::from("."),
        source: e,
    })?;
    ensure_config_files(&cwd)?;
    load_config_from(&cwd)
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn read_file(path: &Path) -> Result<String, ConfigError> {
    std::fs::read_to_string(path).map_err(|e| match e.kind() {
        std::io::ErrorKind::NotFound => ConfigError::FileNotFound {
            path: path.to_path_buf(),
        },
        _ => ConfigError::Io {
            path: path.to_path_buf(),
            source: e,
        },
    })
}

fn invalid(field: impl Into<String>, message: impl Into<String>) -> ConfigError {
    ConfigError::ValidationError {
        field: field.into(),
        message: message.into(),
    }
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

fn validate(config: &Config) -> Result<(), ConfigError> {
    // Every source needs a file
    for id in SourceId::ALL {
        match config.data_paths.get(&id) {
            None => return Err(invalid(format!("data_paths.{id}"), "missing")),
            Some(p) if p.trim().is_empty() => {
                return Err(invalid(format!("data_paths.{id}"), "must not be empty"))
            }
            Some(_) => {}
        }
    }

    // Ranking metrics: at least one, each listed once, in one direction only
    let ranking = &config.ranking;
    if ranking.higher_is_better.is_empty() && ranking.lower_is_better.is_empty() {
        return Err(invalid("ranking", "at least one metric must be configured"));
    }
    let mut seen = HashSet::new();
    let listed = ranking
        .higher_is_better
        .iter()
        .map(|m| ("ranking.higher_is_better", m))
        .chain(
            ranking
                .lower_is_better
                .iter()
                .map(|m| ("ranking.lower_is_better", m)),
        );
    for (field, metric) in listed {
        if metric.trim().is_empty() {
            return Err(invalid(field, "metric names must not be empty"));
        }
        if !seen.insert(metric.as_str()) {
            return Err(invalid(
                field,
                format!("metric `{metric}` is listed more than once"),
            ));
        }
    }

    for (i, t) in config.per_game_totals.iter().enumerate() {
        if t.total.is_empty() || t.rate.is_empty() || t.games.is_empty() {
            return Err(invalid(
                format!("per_game_totals[{i}]"),
                "total, rate and games must all be set",
            ));
        }
    }

    if config.positions.column.trim().is_empty() {
        return Err(invalid("positions.column", "must not be empty"));
    }

    if config.output.path.trim().is_empty() {
        return Err(invalid("output.path", "must not be empty"));
    }

    Ok(())
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------
