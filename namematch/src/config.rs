//! Engine and service configuration.
//!
//! Values come from environment variables (the same names the matching service has always
//! used) and can be overridden by the command line.

use std::path::{Path, PathBuf};

use serde::Serialize;
use thiserror::Error;

use crate::interface::Query;

pub const ENV_STORAGE: &str = "STORAGE";
pub const ENV_DATA_ROOT: &str = "DATA_ROOT";
pub const ENV_DATASET_MODE: &str = "DATASET_MODE";
pub const ENV_CSV_PATH: &str = "CSV_PATH";
pub const ENV_SQLITE_PATH: &str = "SQLITE_PATH";
pub const ENV_SQLITE_FORCE_RELOAD: &str = "SQLITE_FORCE_RELOAD";
pub const ENV_NGRAM_N: &str = "NGRAM_N";
pub const ENV_MAX_CANDIDATES: &str = "MAX_CANDIDATES";
pub const ENV_MIN_SHARED_NGRAMS: &str = "MIN_SHARED_NGRAMS";
pub const ENV_CACHE_MAX: &str = "CACHE_MAX";

pub const DEFAULT_NGRAM_N: usize = 3;
/// Upper bound on candidates handed to the scorer per query.
pub const DEFAULT_MAX_CANDIDATES: usize = 2000;
pub const DEFAULT_MIN_SHARED_NGRAMS: usize = 1;
pub const DEFAULT_CACHE_CAPACITY: usize = 256;

pub const DEFAULT_THRESHOLD: f64 = 70.0;
pub const DEFAULT_LIMIT: usize = 10;
/// Largest `limit` a query may ask for.
pub const MAX_LIMIT: usize = 100;
pub const DEFAULT_W_TOKEN: f64 = 0.65;

pub const DEFAULT_DATA_ROOT: &str = "/app/data";
pub const DEFAULT_SQLITE_PATH: &str = "/data/names.db";

/// Titles removed by the normalizer when they appear as whole words.
pub const DEFAULT_HONORIFICS: &[&str] = &["dr", "dra", "sr", "sra", "srta", "ing", "lic", "prof"];

#[derive(Error, Debug, PartialEq)]
pub enum ConfigError {
    #[error("invalid {var}: {value:?} ({expected})")]
    InvalidValue {
        var: &'static str,
        value: String,
        expected: &'static str,
    },
}

pub type ConfigResult<T> = Result<T, ConfigError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageKind {
    Csv,
    Sqlite,
}

impl StorageKind {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Csv => "csv",
            Self::Sqlite => "sqlite",
        }
    }

    pub fn parse(raw: &str) -> ConfigResult<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "csv" => Ok(Self::Csv),
            "sqlite" => Ok(Self::Sqlite),
            _ => Err(ConfigError::InvalidValue {
                var: ENV_STORAGE,
                value: raw.to_string(),
                expected: "expected csv|sqlite",
            }),
        }
    }
}

/// Which on-disk variant of the dataset the record store reads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum DatasetMode {
    #[serde(rename = "original")]
    Original,
    #[serde(rename = "standardized")]
    Standardized,
    #[serde(rename = "standardized+dedupe")]
    StandardizedDedupe,
}

impl DatasetMode {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Original => "original",
            Self::Standardized => "standardized",
            Self::StandardizedDedupe => "standardized+dedupe",
        }
    }

    /// Unknown modes fall back to `original`.
    pub fn parse_lenient(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "standardized" => Self::Standardized,
            "standardized+dedupe" => Self::StandardizedDedupe,
            "original" => Self::Original,
            other => {
                tracing::warn!(mode = other, "unknown dataset mode, using original");
                Self::Original
            }
        }
    }

    pub const fn is_standardized(self) -> bool {
        matches!(self, Self::Standardized | Self::StandardizedDedupe)
    }

    pub const fn dedupe(self) -> bool {
        matches!(self, Self::StandardizedDedupe)
    }

    /// Default dataset file under the data root for this mode.
    pub fn dataset_path(self, data_root: &Path) -> PathBuf {
        if self.is_standardized() {
            data_root.join("clean").join("names_dataset_standardized.csv")
        } else {
            data_root.join("raw").join("names_dataset.csv")
        }
    }
}

/// Tunables of the matching core.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EngineConfig {
    pub ngram_n: usize,
    pub max_candidates: usize,
    pub min_shared_ngrams: usize,
    /// Zero disables the result cache.
    pub cache_capacity: usize,
    pub honorifics: Vec<String>,
    pub default_threshold: f64,
    pub default_limit: usize,
    pub default_w_token: f64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            ngram_n: DEFAULT_NGRAM_N,
            max_candidates: DEFAULT_MAX_CANDIDATES,
            min_shared_ngrams: DEFAULT_MIN_SHARED_NGRAMS,
            cache_capacity: DEFAULT_CACHE_CAPACITY,
            honorifics: DEFAULT_HONORIFICS.iter().map(|h| h.to_string()).collect(),
            default_threshold: DEFAULT_THRESHOLD,
            default_limit: DEFAULT_LIMIT,
            default_w_token: DEFAULT_W_TOKEN,
        }
    }
}

impl EngineConfig {
    /// Query for `name` with this engine's default parameters.
    pub fn query(&self, name: impl Into<String>) -> Query {
        Query::new(name)
            .threshold(self.default_threshold)
            .limit(self.default_limit)
            .w_token(self.default_w_token)
    }
}

/// Full service configuration: engine tunables plus record store selection.
#[derive(Debug, Clone, PartialEq)]
pub struct ServiceConfig {
    pub storage: StorageKind,
    pub data_root: PathBuf,
    pub dataset_mode: DatasetMode,
    /// Explicit CSV path; overrides the mode-derived default under `data_root`.
    pub csv_path: Option<PathBuf>,
    pub sqlite_path: PathBuf,
    pub sqlite_force_reload: bool,
    pub engine: EngineConfig,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            storage: StorageKind::Csv,
            data_root: PathBuf::from(DEFAULT_DATA_ROOT),
            dataset_mode: DatasetMode::Original,
            csv_path: None,
            sqlite_path: PathBuf::from(DEFAULT_SQLITE_PATH),
            sqlite_force_reload: false,
            engine: EngineConfig::default(),
        }
    }
}

impl ServiceConfig {
    pub fn from_env() -> ConfigResult<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Build from an arbitrary variable lookup. Unset or blank variables keep defaults.
    pub fn from_lookup<F>(lookup: F) -> ConfigResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let read = |name: &str| {
            lookup(name)
                .map(|raw| raw.trim().to_string())
                .filter(|value| !value.is_empty())
        };

        let mut config = Self::default();
        if let Some(raw) = read(ENV_STORAGE) {
            config.storage = StorageKind::parse(&raw)?;
        }
        if let Some(raw) = read(ENV_DATA_ROOT) {
            config.data_root = PathBuf::from(raw);
        }
        if let Some(raw) = read(ENV_DATASET_MODE) {
            config.dataset_mode = DatasetMode::parse_lenient(&raw);
        }
        config.csv_path = read(ENV_CSV_PATH).map(PathBuf::from);
        if let Some(raw) = read(ENV_SQLITE_PATH) {
            config.sqlite_path = PathBuf::from(raw);
        }
        config.sqlite_force_reload = read(ENV_SQLITE_FORCE_RELOAD)
            .map(|raw| parse_flag(&raw))
            .unwrap_or(false);

        if let Some(raw) = read(ENV_NGRAM_N) {
            config.engine.ngram_n = parse_usize(ENV_NGRAM_N, &raw, 1)?;
        }
        if let Some(raw) = read(ENV_MAX_CANDIDATES) {
            config.engine.max_candidates = parse_usize(ENV_MAX_CANDIDATES, &raw, 1)?;
        }
        if let Some(raw) = read(ENV_MIN_SHARED_NGRAMS) {
            config.engine.min_shared_ngrams = parse_usize(ENV_MIN_SHARED_NGRAMS, &raw, 1)?;
        }
        if let Some(raw) = read(ENV_CACHE_MAX) {
            config.engine.cache_capacity = parse_usize(ENV_CACHE_MAX, &raw, 0)?;
        }
        Ok(config)
    }

    /// Dataset CSV for the configured mode, honoring an explicit `CSV_PATH`.
    pub fn dataset_path(&self) -> PathBuf {
        self.csv_path
            .clone()
            .unwrap_or_else(|| self.dataset_mode.dataset_path(&self.data_root))
    }
}

fn parse_flag(raw: &str) -> bool {
    matches!(raw.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "y")
}

fn parse_usize(var: &'static str, raw: &str, min: usize) -> ConfigResult<usize> {
    raw.parse::<usize>()
        .ok()
        .filter(|value| *value >= min)
        .ok_or_else(|| ConfigError::InvalidValue {
            var,
            value: raw.to_string(),
            expected: if min == 0 {
                "expected a non-negative integer"
            } else {
                "expected a positive integer"
            },
        })
}
