use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use camino::Utf8PathBuf;
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};

use crate::domain::SymbolPolicy;
use crate::error::KiraError;

pub const DEFAULT_CONFIG_FILE: &str = "kira-ev.json";

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub schema_version: Option<u32>,
    #[serde(default)]
    pub database: Option<String>,
    #[serde(default)]
    pub batch_size: Option<usize>,
    #[serde(default)]
    pub min_match_rate: Option<f64>,
    #[serde(default)]
    pub baseline_epsilon: Option<f64>,
    #[serde(default)]
    pub busy_timeout_ms: Option<u64>,
    #[serde(default)]
    pub symbol_policy: Option<SymbolPolicy>,
    #[serde(default)]
    pub fuzzy: Option<FuzzyEntry>,
    #[serde(default)]
    pub unresolved_sample: Option<usize>,
}

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct FuzzyEntry {
    #[serde(default)]
    pub max_distance: Option<usize>,
    #[serde(default)]
    pub length_tolerance: Option<usize>,
    #[serde(default)]
    pub min_length: Option<usize>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct FuzzySettings {
    pub max_distance: usize,
    pub length_tolerance: usize,
    pub min_length: usize,
}

impl Default for FuzzySettings {
    fn default() -> Self {
        Self {
            max_distance: 2,
            length_tolerance: 2,
            min_length: 3,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ResolverSettings {
    pub symbol_policy: SymbolPolicy,
    pub fuzzy: FuzzySettings,
    pub min_match_rate: f64,
    pub unresolved_sample: usize,
}

impl Default for ResolverSettings {
    fn default() -> Self {
        Self {
            symbol_policy: SymbolPolicy::ExpandAll,
            fuzzy: FuzzySettings::default(),
            min_match_rate: 0.5,
            unresolved_sample: 25,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct StoreSettings {
    pub batch_size: usize,
    pub baseline_epsilon: f64,
    pub busy_timeout: Duration,
}

impl Default for StoreSettings {
    fn default() -> Self {
        Self {
            batch_size: 1000,
            baseline_epsilon: 1e-9,
            busy_timeout: Duration::from_secs(30),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    pub schema_version: u32,
    pub database: Utf8PathBuf,
    pub resolver: ResolverSettings,
    pub store: StoreSettings,
}

pub struct ConfigLoader;

impl ConfigLoader {
    /// Loads `kira-ev.json` from the working directory when present; an explicit
    /// path must exist.
    pub fn resolve(path: Option<&str>) -> Result<ResolvedConfig, KiraError> {
        let config_path = match path {
            Some(path) => PathBuf::from(path),
            None => PathBuf::from(DEFAULT_CONFIG_FILE),
        };

        if path.is_none() && !config_path.exists() {
            return Self::resolve_config(Config::default());
        }

        let content = fs::read_to_string(&config_path)
            .map_err(|_| KiraError::ConfigRead(config_path.clone()))?;
        let config: Config = serde_json::from_str(&content)
            .map_err(|err| KiraError::ConfigParse(err.to_string()))?;

        Self::resolve_config(config)
    }

    pub fn resolve_config(config: Config) -> Result<ResolvedConfig, KiraError> {
        let schema_version = config.schema_version.unwrap_or(1);
        if schema_version != 1 {
            return Err(KiraError::InvalidConfig(format!(
                "unsupported schema_version {schema_version}"
            )));
        }

        let database = match config.database {
            Some(path) => Utf8PathBuf::from(path),
            None => default_database_path()?,
        };

        let mut resolver = ResolverSettings::default();
        if let Some(policy) = config.symbol_policy {
            resolver.symbol_policy = policy;
        }
        if let Some(rate) = config.min_match_rate {
            if !(0.0..=1.0).contains(&rate) {
                return Err(KiraError::InvalidConfig(format!(
                    "min_match_rate must be within [0, 1], got {rate}"
                )));
            }
            resolver.min_match_rate = rate;
        }
        if let Some(sample) = config.unresolved_sample {
            resolver.unresolved_sample = sample;
        }
        if let Some(fuzzy) = config.fuzzy {
            let defaults = FuzzySettings::default();
            resolver.fuzzy = FuzzySettings {
                max_distance: fuzzy.max_distance.unwrap_or(defaults.max_distance),
                length_tolerance: fuzzy.length_tolerance.unwrap_or(defaults.length_tolerance),
                min_length: fuzzy.min_length.unwrap_or(defaults.min_length),
            };
        }

        let mut store = StoreSettings::default();
        if let Some(batch_size) = config.batch_size {
            if batch_size == 0 {
                return Err(KiraError::InvalidConfig(
                    "batch_size must be greater than zero".to_string(),
                ));
            }
            store.batch_size = batch_size;
        }
        if let Some(epsilon) = config.baseline_epsilon {
            if !epsilon.is_finite() || epsilon < 0.0 {
                return Err(KiraError::InvalidConfig(format!(
                    "baseline_epsilon must be a non-negative number, got {epsilon}"
                )));
            }
            store.baseline_epsilon = epsilon;
        }
        if let Some(timeout) = config.busy_timeout_ms {
            if timeout == 0 {
                return Err(KiraError::InvalidConfig(
                    "busy_timeout_ms must be greater than zero".to_string(),
                ));
            }
            store.busy_timeout = Duration::from_millis(timeout);
        }

        Ok(ResolvedConfig {
            schema_version,
            database,
            resolver,
            store,
        })
    }
}

pub fn default_database_path() -> Result<Utf8PathBuf, KiraError> {
    ProjectDirs::from("io", "kira", "kira-expression-vault")
        .and_then(|dirs| Utf8PathBuf::from_path_buf(dirs.data_dir().join("vault.sqlite")).ok())
        .ok_or_else(|| KiraError::Filesystem("unable to resolve data directory".to_string()))
}
