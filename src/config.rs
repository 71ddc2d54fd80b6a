// src/config.rs

use chrono_tz::Tz;
use serde::Deserialize;
use std::{
    env, fs,
    path::{Path, PathBuf},
};
use url::Url;

use crate::error::{IngestError, Result};
use crate::process::Granularity;

pub const CONFIG_ENV: &str = "REESCRAPER_CONFIG";
pub const DEFAULT_CONFIG_PATH: &str = "reescraper.toml";

const DEFAULT_ENDPOINT: &str = "https://apidatos.ree.es/es/datos/demanda/demanda-tiempo-real";
const DEFAULT_USER_AGENT: &str =
    "Mozilla/5.0 (X11; Ubuntu; Linux x86_64; rv:100.0) Gecko/20100101 Firefox/100.0";

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ApiConfig {
    pub endpoint: String,
    pub time_trunc: String,
    pub user_agent: String,
    pub timeout_secs: u64,
    pub max_retries: u32,
    pub initial_backoff_ms: u64,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            endpoint: DEFAULT_ENDPOINT.to_string(),
            time_trunc: "hour".to_string(),
            user_agent: DEFAULT_USER_AGENT.to_string(),
            timeout_secs: 30,
            max_retries: 3,
            initial_backoff_ms: 500,
        }
    }
}

impl ApiConfig {
    pub fn endpoint_url(&self) -> Result<Url> {
        Url::parse(&self.endpoint)
            .map_err(|e| IngestError::Config(format!("invalid api.endpoint '{}': {e}", self.endpoint)))
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RegionConfig {
    /// IANA zone of the source's civil timestamps.
    pub timezone: String,
}

impl Default for RegionConfig {
    fn default() -> Self {
        Self {
            timezone: "Europe/Madrid".to_string(),
        }
    }
}

impl RegionConfig {
    pub fn tz(&self) -> Result<Tz> {
        self.timezone
            .parse::<Tz>()
            .map_err(|e| IngestError::Config(format!("invalid region.timezone '{}': {e}", self.timezone)))
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct StorageConfig {
    pub data_dir: PathBuf,
    pub raw_file: String,
    pub checkpoint_file: String,
    pub aggregate_prefix: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("data"),
            raw_file: "REE_data.csv".to_string(),
            checkpoint_file: "last_collect.txt".to_string(),
            aggregate_prefix: "REE_data_aggregated_by_".to_string(),
        }
    }
}

impl StorageConfig {
    pub fn raw_path(&self) -> PathBuf {
        self.data_dir.join(&self.raw_file)
    }

    pub fn checkpoint_path(&self) -> PathBuf {
        self.data_dir.join(&self.checkpoint_file)
    }

    /// `<data_dir>/<prefix><10mn|1h|1d>.csv`
    pub fn aggregate_path(&self, granularity: Granularity) -> PathBuf {
        self.data_dir
            .join(format!("{}{}.csv", self.aggregate_prefix, granularity.name()))
    }
}

/// When the checkpoint is advanced during a catch-up run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckpointPolicy {
    /// After every fully appended day.
    #[default]
    PerDay,
    /// Once, after the last day of the range.
    EndOfRun,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct IngestConfig {
    pub granularities: Vec<Granularity>,
    pub checkpoint: CheckpointPolicy,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            granularities: Granularity::ALL.to_vec(),
            checkpoint: CheckpointPolicy::default(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AppConfig {
    pub api: ApiConfig,
    pub region: RegionConfig,
    pub storage: StorageConfig,
    pub ingest: IngestConfig,
}

impl AppConfig {
    /// Load from `$REESCRAPER_CONFIG`, or `reescraper.toml` if present, or defaults.
    pub fn load() -> Result<Self> {
        match env::var(CONFIG_ENV) {
            Ok(path) => Self::from_file(path),
            Err(_) if Path::new(DEFAULT_CONFIG_PATH).exists() => Self::from_file(DEFAULT_CONFIG_PATH),
            Err(_) => {
                let cfg = Self::default();
                cfg.validate()?;
                Ok(cfg)
            }
        }
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path)
            .map_err(|e| IngestError::Config(format!("reading {}: {e}", path.display())))?;
        Self::from_toml_str(&contents)
    }

    pub fn from_toml_str(contents: &str) -> Result<Self> {
        let cfg: AppConfig =
            toml::from_str(contents).map_err(|e| IngestError::Config(e.to_string()))?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<()> {
        self.api.endpoint_url()?;
        self.region.tz()?;
        if self.ingest.granularities.is_empty() {
            return Err(IngestError::Config(
                "ingest.granularities must name at least one of 10mn, 1h, 1d".to_string(),
            ));
        }
        if self.api.timeout_secs == 0 {
            return Err(IngestError::Config("api.timeout_secs must be positive".to_string()));
        }
        Ok(())
    }

    /// Configured granularities, deduplicated, in increasing width.
    pub fn granularities(&self) -> Vec<Granularity> {
        let mut out = self.ingest.granularities.clone();
        out.sort();
        out.dedup();
        out
    }
}
