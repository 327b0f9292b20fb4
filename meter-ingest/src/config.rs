use std::{
    env, fs,
    path::{Path, PathBuf},
};

use anyhow::{bail, Context};
use serde::Deserialize;

use crate::transform::{BadRowPolicy, DstWindow};

pub const CONFIG_PATH_ENV: &str = "METER_INGEST_CONFIG";
pub const DEFAULT_CONFIG_PATH: &str = "meter-ingest.toml";
pub const PASSWORD_ENV: &str = "METER_INGEST_PASSWORD";
pub const SINK_TOKEN_ENV: &str = "METER_INGEST_SINK_TOKEN";

/// Exports must be checked for fallback nights at least this far ahead.
const MIN_DST_YEARS_AFTER: u16 = 4;

#[derive(Debug, Clone, Deserialize)]
pub struct MeterConfig {
    pub meter_id: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    HttpExport,
    CsvFile,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SourceConfig {
    pub kind: SourceKind,
    pub export_url: Option<String>,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: String,
    pub path: Option<PathBuf>,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_retry_backoff_ms")]
    pub retry_backoff_ms: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LedgerConfig {
    #[serde(default = "default_ledger_path")]
    pub path: PathBuf,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            path: default_ledger_path(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ParserConfig {
    #[serde(default)]
    pub bad_row_policy: BadRowPolicy,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SinkKind {
    InfluxHttp,
    Ilp,
}

#[derive(Debug, Clone, Deserialize)]
pub struct InfluxConfig {
    pub host: String,
    pub bucket: String,
    pub organisation: String,
    #[serde(default)]
    pub token: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct IlpConfig {
    pub tcp_addr: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SinkConfig {
    pub kind: SinkKind,
    #[serde(default = "default_measurement")]
    pub measurement: String,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_retry_backoff_ms")]
    pub retry_backoff_ms: u64,
    pub influx: Option<InfluxConfig>,
    pub ilp: Option<IlpConfig>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MetricsConfig {
    /// Prometheus textfile written at the end of every run.
    pub textfile_path: PathBuf,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub meter: MeterConfig,
    pub source: SourceConfig,
    #[serde(default)]
    pub ledger: LedgerConfig,
    #[serde(default)]
    pub parser: ParserConfig,
    #[serde(default)]
    pub dedup: DstWindow,
    pub sink: SinkConfig,
    pub metrics: Option<MetricsConfig>,
}

fn default_timeout_secs() -> u64 {
    120
}

fn default_max_retries() -> u32 {
    3
}

fn default_retry_backoff_ms() -> u64 {
    500
}

fn default_ledger_path() -> PathBuf {
    PathBuf::from("esb_readings.json")
}

fn default_measurement() -> String {
    "meter_reading".to_string()
}

impl AppConfig {
    /// Load from `path`, else `$METER_INGEST_CONFIG`, else `meter-ingest.toml`.
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        let path = match path {
            Some(p) => p.to_path_buf(),
            None => env::var(CONFIG_PATH_ENV)
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from(DEFAULT_CONFIG_PATH)),
        };
        let contents = fs::read_to_string(&path)
            .with_context(|| format!("failed to read config {}", path.display()))?;
        let mut cfg = Self::from_toml_str(&contents)
            .with_context(|| format!("invalid config {}", path.display()))?;
        cfg.apply_env_overrides();
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn from_toml_str(contents: &str) -> anyhow::Result<Self> {
        Ok(toml::from_str(contents)?)
    }

    /// Secrets can be kept out of the config file.
    pub fn apply_env_overrides(&mut self) {
        if let Ok(password) = env::var(PASSWORD_ENV) {
            self.source.password = password;
        }
        if let (Ok(token), Some(influx)) = (env::var(SINK_TOKEN_ENV), self.sink.influx.as_mut()) {
            influx.token = token;
        }
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.meter.meter_id.trim().is_empty() {
            bail!("meter.meter_id must not be empty");
        }
        match self.source.kind {
            SourceKind::HttpExport if self.source.export_url.is_none() => {
                bail!("source.export_url is required for kind = \"http_export\"")
            }
            SourceKind::CsvFile if self.source.path.is_none() => {
                bail!("source.path is required for kind = \"csv_file\"")
            }
            _ => {}
        }
        match self.sink.kind {
            SinkKind::InfluxHttp if self.sink.influx.is_none() => {
                bail!("[sink.influx] is required for kind = \"influx_http\"")
            }
            SinkKind::Ilp if self.sink.ilp.is_none() => {
                bail!("[sink.ilp] is required for kind = \"ilp\"")
            }
            _ => {}
        }
        if self.dedup.years_after < MIN_DST_YEARS_AFTER {
            bail!("dedup.years_after must be at least {MIN_DST_YEARS_AFTER}");
        }
        Ok(())
    }
}
