//! Service configuration. Load from TOML or env.

use crate::dispatcher::DispatchConfig;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Global configuration for the gateway and pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScribeConfig {
    /// Application identity (e.g. "Scribe Gateway").
    pub app_name: String,
    /// HTTP port for the gateway.
    pub port: u16,

    /// Segmentation: maximum bytes per chunk.
    pub chunk_size_bytes: usize,
    /// Segmentation: bytes of overlap between consecutive chunks.
    #[serde(default)]
    pub overlap_bytes: usize,

    /// Dispatcher pool width (chunks in flight at once).
    pub max_concurrency: usize,
    /// Per-chunk attempt deadline in seconds.
    pub chunk_timeout_secs: u64,
    /// Retries after the first attempt per chunk.
    pub retry_attempts: u32,
    /// Initial retry backoff in milliseconds; doubles per retry.
    pub retry_backoff_ms: u64,

    /// Recognition language (BCP-47, e.g. "en-US").
    pub language_code: String,
    /// Sample rate hint forwarded to the recognizer.
    pub sample_rate_hertz: u32,
    /// Ask the recognizer for automatic punctuation.
    pub punctuation: bool,

    /// When set, chunks are staged to this bucket and recognized by URI
    /// instead of inline bytes.
    #[serde(default)]
    pub staging_bucket: Option<String>,
}

impl ScribeConfig {
    /// Load config from file and environment. Precedence: env `SCRIBE_CONFIG`
    /// path > `config/gateway.toml` > defaults, then `SCRIBE__`-prefixed env
    /// overrides on top.
    pub fn load() -> Result<Self, config::ConfigError> {
        let config_path =
            std::env::var("SCRIBE_CONFIG").unwrap_or_else(|_| "config/gateway.toml".to_string());
        let builder = config::Config::builder()
            .set_default("app_name", "Scribe Gateway")?
            .set_default("port", 8000_i64)?
            .set_default("chunk_size_bytes", 30_000_i64)?
            .set_default("overlap_bytes", 0_i64)?
            .set_default("max_concurrency", 4_i64)?
            .set_default("chunk_timeout_secs", 30_i64)?
            .set_default("retry_attempts", 2_i64)?
            .set_default("retry_backoff_ms", 250_i64)?
            .set_default("language_code", "en-US")?
            .set_default("sample_rate_hertz", 16_000_i64)?
            .set_default("punctuation", true)?;

        let path = Path::new(&config_path);
        let builder = if path.exists() {
            builder.add_source(config::File::from(path))
        } else {
            builder
        };

        let built = builder
            .add_source(config::Environment::with_prefix("SCRIBE").separator("__"))
            .build()?;

        built.try_deserialize()
    }

    /// Dispatcher tuning derived from this config.
    pub fn dispatch_config(&self) -> DispatchConfig {
        DispatchConfig {
            max_concurrency: self.max_concurrency,
            chunk_timeout: Duration::from_secs(self.chunk_timeout_secs),
            retry_attempts: self.retry_attempts,
            retry_backoff: Duration::from_millis(self.retry_backoff_ms),
        }
    }
}
