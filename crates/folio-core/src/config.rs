//! Config - `folio.toml` の読み込み
//!
//! 全フィールドにデフォルトがあるので、ファイルが無くても一部だけでも有効。
//! 環境変数 `FOLIO_MODEL_API_KEY` はファイルの `model.api_key` より優先される。

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::app::WorkerSettings;
use crate::domain::FolioError;
use crate::figures::MatcherConfig;
use crate::queue::RetryPolicy;

pub const DEFAULT_CONFIG_FILE: &str = "folio.toml";
pub const API_KEY_ENV: &str = "FOLIO_MODEL_API_KEY";

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct FolioConfig {
    pub worker: WorkerConfig,
    pub retry: RetryConfig,
    pub queue: QueueConfig,
    pub model: ModelConfig,
    pub figures: MatcherConfig,
    pub storage: StorageConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    pub poll_interval_ms: u64,
    pub heartbeat_interval_secs: u64,
    /// A running job without a heartbeat for this long becomes stale.
    pub liveness_threshold_secs: u64,
    /// Delay before a yielding orchestrator is looked at again.
    pub yield_delay_ms: u64,
    pub concurrency: usize,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 500,
            heartbeat_interval_secs: 15,
            liveness_threshold_secs: 120,
            yield_delay_ms: 1000,
            concurrency: 1,
        }
    }
}

impl WorkerConfig {
    pub fn settings(&self) -> WorkerSettings {
        WorkerSettings {
            poll_interval: Duration::from_millis(self.poll_interval_ms),
            heartbeat_interval: Duration::from_secs(self.heartbeat_interval_secs),
            liveness_threshold: Duration::from_secs(self.liveness_threshold_secs),
        }
    }

    pub fn yield_delay(&self) -> Duration {
        Duration::from_millis(self.yield_delay_ms)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub max_retries: u32,
    pub base_delay_ms: u64,
    pub multiplier: f64,
    pub max_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay_ms: 2000,
            multiplier: 2.0,
            max_delay_ms: 300_000,
        }
    }
}

impl RetryConfig {
    pub fn policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_retries: self.max_retries,
            base_delay: Duration::from_millis(self.base_delay_ms),
            multiplier: self.multiplier,
            max_delay: Duration::from_millis(self.max_delay_ms),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    pub dedup_window_secs: u64,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            dedup_window_secs: 86_400,
        }
    }
}

impl QueueConfig {
    pub fn dedup_window(&self) -> Duration {
        Duration::from_secs(self.dedup_window_secs)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    pub endpoint: String,
    pub model: String,
    /// Empty means offline: sections are filled by the scripted model.
    pub api_key: String,
    pub timeout_secs: u64,
    pub max_tokens: u32,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            endpoint: "https://api.anthropic.com/v1/messages".to_string(),
            model: "claude-sonnet-4-5".to_string(),
            api_key: String::new(),
            timeout_secs: 120,
            max_tokens: 4096,
        }
    }
}

impl ModelConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn is_offline(&self) -> bool {
        self.api_key.trim().is_empty()
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub data_dir: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from(".folio"),
        }
    }
}

impl StorageConfig {
    pub fn jobs_file(&self) -> PathBuf {
        self.data_dir.join("jobs.json")
    }
}

impl FolioConfig {
    /// Load `path`, or `folio.toml` in the working directory. A missing file
    /// gives the defaults.
    pub fn load(path: Option<&Path>) -> Result<Self, FolioError> {
        let path = path.unwrap_or_else(|| Path::new(DEFAULT_CONFIG_FILE));
        let mut config = if path.exists() {
            let contents = std::fs::read_to_string(path)?;
            Self::parse(&contents)?
        } else {
            Self::default()
        };

        if let Ok(key) = std::env::var(API_KEY_ENV)
            && !key.is_empty()
        {
            config.model.api_key = key;
        }

        config.validate()?;
        Ok(config)
    }

    pub fn parse(contents: &str) -> Result<Self, FolioError> {
        toml::from_str(contents).map_err(|e| FolioError::Config(e.to_string()))
    }

    fn validate(&self) -> Result<(), FolioError> {
        if self.worker.heartbeat_interval_secs == 0 {
            return Err(FolioError::Config(
                "worker.heartbeat_interval_secs must be at least 1".into(),
            ));
        }
        if self.worker.liveness_threshold_secs <= self.worker.heartbeat_interval_secs {
            return Err(FolioError::Config(
                "worker.liveness_threshold_secs must exceed heartbeat_interval_secs".into(),
            ));
        }
        if self.worker.concurrency == 0 {
            return Err(FolioError::Config("worker.concurrency must be at least 1".into()));
        }
        if self.retry.multiplier < 1.0 {
            return Err(FolioError::Config("retry.multiplier must be >= 1.0".into()));
        }
        Ok(())
    }
}
