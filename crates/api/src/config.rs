use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use consistency::ConsistencyConfig;
use extract::{JobManagerConfig, ResolverConfig, RetryPolicy};

pub const CONFIG_ENV: &str = "STORYGRAPH_CONFIG";
const ENV_PREFIX: &str = "STORYGRAPH_";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub mode: OperationMode,
    pub server: ServerConfig,
    pub storage: StorageConfig,
    pub resolver: ResolverConfig,
    pub consistency: ConsistencyConfig,
    pub jobs: JobsConfig,
    pub extractor: ExtractorConfig,
    pub retry: RetryConfig,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum OperationMode {
    Fast,     // Short timeouts, loose matching
    Accurate, // Patient extractor, strict matching
    Balanced,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Text,
    Json,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind: String,
    pub log_format: LogFormat,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub data_dir: PathBuf,
    pub project_id: String,
    /// Write the graph and checkpoints to `data_dir`. Off keeps everything
    /// in memory.
    pub persist: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct JobsConfig {
    pub extraction_timeout_secs: u64,
    pub write_timeout_ms: u64,
    pub max_concurrent_extractions: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExtractorConfig {
    pub enabled: bool,
    pub base_url: String,
    pub model: String,
    pub cost_per_1k_tokens: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub max_retries: usize,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0:3000".to_string(),
            log_format: LogFormat::Text,
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("data"),
            project_id: "default".to_string(),
            persist: true,
        }
    }
}

impl Default for JobsConfig {
    fn default() -> Self {
        Self {
            extraction_timeout_secs: 120,
            write_timeout_ms: 5_000,
            max_concurrent_extractions: 4,
        }
    }
}

impl Default for ExtractorConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            base_url: "http://localhost:11434".to_string(),
            model: "llama3.1:8b".to_string(),
            cost_per_1k_tokens: 0.0,
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_backoff_ms: 1000,
            max_backoff_ms: 10000,
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            mode: OperationMode::Balanced,
            server: ServerConfig::default(),
            storage: StorageConfig::default(),
            resolver: ResolverConfig::default(),
            consistency: ConsistencyConfig::default(),
            jobs: JobsConfig::default(),
            extractor: ExtractorConfig::default(),
            retry: RetryConfig::default(),
        }
    }
}

impl AppConfig {
    pub fn fast_mode() -> Self {
        Self {
            mode: OperationMode::Fast,
            resolver: ResolverConfig {
                similarity_threshold: 0.8,
            },
            jobs: JobsConfig {
                extraction_timeout_secs: 30,
                write_timeout_ms: 2_000,
                max_concurrent_extractions: 16,
            },
            retry: RetryConfig {
                max_retries: 2,
                initial_backoff_ms: 500,
                max_backoff_ms: 5000,
            },
            ..Self::default()
        }
    }

    pub fn accurate_mode() -> Self {
        Self {
            mode: OperationMode::Accurate,
            resolver: ResolverConfig {
                similarity_threshold: 0.9,
            },
            jobs: JobsConfig {
                extraction_timeout_secs: 300,
                write_timeout_ms: 10_000,
                max_concurrent_extractions: 2,
            },
            retry: RetryConfig {
                max_retries: 5,
                initial_backoff_ms: 2000,
                max_backoff_ms: 20000,
            },
            ..Self::default()
        }
    }

    pub fn from_toml(text: &str) -> Result<Self> {
        toml::from_str(text).context("invalid configuration")
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file {}", path.display()))?;
        Self::from_toml(&text).with_context(|| format!("in {}", path.display()))
    }

    /// File named by `STORYGRAPH_CONFIG` (defaults when unset), then
    /// `STORYGRAPH_*` variables on top.
    pub fn load() -> Result<Self> {
        let mut config = match std::env::var(CONFIG_ENV) {
            Ok(path) => Self::from_file(Path::new(&path))?,
            Err(_) => Self::default(),
        };
        config.apply_overrides(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    /// Override fields from `lookup`, which is asked for `STORYGRAPH_`
    /// prefixed names.
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<()> {
        let get = |name: &str| lookup(&format!("{ENV_PREFIX}{name}"));

        if let Some(mode) = get("MODE") {
            let base = match mode.to_lowercase().as_str() {
                "fast" => Self::fast_mode(),
                "accurate" => Self::accurate_mode(),
                "balanced" => Self::default(),
                other => anyhow::bail!("unknown mode {other:?}"),
            };
            self.mode = base.mode;
            self.resolver = base.resolver;
            self.jobs = base.jobs;
            self.retry = base.retry;
        }
        if let Some(bind) = get("BIND") {
            self.server.bind = bind;
        }
        if let Some(format) = get("LOG_FORMAT") {
            self.server.log_format = match format.to_lowercase().as_str() {
                "json" => LogFormat::Json,
                _ => LogFormat::Text,
            };
        }
        if let Some(dir) = get("DATA_DIR") {
            self.storage.data_dir = PathBuf::from(dir);
        }
        if let Some(project) = get("PROJECT") {
            self.storage.project_id = project;
        }
        if let Some(persist) = get("PERSIST") {
            self.storage.persist = parse_var("PERSIST", &persist)?;
        }
        if let Some(threshold) = get("SIMILARITY_THRESHOLD") {
            self.resolver.similarity_threshold = parse_var("SIMILARITY_THRESHOLD", &threshold)?;
        }
        if let Some(secs) = get("EXTRACTION_TIMEOUT_SECS") {
            self.jobs.extraction_timeout_secs = parse_var("EXTRACTION_TIMEOUT_SECS", &secs)?;
        }
        if let Some(n) = get("MAX_CONCURRENT_EXTRACTIONS") {
            self.jobs.max_concurrent_extractions = parse_var("MAX_CONCURRENT_EXTRACTIONS", &n)?;
        }
        if let Some(enabled) = get("EXTRACTOR_ENABLED") {
            self.extractor.enabled = parse_var("EXTRACTOR_ENABLED", &enabled)?;
        }
        if let Some(url) = get("OLLAMA_URL") {
            self.extractor.base_url = url;
        }
        if let Some(model) = get("MODEL") {
            self.extractor.model = model;
        }
        if let Some(n) = get("MAX_RETRIES") {
            self.retry.max_retries = parse_var("MAX_RETRIES", &n)?;
        }
        Ok(())
    }

    pub fn project_dir(&self) -> PathBuf {
        self.storage.data_dir.join(&self.storage.project_id)
    }

    pub fn snapshot_path(&self) -> PathBuf {
        self.project_dir().join("graph.json")
    }

    pub fn checkpoint_dir(&self) -> PathBuf {
        self.project_dir().join("checkpoints")
    }

    pub fn job_manager_config(&self) -> JobManagerConfig {
        JobManagerConfig {
            extraction_timeout: Duration::from_secs(self.jobs.extraction_timeout_secs),
            max_concurrent: self.jobs.max_concurrent_extractions,
        }
    }

    pub fn write_timeout(&self) -> Duration {
        Duration::from_millis(self.jobs.write_timeout_ms)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.retry.max_retries,
            self.retry.initial_backoff_ms,
            self.retry.max_backoff_ms,
        )
    }
}

fn parse_var<T>(name: &str, value: &str) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    value
        .trim()
        .parse()
        .with_context(|| format!("invalid value for {ENV_PREFIX}{name}: {value:?}"))
}
