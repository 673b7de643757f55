//! Store and pipeline configuration

use std::str::FromStr;
use std::time::Duration;

use crate::error::{VectorError, VectorResult};

pub const ENV_URL: &str = "CHROMA_URL";
pub const ENV_PREFIX: &str = "CHROMA_COLLECTION_PREFIX";
pub const ENV_AUTH_TOKEN: &str = "CHROMA_AUTH_TOKEN";
pub const ENV_DEFAULT_DIM: &str = "TALENT_DEFAULT_DIM";
pub const ENV_EXPORT_BATCH: &str = "TALENT_EXPORT_BATCH";
pub const ENV_IMPORT_BATCH: &str = "TALENT_IMPORT_BATCH";
pub const ENV_IMPORT_SAMPLE: &str = "TALENT_IMPORT_SAMPLE";
pub const ENV_IMPORT_MODE: &str = "TALENT_IMPORT_MODE";
pub const ENV_TIMEOUT_SECS: &str = "TALENT_REQUEST_TIMEOUT_SECS";

/// Share of sampled IDs that must already exist in ratio mode
pub const DEFAULT_SKIP_RATIO: f64 = 0.8;

/// How the import idempotency check decides to skip a file
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum IdempotencyMode {
    /// Skip only when every sampled ID is already stored
    RequireAll,
    /// Skip when at least this share of sampled IDs is stored
    Ratio(f64),
}

impl Default for IdempotencyMode {
    fn default() -> Self {
        Self::RequireAll
    }
}

impl IdempotencyMode {
    /// Decide from `present` of `sampled` IDs found remotely
    pub fn should_skip(self, present: usize, sampled: usize) -> bool {
        if sampled == 0 {
            return true;
        }
        match self {
            Self::RequireAll => present >= sampled,
            Self::Ratio(threshold) => present as f64 / sampled as f64 >= threshold,
        }
    }
}

impl FromStr for IdempotencyMode {
    type Err = VectorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim().to_ascii_lowercase();
        match s.as_str() {
            "all" | "require-all" => Ok(Self::RequireAll),
            "ratio" | "percentage" => Ok(Self::Ratio(DEFAULT_SKIP_RATIO)),
            other => {
                let value = other
                    .strip_prefix("ratio:")
                    .ok_or_else(|| VectorError::Config(format!("unknown import mode '{other}'")))?;
                let threshold: f64 = value
                    .parse()
                    .map_err(|_| VectorError::Config(format!("invalid ratio '{value}'")))?;
                if !(0.0..=1.0).contains(&threshold) {
                    return Err(VectorError::Config(format!(
                        "ratio must be between 0.0 and 1.0, got {threshold}"
                    )));
                }
                Ok(Self::Ratio(threshold))
            }
        }
    }
}

/// Configuration for the vector store client and its bulk pipeline
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Vector index base URL
    pub url: String,
    /// Collection name prefix; collections are `<prefix>_dim<D>`
    pub collection_prefix: String,
    /// Optional auth token sent to the index
    pub auth_token: Option<String>,
    /// Dimension used when a caller does not name one
    pub default_dimension: usize,
    /// Records per export page
    pub export_batch: usize,
    /// Records per import flush
    pub import_batch: usize,
    /// IDs sampled by the import idempotency check
    pub sample_size: usize,
    pub idempotency_mode: IdempotencyMode,
    /// Per-request timeout in seconds
    pub timeout_secs: u64,
    /// `owner` tag written into new collections
    pub owner: String,
    /// `entity` tag written into new collections
    pub entity: String,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            url: "http://localhost:8000".to_string(),
            collection_prefix: "candidates".to_string(),
            auth_token: None,
            default_dimension: 768,
            export_batch: 1000,
            import_batch: 200,
            sample_size: 10,
            idempotency_mode: IdempotencyMode::RequireAll,
            timeout_secs: 30,
            owner: "datathon".to_string(),
            entity: "candidate".to_string(),
        }
    }
}

impl StoreConfig {
    /// Create a configuration for a server and prefix
    pub fn new(url: impl Into<String>, collection_prefix: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            collection_prefix: collection_prefix.into().trim().to_string(),
            ..Default::default()
        }
    }

    /// Read configuration from the process environment
    pub fn from_env() -> VectorResult<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Read configuration through `lookup`, falling back to defaults
    pub fn from_lookup<F>(lookup: F) -> VectorResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(url) = lookup(ENV_URL) {
            config.url = url;
        }
        if let Some(prefix) = lookup(ENV_PREFIX) {
            config.collection_prefix = prefix.trim().to_string();
        }
        config.auth_token = lookup(ENV_AUTH_TOKEN).filter(|t| !t.is_empty());

        if let Some(dim) = parse_var(&lookup, ENV_DEFAULT_DIM)? {
            config.default_dimension = dim;
        }
        if let Some(batch) = parse_var(&lookup, ENV_EXPORT_BATCH)? {
            config.export_batch = batch;
        }
        if let Some(batch) = parse_var(&lookup, ENV_IMPORT_BATCH)? {
            config.import_batch = batch;
        }
        if let Some(sample) = parse_var(&lookup, ENV_IMPORT_SAMPLE)? {
            config.sample_size = sample;
        }
        if let Some(mode) = lookup(ENV_IMPORT_MODE) {
            config.idempotency_mode = mode.parse()?;
        }
        if let Some(secs) = parse_var(&lookup, ENV_TIMEOUT_SECS)? {
            config.timeout_secs = secs;
        }

        config.validate()?;
        Ok(config)
    }

    /// Set collection prefix
    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.collection_prefix = prefix.into().trim().to_string();
        self
    }

    /// Set auth token
    pub fn with_auth_token(mut self, token: impl Into<String>) -> Self {
        self.auth_token = Some(token.into());
        self
    }

    /// Set request timeout
    pub fn with_timeout(mut self, timeout_secs: u64) -> Self {
        self.timeout_secs = timeout_secs;
        self
    }

    pub fn with_export_batch(mut self, batch: usize) -> Self {
        self.export_batch = batch;
        self
    }

    pub fn with_import_batch(mut self, batch: usize) -> Self {
        self.import_batch = batch;
        self
    }

    pub fn with_idempotency(mut self, sample_size: usize, mode: IdempotencyMode) -> Self {
        self.sample_size = sample_size;
        self.idempotency_mode = mode;
        self
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    /// Reject values that would make the client unusable
    pub fn validate(&self) -> VectorResult<()> {
        if self.url.trim().is_empty() {
            return Err(VectorError::Config("index URL cannot be empty".to_string()));
        }
        if self.collection_prefix.is_empty() {
            return Err(VectorError::Config(
                "collection prefix cannot be empty".to_string(),
            ));
        }
        if self.default_dimension == 0 {
            return Err(VectorError::Config(
                "default dimension must be positive".to_string(),
            ));
        }
        if self.export_batch == 0 || self.import_batch == 0 {
            return Err(VectorError::Config(
                "batch sizes must be positive".to_string(),
            ));
        }
        if self.sample_size == 0 {
            return Err(VectorError::Config(
                "import sample size must be positive".to_string(),
            ));
        }
        if self.timeout_secs == 0 {
            return Err(VectorError::Config("timeout must be positive".to_string()));
        }
        Ok(())
    }
}

fn parse_var<F, T>(lookup: &F, key: &str) -> VectorResult<Option<T>>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
{
    match lookup(key) {
        None => Ok(None),
        Some(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| VectorError::Config(format!("{key} has invalid value '{raw}'"))),
    }
}
