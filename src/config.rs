use clap::{Parser, ValueEnum};
use std::net::SocketAddr;
use std::time::Duration;
use validator::Validate;

use crate::error::ConfigError;

pub const DEFAULT_PORT: u16 = 3000;
pub const DEFAULT_MAX_CHARS: usize = 5000;
pub const DEFAULT_MAX_BODY_BYTES: usize = 200_000;
pub const DEFAULT_RATE_LIMIT_PER_MINUTE: usize = 60;
pub const DEFAULT_RATE_LIMIT_PER_DAY: usize = 1000;
pub const DEFAULT_MAX_CONCURRENT_STREAMS: usize = 3;
pub const DEFAULT_HEARTBEAT_MS: u64 = 20_000;
pub const DEFAULT_CACHE_TTL_MS: u64 = 60_000;
pub const DEFAULT_GEMINI_MODEL: &str = "gemini-2.0-flash";
pub const DEFAULT_GEMINI_BASE_URL: &str = "https://generativelanguage.googleapis.com";

/// Which correction backend serves requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ModelBackend {
    Mock,
    Local,
    Prompt,
    Gemini,
}

#[derive(Debug, Clone, Parser, Validate)]
#[command(name = "gec-gateway", version, about = "Text-correction API gateway")]
pub struct Config {
    /// Interface to bind
    #[arg(long, env = "HOST", default_value = "0.0.0.0")]
    pub host: String,

    /// Port to listen on
    #[arg(long, env = "PORT", default_value_t = DEFAULT_PORT)]
    pub port: u16,

    /// Service name reported by /version
    #[arg(long, env = "SERVICE_NAME", default_value = "tatar-gec")]
    pub service_name: String,

    /// Service version reported by /version
    #[arg(long, env = "VERSION", default_value = env!("CARGO_PKG_VERSION"))]
    pub service_version: String,

    /// Build identifier reported by /version
    #[arg(long, env = "GIT_SHA", default_value = "dev")]
    pub git_sha: String,

    /// Maximum number of characters accepted in `text`
    #[arg(long, env = "MAX_CHARS", default_value_t = DEFAULT_MAX_CHARS)]
    #[validate(range(min = 1))]
    pub max_chars: usize,

    /// Maximum request body size in bytes
    #[arg(long, env = "MAX_BODY_BYTES", default_value_t = DEFAULT_MAX_BODY_BYTES)]
    #[validate(range(min = 1))]
    pub max_body_bytes: usize,

    /// Requests admitted per client in any 60 second window
    #[arg(long, env = "RATE_LIMIT_PER_MINUTE", default_value_t = DEFAULT_RATE_LIMIT_PER_MINUTE)]
    #[validate(range(min = 1))]
    pub rate_limit_per_minute: usize,

    /// Requests admitted per client in any 24 hour window
    #[arg(long, env = "RATE_LIMIT_PER_DAY", default_value_t = DEFAULT_RATE_LIMIT_PER_DAY)]
    #[validate(range(min = 1))]
    pub rate_limit_per_day: usize,

    /// Open streams allowed per client
    #[arg(long, env = "MAX_CONCURRENT_STREAMS", default_value_t = DEFAULT_MAX_CONCURRENT_STREAMS)]
    #[validate(range(min = 1))]
    pub max_concurrent_streams: usize,

    /// Idle interval after which a stream emits a heartbeat comment
    #[arg(long, env = "HEARTBEAT_MS", default_value_t = DEFAULT_HEARTBEAT_MS)]
    #[validate(range(min = 1))]
    pub heartbeat_ms: u64,

    /// Correction backend
    #[arg(long, env = "MODEL_BACKEND", value_enum, ignore_case = true, default_value = "mock")]
    pub model_backend: ModelBackend,

    /// Template version tag used by the prompt backend
    #[arg(long, env = "PROMPT_VERSION", default_value = "v1")]
    pub prompt_version: String,

    /// Lifetime of cached corrections
    #[arg(long, env = "CACHE_TTL_MS", default_value_t = DEFAULT_CACHE_TTL_MS)]
    #[validate(range(min = 1))]
    pub cache_ttl_ms: u64,

    /// Comma-separated upstream API keys for the gemini backend
    #[arg(long, env = "GEMINI_API_KEYS", value_delimiter = ',', hide_env_values = true)]
    pub gemini_api_keys: Vec<String>,

    /// Upstream model name
    #[arg(long, env = "GEMINI_MODEL", default_value = DEFAULT_GEMINI_MODEL)]
    pub gemini_model: String,

    /// Upstream API base URL
    #[arg(long, env = "GEMINI_BASE_URL", default_value = DEFAULT_GEMINI_BASE_URL)]
    pub gemini_base_url: String,

    /// Log level for this crate when RUST_LOG is unset
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    pub log_level: String,
}

/// Request ceilings enforced by the HTTP handlers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Limits {
    pub max_chars: usize,
    pub max_body_bytes: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: DEFAULT_PORT,
            service_name: "tatar-gec".to_string(),
            service_version: env!("CARGO_PKG_VERSION").to_string(),
            git_sha: "dev".to_string(),
            max_chars: DEFAULT_MAX_CHARS,
            max_body_bytes: DEFAULT_MAX_BODY_BYTES,
            rate_limit_per_minute: DEFAULT_RATE_LIMIT_PER_MINUTE,
            rate_limit_per_day: DEFAULT_RATE_LIMIT_PER_DAY,
            max_concurrent_streams: DEFAULT_MAX_CONCURRENT_STREAMS,
            heartbeat_ms: DEFAULT_HEARTBEAT_MS,
            model_backend: ModelBackend::Mock,
            prompt_version: "v1".to_string(),
            cache_ttl_ms: DEFAULT_CACHE_TTL_MS,
            gemini_api_keys: Vec::new(),
            gemini_model: DEFAULT_GEMINI_MODEL.to_string(),
            gemini_base_url: DEFAULT_GEMINI_BASE_URL.to_string(),
            log_level: "info".to_string(),
        }
    }
}

impl Config {
    /// Load configuration from command-line arguments and environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        let config = Config::try_parse().map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.check()?;
        Ok(config)
    }

    /// Run field validation
    pub fn check(&self) -> Result<(), ConfigError> {
        self.validate()
            .map_err(|e| ConfigError::Invalid(e.to_string()))
    }

    pub fn bind_addr(&self) -> Result<SocketAddr, ConfigError> {
        format!("{}:{}", self.host, self.port)
            .parse()
            .map_err(|_| ConfigError::Invalid(format!("bad bind address {}:{}", self.host, self.port)))
    }

    pub fn limits(&self) -> Limits {
        Limits {
            max_chars: self.max_chars,
            max_body_bytes: self.max_body_bytes,
        }
    }

    pub fn heartbeat(&self) -> Duration {
        Duration::from_millis(self.heartbeat_ms)
    }

    pub fn cache_ttl(&self) -> Duration {
        Duration::from_millis(self.cache_ttl_ms)
    }

    /// Configured upstream keys with surrounding whitespace and blanks removed
    pub fn api_keys(&self) -> Vec<String> {
        self.gemini_api_keys
            .iter()
            .map(|key| key.trim())
            .filter(|key| !key.is_empty())
            .map(str::to_string)
            .collect()
    }
}
