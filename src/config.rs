use anyhow::{Context, Result};
use clap::Parser;
use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::auth::{ApiKey, AuthRequest};
use crate::http_client::RetryPolicy;

const DEFAULT_BASE_URL: &str = "https://api.topstepx.com";
const DEFAULT_AUTH_ENDPOINT: &str = "/api/Auth/loginKey";

/// Topstep Session - keeps a valid TopstepX API token alive
#[derive(Parser, Debug, Default)]
#[command(author, version, about, long_about = None)]
pub struct CliArgs {
    /// Optional YAML configuration file
    #[arg(short = 'c', long, env = "CONFIG_FILE")]
    pub config_file: Option<String>,

    /// TopstepX username
    #[arg(short = 'u', long, env = "TOPSTEP_USERNAME")]
    pub username: Option<String>,

    /// TopstepX API key
    #[arg(short = 'k', long, env = "TOPSTEP_API_KEY", hide_env_values = true)]
    pub api_key: Option<String>,

    /// API base URL
    #[arg(long, env = "API_BASE_URL")]
    pub base_url: Option<String>,

    /// Login endpoint path, relative to the base URL
    #[arg(long, env = "AUTH_ENDPOINT")]
    pub auth_endpoint: Option<String>,

    /// Total HTTP attempts per request
    #[arg(long, env = "RETRY_MAX_ATTEMPTS")]
    pub retry_max_attempts: Option<u32>,

    /// Base delay for exponential backoff in milliseconds
    #[arg(long, env = "RETRY_BACKOFF_BASE_MS")]
    pub retry_backoff_base_ms: Option<u64>,

    /// Per-request timeout in milliseconds
    #[arg(long, env = "REQUEST_TIMEOUT_MS")]
    pub request_timeout_ms: Option<u64>,

    /// Minutes before expiry at which a token is refreshed
    #[arg(long, env = "REFRESH_SAFETY_MARGIN_MIN")]
    pub refresh_safety_margin_min: Option<i64>,

    /// Seconds between background refresh checks
    #[arg(long, env = "REFRESH_CHECK_INTERVAL_SECS")]
    pub refresh_check_interval_secs: Option<u64>,

    /// Token lifetime assumed when the server does not declare one
    #[arg(long, env = "DEFAULT_TOKEN_LIFETIME_SECS")]
    pub default_token_lifetime_secs: Option<i64>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL")]
    pub log_level: Option<String>,

    /// Log format (pretty, json)
    #[arg(long, env = "LOG_FORMAT")]
    pub log_format: Option<String>,
}

/// Settings read from the YAML file; every key is optional
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct FileConfig {
    pub api: ApiSection,
    pub auth: AuthSection,
    pub logging: LoggingSection,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct ApiSection {
    pub base_url: Option<String>,
    pub auth_endpoint: Option<String>,
    pub timeout_ms: Option<u64>,
    pub max_retries: Option<u32>,
    pub backoff_base_ms: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct AuthSection {
    pub token_refresh_margin_minutes: Option<i64>,
    pub check_interval_seconds: Option<u64>,
    pub default_token_lifetime_seconds: Option<i64>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct LoggingSection {
    pub level: Option<String>,
    pub format: Option<String>,
}

#[derive(Clone, Debug)]
pub struct Config {
    // Credentials
    pub username: String,
    pub api_key: ApiKey,

    // Remote API
    pub base_url: String,
    pub auth_endpoint: String,

    // HTTP client
    pub retry_max_attempts: u32,
    pub retry_backoff_base_ms: u64,
    pub request_timeout_ms: u64,

    // Session maintenance
    pub refresh_safety_margin_min: i64,
    pub refresh_check_interval_secs: u64,
    pub default_token_lifetime_secs: i64,

    // Logging
    pub log_level: String,
    pub log_format: LogFormat,
}

#[derive(Clone, Debug, PartialEq)]
pub enum LogFormat {
    Pretty,
    Json,
}

impl Config {
    /// Load configuration from all sources with priority: CLI > ENV > file > defaults
    pub fn load() -> Result<Self> {
        // Load .env file if it exists
        dotenvy::dotenv().ok();

        let args = CliArgs::parse();

        let file = match args.config_file.as_deref() {
            Some(path) => load_file(&expand_tilde(path))?,
            None => FileConfig::default(),
        };

        Self::merge(args, file)
    }

    /// Combine parsed arguments (CLI/ENV) with file settings
    pub fn merge(args: CliArgs, file: FileConfig) -> Result<Self> {
        let config = Config {
            username: args
                .username
                .context("TOPSTEP_USERNAME is required (use -u or set TOPSTEP_USERNAME env var)")?,

            api_key: args
                .api_key
                .map(ApiKey::new)
                .context("TOPSTEP_API_KEY is required (use -k or set TOPSTEP_API_KEY env var)")?,

            base_url: args
                .base_url
                .or(file.api.base_url)
                .unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),

            auth_endpoint: args
                .auth_endpoint
                .or(file.api.auth_endpoint)
                .unwrap_or_else(|| DEFAULT_AUTH_ENDPOINT.to_string()),

            retry_max_attempts: args.retry_max_attempts.or(file.api.max_retries).unwrap_or(3),

            retry_backoff_base_ms: args
                .retry_backoff_base_ms
                .or(file.api.backoff_base_ms)
                .unwrap_or(1000),

            request_timeout_ms: args
                .request_timeout_ms
                .or(file.api.timeout_ms)
                .unwrap_or(30_000),

            refresh_safety_margin_min: args
                .refresh_safety_margin_min
                .or(file.auth.token_refresh_margin_minutes)
                .unwrap_or(5),

            refresh_check_interval_secs: args
                .refresh_check_interval_secs
                .or(file.auth.check_interval_seconds)
                .unwrap_or(60),

            default_token_lifetime_secs: args
                .default_token_lifetime_secs
                .or(file.auth.default_token_lifetime_seconds)
                .unwrap_or(3600),

            log_level: args
                .log_level
                .or(file.logging.level)
                .unwrap_or_else(|| "info".to_string()),

            log_format: parse_log_format(
                &args.log_format.or(file.logging.format).unwrap_or_default(),
            ),
        };

        Ok(config)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.username.trim().is_empty() {
            anyhow::bail!("TOPSTEP_USERNAME cannot be empty");
        }
        if self.api_key.is_empty() {
            anyhow::bail!("TOPSTEP_API_KEY cannot be empty");
        }

        let url = reqwest::Url::parse(&self.base_url)
            .with_context(|| format!("Invalid API base URL: {}", self.base_url))?;
        if url.scheme() != "http" && url.scheme() != "https" {
            anyhow::bail!("API base URL must be http(s): {}", self.base_url);
        }

        if self.retry_max_attempts == 0 {
            anyhow::bail!("RETRY_MAX_ATTEMPTS must be at least 1");
        }
        if self.request_timeout_ms == 0 {
            anyhow::bail!("REQUEST_TIMEOUT_MS must be greater than 0");
        }
        if self.refresh_check_interval_secs == 0 {
            anyhow::bail!("REFRESH_CHECK_INTERVAL_SECS must be greater than 0");
        }
        if self.refresh_safety_margin_min < 0 {
            anyhow::bail!("REFRESH_SAFETY_MARGIN_MIN cannot be negative");
        }
        let margin = chrono::Duration::try_minutes(self.refresh_safety_margin_min)
            .with_context(|| {
                format!(
                    "REFRESH_SAFETY_MARGIN_MIN out of range: {}",
                    self.refresh_safety_margin_min
                )
            })?;
        let lifetime = chrono::Duration::try_seconds(self.default_token_lifetime_secs)
            .with_context(|| {
                format!(
                    "DEFAULT_TOKEN_LIFETIME_SECS out of range: {}",
                    self.default_token_lifetime_secs
                )
            })?;
        if lifetime <= margin {
            anyhow::bail!(
                "DEFAULT_TOKEN_LIFETIME_SECS ({}) must exceed the refresh safety margin ({} min)",
                self.default_token_lifetime_secs,
                self.refresh_safety_margin_min
            );
        }

        Ok(())
    }

    /// Full login URL
    pub fn auth_url(&self) -> String {
        format!(
            "{}/{}",
            self.base_url.trim_end_matches('/'),
            self.auth_endpoint.trim_start_matches('/')
        )
    }

    pub fn auth_request(&self) -> AuthRequest {
        AuthRequest {
            username: self.username.clone(),
            api_key: self.api_key.clone(),
        }
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.retry_max_attempts,
            backoff_base: std::time::Duration::from_millis(self.retry_backoff_base_ms),
            request_timeout: std::time::Duration::from_millis(self.request_timeout_ms),
        }
    }

    /// Only meaningful on a config that passed `validate`
    pub fn safety_margin(&self) -> chrono::Duration {
        chrono::Duration::minutes(self.refresh_safety_margin_min)
    }

    pub fn default_token_lifetime(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.default_token_lifetime_secs)
    }

    pub fn check_interval(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.refresh_check_interval_secs)
    }
}

/// Read the YAML configuration file
fn load_file(path: &Path) -> Result<FileConfig> {
    ::config::Config::builder()
        .add_source(::config::File::from(path).format(::config::FileFormat::Yaml))
        .build()
        .with_context(|| format!("Failed to read config file: {}", path.display()))?
        .try_deserialize()
        .with_context(|| format!("Failed to parse config file: {}", path.display()))
}

/// Expand tilde (~) in file paths to user's home directory
fn expand_tilde(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    PathBuf::from(path)
}

/// Parse log format from string
fn parse_log_format(s: &str) -> LogFormat {
    match s.to_lowercase().as_str() {
        "json" => LogFormat::Json,
        _ => LogFormat::Pretty,
    }
}
