use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::time::Duration;
use url::Url;

use crate::auth::{
    default_netrc_path, netrc_file_name, FetcherConfig, LocalCredentialSource, RefreshPolicy,
    ADVISORY_REFRESH_TIMEOUT, DEFAULT_AUTH_HOST, MANDATORY_REFRESH_TIMEOUT,
};
use crate::error::CredentialError;

/// Default AWS region for produced sessions
pub const DEFAULT_REGION: &str = "us-west-2";

/// S3 Refresh Session - temporary S3 credentials that refresh themselves
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct CliArgs {
    /// Temporary S3 credentials endpoint
    #[arg(short, long, env = "S3_CREDENTIALS_ENDPOINT")]
    pub endpoint: Option<String>,

    /// AWS region for the session
    #[arg(short, long, env = "AWS_REGION", default_value = DEFAULT_REGION)]
    pub region: String,

    /// Authentication host used as the netrc machine name
    #[arg(long, env = "AUTH_HOST", default_value = DEFAULT_AUTH_HOST)]
    pub auth_host: String,

    /// Path to the netrc file
    #[arg(long, env = "NETRC")]
    pub netrc_file: Option<String>,

    /// HTTP request timeout in seconds
    #[arg(long, env = "HTTP_REQUEST_TIMEOUT", default_value = "60")]
    pub http_timeout: u64,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    pub log_level: String,

    /// Session flavour to build (blocking, async)
    #[arg(long, env = "SESSION_MODE", default_value = "blocking")]
    pub mode: String,
}

#[derive(Clone, Debug)]
pub struct Config {
    // Credentials endpoint
    pub endpoint: Url,
    pub region: String,

    // Local login source
    pub auth_host: String,
    pub netrc_file: PathBuf,

    // HTTP client
    pub http_connect_timeout: u64,
    pub http_request_timeout: u64,

    // Refresh thresholds, seconds before expiry
    pub advisory_refresh_timeout: u64,
    pub mandatory_refresh_timeout: u64,

    pub log_level: String,
    pub session_mode: SessionMode,
}

#[derive(Clone, Debug, PartialEq)]
pub enum SessionMode {
    Blocking,
    Async,
}

impl Config {
    /// Library defaults for an endpoint
    pub fn new(endpoint: &str) -> Result<Self, CredentialError> {
        Ok(Config {
            endpoint: parse_endpoint(endpoint)?,
            region: DEFAULT_REGION.to_string(),
            auth_host: DEFAULT_AUTH_HOST.to_string(),
            netrc_file: default_netrc_path().unwrap_or_else(|| PathBuf::from(netrc_file_name())),
            http_connect_timeout: 30,
            http_request_timeout: 60,
            advisory_refresh_timeout: ADVISORY_REFRESH_TIMEOUT,
            mandatory_refresh_timeout: MANDATORY_REFRESH_TIMEOUT,
            log_level: "info".to_string(),
            session_mode: SessionMode::Blocking,
        })
    }

    pub fn with_region(mut self, region: &str) -> Self {
        self.region = region.to_string();
        self
    }

    pub fn with_netrc_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.netrc_file = path.into();
        self
    }

    pub fn with_auth_host(mut self, host: &str) -> Self {
        self.auth_host = host.to_string();
        self
    }

    /// Load configuration from all sources with priority: CLI > ENV > defaults
    pub fn load() -> Result<Self> {
        // Load .env file if it exists
        dotenvy::dotenv().ok();

        Self::from_args(CliArgs::parse())
    }

    /// Build configuration from parsed CLI arguments plus env-only settings
    pub fn from_args(args: CliArgs) -> Result<Self> {
        let endpoint = args.endpoint.context(
            "S3_CREDENTIALS_ENDPOINT is required (use -e or set S3_CREDENTIALS_ENDPOINT env var)",
        )?;

        let config = Config {
            endpoint: parse_endpoint(&endpoint)?,
            region: args.region,

            auth_host: args.auth_host,
            netrc_file: match args.netrc_file {
                Some(path) => expand_tilde(&path),
                None => default_netrc_path()
                    .context("Could not determine home directory for the netrc file")?,
            },

            http_connect_timeout: env_u64("HTTP_CONNECT_TIMEOUT").unwrap_or(30),
            http_request_timeout: args.http_timeout,

            advisory_refresh_timeout: env_u64("ADVISORY_REFRESH_TIMEOUT")
                .unwrap_or(ADVISORY_REFRESH_TIMEOUT),
            mandatory_refresh_timeout: env_u64("MANDATORY_REFRESH_TIMEOUT")
                .unwrap_or(MANDATORY_REFRESH_TIMEOUT),

            log_level: args.log_level,
            session_mode: parse_session_mode(&args.mode),
        };

        Ok(config)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), CredentialError> {
        self.refresh_policy()?;

        if self.region.is_empty() {
            return Err(CredentialError::Config("region must not be empty".to_string()));
        }
        if self.http_request_timeout == 0 {
            return Err(CredentialError::Config(
                "HTTP request timeout must be greater than zero".to_string(),
            ));
        }

        Ok(())
    }

    pub fn refresh_policy(&self) -> Result<RefreshPolicy, CredentialError> {
        RefreshPolicy::new(self.advisory_refresh_timeout, self.mandatory_refresh_timeout)
    }

    pub fn credential_source(&self) -> LocalCredentialSource {
        LocalCredentialSource::new(&self.netrc_file, &self.auth_host)
    }

    pub fn fetcher_config(&self) -> FetcherConfig {
        FetcherConfig {
            endpoint: self.endpoint.clone(),
            source: self.credential_source(),
            connect_timeout: Duration::from_secs(self.http_connect_timeout),
            request_timeout: Duration::from_secs(self.http_request_timeout),
        }
    }
}

/// Parse and check the credentials endpoint URL
fn parse_endpoint(s: &str) -> Result<Url, CredentialError> {
    let url = Url::parse(s)
        .map_err(|e| CredentialError::Config(format!("invalid endpoint {}: {}", s, e)))?;

    match url.scheme() {
        "http" | "https" => Ok(url),
        scheme => Err(CredentialError::Config(format!(
            "unsupported endpoint scheme: {}",
            scheme
        ))),
    }
}

fn env_u64(name: &str) -> Option<u64> {
    std::env::var(name).ok().and_then(|s| s.parse().ok())
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

/// Parse session mode from string
fn parse_session_mode(s: &str) -> SessionMode {
    match s.to_lowercase().as_str() {
        "async" => SessionMode::Async,
        _ => SessionMode::Blocking,
    }
}
