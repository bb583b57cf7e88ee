// Temporary credential fetching from the authentication endpoint

use chrono::Utc;
use std::time::Duration;
use url::Url;

use super::netrc::LocalCredentialSource;
use super::refreshable::{AsyncCredentialRefresher, CredentialRefresher};
use super::types::{normalize, CredentialRecord, RawApiCredentialResponse};
use crate::error::{CredentialError, Result};

/// Everything a fetcher needs to reach the endpoint
#[derive(Debug, Clone)]
pub struct FetcherConfig {
    pub endpoint: Url,
    pub source: LocalCredentialSource,
    pub connect_timeout: Duration,
    pub request_timeout: Duration,
}

/// Blocking credential fetcher.
///
/// Owns a `reqwest::blocking::Client`, so it must be created and dropped
/// outside of an async runtime.
pub struct CredentialFetcher {
    config: FetcherConfig,
    client: reqwest::blocking::Client,
}

impl CredentialFetcher {
    pub fn new(config: FetcherConfig) -> Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .connect_timeout(config.connect_timeout)
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| CredentialError::Config(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self { config, client })
    }

    pub fn endpoint(&self) -> &Url {
        &self.config.endpoint
    }

    /// Fetch a new set of temporary credentials
    pub fn fetch_credentials(&self) -> Result<CredentialRecord> {
        tracing::info!(
            "Getting new temporary credentials from {}...",
            self.config.endpoint
        );

        let login = self.config.source.lookup()?;

        let response = self
            .client
            .post(self.config.endpoint.clone())
            .basic_auth(&login.username, Some(&login.password))
            .json(&serde_json::json!({}))
            .send()?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().unwrap_or_default();
            return Err(rejected(&self.config.endpoint, status.as_u16(), body));
        }

        let body = response.text()?;
        parse_credentials(&body)
    }
}

impl std::fmt::Debug for CredentialFetcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CredentialFetcher")
            .field("endpoint", &self.config.endpoint.as_str())
            .finish()
    }
}

impl CredentialRefresher for CredentialFetcher {
    fn refresh(&self) -> Result<CredentialRecord> {
        self.fetch_credentials()
    }
}

/// Non-blocking credential fetcher, same semantics as [`CredentialFetcher`]
#[derive(Clone)]
pub struct AsyncCredentialFetcher {
    config: FetcherConfig,
    client: reqwest::Client,
}

impl AsyncCredentialFetcher {
    pub fn new(config: FetcherConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(config.connect_timeout)
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| CredentialError::Config(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self { config, client })
    }

    pub fn endpoint(&self) -> &Url {
        &self.config.endpoint
    }

    /// Fetch a new set of temporary credentials
    pub async fn fetch_credentials(&self) -> Result<CredentialRecord> {
        tracing::info!(
            "Getting new temporary credentials from {}...",
            self.config.endpoint
        );

        // Netrc reads are file I/O; keep them off the executor threads
        let source = self.config.source.clone();
        let login = tokio::task::spawn_blocking(move || source.lookup())
            .await
            .map_err(|e| {
                CredentialError::CredentialSource(format!("netrc lookup task failed: {}", e))
            })??;

        let response = self
            .client
            .post(self.config.endpoint.clone())
            .basic_auth(&login.username, Some(&login.password))
            .json(&serde_json::json!({}))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(rejected(&self.config.endpoint, status.as_u16(), body));
        }

        let body = response.text().await?;
        parse_credentials(&body)
    }
}

impl std::fmt::Debug for AsyncCredentialFetcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AsyncCredentialFetcher")
            .field("endpoint", &self.config.endpoint.as_str())
            .finish()
    }
}

#[async_trait::async_trait]
impl AsyncCredentialRefresher for AsyncCredentialFetcher {
    async fn refresh(&self) -> Result<CredentialRecord> {
        self.fetch_credentials().await
    }
}

fn rejected(endpoint: &Url, status: u16, body: String) -> CredentialError {
    tracing::error!(
        status = status,
        url = %endpoint,
        response_body = %body,
        "Credential endpoint rejected the request"
    );
    CredentialError::Authentication { status, body }
}

/// Decode and normalize a successful response body
fn parse_credentials(body: &str) -> Result<CredentialRecord> {
    let raw: RawApiCredentialResponse = serde_json::from_str(body).map_err(|e| {
        CredentialError::MalformedCredential(format!("invalid credential response: {}", e))
    })?;

    let record = normalize(raw)?;
    record.ensure_not_expired(Utc::now())?;

    tracing::info!(
        "Received temporary credentials, expires: {}",
        record.expiry_time
    );

    Ok(record)
}
