// Refreshable sessions
// Bind a credential fetcher into refreshable credentials and hand out sessions

use aws_credential_types::provider::{self, error::CredentialsError, future, ProvideCredentials};
use std::sync::Arc;
use std::time::SystemTime;

use crate::auth::{
    AsyncCredentialFetcher, AsyncRefreshableCredentials, CredentialFetcher, CredentialRecord,
    FreshnessState, FrozenCredentials, RefreshHealth, RefreshableCredentials,
};
use crate::config::Config;
use crate::error::{CredentialError, Result};

pub use crate::config::DEFAULT_REGION;

const BLOCKING_METHOD: &str = "blocking_refreshable_credentials";
const ASYNC_METHOD: &str = "async_refreshable_credentials";

/// Session for blocking storage clients
#[derive(Debug, Clone)]
pub struct Session {
    credentials: Arc<RefreshableCredentials>,
    region: String,
}

impl Session {
    pub fn new(credentials: RefreshableCredentials, region: &str) -> Self {
        Self {
            credentials: Arc::new(credentials),
            region: region.to_string(),
        }
    }

    pub fn region(&self) -> &str {
        &self.region
    }

    /// Credentials for signing a request; refreshes first when stale
    pub fn credentials(&self) -> Result<FrozenCredentials> {
        self.credentials.get_frozen_credentials()
    }

    pub fn refreshable_credentials(&self) -> &Arc<RefreshableCredentials> {
        &self.credentials
    }

    /// Current record without triggering a refresh
    pub fn credential_record(&self) -> CredentialRecord {
        self.credentials.current()
    }

    pub fn freshness(&self) -> FreshnessState {
        self.credentials.freshness()
    }

    /// Outcome of past refresh attempts, including swallowed advisory failures
    pub fn refresh_health(&self) -> RefreshHealth {
        self.credentials.refresh_health()
    }
}

/// Session for async storage clients
#[derive(Debug, Clone)]
pub struct AsyncSession {
    credentials: Arc<AsyncRefreshableCredentials>,
    region: String,
}

impl AsyncSession {
    pub fn new(credentials: AsyncRefreshableCredentials, region: &str) -> Self {
        Self {
            credentials: Arc::new(credentials),
            region: region.to_string(),
        }
    }

    /// Build from inside a running runtime, seeding with the async fetcher
    pub async fn connect(config: &Config) -> Result<Self> {
        config.validate()?;

        let fetcher = AsyncCredentialFetcher::new(config.fetcher_config())?;
        let seed = fetcher.fetch_credentials().await?;
        let credentials = AsyncRefreshableCredentials::create_from_metadata(
            seed,
            fetcher,
            config.refresh_policy()?,
            ASYNC_METHOD,
        )?;

        tracing::info!("Async refreshable session ready (region: {})", config.region);
        Ok(Self::new(credentials, &config.region))
    }

    pub fn region(&self) -> &str {
        &self.region
    }

    /// Credentials for signing a request; refreshes first when stale
    pub async fn credentials(&self) -> Result<FrozenCredentials> {
        self.credentials.get_frozen_credentials().await
    }

    pub fn refreshable_credentials(&self) -> &Arc<AsyncRefreshableCredentials> {
        &self.credentials
    }

    /// Current record without triggering a refresh
    pub async fn credential_record(&self) -> CredentialRecord {
        self.credentials.current().await
    }

    pub async fn freshness(&self) -> FreshnessState {
        self.credentials.freshness().await
    }

    /// Outcome of past refresh attempts, including swallowed advisory failures
    pub async fn refresh_health(&self) -> RefreshHealth {
        self.credentials.refresh_health().await
    }

    /// Credentials provider for AWS SDK clients
    pub fn credentials_provider(&self) -> SessionCredentialsProvider {
        SessionCredentialsProvider {
            credentials: self.credentials.clone(),
        }
    }
}

/// [`ProvideCredentials`] backed by an [`AsyncSession`]
#[derive(Debug, Clone)]
pub struct SessionCredentialsProvider {
    credentials: Arc<AsyncRefreshableCredentials>,
}

impl SessionCredentialsProvider {
    async fn load_credentials(&self) -> provider::Result {
        let frozen = self
            .credentials
            .get_frozen_credentials()
            .await
            .map_err(CredentialsError::provider_error)?;

        // The SDK caches until the reported expiry, so report the point where
        // the advisory window opens and let the refresh policy decide from there
        let refresh_at = self.credentials.policy().refresh_deadline(frozen.expiry);

        Ok(aws_credential_types::Credentials::new(
            frozen.access_key,
            frozen.secret_key,
            Some(frozen.token),
            Some(SystemTime::from(refresh_at)),
            "S3RefreshSession",
        ))
    }
}

impl ProvideCredentials for SessionCredentialsProvider {
    fn provide_credentials<'a>(&'a self) -> future::ProvideCredentials<'a>
    where
        Self: 'a,
    {
        future::ProvideCredentials::new(self.load_credentials())
    }
}

/// Build a blocking session against `endpoint` with default settings
pub fn build_blocking_session(endpoint: &str, region: &str) -> Result<Session> {
    let config = Config::new(endpoint)?.with_region(region);
    build_blocking_session_with(&config)
}

/// Build a blocking session from a full configuration.
///
/// Any failure during the seed fetch aborts construction.
pub fn build_blocking_session_with(config: &Config) -> Result<Session> {
    ensure_outside_runtime("build_blocking_session", "build it before starting the runtime")?;
    config.validate()?;

    let fetcher = CredentialFetcher::new(config.fetcher_config())?;
    let seed = fetcher.fetch_credentials()?;
    let credentials = RefreshableCredentials::create_from_metadata(
        seed,
        fetcher,
        config.refresh_policy()?,
        BLOCKING_METHOD,
    )?;

    tracing::info!("Blocking refreshable session ready (region: {})", config.region);
    Ok(Session::new(credentials, &config.region))
}

/// Build an async session against `endpoint` with default settings
pub fn build_async_session(endpoint: &str, region: &str) -> Result<AsyncSession> {
    let config = Config::new(endpoint)?.with_region(region);
    build_async_session_with(&config)
}

/// Build an async session from a full configuration.
///
/// The seed fetch blocks once, so this must be called before entering a
/// runtime. Use [`AsyncSession::connect`] from async code.
pub fn build_async_session_with(config: &Config) -> Result<AsyncSession> {
    ensure_outside_runtime("build_async_session", "use AsyncSession::connect")?;
    config.validate()?;

    let fetcher_config = config.fetcher_config();
    let seed = CredentialFetcher::new(fetcher_config.clone())?.fetch_credentials()?;

    let credentials = AsyncRefreshableCredentials::create_from_metadata(
        seed,
        AsyncCredentialFetcher::new(fetcher_config)?,
        config.refresh_policy()?,
        ASYNC_METHOD,
    )?;

    tracing::info!("Async refreshable session ready (region: {})", config.region);
    Ok(AsyncSession::new(credentials, &config.region))
}

// The blocking HTTP client panics when created or dropped on a runtime thread
fn ensure_outside_runtime(builder: &str, hint: &str) -> Result<()> {
    if tokio::runtime::Handle::try_current().is_ok() {
        return Err(CredentialError::Config(format!(
            "{} blocks on the seed fetch and cannot run inside an async runtime; {}",
            builder, hint
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::RefreshPolicy;
    use chrono::{Duration, Utc};

    fn record(tag: &str, minutes: i64) -> CredentialRecord {
        CredentialRecord {
            access_key: format!("AK-{}", tag),
            secret_key: format!("SK-{}", tag),
            token: format!("TK-{}", tag),
            expiry_time: (Utc::now() + Duration::minutes(minutes)).to_rfc3339(),
        }
    }

    #[test]
    fn test_session_accessors() {
        let credentials = RefreshableCredentials::create_from_metadata(
            record("seed", 120),
            || -> Result<CredentialRecord> { Ok(record("next", 120)) },
            RefreshPolicy::default(),
            "test",
        )
        .unwrap();

        let session = Session::new(credentials, "eu-central-1");
        assert_eq!(session.region(), "eu-central-1");
        assert_eq!(session.freshness(), FreshnessState::Fresh);
        assert_eq!(session.credentials().unwrap().access_key, "AK-seed");
        assert_eq!(session.credential_record().token, "TK-seed");
        assert_eq!(session.refresh_health(), RefreshHealth::default());
    }

    #[test]
    fn test_session_clones_share_credentials() {
        let credentials = RefreshableCredentials::create_from_metadata(
            record("seed", 120),
            || -> Result<CredentialRecord> { Ok(record("next", 120)) },
            RefreshPolicy::default(),
            "test",
        )
        .unwrap();

        let session = Session::new(credentials, DEFAULT_REGION);
        let clone = session.clone();
        session.refreshable_credentials().force_refresh().unwrap();
        assert_eq!(clone.credential_record().access_key, "AK-next");
    }

    #[test]
    fn test_build_blocking_session_rejects_bad_endpoint() {
        let err = build_blocking_session("ftp://example.com", DEFAULT_REGION).unwrap_err();
        assert!(matches!(err, CredentialError::Config(_)));
    }

    #[tokio::test]
    async fn test_build_async_session_inside_runtime_is_rejected() {
        let err = build_async_session("https://example.com/creds", DEFAULT_REGION).unwrap_err();
        assert!(matches!(err, CredentialError::Config(_)));
    }

    #[tokio::test]
    async fn test_build_blocking_session_inside_runtime_is_rejected() {
        let err = build_blocking_session("http://127.0.0.1:1/creds", DEFAULT_REGION).unwrap_err();
        assert!(matches!(err, CredentialError::Config(_)));
    }

    struct StaticRefresher;

    #[async_trait::async_trait]
    impl crate::auth::AsyncCredentialRefresher for StaticRefresher {
        async fn refresh(&self) -> Result<CredentialRecord> {
            Ok(record("next", 120))
        }
    }

    #[tokio::test]
    async fn test_credentials_provider() {
        let credentials = AsyncRefreshableCredentials::create_from_metadata(
            record("seed", 120),
            StaticRefresher,
            RefreshPolicy::default(),
            "test",
        )
        .unwrap();
        let session = AsyncSession::new(credentials, DEFAULT_REGION);

        let provided = session
            .credentials_provider()
            .provide_credentials()
            .await
            .unwrap();
        assert_eq!(provided.access_key_id(), "AK-seed");
        assert_eq!(provided.secret_access_key(), "SK-seed");
        assert_eq!(provided.session_token(), Some("TK-seed"));

        // Reported expiry is where the advisory window opens, not the real expiry
        let frozen = session.credentials().await.unwrap();
        let expected = SystemTime::from(frozen.expiry - Duration::seconds(3540));
        assert_eq!(provided.expiry(), Some(expected));
    }

    #[tokio::test]
    async fn test_credentials_provider_propagates_mandatory_failure() {
        struct Failing;

        #[async_trait::async_trait]
        impl crate::auth::AsyncCredentialRefresher for Failing {
            async fn refresh(&self) -> Result<CredentialRecord> {
                Err(CredentialError::Authentication {
                    status: 401,
                    body: "nope".to_string(),
                })
            }
        }

        let credentials = AsyncRefreshableCredentials::create_from_metadata(
            record("seed", 5),
            Failing,
            RefreshPolicy::default(),
            "test",
        )
        .unwrap();
        let session = AsyncSession::new(credentials, DEFAULT_REGION);

        assert!(session
            .credentials_provider()
            .provide_credentials()
            .await
            .is_err());
    }
}
