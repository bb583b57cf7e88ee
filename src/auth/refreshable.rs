// Refreshable credential holders
// Track expiry and re-fetch on demand when past the refresh thresholds

use chrono::{DateTime, Utc};
use std::sync::{Arc, Mutex, PoisonError, RwLock, TryLockError};

use super::types::{CredentialRecord, FreshnessState, FrozenCredentials, RefreshPolicy};
use crate::error::{CredentialError, Result};

/// Source of "now", injectable for tests
pub type Clock = Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>;

fn system_clock() -> Clock {
    Arc::new(Utc::now)
}

/// Produces a new credential record, blocking the calling thread
pub trait CredentialRefresher: Send + Sync {
    fn refresh(&self) -> Result<CredentialRecord>;
}

impl<F> CredentialRefresher for F
where
    F: Fn() -> Result<CredentialRecord> + Send + Sync,
{
    fn refresh(&self) -> Result<CredentialRecord> {
        self()
    }
}

/// Produces a new credential record without blocking the executor
#[async_trait::async_trait]
pub trait AsyncCredentialRefresher: Send + Sync {
    async fn refresh(&self) -> Result<CredentialRecord>;
}

/// Refresh outcome bookkeeping, readable by callers
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RefreshHealth {
    pub last_success_at: Option<DateTime<Utc>>,
    pub last_failure_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub consecutive_failures: u32,
    pub refresh_count: u64,
}

impl RefreshHealth {
    /// True while the most recent refresh attempt failed
    pub fn is_degraded(&self) -> bool {
        self.consecutive_failures > 0
    }

    fn record_success(&mut self, now: DateTime<Utc>) {
        self.last_success_at = Some(now);
        self.consecutive_failures = 0;
        self.refresh_count += 1;
    }

    fn record_failure(&mut self, now: DateTime<Utc>, err: &CredentialError) {
        self.last_failure_at = Some(now);
        self.last_error = Some(err.to_string());
        self.consecutive_failures += 1;
    }
}

/// Record plus its parsed expiry and refresh history
#[derive(Debug)]
struct CredentialState {
    record: CredentialRecord,
    expiry: DateTime<Utc>,
    health: RefreshHealth,
}

impl CredentialState {
    fn new(record: CredentialRecord) -> Result<Self> {
        let expiry = record.expiry()?;
        Ok(Self {
            record,
            expiry,
            health: RefreshHealth::default(),
        })
    }

    fn frozen(&self) -> FrozenCredentials {
        FrozenCredentials {
            access_key: self.record.access_key.clone(),
            secret_key: self.record.secret_key.clone(),
            token: self.record.token.clone(),
            expiry: self.expiry,
        }
    }

    /// Store the outcome of a refresh attempt.
    ///
    /// Failures are returned only when `is_mandatory`; advisory failures are
    /// logged and the current record stays in place.
    fn apply(
        &mut self,
        result: Result<CredentialRecord>,
        now: DateTime<Utc>,
        policy: &RefreshPolicy,
        is_mandatory: bool,
        method: &str,
    ) -> Result<()> {
        let refreshed = result.and_then(|record| {
            let expiry = record.expiry()?;
            Ok((record, expiry))
        });

        match refreshed {
            Ok((record, expiry)) => {
                tracing::info!(
                    "Credentials refreshed ({}), expires: {}",
                    method,
                    record.expiry_time
                );
                let expiry_time = record.expiry_time.clone();
                self.record = record;
                self.expiry = expiry;
                self.health.record_success(now);

                if policy.state_at(expiry, now) == FreshnessState::StaleMandatory {
                    if is_mandatory {
                        tracing::error!(
                            "Refreshed credentials are still inside the mandatory window (expiry: {})",
                            expiry_time
                        );
                        return Err(CredentialError::ExpiredAfterRefresh { expiry_time });
                    }
                    tracing::warn!(
                        "Refreshed credentials are still inside the mandatory window (expiry: {})",
                        expiry_time
                    );
                }
                Ok(())
            }
            Err(e) => {
                self.health.record_failure(now, &e);
                if is_mandatory {
                    tracing::error!("Mandatory credential refresh failed ({}): {}", method, e);
                    Err(e)
                } else {
                    tracing::warn!(
                        "Advisory credential refresh failed ({}), reusing current credentials: {}",
                        method,
                        e
                    );
                    Ok(())
                }
            }
        }
    }
}

/// Refreshable credentials for blocking callers.
///
/// Advisory refreshes are skipped when another thread is already refreshing;
/// mandatory refreshes wait for it and re-check freshness before fetching.
pub struct RefreshableCredentials {
    state: RwLock<CredentialState>,
    refresh_lock: Mutex<()>,
    refresher: Box<dyn CredentialRefresher>,
    policy: RefreshPolicy,
    method: &'static str,
    clock: Clock,
}

impl RefreshableCredentials {
    /// Seed with an already-fetched record
    pub fn create_from_metadata(
        metadata: CredentialRecord,
        refresher: impl CredentialRefresher + 'static,
        policy: RefreshPolicy,
        method: &'static str,
    ) -> Result<Self> {
        Ok(Self {
            state: RwLock::new(CredentialState::new(metadata)?),
            refresh_lock: Mutex::new(()),
            refresher: Box::new(refresher),
            policy,
            method,
            clock: system_clock(),
        })
    }

    /// Replace the clock used for freshness checks
    pub fn with_clock(mut self, clock: Clock) -> Self {
        self.clock = clock;
        self
    }

    pub fn policy(&self) -> RefreshPolicy {
        self.policy
    }

    pub fn method(&self) -> &'static str {
        self.method
    }

    /// Current record, without any refresh
    pub fn current(&self) -> CredentialRecord {
        self.read_state().record.clone()
    }

    pub fn freshness(&self) -> FreshnessState {
        let expiry = self.read_state().expiry;
        self.policy.state_at(expiry, (self.clock)())
    }

    pub fn refresh_health(&self) -> RefreshHealth {
        self.read_state().health.clone()
    }

    /// Credentials for a signing operation, refreshing first if stale
    pub fn get_frozen_credentials(&self) -> Result<FrozenCredentials> {
        self.refresh_if_needed()?;
        Ok(self.read_state().frozen())
    }

    /// Refresh regardless of freshness; failures propagate
    pub fn force_refresh(&self) -> Result<()> {
        let _guard = self
            .refresh_lock
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        self.protected_refresh(true)
    }

    fn refresh_if_needed(&self) -> Result<()> {
        let _guard = match self.freshness() {
            FreshnessState::Fresh => return Ok(()),
            FreshnessState::StaleAdvisory => match self.refresh_lock.try_lock() {
                Ok(guard) => guard,
                Err(TryLockError::Poisoned(poisoned)) => poisoned.into_inner(),
                Err(TryLockError::WouldBlock) => {
                    tracing::debug!("Refresh already in progress, using current credentials");
                    return Ok(());
                }
            },
            FreshnessState::StaleMandatory => self
                .refresh_lock
                .lock()
                .unwrap_or_else(PoisonError::into_inner),
        };

        // Another thread may have refreshed while we waited
        match self.freshness() {
            FreshnessState::Fresh => Ok(()),
            FreshnessState::StaleAdvisory => self.protected_refresh(false),
            FreshnessState::StaleMandatory => self.protected_refresh(true),
        }
    }

    fn protected_refresh(&self, is_mandatory: bool) -> Result<()> {
        tracing::debug!(
            "Refreshing credentials ({}, mandatory: {})",
            self.method,
            is_mandatory
        );
        // No state lock is held across the network call
        let result = self.refresher.refresh();
        let now = (self.clock)();

        self.state
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .apply(result, now, &self.policy, is_mandatory, self.method)
    }

    fn read_state(&self) -> std::sync::RwLockReadGuard<'_, CredentialState> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }
}

impl std::fmt::Debug for RefreshableCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RefreshableCredentials")
            .field("method", &self.method)
            .field("policy", &self.policy)
            .field("expiry", &self.read_state().expiry)
            .finish()
    }
}

/// Refreshable credentials for async callers.
///
/// Same state machine as [`RefreshableCredentials`]; waiting on a refresh
/// suspends the task instead of blocking the thread.
pub struct AsyncRefreshableCredentials {
    state: tokio::sync::RwLock<CredentialState>,
    refresh_lock: tokio::sync::Mutex<()>,
    refresher: Box<dyn AsyncCredentialRefresher>,
    policy: RefreshPolicy,
    method: &'static str,
    clock: Clock,
}

impl AsyncRefreshableCredentials {
    /// Seed with an already-fetched record
    pub fn create_from_metadata(
        metadata: CredentialRecord,
        refresher: impl AsyncCredentialRefresher + 'static,
        policy: RefreshPolicy,
        method: &'static str,
    ) -> Result<Self> {
        Ok(Self {
            state: tokio::sync::RwLock::new(CredentialState::new(metadata)?),
            refresh_lock: tokio::sync::Mutex::new(()),
            refresher: Box::new(refresher),
            policy,
            method,
            clock: system_clock(),
        })
    }

    /// Replace the clock used for freshness checks
    pub fn with_clock(mut self, clock: Clock) -> Self {
        self.clock = clock;
        self
    }

    pub fn policy(&self) -> RefreshPolicy {
        self.policy
    }

    pub fn method(&self) -> &'static str {
        self.method
    }

    /// Current record, without any refresh
    pub async fn current(&self) -> CredentialRecord {
        self.state.read().await.record.clone()
    }

    pub async fn freshness(&self) -> FreshnessState {
        let expiry = self.state.read().await.expiry;
        self.policy.state_at(expiry, (self.clock)())
    }

    pub async fn refresh_health(&self) -> RefreshHealth {
        self.state.read().await.health.clone()
    }

    /// Credentials for a signing operation, refreshing first if stale
    pub async fn get_frozen_credentials(&self) -> Result<FrozenCredentials> {
        self.refresh_if_needed().await?;
        Ok(self.state.read().await.frozen())
    }

    /// Refresh regardless of freshness; failures propagate
    pub async fn force_refresh(&self) -> Result<()> {
        let _guard = self.refresh_lock.lock().await;
        self.protected_refresh(true).await
    }

    async fn refresh_if_needed(&self) -> Result<()> {
        let _guard = match self.freshness().await {
            FreshnessState::Fresh => return Ok(()),
            FreshnessState::StaleAdvisory => match self.refresh_lock.try_lock() {
                Ok(guard) => guard,
                Err(_) => {
                    tracing::debug!("Refresh already in progress, using current credentials");
                    return Ok(());
                }
            },
            FreshnessState::StaleMandatory => self.refresh_lock.lock().await,
        };

        // Another task may have refreshed while we waited
        match self.freshness().await {
            FreshnessState::Fresh => Ok(()),
            FreshnessState::StaleAdvisory => self.protected_refresh(false).await,
            FreshnessState::StaleMandatory => self.protected_refresh(true).await,
        }
    }

    async fn protected_refresh(&self, is_mandatory: bool) -> Result<()> {
        tracing::debug!(
            "Refreshing credentials ({}, mandatory: {})",
            self.method,
            is_mandatory
        );
        let result = self.refresher.refresh().await;
        let now = (self.clock)();

        self.state
            .write()
            .await
            .apply(result, now, &self.policy, is_mandatory, self.method)
    }
}

impl std::fmt::Debug for AsyncRefreshableCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AsyncRefreshableCredentials")
            .field("method", &self.method)
            .field("policy", &self.policy)
            .finish()
    }
}
