// Credential types and normalization

use chrono::{DateTime, Duration, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{CredentialError, Result};

/// Advisory refresh threshold: 59 minutes before expiry
pub const ADVISORY_REFRESH_TIMEOUT: u64 = 59 * 60;

/// Mandatory refresh threshold: 58 minutes before expiry
pub const MANDATORY_REFRESH_TIMEOUT: u64 = 58 * 60;

/// Largest accepted refresh threshold: one day
pub const MAX_REFRESH_TIMEOUT: u64 = 24 * 60 * 60;

/// Canonical credential record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CredentialRecord {
    pub access_key: String,
    pub secret_key: String,
    pub token: String,
    /// ISO-8601 timestamp with offset, kept exactly as the endpoint sent it
    pub expiry_time: String,
}

impl CredentialRecord {
    /// Parsed expiry instant
    pub fn expiry(&self) -> Result<DateTime<Utc>> {
        parse_datetime(&self.expiry_time)
    }

    /// Snapshot handed to a signing operation
    pub fn freeze(&self) -> Result<FrozenCredentials> {
        Ok(FrozenCredentials {
            access_key: self.access_key.clone(),
            secret_key: self.secret_key.clone(),
            token: self.token.clone(),
            expiry: self.expiry()?,
        })
    }

    /// Ensure the record has not already expired at `now`
    pub fn ensure_not_expired(&self, now: DateTime<Utc>) -> Result<()> {
        let expiry = self.expiry()?;
        if expiry <= now {
            return Err(CredentialError::MalformedCredential(format!(
                "expiration {} is not in the future",
                self.expiry_time
            )));
        }
        Ok(())
    }
}

/// Credential response as returned by the authentication endpoint.
///
/// Every field is optional here so that an incomplete payload surfaces as
/// [`CredentialError::MalformedCredential`] from [`normalize`] rather than as a
/// decode error.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawApiCredentialResponse {
    pub access_key_id: Option<String>,
    pub secret_access_key: Option<String>,
    pub session_token: Option<String>,
    pub expiration: Option<String>,
}

/// Immutable credential snapshot
#[derive(Clone, PartialEq, Eq)]
pub struct FrozenCredentials {
    pub access_key: String,
    pub secret_key: String,
    pub token: String,
    pub expiry: DateTime<Utc>,
}

impl std::fmt::Debug for FrozenCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FrozenCredentials")
            .field("access_key", &self.access_key)
            .field("secret_key", &"** redacted **")
            .field("token", &"** redacted **")
            .field("expiry", &self.expiry)
            .finish()
    }
}

/// Where a credential sits relative to the refresh thresholds
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FreshnessState {
    /// now < expiry - advisory
    Fresh,
    /// expiry - advisory <= now < expiry - mandatory
    StaleAdvisory,
    /// now >= expiry - mandatory
    StaleMandatory,
}

/// Refresh thresholds, in seconds before expiry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RefreshPolicy {
    pub advisory_refresh_timeout: u64,
    pub mandatory_refresh_timeout: u64,
}

impl Default for RefreshPolicy {
    fn default() -> Self {
        Self {
            advisory_refresh_timeout: ADVISORY_REFRESH_TIMEOUT,
            mandatory_refresh_timeout: MANDATORY_REFRESH_TIMEOUT,
        }
    }
}

impl RefreshPolicy {
    pub fn new(advisory_refresh_timeout: u64, mandatory_refresh_timeout: u64) -> Result<Self> {
        if advisory_refresh_timeout > MAX_REFRESH_TIMEOUT {
            return Err(CredentialError::Config(format!(
                "advisory refresh timeout ({}s) must not exceed {}s",
                advisory_refresh_timeout, MAX_REFRESH_TIMEOUT
            )));
        }
        if mandatory_refresh_timeout > advisory_refresh_timeout {
            return Err(CredentialError::Config(format!(
                "mandatory refresh timeout ({}s) must not exceed advisory refresh timeout ({}s)",
                mandatory_refresh_timeout, advisory_refresh_timeout
            )));
        }
        Ok(Self {
            advisory_refresh_timeout,
            mandatory_refresh_timeout,
        })
    }

    /// Classify an expiry against `now`
    pub fn state_at(&self, expiry: DateTime<Utc>, now: DateTime<Utc>) -> FreshnessState {
        let remaining = expiry - now;
        if remaining <= threshold(self.mandatory_refresh_timeout) {
            FreshnessState::StaleMandatory
        } else if remaining <= threshold(self.advisory_refresh_timeout) {
            FreshnessState::StaleAdvisory
        } else {
            FreshnessState::Fresh
        }
    }

    /// Instant at which an expiry enters the advisory window
    pub fn refresh_deadline(&self, expiry: DateTime<Utc>) -> DateTime<Utc> {
        expiry
            .checked_sub_signed(threshold(self.advisory_refresh_timeout))
            .unwrap_or(DateTime::<Utc>::MIN_UTC)
    }
}

// Fields are public, so out-of-range values saturate instead of panicking
fn threshold(secs: u64) -> Duration {
    i64::try_from(secs)
        .ok()
        .and_then(Duration::try_seconds)
        .unwrap_or(Duration::MAX)
}

/// Map the endpoint's field names onto the canonical record.
/// Values are carried over untouched.
pub fn normalize(raw: RawApiCredentialResponse) -> Result<CredentialRecord> {
    let record = CredentialRecord {
        access_key: required(raw.access_key_id, "accessKeyId")?,
        secret_key: required(raw.secret_access_key, "secretAccessKey")?,
        token: required(raw.session_token, "sessionToken")?,
        expiry_time: required(raw.expiration, "expiration")?,
    };

    // Reject unparseable timestamps here so a stored record always has a usable expiry
    record.expiry()?;

    Ok(record)
}

fn required(value: Option<String>, field: &str) -> Result<String> {
    match value {
        Some(v) if !v.is_empty() => Ok(v),
        Some(_) => Err(CredentialError::MalformedCredential(format!(
            "field `{}` is empty",
            field
        ))),
        None => Err(CredentialError::MalformedCredential(format!(
            "missing field `{}`",
            field
        ))),
    }
}

/// Parse datetime from the ISO 8601 variants the endpoint emits
pub(crate) fn parse_datetime(s: &str) -> Result<DateTime<Utc>> {
    // Handle Z suffix
    let normalized = if s.ends_with('Z') {
        s.replace('Z', "+00:00")
    } else {
        s.to_string()
    };

    if let Ok(dt) = DateTime::parse_from_rfc3339(&normalized) {
        return Ok(dt.with_timezone(&Utc));
    }

    // Space separated form, e.g. "2022-07-28 16:55:32+00:00"
    if let Ok(dt) = DateTime::parse_from_str(&normalized, "%Y-%m-%d %H:%M:%S%.f%:z") {
        return Ok(dt.with_timezone(&Utc));
    }

    // No offset at all: treat as UTC
    NaiveDateTime::parse_from_str(&normalized, "%Y-%m-%dT%H:%M:%S%.f")
        .map(|naive| naive.and_utc())
        .map_err(|_| {
            CredentialError::MalformedCredential(format!("unparseable expiration: {}", s))
        })
}
