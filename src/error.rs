// Error handling module
// Defines the credential error taxonomy shared by every component

use thiserror::Error;

/// Errors that can occur while resolving, fetching or refreshing credentials
#[derive(Error, Debug)]
pub enum CredentialError {
    /// Local netrc secrets are missing or unreadable
    #[error("Credential source error: {0}")]
    CredentialSource(String),

    /// The authentication endpoint rejected the request
    #[error("Authentication failed: {status} - {body}")]
    Authentication { status: u16, body: String },

    /// The endpoint returned an incomplete or unparseable credential payload
    #[error("Malformed credential: {0}")]
    MalformedCredential(String),

    /// Transport-level failure reaching the endpoint
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    /// A refresh succeeded but returned credentials that are already inside
    /// the mandatory refresh window
    #[error("Credentials were refreshed but are still expired (expiry: {expiry_time})")]
    ExpiredAfterRefresh { expiry_time: String },

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),
}

impl CredentialError {
    /// HTTP status carried by the error, if any
    pub fn status(&self) -> Option<u16> {
        match self {
            CredentialError::Authentication { status, .. } => Some(*status),
            CredentialError::Network(e) => e.status().map(|s| s.as_u16()),
            _ => None,
        }
    }
}

/// Result type alias for credential operations
pub type Result<T> = std::result::Result<T, CredentialError>;
