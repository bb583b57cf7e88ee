// Authentication module
// Local login source, credential fetching and the refreshable credential lifecycle

mod fetcher;
mod netrc;
mod refreshable;
mod types;

pub use fetcher::{AsyncCredentialFetcher, CredentialFetcher, FetcherConfig};
pub use netrc::{
    default_netrc_path, netrc_file_name, CredentialPrompter, LocalCredentialSource,
    LocalCredentialStatus, Login, Netrc, NetrcEntry, TerminalPrompter, DEFAULT_AUTH_HOST,
};
pub use refreshable::{
    AsyncCredentialRefresher, AsyncRefreshableCredentials, Clock, CredentialRefresher,
    RefreshHealth, RefreshableCredentials,
};
pub use types::{
    normalize, CredentialRecord, FreshnessState, FrozenCredentials, RawApiCredentialResponse,
    RefreshPolicy, ADVISORY_REFRESH_TIMEOUT, MANDATORY_REFRESH_TIMEOUT, MAX_REFRESH_TIMEOUT,
};
