use anyhow::{Context, Result};

use s3_refresh_session::auth::{FreshnessState, FrozenCredentials, TerminalPrompter};
use s3_refresh_session::config::{Config, SessionMode};
use s3_refresh_session::session;

// Not #[tokio::main]: the async session's seed fetch blocks and has to run
// before a runtime exists.
fn main() -> Result<()> {
    let config = Config::load()?;
    config.validate()?;

    // Initialize logging with a configured level
    let log_level = config.log_level.to_lowercase();
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&log_level));

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(true)
        .with_line_number(true)
        .init();

    tracing::info!("🚀 S3 Refresh Session starting...");
    tracing::debug!("Configuration: {:?}", config);

    // Make sure the netrc has a login for the auth host
    let source = config.credential_source();
    let status = source
        .ensure_local_credentials(&TerminalPrompter)
        .context("Failed to set up local credentials")?;
    tracing::info!("Local credentials: {:?} ({})", status, source.path().display());

    let (credentials, freshness) = match config.session_mode {
        SessionMode::Blocking => {
            let session = session::build_blocking_session_with(&config)
                .context("Failed to build blocking session")?;
            let credentials = session.credentials()?;
            (credentials, session.freshness())
        }
        SessionMode::Async => {
            let session = session::build_async_session_with(&config)
                .context("Failed to build async session")?;

            let runtime = tokio::runtime::Runtime::new().context("Failed to start runtime")?;
            runtime.block_on(async {
                let credentials = session.credentials().await?;
                let freshness = session.freshness().await;
                Ok::<_, anyhow::Error>((credentials, freshness))
            })?
        }
    };

    print_summary(&config, &credentials, freshness);

    Ok(())
}

/// Print session summary
fn print_summary(config: &Config, credentials: &FrozenCredentials, freshness: FreshnessState) {
    println!();
    println!("  Endpoint:    {}", config.endpoint);
    println!("  Region:      {}", config.region);
    println!("  Mode:        {:?}", config.session_mode);
    println!("  Access key:  {}", mask(&credentials.access_key));
    println!("  Expires:     {}", credentials.expiry.to_rfc3339());
    println!("  Freshness:   {:?}", freshness);
    println!(
        "  Refresh at:  {}s (advisory) / {}s (mandatory) before expiry",
        config.advisory_refresh_timeout, config.mandatory_refresh_timeout
    );
    println!();
}

/// Show only the first few characters of a key
fn mask(key: &str) -> String {
    let visible: String = key.chars().take(4).collect();
    format!("{}...", visible)
}
