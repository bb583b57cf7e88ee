// S3 Refresh Session - Library root

pub mod auth;
pub mod config;
pub mod error;
pub mod session;

pub use error::{CredentialError, Result};
pub use session::{
    build_async_session, build_async_session_with, build_blocking_session,
    build_blocking_session_with, AsyncSession, Session, SessionCredentialsProvider,
};
