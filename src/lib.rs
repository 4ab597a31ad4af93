/// Keystone CRM authentication service
///
/// Session and account security for a multi-tenant CRM: credential storage,
/// login with lockout, stateless session tokens, password reset and change
/// workflows, auth event auditing, rate limiting, and retention purging.

pub mod account;
pub mod api;
pub mod auth_log;
pub mod config;
pub mod context;
pub mod db;
pub mod error;
pub mod jobs;
pub mod mailer;
pub mod password;
pub mod rate_limit;
pub mod server;
pub mod session;
pub mod token;

pub use config::ServerConfig;
pub use context::AppContext;
pub use error::{CrmError, CrmResult};
