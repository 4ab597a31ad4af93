/// Shared application context
use crate::{
    account::AccountManager,
    auth_log::AuthEventLogger,
    config::ServerConfig,
    db::{self, DatabaseOptions},
    error::CrmResult,
    mailer::Mailer,
    password::PasswordService,
    rate_limit::RateLimiter,
    session::SessionValidator,
};
use sqlx::SqlitePool;
use std::sync::Arc;

/// Application context holding every service the handlers and jobs need
#[derive(Clone)]
pub struct AppContext {
    pub config: Arc<ServerConfig>,
    pub db: SqlitePool,
    pub accounts: Arc<AccountManager>,
    pub sessions: SessionValidator,
    pub passwords: Arc<PasswordService>,
    pub rate_limiter: RateLimiter,
    pub mailer: Arc<Mailer>,
    pub auth_log: AuthEventLogger,
}

impl AppContext {
    /// Open the database, run migrations, and wire up all services
    pub async fn new(config: Arc<ServerConfig>) -> CrmResult<Arc<Self>> {
        let db = db::create_pool(&config.storage.database, DatabaseOptions::default()).await?;
        db::run_migrations(&db).await?;

        Self::from_parts(config, db)
    }

    /// Wire services over an already-open pool (tests use this with :memory:)
    pub fn from_parts(config: Arc<ServerConfig>, db: SqlitePool) -> CrmResult<Arc<Self>> {
        let mailer = Arc::new(Mailer::new(config.email.clone())?);
        let accounts = Arc::new(AccountManager::new(db.clone(), config.clone()));
        let sessions = SessionValidator::new(accounts.clone());
        let passwords = Arc::new(PasswordService::new(
            db.clone(),
            config.clone(),
            accounts.clone(),
            mailer.clone(),
        ));
        let rate_limiter = RateLimiter::new();
        let auth_log = AuthEventLogger::new(db.clone());

        Ok(Arc::new(Self {
            config,
            db,
            accounts,
            sessions,
            passwords,
            rate_limiter,
            mailer,
            auth_log,
        }))
    }
}
