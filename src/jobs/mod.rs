/// Background job scheduling
///
/// Long-lived tokio tasks on fixed intervals. Each loop logs failures and
/// keeps running; a bad purge run must not kill the scheduler.
pub mod tasks;

use crate::{context::AppContext, db};
use std::sync::Arc;
use std::time::Duration;

const RETENTION_INTERVAL: Duration = Duration::from_secs(24 * 60 * 60);
const SWEEP_INTERVAL: Duration = Duration::from_secs(5 * 60);
const HEALTH_INTERVAL: Duration = Duration::from_secs(60 * 60);

/// Job scheduler for periodic maintenance
pub struct JobScheduler {
    ctx: Arc<AppContext>,
}

impl JobScheduler {
    pub fn new(ctx: Arc<AppContext>) -> Self {
        Self { ctx }
    }

    /// Spawn all periodic jobs
    pub fn start(&self) {
        self.spawn_retention_purge();
        self.spawn_rate_limit_sweep();
        self.spawn_health_check();
        tracing::info!("Background jobs started");
    }

    /// Daily purge of auth logs and reset tokens past retention
    fn spawn_retention_purge(&self) {
        let ctx = self.ctx.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(RETENTION_INTERVAL);
            // First tick fires immediately; purge once at startup
            loop {
                interval.tick().await;

                match tasks::run_retention_purge(&ctx.db, &ctx.config.retention).await {
                    Ok(report) => {
                        tracing::info!(
                            auth_logs = report.auth_logs_deleted,
                            reset_tokens = report.reset_tokens_deleted,
                            elapsed_ms = report.elapsed_ms,
                            "Retention purge complete"
                        );
                    }
                    Err(e) => {
                        tracing::error!("Retention purge failed: {}", e);
                    }
                }

                if let Err(e) = tasks::prune_expired_sessions(&ctx.db).await {
                    tracing::error!("Session prune failed: {}", e);
                }
            }
        });
    }

    /// Periodic removal of expired rate limit windows
    fn spawn_rate_limit_sweep(&self) {
        let ctx = self.ctx.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(SWEEP_INTERVAL);
            loop {
                interval.tick().await;

                let swept = ctx.rate_limiter.sweep();
                if swept > 0 {
                    tracing::debug!(swept, "Swept expired rate limit windows");
                }
            }
        });
    }

    /// Hourly database liveness check
    fn spawn_health_check(&self) {
        let ctx = self.ctx.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(HEALTH_INTERVAL);
            loop {
                interval.tick().await;

                if let Err(e) = db::test_connection(&ctx.db).await {
                    tracing::error!("Database health check failed: {}", e);
                }
            }
        });
    }
}
