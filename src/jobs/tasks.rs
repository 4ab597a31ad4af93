/// Individual background task implementations
use crate::{config::RetentionConfig, error::CrmResult};
use chrono::{Duration, Utc};
use sqlx::SqlitePool;
use std::time::Instant;

/// Counts from one retention purge run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetentionReport {
    pub auth_logs_deleted: u64,
    pub reset_tokens_deleted: u64,
    pub elapsed_ms: u128,
}

/// Delete auth logs and reset tokens past their retention windows.
///
/// Expired tokens go regardless of use; used tokens linger briefly after
/// consumption so a support request can still see them.
pub async fn run_retention_purge(
    db: &SqlitePool,
    retention: &RetentionConfig,
) -> CrmResult<RetentionReport> {
    let started = Instant::now();
    let now = Utc::now();

    let log_cutoff = now - Duration::days(retention.auth_log_days);
    let auth_logs = sqlx::query("DELETE FROM auth_logs WHERE created_at < ?1")
        .bind(log_cutoff)
        .execute(db)
        .await;

    let used_cutoff = now - Duration::hours(retention.used_token_hours);
    let tokens = sqlx::query(
        "DELETE FROM password_reset_tokens
         WHERE expires_at < ?1 OR (used = 1 AND used_at < ?2)",
    )
    .bind(now)
    .bind(used_cutoff)
    .execute(db)
    .await;

    // One failed delete still reports what the other one accomplished before
    // the run is marked failed.
    match (auth_logs, tokens) {
        (Ok(auth_logs), Ok(tokens)) => Ok(RetentionReport {
            auth_logs_deleted: auth_logs.rows_affected(),
            reset_tokens_deleted: tokens.rows_affected(),
            elapsed_ms: started.elapsed().as_millis(),
        }),
        (Ok(auth_logs), Err(e)) => {
            tracing::warn!(
                auth_logs_deleted = auth_logs.rows_affected(),
                "Reset token purge failed after auth log purge succeeded: {}",
                e
            );
            Err(e.into())
        }
        (Err(e), Ok(tokens)) => {
            tracing::warn!(
                reset_tokens_deleted = tokens.rows_affected(),
                "Auth log purge failed: {}",
                e
            );
            Err(e.into())
        }
        (Err(e), Err(_)) => Err(e.into()),
    }
}

/// Delete expired session rows so the table tracks only live sessions
pub async fn prune_expired_sessions(db: &SqlitePool) -> CrmResult<u64> {
    let result = sqlx::query("DELETE FROM sessions WHERE expires_at < ?1")
        .bind(Utc::now())
        .execute(db)
        .await?;

    Ok(result.rows_affected())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{config::ServerConfig, db};
    use uuid::Uuid;

    async fn test_pool() -> SqlitePool {
        let pool = SqlitePool::connect(":memory:").await.unwrap();
        db::run_migrations(&pool).await.unwrap();
        pool
    }

    async fn insert_user(pool: &SqlitePool) -> String {
        let id = Uuid::new_v4().to_string();
        sqlx::query(
            "INSERT INTO users (id, email, password_hash, full_name, email_verified, account_status,
                                subscription_tier, trial_expires_at, failed_login_count, locked_until,
                                is_deleted, created_at, updated_at)
             VALUES (?1, ?2, 'hash', 'Test', 1, 'active', 'pro', NULL, 0, NULL, 0, ?3, ?3)",
        )
        .bind(&id)
        .bind(format!("{}@example.com", &id[..8]))
        .bind(Utc::now())
        .execute(pool)
        .await
        .unwrap();
        id
    }

    async fn insert_auth_log(pool: &SqlitePool, user_id: &str, age_days: i64) {
        sqlx::query(
            "INSERT INTO auth_logs (id, user_id, event_type, success, created_at)
             VALUES (?1, ?2, 'login', 1, ?3)",
        )
        .bind(Uuid::new_v4().to_string())
        .bind(user_id)
        .bind(Utc::now() - Duration::days(age_days))
        .execute(pool)
        .await
        .unwrap();
    }

    async fn insert_token(
        pool: &SqlitePool,
        user_id: &str,
        expires_in_hours: i64,
        used_hours_ago: Option<i64>,
    ) -> String {
        let id = Uuid::new_v4().to_string();
        sqlx::query(
            "INSERT INTO password_reset_tokens (id, user_id, token, expires_at, used, used_at, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        )
        .bind(&id)
        .bind(user_id)
        .bind(Uuid::new_v4().to_string())
        .bind(Utc::now() + Duration::hours(expires_in_hours))
        .bind(used_hours_ago.is_some())
        .bind(used_hours_ago.map(|h| Utc::now() - Duration::hours(h)))
        .bind(Utc::now())
        .execute(pool)
        .await
        .unwrap();
        id
    }

    #[tokio::test]
    async fn test_purge_removes_only_old_auth_logs() {
        let pool = test_pool().await;
        let user = insert_user(&pool).await;
        let retention = ServerConfig::for_tests().retention;

        insert_auth_log(&pool, &user, 10).await;
        insert_auth_log(&pool, &user, 8).await;
        insert_auth_log(&pool, &user, 2).await;

        let report = run_retention_purge(&pool, &retention).await.unwrap();
        assert_eq!(report.auth_logs_deleted, 2);

        let remaining: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM auth_logs")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(remaining, 1);
    }

    #[tokio::test]
    async fn test_purge_token_rules() {
        let pool = test_pool().await;
        let user = insert_user(&pool).await;
        let retention = ServerConfig::for_tests().retention;

        // Expired and unused: purged
        insert_token(&pool, &user, -1, None).await;
        // Used 48h ago: purged
        insert_token(&pool, &user, 12, Some(48)).await;
        // Used 1h ago: kept for the grace window
        let fresh_used = insert_token(&pool, &user, 12, Some(1)).await;
        // Live and unused: kept
        let live = insert_token(&pool, &user, 12, None).await;

        let report = run_retention_purge(&pool, &retention).await.unwrap();
        assert_eq!(report.reset_tokens_deleted, 2);

        let kept: Vec<String> =
            sqlx::query_scalar("SELECT id FROM password_reset_tokens ORDER BY id")
                .fetch_all(&pool)
                .await
                .unwrap();
        let mut expected = vec![fresh_used, live];
        expected.sort();
        assert_eq!(kept, expected);
    }

    #[tokio::test]
    async fn test_purge_partial_failure_still_deletes_logs() {
        let pool = test_pool().await;
        let user = insert_user(&pool).await;
        let retention = ServerConfig::for_tests().retention;

        insert_auth_log(&pool, &user, 10).await;
        insert_auth_log(&pool, &user, 2).await;

        // Break the second delete; the first must still land
        sqlx::query("DROP TABLE password_reset_tokens")
            .execute(&pool)
            .await
            .unwrap();

        let result = run_retention_purge(&pool, &retention).await;
        assert!(result.is_err());

        let remaining: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM auth_logs")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(remaining, 1);
    }

    #[tokio::test]
    async fn test_prune_expired_sessions() {
        let pool = test_pool().await;
        let user = insert_user(&pool).await;

        for offset in [-2i64, 5] {
            sqlx::query(
                "INSERT INTO sessions (id, user_id, remember_me, created_at, expires_at)
                 VALUES (?1, ?2, 0, ?3, ?4)",
            )
            .bind(Uuid::new_v4().to_string())
            .bind(&user)
            .bind(Utc::now())
            .bind(Utc::now() + Duration::days(offset))
            .execute(&pool)
            .await
            .unwrap();
        }

        assert_eq!(prune_expired_sessions(&pool).await.unwrap(), 1);
        let remaining: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM sessions")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(remaining, 1);
    }
}
