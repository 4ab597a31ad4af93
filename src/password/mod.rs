/// Password reset and change workflow
///
/// Reset tokens are single-use and consumed with a compare-and-set update, so
/// two racing completions for the same token produce exactly one winner.
pub mod policy;

use crate::{
    account::AccountManager,
    auth_log::{event, AuthEventLogger, NewAuthEvent},
    config::ServerConfig,
    db::models::{PasswordResetToken, User},
    error::{CrmError, CrmResult},
    mailer::Mailer,
};
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use chrono::{Duration, Utc};
use rand::RngCore;
use sqlx::SqlitePool;
use std::sync::Arc;
use uuid::Uuid;

/// Password workflow service
pub struct PasswordService {
    db: SqlitePool,
    config: Arc<ServerConfig>,
    accounts: Arc<AccountManager>,
    mailer: Arc<Mailer>,
    auth_log: AuthEventLogger,
}

impl PasswordService {
    pub fn new(
        db: SqlitePool,
        config: Arc<ServerConfig>,
        accounts: Arc<AccountManager>,
        mailer: Arc<Mailer>,
    ) -> Self {
        let auth_log = AuthEventLogger::new(db.clone());
        Self {
            db,
            config,
            accounts,
            mailer,
            auth_log,
        }
    }

    /// Start a reset for the given email.
    ///
    /// Unknown addresses return `Ok(None)` without writing or sending
    /// anything, so callers can answer identically either way and the
    /// endpoint cannot be used to probe which emails exist.
    pub async fn request_reset(
        &self,
        email: &str,
        ip: Option<&str>,
        user_agent: Option<&str>,
    ) -> CrmResult<Option<PasswordResetToken>> {
        let Some(user) = self.accounts.get_user_by_email(email).await? else {
            tracing::debug!("Password reset requested for unknown email");
            return Ok(None);
        };

        let now = Utc::now();
        let token = generate_reset_token();
        let record = PasswordResetToken {
            id: Uuid::new_v4().to_string(),
            user_id: user.id.clone(),
            token: token.clone(),
            expires_at: now + Duration::hours(self.config.security.reset_token_hours),
            used: false,
            used_at: None,
            request_ip: ip.map(|s| s.to_string()),
            request_user_agent: user_agent.map(|s| s.to_string()),
            created_at: now,
        };

        // Multiple outstanding tokens per user are allowed; each remains
        // individually valid until used or expired.
        sqlx::query(
            "INSERT INTO password_reset_tokens (id, user_id, token, expires_at, used, used_at, request_ip, request_user_agent, created_at)
             VALUES (?1, ?2, ?3, ?4, 0, NULL, ?5, ?6, ?7)",
        )
        .bind(&record.id)
        .bind(&record.user_id)
        .bind(&record.token)
        .bind(record.expires_at)
        .bind(&record.request_ip)
        .bind(&record.request_user_agent)
        .bind(record.created_at)
        .execute(&self.db)
        .await
        .map_err(CrmError::Database)?;

        if let Err(e) = self
            .mailer
            .send_password_reset_email(
                &user.email,
                &user.full_name,
                &token,
                &self.config.service.public_url,
            )
            .await
        {
            tracing::warn!(user_id = %user.id, "Failed to send password reset email: {}", e);
        }

        self.auth_log
            .log(
                NewAuthEvent::success(event::PASSWORD_RESET_REQUEST, &user.id)
                    .with_request(ip, user_agent),
            )
            .await;

        Ok(Some(record))
    }

    /// Read-only check of a reset token, newest matching row wins.
    ///
    /// Returns the token together with its (non-deleted) user; used, expired,
    /// and orphaned tokens all come back as `None`.
    pub async fn validate_reset_token(
        &self,
        token: &str,
    ) -> CrmResult<Option<(PasswordResetToken, User)>> {
        let row = sqlx::query_as::<_, PasswordResetToken>(
            "SELECT t.id, t.user_id, t.token, t.expires_at, t.used, t.used_at, t.request_ip, t.request_user_agent, t.created_at
             FROM password_reset_tokens t
             JOIN users u ON u.id = t.user_id AND u.is_deleted = 0
             WHERE t.token = ?1 AND t.used = 0 AND t.expires_at > ?2
             ORDER BY t.created_at DESC
             LIMIT 1",
        )
        .bind(token)
        .bind(Utc::now())
        .fetch_optional(&self.db)
        .await
        .map_err(CrmError::Database)?;

        let Some(row) = row else {
            return Ok(None);
        };

        let Some(user) = self.accounts.get_user(&row.user_id).await? else {
            return Ok(None);
        };

        Ok(Some((row, user)))
    }

    /// Complete a reset: set the new password and consume the token.
    pub async fn complete_reset(
        &self,
        token: &str,
        new_password: &str,
        ip: Option<&str>,
        user_agent: Option<&str>,
    ) -> CrmResult<()> {
        let Some((record, user)) = self.validate_reset_token(token).await? else {
            return Err(CrmError::Validation(
                "Invalid or expired reset token".to_string(),
            ));
        };

        let check = policy::validate_password(new_password);
        if !check.valid {
            return Err(CrmError::Validation(check.message()));
        }

        let password_hash = self.accounts.hash_password(new_password)?;
        let now = Utc::now();

        let mut tx = self.db.begin().await.map_err(CrmError::Database)?;

        sqlx::query(
            "UPDATE users SET password_hash = ?1, failed_login_count = 0, locked_until = NULL, updated_at = ?2
             WHERE id = ?3",
        )
        .bind(&password_hash)
        .bind(now)
        .bind(&user.id)
        .execute(&mut *tx)
        .await
        .map_err(CrmError::Database)?;

        // Consume the token only if nobody else has. Zero rows means a racing
        // completion already won; roll back our password write.
        let consumed = sqlx::query(
            "UPDATE password_reset_tokens SET used = 1, used_at = ?1 WHERE id = ?2 AND used = 0",
        )
        .bind(now)
        .bind(&record.id)
        .execute(&mut *tx)
        .await
        .map_err(CrmError::Database)?;

        if consumed.rows_affected() == 0 {
            tx.rollback().await.map_err(CrmError::Database)?;
            return Err(CrmError::Validation(
                "Invalid or expired reset token".to_string(),
            ));
        }

        tx.commit().await.map_err(CrmError::Database)?;

        // A reset invalidates every open session for the account
        self.accounts.delete_sessions_for_user(&user.id).await?;

        if let Err(e) = self
            .mailer
            .send_password_changed_email(&user.email, &user.full_name)
            .await
        {
            tracing::warn!(user_id = %user.id, "Failed to send password changed email: {}", e);
        }

        self.auth_log
            .log(
                NewAuthEvent::success(event::PASSWORD_RESET_COMPLETE, &user.id)
                    .with_request(ip, user_agent),
            )
            .await;

        Ok(())
    }

    /// Change password for an authenticated user
    pub async fn change_password(
        &self,
        user_id: &str,
        current_password: &str,
        new_password: &str,
        ip: Option<&str>,
        user_agent: Option<&str>,
    ) -> CrmResult<()> {
        let Some(user) = self.accounts.get_user(user_id).await? else {
            return Err(CrmError::NotFound("User not found".to_string()));
        };

        if !self
            .accounts
            .verify_password(current_password, &user.password_hash)?
        {
            self.auth_log
                .log(
                    NewAuthEvent::failure(
                        event::PASSWORD_CHANGE,
                        Some(user_id),
                        "wrong current password",
                    )
                    .with_request(ip, user_agent),
                )
                .await;
            return Err(CrmError::Validation(
                "Current password is incorrect".to_string(),
            ));
        }

        if new_password == current_password {
            return Err(CrmError::Validation(
                "New password must be different from current password".to_string(),
            ));
        }

        let check = policy::validate_password(new_password);
        if !check.valid {
            return Err(CrmError::Validation(check.message()));
        }

        self.accounts.set_password(user_id, new_password).await?;

        if let Err(e) = self
            .mailer
            .send_password_changed_email(&user.email, &user.full_name)
            .await
        {
            tracing::warn!(user_id, "Failed to send password changed email: {}", e);
        }

        self.auth_log
            .log(
                NewAuthEvent::success(event::PASSWORD_CHANGE, user_id)
                    .with_request(ip, user_agent),
            )
            .await;

        Ok(())
    }
}

/// 48 random bytes, URL-safe base64 so the token survives a query string
fn generate_reset_token() -> String {
    let mut bytes = [0u8; 48];
    rand::thread_rng().fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{account::NewAccount, db};

    async fn test_service() -> (PasswordService, Arc<AccountManager>, User) {
        let pool = SqlitePool::connect(":memory:").await.unwrap();
        db::run_migrations(&pool).await.unwrap();

        let config = Arc::new(ServerConfig::for_tests());
        let accounts = Arc::new(AccountManager::new(pool.clone(), config.clone()));
        let mailer = Arc::new(Mailer::new(None).unwrap());
        let service = PasswordService::new(pool, config, accounts.clone(), mailer);

        let user = accounts
            .create_account(NewAccount {
                email: "agent@example.com".to_string(),
                password: "Str0ng!Pass".to_string(),
                full_name: "Avery Agent".to_string(),
            })
            .await
            .unwrap();

        (service, accounts, user)
    }

    #[tokio::test]
    async fn test_request_reset_known_email() {
        let (service, _, user) = test_service().await;

        let record = service
            .request_reset("agent@example.com", Some("10.0.0.1"), None)
            .await
            .unwrap()
            .expect("token for known email");

        assert_eq!(record.user_id, user.id);
        assert!(!record.used);
        assert!(record.expires_at > Utc::now());
        assert_eq!(record.request_ip.as_deref(), Some("10.0.0.1"));
    }

    #[tokio::test]
    async fn test_request_reset_unknown_email_writes_nothing() {
        let (service, _, _) = test_service().await;

        let record = service
            .request_reset("ghost@example.com", None, None)
            .await
            .unwrap();
        assert!(record.is_none());

        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM password_reset_tokens")
            .fetch_one(&service.db)
            .await
            .unwrap();
        assert_eq!(count, 0);
    }

    #[tokio::test]
    async fn test_validate_rejects_expired_token() {
        let (service, _, _) = test_service().await;

        let record = service
            .request_reset("agent@example.com", None, None)
            .await
            .unwrap()
            .unwrap();

        sqlx::query("UPDATE password_reset_tokens SET expires_at = ?1 WHERE id = ?2")
            .bind(Utc::now() - Duration::hours(1))
            .bind(&record.id)
            .execute(&service.db)
            .await
            .unwrap();

        assert!(service
            .validate_reset_token(&record.token)
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_multiple_outstanding_tokens_stay_valid() {
        let (service, _, _) = test_service().await;

        let first = service
            .request_reset("agent@example.com", None, None)
            .await
            .unwrap()
            .unwrap();
        let second = service
            .request_reset("agent@example.com", None, None)
            .await
            .unwrap()
            .unwrap();

        assert_ne!(first.token, second.token);
        assert!(service
            .validate_reset_token(&first.token)
            .await
            .unwrap()
            .is_some());
        assert!(service
            .validate_reset_token(&second.token)
            .await
            .unwrap()
            .is_some());
    }

    #[tokio::test]
    async fn test_complete_reset_sets_password_and_clears_lock() {
        let (service, accounts, user) = test_service().await;

        // Lock the account with bad logins first
        for _ in 0..5 {
            let _ = accounts
                .login("agent@example.com", "Wrong!Pass1", false, None, None)
                .await;
        }
        assert!(accounts
            .get_user(&user.id)
            .await
            .unwrap()
            .unwrap()
            .is_locked(Utc::now()));

        let record = service
            .request_reset("agent@example.com", None, None)
            .await
            .unwrap()
            .unwrap();

        service
            .complete_reset(&record.token, "N3w!Passw0rd", None, None)
            .await
            .unwrap();

        let after = accounts.get_user(&user.id).await.unwrap().unwrap();
        assert_eq!(after.failed_login_count, 0);
        assert!(after.locked_until.is_none());
        assert!(accounts
            .verify_password("N3w!Passw0rd", &after.password_hash)
            .unwrap());
    }

    #[tokio::test]
    async fn test_complete_reset_is_single_use() {
        let (service, _, _) = test_service().await;

        let record = service
            .request_reset("agent@example.com", None, None)
            .await
            .unwrap()
            .unwrap();

        service
            .complete_reset(&record.token, "N3w!Passw0rd", None, None)
            .await
            .unwrap();

        let again = service
            .complete_reset(&record.token, "0ther!Passwd", None, None)
            .await;
        assert!(matches!(again, Err(CrmError::Validation(_))));
    }

    #[tokio::test]
    async fn test_complete_reset_rejects_weak_password() {
        let (service, accounts, user) = test_service().await;

        let record = service
            .request_reset("agent@example.com", None, None)
            .await
            .unwrap()
            .unwrap();

        let result = service
            .complete_reset(&record.token, "password", None, None)
            .await;
        assert!(matches!(result, Err(CrmError::Validation(_))));

        // A rejected attempt leaves the token untouched
        assert!(service
            .validate_reset_token(&record.token)
            .await
            .unwrap()
            .is_some());
        let unchanged = accounts.get_user(&user.id).await.unwrap().unwrap();
        assert!(accounts
            .verify_password("Str0ng!Pass", &unchanged.password_hash)
            .unwrap());
    }

    #[tokio::test]
    async fn test_complete_reset_invalidates_sessions() {
        let (service, accounts, user) = test_service().await;

        accounts
            .login("agent@example.com", "Str0ng!Pass", false, None, None)
            .await
            .unwrap();
        accounts
            .login("agent@example.com", "Str0ng!Pass", true, None, None)
            .await
            .unwrap();
        assert_eq!(accounts.sessions_for_user(&user.id).await.unwrap().len(), 2);

        let record = service
            .request_reset("agent@example.com", None, None)
            .await
            .unwrap()
            .unwrap();
        service
            .complete_reset(&record.token, "N3w!Passw0rd", None, None)
            .await
            .unwrap();

        assert!(accounts.sessions_for_user(&user.id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_change_password_requires_current() {
        let (service, _, user) = test_service().await;

        let result = service
            .change_password(&user.id, "Wrong!Pass1", "N3w!Passw0rd", None, None)
            .await;
        assert!(matches!(result, Err(CrmError::Validation(_))));
    }

    #[tokio::test]
    async fn test_change_password_rejects_same_password() {
        let (service, _, user) = test_service().await;

        let result = service
            .change_password(&user.id, "Str0ng!Pass", "Str0ng!Pass", None, None)
            .await;
        assert!(matches!(result, Err(CrmError::Validation(_))));
    }

    #[tokio::test]
    async fn test_change_password_success() {
        let (service, accounts, user) = test_service().await;

        service
            .change_password(&user.id, "Str0ng!Pass", "N3w!Passw0rd", None, None)
            .await
            .unwrap();

        let after = accounts.get_user(&user.id).await.unwrap().unwrap();
        assert!(accounts
            .verify_password("N3w!Passw0rd", &after.password_hash)
            .unwrap());
    }
}
