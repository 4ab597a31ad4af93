/// Account manager implementation using runtime queries
///
/// Owns user-row reads and writes: registration, login with the failed-attempt
/// counter and lockout, session rows, and account status transitions. Accounts
/// are soft-deleted only; every lookup here excludes deleted rows.
use crate::{
    auth_log::{event, AuthEventLogger, NewAuthEvent},
    config::ServerConfig,
    db::models::{AccountStatus, SessionRecord, SubscriptionTier, User},
    error::{CrmError, CrmResult},
    password::policy,
    token::TokenIssuer,
};
use chrono::{DateTime, Duration, Utc};
use sqlx::SqlitePool;
use std::sync::Arc;
use uuid::Uuid;

/// Input for account creation
#[derive(Debug, Clone)]
pub struct NewAccount {
    pub email: String,
    pub password: String,
    pub full_name: String,
}

/// Successful login result
#[derive(Debug, Clone)]
pub struct LoginSuccess {
    pub user: User,
    pub token: String,
    pub expires_at: DateTime<Utc>,
    pub session_id: String,
}

/// Account manager service
pub struct AccountManager {
    db: SqlitePool,
    config: Arc<ServerConfig>,
    tokens: TokenIssuer,
    auth_log: AuthEventLogger,
}

impl AccountManager {
    pub fn new(db: SqlitePool, config: Arc<ServerConfig>) -> Self {
        let tokens = TokenIssuer::new(&config.security);
        let auth_log = AuthEventLogger::new(db.clone());
        Self {
            db,
            config,
            tokens,
            auth_log,
        }
    }

    pub fn token_issuer(&self) -> &TokenIssuer {
        &self.tokens
    }

    /// Create a new account with a trial subscription
    pub async fn create_account(&self, new: NewAccount) -> CrmResult<User> {
        self.validate_email(&new.email)?;

        let check = policy::validate_password(&new.password);
        if !check.valid {
            return Err(CrmError::Validation(check.message()));
        }

        if self.get_user_by_email(&new.email).await?.is_some() {
            return Err(CrmError::Conflict("Email already registered".to_string()));
        }

        let password_hash = self.hash_password(&new.password)?;
        let now = Utc::now();
        let id = Uuid::new_v4().to_string();
        let trial_expires_at = now + Duration::days(14);

        sqlx::query(
            "INSERT INTO users (id, email, password_hash, full_name, email_verified, account_status,
                                subscription_tier, trial_expires_at, failed_login_count, locked_until,
                                is_deleted, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, 0, NULL, 0, ?9, ?9)",
        )
        .bind(&id)
        .bind(&new.email)
        .bind(&password_hash)
        .bind(&new.full_name)
        .bind(false)
        .bind(AccountStatus::Active)
        .bind(SubscriptionTier::Trial)
        .bind(trial_expires_at)
        .bind(now)
        .execute(&self.db)
        .await
        .map_err(CrmError::Database)?;

        self.auth_log
            .log(NewAuthEvent::success(event::REGISTER, &id))
            .await;

        Ok(User {
            id,
            email: new.email,
            password_hash,
            full_name: new.full_name,
            email_verified: false,
            account_status: AccountStatus::Active,
            subscription_tier: SubscriptionTier::Trial,
            trial_expires_at: Some(trial_expires_at),
            failed_login_count: 0,
            locked_until: None,
            is_deleted: false,
            created_at: now,
            updated_at: now,
        })
    }

    /// Authenticate and open a session
    pub async fn login(
        &self,
        email: &str,
        password: &str,
        remember_me: bool,
        ip: Option<&str>,
        user_agent: Option<&str>,
    ) -> CrmResult<LoginSuccess> {
        let Some(user) = self.get_user_by_email(email).await? else {
            self.auth_log
                .log(
                    NewAuthEvent::failure(event::LOGIN, None, "unknown email")
                        .with_request(ip, user_agent),
                )
                .await;
            return Err(CrmError::Authentication("Invalid credentials".to_string()));
        };

        let now = Utc::now();
        if user.is_locked(now) {
            self.auth_log
                .log(
                    NewAuthEvent::failure(event::LOGIN, Some(&user.id), "account locked")
                        .with_request(ip, user_agent),
                )
                .await;
            return Err(CrmError::AccountLocked {
                locked_until: user.locked_until.unwrap_or(now),
            });
        }

        if user.account_status == AccountStatus::Deactivated {
            self.auth_log
                .log(
                    NewAuthEvent::failure(event::LOGIN, Some(&user.id), "account deactivated")
                        .with_request(ip, user_agent),
                )
                .await;
            return Err(CrmError::AccountDeactivated);
        }

        if !self.verify_password(password, &user.password_hash)? {
            self.record_failed_login(&user, ip, user_agent).await?;
            return Err(CrmError::Authentication("Invalid credentials".to_string()));
        }

        // Successful login wipes the failure counter and any stale lock
        sqlx::query(
            "UPDATE users SET failed_login_count = 0, locked_until = NULL, updated_at = ?1 WHERE id = ?2",
        )
        .bind(now)
        .bind(&user.id)
        .execute(&self.db)
        .await
        .map_err(CrmError::Database)?;

        let session_id = Uuid::new_v4().to_string();
        let (token, expires_at) = self.tokens.issue(&user, remember_me, &session_id)?;

        sqlx::query(
            "INSERT INTO sessions (id, user_id, remember_me, created_at, expires_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
        )
        .bind(&session_id)
        .bind(&user.id)
        .bind(remember_me)
        .bind(now)
        .bind(expires_at)
        .execute(&self.db)
        .await
        .map_err(CrmError::Database)?;

        self.auth_log
            .log(NewAuthEvent::success(event::LOGIN, &user.id).with_request(ip, user_agent))
            .await;

        let mut user = user;
        user.failed_login_count = 0;
        user.locked_until = None;

        Ok(LoginSuccess {
            user,
            token,
            expires_at,
            session_id,
        })
    }

    /// Record a failed password check; lock the account at the threshold
    async fn record_failed_login(
        &self,
        user: &User,
        ip: Option<&str>,
        user_agent: Option<&str>,
    ) -> CrmResult<()> {
        let now = Utc::now();
        let failed = user.failed_login_count + 1;
        let threshold = self.config.security.lockout_threshold;

        if failed >= threshold {
            let locked_until = now + Duration::minutes(self.config.security.lockout_minutes);
            sqlx::query(
                "UPDATE users SET failed_login_count = ?1, locked_until = ?2, updated_at = ?3 WHERE id = ?4",
            )
            .bind(failed)
            .bind(locked_until)
            .bind(now)
            .bind(&user.id)
            .execute(&self.db)
            .await
            .map_err(CrmError::Database)?;

            self.auth_log
                .log(
                    NewAuthEvent::failure(event::LOCKOUT, Some(&user.id), "failed login threshold")
                        .with_request(ip, user_agent),
                )
                .await;

            tracing::warn!(user_id = %user.id, %locked_until, "Account locked after repeated failed logins");
        } else {
            sqlx::query(
                "UPDATE users SET failed_login_count = ?1, updated_at = ?2 WHERE id = ?3",
            )
            .bind(failed)
            .bind(now)
            .bind(&user.id)
            .execute(&self.db)
            .await
            .map_err(CrmError::Database)?;
        }

        self.auth_log
            .log(
                NewAuthEvent::failure(event::LOGIN, Some(&user.id), "wrong password")
                    .with_request(ip, user_agent),
            )
            .await;

        Ok(())
    }

    /// Delete one session (logout)
    pub async fn logout(
        &self,
        user_id: &str,
        session_id: &str,
        ip: Option<&str>,
        user_agent: Option<&str>,
    ) -> CrmResult<()> {
        sqlx::query("DELETE FROM sessions WHERE id = ?1 AND user_id = ?2")
            .bind(session_id)
            .bind(user_id)
            .execute(&self.db)
            .await
            .map_err(CrmError::Database)?;

        self.auth_log
            .log(NewAuthEvent::success(event::LOGOUT, user_id).with_request(ip, user_agent))
            .await;

        Ok(())
    }

    /// Delete every session row for a user (bulk invalidation on reset)
    pub async fn delete_sessions_for_user(&self, user_id: &str) -> CrmResult<u64> {
        let result = sqlx::query("DELETE FROM sessions WHERE user_id = ?1")
            .bind(user_id)
            .execute(&self.db)
            .await
            .map_err(CrmError::Database)?;

        Ok(result.rows_affected())
    }

    /// Look up a non-deleted user by id
    pub async fn get_user(&self, user_id: &str) -> CrmResult<Option<User>> {
        let user = sqlx::query_as::<_, User>(
            "SELECT id, email, password_hash, full_name, email_verified, account_status,
                    subscription_tier, trial_expires_at, failed_login_count, locked_until,
                    is_deleted, created_at, updated_at
             FROM users WHERE id = ?1 AND is_deleted = 0",
        )
        .bind(user_id)
        .fetch_optional(&self.db)
        .await
        .map_err(CrmError::Database)?;

        Ok(user)
    }

    /// Look up a non-deleted user by email (case-insensitive)
    pub async fn get_user_by_email(&self, email: &str) -> CrmResult<Option<User>> {
        let user = sqlx::query_as::<_, User>(
            "SELECT id, email, password_hash, full_name, email_verified, account_status,
                    subscription_tier, trial_expires_at, failed_login_count, locked_until,
                    is_deleted, created_at, updated_at
             FROM users WHERE email = ?1 COLLATE NOCASE AND is_deleted = 0",
        )
        .bind(email)
        .fetch_optional(&self.db)
        .await
        .map_err(CrmError::Database)?;

        Ok(user)
    }

    /// Overwrite the stored password hash; clears lock state and failures
    pub async fn set_password(&self, user_id: &str, new_password: &str) -> CrmResult<()> {
        let password_hash = self.hash_password(new_password)?;

        sqlx::query(
            "UPDATE users SET password_hash = ?1, failed_login_count = 0, locked_until = NULL, updated_at = ?2
             WHERE id = ?3",
        )
        .bind(&password_hash)
        .bind(Utc::now())
        .bind(user_id)
        .execute(&self.db)
        .await
        .map_err(CrmError::Database)?;

        Ok(())
    }

    /// Mark the account deactivated
    pub async fn deactivate(&self, user_id: &str) -> CrmResult<()> {
        self.set_status(user_id, AccountStatus::Deactivated).await
    }

    /// Re-enable a deactivated account
    pub async fn reactivate(&self, user_id: &str) -> CrmResult<()> {
        self.set_status(user_id, AccountStatus::Active).await
    }

    async fn set_status(&self, user_id: &str, status: AccountStatus) -> CrmResult<()> {
        let result = sqlx::query(
            "UPDATE users SET account_status = ?1, updated_at = ?2 WHERE id = ?3 AND is_deleted = 0",
        )
        .bind(status)
        .bind(Utc::now())
        .bind(user_id)
        .execute(&self.db)
        .await
        .map_err(CrmError::Database)?;

        if result.rows_affected() == 0 {
            return Err(CrmError::NotFound("User not found".to_string()));
        }

        Ok(())
    }

    /// Soft-delete the account and drop its sessions
    pub async fn soft_delete(&self, user_id: &str) -> CrmResult<()> {
        let result = sqlx::query(
            "UPDATE users SET is_deleted = 1, updated_at = ?1 WHERE id = ?2 AND is_deleted = 0",
        )
        .bind(Utc::now())
        .bind(user_id)
        .execute(&self.db)
        .await
        .map_err(CrmError::Database)?;

        if result.rows_affected() == 0 {
            return Err(CrmError::NotFound("User not found".to_string()));
        }

        self.delete_sessions_for_user(user_id).await?;

        Ok(())
    }

    /// Mark the email address verified
    pub async fn mark_email_verified(&self, user_id: &str) -> CrmResult<()> {
        sqlx::query("UPDATE users SET email_verified = 1, updated_at = ?1 WHERE id = ?2")
            .bind(Utc::now())
            .bind(user_id)
            .execute(&self.db)
            .await
            .map_err(CrmError::Database)?;

        Ok(())
    }

    /// List session rows for a user
    pub async fn sessions_for_user(&self, user_id: &str) -> CrmResult<Vec<SessionRecord>> {
        let sessions = sqlx::query_as::<_, SessionRecord>(
            "SELECT id, user_id, remember_me, created_at, expires_at
             FROM sessions WHERE user_id = ?1 ORDER BY created_at DESC",
        )
        .bind(user_id)
        .fetch_all(&self.db)
        .await
        .map_err(CrmError::Database)?;

        Ok(sessions)
    }

    pub fn hash_password(&self, password: &str) -> CrmResult<String> {
        bcrypt::hash(password, self.config.security.bcrypt_cost)
            .map_err(|e| CrmError::Internal(format!("Password hashing failed: {}", e)))
    }

    pub fn verify_password(&self, password: &str, hash: &str) -> CrmResult<bool> {
        bcrypt::verify(password, hash)
            .map_err(|e| CrmError::Internal(format!("Password verification failed: {}", e)))
    }

    /// Minimal shape check; anything fancier belongs to the mail provider
    pub fn validate_email(&self, email: &str) -> CrmResult<()> {
        let valid = email.contains('@')
            && !email.starts_with('@')
            && !email.ends_with('@')
            && !email.contains(char::is_whitespace);

        if !valid {
            return Err(CrmError::Validation("Invalid email format".to_string()));
        }

        Ok(())
    }
}
