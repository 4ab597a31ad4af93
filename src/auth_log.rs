/// Auth event audit logging
///
/// Appends structured records for every auth-relevant action. Logging is
/// best-effort: a storage failure is traced and swallowed so it can never be
/// the reason an auth operation fails.
use crate::db::models::AuthLogEntry;
use chrono::Utc;
use sqlx::SqlitePool;
use uuid::Uuid;

/// Well-known event type names
pub mod event {
    pub const LOGIN: &str = "login";
    pub const LOGOUT: &str = "logout";
    pub const LOCKOUT: &str = "lockout";
    pub const REGISTER: &str = "register";
    pub const PASSWORD_RESET_REQUEST: &str = "password_reset_request";
    pub const PASSWORD_RESET_COMPLETE: &str = "password_reset_complete";
    pub const PASSWORD_CHANGE: &str = "password_change";
}

/// A record to append
#[derive(Debug, Clone, Default)]
pub struct NewAuthEvent {
    pub user_id: Option<String>,
    pub event_type: String,
    pub success: bool,
    pub failure_reason: Option<String>,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
    pub event_details: Option<serde_json::Value>,
}

impl NewAuthEvent {
    pub fn success(event_type: &str, user_id: &str) -> Self {
        Self {
            user_id: Some(user_id.to_string()),
            event_type: event_type.to_string(),
            success: true,
            ..Self::default()
        }
    }

    pub fn failure(event_type: &str, user_id: Option<&str>, reason: &str) -> Self {
        Self {
            user_id: user_id.map(|s| s.to_string()),
            event_type: event_type.to_string(),
            success: false,
            failure_reason: Some(reason.to_string()),
            ..Self::default()
        }
    }

    pub fn with_request(mut self, ip: Option<&str>, user_agent: Option<&str>) -> Self {
        self.ip_address = ip.map(|s| s.to_string());
        self.user_agent = user_agent.map(|s| s.to_string());
        self
    }
}

/// Auth event logger service
#[derive(Clone)]
pub struct AuthEventLogger {
    db: SqlitePool,
}

impl AuthEventLogger {
    pub fn new(db: SqlitePool) -> Self {
        Self { db }
    }

    /// Append an audit record. Never fails the caller.
    pub async fn log(&self, event: NewAuthEvent) {
        let details = event
            .event_details
            .as_ref()
            .map(|v| v.to_string());

        let result = sqlx::query(
            "INSERT INTO auth_logs (id, user_id, event_type, success, failure_reason, ip_address, user_agent, event_details, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
        )
        .bind(Uuid::new_v4().to_string())
        .bind(&event.user_id)
        .bind(&event.event_type)
        .bind(event.success)
        .bind(&event.failure_reason)
        .bind(&event.ip_address)
        .bind(&event.user_agent)
        .bind(&details)
        .bind(Utc::now())
        .execute(&self.db)
        .await;

        if let Err(e) = result {
            tracing::warn!(
                event_type = %event.event_type,
                "Failed to write auth log entry: {}",
                e
            );
        }
    }

    /// Recent events for a user, newest first
    pub async fn recent_for_user(
        &self,
        user_id: &str,
        limit: i64,
    ) -> Result<Vec<AuthLogEntry>, sqlx::Error> {
        sqlx::query_as::<_, AuthLogEntry>(
            "SELECT id, user_id, event_type, success, failure_reason, ip_address, user_agent, event_details, created_at
             FROM auth_logs
             WHERE user_id = ?1
             ORDER BY created_at DESC
             LIMIT ?2",
        )
        .bind(user_id)
        .bind(limit)
        .fetch_all(&self.db)
        .await
    }

    /// Count events of a type recorded for a user
    pub async fn count_for_user(
        &self,
        user_id: &str,
        event_type: &str,
    ) -> Result<i64, sqlx::Error> {
        sqlx::query_scalar(
            "SELECT COUNT(*) FROM auth_logs WHERE user_id = ?1 AND event_type = ?2",
        )
        .bind(user_id)
        .bind(event_type)
        .fetch_one(&self.db)
        .await
    }
}
