/// Database row models
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// Subscription tier carried in session tokens and billing checks
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(rename_all = "lowercase")]
pub enum SubscriptionTier {
    Trial,
    Free,
    Pro,
    Enterprise,
}

/// Account status stored on the user row
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(rename_all = "lowercase")]
pub enum AccountStatus {
    Active,
    Deactivated,
}

/// User account record
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct User {
    pub id: String,
    pub email: String,
    #[serde(skip_serializing)]
    pub password_hash: String,
    pub full_name: String,
    pub email_verified: bool,
    pub account_status: AccountStatus,
    pub subscription_tier: SubscriptionTier,
    pub trial_expires_at: Option<DateTime<Utc>>,
    pub failed_login_count: i64,
    pub locked_until: Option<DateTime<Utc>>,
    pub is_deleted: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl User {
    /// True when `locked_until` is set and still in the future
    pub fn is_locked(&self, now: DateTime<Utc>) -> bool {
        self.locked_until.map(|until| until > now).unwrap_or(false)
    }
}

/// Single-use password reset token record
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct PasswordResetToken {
    pub id: String,
    pub user_id: String,
    pub token: String,
    pub expires_at: DateTime<Utc>,
    pub used: bool,
    pub used_at: Option<DateTime<Utc>>,
    pub request_ip: Option<String>,
    pub request_user_agent: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Append-only auth audit record
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct AuthLogEntry {
    pub id: String,
    pub user_id: Option<String>,
    pub event_type: String,
    pub success: bool,
    pub failure_reason: Option<String>,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
    /// Free-form structured payload, stored as JSON text
    pub event_details: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Server-tracked session record
///
/// Tokens themselves are stateless; this row exists only for logout and for
/// bulk invalidation on password reset.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct SessionRecord {
    pub id: String,
    pub user_id: String,
    pub remember_me: bool,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}
