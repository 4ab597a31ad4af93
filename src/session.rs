/// Per-request session validation
///
/// Tokens are stateless, so holding one proves nothing about the account's
/// current standing. Every authenticated request re-checks the user row here;
/// the ordered checks below decide which denial surfaces when several apply.
use crate::{
    account::AccountManager,
    db::models::{AccountStatus, User},
};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;

/// Machine-readable denial codes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum DenialCode {
    /// Also covers soft-deleted accounts; deletion is never revealed
    #[serde(rename = "USER_NOT_FOUND")]
    UserNotFound,
    /// Also covers unverified email; callers see the two identically
    #[serde(rename = "ACCOUNT_DEACTIVATED")]
    AccountDeactivated,
    #[serde(rename = "ACCOUNT_LOCKED")]
    AccountLocked,
    /// Generic failure for infrastructure errors during validation
    #[serde(rename = "INVALID_TOKEN")]
    InvalidToken,
}

impl DenialCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            DenialCode::UserNotFound => "USER_NOT_FOUND",
            DenialCode::AccountDeactivated => "ACCOUNT_DEACTIVATED",
            DenialCode::AccountLocked => "ACCOUNT_LOCKED",
            DenialCode::InvalidToken => "INVALID_TOKEN",
        }
    }
}

/// A session denial with its user-facing message
#[derive(Debug, Clone, Serialize)]
pub struct SessionDenial {
    pub code: DenialCode,
    pub message: String,
    #[serde(rename = "lockedUntil", skip_serializing_if = "Option::is_none")]
    pub locked_until: Option<DateTime<Utc>>,
}

impl SessionDenial {
    fn new(code: DenialCode, message: &str) -> Self {
        Self {
            code,
            message: message.to_string(),
            locked_until: None,
        }
    }
}

/// Result of validating a session's user id
#[derive(Debug, Clone)]
pub struct SessionCheck {
    pub valid: bool,
    pub user: Option<User>,
    pub error: Option<SessionDenial>,
}

impl SessionCheck {
    fn denied(denial: SessionDenial) -> Self {
        Self {
            valid: false,
            user: None,
            error: Some(denial),
        }
    }
}

/// Display-level classification of a session
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "lowercase")]
pub enum SessionState {
    Active,
    Expired,
    Revoked { reason: String },
    Invalid,
}

/// Session validator service
#[derive(Clone)]
pub struct SessionValidator {
    accounts: Arc<AccountManager>,
}

impl SessionValidator {
    pub fn new(accounts: Arc<AccountManager>) -> Self {
        Self { accounts }
    }

    /// Re-check account state for a user id taken from a validated token.
    ///
    /// Infrastructure failures are collapsed into a generic `INVALID_TOKEN`
    /// denial; this never surfaces a raw database error to the caller.
    pub async fn validate(&self, user_id: &str) -> SessionCheck {
        let user = match self.accounts.get_user(user_id).await {
            Ok(user) => user,
            Err(e) => {
                tracing::error!(user_id, "Session validation query failed: {}", e);
                return SessionCheck::denied(SessionDenial::new(
                    DenialCode::InvalidToken,
                    "Session could not be validated",
                ));
            }
        };

        // get_user already excludes soft-deleted rows, so deleted and
        // nonexistent accounts fall through the same arm.
        let Some(user) = user else {
            return SessionCheck::denied(SessionDenial::new(
                DenialCode::UserNotFound,
                "User not found",
            ));
        };

        match account_denial(&user, Utc::now()) {
            Some(denial) => SessionCheck::denied(denial),
            None => SessionCheck {
                valid: true,
                user: Some(user),
                error: None,
            },
        }
    }
}

/// Ordered account-state checks, first match wins.
///
/// Precedence: deactivated > locked > unverified. (Deleted accounts never
/// reach here; lookups exclude them so they present as not-found.)
pub fn account_denial(user: &User, now: DateTime<Utc>) -> Option<SessionDenial> {
    if user.is_deleted {
        return Some(SessionDenial::new(
            DenialCode::UserNotFound,
            "User not found",
        ));
    }

    if user.account_status == AccountStatus::Deactivated {
        return Some(SessionDenial::new(
            DenialCode::AccountDeactivated,
            "Account is deactivated",
        ));
    }

    if user.is_locked(now) {
        let locked_until = user.locked_until.unwrap_or(now);
        return Some(SessionDenial {
            locked_until: Some(locked_until),
            ..SessionDenial::new(
                DenialCode::AccountLocked,
                &format!(
                    "Account is locked for {}",
                    lock_expiration_text(locked_until, now)
                ),
            )
        });
    }

    if !user.email_verified {
        return Some(SessionDenial::new(
            DenialCode::AccountDeactivated,
            "Account is deactivated",
        ));
    }

    None
}

/// Pure projection of the same ordered logic for display purposes
pub fn session_state(user: &User, token_expired: bool, now: DateTime<Utc>) -> SessionState {
    if token_expired {
        return SessionState::Expired;
    }

    match account_denial(user, now) {
        None => SessionState::Active,
        Some(denial) => match denial.code {
            DenialCode::UserNotFound | DenialCode::InvalidToken => SessionState::Invalid,
            DenialCode::AccountDeactivated | DenialCode::AccountLocked => SessionState::Revoked {
                reason: denial.message,
            },
        },
    }
}

/// Human-readable remaining lock duration, rounding down.
///
/// "now" is reserved for locks that have already passed; a still-active lock
/// under a minute out reads "0 minute(s)".
pub fn lock_expiration_text(locked_until: DateTime<Utc>, now: DateTime<Utc>) -> String {
    if locked_until <= now {
        return "now".to_string();
    }

    let remaining = locked_until - now;
    let minutes = remaining.num_minutes();

    if minutes < 60 {
        format!("{} minute(s)", minutes)
    } else {
        format!("{} hour(s)", remaining.num_hours())
    }
}
