/// Session token issuing and inspection
///
/// Tokens are stateless HS256 JWTs. Nothing here touches the database; account
/// state is re-checked per request by the session validator, which is what
/// bounds the damage of a token that cannot be revoked.
use crate::{
    config::SecurityConfig,
    db::models::{SubscriptionTier, User},
    error::CrmError,
};
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use chrono::{DateTime, Duration, TimeZone, Utc};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};

/// Clock-skew allowance when verifying and classifying tokens
const LEEWAY_SECS: i64 = 60;

/// Claims carried in a session token
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionClaims {
    /// User id
    pub sub: String,
    pub email: String,
    pub name: String,
    pub tier: SubscriptionTier,
    pub iat: i64,
    pub exp: i64,
    pub remember_me: bool,
    /// Server-side session row id, used for logout
    pub jti: String,
}

/// Why a presented token was rejected. All variants map to 401.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenError {
    /// No token present on the request
    Missing,
    /// Header present but not `Bearer <token>`
    InvalidFormat,
    /// Token present but undecodable or badly signed
    Malformed,
    /// Token was valid once but has expired
    Expired,
}

impl From<TokenError> for CrmError {
    fn from(err: TokenError) -> Self {
        match err {
            TokenError::Missing => {
                CrmError::Authentication("Missing authorization token".to_string())
            }
            TokenError::InvalidFormat => {
                CrmError::Authentication("Malformed authorization header".to_string())
            }
            TokenError::Malformed => CrmError::Authentication("Invalid token".to_string()),
            TokenError::Expired => {
                CrmError::Authentication("Token has expired, please log in again".to_string())
            }
        }
    }
}

/// Which lifetime policy a token was issued under
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenLifetime {
    Default,
    Extended,
    Unknown,
}

/// Issues and verifies session tokens
#[derive(Clone)]
pub struct TokenIssuer {
    secret: String,
    default_days: i64,
    extended_days: i64,
}

impl TokenIssuer {
    pub fn new(security: &SecurityConfig) -> Self {
        Self {
            secret: security.jwt_secret.clone(),
            default_days: security.jwt_default_days,
            extended_days: security.jwt_extended_days,
        }
    }

    /// Expiration timestamp for a token issued now
    pub fn expiration_for(&self, remember_me: bool) -> DateTime<Utc> {
        let days = if remember_me {
            self.extended_days
        } else {
            self.default_days
        };
        Utc::now() + Duration::days(days)
    }

    /// Sign a session token for the given user
    pub fn issue(
        &self,
        user: &User,
        remember_me: bool,
        session_id: &str,
    ) -> Result<(String, DateTime<Utc>), CrmError> {
        let now = Utc::now();
        let expires_at = self.expiration_for(remember_me);

        let claims = SessionClaims {
            sub: user.id.clone(),
            email: user.email.clone(),
            name: user.full_name.clone(),
            tier: user.subscription_tier,
            iat: now.timestamp(),
            exp: expires_at.timestamp(),
            remember_me,
            jti: session_id.to_string(),
        };

        let token = encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(self.secret.as_bytes()),
        )
        .map_err(|e| CrmError::Jwt(format!("Failed to sign token: {}", e)))?;

        Ok((token, expires_at))
    }

    /// Verify signature and expiration, with clock-skew leeway
    pub fn verify(&self, token: &str) -> Result<SessionClaims, TokenError> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.leeway = LEEWAY_SECS as u64;

        decode::<SessionClaims>(
            token,
            &DecodingKey::from_secret(self.secret.as_bytes()),
            &validation,
        )
        .map(|data| data.claims)
        .map_err(|e| match e.kind() {
            jsonwebtoken::errors::ErrorKind::ExpiredSignature => TokenError::Expired,
            _ => TokenError::Malformed,
        })
    }

    /// Does the (exp - iat) lifetime match the default or extended policy?
    pub fn classify(&self, claims: &SessionClaims) -> TokenLifetime {
        let lifetime = claims.exp - claims.iat;
        let default = self.default_days * 86_400;
        let extended = self.extended_days * 86_400;

        if (lifetime - default).abs() <= LEEWAY_SECS {
            TokenLifetime::Default
        } else if (lifetime - extended).abs() <= LEEWAY_SECS {
            TokenLifetime::Extended
        } else {
            TokenLifetime::Unknown
        }
    }
}

/// Pull the bearer token out of an Authorization header value.
///
/// Returns `None` unless the value is exactly `Bearer <non-empty token>`.
pub fn token_from_header_value(value: &str) -> Option<&str> {
    let token = value.strip_prefix("Bearer ")?;
    if token.is_empty() {
        None
    } else {
        Some(token)
    }
}

/// Decode the middle segment of a three-part token as base64url JSON without
/// verifying the signature. Any malformed input yields `None`.
pub fn parse_payload(token: &str) -> Option<serde_json::Value> {
    let mut segments = token.split('.');
    let (_header, payload, _sig) = (segments.next()?, segments.next()?, segments.next()?);
    if segments.next().is_some() {
        return None;
    }

    let bytes = URL_SAFE_NO_PAD.decode(payload).ok()?;
    serde_json::from_slice(&bytes).ok()
}

/// True iff the payload's `exp` is at or before the current time
pub fn is_expired(payload: &serde_json::Value) -> bool {
    match payload.get("exp").and_then(|v| v.as_i64()) {
        Some(exp) => match Utc.timestamp_opt(exp, 0).single() {
            Some(when) => when <= Utc::now(),
            None => true,
        },
        None => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ServerConfig;
    use crate::db::models::AccountStatus;

    fn test_user() -> User {
        let now = Utc::now();
        User {
            id: "user-1".to_string(),
            email: "agent@example.com".to_string(),
            password_hash: "hash".to_string(),
            full_name: "Avery Agent".to_string(),
            email_verified: true,
            account_status: AccountStatus::Active,
            subscription_tier: SubscriptionTier::Pro,
            trial_expires_at: None,
            failed_login_count: 0,
            locked_until: None,
            is_deleted: false,
            created_at: now,
            updated_at: now,
        }
    }

    fn issuer() -> TokenIssuer {
        TokenIssuer::new(&ServerConfig::for_tests().security)
    }

    #[test]
    fn test_issue_and_verify_roundtrip() {
        let issuer = issuer();
        let (token, expires_at) = issuer.issue(&test_user(), false, "sess-1").unwrap();

        let claims = issuer.verify(&token).unwrap();
        assert_eq!(claims.sub, "user-1");
        assert_eq!(claims.email, "agent@example.com");
        assert_eq!(claims.jti, "sess-1");
        assert!(!claims.remember_me);
        assert_eq!(claims.exp, expires_at.timestamp());
    }

    #[test]
    fn test_expiration_for_policies() {
        let issuer = issuer();
        let now = Utc::now();

        let default = issuer.expiration_for(false) - now;
        let extended = issuer.expiration_for(true) - now;
        assert!((default.num_seconds() - 3 * 86_400).abs() <= 2);
        assert!((extended.num_seconds() - 30 * 86_400).abs() <= 2);
    }

    #[test]
    fn test_classify_lifetimes() {
        let issuer = issuer();

        let (default_token, _) = issuer.issue(&test_user(), false, "s").unwrap();
        let (extended_token, _) = issuer.issue(&test_user(), true, "s").unwrap();

        let default_claims = issuer.verify(&default_token).unwrap();
        let extended_claims = issuer.verify(&extended_token).unwrap();
        assert_eq!(issuer.classify(&default_claims), TokenLifetime::Default);
        assert_eq!(issuer.classify(&extended_claims), TokenLifetime::Extended);

        let mut odd = default_claims;
        odd.exp = odd.iat + 12_345;
        assert_eq!(issuer.classify(&odd), TokenLifetime::Unknown);
    }

    #[test]
    fn test_verify_rejects_garbage() {
        let issuer = issuer();
        assert_eq!(issuer.verify("not-a-token"), Err(TokenError::Malformed));
        assert_eq!(issuer.verify(""), Err(TokenError::Malformed));
    }

    #[test]
    fn test_verify_rejects_wrong_secret() {
        let issuer = issuer();
        let (token, _) = issuer.issue(&test_user(), false, "s").unwrap();

        let mut other_config = ServerConfig::for_tests().security;
        other_config.jwt_secret = "a-completely-different-secret-0123456789".to_string();
        let other = TokenIssuer::new(&other_config);
        assert_eq!(other.verify(&token), Err(TokenError::Malformed));
    }

    #[test]
    fn test_token_from_header_value() {
        assert_eq!(token_from_header_value("Bearer abc"), Some("abc"));
        assert_eq!(token_from_header_value("Bearer "), None);
        assert_eq!(token_from_header_value("Basic abc"), None);
        assert_eq!(token_from_header_value(""), None);
    }

    #[test]
    fn test_parse_payload_roundtrip() {
        let issuer = issuer();
        let (token, _) = issuer.issue(&test_user(), true, "sess-9").unwrap();

        let payload = parse_payload(&token).unwrap();
        assert_eq!(payload["sub"], "user-1");
        assert_eq!(payload["remember_me"], true);
        assert!(!is_expired(&payload));
    }

    #[test]
    fn test_parse_payload_malformed_inputs() {
        assert!(parse_payload("").is_none());
        assert!(parse_payload("one.two").is_none());
        assert!(parse_payload("a.b.c.d").is_none());
        assert!(parse_payload("x.!!!not-base64!!!.y").is_none());

        // Valid base64 but not JSON
        let not_json = URL_SAFE_NO_PAD.encode(b"hello");
        assert!(parse_payload(&format!("a.{}.c", not_json)).is_none());
    }

    #[test]
    fn test_is_expired() {
        let past = serde_json::json!({ "exp": Utc::now().timestamp() - 10 });
        let future = serde_json::json!({ "exp": Utc::now().timestamp() + 1000 });
        let missing = serde_json::json!({});

        assert!(is_expired(&past));
        assert!(!is_expired(&future));
        assert!(is_expired(&missing));
    }
}
