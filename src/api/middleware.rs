/// Authentication middleware and extractors
use crate::{
    context::AppContext,
    error::{CrmError, ErrorResponse},
    session::SessionDenial,
    token::{self, SessionClaims, TokenError},
};
use axum::{
    async_trait,
    extract::FromRequestParts,
    http::{request::Parts, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use std::sync::Arc;

/// Extract bearer token from the Authorization header
pub fn extract_bearer_token(headers: &HeaderMap) -> Result<String, TokenError> {
    let Some(value) = headers.get("authorization") else {
        return Err(TokenError::Missing);
    };

    let value = value.to_str().map_err(|_| TokenError::InvalidFormat)?;
    token::token_from_header_value(value)
        .map(|t| t.to_string())
        .ok_or(TokenError::InvalidFormat)
}

/// Client ip and user agent for audit logging
pub fn request_meta(headers: &HeaderMap) -> (Option<String>, Option<String>) {
    let ip = headers
        .get("x-forwarded-for")
        .and_then(|h| h.to_str().ok())
        .and_then(|s| s.split(',').next())
        .map(|s| s.trim().to_string());

    let user_agent = headers
        .get("user-agent")
        .and_then(|h| h.to_str().ok())
        .map(|s| s.to_string());

    (ip, user_agent)
}

/// Map a session denial to its 401 JSON response
pub fn denial_response(denial: SessionDenial) -> Response {
    let body = ErrorResponse {
        locked_until: denial.locked_until,
        ..ErrorResponse::new(denial.code.as_str(), denial.message)
    };
    (StatusCode::UNAUTHORIZED, Json(body)).into_response()
}

/// Authenticated user, extracted from the bearer token.
///
/// Verifies the token signature and expiration, then re-checks account state
/// so a locked, deactivated, or deleted account is refused even while its
/// token is still cryptographically valid.
pub struct CurrentUser {
    pub user: crate::db::models::User,
    pub claims: SessionClaims,
}

#[async_trait]
impl FromRequestParts<Arc<AppContext>> for CurrentUser {
    type Rejection = Response;

    async fn from_request_parts(
        parts: &mut Parts,
        ctx: &Arc<AppContext>,
    ) -> Result<Self, Self::Rejection> {
        let token = extract_bearer_token(&parts.headers)
            .map_err(|e| CrmError::from(e).into_response())?;

        let claims = ctx
            .accounts
            .token_issuer()
            .verify(&token)
            .map_err(|e| CrmError::from(e).into_response())?;

        let check = ctx.sessions.validate(&claims.sub).await;
        match (check.valid, check.user, check.error) {
            (true, Some(user), _) => Ok(CurrentUser { user, claims }),
            (_, _, Some(denial)) => Err(denial_response(denial)),
            _ => Err(CrmError::Authentication("Session could not be validated".to_string())
                .into_response()),
        }
    }
}
