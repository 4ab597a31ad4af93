/// Authentication and password endpoints
use crate::{
    account::NewAccount,
    api::middleware::{request_meta, CurrentUser},
    context::AppContext,
    db::models::User,
    error::{CrmResult, ErrorResponse},
    rate_limit::{self, compound_key, RateLimitDecision},
    session::{self, SessionState},
};
use axum::{
    extract::State,
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

pub fn routes() -> Router<Arc<AppContext>> {
    Router::new()
        .route("/auth/register", post(register))
        .route("/auth/login", post(login))
        .route("/auth/logout", post(logout))
        .route("/auth/me", get(me))
        .route("/auth/forgot-password", post(forgot_password))
        .route("/auth/reset-password", post(reset_password))
        .route("/auth/change-password", post(change_password))
}

#[derive(Debug, Deserialize)]
pub struct RegisterRequest {
    pub email: String,
    pub password: String,
    pub full_name: String,
}

#[derive(Debug, Serialize)]
pub struct RegisterResponse {
    pub success: bool,
    pub message: String,
    pub user: User,
}

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
    #[serde(default)]
    pub remember_me: bool,
}

#[derive(Debug, Serialize)]
pub struct LoginResponse {
    pub success: bool,
    pub token: String,
    #[serde(rename = "expiresAt")]
    pub expires_at: DateTime<Utc>,
    pub user: User,
}

#[derive(Debug, Serialize)]
pub struct MeResponse {
    pub user: User,
    pub session: SessionState,
}

#[derive(Debug, Deserialize)]
pub struct ForgotPasswordRequest {
    pub email: String,
}

#[derive(Debug, Deserialize)]
pub struct ResetPasswordRequest {
    pub token: String,
    pub new_password: String,
}

#[derive(Debug, Deserialize)]
pub struct ChangePasswordRequest {
    pub current_password: String,
    pub new_password: String,
}

#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub success: bool,
    pub message: String,
}

async fn register(
    State(ctx): State<Arc<AppContext>>,
    Json(req): Json<RegisterRequest>,
) -> CrmResult<(StatusCode, Json<RegisterResponse>)> {
    let user = ctx
        .accounts
        .create_account(NewAccount {
            email: req.email,
            password: req.password,
            full_name: req.full_name,
        })
        .await?;

    Ok((
        StatusCode::CREATED,
        Json(RegisterResponse {
            success: true,
            message: "Account created, please verify your email address".to_string(),
            user,
        }),
    ))
}

async fn login(
    State(ctx): State<Arc<AppContext>>,
    headers: HeaderMap,
    Json(req): Json<LoginRequest>,
) -> Result<Json<LoginResponse>, Response> {
    let (ip, user_agent) = request_meta(&headers);

    let key = compound_key("login", &[ip.as_deref().unwrap_or("unknown")]);
    let decision = ctx.rate_limiter.check(&key, &rate_limit::LOGIN);
    if !decision.allowed {
        return Err(rate_limited_response(&decision));
    }

    let success = ctx
        .accounts
        .login(
            &req.email,
            &req.password,
            req.remember_me,
            ip.as_deref(),
            user_agent.as_deref(),
        )
        .await
        .map_err(|e| e.into_response())?;

    Ok(Json(LoginResponse {
        success: true,
        token: success.token,
        expires_at: success.expires_at,
        user: success.user,
    }))
}

async fn logout(
    State(ctx): State<Arc<AppContext>>,
    current: CurrentUser,
    headers: HeaderMap,
) -> CrmResult<Json<StatusResponse>> {
    let (ip, user_agent) = request_meta(&headers);

    ctx.accounts
        .logout(
            &current.user.id,
            &current.claims.jti,
            ip.as_deref(),
            user_agent.as_deref(),
        )
        .await?;

    Ok(Json(StatusResponse {
        success: true,
        message: "Logged out".to_string(),
    }))
}

async fn me(State(_ctx): State<Arc<AppContext>>, current: CurrentUser) -> Json<MeResponse> {
    let state = session::session_state(&current.user, false, Utc::now());

    Json(MeResponse {
        user: current.user,
        session: state,
    })
}

/// Start a password reset.
///
/// Rate limited by email plus ip before any lookup runs, and the success
/// message never reveals whether the address exists.
async fn forgot_password(
    State(ctx): State<Arc<AppContext>>,
    headers: HeaderMap,
    Json(req): Json<ForgotPasswordRequest>,
) -> Result<Json<StatusResponse>, Response> {
    let (ip, user_agent) = request_meta(&headers);

    ctx.accounts
        .validate_email(&req.email)
        .map_err(|e| e.into_response())?;

    let key = compound_key(
        "password-reset",
        &[&req.email, ip.as_deref().unwrap_or("unknown")],
    );
    let decision = ctx.rate_limiter.check(&key, &rate_limit::PASSWORD_RESET);
    if !decision.allowed {
        return Err(rate_limited_response(&decision));
    }

    ctx.passwords
        .request_reset(&req.email, ip.as_deref(), user_agent.as_deref())
        .await
        .map_err(|e| e.into_response())?;

    Ok(Json(StatusResponse {
        success: true,
        message: "If an account exists for that address, a reset email has been sent".to_string(),
    }))
}

async fn reset_password(
    State(ctx): State<Arc<AppContext>>,
    headers: HeaderMap,
    Json(req): Json<ResetPasswordRequest>,
) -> CrmResult<Json<StatusResponse>> {
    let (ip, user_agent) = request_meta(&headers);

    ctx.passwords
        .complete_reset(
            &req.token,
            &req.new_password,
            ip.as_deref(),
            user_agent.as_deref(),
        )
        .await?;

    Ok(Json(StatusResponse {
        success: true,
        message: "Password has been reset, please log in".to_string(),
    }))
}

async fn change_password(
    State(ctx): State<Arc<AppContext>>,
    current: CurrentUser,
    headers: HeaderMap,
    Json(req): Json<ChangePasswordRequest>,
) -> CrmResult<Json<StatusResponse>> {
    let (ip, user_agent) = request_meta(&headers);

    ctx.passwords
        .change_password(
            &current.user.id,
            &req.current_password,
            &req.new_password,
            ip.as_deref(),
            user_agent.as_deref(),
        )
        .await?;

    Ok(Json(StatusResponse {
        success: true,
        message: "Password changed".to_string(),
    }))
}

/// 429 with rate limit headers plus the shared JSON error body
fn rate_limited_response(decision: &RateLimitDecision) -> Response {
    let retry_after = decision.retry_after(Utc::now());
    let body = ErrorResponse {
        retry_after: Some(retry_after),
        ..ErrorResponse::new(
            "RATE_LIMITED",
            "Too many requests, please try again later".to_string(),
        )
    };

    let mut response = (StatusCode::TOO_MANY_REQUESTS, Json(body)).into_response();
    let headers = response.headers_mut();
    headers.insert("X-RateLimit-Limit", decision.limit.into());
    headers.insert("X-RateLimit-Remaining", decision.remaining.into());
    headers.insert("X-RateLimit-Reset", decision.reset_at.timestamp().into());
    headers.insert("Retry-After", retry_after.into());

    response
}
