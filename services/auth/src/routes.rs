//! Authentication service routes

use axum::{
    Extension, Json, Router,
    body::Bytes,
    extract::{ConnectInfo, State},
    http::{HeaderMap, StatusCode},
    middleware,
    response::IntoResponse,
    routing::{get, post},
};
use axum_extra::extract::WithRejection;
use axum_extra::headers::{HeaderMapExt, UserAgent};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::net::SocketAddr;
use tracing::{debug, info};
use uuid::Uuid;

use crate::{
    AppState,
    error::AuthError,
    jwt::TokenPair,
    middleware::{AuthUser, auth_middleware},
    models::{Session, User, UserRole, UserStatus},
    service::{ClientInfo, RegisterInput},
};

/// Request body for registration
#[derive(Debug, Deserialize)]
pub struct RegisterRequest {
    pub email: String,
    pub password: String,
    pub first_name: String,
    pub last_name: String,
    #[serde(default)]
    pub organization_name: Option<String>,
}

/// Public view of a user; lockout and reset bookkeeping stay server side
#[derive(Debug, Serialize)]
pub struct UserResponse {
    pub id: i64,
    pub uuid: Uuid,
    pub email: String,
    pub first_name: String,
    pub last_name: String,
    pub full_name: Option<String>,
    pub role: UserRole,
    pub status: UserStatus,
    pub email_verified: bool,
    pub organization_id: Option<i64>,
    pub avatar_url: Option<String>,
    pub created_at: DateTime<Utc>,
    pub last_login_at: Option<DateTime<Utc>>,
}

impl From<&User> for UserResponse {
    fn from(user: &User) -> Self {
        Self {
            id: user.id,
            uuid: user.uuid,
            email: user.email.clone(),
            first_name: user.first_name.clone(),
            last_name: user.last_name.clone(),
            full_name: user.full_name.clone(),
            role: user.role,
            status: user.status,
            email_verified: user.email_verified,
            organization_id: user.organization_id,
            avatar_url: user.avatar_url.clone(),
            created_at: user.timestamps.created_at,
            last_login_at: user.last_login_at,
        }
    }
}

/// Registration response; tokens are withheld until the email is verified
#[derive(Serialize)]
pub struct RegisterResponse {
    pub user: UserResponse,
    pub tokens: Option<TokenPair>,
}

/// Request body for login
#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

/// Response for a successful login
#[derive(Serialize)]
pub struct LoginResponse {
    pub user: UserResponse,
    pub tokens: TokenPair,
    /// Identifies the session for a targeted logout
    pub session_token: String,
}

/// Request for token refresh
#[derive(Debug, Deserialize)]
pub struct RefreshTokenRequest {
    pub refresh_token: String,
}

/// Optional logout body; without a session token every session is revoked
#[derive(Debug, Default, Deserialize)]
pub struct LogoutRequest {
    #[serde(default)]
    pub session_token: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct VerifyEmailRequest {
    pub token: String,
}

#[derive(Debug, Deserialize)]
pub struct PasswordResetRequest {
    pub email: String,
}

#[derive(Debug, Deserialize)]
pub struct PasswordResetConfirmRequest {
    pub token: String,
    pub new_password: String,
}

#[derive(Serialize)]
pub struct SessionsResponse {
    pub sessions: Vec<Session>,
}

/// Plain acknowledgement
#[derive(Debug, Serialize)]
pub struct MessageResponse {
    pub message: String,
    pub success: bool,
}

impl MessageResponse {
    fn ok(message: &str) -> Json<Self> {
        Json(Self {
            message: message.to_string(),
            success: true,
        })
    }
}

type JsonBody<T> = WithRejection<Json<T>, AuthError>;

/// Create the router for the authentication service
pub fn create_router(state: AppState) -> Router {
    let protected = Router::new()
        .route("/auth/logout", post(logout))
        .route("/auth/me", get(me))
        .route("/auth/sessions", get(list_sessions))
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            auth_middleware,
        ));

    let public = Router::new()
        .route("/auth/register", post(register))
        .route("/auth/login", post(login))
        .route("/auth/refresh", post(refresh_token))
        .route("/auth/verify-email", post(verify_email))
        .route("/auth/password-reset-request", post(password_reset_request))
        .route("/auth/password-reset-confirm", post(password_reset_confirm))
        .route("/auth/health", get(auth_health));

    Router::new()
        .route("/health", get(health_check))
        .nest("/api/v1", public.merge(protected))
        .fallback(not_found)
        .with_state(state)
}

/// Service health endpoint
pub async fn health_check(State(state): State<AppState>) -> impl IntoResponse {
    Json(json!({
        "status": "healthy",
        "service": "flow-auth",
        "version": env!("CARGO_PKG_VERSION"),
        "environment": state.settings.server.environment,
    }))
}

async fn auth_health() -> Json<MessageResponse> {
    MessageResponse::ok("Auth service is healthy")
}

async fn not_found() -> AuthError {
    AuthError::not_found("Route not found")
}

/// User registration endpoint
pub async fn register(
    State(state): State<AppState>,
    WithRejection(Json(payload), _): JsonBody<RegisterRequest>,
) -> Result<impl IntoResponse, AuthError> {
    let user = state
        .auth_service
        .register(RegisterInput {
            email: payload.email,
            password: payload.password,
            first_name: payload.first_name,
            last_name: payload.last_name,
            organization_name: payload.organization_name,
        })
        .await?;

    Ok((
        StatusCode::CREATED,
        Json(RegisterResponse {
            user: UserResponse::from(&user),
            tokens: None,
        }),
    ))
}

/// User login endpoint
pub async fn login(
    State(state): State<AppState>,
    connect_info: Option<ConnectInfo<SocketAddr>>,
    headers: HeaderMap,
    WithRejection(Json(payload), _): JsonBody<LoginRequest>,
) -> Result<impl IntoResponse, AuthError> {
    let client = client_info(&headers, connect_info.map(|ConnectInfo(addr)| addr));

    let outcome = state
        .auth_service
        .authenticate(&payload.email, &payload.password, client)
        .await?;

    Ok(Json(LoginResponse {
        user: UserResponse::from(&outcome.user),
        tokens: outcome.tokens,
        session_token: outcome.session.session_token,
    }))
}

/// Refresh token endpoint
pub async fn refresh_token(
    State(state): State<AppState>,
    WithRejection(Json(payload), _): JsonBody<RefreshTokenRequest>,
) -> Result<Json<TokenPair>, AuthError> {
    let tokens = state.auth_service.refresh(&payload.refresh_token).await?;
    Ok(Json(tokens))
}

/// Logout endpoint
///
/// The body is optional, but one that is present must be a valid
/// [`LogoutRequest`].
pub async fn logout(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthUser>,
    body: Bytes,
) -> Result<Json<MessageResponse>, AuthError> {
    let payload = if body.iter().all(u8::is_ascii_whitespace) {
        LogoutRequest::default()
    } else {
        let Json(payload) = Json::<LogoutRequest>::from_bytes(&body)?;
        payload
    };

    state
        .auth_service
        .logout(auth.user_id, payload.session_token.as_deref())
        .await?;

    Ok(MessageResponse::ok("Successfully logged out"))
}

/// Email verification endpoint
pub async fn verify_email(
    State(state): State<AppState>,
    WithRejection(Json(payload), _): JsonBody<VerifyEmailRequest>,
) -> Result<Json<MessageResponse>, AuthError> {
    state.auth_service.verify_email(&payload.token).await?;
    Ok(MessageResponse::ok("Email verified successfully"))
}

/// Password reset request endpoint
///
/// Answers identically whether or not the email is registered.
pub async fn password_reset_request(
    State(state): State<AppState>,
    WithRejection(Json(payload), _): JsonBody<PasswordResetRequest>,
) -> Result<Json<MessageResponse>, AuthError> {
    match state
        .auth_service
        .request_password_reset(&payload.email)
        .await
    {
        Ok(user) => info!(user_id = user.id, "Password reset token issued"),
        Err(AuthError::NotFound(_)) => debug!("Password reset requested for unknown email"),
        Err(e) => return Err(e),
    }

    Ok(MessageResponse::ok(
        "If the email address is registered, a password reset link has been sent",
    ))
}

/// Password reset confirmation endpoint
pub async fn password_reset_confirm(
    State(state): State<AppState>,
    WithRejection(Json(payload), _): JsonBody<PasswordResetConfirmRequest>,
) -> Result<Json<MessageResponse>, AuthError> {
    state
        .auth_service
        .reset_password(&payload.token, &payload.new_password)
        .await?;

    Ok(MessageResponse::ok("Password has been reset successfully"))
}

/// Current user endpoint
pub async fn me(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthUser>,
) -> Result<Json<UserResponse>, AuthError> {
    let user = state.auth_service.current_user(auth.user_id).await?;
    Ok(Json(UserResponse::from(&user)))
}

/// Active sessions of the current user
pub async fn list_sessions(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthUser>,
) -> Result<Json<SessionsResponse>, AuthError> {
    let sessions = state.auth_service.list_sessions(auth.user_id).await?;
    Ok(Json(SessionsResponse { sessions }))
}

/// Client address and agent for the session record.
///
/// The first `X-Forwarded-For` hop wins over the socket peer address.
fn client_info(headers: &HeaderMap, peer: Option<SocketAddr>) -> ClientInfo {
    let forwarded = headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(String::from);

    ClientInfo {
        ip_address: forwarded.or_else(|| peer.map(|addr| addr.ip().to_string())),
        user_agent: headers
            .typed_get::<UserAgent>()
            .map(|agent| agent.as_str().to_string()),
    }
}
