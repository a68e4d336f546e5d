//! Middleware for bearer authentication, response hardening and error bodies

use axum::{
    body::Body,
    extract::State,
    http::{HeaderValue, Request, header},
    middleware::Next,
    response::Response,
};
use axum_extra::headers::{Authorization, HeaderMapExt, authorization::Bearer};
use serde_json::json;

use crate::AppState;
use crate::config::ServerConfig;
use crate::error::{AuthError, ErrorBody};
use crate::jwt::Claims;

/// Identity of the caller, placed in request extensions by [`auth_middleware`]
#[derive(Debug, Clone)]
pub struct AuthUser {
    pub user_id: i64,
    pub claims: Claims,
}

/// Extract and validate the access token from the Authorization header
pub async fn auth_middleware(
    State(state): State<AppState>,
    mut req: Request<Body>,
    next: Next,
) -> Result<Response, AuthError> {
    let Authorization(bearer) = req
        .headers()
        .typed_get::<Authorization<Bearer>>()
        .ok_or_else(|| AuthError::authentication("Missing or malformed bearer token"))?;

    let claims = state.auth_service.authorize(bearer.token())?;
    let user_id = claims.user_id()?;

    req.extensions_mut().insert(AuthUser { user_id, claims });

    Ok(next.run(req).await)
}

/// Add browser security headers to every response
///
/// `Strict-Transport-Security` is only sent when HSTS is enabled, since it
/// is meaningless (and sticky) without TLS in front of the service.
pub async fn security_headers_middleware(
    State(config): State<ServerConfig>,
    req: Request<Body>,
    next: Next,
) -> Response {
    let mut response = next.run(req).await;

    if !config.secure_headers {
        return response;
    }

    let headers = response.headers_mut();
    headers.insert(
        header::CONTENT_SECURITY_POLICY,
        HeaderValue::from_static("default-src 'none'; frame-ancestors 'none'"),
    );
    headers.insert(header::X_FRAME_OPTIONS, HeaderValue::from_static("DENY"));
    headers.insert(
        header::X_CONTENT_TYPE_OPTIONS,
        HeaderValue::from_static("nosniff"),
    );
    headers.insert(
        header::REFERRER_POLICY,
        HeaderValue::from_static("strict-origin-when-cross-origin"),
    );
    headers.insert(
        header::CACHE_CONTROL,
        HeaderValue::from_static("no-store"),
    );

    if config.enable_hsts {
        headers.insert(
            header::STRICT_TRANSPORT_SECURITY,
            HeaderValue::from_static("max-age=31536000; includeSubDomains"),
        );
    }

    response
}

/// Wrap error responses with the request path and method
///
/// Only responses produced by [`AuthError`] are rewritten; they carry an
/// [`ErrorBody`] in their extensions.
pub async fn error_envelope(req: Request<Body>, next: Next) -> Response {
    let method = req.method().to_string();
    let path = req.uri().path().to_string();

    let response = next.run(req).await;

    let Some(error) = response.extensions().get::<ErrorBody>().cloned() else {
        return response;
    };

    let body = json!({
        "error": error,
        "path": path,
        "method": method,
    });

    let (mut parts, _) = response.into_parts();
    parts.headers.remove(header::CONTENT_LENGTH);
    parts.headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("application/json"),
    );

    Response::from_parts(parts, Body::from(body.to_string()))
}
