//! Flow authentication service
//!
//! Account registration, credential login with lockout, JWT access/refresh
//! tokens, session bookkeeping, email verification and password reset,
//! served over HTTP with axum.

pub mod config;
pub mod error;
pub mod jwt;
pub mod middleware;
pub mod models;
pub mod password;
pub mod repositories;
pub mod routes;
pub mod service;
pub mod validation;

use anyhow::Result;
use axum::{
    Router,
    http::{
        HeaderName, HeaderValue, Method,
        header::{AUTHORIZATION, CONTENT_TYPE},
    },
    middleware as axum_middleware,
};
use std::sync::Arc;
use std::time::Duration;
use tower_http::cors::{Any, CorsLayer};
use tower_http::request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer};
use tower_http::trace::{DefaultMakeSpan, DefaultOnResponse, TraceLayer};
use tracing::{Level, warn};

use crate::config::{ServerConfig, Settings};
use crate::jwt::JwtService;
use crate::password::CredentialHasher;
use crate::repositories::AuthStore;
use crate::service::AuthService;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub auth_service: AuthService,
    pub settings: Arc<Settings>,
}

impl AppState {
    /// Wire the service graph from settings and a store
    pub fn new(settings: Settings, store: Arc<dyn AuthStore>) -> Result<Self> {
        let hasher = CredentialHasher::new(&settings.hasher)?;
        let jwt_service = JwtService::new(settings.jwt.clone());

        let auth_service = AuthService::new(
            store,
            jwt_service,
            hasher,
            settings.password_policy.clone(),
            settings.lockout,
        );

        Ok(Self {
            auth_service,
            settings: Arc::new(settings),
        })
    }
}

/// Build the full application: routes plus the middleware stack.
///
/// Layers apply bottom-up: request ids are assigned first, then tracing,
/// CORS, security headers and finally the error envelope closest to the
/// handlers.
pub fn build_app(state: AppState) -> Router {
    let server = state.settings.server.clone();
    let cors = build_cors_layer(&server);
    let request_id_header = HeaderName::from_static("x-request-id");

    routes::create_router(state)
        .layer(axum_middleware::from_fn(middleware::error_envelope))
        .layer(axum_middleware::from_fn_with_state(
            server,
            middleware::security_headers_middleware,
        ))
        .layer(cors)
        .layer(PropagateRequestIdLayer::new(request_id_header.clone()))
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
                .on_response(DefaultOnResponse::new().level(Level::INFO)),
        )
        .layer(SetRequestIdLayer::new(request_id_header, MakeRequestUuid))
}

/// Build the CORS layer; an empty origin list allows any origin without
/// credentials.
pub fn build_cors_layer(config: &ServerConfig) -> CorsLayer {
    let base = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([CONTENT_TYPE, AUTHORIZATION])
        .max_age(Duration::from_secs(3600));

    if config.cors_origins.is_empty() {
        return base.allow_origin(Any);
    }

    let origins: Vec<HeaderValue> = config
        .cors_origins
        .iter()
        .filter_map(|origin| match origin.parse() {
            Ok(value) => Some(value),
            Err(e) => {
                warn!(origin = %origin, error = %e, "Ignoring invalid CORS origin");
                None
            }
        })
        .collect();

    base.allow_origin(origins).allow_credentials(true)
}
