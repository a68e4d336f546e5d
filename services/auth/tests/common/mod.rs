//! Shared helpers for the HTTP integration tests.
//!
//! The app is built exactly as in `main.rs` but over the in-memory store, so
//! the tests exercise the full middleware stack without a database.

#![allow(dead_code)]

use std::sync::Arc;

use axum::Router;
use axum::body::{Body, to_bytes};
use axum::http::{Request, Response, header};
use serde_json::Value;
use tower::ServiceExt;

use flow_auth::config::{LockoutPolicy, ServerConfig, Settings};
use flow_auth::jwt::JwtConfig;
use flow_auth::password::HasherConfig;
use flow_auth::repositories::MemoryAuthStore;
use flow_auth::validation::PasswordPolicy;
use flow_auth::{AppState, build_app};
use flow_common::telemetry::LogConfig;

pub const PASSWORD: &str = "Secr3t!A";

/// Settings with cheap hashing and a fixed secret.
pub fn test_settings() -> Settings {
    Settings {
        server: ServerConfig {
            environment: "test".to_string(),
            ..ServerConfig::default()
        },
        jwt: JwtConfig::with_secret("integration-test-secret"),
        password_policy: PasswordPolicy::default(),
        hasher: HasherConfig {
            memory_kib: 1024,
            iterations: 1,
            parallelism: 1,
        },
        lockout: LockoutPolicy::default(),
        log: LogConfig::default(),
    }
}

/// Build the full application router over a fresh in-memory store.
///
/// The store handle is returned so tests can read tokens that the API never
/// exposes (verification and reset tokens are delivered out of band).
pub fn build_test_app() -> (Router, MemoryAuthStore) {
    let store = MemoryAuthStore::new();
    let state = AppState::new(test_settings(), Arc::new(store.clone()))
        .expect("test settings should be valid");
    (build_app(state), store)
}

pub async fn send(app: &Router, request: Request<Body>) -> Response<Body> {
    app.clone()
        .oneshot(request)
        .await
        .expect("router should not fail")
}

pub async fn get(app: &Router, uri: &str) -> Response<Body> {
    send(app, Request::get(uri).body(Body::empty()).unwrap()).await
}

pub async fn get_auth(app: &Router, uri: &str, token: &str) -> Response<Body> {
    let request = Request::get(uri)
        .header(header::AUTHORIZATION, format!("Bearer {token}"))
        .body(Body::empty())
        .unwrap();
    send(app, request).await
}

pub async fn post_json(app: &Router, uri: &str, body: Value) -> Response<Body> {
    let request = Request::post(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap();
    send(app, request).await
}

pub async fn post_json_auth(app: &Router, uri: &str, token: &str, body: Value) -> Response<Body> {
    let request = Request::post(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .header(header::AUTHORIZATION, format!("Bearer {token}"))
        .body(Body::from(body.to_string()))
        .unwrap();
    send(app, request).await
}

pub async fn body_json(response: Response<Body>) -> Value {
    let bytes = to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("body should be readable");
    serde_json::from_slice(&bytes).expect("body should be JSON")
}
