//! HTTP-level integration tests for the authentication endpoints.

mod common;

use axum::body::Body;
use axum::http::{Request, StatusCode, header};
use serde_json::{Value, json};

use common::{PASSWORD, body_json, get, get_auth, post_json, post_json_auth, send};
use flow_auth::repositories::{AuthStore, MemoryAuthStore};

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn registration(email: &str) -> Value {
    json!({
        "email": email,
        "password": PASSWORD,
        "first_name": "A",
        "last_name": "B",
    })
}

async fn register_and_verify(app: &axum::Router, store: &MemoryAuthStore, email: &str) {
    let response = post_json(app, "/api/v1/auth/register", registration(email)).await;
    assert_eq!(response.status(), StatusCode::CREATED);

    let token = verification_token(store, email).await;
    let response = post_json(app, "/api/v1/auth/verify-email", json!({ "token": token })).await;
    assert_eq!(response.status(), StatusCode::OK);
}

async fn verification_token(store: &MemoryAuthStore, email: &str) -> String {
    store
        .find_user_by_email(email)
        .await
        .unwrap()
        .and_then(|user| user.verification_token)
        .expect("user should hold a verification token")
}

async fn login(app: &axum::Router, email: &str, password: &str) -> Value {
    let response = post_json(
        app,
        "/api/v1/auth/login",
        json!({ "email": email, "password": password }),
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);
    body_json(response).await
}

// ---------------------------------------------------------------------------
// Health
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_health_reports_service_metadata() {
    let (app, _) = common::build_test_app();

    let response = get(&app, "/health").await;
    assert_eq!(response.status(), StatusCode::OK);
    assert!(response.headers().contains_key("x-request-id"));
    assert_eq!(response.headers()["x-content-type-options"], "nosniff");

    let json = body_json(response).await;
    assert_eq!(json["status"], "healthy");
    assert_eq!(json["service"], "flow-auth");
    assert_eq!(json["environment"], "test");
    assert!(json["version"].is_string());
}

#[tokio::test]
async fn test_auth_health() {
    let (app, _) = common::build_test_app();

    let response = get(&app, "/api/v1/auth/health").await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await["success"], true);
}

// ---------------------------------------------------------------------------
// Registration and login
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_register_verify_login_scenario() {
    let (app, store) = common::build_test_app();

    let response = post_json(&app, "/api/v1/auth/register", registration("a@x.com")).await;
    assert_eq!(response.status(), StatusCode::CREATED);
    let json = body_json(response).await;
    assert_eq!(json["user"]["email"], "a@x.com");
    assert_eq!(json["user"]["status"], "pending");
    assert!(json["tokens"].is_null());
    assert!(json["user"].get("password_hash").is_none());
    assert!(json["user"].get("verification_token").is_none());
    let user_id = json["user"]["id"].clone();

    // Unverified accounts cannot log in.
    let response = post_json(
        &app,
        "/api/v1/auth/login",
        json!({ "email": "a@x.com", "password": PASSWORD }),
    )
    .await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    let json = body_json(response).await;
    assert_eq!(json["error"]["code"], "AUTHENTICATION_ERROR");
    assert_eq!(json["path"], "/api/v1/auth/login");
    assert_eq!(json["method"], "POST");

    let token = verification_token(&store, "a@x.com").await;
    let response = post_json(&app, "/api/v1/auth/verify-email", json!({ "token": token })).await;
    assert_eq!(response.status(), StatusCode::OK);

    let json = login(&app, "a@x.com", PASSWORD).await;
    assert_eq!(json["user"]["id"], user_id);
    assert!(!json["tokens"]["access_token"].as_str().unwrap().is_empty());
    assert!(!json["tokens"]["refresh_token"].as_str().unwrap().is_empty());
    assert_eq!(json["tokens"]["token_type"], "bearer");
    assert_eq!(json["tokens"]["expires_in"], 1800);
    assert!(json["session_token"].is_string());
}

#[tokio::test]
async fn test_duplicate_registration_conflicts() {
    let (app, _) = common::build_test_app();

    post_json(&app, "/api/v1/auth/register", registration("a@x.com")).await;
    let response = post_json(&app, "/api/v1/auth/register", registration("A@x.com")).await;

    assert_eq!(response.status(), StatusCode::CONFLICT);
    assert_eq!(body_json(response).await["error"]["code"], "CONFLICT_ERROR");
}

#[tokio::test]
async fn test_weak_password_is_unprocessable() {
    let (app, _) = common::build_test_app();

    let mut body = registration("a@x.com");
    body["password"] = json!("short");
    let response = post_json(&app, "/api/v1/auth/register", body).await;

    assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
    let json = body_json(response).await;
    assert_eq!(json["error"]["code"], "VALIDATION_ERROR");
    assert_eq!(json["error"]["details"]["field"], "password");
}

#[tokio::test]
async fn test_malformed_body_is_validation_error() {
    let (app, _) = common::build_test_app();

    let response = post_json(&app, "/api/v1/auth/login", json!({ "email": "a@x.com" })).await;
    assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
    let json = body_json(response).await;
    assert_eq!(json["error"]["code"], "VALIDATION_ERROR");
    assert!(json["error"]["details"]["errors"].is_array());

    let request = Request::post("/api/v1/auth/login")
        .body(Body::from("not json"))
        .unwrap();
    let response = send(&app, request).await;
    assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
}

#[tokio::test]
async fn test_wrong_password_matches_unknown_email() {
    let (app, store) = common::build_test_app();
    register_and_verify(&app, &store, "a@x.com").await;

    let wrong = post_json(
        &app,
        "/api/v1/auth/login",
        json!({ "email": "a@x.com", "password": "Wr0ng!pass" }),
    )
    .await;
    let unknown = post_json(
        &app,
        "/api/v1/auth/login",
        json!({ "email": "nobody@x.com", "password": PASSWORD }),
    )
    .await;

    assert_eq!(wrong.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(unknown.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(
        body_json(wrong).await["error"],
        body_json(unknown).await["error"]
    );
}

#[tokio::test]
async fn test_account_locks_after_repeated_failures() {
    let (app, store) = common::build_test_app();
    register_and_verify(&app, &store, "a@x.com").await;

    for _ in 0..5 {
        let response = post_json(
            &app,
            "/api/v1/auth/login",
            json!({ "email": "a@x.com", "password": "Wr0ng!pass" }),
        )
        .await;
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    let response = post_json(
        &app,
        "/api/v1/auth/login",
        json!({ "email": "a@x.com", "password": PASSWORD }),
    )
    .await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    let message = body_json(response).await["error"]["message"].clone();
    assert!(message.as_str().unwrap().contains("locked"));
}

#[tokio::test]
async fn test_verification_token_single_use() {
    let (app, store) = common::build_test_app();
    post_json(&app, "/api/v1/auth/register", registration("a@x.com")).await;
    let token = verification_token(&store, "a@x.com").await;

    let first = post_json(&app, "/api/v1/auth/verify-email", json!({ "token": token })).await;
    assert_eq!(first.status(), StatusCode::OK);

    let second = post_json(&app, "/api/v1/auth/verify-email", json!({ "token": token })).await;
    assert_eq!(second.status(), StatusCode::NOT_FOUND);
    assert_eq!(body_json(second).await["error"]["code"], "NOT_FOUND");
}

// ---------------------------------------------------------------------------
// Tokens, profile and sessions
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_refresh_issues_new_pair() {
    let (app, store) = common::build_test_app();
    register_and_verify(&app, &store, "a@x.com").await;
    let json = login(&app, "a@x.com", PASSWORD).await;

    let response = post_json(
        &app,
        "/api/v1/auth/refresh",
        json!({ "refresh_token": json["tokens"]["refresh_token"] }),
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);
    let tokens = body_json(response).await;
    assert_eq!(tokens["token_type"], "bearer");
    assert_eq!(tokens["expires_in"], 1800);

    // An access token is not accepted as a refresh token.
    let response = post_json(
        &app,
        "/api/v1/auth/refresh",
        json!({ "refresh_token": json["tokens"]["access_token"] }),
    )
    .await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_me_requires_bearer_token() {
    let (app, store) = common::build_test_app();
    register_and_verify(&app, &store, "a@x.com").await;

    let response = get(&app, "/api/v1/auth/me").await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    let json = body_json(response).await;
    assert_eq!(json["error"]["code"], "AUTHENTICATION_ERROR");
    assert_eq!(json["path"], "/api/v1/auth/me");

    let response = get_auth(&app, "/api/v1/auth/me", "garbage").await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let json = login(&app, "a@x.com", PASSWORD).await;
    let access_token = json["tokens"]["access_token"].as_str().unwrap();

    let response = get_auth(&app, "/api/v1/auth/me", access_token).await;
    assert_eq!(response.status(), StatusCode::OK);
    let me = body_json(response).await;
    assert_eq!(me["email"], "a@x.com");
    assert_eq!(me["email_verified"], true);
}

#[tokio::test]
async fn test_profile_hides_security_bookkeeping() {
    let (app, store) = common::build_test_app();
    register_and_verify(&app, &store, "a@x.com").await;

    // Leave a failed attempt and a pending reset on the account.
    post_json(
        &app,
        "/api/v1/auth/login",
        json!({ "email": "a@x.com", "password": "Wr0ng!pass" }),
    )
    .await;
    post_json(
        &app,
        "/api/v1/auth/password-reset-request",
        json!({ "email": "a@x.com" }),
    )
    .await;

    let json = login(&app, "a@x.com", PASSWORD).await;
    for hidden in ["failed_login_count", "locked_until", "password_reset_expires"] {
        assert!(json["user"].get(hidden).is_none(), "login leaked {hidden}");
    }

    let access_token = json["tokens"]["access_token"].as_str().unwrap();
    let me = body_json(get_auth(&app, "/api/v1/auth/me", access_token).await).await;
    for hidden in [
        "failed_login_count",
        "locked_until",
        "password_reset_expires",
        "password_changed_at",
        "deleted_at",
        "updated_at",
    ] {
        assert!(me.get(hidden).is_none(), "profile leaked {hidden}");
    }
    assert!(me["created_at"].is_string());
    assert!(me["last_login_at"].is_string());
}

#[tokio::test]
async fn test_logout_revokes_sessions() {
    let (app, store) = common::build_test_app();
    register_and_verify(&app, &store, "a@x.com").await;

    let first = login(&app, "a@x.com", PASSWORD).await;
    login(&app, "a@x.com", PASSWORD).await;
    let access_token = first["tokens"]["access_token"].as_str().unwrap();

    let response = get_auth(&app, "/api/v1/auth/sessions", access_token).await;
    assert_eq!(
        body_json(response).await["sessions"].as_array().unwrap().len(),
        2
    );

    // Targeted logout of the first session.
    let response = post_json_auth(
        &app,
        "/api/v1/auth/logout",
        access_token,
        json!({ "session_token": first["session_token"] }),
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);

    let response = get_auth(&app, "/api/v1/auth/sessions", access_token).await;
    assert_eq!(
        body_json(response).await["sessions"].as_array().unwrap().len(),
        1
    );

    // A bodyless logout revokes the rest, and repeating it still succeeds.
    for _ in 0..2 {
        let request = Request::post("/api/v1/auth/logout")
            .header(header::AUTHORIZATION, format!("Bearer {access_token}"))
            .body(Body::empty())
            .unwrap();
        let response = send(&app, request).await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_json(response).await["success"], true);
    }

    let response = get_auth(&app, "/api/v1/auth/sessions", access_token).await;
    assert!(
        body_json(response).await["sessions"]
            .as_array()
            .unwrap()
            .is_empty()
    );
}

#[tokio::test]
async fn test_logout_with_malformed_body_revokes_nothing() {
    let (app, store) = common::build_test_app();
    register_and_verify(&app, &store, "a@x.com").await;

    let json = login(&app, "a@x.com", PASSWORD).await;
    let access_token = json["tokens"]["access_token"].as_str().unwrap();

    let response = post_json_auth(
        &app,
        "/api/v1/auth/logout",
        access_token,
        json!({ "session_token": 5 }),
    )
    .await;
    assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body_json(response).await["error"]["code"], "VALIDATION_ERROR");

    let response = get_auth(&app, "/api/v1/auth/sessions", access_token).await;
    assert_eq!(
        body_json(response).await["sessions"].as_array().unwrap().len(),
        1
    );
}

// ---------------------------------------------------------------------------
// Password reset
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_reset_request_hides_unknown_emails() {
    let (app, store) = common::build_test_app();
    register_and_verify(&app, &store, "a@x.com").await;

    let known = post_json(
        &app,
        "/api/v1/auth/password-reset-request",
        json!({ "email": "a@x.com" }),
    )
    .await;
    let unknown = post_json(
        &app,
        "/api/v1/auth/password-reset-request",
        json!({ "email": "nobody@x.com" }),
    )
    .await;

    assert_eq!(known.status(), StatusCode::OK);
    assert_eq!(unknown.status(), StatusCode::OK);
    assert_eq!(body_json(known).await, body_json(unknown).await);
}

#[tokio::test]
async fn test_password_reset_flow() {
    let (app, store) = common::build_test_app();
    register_and_verify(&app, &store, "a@x.com").await;
    login(&app, "a@x.com", PASSWORD).await;

    post_json(
        &app,
        "/api/v1/auth/password-reset-request",
        json!({ "email": "a@x.com" }),
    )
    .await;
    let user = store.find_user_by_email("a@x.com").await.unwrap().unwrap();
    let token = user.password_reset_token.clone().unwrap();

    // Policy still applies to the new password.
    let response = post_json(
        &app,
        "/api/v1/auth/password-reset-confirm",
        json!({ "token": token, "new_password": "weak" }),
    )
    .await;
    assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);

    let response = post_json(
        &app,
        "/api/v1/auth/password-reset-confirm",
        json!({ "token": token, "new_password": "N3w!Passw0rd" }),
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);

    let sessions = store.sessions_of(user.id).await;
    assert!(sessions.iter().all(|s| !s.is_active));

    let response = post_json(
        &app,
        "/api/v1/auth/login",
        json!({ "email": "a@x.com", "password": PASSWORD }),
    )
    .await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    login(&app, "a@x.com", "N3w!Passw0rd").await;

    let response = post_json(
        &app,
        "/api/v1/auth/password-reset-confirm",
        json!({ "token": token, "new_password": "An0ther!Pass" }),
    )
    .await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

// ---------------------------------------------------------------------------
// Misc
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_unknown_route_is_enveloped_404() {
    let (app, _) = common::build_test_app();

    let response = get(&app, "/api/v1/nope").await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    let json = body_json(response).await;
    assert_eq!(json["error"]["code"], "NOT_FOUND");
    assert_eq!(json["path"], "/api/v1/nope");
}

#[tokio::test]
async fn test_request_id_is_propagated() {
    let (app, _) = common::build_test_app();

    let request = Request::get("/health")
        .header("x-request-id", "req-123")
        .body(Body::empty())
        .unwrap();
    let response = send(&app, request).await;

    assert_eq!(response.headers()["x-request-id"], "req-123");
}
