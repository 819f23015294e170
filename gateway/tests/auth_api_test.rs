//! Operator authentication over HTTP: OTP issuance, verification, sessions.

mod common;

use axum::http::StatusCode;
use chrono::Duration;
use common::{authed, get, post_json, setup, setup_with, OPERATOR};
use serde_json::json;

#[tokio::test]
async fn test_otp_login_grants_working_session() {
    let t = setup();
    let token = t.login().await;

    let (status, body) = t.send(authed("GET", "/auth/me", &token, None)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["identity"], OPERATOR);

    let (status, body) = t.send(authed("GET", "/admin/sessions", &token, None)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body.as_array().unwrap().len(), 1);
    assert!(body[0].get("token").is_none());
}

#[tokio::test]
async fn test_otp_request_outside_allow_list_is_forbidden() {
    let t = setup();
    let (status, body) = t
        .send(post_json("/auth/otp", json!({ "identity": "stranger@example.com" })))
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["error"]["code"], "NOT_AUTHORIZED");
    assert!(t.notifier.last_code("stranger@example.com").is_none());
}

#[tokio::test]
async fn test_identity_is_case_insensitive() {
    let t = setup();
    let (status, _) = t
        .send(post_json("/auth/otp", json!({ "identity": "  OPS@NICL.MU " })))
        .await;
    assert_eq!(status, StatusCode::OK);
    let code = t.notifier.last_code(OPERATOR).unwrap();
    let (status, body) = t
        .send(post_json(
            "/auth/otp/verify",
            json!({ "identity": OPERATOR, "code": code }),
        ))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["identity"], OPERATOR);
}

#[tokio::test]
async fn test_wrong_codes_count_down_then_lock_out() {
    let t = setup();
    t.send(post_json("/auth/otp", json!({ "identity": OPERATOR })))
        .await;
    let code = t.notifier.last_code(OPERATOR).unwrap();
    let wrong = if code == "000000" { "111111" } else { "000000" };
    let attempt = || post_json("/auth/otp/verify", json!({ "identity": OPERATOR, "code": wrong }));

    let (status, body) = t.send(attempt()).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"]["code"], "INVALID_CODE");
    assert_eq!(body["error"]["attempts_remaining"], 1);

    let (_, body) = t.send(attempt()).await;
    assert_eq!(body["error"]["attempts_remaining"], 0);

    let (status, body) = t.send(attempt()).await;
    assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(body["error"]["code"], "ATTEMPTS_EXHAUSTED");

    // The correct code no longer works either.
    let (status, body) = t
        .send(post_json(
            "/auth/otp/verify",
            json!({ "identity": OPERATOR, "code": code }),
        ))
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"]["code"], "CODE_NOT_FOUND");
}

#[tokio::test]
async fn test_expired_code_is_rejected() {
    let t = setup();
    t.send(post_json("/auth/otp", json!({ "identity": OPERATOR })))
        .await;
    let code = t.notifier.last_code(OPERATOR).unwrap();
    t.clock.advance(Duration::minutes(11));

    let (status, body) = t
        .send(post_json(
            "/auth/otp/verify",
            json!({ "identity": OPERATOR, "code": code }),
        ))
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"]["code"], "EXPIRED");
}

#[tokio::test]
async fn test_delivery_failure_is_bad_gateway() {
    let t = setup();
    t.notifier.set_failing(true);
    let (status, body) = t
        .send(post_json("/auth/otp", json!({ "identity": OPERATOR })))
        .await;
    assert_eq!(status, StatusCode::BAD_GATEWAY);
    assert_eq!(body["error"]["code"], "DELIVERY_FAILED");
}

#[tokio::test]
async fn test_empty_fields_are_validation_errors() {
    let t = setup();
    let (status, body) = t
        .send(post_json("/auth/otp", json!({ "identity": "  " })))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], "VALIDATION_ERROR");

    let (status, _) = t
        .send(post_json(
            "/auth/otp/verify",
            json!({ "identity": OPERATOR, "code": "" }),
        ))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_operator_routes_report_missing_and_invalid_tokens() {
    let t = setup();
    let (status, body) = t.send(get("/jobs/active")).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"]["reason"], "missing");

    let (status, body) = t
        .send(authed("GET", "/jobs/active", "not-a-token", None))
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"]["reason"], "invalid");
}

#[tokio::test]
async fn test_idle_session_expires() {
    let t = setup();
    let token = t.login().await;

    t.clock.advance(Duration::hours(7));
    let (status, _) = t.send(authed("GET", "/auth/me", &token, None)).await;
    assert_eq!(status, StatusCode::OK, "activity inside the window");

    // Activity above slid the window; another 7h is still inside it.
    t.clock.advance(Duration::hours(7));
    let (status, _) = t.send(authed("GET", "/auth/me", &token, None)).await;
    assert_eq!(status, StatusCode::OK);

    t.clock.advance(Duration::hours(8) + Duration::seconds(1));
    let (status, body) = t.send(authed("GET", "/auth/me", &token, None)).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"]["reason"], "expired");

    // Still expired on every later check until the sweep runs.
    t.clock.advance(Duration::hours(1));
    let (_, body) = t.send(authed("GET", "/auth/me", &token, None)).await;
    assert_eq!(body["error"]["reason"], "expired");
    assert_eq!(t.state.auth.sweep(), (0, 1));
    let (_, body) = t.send(authed("GET", "/auth/me", &token, None)).await;
    assert_eq!(body["error"]["reason"], "invalid");
}

#[tokio::test]
async fn test_removed_operator_loses_session() {
    let t = setup();
    let token = t.login().await;
    t.state.auth.allow_list().disallow(OPERATOR);

    let (status, body) = t.send(authed("GET", "/auth/me", &token, None)).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"]["reason"], "revoked");

    let (_, body) = t.send(authed("GET", "/auth/me", &token, None)).await;
    assert_eq!(body["error"]["reason"], "revoked");

    // The check is made per request, so re-allowing restores access.
    t.state.auth.allow_list().allow(OPERATOR);
    let (status, _) = t.send(authed("GET", "/auth/me", &token, None)).await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn test_logout_ends_session() {
    let t = setup();
    let token = t.login().await;

    let (status, body) = t.send(authed("POST", "/auth/logout", &token, None)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], true);

    let (status, _) = t.send(authed("GET", "/auth/me", &token, None)).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_password_login() {
    let hash = gateway::auth::hash_password("correct horse").unwrap();
    let t = setup_with(|config| config.login_password_hash = Some(hash));

    let (status, body) = t
        .send(post_json(
            "/auth/password",
            json!({ "identity": OPERATOR, "secret": "wrong" }),
        ))
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"]["code"], "INVALID_CREDENTIALS");

    let (status, body) = t
        .send(post_json(
            "/auth/password",
            json!({ "identity": OPERATOR, "secret": "correct horse" }),
        ))
        .await;
    assert_eq!(status, StatusCode::OK);
    let token = body["token"].as_str().unwrap();
    let (status, _) = t.send(authed("GET", "/auth/me", token, None)).await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn test_password_login_disabled_without_hash() {
    let t = setup();
    let (status, _) = t
        .send(post_json(
            "/auth/password",
            json!({ "identity": OPERATOR, "secret": "anything" }),
        ))
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}
