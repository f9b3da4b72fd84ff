mod common;

use axum::http::{Method, StatusCode};
use common::TestApp;
use serde_json::json;

#[tokio::test]
async fn test_signup_then_login_issues_token_pair() {
    let app = TestApp::new().await;

    let (status, body) = app.signup("a@x.com", "p@ss1").await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["identity"]["email"], "a@x.com");
    assert_eq!(body["identity"]["role"], "user");
    assert_eq!(body["verification_required"], false);
    assert!(body["identity"].get("password_hash").is_none());

    let (status, body) = app.login("a@x.com", "p@ss1").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["token_type"], "Bearer");
    assert_eq!(body["expires_in"], 900);
    assert!(body["access_token"].as_str().is_some_and(|t| !t.is_empty()));
    assert!(body["refresh_token"].as_str().is_some_and(|t| !t.is_empty()));
}

#[tokio::test]
async fn test_wrong_password_and_unknown_email_look_identical() {
    let app = TestApp::new().await;
    app.signup("a@x.com", "p@ss1").await;

    let (wrong_status, wrong_body) = app.login("a@x.com", "nope").await;
    let (unknown_status, unknown_body) = app.login("b@x.com", "p@ss1").await;

    assert_eq!(wrong_status, StatusCode::UNAUTHORIZED);
    assert_eq!(unknown_status, StatusCode::UNAUTHORIZED);
    assert_eq!(wrong_body, unknown_body);
    assert_eq!(wrong_body["error"], "Invalid email or password");
}

#[tokio::test]
async fn test_email_is_case_insensitive() {
    let app = TestApp::new().await;
    app.signup("Mixed@Example.com", "p@ss1").await;

    let (status, _) = app.login("mixed@example.COM", "p@ss1").await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn test_duplicate_signup_conflicts() {
    let app = TestApp::new().await;

    let (status, _) = app.signup("a@x.com", "p@ss1").await;
    assert_eq!(status, StatusCode::CREATED);

    let (status, _) = app.signup("A@X.com", "other").await;
    assert_eq!(status, StatusCode::CONFLICT);
}

#[tokio::test]
async fn test_signup_validation_errors() {
    let app = TestApp::new().await;

    let (status, body) = app.signup("not-an-email", "p@ss1").await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["error"], "Validation error");

    let (status, _) = app.signup("a@x.com", "").await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);

    let (status, _) = app
        .send(Method::POST, "/signup", None, Some(json!({ "email": "a@x.com" })))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_signup_never_grants_admin() {
    let app = TestApp::new().await;

    let (status, body) = app
        .send(
            Method::POST,
            "/signup",
            None,
            Some(json!({ "email": "sneaky@x.com", "password": "p@ss1", "role": "admin" })),
        )
        .await;

    // Unknown fields are ignored on signup; the role is always `user`.
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["identity"]["role"], "user");
}

#[tokio::test]
async fn test_unverified_identity_cannot_login() {
    let app = TestApp::with_config(common::test_config(true)).await;

    let (status, body) = app.signup("a@x.com", "p@ss1").await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["verification_required"], true);
    assert!(body["otp_code"].as_str().is_some());

    let (status, _) = app.login("a@x.com", "p@ss1").await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    // Credentials are checked before verification state.
    let (status, _) = app.login("a@x.com", "wrong").await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}
