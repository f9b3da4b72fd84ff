mod common;

use axum::http::{Method, StatusCode};
use common::TestApp;

#[tokio::test]
async fn test_logout_revokes_access_and_refresh() {
    let app = TestApp::new().await;
    let (access, refresh) = app.session_for("a@x.com", "p@ss1").await;

    let (status, body) = app.send(Method::POST, "/auth/logout", Some(&access), None).await;
    assert_eq!(status, StatusCode::OK);
    assert!(body["message"].as_str().is_some());

    let (status, _) = app.send(Method::GET, "/auth/me", Some(&access), None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, _) = app
        .send(Method::GET, "/auth/refresh_token", Some(&refresh), None)
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_logout_ends_every_session_of_the_identity() {
    let app = TestApp::new().await;
    let (first_access, _) = app.session_for("a@x.com", "p@ss1").await;
    let (second_access, second_refresh) = app.tokens("a@x.com", "p@ss1").await;

    let (status, _) = app
        .send(Method::POST, "/auth/logout", Some(&first_access), None)
        .await;
    assert_eq!(status, StatusCode::OK);

    let (status, _) = app.send(Method::GET, "/auth/me", Some(&second_access), None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, _) = app
        .send(Method::GET, "/auth/refresh_token", Some(&second_refresh), None)
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_login_after_logout_starts_fresh_session() {
    let app = TestApp::new().await;
    let (access, _) = app.session_for("a@x.com", "p@ss1").await;
    app.send(Method::POST, "/auth/logout", Some(&access), None).await;

    let (fresh_access, _) = app.tokens("a@x.com", "p@ss1").await;
    let (status, _) = app.send(Method::GET, "/auth/me", Some(&fresh_access), None).await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn test_logout_requires_authentication() {
    let app = TestApp::new().await;

    let (status, _) = app.send(Method::POST, "/auth/logout", None, None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}
