//! Shared setup for identity-service integration tests.
//!
//! Every test gets its own in-memory store and revocation list, so tests
//! never share state and need no external services.

#![allow(dead_code)]

use std::sync::Arc;

use axum::{
    body::{to_bytes, Body},
    http::{header, Method, Request, StatusCode},
    Router,
};
use identity_service::{
    build_router,
    config::{
        AuthPolicyConfig, Environment, IdentityConfig, JwtConfig, OtpConfig, PasswordConfig,
        RateLimitConfig, RevocationBackend, RevocationConfig, SecurityConfig, StoreBackend,
        StoreConfig, SwaggerConfig, SwaggerMode,
    },
    services::{MemoryBlacklist, MemoryStore},
    utils::Password,
    AppState,
};
use serde_json::Value;
use tower::util::ServiceExt;

pub const TEST_JWT_SECRET: &str = "integration-test-secret-0123456789abcdef";
pub const TEST_ISSUER: &str = "identity-service";
pub const ADMIN_EMAIL: &str = "admin@example.com";
pub const ADMIN_PASSWORD: &str = "admin-password-123";

pub fn test_config(require_verification: bool) -> IdentityConfig {
    IdentityConfig {
        common: service_core::config::Config::default(),
        environment: Environment::Dev,
        service_name: "identity-service".to_string(),
        service_version: "test".to_string(),
        log_level: "error".to_string(),
        otlp_endpoint: None,
        store: StoreConfig {
            backend: StoreBackend::Memory,
            database_url: None,
            max_connections: 1,
        },
        revocation: RevocationConfig {
            backend: RevocationBackend::Memory,
            redis_url: None,
        },
        jwt: JwtConfig {
            secret: TEST_JWT_SECRET.to_string(),
            issuer: TEST_ISSUER.to_string(),
            access_token_expiry_minutes: 15,
            refresh_token_expiry_days: 7,
        },
        otp: OtpConfig {
            length: 6,
            expiry_minutes: 10,
            alphanumeric: false,
        },
        // Cheap Argon2 parameters keep the suite fast.
        password: PasswordConfig {
            memory_kib: 1024,
            iterations: 1,
            parallelism: 1,
        },
        auth: AuthPolicyConfig {
            require_verification,
            expose_otp_in_response: true,
        },
        security: SecurityConfig {
            allowed_origins: vec!["http://localhost:3000".to_string()],
        },
        swagger: SwaggerConfig {
            enabled: SwaggerMode::Public,
        },
        rate_limit: RateLimitConfig {
            login_attempts: 100,
            login_window_seconds: 60,
            signup_attempts: 100,
            signup_window_seconds: 60,
            otp_attempts: 100,
            otp_window_seconds: 60,
            global_ip_limit: 1000,
            global_ip_window_seconds: 60,
        },
        bootstrap_admin: None,
    }
}

pub struct TestApp {
    pub router: Router,
    pub state: AppState,
}

impl TestApp {
    pub async fn new() -> Self {
        Self::with_config(test_config(false)).await
    }

    pub async fn with_config(config: IdentityConfig) -> Self {
        let state = AppState::new(
            config,
            Arc::new(MemoryStore::new()),
            Arc::new(MemoryBlacklist::new()),
        )
        .expect("Failed to build app state");

        state
            .credentials
            .ensure_admin(ADMIN_EMAIL, Password::new(ADMIN_PASSWORD.to_string()))
            .await
            .expect("Failed to create admin");

        Self {
            router: build_router(state.clone()),
            state,
        }
    }

    /// Send a request and return status plus parsed JSON body (`Null` when empty).
    pub async fn send(
        &self,
        method: Method,
        uri: &str,
        bearer: Option<&str>,
        body: Option<Value>,
    ) -> (StatusCode, Value) {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(token) = bearer {
            builder = builder.header(header::AUTHORIZATION, format!("Bearer {}", token));
        }

        let request = match body {
            Some(json) => builder
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(json.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        };

        let response = self.router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let json = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap_or(Value::Null)
        };

        (status, json)
    }

    pub async fn signup(&self, email: &str, password: &str) -> (StatusCode, Value) {
        self.send(
            Method::POST,
            "/signup",
            None,
            Some(serde_json::json!({ "email": email, "password": password })),
        )
        .await
    }

    pub async fn login(&self, email: &str, password: &str) -> (StatusCode, Value) {
        self.send(
            Method::POST,
            "/login",
            None,
            Some(serde_json::json!({ "email": email, "password": password })),
        )
        .await
    }

    /// Sign up and log in, returning `(access_token, refresh_token)`.
    pub async fn session_for(&self, email: &str, password: &str) -> (String, String) {
        let (status, _) = self.signup(email, password).await;
        assert_eq!(status, StatusCode::CREATED);
        self.tokens(email, password).await
    }

    pub async fn tokens(&self, email: &str, password: &str) -> (String, String) {
        let (status, body) = self.login(email, password).await;
        assert_eq!(status, StatusCode::OK, "login failed: {}", body);
        (
            body["access_token"].as_str().unwrap().to_string(),
            body["refresh_token"].as_str().unwrap().to_string(),
        )
    }

    pub async fn admin_tokens(&self) -> (String, String) {
        self.tokens(ADMIN_EMAIL, ADMIN_PASSWORD).await
    }
}
