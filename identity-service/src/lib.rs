pub mod config;
pub mod dtos;
pub mod handlers;
pub mod middleware;
pub mod models;
pub mod services;
pub mod utils;

use std::sync::Arc;

use service_core::axum::{
    http::{header, HeaderValue, Method},
    middleware::{from_fn, from_fn_with_state},
    routing::{get, post},
    Router,
};
use service_core::error::AppError;
use service_core::middleware::{
    rate_limit::{create_ip_rate_limiter, ip_rate_limit_middleware, IpRateLimiter},
    security_headers::security_headers_middleware,
    tracing::{request_id_middleware, REQUEST_ID_HEADER},
};
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use utoipa::{openapi::security::SecurityScheme, Modify, OpenApi};
use utoipa_swagger_ui::SwaggerUi;

use crate::config::{IdentityConfig, SwaggerMode};
use crate::middleware::{auth_middleware, role_gate, ADMIN_ONLY};
use crate::services::{
    CredentialService, JwtService, OtpManager, TokenBlacklist, TokenIssuer, UserStore,
};
use crate::utils::PasswordHasher;

#[derive(OpenApi)]
#[openapi(
    paths(
        handlers::health_check,
        handlers::version,
        handlers::auth::signup,
        handlers::auth::login,
        handlers::auth::verify_otp,
        handlers::auth::regenerate_otp,
        handlers::auth::refresh_token,
        handlers::auth::logout,
        handlers::user::get_me,
        handlers::user::update_me,
        handlers::user::delete_me,
        handlers::admin::list_users,
    ),
    components(
        schemas(
            dtos::ErrorResponse,
            dtos::MessageResponse,
            dtos::auth::SignupRequest,
            dtos::auth::SignupResponse,
            dtos::auth::LoginRequest,
            dtos::auth::VerifyOtpRequest,
            dtos::auth::RegenerateOtpRequest,
            dtos::auth::RegenerateOtpResponse,
            dtos::user::UpdateProfileRequest,
            dtos::user::IdentityListResponse,
            handlers::VersionResponse,
            services::TokenPair,
            models::IdentitySummary,
            models::Role,
        )
    ),
    modifiers(&SecurityAddon),
    tags(
        (name = "Authentication", description = "Signup, login, passcodes and session tokens"),
        (name = "User", description = "Profile of the authenticated identity"),
        (name = "Admin", description = "Administrative operations"),
        (name = "Observability", description = "Service health and version"),
    )
)]
pub struct ApiDoc;

struct SecurityAddon;

impl Modify for SecurityAddon {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        if let Some(components) = openapi.components.as_mut() {
            components.add_security_scheme(
                "bearer_auth",
                SecurityScheme::Http(
                    utoipa::openapi::security::HttpBuilder::new()
                        .scheme(utoipa::openapi::security::HttpAuthScheme::Bearer)
                        .bearer_format("JWT")
                        .build(),
                ),
            );
        }
    }
}

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<IdentityConfig>,
    pub credentials: CredentialService,
    pub store: Arc<dyn UserStore>,
    pub blacklist: Arc<dyn TokenBlacklist>,
    pub login_rate_limiter: IpRateLimiter,
    pub signup_rate_limiter: IpRateLimiter,
    pub otp_rate_limiter: IpRateLimiter,
    pub ip_rate_limiter: IpRateLimiter,
}

impl AppState {
    /// Wire the auth core and rate limiters on top of the given collaborators.
    pub fn new(
        config: IdentityConfig,
        store: Arc<dyn UserStore>,
        blacklist: Arc<dyn TokenBlacklist>,
    ) -> Result<Self, AppError> {
        let hasher = PasswordHasher::new(&config.password)?;
        let otp = OtpManager::new(store.clone(), &config.otp);
        let tokens = TokenIssuer::new(JwtService::new(&config.jwt), store.clone(), blacklist.clone());
        let credentials = CredentialService::new(
            store.clone(),
            hasher,
            otp,
            tokens,
            config.auth.require_verification,
        )?;

        let limits = &config.rate_limit;
        let login_rate_limiter =
            create_ip_rate_limiter(limits.login_attempts, limits.login_window_seconds);
        let signup_rate_limiter =
            create_ip_rate_limiter(limits.signup_attempts, limits.signup_window_seconds);
        let otp_rate_limiter =
            create_ip_rate_limiter(limits.otp_attempts, limits.otp_window_seconds);
        let ip_rate_limiter =
            create_ip_rate_limiter(limits.global_ip_limit, limits.global_ip_window_seconds);
        tracing::info!("Rate limiters initialized: Login, Signup, OTP and Global IP");

        Ok(Self {
            config: Arc::new(config),
            credentials,
            store,
            blacklist,
            login_rate_limiter,
            signup_rate_limiter,
            otp_rate_limiter,
            ip_rate_limiter,
        })
    }
}

pub fn build_router(state: AppState) -> Router {
    // Admin routes: authenticated, then role-gated
    let admin_routes = Router::new()
        .route("/admin/users", get(handlers::admin::list_users))
        .layer(from_fn_with_state(ADMIN_ONLY, role_gate))
        .layer(from_fn_with_state(state.clone(), auth_middleware));

    // Routes for any authenticated identity
    let session_routes = Router::new()
        .route("/auth/logout", post(handlers::auth::logout))
        .route(
            "/auth/me",
            get(handlers::user::get_me)
                .patch(handlers::user::update_me)
                .delete(handlers::user::delete_me),
        )
        .layer(from_fn_with_state(state.clone(), auth_middleware));

    let login_route = Router::new()
        .route("/login", post(handlers::auth::login))
        .layer(from_fn_with_state(
            state.login_rate_limiter.clone(),
            ip_rate_limit_middleware,
        ));

    let signup_route = Router::new()
        .route("/signup", post(handlers::auth::signup))
        .layer(from_fn_with_state(
            state.signup_rate_limiter.clone(),
            ip_rate_limit_middleware,
        ));

    let otp_routes = Router::new()
        .route("/auth/otp/verify", post(handlers::auth::verify_otp))
        .route("/auth/otp/regenerate", post(handlers::auth::regenerate_otp))
        .layer(from_fn_with_state(
            state.otp_rate_limiter.clone(),
            ip_rate_limit_middleware,
        ));

    let mut app = Router::new()
        .route("/health", get(handlers::health_check))
        .route("/api/version", get(handlers::version));

    if state.config.swagger.enabled == SwaggerMode::Public {
        app = app.merge(SwaggerUi::new("/docs").url("/.well-known/openapi.json", ApiDoc::openapi()));
    } else {
        // Without the UI the document stays available for programmatic access
        app = app.route(
            "/.well-known/openapi.json",
            get(|| async { service_core::axum::Json(ApiDoc::openapi()) }),
        );
    }

    let allowed_origins: Vec<HeaderValue> = state
        .config
        .security
        .allowed_origins
        .iter()
        .filter_map(|origin| match origin.parse::<HeaderValue>() {
            Ok(value) => Some(value),
            Err(e) => {
                tracing::error!(origin = %origin, error = %e, "Ignoring invalid CORS origin");
                None
            }
        })
        .collect();

    app.merge(login_route)
        .merge(signup_route)
        .merge(otp_routes)
        .route("/auth/refresh_token", get(handlers::auth::refresh_token))
        .merge(session_routes)
        .merge(admin_routes)
        .with_state(state.clone())
        // Global IP rate limiting
        .layer(from_fn_with_state(
            state.ip_rate_limiter.clone(),
            ip_rate_limit_middleware,
        ))
        .layer(TraceLayer::new_for_http().make_span_with(
            |request: &service_core::axum::http::Request<_>| {
                let request_id = request
                    .headers()
                    .get(REQUEST_ID_HEADER)
                    .and_then(|value| value.to_str().ok())
                    .unwrap_or("-");

                tracing::info_span!(
                    "http_request",
                    request_id = %request_id,
                    method = %request.method(),
                    uri = %request.uri(),
                    version = ?request.version(),
                )
            },
        ))
        .layer(from_fn(request_id_middleware))
        .layer(from_fn(security_headers_middleware))
        .layer(
            CorsLayer::new()
                .allow_origin(allowed_origins)
                .allow_methods([
                    Method::GET,
                    Method::POST,
                    Method::PATCH,
                    Method::DELETE,
                    Method::OPTIONS,
                ])
                .allow_headers([header::AUTHORIZATION, header::CONTENT_TYPE]),
        )
}
