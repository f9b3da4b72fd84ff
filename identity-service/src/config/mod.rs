use serde::Deserialize;
use service_core::config as core_config;
use service_core::error::AppError;
use std::env;
use std::str::FromStr;

/// Minimum HS256 secret length in bytes.
pub const MIN_JWT_SECRET_LEN: usize = 32;

pub const MAX_ACCESS_TOKEN_EXPIRY_MINUTES: i64 = 24 * 60;
pub const MAX_REFRESH_TOKEN_EXPIRY_DAYS: i64 = 365;
pub const MAX_OTP_EXPIRY_MINUTES: i64 = 24 * 60;

#[derive(Debug, Clone, Deserialize)]
pub struct IdentityConfig {
    #[serde(flatten)]
    pub common: core_config::Config,
    pub environment: Environment,
    pub service_name: String,
    pub service_version: String,
    pub log_level: String,
    pub otlp_endpoint: Option<String>,
    pub store: StoreConfig,
    pub revocation: RevocationConfig,
    pub jwt: JwtConfig,
    pub otp: OtpConfig,
    pub password: PasswordConfig,
    pub auth: AuthPolicyConfig,
    pub security: SecurityConfig,
    pub swagger: SwaggerConfig,
    pub rate_limit: RateLimitConfig,
    pub bootstrap_admin: Option<BootstrapAdminConfig>,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    Dev,
    Prod,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    Memory,
    Postgres,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StoreConfig {
    pub backend: StoreBackend,
    pub database_url: Option<String>,
    pub max_connections: u32,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum RevocationBackend {
    Memory,
    Redis,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RevocationConfig {
    pub backend: RevocationBackend,
    pub redis_url: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct JwtConfig {
    pub secret: String,
    pub issuer: String,
    pub access_token_expiry_minutes: i64,
    pub refresh_token_expiry_days: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct OtpConfig {
    pub length: usize,
    pub expiry_minutes: i64,
    pub alphanumeric: bool,
}

/// Argon2id cost parameters.
#[derive(Debug, Clone, Deserialize)]
pub struct PasswordConfig {
    pub memory_kib: u32,
    pub iterations: u32,
    pub parallelism: u32,
}

impl Default for PasswordConfig {
    fn default() -> Self {
        Self {
            memory_kib: argon2::Params::DEFAULT_M_COST,
            iterations: argon2::Params::DEFAULT_T_COST,
            parallelism: argon2::Params::DEFAULT_P_COST,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct AuthPolicyConfig {
    /// Signup issues an OTP and login is refused until it is verified.
    pub require_verification: bool,
    /// Return the OTP code in the signup/regenerate response (dev only).
    pub expose_otp_in_response: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SecurityConfig {
    pub allowed_origins: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SwaggerConfig {
    pub enabled: SwaggerMode,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum SwaggerMode {
    Public,
    Disabled,
}

/// Admin identity created at startup when absent. Signup never grants the
/// admin role, so this is the only way to obtain one.
#[derive(Clone, Deserialize)]
pub struct BootstrapAdminConfig {
    pub email: String,
    pub password: String,
}

impl std::fmt::Debug for BootstrapAdminConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BootstrapAdminConfig")
            .field("email", &self.email)
            .field("password", &"***")
            .finish()
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct RateLimitConfig {
    pub login_attempts: u32,
    pub login_window_seconds: u64,
    pub signup_attempts: u32,
    pub signup_window_seconds: u64,
    pub otp_attempts: u32,
    pub otp_window_seconds: u64,
    pub global_ip_limit: u32,
    pub global_ip_window_seconds: u64,
}

impl IdentityConfig {
    pub fn from_env() -> Result<Self, AppError> {
        let common_config = core_config::Config::load()?;

        let environment: Environment = parse_env("ENVIRONMENT", Some("dev"), false)?;
        let is_prod = environment == Environment::Prod;
        let password_defaults = PasswordConfig::default();

        let config = IdentityConfig {
            common: common_config,
            environment: environment.clone(),
            service_name: get_env("SERVICE_NAME", Some("identity-service"), false)?,
            service_version: get_env("SERVICE_VERSION", Some(env!("CARGO_PKG_VERSION")), false)?,
            log_level: get_env("LOG_LEVEL", Some("info"), false)?,
            otlp_endpoint: env::var("OTLP_ENDPOINT").ok().filter(|s| !s.is_empty()),
            store: StoreConfig {
                backend: parse_env("STORE_BACKEND", Some("memory"), false)?,
                database_url: env::var("DATABASE_URL").ok(),
                max_connections: parse_env("DATABASE_MAX_CONNECTIONS", Some("10"), false)?,
            },
            revocation: RevocationConfig {
                backend: parse_env("REVOCATION_BACKEND", Some("memory"), false)?,
                redis_url: env::var("REDIS_URL").ok(),
            },
            jwt: JwtConfig {
                secret: get_env(
                    "JWT_SECRET",
                    Some("dev-only-secret-change-me-0123456789abcdef"),
                    is_prod,
                )?,
                issuer: get_env("JWT_ISSUER", Some("identity-service"), false)?,
                access_token_expiry_minutes: parse_env(
                    "JWT_ACCESS_TOKEN_EXPIRY_MINUTES",
                    Some("15"),
                    false,
                )?,
                refresh_token_expiry_days: parse_env(
                    "JWT_REFRESH_TOKEN_EXPIRY_DAYS",
                    Some("7"),
                    false,
                )?,
            },
            otp: OtpConfig {
                length: parse_env("OTP_LENGTH", Some("6"), false)?,
                expiry_minutes: parse_env("OTP_EXPIRY_MINUTES", Some("10"), false)?,
                alphanumeric: parse_env("OTP_ALPHANUMERIC", Some("false"), false)?,
            },
            password: PasswordConfig {
                memory_kib: parse_env_or("PASSWORD_HASH_MEMORY_KIB", password_defaults.memory_kib)?,
                iterations: parse_env_or("PASSWORD_HASH_ITERATIONS", password_defaults.iterations)?,
                parallelism: parse_env_or(
                    "PASSWORD_HASH_PARALLELISM",
                    password_defaults.parallelism,
                )?,
            },
            auth: AuthPolicyConfig {
                require_verification: parse_env("REQUIRE_VERIFICATION", Some("true"), false)?,
                expose_otp_in_response: parse_env(
                    "EXPOSE_OTP_IN_RESPONSE",
                    Some(if is_prod { "false" } else { "true" }),
                    false,
                )?,
            },
            security: SecurityConfig {
                allowed_origins: get_env(
                    "ALLOWED_ORIGINS",
                    Some("http://localhost:3000"),
                    is_prod,
                )?
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect(),
            },
            swagger: SwaggerConfig {
                enabled: parse_env(
                    "ENABLE_SWAGGER",
                    Some(if is_prod { "disabled" } else { "public" }),
                    false,
                )?,
            },
            rate_limit: RateLimitConfig {
                login_attempts: parse_env("RATE_LIMIT_LOGIN_ATTEMPTS", Some("5"), false)?,
                login_window_seconds: parse_env(
                    "RATE_LIMIT_LOGIN_WINDOW_SECONDS",
                    Some("900"),
                    false,
                )?,
                signup_attempts: parse_env("RATE_LIMIT_SIGNUP_ATTEMPTS", Some("3"), false)?,
                signup_window_seconds: parse_env(
                    "RATE_LIMIT_SIGNUP_WINDOW_SECONDS",
                    Some("3600"),
                    false,
                )?,
                otp_attempts: parse_env("RATE_LIMIT_OTP_ATTEMPTS", Some("5"), false)?,
                otp_window_seconds: parse_env(
                    "RATE_LIMIT_OTP_WINDOW_SECONDS",
                    Some("900"),
                    false,
                )?,
                global_ip_limit: parse_env("RATE_LIMIT_GLOBAL_IP_LIMIT", Some("100"), false)?,
                global_ip_window_seconds: parse_env(
                    "RATE_LIMIT_GLOBAL_IP_WINDOW_SECONDS",
                    Some("60"),
                    false,
                )?,
            },
            bootstrap_admin: match (env::var("ADMIN_EMAIL"), env::var("ADMIN_PASSWORD")) {
                (Ok(email), Ok(password)) if !email.is_empty() => {
                    Some(BootstrapAdminConfig { email, password })
                }
                _ => None,
            },
        };

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), AppError> {
        if self.common.port == 0 {
            return Err(config_error("PORT must be greater than 0"));
        }

        if !(1..=MAX_ACCESS_TOKEN_EXPIRY_MINUTES).contains(&self.jwt.access_token_expiry_minutes) {
            return Err(config_error(&format!(
                "JWT_ACCESS_TOKEN_EXPIRY_MINUTES must be between 1 and {}",
                MAX_ACCESS_TOKEN_EXPIRY_MINUTES
            )));
        }

        if !(1..=MAX_REFRESH_TOKEN_EXPIRY_DAYS).contains(&self.jwt.refresh_token_expiry_days) {
            return Err(config_error(&format!(
                "JWT_REFRESH_TOKEN_EXPIRY_DAYS must be between 1 and {}",
                MAX_REFRESH_TOKEN_EXPIRY_DAYS
            )));
        }

        if self.jwt.refresh_token_expiry_days * 24 * 60 <= self.jwt.access_token_expiry_minutes {
            return Err(config_error("Refresh tokens must outlive access tokens"));
        }

        if self.jwt.secret.len() < MIN_JWT_SECRET_LEN {
            return Err(config_error(&format!(
                "JWT_SECRET must be at least {} bytes",
                MIN_JWT_SECRET_LEN
            )));
        }

        if !(4..=12).contains(&self.otp.length) {
            return Err(config_error("OTP_LENGTH must be between 4 and 12"));
        }

        if !(1..=MAX_OTP_EXPIRY_MINUTES).contains(&self.otp.expiry_minutes) {
            return Err(config_error(&format!(
                "OTP_EXPIRY_MINUTES must be between 1 and {}",
                MAX_OTP_EXPIRY_MINUTES
            )));
        }

        if self.store.backend == StoreBackend::Postgres && self.store.database_url.is_none() {
            return Err(config_error("DATABASE_URL is required for the postgres store"));
        }

        if self.revocation.backend == RevocationBackend::Redis && self.revocation.redis_url.is_none()
        {
            return Err(config_error("REDIS_URL is required for the redis revocation list"));
        }

        if let Some(admin) = &self.bootstrap_admin {
            if admin.password.len() < 12 {
                return Err(config_error("ADMIN_PASSWORD must be at least 12 characters"));
            }
        }

        if self.environment == Environment::Prod {
            if self.security.allowed_origins.iter().any(|o| o == "*") {
                return Err(config_error("Wildcard CORS origin not allowed in production"));
            }

            if self.auth.expose_otp_in_response {
                return Err(config_error(
                    "EXPOSE_OTP_IN_RESPONSE must be disabled in production",
                ));
            }

            if self.store.backend == StoreBackend::Memory {
                tracing::warn!("In-memory store in production - identities are lost on restart");
            }
        }

        Ok(())
    }
}

fn config_error(msg: &str) -> AppError {
    AppError::ConfigError(anyhow::anyhow!(msg.to_string()))
}

fn get_env(key: &str, default: Option<&str>, required_in_prod: bool) -> Result<String, AppError> {
    match env::var(key) {
        Ok(val) => Ok(val),
        Err(_) => {
            if required_in_prod {
                Err(config_error(&format!(
                    "{} is required in production but not set",
                    key
                )))
            } else if let Some(def) = default {
                Ok(def.to_string())
            } else {
                Err(config_error(&format!("{} is required but not set", key)))
            }
        }
    }
}

fn parse_env<T>(key: &str, default: Option<&str>, required_in_prod: bool) -> Result<T, AppError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    get_env(key, default, required_in_prod)?
        .parse()
        .map_err(|e: T::Err| config_error(&format!("Invalid value for {}: {}", key, e)))
}

fn parse_env_or<T>(key: &str, default: T) -> Result<T, AppError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match env::var(key) {
        Ok(val) => val
            .parse()
            .map_err(|e: T::Err| config_error(&format!("Invalid value for {}: {}", key, e))),
        Err(_) => Ok(default),
    }
}

impl FromStr for Environment {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "dev" => Ok(Environment::Dev),
            "prod" => Ok(Environment::Prod),
            _ => Err(format!("Invalid environment: {}", s)),
        }
    }
}

impl FromStr for StoreBackend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "memory" => Ok(StoreBackend::Memory),
            "postgres" => Ok(StoreBackend::Postgres),
            _ => Err(format!("Invalid store backend: {}", s)),
        }
    }
}

impl FromStr for RevocationBackend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "memory" => Ok(RevocationBackend::Memory),
            "redis" => Ok(RevocationBackend::Redis),
            _ => Err(format!("Invalid revocation backend: {}", s)),
        }
    }
}

impl FromStr for SwaggerMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "public" => Ok(SwaggerMode::Public),
            "disabled" => Ok(SwaggerMode::Disabled),
            _ => Err(format!("Invalid swagger mode: {}", s)),
        }
    }
}
