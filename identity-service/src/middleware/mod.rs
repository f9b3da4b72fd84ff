pub mod auth;

pub use auth::{auth_middleware, role_gate, AuthUser, BearerToken, RequiredRoles, ADMIN_ONLY};
