pub mod blacklist;
pub mod credential;
pub mod error;
pub mod jwt;
pub mod otp;
pub mod store;
pub mod tokens;

pub use blacklist::{MemoryBlacklist, RedisBlacklist, TokenBlacklist};
pub use credential::{CredentialService, NewIdentity, SignupOutcome};
pub use error::ServiceError;
pub use jwt::{AccessTokenClaims, JwtService, RefreshTokenClaims, TokenUse};
pub use otp::{IssuedOtp, OtpManager};
pub use store::{MemoryStore, PgStore, StoreError, UserStore};
pub use tokens::{TokenIssuer, TokenPair};
