//! Identity model - registered accounts and their role.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

/// Closed set of roles an identity can hold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Admin,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Admin => "admin",
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "user" => Ok(Role::User),
            "admin" => Ok(Role::Admin),
            _ => Err(format!("Invalid role: {}", s)),
        }
    }
}

/// Identity entity.
///
/// `password_hash` holds an Argon2 PHC string and is never serialized.
#[derive(Debug, Clone)]
pub struct Identity {
    pub identity_id: Uuid,
    pub email: String,
    pub username: String,
    pub display_name: Option<String>,
    pub role: Role,
    pub password_hash: String,
    pub verified: bool,
    pub created_utc: DateTime<Utc>,
    pub updated_utc: DateTime<Utc>,
    pub deleted_utc: Option<DateTime<Utc>>,
}

impl Identity {
    /// Create a new unverified identity with the `user` role.
    pub fn new(
        email: String,
        username: String,
        display_name: Option<String>,
        password_hash: String,
    ) -> Self {
        let now = Utc::now();
        Self {
            identity_id: Uuid::new_v4(),
            email: normalize_email(&email),
            username,
            display_name,
            role: Role::User,
            password_hash,
            verified: false,
            created_utc: now,
            updated_utc: now,
            deleted_utc: None,
        }
    }

    pub fn is_deleted(&self) -> bool {
        self.deleted_utc.is_some()
    }

    /// Convert to sanitized response (no sensitive fields).
    pub fn sanitized(&self) -> IdentitySummary {
        IdentitySummary::from(self)
    }
}

/// Emails are matched case-insensitively and without surrounding whitespace.
pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

/// Mutable profile fields. Email, role and password cannot be changed here.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProfileUpdate {
    pub display_name: Option<String>,
    pub username: Option<String>,
}

impl ProfileUpdate {
    pub fn is_empty(&self) -> bool {
        self.display_name.is_none() && self.username.is_none()
    }

    /// Apply the update in place, bumping `updated_utc`.
    pub fn apply_to(&self, identity: &mut Identity) {
        if let Some(display_name) = &self.display_name {
            identity.display_name = Some(display_name.clone());
        }
        if let Some(username) = &self.username {
            identity.username = username.clone();
        }
        identity.updated_utc = Utc::now();
    }
}

/// Identity response for API (without sensitive fields).
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct IdentitySummary {
    pub identity_id: Uuid,
    #[schema(example = "user@example.com")]
    pub email: String,
    #[schema(example = "jdoe")]
    pub username: String,
    #[schema(example = "John Doe")]
    pub display_name: Option<String>,
    pub role: Role,
    pub verified: bool,
    pub created_utc: DateTime<Utc>,
    pub updated_utc: DateTime<Utc>,
}

impl From<&Identity> for IdentitySummary {
    fn from(u: &Identity) -> Self {
        Self {
            identity_id: u.identity_id,
            email: u.email.clone(),
            username: u.username.clone(),
            display_name: u.display_name.clone(),
            role: u.role,
            verified: u.verified,
            created_utc: u.created_utc,
            updated_utc: u.updated_utc,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_identity_defaults() {
        let identity = Identity::new(
            "  Alice@Example.COM ".to_string(),
            "alice".to_string(),
            None,
            "$argon2id$stub".to_string(),
        );

        assert_eq!(identity.email, "alice@example.com");
        assert_eq!(identity.role, Role::User);
        assert!(!identity.verified);
        assert!(!identity.is_deleted());
    }

    #[test]
    fn test_summary_omits_password_hash() {
        let identity = Identity::new(
            "a@x.com".to_string(),
            "a".to_string(),
            Some("A".to_string()),
            "$argon2id$secret-material".to_string(),
        );

        let json = serde_json::to_string(&identity.sanitized()).unwrap();
        assert!(!json.contains("argon2"));
        assert!(json.contains("\"role\":\"user\""));
    }

    #[test]
    fn test_role_parsing_is_closed() {
        assert_eq!("admin".parse::<Role>().unwrap(), Role::Admin);
        assert_eq!("user".parse::<Role>().unwrap(), Role::User);
        assert!("superuser".parse::<Role>().is_err());
        assert!("Admin".parse::<Role>().is_err());
    }

    #[test]
    fn test_profile_update_only_touches_profile_fields() {
        let mut identity = Identity::new(
            "a@x.com".to_string(),
            "a".to_string(),
            None,
            "hash".to_string(),
        );
        let before = identity.clone();

        let update = ProfileUpdate {
            display_name: Some("Alice".to_string()),
            username: None,
        };
        update.apply_to(&mut identity);

        assert_eq!(identity.display_name.as_deref(), Some("Alice"));
        assert_eq!(identity.username, before.username);
        assert_eq!(identity.role, before.role);
        assert_eq!(identity.email, before.email);
        assert_eq!(identity.password_hash, before.password_hash);
    }
}
