use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use validator::Validate;

use crate::models::{IdentitySummary, ProfileUpdate};

/// Only profile fields are accepted. Unknown fields such as `role` or
/// `email` are rejected at deserialisation.
#[derive(Debug, Deserialize, Validate, ToSchema)]
#[serde(deny_unknown_fields)]
pub struct UpdateProfileRequest {
    #[validate(length(min = 1, max = 64, message = "Username must be 1-64 characters"))]
    #[schema(example = "jdoe")]
    pub username: Option<String>,

    #[validate(length(max = 128, message = "Display name must be at most 128 characters"))]
    #[schema(example = "John Doe")]
    pub display_name: Option<String>,
}

impl From<UpdateProfileRequest> for ProfileUpdate {
    fn from(req: UpdateProfileRequest) -> Self {
        ProfileUpdate {
            display_name: req.display_name,
            username: req.username,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct IdentityListResponse {
    pub identities: Vec<IdentitySummary>,
    pub total: usize,
}
