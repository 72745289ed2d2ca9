use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::users::repo_types::{Gender, User};

/// Request body for creating a user. Missing fields default to empty and are
/// rejected by the service's presence checks.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateUserRequest {
    #[serde(default)]
    pub first_name: String,
    #[serde(default)]
    pub last_name: String,
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub gender: String,
    #[serde(default)]
    pub job_title: String,
    #[serde(default)]
    pub password: String,
}

/// Request body for a partial update; absent fields are left untouched.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateUserRequest {
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub email: Option<String>,
    pub gender: Option<String>,
    pub job_title: Option<String>,
    pub password: Option<String>,
}

/// User as returned to the client. `password` carries the stored hash.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UserResponse {
    pub id: String,
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub job_title: Option<String>,
    pub gender: Gender,
    pub password: String,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

impl From<User> for UserResponse {
    fn from(user: User) -> Self {
        Self {
            id: user.id.to_hex(),
            first_name: user.first_name,
            last_name: user.last_name,
            email: user.email,
            job_title: user.job_title,
            gender: user.gender,
            password: user.password,
            created_at: user.created_at,
            updated_at: user.updated_at,
        }
    }
}

/// Response for create and update: confirmation message plus the record.
#[derive(Debug, Serialize)]
pub struct UserMessageResponse {
    pub message: String,
    pub user: UserResponse,
}

/// Response carrying only a confirmation message (delete).
#[derive(Debug, Serialize)]
pub struct MessageResponse {
    pub message: String,
}
