use bson::oid::ObjectId;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

/// Gender as accepted by the registration form.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Gender {
    Male,
    Female,
    Others,
}

impl Gender {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "male" => Some(Self::Male),
            "female" => Some(Self::Female),
            "others" => Some(Self::Others),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Male => "male",
            Self::Female => "female",
            Self::Others => "others",
        }
    }
}

/// User document as stored in the `users` collection.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    #[serde(rename = "_id")]
    pub id: ObjectId, // store-assigned, immutable
    pub first_name: String,
    pub last_name: String,
    pub email: String, // unique across the collection
    #[serde(skip_serializing_if = "Option::is_none")]
    pub job_title: Option<String>,
    pub gender: Gender,
    pub password: String, // always an argon2 hash, never plaintext
    #[serde(with = "bson::serde_helpers::time_0_3_offsetdatetime_as_bson_datetime")]
    pub created_at: OffsetDateTime,
    #[serde(with = "bson::serde_helpers::time_0_3_offsetdatetime_as_bson_datetime")]
    pub updated_at: OffsetDateTime,
}

/// Validated, already-hashed payload handed to the store for insertion.
#[derive(Debug, Clone)]
pub struct NewUser {
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    pub job_title: Option<String>,
    pub gender: Gender,
    pub password: String,
}

/// Partial update; `password`, when present, is already hashed.
#[derive(Debug, Clone, Default)]
pub struct UserPatch {
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub email: Option<String>,
    pub job_title: Option<String>,
    pub gender: Option<Gender>,
    pub password: Option<String>,
}
