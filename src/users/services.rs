use std::sync::Arc;

use bson::oid::ObjectId;
use lazy_static::lazy_static;
use regex::Regex;
use thiserror::Error;

use crate::store::{StoreError, UserStore};
use crate::users::dto::{CreateUserRequest, UpdateUserRequest};
use crate::users::password::hash_password;
use crate::users::repo_types::{Gender, NewUser, User, UserPatch};

/// Failures surfaced by the user lifecycle operations.
#[derive(Debug, Error)]
pub enum UserError {
    #[error("{0}")]
    Validation(String),
    #[error("email already registered")]
    DuplicateEmail,
    #[error("user not found")]
    NotFound,
    #[error("password hashing failed: {0}")]
    Hashing(String),
    #[error("store error: {0}")]
    Store(String),
}

impl From<StoreError> for UserError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Conflict(_) => UserError::DuplicateEmail,
            StoreError::Unavailable(msg) => UserError::Store(msg),
        }
    }
}

pub(crate) fn is_valid_email(email: &str) -> bool {
    lazy_static! {
        static ref EMAIL_RE: Regex = Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").unwrap();
    }
    EMAIL_RE.is_match(email)
}

/// Owns validation, password hashing and the five lifecycle operations over
/// the user collection. The store handle is injected at construction.
#[derive(Clone)]
pub struct UserService {
    store: Arc<dyn UserStore>,
}

impl UserService {
    pub fn new(store: Arc<dyn UserStore>) -> Self {
        Self { store }
    }

    pub async fn list(&self) -> Result<Vec<User>, UserError> {
        Ok(self.store.find_all().await?)
    }

    pub async fn create(&self, mut req: CreateUserRequest) -> Result<User, UserError> {
        req.email = req.email.trim().to_lowercase();

        // jobTitle is schema-optional but the create contract requires it,
        // same as the registration form always submitting one.
        if req.first_name.is_empty()
            || req.email.is_empty()
            || req.gender.is_empty()
            || req.job_title.is_empty()
            || req.password.is_empty()
        {
            return Err(UserError::Validation("All fields are required".into()));
        }
        if !is_valid_email(&req.email) {
            return Err(UserError::Validation("Invalid email".into()));
        }
        let gender = Gender::parse(&req.gender)
            .ok_or_else(|| UserError::Validation(format!("Unknown gender '{}'", req.gender)))?;

        // Hash before touching the store; a hashing failure must not persist
        // anything.
        let password =
            hash_password(&req.password).map_err(|e| UserError::Hashing(e.to_string()))?;

        let user = self
            .store
            .insert(NewUser {
                first_name: req.first_name,
                last_name: req.last_name,
                email: req.email,
                job_title: Some(req.job_title),
                gender,
                password,
            })
            .await?;
        Ok(user)
    }

    pub async fn get(&self, id: &str) -> Result<User, UserError> {
        let id = parse_id(id)?;
        self.store.find_by_id(id).await?.ok_or(UserError::NotFound)
    }

    pub async fn update(&self, id: &str, req: UpdateUserRequest) -> Result<User, UserError> {
        let id = parse_id(id)?;

        // Not-found takes precedence over payload problems.
        if self.store.find_by_id(id).await?.is_none() {
            return Err(UserError::NotFound);
        }

        let email = match req.email {
            Some(email) => {
                let email = email.trim().to_lowercase();
                if !is_valid_email(&email) {
                    return Err(UserError::Validation("Invalid email".into()));
                }
                Some(email)
            }
            None => None,
        };
        let gender = match req.gender.as_deref() {
            Some(g) => Some(
                Gender::parse(g)
                    .ok_or_else(|| UserError::Validation(format!("Unknown gender '{g}'")))?,
            ),
            None => None,
        };
        // A password field in the payload means "modified": re-hash on
        // presence, never by comparing against the stored hash.
        let password = match req.password.as_deref() {
            Some(p) => Some(hash_password(p).map_err(|e| UserError::Hashing(e.to_string()))?),
            None => None,
        };

        let patch = UserPatch {
            first_name: req.first_name,
            last_name: req.last_name,
            email,
            job_title: req.job_title,
            gender,
            password,
        };

        self.store
            .update_by_id(id, patch)
            .await?
            .ok_or(UserError::NotFound)
    }

    pub async fn delete(&self, id: &str) -> Result<(), UserError> {
        let id = parse_id(id)?;
        if self.store.delete_by_id(id).await? {
            Ok(())
        } else {
            Err(UserError::NotFound)
        }
    }
}

// Ids that don't parse as ObjectIds can't belong to any record.
fn parse_id(id: &str) -> Result<ObjectId, UserError> {
    ObjectId::parse_str(id).map_err(|_| UserError::NotFound)
}
