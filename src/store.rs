use async_trait::async_trait;
use futures::stream::TryStreamExt;
use mongodb::bson::{doc, oid::ObjectId, DateTime};
use mongodb::error::{ErrorKind, WriteFailure};
use mongodb::options::{IndexOptions, ReturnDocument};
use mongodb::{Client, Collection, IndexModel};
use thiserror::Error;
use time::OffsetDateTime;
use tokio::sync::RwLock;

use crate::users::repo_types::{NewUser, User, UserPatch};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("unique constraint violated: {0}")]
    Conflict(String),
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

#[async_trait]
pub trait UserStore: Send + Sync {
    /// Persist a new user, assigning its id and timestamps.
    async fn insert(&self, new: NewUser) -> Result<User, StoreError>;
    /// All users in insertion order.
    async fn find_all(&self) -> Result<Vec<User>, StoreError>;
    async fn find_by_id(&self, id: ObjectId) -> Result<Option<User>, StoreError>;
    /// Apply only the fields present in the patch; `updated_at` is always
    /// refreshed. Returns the post-update document, `None` for unknown ids.
    async fn update_by_id(&self, id: ObjectId, patch: UserPatch)
        -> Result<Option<User>, StoreError>;
    /// True iff a document was removed.
    async fn delete_by_id(&self, id: ObjectId) -> Result<bool, StoreError>;
}

#[derive(Clone)]
pub struct MongoStore {
    users: Collection<User>,
}

impl MongoStore {
    pub async fn connect(uri: &str, db_name: &str) -> anyhow::Result<Self> {
        let client = Client::with_uri_str(uri).await?;
        let users = client.database(db_name).collection::<User>("users");

        let store = Self { users };
        store.ensure_indexes().await?;
        Ok(store)
    }

    async fn ensure_indexes(&self) -> Result<(), mongodb::error::Error> {
        let email_unique = IndexModel::builder()
            .keys(doc! { "email": 1 })
            .options(IndexOptions::builder().unique(true).build())
            .build();
        self.users.create_index(email_unique).await?;
        Ok(())
    }
}

#[async_trait]
impl UserStore for MongoStore {
    async fn insert(&self, new: NewUser) -> Result<User, StoreError> {
        // bson datetimes are millisecond precision; truncate up front so the
        // returned record matches what a later read will see.
        let now = DateTime::from_time_0_3(OffsetDateTime::now_utc()).to_time_0_3();
        let user = User {
            id: ObjectId::new(),
            first_name: new.first_name,
            last_name: new.last_name,
            email: new.email,
            job_title: new.job_title,
            gender: new.gender,
            password: new.password,
            created_at: now,
            updated_at: now,
        };

        self.users
            .insert_one(&user)
            .await
            .map_err(into_store_error)?;
        Ok(user)
    }

    async fn find_all(&self) -> Result<Vec<User>, StoreError> {
        // Natural order, which is insertion order for this append-only workload.
        let cursor = self
            .users
            .find(doc! {})
            .await
            .map_err(into_store_error)?;
        cursor.try_collect().await.map_err(into_store_error)
    }

    async fn find_by_id(&self, id: ObjectId) -> Result<Option<User>, StoreError> {
        self.users
            .find_one(doc! { "_id": id })
            .await
            .map_err(into_store_error)
    }

    async fn update_by_id(
        &self,
        id: ObjectId,
        patch: UserPatch,
    ) -> Result<Option<User>, StoreError> {
        let mut set = doc! {
            "updatedAt": DateTime::from_time_0_3(OffsetDateTime::now_utc()),
        };
        if let Some(v) = patch.first_name {
            set.insert("firstName", v);
        }
        if let Some(v) = patch.last_name {
            set.insert("lastName", v);
        }
        if let Some(v) = patch.email {
            set.insert("email", v);
        }
        if let Some(v) = patch.job_title {
            set.insert("jobTitle", v);
        }
        if let Some(v) = patch.gender {
            set.insert("gender", v.as_str());
        }
        if let Some(v) = patch.password {
            set.insert("password", v);
        }

        self.users
            .find_one_and_update(doc! { "_id": id }, doc! { "$set": set })
            .return_document(ReturnDocument::After)
            .await
            .map_err(into_store_error)
    }

    async fn delete_by_id(&self, id: ObjectId) -> Result<bool, StoreError> {
        let result = self
            .users
            .delete_one(doc! { "_id": id })
            .await
            .map_err(into_store_error)?;
        Ok(result.deleted_count > 0)
    }
}

fn into_store_error(err: mongodb::error::Error) -> StoreError {
    if is_duplicate_key(&err) {
        StoreError::Conflict(err.to_string())
    } else {
        StoreError::Unavailable(err.to_string())
    }
}

fn is_duplicate_key(err: &mongodb::error::Error) -> bool {
    match err.kind.as_ref() {
        ErrorKind::Write(WriteFailure::WriteError(e)) => e.code == 11000,
        ErrorKind::Command(e) => e.code == 11000,
        _ => false,
    }
}

/// In-process store backing `AppState::fake` and the service tests. Enforces
/// the same email uniqueness the mongo index does.
pub struct MemoryStore {
    users: RwLock<Vec<User>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            users: RwLock::new(Vec::new()),
        }
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl UserStore for MemoryStore {
    async fn insert(&self, new: NewUser) -> Result<User, StoreError> {
        let mut users = self.users.write().await;

        if users.iter().any(|u| u.email == new.email) {
            return Err(StoreError::Conflict(format!(
                "email '{}' already exists",
                new.email
            )));
        }

        let now = OffsetDateTime::now_utc();
        let user = User {
            id: ObjectId::new(),
            first_name: new.first_name,
            last_name: new.last_name,
            email: new.email,
            job_title: new.job_title,
            gender: new.gender,
            password: new.password,
            created_at: now,
            updated_at: now,
        };
        users.push(user.clone());
        Ok(user)
    }

    async fn find_all(&self) -> Result<Vec<User>, StoreError> {
        Ok(self.users.read().await.clone())
    }

    async fn find_by_id(&self, id: ObjectId) -> Result<Option<User>, StoreError> {
        Ok(self.users.read().await.iter().find(|u| u.id == id).cloned())
    }

    async fn update_by_id(
        &self,
        id: ObjectId,
        patch: UserPatch,
    ) -> Result<Option<User>, StoreError> {
        let mut users = self.users.write().await;

        if let Some(email) = patch.email.as_deref() {
            if users.iter().any(|u| u.email == email && u.id != id) {
                return Err(StoreError::Conflict(format!(
                    "email '{}' already exists",
                    email
                )));
            }
        }

        let Some(user) = users.iter_mut().find(|u| u.id == id) else {
            return Ok(None);
        };

        if let Some(v) = patch.first_name {
            user.first_name = v;
        }
        if let Some(v) = patch.last_name {
            user.last_name = v;
        }
        if let Some(v) = patch.email {
            user.email = v;
        }
        if let Some(v) = patch.job_title {
            user.job_title = Some(v);
        }
        if let Some(v) = patch.gender {
            user.gender = v;
        }
        if let Some(v) = patch.password {
            user.password = v;
        }
        user.updated_at = OffsetDateTime::now_utc();

        Ok(Some(user.clone()))
    }

    async fn delete_by_id(&self, id: ObjectId) -> Result<bool, StoreError> {
        let mut users = self.users.write().await;
        let before = users.len();
        users.retain(|u| u.id != id);
        Ok(users.len() != before)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::users::repo_types::Gender;

    fn new_user(email: &str) -> NewUser {
        NewUser {
            first_name: "Test".into(),
            last_name: "User".into(),
            email: email.into(),
            job_title: Some("Eng".into()),
            gender: Gender::Others,
            password: "$argon2id$fake".into(),
        }
    }

    #[tokio::test]
    async fn insert_assigns_id_and_timestamps() {
        let store = MemoryStore::new();
        let user = store.insert(new_user("a@x.com")).await.unwrap();
        assert_eq!(user.created_at, user.updated_at);
        assert_eq!(user.email, "a@x.com");

        let found = store.find_by_id(user.id).await.unwrap();
        assert_eq!(found.unwrap().email, "a@x.com");
    }

    #[tokio::test]
    async fn insert_rejects_duplicate_email() {
        let store = MemoryStore::new();
        store.insert(new_user("a@x.com")).await.unwrap();

        let err = store.insert(new_user("a@x.com")).await.unwrap_err();
        assert!(matches!(err, StoreError::Conflict(_)));
        assert_eq!(store.find_all().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn find_all_preserves_insertion_order() {
        let store = MemoryStore::new();
        store.insert(new_user("a@x.com")).await.unwrap();
        store.insert(new_user("b@x.com")).await.unwrap();
        store.insert(new_user("c@x.com")).await.unwrap();

        let emails: Vec<String> = store
            .find_all()
            .await
            .unwrap()
            .into_iter()
            .map(|u| u.email)
            .collect();
        assert_eq!(emails, vec!["a@x.com", "b@x.com", "c@x.com"]);
    }

    #[tokio::test]
    async fn update_applies_only_present_fields() {
        let store = MemoryStore::new();
        let user = store.insert(new_user("a@x.com")).await.unwrap();

        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        let updated = store
            .update_by_id(
                user.id,
                UserPatch {
                    first_name: Some("Renamed".into()),
                    ..Default::default()
                },
            )
            .await
            .unwrap()
            .unwrap();

        assert_eq!(updated.first_name, "Renamed");
        assert_eq!(updated.last_name, "User");
        assert_eq!(updated.email, "a@x.com");
        assert_eq!(updated.created_at, user.created_at);
        assert!(updated.updated_at > user.updated_at);
    }

    #[tokio::test]
    async fn update_unknown_id_returns_none() {
        let store = MemoryStore::new();
        let missing = store
            .update_by_id(ObjectId::new(), UserPatch::default())
            .await
            .unwrap();
        assert!(missing.is_none());
    }

    #[tokio::test]
    async fn update_rejects_email_taken_by_other_user() {
        let store = MemoryStore::new();
        store.insert(new_user("a@x.com")).await.unwrap();
        let second = store.insert(new_user("b@x.com")).await.unwrap();

        let err = store
            .update_by_id(
                second.id,
                UserPatch {
                    email: Some("a@x.com".into()),
                    ..Default::default()
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Conflict(_)));
    }

    #[tokio::test]
    async fn delete_removes_exactly_one() {
        let store = MemoryStore::new();
        let user = store.insert(new_user("a@x.com")).await.unwrap();
        store.insert(new_user("b@x.com")).await.unwrap();

        assert!(store.delete_by_id(user.id).await.unwrap());
        assert!(!store.delete_by_id(user.id).await.unwrap());
        assert_eq!(store.find_all().await.unwrap().len(), 1);
        assert!(store.find_by_id(user.id).await.unwrap().is_none());
    }
}
