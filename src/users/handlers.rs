use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{get, patch, post},
    Json, Router,
};
use tracing::{error, info, instrument, warn};

use crate::state::AppState;
use crate::users::dto::{
    CreateUserRequest, MessageResponse, UpdateUserRequest, UserMessageResponse, UserResponse,
};
use crate::users::services::UserError;

pub fn read_routes() -> Router<AppState> {
    Router::new()
        .route("/users", get(list_users))
        .route("/users/:id", get(get_user))
}

pub fn write_routes() -> Router<AppState> {
    Router::new()
        .route("/users", post(create_user))
        .route("/users/:id", patch(update_user).delete(delete_user))
}

#[instrument(skip(state))]
pub async fn list_users(
    State(state): State<AppState>,
) -> Result<Json<Vec<UserResponse>>, (StatusCode, String)> {
    match state.users.list().await {
        Ok(users) => Ok(Json(users.into_iter().map(UserResponse::from).collect())),
        Err(e) => Err(reject("list users", e)),
    }
}

#[instrument(skip(state))]
pub async fn get_user(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<UserResponse>, (StatusCode, String)> {
    match state.users.get(&id).await {
        Ok(user) => Ok(Json(user.into())),
        Err(e) => Err(reject("get user", e)),
    }
}

#[instrument(skip(state, payload))]
pub async fn create_user(
    State(state): State<AppState>,
    Json(payload): Json<CreateUserRequest>,
) -> Result<(StatusCode, Json<UserMessageResponse>), (StatusCode, String)> {
    match state.users.create(payload).await {
        Ok(user) => {
            info!(user_id = %user.id, email = %user.email, "user created");
            Ok((
                StatusCode::CREATED,
                Json(UserMessageResponse {
                    message: "User created successfully".into(),
                    user: user.into(),
                }),
            ))
        }
        Err(e) => Err(reject("create user", e)),
    }
}

#[instrument(skip(state, payload))]
pub async fn update_user(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(payload): Json<UpdateUserRequest>,
) -> Result<Json<UserMessageResponse>, (StatusCode, String)> {
    match state.users.update(&id, payload).await {
        Ok(user) => {
            info!(user_id = %user.id, "user updated");
            Ok(Json(UserMessageResponse {
                message: "User updated successfully".into(),
                user: user.into(),
            }))
        }
        Err(e) => Err(reject("update user", e)),
    }
}

#[instrument(skip(state))]
pub async fn delete_user(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<MessageResponse>, (StatusCode, String)> {
    match state.users.delete(&id).await {
        Ok(()) => {
            info!(user_id = %id, "user deleted");
            Ok(Json(MessageResponse {
                message: "User deleted successfully".into(),
            }))
        }
        Err(e) => Err(reject("delete user", e)),
    }
}

fn reject(op: &'static str, err: UserError) -> (StatusCode, String) {
    match err {
        UserError::Validation(msg) => {
            warn!(%op, %msg, "request rejected");
            (StatusCode::BAD_REQUEST, msg)
        }
        UserError::DuplicateEmail => {
            warn!(%op, "email already registered");
            (StatusCode::CONFLICT, "Email already registered".into())
        }
        UserError::NotFound => (StatusCode::NOT_FOUND, "User not found".into()),
        UserError::Hashing(e) => {
            error!(%op, error = %e, "password hashing failed");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Internal Server Error".into(),
            )
        }
        UserError::Store(e) => {
            error!(%op, error = %e, "store operation failed");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Internal Server Error".into(),
            )
        }
    }
}
