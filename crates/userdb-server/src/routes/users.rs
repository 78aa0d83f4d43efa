//! User CRUD endpoints.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use userdb_proto::{
    DeleteUserResponse, ListUsersResponse, NewUser, UpdateUser, UserQuery, UserResponse,
};

use crate::error::ApiError;
use crate::state::AppState;

/// User routes.
pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/users", post(create_user).get(list_users))
        .route(
            "/users/:id",
            get(get_user).put(update_user).delete(delete_user),
        )
}

async fn create_user(
    State(state): State<AppState>,
    Json(new_user): Json<NewUser>,
) -> Result<(StatusCode, Json<UserResponse>), ApiError> {
    let user = state
        .run_blocking(move |service| service.add_user(new_user))
        .await?;
    Ok((StatusCode::CREATED, Json(UserResponse { user })))
}

async fn get_user(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<UserResponse>, ApiError> {
    let user = state
        .run_blocking(move |service| service.get_user(&id))
        .await?;
    Ok(Json(UserResponse { user }))
}

async fn update_user(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(changes): Json<UpdateUser>,
) -> Result<Json<UserResponse>, ApiError> {
    let user = state
        .run_blocking(move |service| service.update_user(&id, changes))
        .await?;
    Ok(Json(UserResponse { user }))
}

async fn delete_user(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<DeleteUserResponse>, ApiError> {
    state
        .run_blocking(move |service| service.delete_user(&id))
        .await?;
    Ok(Json(DeleteUserResponse::ok()))
}

async fn list_users(
    State(state): State<AppState>,
    Query(query): Query<UserQuery>,
) -> Result<Json<ListUsersResponse>, ApiError> {
    let users = state
        .run_blocking(move |service| service.list_users(&query))
        .await?;
    Ok(Json(ListUsersResponse { users }))
}
