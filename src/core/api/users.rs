//! User endpoints
//!
//! - POST /api/users/register - Create an account and start a session
//! - POST /api/users/login - Check credentials and start a session
//! - POST /api/users/logout - Drop the session
//! - GET /api/users - List cached users
//! - GET/PUT/DELETE /api/users/me - The caller's own account
//! - GET /api/users/{id} - Public profile
//! - GET /api/users/{id}/username - Username only

use axum::{
    Json,
    extract::{
        Path, State,
        rejection::{JsonRejection, PathRejection},
    },
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
};
use serde::{Deserialize, Serialize};

use super::AppState;
use super::response::{ApiError, ApiResponse};
use crate::core::auth::RequestContext;
use crate::core::cache::UserCache;
use crate::core::db::models::{CachedUser, NewUser, UpdateUser, User};
use crate::core::db::store::UserStore;

/// Login request body
#[derive(Debug, Clone, Deserialize)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
}

/// Session handed out on register/login
#[derive(Debug, Serialize)]
pub struct SessionResponse {
    pub token: String,
    pub expires_at: i64,
    pub user: User,
}

/// Issue an access token for `user` and attach it to the response
fn start_session<S: UserStore, C: UserCache>(
    state: &AppState<S, C>,
    status: StatusCode,
    message: &str,
    user: User,
) -> Result<Response, ApiError> {
    let (token, expires_at) = state
        .auth
        .jwt()
        .create_token(user.id, &user.role, &user.username)?;
    let headers = state.auth.token_source().issue(
        user.id,
        &token,
        state.auth.jwt().access_token_lifetime_secs(),
    )?;

    let body = ApiResponse::new(
        status,
        message,
        Some(SessionResponse {
            token,
            expires_at,
            user,
        }),
    );
    Ok((headers, body).into_response())
}

/// Destroy the caller's token and tell the client to drop it
fn end_session<S: UserStore, C: UserCache>(state: &AppState<S, C>, headers: &HeaderMap) -> HeaderMap {
    let source = state.auth.token_source();
    if let Some(token) = source.read(headers) {
        state.auth.jwt().destroy(&token);
    }
    source.clear()
}

pub async fn register<S: UserStore, C: UserCache>(
    State(state): State<AppState<S, C>>,
    payload: Result<Json<NewUser>, JsonRejection>,
) -> Result<Response, ApiError> {
    let Json(new_user) = payload?;
    let user = state.repository.create(new_user).await?;
    tracing::info!(user_id = user.id, "User registered");

    start_session(&state, StatusCode::CREATED, "user created", user)
}

pub async fn login<S: UserStore, C: UserCache>(
    State(state): State<AppState<S, C>>,
    payload: Result<Json<LoginRequest>, JsonRejection>,
) -> Result<Response, ApiError> {
    let Json(request) = payload?;
    let user = state
        .repository
        .verify(&request.username, &request.password)
        .await?;
    tracing::info!(user_id = user.id, "User logged in");

    start_session(&state, StatusCode::OK, "logged in", user)
}

pub async fn logout<S: UserStore, C: UserCache>(
    State(state): State<AppState<S, C>>,
    headers: HeaderMap,
) -> Response {
    let cleared = end_session(&state, &headers);
    (cleared, ApiResponse::message(StatusCode::OK, "logged out")).into_response()
}

pub async fn list_users<S: UserStore, C: UserCache>(
    State(state): State<AppState<S, C>>,
) -> Result<ApiResponse<Vec<CachedUser>>, ApiError> {
    let users = state.repository.get_all().await?;
    Ok(ApiResponse::ok("users found", users))
}

pub async fn get_me<S: UserStore, C: UserCache>(
    State(state): State<AppState<S, C>>,
    context: RequestContext,
) -> Result<ApiResponse<CachedUser>, ApiError> {
    let user = state.repository.get_by_id(context.user_id()?).await?;
    Ok(ApiResponse::ok("user found", user))
}

pub async fn update_me<S: UserStore, C: UserCache>(
    State(state): State<AppState<S, C>>,
    context: RequestContext,
    payload: Result<Json<UpdateUser>, JsonRejection>,
) -> Result<ApiResponse<User>, ApiError> {
    let id = context.user_id()?;
    let Json(changes) = payload?;
    let user = state.repository.update_by_id(id, changes).await?;
    Ok(ApiResponse::ok("user updated", user))
}

pub async fn delete_me<S: UserStore, C: UserCache>(
    State(state): State<AppState<S, C>>,
    context: RequestContext,
    headers: HeaderMap,
) -> Result<Response, ApiError> {
    let id = context.user_id()?;
    state.repository.delete_by_id(id).await?;
    tracing::info!(user_id = id, "User deleted");

    let cleared = end_session(&state, &headers);
    Ok((cleared, ApiResponse::message(StatusCode::OK, "user deleted")).into_response())
}

pub async fn get_user<S: UserStore, C: UserCache>(
    State(state): State<AppState<S, C>>,
    id: Result<Path<i64>, PathRejection>,
) -> Result<ApiResponse<CachedUser>, ApiError> {
    let Path(id) = id?;
    let user = state.repository.get_by_id(id).await?;
    Ok(ApiResponse::ok("user found", user))
}

pub async fn get_username<S: UserStore, C: UserCache>(
    State(state): State<AppState<S, C>>,
    id: Result<Path<i64>, PathRejection>,
) -> Result<ApiResponse<String>, ApiError> {
    let Path(id) = id?;
    let username = state.repository.get_username_by_id(id).await?;
    Ok(ApiResponse::ok("username found", username))
}

/// Store health probe
pub async fn health<S: UserStore, C: UserCache>(State(state): State<AppState<S, C>>) -> Response {
    match state.repository.store().health_check().await {
        Ok(()) => ApiResponse::message(StatusCode::OK, "ok").into_response(),
        Err(e) => {
            tracing::error!(store = "postgres", "Health check failed: {}", e);
            ApiResponse::message(StatusCode::SERVICE_UNAVAILABLE, "store unavailable").into_response()
        }
    }
}
