//! Authentication endpoints

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use validator::Validate;

use crate::{
    error::AppResult,
    models::user::{ApiKey, CreateApiKey, CreatedApiKey, LoginRequest, LoginResponse, UserInfo},
};

use super::AuthenticatedUser;

/// Exchange a username and password for a JWT
#[utoipa::path(
    post,
    path = "/auth/login",
    tag = "auth",
    request_body = LoginRequest,
    responses(
        (status = 200, description = "Login successful", body = LoginResponse),
        (status = 400, description = "Missing credentials"),
        (status = 401, description = "Invalid credentials")
    )
)]
pub async fn login(
    State(state): State<crate::AppState>,
    Json(request): Json<LoginRequest>,
) -> AppResult<Json<LoginResponse>> {
    request.validate()?;
    let response = state
        .services
        .users
        .login(&request.username, &request.password)
        .await?;
    Ok(Json(response))
}

/// Current user profile
#[utoipa::path(
    get,
    path = "/auth/me",
    tag = "auth",
    security(("bearer_auth" = [])),
    responses(
        (status = 200, description = "Current user", body = UserInfo),
        (status = 401, description = "Not authenticated")
    )
)]
pub async fn me(
    State(state): State<crate::AppState>,
    AuthenticatedUser(claims): AuthenticatedUser,
) -> AppResult<Json<UserInfo>> {
    let info = state.services.users.user_info(claims.user_id).await?;
    Ok(Json(info))
}

/// List the API keys of the current user
#[utoipa::path(
    get,
    path = "/auth/api-keys",
    tag = "auth",
    security(("bearer_auth" = [])),
    responses(
        (status = 200, description = "API keys", body = Vec<ApiKey>),
        (status = 401, description = "Not authenticated")
    )
)]
pub async fn list_api_keys(
    State(state): State<crate::AppState>,
    AuthenticatedUser(claims): AuthenticatedUser,
) -> AppResult<Json<Vec<ApiKey>>> {
    let keys = state.services.users.list_api_keys(claims.user_id).await?;
    Ok(Json(keys))
}

/// Create an API key; the full key is only returned here
#[utoipa::path(
    post,
    path = "/auth/api-keys",
    tag = "auth",
    security(("bearer_auth" = [])),
    request_body = CreateApiKey,
    responses(
        (status = 201, description = "API key created", body = CreatedApiKey),
        (status = 400, description = "Invalid name or API keys disabled"),
        (status = 401, description = "Not authenticated")
    )
)]
pub async fn create_api_key(
    State(state): State<crate::AppState>,
    AuthenticatedUser(claims): AuthenticatedUser,
    Json(request): Json<CreateApiKey>,
) -> AppResult<(StatusCode, Json<CreatedApiKey>)> {
    request.validate()?;
    let created = state
        .services
        .users
        .create_api_key(claims.user_id, &request.name)
        .await?;
    Ok((StatusCode::CREATED, Json(created)))
}

/// Revoke an API key
#[utoipa::path(
    delete,
    path = "/auth/api-keys/{id}",
    tag = "auth",
    security(("bearer_auth" = [])),
    params(
        ("id" = i32, Path, description = "API key ID")
    ),
    responses(
        (status = 204, description = "API key deleted"),
        (status = 404, description = "API key not found")
    )
)]
pub async fn delete_api_key(
    State(state): State<crate::AppState>,
    AuthenticatedUser(claims): AuthenticatedUser,
    Path(id): Path<i32>,
) -> AppResult<StatusCode> {
    state.services.users.delete_api_key(claims.user_id, id).await?;
    Ok(StatusCode::NO_CONTENT)
}
