//! API handlers for Scriptly REST endpoints

pub mod admin;
pub mod auth;
pub mod files;
pub mod health;
pub mod jobs;
pub mod openapi;
pub mod scripts;

use axum::{
    async_trait,
    extract::FromRequestParts,
    http::{header::AUTHORIZATION, request::Parts},
};

use crate::{
    error::AppError,
    models::user::{split_api_key, UserClaims},
    services::Caller,
    AppState,
};

/// Claims carried by the `Authorization` header, if any.
///
/// Bearer values shaped like `<prefix>.<secret>` are API keys when those are
/// enabled; everything else is decoded as a JWT.
async fn claims_from_parts(parts: &Parts, state: &AppState) -> Result<Option<UserClaims>, AppError> {
    let Some(auth_header) = parts.headers.get(AUTHORIZATION) else {
        return Ok(None);
    };
    let auth_header = auth_header
        .to_str()
        .map_err(|_| AppError::Authentication("Invalid authorization header".to_string()))?;

    let token = auth_header
        .strip_prefix("Bearer ")
        .ok_or_else(|| AppError::Authentication("Invalid authorization header format".to_string()))?;

    if state.config.auth.enable_api_keys && split_api_key(token).is_some() {
        let claims = state.services.users.authenticate_api_key(token).await?;
        return Ok(Some(claims));
    }

    let claims = UserClaims::from_token(token, &state.config.auth.jwt_secret)
        .map_err(|e| AppError::Authentication(e.to_string()))?;
    Ok(Some(claims))
}

/// Extractor for authenticated user from JWT token or API key
pub struct AuthenticatedUser(pub UserClaims);

#[async_trait]
impl FromRequestParts<AppState> for AuthenticatedUser {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        claims_from_parts(parts, state)
            .await?
            .map(AuthenticatedUser)
            .ok_or_else(|| AppError::Authentication("Missing authorization header".to_string()))
    }
}

/// Extractor resolving the caller, anonymous when no credentials are sent
pub struct CurrentCaller(pub Caller);

#[async_trait]
impl FromRequestParts<AppState> for CurrentCaller {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let claims = claims_from_parts(parts, state).await?;
        let caller = state.services.caller(claims.as_ref()).await?;
        Ok(CurrentCaller(caller))
    }
}
