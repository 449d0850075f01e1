//! User model, authentication claims and API keys

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use utoipa::ToSchema;
use validator::Validate;

use crate::error::AppError;

/// Full user model from database
#[derive(Debug, Clone, Serialize, Deserialize, FromRow, ToSchema)]
pub struct User {
    pub id: i32,
    pub username: String,
    /// Hashed password (argon2)
    #[serde(skip_serializing)]
    pub password: String,
    pub email: Option<String>,
    pub is_superuser: bool,
    pub is_active: bool,
    pub created_date: DateTime<Utc>,
}

/// Public view of the authenticated user
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct UserInfo {
    pub id: i32,
    pub username: String,
    pub email: Option<String>,
    pub is_superuser: bool,
    pub groups: Vec<String>,
}

/// Login request
#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct LoginRequest {
    #[validate(length(min = 1, message = "Username is required"))]
    pub username: String,
    #[validate(length(min = 1, message = "Password is required"))]
    pub password: String,
}

/// Login response
#[derive(Debug, Serialize, ToSchema)]
pub struct LoginResponse {
    pub token: String,
    pub token_type: String,
    pub expires_in: i64,
}

/// JWT Claims for authenticated users
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserClaims {
    pub sub: String,
    pub user_id: i32,
    pub is_superuser: bool,
    pub exp: i64,
    pub iat: i64,
}

impl UserClaims {
    pub fn for_user(user: &User, expiration_hours: u64) -> Self {
        let now = Utc::now().timestamp();
        Self {
            sub: user.username.clone(),
            user_id: user.id,
            is_superuser: user.is_superuser,
            exp: now + (expiration_hours as i64) * 3600,
            iat: now,
        }
    }

    /// Create a new JWT token
    pub fn create_token(&self, secret: &str) -> Result<String, jsonwebtoken::errors::Error> {
        use jsonwebtoken::{encode, EncodingKey, Header};
        encode(
            &Header::default(),
            self,
            &EncodingKey::from_secret(secret.as_bytes()),
        )
    }

    /// Parse JWT token
    pub fn from_token(token: &str, secret: &str) -> Result<Self, jsonwebtoken::errors::Error> {
        use jsonwebtoken::{decode, DecodingKey, Validation};
        let token_data = decode::<Self>(
            token,
            &DecodingKey::from_secret(secret.as_bytes()),
            &Validation::default(),
        )?;
        Ok(token_data.claims)
    }

    /// Require superuser privileges
    pub fn require_admin(&self) -> Result<(), AppError> {
        if self.is_superuser {
            Ok(())
        } else {
            Err(AppError::Authorization("Administrator privileges required".to_string()))
        }
    }
}

/// Stored API key; the secret part is only kept as an argon2 hash
#[derive(Debug, Clone, Serialize, FromRow, ToSchema)]
pub struct ApiKey {
    pub id: i32,
    pub user_id: i32,
    pub name: String,
    pub key_prefix: String,
    #[serde(skip_serializing)]
    pub key_hash: String,
    pub active: bool,
    pub created_date: DateTime<Utc>,
    pub last_used: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct CreateApiKey {
    #[validate(length(min = 1, max = 50, message = "Name must be 1-50 characters"))]
    pub name: String,
}

/// Returned once, at creation; the full key cannot be recovered later
#[derive(Debug, Serialize, ToSchema)]
pub struct CreatedApiKey {
    pub id: i32,
    pub name: String,
    pub key: String,
}

/// Split `<prefix>.<secret>`; anything else is not an API key
pub fn split_api_key(raw: &str) -> Option<(&str, &str)> {
    let (prefix, secret) = raw.split_once('.')?;
    if prefix.is_empty() || secret.is_empty() || secret.contains('.') {
        return None;
    }
    Some((prefix, secret))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn user(superuser: bool) -> User {
        User {
            id: 3,
            username: "alice".to_string(),
            password: String::new(),
            email: None,
            is_superuser: superuser,
            is_active: true,
            created_date: Utc::now(),
        }
    }

    #[test]
    fn test_token_round_trip() {
        let claims = UserClaims::for_user(&user(false), 1);
        let token = claims.create_token("secret").unwrap();
        let parsed = UserClaims::from_token(&token, "secret").unwrap();
        assert_eq!(parsed.user_id, 3);
        assert_eq!(parsed.sub, "alice");
        assert!(UserClaims::from_token(&token, "other").is_err());
    }

    #[test]
    fn test_require_admin() {
        assert!(UserClaims::for_user(&user(true), 1).require_admin().is_ok());
        assert!(UserClaims::for_user(&user(false), 1).require_admin().is_err());
    }

    #[test]
    fn test_split_api_key() {
        assert_eq!(split_api_key("abcd1234.s3cr3t"), Some(("abcd1234", "s3cr3t")));
        assert_eq!(split_api_key("eyJhbGciOi.eyJzdWIi.sig"), None);
        assert_eq!(split_api_key("noseparator"), None);
        assert_eq!(split_api_key(".secret"), None);
    }
}
