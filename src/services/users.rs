//! Authentication, API keys and user management

use argon2::{
    password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2,
};
use rand::{distributions::Alphanumeric, Rng};

use crate::{
    config::AuthConfig,
    error::{AppError, AppResult},
    models::user::{split_api_key, ApiKey, CreatedApiKey, LoginResponse, User, UserClaims, UserInfo},
    repository::Repository,
};

const API_KEY_PREFIX_LEN: usize = 8;
const API_KEY_SECRET_LEN: usize = 32;

fn random_token(len: usize) -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(len)
        .map(char::from)
        .collect()
}

/// Hash a password (or API key secret) using Argon2
pub fn hash_password(password: &str) -> AppResult<String> {
    let salt = SaltString::generate(&mut OsRng);
    let hash = Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map_err(|e| AppError::Internal(format!("Failed to hash password: {}", e)))?;
    Ok(hash.to_string())
}

pub fn verify_password(hash: &str, password: &str) -> AppResult<bool> {
    let parsed_hash =
        PasswordHash::new(hash).map_err(|_| AppError::Internal("Invalid password hash".to_string()))?;
    Ok(Argon2::default()
        .verify_password(password.as_bytes(), &parsed_hash)
        .is_ok())
}

#[derive(Clone)]
pub struct UsersService {
    repository: Repository,
    config: AuthConfig,
}

impl UsersService {
    pub fn new(repository: Repository, config: AuthConfig) -> Self {
        Self { repository, config }
    }

    /// Authenticate by username and password and issue a JWT
    pub async fn login(&self, username: &str, password: &str) -> AppResult<LoginResponse> {
        let user = self
            .repository
            .users
            .get_by_username(username)
            .await?
            .ok_or_else(|| AppError::Authentication("Invalid username or password".to_string()))?;

        if !user.is_active || !verify_password(&user.password, password)? {
            return Err(AppError::Authentication("Invalid username or password".to_string()));
        }

        let token = self.create_token_for_user(&user)?;
        tracing::info!("User {} logged in", user.username);

        Ok(LoginResponse {
            token,
            token_type: "Bearer".to_string(),
            expires_in: (self.config.jwt_expiration_hours * 3600) as i64,
        })
    }

    fn create_token_for_user(&self, user: &User) -> AppResult<String> {
        UserClaims::for_user(user, self.config.jwt_expiration_hours)
            .create_token(&self.config.jwt_secret)
            .map_err(|e| AppError::Internal(format!("Failed to create token: {}", e)))
    }

    pub async fn get_by_id(&self, id: i32) -> AppResult<User> {
        self.repository.users.get_by_id(id).await
    }

    /// Ids of the user groups of a user (empty for anonymous callers)
    pub async fn group_ids(&self, user_id: Option<i32>) -> AppResult<Vec<i32>> {
        match user_id {
            Some(id) => self.repository.users.group_ids(id).await,
            None => Ok(Vec::new()),
        }
    }

    pub async fn user_info(&self, user_id: i32) -> AppResult<UserInfo> {
        let user = self.repository.users.get_by_id(user_id).await?;
        let groups = self.repository.users.group_names(user_id).await?;
        Ok(UserInfo {
            id: user.id,
            username: user.username,
            email: user.email,
            is_superuser: user.is_superuser,
            groups,
        })
    }

    /// Create a user account (admin CLI)
    pub async fn create_user(
        &self,
        username: &str,
        password: &str,
        email: Option<&str>,
        is_superuser: bool,
    ) -> AppResult<User> {
        let username = username.trim();
        if username.is_empty() {
            return Err(AppError::Validation("Username is required".to_string()));
        }
        if password.is_empty() {
            return Err(AppError::Validation("Password is required".to_string()));
        }
        if self.repository.users.username_exists(username).await? {
            return Err(AppError::Conflict(format!("User '{}' already exists", username)));
        }

        let hash = hash_password(password)?;
        let user = self
            .repository
            .users
            .create(username, &hash, email, is_superuser)
            .await?;
        tracing::info!("Created user {} (superuser: {})", user.username, user.is_superuser);
        Ok(user)
    }

    // API keys

    pub async fn create_api_key(&self, user_id: i32, name: &str) -> AppResult<CreatedApiKey> {
        if !self.config.enable_api_keys {
            return Err(AppError::BadRequest("API keys are disabled".to_string()));
        }
        let prefix = random_token(API_KEY_PREFIX_LEN);
        let secret = random_token(API_KEY_SECRET_LEN);
        let hash = hash_password(&secret)?;

        let key = self
            .repository
            .users
            .create_api_key(user_id, name.trim(), &prefix, &hash)
            .await?;

        Ok(CreatedApiKey {
            id: key.id,
            name: key.name,
            key: format!("{}.{}", prefix, secret),
        })
    }

    pub async fn list_api_keys(&self, user_id: i32) -> AppResult<Vec<ApiKey>> {
        self.repository.users.list_api_keys(user_id).await
    }

    pub async fn delete_api_key(&self, user_id: i32, id: i32) -> AppResult<()> {
        self.repository.users.delete_api_key(user_id, id).await
    }

    /// Resolve `<prefix>.<secret>` to claims of its owner
    pub async fn authenticate_api_key(&self, raw: &str) -> AppResult<UserClaims> {
        let invalid = || AppError::Authentication("Invalid API key".to_string());

        let (prefix, secret) = split_api_key(raw).ok_or_else(invalid)?;
        let key = self
            .repository
            .users
            .get_api_key_by_prefix(prefix)
            .await?
            .ok_or_else(invalid)?;
        if !verify_password(&key.key_hash, secret)? {
            return Err(invalid());
        }

        let user = self.repository.users.get_by_id(key.user_id).await?;
        if !user.is_active {
            return Err(invalid());
        }
        self.repository.users.touch_api_key(key.id).await?;

        Ok(UserClaims::for_user(&user, self.config.jwt_expiration_hours))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_password_hash_round() {
        let hash = hash_password("s3cret").unwrap();
        assert!(hash.starts_with("$argon2"));
        assert!(verify_password(&hash, "s3cret").unwrap());
        assert!(!verify_password(&hash, "other").unwrap());
    }

    #[test]
    fn test_random_token() {
        let token = random_token(API_KEY_SECRET_LEN);
        assert_eq!(token.len(), API_KEY_SECRET_LEN);
        assert!(token.chars().all(|c| c.is_ascii_alphanumeric()));
        let key = format!("{}.{}", random_token(API_KEY_PREFIX_LEN), token);
        assert!(split_api_key(&key).is_some());
    }
}
