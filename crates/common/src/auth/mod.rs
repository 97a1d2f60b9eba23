//! Authentication and authorization utilities
//!
//! Provides:
//! - Password hashing (Argon2id)
//! - JWT token generation and validation
//! - Caller context extraction for handlers

use crate::config::AuthConfig;
use crate::db::models::{AppRole, User};
use crate::errors::{AppError, Result};
use argon2::password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use argon2::Argon2;
use axum::{
    extract::{FromRef, FromRequestParts},
    http::{header::AUTHORIZATION, request::Parts},
};
use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

/// Minimum accepted length for a new password
pub const MIN_PASSWORD_LEN: usize = 6;

/// Extracted authentication context available to handlers
#[derive(Debug, Clone)]
pub struct AuthContext {
    /// Authenticated user
    pub user_id: Uuid,

    /// Effective role
    pub role: AppRole,

    /// Still using the initial password
    pub must_change_password: bool,
}

impl AuthContext {
    /// Require the admin role
    pub fn require_admin(&self) -> Result<()> {
        match self.role {
            AppRole::Admin => Ok(()),
            AppRole::Parent => Err(AppError::Forbidden {
                message: "Admin role required".to_string(),
            }),
        }
    }

    /// Require a parent who has already replaced the initial password
    pub fn require_active_parent(&self) -> Result<()> {
        if self.role != AppRole::Parent {
            return Err(AppError::Forbidden {
                message: "Parent role required".to_string(),
            });
        }
        if self.must_change_password {
            return Err(AppError::PasswordChangeRequired);
        }
        Ok(())
    }
}

/// JWT claims structure
#[derive(Debug, Serialize, Deserialize)]
pub struct JwtClaims {
    /// Subject (user ID)
    pub sub: String,

    /// Effective role
    pub role: AppRole,

    /// Set while the account still uses its initial password
    #[serde(default)]
    pub pwd_reset: bool,

    /// Expiration time (Unix timestamp)
    pub exp: i64,

    /// Issued at (Unix timestamp)
    pub iat: i64,
}

/// JWT token manager
pub struct JwtManager {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    expiration_secs: i64,
}

impl JwtManager {
    /// Create a new JWT manager with the given secret
    pub fn new(secret: &str, expiration_secs: u64) -> Self {
        Self {
            encoding_key: EncodingKey::from_secret(secret.as_bytes()),
            decoding_key: DecodingKey::from_secret(secret.as_bytes()),
            expiration_secs: expiration_secs as i64,
        }
    }

    /// Build from configuration, falling back to a per-process secret
    pub fn from_config(config: &AuthConfig) -> Self {
        match config.jwt_secret.as_deref() {
            Some(secret) if !secret.is_empty() => Self::new(secret, config.jwt_expiration_secs),
            _ => {
                tracing::warn!("No JWT secret configured; tokens will not survive a restart");
                let secret = format!("{}{}", Uuid::new_v4().simple(), Uuid::new_v4().simple());
                Self::new(&secret, config.jwt_expiration_secs)
            }
        }
    }

    /// Generate a new JWT token
    pub fn generate_token(&self, user_id: Uuid, role: AppRole, pwd_reset: bool) -> Result<String> {
        let now = Utc::now();
        let exp = now + Duration::seconds(self.expiration_secs);

        let claims = JwtClaims {
            sub: user_id.to_string(),
            role,
            pwd_reset,
            exp: exp.timestamp(),
            iat: now.timestamp(),
        };

        encode(&Header::default(), &claims, &self.encoding_key)
            .map_err(|e| AppError::Internal {
                message: format!("Failed to generate token: {}", e)
            })
    }

    /// Validate and decode a JWT token
    pub fn validate_token(&self, token: &str) -> Result<JwtClaims> {
        decode::<JwtClaims>(token, &self.decoding_key, &Validation::default())
            .map(|data| data.claims)
            .map_err(|e| {
                match e.kind() {
                    jsonwebtoken::errors::ErrorKind::ExpiredSignature => {
                        AppError::ExpiredToken
                    }
                    _ => AppError::Unauthorized {
                        message: "Invalid token".to_string(),
                    },
                }
            })
    }
}

/// Hash a password for storage
pub fn hash_password(password: &str) -> Result<String> {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|e| AppError::Internal {
            message: format!("Failed to hash password: {}", e),
        })
}

/// Check a password against a stored Argon2 hash
pub fn verify_password(password: &str, stored_hash: &str) -> bool {
    match PasswordHash::new(stored_hash) {
        Ok(parsed) => Argon2::default()
            .verify_password(password.as_bytes(), &parsed)
            .is_ok(),
        Err(_) => false,
    }
}

/// Check a login attempt. Accounts without a credential accept the initial password.
pub fn check_credential(user: &User, password: &str, initial_password: &str) -> bool {
    match user.password_hash.as_deref() {
        Some(hash) => verify_password(password, hash),
        None => password == initial_password,
    }
}

/// Pick the effective role from a user's grants
pub fn effective_role(roles: &[AppRole]) -> Option<AppRole> {
    if roles.contains(&AppRole::Admin) {
        Some(AppRole::Admin)
    } else if roles.contains(&AppRole::Parent) {
        Some(AppRole::Parent)
    } else {
        None
    }
}

/// Extract the token from a `Bearer` Authorization header
pub fn extract_bearer(auth_header: &str) -> Option<&str> {
    auth_header
        .strip_prefix("Bearer ")
        .map(str::trim)
        .filter(|token| !token.is_empty())
}

/// Axum extractor for AuthContext
impl<S> FromRequestParts<S> for AuthContext
where
    Arc<JwtManager>: FromRef<S>,
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self> {
        let auth_header = parts
            .headers
            .get(AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| AppError::Unauthorized {
                message: "Missing Authorization header".to_string(),
            })?;

        let token = extract_bearer(auth_header).ok_or_else(|| AppError::Unauthorized {
            message: "Expected a Bearer token".to_string(),
        })?;

        let jwt = Arc::<JwtManager>::from_ref(state);
        let claims = jwt.validate_token(token)?;

        let user_id = Uuid::parse_str(&claims.sub).map_err(|_| AppError::Unauthorized {
            message: "Invalid token subject".to_string(),
        })?;

        Ok(AuthContext {
            user_id,
            role: claims.role,
            must_change_password: claims.pwd_reset,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn user(password_hash: Option<String>) -> User {
        User {
            id: Uuid::new_v4(),
            phone_or_username: "01001234567".to_string(),
            auth_id: None,
            password_hash,
            must_change_password: true,
            created_at: Utc::now().into(),
        }
    }

    #[test]
    fn test_password_hash_roundtrip() {
        let hash = hash_password("s3cret!").unwrap();
        assert!(hash.starts_with("$argon2"));
        assert!(verify_password("s3cret!", &hash));
        assert!(!verify_password("wrong", &hash));
        assert!(!verify_password("s3cret!", "not-a-phc-string"));
    }

    #[test]
    fn test_initial_password_only_without_credential() {
        let fresh = user(None);
        assert!(check_credential(&fresh, "123456", "123456"));
        assert!(!check_credential(&fresh, "654321", "123456"));

        let hash = hash_password("new-pass").unwrap();
        let changed = user(Some(hash));
        assert!(check_credential(&changed, "new-pass", "123456"));
        assert!(!check_credential(&changed, "123456", "123456"));
    }

    #[test]
    fn test_effective_role() {
        assert_eq!(effective_role(&[AppRole::Parent, AppRole::Admin]), Some(AppRole::Admin));
        assert_eq!(effective_role(&[AppRole::Parent]), Some(AppRole::Parent));
        assert_eq!(effective_role(&[]), None);
    }

    #[test]
    fn test_extract_bearer() {
        assert_eq!(extract_bearer("Bearer abc.def"), Some("abc.def"));
        assert_eq!(extract_bearer("Bearer "), None);
        assert_eq!(extract_bearer("abc.def"), None);
        assert_eq!(extract_bearer("Basic abc"), None);
    }

    #[test]
    fn test_jwt_roundtrip() {
        let manager = JwtManager::new("test_secret", 3600);
        let user_id = Uuid::new_v4();

        let token = manager.generate_token(user_id, AppRole::Parent, true).unwrap();
        let claims = manager.validate_token(&token).unwrap();

        assert_eq!(claims.sub, user_id.to_string());
        assert_eq!(claims.role, AppRole::Parent);
        assert!(claims.pwd_reset);
    }

    #[test]
    fn test_jwt_rejects_foreign_secret() {
        let issuer = JwtManager::new("one", 3600);
        let verifier = JwtManager::new("two", 3600);
        let token = issuer.generate_token(Uuid::new_v4(), AppRole::Admin, false).unwrap();

        assert!(matches!(
            verifier.validate_token(&token),
            Err(AppError::Unauthorized { .. })
        ));
    }

    #[test]
    fn test_context_guards() {
        let parent = AuthContext {
            user_id: Uuid::new_v4(),
            role: AppRole::Parent,
            must_change_password: true,
        };
        assert!(matches!(parent.require_active_parent(), Err(AppError::PasswordChangeRequired)));
        assert!(parent.require_admin().is_err());

        let admin = AuthContext { role: AppRole::Admin, must_change_password: false, ..parent };
        assert!(admin.require_admin().is_ok());
        assert!(admin.require_active_parent().is_err());
    }
}
