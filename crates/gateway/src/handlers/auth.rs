//! Login and password handlers

use axum::{extract::State, Json};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

use crate::AppState;
use followup_common::{
    auth::{check_credential, effective_role, hash_password, AuthContext},
    db::models::AppRole,
    errors::{AppError, Result},
    metrics,
};

/// Login request; parents log in with their phone number
#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct LoginRequest {
    #[validate(length(min = 1, max = 100))]
    pub phone_or_username: String,

    #[validate(length(min = 1))]
    pub password: String,
}

#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct ChangePasswordRequest {
    #[validate(length(min = 6, max = 128))]
    pub new_password: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenResponse {
    pub token: String,
    pub user_id: Uuid,
    pub role: AppRole,
    pub must_change_password: bool,
}

fn validation_error(e: validator::ValidationErrors) -> AppError {
    let field = e.field_errors().keys().next().map(|f| f.to_string());
    AppError::Validation {
        message: e.to_string(),
        field,
    }
}

/// Exchange a phone/username and password for a token
pub async fn login(
    State(state): State<AppState>,
    Json(request): Json<LoginRequest>,
) -> Result<Json<TokenResponse>> {
    request.validate().map_err(validation_error)?;

    let login = request.phone_or_username.trim();

    let user = match state.store.find_user_by_login(login).await? {
        Some(user) if check_credential(&user, &request.password, &state.config.auth.initial_password) => user,
        _ => {
            metrics::record_login(false);
            return Err(AppError::InvalidCredentials);
        }
    };

    let roles = state.store.roles_for_user(user.id).await?;
    let role = effective_role(&roles).ok_or_else(|| AppError::Forbidden {
        message: "Account has no role".to_string(),
    })?;

    let token = state.jwt.generate_token(user.id, role, user.must_change_password)?;
    metrics::record_login(true);

    tracing::info!(user_id = %user.id, role = role.as_str(), "Login succeeded");

    Ok(Json(TokenResponse {
        token,
        user_id: user.id,
        role,
        must_change_password: user.must_change_password,
    }))
}

/// Replace the caller's password and clear the forced change
pub async fn change_password(
    State(state): State<AppState>,
    auth: AuthContext,
    Json(request): Json<ChangePasswordRequest>,
) -> Result<Json<TokenResponse>> {
    request.validate().map_err(validation_error)?;

    if request.new_password == state.config.auth.initial_password {
        return Err(AppError::Validation {
            message: "New password must differ from the initial password".to_string(),
            field: Some("newPassword".to_string()),
        });
    }

    let hash = hash_password(&request.new_password)?;
    let user = state.store.set_password(auth.user_id, &hash).await?;

    let token = state.jwt.generate_token(user.id, auth.role, false)?;

    tracing::info!(user_id = %user.id, "Password changed");

    Ok(Json(TokenResponse {
        token,
        user_id: user.id,
        role: auth.role,
        must_change_password: user.must_change_password,
    }))
}
