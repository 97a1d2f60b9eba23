//! Sheet administration handlers

use axum::{extract::State, http::StatusCode, Json};
use serde::Deserialize;
use validator::Validate;

use crate::AppState;
use followup_common::{
    auth::AuthContext,
    db::models::Sheet,
    errors::{AppError, Result},
};

#[derive(Debug, Deserialize, Validate)]
pub struct CreateSheetRequest {
    #[validate(length(min = 1, max = 200))]
    pub name: String,
}

/// List all sheets by name
pub async fn list_sheets(
    State(state): State<AppState>,
    auth: AuthContext,
) -> Result<Json<Vec<Sheet>>> {
    auth.require_admin()?;
    Ok(Json(state.store.list_sheets().await?))
}

/// Create a sheet; an existing sheet with the same name is returned as is
pub async fn create_sheet(
    State(state): State<AppState>,
    auth: AuthContext,
    Json(request): Json<CreateSheetRequest>,
) -> Result<(StatusCode, Json<Sheet>)> {
    auth.require_admin()?;

    let name = request.name.trim();
    if name.is_empty() {
        return Err(AppError::Validation {
            message: "Sheet name is required".to_string(),
            field: Some("name".to_string()),
        });
    }

    let sheet = state.store.create_sheet(name).await?;
    tracing::info!(sheet_id = %sheet.id, name = %sheet.name, "Sheet ensured");

    Ok((StatusCode::CREATED, Json(sheet)))
}
