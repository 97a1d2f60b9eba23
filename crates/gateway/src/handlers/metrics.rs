//! Prometheus scrape endpoint

use axum::extract::State;
use crate::AppState;
use followup_common::errors::{AppError, Result};

/// Render the Prometheus text exposition
pub async fn render(State(state): State<AppState>) -> Result<String> {
    state
        .metrics
        .as_ref()
        .map(|handle| handle.render())
        .ok_or_else(|| AppError::NotFound {
            resource_type: "route".to_string(),
            id: "/metrics".to_string(),
        })
}
