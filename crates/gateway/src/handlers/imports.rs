//! Spreadsheet import handlers
//!
//! Uploads are admin-only; a missing or non-admin token is rejected by the
//! extractor with the generic 401/403 error envelope. Past that point the
//! upload contract the admin console expects applies: a fatal failure,
//! including a body that does not parse, answers 500 with
//! `{ success: false, error }`.
//!
//! Each run is spawned onto its own task so a request timeout or a dropped
//! connection never stops a batch halfway through its rows.

use axum::{
    extract::{rejection::JsonRejection, State},
    http::StatusCode,
    Json,
};
use followup_common::{auth::AuthContext, errors::AppError};
use followup_ingestion::{ExamImport, ImportError, ImportReport, SessionImport, SheetData};
use serde::{Deserialize, Serialize};
use tokio::task::JoinError;

use crate::AppState;

/// Body of a per-session upload
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionImportRequest {
    pub excel_data: SheetData,
    pub sheet_name: String,
    pub session_number: i32,
    #[serde(default)]
    pub finish_time: Option<String>,
    pub hw_column: String,
}

/// Body of a cumulative exam upload
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExamImportRequest {
    pub excel_data: SheetData,
    pub sheet_name: String,
    pub exam_name: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportResponse {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub processed_count: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub errors: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

type ImportReply = (StatusCode, Json<ImportResponse>);

fn reply(outcome: Result<Result<ImportReport, ImportError>, JoinError>) -> ImportReply {
    match outcome {
        Ok(Ok(report)) => (
            StatusCode::OK,
            Json(ImportResponse {
                success: true,
                processed_count: Some(report.processed),
                errors: (!report.errors.is_empty()).then_some(report.errors),
                error: None,
            }),
        ),
        Ok(Err(e)) => failure(e.to_string()),
        Err(e) => {
            tracing::error!(error = %e, "Import task failed");
            failure("Import task failed".to_string())
        }
    }
}

fn failure(error: String) -> ImportReply {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(ImportResponse {
            success: false,
            processed_count: None,
            errors: None,
            error: Some(error),
        }),
    )
}

/// Import per-session results
pub async fn import_sessions(
    State(state): State<AppState>,
    auth: AuthContext,
    payload: Result<Json<SessionImportRequest>, JsonRejection>,
) -> Result<ImportReply, AppError> {
    auth.require_admin()?;

    let Json(request) = match payload {
        Ok(payload) => payload,
        Err(rejection) => {
            tracing::warn!(error = %rejection.body_text(), "Rejected session upload");
            return Ok(failure(rejection.body_text()));
        }
    };

    tracing::info!(
        sheet = %request.sheet_name,
        session = request.session_number,
        rows = request.excel_data.len(),
        uploaded_by = %auth.user_id,
        "Session upload received"
    );

    let params = SessionImport {
        sheet_name: request.sheet_name,
        session_number: request.session_number,
        homework_column: request.hw_column,
        finish_time: request.finish_time,
    };

    let rows = request.excel_data;
    let reconciler = state.reconciler.clone();
    let run = tokio::spawn(async move { reconciler.import_sessions(&rows, &params).await });

    Ok(reply(run.await))
}

/// Import cumulative exam results
pub async fn import_exam(
    State(state): State<AppState>,
    auth: AuthContext,
    payload: Result<Json<ExamImportRequest>, JsonRejection>,
) -> Result<ImportReply, AppError> {
    auth.require_admin()?;

    let Json(request) = match payload {
        Ok(payload) => payload,
        Err(rejection) => {
            tracing::warn!(error = %rejection.body_text(), "Rejected exam upload");
            return Ok(failure(rejection.body_text()));
        }
    };

    tracing::info!(
        sheet = %request.sheet_name,
        exam = %request.exam_name,
        rows = request.excel_data.len(),
        uploaded_by = %auth.user_id,
        "Exam upload received"
    );

    let params = ExamImport {
        sheet_name: request.sheet_name,
        exam_name: request.exam_name,
    };

    let rows = request.excel_data;
    let reconciler = state.reconciler.clone();
    let run = tokio::spawn(async move { reconciler.import_exam(&rows, &params).await });

    Ok(reply(run.await))
}
