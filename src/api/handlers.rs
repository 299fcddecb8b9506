//! REST API handlers for report execution
//!
//! These handlers use the shared ReportService.

use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::warn;

use super::service::ReportService;
use crate::error::ReportError;
use crate::report::sql::CompiledQuery;
use crate::report::{ExecutedReportData, ReportDefinition};

// ============================================================================
// Request / Response Types
// ============================================================================

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecuteRequest {
    pub tenant_id: String,
    pub definition: ReportDefinition,
    /// Reference time for date presets; defaults to the current time.
    pub now: Option<DateTime<Utc>>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompileRequest {
    pub tenant_id: String,
    pub definition: ReportDefinition,
    pub section_index: usize,
    pub now: Option<DateTime<Utc>>,
}

#[derive(Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

type ApiError = (StatusCode, Json<ErrorResponse>);

/// Definition problems are the caller's fault; store failures are ours.
fn error_response(e: anyhow::Error) -> ApiError {
    let status = match e.downcast_ref::<ReportError>() {
        Some(ReportError::Store(_)) | Some(ReportError::Fetch(_)) | Some(ReportError::Task(_)) => {
            StatusCode::INTERNAL_SERVER_ERROR
        }
        _ => StatusCode::BAD_REQUEST,
    };
    warn!("Request failed ({}): {}", status, e);
    (status, Json(ErrorResponse { error: e.to_string() }))
}

// ============================================================================
// Handlers
// ============================================================================

pub type AppState = Arc<ReportService>;

/// GET /api/v1/health
pub async fn health() -> impl IntoResponse {
    Json(serde_json::json!({"status": "ok"}))
}

/// POST /api/v1/reports/execute
pub async fn execute_report(
    State(service): State<AppState>,
    Json(request): Json<ExecuteRequest>,
) -> Result<Json<ExecutedReportData>, ApiError> {
    let now = request.now.unwrap_or_else(Utc::now);
    match service.execute(&request.definition, &request.tenant_id, now).await {
        Ok(data) => Ok(Json(data)),
        Err(e) => Err(error_response(e)),
    }
}

/// POST /api/v1/reports/sql
pub async fn compile_sql(
    State(service): State<AppState>,
    Json(request): Json<CompileRequest>,
) -> Result<Json<CompiledQuery>, ApiError> {
    let now = request.now.unwrap_or_else(Utc::now);
    service
        .compile_section(&request.definition, request.section_index, &request.tenant_id, now)
        .map(Json)
        .map_err(error_response)
}
