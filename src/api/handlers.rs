use axum::{
    extract::{rejection::JsonRejection, Path, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use serde::Serialize;
use serde_json::json;
use tracing::{error, info};

use crate::cascade::{DeletionError, DeletionReport};
use crate::reconcile::{BatchReport, DriftReport, SnapshotOutcome, SnapshotValues, PROJECT_NOT_FOUND};
use crate::state::AppState;
use crate::AppError;

// ============================================================================
// Errors
// ============================================================================

#[derive(Debug)]
pub enum ApiError {
    BadRequest(AppError),
    NotFound(AppError),
    Internal(AppError),
    /// The project row survived the cascade.
    Deletion(DeletionError),
}

impl From<AppError> for ApiError {
    fn from(err: AppError) -> Self {
        if err.code() == PROJECT_NOT_FOUND {
            ApiError::NotFound(err)
        } else if err.code().starts_with("SNAPSHOT/INVALID") {
            ApiError::BadRequest(err)
        } else {
            ApiError::Internal(err)
        }
    }
}

impl From<DeletionError> for ApiError {
    fn from(err: DeletionError) -> Self {
        ApiError::Deletion(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> axum::response::Response {
        let (status, body) = match self {
            ApiError::BadRequest(err) => (
                StatusCode::BAD_REQUEST,
                json!({ "error": "Invalid request", "details": err.message(), "code": err.code(), "context": err.context() }),
            ),
            ApiError::NotFound(err) => (
                StatusCode::NOT_FOUND,
                json!({ "error": "Not found", "details": err.message(), "code": err.code() }),
            ),
            ApiError::Internal(err) => {
                error!(target: "sitedesk", event = "api_internal_error", error = %err);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    json!({ "error": "Internal error", "details": err.to_string(), "code": err.code() }),
                )
            }
            ApiError::Deletion(err) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                json!({
                    "error": "Failed to delete project",
                    "details": err.error.message(),
                    "code": err.category.as_str(),
                    "hint": err.hint(),
                    "report": err.report,
                }),
            ),
        };
        (status, Json(body)).into_response()
    }
}

fn bad_body(rejection: JsonRejection) -> ApiError {
    ApiError::BadRequest(AppError::new("API/INVALID_BODY", rejection.body_text()))
}

// ============================================================================
// Health check
// ============================================================================

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
}

pub async fn health(State(state): State<AppState>) -> (StatusCode, Json<HealthResponse>) {
    let reachable = sqlx::query_scalar::<_, i64>("SELECT 1")
        .fetch_one(state.maintenance.pool())
        .await
        .is_ok();
    let (code, status) = if reachable {
        (StatusCode::OK, "ok")
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "unhealthy")
    };
    (
        code,
        Json(HealthResponse {
            status: status.to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }),
    )
}

// ============================================================================
// Aggregates
// ============================================================================

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeleteResponse {
    pub success: bool,
    pub report: DeletionReport,
    /// Rows that still reference the deleted project.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
}

/// Tear down a project and everything it owns.
///
/// Per-table failures are reported in the body of a 200; only a project row
/// that could not be deleted turns into a 500.
pub async fn delete_aggregate(
    State(state): State<AppState>,
    Path(root_id): Path<String>,
) -> Result<Json<DeleteResponse>, ApiError> {
    delete_root(&state, root_id).await
}

/// `DELETE /aggregates/recompute` is matched by the static route, so a project
/// whose id is literally `recompute` is deleted from here.
pub async fn delete_recompute_aggregate(
    State(state): State<AppState>,
) -> Result<Json<DeleteResponse>, ApiError> {
    delete_root(&state, RECOMPUTE_SEGMENT.to_string()).await
}

async fn delete_root(state: &AppState, root_id: String) -> Result<Json<DeleteResponse>, ApiError> {
    let report = state.maintenance.delete_project(&root_id).await?;
    info!(
        target: "sitedesk",
        event = "api_delete_aggregate",
        project_id = %root_id,
        total_deleted = report.total_deleted
    );
    Ok(Json(DeleteResponse {
        success: true,
        warnings: report.warnings(),
        report,
    }))
}

const RECOMPUTE_SEGMENT: &str = "recompute";

pub async fn recompute_all(State(state): State<AppState>) -> Result<Json<BatchReport>, ApiError> {
    let report = state.maintenance.recompute_all().await?;
    Ok(Json(report))
}

/// Read-only drift analysis, top entries only.
pub async fn drift_analysis(State(state): State<AppState>) -> Result<Json<DriftReport>, ApiError> {
    let report = state.maintenance.drift_report().await?;
    Ok(Json(report))
}

pub async fn update_financials(
    State(state): State<AppState>,
    Path(root_id): Path<String>,
    payload: Result<Json<SnapshotValues>, JsonRejection>,
) -> Result<Json<SnapshotOutcome>, ApiError> {
    let Json(values) = payload.map_err(bad_body)?;
    values.validate()?;
    let outcome = state.maintenance.reconcile_snapshot(&root_id, &values).await?;
    Ok(Json(outcome))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::FailureCategory;

    #[test]
    fn app_errors_map_to_status_families() {
        let not_found = ApiError::from(AppError::new(PROJECT_NOT_FOUND, "gone"));
        assert!(matches!(not_found, ApiError::NotFound(_)));
        let invalid = ApiError::from(AppError::new("SNAPSHOT/INVALID_AMOUNT", "negative"));
        assert!(matches!(invalid, ApiError::BadRequest(_)));
        let other = ApiError::from(AppError::new("Sqlite/5", "busy"));
        assert!(matches!(other, ApiError::Internal(_)));
    }

    #[test]
    fn deletion_failure_is_a_server_error() {
        let err = DeletionError {
            category: FailureCategory::ForeignKeyViolation,
            error: AppError::new("Sqlite/787", "FOREIGN KEY constraint failed"),
            report: Box::new(DeletionReport::new("p1")),
        };
        let response = ApiError::from(err).into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
