//! Expense routes
//!
//! Handlers only validate parameters and call [`ExpenseService`]; absent
//! results come back as `{ "data": null }` with status 200.

use axum::{
    extract::{Query, State},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tally_common::types::{ExpenseRecord, Report, UploadSummary};

use super::response::DataResponse;
use crate::error::ApiError;
use crate::service::ExpenseService;

pub fn expense_routes() -> Router<ExpenseService> {
    Router::new()
        .route("/", get(get_expense))
        .route("/upload", post(upload))
        .route("/report", get(get_report))
        .route("/summary", get(get_summary))
}

#[derive(Debug, Deserialize)]
pub struct UploadRequest {
    #[serde(default)]
    pub url: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadAccepted {
    pub summary_id: String,
}

#[derive(Debug, Deserialize)]
pub struct ExpenseQuery {
    pub id: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportQuery {
    pub company_id: Option<String>,
    pub report_id: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SummaryQuery {
    pub summary_id: Option<String>,
}

fn required(name: &str, value: Option<String>) -> Result<String, ApiError> {
    match value.map(|v| v.trim().to_string()) {
        Some(v) if !v.is_empty() => Ok(v),
        _ => Err(ApiError::Validation(format!("{} is required", name))),
    }
}

/// POST /v1/expense/upload `{ "url": "https://s3.<region>.amazonaws.com/<bucket>/<key>" }`
async fn upload(
    State(service): State<ExpenseService>,
    Json(request): Json<UploadRequest>,
) -> Result<DataResponse<UploadAccepted>, ApiError> {
    let url = required("url", Some(request.url))?;
    let accepted = service
        .submit_ingestion(&url)
        .await?
        .map(|summary_id| UploadAccepted { summary_id });
    Ok(DataResponse::new(accepted))
}

/// GET /v1/expense?id=
async fn get_expense(
    State(service): State<ExpenseService>,
    Query(query): Query<ExpenseQuery>,
) -> Result<DataResponse<ExpenseRecord>, ApiError> {
    let id = required("id", query.id)?;
    Ok(DataResponse::new(service.get_expense(&id).await?))
}

/// GET /v1/expense/report?companyId=&reportId=
async fn get_report(
    State(service): State<ExpenseService>,
    Query(query): Query<ReportQuery>,
) -> Result<DataResponse<Report>, ApiError> {
    let company_id = required("companyId", query.company_id)?;
    let report_id = required("reportId", query.report_id)?;
    Ok(DataResponse::new(
        service.get_report(&company_id, &report_id).await?,
    ))
}

/// GET /v1/expense/summary?summaryId=
async fn get_summary(
    State(service): State<ExpenseService>,
    Query(query): Query<SummaryQuery>,
) -> Result<DataResponse<UploadSummary>, ApiError> {
    let summary_id = required("summaryId", query.summary_id)?;
    Ok(DataResponse::new(service.get_summary(&summary_id).await?))
}
