//! REST facade for the control plane, under `/api/url-content`.
//!
//! Validation errors are 400, missing things are 404; per-URL rejections
//! are not errors at all, they ride back in the 200 body's `skipped`
//! list. Terminal scrape failures surface through the record's own
//! `status`/`errorMessage`, never through an HTTP error.

use crate::control::{ControlPlane, SubmitOutcome};
use crate::maintenance::Maintenance;
use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use webtrawl_core::record::is_valid_id;
use webtrawl_core::{Error, FetchRecord, RecordFilter, Repository, ScrapeStatus};

#[derive(Clone)]
pub struct ApiState {
    pub control: Arc<ControlPlane>,
    pub repo: Arc<dyn Repository>,
    pub maintenance: Arc<Maintenance>,
}

pub fn router(state: ApiState) -> Router {
    Router::new()
        .route("/api/url-content", post(submit).get(list))
        .route("/api/url-content/by-url", get(by_url))
        .route("/api/url-content/latest", get(latest))
        .route("/api/url-content/fix-inconsistencies", post(fix_inconsistencies))
        .route("/api/url-content/:id", get(by_id))
        .with_state(state)
}

pub async fn serve(addr: &str, state: ApiState) -> std::io::Result<()> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(addr = %listener.local_addr()?, "http api listening");
    axum::serve(listener, router(state)).await
}

struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    fn bad_request(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            message: message.into(),
        }
    }

    fn not_found(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::NOT_FOUND,
            message: message.into(),
        }
    }
}

impl From<Error> for ApiError {
    fn from(e: Error) -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            message: e.to_string(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = Json(serde_json::json!({ "error": self.message }));
        (self.status, body).into_response()
    }
}

#[derive(Debug, Deserialize)]
struct SubmitBody {
    urls: Vec<String>,
}

async fn submit(
    State(state): State<ApiState>,
    body: Result<Json<SubmitBody>, JsonRejection>,
) -> Result<Json<SubmitOutcome>, ApiError> {
    let Json(body) = body.map_err(|e| ApiError::bad_request(e.body_text()))?;
    if body.urls.is_empty() || body.urls.len() > 100 {
        return Err(ApiError::bad_request(
            "urls must contain between 1 and 100 entries",
        ));
    }
    if body.urls.iter().any(|u| u.trim().is_empty()) {
        return Err(ApiError::bad_request("urls must be non-empty strings"));
    }
    Ok(Json(state.control.submit(&body.urls).await))
}

#[derive(Debug, Deserialize)]
struct ListParams {
    limit: Option<usize>,
    offset: Option<usize>,
    status: Option<ScrapeStatus>,
}

async fn list(
    State(state): State<ApiState>,
    Query(params): Query<ListParams>,
) -> Result<Json<Vec<FetchRecord>>, ApiError> {
    let limit = params.limit.unwrap_or(50);
    if limit == 0 || limit > 500 {
        return Err(ApiError::bad_request("limit must be between 1 and 500"));
    }
    let records = state
        .repo
        .find_all(
            RecordFilter {
                status: params.status,
            },
            limit,
            params.offset.unwrap_or(0),
        )
        .await?;
    Ok(Json(records))
}

#[derive(Debug, Deserialize)]
struct UrlParams {
    url: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct HistoryResponse {
    url: String,
    total_scrapes: usize,
    scrapes: Vec<FetchRecord>,
}

async fn by_url(
    State(state): State<ApiState>,
    Query(params): Query<UrlParams>,
) -> Result<Json<HistoryResponse>, ApiError> {
    let url = required_url(params)?;
    let scrapes = state.repo.history(&url).await?;
    Ok(Json(HistoryResponse {
        url,
        total_scrapes: scrapes.len(),
        scrapes,
    }))
}

async fn latest(
    State(state): State<ApiState>,
    Query(params): Query<UrlParams>,
) -> Result<Json<FetchRecord>, ApiError> {
    let url = required_url(params)?;
    match state.repo.find_latest_success_by_url(&url).await? {
        Some(record) => Ok(Json(record)),
        None => Err(ApiError::not_found(format!(
            "no successful scrape for {url}"
        ))),
    }
}

async fn by_id(
    State(state): State<ApiState>,
    Path(id): Path<String>,
) -> Result<Json<FetchRecord>, ApiError> {
    if !is_valid_id(&id) {
        return Err(ApiError::bad_request("id must be a 24-character hex string"));
    }
    match state.repo.find_by_id(&id).await? {
        Some(record) => Ok(Json(record)),
        None => Err(ApiError::not_found("record not found")),
    }
}

#[derive(Debug, Serialize)]
struct FixResponse {
    fixed: usize,
    message: String,
}

async fn fix_inconsistencies(
    State(state): State<ApiState>,
) -> Result<Json<FixResponse>, ApiError> {
    let fixed = state.maintenance.fix_inconsistencies().await?;
    Ok(Json(FixResponse {
        fixed,
        message: format!("Fixed {fixed} inconsistent record(s)"),
    }))
}

fn required_url(params: UrlParams) -> Result<String, ApiError> {
    params
        .url
        .map(|u| u.trim().to_string())
        .filter(|u| !u.is_empty())
        .ok_or_else(|| ApiError::bad_request("url query parameter is required"))
}
