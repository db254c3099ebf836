use axum::{
    extract::{rejection::QueryRejection, Multipart, Query, State},
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, error};

use super::AppState;
use crate::engine::{EvaluationRequest, MemoryUpload};
use crate::error::{XrayError, XrayResult};
use crate::ml::MemberStatus;

/// Multipart field carrying the image
pub const UPLOAD_FIELD: &str = "file";

/// Errors go back as `{"error": ...}` with a 200 status; the browser client
/// reads the `error` field from successful responses.
fn error_response(err: XrayError) -> Response {
    error!("Request failed: {}", err);
    Json(json!({ "error": err.to_string() })).into_response()
}

pub async fn root() -> impl IntoResponse {
    Json(json!({ "message": "X-Ray Insight API is running" }))
}

// === Health Check ===

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
    pub models_loaded: usize,
    pub uptime_seconds: i64,
    pub members: Vec<MemberStatus>,
}

pub async fn health_check(State(state): State<AppState>) -> impl IntoResponse {
    let status = if state.engine.is_loaded() { "ok" } else { "degraded" };
    Json(HealthResponse {
        status,
        version: env!("CARGO_PKG_VERSION"),
        models_loaded: state.engine.model_count(),
        uptime_seconds: state.uptime_seconds(),
        members: state.engine.members().to_vec(),
    })
}

// === Prediction ===

async fn read_upload(multipart: &mut Multipart) -> XrayResult<MemoryUpload> {
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| XrayError::Multipart(e.to_string()))?
    {
        if field.name() != Some(UPLOAD_FIELD) {
            continue;
        }

        let filename = field.file_name().unwrap_or_default().to_string();
        let bytes = field
            .bytes()
            .await
            .map_err(|e| XrayError::Multipart(e.to_string()))?;
        return Ok(MemoryUpload::new(filename, bytes));
    }

    Err(XrayError::MissingUpload(UPLOAD_FIELD.to_string()))
}

pub async fn predict(State(state): State<AppState>, mut multipart: Multipart) -> Response {
    if !state.engine.is_loaded() {
        return error_response(XrayError::ModelNotLoaded);
    }

    let upload = match read_upload(&mut multipart).await {
        Ok(upload) => upload,
        Err(e) => return error_response(e),
    };

    match state.engine.predict(&upload).await {
        Ok(result) => {
            debug!("Prediction: {} {:.2}%", result.prediction, result.confidence);
            Json(result).into_response()
        }
        Err(e) => error_response(e),
    }
}

// === Batch Evaluation ===

#[derive(Debug, Deserialize)]
pub struct TestQuery {
    pub category: Option<String>,
    pub limit: Option<usize>,
}

pub async fn run_batch_test(
    State(state): State<AppState>,
    query: Result<Query<TestQuery>, QueryRejection>,
) -> Response {
    let Query(query) = match query {
        Ok(query) => query,
        Err(rejection) => return error_response(XrayError::InvalidQuery(rejection.body_text())),
    };
    let request = EvaluationRequest::parse(
        query.category.as_deref(),
        query.limit.unwrap_or(state.default_limit),
    );

    match state.evaluator.run(&state.engine, &request).await {
        Ok(report) => Json(report).into_response(),
        Err(e) => error_response(e),
    }
}
