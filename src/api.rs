//! HTTP surface of the executor

use std::sync::Arc;

use axum::{
    extract::{rejection::JsonRejection, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use serde_json::{json, Value};
use tracing::warn;

use crate::executor::Executor;
use crate::models::{ExecutionResponse, Submission};

pub fn routes(executor: Arc<Executor>) -> Router {
    Router::new()
        .route("/", post(execute))
        .route("/execute", post(execute))
        .route("/healthz", get(health))
        .route("/languages", get(languages))
        .with_state(executor)
}

async fn health() -> Json<Value> {
    Json(json!({ "ok": true }))
}

async fn languages(State(executor): State<Arc<Executor>>) -> Json<Value> {
    Json(json!({ "languages": executor.languages().supported_languages() }))
}

/// Every orchestrator outcome, errors included, is a 200 with a JSON body.
/// Only an unreadable request body is a 400.
async fn execute(
    State(executor): State<Arc<Executor>>,
    payload: Result<Json<Submission>, JsonRejection>,
) -> (StatusCode, Json<ExecutionResponse>) {
    match payload {
        Ok(Json(submission)) => (StatusCode::OK, Json(executor.execute(&submission).await)),
        Err(rejection) => {
            warn!("Rejected request body: {}", rejection.body_text());
            (
                StatusCode::BAD_REQUEST,
                Json(ExecutionResponse::error(rejection.body_text())),
            )
        }
    }
}
