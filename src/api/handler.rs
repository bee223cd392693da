use std::sync::Arc;

use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;

use crate::api::types::{ErrorResponse, GenerateRequest, GenerateResponse, RunLogsResponse};
use crate::server::AppState;
use crate::workflow::{validate_trail, RunId};

pub async fn health_check() -> Json<serde_json::Value> {
    Json(json!({ "status": "healthy" }))
}

fn error(status: StatusCode, body: ErrorResponse) -> Response {
    (status, Json(body)).into_response()
}

pub async fn generate(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<GenerateRequest>, JsonRejection>,
) -> Response {
    let Json(body) = match payload {
        Ok(body) => body,
        Err(rejection) => {
            tracing::warn!(error = %rejection, "Rejected malformed generate request");
            return error(
                StatusCode::UNPROCESSABLE_ENTITY,
                ErrorResponse::new(rejection.body_text()),
            );
        }
    };

    let request = match body.into_article_request() {
        Ok(request) => request,
        Err(e) => {
            tracing::warn!(error = %e, "Rejected invalid generate request");
            return error(StatusCode::UNPROCESSABLE_ENTITY, ErrorResponse::new(e.to_string()));
        }
    };

    let permit = match state.acquire_run_permit().await {
        Ok(permit) => permit,
        Err(e) => {
            tracing::warn!(error = %e, "No run slot available");
            return error(
                StatusCode::SERVICE_UNAVAILABLE,
                ErrorResponse::new("service is shutting down"),
            );
        }
    };

    let run_id = RunId::new();
    state.mark_in_flight(run_id).await;
    tracing::info!(run_id = %run_id, topic = %request.topic(), "Accepted generate request");

    // Detached so a client disconnect does not abandon the run mid-phase.
    let run_state = Arc::clone(&state);
    let handle = tokio::spawn(async move {
        let _permit = permit;
        let outcome = run_state.orchestrator.run_with_id(run_id, request).await;
        run_state.mark_finished(run_id).await;
        outcome
    });

    match handle.await {
        Ok(Ok(success)) => (StatusCode::OK, Json(GenerateResponse::from(success))).into_response(),
        Ok(Err(failure)) => error(StatusCode::BAD_GATEWAY, ErrorResponse::from(failure)),
        Err(e) => {
            tracing::error!(run_id = %run_id, error = %e, "Run task panicked");
            state.mark_finished(run_id).await;
            error(
                StatusCode::INTERNAL_SERVER_ERROR,
                ErrorResponse::new("run aborted unexpectedly"),
            )
        }
    }
}

fn parse_run_id(raw: &str) -> Result<RunId, Response> {
    RunId::parse(raw).ok_or_else(|| {
        error(
            StatusCode::NOT_FOUND,
            ErrorResponse::new(format!("unknown run {raw}")),
        )
    })
}

pub async fn get_run(State(state): State<Arc<AppState>>, Path(raw): Path<String>) -> Response {
    let run_id = match parse_run_id(&raw) {
        Ok(id) => id,
        Err(response) => return response,
    };

    match state.results.get(run_id).await {
        Ok(Some(record)) => Json(record).into_response(),
        Ok(None) => error(
            StatusCode::NOT_FOUND,
            ErrorResponse::new(format!("unknown run {run_id}")),
        ),
        Err(e) => {
            tracing::error!(run_id = %run_id, error = %e, "Failed to load run record");
            error(StatusCode::INTERNAL_SERVER_ERROR, ErrorResponse::new(e.to_string()))
        }
    }
}

pub async fn get_run_logs(
    State(state): State<Arc<AppState>>,
    Path(raw): Path<String>,
) -> Response {
    let run_id = match parse_run_id(&raw) {
        Ok(id) => id,
        Err(response) => return response,
    };

    let entries = match state.logger.entries(run_id).await {
        Ok(entries) => entries,
        Err(e) => {
            tracing::error!(run_id = %run_id, error = %e, "Failed to load run log");
            return error(StatusCode::INTERNAL_SERVER_ERROR, ErrorResponse::new(e.to_string()));
        }
    };

    if entries.is_empty() {
        // A run still researching has a record but no entries yet.
        match state.results.get(run_id).await {
            Ok(Some(_)) => {}
            Ok(None) => {
                return error(
                    StatusCode::NOT_FOUND,
                    ErrorResponse::new(format!("unknown run {run_id}")),
                )
            }
            Err(e) => {
                return error(StatusCode::INTERNAL_SERVER_ERROR, ErrorResponse::new(e.to_string()))
            }
        }
    }

    let trail = validate_trail(&entries, state.orchestrator.max_iterations());
    if let Err(e) = &trail {
        tracing::warn!(run_id = %run_id, error = %e, "Run log does not replay cleanly");
    }

    Json(RunLogsResponse {
        run_id,
        valid_trail: trail.is_ok(),
        trail_error: trail.err().map(|e| e.to_string()),
        entries,
    })
    .into_response()
}
