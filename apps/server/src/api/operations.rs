//! Mutating endpoints. Every request needs an `Idempotency-Key` header; the
//! response carries `x-idempotent-replayed` so callers can tell a replay
//! from a fresh execution.

use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{post, put};
use axum::{Json, Router};
use serde_json::Value;
use tracing::debug;

use tillsync_core::idempotency::{IDEMPOTENCY_KEY_HEADER, IDEMPOTENT_REPLAY_HEADER};
use tillsync_core::operations::{OperationPayload, OperationType};

use crate::error::{ApiError, ApiResult};
use crate::main_lib::AppState;

fn idempotency_key(headers: &HeaderMap) -> ApiResult<String> {
    let value = headers.get(IDEMPOTENCY_KEY_HEADER).ok_or_else(|| {
        ApiError::BadRequest("Missing Idempotency-Key header".to_string())
    })?;
    value
        .to_str()
        .map(|v| v.trim().to_string())
        .map_err(|_| ApiError::BadRequest("Idempotency-Key must be ASCII".to_string()))
}

fn parse_payload(operation_type: OperationType, body: &Bytes) -> ApiResult<OperationPayload> {
    let value: Value = serde_json::from_slice(body)
        .map_err(|e| ApiError::BadRequest(format!("Invalid JSON body: {}", e)))?;
    OperationPayload::from_body(operation_type, value).map_err(|e| {
        ApiError::BadRequest(format!(
            "Invalid {} payload: {}",
            operation_type.as_str(),
            e
        ))
    })
}

/// Id embedded in the body must match the path segment.
fn ensure_path_matches(field: &str, path_id: &str, body_id: &str) -> ApiResult<()> {
    if path_id != body_id {
        return Err(ApiError::BadRequest(format!(
            "{} '{}' does not match path '{}'",
            field, body_id, path_id
        )));
    }
    Ok(())
}

fn success_status(operation_type: OperationType) -> StatusCode {
    match operation_type {
        OperationType::ProductUpsert | OperationType::SessionClose | OperationType::CoworkingEnd => {
            StatusCode::OK
        }
        _ => StatusCode::CREATED,
    }
}

async fn execute(
    state: &AppState,
    headers: &HeaderMap,
    payload: OperationPayload,
) -> ApiResult<Response> {
    let key = idempotency_key(headers)?;
    let outcome = state.executor.execute(key.clone(), payload).await?;
    debug!(
        "{} key={} replayed={}",
        outcome.operation_type.as_str(),
        key,
        outcome.replayed
    );

    let body = outcome.result_json()?;
    let mut response = (success_status(outcome.operation_type), Json(body)).into_response();
    response.headers_mut().insert(
        IDEMPOTENT_REPLAY_HEADER,
        HeaderValue::from_static(if outcome.replayed { "true" } else { "false" }),
    );
    Ok(response)
}

async fn upsert_product(
    State(state): State<Arc<AppState>>,
    Path(product_id): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> ApiResult<Response> {
    let payload = parse_payload(OperationType::ProductUpsert, &body)?;
    if let OperationPayload::ProductUpsert(input) = &payload {
        ensure_path_matches("productId", &product_id, &input.product_id)?;
    }
    execute(&state, &headers, payload).await
}

async fn create_order(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> ApiResult<Response> {
    let payload = parse_payload(OperationType::OrderCreate, &body)?;
    execute(&state, &headers, payload).await
}

async fn open_session(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> ApiResult<Response> {
    let payload = parse_payload(OperationType::SessionOpen, &body)?;
    execute(&state, &headers, payload).await
}

async fn close_session(
    State(state): State<Arc<AppState>>,
    Path(session_id): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> ApiResult<Response> {
    let payload = parse_payload(OperationType::SessionClose, &body)?;
    if let OperationPayload::SessionClose(input) = &payload {
        ensure_path_matches("sessionId", &session_id, &input.session_id)?;
    }
    execute(&state, &headers, payload).await
}

async fn create_cut(
    State(state): State<Arc<AppState>>,
    Path(session_id): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> ApiResult<Response> {
    let payload = parse_payload(OperationType::CutCreate, &body)?;
    if let OperationPayload::CutCreate(input) = &payload {
        ensure_path_matches("sessionId", &session_id, &input.session_id)?;
    }
    execute(&state, &headers, payload).await
}

async fn start_coworking(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> ApiResult<Response> {
    let payload = parse_payload(OperationType::CoworkingStart, &body)?;
    execute(&state, &headers, payload).await
}

async fn end_coworking(
    State(state): State<Arc<AppState>>,
    Path(coworking_session_id): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> ApiResult<Response> {
    let payload = parse_payload(OperationType::CoworkingEnd, &body)?;
    if let OperationPayload::CoworkingEnd(input) = &payload {
        ensure_path_matches(
            "coworkingSessionId",
            &coworking_session_id,
            &input.coworking_session_id,
        )?;
    }
    execute(&state, &headers, payload).await
}

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/products/{id}", put(upsert_product))
        .route("/orders", post(create_order))
        .route("/cash-sessions", post(open_session))
        .route("/cash-sessions/{id}/close", post(close_session))
        .route("/cash-sessions/{id}/cuts", post(create_cut))
        .route("/coworking-sessions", post(start_coworking))
        .route("/coworking-sessions/{id}/end", post(end_coworking))
}
