use axum::{
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    response::Response,
    Json,
};

use super::{request_scope, with_visitor_cookie, EncryptedResponse, EvaluateResponse, FlagState};
use crate::error::FlagError;
use crate::state::AppState;

/// Evaluate every defined flag for the caller
pub async fn list(State(state): State<AppState>, headers: HeaderMap) -> Response {
    let scope = request_scope(&state, headers);
    let context = scope.context();

    let results = state.resolver.evaluate_all(&context).await;

    with_visitor_cookie(&scope, Json(EvaluateResponse::from(results)))
}

/// Evaluate a single flag by key
pub async fn get(
    State(state): State<AppState>,
    Path(key): Path<String>,
    headers: HeaderMap,
) -> Result<Response, (StatusCode, String)> {
    let scope = request_scope(&state, headers);
    let context = scope.context();

    let result = state
        .resolver
        .evaluate(&key, &context)
        .await
        .map_err(|e| match e {
            FlagError::UnknownFlag(_) => (StatusCode::NOT_FOUND, format!("Flag '{}' not found", key)),
            other => (StatusCode::INTERNAL_SERVER_ERROR, other.to_string()),
        })?;

    let body = FlagState {
        value: result.value,
        source: result.source,
    };
    Ok(with_visitor_cookie(&scope, Json(body)))
}

/// Evaluate every flag and return the result sealed for client transport
pub async fn encrypted(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Response, (StatusCode, String)> {
    let codec = state.codec.clone().ok_or((
        StatusCode::SERVICE_UNAVAILABLE,
        "Encryption secret is not configured".to_string(),
    ))?;

    let scope = request_scope(&state, headers);
    let context = scope.context();
    let results = state.resolver.evaluate_all(&context).await;

    let payload = codec
        .encrypt(&EvaluateResponse::from(results))
        .map_err(|e| {
            tracing::error!(error = %e, "failed to encrypt flag payload");
            (StatusCode::INTERNAL_SERVER_ERROR, "Failed to encrypt flags".to_string())
        })?;

    Ok(with_visitor_cookie(&scope, Json(EncryptedResponse { payload })))
}
