pub mod routes;

use std::collections::BTreeMap;
use std::sync::Arc;

use axum::{
    http::{header::SET_COOKIE, HeaderMap, HeaderValue},
    response::{IntoResponse, Response},
};
use serde::Serialize;

use crate::context::RequestScope;
use crate::evaluation::FlagValue;
use crate::resolver::{EvaluationResult, Source};
use crate::state::AppState;

// MODELS

#[derive(Debug, Serialize)]
pub struct FlagState {
    pub value: FlagValue,
    pub source: Source,
}

#[derive(Debug, Serialize)]
pub struct EvaluateResponse {
    pub flags: BTreeMap<String, FlagState>,
}

impl From<Vec<EvaluationResult>> for EvaluateResponse {
    fn from(results: Vec<EvaluationResult>) -> Self {
        let flags = results
            .into_iter()
            .map(|r| {
                (
                    r.flag_key,
                    FlagState {
                        value: r.value,
                        source: r.source,
                    },
                )
            })
            .collect();
        Self { flags }
    }
}

#[derive(Debug, Serialize)]
pub struct EncryptedResponse {
    pub payload: String,
}

// HELPER FUNCTIONS

/// Builds the extraction scope for one request from its headers.
pub fn request_scope(state: &AppState, headers: HeaderMap) -> RequestScope {
    let headers = Arc::new(headers);
    RequestScope::new(headers.clone(), headers, state.extractor.clone())
}

/// Persists a freshly minted visitor id so later requests bucket the same way.
pub fn with_visitor_cookie(scope: &RequestScope, body: impl IntoResponse) -> Response {
    let mut response = body.into_response();
    if !scope.minted_visitor_id() {
        return response;
    }

    let cookie = format!(
        "{}={}; Path=/; SameSite=Lax",
        scope.config().visitor_cookie,
        scope.visitor_id()
    );
    match HeaderValue::from_str(&cookie) {
        Ok(value) => {
            response.headers_mut().append(SET_COOKIE, value);
        }
        Err(err) => tracing::warn!(error = %err, "could not encode visitor cookie"),
    }
    response
}
