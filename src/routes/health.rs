use axum::{extract::State, http::StatusCode, Json};
use serde::Serialize;

use crate::state::AppState;

#[derive(Serialize)]
pub struct HealthData {
    status: u16,
    flags: usize,
    encryption: bool,
}

pub async fn health(State(state): State<AppState>) -> Json<HealthData> {
    let health_data = HealthData {
        status: StatusCode::OK.as_u16(),
        flags: state.resolver.keys().len(),
        encryption: state.codec.as_ref().is_some_and(|c| c.is_confidential()),
    };
    Json(health_data)
}
