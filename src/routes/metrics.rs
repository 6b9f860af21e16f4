use std::collections::BTreeMap;

use axum::{extract::State, Json};

use crate::metrics::FlagStats;
use crate::state::AppState;

/// Per-flag evaluation counters. Empty when the resolver records no metrics.
pub async fn snapshot(State(state): State<AppState>) -> Json<BTreeMap<String, FlagStats>> {
    let stats = state
        .resolver
        .metrics()
        .map(|metrics| metrics.snapshot())
        .unwrap_or_default();
    Json(stats)
}
