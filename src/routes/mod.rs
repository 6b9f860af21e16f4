use axum::{routing::get, Router};

mod flags;
mod health;
mod metrics;

pub use health::health;

use crate::state::AppState;

pub fn routes() -> Router<AppState> {
    let flag_router = Router::new()
        .route("/", get(flags::routes::list))
        .route("/encrypted", get(flags::routes::encrypted))
        .route("/{key}", get(flags::routes::get));

    Router::new()
        .route("/", get(root))
        .route("/health", get(health))
        .route("/metrics", get(metrics::snapshot))
        .nest("/flags", flag_router)
}

async fn root() -> &'static str {
    "Flag resolver: deterministic flag evaluation with offline fallback"
}
