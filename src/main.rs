use std::sync::Arc;

use flag_resolver::{
    analytics::{AnalyticsDispatcher, TracingSink},
    codec::Codec,
    config::{self, Config},
    metrics::FlagMetrics,
    resolver::Resolver,
    routes,
    state::AppState,
};
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("flag_resolver=info,tower_http=info")),
        )
        .init();

    let config = Config::from_env()?;

    let (analytics, _analytics_task) =
        AnalyticsDispatcher::spawn(Arc::new(TracingSink), config.analytics_queue_capacity);

    let resolver = Resolver::builder()
        .metrics(Arc::new(FlagMetrics::new()))
        .analytics(analytics)
        .default_timeout(config.adapter_timeout)
        .build();

    if let Some(path) = &config.flags_file {
        let entries = config::load_flag_file(path)?;
        let count = config::define_flags(&resolver, entries)?;
        tracing::info!(count, path = %path.display(), "loaded flag definitions");
    } else {
        tracing::warn!("FLAGS_FILE not set, serving with no flags defined");
    }

    let codec = match &config.flags_secret {
        Some(secret) => Some(Arc::new(Codec::new(secret)?)),
        None => {
            tracing::warn!("FLAGS_SECRET not set, /flags/encrypted is disabled");
            None
        }
    };

    let state = AppState {
        resolver,
        codec,
        extractor: Arc::new(config.extractor_config()),
    };

    let app = routes::routes()
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive());

    let listener = tokio::net::TcpListener::bind(config.addr()).await?;

    tracing::info!("flag resolver listening on http://{}", config.addr());

    axum::serve(listener, app).await?;
    Ok(())
}
