use std::sync::Arc;

use crate::codec::Codec;
use crate::context::ExtractorConfig;
use crate::resolver::Resolver;

#[derive(Clone)]
pub struct AppState {
    pub resolver: Resolver,
    /// `None` when no secret is configured; encrypted payloads are then unavailable.
    pub codec: Option<Arc<Codec>>,
    pub extractor: Arc<ExtractorConfig>,
}
