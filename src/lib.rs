//! Feature flag resolution with a deterministic offline fallback.
//!
//! A flag is defined with up to two remote adapters and a required offline
//! policy. Evaluation tries the adapters in order and falls back to the
//! offline evaluator, so every call produces a value even when all remote
//! services are down.
//!
//! ```no_run
//! use flag_resolver::{AdapterChain, FlagOptions, OfflineFallbackConfig, Resolver, UnifiedContext};
//!
//! # async fn run() -> Result<(), flag_resolver::FlagError> {
//! let resolver = Resolver::default();
//! let checkout = resolver.define(
//!     "checkout-flow",
//!     AdapterChain::offline(OfflineFallbackConfig::percentage(25)),
//!     FlagOptions::default(),
//! )?;
//!
//! let ctx = UnifiedContext::for_visitor("visitor-123");
//! let enabled = checkout.value(&ctx).await;
//! # let _ = enabled;
//! # Ok(())
//! # }
//! ```

pub mod analytics;
pub mod codec;
pub mod config;
pub mod context;
pub mod error;
pub mod evaluation;
pub mod metrics;
pub mod resolver;
pub mod routes;
pub mod state;

pub use analytics::{AnalyticsDispatcher, AnalyticsSink, FlagExposure, NoopSink, TracingSink};
pub use codec::{decrypt, encrypt, validate_secret, Codec};
pub use context::{RequestScope, UnifiedContext};
pub use error::{
    AdapterError, DecryptionError, EncryptionError, FlagError, OfflineEvaluationError, SecretError,
};
pub use evaluation::{FlagValue, OfflineEvaluator, OfflineFallbackConfig, Schedule};
pub use metrics::FlagMetrics;
pub use resolver::{
    Adapter, AdapterChain, EvaluationResult, Flag, FlagOptions, LazyAdapter, Resolver, Source,
};
