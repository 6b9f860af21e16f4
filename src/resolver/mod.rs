//! Adapter chain resolution.
//!
//! Every evaluation walks `primary -> secondary -> offline`. Adapters are
//! awaited one at a time and the first defined answer wins. Errors, timeouts,
//! panics and null answers all advance the chain; the offline tier always
//! produces a value, so [`Flag::evaluate`] cannot fail.

mod adapter;
mod lazy;

use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

pub use adapter::{Adapter, SharedAdapter, StaticAdapter};
pub use lazy::LazyAdapter;

use crate::analytics::{AnalyticsDispatcher, FlagExposure};
use crate::context::UnifiedContext;
use crate::error::{AdapterError, FlagError};
use crate::evaluation::{
    Clock, EnvOverrides, FlagValue, OfflineEvaluator, OfflineFallbackConfig, OfflineReason,
    OverrideSource, SystemClock,
};
use crate::metrics::FlagMetrics;

pub const DEFAULT_ADAPTER_TIMEOUT: Duration = Duration::from_millis(1500);

const MAX_KEY_LEN: usize = 64;

/// Keys that collide with fixed path segments under `/flags`.
pub const RESERVED_FLAG_KEYS: &[&str] = &["encrypted"];

/// Tier that produced a value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Source {
    Primary,
    Secondary,
    Offline,
}

impl Source {
    pub fn as_str(&self) -> &'static str {
        match self {
            Source::Primary => "primary",
            Source::Secondary => "secondary",
            Source::Offline => "offline",
        }
    }
}

impl fmt::Display for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A resolved flag and where the value came from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EvaluationResult {
    pub flag_key: String,
    pub value: FlagValue,
    pub source: Source,
}

/// Tiers for one flag. Immutable once the flag is defined.
#[derive(Clone)]
pub struct AdapterChain {
    pub primary: Option<SharedAdapter>,
    pub secondary: Option<SharedAdapter>,
    pub offline: OfflineFallbackConfig,
}

impl AdapterChain {
    /// Chain with only the offline tier.
    pub fn offline(config: OfflineFallbackConfig) -> Self {
        Self {
            primary: None,
            secondary: None,
            offline: config,
        }
    }

    pub fn with_primary(mut self, adapter: impl Adapter) -> Self {
        self.primary = Some(Arc::new(adapter));
        self
    }

    pub fn with_secondary(mut self, adapter: impl Adapter) -> Self {
        self.secondary = Some(Arc::new(adapter));
        self
    }

    pub fn with_shared_primary(mut self, adapter: SharedAdapter) -> Self {
        self.primary = Some(adapter);
        self
    }

    pub fn with_shared_secondary(mut self, adapter: SharedAdapter) -> Self {
        self.secondary = Some(adapter);
        self
    }
}

impl fmt::Debug for AdapterChain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AdapterChain")
            .field("primary", &self.primary.as_ref().map(|a| a.name().to_string()))
            .field("secondary", &self.secondary.as_ref().map(|a| a.name().to_string()))
            .field("offline", &self.offline)
            .finish()
    }
}

#[derive(Debug, Clone, Default)]
pub struct FlagOptions {
    /// Per-adapter timeout. Falls back to the resolver default.
    pub timeout: Option<Duration>,
    pub description: Option<String>,
}

impl FlagOptions {
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

/// Validates a flag key.
pub fn validate_flag_key(key: &str) -> Result<(), String> {
    let Some(first) = key.chars().next() else {
        return Err("flag key cannot be empty".to_string());
    };

    if key.len() > MAX_KEY_LEN {
        return Err(format!("flag key is too long (max: {} characters)", MAX_KEY_LEN));
    }

    if !first.is_ascii_alphabetic() {
        return Err("flag key must start with a letter".to_string());
    }

    if !key
        .chars()
        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || matches!(c, '_' | '-' | '.'))
    {
        return Err(
            "flag key may only contain lowercase letters, digits, underscores, hyphens and dots"
                .to_string(),
        );
    }

    if RESERVED_FLAG_KEYS.contains(&key) {
        return Err(format!("flag key '{}' is reserved", key));
    }

    Ok(())
}

#[derive(Debug)]
struct FlagDefinition {
    key: String,
    chain: AdapterChain,
    options: FlagOptions,
}

enum Stage {
    TryPrimary,
    TrySecondary,
    Offline,
}

struct Inner {
    evaluator: OfflineEvaluator,
    analytics: Option<AnalyticsDispatcher>,
    metrics: Option<Arc<FlagMetrics>>,
    default_timeout: Duration,
    flags: RwLock<BTreeMap<String, Arc<FlagDefinition>>>,
}

pub struct ResolverBuilder {
    overrides: Arc<dyn OverrideSource>,
    clock: Arc<dyn Clock>,
    analytics: Option<AnalyticsDispatcher>,
    metrics: Option<Arc<FlagMetrics>>,
    default_timeout: Duration,
}

impl Default for ResolverBuilder {
    fn default() -> Self {
        Self {
            overrides: Arc::new(EnvOverrides),
            clock: Arc::new(SystemClock),
            analytics: None,
            metrics: None,
            default_timeout: DEFAULT_ADAPTER_TIMEOUT,
        }
    }
}

impl ResolverBuilder {
    pub fn overrides(mut self, overrides: Arc<dyn OverrideSource>) -> Self {
        self.overrides = overrides;
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn analytics(mut self, dispatcher: AnalyticsDispatcher) -> Self {
        self.analytics = Some(dispatcher);
        self
    }

    pub fn metrics(mut self, metrics: Arc<FlagMetrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn default_timeout(mut self, timeout: Duration) -> Self {
        self.default_timeout = timeout;
        self
    }

    pub fn build(self) -> Resolver {
        Resolver {
            inner: Arc::new(Inner {
                evaluator: OfflineEvaluator::new(self.overrides, self.clock),
                analytics: self.analytics,
                metrics: self.metrics,
                default_timeout: self.default_timeout,
                flags: RwLock::new(BTreeMap::new()),
            }),
        }
    }
}

/// Registry of defined flags plus the shared services they evaluate with.
#[derive(Clone)]
pub struct Resolver {
    inner: Arc<Inner>,
}

impl Default for Resolver {
    fn default() -> Self {
        ResolverBuilder::default().build()
    }
}

impl Resolver {
    pub fn builder() -> ResolverBuilder {
        ResolverBuilder::default()
    }

    /// Defines a flag. Invalid keys and policies are rejected here, not at
    /// evaluation time.
    pub fn define(
        &self,
        key: impl Into<String>,
        chain: AdapterChain,
        options: FlagOptions,
    ) -> Result<Flag, FlagError> {
        let key = key.into();
        validate_flag_key(&key).map_err(|reason| FlagError::configuration(&key, reason))?;
        chain.offline.validate(&key)?;
        if options.timeout.is_some_and(|t| t.is_zero()) {
            return Err(FlagError::configuration(&key, "timeout must be greater than zero"));
        }

        let mut flags = self
            .inner
            .flags
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if flags.contains_key(&key) {
            return Err(FlagError::DuplicateFlag(key));
        }

        let definition = Arc::new(FlagDefinition {
            key: key.clone(),
            chain,
            options,
        });
        flags.insert(key, definition.clone());

        Ok(Flag {
            definition,
            inner: self.inner.clone(),
        })
    }

    pub fn flag(&self, key: &str) -> Result<Flag, FlagError> {
        let flags = self
            .inner
            .flags
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        flags
            .get(key)
            .map(|definition| Flag {
                definition: definition.clone(),
                inner: self.inner.clone(),
            })
            .ok_or_else(|| FlagError::UnknownFlag(key.to_string()))
    }

    /// Defined flag keys, sorted.
    pub fn keys(&self) -> Vec<String> {
        let flags = self
            .inner
            .flags
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        flags.keys().cloned().collect()
    }

    /// Evaluates a flag by key.
    ///
    /// An unknown key is a programming error caught at lookup, before any
    /// evaluation starts. Once the flag is found the result always carries a
    /// value, as with [`Flag::evaluate`].
    pub async fn evaluate(
        &self,
        key: &str,
        context: &UnifiedContext,
    ) -> Result<EvaluationResult, FlagError> {
        Ok(self.flag(key)?.evaluate(context).await)
    }

    /// Evaluates every defined flag, in key order.
    pub async fn evaluate_all(&self, context: &UnifiedContext) -> Vec<EvaluationResult> {
        let flags: Vec<Flag> = {
            let flags = self
                .inner
                .flags
                .read()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            flags
                .values()
                .map(|definition| Flag {
                    definition: definition.clone(),
                    inner: self.inner.clone(),
                })
                .collect()
        };

        let mut results = Vec::with_capacity(flags.len());
        for flag in flags {
            results.push(flag.evaluate(context).await);
        }
        results
    }

    pub fn metrics(&self) -> Option<&Arc<FlagMetrics>> {
        self.inner.metrics.as_ref()
    }
}

/// Handle to a defined flag. Cheap to clone and share across tasks.
#[derive(Clone)]
pub struct Flag {
    definition: Arc<FlagDefinition>,
    inner: Arc<Inner>,
}

impl fmt::Debug for Flag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Flag")
            .field("key", &self.definition.key)
            .field("chain", &self.definition.chain)
            .finish()
    }
}

impl Flag {
    pub fn key(&self) -> &str {
        &self.definition.key
    }

    pub fn description(&self) -> Option<&str> {
        self.definition.options.description.as_deref()
    }

    /// Resolved value only.
    pub async fn value(&self, context: &UnifiedContext) -> FlagValue {
        self.evaluate(context).await.value
    }

    pub async fn evaluate(&self, context: &UnifiedContext) -> EvaluationResult {
        let started = Instant::now();
        let definition = &self.definition;

        let mut stage = Stage::TryPrimary;
        let (value, source) = loop {
            match stage {
                Stage::TryPrimary => {
                    if let Some(value) = self
                        .try_tier(Source::Primary, definition.chain.primary.as_ref(), context)
                        .await
                    {
                        break (value, Source::Primary);
                    }
                    stage = Stage::TrySecondary;
                }
                Stage::TrySecondary => {
                    if let Some(value) = self
                        .try_tier(Source::Secondary, definition.chain.secondary.as_ref(), context)
                        .await
                    {
                        break (value, Source::Secondary);
                    }
                    stage = Stage::Offline;
                }
                Stage::Offline => {
                    let decision = self.inner.evaluator.decide(
                        &definition.key,
                        &definition.chain.offline,
                        context,
                    );
                    if matches!(decision.reason, OfflineReason::Fallback(_)) {
                        if let Some(metrics) = &self.inner.metrics {
                            metrics.record_offline_error(&definition.key);
                        }
                    }
                    break (decision.value, Source::Offline);
                }
            }
        };

        tracing::debug!(flag_key = %definition.key, %source, "flag resolved");

        let result = EvaluationResult {
            flag_key: definition.key.clone(),
            value,
            source,
        };

        if let Some(metrics) = &self.inner.metrics {
            metrics.record_evaluation(&definition.key, source, started.elapsed());
        }
        if let Some(analytics) = &self.inner.analytics {
            analytics.emit(FlagExposure::new(&result, context));
        }

        result
    }

    async fn try_tier(
        &self,
        source: Source,
        adapter: Option<&SharedAdapter>,
        context: &UnifiedContext,
    ) -> Option<FlagValue> {
        let adapter = adapter?;
        let key = &self.definition.key;
        let timeout = self
            .definition
            .options
            .timeout
            .unwrap_or(self.inner.default_timeout);

        tracing::debug!(flag_key = %key, %source, adapter = adapter.name(), "trying adapter");
        let outcome = call_adapter(adapter, key, context, timeout).await;

        if let Some(metrics) = &self.inner.metrics {
            let (failed, timed_out) = match &outcome {
                Err(err) => (true, err.is_timeout()),
                Ok(_) => (false, false),
            };
            metrics.record_adapter_attempt(key, failed, timed_out);
        }

        match outcome {
            Ok(Some(value)) if !value.is_null() => Some(value),
            Ok(_) => {
                tracing::debug!(flag_key = %key, %source, "adapter had no answer");
                None
            }
            Err(err) => {
                tracing::warn!(
                    flag_key = %key,
                    %source,
                    adapter = adapter.name(),
                    error = %err,
                    "adapter failed, falling through"
                );
                None
            }
        }
    }
}

/// Runs one adapter call in its own task, bounded by `timeout`.
///
/// On timeout the task is detached rather than aborted so the remote call can
/// finish its own bookkeeping; its result is discarded.
async fn call_adapter(
    adapter: &SharedAdapter,
    flag_key: &str,
    context: &UnifiedContext,
    timeout: Duration,
) -> Result<Option<FlagValue>, AdapterError> {
    let adapter = adapter.clone();
    let flag_key = flag_key.to_string();
    let context = context.clone();

    let task = tokio::spawn(async move { adapter.decide(&flag_key, &context).await });

    match tokio::time::timeout(timeout, task).await {
        Ok(Ok(result)) => result,
        Ok(Err(join_err)) => Err(AdapterError::Aborted(join_err.to_string())),
        Err(_) => Err(AdapterError::Timeout(timeout)),
    }
}
