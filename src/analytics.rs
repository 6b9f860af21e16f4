//! Fire-and-forget exposure tracking.
//!
//! The resolver hands every resolved flag to an [`AnalyticsDispatcher`],
//! which pushes it into a bounded channel without waiting. A background task
//! drains the channel into an [`AnalyticsSink`]. Sink failures and a full
//! queue are logged and never reach the evaluation path.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::context::UnifiedContext;
use crate::error::AnalyticsError;
use crate::evaluation::FlagValue;
use crate::resolver::{EvaluationResult, Source};

/// Event name sent for every flag exposure.
pub const EXPOSURE_EVENT: &str = "$feature_flag_called";

/// One resolved flag, as reported to analytics.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FlagExposure {
    pub flag_key: String,
    pub value: FlagValue,
    pub source: Source,
    pub visitor_id: String,
    pub user_id: String,
    pub environment: String,
    pub timestamp: DateTime<Utc>,
}

impl FlagExposure {
    pub fn new(result: &EvaluationResult, context: &UnifiedContext) -> Self {
        Self {
            flag_key: result.flag_key.clone(),
            value: result.value.clone(),
            source: result.source,
            visitor_id: context.visitor.id.clone(),
            user_id: context.user.id.clone(),
            environment: context.request.environment.clone(),
            timestamp: Utc::now(),
        }
    }

    pub fn to_event_properties(&self) -> serde_json::Value {
        serde_json::json!({
            "flagKey": self.flag_key,
            "value": self.value,
            "source": self.source,
            "visitorId": self.visitor_id,
            "userId": self.user_id,
            "environment": self.environment,
        })
    }
}

/// Destination for analytics events.
#[async_trait]
pub trait AnalyticsSink: Send + Sync + 'static {
    async fn capture(
        &self,
        event: &str,
        properties: serde_json::Value,
    ) -> Result<(), AnalyticsError>;
}

pub type SharedAnalyticsSink = Arc<dyn AnalyticsSink>;

/// Discards all events.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopSink;

#[async_trait]
impl AnalyticsSink for NoopSink {
    async fn capture(
        &self,
        _event: &str,
        _properties: serde_json::Value,
    ) -> Result<(), AnalyticsError> {
        Ok(())
    }
}

/// Writes events to the `analytics` tracing target.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingSink;

#[async_trait]
impl AnalyticsSink for TracingSink {
    async fn capture(
        &self,
        event: &str,
        properties: serde_json::Value,
    ) -> Result<(), AnalyticsError> {
        tracing::info!(target: "analytics", event, %properties, "analytics event");
        Ok(())
    }
}

/// Non-blocking producer side of the analytics queue.
#[derive(Debug, Clone)]
pub struct AnalyticsDispatcher {
    tx: mpsc::Sender<FlagExposure>,
}

impl AnalyticsDispatcher {
    /// Starts the consumer task on the current tokio runtime.
    ///
    /// The task ends once every dispatcher clone is dropped and the queue
    /// has drained.
    pub fn spawn(sink: SharedAnalyticsSink, capacity: usize) -> (Self, JoinHandle<()>) {
        let (tx, mut rx) = mpsc::channel::<FlagExposure>(capacity.max(1));

        let handle = tokio::spawn(async move {
            while let Some(exposure) = rx.recv().await {
                let properties = exposure.to_event_properties();
                if let Err(err) = sink.capture(EXPOSURE_EVENT, properties).await {
                    tracing::warn!(
                        flag_key = %exposure.flag_key,
                        error = %err,
                        "analytics sink rejected event"
                    );
                }
            }
            tracing::debug!("analytics queue closed");
        });

        (Self { tx }, handle)
    }

    /// Queues an exposure. Returns `false` if it was dropped.
    pub fn emit(&self, exposure: FlagExposure) -> bool {
        match self.tx.try_send(exposure) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(exposure)) => {
                tracing::warn!(flag_key = %exposure.flag_key, "analytics queue full, dropping event");
                false
            }
            Err(mpsc::error::TrySendError::Closed(exposure)) => {
                tracing::warn!(flag_key = %exposure.flag_key, "analytics queue closed, dropping event");
                false
            }
        }
    }
}
