use std::sync::Arc;

use async_trait::async_trait;

use crate::context::UnifiedContext;
use crate::error::AdapterError;
use crate::evaluation::FlagValue;

/// Remote decision source for one tier of the chain.
///
/// `Ok(None)`, `Ok(Some(Value::Null))` and `Err(_)` all mean "no answer".
/// Any other value, including `false` and `""`, is final.
#[async_trait]
pub trait Adapter: Send + Sync + 'static {
    async fn decide(
        &self,
        flag_key: &str,
        context: &UnifiedContext,
    ) -> Result<Option<FlagValue>, AdapterError>;

    /// Name used in logs.
    fn name(&self) -> &str {
        "adapter"
    }
}

pub type SharedAdapter = Arc<dyn Adapter>;

/// Adapter that answers with a fixed value. Useful for pinning a tier in tests
/// or local development.
#[derive(Debug, Clone)]
pub struct StaticAdapter {
    value: Option<FlagValue>,
}

impl StaticAdapter {
    pub fn new(value: impl Into<FlagValue>) -> Self {
        Self {
            value: Some(value.into()),
        }
    }

    /// Adapter that never has an answer.
    pub fn empty() -> Self {
        Self { value: None }
    }
}

#[async_trait]
impl Adapter for StaticAdapter {
    async fn decide(
        &self,
        _flag_key: &str,
        _context: &UnifiedContext,
    ) -> Result<Option<FlagValue>, AdapterError> {
        Ok(self.value.clone())
    }

    fn name(&self) -> &str {
        "static"
    }
}
