use std::fmt;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use super::adapter::{Adapter, SharedAdapter};
use crate::context::UnifiedContext;
use crate::error::AdapterError;
use crate::evaluation::FlagValue;

type Factory = dyn Fn() -> Result<SharedAdapter, AdapterError> + Send + Sync;

/// Adapter built on first use and shared afterwards.
///
/// The factory runs at most once per successful initialization; a failed
/// initialization is retried on the next call. [`LazyAdapter::reset`] drops
/// the cached client so tests can start from a clean slate.
pub struct LazyAdapter {
    name: String,
    factory: Box<Factory>,
    cell: Mutex<Option<SharedAdapter>>,
}

impl LazyAdapter {
    pub fn new<F>(name: impl Into<String>, factory: F) -> Self
    where
        F: Fn() -> Result<SharedAdapter, AdapterError> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            factory: Box::new(factory),
            cell: Mutex::new(None),
        }
    }

    /// Returns the cached adapter, building it if needed.
    pub fn get(&self) -> Result<SharedAdapter, AdapterError> {
        let mut cell = self
            .cell
            .lock()
            .map_err(|_| AdapterError::Unavailable(format!("{} holder poisoned", self.name)))?;

        if let Some(adapter) = cell.as_ref() {
            return Ok(adapter.clone());
        }

        let adapter = (self.factory)()?;
        tracing::debug!(adapter = %self.name, "initialized lazy adapter");
        *cell = Some(adapter.clone());
        Ok(adapter)
    }

    pub fn is_initialized(&self) -> bool {
        self.cell.lock().map(|c| c.is_some()).unwrap_or(false)
    }

    pub fn reset(&self) {
        if let Ok(mut cell) = self.cell.lock() {
            *cell = None;
        }
    }
}

impl fmt::Debug for LazyAdapter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LazyAdapter")
            .field("name", &self.name)
            .field("initialized", &self.is_initialized())
            .finish()
    }
}

#[async_trait]
impl Adapter for LazyAdapter {
    async fn decide(
        &self,
        flag_key: &str,
        context: &UnifiedContext,
    ) -> Result<Option<FlagValue>, AdapterError> {
        let adapter = self.get()?;
        adapter.decide(flag_key, context).await
    }

    fn name(&self) -> &str {
        &self.name
    }
}
