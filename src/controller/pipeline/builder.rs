//! Pipeline assembly and composition checks.

use std::collections::HashSet;
use std::marker::PhantomData;

use super::{PipelineError, ResourceKind, Stage, Step};
use crate::controller::registry::TrackedKind;

/// Collects handlers in order, with conditional inclusion
pub struct PipelineBuilder<K, H> {
    handlers: Vec<H>,
    _kind: PhantomData<fn() -> K>,
}

impl<K, H> std::fmt::Debug for PipelineBuilder<K, H> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PipelineBuilder")
            .field("handlers", &self.handlers.len())
            .finish()
    }
}

impl<K, H> Default for PipelineBuilder<K, H> {
    fn default() -> Self {
        Self {
            handlers: Vec::new(),
            _kind: PhantomData,
        }
    }
}

impl<K: TrackedKind, H: Step<K>> PipelineBuilder<K, H> {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with(mut self, handler: H) -> Self {
        self.handlers.push(handler);
        self
    }

    /// Append `handler` only when `enabled`
    #[must_use]
    pub fn with_if(self, enabled: bool, handler: H) -> Self {
        if enabled {
            self.with(handler)
        } else {
            self
        }
    }

    /// Check composition and freeze the handler list.
    ///
    /// # Errors
    ///
    /// Rejects empty pipelines, stages out of order and duplicate handlers.
    pub fn build(self) -> Result<Pipeline<K, H>, PipelineError> {
        if self.handlers.is_empty() {
            return Err(PipelineError::Empty);
        }
        let mut seen = HashSet::new();
        let mut previous = Stage::Collect;
        for handler in &self.handlers {
            if handler.stage() < previous {
                return Err(PipelineError::OutOfOrder {
                    handler: handler.name(),
                    stage: handler.stage(),
                    previous,
                });
            }
            if !seen.insert(handler.name()) {
                return Err(PipelineError::Duplicate(handler.name()));
            }
            previous = handler.stage();
        }
        Ok(Pipeline {
            handlers: self.handlers,
            _kind: PhantomData,
        })
    }
}

/// A validated, ordered handler list
pub struct Pipeline<K, H> {
    pub(super) handlers: Vec<H>,
    _kind: PhantomData<fn() -> K>,
}

impl<K, H> std::fmt::Debug for Pipeline<K, H> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline")
            .field("handlers", &self.handlers.len())
            .finish()
    }
}

impl<K: TrackedKind, H: Step<K>> Pipeline<K, H> {
    /// Handler names in execution order
    #[must_use]
    pub fn names(&self) -> Vec<&'static str> {
        self.handlers.iter().map(|h| h.name()).collect()
    }

    /// Every resource kind some handler touches
    #[must_use]
    pub fn touches(&self) -> HashSet<ResourceKind> {
        self.handlers
            .iter()
            .flat_map(|h| h.touches().iter().copied())
            .collect()
    }

    #[must_use]
    pub fn handlers(&self) -> &[H] {
        &self.handlers
    }
}
