//! Sequential pipeline execution.
//!
//! Handlers run strictly in build order. After each one the flow controller
//! is consulted and a stop skips the rest. A panicking handler is contained
//! at this boundary and turned into a retry. The context is always closed,
//! and a failed close forces a retry.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::time::Duration;

use futures::FutureExt;
use tracing::{debug, error, info_span, warn, Instrument};

use super::builder::Pipeline;
use super::Step;
use crate::controller::context::Context;
use crate::controller::registry::{PersistReport, TrackedKind};
use crate::observability::metrics;

/// Result of one pipeline run
#[derive(Debug, Default)]
pub struct PipelineOutcome {
    pub retry: bool,
    pub err: Option<anyhow::Error>,
    pub requeue_after: Option<Duration>,
    /// Writes issued by closing the context
    pub report: PersistReport,
    /// Handlers that were invoked, in order
    pub executed: Vec<&'static str>,
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

impl<K: TrackedKind, H: Step<K>> Pipeline<K, H> {
    /// Run every handler against `ctx`, then persist
    pub async fn execute(&self, ctx: &mut Context<K>) -> PipelineOutcome {
        let mut executed = Vec::with_capacity(self.handlers.len());

        for handler in &self.handlers {
            let name = handler.name();
            if ctx.is_cancelled() {
                ctx.flow
                    .retry_processing(anyhow::anyhow!("reconcile cancelled before handler '{name}'"));
                break;
            }

            executed.push(name);
            let span = info_span!("pipeline.handler", handler = name, stage = ?handler.stage());
            let result = AssertUnwindSafe(handler.run(ctx))
                .catch_unwind()
                .instrument(span)
                .await;

            if let Err(payload) = result {
                let message = panic_message(payload.as_ref());
                error!(handler = name, panic = message.as_str(), "handler panicked");
                metrics::increment_handler_panics(name);
                ctx.flow
                    .retry_processing(anyhow::anyhow!("handler '{name}' panicked: {message}"));
            }

            if ctx.flow.should_stop() {
                debug!(handler = name, "pipeline stopped");
                break;
            }
        }

        let closed = ctx.close().await;
        let flow = std::mem::take(&mut ctx.flow).into_status();

        let mut outcome = PipelineOutcome {
            retry: flow.retry,
            err: flow.err,
            requeue_after: flow.requeue_after,
            report: PersistReport::default(),
            executed,
        };

        match closed {
            Ok(report) => outcome.report = report,
            Err(e) => {
                warn!(error = %e, retryable = e.is_retryable(), "failed to persist reconcile results");
                outcome.retry = true;
                outcome.err = Some(match outcome.err.take() {
                    Some(previous) => previous.context(format!("persisting results also failed: {e}")),
                    None => anyhow::Error::new(e),
                });
            }
        }

        outcome
    }
}
