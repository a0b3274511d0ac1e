//! # Flow Controller
//!
//! Tri-state signal consulted by the pipeline executor after every handler:
//! continue, retry later, or stop. Handlers report outcomes exclusively
//! through this type.
//!
//! `retry` and `stop` are monotonic within one reconcile invocation: once set
//! they are never cleared. Recording an error does not by itself stop the
//! pipeline.

use std::time::Duration;

use tracing::debug;

/// Snapshot of the flow state at the end of a pipeline run
#[derive(Debug, Default)]
pub struct FlowStatus {
    pub retry: bool,
    pub stop: bool,
    pub err: Option<anyhow::Error>,
    /// Delay requested by a handler that is waiting on something
    pub requeue_after: Option<Duration>,
}

/// Mutable flow state owned by a reconcile context
#[derive(Debug, Default)]
pub struct FlowController {
    status: FlowStatus,
}

impl FlowController {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Abort the pipeline and ask the scheduler to retry, recording `err`
    pub fn retry_processing(&mut self, err: anyhow::Error) {
        debug!(error = %err, "flow.retry_processing");
        self.status.retry = true;
        self.status.stop = true;
        self.record(err);
    }

    /// Abort the pipeline and ask the scheduler to come back after `delay`.
    ///
    /// Used for waiting: no error is recorded.
    pub fn requeue(&mut self, delay: Duration) {
        debug!(delay_secs = delay.as_secs(), "flow.requeue");
        self.status.retry = true;
        self.status.stop = true;
        self.status.requeue_after = Some(
            self.status
                .requeue_after
                .map_or(delay, |current| current.min(delay)),
        );
    }

    /// Like [`requeue`](Self::requeue) but keeps processing the remaining handlers
    pub fn requeue_later(&mut self, delay: Duration) {
        self.status.retry = true;
        self.status.requeue_after = Some(
            self.status
                .requeue_after
                .map_or(delay, |current| current.min(delay)),
        );
    }

    /// Record a non-fatal error; processing continues
    pub fn error(&mut self, err: anyhow::Error) {
        debug!(error = %err, "flow.error");
        self.record(err);
    }

    /// Stop the pipeline without asking for a retry
    pub fn stop_processing(&mut self) {
        self.status.stop = true;
    }

    #[must_use]
    pub fn should_stop(&self) -> bool {
        self.status.stop
    }

    #[must_use]
    pub fn should_retry(&self) -> bool {
        self.status.retry
    }

    #[must_use]
    pub fn has_error(&self) -> bool {
        self.status.err.is_some()
    }

    #[must_use]
    pub fn requeue_after(&self) -> Option<Duration> {
        self.status.requeue_after
    }

    /// Consume the controller, yielding the final status
    #[must_use]
    pub fn into_status(self) -> FlowStatus {
        self.status
    }

    /// First error wins; later errors are attached as context so none is lost.
    fn record(&mut self, err: anyhow::Error) {
        self.status.err = Some(match self.status.err.take() {
            None => err,
            Some(previous) => previous.context(format!("additionally: {err:#}")),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_flow_continues() {
        let flow = FlowController::new();
        assert!(!flow.should_stop());
        assert!(!flow.should_retry());
        assert!(!flow.has_error());
    }

    #[test]
    fn test_retry_processing_sets_all_flags() {
        let mut flow = FlowController::new();
        flow.retry_processing(anyhow::anyhow!("boom"));
        assert!(flow.should_stop());
        assert!(flow.should_retry());
        let status = flow.into_status();
        assert_eq!(status.err.unwrap().to_string(), "boom");
    }

    #[test]
    fn test_error_does_not_stop() {
        let mut flow = FlowController::new();
        flow.error(anyhow::anyhow!("soft"));
        assert!(!flow.should_stop());
        assert!(!flow.should_retry());
        assert!(flow.has_error());
    }

    #[test]
    fn test_flags_are_monotonic() {
        let mut flow = FlowController::new();
        flow.stop_processing();
        flow.error(anyhow::anyhow!("later"));
        assert!(flow.should_stop());
        flow.requeue(Duration::from_secs(5));
        flow.requeue_later(Duration::from_secs(30));
        assert!(flow.should_retry());
        assert!(flow.should_stop());
    }

    #[test]
    fn test_shortest_requeue_wins() {
        let mut flow = FlowController::new();
        flow.requeue_later(Duration::from_secs(30));
        flow.requeue(Duration::from_secs(5));
        flow.requeue(Duration::from_secs(10));
        assert_eq!(flow.requeue_after(), Some(Duration::from_secs(5)));
        assert!(!flow.has_error());
    }

    #[test]
    fn test_errors_accumulate() {
        let mut flow = FlowController::new();
        flow.error(anyhow::anyhow!("first"));
        flow.retry_processing(anyhow::anyhow!("second"));
        let message = format!("{:#}", flow.into_status().err.unwrap());
        assert!(message.contains("first"));
        assert!(message.contains("second"));
    }
}
