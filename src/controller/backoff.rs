//! # Fibonacci Backoff
//!
//! Progressive retry delays for objects whose reconcile keeps failing. The
//! sequence grows more slowly than exponential backoff, so a flapping
//! dependency does not push an object out to the maximum after a few errors.
//!
//! ```rust
//! use cache_operator::controller::backoff::FibonacciBackoff;
//! use std::time::Duration;
//!
//! let mut backoff = FibonacciBackoff::new(Duration::from_secs(1), Duration::from_secs(30));
//! assert_eq!(backoff.next_delay(), Duration::from_secs(1));
//! assert_eq!(backoff.next_delay(), Duration::from_secs(1));
//! assert_eq!(backoff.next_delay(), Duration::from_secs(2));
//! assert_eq!(backoff.next_delay(), Duration::from_secs(3));
//! ```

use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

/// Fibonacci backoff calculator
///
/// Each delay is the sum of the previous two, capped at `max`.
#[derive(Debug, Clone)]
pub struct FibonacciBackoff {
    min: Duration,
    prev: Duration,
    current: Duration,
    max: Duration,
    errors: u32,
}

impl FibonacciBackoff {
    #[must_use]
    pub fn new(min: Duration, max: Duration) -> Self {
        Self {
            min,
            prev: Duration::ZERO,
            current: min,
            max,
            errors: 0,
        }
    }

    /// Return the current delay and advance the sequence
    pub fn next_delay(&mut self) -> Duration {
        let delay = self.current;
        let next = self.prev + self.current;
        self.prev = self.current;
        self.current = next.min(self.max);
        self.errors = self.errors.saturating_add(1);
        delay
    }

    /// Number of delays handed out since the last reset
    #[must_use]
    pub fn errors(&self) -> u32 {
        self.errors
    }

    /// Restart the sequence after a successful reconcile
    pub fn reset(&mut self) {
        self.prev = Duration::ZERO;
        self.current = self.min;
        self.errors = 0;
    }
}

/// Independent backoff state per object key (`namespace/name`)
#[derive(Debug)]
pub struct BackoffRegistry {
    min: Duration,
    max: Duration,
    states: Mutex<HashMap<String, FibonacciBackoff>>,
}

impl BackoffRegistry {
    #[must_use]
    pub fn new(min: Duration, max: Duration) -> Self {
        Self {
            min,
            max,
            states: Mutex::new(HashMap::new()),
        }
    }

    /// Next delay for `key` and its error count so far
    pub fn next_delay(&self, key: &str) -> (Duration, u32) {
        let mut states = self.states.lock().unwrap_or_else(PoisonError::into_inner);
        let backoff = states
            .entry(key.to_string())
            .or_insert_with(|| FibonacciBackoff::new(self.min, self.max));
        let delay = backoff.next_delay();
        (delay, backoff.errors())
    }

    /// Forget `key` after it reconciled successfully
    pub fn reset(&self, key: &str) {
        self.states
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(key);
    }
}
