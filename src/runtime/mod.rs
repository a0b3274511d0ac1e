//! # Runtime
//!
//! Process-level wiring around the reconcilers.
//!
//! - `initialization`: crypto provider, tracing, metrics, HTTP server, client and collaborators
//! - `watch_loop`: one kube-runtime controller per custom resource kind
//! - `error_policy`: per-object Fibonacci backoff and watch stream error classification

pub mod error_policy;
pub mod initialization;
pub mod watch_loop;

pub use initialization::{initialize, InitializationResult};
pub use watch_loop::run_watch_loops;
