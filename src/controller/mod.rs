//! # Controller
//!
//! Core reconciliation machinery for the cache operator.
//!
//! - `flow`: per-invocation continue/retry/stop signal
//! - `store`: typed object store boundary (Kubernetes API or in-memory)
//! - `registry`: tracked resources and the diff-and-persist engine
//! - `context`: everything one reconcile invocation works on
//! - `pipeline`: handler trait, builder, executor and the per-kind handler sets
//! - `phase`: state machine for backup, restore and batch jobs
//! - `jobs`: the job drivers and their entry points
//! - `credentials`: generated operator/user credential secrets
//! - `reconciler`: outcome to scheduler action
//! - `cluster`, `cache`: outer reconcile entry points
//! - `backoff`: Fibonacci backoff for the error policy
//! - `server`: HTTP server for metrics and health checks

pub mod backoff;
pub mod cache;
pub mod cluster;
pub mod context;
pub mod credentials;
pub mod flow;
pub mod jobs;
pub mod phase;
pub mod pipeline;
pub mod reconciler;
pub mod registry;
pub mod server;
pub mod store;
