//! # Pipeline
//!
//! Ordered, feature-conditional lists of handlers run against one
//! [`Context`](super::context::Context).
//!
//! Handlers are tagged variants implementing [`Step`]: each declares the stage
//! it belongs to and the registry kinds it touches, so a pipeline's
//! composition can be checked when it is built. Handlers report outcomes only
//! through the context's flow controller and registry.
//!
//! - `builder`: [`PipelineBuilder`] and [`Pipeline`]
//! - `executor`: sequential execution with per-handler panic isolation
//! - `cluster`: the `CacheCluster` handler set
//! - `cache`: the `Cache` handler set

mod builder;
pub mod cache;
pub mod cluster;
mod executor;

use async_trait::async_trait;
use thiserror::Error;

use super::context::Context;
use super::registry::TrackedKind;

pub use builder::{Pipeline, PipelineBuilder};
pub use executor::PipelineOutcome;

/// Stage groups, executed in declaration order
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Stage {
    Collect,
    Configure,
    Provision,
    Manage,
}

/// What a handler reads or writes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceKind {
    Secret,
    ConfigMap,
    Service,
    StatefulSet,
    Job,
    Cache,
    CacheCluster,
    /// The target instance's status
    Instance,
    /// The cluster's administration API
    AdminApi,
    /// Pod logs of one-shot jobs
    WorkloadLogs,
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum PipelineError {
    #[error("handler '{handler}' ({stage:?}) is placed after a {previous:?} handler")]
    OutOfOrder {
        handler: &'static str,
        stage: Stage,
        previous: Stage,
    },

    #[error("handler '{0}' is included more than once")]
    Duplicate(&'static str),

    #[error("pipeline has no handlers")]
    Empty,
}

/// One pipeline handler
#[async_trait]
pub trait Step<K: TrackedKind>: Send + Sync {
    fn name(&self) -> &'static str;

    fn stage(&self) -> Stage;

    /// Registry kinds and collaborators this handler uses
    fn touches(&self) -> &'static [ResourceKind];

    /// Run against the context; outcomes go through `ctx.flow` and `ctx.registry`
    async fn run(&self, ctx: &mut Context<K>);
}
