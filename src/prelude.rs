//! # Prelude
//!
//! Re-exports commonly used types and traits for convenience.
//!
//! ```rust
//! use cache_operator::prelude::*;
//! ```

// CRD types - most commonly used
pub use crate::crd::*;

// Reconcile machinery
pub use crate::controller::context::{Collaborators, Context, ContextProvider};
pub use crate::controller::flow::FlowController;
pub use crate::controller::phase::{PhaseDriver, PhasedResource, Progress, Readiness};
pub use crate::controller::pipeline::{Pipeline, PipelineBuilder, PipelineError, Stage, Step};
pub use crate::controller::reconciler::{ReconcileError, Reconciler};
pub use crate::controller::registry::{ResourceRegistry, TrackedKind, TrackedSet};
pub use crate::controller::store::{ObjectStore, StoreError, StoreFactory};

// Collaborator boundaries
pub use crate::admin::{AdminClientFactory, AdminError, CacheAdmin};
pub use crate::events::EventPublisher;
pub use crate::workload::WorkloadLogs;

// Config types - for configuration management
pub use crate::config::{ControllerConfig, OperatorSettings, ServerConfig};
