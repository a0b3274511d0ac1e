//! # Configuration
//!
//! Operator configuration loaded from environment variables.
//!
//! - `controller`: reconcile timing, images, feature toggles and the
//!   per-invocation [`OperatorSettings`] snapshot
//! - `server`: metrics and health HTTP server settings

mod controller;
mod server;

pub use controller::{ControllerConfig, OperatorSettings};
pub use server::ServerConfig;
