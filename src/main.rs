//! # Cache Operator
//!
//! Binary entry point: initialize the runtime, then run one controller per
//! custom resource kind until SIGINT/SIGTERM.

use anyhow::Result;
use cache_operator::runtime;

#[tokio::main]
async fn main() -> Result<()> {
    let init = runtime::initialize().await?;
    runtime::run_watch_loops(init).await
}
