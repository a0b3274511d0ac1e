//! # CRD Generator
//!
//! Prints every CustomResourceDefinition the operator serves as a
//! multi-document YAML stream.
//!
//! ## Usage
//!
//! ```bash
//! cargo run --bin crdgen > config/crd/cache-operator.yaml
//!
//! cargo run --bin crdgen | kubectl apply -f -
//! ```

use anyhow::Result;
use cache_operator::crd::{Cache, CacheBackup, CacheBatch, CacheCluster, CacheRestore};
use kube::core::CustomResourceExt;

fn main() -> Result<()> {
    let crds = [
        CacheCluster::crd(),
        Cache::crd(),
        CacheBackup::crd(),
        CacheRestore::crd(),
        CacheBatch::crd(),
    ];
    for crd in crds {
        print!("---\n{}", serde_yaml::to_string(&crd)?);
    }
    Ok(())
}
