//! Mirroring of cluster-side caches into `Cache` resources.
//!
//! Every cache created directly on the cluster gets a `Cache` resource
//! labelled `origin=cluster`. Mirrored resources follow the cluster: their
//! definition is updated when the cache's configuration changes and they are
//! deleted when the cache disappears. Caches already declared by a user
//! resource are never mirrored, and a mirror never takes over the name of
//! another `Cache` resource.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::LazyLock;

use kube::ResourceExt;
use regex::Regex;
use sha2::{Digest, Sha256};
use tracing::{debug, info, warn};

use super::{owned_meta, retry_on};
use crate::admin::AdminError;
use crate::constants::{INTERNAL_CACHE_PREFIX, LABEL_ORIGIN, MAX_NAME_LENGTH, ORIGIN_CLUSTER};
use crate::controller::context::Context;
use crate::crd::{Cache, CacheCluster, CacheSpec};

static INVALID_NAME_CHARS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[^a-z0-9]+").expect("static regex is valid"));

const HASH_SUFFIX_LEN: usize = 8;

/// A valid object name for `raw`, stable across calls.
///
/// Names that are already valid are returned unchanged. Anything else is
/// lowercased, runs of invalid characters collapse to `-`, and a hash of the
/// original is appended so distinct inputs never share a name.
#[must_use]
pub fn sanitize_name(raw: &str) -> String {
    let lowered = raw.to_lowercase();
    let collapsed = INVALID_NAME_CHARS.replace_all(&lowered, "-");
    let trimmed = collapsed.trim_matches('-');
    if trimmed == raw && !trimmed.is_empty() && trimmed.len() <= MAX_NAME_LENGTH {
        return trimmed.to_string();
    }

    let hash: String = Sha256::digest(raw.as_bytes())
        .iter()
        .take(HASH_SUFFIX_LEN / 2)
        .map(|b| format!("{b:02x}"))
        .collect();
    let room = MAX_NAME_LENGTH - HASH_SUFFIX_LEN - 1;
    let stem = trimmed[..trimmed.len().min(room)].trim_end_matches('-');
    if stem.is_empty() {
        format!("cache-{hash}")
    } else {
        format!("{stem}-{hash}")
    }
}

pub(super) async fn caches(ctx: &mut Context<CacheCluster>) {
    let cluster = ctx.instance().clone();
    let cluster_name = cluster.name_any();
    let interval = ctx.settings().cache_sync_interval;
    ctx.flow.requeue_later(interval);
    if !cluster.is_well_formed() {
        debug!(cluster = %cluster_name, "cluster not well formed, skipping cache sync");
        return;
    }

    let admin = match ctx.admin(&cluster) {
        Ok(admin) => admin,
        Err(e) => return retry_on(ctx, "connecting to administration endpoint".to_string(), e),
    };
    let on_cluster = match admin.cache_names().await {
        Ok(names) => names,
        Err(e) => return retry_on(ctx, format!("listing caches on '{cluster_name}'"), e),
    };

    let resources = match ctx.registry.caches.list("").await {
        Ok(all) => all,
        Err(e) => return retry_on(ctx, "listing cache resources".to_string(), e),
    };
    let (mirrored, others): (Vec<Cache>, Vec<Cache>) = resources.into_iter().partition(|c| {
        c.spec.cluster_name == cluster_name
            && c.labels().get(LABEL_ORIGIN).map(String::as_str) == Some(ORIGIN_CLUSTER)
    });
    // Names held by any other resource are never written by the mirror
    let taken: BTreeSet<String> = others.iter().map(ResourceExt::name_any).collect();
    let declared: BTreeSet<String> = others
        .iter()
        .filter(|c| {
            c.spec.cluster_name == cluster_name
                && c.labels().get(LABEL_ORIGIN).map(String::as_str) != Some(ORIGIN_CLUSTER)
        })
        .map(Cache::cache_name)
        .collect();
    let mirrored: BTreeMap<String, Cache> =
        mirrored.into_iter().map(|c| (c.name_any(), c)).collect();

    let mut keep = BTreeSet::new();
    for cache_name in on_cluster
        .iter()
        .filter(|n| !n.starts_with(INTERNAL_CACHE_PREFIX) && !declared.contains(*n))
    {
        let resource_name = sanitize_name(&format!("{cluster_name}-{cache_name}"));
        if taken.contains(&resource_name) {
            warn!(
                cluster = %cluster_name,
                cache = %cache_name,
                resource = %resource_name,
                "name already used by another Cache resource, not mirroring"
            );
            continue;
        }

        let definition = match admin.cache_config(cache_name).await {
            Ok(definition) => definition,
            Err(AdminError::NotFound(_)) => {
                debug!(cluster = %cluster_name, cache = %cache_name, "cache removed while syncing");
                continue;
            }
            Err(e) => return retry_on(ctx, format!("reading configuration of cache '{cache_name}'"), e),
        };

        keep.insert(resource_name.clone());
        let spec = CacheSpec {
            cluster_name: cluster_name.clone(),
            name: Some(cache_name.clone()),
            template_name: None,
            template: Some(definition),
        };

        let existing = mirrored.get(&resource_name);
        if existing.is_none() {
            info!(cluster = %cluster_name, cache = %cache_name, resource = %resource_name, "mirroring cache");
        }
        let mut resource = existing
            .cloned()
            .unwrap_or_else(|| Cache::new(&resource_name, spec.clone()));
        let mut metadata = owned_meta(&cluster, &resource_name, resource.metadata.clone());
        metadata
            .labels
            .get_or_insert_with(BTreeMap::new)
            .insert(LABEL_ORIGIN.to_string(), ORIGIN_CLUSTER.to_string());
        resource.metadata = metadata;
        resource.spec = spec;
        ctx.registry.caches.define(resource);
    }

    for name in mirrored.keys().filter(|name| !keep.contains(*name)) {
        info!(cluster = %cluster_name, resource = %name, "cache removed from cluster, deleting mirror");
        ctx.registry.caches.delete(name);
    }
}
