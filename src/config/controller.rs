//! # Controller Configuration
//!
//! Operator settings loaded from environment variables, plus the immutable
//! [`OperatorSettings`] snapshot each reconcile invocation works with.

use std::sync::Arc;
use std::time::Duration;

use crate::constants::{
    DEFAULT_ADMIN_PORT, DEFAULT_BACKOFF_MAX_MS, DEFAULT_BACKOFF_START_MS,
    DEFAULT_CACHE_SYNC_INTERVAL_SECS, DEFAULT_CLI_IMAGE, DEFAULT_MAX_CONCURRENT_RECONCILES, DEFAULT_PHASE_REQUEUE_SECS,
    DEFAULT_RECONCILIATION_ERROR_REQUEUE_SECS, DEFAULT_SERVER_IMAGE, DEFAULT_WAIT_REQUEUE_SECS,
    DEFAULT_WATCH_RESTART_DELAY_AFTER_END_SECS, DEFAULT_WATCH_RESTART_DELAY_SECS,
};

/// Process-wide operator configuration
///
/// Every field has a default; the deployment overrides them through `envFrom`.
#[derive(Debug, Clone)]
pub struct ControllerConfig {
    /// Reconciliation error requeue interval (seconds)
    pub reconciliation_error_requeue_secs: u64,
    /// Requeue interval while waiting on a dependency (seconds)
    pub wait_requeue_secs: u64,
    /// Requeue interval after a job-style resource advanced its phase (seconds)
    pub phase_requeue_secs: u64,
    /// Exponential backoff starting value (milliseconds)
    pub backoff_start_ms: u64,
    /// Exponential backoff maximum value (milliseconds)
    pub backoff_max_ms: u64,
    /// Watch stream restart delay after unknown errors (seconds)
    pub watch_restart_delay_secs: u64,
    /// Watch stream restart delay after stream ends (seconds)
    pub watch_restart_delay_after_end_secs: u64,
    /// Maximum concurrent reconciliations per controller
    pub max_concurrent_reconciliations: u16,
    /// Restrict every watch to one namespace, cluster-wide when unset
    pub watch_namespace: Option<String>,
    /// Log format (json, text)
    pub log_format: String,
    /// Enable metrics collection
    pub enable_metrics: bool,
    /// Default cache server image
    pub server_image: String,
    /// Image used by batch jobs
    pub cli_image: String,
    /// Port of the administration endpoint
    pub admin_port: i32,
    /// Mirror cluster-side caches into `Cache` resources
    pub cache_sync_enabled: bool,
    /// Interval between cache mirroring passes (seconds)
    pub cache_sync_interval_secs: u64,
    /// Talk to the admin endpoint over TLS
    pub admin_tls: bool,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            reconciliation_error_requeue_secs: DEFAULT_RECONCILIATION_ERROR_REQUEUE_SECS,
            wait_requeue_secs: DEFAULT_WAIT_REQUEUE_SECS,
            phase_requeue_secs: DEFAULT_PHASE_REQUEUE_SECS,
            backoff_start_ms: DEFAULT_BACKOFF_START_MS,
            backoff_max_ms: DEFAULT_BACKOFF_MAX_MS,
            watch_restart_delay_secs: DEFAULT_WATCH_RESTART_DELAY_SECS,
            watch_restart_delay_after_end_secs: DEFAULT_WATCH_RESTART_DELAY_AFTER_END_SECS,
            max_concurrent_reconciliations: DEFAULT_MAX_CONCURRENT_RECONCILES,
            watch_namespace: None,
            log_format: "json".to_string(),
            enable_metrics: true,
            server_image: DEFAULT_SERVER_IMAGE.to_string(),
            cli_image: DEFAULT_CLI_IMAGE.to_string(),
            admin_port: DEFAULT_ADMIN_PORT,
            cache_sync_enabled: false,
            cache_sync_interval_secs: DEFAULT_CACHE_SYNC_INTERVAL_SECS,
            admin_tls: false,
        }
    }
}

impl ControllerConfig {
    /// Load configuration from environment variables with defaults
    #[must_use]
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            reconciliation_error_requeue_secs: env_var_or_default(
                "RECONCILIATION_ERROR_REQUEUE_SECS",
                defaults.reconciliation_error_requeue_secs,
            ),
            wait_requeue_secs: env_var_or_default("WAIT_REQUEUE_SECS", defaults.wait_requeue_secs),
            phase_requeue_secs: env_var_or_default(
                "PHASE_REQUEUE_SECS",
                defaults.phase_requeue_secs,
            ),
            backoff_start_ms: env_var_or_default("BACKOFF_START_MS", defaults.backoff_start_ms),
            backoff_max_ms: env_var_or_default("BACKOFF_MAX_MS", defaults.backoff_max_ms),
            watch_restart_delay_secs: env_var_or_default(
                "WATCH_RESTART_DELAY_SECS",
                defaults.watch_restart_delay_secs,
            ),
            watch_restart_delay_after_end_secs: env_var_or_default(
                "WATCH_RESTART_DELAY_AFTER_END_SECS",
                defaults.watch_restart_delay_after_end_secs,
            ),
            max_concurrent_reconciliations: env_var_or_default(
                "MAX_CONCURRENT_RECONCILIATIONS",
                defaults.max_concurrent_reconciliations,
            ),
            watch_namespace: std::env::var("WATCH_NAMESPACE")
                .ok()
                .filter(|ns| !ns.trim().is_empty()),
            log_format: env_var_or_default_str("LOG_FORMAT", &defaults.log_format),
            enable_metrics: env_var_or_default_bool("ENABLE_METRICS", defaults.enable_metrics),
            server_image: env_var_or_default_str("RELATED_IMAGE_SERVER", &defaults.server_image),
            cli_image: env_var_or_default_str("RELATED_IMAGE_CLI", &defaults.cli_image),
            admin_port: env_var_or_default("ADMIN_PORT", defaults.admin_port),
            cache_sync_enabled: env_var_or_default_bool(
                "CACHE_SYNC_ENABLED",
                defaults.cache_sync_enabled,
            ),
            cache_sync_interval_secs: env_var_or_default(
                "CACHE_SYNC_INTERVAL_SECS",
                defaults.cache_sync_interval_secs,
            ),
            admin_tls: env_var_or_default_bool("ADMIN_TLS", defaults.admin_tls),
        }
    }

    /// Immutable snapshot handed to a single reconcile invocation
    #[must_use]
    pub fn snapshot(&self) -> Arc<OperatorSettings> {
        Arc::new(OperatorSettings {
            server_image: self.server_image.clone(),
            cli_image: self.cli_image.clone(),
            admin_port: self.admin_port,
            admin_tls: self.admin_tls,
            cache_sync_enabled: self.cache_sync_enabled,
            cache_sync_interval: Duration::from_secs(self.cache_sync_interval_secs),
            wait_requeue: Duration::from_secs(self.wait_requeue_secs),
            phase_requeue: Duration::from_secs(self.phase_requeue_secs),
            error_requeue: self.reconciliation_error_requeue_duration(),
        })
    }

    /// Requeue interval after a composition error
    #[must_use]
    pub fn reconciliation_error_requeue_duration(&self) -> Duration {
        Duration::from_secs(self.reconciliation_error_requeue_secs)
    }

    /// Pause before restarting a watch that failed
    #[must_use]
    pub fn watch_restart_delay_duration(&self) -> Duration {
        Duration::from_secs(self.watch_restart_delay_secs)
    }

    /// Pause before restarting a watch whose stream ended
    #[must_use]
    pub fn watch_restart_delay_after_end_duration(&self) -> Duration {
        Duration::from_secs(self.watch_restart_delay_after_end_secs)
    }
}

/// Settings consumed by handlers during one reconcile invocation.
///
/// Never mutated after creation; a new snapshot is taken per invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OperatorSettings {
    pub server_image: String,
    pub cli_image: String,
    pub admin_port: i32,
    pub admin_tls: bool,
    pub cache_sync_enabled: bool,
    pub cache_sync_interval: Duration,
    pub wait_requeue: Duration,
    pub phase_requeue: Duration,
    pub error_requeue: Duration,
}

impl Default for OperatorSettings {
    fn default() -> Self {
        let snapshot = ControllerConfig::default().snapshot();
        (*snapshot).clone()
    }
}

/// Read environment variable or return default value
fn env_var_or_default<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

/// Read environment variable as boolean or return default
fn env_var_or_default_bool(key: &str, default: bool) -> bool {
    std::env::var(key).ok().map_or(default, |v| parse_bool(&v))
}

/// Read environment variable as string or return default
fn env_var_or_default_str(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn parse_bool(value: &str) -> bool {
    matches!(
        value.to_lowercase().as_str(),
        "true" | "1" | "yes" | "on"
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_bool_accepts_common_truthy_values() {
        for value in ["true", "TRUE", "1", "yes", "On"] {
            assert!(parse_bool(value), "{value} should parse as true");
        }
        for value in ["false", "0", "no", "", "enabled"] {
            assert!(!parse_bool(value), "{value} should parse as false");
        }
    }

    #[test]
    fn test_snapshot_carries_durations() {
        let config = ControllerConfig {
            wait_requeue_secs: 7,
            phase_requeue_secs: 2,
            reconciliation_error_requeue_secs: 30,
            ..ControllerConfig::default()
        };
        let settings = config.snapshot();
        assert_eq!(settings.wait_requeue, Duration::from_secs(7));
        assert_eq!(settings.phase_requeue, Duration::from_secs(2));
        assert_eq!(settings.error_requeue, Duration::from_secs(30));
        assert_eq!(settings.server_image, config.server_image);
    }

    #[test]
    fn test_default_settings_match_default_config() {
        let settings = OperatorSettings::default();
        assert_eq!(settings.admin_port, DEFAULT_ADMIN_PORT);
        assert!(!settings.cache_sync_enabled);
        assert_eq!(
            settings.cache_sync_interval,
            Duration::from_secs(DEFAULT_CACHE_SYNC_INTERVAL_SECS)
        );
    }
}
