//! # Constants
//!
//! Shared constants used throughout the operator.
//!
//! These values represent reasonable defaults and can be overridden via
//! configuration or environment variables where applicable.

/// Field manager / reporting controller name used for writes and events
pub const OPERATOR_NAME: &str = "cache-operator";

/// API group of every custom resource owned by this operator
pub const API_GROUP: &str = "cache.octopilot.io";

/// Default HTTP server port for metrics and health checks
pub const DEFAULT_METRICS_PORT: u16 = 5000;

/// Default HTTP server startup timeout (how long to wait for server to be ready)
pub const DEFAULT_SERVER_STARTUP_TIMEOUT_SECS: u64 = 10;

/// Default HTTP server readiness poll interval
pub const DEFAULT_SERVER_POLL_INTERVAL_MS: u64 = 50;

/// Default requeue interval for reconciliation errors (seconds)
pub const DEFAULT_RECONCILIATION_ERROR_REQUEUE_SECS: u64 = 60;

/// Requeue delay while waiting on a dependency (cluster not well formed, job running)
pub const DEFAULT_WAIT_REQUEUE_SECS: u64 = 5;

/// Requeue delay after a job-style resource changed phase
pub const DEFAULT_PHASE_REQUEUE_SECS: u64 = 1;

/// How often a well-formed cluster is revisited to mirror its caches
pub const DEFAULT_CACHE_SYNC_INTERVAL_SECS: u64 = 60;

/// Default exponential backoff starting value (milliseconds)
pub const DEFAULT_BACKOFF_START_MS: u64 = 1000;

/// Default exponential backoff maximum value (milliseconds)
pub const DEFAULT_BACKOFF_MAX_MS: u64 = 30_000;

/// Default delay before restarting watch stream after unknown errors (seconds)
pub const DEFAULT_WATCH_RESTART_DELAY_SECS: u64 = 5;

/// Default delay before restarting watch stream after it ends (seconds)
pub const DEFAULT_WATCH_RESTART_DELAY_AFTER_END_SECS: u64 = 1;

/// Default number of objects reconciled concurrently per controller
pub const DEFAULT_MAX_CONCURRENT_RECONCILES: u16 = 10;

/// Default cache server image
pub const DEFAULT_SERVER_IMAGE: &str = "quay.io/infinispan/server:15.0";

/// Default image used by batch jobs (ships the cache CLI)
pub const DEFAULT_CLI_IMAGE: &str = "quay.io/infinispan/cli:15.0";

/// Port clients connect to
pub const CLIENT_PORT: i32 = 11222;

/// Port of the administration endpoint used by the operator
pub const DEFAULT_ADMIN_PORT: i32 = 11223;

/// Port used by cluster members to discover each other
pub const PING_PORT: i32 = 8888;

/// Key inside the server ConfigMap holding the rendered configuration
pub const SERVER_CONFIG_KEY: &str = "infinispan.yaml";

/// Key inside the batch ConfigMap holding the batch commands
pub const BATCH_SCRIPT_KEY: &str = "batch";

/// Path where batch input is mounted inside the job container
pub const BATCH_MOUNT_PATH: &str = "/etc/batch";

/// Key inside the user truststore secret holding the PKCS#12 truststore
pub const TRUSTSTORE_KEY: &str = "truststore.p12";

/// Mount path of the server configuration inside server pods
pub const SERVER_CONFIG_MOUNT_PATH: &str = "/etc/config";

/// Mount path of the admin credentials inside server pods
pub const ADMIN_SECRET_MOUNT_PATH: &str = "/etc/security/admin";

/// Mount path of the client truststore inside server pods
pub const TRUSTSTORE_MOUNT_PATH: &str = "/etc/security/truststore";

/// Username of the generated operator identity
pub const ADMIN_USERNAME: &str = "operator";

/// Username of the generated developer identity
pub const DEVELOPER_USERNAME: &str = "developer";

/// Length of generated passwords
pub const GENERATED_PASSWORD_LENGTH: usize = 16;

/// Caches whose names start with this prefix are internal to the server
pub const INTERNAL_CACHE_PREFIX: &str = "___";

/// Label carrying the owning cluster name
pub const LABEL_CLUSTER: &str = "cache.octopilot.io/cluster";

/// Label marking a `Cache` resource created by mirroring a cluster-side cache
pub const LABEL_ORIGIN: &str = "cache.octopilot.io/origin";

/// Value of [`LABEL_ORIGIN`] for mirrored caches
pub const ORIGIN_CLUSTER: &str = "cluster";

/// Standard Kubernetes labels
pub const LABEL_APP_NAME: &str = "app.kubernetes.io/name";
pub const LABEL_APP_INSTANCE: &str = "app.kubernetes.io/instance";
pub const LABEL_MANAGED_BY: &str = "app.kubernetes.io/managed-by";

/// Pod template annotation forcing a rolling restart when the configuration changes
pub const ANNOTATION_CONFIG_HASH: &str = "cache.octopilot.io/config-hash";

/// Condition types
pub const CONDITION_WELL_FORMED: &str = "WellFormed";
pub const CONDITION_READY: &str = "Ready";
pub const CONDITION_GRACEFUL_SHUTDOWN: &str = "GracefulShutdown";

/// Maximum length of a Kubernetes object name
pub const MAX_NAME_LENGTH: usize = 63;

/// Directory on the server pods where backups are written
pub const BACKUP_ROOT_PATH: &str = "/opt/infinispan/server/data/backups";

/// Timeout for calls to the cache administration API (seconds)
pub const DEFAULT_ADMIN_TIMEOUT_SECS: u64 = 30;
