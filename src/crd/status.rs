//! # Shared Status Types
//!
//! Conditions and the phase/reason contract shared by job-style resources.

use serde::{Deserialize, Serialize};

/// Condition represents a condition of a resource
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Condition {
    /// Type of condition
    pub r#type: String,
    /// Status of the condition (True, False, Unknown)
    pub status: String,
    /// Last transition time
    #[serde(default)]
    pub last_transition_time: Option<String>,
    /// Reason for the condition
    #[serde(default)]
    pub reason: Option<String>,
    /// Message describing the condition
    #[serde(default)]
    pub message: Option<String>,
}

impl Condition {
    #[must_use]
    pub fn is_true(&self) -> bool {
        self.status == "True"
    }
}

/// Upsert a condition.
///
/// `lastTransitionTime` only moves when the status value flips, so setting the
/// same condition on every reconcile leaves the status sub-tree unchanged.
pub fn set_condition(
    conditions: &mut Vec<Condition>,
    type_: &str,
    status: bool,
    reason: &str,
    message: Option<String>,
) {
    let status_str = if status { "True" } else { "False" };
    if let Some(existing) = conditions.iter_mut().find(|c| c.r#type == type_) {
        if existing.status != status_str {
            existing.status = status_str.to_string();
            existing.last_transition_time = Some(chrono::Utc::now().to_rfc3339());
        }
        existing.reason = Some(reason.to_string());
        existing.message = message;
        return;
    }
    conditions.push(Condition {
        r#type: type_.to_string(),
        status: status_str.to_string(),
        last_transition_time: Some(chrono::Utc::now().to_rfc3339()),
        reason: Some(reason.to_string()),
        message,
    });
}

#[must_use]
pub fn condition_is_true(conditions: &[Condition], type_: &str) -> bool {
    conditions
        .iter()
        .any(|c| c.r#type == type_ && c.is_true())
}

/// Lifecycle phase of a job-style resource
///
/// Forward order: Unset, Validating, Initializing, Initialized, Running, then a
/// terminal Succeeded or Failed. Failed is reachable from any non-terminal phase.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Deserialize, Serialize, schemars::JsonSchema,
)]
pub enum JobPhase {
    #[default]
    #[serde(rename = "")]
    Unset,
    Validating,
    Initializing,
    Initialized,
    Running,
    Succeeded,
    Failed,
}

impl JobPhase {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            JobPhase::Unset => "",
            JobPhase::Validating => "Validating",
            JobPhase::Initializing => "Initializing",
            JobPhase::Initialized => "Initialized",
            JobPhase::Running => "Running",
            JobPhase::Succeeded => "Succeeded",
            JobPhase::Failed => "Failed",
        }
    }

    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobPhase::Succeeded | JobPhase::Failed)
    }

    fn ordinal(self) -> u8 {
        match self {
            JobPhase::Unset => 0,
            JobPhase::Validating => 1,
            JobPhase::Initializing => 2,
            JobPhase::Initialized => 3,
            JobPhase::Running => 4,
            JobPhase::Succeeded | JobPhase::Failed => 5,
        }
    }

    /// Whether moving from `self` to `next` respects forward-only ordering.
    ///
    /// Staying in the same phase is allowed (re-entrant no-op). Terminal phases are sinks.
    #[must_use]
    pub fn can_transition_to(&self, next: JobPhase) -> bool {
        if *self == next {
            return true;
        }
        if self.is_terminal() {
            return false;
        }
        next == JobPhase::Failed || next.ordinal() > self.ordinal()
    }
}

impl std::fmt::Display for JobPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(if *self == JobPhase::Unset {
            "Unset"
        } else {
            self.as_str()
        })
    }
}

/// Status shared by `CacheBackup`, `CacheRestore` and `CacheBatch`
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct JobStatus {
    /// Current lifecycle phase
    #[serde(default)]
    pub phase: JobPhase,
    /// Human-readable cause of the current phase (set on failure)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    /// UID of the target cluster pinned during initialization
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cluster_uid: Option<String>,
}
