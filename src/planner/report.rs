//! Per-run deployment report.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;
use uuid::Uuid;

use crate::resource::{ExecutionDomain, Outputs, ResourceKind};

/// Why a resource failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// The remote host could not be reached.
    Connection,
    /// The adapter, input resolution or the backend reported an error.
    Adapter,
}

/// Why a resource was not attempted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    /// A dependency failed or was skipped.
    UpstreamFailure,
    /// The run was cancelled before the resource started.
    Cancelled,
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UpstreamFailure => f.write_str("upstream failure"),
            Self::Cancelled => f.write_str("run cancelled"),
        }
    }
}

/// Terminal outcome of one resource.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ResourceOutcome {
    /// Created; outputs are available to dependents.
    Created {
        /// Outputs reported by the adapter.
        outputs: Outputs,
    },
    /// Attempted and failed.
    Failed {
        /// Failure category.
        kind: FailureKind,
        /// Error message.
        error: String,
    },
    /// Never attempted.
    Skipped {
        /// Skip reason.
        reason: SkipReason,
    },
}

impl ResourceOutcome {
    /// Returns true for [`ResourceOutcome::Created`].
    #[must_use]
    pub const fn is_created(&self) -> bool {
        matches!(self, Self::Created { .. })
    }

    /// Short label used in tables.
    #[must_use]
    pub const fn label(&self) -> &'static str {
        match self {
            Self::Created { .. } => "created",
            Self::Failed { .. } => "failed",
            Self::Skipped { .. } => "skipped",
        }
    }
}

/// Report for one resource.
#[derive(Debug, Clone, Serialize)]
pub struct ResourceReport {
    /// Resource id.
    pub id: String,
    /// Resource kind.
    pub kind: ResourceKind,
    /// Execution domain.
    pub domain: ExecutionDomain,
    /// Terminal outcome.
    #[serde(flatten)]
    pub outcome: ResourceOutcome,
    /// Wall time spent in the adapter, zero if skipped.
    pub duration_ms: u64,
}

/// Result of one orchestrator run.
#[derive(Debug, Clone, Serialize)]
pub struct DeploymentResult {
    /// Run id.
    pub run_id: Uuid,
    /// Stage the run targeted.
    pub stage: String,
    /// Start time.
    pub started_at: DateTime<Utc>,
    /// Finish time.
    pub finished_at: DateTime<Utc>,
    /// Ids in the order the adapters were started.
    pub execution_order: Vec<String>,
    /// Reports in topological order.
    pub reports: Vec<ResourceReport>,
}

impl DeploymentResult {
    /// Returns the report for `id`.
    #[must_use]
    pub fn report(&self, id: &str) -> Option<&ResourceReport> {
        self.reports.iter().find(|r| r.id == id)
    }

    /// Returns the outputs of a created resource.
    #[must_use]
    pub fn outputs(&self, id: &str) -> Option<&Outputs> {
        match &self.report(id)?.outcome {
            ResourceOutcome::Created { outputs } => Some(outputs),
            _ => None,
        }
    }

    /// Number of created resources.
    #[must_use]
    pub fn created(&self) -> usize {
        self.count(|o| matches!(o, ResourceOutcome::Created { .. }))
    }

    /// Number of failed resources.
    #[must_use]
    pub fn failed(&self) -> usize {
        self.count(|o| matches!(o, ResourceOutcome::Failed { .. }))
    }

    /// Number of skipped resources.
    #[must_use]
    pub fn skipped(&self) -> usize {
        self.count(|o| matches!(o, ResourceOutcome::Skipped { .. }))
    }

    /// Returns true if no resource failed.
    #[must_use]
    pub fn success(&self) -> bool {
        self.failed() == 0
    }

    /// Returns true if every resource was created.
    #[must_use]
    pub fn complete(&self) -> bool {
        self.reports.iter().all(|r| r.outcome.is_created())
    }

    /// Total run time.
    #[must_use]
    pub fn elapsed(&self) -> chrono::Duration {
        self.finished_at - self.started_at
    }

    fn count(&self, predicate: impl Fn(&ResourceOutcome) -> bool) -> usize {
        self.reports.iter().filter(|r| predicate(&r.outcome)).count()
    }
}

impl fmt::Display for DeploymentResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "run {} ({}): {} created, {} failed, {} skipped in {}s",
            self.run_id,
            self.stage,
            self.created(),
            self.failed(),
            self.skipped(),
            self.elapsed().num_seconds()
        )
    }
}
