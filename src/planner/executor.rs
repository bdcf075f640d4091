//! Orchestrator for a validated dependency graph.
//!
//! Resources start in topological order, at most `max_parallel` at a time.
//! A resource starts only once every dependency is terminal; if any of them
//! did not end up created, it is skipped without calling its adapter.

use chrono::Utc;
use futures::stream::{FuturesUnordered, StreamExt};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};
use tracing::{Instrument, debug, error, info, info_span, warn};
use uuid::Uuid;

use crate::error::{ProviderError, Result, StackupError};
use crate::provider::{AdapterRegistry, ProviderAdapter, ResourceContext, connection_from_inputs};
use crate::remote::RemoteConnection;
use crate::resource::{ExecutionDomain, Outputs, ResourceDescriptor};

use super::graph::DependencyGraph;
use super::report::{DeploymentResult, FailureKind, ResourceOutcome, ResourceReport, SkipReason};

/// Lifecycle of one resource within a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceState {
    /// Not started.
    Pending,
    /// Inputs are being resolved from dependency outputs.
    ResolvingInputs,
    /// The adapter is running.
    Executing,
    /// Created successfully.
    Created,
    /// Attempted and failed.
    Failed,
    /// Never attempted.
    Skipped,
}

impl ResourceState {
    /// Returns true for created, failed and skipped.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Created | Self::Failed | Self::Skipped)
    }

    /// Checks that moving to `next` is allowed.
    ///
    /// # Errors
    ///
    /// Returns an internal error for any transition out of a terminal state
    /// or one that skips a step.
    pub fn transition(self, next: Self) -> Result<Self> {
        let allowed = match (self, next) {
            (Self::Pending, Self::ResolvingInputs | Self::Skipped)
            | (Self::ResolvingInputs, Self::Executing | Self::Failed)
            | (Self::Executing, Self::Created | Self::Failed) => true,
            _ => false,
        };
        if allowed {
            Ok(next)
        } else {
            Err(StackupError::internal(format!(
                "invalid resource state transition {self:?} -> {next:?}"
            )))
        }
    }
}

/// Cooperative cancellation flag shared with the caller.
///
/// Resources already running finish; nothing new is started.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    /// Creates an untriggered token.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Requests cancellation.
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    /// Returns true once [`CancelToken::cancel`] was called.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Drives provider adapters over a dependency graph.
#[derive(Debug, Clone)]
pub struct Orchestrator {
    stage: String,
    max_parallel: usize,
    cancel: CancelToken,
}

/// What a finished adapter call reports back to the scheduler.
struct Completion<'g> {
    id: &'g str,
    result: Result<Outputs>,
    elapsed: Duration,
}

impl Orchestrator {
    /// Creates a sequential orchestrator for `stage`.
    #[must_use]
    pub fn new(stage: impl Into<String>) -> Self {
        Self {
            stage: stage.into(),
            max_parallel: 1,
            cancel: CancelToken::new(),
        }
    }

    /// Sets how many resources may run at once. Zero is treated as one.
    #[must_use]
    pub fn with_max_parallel(mut self, max_parallel: usize) -> Self {
        self.max_parallel = max_parallel.max(1);
        self
    }

    /// Uses `token` for cancellation.
    #[must_use]
    pub fn with_cancel_token(mut self, token: CancelToken) -> Self {
        self.cancel = token;
        self
    }

    /// Returns the cancellation token of this orchestrator.
    #[must_use]
    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    /// Runs every resource of `graph` once.
    ///
    /// Resource failures are reported in the result, not returned.
    ///
    /// # Errors
    ///
    /// Returns an internal error only if the scheduler breaks its own
    /// lifecycle invariants.
    pub async fn run(
        &self,
        graph: &DependencyGraph,
        adapters: &AdapterRegistry,
    ) -> Result<DeploymentResult> {
        let run_id = Uuid::new_v4();
        let span = info_span!("deploy", run_id = %run_id, stage = %self.stage);
        self.run_inner(run_id, graph, adapters).instrument(span).await
    }

    async fn run_inner(
        &self,
        run_id: Uuid,
        graph: &DependencyGraph,
        adapters: &AdapterRegistry,
    ) -> Result<DeploymentResult> {
        let started_at = Utc::now();
        info!(
            "Deploying {} resources (max parallel {})",
            graph.len(),
            self.max_parallel
        );

        let mut states: HashMap<&str, ResourceState> = graph
            .order()
            .iter()
            .map(|id| (id.as_str(), ResourceState::Pending))
            .collect();
        let mut outcomes: HashMap<&str, (ResourceOutcome, Duration)> = HashMap::new();
        let mut outputs: HashMap<&str, Outputs> = HashMap::new();
        let mut execution_order = Vec::new();
        let mut in_flight = FuturesUnordered::new();

        loop {
            for id in graph.order() {
                let id = id.as_str();
                if states.get(id) != Some(&ResourceState::Pending) {
                    continue;
                }
                if !graph.dependencies(id).all(|dep| is_terminal(&states, dep)) {
                    continue;
                }
                let Some(descriptor) = graph.descriptor(id) else {
                    return Err(StackupError::internal(format!("descriptor '{id}' vanished")));
                };

                let skip = if self.cancel.is_cancelled() {
                    Some(SkipReason::Cancelled)
                } else if graph
                    .dependencies(id)
                    .any(|dep| states.get(dep) != Some(&ResourceState::Created))
                {
                    Some(SkipReason::UpstreamFailure)
                } else {
                    None
                };
                if let Some(reason) = skip {
                    warn!(resource = id, "Skipped: {reason}");
                    advance(&mut states, id, ResourceState::Skipped)?;
                    outcomes.insert(id, (ResourceOutcome::Skipped { reason }, Duration::ZERO));
                    continue;
                }

                if in_flight.len() >= self.max_parallel {
                    continue;
                }

                advance(&mut states, id, ResourceState::ResolvingInputs)?;
                debug!(resource = id, "Resolving inputs");
                match prepare(descriptor, adapters, &outputs) {
                    Ok((adapter, inputs, connection)) => {
                        advance(&mut states, id, ResourceState::Executing)?;
                        info!(resource = id, kind = %descriptor.kind, "Creating");
                        execution_order.push(id.to_string());
                        in_flight.push(execute(id, adapter, inputs, connection));
                    }
                    Err(err) => {
                        error!(resource = id, "Failed before start: {err}");
                        advance(&mut states, id, ResourceState::Failed)?;
                        outcomes.insert(id, (failed(&err), Duration::ZERO));
                    }
                }
            }

            let Some(done) = in_flight.next().await else {
                break;
            };
            match done.result {
                Ok(created) => {
                    info!(resource = done.id, elapsed = ?done.elapsed, "Created");
                    advance(&mut states, done.id, ResourceState::Created)?;
                    outputs.insert(done.id, created.clone());
                    outcomes.insert(
                        done.id,
                        (ResourceOutcome::Created { outputs: created }, done.elapsed),
                    );
                }
                Err(err) => {
                    error!(resource = done.id, "Failed: {err}");
                    advance(&mut states, done.id, ResourceState::Failed)?;
                    outcomes.insert(done.id, (failed(&err), done.elapsed));
                }
            }
        }

        let mut reports = Vec::with_capacity(graph.len());
        for descriptor in graph.descriptors() {
            let Some((outcome, elapsed)) = outcomes.remove(descriptor.id.as_str()) else {
                return Err(StackupError::internal(format!(
                    "resource '{}' never reached a terminal state",
                    descriptor.id
                )));
            };
            reports.push(ResourceReport {
                id: descriptor.id.clone(),
                kind: descriptor.kind,
                domain: descriptor.execution_domain,
                outcome,
                duration_ms: u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX),
            });
        }

        let result = DeploymentResult {
            run_id,
            stage: self.stage.clone(),
            started_at,
            finished_at: Utc::now(),
            execution_order,
            reports,
        };
        info!("{result}");
        Ok(result)
    }
}

fn is_terminal(states: &HashMap<&str, ResourceState>, id: &str) -> bool {
    states.get(id).is_some_and(|s| s.is_terminal())
}

fn advance<'g>(
    states: &mut HashMap<&'g str, ResourceState>,
    id: &'g str,
    next: ResourceState,
) -> Result<()> {
    let current = states.get(id).copied().unwrap_or(ResourceState::Pending);
    states.insert(id, current.transition(next)?);
    Ok(())
}

type Prepared = (
    Arc<dyn ProviderAdapter>,
    BTreeMap<String, Value>,
    Option<RemoteConnection>,
);

/// Looks up the adapter, resolves references and builds the connection.
fn prepare(
    descriptor: &ResourceDescriptor,
    adapters: &AdapterRegistry,
    outputs: &HashMap<&str, Outputs>,
) -> Result<Prepared> {
    let adapter = adapters.get(descriptor.kind).ok_or_else(|| ProviderError::NoAdapter {
        kind: descriptor.kind.to_string(),
    })?;
    let inputs = descriptor.resolve_inputs(|id| outputs.get(id))?;
    let connection = match descriptor.execution_domain {
        ExecutionDomain::Local => None,
        ExecutionDomain::Remote => Some(connection_from_inputs(&descriptor.id, &inputs)?),
    };
    Ok((adapter, inputs, connection))
}

async fn execute(
    id: &str,
    adapter: Arc<dyn ProviderAdapter>,
    inputs: BTreeMap<String, Value>,
    connection: Option<RemoteConnection>,
) -> Completion<'_> {
    let start = Instant::now();
    let ctx = ResourceContext::new(id, &inputs, connection.as_ref());

    let result = match adapter.create(&ctx).await {
        Ok(outputs) => adapter.await_ready(&ctx, &outputs).await.map(|()| outputs),
        Err(err) => Err(err),
    };

    Completion {
        id,
        result,
        elapsed: start.elapsed(),
    }
}

fn failed(err: &StackupError) -> ResourceOutcome {
    let kind = if err.is_connection_error() {
        FailureKind::Connection
    } else {
        FailureKind::Adapter
    };
    ResourceOutcome::Failed {
        kind,
        error: err.to_string(),
    }
}
