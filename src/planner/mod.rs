//! Planning and execution of a deployment.
//!
//! This module handles:
//! - Building the dependency graph and its creation order
//! - Driving provider adapters over that graph
//! - Reporting per-resource outcomes

mod executor;
mod graph;
mod report;

pub use executor::{CancelToken, Orchestrator, ResourceState};
pub use graph::DependencyGraph;
pub use report::{DeploymentResult, FailureKind, ResourceOutcome, ResourceReport, SkipReason};
