//! Resource model.
//!
//! Descriptors, their inputs and the outputs a created resource exposes to
//! its dependents.

mod descriptor;
mod outputs;

pub use descriptor::{ExecutionDomain, InputValue, OutputRef, ResourceDescriptor, ResourceKind};
pub use outputs::Outputs;
