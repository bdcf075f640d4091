//! CLI module for the stackup deployment tool.
//!
//! This module provides the command-line interface for validating,
//! planning and applying a stack.

mod commands;
mod output;

pub use commands::{Cli, Commands, OutputFormat};
pub use output::{OutputFormatter, PlanSummary, PlannedResource};
