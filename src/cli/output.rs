//! Output formatting for CLI commands.
//!
//! This module provides formatting utilities for displaying
//! information to the user in various formats.

use colored::Colorize;
use serde::Serialize;
use std::fmt::Write;
use std::time::Duration;
use tabled::{Table, Tabled};

use crate::config::{DeployConfig, ValidationResult};
use crate::planner::{DependencyGraph, DeploymentResult, ResourceOutcome};
use crate::render::derive_domain;

use super::commands::OutputFormat;

/// Output formatter for CLI.
#[derive(Debug)]
pub struct OutputFormatter {
    /// Output format.
    format: OutputFormat,
}

/// What `plan` shows: the resources in creation order.
#[derive(Debug, Serialize)]
pub struct PlanSummary {
    /// Stage name.
    pub stage: String,
    /// Public domain of the stage.
    pub domain: String,
    /// Removal policy reported for the stage.
    pub removal_policy: String,
    /// Resources in creation order.
    pub resources: Vec<PlannedResource>,
}

/// One resource of a [`PlanSummary`].
#[derive(Debug, Serialize)]
pub struct PlannedResource {
    /// Resource id.
    pub id: String,
    /// Resource kind.
    pub kind: String,
    /// Execution domain.
    pub domain: String,
    /// Depth in the dependency graph.
    pub level: usize,
    /// Direct dependencies.
    pub depends_on: Vec<String>,
    /// Descriptor fingerprint.
    pub fingerprint: String,
}

impl PlanSummary {
    /// Summarizes `graph` for `config`.
    #[must_use]
    pub fn new(config: &DeployConfig, graph: &DependencyGraph) -> Self {
        let levels = graph.levels();
        let level_of = |id: &str| {
            levels
                .iter()
                .position(|l| l.iter().any(|x| *x == id))
                .unwrap_or(0)
        };

        let resources = graph
            .descriptors()
            .map(|d| PlannedResource {
                id: d.id.clone(),
                kind: d.kind.to_string(),
                domain: d.execution_domain.to_string(),
                level: level_of(&d.id),
                depends_on: graph.dependencies(&d.id).map(str::to_string).collect(),
                fingerprint: d.fingerprint(),
            })
            .collect();

        Self {
            stage: config.stage.to_string(),
            domain: derive_domain(&config.stage, &config.secrets.domain_name),
            removal_policy: config.stage.removal_policy().to_string(),
            resources,
        }
    }
}

/// Plan row for table display.
#[derive(Tabled)]
struct PlanRow {
    #[tabled(rename = "#")]
    index: usize,
    #[tabled(rename = "Resource")]
    id: String,
    #[tabled(rename = "Kind")]
    kind: String,
    #[tabled(rename = "Runs")]
    domain: String,
    #[tabled(rename = "Depends on")]
    depends_on: String,
    #[tabled(rename = "Fingerprint")]
    fingerprint: String,
}

/// Result row for table display.
#[derive(Tabled)]
struct ResultRow {
    #[tabled(rename = "Resource")]
    id: String,
    #[tabled(rename = "Kind")]
    kind: String,
    #[tabled(rename = "Status")]
    status: String,
    #[tabled(rename = "Time")]
    duration: String,
    #[tabled(rename = "Detail")]
    detail: String,
}

impl OutputFormatter {
    /// Creates a new output formatter.
    #[must_use]
    pub const fn new(format: OutputFormat) -> Self {
        Self { format }
    }

    /// Formats a plan for display.
    #[must_use]
    pub fn format_plan(&self, plan: &PlanSummary) -> String {
        match self.format {
            OutputFormat::Json => serde_json::to_string_pretty(plan).unwrap_or_default(),
            OutputFormat::Text => Self::format_plan_text(plan),
        }
    }

    fn format_plan_text(plan: &PlanSummary) -> String {
        let mut output = String::new();

        let _ = writeln!(output, "\nDeployment plan for stage {}", plan.stage.bold());
        let _ = writeln!(output, "   Domain: {}", plan.domain);
        let _ = writeln!(output, "   Removal policy: {}\n", plan.removal_policy);

        let rows: Vec<PlanRow> = plan
            .resources
            .iter()
            .enumerate()
            .map(|(i, r)| PlanRow {
                index: i + 1,
                id: format!("{}{}", "  ".repeat(r.level), r.id),
                kind: r.kind.clone(),
                domain: r.domain.clone(),
                depends_on: r.depends_on.join(", "),
                fingerprint: Self::truncate(&r.fingerprint, 12),
            })
            .collect();

        if !rows.is_empty() {
            output.push_str(&Table::new(rows).to_string());
            output.push('\n');
        }

        let _ = writeln!(
            output,
            "\nPlan: {} resources to create",
            plan.resources.len().to_string().green()
        );
        output
    }

    /// Formats the result of `apply`.
    #[must_use]
    pub fn format_result(&self, result: &DeploymentResult) -> String {
        match self.format {
            OutputFormat::Json => serde_json::to_string_pretty(result).unwrap_or_default(),
            OutputFormat::Text => Self::format_result_text(result),
        }
    }

    fn format_result_text(result: &DeploymentResult) -> String {
        let mut output = String::new();
        let _ = writeln!(output, "\nRun {} (stage {})\n", result.run_id, result.stage);

        let rows: Vec<ResultRow> = result
            .reports
            .iter()
            .map(|r| ResultRow {
                id: r.id.clone(),
                kind: r.kind.to_string(),
                status: Self::format_outcome(&r.outcome),
                duration: format!("{:.1}s", Duration::from_millis(r.duration_ms).as_secs_f64()),
                detail: Self::truncate(&Self::outcome_detail(&r.outcome), 60),
            })
            .collect();

        if !rows.is_empty() {
            output.push_str(&Table::new(rows).to_string());
            output.push('\n');
        }

        let summary = if result.failed() > 0 {
            "failed".red().to_string()
        } else if result.complete() {
            "complete".green().to_string()
        } else {
            "incomplete".yellow().to_string()
        };
        let _ = writeln!(
            output,
            "\nDeployment {summary}: {} created, {} failed, {} skipped in {}s",
            result.created(),
            result.failed(),
            result.skipped(),
            result.elapsed().num_seconds()
        );
        output
    }

    /// Formats the outcome of `validate`.
    #[must_use]
    pub fn format_validation(
        &self,
        config: &DeployConfig,
        validation: &ValidationResult,
        show_warnings: bool,
    ) -> String {
        let domain = derive_domain(&config.stage, &config.secrets.domain_name);
        match self.format {
            OutputFormat::Json => {
                let json = serde_json::json!({
                    "valid": validation.is_valid(),
                    "stage": config.stage.as_str(),
                    "domain": domain,
                    "project": config.settings.project,
                    "warnings": validation.warnings,
                });
                serde_json::to_string_pretty(&json).unwrap_or_default()
            }
            OutputFormat::Text => {
                let mut output = format!("{} Configuration is valid\n", "✓".green());
                if show_warnings && !validation.warnings.is_empty() {
                    output.push_str("\nWarnings:\n");
                    for warning in &validation.warnings {
                        let _ = writeln!(output, "  {} {warning}", "⚠".yellow());
                    }
                }
                let _ = writeln!(output, "\nConfiguration summary:");
                let _ = writeln!(output, "  Project: {}", config.settings.project);
                let _ = writeln!(output, "  Stage: {}", config.stage);
                let _ = writeln!(output, "  Domain: {domain}");
                let _ = writeln!(output, "  Server: {} ({})", config.settings.server.server_type, config.settings.server.image);
                let _ = writeln!(output, "  Removal policy: {}", config.stage.removal_policy());
                output
            }
        }
    }

    /// Formats a rendered proxy configuration.
    #[must_use]
    pub fn format_render(&self, domain: &str, document: &str) -> String {
        match self.format {
            OutputFormat::Json => {
                let json = serde_json::json!({ "domain": domain, "caddyfile": document });
                serde_json::to_string_pretty(&json).unwrap_or_default()
            }
            OutputFormat::Text => document.to_string(),
        }
    }

    fn format_outcome(outcome: &ResourceOutcome) -> String {
        match outcome {
            ResourceOutcome::Created { .. } => "created".green().to_string(),
            ResourceOutcome::Failed { .. } => "failed".red().to_string(),
            ResourceOutcome::Skipped { .. } => "skipped".yellow().to_string(),
        }
    }

    fn outcome_detail(outcome: &ResourceOutcome) -> String {
        match outcome {
            ResourceOutcome::Created { outputs } => ["ipv4_address", "fingerprint", "id", "name"]
                .iter()
                .find_map(|key| outputs.get_str(key))
                .unwrap_or_default()
                .to_string(),
            ResourceOutcome::Failed { error, .. } => error.clone(),
            ResourceOutcome::Skipped { reason } => reason.to_string(),
        }
    }

    /// Truncates a string to at most `max_len` characters.
    fn truncate(s: &str, max_len: usize) -> String {
        if s.chars().count() <= max_len {
            s.to_string()
        } else {
            let kept: String = s.chars().take(max_len.saturating_sub(3)).collect();
            format!("{kept}...")
        }
    }
}
