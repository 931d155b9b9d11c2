//! Output formatting for CLI commands.
//!
//! This module provides formatting utilities for displaying
//! information to the user in various formats.

use colored::Colorize;
use serde::Serialize;
use std::fmt::Write;
use tabled::{Table, Tabled};

use crate::config::ValidationResult;
use crate::model::{Instance, ObjectKey, Unit, unit_index};
use crate::planner::{ActionType, ScaleDecision};
use crate::reconciler::{PlanReport, ReconcileOutcome};

use super::commands::OutputFormat;

/// Output formatter for CLI.
#[derive(Debug)]
pub struct OutputFormatter {
    /// Output format.
    format: OutputFormat,
}

/// Instance row for table display.
#[derive(Tabled)]
struct InstanceRow {
    #[tabled(rename = "Namespace")]
    namespace: String,
    #[tabled(rename = "Name")]
    name: String,
    #[tabled(rename = "Desired")]
    desired: u32,
    #[tabled(rename = "Observed")]
    observed: String,
    #[tabled(rename = "Units")]
    units: String,
}

/// Unit row for table display.
#[derive(Tabled)]
struct UnitRow {
    #[tabled(rename = "Name")]
    name: String,
    #[tabled(rename = "Index")]
    index: String,
    #[tabled(rename = "State")]
    state: String,
    #[tabled(rename = "Owner")]
    owner: String,
    #[tabled(rename = "Created")]
    created: String,
}

/// Plan action row for table display.
#[derive(Tabled)]
struct PlanActionRow {
    #[tabled(rename = "#")]
    index: usize,
    #[tabled(rename = "Action")]
    action: String,
    #[tabled(rename = "Unit")]
    unit: String,
    #[tabled(rename = "Reason")]
    reason: String,
}

impl OutputFormatter {
    /// Creates a new output formatter.
    #[must_use]
    pub const fn new(format: OutputFormat) -> Self {
        Self { format }
    }

    /// Formats the outcome of a reconciliation pass.
    #[must_use]
    pub fn format_outcome(&self, outcome: &ReconcileOutcome) -> String {
        match self.format {
            OutputFormat::Json => to_json(outcome),
            OutputFormat::Text => match outcome {
                ReconcileOutcome::Deleted { key } => {
                    format!("{} Instance {key} not found, nothing to do\n", "!".yellow())
                }
                ReconcileOutcome::Reconciled(result) => {
                    let mark = if result.converged {
                        "✓".green()
                    } else {
                        "…".yellow()
                    };
                    format!("{mark} {result}")
                }
            },
        }
    }

    /// Formats a dry-run plan.
    #[must_use]
    pub fn format_plan(&self, report: &PlanReport) -> String {
        match self.format {
            OutputFormat::Json => to_json(report),
            OutputFormat::Text => Self::format_plan_text(report),
        }
    }

    fn format_plan_text(report: &PlanReport) -> String {
        let mut output = String::new();
        let diff = &report.diff;

        let _ = writeln!(output, "\nPlan for {}", report.key);
        let _ = writeln!(
            output,
            "   Desired: {}, live: {}, terminating: {}",
            diff.desired,
            diff.live.len(),
            diff.terminating.len()
        );
        let _ = writeln!(output, "   Status reports: {}\n", join_or_dash(&report.reported_units));

        if report.plan.is_empty() {
            let _ = writeln!(output, "{} No changes required, {} is converged.", "✓".green(), report.key);
            return output;
        }

        let rows: Vec<PlanActionRow> = report
            .plan
            .actions
            .iter()
            .enumerate()
            .map(|(i, a)| PlanActionRow {
                index: i + 1,
                action: Self::format_action_type(a.action_type),
                unit: a.description(),
                reason: a.reason.clone(),
            })
            .collect();
        output.push_str(&Table::new(rows).to_string());
        output.push('\n');

        let _ = write!(
            output,
            "\nPlan: {} to create, {} to delete ({})\n",
            report.plan.create_count().to_string().green(),
            report.plan.delete_count().to_string().red(),
            Self::format_decision(report.plan.decision)
        );

        output
    }

    /// Formats a list of instances.
    #[must_use]
    pub fn format_instances(&self, instances: &[Instance]) -> String {
        match self.format {
            OutputFormat::Json => to_json(&instances),
            OutputFormat::Text => {
                if instances.is_empty() {
                    return String::from("No instances found.\n");
                }

                let rows: Vec<InstanceRow> = instances
                    .iter()
                    .map(|i| {
                        let observed = i.status.observed_units.len();
                        let desired = i.desired_size();
                        let count = format!("{observed}/{desired}");
                        InstanceRow {
                            namespace: i.metadata.namespace.clone(),
                            name: i.metadata.name.clone(),
                            desired,
                            observed: if observed == desired as usize {
                                count.green().to_string()
                            } else {
                                count.yellow().to_string()
                            },
                            units: Self::truncate(&join_or_dash(&i.status.observed_units), 60),
                        }
                    })
                    .collect();

                let mut output = Table::new(rows).to_string();
                output.push('\n');
                output
            }
        }
    }

    /// Formats the units of an instance.
    #[must_use]
    pub fn format_units(&self, owner: &ObjectKey, units: &[Unit]) -> String {
        match self.format {
            OutputFormat::Json => to_json(&units),
            OutputFormat::Text => {
                if units.is_empty() {
                    return format!("No units found for {owner}.\n");
                }

                let rows: Vec<UnitRow> = units
                    .iter()
                    .map(|u| UnitRow {
                        name: u.name().to_string(),
                        index: unit_index(&owner.name, u.name())
                            .map_or_else(|| String::from("-"), |i| i.to_string()),
                        state: if u.is_live() {
                            "live".green().to_string()
                        } else {
                            "terminating".yellow().to_string()
                        },
                        owner: u
                            .metadata
                            .controller_ref()
                            .map_or_else(|| "none".dimmed().to_string(), |r| r.name.clone()),
                        created: u
                            .metadata
                            .creation_timestamp
                            .map_or_else(|| String::from("-"), |t| t.format("%Y-%m-%d %H:%M:%S").to_string()),
                    })
                    .collect();

                let mut output = Table::new(rows).to_string();
                output.push('\n');
                output
            }
        }
    }

    /// Formats a configuration validation result.
    #[must_use]
    pub fn format_validation(&self, result: &ValidationResult, show_warnings: bool) -> String {
        match self.format {
            OutputFormat::Json => to_json(&serde_json::json!({
                "valid": result.is_valid(),
                "errors": result.errors.iter().map(ToString::to_string).collect::<Vec<_>>(),
                "warnings": result.warnings,
            })),
            OutputFormat::Text => {
                let mut output = String::new();
                if result.is_valid() {
                    let _ = writeln!(output, "{} Configuration is valid.", "✓".green());
                } else {
                    let _ = writeln!(
                        output,
                        "{} Configuration has {} error(s):",
                        "✗".red(),
                        result.error_count()
                    );
                    for error in &result.errors {
                        let _ = writeln!(output, "   - {error}");
                    }
                }

                if show_warnings && result.warning_count() > 0 {
                    let _ = writeln!(output, "\n{} Warnings:", "⚠".yellow());
                    for warning in &result.warnings {
                        let _ = writeln!(output, "   - {warning}");
                    }
                }
                output
            }
        }
    }

    /// Formats a success message.
    #[must_use]
    pub fn success(&self, message: &str) -> String {
        self.message("success", &"✓".green().to_string(), message)
    }

    /// Formats a warning message.
    #[must_use]
    pub fn warning(&self, message: &str) -> String {
        self.message("warning", &"⚠".yellow().to_string(), message)
    }

    /// Formats an error message.
    #[must_use]
    pub fn error(&self, message: &str) -> String {
        self.message("error", &"✗".red().to_string(), message)
    }

    fn message(&self, status: &str, mark: &str, message: &str) -> String {
        match self.format {
            OutputFormat::Json => to_json(&serde_json::json!({ "status": status, "message": message })),
            OutputFormat::Text => format!("{mark} {message}\n"),
        }
    }

    /// Formats an action type with color.
    fn format_action_type(action_type: ActionType) -> String {
        match action_type {
            ActionType::CreateUnit => "+create".green().to_string(),
            ActionType::DeleteUnit => "-delete".red().to_string(),
        }
    }

    /// Formats a scale decision with color.
    fn format_decision(decision: ScaleDecision) -> String {
        match decision {
            ScaleDecision::Grow { .. } => decision.to_string().green().to_string(),
            ScaleDecision::Shrink { .. } => decision.to_string().red().to_string(),
            ScaleDecision::NoOp => decision.to_string().dimmed().to_string(),
        }
    }

    /// Truncates a string to a maximum number of characters.
    fn truncate(s: &str, max_len: usize) -> String {
        if s.chars().count() <= max_len {
            s.to_string()
        } else {
            let kept: String = s.chars().take(max_len.saturating_sub(3)).collect();
            format!("{kept}...")
        }
    }
}

fn to_json<T: Serialize + ?Sized>(value: &T) -> String {
    let mut json = serde_json::to_string_pretty(value).unwrap_or_default();
    json.push('\n');
    json
}

fn join_or_dash(names: &[String]) -> String {
    if names.is_empty() {
        String::from("-")
    } else {
        names.join(", ")
    }
}
