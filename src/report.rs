//! Human-readable rendering of plans and run reports.

use std::fmt::Write;

use crate::logic::selection::StepSelection;
use crate::sequencer::{RunReport, StepOutcome, StepReport};
use crate::types::StepId;

/// One line per step, followed by indented warnings
pub fn render_step(report: &StepReport) -> String {
    let id = report.step.to_string();
    let mut out = match &report.outcome {
        StepOutcome::Applied(applied) => {
            let detail = if applied.changes.is_empty() {
                "no changes".to_string()
            } else {
                applied.changes.join("; ")
            };
            format!("✓ {:<17} applied ({:.1}s): {}", id, report.duration.as_secs_f64(), detail)
        }
        StepOutcome::AlreadySatisfied => format!("✓ {:<17} already satisfied", id),
        StepOutcome::WouldApply => format!("• {:<17} would apply: {}", id, report.step.description()),
        StepOutcome::Skipped(reason) => format!("- {:<17} skipped ({})", id, reason),
        StepOutcome::Failed { error, fatal: true } => format!("✗ {:<17} failed: {}", id, error),
        StepOutcome::Failed { error, fatal: false } => {
            format!("✗ {:<17} failed (continuing): {}", id, error)
        }
        StepOutcome::NotRun => format!("  {:<17} not run", id),
    };

    if let StepOutcome::Applied(applied) = &report.outcome {
        for warning in &applied.warnings {
            let _ = write!(out, "\n    ⚠ {}", warning);
        }
    }
    out
}

/// Closing summary for a finished run
pub fn render_summary(report: &RunReport) -> String {
    let applied = report.count(|o| matches!(o, StepOutcome::Applied(_)));
    let satisfied = report.count(|o| *o == StepOutcome::AlreadySatisfied);
    let pending = report.count(|o| *o == StepOutcome::WouldApply);
    let skipped = report.count(|o| matches!(o, StepOutcome::Skipped(_)));
    let failed = report.count(StepOutcome::is_failure);

    let mut out = if report.dry_run {
        format!(
            "Dry run: {} step(s) would apply, {} already satisfied, {} skipped",
            pending, satisfied, skipped
        )
    } else {
        format!(
            "{} applied, {} already satisfied, {} skipped, {} failed",
            applied, satisfied, skipped, failed
        )
    };

    match report.fatal_failure() {
        Some(failure) => {
            let _ = write!(out, "\n✗ Provisioning stopped at {}", failure.step);
        }
        None if !report.dry_run => out.push_str("\n✓ Provisioning completed"),
        None => {}
    }
    out
}

/// Ordered step list with what will happen to each
pub fn render_plan(selection: &StepSelection) -> String {
    let mut out = String::new();
    for step in StepId::all() {
        let mode = if !selection.is_selected(step) {
            "skip"
        } else if selection.is_fatal(step) {
            "fatal"
        } else {
            "best-effort"
        };
        let _ = writeln!(
            out,
            "{:>2}. {:<17} [{:<11}] {}",
            step.order() + 1,
            step.to_string(),
            mode,
            step.description()
        );
    }
    out
}
