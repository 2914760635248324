//! Terminal output for reconciliation runs and drift reports

use colored::Colorize;
use declarative::{
    ApplyResult, DiffSummary, ExecuteSummary, ProgressCallback, ResourceDiff, ResourceState,
    group_by_type,
};
use similar::{ChangeTag, TextDiff};

use crate::reconciler::{ReconciliationResult, Status};
use crate::ui;

// ============================================================================
// Step progress
// ============================================================================

/// Prints one line per resource as a run progresses
pub struct StepPrinter {
    quiet: bool,
    done: usize,
    total: usize,
}

impl StepPrinter {
    pub fn new(quiet: bool) -> Self {
        Self {
            quiet,
            done: 0,
            total: 0,
        }
    }
}

impl ProgressCallback for StepPrinter {
    fn on_batch_start(&mut self, count: usize, teardown: bool) {
        self.done = 0;
        self.total = count;
        if self.quiet {
            return;
        }
        let verb = if teardown { "Removing" } else { "Applying" };
        println!();
        println!("  {} {verb} {count} resources...", "→".cyan());
    }

    fn on_resource_start(&mut self, id: &str, description: &str) {
        log::debug!("[{}/{}] {id}: {description}", self.done + 1, self.total);
    }

    fn on_resource_complete(&mut self, id: &str, result: &ApplyResult) {
        self.done += 1;
        if self.quiet {
            return;
        }
        let symbol = match result {
            ApplyResult::NoChange => "○".dimmed(),
            ApplyResult::Created | ApplyResult::Modified | ApplyResult::Removed => "✓".green(),
            ApplyResult::Failed { .. } => "✗".red(),
            ApplyResult::Skipped { .. } => "⊘".yellow(),
        };
        let note = match result {
            ApplyResult::Failed { error } => format!(" {}", ui::one_line(error, 60).red()),
            ApplyResult::Skipped { reason } => format!(" {}", reason.dimmed()),
            _ => String::new(),
        };
        println!("    {symbol} {id}{note}");
    }

    fn on_batch_complete(&mut self) {}
}

// ============================================================================
// Results
// ============================================================================

/// Print the outcome of one lifecycle operation
pub fn print_result(operation: &str, result: &ReconciliationResult) {
    println!();
    match result.status {
        Status::Applied => println!("  {} {operation} applied", "✓".green().bold()),
        Status::NoOp => println!("  {} {operation}: nothing to do", "○".dimmed()),
        Status::Failed => println!("  {} {operation} failed", "✗".red().bold()),
    }
    print_counts(&result.summary);

    if let Some(error) = &result.error {
        let kind = result
            .error_kind()
            .map(|k| format!("[{}] ", k.description()))
            .unwrap_or_default();
        let at = error
            .resource
            .as_deref()
            .map(|r| format!(" (at {r})"))
            .unwrap_or_default();
        println!("    {kind}{}{at}", error.message.red());
    }
    for warning in &result.warnings {
        println!("    {} {}", "⚠".yellow(), ui::one_line(warning, 100));
    }
}

fn print_counts(summary: &ExecuteSummary) {
    if summary.created > 0 {
        println!("    • {} resources created", summary.created);
    }
    if summary.modified > 0 {
        println!("    • {} resources modified", summary.modified);
    }
    if summary.removed > 0 {
        println!("    • {} resources removed", summary.removed);
    }
    if summary.skipped > 0 {
        println!("    • {} resources skipped", summary.skipped);
    }
    if summary.failed > 0 {
        println!("    • {} {} failed", summary.failed, "resources".red());
    }
}

// ============================================================================
// Drift
// ============================================================================

fn type_name(resource_type: &str) -> &str {
    match resource_type {
        "virtualenv" => "Virtual environment",
        "python_package" => "Python packages",
        "script" => "Scheduler hook scripts",
        "account" => "Service account",
        "directory" => "Directories",
        "file" => "Configuration files",
        "unit_file" => "Unit files",
        "service_unit" => "Supervisor units",
        other => other,
    }
}

fn state_description(diff: &ResourceDiff) -> String {
    match (&diff.current, &diff.desired) {
        (ResourceState::Absent, ResourceState::Present { details }) => format!(
            "(missing){}",
            details
                .as_ref()
                .map(|d| format!(" → {d}"))
                .unwrap_or_default()
        ),
        (ResourceState::Present { details: from }, ResourceState::Present { details: to }) => {
            format!(
                "{} → {}",
                from.as_deref().unwrap_or("current"),
                to.as_deref().unwrap_or("desired")
            )
        }
        (ResourceState::Modified { from, to }, _) => format!("{from} → {to}"),
        (ResourceState::Present { .. }, ResourceState::Absent) => "(will remove)".to_string(),
        (ResourceState::Unknown, _) => "(state unreadable)".to_string(),
        _ => String::new(),
    }
}

/// Print the drift between the host and the installed target
pub fn display_diff(diffs: &[ResourceDiff]) {
    if diffs.is_empty() {
        println!();
        println!("  {} Host matches the configured target", "✓".green());
        return;
    }

    println!();
    println!("┌─ {} ─────────────────────────────────────────┐", "Drift".bold());
    println!("│");

    for (resource_type, type_diffs) in group_by_type(diffs) {
        println!("│ {}", type_name(&resource_type).bold());
        for diff in type_diffs {
            let symbol = match (&diff.current, &diff.desired) {
                (ResourceState::Absent, ResourceState::Present { .. }) => "+".green(),
                (ResourceState::Present { .. }, ResourceState::Absent) => "-".red(),
                (ResourceState::Modified { .. }, _) | (_, ResourceState::Modified { .. }) => {
                    "~".yellow()
                }
                _ => "?".dimmed(),
            };
            println!(
                "│   {} {:<40} {}",
                symbol,
                diff.resource_id,
                state_description(diff).dimmed()
            );
        }
        println!("│");
    }

    let summary = DiffSummary::from_diffs(diffs);
    println!("├─────────────────────────────────────────────────────┤");
    println!(
        "│ Summary: {} changes ({} missing, {} drifted)",
        summary.total().to_string().bold(),
        summary.additions.to_string().green(),
        summary.modifications.to_string().yellow()
    );
    println!("└─────────────────────────────────────────────────────┘");
}

// ============================================================================
// Content diffs
// ============================================================================

/// Changed lines between what is on disk and what would be written
///
/// Each line is prefixed with `- ` or `+ ` and keeps its newline.
/// Empty when the contents match.
pub fn content_changes(current: Option<&str>, desired: &str) -> Vec<String> {
    let current = current.unwrap_or_default();
    TextDiff::from_lines(current, desired)
        .iter_all_changes()
        .filter_map(|change| match change.tag() {
            ChangeTag::Delete => Some(format!("- {change}")),
            ChangeTag::Insert => Some(format!("+ {change}")),
            ChangeTag::Equal => None,
        })
        .collect()
}

/// Print a line diff for one managed file
pub fn print_content_diff(path: &str, current: Option<&str>, desired: &str) {
    let changes = content_changes(current, desired);
    if changes.is_empty() {
        return;
    }

    println!();
    let label = if current.is_none() { " (new file)" } else { "" };
    println!("  {}{}", path.bold(), label.dimmed());
    for line in changes {
        let line = if line.ends_with('\n') {
            line
        } else {
            format!("{line}\n")
        };
        if line.starts_with('-') {
            print!("    {}", line.red());
        } else {
            print!("    {}", line.green());
        }
    }
}
