use std::path::Path;

use mailprint_db::{MigrationStatus, RunReport};

/// Print the outcome of a `migrate` run.
pub fn print_run(report: &RunReport) {
    if report.applied.is_empty() {
        println!(
            "Nothing to apply ({} already applied).",
            report.skipped
        );
        return;
    }
    println!("Applied {} migration(s):", report.applied_count());
    for id in &report.applied {
        println!("  + {id}");
    }
    if report.skipped > 0 {
        println!("{} already applied.", report.skipped);
    }
}

/// Print a table of applied and pending migrations.
pub fn print_status(status: &MigrationStatus, dir: &Path) {
    println!("Migrations in {}", dir.display());
    if status.entries.is_empty() {
        println!("  (none)");
    }

    let width = status
        .entries
        .iter()
        .map(|e| e.id.as_str().len())
        .max()
        .unwrap_or(0);

    for entry in &status.entries {
        let state = match entry.applied_at {
            Some(at) => format!("applied {}", at.format("%Y-%m-%d %H:%M:%S")),
            None => "pending".to_string(),
        };
        println!("  {:<width$}  {state}", entry.id.as_str());
    }

    if !status.orphaned.is_empty() {
        println!();
        println!("Applied but missing from the directory:");
        for record in &status.orphaned {
            println!("  {}", record.identifier);
        }
    }

    let pending = status.pending().count();
    println!();
    println!(
        "{} applied, {pending} pending",
        status.entries.len() - pending
    );
}
