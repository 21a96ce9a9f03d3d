//! The `sheetgrade compare` command.

use std::path::PathBuf;

use anyhow::Result;

use sheetgrade_core::report::BatchReport;

pub fn execute(
    baseline_path: PathBuf,
    current_path: PathBuf,
    threshold: f64,
    fail_on_regression: bool,
    format: String,
) -> Result<()> {
    anyhow::ensure!(
        threshold.is_finite() && threshold >= 0.0,
        "threshold must be a non-negative number of percentage points"
    );

    let baseline = BatchReport::load_json(&baseline_path)?;
    let current = BatchReport::load_json(&current_path)?;
    let report = current.compare(&baseline, threshold)?;

    match format.as_str() {
        "markdown" | "md" => {
            println!("{}", report.to_markdown());
        }
        "json" => {
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        _ => {
            println!(
                "Comparison: {} dropped, {} raised, {} unchanged",
                report.dropped.len(),
                report.raised.len(),
                report.unchanged
            );

            for (title, changes) in [("Dropped", &report.dropped), ("Raised", &report.raised)] {
                if changes.is_empty() {
                    continue;
                }
                println!("\n{title}:");
                for c in changes {
                    println!(
                        "  {} {:.1}% -> {:.1}% ({:+.1}) {} -> {}",
                        c.student_id,
                        c.baseline_percentage,
                        c.current_percentage,
                        c.delta,
                        c.baseline_grade,
                        c.current_grade
                    );
                }
            }

            if report.new_students > 0 {
                println!("\n{} new student(s)", report.new_students);
            }
            if report.removed_students > 0 {
                println!("{} removed student(s)", report.removed_students);
            }
        }
    }

    if fail_on_regression && report.has_regressions() {
        std::process::exit(1);
    }

    Ok(())
}
