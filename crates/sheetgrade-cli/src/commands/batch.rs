//! The `sheetgrade batch` command.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use comfy_table::{Cell, Table};

use sheetgrade_adapters::config::load_config_from;
use sheetgrade_adapters::{DirectoryStore, MemoryRepository};
use sheetgrade_core::engine::EvaluationEngine;
use sheetgrade_core::parser;
use sheetgrade_core::pipeline::{BatchGrader, ProgressReporter, Sheet};
use sheetgrade_core::report::{BatchReport, SheetFailure, SheetOutcome};
use sheetgrade_core::traits::SaveOutcome;
use sheetgrade_report::html::{generate_batch_html, write_html};

/// Console progress reporter.
struct ConsoleReporter;

impl ProgressReporter for ConsoleReporter {
    fn on_sheet_start(&self, student_id: &str) {
        eprintln!("  Grading: {student_id}");
    }

    fn on_sheet_complete(&self, outcome: &SheetOutcome) {
        let r = &outcome.result;
        eprintln!(
            "  Done: {} {:.2}/{:.2} ({:.1}%) {}",
            outcome.student_id, r.total_score, r.max_score, r.percentage, r.grade
        );
    }

    fn on_sheet_error(&self, failure: &SheetFailure) {
        eprintln!("  ERROR: {}: {}", failure.student_id, failure.error);
    }

    fn on_batch_complete(&self, total: usize, graded: usize, failed: usize, elapsed: Duration) {
        eprintln!(
            "\nComplete: {graded}/{total} graded, {failed} failed ({:.1}s)",
            elapsed.as_secs_f64()
        );
    }
}

pub async fn execute(
    key_path: PathBuf,
    submissions: PathBuf,
    store: Option<PathBuf>,
    parallelism: Option<usize>,
    output: Option<PathBuf>,
    html: Option<PathBuf>,
    config_path: Option<PathBuf>,
) -> Result<()> {
    if let Some(p) = parallelism {
        anyhow::ensure!(p >= 1, "parallelism must be at least 1");
    }

    let config = load_config_from(config_path.as_deref())?;
    let paper = parser::parse_paper(&key_path)?;
    let sheets = load_sheets(&submissions)?;
    anyhow::ensure!(
        !sheets.is_empty(),
        "no response sheets (*.json) found in {}",
        submissions.display()
    );

    let store_dir = store.unwrap_or_else(|| config.store.dir.clone());
    let mut batch_config = config.batch_config();
    if let Some(p) = parallelism {
        batch_config.parallelism = p;
    }

    eprintln!(
        "sheetgrade v{}: grading {} sheets for paper '{}'",
        env!("CARGO_PKG_VERSION"),
        sheets.len(),
        paper.id
    );
    eprintln!();

    let repository = MemoryRepository::new().with_paper(paper.id.clone(), paper.questions);
    let grader = BatchGrader::new(
        Arc::new(repository),
        Arc::new(DirectoryStore::new(&store_dir)),
        EvaluationEngine::new(config.evaluation_config()?),
        batch_config,
    );
    let report = grader.grade(&paper.id, sheets, &ConsoleReporter).await?;

    print_summary(&report);

    if let Some(path) = output {
        report.save_json(&path)?;
        eprintln!("Report saved to: {}", path.display());
    }
    if let Some(path) = html {
        write_html(&generate_batch_html(&report), &path)?;
        eprintln!("HTML report: {}", path.display());
    }
    eprintln!("Results stored in: {}", store_dir.join(&report.paper.id).display());

    Ok(())
}

/// Load every `*.json` response sheet in a directory, ordered by file name.
fn load_sheets(dir: &Path) -> Result<Vec<Sheet>> {
    let mut paths: Vec<PathBuf> = std::fs::read_dir(dir)
        .with_context(|| format!("failed to read directory: {}", dir.display()))?
        .map(|entry| entry.map(|e| e.path()))
        .collect::<std::io::Result<_>>()?;
    paths.retain(|p| p.is_file() && p.extension().is_some_and(|ext| ext == "json"));
    paths.sort();

    paths
        .iter()
        .map(|path| {
            let sheet = parser::load_response_sheet(path)?;
            let student_id = sheet
                .student_id
                .with_context(|| format!("no student id for {}", path.display()))?;
            Ok(Sheet::detected(student_id, sheet.responses))
        })
        .collect()
}

fn print_summary(report: &BatchReport) {
    let mut table = Table::new();
    table.set_header(vec!["Student", "Score", "Percent", "Grade", "Stored", "Notes"]);

    for sheet in &report.sheets {
        let r = &sheet.result;
        let stored = match sheet.save_outcome {
            SaveOutcome::Inserted => "new",
            SaveOutcome::Replaced { .. } => "replaced",
            SaveOutcome::Unchanged => "unchanged",
        };
        let d = &sheet.diagnostics;
        let notes = if d.is_clean() {
            String::new()
        } else {
            format!(
                "{} low-confidence, {} orphan, {} mismatched",
                d.low_confidence_questions.len(),
                d.orphan_responses.len(),
                d.format_mismatches.len()
            )
        };
        table.add_row(vec![
            Cell::new(&sheet.student_id),
            Cell::new(format!("{:.2} / {:.2}", r.total_score, r.max_score)),
            Cell::new(format!("{:.1}%", r.percentage)),
            Cell::new(&r.grade),
            Cell::new(stored),
            Cell::new(notes),
        ]);
    }
    for failure in &report.failures {
        table.add_row(vec![
            Cell::new(&failure.student_id),
            Cell::new("-"),
            Cell::new("-"),
            Cell::new("-"),
            Cell::new("failed"),
            Cell::new(&failure.error),
        ]);
    }

    println!("{table}");

    let stats = &report.statistics;
    if stats.submissions > 0 {
        println!(
            "Mean {:.1}%  Min {:.1}%  Max {:.1}%  Std dev {:.1}",
            stats.mean_percentage,
            stats.min_percentage,
            stats.max_percentage,
            stats.std_dev_percentage
        );
        let grades: Vec<String> = stats
            .grade_distribution
            .iter()
            .map(|(grade, count)| format!("{grade}: {count}"))
            .collect();
        println!("Grades: {}", grades.join(", "));
    }
}
