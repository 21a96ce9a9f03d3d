//! The `sheetgrade grade` command.

use std::path::PathBuf;

use anyhow::{Context, Result};
use comfy_table::{Cell, Table};

use sheetgrade_adapters::config::load_config_from;
use sheetgrade_core::engine::{Evaluation, EvaluationEngine};
use sheetgrade_core::model::QuestionStatus;
use sheetgrade_core::parser;
use sheetgrade_core::traits::SubmissionRecord;
use sheetgrade_report::html::{diagnostic_lines, generate_submission_html};

pub fn execute(
    key_path: PathBuf,
    responses_path: PathBuf,
    student: Option<String>,
    format: String,
    output: Option<PathBuf>,
    config_path: Option<PathBuf>,
) -> Result<()> {
    let config = load_config_from(config_path.as_deref())?;
    let engine = EvaluationEngine::new(config.evaluation_config()?);

    let paper = parser::parse_paper(&key_path)?;
    let sheet = parser::load_response_sheet(&responses_path)?;
    let student_id = student
        .or(sheet.student_id)
        .unwrap_or_else(|| "anonymous".to_string());

    let evaluation = engine
        .evaluate(&paper.questions, &sheet.responses)
        .with_context(|| format!("failed to grade '{student_id}' on paper '{}'", paper.id))?;

    let rendered = match format.as_str() {
        "json" => {
            let record = SubmissionRecord::new(&paper.id, &student_id, evaluation)?;
            serde_json::to_string_pretty(&record)?
        }
        "html" => generate_submission_html(
            &paper.id,
            &student_id,
            &evaluation.result,
            &evaluation.diagnostics,
        ),
        "text" => render_text(&paper.name, &student_id, &evaluation),
        other => anyhow::bail!("unknown format: {other} (expected text, json, or html)"),
    };

    match output {
        Some(path) => {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            std::fs::write(&path, &rendered)
                .with_context(|| format!("failed to write {}", path.display()))?;
            eprintln!("Written to: {}", path.display());
        }
        None => println!("{rendered}"),
    }

    Ok(())
}

fn render_text(paper_name: &str, student_id: &str, evaluation: &Evaluation) -> String {
    let result = &evaluation.result;

    let mut table = Table::new();
    table.set_header(vec!["#", "Format", "Score", "Status", "Explanation"]);
    for q in &result.questions {
        let status = match q.status {
            QuestionStatus::Answered => "answered",
            QuestionStatus::Unanswered => "unanswered",
            QuestionStatus::InvalidKey => "invalid key",
        };
        table.add_row(vec![
            Cell::new(q.question_number),
            Cell::new(q.format.map(|f| f.to_string()).unwrap_or_else(|| "-".into())),
            Cell::new(format!("{:.2} / {:.2}", q.earned_score, q.max_score)),
            Cell::new(status),
            Cell::new(&q.explanation),
        ]);
    }

    let mut out = format!("{paper_name}: {student_id}\n{table}\n");
    out.push_str(&format!(
        "Total: {:.2} / {:.2} ({:.1}%)  Grade: {}\n",
        result.total_score, result.max_score, result.percentage, result.grade
    ));
    for line in diagnostic_lines(&evaluation.diagnostics) {
        out.push_str(&format!("  NOTE: {line}\n"));
    }
    out
}
