//! HTML report generator.
//!
//! Produces self-contained HTML files with all CSS/JS inlined.

use std::path::Path;

use anyhow::{Context, Result};
use serde::Serialize;

use sheetgrade_core::model::{Diagnostics, QuestionStatus, SubmissionResult};
use sheetgrade_core::report::BatchReport;
use sheetgrade_core::statistics::QuestionStats;

/// Escape a string for safe HTML insertion.
fn html_escape(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&#x27;")
}

fn page_start(html: &mut String, title: &str) {
    html.push_str("<!DOCTYPE html>\n<html lang=\"en\">\n<head>\n");
    html.push_str("<meta charset=\"utf-8\">\n");
    html.push_str("<meta name=\"viewport\" content=\"width=device-width, initial-scale=1\">\n");
    html.push_str(&format!("<title>{}</title>\n", html_escape(title)));
    html.push_str("<style>\n");
    html.push_str(CSS);
    html.push_str("</style>\n");
    html.push_str("</head>\n<body>\n");
}

fn page_end(html: &mut String) {
    html.push_str("<script>\n");
    html.push_str(JS);
    html.push_str("</script>\n");
    html.push_str("</body>\n</html>");
}

fn raw_json<T: Serialize>(html: &mut String, value: &T) {
    html.push_str("<section class=\"raw-data\">\n");
    html.push_str("<details>\n<summary>Raw JSON Data</summary>\n");
    html.push_str("<pre><code>");
    html.push_str(&html_escape(
        &serde_json::to_string_pretty(value).unwrap_or_default(),
    ));
    html.push_str("</code></pre>\n");
    html.push_str("</details>\n</section>\n");
}

fn score_class(fraction: f64) -> &'static str {
    if fraction >= 0.999_999 {
        "pass"
    } else if fraction > 0.0 {
        "partial"
    } else {
        "fail"
    }
}

/// Render one graded submission.
pub fn generate_submission_html(
    paper_id: &str,
    student_id: &str,
    result: &SubmissionResult,
    diagnostics: &Diagnostics,
) -> String {
    let mut html = String::new();
    page_start(&mut html, &format!("sheetgrade: {paper_id} / {student_id}"));

    html.push_str("<header>\n");
    html.push_str("<h1>sheetgrade result</h1>\n");
    html.push_str(&format!(
        "<p class=\"meta\">Paper: <strong>{}</strong> | Student: <strong>{}</strong></p>\n",
        html_escape(paper_id),
        html_escape(student_id)
    ));
    html.push_str(&format!(
        "<p class=\"score\">{:.2} / {:.2} ({:.1}%) &middot; grade <strong>{}</strong></p>\n",
        result.total_score,
        result.max_score,
        result.percentage,
        html_escape(&result.grade)
    ));
    html.push_str("</header>\n");

    html.push_str("<section class=\"results\">\n<h2>Questions</h2>\n");
    html.push_str("<table class=\"results-table\" id=\"results\">\n");
    html.push_str("<thead><tr><th onclick=\"sortTable(0)\">#</th><th onclick=\"sortTable(1)\">Format</th><th onclick=\"sortTable(2)\">Score</th><th onclick=\"sortTable(3)\">Status</th><th>Explanation</th></tr></thead>\n");
    html.push_str("<tbody>\n");
    for q in &result.questions {
        let class = match q.status {
            QuestionStatus::InvalidKey => "invalid",
            _ if q.max_score > 0.0 => score_class(q.earned_score / q.max_score),
            _ => "fail",
        };
        let status = match q.status {
            QuestionStatus::Answered => "answered",
            QuestionStatus::Unanswered => "unanswered",
            QuestionStatus::InvalidKey => "invalid key",
        };
        html.push_str(&format!(
            "<tr class=\"{}\"><td>{}</td><td>{}</td><td>{:.2} / {:.2}</td><td>{}</td><td>{}</td></tr>\n",
            class,
            q.question_number,
            q.format.map(|f| f.to_string()).unwrap_or_else(|| "-".into()),
            q.earned_score,
            q.max_score,
            status,
            html_escape(&q.explanation)
        ));
    }
    html.push_str("</tbody></table>\n</section>\n");

    if !diagnostics.is_clean() || !diagnostics.unanswered_questions.is_empty() {
        html.push_str("<section class=\"diagnostics\">\n<h2>Needs attention</h2>\n<ul>\n");
        for item in diagnostic_lines(diagnostics) {
            html.push_str(&format!("<li>{}</li>\n", html_escape(&item)));
        }
        html.push_str("</ul>\n</section>\n");
    }

    raw_json(&mut html, result);
    page_end(&mut html);
    html
}

fn join_numbers(numbers: impl IntoIterator<Item = u32>) -> String {
    numbers
        .into_iter()
        .map(|n| n.to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

/// Human-readable lines for each non-empty diagnostic category.
pub fn diagnostic_lines(diagnostics: &Diagnostics) -> Vec<String> {
    let mut lines = Vec::new();
    if !diagnostics.unanswered_questions.is_empty() {
        lines.push(format!(
            "Unanswered: {}",
            join_numbers(diagnostics.unanswered_questions.iter().copied())
        ));
    }
    if !diagnostics.low_confidence_questions.is_empty() {
        lines.push(format!(
            "Low-confidence reading, review manually: {}",
            join_numbers(diagnostics.low_confidence_questions.iter().copied())
        ));
    }
    if !diagnostics.format_mismatches.is_empty() {
        lines.push(format!(
            "Response shape did not fit the question: {}",
            join_numbers(diagnostics.format_mismatches.iter().map(|m| m.question_number))
        ));
    }
    if !diagnostics.duplicate_responses.is_empty() {
        lines.push(format!(
            "Duplicate readings ignored: {}",
            join_numbers(diagnostics.duplicate_responses.iter().map(|r| r.question_number))
        ));
    }
    if !diagnostics.orphan_responses.is_empty() {
        lines.push(format!(
            "Responses for questions not on the paper: {}",
            join_numbers(diagnostics.orphan_responses.iter().map(|r| r.question_number))
        ));
    }
    for note in &diagnostics.invalid_keys {
        lines.push(format!(
            "Question {} has an invalid key: {}",
            note.question_number, note.reason
        ));
    }
    lines
}

/// Render a batch report with cohort statistics and item analysis.
pub fn generate_batch_html(report: &BatchReport) -> String {
    let stats = &report.statistics;
    let mut html = String::new();
    page_start(&mut html, &format!("sheetgrade batch: {}", report.paper.id));

    html.push_str("<header>\n");
    html.push_str("<h1>sheetgrade batch report</h1>\n");
    html.push_str(&format!(
        "<p class=\"meta\">Paper: <strong>{}</strong> | {} questions | {} graded | {} failed | {}</p>\n",
        html_escape(&report.paper.id),
        report.paper.question_count,
        report.sheets.len(),
        report.failures.len(),
        report.created_at.format("%Y-%m-%d %H:%M:%S UTC")
    ));
    html.push_str("</header>\n");

    html.push_str("<section class=\"dashboard\">\n<h2>Summary</h2>\n");
    html.push_str("<table class=\"summary\">\n");
    html.push_str("<thead><tr><th>Mean</th><th>Min</th><th>Max</th><th>Std dev</th></tr></thead>\n");
    html.push_str(&format!(
        "<tbody><tr><td>{:.1}%</td><td>{:.1}%</td><td>{:.1}%</td><td>{:.1}</td></tr></tbody></table>\n",
        stats.mean_percentage, stats.min_percentage, stats.max_percentage, stats.std_dev_percentage
    ));
    if !stats.grade_distribution.is_empty() {
        let total = stats.submissions.max(1) as f64;
        let bars: Vec<(String, f64, String)> = stats
            .grade_distribution
            .iter()
            .map(|(grade, count)| {
                (
                    grade.clone(),
                    *count as f64 / total,
                    format!("{count}"),
                )
            })
            .collect();
        html.push_str("<h3>Grade distribution</h3>\n");
        html.push_str(&generate_bar_chart(&bars));
    }
    html.push_str("</section>\n");

    if !stats.per_question.is_empty() {
        html.push_str("<section class=\"items\">\n<h2>Item analysis</h2>\n");
        html.push_str(&item_table(&stats.per_question));
        html.push_str("</section>\n");
    }

    html.push_str("<section class=\"results\">\n<h2>Students</h2>\n");
    html.push_str("<table class=\"results-table\" id=\"results\">\n");
    html.push_str("<thead><tr><th onclick=\"sortTable(0)\">Student</th><th onclick=\"sortTable(1)\">Score</th><th onclick=\"sortTable(2)\">Percent</th><th onclick=\"sortTable(3)\">Grade</th><th>Stored</th><th>Notes</th></tr></thead>\n");
    html.push_str("<tbody>\n");
    for sheet in &report.sheets {
        let r = &sheet.result;
        let fraction = if r.max_score > 0.0 {
            r.total_score / r.max_score
        } else {
            0.0
        };
        let stored = match sheet.save_outcome {
            sheetgrade_core::traits::SaveOutcome::Inserted => "new",
            sheetgrade_core::traits::SaveOutcome::Replaced { .. } => "replaced",
            sheetgrade_core::traits::SaveOutcome::Unchanged => "unchanged",
        };
        html.push_str(&format!(
            "<tr class=\"{}\"><td>{}</td><td>{:.2} / {:.2}</td><td>{:.1}%</td><td>{}</td><td>{}</td><td>{}</td></tr>\n",
            score_class(fraction),
            html_escape(&sheet.student_id),
            r.total_score,
            r.max_score,
            r.percentage,
            html_escape(&r.grade),
            stored,
            html_escape(&diagnostic_lines(&sheet.diagnostics).join("; "))
        ));
    }
    for failure in &report.failures {
        html.push_str(&format!(
            "<tr class=\"fail\"><td>{}</td><td>-</td><td>-</td><td>-</td><td>-</td><td>{:?}: {}</td></tr>\n",
            html_escape(&failure.student_id),
            failure.kind,
            html_escape(&failure.error)
        ));
    }
    html.push_str("</tbody></table>\n</section>\n");

    raw_json(&mut html, report);
    page_end(&mut html);
    html
}

fn item_table(items: &[QuestionStats]) -> String {
    let mut html = String::new();
    html.push_str("<table class=\"items-table\">\n");
    html.push_str("<thead><tr><th>#</th><th>Format</th><th>Mean</th><th>Facility</th><th>Fully correct</th><th>Unanswered</th></tr></thead>\n<tbody>\n");
    for q in items {
        html.push_str(&format!(
            "<tr class=\"{}\"><td>{}</td><td>{}</td><td>{:.2} / {:.2}</td><td>{:.0}%</td><td>{:.0}%</td><td>{:.0}%</td></tr>\n",
            facility_class(q.facility),
            q.question_number,
            q.format.map(|f| f.to_string()).unwrap_or_else(|| "-".into()),
            q.mean_score,
            q.max_score,
            q.facility * 100.0,
            q.fully_correct_rate * 100.0,
            q.unanswered_rate * 100.0
        ));
    }
    html.push_str("</tbody></table>\n");
    html
}

// Very easy and very hard items are worth a second look at the key.
fn facility_class(facility: f64) -> &'static str {
    if !(0.2..=0.9).contains(&facility) {
        "partial"
    } else {
        ""
    }
}

/// Write rendered HTML to a file, creating parent directories.
pub fn write_html(html: &str, path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, html)
        .with_context(|| format!("failed to write HTML report to {}", path.display()))?;
    Ok(())
}

/// Horizontal SVG bars; `value` is a 0..=1 fraction.
fn generate_bar_chart(bars: &[(String, f64, String)]) -> String {
    let bar_height = 24;
    let max_width = 400;
    let padding = 8;
    let label_width = 80;

    let total_height = bars.len() * (bar_height + padding) + padding;

    let mut svg = format!(
        "<svg width=\"{}\" height=\"{}\" xmlns=\"http://www.w3.org/2000/svg\">\n",
        label_width + max_width + 60,
        total_height
    );

    for (i, (label, value, caption)) in bars.iter().enumerate() {
        let y = i * (bar_height + padding) + padding;
        let width = (value.clamp(0.0, 1.0) * max_width as f64) as usize;

        svg.push_str(&format!(
            "  <text x=\"{}\" y=\"{}\" font-size=\"14\" fill=\"currentColor\" text-anchor=\"end\" dominant-baseline=\"middle\">{}</text>\n",
            label_width - 10,
            y + bar_height / 2,
            html_escape(label)
        ));
        svg.push_str(&format!(
            "  <rect x=\"{}\" y=\"{}\" width=\"{}\" height=\"{}\" fill=\"#3b82f6\" rx=\"4\"/>\n",
            label_width, y, width, bar_height
        ));
        svg.push_str(&format!(
            "  <text x=\"{}\" y=\"{}\" font-size=\"12\" fill=\"currentColor\" dominant-baseline=\"middle\">{}</text>\n",
            label_width + width + 8,
            y + bar_height / 2,
            html_escape(caption)
        ));
    }

    svg.push_str("</svg>\n");
    svg
}

const CSS: &str = r#"
:root { --bg: #fff; --fg: #1a1a1a; --border: #e5e7eb; --pass: #dcfce7; --partial: #fef9c3; --fail: #fde2e2; }
@media (prefers-color-scheme: dark) {
  :root { --bg: #111827; --fg: #f9fafb; --border: #374151; --pass: #064e3b; --partial: #713f12; --fail: #7f1d1d; }
}
body { font-family: -apple-system, BlinkMacSystemFont, 'Segoe UI', sans-serif; margin: 0; padding: 2rem; background: var(--bg); color: var(--fg); }
h1, h2 { margin-top: 2rem; }
.meta { color: #6b7280; }
.score { font-size: 1.25rem; }
table { border-collapse: collapse; width: 100%; margin: 1rem 0; }
th, td { border: 1px solid var(--border); padding: 0.5rem 1rem; text-align: left; }
th { background: var(--border); cursor: pointer; }
.pass { background: var(--pass); }
.partial { background: var(--partial); }
.fail, .invalid { background: var(--fail); }
.invalid td:last-child { font-style: italic; }
pre { overflow-x: auto; padding: 1rem; background: var(--border); border-radius: 8px; }
code { font-family: 'JetBrains Mono', 'Fira Code', monospace; font-size: 0.85rem; }
details { margin: 1rem 0; }
summary { cursor: pointer; font-weight: bold; }
svg { margin: 1rem 0; }
"#;

const JS: &str = r#"
function sortTable(col) {
  const table = document.getElementById('results');
  const tbody = table.querySelector('tbody');
  const rows = Array.from(tbody.querySelectorAll('tr'));
  const asc = table.dataset.sortCol == col && table.dataset.sortDir == 'asc' ? false : true;
  rows.sort((a, b) => {
    const va = a.cells[col].textContent;
    const vb = b.cells[col].textContent;
    const na = parseFloat(va), nb = parseFloat(vb);
    const cmp = !isNaN(na) && !isNaN(nb) ? na - nb : va.localeCompare(vb);
    return asc ? cmp : -cmp;
  });
  table.dataset.sortCol = col;
  table.dataset.sortDir = asc ? 'asc' : 'desc';
  rows.forEach(r => tbody.appendChild(r));
}
"#;
