//! Batch report types with JSON persistence and re-grade comparison.

use std::collections::BTreeMap;
use std::path::Path;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::model::{Diagnostics, SubmissionResult};
use crate::statistics::CohortStatistics;
use crate::traits::SaveOutcome;

/// A complete batch grading report.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchReport {
    /// Unique report identifier.
    pub id: Uuid,
    /// When the report was created.
    pub created_at: DateTime<Utc>,
    pub paper: PaperSummary,
    /// Graded sheets, ordered by student id.
    pub sheets: Vec<SheetOutcome>,
    /// Sheets that produced no result.
    #[serde(default)]
    pub failures: Vec<SheetFailure>,
    pub statistics: CohortStatistics,
    /// Total wall-clock duration in milliseconds.
    pub duration_ms: u64,
}

/// Summary of the graded paper (without the answer keys).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaperSummary {
    pub id: String,
    pub question_count: usize,
    pub max_score: f64,
}

/// One successfully graded sheet.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SheetOutcome {
    pub student_id: String,
    pub evaluation_token: Uuid,
    pub save_outcome: SaveOutcome,
    pub result: SubmissionResult,
    pub diagnostics: Diagnostics,
}

/// Why a sheet produced no result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// The same student appeared twice in one batch.
    DuplicateSheet,
    Detection,
    Evaluation,
    Storage,
}

/// A sheet that failed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SheetFailure {
    pub student_id: String,
    pub kind: FailureKind,
    pub error: String,
}

impl BatchReport {
    /// Save the report as JSON to a file.
    pub fn save_json(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(self).context("failed to serialize report")?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, json)
            .with_context(|| format!("failed to write report to {}", path.display()))?;
        Ok(())
    }

    /// Load a report from a JSON file.
    pub fn load_json(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read report from {}", path.display()))?;
        let report: BatchReport =
            serde_json::from_str(&content).context("failed to parse report JSON")?;
        Ok(report)
    }

    /// Look up a student's result.
    pub fn sheet(&self, student_id: &str) -> Option<&SheetOutcome> {
        self.sheets.iter().find(|s| s.student_id == student_id)
    }

    /// Compare this report against an earlier grading of the same paper.
    ///
    /// `threshold` is in percentage points. Reports for different papers
    /// cannot be compared.
    pub fn compare(&self, baseline: &BatchReport, threshold: f64) -> Result<RegradeReport> {
        anyhow::ensure!(
            baseline.paper.id == self.paper.id,
            "cannot compare reports for different papers ('{}' vs '{}')",
            baseline.paper.id,
            self.paper.id
        );

        let percentages = |report: &BatchReport| -> BTreeMap<String, (f64, String)> {
            report
                .sheets
                .iter()
                .map(|s| {
                    (
                        s.student_id.clone(),
                        (s.result.percentage, s.result.grade.clone()),
                    )
                })
                .collect()
        };

        let baseline_scores = percentages(baseline);
        let current_scores = percentages(self);

        let mut dropped = Vec::new();
        let mut raised = Vec::new();
        let mut unchanged = 0usize;
        let mut new_students = 0usize;

        for (student_id, (current, current_grade)) in &current_scores {
            let Some((before, baseline_grade)) = baseline_scores.get(student_id) else {
                new_students += 1;
                continue;
            };
            let delta = current - before;
            let change = ScoreChange {
                student_id: student_id.clone(),
                baseline_percentage: *before,
                current_percentage: *current,
                baseline_grade: baseline_grade.clone(),
                current_grade: current_grade.clone(),
                delta,
            };
            if delta < -threshold {
                dropped.push(change);
            } else if delta > threshold {
                raised.push(change);
            } else {
                unchanged += 1;
            }
        }

        let removed_students = baseline_scores
            .keys()
            .filter(|k| !current_scores.contains_key(*k))
            .count();

        Ok(RegradeReport {
            dropped,
            raised,
            unchanged,
            new_students,
            removed_students,
        })
    }
}

/// Result of comparing two gradings of the same paper.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegradeReport {
    /// Students whose percentage went down.
    pub dropped: Vec<ScoreChange>,
    /// Students whose percentage went up.
    pub raised: Vec<ScoreChange>,
    /// Students with no significant change.
    pub unchanged: usize,
    /// Students in current but not baseline.
    pub new_students: usize,
    /// Students in baseline but not current.
    pub removed_students: usize,
}

/// A student's score movement between two gradings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoreChange {
    pub student_id: String,
    pub baseline_percentage: f64,
    pub current_percentage: f64,
    pub baseline_grade: String,
    pub current_grade: String,
    pub delta: f64,
}

impl RegradeReport {
    /// Format the comparison as markdown.
    pub fn to_markdown(&self) -> String {
        let mut md = String::new();

        md.push_str(&format!(
            "**Summary:** {} dropped, {} raised, {} unchanged\n\n",
            self.dropped.len(),
            self.raised.len(),
            self.unchanged
        ));

        for (title, changes) in [("Dropped", &self.dropped), ("Raised", &self.raised)] {
            if changes.is_empty() {
                continue;
            }
            md.push_str(&format!("### {title}\n\n"));
            md.push_str("| Student | Baseline | Current | Delta | Grade |\n");
            md.push_str("|---------|----------|---------|-------|-------|\n");
            for c in changes {
                md.push_str(&format!(
                    "| {} | {:.1}% | {:.1}% | {:+.1} | {} -> {} |\n",
                    c.student_id,
                    c.baseline_percentage,
                    c.current_percentage,
                    c.delta,
                    c.baseline_grade,
                    c.current_grade
                ));
            }
            md.push('\n');
        }

        md
    }

    /// Returns true if any student's score dropped.
    pub fn has_regressions(&self) -> bool {
        !self.dropped.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::statistics::compute_cohort_statistics;

    fn sheet(student_id: &str, percentage: f64, grade: &str) -> SheetOutcome {
        SheetOutcome {
            student_id: student_id.into(),
            evaluation_token: Uuid::nil(),
            save_outcome: SaveOutcome::Inserted,
            result: SubmissionResult {
                questions: vec![],
                total_score: percentage / 10.0,
                max_score: 10.0,
                percentage,
                grade: grade.into(),
            },
            diagnostics: Diagnostics::default(),
        }
    }

    fn make_report(sheets: Vec<SheetOutcome>) -> BatchReport {
        let statistics = compute_cohort_statistics(sheets.iter().map(|s| &s.result));
        BatchReport {
            id: Uuid::nil(),
            created_at: Utc::now(),
            paper: PaperSummary {
                id: "midterm".into(),
                question_count: 5,
                max_score: 10.0,
            },
            sheets,
            failures: vec![],
            statistics,
            duration_ms: 0,
        }
    }

    #[test]
    fn compare_identical_reports() {
        let baseline = make_report(vec![sheet("ana", 80.0, "A")]);
        let current = make_report(vec![sheet("ana", 80.0, "A")]);

        let report = current.compare(&baseline, 0.5).unwrap();
        assert!(report.dropped.is_empty());
        assert!(report.raised.is_empty());
        assert_eq!(report.unchanged, 1);
    }

    #[test]
    fn compare_with_drop_and_raise() {
        let baseline = make_report(vec![sheet("ana", 80.0, "A"), sheet("ben", 40.0, "F")]);
        let current = make_report(vec![sheet("ana", 70.0, "B+"), sheet("ben", 55.0, "C")]);

        let report = current.compare(&baseline, 0.5).unwrap();
        assert_eq!(report.dropped.len(), 1);
        assert_eq!(report.dropped[0].student_id, "ana");
        assert_eq!(report.raised.len(), 1);
        assert!(report.has_regressions());
    }

    #[test]
    fn compare_with_new_and_removed() {
        let baseline = make_report(vec![sheet("old", 50.0, "C")]);
        let current = make_report(vec![sheet("new", 50.0, "C")]);

        let report = current.compare(&baseline, 0.5).unwrap();
        assert_eq!(report.new_students, 1);
        assert_eq!(report.removed_students, 1);
    }

    #[test]
    fn compare_rejects_different_papers() {
        let baseline = make_report(vec![sheet("ana", 80.0, "A")]);
        let mut current = make_report(vec![sheet("ana", 80.0, "A")]);
        current.paper.id = "final".into();

        let err = current.compare(&baseline, 0.5).unwrap_err();
        assert!(err.to_string().contains("different papers"));
    }

    #[test]
    fn json_roundtrip() {
        let report = make_report(vec![sheet("ana", 80.0, "A")]);
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("report.json");

        report.save_json(&path).unwrap();
        let loaded = BatchReport::load_json(&path).unwrap();

        assert_eq!(loaded.paper.id, "midterm");
        assert_eq!(loaded.sheets.len(), 1);
        assert_eq!(loaded.sheet("ana").unwrap().result.grade, "A");
    }

    #[test]
    fn markdown_output() {
        let baseline = make_report(vec![sheet("ana", 80.0, "A")]);
        let current = make_report(vec![sheet("ana", 60.0, "B")]);

        let md = current.compare(&baseline, 0.5).unwrap().to_markdown();
        assert!(md.contains("Dropped"));
        assert!(md.contains("ana"));
        assert!(md.contains("A -> B"));
    }
}
