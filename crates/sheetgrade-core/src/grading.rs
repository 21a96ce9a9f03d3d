//! Aggregation of question results into a graded submission.

use serde::{Deserialize, Serialize};

use crate::error::EvaluationError;
use crate::model::{QuestionResult, SubmissionResult};

/// Slack for float noise when a percentage sits exactly on a threshold.
const THRESHOLD_EPSILON: f64 = 1e-9;

/// A grade label and the lowest percentage that earns it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GradeThreshold {
    pub min_percentage: f64,
    pub label: String,
}

impl GradeThreshold {
    pub fn new(min_percentage: f64, label: impl Into<String>) -> Self {
        Self {
            min_percentage,
            label: label.into(),
        }
    }
}

/// Ordered percentage → letter table.
///
/// Always contains a 0 threshold, so every percentage has a label.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "Vec<GradeThreshold>", into = "Vec<GradeThreshold>")]
pub struct GradeTable {
    /// Sorted by `min_percentage`, highest first.
    thresholds: Vec<GradeThreshold>,
}

impl GradeTable {
    pub fn new(mut thresholds: Vec<GradeThreshold>) -> Result<Self, EvaluationError> {
        if thresholds.is_empty() {
            return Err(EvaluationError::InvalidGradeTable(
                "at least one threshold is required".into(),
            ));
        }
        for t in &thresholds {
            if !t.min_percentage.is_finite() || !(0.0..=100.0).contains(&t.min_percentage) {
                return Err(EvaluationError::InvalidGradeTable(format!(
                    "threshold {} for {} is outside 0..=100",
                    t.min_percentage, t.label
                )));
            }
            if t.label.trim().is_empty() {
                return Err(EvaluationError::InvalidGradeTable(format!(
                    "threshold {} has an empty label",
                    t.min_percentage
                )));
            }
        }
        thresholds.sort_by(|a, b| b.min_percentage.total_cmp(&a.min_percentage));
        if let Some(pair) = thresholds
            .windows(2)
            .find(|w| w[0].min_percentage == w[1].min_percentage)
        {
            return Err(EvaluationError::InvalidGradeTable(format!(
                "threshold {} appears twice",
                pair[0].min_percentage
            )));
        }
        if thresholds.last().map(|t| t.min_percentage) != Some(0.0) {
            return Err(EvaluationError::InvalidGradeTable(
                "a threshold at 0 is required so every percentage has a grade".into(),
            ));
        }
        Ok(Self { thresholds })
    }

    /// Thresholds, highest first.
    pub fn thresholds(&self) -> &[GradeThreshold] {
        &self.thresholds
    }

    /// Label of the highest threshold that is <= `percentage`.
    pub fn grade_for(&self, percentage: f64) -> &str {
        self.thresholds
            .iter()
            .find(|t| percentage + THRESHOLD_EPSILON >= t.min_percentage)
            .or(self.thresholds.last())
            .map(|t| t.label.as_str())
            .unwrap_or_default()
    }
}

impl Default for GradeTable {
    fn default() -> Self {
        Self {
            thresholds: vec![
                GradeThreshold::new(90.0, "A+"),
                GradeThreshold::new(80.0, "A"),
                GradeThreshold::new(70.0, "B+"),
                GradeThreshold::new(60.0, "B"),
                GradeThreshold::new(50.0, "C"),
                GradeThreshold::new(0.0, "F"),
            ],
        }
    }
}

impl TryFrom<Vec<GradeThreshold>> for GradeTable {
    type Error = EvaluationError;

    fn try_from(thresholds: Vec<GradeThreshold>) -> Result<Self, Self::Error> {
        GradeTable::new(thresholds)
    }
}

impl From<GradeTable> for Vec<GradeThreshold> {
    fn from(table: GradeTable) -> Self {
        table.thresholds
    }
}

/// `100 * total / max`, or 0 for a paper with nothing to earn.
pub fn percentage(total_score: f64, max_score: f64) -> f64 {
    if max_score > 0.0 {
        100.0 * total_score / max_score
    } else {
        0.0
    }
}

/// Build the submission result from a complete set of question results.
pub fn aggregate(questions: Vec<QuestionResult>, table: &GradeTable) -> SubmissionResult {
    let total_score: f64 = questions.iter().map(|q| q.earned_score).sum();
    let max_score: f64 = questions.iter().map(|q| q.max_score).sum();
    let percentage = percentage(total_score, max_score);
    let grade = table.grade_for(percentage).to_string();

    SubmissionResult {
        questions,
        total_score,
        max_score,
        percentage,
        grade,
    }
}
