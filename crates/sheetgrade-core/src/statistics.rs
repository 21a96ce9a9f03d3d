//! Cohort statistics and per-question item analysis.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::model::{QuestionFormat, QuestionNumber, QuestionStatus, SubmissionResult};

/// How one question performed across a cohort.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuestionStats {
    pub question_number: QuestionNumber,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub format: Option<QuestionFormat>,
    pub max_score: f64,
    pub mean_score: f64,
    /// Mean score divided by max score; 0 when the question is worth nothing.
    pub facility: f64,
    pub fully_correct_rate: f64,
    pub unanswered_rate: f64,
    /// Submissions that contained this question.
    pub submissions: usize,
}

/// Aggregate statistics for a set of graded submissions.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CohortStatistics {
    pub submissions: usize,
    pub mean_percentage: f64,
    pub min_percentage: f64,
    pub max_percentage: f64,
    /// Population standard deviation of the percentages.
    pub std_dev_percentage: f64,
    /// Grade label → number of submissions.
    pub grade_distribution: BTreeMap<String, usize>,
    /// Ordered by question number.
    pub per_question: Vec<QuestionStats>,
}

#[derive(Default)]
struct QuestionAccumulator {
    format: Option<QuestionFormat>,
    max_score: f64,
    earned: f64,
    fully_correct: usize,
    unanswered: usize,
    seen: usize,
}

/// Compute cohort statistics from graded submissions.
pub fn compute_cohort_statistics<'a, I>(results: I) -> CohortStatistics
where
    I: IntoIterator<Item = &'a SubmissionResult>,
{
    let results: Vec<&SubmissionResult> = results.into_iter().collect();
    if results.is_empty() {
        return CohortStatistics::default();
    }

    let n = results.len() as f64;
    let percentages: Vec<f64> = results.iter().map(|r| r.percentage).collect();
    let mean = percentages.iter().sum::<f64>() / n;
    let variance = percentages.iter().map(|p| (p - mean).powi(2)).sum::<f64>() / n;
    let min = percentages.iter().copied().fold(f64::INFINITY, f64::min);
    let max = percentages.iter().copied().fold(f64::NEG_INFINITY, f64::max);

    let mut grade_distribution = BTreeMap::new();
    let mut questions: BTreeMap<QuestionNumber, QuestionAccumulator> = BTreeMap::new();
    for result in &results {
        *grade_distribution.entry(result.grade.clone()).or_insert(0) += 1;
        for q in &result.questions {
            let acc = questions.entry(q.question_number).or_default();
            acc.format = acc.format.or(q.format);
            acc.max_score = acc.max_score.max(q.max_score);
            acc.earned += q.earned_score;
            acc.seen += 1;
            if q.is_fully_correct {
                acc.fully_correct += 1;
            }
            if q.status == QuestionStatus::Unanswered {
                acc.unanswered += 1;
            }
        }
    }

    let per_question = questions
        .into_iter()
        .map(|(question_number, acc)| {
            let seen = acc.seen.max(1) as f64;
            let mean_score = acc.earned / seen;
            QuestionStats {
                question_number,
                format: acc.format,
                max_score: acc.max_score,
                mean_score,
                facility: if acc.max_score > 0.0 {
                    mean_score / acc.max_score
                } else {
                    0.0
                },
                fully_correct_rate: acc.fully_correct as f64 / seen,
                unanswered_rate: acc.unanswered as f64 / seen,
                submissions: acc.seen,
            }
        })
        .collect();

    CohortStatistics {
        submissions: results.len(),
        mean_percentage: mean,
        min_percentage: min,
        max_percentage: max,
        std_dev_percentage: variance.sqrt(),
        grade_distribution,
        per_question,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::QuestionResult;

    fn result(percentage: f64, grade: &str, q1: (f64, QuestionStatus)) -> SubmissionResult {
        SubmissionResult {
            questions: vec![QuestionResult {
                question_number: 1,
                format: Some(QuestionFormat::SingleChoice),
                earned_score: q1.0,
                max_score: 2.0,
                is_fully_correct: q1.0 == 2.0,
                status: q1.1,
                confidence: None,
                explanation: String::new(),
            }],
            total_score: q1.0,
            max_score: 2.0,
            percentage,
            grade: grade.into(),
        }
    }

    #[test]
    fn empty_cohort() {
        let stats = compute_cohort_statistics(&[]);
        assert_eq!(stats.submissions, 0);
        assert!(stats.per_question.is_empty());
    }

    #[test]
    fn cohort_and_item_analysis() {
        let results = vec![
            result(100.0, "A+", (2.0, QuestionStatus::Answered)),
            result(0.0, "F", (0.0, QuestionStatus::Unanswered)),
            result(100.0, "A+", (2.0, QuestionStatus::Answered)),
            result(0.0, "F", (0.0, QuestionStatus::Answered)),
        ];
        let stats = compute_cohort_statistics(&results);
        assert_eq!(stats.submissions, 4);
        assert_eq!(stats.mean_percentage, 50.0);
        assert_eq!(stats.min_percentage, 0.0);
        assert_eq!(stats.max_percentage, 100.0);
        assert_eq!(stats.std_dev_percentage, 50.0);
        assert_eq!(stats.grade_distribution.get("A+"), Some(&2));
        assert_eq!(stats.grade_distribution.get("F"), Some(&2));

        let q1 = &stats.per_question[0];
        assert_eq!(q1.mean_score, 1.0);
        assert_eq!(q1.facility, 0.5);
        assert_eq!(q1.fully_correct_rate, 0.5);
        assert_eq!(q1.unanswered_rate, 0.25);
        assert_eq!(q1.submissions, 4);
    }
}
