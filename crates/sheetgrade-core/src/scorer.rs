//! Per-question scoring rules.
//!
//! - `single_choice`: all or nothing, exact match against the primary id.
//! - `multi_choice`: proportional credit with a penalty per wrong option,
//!   clamped at zero. Weighted keys use weight sums in place of counts.
//! - `fill_in_blank`: each blank earns an equal share of the points.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::matcher::MatchedResponse;
use crate::model::{AnswerKey, BlankAnswer, KeyAnswer};

/// Tunable parts of the scoring rules.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScoringPolicy {
    /// Credit taken away per wrong multi-choice selection, in unit weights.
    #[serde(default = "default_wrong_option_penalty")]
    pub wrong_option_penalty: f64,
}

fn default_wrong_option_penalty() -> f64 {
    0.5
}

impl Default for ScoringPolicy {
    fn default() -> Self {
        Self {
            wrong_option_penalty: default_wrong_option_penalty(),
        }
    }
}

/// The outcome of scoring one question.
#[derive(Debug, Clone, PartialEq)]
pub struct QuestionScore {
    /// 0 <= earned <= key.points.
    pub earned: f64,
    pub is_fully_correct: bool,
    pub explanation: String,
}

impl QuestionScore {
    fn zero(explanation: impl Into<String>) -> Self {
        Self {
            earned: 0.0,
            is_fully_correct: false,
            explanation: explanation.into(),
        }
    }
}

const UNANSWERED: &str = "unanswered";

/// Score one matched question.
///
/// Selections of option ids the key does not know count as wrong
/// selections; the detector most likely misread a printed label.
pub fn score_question(
    key: &AnswerKey,
    response: &MatchedResponse,
    policy: &ScoringPolicy,
) -> QuestionScore {
    if response.is_empty() {
        return QuestionScore::zero(UNANSWERED);
    }

    match &key.answer {
        KeyAnswer::SingleChoice {
            correct_option_ids,
            ..
        } => score_single(key.points, correct_option_ids, &response.selected),
        KeyAnswer::MultiChoice {
            correct_option_ids,
            option_weights,
            ..
        } => score_multi(
            key.points,
            correct_option_ids,
            option_weights,
            &response.selected,
            policy,
        ),
        KeyAnswer::FillInBlank { blanks } => score_blanks(key.points, blanks, &response.blanks),
    }
}

fn score_single(points: f64, correct: &[String], selected: &BTreeSet<String>) -> QuestionScore {
    let Some(primary) = correct.first() else {
        return QuestionScore::zero("no correct option");
    };
    if selected.len() == 1 && selected.contains(primary) {
        QuestionScore {
            earned: points,
            is_fully_correct: true,
            explanation: "correct".into(),
        }
    } else {
        let got: Vec<&str> = selected.iter().map(String::as_str).collect();
        QuestionScore::zero(format!("expected {primary}, got {}", got.join(",")))
    }
}

fn score_multi(
    points: f64,
    correct: &[String],
    weights: &BTreeMap<String, f64>,
    selected: &BTreeSet<String>,
    policy: &ScoringPolicy,
) -> QuestionScore {
    let correct_set: BTreeSet<&String> = correct.iter().collect();
    let weight_of = |id: &String| weights.get(id).copied().unwrap_or(1.0);

    let total_weight: f64 = correct_set.iter().map(|id| weight_of(id)).sum();
    let earned_weight: f64 = correct_set
        .iter()
        .filter(|id| selected.contains(**id))
        .map(|id| weight_of(id))
        .sum();
    let correct_count = correct_set
        .iter()
        .filter(|id| selected.contains(**id))
        .count();
    let wrong_count = selected.iter().filter(|id| !correct_set.contains(id)).count();

    let fraction = if total_weight > 0.0 {
        let raw = (earned_weight - wrong_count as f64 * policy.wrong_option_penalty) / total_weight;
        raw.clamp(0.0, 1.0)
    } else {
        0.0
    };
    let is_fully_correct = wrong_count == 0 && correct_count == correct_set.len();
    let earned = if is_fully_correct {
        points
    } else {
        (fraction * points).min(points)
    };

    QuestionScore {
        earned,
        is_fully_correct,
        explanation: format!(
            "{correct_count}/{} correct, {wrong_count} wrong",
            correct_set.len()
        ),
    }
}

/// Comparison form for blank text: trimmed, single-spaced, lower-cased.
pub fn normalize_blank_text(text: &str) -> String {
    text.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

fn score_blanks(points: f64, expected: &[BlankAnswer], answers: &[String]) -> QuestionScore {
    if expected.is_empty() {
        return QuestionScore::zero("no expected blank answer");
    }

    let matched = expected
        .iter()
        .enumerate()
        .filter(|(i, blank)| {
            answers.get(*i).is_some_and(|given| {
                let given = normalize_blank_text(given);
                !given.is_empty()
                    && blank
                        .accepted
                        .iter()
                        .any(|accepted| normalize_blank_text(accepted) == given)
            })
        })
        .count();
    let blank_count = expected.len();
    let is_fully_correct = matched == blank_count;
    let earned = if is_fully_correct {
        points
    } else {
        points / blank_count as f64 * matched as f64
    };

    QuestionScore {
        earned,
        is_fully_correct,
        explanation: format!("{matched}/{blank_count} blanks correct"),
    }
}
