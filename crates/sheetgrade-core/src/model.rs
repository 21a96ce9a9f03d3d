//! Core data model types for sheetgrade.
//!
//! Answer keys arrive in several legacy shapes and are normalized once into
//! [`AnswerKey`]; everything downstream works on these closed, validated
//! types. Detected responses come from the external mark-detection step.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Question numbers are positive and unique within a paper.
pub type QuestionNumber = u32;

/// How a question is answered and therefore scored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QuestionFormat {
    SingleChoice,
    MultiChoice,
    FillInBlank,
}

impl fmt::Display for QuestionFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            QuestionFormat::SingleChoice => write!(f, "single_choice"),
            QuestionFormat::MultiChoice => write!(f, "multi_choice"),
            QuestionFormat::FillInBlank => write!(f, "fill_in_blank"),
        }
    }
}

impl FromStr for QuestionFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().replace('-', "_").as_str() {
            "single_choice" | "single" | "choice" | "mcq" => Ok(QuestionFormat::SingleChoice),
            "multi_choice" | "multi" | "multiple" | "multiple_choice" => {
                Ok(QuestionFormat::MultiChoice)
            }
            "fill_in_blank" | "fill_blank" | "fill" | "blank" => Ok(QuestionFormat::FillInBlank),
            other => Err(format!("unknown question type: {other}")),
        }
    }
}

/// One selectable option on the printed paper.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChoiceOption {
    /// Canonical option label (e.g. "A").
    pub id: String,
    /// Display text.
    #[serde(default)]
    pub text: String,
}

/// The accepted answers for one blank.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BlankAnswer {
    /// Any of these strings earns the blank.
    pub accepted: Vec<String>,
}

/// Format-specific correct-answer data.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "format", rename_all = "snake_case")]
pub enum KeyAnswer {
    SingleChoice {
        #[serde(default)]
        options: Vec<ChoiceOption>,
        /// The first id is the authoritative answer.
        correct_option_ids: Vec<String>,
    },
    MultiChoice {
        #[serde(default)]
        options: Vec<ChoiceOption>,
        correct_option_ids: Vec<String>,
        /// Weight for every correct option id.
        option_weights: BTreeMap<String, f64>,
    },
    FillInBlank {
        blanks: Vec<BlankAnswer>,
    },
}

impl KeyAnswer {
    pub fn format(&self) -> QuestionFormat {
        match self {
            KeyAnswer::SingleChoice { .. } => QuestionFormat::SingleChoice,
            KeyAnswer::MultiChoice { .. } => QuestionFormat::MultiChoice,
            KeyAnswer::FillInBlank { .. } => QuestionFormat::FillInBlank,
        }
    }

    /// Options printed for this question (empty for fill-in-blank).
    pub fn options(&self) -> &[ChoiceOption] {
        match self {
            KeyAnswer::SingleChoice { options, .. } | KeyAnswer::MultiChoice { options, .. } => {
                options
            }
            KeyAnswer::FillInBlank { .. } => &[],
        }
    }
}

/// Canonical correct-answer specification for one question.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnswerKey {
    pub question_number: QuestionNumber,
    /// Maximum score for the question. Always positive.
    pub points: f64,
    pub answer: KeyAnswer,
}

impl AnswerKey {
    pub fn format(&self) -> QuestionFormat {
        self.answer.format()
    }

    pub fn is_choice(&self) -> bool {
        !matches!(self.answer, KeyAnswer::FillInBlank { .. })
    }

    /// Number of blanks for fill-in-blank questions, zero otherwise.
    pub fn blank_count(&self) -> usize {
        match &self.answer {
            KeyAnswer::FillInBlank { blanks } => blanks.len(),
            _ => 0,
        }
    }
}

/// How sure the detector is about a question's reading.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Confidence {
    High,
    #[default]
    Medium,
    Low,
}

impl fmt::Display for Confidence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Confidence::High => write!(f, "high"),
            Confidence::Medium => write!(f, "medium"),
            Confidence::Low => write!(f, "low"),
        }
    }
}

/// One question's reading as reported by the mark detector.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectedResponse {
    pub question_number: QuestionNumber,
    /// Empty means nothing was marked.
    #[serde(default, alias = "selected")]
    pub selected_option_ids: Vec<String>,
    #[serde(default)]
    pub blank_answers: Vec<String>,
    #[serde(default)]
    pub confidence: Confidence,
}

impl DetectedResponse {
    /// A choice reading.
    pub fn choice<I, S>(question_number: QuestionNumber, selected: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            question_number,
            selected_option_ids: selected.into_iter().map(Into::into).collect(),
            blank_answers: Vec::new(),
            confidence: Confidence::High,
        }
    }

    /// A fill-in-blank reading.
    pub fn blanks<I, S>(question_number: QuestionNumber, answers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            question_number,
            selected_option_ids: Vec::new(),
            blank_answers: answers.into_iter().map(Into::into).collect(),
            confidence: Confidence::High,
        }
    }

    pub fn with_confidence(mut self, confidence: Confidence) -> Self {
        self.confidence = confidence;
        self
    }
}

/// Canonical form of an option label: trimmed and ASCII upper-cased.
pub fn canonical_option_id(id: &str) -> String {
    id.trim().to_ascii_uppercase()
}

/// Whether a question was answered, skipped, or could not be keyed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QuestionStatus {
    Answered,
    Unanswered,
    InvalidKey,
}

/// Score for one question in one evaluation pass.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuestionResult {
    pub question_number: QuestionNumber,
    /// Absent only for invalid-key placeholders whose format is unknown.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub format: Option<QuestionFormat>,
    /// 0 <= earned_score <= max_score.
    pub earned_score: f64,
    pub max_score: f64,
    pub is_fully_correct: bool,
    pub status: QuestionStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence: Option<Confidence>,
    /// Machine-checkable reason, e.g. "2/3 correct, 1 wrong".
    pub explanation: String,
}

/// Complete graded submission.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubmissionResult {
    /// One entry per answer key, ordered by question number.
    pub questions: Vec<QuestionResult>,
    pub total_score: f64,
    pub max_score: f64,
    pub percentage: f64,
    pub grade: String,
}

impl SubmissionResult {
    pub fn question(&self, number: QuestionNumber) -> Option<&QuestionResult> {
        self.questions
            .iter()
            .find(|q| q.question_number == number)
    }

    pub fn fully_correct_count(&self) -> usize {
        self.questions.iter().filter(|q| q.is_fully_correct).count()
    }
}

/// A response whose shape did not fit its question's format.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FormatMismatch {
    pub question_number: QuestionNumber,
    pub expected: QuestionFormat,
}

/// An answer key that was replaced by a zero-score placeholder.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InvalidKeyNote {
    pub question_number: QuestionNumber,
    pub reason: String,
}

/// Non-fatal findings from one evaluation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Diagnostics {
    /// Responses whose question number has no answer key.
    #[serde(default)]
    pub orphan_responses: Vec<DetectedResponse>,
    #[serde(default)]
    pub unanswered_questions: Vec<QuestionNumber>,
    /// Extra readings for a question that already had one.
    #[serde(default)]
    pub duplicate_responses: Vec<DetectedResponse>,
    #[serde(default)]
    pub format_mismatches: Vec<FormatMismatch>,
    /// Read with low confidence; candidates for manual review.
    #[serde(default)]
    pub low_confidence_questions: Vec<QuestionNumber>,
    #[serde(default)]
    pub invalid_keys: Vec<InvalidKeyNote>,
}

impl Diagnostics {
    /// True when nothing needs attention beyond skipped questions.
    pub fn is_clean(&self) -> bool {
        self.orphan_responses.is_empty()
            && self.duplicate_responses.is_empty()
            && self.format_mismatches.is_empty()
            && self.low_confidence_questions.is_empty()
            && self.invalid_keys.is_empty()
    }
}
