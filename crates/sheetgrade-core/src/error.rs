//! Error types for the evaluation engine and its collaborators.
//!
//! `EvaluationError` covers deterministic data-setup faults found while
//! grading. `CollaboratorError` is defined here as well so the batch pipeline
//! can downcast failures from repositories, stores, and detectors and decide
//! whether a retry makes sense without string matching.

use thiserror::Error;

use crate::engine::EvaluationStage;
use crate::model::QuestionNumber;

/// Faults in the grading inputs. Every one is reproducible from the inputs.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum EvaluationError {
    /// The answer key for a question is malformed or under-specified.
    #[error("invalid answer key for question {question_number}: {reason}")]
    InvalidAnswerKey {
        question_number: QuestionNumber,
        reason: String,
    },

    /// Two answer keys in one paper share a question number.
    #[error("duplicate answer key for question {0}")]
    DuplicateQuestion(QuestionNumber),

    /// The grade table cannot label every percentage.
    #[error("invalid grade table: {0}")]
    InvalidGradeTable(String),
}

impl EvaluationError {
    pub(crate) fn invalid_key(question_number: QuestionNumber, reason: impl Into<String>) -> Self {
        EvaluationError::InvalidAnswerKey {
            question_number,
            reason: reason.into(),
        }
    }

    /// The question this error is about, if it concerns a single question.
    pub fn question_number(&self) -> Option<QuestionNumber> {
        match self {
            EvaluationError::InvalidAnswerKey {
                question_number, ..
            } => Some(*question_number),
            EvaluationError::DuplicateQuestion(n) => Some(*n),
            EvaluationError::InvalidGradeTable(_) => None,
        }
    }
}

/// A whole-submission failure: nothing was produced for the submission.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("evaluation failed before reaching the {stage} stage: {source}")]
pub struct EvaluationFailure {
    /// The stage the orchestrator was trying to reach.
    pub stage: EvaluationStage,
    /// What went wrong.
    #[source]
    pub source: EvaluationError,
}

/// Failures reported by external collaborators (repositories, stores, detectors).
#[derive(Debug, Clone, PartialEq, Error)]
pub enum CollaboratorError {
    /// The requested paper, submission, or sheet does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// The collaborator is temporarily unreachable.
    #[error("collaborator unavailable: {0}")]
    Unavailable(String),

    /// The collaborator refused the request (bad image, bad identity, ...).
    #[error("request rejected: {0}")]
    Rejected(String),

    /// The collaborator asked us to slow down.
    #[error("rate limited, retry after {retry_after_ms}ms")]
    RateLimited { retry_after_ms: u64 },
}

impl CollaboratorError {
    /// Returns `true` if this error is permanent and should not be retried.
    pub fn is_permanent(&self) -> bool {
        matches!(
            self,
            CollaboratorError::NotFound(_) | CollaboratorError::Rejected(_)
        )
    }

    /// Returns the retry-after delay in milliseconds, if applicable.
    pub fn retry_after_ms(&self) -> Option<u64> {
        match self {
            CollaboratorError::RateLimited { retry_after_ms } => Some(*retry_after_ms),
            _ => None,
        }
    }
}
