//! Evaluation orchestrator.
//!
//! Runs normalize → match → score → aggregate for one submission. The whole
//! pass is a pure function of its inputs: it performs no I/O, holds no shared
//! mutable state, and either returns a complete [`Evaluation`] or a single
//! [`EvaluationFailure`]. Identical inputs always give identical results.

use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{EvaluationError, EvaluationFailure};
use crate::grading::{aggregate, GradeTable};
use crate::matcher::match_responses;
use crate::model::{
    AnswerKey, DetectedResponse, Diagnostics, InvalidKeyNote, QuestionFormat, QuestionNumber,
    QuestionResult, QuestionStatus, SubmissionResult,
};
use crate::normalizer::{check_unique_numbers, normalize_question, validate_key, RawQuestion};
use crate::scorer::{score_question, ScoringPolicy};

/// Namespace for evaluation tokens.
const TOKEN_NAMESPACE: Uuid = Uuid::from_u128(0x5f0c_9a8e_3d1b_4c6e_9b27_84a1_e2f3_c0d7);

/// Where a submission is in the evaluation pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EvaluationStage {
    Received,
    Normalized,
    Matched,
    Scored,
    Aggregated,
    Complete,
    Failed,
}

impl fmt::Display for EvaluationStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            EvaluationStage::Received => "received",
            EvaluationStage::Normalized => "normalized",
            EvaluationStage::Matched => "matched",
            EvaluationStage::Scored => "scored",
            EvaluationStage::Aggregated => "aggregated",
            EvaluationStage::Complete => "complete",
            EvaluationStage::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// What to do with a question whose answer key is invalid.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InvalidKeyPolicy {
    /// Abort the whole submission.
    #[default]
    FailFast,
    /// Grade the question as a zero-point placeholder and report it.
    ZeroScorePlaceholder,
}

/// Configuration for the evaluation engine.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EvaluationConfig {
    pub scoring: ScoringPolicy,
    pub grade_table: GradeTable,
    pub invalid_key_policy: InvalidKeyPolicy,
}

/// A question whose key could not be normalized under the placeholder policy.
#[derive(Debug, Clone, PartialEq)]
struct Placeholder {
    note: InvalidKeyNote,
    format: Option<QuestionFormat>,
}

/// A paper whose answer keys have been normalized and validated.
///
/// Preparing once and evaluating many submissions against it gives the same
/// results as calling [`EvaluationEngine::evaluate`] per submission.
#[derive(Debug, Clone, PartialEq)]
pub struct PreparedPaper {
    keys: Vec<AnswerKey>,
    placeholders: Vec<Placeholder>,
}

impl PreparedPaper {
    /// Valid answer keys, ordered by question number.
    pub fn keys(&self) -> &[AnswerKey] {
        &self.keys
    }

    /// Keys replaced by zero-score placeholders.
    pub fn invalid_keys(&self) -> impl Iterator<Item = &InvalidKeyNote> {
        self.placeholders.iter().map(|p| &p.note)
    }

    pub fn question_count(&self) -> usize {
        self.keys.len() + self.placeholders.len()
    }

    pub fn max_score(&self) -> f64 {
        self.keys.iter().map(|k| k.points).sum()
    }
}

/// The complete outcome of one evaluation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Evaluation {
    pub result: SubmissionResult,
    pub diagnostics: Diagnostics,
}

/// Tracks the per-submission state machine and logs transitions.
struct StageTracker {
    stage: EvaluationStage,
}

impl StageTracker {
    fn new() -> Self {
        tracing::trace!(stage = %EvaluationStage::Received, "evaluation received");
        Self {
            stage: EvaluationStage::Received,
        }
    }

    fn advance(&mut self, next: EvaluationStage) {
        tracing::debug!(from = %self.stage, to = %next, "evaluation stage");
        self.stage = next;
    }

    fn fail(&mut self, attempted: EvaluationStage, source: EvaluationError) -> EvaluationFailure {
        tracing::warn!(from = %self.stage, attempted = %attempted, "evaluation failed: {source}");
        self.stage = EvaluationStage::Failed;
        EvaluationFailure {
            stage: attempted,
            source,
        }
    }
}

/// The evaluation engine.
#[derive(Debug, Clone, Default)]
pub struct EvaluationEngine {
    config: EvaluationConfig,
}

impl EvaluationEngine {
    pub fn new(config: EvaluationConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &EvaluationConfig {
        &self.config
    }

    /// Grade one submission from raw question records.
    pub fn evaluate(
        &self,
        raw_questions: &[RawQuestion],
        responses: &[DetectedResponse],
    ) -> Result<Evaluation, EvaluationFailure> {
        let mut tracker = StageTracker::new();
        let paper = self.prepare_with(&mut tracker, raw_questions)?;
        self.run(&mut tracker, &paper, responses)
    }

    /// Grade one submission against keys that are already normalized.
    pub fn evaluate_keys(
        &self,
        keys: &[AnswerKey],
        responses: &[DetectedResponse],
    ) -> Result<Evaluation, EvaluationFailure> {
        let mut tracker = StageTracker::new();
        let paper = prepare_keys(keys).map_err(|e| tracker.fail(EvaluationStage::Normalized, e))?;
        tracker.advance(EvaluationStage::Normalized);
        self.run(&mut tracker, &paper, responses)
    }

    /// Normalize a paper once for grading many submissions.
    pub fn prepare(&self, raw_questions: &[RawQuestion]) -> Result<PreparedPaper, EvaluationFailure> {
        let mut tracker = StageTracker::new();
        self.prepare_with(&mut tracker, raw_questions)
    }

    /// Grade one submission against a prepared paper.
    pub fn evaluate_prepared(
        &self,
        paper: &PreparedPaper,
        responses: &[DetectedResponse],
    ) -> Result<Evaluation, EvaluationFailure> {
        let mut tracker = StageTracker::new();
        tracker.advance(EvaluationStage::Normalized);
        self.run(&mut tracker, paper, responses)
    }

    fn prepare_with(
        &self,
        tracker: &mut StageTracker,
        raw_questions: &[RawQuestion],
    ) -> Result<PreparedPaper, EvaluationFailure> {
        check_unique_numbers(raw_questions.iter().map(|q| q.number))
            .map_err(|e| tracker.fail(EvaluationStage::Normalized, e))?;

        let mut keys = Vec::with_capacity(raw_questions.len());
        let mut placeholders = Vec::new();
        for raw in raw_questions {
            match normalize_question(raw) {
                Ok(key) => keys.push(key),
                Err(e) => match self.config.invalid_key_policy {
                    InvalidKeyPolicy::FailFast => {
                        return Err(tracker.fail(EvaluationStage::Normalized, e));
                    }
                    InvalidKeyPolicy::ZeroScorePlaceholder if raw.number > 0 => {
                        tracing::warn!(question = raw.number, "using zero-score placeholder: {e}");
                        placeholders.push(Placeholder {
                            note: InvalidKeyNote {
                                question_number: raw.number,
                                reason: e.to_string(),
                            },
                            format: raw.format.as_deref().and_then(|f| f.parse().ok()),
                        });
                    }
                    // Without a usable question number there is nothing to hold a place for.
                    InvalidKeyPolicy::ZeroScorePlaceholder => {
                        return Err(tracker.fail(EvaluationStage::Normalized, e));
                    }
                },
            }
        }
        keys.sort_by_key(|k| k.question_number);
        placeholders.sort_by_key(|p| p.note.question_number);

        tracker.advance(EvaluationStage::Normalized);
        Ok(PreparedPaper { keys, placeholders })
    }

    fn run(
        &self,
        tracker: &mut StageTracker,
        paper: &PreparedPaper,
        responses: &[DetectedResponse],
    ) -> Result<Evaluation, EvaluationFailure> {
        let matched = match_responses(&paper.keys, responses);
        let mut diagnostics = matched.diagnostics;

        // A response for a placeholder question is not an orphan: the question exists.
        let placeholder_numbers: BTreeSet<QuestionNumber> = paper
            .placeholders
            .iter()
            .map(|p| p.note.question_number)
            .collect();
        diagnostics
            .orphan_responses
            .retain(|r| !placeholder_numbers.contains(&r.question_number));
        diagnostics.invalid_keys = paper.placeholders.iter().map(|p| p.note.clone()).collect();
        tracker.advance(EvaluationStage::Matched);

        let mut questions: Vec<QuestionResult> = matched
            .questions
            .iter()
            .map(|mq| {
                let score = score_question(mq.key, &mq.response, &self.config.scoring);
                debug_assert!(score.earned >= 0.0 && score.earned <= mq.key.points);
                QuestionResult {
                    question_number: mq.key.question_number,
                    format: Some(mq.key.format()),
                    earned_score: score.earned,
                    max_score: mq.key.points,
                    is_fully_correct: score.is_fully_correct,
                    status: if mq.response.is_empty() {
                        QuestionStatus::Unanswered
                    } else {
                        QuestionStatus::Answered
                    },
                    confidence: mq.response.confidence,
                    explanation: score.explanation,
                }
            })
            .collect();
        questions.extend(paper.placeholders.iter().map(|p| QuestionResult {
            question_number: p.note.question_number,
            format: p.format,
            earned_score: 0.0,
            max_score: 0.0,
            is_fully_correct: false,
            status: QuestionStatus::InvalidKey,
            confidence: None,
            explanation: format!("invalid answer key: {}", p.note.reason),
        }));
        questions.sort_by_key(|q| q.question_number);
        tracker.advance(EvaluationStage::Scored);

        let result = aggregate(questions, &self.config.grade_table);
        tracker.advance(EvaluationStage::Aggregated);

        tracing::debug!(
            total = result.total_score,
            max = result.max_score,
            grade = %result.grade,
            "submission graded"
        );
        tracker.advance(EvaluationStage::Complete);
        Ok(Evaluation {
            result,
            diagnostics,
        })
    }
}

fn prepare_keys(keys: &[AnswerKey]) -> Result<PreparedPaper, EvaluationError> {
    check_unique_numbers(keys.iter().map(|k| k.question_number))?;
    for key in keys {
        validate_key(key)?;
    }
    let mut keys = keys.to_vec();
    keys.sort_by_key(|k| k.question_number);
    Ok(PreparedPaper {
        keys,
        placeholders: Vec::new(),
    })
}

/// Deterministic token identifying one graded outcome for one submission.
///
/// Stores use it for idempotent upserts: re-grading the same inputs yields
/// the same token, so a repeated write is a no-op instead of a duplicate.
/// Diagnostics are part of the token, so a re-grade that only changes them
/// still replaces the stored record.
pub fn evaluation_token(
    paper_id: &str,
    student_id: &str,
    evaluation: &Evaluation,
) -> serde_json::Result<Uuid> {
    let payload = serde_json::to_vec(&(
        paper_id,
        student_id,
        &evaluation.result,
        &evaluation.diagnostics,
    ))?;
    Ok(Uuid::new_v5(&TOKEN_NAMESPACE, &payload))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::normalizer::{RawBlank, RawIdList};

    fn paper() -> Vec<RawQuestion> {
        vec![
            RawQuestion {
                number: 1,
                correct_answers: Some(RawIdList::List(vec!["A".into(), "C".into()])),
                points: Some(2.0),
                ..Default::default()
            },
            RawQuestion {
                number: 2,
                correct_answer: Some("B".into()),
                points: Some(2.0),
                ..Default::default()
            },
            RawQuestion {
                number: 3,
                blank_answers: vec![RawBlank::One("paris".into())],
                points: Some(2.0),
                ..Default::default()
            },
        ]
    }

    fn responses() -> Vec<DetectedResponse> {
        vec![
            DetectedResponse::choice(1, ["A", "B"]),
            DetectedResponse::choice(2, ["B"]),
            DetectedResponse::choice(42, ["D"]),
        ]
    }

    #[test]
    fn evaluates_full_submission() {
        let engine = EvaluationEngine::default();
        let eval = engine.evaluate(&paper(), &responses()).unwrap();
        let result = &eval.result;

        assert_eq!(result.questions.len(), 3);
        assert_eq!(result.questions[0].earned_score, 0.5);
        assert_eq!(result.questions[1].earned_score, 2.0);
        assert!(result.questions[1].is_fully_correct);
        assert_eq!(result.questions[2].status, QuestionStatus::Unanswered);
        assert_eq!(result.total_score, 2.5);
        assert_eq!(result.max_score, 6.0);
        assert_eq!(result.grade, "F");

        assert_eq!(eval.diagnostics.orphan_responses.len(), 1);
        assert_eq!(eval.diagnostics.unanswered_questions, vec![3]);
    }

    #[test]
    fn evaluation_is_idempotent() {
        let engine = EvaluationEngine::default();
        let first = engine.evaluate(&paper(), &responses()).unwrap();
        let second = engine.evaluate(&paper(), &responses()).unwrap();
        assert_eq!(first, second);
        assert_eq!(
            serde_json::to_string(&first).unwrap(),
            serde_json::to_string(&second).unwrap()
        );

        let mut shuffled = responses();
        shuffled.reverse();
        let third = engine.evaluate(&paper(), &shuffled).unwrap();
        assert_eq!(first.result, third.result);
    }

    #[test]
    fn invalid_key_fails_fast_by_default() {
        let mut raw = paper();
        raw[1].correct_answer = None;
        let err = EvaluationEngine::default()
            .evaluate(&raw, &responses())
            .unwrap_err();
        assert_eq!(err.stage, EvaluationStage::Normalized);
        assert!(matches!(
            err.source,
            EvaluationError::InvalidAnswerKey {
                question_number: 2,
                ..
            }
        ));
    }

    #[test]
    fn duplicate_question_numbers_fail() {
        let mut raw = paper();
        raw[2].number = 1;
        let err = EvaluationEngine::default()
            .evaluate(&raw, &responses())
            .unwrap_err();
        assert_eq!(err.source, EvaluationError::DuplicateQuestion(1));
    }

    #[test]
    fn placeholder_policy_grades_remaining_questions() {
        let mut raw = paper();
        raw[1].correct_answer = None;
        let engine = EvaluationEngine::new(EvaluationConfig {
            invalid_key_policy: InvalidKeyPolicy::ZeroScorePlaceholder,
            ..Default::default()
        });
        let eval = engine.evaluate(&raw, &responses()).unwrap();
        let q2 = eval.result.question(2).unwrap();
        assert_eq!(q2.status, QuestionStatus::InvalidKey);
        assert_eq!(q2.max_score, 0.0);
        assert_eq!(eval.result.max_score, 4.0);
        assert_eq!(eval.diagnostics.invalid_keys.len(), 1);
        assert_eq!(eval.diagnostics.invalid_keys[0].question_number, 2);
        // The response to question 2 is not an orphan.
        assert_eq!(eval.diagnostics.orphan_responses.len(), 1);
    }

    #[test]
    fn evaluate_keys_revalidates() {
        let engine = EvaluationEngine::default();
        let mut keys = crate::normalizer::normalize_paper(&paper()).unwrap();
        keys[0].points = 0.0;
        let err = engine.evaluate_keys(&keys, &responses()).unwrap_err();
        assert!(matches!(err.source, EvaluationError::InvalidAnswerKey { .. }));
    }

    #[test]
    fn prepared_paper_matches_direct_evaluation() {
        let engine = EvaluationEngine::default();
        let prepared = engine.prepare(&paper()).unwrap();
        assert_eq!(prepared.question_count(), 3);
        assert_eq!(prepared.max_score(), 6.0);
        let direct = engine.evaluate(&paper(), &responses()).unwrap();
        let via_prepared = engine.evaluate_prepared(&prepared, &responses()).unwrap();
        assert_eq!(direct, via_prepared);
    }

    #[test]
    fn token_is_deterministic_and_identity_bound() {
        let engine = EvaluationEngine::default();
        let eval = engine.evaluate(&paper(), &responses()).unwrap();
        let a = evaluation_token("p1", "s1", &eval).unwrap();
        let b = evaluation_token("p1", "s1", &eval).unwrap();
        let c = evaluation_token("p1", "s2", &eval).unwrap();
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn token_changes_when_only_diagnostics_change() {
        let engine = EvaluationEngine::default();
        let eval = engine.evaluate(&paper(), &responses()).unwrap();
        let mut flagged = eval.clone();
        flagged.diagnostics.low_confidence_questions.push(1);

        assert_eq!(flagged.result, eval.result);
        assert_ne!(
            evaluation_token("p1", "s1", &eval).unwrap(),
            evaluation_token("p1", "s1", &flagged).unwrap()
        );
    }
}
