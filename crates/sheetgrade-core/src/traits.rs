//! Trait definitions for the engine's external collaborators.
//!
//! The engine never reaches for a global client. Answer keys come from an
//! [`AnswerKeyRepository`], graded submissions go to a [`ResultStore`], and
//! scanned sheets are read by a [`MarkDetector`]. Implementations live in
//! `sheetgrade-adapters`; tests use in-memory fakes.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::engine::{evaluation_token, Evaluation};
use crate::model::{
    AnswerKey, DetectedResponse, Diagnostics, KeyAnswer, QuestionFormat, QuestionNumber,
    SubmissionResult,
};
use crate::normalizer::RawQuestion;

// ---------------------------------------------------------------------------
// Answer-key repository
// ---------------------------------------------------------------------------

/// Source of question records for a paper.
#[async_trait]
pub trait AnswerKeyRepository: Send + Sync {
    /// Human-readable repository name (e.g. "directory").
    fn name(&self) -> &str;

    /// Load every question record of a paper.
    async fn load_answer_keys(&self, paper_id: &str) -> anyhow::Result<Vec<RawQuestion>>;
}

// ---------------------------------------------------------------------------
// Result store
// ---------------------------------------------------------------------------

/// One stored evaluation for a (paper, student) pair.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubmissionRecord {
    pub paper_id: String,
    pub student_id: String,
    /// Deterministic token of the graded outcome; see [`evaluation_token`].
    pub evaluation_token: Uuid,
    pub evaluated_at: DateTime<Utc>,
    pub result: SubmissionResult,
    pub diagnostics: Diagnostics,
}

impl SubmissionRecord {
    pub fn new(
        paper_id: impl Into<String>,
        student_id: impl Into<String>,
        evaluation: Evaluation,
    ) -> serde_json::Result<Self> {
        let paper_id = paper_id.into();
        let student_id = student_id.into();
        let evaluation_token = evaluation_token(&paper_id, &student_id, &evaluation)?;
        Ok(Self {
            paper_id,
            student_id,
            evaluation_token,
            evaluated_at: Utc::now(),
            result: evaluation.result,
            diagnostics: evaluation.diagnostics,
        })
    }
}

/// What a store did with a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum SaveOutcome {
    /// First record for this (paper, student).
    Inserted,
    /// An older outcome was overwritten.
    Replaced { previous_token: Uuid },
    /// The same outcome was already stored; nothing was written.
    Unchanged,
}

impl SaveOutcome {
    /// Upsert decision keyed by the evaluation token.
    pub fn decide(existing: Option<Uuid>, incoming: Uuid) -> Self {
        match existing {
            None => SaveOutcome::Inserted,
            Some(token) if token == incoming => SaveOutcome::Unchanged,
            Some(previous_token) => SaveOutcome::Replaced { previous_token },
        }
    }

    /// Whether the store wrote anything.
    pub fn wrote(&self) -> bool {
        !matches!(self, SaveOutcome::Unchanged)
    }
}

/// Persistence for graded submissions.
///
/// Implementations must hold at most one record per `(paper_id, student_id)`
/// and treat a save with an already-stored token as a no-op.
#[async_trait]
pub trait ResultStore: Send + Sync {
    fn name(&self) -> &str;

    async fn save_result(&self, record: &SubmissionRecord) -> anyhow::Result<SaveOutcome>;

    async fn load_result(
        &self,
        paper_id: &str,
        student_id: &str,
    ) -> anyhow::Result<Option<SubmissionRecord>>;
}

// ---------------------------------------------------------------------------
// Mark detection
// ---------------------------------------------------------------------------

/// What the detector needs to know about one question.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuestionPrompt {
    pub question_number: QuestionNumber,
    pub format: QuestionFormat,
    /// Printed option labels, in order. Empty for fill-in-blank.
    #[serde(default)]
    pub option_ids: Vec<String>,
    #[serde(default)]
    pub blank_count: usize,
}

impl QuestionPrompt {
    pub fn from_key(key: &AnswerKey) -> Self {
        let option_ids = match &key.answer {
            KeyAnswer::SingleChoice { options, .. } | KeyAnswer::MultiChoice { options, .. } => {
                options.iter().map(|o| o.id.clone()).collect()
            }
            KeyAnswer::FillInBlank { .. } => Vec::new(),
        };
        Self {
            question_number: key.question_number,
            format: key.format(),
            option_ids,
            blank_count: key.blank_count(),
        }
    }
}

/// Request to read one scanned answer sheet.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectionRequest {
    /// Identifies the sheet (usually the student id).
    pub sheet_id: String,
    /// Encoded image bytes.
    #[serde(default, skip_serializing)]
    pub image: Vec<u8>,
    pub questions: Vec<QuestionPrompt>,
}

/// The external mark-detection capability.
///
/// Implementations own their retry and timeout policy for a single call;
/// the batch pipeline only retries failures classified as transient.
#[async_trait]
pub trait MarkDetector: Send + Sync {
    /// Human-readable detector name.
    fn name(&self) -> &str;

    /// Read the marks on one sheet.
    async fn detect(&self, request: &DetectionRequest) -> anyhow::Result<Vec<DetectedResponse>>;
}
