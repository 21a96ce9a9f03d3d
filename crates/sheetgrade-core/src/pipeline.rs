//! Batch grading pipeline.
//!
//! Loads a paper's answer keys once, grades many sheets concurrently, and
//! writes exactly one record per sheet. Evaluation itself is synchronous and
//! pure; only collaborator calls (detection, storage) are awaited.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use futures::stream::{FuturesUnordered, StreamExt};
use tokio::sync::Semaphore;
use uuid::Uuid;

use crate::engine::{EvaluationEngine, PreparedPaper};
use crate::error::CollaboratorError;
use crate::model::DetectedResponse;
use crate::report::{BatchReport, FailureKind, PaperSummary, SheetFailure, SheetOutcome};
use crate::statistics::compute_cohort_statistics;
use crate::traits::{
    AnswerKeyRepository, DetectionRequest, MarkDetector, QuestionPrompt, ResultStore,
    SubmissionRecord,
};

/// Configuration for batch grading.
#[derive(Debug, Clone)]
pub struct BatchConfig {
    /// Maximum sheets graded at once.
    pub parallelism: usize,
    /// Retries on transient detector errors.
    pub max_detection_retries: u32,
    /// Initial delay between retries; doubles per attempt.
    pub retry_delay: Duration,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            parallelism: 4,
            max_detection_retries: 3,
            retry_delay: Duration::from_secs(1),
        }
    }
}

/// Where a sheet's answers come from.
#[derive(Debug, Clone)]
pub enum SheetSource {
    /// Already read by the detector.
    Detected(Vec<DetectedResponse>),
    /// A scanned image still to be read.
    Scanned(Vec<u8>),
}

/// One student's answer sheet.
#[derive(Debug, Clone)]
pub struct Sheet {
    pub student_id: String,
    pub source: SheetSource,
}

impl Sheet {
    pub fn detected(student_id: impl Into<String>, responses: Vec<DetectedResponse>) -> Self {
        Self {
            student_id: student_id.into(),
            source: SheetSource::Detected(responses),
        }
    }

    pub fn scanned(student_id: impl Into<String>, image: Vec<u8>) -> Self {
        Self {
            student_id: student_id.into(),
            source: SheetSource::Scanned(image),
        }
    }
}

/// Progress reporting trait.
pub trait ProgressReporter: Send + Sync {
    fn on_sheet_start(&self, student_id: &str);
    fn on_sheet_complete(&self, outcome: &SheetOutcome);
    fn on_sheet_error(&self, failure: &SheetFailure);
    fn on_batch_complete(&self, total: usize, graded: usize, failed: usize, elapsed: Duration);
}

/// No-op progress reporter.
pub struct NoopReporter;

impl ProgressReporter for NoopReporter {
    fn on_sheet_start(&self, _: &str) {}
    fn on_sheet_complete(&self, _: &SheetOutcome) {}
    fn on_sheet_error(&self, _: &SheetFailure) {}
    fn on_batch_complete(&self, _: usize, _: usize, _: usize, _: Duration) {}
}

/// Grades batches of sheets for one paper at a time.
pub struct BatchGrader {
    repository: Arc<dyn AnswerKeyRepository>,
    store: Arc<dyn ResultStore>,
    detector: Option<Arc<dyn MarkDetector>>,
    engine: Arc<EvaluationEngine>,
    config: BatchConfig,
}

impl BatchGrader {
    pub fn new(
        repository: Arc<dyn AnswerKeyRepository>,
        store: Arc<dyn ResultStore>,
        engine: EvaluationEngine,
        config: BatchConfig,
    ) -> Self {
        Self {
            repository,
            store,
            detector: None,
            engine: Arc::new(engine),
            config,
        }
    }

    /// Attach a detector for [`SheetSource::Scanned`] sheets.
    pub fn with_detector(mut self, detector: Arc<dyn MarkDetector>) -> Self {
        self.detector = Some(detector);
        self
    }

    /// Grade every sheet of a batch against one paper.
    ///
    /// Fails as a whole only when the paper itself cannot be loaded or keyed;
    /// individual sheet failures are reported in [`BatchReport::failures`].
    pub async fn grade(
        &self,
        paper_id: &str,
        sheets: Vec<Sheet>,
        progress: &dyn ProgressReporter,
    ) -> Result<BatchReport> {
        let start = Instant::now();
        let run_id = Uuid::new_v4();

        let raw = self
            .repository
            .load_answer_keys(paper_id)
            .await
            .with_context(|| {
                format!(
                    "failed to load answer keys for paper '{paper_id}' from {}",
                    self.repository.name()
                )
            })?;
        let paper = Arc::new(
            self.engine
                .prepare(&raw)
                .with_context(|| format!("answer keys for paper '{paper_id}' are not usable"))?,
        );
        let prompts: Arc<Vec<QuestionPrompt>> =
            Arc::new(paper.keys().iter().map(QuestionPrompt::from_key).collect());

        tracing::info!(
            paper = paper_id,
            sheets = sheets.len(),
            questions = paper.question_count(),
            "grading batch"
        );

        let semaphore = Arc::new(Semaphore::new(self.config.parallelism.max(1)));
        let mut seen = HashSet::new();
        let mut failures = Vec::new();
        let mut futures = FuturesUnordered::new();
        let total = sheets.len();

        for sheet in sheets {
            // Two sheets for one student in one batch would race on the same record.
            if !seen.insert(sheet.student_id.clone()) {
                let failure = SheetFailure {
                    student_id: sheet.student_id,
                    kind: FailureKind::DuplicateSheet,
                    error: "student already has a sheet in this batch".into(),
                };
                progress.on_sheet_error(&failure);
                failures.push(failure);
                continue;
            }

            let job = SheetJob {
                paper_id: paper_id.to_string(),
                paper: Arc::clone(&paper),
                prompts: Arc::clone(&prompts),
                engine: Arc::clone(&self.engine),
                store: Arc::clone(&self.store),
                detector: self.detector.clone(),
                config: self.config.clone(),
            };
            let semaphore = Arc::clone(&semaphore);
            progress.on_sheet_start(&sheet.student_id);

            futures.push(async move {
                match semaphore.acquire_owned().await {
                    Ok(_permit) => job.run(sheet).await,
                    Err(_) => Err(SheetFailure {
                        student_id: sheet.student_id,
                        kind: FailureKind::Evaluation,
                        error: "semaphore closed".into(),
                    }),
                }
            });
        }

        let mut outcomes = Vec::new();
        while let Some(outcome) = futures.next().await {
            match outcome {
                Ok(sheet) => {
                    progress.on_sheet_complete(&sheet);
                    outcomes.push(sheet);
                }
                Err(failure) => {
                    tracing::error!(
                        student = %failure.student_id,
                        kind = ?failure.kind,
                        "sheet failed: {}",
                        failure.error
                    );
                    progress.on_sheet_error(&failure);
                    failures.push(failure);
                }
            }
        }

        outcomes.sort_by(|a, b| a.student_id.cmp(&b.student_id));
        failures.sort_by(|a, b| a.student_id.cmp(&b.student_id));

        let elapsed = start.elapsed();
        progress.on_batch_complete(total, outcomes.len(), failures.len(), elapsed);

        let statistics = compute_cohort_statistics(outcomes.iter().map(|o| &o.result));

        Ok(BatchReport {
            id: run_id,
            created_at: chrono::Utc::now(),
            paper: PaperSummary {
                id: paper_id.to_string(),
                question_count: paper.question_count(),
                max_score: paper.max_score(),
            },
            sheets: outcomes,
            failures,
            statistics,
            duration_ms: elapsed.as_millis() as u64,
        })
    }
}

/// Everything one sheet needs, owned so the future is independent of `self`.
struct SheetJob {
    paper_id: String,
    paper: Arc<PreparedPaper>,
    prompts: Arc<Vec<QuestionPrompt>>,
    engine: Arc<EvaluationEngine>,
    store: Arc<dyn ResultStore>,
    detector: Option<Arc<dyn MarkDetector>>,
    config: BatchConfig,
}

impl SheetJob {
    async fn run(self, sheet: Sheet) -> std::result::Result<SheetOutcome, SheetFailure> {
        let student_id = sheet.student_id;
        let fail = |kind: FailureKind, error: String| SheetFailure {
            student_id: student_id.clone(),
            kind,
            error,
        };

        let responses = match sheet.source {
            SheetSource::Detected(responses) => responses,
            SheetSource::Scanned(image) => {
                let Some(detector) = &self.detector else {
                    return Err(fail(
                        FailureKind::Detection,
                        "sheet is a scan but no detector is configured".into(),
                    ));
                };
                let request = DetectionRequest {
                    sheet_id: student_id.clone(),
                    image,
                    questions: self.prompts.as_ref().clone(),
                };
                detect_with_retry(detector.as_ref(), &request, &self.config)
                    .await
                    .map_err(|e| fail(FailureKind::Detection, format!("{e:#}")))?
            }
        };

        let evaluation = self
            .engine
            .evaluate_prepared(&self.paper, &responses)
            .map_err(|e| fail(FailureKind::Evaluation, e.to_string()))?;

        let record = SubmissionRecord::new(&self.paper_id, &student_id, evaluation)
            .map_err(|e| fail(FailureKind::Evaluation, e.to_string()))?;
        let save_outcome = self
            .store
            .save_result(&record)
            .await
            .map_err(|e| fail(FailureKind::Storage, format!("{e:#}")))?;

        tracing::debug!(
            student = %student_id,
            token = %record.evaluation_token,
            outcome = ?save_outcome,
            "sheet stored"
        );

        Ok(SheetOutcome {
            student_id: student_id.clone(),
            evaluation_token: record.evaluation_token,
            save_outcome,
            result: record.result,
            diagnostics: record.diagnostics,
        })
    }
}

/// Call the detector, retrying transient failures with exponential backoff.
async fn detect_with_retry(
    detector: &dyn MarkDetector,
    request: &DetectionRequest,
    config: &BatchConfig,
) -> Result<Vec<DetectedResponse>> {
    let mut last_error = None;
    let mut retry_delay = config.retry_delay;
    for retry in 0..=config.max_detection_retries {
        if retry > 0 {
            tokio::time::sleep(retry_delay).await;
            retry_delay = (retry_delay * 2).min(Duration::from_secs(60));
        }
        match detector.detect(request).await {
            Ok(responses) => return Ok(responses),
            Err(e) => {
                if let Some(collab) = e.downcast_ref::<CollaboratorError>() {
                    if collab.is_permanent() {
                        return Err(e);
                    }
                    if let Some(ms) = collab.retry_after_ms() {
                        retry_delay = Duration::from_millis(ms);
                    }
                }
                tracing::warn!(
                    detector = detector.name(),
                    sheet = %request.sheet_id,
                    attempt = retry + 1,
                    "detection failed: {e:#}"
                );
                last_error = Some(e);
            }
        }
    }

    Err(last_error.unwrap_or_else(|| anyhow::anyhow!("detection failed")))
}
