//! End-to-end batch grading over the fixture paper and submissions.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use sheetgrade_adapters::{
    DirectoryRepository, DirectoryStore, MemoryRepository, MemoryStore, ReplayDetector,
};
use sheetgrade_core::engine::EvaluationEngine;
use sheetgrade_core::error::CollaboratorError;
use sheetgrade_core::model::QuestionStatus;
use sheetgrade_core::parser::{load_response_sheet, parse_paper, parse_paper_str};
use sheetgrade_core::pipeline::{BatchConfig, BatchGrader, NoopReporter, Sheet};
use sheetgrade_core::report::FailureKind;
use sheetgrade_core::traits::{ResultStore, SaveOutcome};

fn fixtures() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("../../fixtures")
}

fn fast_config() -> BatchConfig {
    BatchConfig {
        parallelism: 2,
        max_detection_retries: 3,
        retry_delay: Duration::from_millis(1),
    }
}

fn fixture_sheets() -> Vec<Sheet> {
    ["alice", "bob", "carol"]
        .iter()
        .map(|name| {
            let path = fixtures().join("submissions").join(format!("{name}.json"));
            let sheet = load_response_sheet(&path).unwrap();
            Sheet::detected(sheet.student_id.unwrap(), sheet.responses)
        })
        .collect()
}

fn midterm_repository() -> MemoryRepository {
    let paper = parse_paper(&fixtures().join("midterm.toml")).unwrap();
    MemoryRepository::from_papers([paper])
}

#[tokio::test]
async fn grades_fixture_cohort() {
    let store = Arc::new(MemoryStore::new());
    let grader = BatchGrader::new(
        Arc::new(midterm_repository()),
        store.clone(),
        EvaluationEngine::default(),
        fast_config(),
    );

    let report = grader
        .grade("midterm", fixture_sheets(), &NoopReporter)
        .await
        .unwrap();

    assert!(report.failures.is_empty());
    assert_eq!(report.paper.question_count, 4);
    assert_eq!(report.paper.max_score, 10.0);

    let students: Vec<_> = report.sheets.iter().map(|s| s.student_id.as_str()).collect();
    assert_eq!(students, vec!["alice", "bob", "carol"]);

    let alice = report.sheet("alice").unwrap();
    assert_eq!(alice.result.total_score, 10.0);
    assert_eq!(alice.result.grade, "A+");
    assert!(alice.diagnostics.is_clean());

    let bob = report.sheet("bob").unwrap();
    assert_eq!(bob.result.total_score, 2.0);
    assert_eq!(bob.result.grade, "F");
    assert_eq!(bob.diagnostics.unanswered_questions, vec![4]);
    assert_eq!(
        bob.result.question(4).unwrap().status,
        QuestionStatus::Unanswered
    );

    let carol = report.sheet("carol").unwrap();
    assert_eq!(carol.result.total_score, 6.0);
    assert_eq!(carol.result.percentage, 60.0);
    assert_eq!(carol.result.grade, "B");
    assert_eq!(carol.diagnostics.low_confidence_questions, vec![4]);
    assert_eq!(carol.diagnostics.orphan_responses.len(), 1);
    assert_eq!(carol.diagnostics.orphan_responses[0].question_number, 7);

    assert_eq!(report.statistics.submissions, 3);
    assert!((report.statistics.mean_percentage - 60.0).abs() < 1e-9);
    assert_eq!(report.statistics.min_percentage, 20.0);
    assert_eq!(report.statistics.max_percentage, 100.0);
    assert_eq!(report.statistics.per_question.len(), 4);

    assert_eq!(store.len(), 3);
    assert_eq!(store.write_count(), 3);
}

#[tokio::test]
async fn regrading_after_key_fix_replaces_changed_records() {
    let store = Arc::new(MemoryStore::new());
    let engine = EvaluationEngine::default;

    let baseline = BatchGrader::new(
        Arc::new(midterm_repository()),
        store.clone(),
        engine(),
        fast_config(),
    )
    .grade("midterm", fixture_sheets(), &NoopReporter)
    .await
    .unwrap();

    // Unchanged inputs: nothing is rewritten.
    let again = BatchGrader::new(
        Arc::new(midterm_repository()),
        store.clone(),
        engine(),
        fast_config(),
    )
    .grade("midterm", fixture_sheets(), &NoopReporter)
    .await
    .unwrap();
    assert!(again
        .sheets
        .iter()
        .all(|s| s.save_outcome == SaveOutcome::Unchanged));
    assert_eq!(store.write_count(), 3);

    // Question 4 was keyed wrong; the correct answer is B.
    let path = fixtures().join("midterm.toml");
    let fixed = std::fs::read_to_string(&path)
        .unwrap()
        .replace("correct_answer = \"A\"", "correct_answer = \"B\"");
    let paper = parse_paper_str(&fixed, &path).unwrap();

    let regraded = BatchGrader::new(
        Arc::new(MemoryRepository::from_papers([paper])),
        store.clone(),
        engine(),
        fast_config(),
    )
    .grade("midterm", fixture_sheets(), &NoopReporter)
    .await
    .unwrap();

    let outcome = |student: &str| regraded.sheet(student).unwrap().save_outcome;
    assert!(matches!(outcome("alice"), SaveOutcome::Replaced { .. }));
    assert_eq!(outcome("bob"), SaveOutcome::Unchanged);
    assert!(matches!(outcome("carol"), SaveOutcome::Replaced { .. }));
    assert_eq!(store.write_count(), 5);

    let stored = store.records_for("midterm").unwrap();
    assert_eq!(stored["carol"].result.total_score, 8.0);

    let diff = regraded.compare(&baseline, 0.5).unwrap();
    assert_eq!(diff.dropped.len(), 1);
    assert_eq!(diff.dropped[0].student_id, "alice");
    assert_eq!(diff.raised.len(), 1);
    assert_eq!(diff.raised[0].student_id, "carol");
    assert_eq!(diff.raised[0].current_percentage, 80.0);
    assert_eq!(diff.unchanged, 1);
}

#[tokio::test]
async fn scanned_sheets_go_through_the_detector() {
    let detector = Arc::new(
        ReplayDetector::from_directory(&fixtures().join("submissions"))
            .unwrap()
            .with_failures([
                CollaboratorError::Unavailable("scanner warming up".into()),
                CollaboratorError::RateLimited { retry_after_ms: 1 },
            ]),
    );
    let store = Arc::new(MemoryStore::new());
    let grader = BatchGrader::new(
        Arc::new(midterm_repository()),
        store.clone(),
        EvaluationEngine::default(),
        fast_config(),
    )
    .with_detector(detector.clone());

    let sheets = ["alice", "bob", "carol", "dave"]
        .iter()
        .map(|name| Sheet::scanned(*name, vec![0xFF, 0xD8]))
        .collect();
    let report = grader.grade("midterm", sheets, &NoopReporter).await.unwrap();

    assert_eq!(report.sheets.len(), 3);
    assert_eq!(report.sheet("carol").unwrap().result.total_score, 6.0);

    // No recording for dave: a permanent error, not retried.
    assert_eq!(report.failures.len(), 1);
    assert_eq!(report.failures[0].student_id, "dave");
    assert_eq!(report.failures[0].kind, FailureKind::Detection);

    // Four sheets plus the two scripted transient failures.
    assert_eq!(detector.call_count(), 6);
    let request = detector.last_request().unwrap();
    assert_eq!(request.questions.len(), 4);
    assert_eq!(request.questions[1].option_ids, vec!["A", "B", "C", "D"]);
}

#[tokio::test]
async fn duplicate_sheets_in_one_batch_are_rejected() {
    let mut sheets = fixture_sheets();
    sheets.push(Sheet::detected("bob", vec![]));

    let grader = BatchGrader::new(
        Arc::new(midterm_repository()),
        Arc::new(MemoryStore::new()),
        EvaluationEngine::default(),
        fast_config(),
    );
    let report = grader.grade("midterm", sheets, &NoopReporter).await.unwrap();

    assert_eq!(report.sheets.len(), 3);
    assert_eq!(report.failures.len(), 1);
    assert_eq!(report.failures[0].kind, FailureKind::DuplicateSheet);
    assert_eq!(report.sheet("bob").unwrap().result.total_score, 2.0);
}

#[tokio::test]
async fn unknown_paper_fails_the_batch() {
    let grader = BatchGrader::new(
        Arc::new(midterm_repository()),
        Arc::new(MemoryStore::new()),
        EvaluationEngine::default(),
        fast_config(),
    );
    let err = grader
        .grade("final", fixture_sheets(), &NoopReporter)
        .await
        .unwrap_err();
    assert!(format!("{err:#}").contains("final"));
}

#[tokio::test]
async fn directory_adapters_round_trip() {
    let results = tempfile::tempdir().unwrap();
    let store = Arc::new(DirectoryStore::new(results.path()));
    let grader = BatchGrader::new(
        Arc::new(DirectoryRepository::new(fixtures())),
        store.clone(),
        EvaluationEngine::default(),
        fast_config(),
    );

    let report = grader
        .grade("midterm", fixture_sheets(), &NoopReporter)
        .await
        .unwrap();
    assert!(report.failures.is_empty());
    assert!(results.path().join("midterm").join("alice.json").exists());

    let loaded = store.load_result("midterm", "carol").await.unwrap().unwrap();
    assert_eq!(
        loaded.evaluation_token,
        report.sheet("carol").unwrap().evaluation_token
    );
    assert_eq!(loaded.result.grade, "B");

    let second = grader
        .grade("midterm", fixture_sheets(), &NoopReporter)
        .await
        .unwrap();
    assert!(second
        .sheets
        .iter()
        .all(|s| s.save_outcome == SaveOutcome::Unchanged));
}
