//! In-memory repository and store.
//!
//! Useful for tests and for one-shot grading where nothing is persisted.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;

use sheetgrade_core::error::CollaboratorError;
use sheetgrade_core::normalizer::RawQuestion;
use sheetgrade_core::parser::Paper;
use sheetgrade_core::traits::{AnswerKeyRepository, ResultStore, SaveOutcome, SubmissionRecord};

use crate::error::StoreError;

/// Answer keys held in a map keyed by paper id.
#[derive(Default)]
pub struct MemoryRepository {
    papers: Mutex<HashMap<String, Vec<RawQuestion>>>,
}

impl MemoryRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert.
    pub fn with_paper(self, paper_id: impl Into<String>, questions: Vec<RawQuestion>) -> Self {
        if let Ok(mut papers) = self.papers.lock() {
            papers.insert(paper_id.into(), questions);
        }
        self
    }

    /// Create a repository holding parsed papers.
    pub fn from_papers(papers: impl IntoIterator<Item = Paper>) -> Self {
        papers
            .into_iter()
            .fold(Self::new(), |repo, p| repo.with_paper(p.id, p.questions))
    }

    /// Add or replace a paper's questions.
    pub fn insert(
        &self,
        paper_id: impl Into<String>,
        questions: Vec<RawQuestion>,
    ) -> Result<(), StoreError> {
        self.papers
            .lock()
            .map_err(|_| StoreError::Poisoned("memory repository"))?
            .insert(paper_id.into(), questions);
        Ok(())
    }
}

#[async_trait]
impl AnswerKeyRepository for MemoryRepository {
    fn name(&self) -> &str {
        "memory"
    }

    async fn load_answer_keys(&self, paper_id: &str) -> anyhow::Result<Vec<RawQuestion>> {
        let papers = self
            .papers
            .lock()
            .map_err(|_| StoreError::Poisoned("memory repository"))?;
        match papers.get(paper_id) {
            Some(questions) => Ok(questions.clone()),
            None => Err(CollaboratorError::NotFound(format!("paper '{paper_id}'")).into()),
        }
    }
}

/// Submission records held in a map keyed by `(paper_id, student_id)`.
#[derive(Default)]
pub struct MemoryStore {
    records: Mutex<HashMap<(String, String), SubmissionRecord>>,
    writes: AtomicU32,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of records that were actually written (inserts and replacements).
    pub fn write_count(&self) -> u32 {
        self.writes.load(Ordering::Relaxed)
    }

    /// All records of one paper, keyed by student id.
    pub fn records_for(
        &self,
        paper_id: &str,
    ) -> Result<BTreeMap<String, SubmissionRecord>, StoreError> {
        let records = self
            .records
            .lock()
            .map_err(|_| StoreError::Poisoned("memory store"))?;
        Ok(records
            .iter()
            .filter(|((paper, _), _)| paper == paper_id)
            .map(|((_, student), record)| (student.clone(), record.clone()))
            .collect())
    }

    pub fn len(&self) -> usize {
        self.records.lock().map(|r| r.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl ResultStore for MemoryStore {
    fn name(&self) -> &str {
        "memory"
    }

    async fn save_result(&self, record: &SubmissionRecord) -> anyhow::Result<SaveOutcome> {
        let mut records = self
            .records
            .lock()
            .map_err(|_| StoreError::Poisoned("memory store"))?;
        let key = (record.paper_id.clone(), record.student_id.clone());
        let outcome = SaveOutcome::decide(
            records.get(&key).map(|r| r.evaluation_token),
            record.evaluation_token,
        );
        if outcome.wrote() {
            records.insert(key, record.clone());
            self.writes.fetch_add(1, Ordering::Relaxed);
        }
        Ok(outcome)
    }

    async fn load_result(
        &self,
        paper_id: &str,
        student_id: &str,
    ) -> anyhow::Result<Option<SubmissionRecord>> {
        let records = self
            .records
            .lock()
            .map_err(|_| StoreError::Poisoned("memory store"))?;
        Ok(records
            .get(&(paper_id.to_string(), student_id.to_string()))
            .cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sheetgrade_core::engine::EvaluationEngine;
    use sheetgrade_core::model::DetectedResponse;

    fn questions() -> Vec<RawQuestion> {
        vec![RawQuestion {
            number: 1,
            correct_answer: Some("C".into()),
            ..Default::default()
        }]
    }

    fn record(student: &str, selected: &str) -> SubmissionRecord {
        let eval = EvaluationEngine::default()
            .evaluate(&questions(), &[DetectedResponse::choice(1, [selected])])
            .unwrap();
        SubmissionRecord::new("quiz", student, eval).unwrap()
    }

    #[tokio::test]
    async fn repository_lookup() {
        let repo = MemoryRepository::new().with_paper("quiz", questions());
        assert_eq!(repo.load_answer_keys("quiz").await.unwrap().len(), 1);

        let err = repo.load_answer_keys("final").await.unwrap_err();
        let collab = err.downcast_ref::<CollaboratorError>().unwrap();
        assert!(collab.is_permanent());
    }

    #[tokio::test]
    async fn upsert_is_idempotent() {
        let store = MemoryStore::new();
        let first = record("ana", "C");

        assert_eq!(store.save_result(&first).await.unwrap(), SaveOutcome::Inserted);
        assert_eq!(store.save_result(&record("ana", "C")).await.unwrap(), SaveOutcome::Unchanged);
        assert_eq!(store.write_count(), 1);

        let regraded = record("ana", "B");
        assert_eq!(
            store.save_result(&regraded).await.unwrap(),
            SaveOutcome::Replaced {
                previous_token: first.evaluation_token
            }
        );
        assert_eq!(store.len(), 1);

        let loaded = store.load_result("quiz", "ana").await.unwrap().unwrap();
        assert_eq!(loaded.result.total_score, 0.0);
        assert!(store.load_result("quiz", "ben").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn diagnostics_only_regrade_replaces_record() {
        let store = MemoryStore::new();
        let first = record("ana", "C");
        store.save_result(&first).await.unwrap();

        // Same score, but the sheet now carries a mark for a question with no key.
        let eval = EvaluationEngine::default()
            .evaluate(
                &questions(),
                &[
                    DetectedResponse::choice(1, ["C"]),
                    DetectedResponse::choice(9, ["A"]),
                ],
            )
            .unwrap();
        let flagged = SubmissionRecord::new("quiz", "ana", eval).unwrap();
        assert_eq!(flagged.result, first.result);

        assert_eq!(
            store.save_result(&flagged).await.unwrap(),
            SaveOutcome::Replaced {
                previous_token: first.evaluation_token
            }
        );
        let loaded = store.load_result("quiz", "ana").await.unwrap().unwrap();
        assert_eq!(loaded.diagnostics.orphan_responses.len(), 1);
    }

    #[tokio::test]
    async fn records_for_filters_by_paper() {
        let store = MemoryStore::new();
        store.save_result(&record("ana", "C")).await.unwrap();
        store.save_result(&record("ben", "A")).await.unwrap();

        let records = store.records_for("quiz").unwrap();
        assert_eq!(records.keys().cloned().collect::<Vec<_>>(), vec!["ana", "ben"]);
        assert!(store.records_for("other").unwrap().is_empty());
    }
}
