//! Directory-backed repository and store.
//!
//! Layout:
//!
//! ```text
//! papers/<paper_id>.toml                 answer keys
//! results/<paper_id>/<student_id>.json   one record per submission
//! ```

use std::path::{Path, PathBuf};

use anyhow::Context;
use async_trait::async_trait;
use tokio::sync::Mutex;

use sheetgrade_core::error::CollaboratorError;
use sheetgrade_core::normalizer::RawQuestion;
use sheetgrade_core::parser::{load_paper_directory, parse_paper_str};
use sheetgrade_core::traits::{AnswerKeyRepository, ResultStore, SaveOutcome, SubmissionRecord};

use crate::error::{check_id, StoreError};

// ---------------------------------------------------------------------------
// Repository
// ---------------------------------------------------------------------------

/// Reads papers from a directory of TOML files.
///
/// `<root>/<paper_id>.toml` is tried first; otherwise every paper under the
/// root is scanned for a matching `[paper] id`.
pub struct DirectoryRepository {
    root: PathBuf,
}

impl DirectoryRepository {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

#[async_trait]
impl AnswerKeyRepository for DirectoryRepository {
    fn name(&self) -> &str {
        "directory"
    }

    async fn load_answer_keys(&self, paper_id: &str) -> anyhow::Result<Vec<RawQuestion>> {
        check_id("paper", paper_id)?;

        let direct = self.root.join(format!("{paper_id}.toml"));
        match tokio::fs::read_to_string(&direct).await {
            Ok(content) => {
                let paper = parse_paper_str(&content, &direct)?;
                if paper.id != paper_id {
                    tracing::warn!(
                        file = %direct.display(),
                        declared = %paper.id,
                        "paper file name and id differ"
                    );
                }
                return Ok(paper.questions);
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(StoreError::io(direct, e).into()),
        }

        let root = self.root.clone();
        let papers = tokio::task::spawn_blocking(move || load_paper_directory(&root))
            .await
            .context("paper scan task failed")??;
        papers
            .into_iter()
            .find(|p| p.id == paper_id)
            .map(|p| p.questions)
            .ok_or_else(|| {
                CollaboratorError::NotFound(format!(
                    "paper '{paper_id}' in {}",
                    self.root.display()
                ))
                .into()
            })
    }
}

// ---------------------------------------------------------------------------
// Store
// ---------------------------------------------------------------------------

/// Writes one JSON file per `(paper_id, student_id)`.
///
/// Writes go to a temporary file that is then renamed over the record, so a
/// reader never sees a half-written record.
pub struct DirectoryStore {
    root: PathBuf,
    // Serializes read-decide-write so concurrent saves in one process cannot interleave.
    write_lock: Mutex<()>,
}

impl DirectoryStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn record_path(&self, paper_id: &str, student_id: &str) -> Result<PathBuf, StoreError> {
        check_id("paper", paper_id)?;
        check_id("student", student_id)?;
        Ok(self.root.join(paper_id).join(format!("{student_id}.json")))
    }

    async fn read_record(path: &Path) -> Result<Option<SubmissionRecord>, StoreError> {
        match tokio::fs::read(path).await {
            Ok(bytes) => serde_json::from_slice(&bytes)
                .map(Some)
                .map_err(|source| StoreError::Corrupt {
                    path: path.to_path_buf(),
                    source,
                }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(StoreError::io(path, e)),
        }
    }
}

#[async_trait]
impl ResultStore for DirectoryStore {
    fn name(&self) -> &str {
        "directory"
    }

    async fn save_result(&self, record: &SubmissionRecord) -> anyhow::Result<SaveOutcome> {
        let path = self.record_path(&record.paper_id, &record.student_id)?;
        let _guard = self.write_lock.lock().await;

        // A corrupt previous record is replaced rather than blocking the new one.
        let existing = match Self::read_record(&path).await {
            Ok(existing) => existing.map(|r| r.evaluation_token),
            Err(StoreError::Corrupt { path, source }) => {
                tracing::warn!(path = %path.display(), "replacing corrupt record: {source}");
                None
            }
            Err(e) => return Err(e.into()),
        };

        let outcome = SaveOutcome::decide(existing, record.evaluation_token);
        if !outcome.wrote() {
            return Ok(outcome);
        }

        let dir = path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| self.root.clone());
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|e| StoreError::io(&dir, e))?;

        let json = serde_json::to_vec_pretty(record).context("failed to serialize record")?;
        let tmp = dir.join(format!(".{}.json.tmp", record.student_id));
        tokio::fs::write(&tmp, json)
            .await
            .map_err(|e| StoreError::io(&tmp, e))?;
        tokio::fs::rename(&tmp, &path)
            .await
            .map_err(|e| StoreError::io(&path, e))?;

        tracing::debug!(path = %path.display(), ?outcome, "record saved");
        Ok(outcome)
    }

    async fn load_result(
        &self,
        paper_id: &str,
        student_id: &str,
    ) -> anyhow::Result<Option<SubmissionRecord>> {
        let path = self.record_path(paper_id, student_id)?;
        Ok(Self::read_record(&path).await?)
    }
}
