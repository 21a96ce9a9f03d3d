//! Paper and response-sheet parsers.
//!
//! Papers are TOML files with a `[paper]` header and `[[questions]]` records
//! in any of the stored answer-key shapes. Response sheets are the mark
//! detector's JSON output.

use std::collections::HashSet;
use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::model::{
    canonical_option_id, DetectedResponse, KeyAnswer, QuestionFormat, QuestionNumber,
};
use crate::normalizer::{normalize_question, RawQuestion};

/// A paper with its question records, not yet normalized.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Paper {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub questions: Vec<RawQuestion>,
}

/// Intermediate TOML structure for paper files.
#[derive(Debug, Deserialize)]
struct TomlPaperFile {
    paper: TomlPaperHeader,
    #[serde(default)]
    questions: Vec<RawQuestion>,
}

#[derive(Debug, Deserialize)]
struct TomlPaperHeader {
    id: String,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    description: String,
}

/// Parse a single paper file.
pub fn parse_paper(path: &Path) -> Result<Paper> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read paper file: {}", path.display()))?;

    parse_paper_str(&content, path)
}

/// Parse paper TOML from a string.
pub fn parse_paper_str(content: &str, source_path: &Path) -> Result<Paper> {
    let parsed: TomlPaperFile = toml::from_str(content)
        .with_context(|| format!("failed to parse TOML: {}", source_path.display()))?;

    if parsed.paper.id.trim().is_empty() {
        anyhow::bail!("paper id is empty in {}", source_path.display());
    }

    Ok(Paper {
        name: parsed.paper.name.unwrap_or_else(|| parsed.paper.id.clone()),
        id: parsed.paper.id,
        description: parsed.paper.description,
        questions: parsed.questions,
    })
}

/// Recursively load all `.toml` papers from a directory.
///
/// Files that fail to parse are skipped with a warning.
pub fn load_paper_directory(dir: &Path) -> Result<Vec<Paper>> {
    let mut papers = Vec::new();

    if !dir.is_dir() {
        anyhow::bail!("not a directory: {}", dir.display());
    }

    let mut entries = std::fs::read_dir(dir)
        .with_context(|| format!("failed to read directory: {}", dir.display()))?
        .collect::<std::io::Result<Vec<_>>>()?;
    entries.sort_by_key(|e| e.path());

    for entry in entries {
        let path = entry.path();
        if path.is_dir() {
            papers.extend(load_paper_directory(&path)?);
        } else if path.extension().is_some_and(|ext| ext == "toml") {
            match parse_paper(&path) {
                Ok(paper) => papers.push(paper),
                Err(e) => tracing::warn!("skipping {}: {:#}", path.display(), e),
            }
        }
    }

    Ok(papers)
}

// ---------------------------------------------------------------------------
// Response sheets
// ---------------------------------------------------------------------------

/// One student's detected responses.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResponseSheet {
    /// Absent when the file is a bare array; callers fall back to the file stem.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub student_id: Option<String>,
    pub responses: Vec<DetectedResponse>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum SheetShape {
    Bare(Vec<DetectedResponse>),
    Wrapped(ResponseSheet),
}

/// Parse detector output: either a JSON array of responses or an object with
/// `student_id` and `responses`.
pub fn parse_responses_json(content: &str) -> Result<ResponseSheet> {
    let shape: SheetShape =
        serde_json::from_str(content).context("failed to parse response sheet JSON")?;
    Ok(match shape {
        SheetShape::Bare(responses) => ResponseSheet {
            student_id: None,
            responses,
        },
        SheetShape::Wrapped(sheet) => sheet,
    })
}

/// Load a response sheet, defaulting the student id to the file stem.
pub fn load_response_sheet(path: &Path) -> Result<ResponseSheet> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read response sheet: {}", path.display()))?;
    let mut sheet = parse_responses_json(&content)
        .with_context(|| format!("in {}", path.display()))?;
    if sheet.student_id.is_none() {
        sheet.student_id = path
            .file_stem()
            .map(|stem| stem.to_string_lossy().into_owned());
    }
    Ok(sheet)
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    /// The paper cannot be graded as-is.
    Error,
    /// Gradable, but probably not what the author meant.
    Warning,
}

/// A finding from paper validation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationIssue {
    /// The question (if applicable).
    pub question_number: Option<QuestionNumber>,
    pub severity: Severity,
    pub message: String,
}

impl ValidationIssue {
    fn error(question_number: Option<QuestionNumber>, message: impl Into<String>) -> Self {
        Self {
            question_number,
            severity: Severity::Error,
            message: message.into(),
        }
    }

    fn warning(question_number: QuestionNumber, message: impl Into<String>) -> Self {
        Self {
            question_number: Some(question_number),
            severity: Severity::Warning,
            message: message.into(),
        }
    }
}

/// Validate every question of a paper.
///
/// Normalization failures and duplicate numbers are errors; suspicious but
/// gradable records are warnings.
pub fn validate_paper(paper: &Paper) -> Vec<ValidationIssue> {
    let mut issues = Vec::new();

    if paper.questions.is_empty() {
        issues.push(ValidationIssue::error(None, "paper has no questions"));
    }

    let mut seen = HashSet::new();
    for raw in &paper.questions {
        if !seen.insert(raw.number) {
            issues.push(ValidationIssue::error(
                Some(raw.number),
                format!("duplicate question number {}", raw.number),
            ));
        }

        let key = match normalize_question(raw) {
            Ok(key) => key,
            Err(e) => {
                issues.push(ValidationIssue::error(Some(raw.number), e.to_string()));
                continue;
            }
        };

        if let KeyAnswer::SingleChoice {
            correct_option_ids, ..
        } = &key.answer
        {
            if correct_option_ids.len() > 1 {
                issues.push(ValidationIssue::warning(
                    raw.number,
                    format!(
                        "single_choice question lists {} correct answers; only {} is scored",
                        correct_option_ids.len(),
                        correct_option_ids[0]
                    ),
                ));
            }
        }

        if !raw.option_weights.is_empty() {
            let correct: HashSet<String> = match &key.answer {
                KeyAnswer::MultiChoice {
                    correct_option_ids, ..
                } => correct_option_ids.iter().cloned().collect(),
                _ => HashSet::new(),
            };
            for id in raw.option_weights.keys() {
                if !correct.contains(&canonical_option_id(id)) {
                    issues.push(ValidationIssue::warning(
                        raw.number,
                        format!("weight for option {id} is ignored; it is not a correct multi_choice option"),
                    ));
                }
            }
        }

        if key.format() == QuestionFormat::FillInBlank && raw.options.is_some() {
            issues.push(ValidationIssue::warning(
                raw.number,
                "options are ignored on a fill_in_blank question",
            ));
        }
        if key.format() == QuestionFormat::FillInBlank
            && (raw.correct_answer.is_some() || raw.correct_answers.is_some())
        {
            issues.push(ValidationIssue::warning(
                raw.number,
                "correct answers are ignored on a fill_in_blank question",
            ));
        }
        if key.is_choice() && !raw.blank_answers.is_empty() {
            issues.push(ValidationIssue::warning(
                raw.number,
                format!("blank answers are ignored on a {} question", key.format()),
            ));
        }
    }

    issues
}
