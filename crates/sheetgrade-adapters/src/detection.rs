//! Replay mark detector.
//!
//! Serves detections that were captured earlier (one JSON file per sheet)
//! instead of reading images. Used for re-grading archived batches and for
//! exercising the pipeline's detector path in tests.

use std::collections::{HashMap, VecDeque};
use std::path::Path;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex;

use anyhow::{Context, Result};
use async_trait::async_trait;

use sheetgrade_core::error::CollaboratorError;
use sheetgrade_core::model::DetectedResponse;
use sheetgrade_core::parser::load_response_sheet;
use sheetgrade_core::traits::{DetectionRequest, MarkDetector};

/// A detector that answers from recorded readings keyed by sheet id.
#[derive(Default)]
pub struct ReplayDetector {
    recordings: HashMap<String, Vec<DetectedResponse>>,
    /// Failures returned before any recording, oldest first.
    scripted_failures: Mutex<VecDeque<CollaboratorError>>,
    call_count: AtomicU32,
    last_request: Mutex<Option<DetectionRequest>>,
}

impl ReplayDetector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a recording for one sheet.
    pub fn with_recording(
        mut self,
        sheet_id: impl Into<String>,
        responses: Vec<DetectedResponse>,
    ) -> Self {
        self.recordings.insert(sheet_id.into(), responses);
        self
    }

    /// Make the next calls fail with these errors, in order.
    pub fn with_failures(self, failures: impl IntoIterator<Item = CollaboratorError>) -> Self {
        if let Ok(mut queue) = self.scripted_failures.lock() {
            queue.extend(failures);
        }
        self
    }

    /// Load every `*.json` response sheet in a directory.
    ///
    /// The sheet id is the file's `student_id`, or its stem when absent.
    pub fn from_directory(dir: &Path) -> Result<Self> {
        let mut detector = Self::new();
        let entries = std::fs::read_dir(dir)
            .with_context(|| format!("failed to read directory: {}", dir.display()))?;
        for entry in entries {
            let path = entry?.path();
            if !path.extension().is_some_and(|ext| ext == "json") {
                continue;
            }
            let sheet = load_response_sheet(&path)?;
            if let Some(id) = sheet.student_id {
                detector.recordings.insert(id, sheet.responses);
            }
        }
        Ok(detector)
    }

    pub fn sheet_ids(&self) -> impl Iterator<Item = &str> {
        self.recordings.keys().map(String::as_str)
    }

    /// Number of calls made to this detector.
    pub fn call_count(&self) -> u32 {
        self.call_count.load(Ordering::Relaxed)
    }

    /// The last request received.
    pub fn last_request(&self) -> Option<DetectionRequest> {
        self.last_request.lock().ok().and_then(|r| r.clone())
    }
}

#[async_trait]
impl MarkDetector for ReplayDetector {
    fn name(&self) -> &str {
        "replay"
    }

    async fn detect(&self, request: &DetectionRequest) -> Result<Vec<DetectedResponse>> {
        self.call_count.fetch_add(1, Ordering::Relaxed);
        if let Ok(mut last) = self.last_request.lock() {
            *last = Some(request.clone());
        }

        let scripted = self
            .scripted_failures
            .lock()
            .ok()
            .and_then(|mut queue| queue.pop_front());
        if let Some(error) = scripted {
            return Err(error.into());
        }

        self.recordings
            .get(&request.sheet_id)
            .cloned()
            .ok_or_else(|| {
                CollaboratorError::NotFound(format!("no recording for sheet '{}'", request.sheet_id))
                    .into()
            })
    }
}
