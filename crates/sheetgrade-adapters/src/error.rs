//! Store error types.

use std::path::PathBuf;

use thiserror::Error;

/// Errors raised by the bundled repositories and stores.
#[derive(Debug, Error)]
pub enum StoreError {
    /// An id that cannot safely become a file name.
    #[error("invalid {kind} id: {id:?}")]
    InvalidId { kind: &'static str, id: String },

    #[error("I/O error at {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A stored record that no longer parses.
    #[error("corrupt record at {}: {source}", path.display())]
    Corrupt {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    /// Another thread panicked while holding the store lock.
    #[error("{0} lock poisoned")]
    Poisoned(&'static str),
}

impl StoreError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        StoreError::Io {
            path: path.into(),
            source,
        }
    }
}

/// Reject ids that would escape or collide inside a store directory.
pub(crate) fn check_id(kind: &'static str, id: &str) -> Result<(), StoreError> {
    let bad = id.trim().is_empty()
        || id.starts_with('.')
        || id.contains(['/', '\\', '\0'])
        || id.contains("..");
    if bad {
        return Err(StoreError::InvalidId {
            kind,
            id: id.to_string(),
        });
    }
    Ok(())
}
