//! sheetgrade-adapters: collaborator implementations.
//!
//! Implements the `AnswerKeyRepository`, `ResultStore`, and `MarkDetector`
//! traits from `sheetgrade-core` over memory and plain directories, and loads
//! the `sheetgrade.toml` configuration.

pub mod config;
pub mod detection;
pub mod error;
pub mod file;
pub mod memory;

pub use config::{load_config, load_config_from, SheetgradeConfig};
pub use detection::ReplayDetector;
pub use error::StoreError;
pub use file::{DirectoryRepository, DirectoryStore};
pub use memory::{MemoryRepository, MemoryStore};
