//! sheetgrade-core: answer evaluation engine, collaborator traits, and statistics.
//!
//! Answer keys are normalized once, detected responses are matched to them,
//! each question is scored in isolation, and the results are aggregated into
//! a graded submission. Everything that touches the outside world sits
//! behind the traits in [`traits`].

pub mod engine;
pub mod error;
pub mod grading;
pub mod matcher;
pub mod model;
pub mod normalizer;
pub mod parser;
pub mod pipeline;
pub mod report;
pub mod scorer;
pub mod statistics;
pub mod traits;
