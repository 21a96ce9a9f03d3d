//! sheetgrade-report: HTML rendering of graded submissions and batches.

pub mod html;

pub use html::{generate_batch_html, generate_submission_html, write_html};
