//! The `sheetgrade validate` command.

use std::path::PathBuf;

use anyhow::Result;

use sheetgrade_core::parser::{self, Severity};

pub fn execute(key_path: PathBuf) -> Result<()> {
    let papers = if key_path.is_dir() {
        parser::load_paper_directory(&key_path)?
    } else {
        vec![parser::parse_paper(&key_path)?]
    };

    let mut errors = 0;
    let mut warnings = 0;

    for paper in &papers {
        println!("Paper: {} ({} questions)", paper.name, paper.questions.len());

        for issue in parser::validate_paper(paper) {
            let prefix = issue
                .question_number
                .map(|n| format!("  [Q{n}]"))
                .unwrap_or_else(|| "  ".to_string());
            let label = match issue.severity {
                Severity::Error => {
                    errors += 1;
                    "ERROR"
                }
                Severity::Warning => {
                    warnings += 1;
                    "WARNING"
                }
            };
            println!("{prefix} {label}: {}", issue.message);
        }
    }

    if errors > 0 {
        anyhow::bail!("{errors} error(s) and {warnings} warning(s) found");
    }
    if warnings == 0 {
        println!("All papers valid.");
    } else {
        println!("\n{warnings} warning(s) found.");
    }

    Ok(())
}
