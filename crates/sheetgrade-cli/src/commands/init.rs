//! The `sheetgrade init` command.

use std::path::Path;

use anyhow::Result;

pub fn execute() -> Result<()> {
    if Path::new("sheetgrade.toml").exists() {
        println!("sheetgrade.toml already exists, skipping.");
    } else {
        std::fs::write("sheetgrade.toml", SAMPLE_CONFIG)?;
        println!("Created sheetgrade.toml");
    }

    std::fs::create_dir_all("papers")?;
    let example_path = Path::new("papers/example.toml");
    if example_path.exists() {
        println!("papers/example.toml already exists, skipping.");
    } else {
        std::fs::write(example_path, EXAMPLE_PAPER)?;
        println!("Created papers/example.toml");
    }

    println!("\nNext steps:");
    println!("  1. Edit papers/example.toml with your answer keys");
    println!("  2. Run: sheetgrade validate --key papers/example.toml");
    println!("  3. Run: sheetgrade batch --key papers/example.toml --submissions <dir>");

    Ok(())
}

const SAMPLE_CONFIG: &str = r#"# sheetgrade configuration

papers_dir = "./papers"
parallelism = 4
max_retries = 3
retry_delay_ms = 1000

[grading]
# Credit taken per wrong multi-choice selection, in unit weights.
wrong_option_penalty = 0.5
# fail_fast or zero_score_placeholder
invalid_key_policy = "fail_fast"

[store]
dir = "./sheetgrade-results"

[[grade_scale]]
min_percentage = 90
label = "A+"

[[grade_scale]]
min_percentage = 80
label = "A"

[[grade_scale]]
min_percentage = 70
label = "B+"

[[grade_scale]]
min_percentage = 60
label = "B"

[[grade_scale]]
min_percentage = 50
label = "C"

[[grade_scale]]
min_percentage = 0
label = "F"
"#;

const EXAMPLE_PAPER: &str = r#"[paper]
id = "example"
name = "Example Quiz"
description = "One question of each kind"

[[questions]]
number = 1
type = "single_choice"
options = { A = "3", B = "4", C = "5" }
correct_answer = "B"
points = 1

[[questions]]
number = 2
type = "multi_choice"
options = ["2", "3", "4", "5"]
correct_answers = ["A", "B", "D"]
points = 3

[[questions]]
number = 3
type = "fill_in_blank"
blank_answers = ["Paris", ["Berlin", "Berlin, Germany"]]
points = 2
"#;
