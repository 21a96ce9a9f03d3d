//! sheetgrade CLI: grade answer sheets from the command line.

use std::path::PathBuf;
use std::process;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

mod commands;

#[derive(Parser)]
#[command(name = "sheetgrade", version, about = "Answer-sheet grading engine")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Grade one student's detected responses
    Grade {
        /// Paper TOML with the answer keys
        #[arg(long)]
        key: PathBuf,

        /// Detected responses JSON
        #[arg(long)]
        responses: PathBuf,

        /// Student id (defaults to the sheet's own id or file name)
        #[arg(long)]
        student: Option<String>,

        /// Output format: text, json, html
        #[arg(long, default_value = "text")]
        format: String,

        /// Write output to a file instead of stdout
        #[arg(long)]
        output: Option<PathBuf>,

        /// Config file path
        #[arg(long)]
        config: Option<PathBuf>,
    },

    /// Grade a directory of response sheets and store the results
    Batch {
        /// Paper TOML with the answer keys
        #[arg(long)]
        key: PathBuf,

        /// Directory of detected-response JSON files, one per student
        #[arg(long)]
        submissions: PathBuf,

        /// Result store directory (overrides config)
        #[arg(long)]
        store: Option<PathBuf>,

        /// Max sheets graded concurrently (overrides config)
        #[arg(long)]
        parallelism: Option<usize>,

        /// Write the batch report JSON here
        #[arg(long)]
        output: Option<PathBuf>,

        /// Also write an HTML report here
        #[arg(long)]
        html: Option<PathBuf>,

        /// Config file path
        #[arg(long)]
        config: Option<PathBuf>,
    },

    /// Validate paper TOML files
    Validate {
        /// Path to a paper file or directory
        #[arg(long)]
        key: PathBuf,
    },

    /// Compare two batch reports of the same paper
    Compare {
        /// Baseline report JSON
        #[arg(long)]
        baseline: PathBuf,

        /// Current report JSON
        #[arg(long)]
        current: PathBuf,

        /// Change threshold in percentage points
        #[arg(long, default_value = "0.5")]
        threshold: f64,

        /// Exit code 1 if any student's score dropped
        #[arg(long)]
        fail_on_regression: bool,

        /// Output format: text, json, markdown
        #[arg(long, default_value = "text")]
        format: String,
    },

    /// Create starter config and example paper
    Init,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("sheetgrade=info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Grade {
            key,
            responses,
            student,
            format,
            output,
            config,
        } => commands::grade::execute(key, responses, student, format, output, config),
        Commands::Batch {
            key,
            submissions,
            store,
            parallelism,
            output,
            html,
            config,
        } => {
            commands::batch::execute(key, submissions, store, parallelism, output, html, config)
                .await
        }
        Commands::Validate { key } => commands::validate::execute(key),
        Commands::Compare {
            baseline,
            current,
            threshold,
            fail_on_regression,
            format,
        } => commands::compare::execute(baseline, current, threshold, fail_on_regression, format),
        Commands::Init => commands::init::execute(),
    };

    if let Err(e) = result {
        eprintln!("Error: {e:#}");
        process::exit(1);
    }
}
