mod commands;

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "pyquest-cli")]
#[command(about = "PyQuest CLI - Evaluate lesson sections locally or through the worker queue", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Evaluate a submission in-process against a section definition
    Test {
        /// Section JSON (testing, turtle or coverage)
        #[arg(short, long)]
        section: PathBuf,

        /// Student source file (unused for coverage sections)
        #[arg(long)]
        source: Option<PathBuf>,

        /// Coverage inputs JSON: challenge id -> parameter -> value
        #[arg(short, long)]
        inputs: Option<PathBuf>,

        /// Lesson the section belongs to
        #[arg(short, long, default_value = "local")]
        lesson: String,

        /// Evaluator config (defaults to config/evaluator.json)
        #[arg(short, long)]
        config: Option<PathBuf>,
    },

    /// Queue a submission for the worker
    Submit {
        /// Section JSON (testing, turtle or coverage)
        #[arg(short, long)]
        section: PathBuf,

        /// Student source file (unused for coverage sections)
        #[arg(long)]
        source: Option<PathBuf>,

        /// Coverage inputs JSON: challenge id -> parameter -> value
        #[arg(short, long)]
        inputs: Option<PathBuf>,

        /// Lesson the section belongs to
        #[arg(short, long)]
        lesson: String,

        /// Sections required to complete the lesson (comma separated)
        #[arg(short, long, value_delimiter = ',')]
        required: Vec<String>,
    },

    /// Fetch the outcome of a queued submission
    Result {
        /// Submission id printed by `submit`
        #[arg(long)]
        id: uuid::Uuid,
    },

    /// Initialize a new PyQuest project
    Init {
        /// Project path
        #[arg(short, long, default_value = ".")]
        path: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_target(false)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Test {
            section,
            source,
            inputs,
            lesson,
            config,
        } => {
            commands::test_locally(&section, source.as_deref(), inputs.as_deref(), &lesson, config.as_deref())
                .await?;
        }
        Commands::Submit {
            section,
            source,
            inputs,
            lesson,
            required,
        } => {
            commands::submit(&section, source.as_deref(), inputs.as_deref(), &lesson, required).await?;
        }
        Commands::Result { id } => {
            commands::fetch_result(&id).await?;
        }
        Commands::Init { path } => {
            commands::init_project(&path).await?;
        }
    }

    Ok(())
}
