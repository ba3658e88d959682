mod commands;

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "practice-cli")]
#[command(about = "Practice judge CLI - Run submissions, preview arguments, browse session history", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a submission against a fixture file in the sandbox
    Run {
        /// JavaScript source file
        #[arg(short, long)]
        source: PathBuf,

        /// Name of the function under test (e.g., twoSum)
        #[arg(short, long)]
        entry: String,

        /// JSON file holding an array of fixtures
        #[arg(short, long)]
        fixtures: PathBuf,

        /// Parameter names, in call order (e.g., nums,target)
        #[arg(short, long, value_delimiter = ',')]
        params: Option<Vec<String>>,

        /// Override the run deadline in milliseconds
        #[arg(long)]
        deadline_ms: Option<u64>,
    },

    /// Show the arguments inferred for each fixture without running anything
    Args {
        /// JSON file holding an array of fixtures
        #[arg(short, long)]
        fixtures: PathBuf,

        /// Parameter names, in call order
        #[arg(short, long, value_delimiter = ',')]
        params: Option<Vec<String>>,
    },

    /// List past sessions for a user
    History {
        /// User id
        #[arg(short, long)]
        user: String,
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
        Commands::Run {
            source,
            entry,
            fixtures,
            params,
            deadline_ms,
        } => {
            let all_passed = commands::run_submission(&source, &entry, &fixtures, params, deadline_ms).await?;
            if !all_passed {
                std::process::exit(1);
            }
        }
        Commands::Args { fixtures, params } => {
            commands::preview_args(&fixtures, params.as_deref())?;
        }
        Commands::History { user } => {
            commands::show_history(&user).await?;
        }
    }

    Ok(())
}
