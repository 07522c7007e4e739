//! `job-pipeline`: ingest postings and drive them through the pipeline.
//!
//! Configuration comes from the environment (see `Config::from_env`);
//! flags override it.

mod commands;
mod config;

use std::path::PathBuf;

use anyhow::Result;
use clap::{Args, Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use commands::{IngestInput, RunOptions, RunReport};
use config::Config;

#[derive(Parser)]
#[command(name = "job-pipeline")]
#[command(about = "Resumable job-application pipeline")]
struct Cli {
    /// Database URL (overrides DATABASE_URL)
    #[arg(long, global = true)]
    database_url: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Add postings to the store
    Ingest(IngestArgs),

    /// Advance stored jobs
    Run {
        /// Repeat passes until one advances nothing
        #[arg(long)]
        until_quiescent: bool,

        /// Jobs processed concurrently
        #[arg(long)]
        workers: Option<usize>,

        /// Pass limit for --until-quiescent
        #[arg(long)]
        max_passes: Option<usize>,
    },

    /// Show job counts per state
    Status,

    /// Print one job as JSON
    Show { job_id: String },

    /// List jobs still in progress
    List {
        /// Include finished jobs
        #[arg(long)]
        all: bool,
    },
}

#[derive(Args)]
#[group(required = true, multiple = false)]
struct IngestArgs {
    /// JSON file with an array of listings
    #[arg(long)]
    file: Option<PathBuf>,

    /// URL of a JSON feed of listings
    #[arg(long)]
    url: Option<String>,

    /// The built-in demo posting
    #[arg(long)]
    demo: bool,
}

impl IngestArgs {
    fn into_input(self) -> IngestInput {
        match (self.file, self.url) {
            (Some(path), _) => IngestInput::File(path),
            (None, Some(url)) => IngestInput::Url(url),
            (None, None) => IngestInput::Demo,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,job_pipeline=debug".into()),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(true)
                .with_line_number(true),
        )
        .init();

    let cli = Cli::parse();
    let mut config = Config::from_env()?;
    if let Some(url) = cli.database_url {
        config.database_url = url;
    }

    match cli.command {
        Commands::Ingest(args) => {
            let result = commands::ingest(&config, args.into_input()).await?;
            println!(
                "received {}, inserted {}, duplicates {}",
                result.received, result.inserted, result.duplicates
            );
        }
        Commands::Run {
            until_quiescent,
            workers,
            max_passes,
        } => {
            let options = RunOptions {
                until_quiescent,
                workers,
                max_passes,
            };
            let report = commands::run(&config, options).await?;
            println!("{}", serde_json::to_string_pretty(&report)?);
            if let RunReport::Quiescence(report) = report {
                if report.pass_limit_reached {
                    eprintln!("pass limit reached before the pipeline went quiet");
                }
            }
        }
        Commands::Status => {
            for (state, count) in commands::status(&config).await? {
                println!("{:<16} {}", state.as_str(), count);
            }
        }
        Commands::Show { job_id } => {
            let job = commands::show(&config, &job_id).await?;
            println!("{}", serde_json::to_string_pretty(&job)?);
        }
        Commands::List { all } => {
            for job in commands::list(&config, all).await? {
                println!("{}", commands::format_row(&job));
            }
        }
    }

    Ok(())
}
