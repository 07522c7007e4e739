//! Subcommand implementations.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use serde::Serialize;
use tracing::{info, warn};

use job_pipeline::pipeline::ingest_from_sources;
use job_pipeline::sources::{FixedSource, HttpJsonSource, JsonFileSource};
use job_pipeline::stages::{default_definition, CandidateProfile, LoggingGateway, ResumeInventory};
use job_pipeline::{IngestResult, JobPipeline, JobRecord, JobState, JobStore, Source, SqliteStore};

use crate::config::Config;

/// Where `ingest` reads postings from.
#[derive(Debug, Clone)]
pub enum IngestInput {
    File(PathBuf),
    Url(String),
    Demo,
}

/// Overrides for `run`.
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    pub until_quiescent: bool,
    pub workers: Option<usize>,
    pub max_passes: Option<usize>,
}

async fn open_store(config: &Config) -> Result<SqliteStore> {
    SqliteStore::new(&config.database_url)
        .await
        .with_context(|| format!("failed to open store at {}", config.database_url))
}

pub async fn ingest(config: &Config, input: IngestInput) -> Result<IngestResult> {
    let source: Box<dyn Source> = match input {
        IngestInput::File(path) => Box::new(JsonFileSource::new(path)),
        IngestInput::Url(url) => Box::new(HttpJsonSource::new("feed", url)),
        IngestInput::Demo => Box::new(FixedSource::demo()),
    };

    let store = open_store(config).await?;
    let result = ingest_from_sources(&store, &[source.as_ref()]).await?;
    store.close().await?;

    if !result.is_success() {
        bail!("fetching from {} failed", result.failed_sources.join(", "));
    }
    Ok(result)
}

#[derive(Debug, Serialize)]
#[serde(untagged)]
pub enum RunReport {
    Pass(job_pipeline::RunSummary),
    Quiescence(job_pipeline::QuiescenceReport),
}

pub async fn run(config: &Config, options: RunOptions) -> Result<RunReport> {
    let profile = CandidateProfile::load(&config.profile_path)
        .await
        .context("failed to load candidate profile")?;
    let inventory = ResumeInventory::load(&config.resume_core_path, &config.resume_modules_dir)
        .await
        .context("failed to load résumé inventory")?;
    let definition = default_definition(
        Arc::new(profile),
        Arc::new(inventory),
        Arc::new(LoggingGateway),
    )?;

    let mut pipeline_config = config.pipeline_config();
    if let Some(workers) = options.workers {
        pipeline_config = pipeline_config.with_workers(workers);
    }
    if let Some(max_passes) = options.max_passes {
        pipeline_config = pipeline_config.with_max_passes(max_passes);
    }

    let store = open_store(config).await?;
    let pipeline = JobPipeline::new(store, definition, pipeline_config);

    let token = pipeline.cancellation_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received, finishing in-flight jobs");
            token.cancel();
        }
    });

    let report = if options.until_quiescent {
        RunReport::Quiescence(pipeline.run_until_quiescent().await?)
    } else {
        RunReport::Pass(pipeline.run_once().await?)
    };

    pipeline.close().await?;
    info!("run complete");
    Ok(report)
}

/// Row count for every state, forward path first.
pub async fn status(config: &Config) -> Result<Vec<(JobState, usize)>> {
    let store = open_store(config).await?;
    let counts = store.count_by_state().await?;
    store.close().await?;

    Ok(JobState::ALL
        .into_iter()
        .map(|state| (state, counts.get(&state).copied().unwrap_or(0)))
        .collect())
}

pub async fn show(config: &Config, job_id: &str) -> Result<JobRecord> {
    let store = open_store(config).await?;
    let job = store.get(job_id).await?;
    store.close().await?;

    match job {
        Some(job) => Ok(job),
        None => bail!("job {job_id} not found"),
    }
}

pub async fn list(config: &Config, all: bool) -> Result<Vec<JobRecord>> {
    let store = open_store(config).await?;
    let jobs = if all {
        store.list_all().await?
    } else {
        store.list_active().await?
    };
    store.close().await?;
    Ok(jobs)
}

/// One line per job for `list`.
pub fn format_row(job: &JobRecord) -> String {
    let title = job
        .raw_data
        .get("title")
        .and_then(|t| t.as_str())
        .unwrap_or("-");
    let company = job
        .raw_data
        .get("company")
        .and_then(|c| c.as_str())
        .unwrap_or("-");
    format!(
        "{:<16} {:>3}  {}  {} @ {}",
        job.state.as_str(),
        job.attempts,
        job.job_id,
        title,
        company
    )
}
