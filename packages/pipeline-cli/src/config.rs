use anyhow::{Context, Result};
use dotenvy::dotenv;
use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use job_pipeline::{PipelineConfig, RetryPolicy};

/// CLI configuration loaded from environment variables
#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub profile_path: PathBuf,
    pub resume_core_path: PathBuf,
    pub resume_modules_dir: PathBuf,
    pub workers: usize,
    pub max_passes: usize,
    pub stage_timeout: Duration,
    /// `0` disables the retry ceiling
    pub max_attempts: u32,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        // Load .env file if present (development)
        let _ = dotenv();

        Ok(Self {
            database_url: env::var("DATABASE_URL")
                .unwrap_or_else(|_| "sqlite://jobs.db".to_string()),
            profile_path: env::var("PROFILE_PATH")
                .unwrap_or_else(|_| "profiles/candidate_profile.json".to_string())
                .into(),
            resume_core_path: env::var("RESUME_CORE_PATH")
                .unwrap_or_else(|_| "profiles/resume_core.md".to_string())
                .into(),
            resume_modules_dir: env::var("RESUME_MODULES_DIR")
                .unwrap_or_else(|_| "profiles/resume_modules".to_string())
                .into(),
            workers: parse_var("PIPELINE_WORKERS", 4)?,
            max_passes: parse_var("PIPELINE_MAX_PASSES", 20)?,
            stage_timeout: Duration::from_secs(parse_var("PIPELINE_STAGE_TIMEOUT_SECS", 120)?),
            max_attempts: parse_var("PIPELINE_MAX_ATTEMPTS", 5)?,
        })
    }

    /// Runner settings derived from this configuration.
    pub fn pipeline_config(&self) -> PipelineConfig {
        let retry = match self.max_attempts {
            0 => RetryPolicy::unbounded(),
            n => RetryPolicy::bounded(n),
        };
        PipelineConfig::new()
            .with_workers(self.workers)
            .with_max_passes(self.max_passes)
            .with_stage_timeout(self.stage_timeout)
            .with_retry(retry)
    }
}

fn parse_var<T>(key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match env::var(key) {
        Ok(value) => value
            .trim()
            .parse()
            .with_context(|| format!("{key} must be a valid number")),
        Err(_) => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(max_attempts: u32) -> Config {
        Config {
            database_url: "sqlite::memory:".into(),
            profile_path: "profile.json".into(),
            resume_core_path: "core.md".into(),
            resume_modules_dir: "modules".into(),
            workers: 0,
            max_passes: 3,
            stage_timeout: Duration::from_secs(10),
            max_attempts,
        }
    }

    #[test]
    fn test_pipeline_config_mapping() {
        let pipeline = config(2).pipeline_config();
        assert_eq!(pipeline.workers, 1);
        assert_eq!(pipeline.max_passes, 3);
        assert_eq!(pipeline.retry, RetryPolicy::bounded(2));
    }

    #[test]
    fn test_zero_attempts_disables_ceiling() {
        assert_eq!(config(0).pipeline_config().retry, RetryPolicy::unbounded());
    }
}
