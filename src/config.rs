//! Analysis configuration.
//!
//! Layered as defaults, then `SPARK_SIGHT_*` environment variables, then
//! CLI flags.

use std::fmt;
use std::str::FromStr;

use crate::cpus::DeployMode;
use crate::error::{PipelineError, Result};
use crate::pipeline::split::DEFAULT_NEGLIGIBLE_THRESHOLD;

pub const ENV_CPUS: &str = "SPARK_SIGHT_CPUS";
pub const ENV_DEPLOY_MODE: &str = "SPARK_SIGHT_DEPLOY_MODE";
pub const ENV_WORKERS: &str = "SPARK_SIGHT_WORKERS";
pub const ENV_NEGLIGIBLE_THRESHOLD: &str = "SPARK_SIGHT_NEGLIGIBLE_THRESHOLD";

/// Used when the host core count cannot be determined.
const FALLBACK_CORES: usize = 4;

/// Size of the per-run worker pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WorkerCount {
    /// Host cores minus one, at least one.
    #[default]
    Auto,
    Fixed(usize),
}

impl WorkerCount {
    pub fn resolve(self) -> usize {
        match self {
            WorkerCount::Fixed(n) => n,
            WorkerCount::Auto => {
                let cores = match num_cpus::get() {
                    0 => FALLBACK_CORES,
                    n => n,
                };
                cores.saturating_sub(1).max(1)
            }
        }
    }
}

impl FromStr for WorkerCount {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        if s.eq_ignore_ascii_case("auto") {
            return Ok(WorkerCount::Auto);
        }
        match s.parse::<usize>() {
            Ok(n) if n > 0 => Ok(WorkerCount::Fixed(n)),
            _ => Err(PipelineError::config(format!(
                "invalid worker count '{}' (expected 'auto' or a positive integer)",
                s
            ))),
        }
    }
}

impl fmt::Display for WorkerCount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WorkerCount::Auto => f.write_str("auto"),
            WorkerCount::Fixed(n) => write!(f, "{}", n),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OutputFormat {
    #[default]
    Json,
    Csv,
}

impl FromStr for OutputFormat {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "json" => Ok(OutputFormat::Json),
            "csv" => Ok(OutputFormat::Csv),
            other => Err(PipelineError::config(format!(
                "invalid output format '{}' (expected json or csv)",
                other
            ))),
        }
    }
}

/// Settings for one analysis run.
#[derive(Debug, Clone, PartialEq)]
pub struct AnalysisConfig {
    /// Total cores of the cluster the application ran on. Required.
    pub total_cores: Option<u32>,
    pub deploy_mode: DeployMode,
    pub workers: WorkerCount,
    pub negligible_threshold: f64,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            total_cores: None,
            deploy_mode: DeployMode::Cluster,
            workers: WorkerCount::Auto,
            negligible_threshold: DEFAULT_NEGLIGIBLE_THRESHOLD,
        }
    }
}

impl AnalysisConfig {
    /// Load config from `SPARK_SIGHT_*` env vars on top of the defaults.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Like [`from_env`](Self::from_env) with an injectable variable source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(v) = get(ENV_CPUS) {
            config.total_cores = Some(parse_cores(&v).map_err(|e| env_error(ENV_CPUS, e))?);
        }
        if let Some(v) = get(ENV_DEPLOY_MODE) {
            config.deploy_mode = v.parse().map_err(|e| env_error(ENV_DEPLOY_MODE, e))?;
        }
        if let Some(v) = get(ENV_WORKERS) {
            config.workers = v.parse().map_err(|e| env_error(ENV_WORKERS, e))?;
        }
        if let Some(v) = get(ENV_NEGLIGIBLE_THRESHOLD) {
            config.negligible_threshold =
                parse_threshold(&v).map_err(|e| env_error(ENV_NEGLIGIBLE_THRESHOLD, e))?;
        }

        Ok(config)
    }

    /// Override fields from CLI args (only those given).
    pub fn with_overrides(
        mut self,
        total_cores: Option<u32>,
        deploy_mode: Option<DeployMode>,
        workers: Option<WorkerCount>,
        negligible_threshold: Option<f64>,
    ) -> Self {
        if let Some(c) = total_cores {
            self.total_cores = Some(c);
        }
        if let Some(m) = deploy_mode {
            self.deploy_mode = m;
        }
        if let Some(w) = workers {
            self.workers = w;
        }
        if let Some(t) = negligible_threshold {
            self.negligible_threshold = t;
        }
        self
    }

    /// Check the settings a run cannot start without.
    pub fn validate(&self) -> Result<u32> {
        let cores = self.total_cores.ok_or_else(|| {
            PipelineError::config(format!("total cluster cores not set (use --cpus or {})", ENV_CPUS))
        })?;
        if cores == 0 {
            return Err(PipelineError::config("total cluster cores must be positive"));
        }
        if !self.negligible_threshold.is_finite() || self.negligible_threshold < 0.0 {
            return Err(PipelineError::config(format!(
                "negligible threshold must be a non-negative number, got {}",
                self.negligible_threshold
            )));
        }
        if self.workers == WorkerCount::Fixed(0) {
            return Err(PipelineError::config("worker count must be positive"));
        }
        Ok(cores)
    }
}

fn parse_cores(s: &str) -> Result<u32> {
    match s.trim().parse::<u32>() {
        Ok(n) if n > 0 => Ok(n),
        _ => Err(PipelineError::config(format!("invalid core count '{}'", s.trim()))),
    }
}

fn parse_threshold(s: &str) -> Result<f64> {
    match s.trim().parse::<f64>() {
        Ok(t) if t.is_finite() && t >= 0.0 => Ok(t),
        _ => Err(PipelineError::config(format!("invalid negligible threshold '{}'", s.trim()))),
    }
}

fn env_error(key: &str, err: PipelineError) -> PipelineError {
    match err {
        PipelineError::ConfigurationError(msg) => PipelineError::config(format!("{}: {}", key, msg)),
        other => other,
    }
}
