//! The analysis pipeline.
//!
//! Phases run strictly in sequence (parse, extract, borders, split,
//! aggregate, efficiency); the parallel work inside a phase runs on the
//! per-run pool held by [`RunContext`].

pub mod aggregate;
pub mod borders;
pub mod codec;
pub mod efficiency;
pub mod extract;
pub mod model;
pub mod parser;
pub mod split;

use std::path::Path;
use std::time::Instant;

use serde::Serialize;
use tracing::info_span;

use crate::config::AnalysisConfig;
use crate::cpus::resolve_cpus_available;
use crate::discovery::{self, EventLogFile};
use crate::error::{PipelineError, Result};
use crate::error_tracker::SkippedLineTracker;
use efficiency::SubstageEfficiency;
use model::{ExecutorSpill, Nanos, StageRecord, StageWindow, TaskArena, TaskRecord};
use parser::ParsedLog;

// ---------------------------------------------------------------------------
// Run context
// ---------------------------------------------------------------------------

/// Everything a phase needs from the outside, passed explicitly.
pub struct RunContext {
    pub config: AnalysisConfig,
    pub workers: usize,
    pub pool: rayon::ThreadPool,
    pub negligible_threshold: f64,
    /// Root span; phase spans are created as its children.
    pub span: tracing::Span,
    pub skipped_lines: SkippedLineTracker,
}

impl RunContext {
    pub fn new(config: AnalysisConfig) -> Result<Self> {
        if !config.negligible_threshold.is_finite() || config.negligible_threshold < 0.0 {
            return Err(PipelineError::config(format!(
                "negligible threshold must be a non-negative number, got {}",
                config.negligible_threshold
            )));
        }

        let workers = config.workers.resolve();
        if workers == 0 {
            return Err(PipelineError::config("worker count must be positive"));
        }
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(workers)
            .thread_name(|i| format!("spark-sight-{}", i))
            .build()
            .map_err(|e| PipelineError::config(format!("cannot build worker pool: {}", e)))?;

        let span = info_span!("analysis", workers);
        Ok(Self {
            negligible_threshold: config.negligible_threshold,
            config,
            workers,
            pool,
            span,
            skipped_lines: SkippedLineTracker::new(),
        })
    }
}

// ---------------------------------------------------------------------------
// Results
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RunStats {
    pub files: usize,
    /// Rolling-log files skipped because they could not be read.
    pub files_failed: usize,
    pub bytes_read: u64,
    pub lines_total: u64,
    pub lines_skipped: u64,
    pub events_ignored: u64,
    pub task_events: usize,
    pub stage_events: usize,
    pub tasks: usize,
    pub tasks_dropped: usize,
    pub stages: usize,
    pub borders: usize,
    pub split_tasks: usize,
    pub pieces: usize,
    pub pieces_discarded: usize,
    pub substages: usize,
    pub executor_rows: usize,
}

/// Wall-clock seconds per phase.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PhaseTimings {
    pub parse: f64,
    pub extract: f64,
    pub borders: f64,
    pub split: f64,
    pub aggregate: f64,
    pub efficiency: f64,
    pub total: f64,
}

/// Typed task and stage records of one event log.
#[derive(Debug)]
pub struct Ingested {
    pub source: String,
    pub tasks: Vec<TaskRecord>,
    pub stages: Vec<StageRecord>,
    pub stats: RunStats,
    pub timings: PhaseTimings,
}

/// Output of a full run: the three tables plus what produced them.
#[derive(Debug, Serialize)]
pub struct Analysis {
    pub source: String,
    pub cpus_available: u32,
    pub substages: Vec<SubstageEfficiency>,
    pub executors: Vec<ExecutorSpill>,
    pub stages: Vec<StageRecord>,
    pub stage_windows: Vec<StageWindow>,
    pub borders: Vec<Nanos>,
    pub stats: RunStats,
    pub timings: PhaseTimings,
}

// ---------------------------------------------------------------------------
// Phases
// ---------------------------------------------------------------------------

/// Discover, parse and extract the event log at `path`.
pub fn ingest_path(path: &Path, ctx: &RunContext) -> Result<Ingested> {
    let files = discovery::resolve_event_files(path)?;
    let source = path.display().to_string();

    let started = Instant::now();
    let parsed = {
        let _span = info_span!(parent: &ctx.span, "parse", files = files.len()).entered();
        parser::parse_event_log(&files, &source, &ctx.pool, &ctx.skipped_lines)?
    };
    let parse_secs = started.elapsed().as_secs_f64();

    let mut ingested = extract_parsed(parsed, source, &files, ctx)?;
    ingested.timings.parse = parse_secs;
    Ok(ingested)
}

/// Same as [`ingest_path`] for an in-memory event log.
pub fn ingest_lines<'a, I>(lines: I, source: &str, ctx: &RunContext) -> Result<Ingested>
where
    I: IntoIterator<Item = &'a str>,
{
    let started = Instant::now();
    let parsed = {
        let _span = info_span!(parent: &ctx.span, "parse").entered();
        parser::parse_lines(lines, source, &ctx.skipped_lines)?
    };
    let parse_secs = started.elapsed().as_secs_f64();

    let mut ingested = extract_parsed(parsed, source.to_string(), &[], ctx)?;
    ingested.timings.parse = parse_secs;
    Ok(ingested)
}

fn extract_parsed(parsed: ParsedLog, source: String, files: &[EventLogFile], ctx: &RunContext) -> Result<Ingested> {
    let _span = info_span!(parent: &ctx.span, "extract").entered();
    let started = Instant::now();

    let tasks = extract::extract_tasks(&parsed.task_events, &ctx.pool)?;
    let stages = extract::extract_stages(&parsed.stage_events)?;
    let (tasks, tasks_dropped) = extract::retain_completed_stages(tasks, &stages);

    if tasks.is_empty() {
        return Err(PipelineError::EmptyOrInvalidLog {
            source_label: source,
            task_events: 0,
            stage_events: parsed.stage_events.len(),
        });
    }

    let stats = RunStats {
        files: files.len().max(1),
        files_failed: parsed.files_failed,
        bytes_read: parsed.bytes_read,
        lines_total: parsed.lines_total,
        lines_skipped: parsed.lines_skipped,
        events_ignored: parsed.events_ignored,
        task_events: parsed.task_events.len(),
        stage_events: parsed.stage_events.len(),
        tasks: tasks.len(),
        tasks_dropped,
        stages: stages.len(),
        ..RunStats::default()
    };

    tracing::info!(tasks = stats.tasks, stages = stats.stages, "Extracted task and stage records");

    Ok(Ingested {
        source,
        tasks,
        stages,
        stats,
        timings: PhaseTimings {
            extract: started.elapsed().as_secs_f64(),
            ..PhaseTimings::default()
        },
    })
}

/// Borders, splitting, aggregation and efficiency over ingested records.
pub fn analyze(ingested: Ingested, ctx: &RunContext) -> Result<Analysis> {
    let total_cores = ctx.config.validate()?;
    let cpus_available = resolve_cpus_available(total_cores, ctx.config.deploy_mode)?;

    let Ingested {
        source,
        tasks,
        stages,
        mut stats,
        mut timings,
    } = ingested;
    let arena = TaskArena::new(tasks);

    let started = Instant::now();
    let (borders, stage_windows) = {
        let _span = info_span!(parent: &ctx.span, "borders").entered();
        borders::resolve_borders(arena.tasks())
    };
    timings.borders = started.elapsed().as_secs_f64();

    let started = Instant::now();
    let outcome = {
        let _span = info_span!(parent: &ctx.span, "split", borders = borders.len()).entered();
        split::split_on_borders(&arena, &borders, ctx.negligible_threshold, &ctx.pool)
    };
    timings.split = started.elapsed().as_secs_f64();

    let started = Instant::now();
    let (aggregates, executors) = {
        let _span = info_span!(parent: &ctx.span, "aggregate").entered();
        (
            aggregate::aggregate_substages(&outcome.pieces, &borders)?,
            aggregate::aggregate_executors(&outcome.pieces, &arena, &borders)?,
        )
    };
    timings.aggregate = started.elapsed().as_secs_f64();

    let started = Instant::now();
    let substages = {
        let _span = info_span!(parent: &ctx.span, "efficiency").entered();
        efficiency::compute_efficiency(aggregates, cpus_available)
    };
    timings.efficiency = started.elapsed().as_secs_f64();

    stats.borders = borders.len();
    stats.split_tasks = outcome.split_tasks;
    stats.pieces = outcome.pieces.len();
    stats.pieces_discarded = outcome.discarded;
    stats.substages = substages.len();
    stats.executor_rows = executors.len();
    timings.total =
        timings.parse + timings.extract + timings.borders + timings.split + timings.aggregate + timings.efficiency;

    tracing::info!(
        substages = stats.substages,
        split_tasks = stats.split_tasks,
        discarded = stats.pieces_discarded,
        "Analysis complete"
    );

    Ok(Analysis {
        source,
        cpus_available,
        substages,
        executors,
        stages,
        stage_windows,
        borders,
        stats,
        timings,
    })
}

/// Full run over the event log at `path`.
pub fn run(path: &Path, ctx: &RunContext) -> Result<Analysis> {
    // Configuration problems surface before any input is read.
    let total_cores = ctx.config.validate()?;
    resolve_cpus_available(total_cores, ctx.config.deploy_mode)?;

    let ingested = ingest_path(path, ctx)?;
    analyze(ingested, ctx)
}
