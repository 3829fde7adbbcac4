use std::path::{Path, PathBuf};
use std::time::Instant;

use anyhow::Context;
use clap::{Parser, Subcommand};

use spark_sight_engine::bench;
use spark_sight_engine::config::{AnalysisConfig, OutputFormat, WorkerCount};
use spark_sight_engine::cpus::DeployMode;
use spark_sight_engine::pipeline::{self, model::format_instant, RunContext};
use spark_sight_engine::report::{self, Report};

#[derive(Parser)]
#[command(
    name = "spark-sight-engine",
    version,
    about = "Spark event log analyzer: substage CPU efficiency and spill"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the full analysis and write the substage, executor and stage tables
    Analyze {
        /// Event log file or rolling event log directory
        path: PathBuf,

        /// Total CPU cores of the cluster (or SPARK_SIGHT_CPUS)
        #[arg(long, value_parser = clap::value_parser!(u32).range(1..))]
        cpus: Option<u32>,

        /// Deploy mode the application was submitted with: cluster (default) or client
        #[arg(long)]
        deploy_mode: Option<DeployMode>,

        /// Worker threads: auto (cores - 1) or a number
        #[arg(long)]
        workers: Option<WorkerCount>,

        /// Output format: json or csv
        #[arg(long, default_value = "json")]
        format: OutputFormat,

        /// Directory for output files (JSON goes to stdout when omitted)
        #[arg(long)]
        out_dir: Option<PathBuf>,

        /// Split pieces whose metrics are all at or below this are dropped
        #[arg(long)]
        negligible_threshold: Option<f64>,

        /// Write logs to <DIR>/spark-sight.log instead of stderr
        #[arg(long)]
        log_dir: Option<PathBuf>,
    },

    /// Parse and extract only, then report counts (dev/validation tool)
    Parse {
        /// Event log file or rolling event log directory
        path: PathBuf,

        /// Print every extracted task as a JSON line
        #[arg(long)]
        dump_tasks: bool,
    },

    /// Run the pipeline repeatedly and report per-phase timing
    Bench {
        /// Event log file or rolling event log directory
        path: PathBuf,

        /// Total CPU cores of the cluster (or SPARK_SIGHT_CPUS)
        #[arg(long, value_parser = clap::value_parser!(u32).range(1..))]
        cpus: Option<u32>,

        /// Number of runs
        #[arg(long, default_value = "5")]
        iterations: usize,

        /// Worker threads: auto (cores - 1) or a number
        #[arg(long)]
        workers: Option<WorkerCount>,
    },
}

fn init_tracing(log_dir: Option<&Path>) -> anyhow::Result<Option<tracing_appender::non_blocking::WorkerGuard>> {
    let filter = tracing_subscriber::EnvFilter::from_default_env().add_directive("spark_sight_engine=info".parse()?);

    match log_dir {
        Some(dir) => {
            std::fs::create_dir_all(dir).with_context(|| format!("creating log dir {}", dir.display()))?;
            let file_appender = tracing_appender::rolling::never(dir, "spark-sight.log");
            let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

            tracing_subscriber::fmt()
                .with_writer(non_blocking)
                .with_ansi(false)
                .with_env_filter(filter)
                .init();
            Ok(Some(guard))
        }
        None => {
            tracing_subscriber::fmt()
                .with_writer(std::io::stderr)
                .with_env_filter(filter)
                .init();
            Ok(None)
        }
    }
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let log_dir = match &cli.command {
        Commands::Analyze { log_dir, .. } => log_dir.clone(),
        _ => None,
    };
    let _guard = init_tracing(log_dir.as_deref())?;

    match cli.command {
        Commands::Analyze {
            path,
            cpus,
            deploy_mode,
            workers,
            format,
            out_dir,
            negligible_threshold,
            log_dir: _,
        } => {
            let config =
                AnalysisConfig::from_env()?.with_overrides(cpus, deploy_mode, workers, negligible_threshold);
            cmd_analyze(&path, config, format, out_dir.as_deref())?;
        }
        Commands::Parse { path, dump_tasks } => {
            cmd_parse(&path, dump_tasks)?;
        }
        Commands::Bench {
            path,
            cpus,
            iterations,
            workers,
        } => {
            let config = AnalysisConfig::from_env()?.with_overrides(cpus, None, workers, None);
            let ctx = RunContext::new(config)?;
            eprintln!("Benchmarking {} with {} workers", path.display(), ctx.workers);
            let result = bench::run_benchmark(&path, iterations, &ctx)
                .with_context(|| format!("benchmarking {}", path.display()))?;
            result.print_summary();
        }
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// analyze subcommand
// ---------------------------------------------------------------------------

fn cmd_analyze(path: &Path, config: AnalysisConfig, format: OutputFormat, out_dir: Option<&Path>) -> anyhow::Result<()> {
    let ctx = RunContext::new(config)?;
    let analysis = pipeline::run(path, &ctx).with_context(|| format!("analyzing {}", path.display()))?;

    let report = Report::from_analysis(&analysis);
    let written = report::write_report(&report, format, out_dir)?;
    for file in &written {
        eprintln!("Wrote {}", file.display());
    }

    let stats = &analysis.stats;
    eprintln!(
        "{} tasks in {} stages -> {} substages ({} tasks split, {} lines skipped) in {:.3}s",
        stats.tasks,
        stats.stages,
        stats.substages,
        stats.split_tasks,
        stats.lines_skipped,
        analysis.timings.total
    );
    Ok(())
}

// ---------------------------------------------------------------------------
// parse subcommand
// ---------------------------------------------------------------------------

fn cmd_parse(path: &Path, dump_tasks: bool) -> anyhow::Result<()> {
    let start = Instant::now();
    let config = AnalysisConfig::from_env()?;
    let ctx = RunContext::new(config)?;

    let ingested = pipeline::ingest_path(path, &ctx).with_context(|| format!("parsing {}", path.display()))?;

    let first_start = ingested.tasks.iter().map(|t| t.start).min();
    let last_end = ingested.tasks.iter().map(|t| t.end).max();

    let summary = serde_json::json!({
        "path": path.display().to_string(),
        "files": ingested.stats.files,
        "files_failed": ingested.stats.files_failed,
        "bytes": ingested.stats.bytes_read,
        "lines": ingested.stats.lines_total,
        "lines_skipped": ingested.stats.lines_skipped,
        "events_ignored": ingested.stats.events_ignored,
        "task_events": ingested.stats.task_events,
        "stage_events": ingested.stats.stage_events,
        "tasks": ingested.stats.tasks,
        "tasks_dropped": ingested.stats.tasks_dropped,
        "stages": ingested.stats.stages,
        "first_task_start": first_start.map(format_instant),
        "last_task_end": last_end.map(format_instant),
        "elapsed_seconds": start.elapsed().as_secs_f64(),
    });

    println!("{}", serde_json::to_string_pretty(&summary)?);

    if dump_tasks {
        for task in &ingested.tasks {
            println!("{}", serde_json::to_string(task)?);
        }
    }

    Ok(())
}
