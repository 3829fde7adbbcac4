//! Output tables: substages, executors and stages.
//!
//! JSON holds all three tables in one document. CSV writes one file per
//! table with id lists joined by `;`.

use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Serialize;

use crate::config::OutputFormat;
use crate::pipeline::model::{format_instant, Nanos, NANOS_PER_SEC};
use crate::pipeline::{Analysis, RunStats};

pub const JSON_FILE: &str = "analysis.json";
pub const SUBSTAGES_CSV: &str = "substages.csv";
pub const EXECUTORS_CSV: &str = "executors.csv";
pub const STAGES_CSV: &str = "stages.csv";

fn seconds(ns: Nanos) -> f64 {
    ns as f64 / NANOS_PER_SEC
}

fn join_ids(ids: &[i64]) -> String {
    ids.iter().map(|id| id.to_string()).collect::<Vec<_>>().join(";")
}

fn opt<T: ToString>(value: &Option<T>) -> String {
    value.as_ref().map(|v| v.to_string()).unwrap_or_default()
}

// ---------------------------------------------------------------------------
// Rows
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SubstageRow {
    pub start: String,
    pub end: String,
    pub start_ns: Nanos,
    pub end_ns: Nanos,
    pub duration_s: f64,
    pub stage_ids: Vec<i64>,
    pub pieces: usize,
    pub cpu_usage_ns: f64,
    pub serde_overhead_ns: f64,
    pub shuffle_overhead_ns: f64,
    pub disk_spill_bytes: f64,
    pub available_cpu_ns: f64,
    pub efficiency_cpu_usage: f64,
    pub efficiency_serde_overhead: f64,
    pub efficiency_shuffle_overhead: f64,
    /// Share of available CPU the substage kept busy, all CPU-time metrics together.
    pub efficiency_total: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExecutorRow {
    pub start: String,
    pub end: String,
    pub start_ns: Nanos,
    pub end_ns: Nanos,
    pub executor_id: i64,
    pub disk_spill_bytes: f64,
    pub execution_memory_peak: Option<u64>,
    pub storage_memory_peak: Option<u64>,
    pub stage_ids: Vec<i64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StageRow {
    pub stage_id: i64,
    pub name: Option<String>,
    pub num_tasks: Option<u64>,
    pub submitted: String,
    pub completed: String,
    /// From the logged submission/completion times.
    pub logged_duration_s: f64,
    /// Task-derived window used for the borders.
    pub window_start: Option<String>,
    pub window_end: Option<String>,
    pub window_duration_s: Option<f64>,
}

trait CsvTable {
    const HEADERS: &'static [&'static str];
    fn record(&self) -> Vec<String>;
}

impl CsvTable for SubstageRow {
    const HEADERS: &'static [&'static str] = &[
        "start",
        "end",
        "start_ns",
        "end_ns",
        "duration_s",
        "stage_ids",
        "pieces",
        "cpu_usage_ns",
        "serde_overhead_ns",
        "shuffle_overhead_ns",
        "disk_spill_bytes",
        "available_cpu_ns",
        "efficiency_cpu_usage",
        "efficiency_serde_overhead",
        "efficiency_shuffle_overhead",
        "efficiency_total",
    ];

    fn record(&self) -> Vec<String> {
        vec![
            self.start.clone(),
            self.end.clone(),
            self.start_ns.to_string(),
            self.end_ns.to_string(),
            self.duration_s.to_string(),
            join_ids(&self.stage_ids),
            self.pieces.to_string(),
            self.cpu_usage_ns.to_string(),
            self.serde_overhead_ns.to_string(),
            self.shuffle_overhead_ns.to_string(),
            self.disk_spill_bytes.to_string(),
            self.available_cpu_ns.to_string(),
            self.efficiency_cpu_usage.to_string(),
            self.efficiency_serde_overhead.to_string(),
            self.efficiency_shuffle_overhead.to_string(),
            self.efficiency_total.to_string(),
        ]
    }
}

impl CsvTable for ExecutorRow {
    const HEADERS: &'static [&'static str] = &[
        "start",
        "end",
        "start_ns",
        "end_ns",
        "executor_id",
        "disk_spill_bytes",
        "execution_memory_peak",
        "storage_memory_peak",
        "stage_ids",
    ];

    fn record(&self) -> Vec<String> {
        vec![
            self.start.clone(),
            self.end.clone(),
            self.start_ns.to_string(),
            self.end_ns.to_string(),
            self.executor_id.to_string(),
            self.disk_spill_bytes.to_string(),
            opt(&self.execution_memory_peak),
            opt(&self.storage_memory_peak),
            join_ids(&self.stage_ids),
        ]
    }
}

impl CsvTable for StageRow {
    const HEADERS: &'static [&'static str] = &[
        "stage_id",
        "name",
        "num_tasks",
        "submitted",
        "completed",
        "logged_duration_s",
        "window_start",
        "window_end",
        "window_duration_s",
    ];

    fn record(&self) -> Vec<String> {
        vec![
            self.stage_id.to_string(),
            opt(&self.name),
            opt(&self.num_tasks),
            self.submitted.clone(),
            self.completed.clone(),
            self.logged_duration_s.to_string(),
            opt(&self.window_start),
            opt(&self.window_end),
            opt(&self.window_duration_s),
        ]
    }
}

// ---------------------------------------------------------------------------
// Report
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
pub struct Report {
    pub source: String,
    pub cpus_available: u32,
    pub substages: Vec<SubstageRow>,
    pub executors: Vec<ExecutorRow>,
    pub stages: Vec<StageRow>,
    pub stats: RunStats,
}

impl Report {
    pub fn from_analysis(analysis: &Analysis) -> Self {
        let substages = analysis
            .substages
            .iter()
            .map(|s| {
                let a = &s.aggregate;
                SubstageRow {
                    start: format_instant(a.start),
                    end: format_instant(a.end),
                    start_ns: a.start,
                    end_ns: a.end,
                    duration_s: seconds(a.duration),
                    stage_ids: a.stage_ids.clone(),
                    pieces: a.piece_count,
                    cpu_usage_ns: a.metrics.cpu_usage,
                    serde_overhead_ns: a.metrics.serde_overhead,
                    shuffle_overhead_ns: a.metrics.shuffle_overhead,
                    disk_spill_bytes: a.metrics.disk_spill,
                    available_cpu_ns: s.available_cpu_time,
                    efficiency_cpu_usage: s.efficiency.cpu_usage,
                    efficiency_serde_overhead: s.efficiency.serde_overhead,
                    efficiency_shuffle_overhead: s.efficiency.shuffle_overhead,
                    efficiency_total: s.efficiency.total(),
                }
            })
            .collect();

        let executors = analysis
            .executors
            .iter()
            .map(|e| ExecutorRow {
                start: format_instant(e.start),
                end: format_instant(e.end),
                start_ns: e.start,
                end_ns: e.end,
                executor_id: e.executor_id,
                disk_spill_bytes: e.disk_spill,
                execution_memory_peak: e.execution_memory_peak,
                storage_memory_peak: e.storage_memory_peak,
                stage_ids: e.stage_ids.clone(),
            })
            .collect();

        let stages = analysis
            .stages
            .iter()
            .map(|s| {
                let window = analysis.stage_windows.iter().find(|w| w.stage_id == s.stage_id);
                StageRow {
                    stage_id: s.stage_id,
                    name: s.name.clone(),
                    num_tasks: s.num_tasks,
                    submitted: format_instant(s.submitted),
                    completed: format_instant(s.completed),
                    logged_duration_s: seconds(s.completed - s.submitted),
                    window_start: window.map(|w| format_instant(w.start)),
                    window_end: window.map(|w| format_instant(w.end)),
                    window_duration_s: window.map(|w| seconds(w.end - w.start)),
                }
            })
            .collect();

        Self {
            source: analysis.source.clone(),
            cpus_available: analysis.cpus_available,
            substages,
            executors,
            stages,
            stats: analysis.stats.clone(),
        }
    }
}

// ---------------------------------------------------------------------------
// Writers
// ---------------------------------------------------------------------------

pub fn write_json<W: Write>(report: &Report, mut writer: W) -> Result<()> {
    serde_json::to_writer_pretty(&mut writer, report).context("serializing report")?;
    writeln!(writer)?;
    Ok(())
}

fn write_table<R: CsvTable>(path: &Path, rows: &[R]) -> Result<()> {
    let mut writer = csv::Writer::from_path(path).with_context(|| format!("creating {}", path.display()))?;
    writer.write_record(R::HEADERS)?;
    for row in rows {
        writer.write_record(row.record())?;
    }
    writer.flush()?;
    Ok(())
}

pub fn write_csv_dir(report: &Report, dir: &Path) -> Result<Vec<PathBuf>> {
    std::fs::create_dir_all(dir).with_context(|| format!("creating {}", dir.display()))?;

    let substages = dir.join(SUBSTAGES_CSV);
    let executors = dir.join(EXECUTORS_CSV);
    let stages = dir.join(STAGES_CSV);
    write_table(&substages, &report.substages)?;
    write_table(&executors, &report.executors)?;
    write_table(&stages, &report.stages)?;
    Ok(vec![substages, executors, stages])
}

/// Write the report in `format`. JSON without `out_dir` goes to stdout.
/// Returns the files written.
pub fn write_report(report: &Report, format: OutputFormat, out_dir: Option<&Path>) -> Result<Vec<PathBuf>> {
    match (format, out_dir) {
        (OutputFormat::Json, None) => {
            let stdout = std::io::stdout();
            write_json(report, stdout.lock())?;
            Ok(Vec::new())
        }
        (OutputFormat::Json, Some(dir)) => {
            std::fs::create_dir_all(dir).with_context(|| format!("creating {}", dir.display()))?;
            let path = dir.join(JSON_FILE);
            let file = File::create(&path).with_context(|| format!("creating {}", path.display()))?;
            write_json(report, std::io::BufWriter::new(file))?;
            Ok(vec![path])
        }
        (OutputFormat::Csv, Some(dir)) => write_csv_dir(report, dir),
        (OutputFormat::Csv, None) => anyhow::bail!("CSV output needs --out-dir"),
    }
}
