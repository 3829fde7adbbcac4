//! Repeated-run benchmark harness reporting per-phase timing.

use std::path::Path;
use std::time::Instant;

use crate::error::Result;
use crate::pipeline::{self, PhaseTimings, RunContext};

pub struct BenchResult {
    pub iterations: usize,
    pub workers: usize,
    pub bytes_per_run: u64,
    pub tasks: usize,
    pub pieces: usize,
    pub substages: usize,
    /// Summed over all iterations.
    pub phases: PhaseTimings,
    pub fastest_seconds: f64,
    pub total_seconds: f64,
}

impl BenchResult {
    pub fn print_summary(&self) {
        let runs = self.iterations.max(1) as f64;
        let per_run = self.phases.total / runs;
        let mb = self.bytes_per_run as f64 / 1_048_576.0;
        let share = |secs: f64| {
            if self.phases.total > 0.0 {
                secs / self.phases.total * 100.0
            } else {
                0.0
            }
        };

        eprintln!("\n=== Benchmark Results ===");
        eprintln!("Iterations: {}", self.iterations);
        eprintln!("Workers:    {}", self.workers);
        eprintln!("Bytes:      {:.2} MB", mb);
        eprintln!("Tasks:      {} ({} pieces, {} substages)", self.tasks, self.pieces, self.substages);
        eprintln!("Parse:      {:.3}s ({:.1}%)", self.phases.parse / runs, share(self.phases.parse));
        eprintln!("Extract:    {:.3}s ({:.1}%)", self.phases.extract / runs, share(self.phases.extract));
        eprintln!("Borders:    {:.3}s ({:.1}%)", self.phases.borders / runs, share(self.phases.borders));
        eprintln!("Split:      {:.3}s ({:.1}%)", self.phases.split / runs, share(self.phases.split));
        eprintln!("Aggregate:  {:.3}s ({:.1}%)", self.phases.aggregate / runs, share(self.phases.aggregate));
        eprintln!("Efficiency: {:.3}s ({:.1}%)", self.phases.efficiency / runs, share(self.phases.efficiency));
        eprintln!("Mean run:   {:.3}s (fastest {:.3}s)", per_run, self.fastest_seconds);
        eprintln!("Total:      {:.3}s", self.total_seconds);
        if per_run > 0.0 {
            eprintln!("Throughput: {:.1} MB/s", mb / per_run);
            eprintln!("Tasks/s:    {:.0}", self.tasks as f64 / per_run);
        }
    }
}

fn accumulate(sum: &mut PhaseTimings, run: &PhaseTimings) {
    sum.parse += run.parse;
    sum.extract += run.extract;
    sum.borders += run.borders;
    sum.split += run.split;
    sum.aggregate += run.aggregate;
    sum.efficiency += run.efficiency;
    sum.total += run.total;
}

/// Run the full pipeline `iterations` times over the same event log.
pub fn run_benchmark(path: &Path, iterations: usize, ctx: &RunContext) -> Result<BenchResult> {
    let overall_start = Instant::now();
    let mut phases = PhaseTimings::default();
    let mut fastest = f64::INFINITY;
    let mut last = None;

    for i in 0..iterations.max(1) {
        let analysis = pipeline::run(path, ctx)?;
        accumulate(&mut phases, &analysis.timings);
        fastest = fastest.min(analysis.timings.total);

        eprintln!(
            "  [{}/{}] {:.3}s, {} substages",
            i + 1,
            iterations.max(1),
            analysis.timings.total,
            analysis.substages.len()
        );
        last = Some(analysis.stats);
    }

    let stats = last.unwrap_or_default();
    Ok(BenchResult {
        iterations: iterations.max(1),
        workers: ctx.workers,
        bytes_per_run: stats.bytes_read,
        tasks: stats.tasks,
        pieces: stats.pieces,
        substages: stats.substages,
        phases,
        fastest_seconds: fastest,
        total_seconds: overall_start.elapsed().as_secs_f64(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{AnalysisConfig, WorkerCount};

    #[test]
    fn test_benchmark_accumulates_phases() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("app-1");
        let task = serde_json::json!({
            "Event": "SparkListenerTaskEnd",
            "Stage ID": 0,
            "Task Info": {"Task ID": 0, "Launch Time": 0, "Finish Time": 1000, "Executor ID": "1"},
            "Task Metrics": {
                "Executor CPU Time": 1_000_000,
                "Executor Deserialize CPU Time": 0,
                "Result Serialization Time": 0,
                "Disk Bytes Spilled": 0,
                "Shuffle Read Metrics": {"Fetch Wait Time": 0},
                "Shuffle Write Metrics": {"Shuffle Write Time": 0}
            }
        });
        let stage = serde_json::json!({
            "Event": "SparkListenerStageCompleted",
            "Stage Info": {"Stage ID": 0, "Submission Time": 0, "Completion Time": 1000}
        });
        std::fs::write(&path, format!("{}\n{}\n", task, stage)).unwrap();

        let ctx = RunContext::new(AnalysisConfig {
            total_cores: Some(4),
            workers: WorkerCount::Fixed(1),
            ..AnalysisConfig::default()
        })
        .unwrap();
        let result = run_benchmark(&path, 3, &ctx).unwrap();

        assert_eq!(result.iterations, 3);
        assert_eq!(result.tasks, 1);
        assert_eq!(result.substages, 1);
        assert!(result.phases.total >= result.fastest_seconds);
    }
}
