//! Typed records flowing between pipeline phases.

use std::collections::HashSet;
use std::ops::AddAssign;

use chrono::{DateTime, SecondsFormat};
use serde::Serialize;

/// Nanoseconds since the Unix epoch.
pub type Nanos = i64;

pub const NANOS_PER_MILLI: i64 = 1_000_000;
pub const NANOS_PER_SEC: f64 = 1e9;

/// Event-log timestamps are epoch milliseconds.
pub fn millis_to_nanos(ms: i64) -> Option<Nanos> {
    ms.checked_mul(NANOS_PER_MILLI)
}

/// RFC 3339 with full nanosecond precision, always in UTC.
pub fn format_instant(ns: Nanos) -> String {
    DateTime::from_timestamp_nanos(ns).to_rfc3339_opts(SecondsFormat::Nanos, true)
}

// ---------------------------------------------------------------------------
// Metrics
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Metric {
    CpuUsage,
    SerdeOverhead,
    ShuffleOverhead,
    DiskSpill,
}

impl Metric {
    /// Every metric that is redistributed when a task is split.
    pub const ALL: [Metric; 4] = [
        Metric::CpuUsage,
        Metric::SerdeOverhead,
        Metric::ShuffleOverhead,
        Metric::DiskSpill,
    ];

    /// Metrics measured in CPU nanoseconds (the ones with an efficiency ratio).
    pub const CPU_TIME: [Metric; 3] = [
        Metric::CpuUsage,
        Metric::SerdeOverhead,
        Metric::ShuffleOverhead,
    ];
}

/// Per-task (or per-piece, or per-substage) metric values.
///
/// Durations are CPU nanoseconds, `disk_spill` is bytes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct Metrics {
    pub cpu_usage: f64,
    pub serde_overhead: f64,
    pub shuffle_overhead: f64,
    pub disk_spill: f64,
}

impl Metrics {
    pub fn get(&self, metric: Metric) -> f64 {
        match metric {
            Metric::CpuUsage => self.cpu_usage,
            Metric::SerdeOverhead => self.serde_overhead,
            Metric::ShuffleOverhead => self.shuffle_overhead,
            Metric::DiskSpill => self.disk_spill,
        }
    }

    pub fn scaled(&self, factor: f64) -> Metrics {
        Metrics {
            cpu_usage: self.cpu_usage * factor,
            serde_overhead: self.serde_overhead * factor,
            shuffle_overhead: self.shuffle_overhead * factor,
            disk_spill: self.disk_spill * factor,
        }
    }

    /// True when no metric exceeds `threshold`.
    pub fn is_negligible(&self, threshold: f64) -> bool {
        Metric::ALL.iter().all(|m| self.get(*m) <= threshold)
    }
}

impl AddAssign for Metrics {
    fn add_assign(&mut self, rhs: Metrics) {
        self.cpu_usage += rhs.cpu_usage;
        self.serde_overhead += rhs.serde_overhead;
        self.shuffle_overhead += rhs.shuffle_overhead;
        self.disk_spill += rhs.disk_spill;
    }
}

// ---------------------------------------------------------------------------
// Extracted records
// ---------------------------------------------------------------------------

/// One finished task, normalized from a `SparkListenerTaskEnd` event.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TaskRecord {
    pub task_id: i64,
    pub stage_id: i64,
    pub executor_id: i64,
    pub start: Nanos,
    pub end: Nanos,
    pub metrics: Metrics,
    /// Absent when the event carried no executor metrics; never defaulted to 0.
    pub execution_memory: Option<u64>,
    pub storage_memory: Option<u64>,
}

impl TaskRecord {
    pub fn duration(&self) -> Nanos {
        self.end - self.start
    }
}

/// Logged stage timing from `SparkListenerStageCompleted`. Display only.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StageRecord {
    pub stage_id: i64,
    pub name: Option<String>,
    pub num_tasks: Option<u64>,
    pub submitted: Nanos,
    pub completed: Nanos,
}

/// Task-derived activity window of a stage: (min start − 1ns, max end].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct StageWindow {
    pub stage_id: i64,
    pub start: Nanos,
    pub end: Nanos,
}

/// Immutable store of extracted tasks. Split pieces point back into it by index.
#[derive(Debug, Default)]
pub struct TaskArena {
    tasks: Vec<TaskRecord>,
}

impl TaskArena {
    pub fn new(tasks: Vec<TaskRecord>) -> Self {
        let mut seen = HashSet::with_capacity(tasks.len());
        for task in &tasks {
            if !seen.insert(task.task_id) {
                tracing::warn!(task_id = task.task_id, "Duplicate task id in event log");
            }
        }
        Self { tasks }
    }

    pub fn get(&self, idx: usize) -> &TaskRecord {
        &self.tasks[idx]
    }

    pub fn tasks(&self) -> &[TaskRecord] {
        &self.tasks
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }
}

// ---------------------------------------------------------------------------
// Split pieces and aggregates
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    Left,
    Right,
}

/// Which border cut produced a piece. `border_index` indexes the full border list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SplitMark {
    pub border_index: usize,
    pub side: Side,
}

/// A task, or a piece of one, after splitting on the inner borders.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SplitTaskRecord {
    /// Index of the source task in the [`TaskArena`].
    #[serde(skip)]
    pub source: usize,
    pub task_id: i64,
    pub stage_id: i64,
    pub start: Nanos,
    pub end: Nanos,
    pub metrics: Metrics,
    /// Empty for a task that was not split.
    pub provenance: Vec<SplitMark>,
}

impl SplitTaskRecord {
    pub fn whole(source: usize, task: &TaskRecord) -> Self {
        Self {
            source,
            task_id: task.task_id,
            stage_id: task.stage_id,
            start: task.start,
            end: task.end,
            metrics: task.metrics,
            provenance: Vec::new(),
        }
    }

    pub fn duration(&self) -> Nanos {
        self.end - self.start
    }

    pub fn is_split(&self) -> bool {
        !self.provenance.is_empty()
    }
}

/// Summed metrics over one non-empty interval `(start, end]` between two borders.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SubstageAggregate {
    /// Position of `start` in the border list.
    pub interval: usize,
    pub start: Nanos,
    pub end: Nanos,
    pub duration: Nanos,
    pub stage_ids: Vec<i64>,
    pub metrics: Metrics,
    pub piece_count: usize,
}

/// Spill and memory of one executor within one substage.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExecutorSpill {
    pub interval: usize,
    pub start: Nanos,
    pub end: Nanos,
    pub executor_id: i64,
    pub disk_spill: f64,
    pub execution_memory_peak: Option<u64>,
    pub storage_memory_peak: Option<u64>,
    pub stage_ids: Vec<i64>,
}
