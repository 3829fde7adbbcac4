//! Typed extraction of task and stage records from retained raw events.
//!
//! A TaskEnd event whose shape does not match what Spark writes is a
//! schema violation and aborts the run; no defaults are substituted for
//! missing CPU-time fields.

use std::collections::{BTreeMap, BTreeSet};

use rayon::prelude::*;
use serde::Deserialize;

use super::model::{millis_to_nanos, Metrics, Nanos, StageRecord, TaskRecord};
use super::parser::{StageCompletedEvent, TaskEndEvent};
use crate::error::{Origin, PipelineError, Result};

// ---------------------------------------------------------------------------
// Raw deserialization types
// ---------------------------------------------------------------------------

#[derive(Deserialize)]
struct RawTaskEnd {
    #[serde(rename = "Stage ID")]
    stage_id: Option<i64>,
    #[serde(rename = "Task Info")]
    task_info: Option<RawTaskInfo>,
    #[serde(rename = "Task Metrics")]
    task_metrics: Option<RawTaskMetrics>,
    #[serde(rename = "Task Executor Metrics")]
    executor_metrics: Option<RawExecutorMetrics>,
}

#[derive(Deserialize)]
struct RawTaskInfo {
    #[serde(rename = "Task ID")]
    task_id: Option<i64>,
    #[serde(rename = "Launch Time")]
    launch_time: Option<i64>,
    #[serde(rename = "Finish Time")]
    finish_time: Option<i64>,
    #[serde(rename = "Executor ID")]
    executor_id: Option<String>,
}

#[derive(Deserialize)]
struct RawTaskMetrics {
    #[serde(rename = "Executor CPU Time")]
    executor_cpu_time: Option<f64>,
    #[serde(rename = "Executor Deserialize CPU Time")]
    deserialize_cpu_time: Option<f64>,
    #[serde(rename = "Result Serialization Time")]
    result_serialization_time: Option<f64>,
    #[serde(rename = "Disk Bytes Spilled")]
    disk_bytes_spilled: Option<f64>,
    #[serde(rename = "Shuffle Read Metrics")]
    shuffle_read: Option<RawShuffleRead>,
    #[serde(rename = "Shuffle Write Metrics")]
    shuffle_write: Option<RawShuffleWrite>,
}

#[derive(Deserialize)]
struct RawShuffleRead {
    #[serde(rename = "Fetch Wait Time")]
    fetch_wait_time: Option<f64>,
}

#[derive(Deserialize)]
struct RawShuffleWrite {
    #[serde(rename = "Shuffle Write Time")]
    shuffle_write_time: Option<f64>,
}

#[derive(Deserialize)]
struct RawExecutorMetrics {
    #[serde(rename = "OnHeapExecutionMemory")]
    on_heap_execution: Option<u64>,
    #[serde(rename = "OnHeapStorageMemory")]
    on_heap_storage: Option<u64>,
}

#[derive(Deserialize)]
struct RawStageCompleted {
    #[serde(rename = "Stage Info")]
    stage_info: Option<RawStageInfo>,
}

#[derive(Deserialize)]
struct RawStageInfo {
    #[serde(rename = "Stage ID")]
    stage_id: Option<i64>,
    #[serde(rename = "Stage Name")]
    name: Option<String>,
    #[serde(rename = "Number of Tasks")]
    num_tasks: Option<u64>,
    #[serde(rename = "Submission Time")]
    submission_time: Option<i64>,
    #[serde(rename = "Completion Time")]
    completion_time: Option<i64>,
}

// ---------------------------------------------------------------------------
// Field helpers
// ---------------------------------------------------------------------------

fn require<T>(value: Option<T>, origin: &Origin, field: &str) -> Result<T> {
    value.ok_or_else(|| PipelineError::schema(origin, format!("missing field '{}'", field)))
}

fn non_negative(value: f64, origin: &Origin, field: &str) -> Result<f64> {
    if value < 0.0 || !value.is_finite() {
        return Err(PipelineError::schema(
            origin,
            format!("field '{}' must be a finite non-negative number, got {}", field, value),
        ));
    }
    Ok(value)
}

fn instant(ms: i64, origin: &Origin, field: &str) -> Result<Nanos> {
    millis_to_nanos(ms).ok_or_else(|| {
        PipelineError::schema(origin, format!("field '{}' overflows nanosecond range: {}", field, ms))
    })
}

// ---------------------------------------------------------------------------
// Tasks
// ---------------------------------------------------------------------------

/// Decode one TaskEnd event into a [`TaskRecord`].
pub fn extract_task(event: &TaskEndEvent) -> Result<TaskRecord> {
    let origin = &event.origin;
    let raw: RawTaskEnd = serde_json::from_str(&event.raw)
        .map_err(|e| PipelineError::schema(origin, format!("malformed task end event: {}", e)))?;

    let stage_id = require(raw.stage_id, origin, "Stage ID")?;
    let info = require(raw.task_info, origin, "Task Info")?;
    let metrics = require(raw.task_metrics, origin, "Task Metrics")?;

    let task_id = require(info.task_id, origin, "Task Info.Task ID")?;
    let launch = require(info.launch_time, origin, "Task Info.Launch Time")?;
    let finish = require(info.finish_time, origin, "Task Info.Finish Time")?;
    let executor = require(info.executor_id, origin, "Task Info.Executor ID")?;

    let executor_id: i64 = executor.trim().parse().map_err(|_| {
        PipelineError::schema(
            origin,
            format!("field 'Task Info.Executor ID' is not an integer: {:?}", executor),
        )
    })?;

    let start = instant(launch, origin, "Task Info.Launch Time")?;
    let end = instant(finish, origin, "Task Info.Finish Time")?;
    if end < start {
        return Err(PipelineError::schema(
            origin,
            format!("task {} finishes before it starts ({} < {})", task_id, finish, launch),
        ));
    }

    let cpu_time = require(metrics.executor_cpu_time, origin, "Task Metrics.Executor CPU Time")?;
    let deser_cpu = require(
        metrics.deserialize_cpu_time,
        origin,
        "Task Metrics.Executor Deserialize CPU Time",
    )?;
    let result_ser_ms = require(
        metrics.result_serialization_time,
        origin,
        "Task Metrics.Result Serialization Time",
    )?;
    let spilled = require(metrics.disk_bytes_spilled, origin, "Task Metrics.Disk Bytes Spilled")?;
    let shuffle_read = require(metrics.shuffle_read, origin, "Task Metrics.Shuffle Read Metrics")?;
    let shuffle_write = require(metrics.shuffle_write, origin, "Task Metrics.Shuffle Write Metrics")?;
    let fetch_wait = require(
        shuffle_read.fetch_wait_time,
        origin,
        "Task Metrics.Shuffle Read Metrics.Fetch Wait Time",
    )?;
    let write_time = require(
        shuffle_write.shuffle_write_time,
        origin,
        "Task Metrics.Shuffle Write Metrics.Shuffle Write Time",
    )?;

    // CPU times are already ns; result serialization time is ms.
    let metrics = Metrics {
        cpu_usage: non_negative(cpu_time, origin, "Task Metrics.Executor CPU Time")?,
        serde_overhead: non_negative(deser_cpu, origin, "Task Metrics.Executor Deserialize CPU Time")?
            + non_negative(result_ser_ms, origin, "Task Metrics.Result Serialization Time")? * 1e6,
        shuffle_overhead: non_negative(fetch_wait, origin, "Task Metrics.Shuffle Read Metrics.Fetch Wait Time")?
            + non_negative(write_time, origin, "Task Metrics.Shuffle Write Metrics.Shuffle Write Time")?,
        disk_spill: non_negative(spilled, origin, "Task Metrics.Disk Bytes Spilled")?,
    };

    let (execution_memory, storage_memory) = match raw.executor_metrics {
        Some(m) => (m.on_heap_execution, m.on_heap_storage),
        None => (None, None),
    };

    Ok(TaskRecord {
        task_id,
        stage_id,
        executor_id,
        start,
        end,
        metrics,
        execution_memory,
        storage_memory,
    })
}

/// Extract every task, one rayon job per stage partition.
///
/// The result is sorted by (stage, task, start, end) whatever order the
/// partitions complete in.
pub fn extract_tasks(events: &[TaskEndEvent], pool: &rayon::ThreadPool) -> Result<Vec<TaskRecord>> {
    let mut partitions: BTreeMap<Option<i64>, Vec<&TaskEndEvent>> = BTreeMap::new();
    for event in events {
        partitions.entry(event.stage_id).or_default().push(event);
    }
    let partitions: Vec<Vec<&TaskEndEvent>> = partitions.into_values().collect();

    tracing::debug!(partitions = partitions.len(), events = events.len(), "Extracting tasks");

    let extracted: Vec<Vec<TaskRecord>> = pool.install(|| {
        partitions
            .par_iter()
            .map(|part| part.iter().map(|ev| extract_task(ev)).collect::<Result<Vec<_>>>())
            .collect::<Result<Vec<_>>>()
    })?;

    let mut tasks: Vec<TaskRecord> = extracted.into_iter().flatten().collect();
    tasks.sort_by_key(|t| (t.stage_id, t.task_id, t.start, t.end));
    Ok(tasks)
}

// ---------------------------------------------------------------------------
// Stages
// ---------------------------------------------------------------------------

pub fn extract_stage(event: &StageCompletedEvent) -> Result<StageRecord> {
    let origin = &event.origin;
    let raw: RawStageCompleted = serde_json::from_str(&event.raw)
        .map_err(|e| PipelineError::schema(origin, format!("malformed stage completed event: {}", e)))?;

    let info = require(raw.stage_info, origin, "Stage Info")?;
    let stage_id = require(info.stage_id, origin, "Stage Info.Stage ID")?;

    let submission = require(info.submission_time, origin, "Stage Info.Submission Time")?;
    let completion = require(info.completion_time, origin, "Stage Info.Completion Time")?;
    let submitted = instant(submission, origin, "Stage Info.Submission Time")?;
    let completed = instant(completion, origin, "Stage Info.Completion Time")?;

    Ok(StageRecord {
        stage_id,
        name: info.name,
        num_tasks: info.num_tasks,
        submitted,
        completed,
    })
}

/// One record per stage id, ascending. Later completions of the same
/// stage (retried attempts) replace earlier ones.
pub fn extract_stages(events: &[StageCompletedEvent]) -> Result<Vec<StageRecord>> {
    let mut stages: BTreeMap<i64, StageRecord> = BTreeMap::new();
    for event in events {
        let stage = extract_stage(event)?;
        if let Some(previous) = stages.insert(stage.stage_id, stage) {
            tracing::warn!(
                stage_id = previous.stage_id,
                origin = %event.origin,
                "Stage completed more than once, keeping the last completion"
            );
        }
    }
    Ok(stages.into_values().collect())
}

/// Keep only tasks whose stage has a completion event. Returns the kept
/// tasks and the number dropped.
pub fn retain_completed_stages(tasks: Vec<TaskRecord>, stages: &[StageRecord]) -> (Vec<TaskRecord>, usize) {
    let completed: BTreeSet<i64> = stages.iter().map(|s| s.stage_id).collect();
    let before = tasks.len();
    let kept: Vec<TaskRecord> = tasks
        .into_iter()
        .filter(|t| completed.contains(&t.stage_id))
        .collect();
    let dropped = before - kept.len();

    if dropped > 0 {
        tracing::info!(dropped, kept = kept.len(), "Dropped tasks of stages that never completed");
    }
    (kept, dropped)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
