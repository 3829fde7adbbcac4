//! Grouping split pieces into substages.
//!
//! A piece belongs to the interval `(borders[i], borders[i + 1]]` holding its
//! end. Every piece must lie entirely inside that interval; if one does not,
//! the splitter is broken and the run fails instead of reporting wrong sums.

use std::collections::{BTreeMap, BTreeSet};

use super::model::{ExecutorSpill, Metrics, Nanos, SplitTaskRecord, SubstageAggregate, TaskArena};
use crate::error::{PipelineError, Result};

/// Index `i` of the interval `(borders[i], borders[i + 1]]` containing `piece`.
pub fn assign_interval(piece: &SplitTaskRecord, borders: &[Nanos]) -> Result<usize> {
    let idx = borders.partition_point(|&b| b < piece.end);

    if idx == 0 || idx >= borders.len() {
        return Err(PipelineError::SplitInvariantViolation {
            task_id: piece.task_id,
            start: piece.start,
            end: piece.end,
            interval_start: borders.first().copied().unwrap_or_default(),
            interval_end: borders.last().copied().unwrap_or_default(),
        });
    }

    let (lo, hi) = (borders[idx - 1], borders[idx]);
    if piece.start <= lo || piece.end > hi {
        return Err(PipelineError::SplitInvariantViolation {
            task_id: piece.task_id,
            start: piece.start,
            end: piece.end,
            interval_start: lo,
            interval_end: hi,
        });
    }
    Ok(idx - 1)
}

#[derive(Default)]
struct SubstageAcc {
    stage_ids: BTreeSet<i64>,
    metrics: Metrics,
    pieces: usize,
}

/// One aggregate per non-empty interval, in time order.
pub fn aggregate_substages(pieces: &[SplitTaskRecord], borders: &[Nanos]) -> Result<Vec<SubstageAggregate>> {
    let mut groups: BTreeMap<usize, SubstageAcc> = BTreeMap::new();

    for piece in pieces {
        let interval = assign_interval(piece, borders)?;
        let acc = groups.entry(interval).or_default();
        acc.stage_ids.insert(piece.stage_id);
        acc.metrics += piece.metrics;
        acc.pieces += 1;
    }

    let substages: Vec<SubstageAggregate> = groups
        .into_iter()
        .map(|(interval, acc)| {
            let (start, end) = (borders[interval], borders[interval + 1]);
            SubstageAggregate {
                interval,
                start,
                end,
                duration: end - start,
                stage_ids: acc.stage_ids.into_iter().collect(),
                metrics: acc.metrics,
                piece_count: acc.pieces,
            }
        })
        .collect();

    let intervals = borders.len().saturating_sub(1);
    if substages.len() < intervals {
        tracing::debug!(
            dropped = intervals - substages.len(),
            "Dropped substages without contributing tasks"
        );
    }
    Ok(substages)
}

#[derive(Default)]
struct ExecutorAcc {
    disk_spill: f64,
    execution_memory_peak: Option<u64>,
    storage_memory_peak: Option<u64>,
    stage_ids: BTreeSet<i64>,
}

/// Spill and memory per (substage, executor), ordered by interval then executor.
pub fn aggregate_executors(
    pieces: &[SplitTaskRecord],
    arena: &TaskArena,
    borders: &[Nanos],
) -> Result<Vec<ExecutorSpill>> {
    let mut groups: BTreeMap<(usize, i64), ExecutorAcc> = BTreeMap::new();

    for piece in pieces {
        let interval = assign_interval(piece, borders)?;
        let task = arena.get(piece.source);
        let acc = groups.entry((interval, task.executor_id)).or_default();

        acc.disk_spill += piece.metrics.disk_spill;
        // Memory is a level: peak, never summed. None < Some.
        acc.execution_memory_peak = acc.execution_memory_peak.max(task.execution_memory);
        acc.storage_memory_peak = acc.storage_memory_peak.max(task.storage_memory);
        acc.stage_ids.insert(piece.stage_id);
    }

    Ok(groups
        .into_iter()
        .map(|((interval, executor_id), acc)| ExecutorSpill {
            interval,
            start: borders[interval],
            end: borders[interval + 1],
            executor_id,
            disk_spill: acc.disk_spill,
            execution_memory_peak: acc.execution_memory_peak,
            storage_memory_peak: acc.storage_memory_peak,
            stage_ids: acc.stage_ids.into_iter().collect(),
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::borders::resolve_borders;
    use crate::pipeline::model::TaskRecord;
    use crate::pipeline::split::{split_on_borders, DEFAULT_NEGLIGIBLE_THRESHOLD};
    use pretty_assertions::assert_eq;
    use proptest::prelude::*;

    const SEC: Nanos = 1_000_000_000;

    fn task(task_id: i64, stage_id: i64, executor_id: i64, start: Nanos, end: Nanos, cpu: f64) -> TaskRecord {
        TaskRecord {
            task_id,
            stage_id,
            executor_id,
            start,
            end,
            metrics: Metrics {
                cpu_usage: cpu,
                disk_spill: cpu / 2.0,
                ..Metrics::default()
            },
            execution_memory: None,
            storage_memory: None,
        }
    }

    fn run(tasks: Vec<TaskRecord>) -> (TaskArena, Vec<Nanos>, Vec<SplitTaskRecord>) {
        let arena = TaskArena::new(tasks);
        let (borders, _) = resolve_borders(arena.tasks());
        let pool = rayon::ThreadPoolBuilder::new().num_threads(2).build().unwrap();
        let pieces = split_on_borders(&arena, &borders, DEFAULT_NEGLIGIBLE_THRESHOLD, &pool).pieces;
        (arena, borders, pieces)
    }

    #[test]
    fn test_single_stage_single_substage() {
        let (_, borders, pieces) = run(vec![
            task(1, 7, 1, 0, 10 * SEC, 5e9),
            task(2, 7, 1, 5 * SEC, 15 * SEC, 5e9),
        ]);
        let substages = aggregate_substages(&pieces, &borders).unwrap();

        assert_eq!(substages.len(), 1);
        let s = &substages[0];
        assert_eq!((s.start, s.end), (-1, 15 * SEC));
        assert_eq!(s.duration, 15 * SEC + 1);
        assert_eq!(s.stage_ids, vec![7]);
        assert_eq!(s.metrics.cpu_usage, 10e9);
        assert_eq!(s.piece_count, 2);
    }

    #[test]
    fn test_overlapping_stages_split_into_substages() {
        let (_, borders, pieces) = run(vec![
            task(1, 1, 1, 0, 10 * SEC, 10e9),
            task(2, 2, 2, 5 * SEC, 20 * SEC, 15e9),
        ]);
        let substages = aggregate_substages(&pieces, &borders).unwrap();

        let spans: Vec<(Nanos, Nanos, Vec<i64>)> =
            substages.iter().map(|s| (s.start, s.end, s.stage_ids.clone())).collect();
        assert_eq!(
            spans,
            vec![
                (-1, 5 * SEC - 1, vec![1]),
                (5 * SEC - 1, 10 * SEC, vec![1, 2]),
                (10 * SEC, 20 * SEC, vec![2]),
            ]
        );

        let total: f64 = substages.iter().map(|s| s.metrics.cpu_usage).sum();
        assert!((total - 25e9).abs() < 1e3);
    }

    #[test]
    fn test_empty_interval_is_dropped() {
        let (_, borders, pieces) = run(vec![
            task(1, 1, 1, 0, 10 * SEC, 1e9),
            task(2, 2, 1, 20 * SEC, 30 * SEC, 1e9),
        ]);
        assert_eq!(borders.len(), 4);

        let substages = aggregate_substages(&pieces, &borders).unwrap();
        assert_eq!(substages.len(), 2);
        assert_eq!(substages[0].interval, 0);
        assert_eq!(substages[1].interval, 2);
    }

    #[test]
    fn test_piece_crossing_border_is_violation() {
        let arena = TaskArena::new(vec![task(9, 1, 1, 0, 100, 1.0)]);
        let crossing = SplitTaskRecord::whole(0, arena.get(0));
        let err = aggregate_substages(&[crossing], &[-1, 50, 100]).unwrap_err();

        match err {
            PipelineError::SplitInvariantViolation {
                task_id,
                interval_start,
                interval_end,
                ..
            } => {
                assert_eq!(task_id, 9);
                assert_eq!((interval_start, interval_end), (50, 100));
            }
            other => panic!("expected SplitInvariantViolation, got {:?}", other),
        }
    }

    #[test]
    fn test_piece_outside_all_intervals_is_violation() {
        let arena = TaskArena::new(vec![task(3, 1, 1, 200, 300, 1.0)]);
        let piece = SplitTaskRecord::whole(0, arena.get(0));
        let err = aggregate_substages(&[piece], &[-1, 100]).unwrap_err();
        assert!(matches!(err, PipelineError::SplitInvariantViolation { .. }));
    }

    #[test]
    fn test_executor_series_peaks_and_sums() {
        let mut a = task(1, 1, 4, 0, 10 * SEC, 2e9);
        a.execution_memory = Some(100);
        let mut b = task(2, 1, 4, 0, 10 * SEC, 4e9);
        b.execution_memory = Some(300);
        b.storage_memory = Some(7);
        let c = task(3, 1, 5, 0, 10 * SEC, 6e9);

        let (arena, borders, pieces) = run(vec![a, b, c]);
        let executors = aggregate_executors(&pieces, &arena, &borders).unwrap();

        assert_eq!(executors.len(), 2);
        assert_eq!(executors[0].executor_id, 4);
        assert_eq!(executors[0].disk_spill, 3e9);
        assert_eq!(executors[0].execution_memory_peak, Some(300));
        assert_eq!(executors[0].storage_memory_peak, Some(7));
        assert_eq!(executors[1].executor_id, 5);
        assert_eq!(executors[1].execution_memory_peak, None);
    }

    proptest! {
        #[test]
        fn prop_substages_disjoint_and_ordered(
            specs in prop::collection::vec((0i64..4, 0i64..10_000, 1i64..5_000, 1.0f64..1e9), 1..30)
        ) {
            let tasks: Vec<TaskRecord> = specs
                .iter()
                .enumerate()
                .map(|(i, &(stage, start, len, cpu))| task(i as i64, stage, 1, start * SEC / 1000, (start + len) * SEC / 1000, cpu))
                .collect();
            let (_, borders, pieces) = run(tasks);
            let substages = aggregate_substages(&pieces, &borders).unwrap();

            for pair in substages.windows(2) {
                prop_assert!(pair[0].end <= pair[1].start);
            }
            prop_assert_eq!(substages.iter().map(|s| s.piece_count).sum::<usize>(), pieces.len());
            if substages.len() == borders.len() - 1 {
                prop_assert_eq!(substages[0].start, borders[0]);
                prop_assert_eq!(substages.last().unwrap().end, *borders.last().unwrap());
            }
        }
    }
}
