//! Splitting tasks at inner substage borders.
//!
//! A task `[start, end)` straddles border `b` when `start <= b < end`. It is
//! cut into `[start, b]` and `[b + 1ns, end)` and every metric is shared out
//! in proportion to each side's duration.
//!
//! Borders are applied in increasing order and only the right-hand
//! remainder can straddle a later border, so each task is split on its own
//! with a binary search instead of re-scanning every record per border.

use rayon::prelude::*;

use super::borders::inner_borders;
use super::model::{Nanos, Side, SplitMark, SplitTaskRecord, TaskArena, TaskRecord};

/// Default threshold below which a split piece is treated as a rounding artifact.
pub const DEFAULT_NEGLIGIBLE_THRESHOLD: f64 = 1e-2;

#[derive(Debug, Default)]
pub struct SplitOutcome {
    pub pieces: Vec<SplitTaskRecord>,
    /// Tasks cut at one or more borders.
    pub split_tasks: usize,
    /// Split pieces dropped as negligible.
    pub discarded: usize,
}

/// Split one task at every inner border it straddles. `borders` is the full
/// border list; provenance indexes into it. Nothing is discarded here.
pub fn split_task(source: usize, task: &TaskRecord, borders: &[Nanos]) -> Vec<SplitTaskRecord> {
    let inner = inner_borders(borders);
    let first = inner.partition_point(|&b| b < task.start);

    let mut remainder = SplitTaskRecord::whole(source, task);
    let mut pieces = Vec::new();

    for (offset, &border) in inner[first..].iter().enumerate() {
        if border >= remainder.end {
            break;
        }
        // +1 for the outermost border that inner_borders skips
        let border_index = first + offset + 1;
        let (left, right) = cut(remainder, border, border_index);
        pieces.push(left);
        remainder = right;
    }

    pieces.push(remainder);
    pieces
}

fn cut(record: SplitTaskRecord, border: Nanos, border_index: usize) -> (SplitTaskRecord, SplitTaskRecord) {
    let total = (record.end - record.start) as f64;
    let left_share = (border - record.start) as f64 / total;
    let right_share = (record.end - border - 1) as f64 / total;

    let mut left_marks = record.provenance.clone();
    left_marks.push(SplitMark {
        border_index,
        side: Side::Left,
    });
    let mut right_marks = record.provenance;
    right_marks.push(SplitMark {
        border_index,
        side: Side::Right,
    });

    let left = SplitTaskRecord {
        source: record.source,
        task_id: record.task_id,
        stage_id: record.stage_id,
        start: record.start,
        end: border,
        metrics: record.metrics.scaled(left_share),
        provenance: left_marks,
    };
    let right = SplitTaskRecord {
        source: record.source,
        task_id: record.task_id,
        stage_id: record.stage_id,
        start: border + 1,
        end: record.end,
        metrics: record.metrics.scaled(right_share),
        provenance: right_marks,
    };
    (left, right)
}

/// Split every task in the arena on the pool and drop negligible split pieces.
///
/// Output order follows the arena order, so the result does not depend on
/// the pool size.
pub fn split_on_borders(
    arena: &TaskArena,
    borders: &[Nanos],
    threshold: f64,
    pool: &rayon::ThreadPool,
) -> SplitOutcome {
    let per_task: Vec<Vec<SplitTaskRecord>> = pool.install(|| {
        arena
            .tasks()
            .par_iter()
            .enumerate()
            .map(|(idx, task)| split_task(idx, task, borders))
            .collect()
    });

    let mut outcome = SplitOutcome::default();
    for pieces in per_task {
        if pieces.len() > 1 {
            outcome.split_tasks += 1;
        }
        for piece in pieces {
            if piece.is_split() && piece.metrics.is_negligible(threshold) {
                outcome.discarded += 1;
                continue;
            }
            outcome.pieces.push(piece);
        }
    }

    tracing::debug!(
        tasks = arena.len(),
        split = outcome.split_tasks,
        pieces = outcome.pieces.len(),
        discarded = outcome.discarded,
        "Split tasks on substage borders"
    );
    outcome
}
