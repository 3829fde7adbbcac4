//! Substage borders from task-derived stage windows.
//!
//! Logged stage submission/completion times are not used: they can fall
//! outside the span of the stage's tasks.

use std::collections::{BTreeMap, BTreeSet};

use super::model::{Nanos, StageWindow, TaskRecord};

/// Per-stage window `(min start - 1ns, max end]` and the sorted,
/// deduplicated union of all window endpoints.
pub fn resolve_borders(tasks: &[TaskRecord]) -> (Vec<Nanos>, Vec<StageWindow>) {
    let mut windows: BTreeMap<i64, StageWindow> = BTreeMap::new();

    for task in tasks {
        windows
            .entry(task.stage_id)
            .and_modify(|w| {
                w.start = w.start.min(task.start - 1);
                w.end = w.end.max(task.end);
            })
            .or_insert(StageWindow {
                stage_id: task.stage_id,
                start: task.start - 1,
                end: task.end,
            });
    }

    let borders: BTreeSet<Nanos> = windows.values().flat_map(|w| [w.start, w.end]).collect();
    let borders: Vec<Nanos> = borders.into_iter().collect();
    let windows: Vec<StageWindow> = windows.into_values().collect();

    tracing::debug!(stages = windows.len(), borders = borders.len(), "Resolved substage borders");
    (borders, windows)
}

/// Borders at which tasks are split: all but the outermost two.
pub fn inner_borders(borders: &[Nanos]) -> &[Nanos] {
    if borders.len() <= 2 {
        &[]
    } else {
        &borders[1..borders.len() - 1]
    }
}
