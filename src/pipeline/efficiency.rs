//! CPU efficiency per substage: consumed CPU time over available CPU time.

use serde::Serialize;

use super::model::{Metric, Nanos, SubstageAggregate};

/// Ratios for the CPU-time metrics. Disk spill is bytes and has none.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct Efficiency {
    pub cpu_usage: f64,
    pub serde_overhead: f64,
    pub shuffle_overhead: f64,
}

impl Efficiency {
    fn slot_mut(&mut self, metric: Metric) -> Option<&mut f64> {
        match metric {
            Metric::CpuUsage => Some(&mut self.cpu_usage),
            Metric::SerdeOverhead => Some(&mut self.serde_overhead),
            Metric::ShuffleOverhead => Some(&mut self.shuffle_overhead),
            Metric::DiskSpill => None,
        }
    }

    /// Sum of all ratios: the share of available CPU the substage kept busy.
    pub fn total(&self) -> f64 {
        self.cpu_usage + self.serde_overhead + self.shuffle_overhead
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SubstageEfficiency {
    #[serde(flatten)]
    pub aggregate: SubstageAggregate,
    /// `duration * cpus_available`, in CPU nanoseconds.
    pub available_cpu_time: f64,
    pub efficiency: Efficiency,
}

pub fn available_cpu_time(duration: Nanos, cpus_available: u32) -> f64 {
    duration as f64 * f64::from(cpus_available)
}

/// `summed / (duration * cpus_available)`, and exactly 0 when nothing was consumed.
pub fn efficiency_ratio(summed: f64, duration: Nanos, cpus_available: u32) -> f64 {
    if summed == 0.0 {
        return 0.0;
    }
    summed / available_cpu_time(duration, cpus_available)
}

pub fn compute_efficiency(aggregates: Vec<SubstageAggregate>, cpus_available: u32) -> Vec<SubstageEfficiency> {
    aggregates
        .into_iter()
        .map(|aggregate| {
            let mut efficiency = Efficiency::default();
            for metric in Metric::CPU_TIME {
                if let Some(slot) = efficiency.slot_mut(metric) {
                    *slot = efficiency_ratio(aggregate.metrics.get(metric), aggregate.duration, cpus_available);
                }
            }
            SubstageEfficiency {
                available_cpu_time: available_cpu_time(aggregate.duration, cpus_available),
                efficiency,
                aggregate,
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::model::Metrics;

    fn aggregate(duration: Nanos, metrics: Metrics) -> SubstageAggregate {
        SubstageAggregate {
            interval: 0,
            start: -1,
            end: duration - 1,
            duration,
            stage_ids: vec![7],
            metrics,
            piece_count: 2,
        }
    }

    #[test]
    fn test_single_stage_ratio() {
        // 10s of CPU over ~15s on 2 cores
        let rows = compute_efficiency(
            vec![aggregate(
                15_000_000_001,
                Metrics {
                    cpu_usage: 10e9,
                    ..Metrics::default()
                },
            )],
            2,
        );

        let row = &rows[0];
        assert_eq!(row.available_cpu_time, 30_000_000_002.0);
        assert!((row.efficiency.cpu_usage - 1.0 / 3.0).abs() < 1e-6);
        assert_eq!(row.efficiency.serde_overhead, 0.0);
        assert_eq!(row.efficiency.shuffle_overhead, 0.0);
    }

    #[test]
    fn test_ratio_matches_formula() {
        let metrics = Metrics {
            cpu_usage: 4e9,
            serde_overhead: 1e9,
            shuffle_overhead: 5e8,
            disk_spill: 1e12,
        };
        let rows = compute_efficiency(vec![aggregate(2_000_000_000, metrics)], 4);
        let eff = rows[0].efficiency;

        assert_eq!(eff.cpu_usage, 4e9 / 8e9);
        assert_eq!(eff.serde_overhead, 1e9 / 8e9);
        assert_eq!(eff.shuffle_overhead, 5e8 / 8e9);
        assert!((eff.total() - 0.6875).abs() < 1e-12);
    }

    #[test]
    fn test_zero_metric_is_zero_ratio() {
        assert_eq!(efficiency_ratio(0.0, 0, 8), 0.0);
        assert_eq!(efficiency_ratio(0.0, 1_000, 8), 0.0);
    }

    #[test]
    fn test_serializes_flat() {
        let rows = compute_efficiency(vec![aggregate(10, Metrics::default())], 1);
        let value = serde_json::to_value(&rows[0]).unwrap();
        assert_eq!(value["duration"], 10);
        assert_eq!(value["efficiency"]["cpu_usage"], 0.0);
        assert!(value.get("aggregate").is_none());
    }

    #[test]
    fn test_spill_never_gets_a_ratio() {
        let mut eff = Efficiency::default();
        assert!(eff.slot_mut(Metric::DiskSpill).is_none());
        for metric in Metric::CPU_TIME {
            assert!(eff.slot_mut(metric).is_some(), "{:?} should have a ratio", metric);
        }
    }
}
