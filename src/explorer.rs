//! Design Space Explorer
//!
//! Sweeps the PE array and network bandwidth of the innermost level,
//! analyzes every variant in parallel and keeps the Pareto-optimal ones.

use std::sync::atomic::{AtomicUsize, Ordering};

use log::debug;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::arch::DataType;
use crate::config::{DesignSpace, ProblemConfig};

/// A single point in the design space
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DesignPoint {
    pub config: ProblemConfig,
    pub metrics: DesignMetrics,
}

/// Metrics for evaluating a design
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DesignMetrics {
    pub rows: usize,
    pub cols: usize,
    pub bandwidth: u64,
    /// Cycles of the outermost level
    pub delay: u64,
    /// PE utilization of the innermost level
    pub pe_util_rate: f64,
    pub comp_rate: f64,
    /// Summed operand bandwidth demand of the innermost level
    pub required_bandwidth: f64,
    /// Every level's buffers hold their footprint
    pub fits: bool,
}

impl DesignMetrics {
    pub fn pe_num(&self) -> usize {
        self.rows * self.cols
    }
}

/// Pareto frontier of optimal designs
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParetoFrontier {
    pub points: Vec<DesignPoint>,
    pub dominated: Vec<DesignPoint>,
}

impl ParetoFrontier {
    /// A dominates B if it is no worse in delay, PE count and bandwidth and
    /// strictly better in at least one
    fn dominates(a: &DesignMetrics, b: &DesignMetrics) -> bool {
        let no_worse = a.delay <= b.delay
            && a.pe_num() <= b.pe_num()
            && a.required_bandwidth <= b.required_bandwidth;
        let strictly_better = a.delay < b.delay
            || a.pe_num() < b.pe_num()
            || a.required_bandwidth < b.required_bandwidth;
        no_worse && strictly_better
    }

    /// Compute Pareto frontier from a set of design points
    pub fn compute(points: Vec<DesignPoint>) -> Self {
        let mut frontier: Vec<DesignPoint> = Vec::new();
        let mut dominated = Vec::new();

        for point in points {
            if frontier.iter().any(|f| Self::dominates(&f.metrics, &point.metrics)) {
                dominated.push(point);
                continue;
            }
            let (beaten, kept): (Vec<_>, Vec<_>) = frontier
                .into_iter()
                .partition(|f| Self::dominates(&point.metrics, &f.metrics));
            dominated.extend(beaten);
            frontier = kept;
            frontier.push(point);
        }

        ParetoFrontier { points: frontier, dominated }
    }
}

/// Optimization objectives
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Objective {
    MinDelay,
    MaxUtilization,
    MinBandwidth,
    /// Fewest cycles per PE spent
    MinDelayPerPe,
}

impl Objective {
    /// Higher is better
    pub fn score(&self, m: &DesignMetrics) -> f64 {
        match self {
            Objective::MinDelay => -(m.delay as f64),
            Objective::MaxUtilization => m.pe_util_rate,
            Objective::MinBandwidth => -m.required_bandwidth,
            Objective::MinDelayPerPe => -((m.delay as f64) * m.pe_num() as f64),
        }
    }
}

/// Design space exploration engine
pub struct DesignExplorer {
    pub space: DesignSpace,
    pub base: ProblemConfig,
}

impl DesignExplorer {
    pub fn new(space: DesignSpace, base: ProblemConfig) -> Self {
        DesignExplorer { space, base }
    }

    /// Explore the full design space (parallel). Variants whose mapping does
    /// not fit the array are dropped.
    pub fn explore(&self) -> Vec<DesignPoint> {
        self.space
            .enumerate(&self.base)
            .into_par_iter()
            .filter_map(evaluate)
            .collect()
    }

    /// Explore with progress callback
    pub fn explore_with_progress<F>(&self, callback: F) -> Vec<DesignPoint>
    where
        F: Fn(usize, usize) + Sync,
    {
        let configs = self.space.enumerate(&self.base);
        let total = configs.len();
        let counter = AtomicUsize::new(0);

        configs
            .into_par_iter()
            .filter_map(|config| {
                let point = evaluate(config);
                let count = counter.fetch_add(1, Ordering::SeqCst);
                callback(count + 1, total);
                point
            })
            .collect()
    }

    /// Find best configuration for a specific objective
    pub fn find_best<'a>(points: &'a [DesignPoint], objective: Objective) -> Option<&'a DesignPoint> {
        points.iter().max_by(|a, b| {
            objective
                .score(&a.metrics)
                .total_cmp(&objective.score(&b.metrics))
        })
    }
}

/// Analyze one variant
pub fn evaluate(config: ProblemConfig) -> Option<DesignPoint> {
    let mut analyzer = match config.build() {
        Ok(a) => a,
        Err(e) => {
            debug!("{}: {}", config.name, e);
            return None;
        }
    };
    let report = match analyzer.run_analysis() {
        Ok(r) => r,
        Err(e) => {
            debug!("{} {}x{}: {}", config.name, config.levels[0].rows, config.levels[0].cols, e);
            return None;
        }
    };
    let fits = analyzer.check_required_data_size().unwrap_or(false);
    let inner = &report.levels[0];
    let outer = report.levels.last()?;
    let level = &config.levels[0];
    let metrics = DesignMetrics {
        rows: level.rows,
        cols: level.cols,
        bandwidth: level.input.bandwidth,
        delay: outer.delay,
        pe_util_rate: inner.pe_util_rate,
        comp_rate: inner.comp_rate,
        required_bandwidth: DataType::ALL
            .iter()
            .map(|dt| inner.total_bandwidth[dt.index()])
            .sum(),
        fits,
    };
    Some(DesignPoint { config, metrics })
}

/// How the outermost delay responds to the innermost network bandwidth
#[derive(Debug, Clone)]
pub struct SensitivityAnalysis {
    pub values: Vec<u64>,
    pub delays: Vec<u64>,
    pub delay_delta: Vec<i64>,
}

impl SensitivityAnalysis {
    /// Values whose variant fails to analyze are skipped
    pub fn bandwidth(base: &ProblemConfig, bandwidths: &[u64]) -> Self {
        let space = DesignSpace {
            pe_rows: base.levels.first().map(|l| vec![l.rows]).unwrap_or_default(),
            pe_cols: base.levels.first().map(|l| vec![l.cols]).unwrap_or_default(),
            bandwidths: bandwidths.to_vec(),
        };
        let points: Vec<DesignPoint> =
            space.enumerate(base).into_iter().filter_map(evaluate).collect();
        let values = points.iter().map(|p| p.metrics.bandwidth).collect();
        let delays: Vec<u64> = points.iter().map(|p| p.metrics.delay).collect();
        let delay_delta = Self::compute_deltas(&delays);
        SensitivityAnalysis { values, delays, delay_delta }
    }

    fn compute_deltas(values: &[u64]) -> Vec<i64> {
        let mut deltas = Vec::with_capacity(values.len());
        if let Some(&first) = values.first() {
            deltas.push(0);
            let mut prev = first as i64;
            for &v in &values[1..] {
                deltas.push(v as i64 - prev);
                prev = v as i64;
            }
        }
        deltas
    }

    pub fn report(&self) -> String {
        let mut report = String::new();
        report.push_str("Sensitivity Analysis: network bandwidth\n");
        report.push_str("═══════════════════════════════════════\n");
        report.push_str("Bandwidth │        Delay │      Δ Delay\n");
        report.push_str("──────────┼──────────────┼─────────────\n");
        for i in 0..self.values.len() {
            report.push_str(&format!(
                "{:9} │ {:12} │ {:+12}\n",
                self.values[i], self.delays[i], self.delay_delta[i],
            ));
        }
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workloads;

    fn metrics(delay: u64, rows: usize, bw: f64) -> DesignMetrics {
        DesignMetrics {
            rows,
            cols: 1,
            bandwidth: 16,
            delay,
            pe_util_rate: 0.5,
            comp_rate: 0.5,
            required_bandwidth: bw,
            fits: true,
        }
    }

    fn point(m: DesignMetrics) -> DesignPoint {
        DesignPoint { config: workloads::gemm_output_stationary(), metrics: m }
    }

    #[test]
    fn test_dominance() {
        let a = metrics(10, 4, 1.0);
        assert!(ParetoFrontier::dominates(&a, &metrics(20, 4, 1.0)));
        assert!(!ParetoFrontier::dominates(&a, &a));
        assert!(!ParetoFrontier::dominates(&a, &metrics(20, 2, 1.0)));
    }

    #[test]
    fn test_pareto_frontier() {
        let points = vec![
            point(metrics(20, 4, 1.0)),
            point(metrics(10, 4, 1.0)),
            point(metrics(30, 2, 1.0)),
            point(metrics(40, 2, 1.0)),
        ];
        let frontier = ParetoFrontier::compute(points);
        let mut delays: Vec<u64> = frontier.points.iter().map(|p| p.metrics.delay).collect();
        delays.sort();
        assert_eq!(delays, vec![10, 30]);
        assert_eq!(frontier.dominated.len(), 2);
    }

    #[test]
    fn test_design_exploration() {
        let space = DesignSpace {
            pe_rows: vec![4, 8],
            pe_cols: vec![8],
            bandwidths: vec![16],
        };
        let explorer = DesignExplorer::new(space, workloads::gemm_output_stationary());
        let points = explorer.explore();
        // j spans 8 rows, so the 4-row array is rejected
        assert_eq!(points.len(), 1);
        assert_eq!(points[0].metrics.rows, 8);
        assert!(points[0].metrics.delay > 0);

        let best = DesignExplorer::find_best(&points, Objective::MinDelay).unwrap();
        assert_eq!(best.metrics.rows, 8);
    }

    #[test]
    fn test_explore_with_progress_counts_every_variant() {
        let space = DesignSpace {
            pe_rows: vec![4, 8],
            pe_cols: vec![8],
            bandwidths: vec![8, 16],
        };
        let explorer = DesignExplorer::new(space, workloads::gemm_output_stationary());
        let seen = AtomicUsize::new(0);
        let points = explorer.explore_with_progress(|_, total| {
            assert_eq!(total, 4);
            seen.fetch_add(1, Ordering::SeqCst);
        });
        assert_eq!(seen.load(Ordering::SeqCst), 4);
        assert_eq!(points.len(), 2);
    }

    #[test]
    fn test_bandwidth_sensitivity() {
        let s = SensitivityAnalysis::bandwidth(&workloads::gemm_output_stationary(), &[8, 16, 64]);
        assert_eq!(s.values, vec![8, 16, 64]);
        assert_eq!(s.delay_delta[0], 0);
        // wider links never slow a level down
        assert!(s.delays.windows(2).all(|w| w[1] <= w[0]));
        assert!(s.report().contains("Bandwidth"));
    }
}
