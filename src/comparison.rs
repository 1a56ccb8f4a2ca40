//! Dataflow Comparison Module
//!
//! Runs several problem descriptions side by side, typically the same loop
//! nest under different mappings, and tabulates their headline numbers.

use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::arch::DataType;
use crate::config::ProblemConfig;
use crate::error::ConfigError;
use crate::workloads;

/// Comparison results between dataflows
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DataflowComparison {
    pub entries: Vec<DataflowMetrics>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DataflowMetrics {
    pub name: String,
    /// Why the problem could not be analyzed
    pub error: Option<String>,
    pub levels: usize,
    pub delay: u64,
    pub pe_util_rate: f64,
    /// Innermost level, per operand
    pub unique_volume: [u64; 3],
    pub reuse_rate: [f64; 3],
}

impl DataflowMetrics {
    fn failed(name: String, error: String) -> Self {
        DataflowMetrics {
            name,
            error: Some(error),
            levels: 0,
            delay: 0,
            pe_util_rate: 0.0,
            unique_volume: [0; 3],
            reuse_rate: [0.0; 3],
        }
    }

    fn measure(config: &ProblemConfig) -> Self {
        let name = config.name.clone();
        let mut analyzer = match config.build() {
            Ok(a) => a,
            Err(e) => return Self::failed(name, e.to_string()),
        };
        let report = match analyzer.run_analysis() {
            Ok(r) => r,
            Err(e) => return Self::failed(name, e.to_string()),
        };
        let inner = &report.levels[0];
        let outer = &report.levels[report.levels.len() - 1];
        DataflowMetrics {
            name,
            error: None,
            levels: report.levels.len(),
            delay: outer.delay,
            pe_util_rate: inner.pe_util_rate,
            unique_volume: inner.unique_volume,
            reuse_rate: DataType::ALL.map(|dt| inner.reuse_rate(dt)),
        }
    }
}

impl DataflowComparison {
    /// Analyze every problem (parallel), keeping input order
    pub fn run(configs: &[ProblemConfig]) -> Self {
        let entries = configs.par_iter().map(DataflowMetrics::measure).collect();
        DataflowComparison { entries }
    }

    /// Compare named presets
    pub fn presets(names: &[&str]) -> Result<Self, ConfigError> {
        let configs = names
            .iter()
            .map(|n| workloads::preset(n))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self::run(&configs))
    }

    /// Fastest analyzed entry
    pub fn fastest(&self) -> Option<&DataflowMetrics> {
        self.entries
            .iter()
            .filter(|m| m.error.is_none())
            .min_by_key(|m| m.delay)
    }

    /// Generate comparison report
    pub fn report(&self) -> String {
        let mut report = String::new();

        report.push_str("╔════════════════════════════════════════════════════════════════════════════════╗\n");
        report.push_str("║                          DATAFLOW COMPARISON REPORT                            ║\n");
        report.push_str("╠════════════════════════════════════════════════════════════════════════════════╣\n");
        report.push_str("║ Dataflow           │ Lvls │      Delay │ PE util │ Reuse I │ Reuse W │ Reuse O ║\n");
        report.push_str("╠════════════════════════════════════════════════════════════════════════════════╣\n");

        for m in &self.entries {
            match &m.error {
                Some(e) => report.push_str(&format!("║ {:18} │ failed: {:50} ║\n", m.name, e)),
                None => report.push_str(&format!(
                    "║ {:18} │ {:4} │ {:10} │ {:6.1}% │ {:6.1}% │ {:6.1}% │ {:6.1}% ║\n",
                    m.name,
                    m.levels,
                    m.delay,
                    m.pe_util_rate * 100.0,
                    m.reuse_rate[0] * 100.0,
                    m.reuse_rate[1] * 100.0,
                    m.reuse_rate[2] * 100.0,
                )),
            }
        }

        report.push_str("╚════════════════════════════════════════════════════════════════════════════════╝\n");

        if let Some(best) = self.fastest() {
            report.push_str("\nKEY INSIGHTS:\n");
            report.push_str("─────────────\n");
            report.push_str(&format!("• Fastest: {} ({} cycles)\n", best.name, best.delay));
            for m in self.entries.iter().filter(|m| m.error.is_none() && m.name != best.name) {
                report.push_str(&format!(
                    "• {} is {:.2}x slower\n",
                    m.name,
                    m.delay as f64 / best.delay.max(1) as f64
                ));
            }
        }

        report
    }
}
