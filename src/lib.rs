//! Multi-Level Spatial Dataflow Analyzer
//!
//! An analytical model of how a loop-nest workload moves data through a
//! stack of hardware levels. Each level is a 2-D array of processing
//! elements with per-operand buffers and on-chip networks; a space-time
//! transform places iterators on the PE axes and on time.
//!
//! # Overview
//!
//! For every level the analyzer derives, per operand (input, weight,
//! output):
//! - total, unique and reused access volume
//! - buffer footprint and whether it fits
//! - network delays while filling the array and in steady state
//! - overall delay, compute rate and PE utilization
//!
//! Iterators of an outer level may step over tiles of an inner one. When the
//! last tile is shorter, the inner level is analyzed once per edge state and
//! the results are combined weighted by how often each state occurs.
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use dataflow_analyzer::prelude::*;
//!
//! let mut analyzer = preset("conv2d-systolic")?.build()?;
//! let report = analyzer.run_analysis()?;
//! for row in report.rows() {
//!     println!("{}", row);
//! }
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```
//!
//! # Building a level by hand
//!
//! ```rust,no_run
//! use dataflow_analyzer::prelude::*;
//!
//! let mut iters = IterArena::new();
//! let i = iters.add(IterVar::new("i", 0, 7));
//! let j = iters.add(IterVar::new("j", 0, 7));
//! let k = iters.add(IterVar::new("k", 0, 15));
//! let a = Tensor::new("A").dim(i).dim(k);
//! let b = Tensor::new("B").dim(k).dim(j);
//! let c = Tensor::new("C").dim(i).dim(j);
//!
//! let level = Level::new("PE", 8, 8)
//!     .with_network(DataType::Input, Feature::new(0, 1, 0)?, 16)
//!     .with_network(DataType::Weight, Feature::new(1, 0, 0)?, 16)
//!     .with_network(DataType::Output, Feature::STATIONARY, 16);
//!
//! let mut analyzer = MultiLevelAnalyzer::new(Workload::new(iters, a, b, c));
//! analyzer.add_level(vec![i, j, k], None, level, false);
//! let report = analyzer.run_analysis()?;
//! println!("delay: {}", report.levels[0].delay);
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

pub mod analysis;
pub mod arch;
pub mod comparison;
pub mod config;
pub mod error;
pub mod explorer;
pub mod mapping;
pub mod network;
pub mod report;
pub mod result;
pub mod workload;
pub mod workloads;

/// Prelude - commonly used types
pub mod prelude {
    pub use crate::analysis::{Analyzer, MultiLevelAnalyzer, MultiLevelReport, SubLevelBases};
    pub use crate::arch::{Buffer, DataType, Level, NetworkGroup};
    pub use crate::comparison::{DataflowComparison, DataflowMetrics};
    pub use crate::config::{
        DesignSpace, IteratorConfig, LevelConfig, OperandConfig, ProblemConfig, TensorConfig,
    };
    pub use crate::error::{AnalysisError, ConfigError, ReportError};
    pub use crate::explorer::{
        DesignExplorer, DesignMetrics, DesignPoint, Objective, ParetoFrontier, SensitivityAnalysis,
    };
    pub use crate::mapping::{Access, ReuseSet, Transform};
    pub use crate::network::{Feature, Network, NetworkType};
    pub use crate::report::{append_csv, parse_csv, to_csv, LevelRow};
    pub use crate::result::{AnalyzerResult, Base, ResultNode};
    pub use crate::workload::{AffineExpr, IterArena, IterId, IterVar, Tensor, Workload};
    pub use crate::workloads::{preset, PRESETS};
}
