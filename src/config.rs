//! Problem Configuration Module
//!
//! A problem is a workload (iterators and three tensors) plus the stack of
//! hardware levels it is mapped onto. Everything here is plain data that
//! round-trips through TOML or JSON; `build` lowers it into a
//! `MultiLevelAnalyzer`.

use std::collections::HashSet;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::analysis::MultiLevelAnalyzer;
use crate::arch::{DataType, Level};
use crate::error::ConfigError;
use crate::mapping::Transform;
use crate::network::Feature;
use crate::workload::{AffineExpr, IterArena, IterVar, Tensor, Workload};

/// Complete problem description
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProblemConfig {
    /// Display name
    pub name: String,
    /// Every iterator of every level, innermost tiles first by convention
    pub iterators: Vec<IteratorConfig>,
    /// Index expressions of the three operands
    pub tensors: TensorConfig,
    /// Levels from the PE array outwards
    pub levels: Vec<LevelConfig>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IteratorConfig {
    pub name: String,
    /// Inclusive lower bound
    pub lo: i64,
    /// Inclusive upper bound
    pub hi: i64,
    /// Range on the last tile of the iterator that tiles this one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub edge: Option<[i64; 2]>,
    /// Name of the lower-level iterator whose tiles this one steps over
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tiles: Option<String>,
}

/// Each entry is one dimension, written as `coef*name + name + ...`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TensorConfig {
    pub input: Vec<String>,
    pub weight: Vec<String>,
    pub output: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LevelConfig {
    pub name: String,
    /// PE rows (Y axis)
    pub rows: usize,
    /// PE columns (X axis)
    pub cols: usize,
    /// Overlap data movement of the next tile with compute of this one
    #[serde(default)]
    pub double_buffer: bool,
    /// Iterators mapped on this level, in transform column order
    pub coupled: Vec<String>,
    /// Space-time transform; identity when omitted
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transform: Option<Vec<Vec<i32>>>,
    pub input: OperandConfig,
    pub weight: OperandConfig,
    pub output: OperandConfig,
}

/// Buffer and network of one operand on one level
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OperandConfig {
    /// Buffer capacity in elements; unbounded when omitted
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub buffer: Option<u64>,
    #[serde(default = "default_bit_width")]
    pub bit_width: u32,
    /// Zero features means unicast; two features form a network pair
    #[serde(default)]
    pub networks: Vec<Feature>,
    /// Bits per cycle per network port
    #[serde(default = "default_bandwidth")]
    pub bandwidth: u64,
}

fn default_bit_width() -> u32 {
    16
}

fn default_bandwidth() -> u64 {
    16
}

impl Default for OperandConfig {
    fn default() -> Self {
        OperandConfig {
            buffer: None,
            bit_width: default_bit_width(),
            networks: Vec::new(),
            bandwidth: default_bandwidth(),
        }
    }
}

impl OperandConfig {
    pub fn with_networks(networks: &[Feature]) -> Self {
        OperandConfig { networks: networks.to_vec(), ..Default::default() }
    }
}

impl LevelConfig {
    fn operand(&self, data_type: DataType) -> &OperandConfig {
        match data_type {
            DataType::Input => &self.input,
            DataType::Weight => &self.weight,
            DataType::Output => &self.output,
        }
    }

    fn operand_mut(&mut self, data_type: DataType) -> &mut OperandConfig {
        match data_type {
            DataType::Input => &mut self.input,
            DataType::Weight => &mut self.weight,
            DataType::Output => &mut self.output,
        }
    }

    /// Lower into a `Level`; `index` only labels errors
    pub fn to_level(&self, index: usize) -> Result<Level, ConfigError> {
        let bad = |reason: String| ConfigError::BadLevel { level: index, reason };
        if self.rows == 0 || self.cols == 0 {
            return Err(bad(format!("PE array {}x{} is empty", self.rows, self.cols)));
        }
        let mut level = Level::new(self.name.clone(), self.rows, self.cols);
        for dt in DataType::ALL {
            let op = self.operand(dt);
            if op.bandwidth == 0 {
                return Err(bad(format!("{} bandwidth is zero", dt)));
            }
            level = level.with_buffer(dt, op.buffer.unwrap_or(u64::MAX), op.bit_width);
            level = match op.networks.as_slice() {
                [] => level.with_network(dt, Feature::UNICAST, op.bandwidth),
                [f] => level.with_network(dt, *f, op.bandwidth),
                [a, b] => level.with_network_pair(dt, *a, *b, op.bandwidth),
                more => {
                    return Err(bad(format!("{} has {} networks, at most 2", dt, more.len())));
                }
            };
        }
        Ok(level)
    }
}

/// Parse `2*x + y + -1*z` against the iterators in `arena`
pub fn parse_expr(text: &str, arena: &IterArena) -> Result<AffineExpr, ConfigError> {
    let bad = || ConfigError::BadExpr(text.to_string());
    let mut expr = AffineExpr::new();
    for term in text.split('+') {
        let term = term.trim();
        let (coef, name) = match term.split_once('*') {
            Some((c, n)) => (c.trim().parse::<i64>().map_err(|_| bad())?, n.trim()),
            None => (1, term),
        };
        if name.is_empty() || name.contains(char::is_whitespace) {
            return Err(bad());
        }
        let id = arena
            .find(name)
            .ok_or_else(|| ConfigError::UnknownIterator(name.to_string()))?;
        expr = expr.term(id, coef);
    }
    Ok(expr)
}

impl ProblemConfig {
    /// Iterators, couplings and tensors
    pub fn workload(&self) -> Result<Workload, ConfigError> {
        let mut arena = IterArena::new();
        let mut seen = HashSet::new();
        for it in &self.iterators {
            if !seen.insert(it.name.as_str()) {
                return Err(ConfigError::DuplicateIterator(it.name.clone()));
            }
            let mut var = IterVar::new(it.name.clone(), it.lo, it.hi);
            if let Some([lo, hi]) = it.edge {
                var = var.with_edge_range(lo, hi);
            }
            arena.add(var);
        }
        for it in &self.iterators {
            if let Some(inner) = &it.tiles {
                let outer = arena
                    .find(&it.name)
                    .ok_or_else(|| ConfigError::UnknownIterator(it.name.clone()))?;
                let inner = arena
                    .find(inner)
                    .ok_or_else(|| ConfigError::UnknownIterator(inner.clone()))?;
                arena.couple(outer, inner);
            }
        }
        if let Some(id) = arena.ids().find_map(|id| arena.tiling_cycle(id)) {
            return Err(ConfigError::CyclicTiling(arena.name(id).to_string()));
        }
        let tensor = |name: &str, dims: &[String]| -> Result<Tensor, ConfigError> {
            dims.iter()
                .try_fold(Tensor::new(name), |t, d| Ok(t.dim(parse_expr(d, &arena)?)))
        };
        let input = tensor("I", &self.tensors.input)?;
        let weight = tensor("W", &self.tensors.weight)?;
        let output = tensor("O", &self.tensors.output)?;
        Ok(Workload::new(arena, input, weight, output))
    }

    /// Lower into an analyzer. Levels that fail their mapping checks are kept
    /// and reported when the analysis runs.
    pub fn build(&self) -> Result<MultiLevelAnalyzer, ConfigError> {
        let mut analyzer = MultiLevelAnalyzer::new(self.workload()?);
        for (index, cfg) in self.levels.iter().enumerate() {
            let level = cfg.to_level(index)?;
            let vars = cfg
                .coupled
                .iter()
                .map(|name| {
                    analyzer
                        .workload()
                        .iters
                        .find(name)
                        .ok_or_else(|| ConfigError::UnknownIterator(name.clone()))
                })
                .collect::<Result<Vec<_>, _>>()?;
            let transform = cfg.transform.clone().map(Transform::from_rows);
            analyzer.add_level(vars, transform, level, cfg.double_buffer);
        }
        Ok(analyzer)
    }

    /// Save configuration to TOML file
    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), ConfigError> {
        let toml_str = toml::to_string_pretty(self)?;
        std::fs::write(path, toml_str)?;
        Ok(())
    }

    /// Load configuration from a TOML file, or JSON when the extension says so
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)?;
        if path.extension().is_some_and(|e| e == "json") {
            Ok(serde_json::from_str(&text)?)
        } else {
            Ok(toml::from_str(&text)?)
        }
    }
}

/// Sweep over the PE array and network bandwidth of level 0
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DesignSpace {
    pub pe_rows: Vec<usize>,
    pub pe_cols: Vec<usize>,
    pub bandwidths: Vec<u64>,
}

impl Default for DesignSpace {
    fn default() -> Self {
        DesignSpace {
            pe_rows: vec![4, 8, 16],
            pe_cols: vec![4, 8, 16],
            bandwidths: vec![8, 16, 32, 64],
        }
    }
}

impl DesignSpace {
    /// Every variant of `base`; empty if `base` has no levels
    pub fn enumerate(&self, base: &ProblemConfig) -> Vec<ProblemConfig> {
        let mut configs = Vec::new();
        if base.levels.is_empty() {
            return configs;
        }
        for &rows in &self.pe_rows {
            for &cols in &self.pe_cols {
                for &bandwidth in &self.bandwidths {
                    let mut config = base.clone();
                    let level = &mut config.levels[0];
                    level.rows = rows;
                    level.cols = cols;
                    for dt in DataType::ALL {
                        level.operand_mut(dt).bandwidth = bandwidth;
                    }
                    configs.push(config);
                }
            }
        }
        configs
    }
}
