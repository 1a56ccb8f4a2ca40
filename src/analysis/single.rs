//! Single-Level Analyzer
//!
//! Evaluates one level of the hierarchy: which data each PE touches, how
//! much of it is unique, and how long the level takes to run given the
//! delay and tile sizes of the level below (`Base`).
//!
//! When some of the level's iterators stand on a tile boundary of the level
//! below, the analysis is repeated for every combination of boundary states
//! and the per-state results are summed.

use log::{debug, warn};
use serde_json::json;

use crate::arch::{DataType, Level, AXIS_X, AXIS_Y};
use crate::error::AnalysisError;
use crate::mapping::{Access, ReuseSet, Transform, MAX_COUPLED_VARS};
use crate::network::NetworkType;
use crate::result::{AnalyzerResult, Base};
use crate::workload::{edge_states, AffineExpr, EdgeGuard, IterArena, IterId, Tensor, Workload};

/// Analysis of one level under one mapping
#[derive(Debug, Clone)]
pub struct Analyzer {
    coupled_vars: Vec<IterId>,
    var_names: Vec<String>,
    transform: Transform,
    level: Level,
    double_buffer: bool,
    tensors: [Tensor; 3],
    accesses: [Access; 3],
    reuse: [ReuseSet; 3],
    pex_col: usize,
    pey_col: usize,
    inner_rows: Vec<usize>,
    outer_rows: Vec<usize>,
    bases: Vec<Base>,
    sub_coupled_vars: Vec<IterId>,
    result: Option<AnalyzerResult>,
}

fn span((lo, hi): (i64, i64)) -> u64 {
    if hi < lo {
        0
    } else {
        (hi - lo + 1) as u64
    }
}

impl Analyzer {
    /// Validate the mapping against the level and derive reuse.
    ///
    /// Fails when the transform is malformed, a spatial iterator does not
    /// fit the PE array or carries an edge marker, or an operand has no
    /// reuse direction its network can serve.
    pub fn new(
        workload: &Workload,
        coupled_vars: Vec<IterId>,
        transform: Transform,
        level: Level,
        double_buffer: bool,
    ) -> Result<Self, AnalysisError> {
        let arena = &workload.iters;
        if coupled_vars.len() > MAX_COUPLED_VARS {
            return Err(AnalysisError::TooManyIterators {
                found: coupled_vars.len(),
                max: MAX_COUPLED_VARS,
            });
        }
        if transform.col_num() != coupled_vars.len() {
            return Err(AnalysisError::TransformInvalid(format!(
                "{} columns for {} coupled iterators",
                transform.col_num(),
                coupled_vars.len()
            )));
        }
        transform.check().map_err(AnalysisError::TransformInvalid)?;

        let accesses =
            DataType::ALL.map(|dt| Access::construct(workload.tensor(dt), &coupled_vars, arena));
        let n = coupled_vars.len();
        let reuse = [0, 1, 2].map(|i| {
            if accesses[i].is_scalar() {
                ReuseSet::scalar(n)
            } else {
                ReuseSet::derive(&transform, &accesses[i])
            }
        });

        let column = |axis: usize| {
            transform.spatial_column(axis).ok_or_else(|| {
                AnalysisError::TransformInvalid(format!("spatial row {} selects no iterator", axis))
            })
        };
        let pex_col = column(AXIS_X)?;
        let pey_col = column(AXIS_Y)?;

        for (axis, col) in [(AXIS_X, pex_col), (AXIS_Y, pey_col)] {
            let id = coupled_vars[col];
            let (lo, hi) = arena.range(id);
            if !level.check_pe_dim_range((lo, hi), axis) {
                return Err(AnalysisError::SpatialRangeOutOfBounds {
                    iterator: arena.name(id).to_string(),
                    axis,
                    lo,
                    hi,
                    extent: level.extent(axis),
                });
            }
        }
        for col in [pex_col, pey_col] {
            let id = coupled_vars[col];
            if arena.has_edge(id) {
                return Err(AnalysisError::EdgeOnSpatialDim(arena.name(id).to_string()));
            }
        }
        for dt in DataType::ALL {
            if !level.check_network_reuse_valid(dt, &reuse[dt.index()]) {
                return Err(AnalysisError::ReuseIncompatibleWithNetwork(dt));
            }
        }

        let (inner_rows, outer_rows) = partition_time_rows(&reuse, &level, transform.row_num());
        let var_names = coupled_vars.iter().map(|&id| arena.name(id).to_string()).collect();
        Ok(Analyzer {
            coupled_vars,
            var_names,
            transform,
            level,
            double_buffer,
            tensors: DataType::ALL.map(|dt| workload.tensor(dt).clone()),
            accesses,
            reuse,
            pex_col,
            pey_col,
            inner_rows,
            outer_rows,
            bases: Vec::new(),
            sub_coupled_vars: Vec::new(),
            result: None,
        })
    }

    pub fn coupled_vars(&self) -> &[IterId] {
        &self.coupled_vars
    }

    pub fn transform(&self) -> &Transform {
        &self.transform
    }

    pub fn level(&self) -> &Level {
        &self.level
    }

    pub fn is_double_buffered(&self) -> bool {
        self.double_buffer
    }

    pub fn access(&self, data_type: DataType) -> &Access {
        &self.accesses[data_type.index()]
    }

    pub fn reuse(&self, data_type: DataType) -> &ReuseSet {
        &self.reuse[data_type.index()]
    }

    /// Temporal rows pipelined as steady state
    pub fn inner_time_rows(&self) -> &[usize] {
        &self.inner_rows
    }

    /// Temporal rows that restart the pipeline
    pub fn outer_time_rows(&self) -> &[usize] {
        &self.outer_rows
    }

    pub fn base_set(&self) -> &[Base] {
        &self.bases
    }

    pub fn sub_coupled_vars(&self) -> &[IterId] {
        &self.sub_coupled_vars
    }

    /// One base per edge state of the current sub-coupled iterators
    pub fn set_base_set(&mut self, bases: Vec<Base>) {
        self.bases = bases;
    }

    /// Boundary iterators whose edge states index the base set
    pub fn set_cur_sub_coupled_vars(&mut self, vars: Vec<IterId>) {
        self.sub_coupled_vars = vars;
    }

    /// Iterations of this level in the current iterator state
    pub fn occ_times(&self, arena: &IterArena) -> u64 {
        arena.volume(&self.coupled_vars)
    }

    fn row_expr(&self, row: usize) -> AffineExpr {
        self.coupled_vars
            .iter()
            .enumerate()
            .filter(|&(j, _)| self.transform.get(row, j) == 1)
            .fold(AffineExpr::new(), |e, (_, &id)| e.term(id, 1))
    }

    fn row_range(&self, arena: &IterArena, row: usize) -> (i64, i64) {
        self.row_expr(row).range(arena)
    }

    fn time_size(&self, arena: &IterArena, rows: &[usize]) -> u64 {
        rows.iter().map(|&r| self.row_expr(r).size(arena)).product()
    }

    fn is_spatial(&self, col: usize) -> bool {
        col == self.pex_col || col == self.pey_col
    }

    /// Elements one PE touches: the index extent of every dimension over
    /// the temporal iterators only
    fn per_pe_volume(&self, arena: &IterArena, data_type: DataType) -> u64 {
        let access = self.access(data_type);
        (0..access.row_num())
            .map(|d| {
                self.coupled_vars
                    .iter()
                    .enumerate()
                    .filter(|&(j, _)| access.get(d, j) != 0 && !self.is_spatial(j))
                    .fold(AffineExpr::new(), |e, (j, &id)| e.term(id, access.get(d, j)))
                    .size(arena)
            })
            .product()
    }

    fn active_access_points(&self, data_type: DataType, pex: (i64, i64), pey: (i64, i64)) -> u64 {
        self.level
            .access_points(data_type)
            .into_iter()
            .filter(|&(x, y)| {
                let (x, y) = (x as i64, y as i64);
                pex.0 <= x && x <= pex.1 && pey.0 <= y && y <= pey.1
            })
            .count() as u64
    }

    fn unique_volume(&self, arena: &IterArena, data_type: DataType, total: u64) -> (u64, u64) {
        let per_pe = self.per_pe_volume(arena, data_type);
        if self.access(data_type).is_scalar() {
            return (per_pe, 1.min(total));
        }
        let pex = self.row_range(arena, 0);
        let pey = self.row_range(arena, 1);
        let unique = match self.level.network_type(data_type) {
            NetworkType::Systolic | NetworkType::Multicast => {
                per_pe * self.active_access_points(data_type, pex, pey)
            }
            NetworkType::Unicast | NetworkType::Stationary => per_pe * span(pex) * span(pey),
        };
        (per_pe, unique.min(total))
    }

    /// Extent of every tensor dimension covered by one run of this level
    pub fn tensor_dim_ranges(&self, arena: &IterArena) -> [Vec<u64>; 3] {
        DataType::ALL.map(|dt| {
            let access = self.access(dt);
            (0..access.row_num())
                .map(|d| {
                    let own = self
                        .coupled_vars
                        .iter()
                        .enumerate()
                        .filter(|&(j, _)| access.get(d, j) != 0)
                        .fold(AffineExpr::new(), |e, (j, &id)| e.term(id, access.get(d, j)))
                        .size(arena);
                    let below = self
                        .bases
                        .iter()
                        .filter_map(|b| b.tensor_dim_ranges[dt.index()].get(d).copied())
                        .max()
                        .unwrap_or(1);
                    own * below
                })
                .collect()
        })
    }

    /// Analyze every edge state of the sub-coupled iterators and sum
    pub fn run_one_analysis(&mut self, arena: &mut IterArena) -> Result<(), AnalysisError> {
        let m = self.sub_coupled_vars.len();
        let expected = 1usize << m;
        if self.bases.len() != expected {
            return Err(AnalysisError::BaseSetMismatch { expected, found: self.bases.len() });
        }

        let mut total = AnalyzerResult::default();
        for state in edge_states(m) {
            let guard = EdgeGuard::new(arena, &self.sub_coupled_vars, &state.bits);
            if self.occ_times(&guard) == 0 {
                debug!("{}: edge state {:?} is empty", self.level.name, state.bits);
                continue;
            }
            let one = self.analyze_state(&guard, &self.bases[state.index]);
            debug!(
                "{}: edge state {:?} delay {} comp cycles {}",
                self.level.name, state.bits, one.delay, one.comp_cycle
            );
            total += &one;
        }
        total.compute_bandwidth();
        self.result = Some(total);
        Ok(())
    }

    fn analyze_state(&self, arena: &IterArena, base: &Base) -> AnalyzerResult {
        let pex = self.row_range(arena, 0);
        let pey = self.row_range(arena, 1);
        let active_pe = span(pex) * span(pey);
        let total = self.occ_times(arena);
        let inner = self.time_size(arena, &self.inner_rows);
        let outer = self.time_size(arena, &self.outer_rows);

        let mut r = AnalyzerResult::default();
        for dt in DataType::ALL {
            let i = dt.index();
            let (per_pe, unique) = self.unique_volume(arena, dt, total);
            let granule = base.data_size(dt);
            let bits = self.level.bit_width(dt);
            r.per_pe_volume[i] = per_pe;
            r.unique_volume[i] = unique;
            r.total_volume[i] = total;
            r.reuse_volume[i] = total - unique;
            r.required_data_size[i] = unique * granule;
            r.stable_delay[i] = self.level.stable_delay(dt, granule, bits);
            r.init_delay[i] = self.level.init_or_out_delay(dt, granule, bits, pex, pey);
        }

        // each spatial row selects one coupled iterator, so active_pe divides total
        let comp_cycle = total / active_pe * base.delay;
        let stable_comp = base.delay;
        let stable = r.stable_delay.iter().copied().fold(stable_comp, u64::max);
        let init = r.init_delay.iter().copied().max().unwrap_or(0);
        let pipeline = if self.double_buffer {
            init.max(inner * stable)
        } else {
            inner * stable + init
        };
        let delay = pipeline * outer;

        r.stable_comp_delay = stable_comp;
        r.delay = delay;
        r.comp_cycle = comp_cycle;
        r.comp_rate = delay as f64;
        r.active_pe_mult_time_num = active_pe * comp_cycle;
        r.total_pe_mult_time_num = self.level.pe_num() * delay;
        r.init_times = outer;
        r
    }

    /// Result of the last `run_one_analysis`
    pub fn result(&self) -> Result<AnalyzerResult, AnalysisError> {
        self.result.clone().ok_or(AnalysisError::ResultNotReady)
    }

    /// Extent of every tensor dimension covered by the levels below this one
    /// in the current iterator state.
    ///
    /// An iterator spans its own range times the ranges of the iterators
    /// stepping over its tiles. This level's iterators are left out; locked
    /// iterators count once.
    pub fn sub_level_dim_ranges(&self, arena: &IterArena) -> [Vec<u64>; 3] {
        let span = |id: IterId| -> u64 {
            arena
                .tilers(id)
                .into_iter()
                .filter(|t| !self.coupled_vars.contains(t))
                .map(|t| arena.size(t))
                .product()
        };
        DataType::ALL.map(|dt| {
            self.tensors[dt.index()]
                .dims()
                .iter()
                .map(|expr| {
                    let spans: Vec<(u64, i64)> =
                        expr.terms.iter().map(|&(id, coef)| (span(id), coef)).collect();
                    if spans.iter().any(|&(s, _)| s == 0) {
                        return 0;
                    }
                    spans
                        .iter()
                        .fold(1, |acc, &(s, coef)| acc + coef.unsigned_abs() * (s - 1))
                })
                .collect()
        })
    }

    /// Recompute the buffer footprint in the current iterator state and
    /// check it against the level's buffers. The granule comes from
    /// `sub_level_dim_ranges`, so no earlier run is needed.
    pub fn check_required_data_size(&mut self, arena: &IterArena) -> bool {
        let total = self.occ_times(arena);
        let ranges = self.sub_level_dim_ranges(arena);
        let mut fits = true;
        let mut required = [0u64; 3];
        for dt in DataType::ALL {
            let granule: u64 = ranges[dt.index()].iter().product();
            let (_, unique) = self.unique_volume(arena, dt, total);
            required[dt.index()] = unique * granule;
            if required[dt.index()] > self.level.buffer_size(dt) {
                warn!(
                    "{}: {} needs {} elements but the buffer holds {}",
                    self.level.name,
                    dt,
                    required[dt.index()],
                    self.level.buffer_size(dt)
                );
                fits = false;
            }
        }
        if let Some(result) = self.result.as_mut() {
            result.required_data_size = required;
        }
        fits
    }

    /// Static description of the level and its mapping
    pub fn describe(&self) -> serde_json::Value {
        let mut config = self.level.describe();
        config["coupledVars"] = json!(self.var_names);
        config["transform"] = json!(self.transform.rows());
        config["doubleBuffer"] = json!(self.double_buffer);
        config["innerTimeRows"] = json!(self.inner_rows);
        config["outerTimeRows"] = json!(self.outer_rows);
        config
    }
}

/// Split the temporal rows into the steady-state pipeline and the rest.
///
/// Only operands held resident in the PEs (a STATIONARY member in their
/// network group) constrain the split. Rows are taken as a prefix from the
/// first temporal row: a row joins the pipeline while every resident operand
/// has a reuse vector along that row alone, and the first row that fails
/// ends it. With no resident operand every temporal row pipelines.
fn partition_time_rows(reuse: &[ReuseSet; 3], level: &Level, rows: usize) -> (Vec<usize>, Vec<usize>) {
    let resident: Vec<&ReuseSet> = DataType::ALL
        .iter()
        .filter(|&&dt| level.is_stationary(dt))
        .map(|&dt| &reuse[dt.index()])
        .collect();
    let split = (2..rows)
        .find(|&row| !resident.iter().all(|r| r.has_sole(row)))
        .unwrap_or(rows);
    ((2..split).collect(), (split..rows).collect())
}
