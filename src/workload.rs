//! Workload Module
//!
//! Loop iterators, affine index expressions and the three tensors of a
//! computation. Iterators live in a central arena and are referred to by
//! `IterId`; every level that names an iterator shares the same entry.
//!
//! Analysis temporarily changes how an iterator reports its range (edge
//! position, lock). Those changes go through `EdgeGuard` and `LockGuard`,
//! which restore the previous flags when dropped.

use std::ops::{Add, Deref, DerefMut, Mul};

use serde::{Deserialize, Serialize};

use crate::arch::DataType;

/// Stable handle to an iterator in an `IterArena`
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct IterId(pub usize);

/// Position of an iterator relative to its boundary tile
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EdgePos {
    /// Whole range
    #[default]
    Full,
    /// Every value but the last
    Interior,
    /// Only the last value
    Boundary,
}

/// A named loop index with an inclusive range
#[derive(Debug, Clone)]
pub struct IterVar {
    pub name: String,
    pub lo: i64,
    pub hi: i64,
    /// Range taken while the outer partner sits on its boundary tile
    pub edge_range: Option<(i64, i64)>,
    /// Analogous iterator one level down
    coupled: Option<IterId>,
    locked: bool,
    pos: EdgePos,
    partial: bool,
}

impl IterVar {
    pub fn new(name: impl Into<String>, lo: i64, hi: i64) -> Self {
        IterVar {
            name: name.into(),
            lo,
            hi,
            edge_range: None,
            coupled: None,
            locked: false,
            pos: EdgePos::Full,
            partial: false,
        }
    }

    /// Iterator whose range shrinks to `[edge_lo, edge_hi]` on the boundary tile
    pub fn with_edge_range(mut self, edge_lo: i64, edge_hi: i64) -> Self {
        self.edge_range = Some((edge_lo, edge_hi));
        self
    }

    /// Effective inclusive range under the current flags
    pub fn range(&self) -> (i64, i64) {
        let (lo, hi) = match (self.partial, self.edge_range) {
            (true, Some(r)) => r,
            _ => (self.lo, self.hi),
        };
        if self.locked {
            return (lo, lo);
        }
        match self.pos {
            EdgePos::Full => (lo, hi),
            EdgePos::Interior => (lo, hi - 1),
            EdgePos::Boundary => (hi, hi),
        }
    }

    /// Number of values in the effective range (0 when empty)
    pub fn size(&self) -> u64 {
        let (lo, hi) = self.range();
        if hi < lo {
            0
        } else {
            (hi - lo + 1) as u64
        }
    }

    pub fn has_edge(&self) -> bool {
        self.coupled.is_some()
    }

    pub fn coupled_iterator(&self) -> Option<IterId> {
        self.coupled
    }

    pub fn is_locked(&self) -> bool {
        self.locked
    }

    pub fn edge_pos(&self) -> EdgePos {
        self.pos
    }

    pub fn is_partial(&self) -> bool {
        self.partial
    }
}

impl std::fmt::Display for IterVar {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}[{}, {}]", self.name, self.lo, self.hi)?;
        if let Some((lo, hi)) = self.edge_range {
            write!(f, " edge[{}, {}]", lo, hi)?;
        }
        Ok(())
    }
}

/// Central owner of every iterator of a workload
#[derive(Debug, Clone, Default)]
pub struct IterArena {
    vars: Vec<IterVar>,
}

impl IterArena {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, var: IterVar) -> IterId {
        self.vars.push(var);
        IterId(self.vars.len() - 1)
    }

    pub fn get(&self, id: IterId) -> &IterVar {
        &self.vars[id.0]
    }

    pub fn len(&self) -> usize {
        self.vars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vars.is_empty()
    }

    pub fn ids(&self) -> impl Iterator<Item = IterId> {
        (0..self.vars.len()).map(IterId)
    }

    pub fn find(&self, name: &str) -> Option<IterId> {
        self.vars.iter().position(|v| v.name == name).map(IterId)
    }

    pub fn name(&self, id: IterId) -> &str {
        &self.vars[id.0].name
    }

    pub fn range(&self, id: IterId) -> (i64, i64) {
        self.vars[id.0].range()
    }

    pub fn size(&self, id: IterId) -> u64 {
        self.vars[id.0].size()
    }

    pub fn has_edge(&self, id: IterId) -> bool {
        self.vars[id.0].has_edge()
    }

    pub fn coupled_iterator(&self, id: IterId) -> Option<IterId> {
        self.vars[id.0].coupled
    }

    /// Declare that `outer` steps over tiles of `inner`; the last tile of
    /// `outer` makes `inner` take its edge range.
    pub fn couple(&mut self, outer: IterId, inner: IterId) {
        self.vars[outer.0].coupled = Some(inner);
    }

    /// `id` followed by the iterators it tiles, one level down at a time.
    /// Stops before revisiting an iterator.
    pub fn tile_path(&self, id: IterId) -> Vec<IterId> {
        let mut path = vec![id];
        let mut cur = id;
        while let Some(inner) = self.coupled_iterator(cur) {
            if path.contains(&inner) {
                break;
            }
            path.push(inner);
            cur = inner;
        }
        path
    }

    /// First iterator reached twice when following the tiling of `id`
    pub fn tiling_cycle(&self, id: IterId) -> Option<IterId> {
        let path = self.tile_path(id);
        let last = *path.last()?;
        self.coupled_iterator(last).filter(|inner| path.contains(inner))
    }

    /// `id` together with every iterator that steps over its tiles,
    /// transitively
    pub fn tilers(&self, id: IterId) -> Vec<IterId> {
        let mut found = vec![id];
        let mut i = 0;
        while i < found.len() {
            let cur = found[i];
            for outer in self.ids() {
                if self.coupled_iterator(outer) == Some(cur) && !found.contains(&outer) {
                    found.push(outer);
                }
            }
            i += 1;
        }
        found
    }

    /// Product of the sizes of `ids`
    pub fn volume(&self, ids: &[IterId]) -> u64 {
        ids.iter().map(|&id| self.size(id)).product()
    }

    fn snapshot(&self, id: IterId) -> Flags {
        let v = &self.vars[id.0];
        Flags { id, locked: v.locked, pos: v.pos, partial: v.partial }
    }

    fn restore(&mut self, flags: &Flags) {
        let v = &mut self.vars[flags.id.0];
        v.locked = flags.locked;
        v.pos = flags.pos;
        v.partial = flags.partial;
    }
}

#[derive(Debug, Clone, Copy)]
struct Flags {
    id: IterId,
    locked: bool,
    pos: EdgePos,
    partial: bool,
}

/// One combination of boundary states over `m` iterators
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EdgeState {
    /// Slot index; equals the bit pattern of `bits` read MSB-first
    pub index: usize,
    /// `bits[j]` is true when iterator `j` sits on its boundary tile
    pub bits: Vec<bool>,
}

/// All `2^m` edge states in canonical binary order
pub fn edge_states(m: usize) -> impl Iterator<Item = EdgeState> {
    (0..1usize << m).map(move |index| EdgeState {
        index,
        bits: (0..m).map(|j| index >> (m - 1 - j) & 1 == 1).collect(),
    })
}

/// Inverse of `edge_states`: slot index of a bit pattern
pub fn state_index(bits: &[bool]) -> usize {
    bits.iter().fold(0, |acc, &b| acc * 2 + b as usize)
}

/// Places a set of boundary iterators into one edge state for the lifetime
/// of the guard. Iterators flagged on take their last value and their lower
/// partners take the edge range; the others take every value but the last.
pub struct EdgeGuard<'a> {
    arena: &'a mut IterArena,
    saved: Vec<Flags>,
}

impl<'a> EdgeGuard<'a> {
    pub fn new(arena: &'a mut IterArena, vars: &[IterId], bits: &[bool]) -> Self {
        assert_eq!(vars.len(), bits.len(), "one edge bit per boundary iterator");
        let mut saved = Vec::with_capacity(vars.len() * 2);
        for (&id, &on) in vars.iter().zip(bits) {
            saved.push(arena.snapshot(id));
            arena.vars[id.0].pos = if on { EdgePos::Boundary } else { EdgePos::Interior };
            if let Some(inner) = arena.coupled_iterator(id) {
                saved.push(arena.snapshot(inner));
                arena.vars[inner.0].partial = on;
            }
        }
        EdgeGuard { arena, saved }
    }
}

impl Deref for EdgeGuard<'_> {
    type Target = IterArena;
    fn deref(&self) -> &IterArena {
        self.arena
    }
}

impl DerefMut for EdgeGuard<'_> {
    fn deref_mut(&mut self) -> &mut IterArena {
        self.arena
    }
}

impl Drop for EdgeGuard<'_> {
    fn drop(&mut self) {
        for flags in self.saved.iter().rev() {
            self.arena.restore(flags);
        }
    }
}

/// Locks a set of iterators (each collapses to a single value) for the
/// lifetime of the guard
pub struct LockGuard<'a> {
    arena: &'a mut IterArena,
    saved: Vec<Flags>,
}

impl<'a> LockGuard<'a> {
    pub fn new(arena: &'a mut IterArena, vars: &[IterId]) -> Self {
        let mut saved = Vec::with_capacity(vars.len());
        for &id in vars {
            saved.push(arena.snapshot(id));
            arena.vars[id.0].locked = true;
        }
        LockGuard { arena, saved }
    }
}

impl Deref for LockGuard<'_> {
    type Target = IterArena;
    fn deref(&self) -> &IterArena {
        self.arena
    }
}

impl DerefMut for LockGuard<'_> {
    fn deref_mut(&mut self) -> &mut IterArena {
        self.arena
    }
}

impl Drop for LockGuard<'_> {
    fn drop(&mut self) {
        for flags in self.saved.iter().rev() {
            self.arena.restore(flags);
        }
    }
}

/// Affine index expression `Σ coef · iter`
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AffineExpr {
    pub terms: Vec<(IterId, i64)>,
}

impl AffineExpr {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn term(mut self, id: IterId, coef: i64) -> Self {
        self.terms.push((id, coef));
        self
    }

    /// Total coefficient of `id`
    pub fn coef(&self, id: IterId) -> i64 {
        self.terms.iter().filter(|(t, _)| *t == id).map(|(_, c)| c).sum()
    }

    /// Inclusive range over the current iterator ranges
    pub fn range(&self, arena: &IterArena) -> (i64, i64) {
        self.terms.iter().fold((0, 0), |(lo, hi), &(id, coef)| {
            let (a, b) = arena.range(id);
            let (x, y) = (coef * a, coef * b);
            (lo + x.min(y), hi + x.max(y))
        })
    }

    /// Number of distinct values (0 if any iterator has an empty range)
    pub fn size(&self, arena: &IterArena) -> u64 {
        if self.terms.iter().any(|&(id, _)| arena.size(id) == 0) {
            return 0;
        }
        let (lo, hi) = self.range(arena);
        (hi - lo + 1) as u64
    }

    pub fn display(&self, arena: &IterArena) -> String {
        if self.terms.is_empty() {
            return "0".to_string();
        }
        self.terms
            .iter()
            .map(|&(id, coef)| match coef {
                1 => arena.name(id).to_string(),
                c => format!("{}*{}", c, arena.name(id)),
            })
            .collect::<Vec<_>>()
            .join(" + ")
    }
}

impl From<IterId> for AffineExpr {
    fn from(id: IterId) -> Self {
        AffineExpr::new().term(id, 1)
    }
}

impl Add<IterId> for IterId {
    type Output = AffineExpr;
    fn add(self, rhs: IterId) -> AffineExpr {
        AffineExpr::from(self).term(rhs, 1)
    }
}

impl Add<IterId> for AffineExpr {
    type Output = AffineExpr;
    fn add(self, rhs: IterId) -> AffineExpr {
        self.term(rhs, 1)
    }
}

impl Add<AffineExpr> for AffineExpr {
    type Output = AffineExpr;
    fn add(mut self, rhs: AffineExpr) -> AffineExpr {
        self.terms.extend(rhs.terms);
        self
    }
}

impl Mul<IterId> for i64 {
    type Output = AffineExpr;
    fn mul(self, rhs: IterId) -> AffineExpr {
        AffineExpr::new().term(rhs, self)
    }
}

/// A tensor indexed by one affine expression per dimension
#[derive(Debug, Clone)]
pub struct Tensor {
    pub name: String,
    dims: Vec<AffineExpr>,
}

impl Tensor {
    pub fn new(name: impl Into<String>) -> Self {
        Tensor { name: name.into(), dims: Vec::new() }
    }

    /// Append a dimension
    pub fn dim(mut self, expr: impl Into<AffineExpr>) -> Self {
        self.dims.push(expr.into());
        self
    }

    pub fn dims(&self) -> &[AffineExpr] {
        &self.dims
    }

    pub fn dim_num(&self) -> usize {
        self.dims.len()
    }

    pub fn dim_range(&self, arena: &IterArena, dim: usize) -> (i64, i64) {
        self.dims[dim].range(arena)
    }

    pub fn display(&self, arena: &IterArena) -> String {
        let dims: String = self.dims.iter().map(|d| format!("[{}]", d.display(arena))).collect();
        format!("{}{}", self.name, dims)
    }
}

/// Iterators plus the three operand tensors
#[derive(Debug, Clone)]
pub struct Workload {
    pub iters: IterArena,
    pub input: Tensor,
    pub weight: Tensor,
    pub output: Tensor,
}

impl Workload {
    pub fn new(iters: IterArena, input: Tensor, weight: Tensor, output: Tensor) -> Self {
        Workload { iters, input, weight, output }
    }

    pub fn tensor(&self, data_type: DataType) -> &Tensor {
        match data_type {
            DataType::Input => &self.input,
            DataType::Weight => &self.weight,
            DataType::Output => &self.output,
        }
    }

    pub fn dim_nums(&self) -> [usize; 3] {
        [self.input.dim_num(), self.weight.dim_num(), self.output.dim_num()]
    }

    /// Product of every iterator's size
    pub fn iteration_space(&self) -> u64 {
        let ids: Vec<_> = self.iters.ids().collect();
        self.iters.volume(&ids)
    }
}
