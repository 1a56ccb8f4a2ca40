//! Mapping Module
//!
//! A `Transform` maps loop coordinates to hardware coordinates: rows 0 and 1
//! are PE-X and PE-Y, the remaining rows are time. An `Access` holds the
//! index coefficients of one tensor over a level's coupled iterators.
//! Reuse vectors are the hardware-space directions along which a tensor's
//! data stays the same.

use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::workload::{IterArena, IterId, Tensor};

/// Square 0/1 matrix from iterator space to hardware space
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transform {
    rows: Vec<Vec<i32>>,
}

impl Transform {
    pub fn identity(n: usize) -> Self {
        let rows = (0..n)
            .map(|r| (0..n).map(|c| (r == c) as i32).collect())
            .collect();
        Transform { rows }
    }

    pub fn from_rows(rows: Vec<Vec<i32>>) -> Self {
        Transform { rows }
    }

    pub fn rows(&self) -> &[Vec<i32>] {
        &self.rows
    }

    pub fn get(&self, row: usize, col: usize) -> i32 {
        self.rows[row][col]
    }

    pub fn row_num(&self) -> usize {
        self.rows.len()
    }

    pub fn col_num(&self) -> usize {
        self.rows.first().map_or(0, Vec::len)
    }

    /// Structural validity; the error names the first violated rule
    pub fn check(&self) -> Result<(), String> {
        let n = self.row_num();
        if n < 3 {
            return Err(format!("need 2 spatial rows and a temporal row, got {} rows", n));
        }
        if let Some(r) = self.rows.iter().position(|row| row.len() != n) {
            return Err(format!("row {} has {} entries, expected {}", r, self.rows[r].len(), n));
        }
        if self.rows.iter().flatten().any(|&v| v != 0 && v != 1) {
            return Err("entries must be 0 or 1".to_string());
        }
        let spatial: Vec<Vec<usize>> = (0..2)
            .map(|r| (0..n).filter(|&c| self.rows[r][c] == 1).collect())
            .collect();
        for (r, cols) in spatial.iter().enumerate() {
            if cols.len() != 1 {
                return Err(format!("spatial row {} must select exactly one iterator", r));
            }
        }
        if spatial[0][0] == spatial[1][0] {
            return Err("both spatial rows select the same iterator".to_string());
        }
        if let Some(c) = (0..n).find(|&c| self.rows.iter().all(|row| row[c] == 0)) {
            return Err(format!("column {} is never scheduled", c));
        }
        Ok(())
    }

    /// Column holding the 1 of spatial row `axis`
    pub fn spatial_column(&self, axis: usize) -> Option<usize> {
        self.rows.get(axis)?.iter().position(|&v| v == 1)
    }

    /// Insert a row and column at `at` whose only 1 sits on the diagonal
    pub fn insert_spatial(&mut self, at: usize) {
        let n = self.row_num();
        for row in &mut self.rows {
            row.insert(at, 0);
        }
        let mut row = vec![0; n + 1];
        row[at] = 1;
        self.rows.insert(at, row);
    }

    /// Append a temporal row and column for a placeholder iterator
    pub fn append_temporal(&mut self) {
        let n = self.row_num();
        for row in &mut self.rows {
            row.push(0);
        }
        let mut row = vec![0; n + 1];
        row[n] = 1;
        self.rows.push(row);
    }

    /// `T · v`
    pub fn apply(&self, v: &[i32]) -> Vec<i32> {
        self.rows
            .iter()
            .map(|row| row.iter().zip(v).map(|(a, b)| a * b).sum())
            .collect()
    }
}

impl fmt::Display for Transform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for row in &self.rows {
            let cells: Vec<String> = row.iter().map(i32::to_string).collect();
            writeln!(f, "[{}]", cells.join(" "))?;
        }
        Ok(())
    }
}

/// Index coefficients of one tensor over a list of coupled iterators
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Access {
    rows: Vec<Vec<i64>>,
}

impl Access {
    /// An iterator absent from an index expression inherits the coefficient
    /// of the iterator it tiles one level down.
    pub fn construct(tensor: &Tensor, coupled: &[IterId], arena: &IterArena) -> Self {
        let rows = tensor
            .dims()
            .iter()
            .map(|expr| {
                coupled
                    .iter()
                    .map(|&id| {
                        arena
                            .tile_path(id)
                            .into_iter()
                            .map(|v| expr.coef(v))
                            .find(|&c| c != 0)
                            .unwrap_or(0)
                    })
                    .collect()
            })
            .collect();
        Access { rows }
    }

    pub fn from_rows(rows: Vec<Vec<i64>>) -> Self {
        Access { rows }
    }

    pub fn get(&self, row: usize, col: usize) -> i64 {
        self.rows[row][col]
    }

    pub fn row(&self, row: usize) -> &[i64] {
        &self.rows[row]
    }

    pub fn row_num(&self) -> usize {
        self.rows.len()
    }

    pub fn col_num(&self) -> usize {
        self.rows.first().map_or(0, Vec::len)
    }

    /// No iterator affects any index
    pub fn is_scalar(&self) -> bool {
        self.rows.iter().flatten().all(|&c| c == 0)
    }

    fn annihilates(&self, v: &[i32]) -> bool {
        self.rows
            .iter()
            .all(|row| row.iter().zip(v).map(|(a, &b)| a * b as i64).sum::<i64>() == 0)
    }
}

/// Hardware-space directions along which one tensor's data is reused
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ReuseSet {
    dim: usize,
    vecs: BTreeSet<Vec<i32>>,
}

/// Most coupled iterators one level may carry; reuse derivation walks
/// `3^n` step vectors
pub const MAX_COUPLED_VARS: usize = 12;

/// Every non-zero vector of `{-1, 0, 1}^n`
fn ternary_vectors(n: usize) -> impl Iterator<Item = Vec<i32>> {
    assert!(n <= MAX_COUPLED_VARS, "{} iterators exceed the reuse search limit", n);
    (0..3usize.pow(n as u32))
        .map(move |mut code| {
            let mut v = vec![0; n];
            for slot in v.iter_mut() {
                *slot = (code % 3) as i32 - 1;
                code /= 3;
            }
            v
        })
        .filter(|v| v.iter().any(|&x| x != 0))
}

impl ReuseSet {
    /// Image under `transform` of every iterator step that leaves the
    /// tensor index unchanged, kept when it is a unit hardware step
    pub fn derive(transform: &Transform, access: &Access) -> Self {
        let n = transform.col_num();
        let vecs = ternary_vectors(n)
            .filter(|v| access.annihilates(v))
            .map(|v| transform.apply(&v))
            .filter(|h| h.iter().all(|x| (-1..=1).contains(x)) && h.iter().any(|&x| x != 0))
            .collect();
        ReuseSet { dim: transform.row_num(), vecs }
    }

    /// A scalar operand is reused along every direction
    pub fn scalar(n: usize) -> Self {
        ReuseSet { dim: n, vecs: ternary_vectors(n).collect() }
    }

    pub fn dim(&self) -> usize {
        self.dim
    }

    pub fn vectors(&self) -> impl Iterator<Item = &[i32]> {
        self.vecs.iter().map(Vec::as_slice)
    }

    pub fn len(&self) -> usize {
        self.vecs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vecs.is_empty()
    }

    pub fn contains(&self, h: &[i32]) -> bool {
        self.vecs.contains(h)
    }

    /// Some vector moves along hardware dimension `i` alone
    pub fn has_sole(&self, i: usize) -> bool {
        self.vecs
            .iter()
            .any(|h| h[i] != 0 && h.iter().enumerate().all(|(j, &x)| j == i || x == 0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workload::IterVar;

    fn conv() -> (IterArena, Vec<IterId>, Tensor, Tensor, Tensor) {
        let mut arena = IterArena::new();
        let k = arena.add(IterVar::new("k", 0, 3));
        let x = arena.add(IterVar::new("x", 0, 2));
        let c = arena.add(IterVar::new("c", 0, 4));
        let p = arena.add(IterVar::new("p", 0, 3));
        let y = arena.add(IterVar::new("y", 0, 31));
        let q = arena.add(IterVar::new("q", 0, 3));
        let input = Tensor::new("I").dim(c).dim(y + p).dim(x + q);
        let weight = Tensor::new("W").dim(k).dim(c).dim(p).dim(q);
        let output = Tensor::new("O").dim(k).dim(y).dim(x);
        (arena, vec![k, x, c, p, y, q], input, weight, output)
    }

    fn skewed() -> Transform {
        Transform::from_rows(vec![
            vec![1, 0, 0, 0, 0, 0],
            vec![0, 1, 0, 0, 0, 0],
            vec![1, 1, 1, 0, 0, 0],
            vec![0, 0, 0, 1, 0, 0],
            vec![0, 0, 0, 0, 1, 0],
            vec![0, 0, 0, 0, 0, 1],
        ])
    }

    #[test]
    fn test_identity_check() {
        assert!(Transform::identity(3).check().is_ok());
        assert!(Transform::identity(2).check().is_err());
        assert!(skewed().check().is_ok());
    }

    #[test]
    fn test_check_rejects_malformed() {
        let shared = Transform::from_rows(vec![vec![1, 0, 0], vec![1, 0, 0], vec![0, 1, 1]]);
        assert!(shared.check().is_err());
        let two_in_row = Transform::from_rows(vec![vec![1, 1, 0], vec![0, 0, 1], vec![0, 0, 1]]);
        assert!(two_in_row.check().is_err());
        let unscheduled = Transform::from_rows(vec![vec![1, 0, 0], vec![0, 1, 0], vec![1, 0, 0]]);
        assert!(unscheduled.check().is_err());
        let non_binary = Transform::from_rows(vec![vec![1, 0, 0], vec![0, 1, 0], vec![0, 0, 2]]);
        assert!(non_binary.check().is_err());
    }

    #[test]
    fn test_insert_and_append() {
        let mut t = Transform::identity(1);
        t.insert_spatial(0);
        t.insert_spatial(1);
        t.append_temporal();
        assert_eq!(t, Transform::identity(4));

        let mut t = Transform::from_rows(vec![vec![1, 1], vec![0, 1]]);
        t.insert_spatial(1);
        assert_eq!(t.rows(), &[vec![1, 0, 1], vec![0, 1, 0], vec![0, 0, 1]]);
        assert_eq!(t.spatial_column(1), Some(1));
    }

    #[test]
    fn test_access_construct() {
        let (arena, vars, input, _, output) = conv();
        let a = Access::construct(&input, &vars, &arena);
        assert_eq!(a.row_num(), 3);
        assert_eq!(a.col_num(), 6);
        assert_eq!(a.row(1), &[0, 0, 0, 1, 1, 0]);
        assert!(!a.is_scalar());
        let o = Access::construct(&output, &vars, &arena);
        assert_eq!(o.row(2), &[0, 1, 0, 0, 0, 0]);
    }

    #[test]
    fn test_access_inherits_coupled_coefficient() {
        let mut arena = IterArena::new();
        let x = arena.add(IterVar::new("x", 0, 3));
        let outer = arena.add(IterVar::new("X", 0, 7));
        arena.couple(outer, x);
        let t = Tensor::new("A").dim(2 * x);
        let a = Access::construct(&t, &[outer], &arena);
        assert_eq!(a.get(0, 0), 2);
    }

    #[test]
    fn test_access_on_cyclic_tiling_terminates() {
        let mut arena = IterArena::new();
        let x = arena.add(IterVar::new("x", 0, 3));
        let n = arena.add(IterVar::new("n", 0, 1));
        arena.couple(n, n);
        let a = arena.add(IterVar::new("A", 0, 1));
        let b = arena.add(IterVar::new("B", 0, 1));
        arena.couple(a, b);
        arena.couple(b, a);
        let t = Tensor::new("T").dim(x);
        let access = Access::construct(&t, &[x, n, a, b], &arena);
        assert_eq!(access.row(0), &[1, 0, 0, 0]);
    }

    #[test]
    #[should_panic(expected = "reuse search limit")]
    fn test_reuse_search_is_bounded() {
        ReuseSet::scalar(MAX_COUPLED_VARS + 1);
    }

    #[test]
    fn test_scalar_access() {
        let (arena, vars, ..) = conv();
        let bias = Tensor::new("B");
        assert!(Access::construct(&bias, &vars, &arena).is_scalar());
        let reuse = ReuseSet::scalar(3);
        assert_eq!(reuse.len(), 26);
        assert!((0..3).all(|i| reuse.has_sole(i)));
    }

    #[test]
    fn test_systolic_conv_reuse() {
        let (arena, vars, input, weight, output) = conv();
        let t = skewed();
        let ri = ReuseSet::derive(&t, &Access::construct(&input, &vars, &arena));
        let rw = ReuseSet::derive(&t, &Access::construct(&weight, &vars, &arena));
        let ro = ReuseSet::derive(&t, &Access::construct(&output, &vars, &arena));
        // stepping k moves input one PE along X and one cycle
        assert!(ri.contains(&[1, 0, 1, 0, 0, 0]));
        assert!(rw.contains(&[0, 1, 1, 0, 0, 0]));
        assert!(ro.has_sole(2));
        assert!(ro.has_sole(3));
        assert!(!ro.has_sole(4));
    }

    #[test]
    fn test_reuse_derivation_idempotent() {
        let (arena, vars, input, ..) = conv();
        let t = skewed();
        let a = Access::construct(&input, &vars, &arena);
        assert_eq!(ReuseSet::derive(&t, &a), ReuseSet::derive(&t, &a));
    }

    #[test]
    fn test_no_reuse_for_full_access() {
        let t = Transform::identity(3);
        let a = Access::from_rows(vec![vec![1, 0, 0], vec![0, 1, 0], vec![0, 0, 1]]);
        assert!(ReuseSet::derive(&t, &a).is_empty());
    }
}
