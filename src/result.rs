//! Analysis results
//!
//! `Base` summarises a lower level for the level above. `AnalyzerResult`
//! holds one level's metrics; `ResultNode` arranges them into the tree of
//! visits produced by a multi-level run.

use std::ops::AddAssign;

use serde::{Deserialize, Serialize};

use crate::arch::DataType;

/// Summary of one lower-level run as seen from the level above
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Base {
    /// Cycles one lower-level run takes
    pub delay: u64,
    /// Per tensor, the extent of each dimension covered by one run
    pub tensor_dim_ranges: [Vec<u64>; 3],
}

impl Base {
    pub fn new(delay: u64, tensor_dim_ranges: [Vec<u64>; 3]) -> Self {
        Base { delay, tensor_dim_ranges }
    }

    /// Base of the innermost level: one cycle, one element per dimension
    pub fn innermost(dim_nums: [usize; 3]) -> Self {
        Base {
            delay: 1,
            tensor_dim_ranges: dim_nums.map(|n| vec![1; n]),
        }
    }

    /// Elements of `data_type` moved as one unit
    pub fn data_size(&self, data_type: DataType) -> u64 {
        self.tensor_dim_ranges[data_type.index()].iter().product()
    }
}

/// Metrics of one level, indexed by `DataType::index()` where per operand
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AnalyzerResult {
    pub per_pe_volume: [u64; 3],
    pub unique_volume: [u64; 3],
    pub total_volume: [u64; 3],
    pub reuse_volume: [u64; 3],
    pub required_data_size: [u64; 3],
    pub total_bandwidth: [f64; 3],
    pub init_delay: [u64; 3],
    pub stable_delay: [u64; 3],
    pub stable_comp_delay: u64,
    pub delay: u64,
    pub comp_cycle: u64,
    /// Summed delay until `finalize`, then `comp_cycle / delay`
    pub comp_rate: f64,
    pub active_pe_mult_time_num: u64,
    pub total_pe_mult_time_num: u64,
    pub pe_util_rate: f64,
    pub occ_times: u64,
    pub init_times: u64,
}

fn max3(a: &mut [u64; 3], b: &[u64; 3]) {
    for (x, y) in a.iter_mut().zip(b) {
        *x = (*x).max(*y);
    }
}

fn add3(a: &mut [u64; 3], b: &[u64; 3]) {
    for (x, y) in a.iter_mut().zip(b) {
        *x += y;
    }
}

impl AddAssign<&AnalyzerResult> for AnalyzerResult {
    fn add_assign(&mut self, rhs: &AnalyzerResult) {
        add3(&mut self.unique_volume, &rhs.unique_volume);
        add3(&mut self.total_volume, &rhs.total_volume);
        add3(&mut self.reuse_volume, &rhs.reuse_volume);
        max3(&mut self.per_pe_volume, &rhs.per_pe_volume);
        max3(&mut self.required_data_size, &rhs.required_data_size);
        max3(&mut self.init_delay, &rhs.init_delay);
        max3(&mut self.stable_delay, &rhs.stable_delay);
        self.stable_comp_delay = self.stable_comp_delay.max(rhs.stable_comp_delay);
        self.delay += rhs.delay;
        self.comp_cycle += rhs.comp_cycle;
        self.comp_rate += rhs.comp_rate;
        self.active_pe_mult_time_num += rhs.active_pe_mult_time_num;
        self.total_pe_mult_time_num += rhs.total_pe_mult_time_num;
        self.occ_times += rhs.occ_times;
        self.init_times += rhs.init_times;
    }
}

impl AnalyzerResult {
    /// Additive statistics of `w` occurrences of this result
    pub fn scaled(&self, w: u64) -> AnalyzerResult {
        let mut r = self.clone();
        for i in 0..3 {
            r.unique_volume[i] *= w;
            r.total_volume[i] *= w;
            r.reuse_volume[i] *= w;
        }
        r.delay *= w;
        r.comp_cycle *= w;
        r.comp_rate *= w as f64;
        r.active_pe_mult_time_num *= w;
        r.total_pe_mult_time_num *= w;
        r.init_times *= w;
        r.occ_times = w;
        r
    }

    /// Turn accumulated sums into rates
    pub fn finalize(&mut self) {
        self.comp_rate = if self.comp_rate == 0.0 {
            0.0
        } else {
            self.comp_cycle as f64 / self.comp_rate
        };
        self.pe_util_rate = if self.total_pe_mult_time_num == 0 {
            0.0
        } else {
            self.active_pe_mult_time_num as f64 / self.total_pe_mult_time_num as f64
        };
        self.compute_bandwidth();
    }

    /// `total_volume / delay` per operand
    pub fn compute_bandwidth(&mut self) {
        for i in 0..3 {
            self.total_bandwidth[i] = if self.delay == 0 {
                0.0
            } else {
                self.total_volume[i] as f64 / self.delay as f64
            };
        }
    }

    pub fn reuse_rate(&self, data_type: DataType) -> f64 {
        let i = data_type.index();
        if self.total_volume[i] == 0 {
            0.0
        } else {
            self.reuse_volume[i] as f64 / self.total_volume[i] as f64
        }
    }
}

/// One visit of one level together with the lower-level visits it drove
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultNode {
    pub level: usize,
    /// Times this visit occurs per occurrence of its parent
    pub occ_times: u64,
    pub result: AnalyzerResult,
    pub children: Vec<ResultNode>,
}

impl ResultNode {
    pub fn leaf(level: usize, occ_times: u64, result: AnalyzerResult) -> Self {
        ResultNode { level, occ_times, result, children: Vec::new() }
    }

    /// Post-order: add this subtree into `levels`, weighting every node by
    /// its occurrence count times its ancestors'
    pub fn accumulate(&self, parent_occ: u64, levels: &mut [AnalyzerResult]) {
        let occ = self.occ_times * parent_occ;
        for child in &self.children {
            child.accumulate(occ, levels);
        }
        levels[self.level] += &self.result.scaled(occ);
    }

    /// Number of nodes in the subtree
    pub fn size(&self) -> usize {
        1 + self.children.iter().map(ResultNode::size).sum::<usize>()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> AnalyzerResult {
        AnalyzerResult {
            per_pe_volume: [4, 2, 1],
            unique_volume: [10, 20, 30],
            total_volume: [100, 100, 100],
            reuse_volume: [90, 80, 70],
            init_delay: [3, 1, 2],
            stable_delay: [1, 1, 0],
            stable_comp_delay: 1,
            delay: 50,
            comp_cycle: 25,
            comp_rate: 50.0,
            active_pe_mult_time_num: 400,
            total_pe_mult_time_num: 800,
            init_times: 2,
            ..Default::default()
        }
    }

    #[test]
    fn test_innermost_base() {
        let base = Base::innermost([3, 4, 3]);
        assert_eq!(base.delay, 1);
        assert_eq!(base.tensor_dim_ranges[1], vec![1, 1, 1, 1]);
        assert_eq!(base.data_size(DataType::Weight), 1);
    }

    #[test]
    fn test_data_size() {
        let base = Base::new(7, [vec![2, 3], vec![4], vec![]]);
        assert_eq!(base.data_size(DataType::Input), 6);
        assert_eq!(base.data_size(DataType::Weight), 4);
        assert_eq!(base.data_size(DataType::Output), 1);
    }

    #[test]
    fn test_add_assign_sums_and_maxes() {
        let mut acc = sample();
        let mut other = sample();
        other.init_delay = [1, 5, 0];
        acc += &other;
        assert_eq!(acc.total_volume, [200, 200, 200]);
        assert_eq!(acc.delay, 100);
        assert_eq!(acc.init_delay, [3, 5, 2]);
        assert_eq!(acc.per_pe_volume, [4, 2, 1]);
        assert_eq!(acc.init_times, 4);
    }

    #[test]
    fn test_scaled() {
        let r = sample().scaled(3);
        assert_eq!(r.unique_volume, [30, 60, 90]);
        assert_eq!(r.delay, 150);
        assert_eq!(r.stable_delay, [1, 1, 0]);
        assert_eq!(r.occ_times, 3);
    }

    #[test]
    fn test_finalize() {
        let mut r = sample();
        r.finalize();
        assert_eq!(r.comp_rate, 0.5);
        assert_eq!(r.pe_util_rate, 0.5);
        assert_eq!(r.total_bandwidth, [2.0, 2.0, 2.0]);
    }

    #[test]
    fn test_finalize_empty() {
        let mut r = AnalyzerResult::default();
        r.finalize();
        assert_eq!(r.comp_rate, 0.0);
        assert_eq!(r.pe_util_rate, 0.0);
        assert_eq!(r.total_bandwidth, [0.0; 3]);
    }

    #[test]
    fn test_tree_accumulation_weights_by_ancestors() {
        let leaf = ResultNode::leaf(0, 4, sample());
        let mid = ResultNode { level: 1, occ_times: 2, result: sample(), children: vec![leaf] };
        let root = ResultNode { level: 2, occ_times: 1, result: sample(), children: vec![mid] };
        let mut levels = vec![AnalyzerResult::default(); 3];
        root.accumulate(1, &mut levels);
        assert_eq!(levels[2].total_volume[0], 100);
        assert_eq!(levels[1].total_volume[0], 200);
        assert_eq!(levels[0].total_volume[0], 800);
        assert_eq!(levels[0].occ_times, 8);
        assert_eq!(root.size(), 3);
    }
}
