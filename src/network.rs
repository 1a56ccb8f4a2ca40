//! Network Topology Module
//!
//! Describes how one operand is distributed over the PE array. A network is
//! given by a feature vector `(fx, fy, ft)`: the spatial part says along which
//! axis (or diagonal) data propagates, the temporal part whether it advances
//! one hop per cycle (systolic) or reaches every PE in the same cycle
//! (multicast). Access points are the PEs where data enters the array.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Data distribution pattern of a network
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NetworkType {
    Unicast,
    Multicast,
    Systolic,
    Stationary,
}

impl fmt::Display for NetworkType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            NetworkType::Unicast => "UNICAST",
            NetworkType::Multicast => "MULTICAST",
            NetworkType::Systolic => "SYSTOLIC",
            NetworkType::Stationary => "STATIONARY",
        };
        f.write_str(name)
    }
}

/// Propagation sense along one axis
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    Inc,
    Dec,
}

impl Step {
    fn from_sign(sign: i32) -> Option<Step> {
        match sign {
            1 => Some(Step::Inc),
            -1 => Some(Step::Dec),
            _ => None,
        }
    }

    /// Coordinate where data enters an axis of `extent` PEs
    fn origin(self, extent: usize) -> usize {
        match self {
            Step::Inc => 0,
            Step::Dec => extent - 1,
        }
    }

    /// PEs reachable from coordinate `at` before leaving the axis
    fn reach(self, at: usize, extent: usize) -> usize {
        match self {
            Step::Inc => extent - at,
            Step::Dec => at + 1,
        }
    }

    /// PEs of the active range `[lo, hi]` reachable from `at`
    fn active_reach(self, at: i64, (lo, hi): (i64, i64)) -> i64 {
        match self {
            Step::Inc => hi - at + 1,
            Step::Dec => at - lo + 1,
        }
    }
}

/// Spatial propagation direction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    AlongX(Step),
    AlongY(Step),
    Diagonal(Step, Step),
}

/// Feature vector `(fx, fy, ft)`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "[i32; 3]", into = "[i32; 3]")]
pub struct Feature {
    pub x: i32,
    pub y: i32,
    pub t: i32,
}

impl Feature {
    pub const UNICAST: Feature = Feature { x: 0, y: 0, t: 0 };
    pub const STATIONARY: Feature = Feature { x: 0, y: 0, t: 1 };

    pub fn new(x: i32, y: i32, t: i32) -> Result<Self, ConfigError> {
        Feature::try_from([x, y, t])
    }

    pub fn network_type(&self) -> NetworkType {
        match (self.x != 0 || self.y != 0, self.t != 0) {
            (false, false) => NetworkType::Unicast,
            (false, true) => NetworkType::Stationary,
            (true, false) => NetworkType::Multicast,
            (true, true) => NetworkType::Systolic,
        }
    }

    pub fn direction(&self) -> Option<Direction> {
        match (Step::from_sign(self.x), Step::from_sign(self.y)) {
            (Some(sx), None) => Some(Direction::AlongX(sx)),
            (None, Some(sy)) => Some(Direction::AlongY(sy)),
            (Some(sx), Some(sy)) => Some(Direction::Diagonal(sx, sy)),
            (None, None) => None,
        }
    }
}

impl TryFrom<[i32; 3]> for Feature {
    type Error = ConfigError;

    fn try_from(v: [i32; 3]) -> Result<Self, Self::Error> {
        let spatial_ok = |c: i32| (-1..=1).contains(&c);
        if !spatial_ok(v[0]) || !spatial_ok(v[1]) || !(0..=1).contains(&v[2]) {
            return Err(ConfigError::BadFeature(v));
        }
        Ok(Feature { x: v[0], y: v[1], t: v[2] })
    }
}

impl From<Feature> for [i32; 3] {
    fn from(f: Feature) -> Self {
        [f.x, f.y, f.t]
    }
}

/// One injection point into the PE array
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NetworkItem {
    /// PE coordinate `(x, y)`
    pub access_point: (usize, usize),
    /// Longest chain of PEs fed from this point
    pub max_hops: usize,
}

/// A single network over a `rows x cols` PE array
#[derive(Debug, Clone)]
pub struct Network {
    feature: Feature,
    network_type: NetworkType,
    direction: Option<Direction>,
    rows: usize,
    cols: usize,
    /// Link width in bits per cycle
    bandwidth: u64,
    /// Second network of a pair: an axis-aligned feed enters at one point only
    first_only: bool,
    items: BTreeMap<(usize, usize), NetworkItem>,
}

impl Network {
    pub fn new(feature: Feature, rows: usize, cols: usize, bandwidth: u64) -> Self {
        Self::build(feature, rows, cols, bandwidth, false)
    }

    /// The second network of a pair. Along an axis it keeps only the first
    /// access point; diagonal feeds are built as usual.
    pub fn paired(feature: Feature, rows: usize, cols: usize, bandwidth: u64) -> Self {
        Self::build(feature, rows, cols, bandwidth, true)
    }

    fn build(feature: Feature, rows: usize, cols: usize, bandwidth: u64, first_only: bool) -> Self {
        assert!(rows > 0 && cols > 0, "PE array must not be empty");
        assert!(bandwidth > 0, "network bandwidth must be positive");
        let mut network = Network {
            feature,
            network_type: feature.network_type(),
            direction: feature.direction(),
            rows,
            cols,
            bandwidth,
            first_only,
            items: BTreeMap::new(),
        };
        network.construct_network();
        network
    }

    fn insert(&mut self, access_point: (usize, usize), max_hops: usize) {
        self.items.insert(access_point, NetworkItem { access_point, max_hops });
    }

    /// Build the access points and their hop bounds
    fn construct_network(&mut self) {
        let (rows, cols) = (self.rows, self.cols);
        let lanes = |n: usize| if self.first_only { n.min(1) } else { n };
        match self.direction {
            None => {}
            Some(Direction::AlongX(sx)) => {
                let x = sx.origin(cols);
                for y in 0..lanes(rows) {
                    self.insert((x, y), cols);
                }
            }
            Some(Direction::AlongY(sy)) => {
                let y = sy.origin(rows);
                for x in 0..lanes(cols) {
                    self.insert((x, y), rows);
                }
            }
            Some(Direction::Diagonal(sx, sy)) => {
                // first (or last) row, then the remaining PEs of the first (or last) column
                let (x0, y0) = (sx.origin(cols), sy.origin(rows));
                for x in 0..cols {
                    self.insert((x, y0), rows.min(sx.reach(x, cols)));
                }
                for y in (0..rows).filter(|&y| y != y0) {
                    self.insert((x0, y), cols.min(sy.reach(y, rows)));
                }
            }
        }
    }

    pub fn feature(&self) -> Feature {
        self.feature
    }

    pub fn network_type(&self) -> NetworkType {
        self.network_type
    }

    pub fn direction(&self) -> Option<Direction> {
        self.direction
    }

    pub fn bandwidth(&self) -> u64 {
        self.bandwidth
    }

    pub fn items(&self) -> impl Iterator<Item = &NetworkItem> {
        self.items.values()
    }

    pub fn access_points(&self) -> Vec<(usize, usize)> {
        self.items.keys().copied().collect()
    }

    /// Cycles to move `base` elements of `bit_width` bits over one link
    pub fn delay(&self, base: u64, bit_width: u32) -> u64 {
        (base * bit_width as u64).div_ceil(self.bandwidth)
    }

    /// Longest chain of active PEs fed by one access point
    ///
    /// Panics on UNICAST and STATIONARY networks, which have no chain.
    pub fn max_couple_num(&self, pex: (i64, i64), pey: (i64, i64)) -> u64 {
        assert!(
            !matches!(self.network_type, NetworkType::Unicast | NetworkType::Stationary),
            "max couple count is undefined for {} networks",
            self.network_type
        );
        let n = match self.direction {
            Some(Direction::AlongY(Step::Inc)) => pey.1 + 1,
            Some(Direction::AlongY(Step::Dec)) => self.rows as i64 - pey.0,
            Some(Direction::AlongX(Step::Inc)) => pex.1 + 1,
            Some(Direction::AlongX(Step::Dec)) => self.cols as i64 - pex.0,
            Some(Direction::Diagonal(sx, sy)) => self
                .items
                .values()
                .map(|item| {
                    let (ax, ay) = (item.access_point.0 as i64, item.access_point.1 as i64);
                    sx.active_reach(ax, pex)
                        .min(sy.active_reach(ay, pey))
                        .min(item.max_hops as i64)
                })
                .max()
                .unwrap_or(0),
            None => unreachable!("directional network without a direction"),
        };
        n.max(0) as u64
    }

    /// Whether the hardware-space reuse vector `r` fits this network
    pub fn supports(&self, r: &[i32]) -> bool {
        let (spatial, temporal) = r.split_at(2.min(r.len()));
        let along_feature = spatial == [self.feature.x, self.feature.y];
        match self.network_type {
            NetworkType::Unicast => true,
            NetworkType::Stationary => {
                spatial.iter().all(|&s| s == 0) && temporal.iter().any(|&t| t != 0)
            }
            NetworkType::Multicast => along_feature && temporal.iter().all(|&t| t == 0),
            NetworkType::Systolic => {
                along_feature
                    && temporal.first() == Some(&1)
                    && temporal[1..].iter().all(|&t| t == 0)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn net(x: i32, y: i32, t: i32, rows: usize, cols: usize) -> Network {
        Network::new(Feature::new(x, y, t).unwrap(), rows, cols, 16)
    }

    #[test]
    fn test_feature_classification() {
        assert_eq!(Feature::UNICAST.network_type(), NetworkType::Unicast);
        assert_eq!(Feature::STATIONARY.network_type(), NetworkType::Stationary);
        assert_eq!(Feature::new(1, 0, 0).unwrap().network_type(), NetworkType::Multicast);
        assert_eq!(Feature::new(0, -1, 1).unwrap().network_type(), NetworkType::Systolic);
        assert!(Feature::new(2, 0, 0).is_err());
        assert!(Feature::new(0, 0, -1).is_err());
    }

    #[test]
    fn test_axis_access_points() {
        let n = net(1, 0, 1, 4, 8);
        assert_eq!(n.access_points(), vec![(0, 0), (0, 1), (0, 2), (0, 3)]);
        assert!(n.items().all(|i| i.max_hops == 8));

        let n = net(-1, 0, 1, 4, 8);
        assert!(n.access_points().iter().all(|&(x, _)| x == 7));

        let n = net(0, 1, 0, 4, 8);
        assert_eq!(n.access_points().len(), 8);
        assert!(n.items().all(|i| i.access_point.1 == 0 && i.max_hops == 4));

        let n = net(0, -1, 0, 4, 8);
        assert!(n.access_points().iter().all(|&(_, y)| y == 3));
    }

    #[test]
    fn test_paired_network_enters_once_along_axis() {
        let f = |x, y| Feature::new(x, y, 0).unwrap();
        let n = Network::paired(f(1, 0), 4, 8, 16);
        assert_eq!(n.access_points(), vec![(0, 0)]);
        assert_eq!(n.items().next().map(|i| i.max_hops), Some(8));

        let n = Network::paired(f(0, -1), 4, 8, 16);
        assert_eq!(n.access_points(), vec![(0, 3)]);

        // diagonal feeds ignore the pairing
        let n = Network::paired(f(1, 1), 3, 4, 16);
        assert_eq!(n.access_points().len(), 4 + 2);
        assert!(Network::paired(Feature::STATIONARY, 3, 4, 16).access_points().is_empty());
    }

    #[test]
    fn test_diagonal_access_points() {
        // every PE of the first row and first column, hop bounds shrink away from the corner
        let n = net(1, 1, 1, 3, 4);
        assert_eq!(n.access_points().len(), 4 + 2);
        let hops: BTreeMap<_, _> = n.items().map(|i| (i.access_point, i.max_hops)).collect();
        assert_eq!(hops[&(0, 0)], 3);
        assert_eq!(hops[&(3, 0)], 1);
        assert_eq!(hops[&(0, 2)], 1);

        let n = net(-1, -1, 1, 3, 4);
        let hops: BTreeMap<_, _> = n.items().map(|i| (i.access_point, i.max_hops)).collect();
        assert_eq!(hops[&(3, 2)], 3);
        assert_eq!(hops[&(0, 2)], 1);
        assert_eq!(hops[&(3, 0)], 1);

        let n = net(1, -1, 1, 3, 4);
        let hops: BTreeMap<_, _> = n.items().map(|i| (i.access_point, i.max_hops)).collect();
        assert_eq!(hops[&(0, 2)], 3);
        assert_eq!(hops[&(0, 0)], 1);

        let n = net(-1, 1, 1, 3, 4);
        let hops: BTreeMap<_, _> = n.items().map(|i| (i.access_point, i.max_hops)).collect();
        assert_eq!(hops[&(3, 0)], 3);
        assert_eq!(hops[&(3, 2)], 1);
    }

    #[test]
    fn test_stationary_and_unicast_have_no_access_points() {
        assert!(net(0, 0, 1, 4, 4).access_points().is_empty());
        assert!(net(0, 0, 0, 4, 4).access_points().is_empty());
    }

    #[test]
    fn test_max_couple_num_axis() {
        assert_eq!(net(0, 1, 1, 16, 16).max_couple_num((0, 3), (0, 5)), 6);
        assert_eq!(net(0, -1, 1, 16, 16).max_couple_num((0, 3), (2, 5)), 14);
        assert_eq!(net(1, 0, 1, 16, 16).max_couple_num((0, 3), (0, 5)), 4);
        assert_eq!(net(-1, 0, 1, 16, 16).max_couple_num((1, 3), (0, 5)), 15);
    }

    #[test]
    fn test_max_couple_num_diagonal() {
        let n = net(1, 1, 1, 4, 4);
        // from (0, 0) the diagonal crosses min(4, 3) active PEs
        assert_eq!(n.max_couple_num((0, 3), (0, 2)), 3);
    }

    #[test]
    #[should_panic]
    fn test_max_couple_num_rejects_stationary() {
        net(0, 0, 1, 4, 4).max_couple_num((0, 3), (0, 3));
    }

    #[test]
    fn test_delay_rounds_up() {
        let n = net(1, 0, 1, 4, 4);
        assert_eq!(n.delay(1, 16), 1);
        assert_eq!(n.delay(3, 16), 3);
        assert_eq!(n.delay(1, 8), 1);
        assert_eq!(n.delay(0, 16), 0);
    }

    #[test]
    fn test_supports() {
        let systolic = net(1, 0, 1, 4, 4);
        assert!(systolic.supports(&[1, 0, 1, 0]));
        assert!(!systolic.supports(&[1, 0, 0, 0]));
        assert!(!systolic.supports(&[1, 0, 1, 1]));

        let multicast = net(0, 1, 0, 4, 4);
        assert!(multicast.supports(&[0, 1, 0]));
        assert!(!multicast.supports(&[0, 1, 1]));

        let stationary = net(0, 0, 1, 4, 4);
        assert!(stationary.supports(&[0, 0, 0, 1]));
        assert!(!stationary.supports(&[1, 0, 0, 1]));
    }
}
