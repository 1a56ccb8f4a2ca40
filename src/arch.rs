//! Hardware Level Module
//!
//! One memory/compute level of the accelerator: a PE array, one buffer per
//! operand and one network group per operand. The analyzers only talk to a
//! level through the query operations defined here.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::mapping::ReuseSet;
use crate::network::{Feature, Network, NetworkType};

/// The three operands of a computation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum DataType {
    Input,
    Weight,
    Output,
}

impl DataType {
    pub const ALL: [DataType; 3] = [DataType::Input, DataType::Weight, DataType::Output];

    pub fn index(self) -> usize {
        self as usize
    }

    pub fn name(self) -> &'static str {
        match self {
            DataType::Input => "input",
            DataType::Weight => "weight",
            DataType::Output => "output",
        }
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Storage dedicated to one operand
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Buffer {
    /// Capacity in elements
    pub capacity: u64,
    /// Element width in bits
    pub bit_width: u32,
}

impl Default for Buffer {
    fn default() -> Self {
        Buffer { capacity: u64::MAX, bit_width: 16 }
    }
}

/// One or two networks serving the same operand
#[derive(Debug, Clone)]
pub struct NetworkGroup {
    networks: Vec<Network>,
}

impl NetworkGroup {
    pub fn single(network: Network) -> Self {
        NetworkGroup { networks: vec![network] }
    }

    pub fn pair(first: Network, second: Network) -> Self {
        NetworkGroup { networks: vec![first, second] }
    }

    pub fn networks(&self) -> &[Network] {
        &self.networks
    }

    /// Dominant distribution pattern: the first moving network, else STATIONARY
    pub fn network_type(&self) -> NetworkType {
        self.networks
            .iter()
            .map(Network::network_type)
            .find(|t| *t != NetworkType::Stationary)
            .unwrap_or(NetworkType::Stationary)
    }

    /// Some member keeps the operand resident in the PEs
    pub fn is_stationary(&self) -> bool {
        self.networks.iter().any(|n| n.network_type() == NetworkType::Stationary)
    }

    /// Access points of the moving networks
    pub fn access_points(&self) -> Vec<(usize, usize)> {
        self.networks
            .iter()
            .filter(|n| n.network_type() != NetworkType::Stationary)
            .flat_map(Network::access_points)
            .collect()
    }

    /// Per-iteration delay in steady state
    pub fn stable_delay(&self, base: u64, bit_width: u32) -> u64 {
        match self.networks.as_slice() {
            [only] => only.delay(base, bit_width),
            [a, b] if a.network_type() == NetworkType::Stationary
                || b.network_type() == NetworkType::Stationary =>
            {
                0
            }
            [a, b] => a.delay(base, bit_width).max(b.delay(base, bit_width)),
            _ => unreachable!("a network group holds one or two networks"),
        }
    }

    /// Delay to fill (inputs) or drain (outputs) the array once
    pub fn init_or_out_delay(
        &self,
        base: u64,
        bit_width: u32,
        pex: (i64, i64),
        pey: (i64, i64),
    ) -> u64 {
        let relay = |n: &Network| match n.network_type() {
            NetworkType::Systolic => n.delay(base, bit_width) * n.max_couple_num(pex, pey),
            _ => n.delay(base, bit_width),
        };
        match self.networks.as_slice() {
            [only] => only.delay(base, bit_width),
            [a, b] if a.network_type() == NetworkType::Stationary => relay(b),
            [a, b] if b.network_type() == NetworkType::Stationary => relay(a),
            // neither member keeps data resident; only the first is charged
            [a, _] => a.delay(base, bit_width),
            _ => unreachable!("a network group holds one or two networks"),
        }
    }

    /// Whether some reuse vector fits some member's capability
    pub fn check_reuse(&self, reuse: &ReuseSet) -> bool {
        self.networks.iter().any(|n| {
            n.network_type() == NetworkType::Unicast || reuse.vectors().any(|r| n.supports(r))
        })
    }
}

/// One level of the accelerator hierarchy
#[derive(Debug, Clone)]
pub struct Level {
    pub name: String,
    /// PEs along Y
    pub rows: usize,
    /// PEs along X
    pub cols: usize,
    buffers: [Buffer; 3],
    groups: [NetworkGroup; 3],
}

/// Axis index of PE-X in transforms and range checks
pub const AXIS_X: usize = 0;
/// Axis index of PE-Y in transforms and range checks
pub const AXIS_Y: usize = 1;

impl Level {
    /// Level with unbounded 16-bit buffers and 16-bit unicast networks
    pub fn new(name: impl Into<String>, rows: usize, cols: usize) -> Self {
        let unicast = || NetworkGroup::single(Network::new(Feature::UNICAST, rows, cols, 16));
        Level {
            name: name.into(),
            rows,
            cols,
            buffers: [Buffer::default(); 3],
            groups: [unicast(), unicast(), unicast()],
        }
    }

    pub fn with_buffer(mut self, data_type: DataType, capacity: u64, bit_width: u32) -> Self {
        self.buffers[data_type.index()] = Buffer { capacity, bit_width };
        self
    }

    pub fn with_network(mut self, data_type: DataType, feature: Feature, bandwidth: u64) -> Self {
        let network = Network::new(feature, self.rows, self.cols, bandwidth);
        self.groups[data_type.index()] = NetworkGroup::single(network);
        self
    }

    pub fn with_network_pair(
        mut self,
        data_type: DataType,
        first: Feature,
        second: Feature,
        bandwidth: u64,
    ) -> Self {
        let a = Network::new(first, self.rows, self.cols, bandwidth);
        let b = Network::paired(second, self.rows, self.cols, bandwidth);
        self.groups[data_type.index()] = NetworkGroup::pair(a, b);
        self
    }

    pub fn network_group(&self, data_type: DataType) -> &NetworkGroup {
        &self.groups[data_type.index()]
    }

    pub fn network_type(&self, data_type: DataType) -> NetworkType {
        self.network_group(data_type).network_type()
    }

    pub fn is_stationary(&self, data_type: DataType) -> bool {
        self.network_group(data_type).is_stationary()
    }

    pub fn init_or_out_delay(
        &self,
        data_type: DataType,
        base: u64,
        bit_width: u32,
        pex: (i64, i64),
        pey: (i64, i64),
    ) -> u64 {
        self.network_group(data_type).init_or_out_delay(base, bit_width, pex, pey)
    }

    pub fn stable_delay(&self, data_type: DataType, base: u64, bit_width: u32) -> u64 {
        self.network_group(data_type).stable_delay(base, bit_width)
    }

    pub fn access_points(&self, data_type: DataType) -> Vec<(usize, usize)> {
        self.network_group(data_type).access_points()
    }

    /// Number of PE-array axes with more than one PE
    pub fn spatial_dim_num(&self) -> usize {
        (self.rows > 1) as usize + (self.cols > 1) as usize
    }

    /// PEs along `axis` (`AXIS_X` = columns, `AXIS_Y` = rows)
    pub fn extent(&self, axis: usize) -> usize {
        if axis == AXIS_X {
            self.cols
        } else {
            self.rows
        }
    }

    /// Whether `[lo, hi]` fits inside the array along `axis`
    pub fn check_pe_dim_range(&self, (lo, hi): (i64, i64), axis: usize) -> bool {
        lo >= 0 && hi < self.extent(axis) as i64
    }

    pub fn check_network_reuse_valid(&self, data_type: DataType, reuse: &ReuseSet) -> bool {
        self.network_group(data_type).check_reuse(reuse)
    }

    pub fn buffer_size(&self, data_type: DataType) -> u64 {
        self.buffers[data_type.index()].capacity
    }

    pub fn bit_width(&self, data_type: DataType) -> u32 {
        self.buffers[data_type.index()].bit_width
    }

    pub fn pe_num(&self) -> u64 {
        (self.rows * self.cols) as u64
    }

    /// Static description for reports
    pub fn describe(&self) -> serde_json::Value {
        let operands: serde_json::Map<String, serde_json::Value> = DataType::ALL
            .iter()
            .map(|&dt| {
                let buffer = self.buffers[dt.index()];
                let networks: Vec<_> = self
                    .network_group(dt)
                    .networks()
                    .iter()
                    .map(|n| {
                        json!({
                            "type": n.network_type().to_string(),
                            "feature": <[i32; 3]>::from(n.feature()),
                            "bandwidth": n.bandwidth(),
                            "accessPoints": n.access_points().len(),
                        })
                    })
                    .collect();
                let capacity = if buffer.capacity == u64::MAX {
                    json!("unbounded")
                } else {
                    json!(buffer.capacity)
                };
                let entry = json!({
                    "bufferSize": capacity,
                    "bitWidth": buffer.bit_width,
                    "networks": networks,
                });
                (dt.name().to_string(), entry)
            })
            .collect();
        json!({
            "name": self.name,
            "array": [self.rows, self.cols],
            "operands": operands,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn f(x: i32, y: i32, t: i32) -> Feature {
        Feature::new(x, y, t).unwrap()
    }

    #[test]
    fn test_single_network_delays() {
        let level = Level::new("L1", 16, 16).with_network(DataType::Input, f(1, 0, 1), 16);
        assert_eq!(level.stable_delay(DataType::Input, 2, 16), 2);
        assert_eq!(level.init_or_out_delay(DataType::Input, 2, 16, (0, 3), (0, 3)), 2);
        assert_eq!(level.network_type(DataType::Input), NetworkType::Systolic);
    }

    #[test]
    fn test_stationary_pair_has_no_stable_delay() {
        let group = NetworkGroup::pair(
            Network::new(f(0, 0, 1), 8, 8, 16),
            Network::new(f(0, 1, 1), 8, 8, 16),
        );
        assert_eq!(group.stable_delay(1, 16), 0);
        // filling the systolic relay costs one hop per active PE along Y
        assert_eq!(group.init_or_out_delay(1, 16, (0, 7), (0, 4)), 5);
        assert_eq!(group.network_type(), NetworkType::Systolic);
        assert_eq!(group.access_points().len(), 8);
    }

    #[test]
    fn test_stationary_with_multicast_relay() {
        let group = NetworkGroup::pair(
            Network::new(f(1, 0, 0), 8, 8, 8),
            Network::new(f(0, 0, 1), 8, 8, 8),
        );
        assert_eq!(group.init_or_out_delay(1, 16, (0, 7), (0, 7)), 2);
    }

    #[test]
    fn test_moving_pair_uses_max_stable_delay() {
        let group = NetworkGroup::pair(
            Network::new(f(1, 0, 0), 8, 8, 16),
            Network::new(f(0, 1, 0), 8, 8, 8),
        );
        assert_eq!(group.stable_delay(1, 16), 2);
    }

    #[test]
    fn test_moving_pair_init_charges_first_network_only() {
        // Preserved simplification: with no stationary member only the first
        // network's delay is charged. Whether the second should also count
        // is unverified.
        let group = NetworkGroup::pair(
            Network::new(f(1, 0, 0), 8, 8, 16),
            Network::new(f(0, 1, 0), 8, 8, 4),
        );
        assert_eq!(group.init_or_out_delay(1, 16, (0, 7), (0, 7)), 1);
    }

    #[test]
    fn test_level_pair_second_network_enters_once() {
        let level = Level::new("L", 8, 8).with_network_pair(DataType::Input, f(1, 0, 0), f(0, 1, 0), 16);
        let points = level.access_points(DataType::Input);
        assert_eq!(points.len(), 8 + 1);
        assert_eq!(points.last(), Some(&(0, 0)));
    }

    #[test]
    fn test_spatial_dim_num() {
        assert_eq!(Level::new("a", 16, 16).spatial_dim_num(), 2);
        assert_eq!(Level::new("b", 8, 1).spatial_dim_num(), 1);
        assert_eq!(Level::new("c", 1, 1).spatial_dim_num(), 0);
    }

    #[test]
    fn test_pe_dim_range() {
        let level = Level::new("L", 4, 8);
        assert!(level.check_pe_dim_range((0, 7), AXIS_X));
        assert!(!level.check_pe_dim_range((0, 7), AXIS_Y));
        assert!(level.check_pe_dim_range((0, 3), AXIS_Y));
        assert!(!level.check_pe_dim_range((-1, 2), AXIS_Y));
    }

    #[test]
    fn test_describe() {
        let level = Level::new("GB", 1, 1).with_buffer(DataType::Weight, 1024, 8);
        let d = level.describe();
        assert_eq!(d["name"], "GB");
        assert_eq!(d["operands"]["weight"]["bufferSize"], 1024);
        assert_eq!(d["operands"]["input"]["bufferSize"], "unbounded");
    }
}
