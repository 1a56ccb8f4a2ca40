//! Preset Problems
//!
//! Ready-made workloads and mappings:
//! - 2-D convolution on a skewed systolic array
//! - the same convolution with multicast operand delivery
//! - output-stationary matrix multiplication

use crate::config::{IteratorConfig, LevelConfig, OperandConfig, ProblemConfig, TensorConfig};
use crate::error::ConfigError;
use crate::network::Feature;

/// Names accepted by `preset`
pub const PRESETS: [&str; 3] = ["conv2d-systolic", "conv2d-multicast", "gemm-os"];

pub fn preset(name: &str) -> Result<ProblemConfig, ConfigError> {
    match name {
        "conv2d-systolic" => Ok(conv2d_systolic()),
        "conv2d-multicast" => Ok(conv2d_multicast()),
        "gemm-os" => Ok(gemm_output_stationary()),
        _ => Err(ConfigError::UnknownPreset(name.to_string())),
    }
}

fn iter(name: &str, lo: i64, hi: i64) -> IteratorConfig {
    IteratorConfig { name: name.to_string(), lo, hi, edge: None, tiles: None }
}

fn dims(names: &[&str]) -> Vec<String> {
    names.iter().map(|s| s.to_string()).collect()
}

fn feature(x: i32, y: i32, t: i32) -> Feature {
    Feature::try_from([x, y, t]).unwrap_or(Feature::UNICAST)
}

/// Single-PE global buffer level stepping over tiles of `coupled`
fn global_buffer(coupled: &[&str]) -> LevelConfig {
    let operand = OperandConfig { bandwidth: 64, ..Default::default() };
    LevelConfig {
        name: "GB".to_string(),
        rows: 1,
        cols: 1,
        double_buffer: false,
        coupled: dims(coupled),
        transform: None,
        input: operand.clone(),
        weight: operand.clone(),
        output: operand,
    }
}

fn conv2d(name: &str, transform: Vec<Vec<i32>>, features: [Feature; 3]) -> ProblemConfig {
    let register = |f: Feature| OperandConfig {
        buffer: Some(128),
        ..OperandConfig::with_networks(&[f])
    };
    ProblemConfig {
        name: name.to_string(),
        iterators: vec![
            iter("k", 0, 3),
            iter("c", 0, 4),
            IteratorConfig { edge: Some([0, 5]), ..iter("y", 0, 31) },
            iter("x", 0, 2),
            iter("p", 0, 3),
            iter("q", 0, 3),
            IteratorConfig { tiles: Some("y".to_string()), ..iter("Y", 0, 2) },
        ],
        tensors: TensorConfig {
            input: dims(&["c", "y + p", "x + q"]),
            weight: dims(&["k", "c", "p", "q"]),
            output: dims(&["k", "y", "x"]),
        },
        levels: vec![
            LevelConfig {
                name: "PE".to_string(),
                rows: 16,
                cols: 16,
                double_buffer: false,
                coupled: dims(&["k", "x", "c", "p", "y", "q"]),
                transform: Some(transform),
                input: register(features[0]),
                weight: register(features[1]),
                output: register(features[2]),
            },
            global_buffer(&["Y"]),
        ],
    }
}

/// Convolution with `k` across columns, `x` across rows and a skewed
/// first time step, so inputs flow along X and weights along Y
pub fn conv2d_systolic() -> ProblemConfig {
    let transform = vec![
        vec![1, 0, 0, 0, 0, 0],
        vec![0, 1, 0, 0, 0, 0],
        vec![1, 1, 1, 0, 0, 0],
        vec![0, 0, 0, 1, 0, 0],
        vec![0, 0, 0, 0, 1, 0],
        vec![0, 0, 0, 0, 0, 1],
    ];
    conv2d(
        "conv2d-systolic",
        transform,
        [feature(1, 0, 1), feature(0, 1, 1), Feature::STATIONARY],
    )
}

/// Same loop nest, unskewed, with row and column broadcast buses
pub fn conv2d_multicast() -> ProblemConfig {
    let transform = (0..6)
        .map(|r| (0..6).map(|c| (r == c) as i32).collect())
        .collect();
    conv2d(
        "conv2d-multicast",
        transform,
        [feature(1, 0, 0), feature(0, 1, 0), Feature::STATIONARY],
    )
}

/// `C[i][j] += A[i][k] * B[k][j]` on an 8x8 array, partial sums held in
/// the PEs, with the reduction split into four tiles at the buffer level
pub fn gemm_output_stationary() -> ProblemConfig {
    ProblemConfig {
        name: "gemm-os".to_string(),
        iterators: vec![
            iter("i", 0, 7),
            iter("j", 0, 7),
            iter("k", 0, 15),
            IteratorConfig { tiles: Some("k".to_string()), ..iter("K", 0, 3) },
        ],
        tensors: TensorConfig {
            input: dims(&["i", "k"]),
            weight: dims(&["k", "j"]),
            output: dims(&["i", "j"]),
        },
        levels: vec![
            LevelConfig {
                name: "PE".to_string(),
                rows: 8,
                cols: 8,
                double_buffer: true,
                coupled: dims(&["i", "j", "k"]),
                transform: None,
                input: OperandConfig::with_networks(&[feature(0, 1, 0)]),
                weight: OperandConfig::with_networks(&[feature(1, 0, 0)]),
                output: OperandConfig::with_networks(&[Feature::STATIONARY]),
            },
            global_buffer(&["K"]),
        ],
    }
}
