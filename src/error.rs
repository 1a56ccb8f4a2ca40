//! Error types
//!
//! Every error is detected at construction or at analysis entry; none is
//! recoverable inside a run.

use thiserror::Error;

use crate::arch::DataType;

/// Errors raised while building or running an analyzer
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AnalysisError {
    /// The transform matrix is not a legal dataflow
    #[error("invalid transform: {0}")]
    TransformInvalid(String),

    /// A spatial iterator does not fit the PE array along its axis
    #[error("spatial iterator {iterator} spans [{lo}, {hi}] but the PE array has {extent} PEs along axis {axis}")]
    SpatialRangeOutOfBounds {
        iterator: String,
        axis: usize,
        lo: i64,
        hi: i64,
        extent: usize,
    },

    /// Boundary markers only make sense on temporal iterators
    #[error("spatial iterator {0} carries an edge marker")]
    EdgeOnSpatialDim(String),

    /// No reuse vector of the operand fits the level's network
    #[error("no reuse vector of {0} fits the level's network")]
    ReuseIncompatibleWithNetwork(DataType),

    /// `result()` called before `run_one_analysis()`
    #[error("analysis result requested before the analysis ran")]
    ResultNotReady,

    /// The installed base set does not cover every edge state
    #[error("expected {expected} base entries, found {found}")]
    BaseSetMismatch { expected: usize, found: usize },

    /// A level failed its construction checks; the stack is not analyzed
    #[error("level {level} is invalid: {source}")]
    InvalidLevel {
        level: usize,
        #[source]
        source: Box<AnalysisError>,
    },

    /// The stack has no level to analyze
    #[error("no level has been added")]
    EmptyStack,

    /// Reuse derivation enumerates `3^n` step vectors over the coupled iterators
    #[error("{found} coupled iterators, at most {max} per level")]
    TooManyIterators { found: usize, max: usize },
}

/// Errors raised while loading or lowering a problem description
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML parse error: {0}")]
    TomlDe(#[from] toml::de::Error),

    #[error("TOML write error: {0}")]
    TomlSer(#[from] toml::ser::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("unknown iterator `{0}`")]
    UnknownIterator(String),

    #[error("duplicate iterator `{0}`")]
    DuplicateIterator(String),

    /// Following `tiles` from an iterator comes back to one already visited
    #[error("iterator `{0}` tiles itself through its `tiles` chain")]
    CyclicTiling(String),

    #[error("feature vector {0:?} is not in {{-1,0,1}}x{{-1,0,1}}x{{0,1}}")]
    BadFeature([i32; 3]),

    #[error("level {level}: {reason}")]
    BadLevel { level: usize, reason: String },

    #[error("unknown preset `{0}`")]
    UnknownPreset(String),

    #[error("cannot parse index expression `{0}`")]
    BadExpr(String),
}

/// Errors raised while parsing a delimited report
#[derive(Error, Debug, PartialEq)]
pub enum ReportError {
    #[error("row {row}: expected {expected} fields, found {found}")]
    FieldCount { row: usize, expected: usize, found: usize },

    #[error("row {row}, column {column}: cannot parse `{value}`")]
    BadField { row: usize, column: String, value: String },

    #[error("report has no header row")]
    MissingHeader,
}
