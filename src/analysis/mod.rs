//! Analysis engines
//!
//! `single` evaluates one hardware level against the summaries of the
//! level below; `multi` drives it recursively over a stack of levels.

pub mod multi;
pub mod single;

pub use multi::{MultiLevelAnalyzer, MultiLevelReport, SubLevelBases};
pub use single::Analyzer;
