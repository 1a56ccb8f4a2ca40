//! Report Emission
//!
//! A multi-level run is reported two ways: a delimited table with one row
//! per level, and a nested object keyed `"LEVELk"` that pairs each level's
//! configuration with its result.

use std::fs::OpenOptions;
use std::io::{self, Write};
use std::path::Path;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::analysis::MultiLevelReport;
use crate::arch::DataType;
use crate::error::ReportError;
use crate::result::AnalyzerResult;

/// Column order of operands in the table
pub const REPORT_ORDER: [DataType; 3] = [DataType::Output, DataType::Input, DataType::Weight];

/// One table row; per-operand arrays are indexed by `DataType::index()`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LevelRow {
    pub level: usize,
    pub unique: [u64; 3],
    pub reuse: [u64; 3],
    pub total: [u64; 3],
    pub reuse_rate: [f64; 3],
    pub buffer_size: [u64; 3],
    pub total_bandwidth: [f64; 3],
    pub init_delay: [u64; 3],
    pub init_times: u64,
    pub stable_delay: [u64; 3],
    pub stable_comp_delay: u64,
    pub delay: u64,
    pub comp_cycle_rate: f64,
    pub pe_util_rate: f64,
}

impl LevelRow {
    pub fn from_result(level: usize, r: &AnalyzerResult) -> Self {
        LevelRow {
            level,
            unique: r.unique_volume,
            reuse: r.reuse_volume,
            total: r.total_volume,
            reuse_rate: DataType::ALL.map(|dt| r.reuse_rate(dt)),
            buffer_size: r.required_data_size,
            total_bandwidth: r.total_bandwidth,
            init_delay: r.init_delay,
            init_times: r.init_times,
            stable_delay: r.stable_delay,
            stable_comp_delay: r.stable_comp_delay,
            delay: r.delay,
            comp_cycle_rate: r.comp_rate,
            pe_util_rate: r.pe_util_rate,
        }
    }

    fn fields(&self) -> Vec<String> {
        let mut out = vec![self.level.to_string()];
        for dt in REPORT_ORDER {
            let i = dt.index();
            out.push(self.unique[i].to_string());
            out.push(self.reuse[i].to_string());
            out.push(self.total[i].to_string());
            out.push(self.reuse_rate[i].to_string());
        }
        out.extend(REPORT_ORDER.map(|dt| self.buffer_size[dt.index()].to_string()));
        out.extend(REPORT_ORDER.map(|dt| self.total_bandwidth[dt.index()].to_string()));
        out.extend(REPORT_ORDER.map(|dt| self.init_delay[dt.index()].to_string()));
        out.push(self.init_times.to_string());
        out.extend(REPORT_ORDER.map(|dt| self.stable_delay[dt.index()].to_string()));
        out.push(self.stable_comp_delay.to_string());
        out.push(self.delay.to_string());
        out.push(self.comp_cycle_rate.to_string());
        out.push(self.pe_util_rate.to_string());
        out
    }

    fn parse(cur: &mut Cursor<'_>) -> Result<Self, ReportError> {
        let level = cur.next()?;
        let (mut unique, mut reuse, mut total, mut reuse_rate) = ([0; 3], [0; 3], [0; 3], [0.0; 3]);
        for dt in REPORT_ORDER {
            let i = dt.index();
            unique[i] = cur.next()?;
            reuse[i] = cur.next()?;
            total[i] = cur.next()?;
            reuse_rate[i] = cur.next()?;
        }
        let buffer_size = cur.operands()?;
        let total_bandwidth = cur.operands()?;
        let init_delay = cur.operands()?;
        let init_times = cur.next()?;
        let stable_delay = cur.operands()?;
        Ok(LevelRow {
            level,
            unique,
            reuse,
            total,
            reuse_rate,
            buffer_size,
            total_bandwidth,
            init_delay,
            init_times,
            stable_delay,
            stable_comp_delay: cur.next()?,
            delay: cur.next()?,
            comp_cycle_rate: cur.next()?,
            pe_util_rate: cur.next()?,
        })
    }
}

/// Column names of the table
pub fn csv_header() -> Vec<String> {
    let mut names = vec!["level".to_string()];
    for dt in REPORT_ORDER {
        for metric in ["unique", "reuse", "total", "reuseRate"] {
            names.push(format!("{}_{}", metric, dt));
        }
    }
    for metric in ["bufferSize", "totalBandWidth", "maxInitDelay"] {
        names.extend(REPORT_ORDER.map(|dt| format!("{}_{}", metric, dt)));
    }
    names.push("maxInitTimes".to_string());
    names.extend(REPORT_ORDER.map(|dt| format!("maxStableDelay_{}", dt)));
    for name in ["maxStableCompDelay", "delay", "compCycleRate", "PEUtilRate"] {
        names.push(name.to_string());
    }
    names
}

/// Header plus one line per row
pub fn to_csv(rows: &[LevelRow]) -> String {
    let mut out = csv_header().join(",");
    out.push('\n');
    for row in rows {
        out.push_str(&row.fields().join(","));
        out.push('\n');
    }
    out
}

struct Cursor<'a> {
    row: usize,
    names: &'a [String],
    fields: Vec<&'a str>,
    pos: usize,
}

impl Cursor<'_> {
    fn next<T: FromStr>(&mut self) -> Result<T, ReportError> {
        let value = self.fields[self.pos].trim();
        let parsed = value.parse().map_err(|_| ReportError::BadField {
            row: self.row,
            column: self.names[self.pos].clone(),
            value: value.to_string(),
        });
        self.pos += 1;
        parsed
    }

    /// Three values in `REPORT_ORDER`, returned by `DataType::index()`
    fn operands<T: FromStr + Default + Copy>(&mut self) -> Result<[T; 3], ReportError> {
        let mut out = [T::default(); 3];
        for dt in REPORT_ORDER {
            out[dt.index()] = self.next()?;
        }
        Ok(out)
    }
}

/// Parse a table written by `to_csv`; blank lines are skipped
pub fn parse_csv(text: &str) -> Result<Vec<LevelRow>, ReportError> {
    let mut lines = text.lines().filter(|l| !l.trim().is_empty());
    let header = lines.next().ok_or(ReportError::MissingHeader)?;
    let names = csv_header();
    if header.split(',').next().map(str::trim) != Some("level") {
        return Err(ReportError::MissingHeader);
    }
    lines
        .enumerate()
        .map(|(row, line)| {
            let fields: Vec<&str> = line.split(',').collect();
            if fields.len() != names.len() {
                return Err(ReportError::FieldCount { row, expected: names.len(), found: fields.len() });
            }
            LevelRow::parse(&mut Cursor { row, names: &names, fields, pos: 0 })
        })
        .collect()
}

/// Append rows to a report file, writing the header when the file is new
pub fn append_csv(path: &Path, rows: &[LevelRow]) -> io::Result<()> {
    let mut file = OpenOptions::new().create(true).append(true).open(path)?;
    let text = to_csv(rows);
    if file.metadata()?.len() == 0 {
        file.write_all(text.as_bytes())
    } else {
        let body = text.split_once('\n').map_or("", |(_, rest)| rest);
        file.write_all(body.as_bytes())
    }
}

impl MultiLevelReport {
    pub fn rows(&self) -> Vec<LevelRow> {
        self.levels
            .iter()
            .enumerate()
            .map(|(i, r)| LevelRow::from_result(i, r))
            .collect()
    }

    pub fn to_csv(&self) -> String {
        to_csv(&self.rows())
    }

    /// `{"LEVEL0": {"config": .., "result": ..}, ..}`
    pub fn to_nested(&self) -> serde_json::Result<serde_json::Value> {
        let mut out = serde_json::Map::new();
        for (i, (config, result)) in self.configs.iter().zip(&self.levels).enumerate() {
            out.insert(
                format!("LEVEL{}", i),
                json!({ "config": config, "result": serde_json::to_value(result)? }),
            );
        }
        Ok(serde_json::Value::Object(out))
    }
}

fn operand_line(f: &mut std::fmt::Formatter<'_>, label: &str, v: [String; 3]) -> std::fmt::Result {
    writeln!(f, "║ {:<24}{:>10} {:>10} {:>10}   ║", label, v[0], v[1], v[2])
}

impl std::fmt::Display for LevelRow {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "╔══════════════════════════════════════════════════════════════╗")?;
        writeln!(f, "║ Level {:<3}                {:>10} {:>10} {:>10}   ║", self.level, "output", "input", "weight")?;
        writeln!(f, "╠══════════════════════════════════════════════════════════════╣")?;
        let pick = |a: &[u64; 3]| REPORT_ORDER.map(|dt| a[dt.index()].to_string());
        let pick_f = |a: &[f64; 3]| REPORT_ORDER.map(|dt| format!("{:.3}", a[dt.index()]));
        operand_line(f, "Unique volume", pick(&self.unique))?;
        operand_line(f, "Reuse volume", pick(&self.reuse))?;
        operand_line(f, "Total volume", pick(&self.total))?;
        operand_line(f, "Reuse rate", pick_f(&self.reuse_rate))?;
        operand_line(f, "Buffer size", pick(&self.buffer_size))?;
        operand_line(f, "Bandwidth (elem/cycle)", pick_f(&self.total_bandwidth))?;
        operand_line(f, "Init delay", pick(&self.init_delay))?;
        operand_line(f, "Stable delay", pick(&self.stable_delay))?;
        writeln!(f, "╠══════════════════════════════════════════════════════════════╣")?;
        writeln!(f, "║ Delay:                     {:>12} cycles                ║", self.delay)?;
        writeln!(f, "║ Init Times:                {:>12}                       ║", self.init_times)?;
        writeln!(f, "║ Stable Compute Delay:      {:>12}                       ║", self.stable_comp_delay)?;
        writeln!(f, "║ Compute Cycle Rate:        {:>11.2}%                       ║", self.comp_cycle_rate * 100.0)?;
        writeln!(f, "║ PE Utilization:            {:>11.2}%                       ║", self.pe_util_rate * 100.0)?;
        writeln!(f, "╚══════════════════════════════════════════════════════════════╝")?;
        Ok(())
    }
}
