//! Summary Table Module
//!
//! The append-only table of per-source PCA summary rows and its delimited
//! text form. Every row carries the source id, the packet time that produced
//! it, the five singular values (`val0..val4`) and the five
//! singular-value-weighted angle deltas (`delta0..delta4`).

use std::collections::HashMap;
use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::Path;

use anyhow::Context;
use serde::{Deserialize, Serialize};

use crate::distance::PointSet;
use crate::error::{Result, SummaryError};
use crate::running::{PcaSummary, PC_N};

const HEADER: &str = "ip,time,val0,val1,val2,val3,val4,delta0,delta1,delta2,delta3,delta4";
const PLAIN_COLUMNS: usize = 2 + 2 * PC_N;
const PORT_COLUMNS: usize = PLAIN_COLUMNS + 1;

/// A numeric column of the summary table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum SummaryColumn {
    /// `valN`: the N-th singular value.
    Value(usize),
    /// `deltaN`: the N-th weighted angle delta.
    Delta(usize),
}

impl SummaryColumn {
    /// `val0..val4` followed by `delta0..delta4`.
    pub fn all() -> Vec<SummaryColumn> {
        (0..PC_N)
            .map(SummaryColumn::Value)
            .chain((0..PC_N).map(SummaryColumn::Delta))
            .collect()
    }

    pub fn name(&self) -> String {
        match self {
            Self::Value(i) => format!("val{i}"),
            Self::Delta(i) => format!("delta{i}"),
        }
    }
}

impl std::str::FromStr for SummaryColumn {
    type Err = SummaryError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let parsed = if let Some(rest) = s.strip_prefix("val") {
            rest.parse::<usize>().ok().map(SummaryColumn::Value)
        } else if let Some(rest) = s.strip_prefix("delta") {
            rest.parse::<usize>().ok().map(SummaryColumn::Delta)
        } else {
            None
        };
        match parsed {
            Some(SummaryColumn::Value(i) | SummaryColumn::Delta(i)) if i >= PC_N => {
                Err(SummaryError::UnknownColumn(s.to_string()))
            }
            Some(column) => Ok(column),
            None => Err(SummaryError::UnknownColumn(s.to_string())),
        }
    }
}

impl TryFrom<String> for SummaryColumn {
    type Error = SummaryError;

    fn try_from(s: String) -> std::result::Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<SummaryColumn> for String {
    fn from(column: SummaryColumn) -> Self {
        column.name()
    }
}

impl std::fmt::Display for SummaryColumn {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// One PCA summary emitted by a source in steady state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SummaryRow {
    pub source: String,
    pub time: f64,
    pub values: [f64; PC_N],
    pub deltas: [f64; PC_N],
}

impl SummaryRow {
    pub fn from_summary(source: String, time: f64, summary: &PcaSummary) -> Self {
        let mut values = [0.0; PC_N];
        let mut deltas = [0.0; PC_N];
        for (slot, v) in values.iter_mut().zip(&summary.singular_values) {
            *slot = *v;
        }
        for (slot, d) in deltas.iter_mut().zip(summary.weighted_angle_deltas()) {
            *slot = d;
        }
        Self {
            source,
            time,
            values,
            deltas,
        }
    }

    pub fn column(&self, column: SummaryColumn) -> f64 {
        match column {
            SummaryColumn::Value(i) => self.values[i],
            SummaryColumn::Delta(i) => self.deltas[i],
        }
    }
}

/// Append-only table of summary rows, indexed by source.
#[derive(Debug, Clone, Default)]
pub struct SummaryTable {
    rows: Vec<SummaryRow>,
    /// Sources in order of first appearance.
    sources: Vec<String>,
    by_source: HashMap<String, Vec<usize>>,
}

impl SummaryTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, row: SummaryRow) {
        let idx = self.rows.len();
        match self.by_source.get_mut(&row.source) {
            Some(indices) => indices.push(idx),
            None => {
                self.sources.push(row.source.clone());
                self.by_source.insert(row.source.clone(), vec![idx]);
            }
        }
        self.rows.push(row);
    }

    pub fn rows(&self) -> &[SummaryRow] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Distinct sources in order of first appearance.
    pub fn sources(&self) -> &[String] {
        &self.sources
    }

    pub fn row_count(&self, source: &str) -> usize {
        self.by_source.get(source).map_or(0, Vec::len)
    }

    /// Sources with at least `min_rows` rows, in order of first appearance.
    pub fn sources_with_min_rows(&self, min_rows: usize) -> Vec<&str> {
        self.sources
            .iter()
            .filter(|s| self.row_count(s) >= min_rows)
            .map(String::as_str)
            .collect()
    }

    /// The source's rows projected onto `columns`, in table order.
    pub fn trajectory(&self, source: &str, columns: &[SummaryColumn]) -> PointSet {
        let indices = self.by_source.get(source).map_or(&[][..], Vec::as_slice);
        let mut data = Vec::with_capacity(columns.len() * indices.len());
        for &idx in indices {
            data.extend(columns.iter().map(|&c| self.rows[idx].column(c)));
        }
        PointSet::from_flat(columns.len(), data)
    }

    pub fn write_csv<W: Write>(&self, mut writer: W) -> std::io::Result<()> {
        writeln!(writer, "{HEADER}")?;
        for row in &self.rows {
            write!(writer, "{},{}", row.source, row.time)?;
            for v in row.values.iter().chain(&row.deltas) {
                write!(writer, ",{v}")?;
            }
            writeln!(writer)?;
        }
        writer.flush()
    }

    /// Reads a 12-column (`ip,time,...`) or 13-column (`ip,port,time,...`)
    /// table. In the 13-column layout the port is merged into the source id
    /// as `ip_port`.
    pub fn read_csv<R: BufRead>(reader: R) -> std::result::Result<Self, SummaryError> {
        let mut lines = reader.lines().enumerate();
        let width = loop {
            match lines.next() {
                Some((_, line)) => {
                    let line = line?;
                    if line.trim().is_empty() {
                        continue;
                    }
                    break line.split(',').count();
                }
                None => return Err(SummaryError::MissingHeader),
            }
        };
        if width != PLAIN_COLUMNS && width != PORT_COLUMNS {
            return Err(SummaryError::UnsupportedLayout(width));
        }

        let mut table = Self::new();
        for (idx, line) in lines {
            let line = line?;
            let line_no = idx + 1;
            if line.trim().is_empty() {
                continue;
            }
            let fields: Vec<&str> = line.split(',').map(str::trim).collect();
            if fields.len() != width {
                return Err(SummaryError::Row {
                    line: line_no,
                    reason: format!("expected {width} fields, got {}", fields.len()),
                });
            }

            let (source, rest) = if width == PORT_COLUMNS {
                (format!("{}_{}", fields[0], fields[1]), &fields[2..])
            } else {
                (fields[0].to_string(), &fields[1..])
            };

            let mut numbers = [0.0; 1 + 2 * PC_N];
            for (slot, raw) in numbers.iter_mut().zip(rest) {
                *slot = raw.parse::<f64>().map_err(|_| SummaryError::Row {
                    line: line_no,
                    reason: format!("not a number: {raw:?}"),
                })?;
            }

            let mut values = [0.0; PC_N];
            let mut deltas = [0.0; PC_N];
            values.copy_from_slice(&numbers[1..1 + PC_N]);
            deltas.copy_from_slice(&numbers[1 + PC_N..]);
            table.push(SummaryRow {
                source,
                time: numbers[0],
                values,
                deltas,
            });
        }
        Ok(table)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let file = File::create(path)
            .with_context(|| format!("Failed to create summary file: {}", path.display()))?;
        self.write_csv(BufWriter::new(file))
            .with_context(|| format!("Failed to write summary file: {}", path.display()))?;
        Ok(())
    }

    pub fn load(path: &Path) -> Result<Self> {
        let file = File::open(path)
            .with_context(|| format!("Failed to open summary file: {}", path.display()))?;
        let table = Self::read_csv(BufReader::new(file))
            .with_context(|| format!("Failed to parse summary file: {}", path.display()))?;
        Ok(table)
    }
}

impl FromIterator<SummaryRow> for SummaryTable {
    fn from_iter<I: IntoIterator<Item = SummaryRow>>(iter: I) -> Self {
        let mut table = Self::new();
        for row in iter {
            table.push(row);
        }
        table
    }
}
