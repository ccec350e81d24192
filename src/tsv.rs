//! Typed tab-separated rows
//!
//! Several on-disk artifacts (version indexes, the tree cache) share one
//! tabular text form: a header row naming the columns, then one record per
//! line with cells joined by tabs. Cells are typed per column:
//!
//! - integers are base-10
//! - instants are ISO-8601 in UTC with nanosecond precision
//! - multihashes are lowercase hex
//! - a blank cell denotes an absent value
//!
//! Encoding never fails; decoding reports the line number and column of the
//! first cell that does not parse.

use crate::error::{HoardError, Result};
use crate::multihash::Multihash;
use chrono::{DateTime, Utc};
use std::time::SystemTime;

/// Cell separator
pub const SEPARATOR: char = '\t';

/// Join cells into a row
pub fn join_row(cells: &[String]) -> String {
    cells.join("\t")
}

/// Split a row into cells. A row always has at least one cell.
pub fn split_row(line: &str) -> Vec<&str> {
    line.split(SEPARATOR).collect()
}

fn malformed(line: usize, column: &str, detail: impl std::fmt::Display) -> HoardError {
    HoardError::MalformedRow {
        line,
        reason: format!("column {:?}: {}", column, detail),
    }
}

/// Require a non-blank cell
pub fn required<'a>(cell: Option<&'a str>, line: usize, column: &str) -> Result<&'a str> {
    match cell {
        Some(v) if !v.is_empty() => Ok(v),
        _ => Err(malformed(line, column, "missing required value")),
    }
}

/// Fetch an optional cell, mapping blank to `None`
pub fn optional<'a>(cell: Option<&'a str>) -> Option<&'a str> {
    cell.filter(|v| !v.is_empty())
}

// ---------------------------------------------------------------------------
// Integers
// ---------------------------------------------------------------------------

pub fn fmt_u64(value: Option<u64>) -> String {
    value.map(|v| v.to_string()).unwrap_or_default()
}

pub fn parse_u64(cell: &str, line: usize, column: &str) -> Result<u64> {
    cell.parse::<u64>().map_err(|e| malformed(line, column, e))
}

pub fn fmt_u16(value: Option<u16>) -> String {
    value.map(|v| v.to_string()).unwrap_or_default()
}

pub fn parse_u16(cell: &str, line: usize, column: &str) -> Result<u16> {
    cell.parse::<u16>().map_err(|e| malformed(line, column, e))
}

// ---------------------------------------------------------------------------
// Instants
// ---------------------------------------------------------------------------

/// Render an instant as ISO-8601 UTC with nanosecond precision
pub fn fmt_instant(time: SystemTime) -> String {
    let dt: DateTime<Utc> = time.into();
    dt.format("%Y-%m-%dT%H:%M:%S%.9fZ").to_string()
}

pub fn fmt_instant_opt(time: Option<SystemTime>) -> String {
    time.map(fmt_instant).unwrap_or_default()
}

pub fn parse_instant(cell: &str, line: usize, column: &str) -> Result<SystemTime> {
    let dt = DateTime::parse_from_rfc3339(cell).map_err(|e| malformed(line, column, e))?;
    Ok(dt.with_timezone(&Utc).into())
}

// ---------------------------------------------------------------------------
// Multihashes
// ---------------------------------------------------------------------------

pub fn fmt_multihash(value: Option<&Multihash>) -> String {
    value.map(|h| h.to_hex()).unwrap_or_default()
}

pub fn parse_multihash(cell: &str, line: usize, column: &str) -> Result<Multihash> {
    Multihash::from_hex(cell).map_err(|e| malformed(line, column, e))
}
