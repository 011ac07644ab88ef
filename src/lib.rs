/*
 * Copyright (c) 2025-present Dawid Pawlik
 *
 * For educational use only by employees and students of MIMUW.
 * See LICENSE file for details.
 */

//! # STRATA - A Compressed Chunked Columnar Table Engine
//!
//! This library provides a columnar table store with two-tier compression,
//! schema inference from delimited text, and an operator library (aggregation,
//! window functions, filtering, sorting, joins, reshaping and statistical
//! transforms) that runs directly over the chunked representation.
//!
//! Values live in fixed-capacity chunks, each encoded with a type-specific
//! Tier-1 codec (frame-of-reference bit packing, dictionaries) and wrapped in
//! general-purpose Tier-2 byte compression (LZ4/Zstd) for storage.

use chrono::DateTime as ChronoDateTime;
use chrono::NaiveDate;
use chrono::NaiveDateTime;
use chrono::TimeZone;
use chrono::Utc;
use serde::Deserialize;
use serde::Serialize;
use std::fmt;

pub mod chunk;
pub mod column;
pub mod compression;
pub mod engine;
pub mod error;
pub mod memory;
pub mod ops;
pub mod schema;
pub mod serialization;
pub mod table;

pub use engine::Engine;
pub use error::EngineError;
pub use error::Result;
pub use schema::SchemaAnalyzer;
pub use schema::SchemaConfig;
pub use table::Table;

/// Logical column types supported by the engine
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum ColumnType {
    Integer,
    Float,
    String,
    DateTime,
}

impl ColumnType {
    /// Wire tag used in the portable file format
    pub fn type_tag(self) -> u8 {
        match self {
            ColumnType::Integer => 0,
            ColumnType::Float => 1,
            ColumnType::String => 2,
            ColumnType::DateTime => 3,
        }
    }

    pub fn from_tag(tag: u8) -> Option<Self> {
        match tag {
            0 => Some(ColumnType::Integer),
            1 => Some(ColumnType::Float),
            2 => Some(ColumnType::String),
            3 => Some(ColumnType::DateTime),
            _ => None,
        }
    }

    pub fn is_numeric(self) -> bool {
        matches!(
            self,
            ColumnType::Integer | ColumnType::Float | ColumnType::DateTime
        )
    }
}

impl fmt::Display for ColumnType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ColumnType::Integer => "integer",
            ColumnType::Float => "float",
            ColumnType::String => "string",
            ColumnType::DateTime => "datetime",
        };
        write!(f, "{}", name)
    }
}

/// A single cell value
///
/// `Null` occurs only in columns marked nullable by the schema and in the
/// non-matching side of lookup joins. String columns are never nullable; an
/// empty cell is the empty string.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Integer(i64),
    Float(f64),
    String(String),
    DateTime(i64),
    Null,
}

impl Value {
    pub fn column_type(&self) -> Option<ColumnType> {
        match self {
            Value::Integer(_) => Some(ColumnType::Integer),
            Value::Float(_) => Some(ColumnType::Float),
            Value::String(_) => Some(ColumnType::String),
            Value::DateTime(_) => Some(ColumnType::DateTime),
            Value::Null => None,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Numeric view of the value; `None` for strings and nulls
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Integer(v) => Some(*v as f64),
            Value::Float(v) => Some(*v),
            Value::DateTime(v) => Some(*v as f64),
            Value::String(_) | Value::Null => None,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Integer(v) => write!(f, "{}", v),
            Value::Float(v) => write!(f, "{}", v),
            Value::String(v) => write!(f, "{}", v),
            Value::DateTime(v) => write!(f, "{}", format_epoch_millis(*v)),
            Value::Null => write!(f, "null"),
        }
    }
}

// ====== DateTime mapping ======
//
// DateTime values are epoch-millisecond integers; the chunk codec delegates
// to the integer codec. Only the string mapping lives here.

/// Accepted input formats, tried in order
const DATETIME_FORMATS: &[&str] = &["%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M:%S"];

/// Parse a datetime string to epoch milliseconds (UTC)
///
/// Accepts `%Y-%m-%d`, `%Y-%m-%dT%H:%M:%S`, `%Y-%m-%d %H:%M:%S` and RFC 3339.
pub fn parse_epoch_millis(text: &str) -> Option<i64> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return None;
    }

    if let Ok(dt) = ChronoDateTime::parse_from_rfc3339(trimmed) {
        return Some(dt.with_timezone(&Utc).timestamp_millis());
    }

    for format in DATETIME_FORMATS {
        if let Ok(naive) = NaiveDateTime::parse_from_str(trimmed, format) {
            return Some(Utc.from_utc_datetime(&naive).timestamp_millis());
        }
    }

    if let Ok(date) = NaiveDate::parse_from_str(trimmed, "%Y-%m-%d") {
        let naive = date.and_hms_opt(0, 0, 0)?;
        return Some(Utc.from_utc_datetime(&naive).timestamp_millis());
    }

    None
}

/// Canonical string form of an epoch-millisecond value: `%Y-%m-%dT%H:%M:%S%.3f` UTC
pub fn format_epoch_millis(millis: i64) -> String {
    match ChronoDateTime::from_timestamp_millis(millis) {
        Some(dt) => dt.naive_utc().format("%Y-%m-%dT%H:%M:%S%.3f").to_string(),
        None => millis.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_type_tags_round_trip() {
        for ct in [
            ColumnType::Integer,
            ColumnType::Float,
            ColumnType::String,
            ColumnType::DateTime,
        ] {
            assert_eq!(ColumnType::from_tag(ct.type_tag()), Some(ct));
        }
        assert_eq!(ColumnType::from_tag(4), None);
    }

    #[test]
    fn test_datetime_parsing() {
        assert_eq!(parse_epoch_millis("1970-01-01"), Some(0));
        assert_eq!(parse_epoch_millis("1970-01-01T00:00:01"), Some(1000));
        assert_eq!(parse_epoch_millis("1970-01-01 00:00:01"), Some(1000));
        assert_eq!(parse_epoch_millis("1970-01-01T00:00:00+00:00"), Some(0));
        assert_eq!(parse_epoch_millis("not a date"), None);
        assert_eq!(parse_epoch_millis(""), None);
    }

    #[test]
    fn test_datetime_formatting() {
        assert_eq!(format_epoch_millis(0), "1970-01-01T00:00:00.000");
        assert_eq!(format_epoch_millis(1500), "1970-01-01T00:00:01.500");
    }

    #[test]
    fn test_value_as_f64() {
        assert_eq!(Value::Integer(3).as_f64(), Some(3.0));
        assert_eq!(Value::Float(2.5).as_f64(), Some(2.5));
        assert_eq!(Value::DateTime(1000).as_f64(), Some(1000.0));
        assert_eq!(Value::String("x".to_string()).as_f64(), None);
        assert_eq!(Value::Null.as_f64(), None);
    }
}
