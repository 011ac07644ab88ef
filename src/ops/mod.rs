/*
 * Copyright (c) 2025-present Dawid Pawlik
 *
 * For educational use only by employees and students of MIMUW.
 * See LICENSE file for details.
 */

//! # The operator library
//!
//! Every operator is a pure function over a table (or raw file bytes for the
//! lazy and partial paths) producing a new table or a typed-array bundle;
//! none mutate their input. Shared here: by-value group keys, the value
//! ordering used by sort and ranking, and JSON conversion for row-object
//! output.

use crate::Value;
use crate::format_epoch_millis;
use serde::Deserialize;
use serde::Serialize;
use std::cmp::Ordering;

pub mod aggregate;
pub mod filter;
pub mod join;
pub mod reshape;
pub mod sort;
pub mod stats;
pub mod window;

/// A hashable by-value key over one cell
///
/// Floats key by their bit pattern, so key equality is exact by-value
/// equality; Null is its own key and forms its own group.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Key {
    Integer(i64),
    Float(u64),
    String(String),
    DateTime(i64),
    Null,
}

impl Key {
    pub fn from_value(value: &Value) -> Key {
        match value {
            Value::Integer(v) => Key::Integer(*v),
            Value::Float(v) => Key::Float(v.to_bits()),
            Value::String(v) => Key::String(v.clone()),
            Value::DateTime(v) => Key::DateTime(*v),
            Value::Null => Key::Null,
        }
    }

    pub fn to_value(&self) -> Value {
        match self {
            Key::Integer(v) => Value::Integer(*v),
            Key::Float(bits) => Value::Float(f64::from_bits(*bits)),
            Key::String(v) => Value::String(v.clone()),
            Key::DateTime(v) => Value::DateTime(*v),
            Key::Null => Value::Null,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Key::Null)
    }
}

/// Total order over cell values: Null sorts after everything, NaN after real
/// numbers, ties are decided by the caller's stable sort
pub(crate) fn compare_values(a: &Value, b: &Value) -> Ordering {
    match (a, b) {
        (Value::Null, Value::Null) => Ordering::Equal,
        (Value::Null, _) => Ordering::Greater,
        (_, Value::Null) => Ordering::Less,
        (Value::String(x), Value::String(y)) => x.cmp(y),
        _ => {
            let x = a.as_f64();
            let y = b.as_f64();
            match (x, y) {
                (Some(x), Some(y)) => compare_f64(x, y),
                // Mixed string/numeric cannot occur within one column;
                // fall back to the display form for cross-column callers
                _ => a.to_string().cmp(&b.to_string()),
            }
        }
    }
}

pub(crate) fn compare_f64(x: f64, y: f64) -> Ordering {
    match (x.is_nan(), y.is_nan()) {
        (true, true) => Ordering::Equal,
        (true, false) => Ordering::Greater,
        (false, true) => Ordering::Less,
        (false, false) => x.partial_cmp(&y).unwrap_or(Ordering::Equal),
    }
}

/// Row-object representation of a cell
///
/// DateTime renders in its canonical string form; a non-finite float renders
/// as JSON null (JSON has no NaN).
pub(crate) fn value_to_json(value: &Value) -> serde_json::Value {
    match value {
        Value::Integer(v) => serde_json::Value::from(*v),
        Value::Float(v) => serde_json::Number::from_f64(*v)
            .map(serde_json::Value::Number)
            .unwrap_or(serde_json::Value::Null),
        Value::String(v) => serde_json::Value::from(v.clone()),
        Value::DateTime(v) => serde_json::Value::from(format_epoch_millis(*v)),
        Value::Null => serde_json::Value::Null,
    }
}
