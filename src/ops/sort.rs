/*
 * Copyright (c) 2025-present Dawid Pawlik
 *
 * For educational use only by employees and students of MIMUW.
 * See LICENSE file for details.
 */

//! # Multi-key stable sort
//!
//! Sorting produces a row permutation rather than a reordered table, so
//! callers can reorder lazily or feed the permutation to a host runtime.
//! Null (and NaN) rows pin to the end of the order under both directions;
//! ties keep their original relative order because the underlying sort is
//! stable.

use crate::Table;
use crate::Value;
use crate::column::Column;
use crate::error::EngineError;
use crate::error::Result;
use crate::ops::compare_values;
use serde::Deserialize;
use serde::Serialize;
use std::cmp::Ordering;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SortKey {
    pub field: String,
    #[serde(default = "default_ascending")]
    pub ascending: bool,
}

fn default_ascending() -> bool {
    true
}

impl SortKey {
    pub fn ascending(field: impl Into<String>) -> Self {
        SortKey {
            field: field.into(),
            ascending: true,
        }
    }

    pub fn descending(field: impl Into<String>) -> Self {
        SortKey {
            field: field.into(),
            ascending: false,
        }
    }
}

// 0 = orderable, 1 = NaN, 2 = Null; the latter two ignore direction
fn order_class(value: &Value) -> u8 {
    match value {
        Value::Null => 2,
        Value::Float(v) if v.is_nan() => 1,
        _ => 0,
    }
}

/// One-key comparison honoring direction, with Null/NaN pinned last
pub(crate) fn compare_with_direction(a: &Value, b: &Value, ascending: bool) -> Ordering {
    let (class_a, class_b) = (order_class(a), order_class(b));
    if class_a != 0 || class_b != 0 {
        return class_a.cmp(&class_b);
    }
    let ord = compare_values(a, b);
    if ascending { ord } else { ord.reverse() }
}

/// Compute the row permutation that sorts `table` by `keys`
pub fn sort(table: &Table, keys: &[SortKey]) -> Result<Vec<u32>> {
    let columns: Vec<Vec<Value>> = keys
        .iter()
        .map(|key| table.get_column_dense(&key.field))
        .collect::<Result<_>>()?;

    let mut permutation: Vec<u32> = (0..table.row_count() as u32).collect();
    permutation.sort_by(|&a, &b| {
        for (column, key) in columns.iter().zip(keys) {
            let ord =
                compare_with_direction(&column[a as usize], &column[b as usize], key.ascending);
            if ord != Ordering::Equal {
                return ord;
            }
        }
        Ordering::Equal
    });

    Ok(permutation)
}

/// Materialize a permuted (or row-selected) copy of the table
///
/// `permutation` may select a subset of rows; every index must be in range.
pub fn apply_permutation(table: &Table, permutation: &[u32]) -> Result<Table> {
    for &row in permutation {
        if row as usize >= table.row_count() {
            return Err(EngineError::invalid_config(format!(
                "Permutation index {} out of range ({} rows)",
                row,
                table.row_count()
            )));
        }
    }

    let mut out = Table::new();
    for column in table.columns() {
        let dense = column.as_dense()?;
        let reordered: Vec<Value> = permutation
            .iter()
            .map(|&row| dense[row as usize].clone())
            .collect();
        out.add_column(Column::from_values(
            column.name(),
            column.column_type(),
            column.chunk_capacity(),
            &reordered,
        )?)?;
    }
    Ok(out)
}
