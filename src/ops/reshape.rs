/*
 * Copyright (c) 2025-present Dawid Pawlik
 *
 * For educational use only by employees and students of MIMUW.
 * See LICENSE file for details.
 */

//! # Reshaping transforms
//!
//! Pivot (long to wide), fold (wide to long), flatten (split delimited
//! strings into rows) and stack (running y0/y1 extents for stacked charts).
//! All four return a new table and leave the input untouched.

use crate::ColumnType;
use crate::Table;
use crate::Value;
use crate::chunk::DEFAULT_CHUNK_CAPACITY;
use crate::column::Column;
use crate::error::EngineError;
use crate::error::Result;
use crate::ops::Key;
use crate::ops::aggregate::AggregateOp;
use crate::ops::aggregate::compute_numeric;
use crate::ops::aggregate::group_rows;
use crate::ops::sort::SortKey;
use crate::ops::sort::compare_with_direction;
use serde::Deserialize;
use serde::Serialize;
use std::cmp::Ordering;
use std::collections::HashSet;

fn table_capacity(table: &Table) -> usize {
    table
        .columns()
        .first()
        .map(|c| c.chunk_capacity())
        .unwrap_or(DEFAULT_CHUNK_CAPACITY)
}

// ====== Pivot ======

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PivotConfig {
    #[serde(default)]
    pub groupby: Vec<String>,
    /// Column whose distinct values become output columns
    pub field: String,
    /// Column aggregated into the pivoted cells; counts rows when absent
    #[serde(default)]
    pub value: Option<String>,
    /// Defaults to `sum` with a value field, `count` without
    #[serde(default)]
    pub op: Option<AggregateOp>,
}

/// Long-to-wide: one output row per group, one column per pivot value
///
/// Pivot columns appear in first-encounter order of the pivot values;
/// group/value combinations with no rows get Null.
pub fn pivot(table: &Table, config: &PivotConfig) -> Result<Table> {
    let op = config.op.unwrap_or(if config.value.is_some() {
        AggregateOp::Sum
    } else {
        AggregateOp::Count
    });
    if op == AggregateOp::Values {
        return Err(EngineError::invalid_config(
            "Pivot cells are scalar; 'values' is not supported",
        ));
    }
    if op != AggregateOp::Count && config.value.is_none() {
        return Err(EngineError::invalid_config(format!(
            "Pivot op '{}' requires a value field",
            op
        )));
    }
    if !matches!(
        op,
        AggregateOp::Count
            | AggregateOp::Valid
            | AggregateOp::Missing
            | AggregateOp::Distinct
    ) {
        let value_field = config.value.as_deref().unwrap_or_default();
        let column_type = table.column_type(value_field)?;
        if !column_type.is_numeric() {
            return Err(EngineError::Type {
                field: value_field.to_string(),
                op: op.to_string(),
                expected: "a numeric column".to_string(),
                actual: column_type.to_string(),
            });
        }
    }

    let pivot_values = table.get_column_dense(&config.field)?;
    let value_values = config
        .value
        .as_deref()
        .map(|name| table.get_column_dense(name))
        .transpose()?;

    // Pivot domain in first-encounter order
    let mut seen = HashSet::new();
    let mut domain: Vec<Key> = Vec::new();
    for value in &pivot_values {
        let key = Key::from_value(value);
        if seen.insert(key.clone()) {
            domain.push(key);
        }
    }

    let key_columns: Vec<Vec<Value>> = config
        .groupby
        .iter()
        .map(|name| table.get_column_dense(name))
        .collect::<Result<_>>()?;
    let (group_keys, groups) = group_rows(&key_columns, table.row_count());

    let capacity = table_capacity(table);
    let mut out = Table::new();

    for (i, name) in config.groupby.iter().enumerate() {
        let values: Vec<Value> = group_keys.iter().map(|key| key[i].to_value()).collect();
        out.add_column(Column::from_values(
            name.clone(),
            table.column_type(name)?,
            capacity,
            &values,
        )?)?;
    }

    for pivot_key in &domain {
        let cells: Vec<Value> = groups
            .iter()
            .map(|members| {
                let selected: Vec<usize> = members
                    .iter()
                    .copied()
                    .filter(|&row| Key::from_value(&pivot_values[row]) == *pivot_key)
                    .collect();
                pivot_cell(op, &selected, value_values.as_deref())
            })
            .collect();

        let column_type = match op {
            AggregateOp::Count
            | AggregateOp::Valid
            | AggregateOp::Missing
            | AggregateOp::Distinct => ColumnType::Integer,
            _ => ColumnType::Float,
        };
        out.add_column(Column::from_values(
            pivot_key.to_value().to_string(),
            column_type,
            capacity,
            &cells,
        )?)?;
    }

    Ok(out)
}

fn pivot_cell(op: AggregateOp, rows: &[usize], values: Option<&[Value]>) -> Value {
    match op {
        AggregateOp::Count => Value::Integer(rows.len() as i64),
        AggregateOp::Valid | AggregateOp::Missing | AggregateOp::Distinct => {
            let Some(values) = values else {
                // Validation guarantees a value field for these ops
                return Value::Null;
            };
            let result = match op {
                AggregateOp::Valid => rows.iter().filter(|&&r| !values[r].is_null()).count(),
                AggregateOp::Missing => rows.iter().filter(|&&r| values[r].is_null()).count(),
                _ => {
                    let distinct: HashSet<Key> =
                        rows.iter().map(|&r| Key::from_value(&values[r])).collect();
                    distinct.len()
                }
            };
            Value::Integer(result as i64)
        }
        _ => {
            let Some(values) = values else {
                return Value::Null;
            };
            let numeric: Vec<f64> = rows.iter().filter_map(|&r| values[r].as_f64()).collect();
            match compute_numeric(op, &numeric) {
                Some(v) => Value::Float(v),
                None => Value::Null,
            }
        }
    }
}

// ====== Fold ======

/// Wide-to-long: each input row becomes one output row per folded field
///
/// The key column holds the source field name; the value column holds its
/// cell. Folded fields must be all-numeric (value becomes Float) or
/// all-string. Remaining columns are copied to every expanded row.
pub fn fold(
    table: &Table,
    fields: &[String],
    key_name: Option<&str>,
    value_name: Option<&str>,
) -> Result<Table> {
    if fields.is_empty() {
        return Err(EngineError::invalid_config("Fold requires at least one field"));
    }

    let mut numeric = true;
    let mut textual = true;
    for field in fields {
        match table.column_type(field)? {
            ColumnType::String => numeric = false,
            _ => textual = false,
        }
    }
    let value_type = if numeric {
        ColumnType::Float
    } else if textual {
        ColumnType::String
    } else {
        return Err(EngineError::invalid_config(
            "Fold fields must be all numeric or all string",
        ));
    };

    let folded: Vec<Vec<Value>> = fields
        .iter()
        .map(|field| table.get_column_dense(field))
        .collect::<Result<_>>()?;
    let passthrough: Vec<&Column> = table
        .columns()
        .iter()
        .filter(|c| !fields.contains(&c.name().to_string()))
        .collect();

    let key_name = key_name.unwrap_or("key");
    let value_name = value_name.unwrap_or("value");
    let expanded = table.row_count() * fields.len();
    let capacity = table_capacity(table);

    let mut out = Table::new();
    for column in &passthrough {
        let dense = column.as_dense()?;
        let mut copied = Vec::with_capacity(expanded);
        for value in &dense {
            for _ in 0..fields.len() {
                copied.push(value.clone());
            }
        }
        out.add_column(Column::from_values(
            column.name(),
            column.column_type(),
            capacity,
            &copied,
        )?)?;
    }

    let mut keys = Vec::with_capacity(expanded);
    let mut values = Vec::with_capacity(expanded);
    for row in 0..table.row_count() {
        for (field, column) in fields.iter().zip(&folded) {
            keys.push(Value::String(field.clone()));
            let cell = &column[row];
            values.push(match value_type {
                ColumnType::Float => match cell.as_f64() {
                    Some(v) => Value::Float(v),
                    None => Value::Null,
                },
                _ => cell.clone(),
            });
        }
    }
    out.add_column(Column::from_values(key_name, ColumnType::String, capacity, &keys)?)?;
    out.add_column(Column::from_values(value_name, value_type, capacity, &values)?)?;

    Ok(out)
}

// ====== Flatten ======

/// Split delimiter-joined string cells into one row per element
///
/// Multiple fields flatten in lockstep: the expansion length per row is the
/// longest split, shorter fields pad with the empty string. Remaining
/// columns copy to every expanded row.
pub fn flatten(table: &Table, fields: &[String], separator: &str) -> Result<Table> {
    if fields.is_empty() || separator.is_empty() {
        return Err(EngineError::invalid_config(
            "Flatten requires fields and a non-empty separator",
        ));
    }
    for field in fields {
        let column_type = table.column_type(field)?;
        if column_type != ColumnType::String {
            return Err(EngineError::Type {
                field: field.clone(),
                op: "flatten".to_string(),
                expected: "a string column".to_string(),
                actual: column_type.to_string(),
            });
        }
    }

    let split: Vec<Vec<Vec<String>>> = fields
        .iter()
        .map(|field| {
            let dense = table.get_column_dense(field)?;
            Ok(dense
                .iter()
                .map(|v| {
                    v.to_string()
                        .split(separator)
                        .map(|part| part.trim().to_string())
                        .collect::<Vec<_>>()
                })
                .collect())
        })
        .collect::<Result<_>>()?;

    let expansions: Vec<usize> = (0..table.row_count())
        .map(|row| split.iter().map(|f| f[row].len()).max().unwrap_or(1))
        .collect();

    let capacity = table_capacity(table);
    let mut out = Table::new();

    for column in table.columns() {
        if let Some(field_index) = fields.iter().position(|f| f == column.name()) {
            let mut values = Vec::new();
            for (row, &expansion) in expansions.iter().enumerate() {
                let parts = &split[field_index][row];
                for i in 0..expansion {
                    values.push(Value::String(parts.get(i).cloned().unwrap_or_default()));
                }
            }
            out.add_column(Column::from_values(
                column.name(),
                ColumnType::String,
                capacity,
                &values,
            )?)?;
        } else {
            let dense = column.as_dense()?;
            let mut values = Vec::new();
            for (row, &expansion) in expansions.iter().enumerate() {
                for _ in 0..expansion {
                    values.push(dense[row].clone());
                }
            }
            out.add_column(Column::from_values(
                column.name(),
                column.column_type(),
                capacity,
                &values,
            )?)?;
        }
    }

    Ok(out)
}

// ====== Stack ======

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StackOffset {
    /// Baseline at zero
    #[default]
    Zero,
    /// Baseline at minus half the group total
    Center,
    /// Extents scaled into [0, 1] by the group total
    Normalize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StackConfig {
    #[serde(default)]
    pub groupby: Vec<String>,
    /// Numeric field being stacked
    pub field: String,
    /// Stacking order within each group; input order when empty
    #[serde(default)]
    pub sort: Vec<SortKey>,
    #[serde(default)]
    pub offset: StackOffset,
}

/// Compute stacked extents, appending `y0`/`y1` Float columns
///
/// Within each group, rows stack in sort order by running sum of the field;
/// Null contributes zero height. Results scatter back to original row
/// positions.
pub fn stack(table: &Table, config: &StackConfig) -> Result<Table> {
    let column_type = table.column_type(&config.field)?;
    if !column_type.is_numeric() {
        return Err(EngineError::Type {
            field: config.field.clone(),
            op: "stack".to_string(),
            expected: "a numeric column".to_string(),
            actual: column_type.to_string(),
        });
    }

    let field_values = table.get_column_f64(&config.field)?;
    let key_columns: Vec<Vec<Value>> = config
        .groupby
        .iter()
        .map(|name| table.get_column_dense(name))
        .collect::<Result<_>>()?;
    let sort_columns: Vec<Vec<Value>> = config
        .sort
        .iter()
        .map(|key| table.get_column_dense(&key.field))
        .collect::<Result<_>>()?;

    let (_, groups) = group_rows(&key_columns, table.row_count());
    let mut y0 = vec![Value::Null; table.row_count()];
    let mut y1 = vec![Value::Null; table.row_count()];

    for members in &groups {
        let mut order = members.clone();
        order.sort_by(|&a, &b| {
            for (column, key) in sort_columns.iter().zip(&config.sort) {
                let ord = compare_with_direction(&column[a], &column[b], key.ascending);
                if ord != Ordering::Equal {
                    return ord;
                }
            }
            Ordering::Equal
        });

        let mut running = 0.0;
        let mut extents = Vec::with_capacity(order.len());
        for &row in &order {
            let height = field_values[row];
            let height = if height.is_nan() { 0.0 } else { height };
            extents.push((row, running, running + height));
            running += height;
        }
        let total = running;

        for (row, lo, hi) in extents {
            let (lo, hi) = match config.offset {
                StackOffset::Zero => (lo, hi),
                StackOffset::Center => (lo - total / 2.0, hi - total / 2.0),
                StackOffset::Normalize => {
                    if total == 0.0 {
                        (0.0, 0.0)
                    } else {
                        (lo / total, hi / total)
                    }
                }
            };
            y0[row] = Value::Float(lo);
            y1[row] = Value::Float(hi);
        }
    }

    let capacity = table_capacity(table);
    let mut out = table.clone();
    out.add_column(Column::from_values("y0", ColumnType::Float, capacity, &y0)?)?;
    out.add_column(Column::from_values("y1", ColumnType::Float, capacity, &y1)?)?;
    Ok(out)
}
