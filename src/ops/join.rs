/*
 * Copyright (c) 2025-present Dawid Pawlik
 *
 * For educational use only by employees and students of MIMUW.
 * See LICENSE file for details.
 */

//! # Lookup join
//!
//! A left outer hash join restricted to the common case: extend each row of
//! the primary table with fields from the first matching row of a secondary
//! table. The output always has exactly one row per primary row; rows
//! without a match get Null in the joined fields.

use crate::Table;
use crate::Value;
use crate::chunk::DEFAULT_CHUNK_CAPACITY;
use crate::column::Column;
use crate::error::EngineError;
use crate::error::Result;
use crate::ops::Key;
use serde::Deserialize;
use serde::Serialize;
use std::collections::HashMap;
use tracing::debug;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LookupConfig {
    /// Key field in the primary table
    pub on: String,
    /// Key field in the secondary table
    pub from_key: String,
    /// Secondary fields to copy into the output
    pub fields: Vec<String>,
    /// Output names for the copied fields; defaults to the field names
    #[serde(default, rename = "as")]
    pub output_names: Vec<String>,
}

/// Extend `primary` with `config.fields` looked up from `secondary`
///
/// Keys match by value (the same equality grouping uses); when the
/// secondary key repeats, the first occurrence wins.
pub fn lookup(primary: &Table, secondary: &Table, config: &LookupConfig) -> Result<Table> {
    if !config.output_names.is_empty() && config.output_names.len() != config.fields.len() {
        return Err(EngineError::invalid_config(format!(
            "Mismatched fields/as lengths: {} vs {}",
            config.fields.len(),
            config.output_names.len()
        )));
    }

    let primary_keys = primary.get_column_dense(&config.on)?;
    let secondary_keys = secondary.get_column_dense(&config.from_key)?;

    // First occurrence of each secondary key wins
    let mut index: HashMap<Key, usize> = HashMap::with_capacity(secondary_keys.len());
    for (row, value) in secondary_keys.iter().enumerate() {
        index.entry(Key::from_value(value)).or_insert(row);
    }

    let matches: Vec<Option<usize>> = primary_keys
        .iter()
        .map(|value| index.get(&Key::from_value(value)).copied())
        .collect();
    let matched = matches.iter().filter(|m| m.is_some()).count();

    let capacity = primary
        .columns()
        .first()
        .map(|c| c.chunk_capacity())
        .unwrap_or(DEFAULT_CHUNK_CAPACITY);

    let mut out = primary.clone();
    for (i, field) in config.fields.iter().enumerate() {
        let source = secondary.get_column_dense(field)?;
        let column_type = secondary.column_type(field)?;
        let output_name = config
            .output_names
            .get(i)
            .cloned()
            .unwrap_or_else(|| field.clone());
        if out.column_index(&output_name).is_some() {
            return Err(EngineError::invalid_config(format!(
                "Lookup output column '{}' already exists; rename it with 'as'",
                output_name
            )));
        }

        let values: Vec<Value> = matches
            .iter()
            .map(|m| match m {
                Some(row) => source[*row].clone(),
                None => Value::Null,
            })
            .collect();
        out.add_column(Column::from_values(output_name, column_type, capacity, &values)?)?;
    }

    debug!(
        rows = primary.row_count(),
        matched,
        fields = config.fields.len(),
        "lookup join"
    );
    Ok(out)
}
