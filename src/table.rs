/*
 * Copyright (c) 2025-present Dawid Pawlik
 *
 * For educational use only by employees and students of MIMUW.
 * See LICENSE file for details.
 */

//! # The central table structure
//!
//! A table owns an ordered set of columns (insertion order is the schema
//! order) plus a cached row count. All columns have equal length, and a table
//! is immutable with respect to schema and row count once constructed:
//! operators that "modify" data produce a new table rather than mutating in
//! place.
//!
//! Serialization to and from the portable file format lives in the
//! `serialization` module as further `impl Table` blocks.

use crate::ColumnType;
use crate::Value;
use crate::column::Column;
use crate::error::EngineError;
use crate::error::Result;

#[derive(Debug, Clone, Default)]
pub struct Table {
    columns: Vec<Column>,
    row_count: usize,
}

impl Table {
    pub fn new() -> Self {
        Table {
            columns: Vec::new(),
            row_count: 0,
        }
    }

    /// Append a column; every column must match the table row count
    pub fn add_column(&mut self, column: Column) -> Result<()> {
        if !self.columns.is_empty() && column.row_count() != self.row_count {
            return Err(EngineError::invalid_config(format!(
                "Column '{}' has {} rows, table has {}",
                column.name(),
                column.row_count(),
                self.row_count
            )));
        }
        if self.column_index(column.name()).is_some() {
            return Err(EngineError::invalid_config(format!(
                "Column '{}' already exists",
                column.name()
            )));
        }

        if self.columns.is_empty() {
            self.row_count = column.row_count();
        }
        self.columns.push(column);
        Ok(())
    }

    pub fn row_count(&self) -> usize {
        self.row_count
    }

    pub fn column_count(&self) -> usize {
        self.columns.len()
    }

    pub fn column_names(&self) -> Vec<&str> {
        self.columns.iter().map(|c| c.name()).collect()
    }

    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c.name() == name)
    }

    /// Look up a column by name
    pub fn column(&self, name: &str) -> Result<&Column> {
        self.columns
            .iter()
            .find(|c| c.name() == name)
            .ok_or_else(|| EngineError::column_not_found(name))
    }

    pub fn column_at(&self, index: usize) -> Result<&Column> {
        self.columns.get(index).ok_or_else(|| {
            EngineError::invalid_config(format!(
                "Column index {} out of bounds ({} columns)",
                index,
                self.columns.len()
            ))
        })
    }

    pub fn column_type(&self, name: &str) -> Result<ColumnType> {
        Ok(self.column(name)?.column_type())
    }

    /// Single-cell access; decodes exactly one chunk
    pub fn get(&self, column: &str, row: usize) -> Result<Value> {
        self.column(column)?.value(row)
    }

    pub fn get_integer(&self, column: &str, row: usize) -> Result<Option<i64>> {
        match self.get(column, row)? {
            Value::Integer(v) => Ok(Some(v)),
            Value::DateTime(v) => Ok(Some(v)),
            Value::Null => Ok(None),
            other => Err(self.typed_access_error(column, "get_integer", "integer", &other)),
        }
    }

    pub fn get_float(&self, column: &str, row: usize) -> Result<Option<f64>> {
        match self.get(column, row)? {
            Value::Float(v) => Ok(Some(v)),
            Value::Integer(v) => Ok(Some(v as f64)),
            Value::Null => Ok(None),
            other => Err(self.typed_access_error(column, "get_float", "float", &other)),
        }
    }

    pub fn get_string(&self, column: &str, row: usize) -> Result<String> {
        // Any value has a string representation; this never fails on type
        Ok(self.get(column, row)?.to_string())
    }

    /// Bulk columnar extraction: every chunk decoded in one pass
    pub fn get_column_dense(&self, column: &str) -> Result<Vec<Value>> {
        self.column(column)?.as_dense()
    }

    /// Bulk numeric extraction to a contiguous `Vec<f64>`; Null becomes NaN
    pub fn get_column_f64(&self, column: &str) -> Result<Vec<f64>> {
        self.column(column)?.as_f64_vec()
    }

    /// Current decoded-memory footprint in bytes
    ///
    /// Compressed-at-rest chunks count at their compressed size; the engine
    /// memory pool tracks pooled buffers separately.
    pub fn memory_usage(&self) -> usize {
        self.columns.iter().map(|c| c.heap_size()).sum()
    }

    fn typed_access_error(&self, column: &str, op: &str, expected: &str, got: &Value) -> EngineError {
        EngineError::Type {
            field: column.to_string(),
            op: op.to_string(),
            expected: expected.to_string(),
            actual: got
                .column_type()
                .map(|t| t.to_string())
                .unwrap_or_else(|| "null".to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunk::DEFAULT_CHUNK_CAPACITY;

    fn test_table() -> Table {
        let mut table = Table::new();
        let ids: Vec<Value> = (1..=4).map(Value::Integer).collect();
        let names: Vec<Value> = ["a", "b", "c", "d"]
            .iter()
            .map(|s| Value::String(s.to_string()))
            .collect();
        let prices: Vec<Value> = [1.5, 2.5, 3.5, 4.5].iter().map(|&v| Value::Float(v)).collect();

        table
            .add_column(
                Column::from_values("id", ColumnType::Integer, DEFAULT_CHUNK_CAPACITY, &ids)
                    .unwrap(),
            )
            .unwrap();
        table
            .add_column(
                Column::from_values("name", ColumnType::String, DEFAULT_CHUNK_CAPACITY, &names)
                    .unwrap(),
            )
            .unwrap();
        table
            .add_column(
                Column::from_values("price", ColumnType::Float, DEFAULT_CHUNK_CAPACITY, &prices)
                    .unwrap(),
            )
            .unwrap();
        table
    }

    #[test]
    fn test_basic_accessors() {
        let table = test_table();

        assert_eq!(table.row_count(), 4);
        assert_eq!(table.column_count(), 3);
        assert_eq!(table.column_names(), vec!["id", "name", "price"]);
        assert_eq!(table.column_type("id").unwrap(), ColumnType::Integer);
        assert_eq!(table.get("id", 2).unwrap(), Value::Integer(3));
        assert_eq!(table.get("name", 1).unwrap(), Value::String("b".to_string()));
    }

    #[test]
    fn test_typed_accessors() {
        let table = test_table();

        assert_eq!(table.get_integer("id", 0).unwrap(), Some(1));
        assert_eq!(table.get_float("price", 3).unwrap(), Some(4.5));
        // Integers widen to float
        assert_eq!(table.get_float("id", 0).unwrap(), Some(1.0));
        assert_eq!(table.get_string("name", 2).unwrap(), "c");
        assert_eq!(table.get_string("id", 0).unwrap(), "1");

        assert!(matches!(
            table.get_integer("name", 0),
            Err(EngineError::Type { .. })
        ));
    }

    #[test]
    fn test_unknown_column_named_in_error() {
        let table = test_table();
        let err = table.get("nope", 0).unwrap_err().to_string();
        assert!(err.contains("'nope'"));
    }

    #[test]
    fn test_mismatched_column_length_rejected() {
        let mut table = test_table();
        let short: Vec<Value> = vec![Value::Integer(1)];
        let column =
            Column::from_values("extra", ColumnType::Integer, DEFAULT_CHUNK_CAPACITY, &short)
                .unwrap();
        assert!(table.add_column(column).is_err());
    }

    #[test]
    fn test_duplicate_column_name_rejected() {
        let mut table = test_table();
        let values: Vec<Value> = (0..4).map(Value::Integer).collect();
        let column =
            Column::from_values("id", ColumnType::Integer, DEFAULT_CHUNK_CAPACITY, &values)
                .unwrap();
        assert!(table.add_column(column).is_err());
    }

    #[test]
    fn test_dense_matches_get() {
        let table = test_table();
        for name in table.column_names() {
            let dense = table.get_column_dense(name).unwrap();
            for (i, value) in dense.iter().enumerate() {
                assert_eq!(*value, table.get(name, i).unwrap());
            }
        }
    }
}
