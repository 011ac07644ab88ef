/*
 * Copyright (c) 2025-present Dawid Pawlik
 *
 * For educational use only by employees and students of MIMUW.
 * See LICENSE file for details.
 */

//! # Row filtering
//!
//! Filters produce a selection bitmap (one bit per row, LSB-first within
//! each byte) instead of materializing a table, so selections compose
//! cheaply and cross an FFI boundary as raw bytes. The numeric range filter
//! consults per-chunk min/max statistics to skip or bulk-accept whole chunks
//! without touching individual values.

use crate::Table;
use crate::Value;
use crate::error::EngineError;
use crate::error::Result;
use crate::ops::sort::apply_permutation;
use tracing::debug;

/// Row-selection bitmap, LSB-first: row `i` lives at `bits[i / 8] & (1 << (i % 8))`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Bitmap {
    bits: Vec<u8>,
    len: usize,
}

impl Bitmap {
    pub fn new(len: usize) -> Self {
        Bitmap {
            bits: vec![0u8; len.div_ceil(8)],
            len,
        }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn set(&mut self, index: usize) {
        debug_assert!(index < self.len);
        self.bits[index / 8] |= 1 << (index % 8);
    }

    pub fn get(&self, index: usize) -> bool {
        index < self.len && self.bits[index / 8] & (1 << (index % 8)) != 0
    }

    /// Number of selected rows
    pub fn count_ones(&self) -> usize {
        self.bits.iter().map(|b| b.count_ones() as usize).sum()
    }

    /// Indices of selected rows in ascending order
    pub fn selected_rows(&self) -> Vec<usize> {
        (0..self.len).filter(|&i| self.get(i)).collect()
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bits
    }

    fn set_range(&mut self, start: usize, end: usize) {
        for i in start..end {
            self.set(i);
        }
    }
}

/// Select rows where `min <= column[row] <= max` (inclusive on both ends)
///
/// Null values are never selected. Whole chunks are skipped when their
/// min/max statistics fall outside the range and bulk-accepted when the
/// chunk lies entirely inside it with no nulls; only boundary chunks decode
/// value by value.
pub fn filter_range(table: &Table, column: &str, min: f64, max: f64) -> Result<Bitmap> {
    let column = table.column(column)?;
    if !column.column_type().is_numeric() {
        return Err(EngineError::Type {
            field: column.name().to_string(),
            op: "filter_range".to_string(),
            expected: "a numeric column".to_string(),
            actual: column.column_type().to_string(),
        });
    }

    let mut bitmap = Bitmap::new(column.row_count());
    let capacity = column.chunk_capacity();
    let mut skipped = 0usize;
    let mut bulk = 0usize;

    for chunk_index in 0..column.chunk_count() {
        let chunk = column.chunk(chunk_index)?;
        let base = chunk_index * capacity;

        let stats = chunk.min_f64().zip(chunk.max_f64());
        match stats {
            // All-null chunks have no min/max and select nothing
            None => {
                skipped += 1;
                continue;
            }
            Some((chunk_min, chunk_max)) => {
                if chunk_max < min || chunk_min > max {
                    skipped += 1;
                    continue;
                }
                if chunk_min >= min
                    && chunk_max <= max
                    && chunk.valid_count() == chunk.len()
                {
                    bitmap.set_range(base, base + chunk.len());
                    bulk += 1;
                    continue;
                }
            }
        }

        for offset in 0..chunk.len() {
            if let Some(v) = chunk.value(offset)?.as_f64() {
                if v >= min && v <= max {
                    bitmap.set(base + offset);
                }
            }
        }
    }

    debug!(
        selected = bitmap.count_ones(),
        skipped_chunks = skipped,
        bulk_chunks = bulk,
        "range filter"
    );
    Ok(bitmap)
}

/// Unoptimized row-by-row counterpart of [`filter_range`]
///
/// Exists as the correctness oracle: both must produce identical bitmaps
/// for every input.
pub fn filter_range_naive(table: &Table, column: &str, min: f64, max: f64) -> Result<Bitmap> {
    let column = table.column(column)?;
    if !column.column_type().is_numeric() {
        return Err(EngineError::Type {
            field: column.name().to_string(),
            op: "filter_range".to_string(),
            expected: "a numeric column".to_string(),
            actual: column.column_type().to_string(),
        });
    }

    let mut bitmap = Bitmap::new(column.row_count());
    for row in 0..column.row_count() {
        if let Some(v) = column.value(row)?.as_f64() {
            if v >= min && v <= max {
                bitmap.set(row);
            }
        }
    }
    Ok(bitmap)
}

/// Select rows where `predicate` holds for the column's value
pub fn filter_rows(
    table: &Table,
    column: &str,
    predicate: impl Fn(&Value) -> bool,
) -> Result<Bitmap> {
    let values = table.get_column_dense(column)?;
    let mut bitmap = Bitmap::new(values.len());
    for (row, value) in values.iter().enumerate() {
        if predicate(value) {
            bitmap.set(row);
        }
    }
    Ok(bitmap)
}

/// Materialize the selected rows as a new table, preserving row order
pub fn apply_bitmap(table: &Table, bitmap: &Bitmap) -> Result<Table> {
    if bitmap.len() != table.row_count() {
        return Err(EngineError::invalid_config(format!(
            "Bitmap covers {} rows but the table has {}",
            bitmap.len(),
            table.row_count()
        )));
    }

    let selected: Vec<u32> = bitmap.selected_rows().iter().map(|&r| r as u32).collect();
    apply_permutation(table, &selected)
}
