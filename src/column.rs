/*
 * Copyright (c) 2025-present Dawid Pawlik
 *
 * For educational use only by employees and students of MIMUW.
 * See LICENSE file for details.
 */

//! # Columns as ordered chunk sequences
//!
//! A column owns an ordered list of chunks sharing one logical type. Chunks
//! are either decoded (live [`Chunk`] objects) or compressed at rest (the raw
//! Tier-2 block as read from a file); the two states answer `value` and
//! `as_dense` identically, so the lazy/eager strategy is purely a performance
//! knob.
//!
//! `as_dense` is the single most important performance contract in the
//! engine: any caller that needs more than a constant number of values goes
//! through it, because crossing into compressed storage per value dominates
//! at scale.

use crate::ColumnType;
use crate::Value;
use crate::chunk::Chunk;
use crate::chunk::FloatChunk;
use crate::chunk::IntegerChunk;
use crate::chunk::StringChunk;
use crate::compression;
use crate::error::EngineError;
use crate::error::Result;
use std::borrow::Cow;

/// One chunk slot: decoded in memory, or the raw Tier-2 block at rest
#[derive(Debug, Clone)]
enum ChunkSlot {
    Decoded(Chunk),
    Compressed { block: Vec<u8>, len: usize },
}

/// An ordered sequence of chunks of one logical type
#[derive(Debug, Clone)]
pub struct Column {
    name: String,
    column_type: ColumnType,
    chunk_capacity: usize,
    chunks: Vec<ChunkSlot>,
    row_count: usize,
}

impl Column {
    pub fn new(name: impl Into<String>, column_type: ColumnType, chunk_capacity: usize) -> Self {
        Column {
            name: name.into(),
            column_type,
            chunk_capacity,
            chunks: Vec::new(),
            row_count: 0,
        }
    }

    /// Build a column by encoding `values` into chunks of `chunk_capacity`
    ///
    /// Null values make the affected chunks nullable; a Null in a String
    /// column encodes as the empty string (string columns are never
    /// nullable).
    pub fn from_values(
        name: impl Into<String>,
        column_type: ColumnType,
        chunk_capacity: usize,
        values: &[Value],
    ) -> Result<Self> {
        let mut column = Column::new(name, column_type, chunk_capacity);

        for run in values.chunks(chunk_capacity.max(1)) {
            let chunk = encode_run(column_type, &column.name, run)?;
            column.push_chunk(chunk)?;
        }

        Ok(column)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn column_type(&self) -> ColumnType {
        self.column_type
    }

    pub fn chunk_capacity(&self) -> usize {
        self.chunk_capacity
    }

    pub fn chunk_count(&self) -> usize {
        self.chunks.len()
    }

    pub fn row_count(&self) -> usize {
        self.row_count
    }

    pub fn is_empty(&self) -> bool {
        self.row_count == 0
    }

    /// Append a decoded chunk
    pub fn push_chunk(&mut self, chunk: Chunk) -> Result<()> {
        if chunk.column_type() != self.column_type {
            return Err(EngineError::Type {
                field: self.name.clone(),
                op: "push_chunk".to_string(),
                expected: self.column_type.to_string(),
                actual: chunk.column_type().to_string(),
            });
        }
        self.row_count += chunk.len();
        self.chunks.push(ChunkSlot::Decoded(chunk));
        Ok(())
    }

    /// Append a compressed-at-rest chunk of `len` rows
    ///
    /// `block` is a self-describing Tier-2 block as stored in the portable
    /// format; it stays compressed until first access.
    pub fn push_compressed(&mut self, block: Vec<u8>, len: usize) {
        self.row_count += len;
        self.chunks.push(ChunkSlot::Compressed { block, len });
    }

    /// Access the chunk at `index`, decompressing a lazy slot on the fly
    pub fn chunk(&self, index: usize) -> Result<Cow<'_, Chunk>> {
        match self.chunks.get(index) {
            Some(ChunkSlot::Decoded(chunk)) => Ok(Cow::Borrowed(chunk)),
            Some(ChunkSlot::Compressed { block, .. }) => {
                let body = compression::decompress_block(block)
                    .map_err(|e| decorate(e, &self.name, index))?;
                let chunk = Chunk::from_body(&body, self.column_type)
                    .map_err(|e| decorate(e, &self.name, index))?;
                Ok(Cow::Owned(chunk))
            }
            None => Err(EngineError::decode_at(
                format!("Chunk index {} out of bounds ({})", index, self.chunks.len()),
                &self.name,
                index,
            )),
        }
    }

    fn chunk_len(&self, index: usize) -> usize {
        match &self.chunks[index] {
            ChunkSlot::Decoded(chunk) => chunk.len(),
            ChunkSlot::Compressed { len, .. } => *len,
        }
    }

    /// Single-cell access: locate the chunk, delegate to its codec
    pub fn value(&self, row: usize) -> Result<Value> {
        if row >= self.row_count {
            return Err(EngineError::decode(format!(
                "Row index {} out of bounds for column '{}' ({} rows)",
                row, self.name, self.row_count
            )));
        }
        let chunk_index = row / self.chunk_capacity;
        let offset = row % self.chunk_capacity;
        self.chunk(chunk_index)?.value(offset)
    }

    /// Decode every chunk in one pass and concatenate — the bulk path
    pub fn as_dense(&self) -> Result<Vec<Value>> {
        let mut out = Vec::with_capacity(self.row_count);
        for index in 0..self.chunks.len() {
            self.chunk(index)?.append_values(&mut out)?;
        }
        Ok(out)
    }

    /// Bulk numeric extraction: one contiguous `Vec<f64>`, Null becomes NaN
    ///
    /// Fails with a `Type` error for string columns.
    pub fn as_f64_vec(&self) -> Result<Vec<f64>> {
        let mut out = Vec::with_capacity(self.row_count);
        for index in 0..self.chunks.len() {
            self.chunk(index)?.append_f64(&mut out).map_err(|e| match e {
                EngineError::Type { op, expected, actual, .. } => EngineError::Type {
                    field: self.name.clone(),
                    op,
                    expected,
                    actual,
                },
                other => other,
            })?;
        }
        Ok(out)
    }

    /// Decode only the rows in `start..end`, touching only overlapping chunks
    pub fn decode_rows(&self, start: usize, end: usize) -> Result<Vec<Value>> {
        if start > end || end > self.row_count {
            return Err(EngineError::decode(format!(
                "Row range {}..{} out of bounds for column '{}' ({} rows)",
                start, end, self.name, self.row_count
            )));
        }

        let mut out = Vec::with_capacity(end - start);
        let mut chunk_start = 0;

        for index in 0..self.chunks.len() {
            let len = self.chunk_len(index);
            let chunk_end = chunk_start + len;

            if chunk_end > start && chunk_start < end {
                let local_start = start.saturating_sub(chunk_start);
                let local_end = (end - chunk_start).min(len);
                let chunk = self.chunk(index)?;
                append_range(&chunk, local_start, local_end, &mut out)?;
            }

            chunk_start = chunk_end;
            if chunk_start >= end {
                break;
            }
        }

        Ok(out)
    }

    /// Column minimum over valid values, from cached chunk statistics
    pub fn min_f64(&self) -> Result<Option<f64>> {
        let mut min: Option<f64> = None;
        for index in 0..self.chunks.len() {
            if let Some(m) = self.chunk(index)?.min_f64() {
                min = Some(min.map_or(m, |v: f64| v.min(m)));
            }
        }
        Ok(min)
    }

    /// Column maximum over valid values, from cached chunk statistics
    pub fn max_f64(&self) -> Result<Option<f64>> {
        let mut max: Option<f64> = None;
        for index in 0..self.chunks.len() {
            if let Some(m) = self.chunk(index)?.max_f64() {
                max = Some(max.map_or(m, |v: f64| v.max(m)));
            }
        }
        Ok(max)
    }

    /// Column sum over valid values, from cached chunk statistics
    pub fn sum_f64(&self) -> Result<f64> {
        let mut sum = 0.0;
        for index in 0..self.chunks.len() {
            sum += self.chunk(index)?.sum_f64();
        }
        Ok(sum)
    }

    /// Valid (non-null) slots across all chunks
    pub fn valid_count(&self) -> Result<usize> {
        let mut count = 0;
        for index in 0..self.chunks.len() {
            count += self.chunk(index)?.valid_count();
        }
        Ok(count)
    }

    /// Sum of per-chunk dictionary sizes for string columns
    ///
    /// An upper bound on the true column cardinality, since dictionaries are
    /// per chunk.
    pub fn cardinality(&self) -> Result<Option<usize>> {
        if self.column_type != ColumnType::String {
            return Ok(None);
        }
        let mut total = 0;
        for index in 0..self.chunks.len() {
            total += self.chunk(index)?.cardinality().unwrap_or(0);
        }
        Ok(Some(total))
    }

    /// Current heap footprint: decoded chunk bodies plus compressed blocks
    pub fn heap_size(&self) -> usize {
        self.chunks
            .iter()
            .map(|slot| match slot {
                ChunkSlot::Decoded(chunk) => chunk.heap_size(),
                ChunkSlot::Compressed { block, .. } => block.len(),
            })
            .sum()
    }
}

fn decorate(error: EngineError, column: &str, chunk: usize) -> EngineError {
    match error {
        EngineError::Decode { detail, .. } => EngineError::decode_at(detail, column, chunk),
        other => other,
    }
}

fn append_range(chunk: &Chunk, start: usize, end: usize, out: &mut Vec<Value>) -> Result<()> {
    match chunk {
        Chunk::Integer(c) => {
            for v in c.decode_range(start, end)? {
                out.push(v.map(Value::Integer).unwrap_or(Value::Null));
            }
        }
        Chunk::DateTime(c) => {
            for v in c.decode_range(start, end)? {
                out.push(v.map(Value::DateTime).unwrap_or(Value::Null));
            }
        }
        Chunk::Float(c) => {
            for v in c.decode_range(start, end)? {
                out.push(v.map(Value::Float).unwrap_or(Value::Null));
            }
        }
        Chunk::String(c) => {
            for v in c.decode_range(start, end)? {
                out.push(Value::String(v));
            }
        }
    }
    Ok(())
}

/// Encode one chunk-capacity run of typed values
pub(crate) fn encode_run(column_type: ColumnType, name: &str, run: &[Value]) -> Result<Chunk> {
    let type_error = |actual: &Value| EngineError::Type {
        field: name.to_string(),
        op: "encode".to_string(),
        expected: column_type.to_string(),
        actual: actual
            .column_type()
            .map(|t| t.to_string())
            .unwrap_or_else(|| "null".to_string()),
    };

    match column_type {
        ColumnType::Integer | ColumnType::DateTime => {
            let mut values = Vec::with_capacity(run.len());
            let mut any_null = false;
            for value in run {
                match (column_type, value) {
                    (ColumnType::Integer, Value::Integer(v)) => values.push(Some(*v)),
                    (ColumnType::DateTime, Value::DateTime(v)) => values.push(Some(*v)),
                    (_, Value::Null) => {
                        any_null = true;
                        values.push(None);
                    }
                    (_, other) => return Err(type_error(other)),
                }
            }
            let encoded = if any_null {
                IntegerChunk::encode_nullable(&values)
            } else {
                let plain: Vec<i64> = values.into_iter().flatten().collect();
                IntegerChunk::encode(&plain)
            };
            Ok(match column_type {
                ColumnType::Integer => Chunk::Integer(encoded),
                _ => Chunk::DateTime(encoded),
            })
        }
        ColumnType::Float => {
            let mut values = Vec::with_capacity(run.len());
            let mut any_null = false;
            for value in run {
                match value {
                    Value::Float(v) => values.push(Some(*v)),
                    Value::Integer(v) => values.push(Some(*v as f64)),
                    Value::Null => {
                        any_null = true;
                        values.push(None);
                    }
                    other => return Err(type_error(other)),
                }
            }
            let encoded = if any_null {
                FloatChunk::encode_nullable(&values)
            } else {
                let plain: Vec<f64> = values.into_iter().flatten().collect();
                FloatChunk::encode(&plain)
            };
            Ok(Chunk::Float(encoded))
        }
        ColumnType::String => {
            let mut values = Vec::with_capacity(run.len());
            for value in run {
                match value {
                    Value::String(v) => values.push(v.clone()),
                    // String columns are never nullable; Null stores as ""
                    Value::Null => values.push(String::new()),
                    other => return Err(type_error(other)),
                }
            }
            Ok(Chunk::String(StringChunk::encode(&values)))
        }
    }
}
