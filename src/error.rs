/*
 * Copyright (c) 2025-present Dawid Pawlik
 *
 * For educational use only by employees and students of MIMUW.
 * See LICENSE file for details.
 */

//! # Error types for the engine
//!
//! Every fallible operation returns one of these variants, carrying the
//! offending row/column/chunk coordinates where applicable. Nothing inside
//! the engine retries or degrades silently; failures always surface to the
//! caller with their coordinates intact.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, EngineError>;

#[derive(Error, Debug)]
pub enum EngineError {
    /// A committed column type does not fit the observed data
    #[error("Row {row}, column '{column}': failed to parse '{value}' as {expected}")]
    SchemaMismatch {
        row: usize,
        column: String,
        value: String,
        expected: String,
    },

    /// A referenced column does not exist in the table
    #[error("Column '{name}' not found")]
    ColumnNotFound { name: String },

    /// An operation was applied to a field of an incompatible type
    #[error("Column '{field}': operation '{op}' requires {expected}, got {actual}")]
    Type {
        field: String,
        op: String,
        expected: String,
        actual: String,
    },

    /// Corrupt compressed bytes, truncated input, or bad magic/version
    #[error("Decode failed{}: {detail}", coordinate_suffix(.column, .chunk))]
    Decode {
        detail: String,
        column: Option<String>,
        chunk: Option<usize>,
    },

    /// Estimated allocation exceeds the configured memory budget
    #[error("Memory budget exceeded: requested {requested} bytes, budget {budget} bytes")]
    OutOfMemory { requested: usize, budget: usize },

    /// Malformed operator or analyzer configuration
    #[error("Invalid configuration: {detail}")]
    InvalidConfig { detail: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl EngineError {
    pub fn column_not_found(name: impl Into<String>) -> Self {
        EngineError::ColumnNotFound { name: name.into() }
    }

    pub fn decode(detail: impl Into<String>) -> Self {
        EngineError::Decode {
            detail: detail.into(),
            column: None,
            chunk: None,
        }
    }

    pub fn decode_at(detail: impl Into<String>, column: impl Into<String>, chunk: usize) -> Self {
        EngineError::Decode {
            detail: detail.into(),
            column: Some(column.into()),
            chunk: Some(chunk),
        }
    }

    pub fn invalid_config(detail: impl Into<String>) -> Self {
        EngineError::InvalidConfig {
            detail: detail.into(),
        }
    }
}

fn coordinate_suffix(column: &Option<String>, chunk: &Option<usize>) -> String {
    match (column, chunk) {
        (Some(col), Some(idx)) => format!(" (column '{}', chunk {})", col, idx),
        (Some(col), None) => format!(" (column '{}')", col),
        (None, Some(idx)) => format!(" (chunk {})", idx),
        (None, None) => String::new(),
    }
}
