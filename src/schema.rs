/*
 * Copyright (c) 2025-present Dawid Pawlik
 *
 * For educational use only by employees and students of MIMUW.
 * See LICENSE file for details.
 */

//! # Schema inference and table construction from delimited text
//!
//! The analyzer is a small state machine:
//!
//! ```text
//! Unanalyzed → Sampled → SchemaConfirmed → TableBuilt
//! ```
//!
//! `analyze` reads at most `sample_size` rows and infers a per-column type by
//! trying Integer → Float → DateTime → String in that preference order; the
//! first type every sampled non-empty value parses as wins, and an all-empty
//! column defaults to String. The caller may override types in the returned
//! [`SchemaConfig`] before committing; a narrowing override is accepted here
//! and validated authoritatively by the full build re-scan.
//!
//! `build_table` re-scans the full input applying the committed types,
//! streaming values into per-column chunk builders that flush at chunk
//! capacity — the full table is never materialized as row-major objects. A
//! cell that fails its committed type fails the whole build with a
//! `SchemaMismatch` naming its row and column.
//!
//! The fast-preview and memory-optimized variants are parameterizations of
//! this one analyzer, not separate implementations.

use crate::ColumnType;
use crate::Table;
use crate::Value;
use crate::chunk::DEFAULT_CHUNK_CAPACITY;
use crate::chunk::MAX_CHUNK_CAPACITY;
use crate::chunk::MIN_CHUNK_CAPACITY;
use crate::column;
use crate::column::Column;
use crate::error::EngineError;
use crate::error::Result;
use crate::parse_epoch_millis;
use serde::Deserialize;
use serde::Serialize;
use std::borrow::Cow;
use tracing::info;
use tracing::warn;

/// Default number of rows sampled during inference
pub const DEFAULT_SAMPLE_SIZE: usize = 1_000;

/// Upper bound on recorded inference diagnostics
const MAX_DIAGNOSTICS: usize = 32;

/// Per-column schema record mediating CSV→Table construction; not persisted
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ColumnSchema {
    pub name: String,
    pub inferred_type: ColumnType,
    pub user_selected_type: Option<ColumnType>,
    pub nullable: bool,
}

impl ColumnSchema {
    /// The type the build will apply: the user override when present
    pub fn committed_type(&self) -> ColumnType {
        self.user_selected_type.unwrap_or(self.inferred_type)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchemaConfig {
    pub columns: Vec<ColumnSchema>,
}

impl SchemaConfig {
    pub fn column(&self, name: &str) -> Option<&ColumnSchema> {
        self.columns.iter().find(|c| c.name == name)
    }

    /// Override a column's type
    ///
    /// Widening overrides (Integer→Float, anything→String) always hold;
    /// narrowing overrides are accepted here and validated by the full build
    /// re-scan, which fails with `SchemaMismatch` on the first offending
    /// cell.
    pub fn override_type(&mut self, name: &str, column_type: ColumnType) -> Result<()> {
        let column = self
            .columns
            .iter_mut()
            .find(|c| c.name == name)
            .ok_or_else(|| EngineError::column_not_found(name))?;
        column.user_selected_type = Some(column_type);
        if column_type == ColumnType::String {
            // String columns are never nullable; an empty cell is ""
            column.nullable = false;
        }
        Ok(())
    }

    pub fn set_nullable(&mut self, name: &str, nullable: bool) -> Result<()> {
        let column = self
            .columns
            .iter_mut()
            .find(|c| c.name == name)
            .ok_or_else(|| EngineError::column_not_found(name))?;
        if nullable && column.committed_type() == ColumnType::String {
            return Err(EngineError::invalid_config(format!(
                "Column '{}': string columns are never nullable",
                name
            )));
        }
        column.nullable = nullable;
        Ok(())
    }

    fn validate(&self) -> Result<()> {
        if self.columns.is_empty() {
            return Err(EngineError::invalid_config("Schema has no columns"));
        }
        for (i, column) in self.columns.iter().enumerate() {
            if self.columns[..i].iter().any(|c| c.name == column.name) {
                return Err(EngineError::invalid_config(format!(
                    "Duplicate column name '{}' in schema",
                    column.name
                )));
            }
            if column.nullable && column.committed_type() == ColumnType::String {
                return Err(EngineError::invalid_config(format!(
                    "Column '{}': string columns are never nullable",
                    column.name
                )));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AnalyzerState {
    Unanalyzed,
    Sampled,
    SchemaConfirmed,
    TableBuilt,
}

#[derive(Debug, Clone)]
pub struct SchemaAnalyzer {
    sample_size: usize,
    chunk_capacity: usize,
    state: AnalyzerState,
    diagnostics: Vec<String>,
}

impl Default for SchemaAnalyzer {
    fn default() -> Self {
        Self::new()
    }
}

impl SchemaAnalyzer {
    pub fn new() -> Self {
        SchemaAnalyzer {
            sample_size: DEFAULT_SAMPLE_SIZE,
            chunk_capacity: DEFAULT_CHUNK_CAPACITY,
            state: AnalyzerState::Unanalyzed,
            diagnostics: Vec::new(),
        }
    }

    /// Low-latency preset: small sample, small chunks
    pub fn fast_preview() -> Self {
        Self::new().with_sample_size(100).with_chunk_capacity(1_024)
    }

    /// Memory-pressure preset: large chunks, smaller working set
    pub fn memory_optimized() -> Self {
        Self::new().with_chunk_capacity(262_144)
    }

    pub fn with_sample_size(mut self, sample_size: usize) -> Self {
        self.sample_size = sample_size.max(1);
        self
    }

    pub fn with_chunk_capacity(mut self, chunk_capacity: usize) -> Self {
        let clamped = chunk_capacity.clamp(MIN_CHUNK_CAPACITY, MAX_CHUNK_CAPACITY);
        if clamped != chunk_capacity {
            warn!(
                requested = chunk_capacity,
                used = clamped,
                "chunk capacity out of bounds, clamped"
            );
        }
        self.chunk_capacity = clamped;
        self
    }

    pub fn chunk_capacity(&self) -> usize {
        self.chunk_capacity
    }

    /// Parse failures recorded while sampling, for diagnostics (bounded)
    pub fn diagnostics(&self) -> &[String] {
        &self.diagnostics
    }

    /// Sample at most `sample_size` rows and infer a per-column schema
    pub fn analyze(&mut self, bytes: &[u8]) -> Result<SchemaConfig> {
        if self.state != AnalyzerState::Unanalyzed {
            return Err(EngineError::invalid_config(
                "analyze() called twice; create a fresh analyzer per input",
            ));
        }

        let bytes = preserve_blank_rows(bytes);
        let mut reader = csv_reader(&bytes);
        let names = header_names(&mut reader)?;
        let mut candidates: Vec<TypeCandidates> =
            names.iter().map(|_| TypeCandidates::new()).collect();

        let mut row = 0usize;
        for record in reader.records() {
            let record = record.map_err(csv_error)?;
            row += 1;
            if row > self.sample_size {
                break;
            }

            for (i, cell) in record.iter().enumerate() {
                if i >= candidates.len() {
                    break;
                }
                candidates[i].observe(cell, row, &names[i], &mut self.diagnostics);
            }
        }

        let columns: Vec<ColumnSchema> = names
            .iter()
            .zip(&candidates)
            .map(|(name, candidate)| {
                let inferred = candidate.inferred_type();
                ColumnSchema {
                    name: name.clone(),
                    inferred_type: inferred,
                    user_selected_type: None,
                    nullable: candidate.empty > 0 && inferred != ColumnType::String,
                }
            })
            .collect();

        info!(
            columns = columns.len(),
            sampled_rows = row.min(self.sample_size),
            "inferred schema"
        );
        self.state = AnalyzerState::Sampled;
        Ok(SchemaConfig { columns })
    }

    /// Commit a (possibly edited) schema configuration
    pub fn confirm(&mut self, config: &SchemaConfig) -> Result<()> {
        if self.state != AnalyzerState::Sampled {
            return Err(EngineError::invalid_config(
                "confirm() requires a sampled analyzer; call analyze() first",
            ));
        }
        config.validate()?;
        self.state = AnalyzerState::SchemaConfirmed;
        Ok(())
    }

    /// Re-scan the full input and build a populated table
    pub fn build_table(&mut self, bytes: &[u8], config: &SchemaConfig) -> Result<Table> {
        self.build_table_with_progress(bytes, config, None)
    }

    /// Build with a progress callback invoked at chunk-flush boundaries
    pub fn build_table_with_progress(
        &mut self,
        bytes: &[u8],
        config: &SchemaConfig,
        progress: Option<&dyn Fn(f64, &str)>,
    ) -> Result<Table> {
        match self.state {
            AnalyzerState::Sampled => self.confirm(config)?,
            AnalyzerState::SchemaConfirmed => config.validate()?,
            _ => {
                return Err(EngineError::invalid_config(
                    "build_table() requires a sampled or confirmed schema",
                ));
            }
        }

        let bytes = preserve_blank_rows(bytes);
        let mut reader = csv_reader(&bytes);
        let names = header_names(&mut reader)?;
        if names.len() != config.columns.len() {
            return Err(EngineError::invalid_config(format!(
                "Schema has {} columns, input has {}",
                config.columns.len(),
                names.len()
            )));
        }

        let mut builders: Vec<ColumnBuilder> = config
            .columns
            .iter()
            .map(|schema| ColumnBuilder::new(schema.clone(), self.chunk_capacity))
            .collect();

        let total_bytes = bytes.len().max(1) as f64;
        let mut row = 0usize;

        for record in reader.records() {
            let record = record.map_err(csv_error)?;
            row += 1;

            if record.len() != builders.len() {
                return Err(EngineError::decode(format!(
                    "Row {}: expected {} fields, found {}",
                    row,
                    builders.len(),
                    record.len()
                )));
            }

            for (builder, cell) in builders.iter_mut().zip(record.iter()) {
                let flushed = builder.push(cell, row)?;
                if flushed && let Some(report) = progress {
                    let position = record.position().map_or(0, |p| p.byte()) as f64;
                    report(
                        (position / total_bytes).min(1.0),
                        &format!("encoding column '{}'", builder.schema.name),
                    );
                }
            }
        }

        let mut table = Table::new();
        for builder in builders {
            table.add_column(builder.finish()?)?;
        }
        if let Some(report) = progress {
            report(1.0, "build complete");
        }

        info!(
            rows = table.row_count(),
            columns = table.column_count(),
            "built table"
        );
        self.state = AnalyzerState::TableBuilt;
        Ok(table)
    }
}

/// One streaming chunk builder per column
struct ColumnBuilder {
    schema: ColumnSchema,
    column: Column,
    pending: Vec<Value>,
    capacity: usize,
}

impl ColumnBuilder {
    fn new(schema: ColumnSchema, capacity: usize) -> Self {
        let column = Column::new(&schema.name, schema.committed_type(), capacity);
        ColumnBuilder {
            schema,
            column,
            pending: Vec::with_capacity(capacity.min(4_096)),
            capacity,
        }
    }

    /// Parse one cell; returns true when a chunk was flushed
    fn push(&mut self, cell: &str, row: usize) -> Result<bool> {
        let value = parse_cell(cell, &self.schema, row)?;
        self.pending.push(value);
        if self.pending.len() >= self.capacity {
            self.flush()?;
            return Ok(true);
        }
        Ok(false)
    }

    fn flush(&mut self) -> Result<()> {
        if self.pending.is_empty() {
            return Ok(());
        }
        let chunk = column::encode_run(
            self.schema.committed_type(),
            &self.schema.name,
            &self.pending,
        )?;
        self.column.push_chunk(chunk)?;
        self.pending.clear();
        Ok(())
    }

    fn finish(mut self) -> Result<Column> {
        self.flush()?;
        Ok(self.column)
    }
}

/// Parse one cell against its committed type
fn parse_cell(cell: &str, schema: &ColumnSchema, row: usize) -> Result<Value> {
    let committed = schema.committed_type();
    let trimmed = cell.trim();

    if trimmed.is_empty() && committed != ColumnType::String {
        if schema.nullable {
            return Ok(Value::Null);
        }
        return Err(mismatch(row, schema, cell));
    }

    match committed {
        ColumnType::Integer => trimmed
            .parse::<i64>()
            .map(Value::Integer)
            .map_err(|_| mismatch(row, schema, cell)),
        ColumnType::Float => trimmed
            .parse::<f64>()
            .map(Value::Float)
            .map_err(|_| mismatch(row, schema, cell)),
        ColumnType::DateTime => parse_epoch_millis(trimmed)
            .map(Value::DateTime)
            .ok_or_else(|| mismatch(row, schema, cell)),
        ColumnType::String => Ok(Value::String(cell.to_string())),
    }
}

fn mismatch(row: usize, schema: &ColumnSchema, cell: &str) -> EngineError {
    EngineError::SchemaMismatch {
        row,
        column: schema.name.clone(),
        value: cell.to_string(),
        expected: schema.committed_type().to_string(),
    }
}

/// Per-column candidate tracking during sampling
struct TypeCandidates {
    integer: bool,
    float: bool,
    datetime: bool,
    non_empty: usize,
    empty: usize,
}

impl TypeCandidates {
    fn new() -> Self {
        TypeCandidates {
            integer: true,
            float: true,
            datetime: true,
            non_empty: 0,
            empty: 0,
        }
    }

    fn observe(&mut self, cell: &str, row: usize, name: &str, diagnostics: &mut Vec<String>) {
        let trimmed = cell.trim();
        if trimmed.is_empty() {
            self.empty += 1;
            return;
        }
        self.non_empty += 1;

        let was_typed = self.integer || self.float || self.datetime;
        if self.integer && trimmed.parse::<i64>().is_err() {
            self.integer = false;
        }
        if self.float && trimmed.parse::<f64>().is_err() {
            self.float = false;
        }
        if self.datetime && parse_epoch_millis(trimmed).is_none() {
            self.datetime = false;
        }

        let is_typed = self.integer || self.float || self.datetime;
        if was_typed && !is_typed && diagnostics.len() < MAX_DIAGNOSTICS {
            diagnostics.push(format!(
                "Column '{}': value '{}' at row {} forces string type",
                name, trimmed, row
            ));
        }
    }

    fn inferred_type(&self) -> ColumnType {
        if self.non_empty == 0 {
            // All-empty columns default to String
            ColumnType::String
        } else if self.integer {
            ColumnType::Integer
        } else if self.float {
            ColumnType::Float
        } else if self.datetime {
            ColumnType::DateTime
        } else {
            ColumnType::String
        }
    }
}

fn csv_reader(bytes: &[u8]) -> csv::Reader<&[u8]> {
    csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .from_reader(bytes)
}

/// Rewrite blank body lines as explicit empty records
///
/// The csv reader drops blank lines entirely, but a blank line between data
/// rows is a row of empty cells and must reach inference and the builders
/// (it is what makes a column nullable). The header line fixes the field
/// count; blank lines after it become `""` (single column) or a run of
/// separators. Newlines inside quoted fields are left alone.
fn preserve_blank_rows(bytes: &[u8]) -> Cow<'_, [u8]> {
    let mut out: Vec<u8> = Vec::with_capacity(bytes.len());
    let mut rewritten = false;
    let mut in_quotes = false;
    let mut line_start = 0usize;
    let mut commas = 0usize;
    let mut field_count: Option<usize> = None;

    for &b in bytes {
        match b {
            b'"' => {
                in_quotes = !in_quotes;
                out.push(b);
            }
            b',' if !in_quotes => {
                commas += 1;
                out.push(b);
            }
            b'\n' if !in_quotes => {
                let mut line_len = out.len() - line_start;
                if line_len == 1 && out[line_start] == b'\r' {
                    line_len = 0;
                }
                match (line_len, field_count) {
                    (0, Some(n)) => {
                        out.truncate(line_start);
                        if n <= 1 {
                            out.extend_from_slice(b"\"\"");
                        } else {
                            out.extend(std::iter::repeat_n(b',', n - 1));
                        }
                        rewritten = true;
                    }
                    // Blank lines before the header stay skipped
                    (0, None) => {}
                    (_, None) => field_count = Some(commas + 1),
                    _ => {}
                }
                out.push(b'\n');
                line_start = out.len();
                commas = 0;
            }
            _ => out.push(b),
        }
    }

    if rewritten {
        Cow::Owned(out)
    } else {
        Cow::Borrowed(bytes)
    }
}

fn header_names(reader: &mut csv::Reader<&[u8]>) -> Result<Vec<String>> {
    let headers = reader.headers().map_err(csv_error)?;
    if headers.is_empty() {
        return Err(EngineError::decode("CSV input has no header row"));
    }

    // Blank or duplicate header cells get positional fallbacks
    let mut names: Vec<String> = Vec::with_capacity(headers.len());
    for (i, raw) in headers.iter().enumerate() {
        let base = if raw.trim().is_empty() {
            format!("column_{}", i + 1)
        } else {
            raw.trim().to_string()
        };
        let mut name = base.clone();
        let mut suffix = 2;
        while names.contains(&name) {
            name = format!("{}_{}", base, suffix);
            suffix += 1;
        }
        names.push(name);
    }
    Ok(names)
}

fn csv_error(error: csv::Error) -> EngineError {
    EngineError::decode(format!("CSV parse error: {}", error))
}

// ====== JSON rows path ======

/// Convert a JSON array of objects to CSV text so type inference applies
///
/// Columns come from the union of keys across rows; non-string values render
/// in their natural form (so `10` still infers Integer), `null` and missing
/// keys render as empty cells, and nested values render as JSON text.
pub fn json_rows_to_csv(rows: &serde_json::Value) -> Result<String> {
    let rows = rows
        .as_array()
        .ok_or_else(|| EngineError::invalid_config("JSON input must be an array of objects"))?;

    let mut names: Vec<String> = Vec::new();
    for (i, row) in rows.iter().enumerate() {
        let object = row.as_object().ok_or_else(|| {
            EngineError::invalid_config(format!("JSON row {} is not an object", i + 1))
        })?;
        for key in object.keys() {
            if !names.iter().any(|n| n == key) {
                names.push(key.clone());
            }
        }
    }
    if names.is_empty() {
        return Err(EngineError::invalid_config("JSON input has no fields"));
    }

    let mut out = String::new();
    out.push_str(
        &names
            .iter()
            .map(|n| csv_escape(n))
            .collect::<Vec<_>>()
            .join(","),
    );
    out.push('\n');

    for row in rows {
        let Some(object) = row.as_object() else {
            continue;
        };
        let cells: Vec<String> = names
            .iter()
            .map(|name| match object.get(name) {
                None | Some(serde_json::Value::Null) => String::new(),
                Some(serde_json::Value::String(s)) => csv_escape(s),
                Some(serde_json::Value::Number(n)) => n.to_string(),
                Some(serde_json::Value::Bool(b)) => b.to_string(),
                Some(nested) => csv_escape(&nested.to_string()),
            })
            .collect();
        out.push_str(&cells.join(","));
        out.push('\n');
    }

    Ok(out)
}

fn csv_escape(cell: &str) -> String {
    if cell.contains(',') || cell.contains('"') || cell.contains('\n') || cell.contains('\r') {
        format!("\"{}\"", cell.replace('"', "\"\""))
    } else {
        cell.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE_CSV: &str = "id,name,price,when\n\
                              1,widget,9.99,2024-01-01\n\
                              2,gadget,19.5,2024-01-02\n\
                              3,sprocket,5,2024-01-03\n";

    #[test]
    fn test_inference_preference_order() {
        let mut analyzer = SchemaAnalyzer::new();
        let config = analyzer.analyze(SAMPLE_CSV.as_bytes()).unwrap();

        assert_eq!(config.columns[0].inferred_type, ColumnType::Integer);
        assert_eq!(config.columns[1].inferred_type, ColumnType::String);
        assert_eq!(config.columns[2].inferred_type, ColumnType::Float);
        assert_eq!(config.columns[3].inferred_type, ColumnType::DateTime);
    }

    #[test]
    fn test_all_empty_column_defaults_to_string() {
        let csv = "a,b\n1,\n2,\n";
        let mut analyzer = SchemaAnalyzer::new();
        let config = analyzer.analyze(csv.as_bytes()).unwrap();
        assert_eq!(config.columns[1].inferred_type, ColumnType::String);
        assert!(!config.columns[1].nullable);
    }

    #[test]
    fn test_empty_cells_infer_nullable() {
        let csv = "a\n1\n\n3\n";
        let mut analyzer = SchemaAnalyzer::new();
        let config = analyzer.analyze(csv.as_bytes()).unwrap();
        assert_eq!(config.columns[0].inferred_type, ColumnType::Integer);
        assert!(config.columns[0].nullable);

        let table = analyzer.build_table(csv.as_bytes(), &config).unwrap();
        assert_eq!(table.get("a", 1).unwrap(), Value::Null);
    }

    #[test]
    fn test_blank_line_is_a_row_of_empty_cells() {
        let csv = "a,b\n1,x\n\n3,z\n";
        let mut analyzer = SchemaAnalyzer::new();
        let config = analyzer.analyze(csv.as_bytes()).unwrap();
        assert!(config.columns[0].nullable);

        let table = analyzer.build_table(csv.as_bytes(), &config).unwrap();
        assert_eq!(table.row_count(), 3);
        assert_eq!(table.get("a", 1).unwrap(), Value::Null);
        assert_eq!(table.get("b", 1).unwrap(), Value::String(String::new()));
    }

    #[test]
    fn test_quoted_newlines_are_not_blank_rows() {
        let csv = "a\n\"x\n\ny\"\n2\n";
        let mut analyzer = SchemaAnalyzer::new();
        let config = analyzer.analyze(csv.as_bytes()).unwrap();
        let table = analyzer.build_table(csv.as_bytes(), &config).unwrap();

        assert_eq!(table.row_count(), 2);
        assert_eq!(table.get_string("a", 0).unwrap(), "x\n\ny");
    }

    #[test]
    fn test_build_applies_committed_types() {
        let mut analyzer = SchemaAnalyzer::new();
        let config = analyzer.analyze(SAMPLE_CSV.as_bytes()).unwrap();
        let table = analyzer.build_table(SAMPLE_CSV.as_bytes(), &config).unwrap();

        assert_eq!(table.row_count(), 3);
        assert_eq!(table.get("id", 0).unwrap(), Value::Integer(1));
        assert_eq!(table.get("price", 2).unwrap(), Value::Float(5.0));
        assert_eq!(
            table.get("name", 1).unwrap(),
            Value::String("gadget".to_string())
        );
        assert!(matches!(table.get("when", 0).unwrap(), Value::DateTime(_)));
    }

    #[test]
    fn test_widening_override() {
        let mut analyzer = SchemaAnalyzer::new();
        let mut config = analyzer.analyze(SAMPLE_CSV.as_bytes()).unwrap();
        config.override_type("id", ColumnType::Float).unwrap();

        let table = analyzer.build_table(SAMPLE_CSV.as_bytes(), &config).unwrap();
        assert_eq!(table.get("id", 0).unwrap(), Value::Float(1.0));
    }

    #[test]
    fn test_narrowing_override_fails_build_with_coordinates() {
        let mut analyzer = SchemaAnalyzer::new();
        let mut config = analyzer.analyze(SAMPLE_CSV.as_bytes()).unwrap();
        // 'widget' cannot narrow to integer; the re-scan is authoritative
        config.override_type("name", ColumnType::Integer).unwrap();

        let err = analyzer
            .build_table(SAMPLE_CSV.as_bytes(), &config)
            .unwrap_err();
        match err {
            EngineError::SchemaMismatch { row, column, .. } => {
                assert_eq!(row, 1);
                assert_eq!(column, "name");
            }
            other => panic!("expected SchemaMismatch, got {}", other),
        }
    }

    #[test]
    fn test_bad_value_outside_sample_names_row() {
        // The sample sees only integers; row 4 breaks the committed type
        let csv = "n\n1\n2\n3\noops\n";
        let mut analyzer = SchemaAnalyzer::new().with_sample_size(3);
        let config = analyzer.analyze(csv.as_bytes()).unwrap();
        assert_eq!(config.columns[0].inferred_type, ColumnType::Integer);

        let err = analyzer.build_table(csv.as_bytes(), &config).unwrap_err();
        match err {
            EngineError::SchemaMismatch { row, .. } => assert_eq!(row, 4),
            other => panic!("expected SchemaMismatch, got {}", other),
        }
    }

    #[test]
    fn test_state_machine_enforced() {
        let mut analyzer = SchemaAnalyzer::new();
        let config = SchemaConfig {
            columns: vec![ColumnSchema {
                name: "x".to_string(),
                inferred_type: ColumnType::Integer,
                user_selected_type: None,
                nullable: false,
            }],
        };

        assert!(analyzer.build_table(b"x\n1\n", &config).is_err());
        analyzer.analyze(b"x\n1\n").unwrap();
        assert!(analyzer.build_table(b"x\n1\n", &config).is_ok());
    }

    #[test]
    fn test_diagnostics_record_type_demotions() {
        let csv = "v\n1\n2\nhello\n4\n";
        let mut analyzer = SchemaAnalyzer::new();
        analyzer.analyze(csv.as_bytes()).unwrap();

        assert_eq!(analyzer.diagnostics().len(), 1);
        assert!(analyzer.diagnostics()[0].contains("'hello'"));
        assert!(analyzer.diagnostics()[0].contains("row 3"));
    }

    #[test]
    fn test_duplicate_headers_deduplicated() {
        let csv = "a,a,\n1,2,3\n";
        let mut analyzer = SchemaAnalyzer::new();
        let config = analyzer.analyze(csv.as_bytes()).unwrap();
        let names: Vec<&str> = config.columns.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["a", "a_2", "column_3"]);
    }

    #[test]
    fn test_chunked_build_flushes_at_capacity() {
        let mut csv = String::from("n\n");
        for i in 0..3_000 {
            csv.push_str(&format!("{}\n", i));
        }

        let mut analyzer = SchemaAnalyzer::fast_preview();
        let config = analyzer.analyze(csv.as_bytes()).unwrap();
        let table = analyzer.build_table(csv.as_bytes(), &config).unwrap();

        assert_eq!(table.row_count(), 3_000);
        assert_eq!(table.column("n").unwrap().chunk_count(), 3);
        assert_eq!(table.get("n", 2_999).unwrap(), Value::Integer(2_999));
    }

    #[test]
    fn test_json_rows_round_trip() {
        let rows = serde_json::json!([
            {"id": 1, "name": "a", "score": 1.5},
            {"id": 2, "name": "b, with comma", "score": null},
            {"id": 3, "name": "c", "score": 3.0}
        ]);

        let csv = json_rows_to_csv(&rows).unwrap();
        let mut analyzer = SchemaAnalyzer::new();
        let config = analyzer.analyze(csv.as_bytes()).unwrap();

        let id = config.column("id").unwrap();
        assert_eq!(id.inferred_type, ColumnType::Integer);
        let score = config.column("score").unwrap();
        assert_eq!(score.inferred_type, ColumnType::Float);
        assert!(score.nullable);

        let table = analyzer.build_table(csv.as_bytes(), &config).unwrap();
        assert_eq!(table.row_count(), 3);
        assert_eq!(
            table.get("name", 1).unwrap(),
            Value::String("b, with comma".to_string())
        );
        assert_eq!(table.get("score", 1).unwrap(), Value::Null);
    }

    #[test]
    fn test_json_rejects_non_objects() {
        assert!(json_rows_to_csv(&serde_json::json!([1, 2, 3])).is_err());
        assert!(json_rows_to_csv(&serde_json::json!({"a": 1})).is_err());
    }
}
