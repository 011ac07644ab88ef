/*
 * Copyright (c) 2025-present Dawid Pawlik
 *
 * For educational use only by employees and students of MIMUW.
 * See LICENSE file for details.
 */

//! # The engine boundary
//!
//! Hosts talk to the engine through opaque `u32` table handles: load or
//! build a table, get a handle back, pass the handle to every subsequent
//! call. Tables behind handles are immutable; operators that produce a new
//! table (window, sample, filter materialization) register it under a fresh
//! handle and leave the input alone.
//!
//! Loads are admitted against the optional memory budget using the file's
//! header estimate before any chunk is decompressed, so an oversized load
//! fails with `OutOfMemory` instead of exhausting the process.

use crate::Table;
use crate::Value;
use crate::error::EngineError;
use crate::error::Result;
use crate::memory::MemoryPool;
use crate::memory::MemoryStats;
use crate::ops::aggregate;
use crate::ops::aggregate::AggregateConfig;
use crate::ops::aggregate::AggregateOp;
use crate::ops::aggregate::AggregatedResult;
use crate::ops::aggregate::JsonRow;
use crate::ops::filter;
use crate::ops::filter::Bitmap;
use crate::ops::sort;
use crate::ops::sort::SortKey;
use crate::ops::stats;
use crate::ops::window;
use crate::ops::window::WindowConfig;
use crate::schema::SchemaAnalyzer;
use crate::schema::SchemaConfig;
use crate::schema::json_rows_to_csv;
use crate::serialization::parse_metadata;
use std::collections::HashMap;
use tracing::info;

struct TableEntry {
    table: Table,
    /// Bytes reserved in the pool for this table
    reserved: usize,
}

/// Handle-based facade over tables and operators
#[derive(Default)]
pub struct Engine {
    tables: HashMap<u32, TableEntry>,
    next_handle: u32,
    pool: MemoryPool,
}

impl Engine {
    pub fn new() -> Self {
        Engine::default()
    }

    pub fn with_memory_budget(budget: usize) -> Self {
        Engine {
            pool: MemoryPool::with_budget(budget),
            ..Engine::default()
        }
    }

    pub fn set_memory_budget(&mut self, budget: Option<usize>) {
        self.pool.set_budget(budget);
    }

    pub fn memory_stats(&self) -> MemoryStats {
        self.pool.stats()
    }

    pub fn table_count(&self) -> usize {
        self.tables.len()
    }

    /// Borrow the table behind a handle
    pub fn table(&self, handle: u32) -> Result<&Table> {
        self.tables
            .get(&handle)
            .map(|entry| &entry.table)
            .ok_or_else(|| EngineError::invalid_config(format!("Unknown table handle {}", handle)))
    }

    /// Register a table built outside the engine
    pub fn create_table(&mut self, table: Table) -> Result<u32> {
        let reserved = table.memory_usage();
        self.pool.reserve(reserved)?;

        let handle = self.next_handle;
        self.next_handle += 1;
        info!(
            handle,
            rows = table.row_count(),
            columns = table.column_count(),
            bytes = reserved,
            "registered table"
        );
        self.tables.insert(handle, TableEntry { table, reserved });
        Ok(handle)
    }

    /// Drop a table and return its memory to the pool
    pub fn free_table(&mut self, handle: u32) -> Result<()> {
        let entry = self.tables.remove(&handle).ok_or_else(|| {
            EngineError::invalid_config(format!("Unknown table handle {}", handle))
        })?;
        self.pool.release(entry.reserved);
        info!(handle, bytes = entry.reserved, "freed table");
        Ok(())
    }

    // ====== Loading ======

    /// Infer a schema from CSV bytes and build the table
    ///
    /// A caller-provided config (usually an analyzer result with overrides
    /// applied) replaces the inferred one.
    pub fn load_csv(&mut self, bytes: &[u8], config: Option<&SchemaConfig>) -> Result<u32> {
        let mut analyzer = SchemaAnalyzer::new();
        let inferred = analyzer.analyze(bytes)?;
        let table = match config {
            Some(config) => {
                analyzer.confirm(config)?;
                analyzer.build_table(bytes, config)?
            }
            None => analyzer.build_table(bytes, &inferred)?,
        };
        self.create_table(table)
    }

    /// Load an array of JSON row objects via CSV conversion
    pub fn load_json(&mut self, rows: &serde_json::Value) -> Result<u32> {
        let csv = json_rows_to_csv(rows)?;
        self.load_csv(csv.as_bytes(), None)
    }

    /// Load a stored table, fully decoded into memory
    pub fn load_from_bytes(&mut self, bytes: &[u8]) -> Result<u32> {
        self.load_with_strategy(bytes, false)
    }

    /// Load a stored table choosing the decode strategy
    ///
    /// `prefer_memory = true` keeps chunks compressed at rest and
    /// decompresses on access.
    pub fn load_from_bytes_with_strategy(
        &mut self,
        bytes: &[u8],
        prefer_memory: bool,
    ) -> Result<u32> {
        self.load_with_strategy(bytes, prefer_memory)
    }

    fn load_with_strategy(&mut self, bytes: &[u8], prefer_memory: bool) -> Result<u32> {
        // Admission check from the header alone, before any decompression
        let metadata = parse_metadata(bytes)?;
        let estimated = (metadata.estimated_memory_mb * (1 << 20) as f64) as usize;
        self.pool.reserve(estimated)?;

        let table = match Table::from_bytes_with_strategy(bytes, prefer_memory) {
            Ok(table) => table,
            Err(e) => {
                self.pool.release(estimated);
                return Err(e);
            }
        };

        // Swap the estimate for the measured footprint
        self.pool.release(estimated);
        self.create_table(table)
    }

    // ====== Saving ======

    pub fn save_to_bytes(&self, handle: u32) -> Result<Vec<u8>> {
        self.table(handle)?.to_bytes()
    }

    /// Save with Tier-1 encodings only, no block compression
    pub fn save_to_bytes_without_tier2(&self, handle: u32) -> Result<Vec<u8>> {
        self.table(handle)?.to_bytes_without_tier2()
    }

    // ====== Cell and column access ======

    pub fn get_value(&self, handle: u32, column: &str, row: usize) -> Result<Value> {
        self.table(handle)?.get(column, row)
    }

    pub fn get_integer(&self, handle: u32, column: &str, row: usize) -> Result<Option<i64>> {
        self.table(handle)?.get_integer(column, row)
    }

    pub fn get_float(&self, handle: u32, column: &str, row: usize) -> Result<Option<f64>> {
        self.table(handle)?.get_float(column, row)
    }

    pub fn get_string(&self, handle: u32, column: &str, row: usize) -> Result<String> {
        self.table(handle)?.get_string(column, row)
    }

    pub fn get_column_dense(&self, handle: u32, column: &str) -> Result<Vec<Value>> {
        self.table(handle)?.get_column_dense(column)
    }

    // ====== Operators ======

    pub fn aggregate(&self, handle: u32, config: &AggregateConfig) -> Result<Vec<JsonRow>> {
        aggregate::aggregate(self.table(handle)?, config)
    }

    pub fn aggregate_for_chart(
        &self,
        handle: u32,
        x_field: &str,
        y_field: Option<&str>,
        color_field: Option<&str>,
        op: AggregateOp,
    ) -> Result<AggregatedResult> {
        aggregate::aggregate_for_chart(self.table(handle)?, x_field, y_field, color_field, op)
    }

    pub fn filter_range(&self, handle: u32, column: &str, min: f64, max: f64) -> Result<Bitmap> {
        filter::filter_range(self.table(handle)?, column, min, max)
    }

    /// Materialize a bitmap selection as a new table handle
    pub fn apply_bitmap(&mut self, handle: u32, bitmap: &Bitmap) -> Result<u32> {
        let filtered = filter::apply_bitmap(self.table(handle)?, bitmap)?;
        self.create_table(filtered)
    }

    pub fn sort(&self, handle: u32, keys: &[SortKey]) -> Result<Vec<u32>> {
        sort::sort(self.table(handle)?, keys)
    }

    /// Compute a window column; the result is a new table handle
    pub fn window(&mut self, handle: u32, config: &WindowConfig) -> Result<u32> {
        let windowed = window::window(self.table(handle)?, config)?;
        self.create_table(windowed)
    }

    /// Seeded row sampling; the result is a new table handle
    pub fn sample(&mut self, handle: u32, n: usize, seed: Option<u64>) -> Result<u32> {
        let sampled = stats::sample(self.table(handle)?, n, seed)?;
        self.create_table(sampled)
    }
}
