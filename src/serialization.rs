/*
 * Copyright (c) 2025-present Dawid Pawlik
 *
 * For educational use only by employees and students of MIMUW.
 * See LICENSE file for details.
 */

//! # The portable `.strata` file format
//!
//! Layout, little-endian throughout:
//!
//! ```text
//! magic:       8 bytes, b"STRATA01"
//! header_size: u32
//! header:      bincode-encoded FileHeader (version, row count, column count,
//!              per-column name/type/chunk-count/stats)
//! blocks:      per column (column order), per chunk (chunk order):
//!              [compression_type: u32][original_size: u32][payload]
//! ```
//!
//! Deserializing the bytes produced by serializing a table reconstructs a
//! table with identical column order, names, types, row count and cell
//! values. Metadata-only parsing reads the header and walks the per-chunk
//! block headers without decompressing any payload, bounding memory to
//! O(columns × chunks) regardless of file size.

use crate::ColumnType;
use crate::Table;
use crate::column::Column;
use crate::compression;
use crate::compression::BLOCK_HEADER_SIZE;
use crate::compression::CompressionType;
use crate::compression::DEFAULT_ZSTD_LEVEL;
use crate::error::EngineError;
use crate::error::Result;
use serde::Deserialize;
use serde::Serialize;
use std::path::Path;
use tracing::debug;

pub const MAGIC_BYTES: &[u8; 8] = b"STRATA01";
const VERSION: u32 = 1;

/// Estimated decoded bytes per row used for admission decisions
fn estimated_row_bytes(column_type: ColumnType) -> usize {
    match column_type {
        // Strings decode to heap-owned values; 16 bytes/row is the working
        // estimate the memory pool uses for admission
        ColumnType::String => 16,
        _ => 8,
    }
}

/// Per-column entry in the file header
///
/// The stats block is uniform across types: numeric columns populate
/// min/max/sum, string columns populate cardinality (sum of per-chunk
/// dictionary sizes, an upper bound); unused slots are zero.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ColumnMeta {
    pub name: String,
    pub type_tag: u8,
    pub chunk_count: u32,
    pub min: f64,
    pub max: f64,
    pub sum: f64,
    pub cardinality: u32,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct FileHeader {
    pub version: u32,
    pub row_count: u64,
    pub column_count: u32,
    pub columns: Vec<ColumnMeta>,
}

/// Header-level description of a stored table, cheap to obtain
#[derive(Debug, Clone, Serialize)]
pub struct Metadata {
    pub row_count: usize,
    pub column_count: usize,
    pub columns: Vec<ColumnInfo>,
    pub estimated_memory_mb: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct ColumnInfo {
    pub name: String,
    pub column_type: ColumnType,
    pub chunk_count: usize,
    pub stats: Option<ColumnStats>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ColumnStats {
    pub min: f64,
    pub max: f64,
    pub mean: f64,
    pub cardinality: u32,
}

/// Description of a single extracted chunk block
#[derive(Debug, Clone, Serialize)]
pub struct ChunkBlockInfo {
    pub compression: CompressionType,
    pub compressed_size: usize,
    pub element_count: usize,
    pub bit_width: Option<u8>,
    pub min: Option<f64>,
    pub max: Option<f64>,
    pub cardinality: Option<usize>,
}

impl Table {
    /// Serialize through Tier-2 with the default algorithm (Zstd)
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        self.to_bytes_with(CompressionType::Zstd, DEFAULT_ZSTD_LEVEL)
    }

    /// Serialize without Tier-2: chunk bodies stored with `CompressionType::None`
    ///
    /// Faster and larger on disk; useful when memory pressure during
    /// serialization matters more than final size.
    pub fn to_bytes_without_tier2(&self) -> Result<Vec<u8>> {
        self.to_bytes_with(CompressionType::None, 0)
    }

    /// Serialize with an explicit Tier-2 algorithm and level
    pub fn to_bytes_with(&self, compression: CompressionType, level: i32) -> Result<Vec<u8>> {
        let mut columns_meta = Vec::with_capacity(self.column_count());
        let mut blocks: Vec<Vec<u8>> = Vec::new();

        for column in self.columns() {
            columns_meta.push(column_meta(column)?);

            for index in 0..column.chunk_count() {
                let body = column.chunk(index)?.to_body();
                let payload = compression::compress(&body, compression, level)?;
                let mut block = Vec::with_capacity(BLOCK_HEADER_SIZE + payload.len());
                compression::write_block(&mut block, compression, &payload)?;
                blocks.push(block);
            }
        }

        let header = FileHeader {
            version: VERSION,
            row_count: self.row_count() as u64,
            column_count: self.column_count() as u32,
            columns: columns_meta,
        };

        let header_bytes = bincode::serialize(&header)
            .map_err(|e| EngineError::decode(format!("Header encoding failed: {}", e)))?;

        let body_size: usize = blocks.iter().map(|b| b.len()).sum();
        let mut out = Vec::with_capacity(12 + header_bytes.len() + body_size);
        out.extend_from_slice(MAGIC_BYTES);
        out.extend_from_slice(&(header_bytes.len() as u32).to_le_bytes());
        out.extend_from_slice(&header_bytes);
        for block in blocks {
            out.extend_from_slice(&block);
        }

        debug!(
            rows = self.row_count(),
            columns = self.column_count(),
            bytes = out.len(),
            %compression,
            "serialized table"
        );
        Ok(out)
    }

    /// Full eager round trip: every chunk decoded at load time
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        Self::from_bytes_with_options(bytes, false, None)
    }

    /// Load with an explicit decode strategy
    ///
    /// `prefer_memory = true` keeps chunks compressed at rest and decodes on
    /// demand; `false` decodes everything eagerly. Both strategies answer
    /// `get`/`get_column_dense` identically — this is purely a performance
    /// knob.
    pub fn from_bytes_with_strategy(bytes: &[u8], prefer_memory: bool) -> Result<Self> {
        Self::from_bytes_with_options(bytes, prefer_memory, None)
    }

    /// Load with a strategy and an optional progress callback
    ///
    /// The callback is invoked once per chunk with `(fraction_done, message)`.
    pub fn from_bytes_with_options(
        bytes: &[u8],
        prefer_memory: bool,
        progress: Option<&dyn Fn(f64, &str)>,
    ) -> Result<Self> {
        let (header, mut pos) = parse_header(bytes)?;

        let total_chunks: usize = header.columns.iter().map(|c| c.chunk_count as usize).sum();
        let mut seen_chunks = 0usize;
        let mut table = Table::new();

        for meta in &header.columns {
            let column_type = column_type_of(meta)?;
            let chunk_count = meta.chunk_count as usize;
            let mut column = Column::new(&meta.name, column_type, 0);
            let mut capacity = 0usize;
            let mut remaining = header.row_count as usize;

            for chunk_index in 0..chunk_count {
                let (_, block_end) = block_bounds(bytes, pos, &meta.name, chunk_index)?;
                let block = &bytes[pos..block_end];

                // The first chunk of each column is always decoded: its
                // length fixes the chunk capacity used for row addressing
                if chunk_index == 0 || !prefer_memory {
                    let body = compression::decompress_block(block)
                        .map_err(|e| decorate(e, &meta.name, chunk_index))?;
                    let chunk = crate::chunk::Chunk::from_body(&body, column_type)
                        .map_err(|e| decorate(e, &meta.name, chunk_index))?;
                    if chunk_index == 0 {
                        capacity = chunk.len().max(1);
                        column = Column::new(&meta.name, column_type, capacity);
                    }
                    remaining = remaining.saturating_sub(chunk.len());
                    column.push_chunk(chunk)?;
                } else {
                    let len = if chunk_index + 1 < chunk_count {
                        capacity
                    } else {
                        remaining
                    };
                    remaining = remaining.saturating_sub(len);
                    column.push_compressed(block.to_vec(), len);
                }

                pos = block_end;
                seen_chunks += 1;
                if let Some(report) = progress {
                    report(
                        seen_chunks as f64 / total_chunks.max(1) as f64,
                        &format!("loading column '{}'", meta.name),
                    );
                }
            }

            if column.row_count() != header.row_count as usize {
                return Err(EngineError::decode_at(
                    format!(
                        "Column holds {} rows, header declares {}",
                        column.row_count(),
                        header.row_count
                    ),
                    &meta.name,
                    chunk_count.saturating_sub(1),
                ));
            }
            table.add_column(column)?;
        }

        debug!(
            rows = table.row_count(),
            columns = table.column_count(),
            prefer_memory,
            "deserialized table"
        );
        Ok(table)
    }

    pub fn save_to_path<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let bytes = self.to_bytes()?;
        std::fs::write(path, bytes)?;
        Ok(())
    }

    pub fn load_from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let bytes = std::fs::read(path)?;
        Self::from_bytes(&bytes)
    }
}

/// Validate magic and version, decode the header, return it with the offset
/// of the first chunk block
pub fn parse_header(bytes: &[u8]) -> Result<(FileHeader, usize)> {
    if bytes.len() < 12 {
        return Err(EngineError::decode(format!(
            "File too short for header: {} bytes",
            bytes.len()
        )));
    }
    if &bytes[..8] != MAGIC_BYTES {
        return Err(EngineError::decode("Invalid file format: magic bytes mismatch"));
    }

    let header_size = u32::from_le_bytes([bytes[8], bytes[9], bytes[10], bytes[11]]) as usize;
    let header_end = 12 + header_size;
    if header_end > bytes.len() {
        return Err(EngineError::decode(format!(
            "Truncated header: declared {} bytes, {} remain",
            header_size,
            bytes.len() - 12
        )));
    }

    let header: FileHeader = bincode::deserialize(&bytes[12..header_end])
        .map_err(|e| EngineError::decode(format!("Header decoding failed: {}", e)))?;

    if header.version != VERSION {
        return Err(EngineError::decode(format!(
            "Unsupported file version: {}",
            header.version
        )));
    }
    if header.column_count as usize != header.columns.len() {
        return Err(EngineError::decode(format!(
            "Header declares {} columns but lists {}",
            header.column_count,
            header.columns.len()
        )));
    }

    Ok((header, header_end))
}

/// Header-only parse: row/column counts, names, types, chunk counts
///
/// Walks the per-chunk block headers to validate the layout but never
/// decompresses a payload.
pub fn parse_metadata(bytes: &[u8]) -> Result<Metadata> {
    parse_metadata_inner(bytes, false)
}

/// Header-only parse including the per-column stats block
pub fn parse_metadata_with_stats(bytes: &[u8]) -> Result<Metadata> {
    parse_metadata_inner(bytes, true)
}

fn parse_metadata_inner(bytes: &[u8], with_stats: bool) -> Result<Metadata> {
    let (header, mut pos) = parse_header(bytes)?;

    let mut columns = Vec::with_capacity(header.columns.len());
    let mut estimated_bytes = 0usize;

    for meta in &header.columns {
        let column_type = column_type_of(meta)?;
        estimated_bytes += header.row_count as usize * estimated_row_bytes(column_type);

        // Seek past this column's blocks without touching payloads
        for chunk_index in 0..meta.chunk_count as usize {
            let (_, block_end) = block_bounds(bytes, pos, &meta.name, chunk_index)?;
            pos = block_end;
        }

        let stats = with_stats.then(|| {
            let valid = header.row_count.max(1) as f64;
            ColumnStats {
                min: meta.min,
                max: meta.max,
                mean: meta.sum / valid,
                cardinality: meta.cardinality,
            }
        });

        columns.push(ColumnInfo {
            name: meta.name.clone(),
            column_type,
            chunk_count: meta.chunk_count as usize,
            stats,
        });
    }

    Ok(Metadata {
        row_count: header.row_count as usize,
        column_count: header.columns.len(),
        columns,
        estimated_memory_mb: estimated_bytes as f64 / (1024.0 * 1024.0),
    })
}

/// Extract one chunk's self-describing block without decompressing others
pub fn extract_chunk(bytes: &[u8], column_index: usize, chunk_index: usize) -> Result<Vec<u8>> {
    let (header, mut pos) = parse_header(bytes)?;

    let meta = header.columns.get(column_index).ok_or_else(|| {
        EngineError::decode(format!(
            "Column index {} out of bounds ({} columns)",
            column_index,
            header.columns.len()
        ))
    })?;
    if chunk_index >= meta.chunk_count as usize {
        return Err(EngineError::decode_at(
            format!(
                "Chunk index {} out of bounds ({} chunks)",
                chunk_index, meta.chunk_count
            ),
            &meta.name,
            chunk_index,
        ));
    }

    // Skip prior columns' blocks, then prior chunks of the target column
    for prior in header.columns.iter().take(column_index) {
        for i in 0..prior.chunk_count as usize {
            let (_, block_end) = block_bounds(bytes, pos, &prior.name, i)?;
            pos = block_end;
        }
    }
    for i in 0..chunk_index {
        let (_, block_end) = block_bounds(bytes, pos, &meta.name, i)?;
        pos = block_end;
    }

    let (_, block_end) = block_bounds(bytes, pos, &meta.name, chunk_index)?;
    Ok(bytes[pos..block_end].to_vec())
}

/// Describe a single extracted block: compression, element count, bit width,
/// statistics — decompresses only that block
pub fn parse_chunk_metadata(block: &[u8], column_type: ColumnType) -> Result<ChunkBlockInfo> {
    let (compression, size) = compression::read_block_header(block, 0)?;
    let body = compression::decompress_block(block)?;
    let description = crate::chunk::describe_body(&body, column_type)?;

    Ok(ChunkBlockInfo {
        compression,
        compressed_size: size,
        element_count: description.element_count,
        bit_width: description.bit_width,
        min: description.min,
        max: description.max,
        cardinality: description.cardinality,
    })
}

fn column_meta(column: &Column) -> Result<ColumnMeta> {
    let (min, max, sum, cardinality) = match column.column_type() {
        ColumnType::String => (0.0, 0.0, 0.0, column.cardinality()?.unwrap_or(0) as u32),
        _ => (
            column.min_f64()?.unwrap_or(0.0),
            column.max_f64()?.unwrap_or(0.0),
            column.sum_f64()?,
            0,
        ),
    };

    Ok(ColumnMeta {
        name: column.name().to_string(),
        type_tag: column.column_type().type_tag(),
        chunk_count: u32::try_from(column.chunk_count()).map_err(|_| {
            EngineError::decode(format!(
                "Column '{}' has too many chunks for the format",
                column.name()
            ))
        })?,
        min,
        max,
        sum,
        cardinality,
    })
}

fn column_type_of(meta: &ColumnMeta) -> Result<ColumnType> {
    ColumnType::from_tag(meta.type_tag).ok_or_else(|| {
        EngineError::Decode {
            detail: format!("Unknown column type tag {}", meta.type_tag),
            column: Some(meta.name.clone()),
            chunk: None,
        }
    })
}

/// Bounds of the block at `pos`, with coordinates attached on failure
fn block_bounds(bytes: &[u8], pos: usize, column: &str, chunk: usize) -> Result<(usize, usize)> {
    let (_, size) = compression::read_block_header(bytes, pos)
        .map_err(|e| decorate(e, column, chunk))?;
    let end = pos + BLOCK_HEADER_SIZE + size;
    if end > bytes.len() {
        return Err(EngineError::decode_at(
            format!(
                "Truncated chunk payload: need {} bytes at offset {}, {} remain",
                size,
                pos + BLOCK_HEADER_SIZE,
                bytes.len().saturating_sub(pos + BLOCK_HEADER_SIZE)
            ),
            column,
            chunk,
        ));
    }
    Ok((pos, end))
}

fn decorate(error: EngineError, column: &str, chunk: usize) -> EngineError {
    match error {
        EngineError::Decode { detail, .. } => EngineError::decode_at(detail, column, chunk),
        other => other,
    }
}
