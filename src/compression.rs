/*
 * Copyright (c) 2025-present Dawid Pawlik
 *
 * For educational use only by employees and students of MIMUW.
 * See LICENSE file for details.
 */

//! # Tier-2 compression for chunk bodies
//!
//! Tier-1 encoding (bit packing, dictionaries) shrinks a chunk into its body
//! bytes; this module wraps those bytes in general-purpose compression for
//! storage and transfer:
//!
//! - **LZ4**: fast compression with size prepending for quick decompression
//! - **Zstd**: higher ratio with configurable levels
//! - **None**: pass-through for the "without tier-2" save mode
//!
//! Every stored block is self-describing: a `[compression_type: u32]`
//! `[original_size: u32]` header precedes the payload, so decompression never
//! relies on a caller-supplied algorithm. Corrupt or truncated input fails
//! with a decode error; partial data is never returned.

use crate::error::EngineError;
use crate::error::Result;
use serde::Deserialize;
use serde::Serialize;
use std::fmt;
use std::str::FromStr;

/// Default Zstd level, balancing speed and size
pub const DEFAULT_ZSTD_LEVEL: i32 = 3;

/// Byte length of the `[compression_type][original_size]` block header
pub const BLOCK_HEADER_SIZE: usize = 8;

/// Tier-2 algorithm applied over a Tier-1 chunk body
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum CompressionType {
    None,
    Lz4,
    Zstd,
}

impl CompressionType {
    /// Wire tag recorded in each block header
    pub fn wire_tag(self) -> u32 {
        match self {
            CompressionType::None => 0,
            CompressionType::Lz4 => 1,
            CompressionType::Zstd => 2,
        }
    }

    pub fn from_wire_tag(tag: u32) -> Option<Self> {
        match tag {
            0 => Some(CompressionType::None),
            1 => Some(CompressionType::Lz4),
            2 => Some(CompressionType::Zstd),
            _ => None,
        }
    }
}

impl fmt::Display for CompressionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CompressionType::None => "none",
            CompressionType::Lz4 => "lz4",
            CompressionType::Zstd => "zstd",
        };
        write!(f, "{}", name)
    }
}

impl FromStr for CompressionType {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "none" => Ok(CompressionType::None),
            "lz4" => Ok(CompressionType::Lz4),
            "zstd" => Ok(CompressionType::Zstd),
            other => Err(EngineError::invalid_config(format!(
                "Unknown compression type '{}', expected none, lz4 or zstd",
                other
            ))),
        }
    }
}

/// Compress a Tier-1 body with the chosen algorithm
///
/// `level` applies to Zstd only; LZ4 uses its fast path and `None` is a
/// pass-through copy.
pub fn compress(data: &[u8], compression: CompressionType, level: i32) -> Result<Vec<u8>> {
    match compression {
        CompressionType::None => Ok(data.to_vec()),
        CompressionType::Lz4 => Ok(lz4_flex::compress_prepend_size(data)),
        CompressionType::Zstd => Ok(zstd::encode_all(data, level)?),
    }
}

/// Decompress a payload produced by [`compress`]
pub fn decompress(data: &[u8], compression: CompressionType) -> Result<Vec<u8>> {
    match compression {
        CompressionType::None => Ok(data.to_vec()),
        CompressionType::Lz4 => lz4_flex::decompress_size_prepended(data)
            .map_err(|e| EngineError::decode(format!("LZ4 decompression error: {}", e))),
        CompressionType::Zstd => zstd::decode_all(data)
            .map_err(|e| EngineError::decode(format!("Zstd decompression error: {}", e))),
    }
}

/// Append a self-describing block: `[compression_type][original_size][payload]`
pub fn write_block(out: &mut Vec<u8>, compression: CompressionType, payload: &[u8]) -> Result<()> {
    let size = u32::try_from(payload.len()).map_err(|_| {
        EngineError::decode(format!(
            "Chunk payload of {} bytes exceeds the format limit",
            payload.len()
        ))
    })?;

    out.extend_from_slice(&compression.wire_tag().to_le_bytes());
    out.extend_from_slice(&size.to_le_bytes());
    out.extend_from_slice(payload);
    Ok(())
}

/// Read the `[compression_type][original_size]` pair at `pos`
///
/// Returns the algorithm and payload size without touching the payload, so
/// metadata scans can seek past blocks they do not need.
pub fn read_block_header(bytes: &[u8], pos: usize) -> Result<(CompressionType, usize)> {
    if pos + BLOCK_HEADER_SIZE > bytes.len() {
        return Err(EngineError::decode(format!(
            "Truncated block header at offset {}",
            pos
        )));
    }

    let tag = u32::from_le_bytes([bytes[pos], bytes[pos + 1], bytes[pos + 2], bytes[pos + 3]]);
    let size = u32::from_le_bytes([
        bytes[pos + 4],
        bytes[pos + 5],
        bytes[pos + 6],
        bytes[pos + 7],
    ]) as usize;

    let compression = CompressionType::from_wire_tag(tag).ok_or_else(|| {
        EngineError::decode(format!(
            "Unknown compression type tag {} at offset {}",
            tag, pos
        ))
    })?;

    Ok((compression, size))
}

/// Read the full block at `pos`, returning its payload slice and the offset
/// just past the block
pub fn read_block(bytes: &[u8], pos: usize) -> Result<(CompressionType, &[u8], usize)> {
    let (compression, size) = read_block_header(bytes, pos)?;
    let start = pos + BLOCK_HEADER_SIZE;
    let end = start + size;

    if end > bytes.len() {
        return Err(EngineError::decode(format!(
            "Truncated block payload at offset {}: need {} bytes, {} remain",
            start,
            size,
            bytes.len() - start
        )));
    }

    Ok((compression, &bytes[start..end], end))
}

/// Decompress a self-describing block starting at offset 0
pub fn decompress_block(block: &[u8]) -> Result<Vec<u8>> {
    let (compression, payload, _) = read_block(block, 0)?;
    decompress(payload, compression)
}
