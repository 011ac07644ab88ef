/*
 * Copyright (c) 2025-present Dawid Pawlik
 *
 * For educational use only by employees and students of MIMUW.
 * See LICENSE file for details.
 */

//! Portable format tests: header layout, corruption handling, compression
//! variants, and the block-level surgical access paths.

use strata::ColumnType;
use strata::EngineError;
use strata::Table;
use strata::Value;
use strata::column::Column;
use strata::compression::CompressionType;
use strata::serialization::MAGIC_BYTES;
use strata::serialization::extract_chunk;
use strata::serialization::parse_chunk_metadata;
use strata::serialization::parse_header;
use strata::serialization::parse_metadata;
use strata::serialization::parse_metadata_with_stats;
use tempfile::TempDir;

fn sample_table(rows: usize, chunk_capacity: usize) -> Table {
    let ids: Vec<Value> = (0..rows as i64).map(Value::Integer).collect();
    let prices: Vec<Value> = (0..rows).map(|i| Value::Float(i as f64 * 0.5)).collect();
    let labels: Vec<Value> = (0..rows)
        .map(|i| Value::String(format!("label_{}", i % 10)))
        .collect();

    let mut table = Table::new();
    table
        .add_column(Column::from_values("id", ColumnType::Integer, chunk_capacity, &ids).unwrap())
        .unwrap();
    table
        .add_column(
            Column::from_values("price", ColumnType::Float, chunk_capacity, &prices).unwrap(),
        )
        .unwrap();
    table
        .add_column(
            Column::from_values("label", ColumnType::String, chunk_capacity, &labels).unwrap(),
        )
        .unwrap();
    table
}

#[test]
fn test_file_starts_with_magic() {
    let bytes = sample_table(10, 64).to_bytes().unwrap();
    assert_eq!(&bytes[..8], MAGIC_BYTES);

    let (header, _) = parse_header(&bytes).unwrap();
    assert_eq!(header.version, 1);
    assert_eq!(header.row_count, 10);
    assert_eq!(header.column_count, 3);
}

#[test]
fn test_wrong_magic_is_rejected() {
    let mut bytes = sample_table(10, 64).to_bytes().unwrap();
    bytes[0] = b'X';

    match Table::from_bytes(&bytes).unwrap_err() {
        EngineError::Decode { detail, .. } => {
            assert!(detail.contains("magic"), "unexpected detail: {}", detail)
        }
        other => panic!("expected Decode error, got {}", other),
    }
}

#[test]
fn test_unsupported_version_is_rejected() {
    let mut bytes = sample_table(10, 64).to_bytes().unwrap();

    // The version u32 is the first bincode field, right after the magic and
    // the header-size word
    bytes[12] = 99;
    assert!(Table::from_bytes(&bytes).is_err(), "version 99 should not load");
}

#[test]
fn test_truncated_file_fails_cleanly() {
    let bytes = sample_table(200, 64).to_bytes().unwrap();

    for cut in [0, 4, 11, bytes.len() / 2, bytes.len() - 1] {
        let result = Table::from_bytes(&bytes[..cut]);
        assert!(result.is_err(), "truncation at {} should fail", cut);
    }
}

#[test]
fn test_metadata_without_decompression_despite_corrupt_payloads() {
    let table = sample_table(300, 64);
    let mut bytes = table.to_bytes().unwrap();

    // Trash every data block payload, leaving block headers intact
    let (_, header_end) = parse_header(&bytes).unwrap();
    let mut pos = header_end;
    while pos + 8 <= bytes.len() {
        let size = u32::from_le_bytes([
            bytes[pos + 4],
            bytes[pos + 5],
            bytes[pos + 6],
            bytes[pos + 7],
        ]) as usize;
        for b in &mut bytes[pos + 8..pos + 8 + size] {
            *b = 0xAA;
        }
        pos += 8 + size;
    }

    // Metadata-only parsing never touches the payloads
    let metadata = parse_metadata(&bytes).unwrap();
    assert_eq!(metadata.row_count, 300);
    assert_eq!(metadata.column_count, 3);

    // A full load must fail loudly rather than return garbage
    assert!(Table::from_bytes(&bytes).is_err());
}

#[test]
fn test_header_stats_survive_round_trip() {
    let table = sample_table(100, 64);
    let bytes = table.to_bytes().unwrap();

    let metadata = parse_metadata_with_stats(&bytes).unwrap();
    let id = &metadata.columns[0];
    let stats = id.stats.as_ref().expect("integer column should carry stats");
    assert_eq!(stats.min, 0.0);
    assert_eq!(stats.max, 99.0);
    assert_eq!(stats.mean, 49.5);

    // String cardinality is the sum of per-chunk dictionary sizes: two
    // chunks with 10 distinct labels each
    let label = &metadata.columns[2];
    let stats = label.stats.as_ref().expect("string column should carry stats");
    assert_eq!(stats.cardinality, 20);
}

#[test]
fn test_all_compression_variants_round_trip() {
    let table = sample_table(500, 128);

    for (compression, level) in [
        (CompressionType::None, 0),
        (CompressionType::Lz4, 0),
        (CompressionType::Zstd, 3),
        (CompressionType::Zstd, 19),
    ] {
        let bytes = table.to_bytes_with(compression, level).unwrap();
        let loaded = Table::from_bytes(&bytes).unwrap();

        assert_eq!(loaded.row_count(), 500, "{} round trip", compression);
        for name in table.column_names() {
            assert_eq!(
                table.get_column_dense(name).unwrap(),
                loaded.get_column_dense(name).unwrap(),
                "column '{}' under {}",
                name,
                compression
            );
        }
    }
}

#[test]
fn test_without_tier2_is_still_loadable() {
    let table = sample_table(100, 64);
    let plain = table.to_bytes_without_tier2().unwrap();
    let compressed = table.to_bytes().unwrap();

    let loaded = Table::from_bytes(&plain).unwrap();
    assert_eq!(loaded.row_count(), 100);
    assert_eq!(
        loaded.get_column_dense("price").unwrap(),
        table.get_column_dense("price").unwrap()
    );

    // Tier-1 encodings still apply, but this data compresses further
    // under Tier-2
    assert!(
        compressed.len() < plain.len(),
        "zstd file ({}) should be smaller than uncompressed ({})",
        compressed.len(),
        plain.len()
    );
}

#[test]
fn test_extract_single_chunk_and_describe_it() {
    // 3 chunks per column: 150 rows at capacity 64
    let table = sample_table(150, 64);
    let bytes = table.to_bytes().unwrap();

    let block = extract_chunk(&bytes, 0, 1).unwrap();
    let info = parse_chunk_metadata(&block, ColumnType::Integer).unwrap();

    assert_eq!(info.compression, CompressionType::Zstd);
    assert_eq!(info.element_count, 64);
    // Chunk 1 holds ids 64..=127
    assert_eq!(info.min, Some(64.0));
    assert_eq!(info.max, Some(127.0));
    assert!(info.bit_width.is_some());

    let last = extract_chunk(&bytes, 0, 2).unwrap();
    let info = parse_chunk_metadata(&last, ColumnType::Integer).unwrap();
    assert_eq!(info.element_count, 150 - 2 * 64);

    // String chunks report dictionary cardinality instead of bit width
    let label_block = extract_chunk(&bytes, 2, 0).unwrap();
    let info = parse_chunk_metadata(&label_block, ColumnType::String).unwrap();
    assert_eq!(info.cardinality, Some(10));
}

#[test]
fn test_extract_chunk_out_of_bounds() {
    let bytes = sample_table(10, 64).to_bytes().unwrap();
    assert!(extract_chunk(&bytes, 7, 0).is_err());
    assert!(extract_chunk(&bytes, 0, 7).is_err());
}

#[test]
fn test_path_round_trip_on_disk() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("table.strata");

    let table = sample_table(64, 32);
    table.save_to_path(&path).unwrap();
    let loaded = Table::load_from_path(&path).unwrap();

    assert_eq!(loaded.row_count(), 64);
    assert_eq!(
        loaded.get_column_dense("label").unwrap(),
        table.get_column_dense("label").unwrap()
    );

    assert!(Table::load_from_path(temp_dir.path().join("missing.strata")).is_err());
}

#[test]
fn test_multi_cycle_round_trip_is_stable() {
    let mut table = sample_table(200, 64);
    let names: Vec<String> = table
        .column_names()
        .iter()
        .map(|n| n.to_string())
        .collect();
    let reference: Vec<Vec<Value>> = names
        .iter()
        .map(|name| table.get_column_dense(name).unwrap())
        .collect();

    for cycle in 0..3 {
        let bytes = table.to_bytes().unwrap();
        table = Table::from_bytes(&bytes).unwrap();
        for (i, name) in names.iter().enumerate() {
            assert_eq!(
                table.get_column_dense(name).unwrap(),
                reference[i],
                "cycle {} column '{}'",
                cycle,
                name
            );
        }
    }
}
