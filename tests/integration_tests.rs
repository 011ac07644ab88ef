/*
 * Copyright (c) 2025-present Dawid Pawlik
 *
 * For educational use only by employees and students of MIMUW.
 * See LICENSE file for details.
 */

//! End-to-end scenarios: CSV in, schema inference, aggregation, persistence
//! and the handle-based engine surface working together.

use strata::ColumnType;
use strata::Engine;
use strata::SchemaAnalyzer;
use strata::Table;
use strata::Value;
use strata::ops::aggregate::AggregateConfig;
use strata::ops::aggregate::AggregateOp;
use strata::ops::filter;
use strata::ops::sort;
use strata::ops::sort::SortKey;
use tempfile::TempDir;

const BASIC_CSV: &[u8] = b"id,category,value\n1,A,10\n2,B,20\n3,A,30\n";

fn sum_by_category(table: &Table) -> Vec<(String, f64)> {
    let config = AggregateConfig {
        groupby: vec!["category".to_string()],
        ops: vec![AggregateOp::Sum],
        fields: vec!["value".to_string()],
        output_names: vec!["total".to_string()],
        ..AggregateConfig::default()
    };
    strata::ops::aggregate::aggregate(table, &config)
        .unwrap()
        .into_iter()
        .map(|row| {
            (
                row["category"].as_str().unwrap().to_string(),
                row["total"].as_f64().unwrap(),
            )
        })
        .collect()
}

#[test]
fn test_csv_to_aggregation_scenario() {
    let mut analyzer = SchemaAnalyzer::new();
    let config = analyzer.analyze(BASIC_CSV).unwrap();

    assert_eq!(config.columns.len(), 3);
    assert_eq!(config.columns[0].committed_type(), ColumnType::Integer);
    assert_eq!(config.columns[1].committed_type(), ColumnType::String);
    assert_eq!(config.columns[2].committed_type(), ColumnType::Integer);

    let table = analyzer.build_table(BASIC_CSV, &config).unwrap();
    assert_eq!(table.row_count(), 3);

    // Groups in first-encounter order
    let totals = sum_by_category(&table);
    assert_eq!(
        totals,
        vec![("A".to_string(), 40.0), ("B".to_string(), 20.0)]
    );
}

#[test]
fn test_full_pipeline_through_files() {
    let temp_dir = TempDir::new().unwrap();
    let file_path = temp_dir.path().join("basic.strata");

    let mut analyzer = SchemaAnalyzer::new();
    let config = analyzer.analyze(BASIC_CSV).unwrap();
    let table = analyzer.build_table(BASIC_CSV, &config).unwrap();
    table.save_to_path(&file_path).unwrap();
    assert!(file_path.exists(), "File should be created");

    let loaded = Table::load_from_path(&file_path).unwrap();
    assert_eq!(loaded.row_count(), table.row_count());
    assert_eq!(sum_by_category(&loaded), sum_by_category(&table));
}

#[test]
fn test_decode_strategies_are_equivalent() {
    let mut analyzer = SchemaAnalyzer::new();
    let config = analyzer.analyze(BASIC_CSV).unwrap();
    let table = analyzer.build_table(BASIC_CSV, &config).unwrap();
    let bytes = table.to_bytes().unwrap();

    let eager = Table::from_bytes_with_strategy(&bytes, false).unwrap();
    let lazy = Table::from_bytes_with_strategy(&bytes, true).unwrap();

    for name in table.column_names() {
        assert_eq!(
            eager.get_column_dense(name).unwrap(),
            lazy.get_column_dense(name).unwrap(),
            "column '{}' should decode identically under both strategies",
            name
        );
    }
    assert_eq!(sum_by_category(&eager), sum_by_category(&lazy));
}

#[test]
fn test_bulk_and_single_cell_access_agree() {
    let mut csv = String::from("n,label\n");
    for i in 0..5_000 {
        csv.push_str(&format!("{},row_{}\n", i * 7 % 1_000, i % 50));
    }

    let mut analyzer = SchemaAnalyzer::new().with_chunk_capacity(256);
    let config = analyzer.analyze(csv.as_bytes()).unwrap();
    let table = analyzer.build_table(csv.as_bytes(), &config).unwrap();
    assert!(
        table.column("n").unwrap().chunk_count() > 1,
        "test should span multiple chunks"
    );

    let dense_n = table.get_column_dense("n").unwrap();
    let dense_label = table.get_column_dense("label").unwrap();
    for row in (0..5_000).step_by(97) {
        assert_eq!(table.get("n", row).unwrap(), dense_n[row]);
        assert_eq!(table.get("label", row).unwrap(), dense_label[row]);
    }
}

#[test]
fn test_engine_scenario_with_filter_and_sort() {
    let mut engine = Engine::new();
    let handle = engine.load_csv(BASIC_CSV, None).unwrap();

    let bitmap = engine.filter_range(handle, "value", 10.0, 25.0).unwrap();
    let filtered = engine.apply_bitmap(handle, &bitmap).unwrap();
    assert_eq!(engine.table(filtered).unwrap().row_count(), 2);

    let perm = engine
        .sort(filtered, &[SortKey::descending("value")])
        .unwrap();
    assert_eq!(perm, vec![1, 0]);

    engine.free_table(filtered).unwrap();
    engine.free_table(handle).unwrap();
    assert_eq!(engine.memory_stats().active_bytes, 0);
}

#[test]
fn test_schema_override_and_mismatch_reporting() {
    let csv = b"code,amount\n001,10\n002,20\n";

    // Numeric-looking codes forced to strings
    let mut analyzer = SchemaAnalyzer::new();
    let mut config = analyzer.analyze(csv).unwrap();
    config.override_type("code", ColumnType::String).unwrap();
    let table = analyzer.build_table(csv, &config).unwrap();
    assert_eq!(table.get_string("code", 0).unwrap(), "001");

    // A narrowing override that the data violates is reported with its cell
    let bad_csv = b"v\n1\n2\nabc\n";
    let mut analyzer = SchemaAnalyzer::new();
    let mut config = analyzer.analyze(bad_csv).unwrap();
    assert_eq!(config.columns[0].committed_type(), ColumnType::String);
    config.override_type("v", ColumnType::Integer).unwrap();

    let err = analyzer.build_table(bad_csv, &config).unwrap_err();
    match err {
        strata::EngineError::SchemaMismatch { row, column, value, .. } => {
            assert_eq!(row, 3);
            assert_eq!(column, "v");
            assert_eq!(value, "abc");
        }
        other => panic!("expected SchemaMismatch, got {}", other),
    }
}

#[test]
fn test_nullable_columns_survive_persistence() {
    let csv = b"id,score\n1,\n2,15\n3,\n";
    let mut analyzer = SchemaAnalyzer::new();
    let config = analyzer.analyze(csv).unwrap();
    assert!(config.columns[1].nullable, "empty cells should imply nullable");

    let table = analyzer.build_table(csv, &config).unwrap();
    let bytes = table.to_bytes().unwrap();
    let loaded = Table::from_bytes(&bytes).unwrap();

    assert_eq!(loaded.get_integer("score", 0).unwrap(), None);
    assert_eq!(loaded.get_integer("score", 1).unwrap(), Some(15));
    assert_eq!(loaded.get_integer("score", 2).unwrap(), None);
    assert_eq!(loaded.column("score").unwrap().valid_count().unwrap(), 1);
}

#[test]
fn test_datetime_column_round_trip() {
    let csv = b"event,at\nstart,2024-01-15T10:30:00\nstop,2024-01-15 11:00:00\n";
    let mut analyzer = SchemaAnalyzer::new();
    let config = analyzer.analyze(csv).unwrap();
    assert_eq!(config.columns[1].committed_type(), ColumnType::DateTime);

    let table = analyzer.build_table(csv, &config).unwrap();
    let loaded = Table::from_bytes(&table.to_bytes().unwrap()).unwrap();

    let start = loaded.get("at", 0).unwrap();
    let stop = loaded.get("at", 1).unwrap();
    match (start, stop) {
        (Value::DateTime(a), Value::DateTime(b)) => {
            assert_eq!(b - a, 30 * 60 * 1000, "30 minutes apart in epoch millis");
        }
        other => panic!("expected DateTime values, got {:?}", other),
    }
}

#[test]
fn test_filter_consistency_on_larger_table() {
    let mut csv = String::from("v\n");
    for i in 0..3_000 {
        csv.push_str(&format!("{}\n", (i * 31) % 500));
    }
    let mut analyzer = SchemaAnalyzer::new().with_chunk_capacity(512);
    let config = analyzer.analyze(csv.as_bytes()).unwrap();
    let table = analyzer.build_table(csv.as_bytes(), &config).unwrap();

    for (min, max) in [(0.0, 499.0), (100.0, 200.0), (600.0, 700.0)] {
        let optimized = filter::filter_range(&table, "v", min, max).unwrap();
        let naive = filter::filter_range_naive(&table, "v", min, max).unwrap();
        assert_eq!(optimized, naive, "range [{}, {}]", min, max);
    }
}

#[test]
fn test_sorted_materialization_round_trips() {
    let mut engine = Engine::new();
    let handle = engine.load_csv(BASIC_CSV, None).unwrap();
    let table = engine.table(handle).unwrap();

    let perm = sort::sort(table, &[SortKey::descending("value")]).unwrap();
    let sorted = sort::apply_permutation(table, &perm).unwrap();
    let loaded = Table::from_bytes(&sorted.to_bytes().unwrap()).unwrap();

    let values: Vec<Option<i64>> = (0..3)
        .map(|row| loaded.get_integer("value", row).unwrap())
        .collect();
    assert_eq!(values, vec![Some(30), Some(20), Some(10)]);
}
