/*
 * Copyright (c) 2025-present Dawid Pawlik
 *
 * For educational use only by employees and students of MIMUW.
 * See LICENSE file for details.
 */

//! Operator library tests over realistic multi-chunk tables, including the
//! reference fixtures for variance, ranking and quantiles, and cross-checks
//! between the full, lazy and range-partitioned aggregation paths.

use strata::ColumnType;
use strata::SchemaAnalyzer;
use strata::Table;
use strata::Value;
use strata::column::Column;
use strata::ops::aggregate::{
    self, AggregateConfig, AggregateOp, aggregate_for_chart, aggregate_lazy, aggregate_range,
    finalize_partial, merge_partials,
};
use strata::ops::filter;
use strata::ops::join::{LookupConfig, lookup};
use strata::ops::reshape::{self, PivotConfig, StackConfig, StackOffset};
use strata::ops::sort::{SortKey, apply_permutation, sort};
use strata::ops::stats;
use strata::ops::window::{WindowConfig, WindowOp, window_values};

fn table_from_csv(csv: &[u8]) -> Table {
    let mut analyzer = SchemaAnalyzer::new();
    let config = analyzer.analyze(csv).unwrap();
    analyzer.build_table(csv, &config).unwrap()
}

fn integer_column(name: &str, values: &[i64]) -> Column {
    let cells: Vec<Value> = values.iter().map(|&v| Value::Integer(v)).collect();
    Column::from_values(name, ColumnType::Integer, 64, &cells).unwrap()
}

#[test]
fn test_reference_variance_and_stdev() {
    let csv = b"v\n2\n4\n4\n4\n5\n5\n7\n9\n";
    let table = table_from_csv(csv);

    let config = AggregateConfig {
        ops: vec![
            AggregateOp::Variance,
            AggregateOp::Stdev,
            AggregateOp::Median,
            AggregateOp::Q1,
            AggregateOp::Q3,
        ],
        fields: vec!["v".to_string(); 5],
        ..AggregateConfig::default()
    };
    let rows = aggregate::aggregate(&table, &config).unwrap();

    assert!((rows[0]["variance_v"].as_f64().unwrap() - 32.0 / 7.0).abs() < 1e-9);
    assert!((rows[0]["stdev_v"].as_f64().unwrap() - (32.0f64 / 7.0).sqrt()).abs() < 1e-9);
    assert_eq!(rows[0]["median_v"].as_f64().unwrap(), 4.5);
    assert_eq!(rows[0]["q1_v"].as_f64().unwrap(), 4.0);
    assert_eq!(rows[0]["q3_v"].as_f64().unwrap(), 5.5);
}

#[test]
fn test_sql_rank_fixture() {
    let csv = b"score\n10\n10\n20\n";
    let table = table_from_csv(csv);

    let mut config = WindowConfig::new(WindowOp::Rank);
    config.sort = vec![SortKey::ascending("score")];
    let ranks = window_values(&table, &config).unwrap();
    assert_eq!(
        ranks,
        vec![Value::Integer(1), Value::Integer(1), Value::Integer(3)]
    );

    config.op = WindowOp::DenseRank;
    let dense = window_values(&table, &config).unwrap();
    assert_eq!(
        dense,
        vec![Value::Integer(1), Value::Integer(1), Value::Integer(2)]
    );
}

#[test]
fn test_partial_aggregation_matches_full_for_any_split() {
    // Nulls in both the key and the measure, spanning multiple chunks
    let mut csv = String::from("bucket,v\n");
    for i in 0..400 {
        let bucket = if i % 11 == 0 {
            String::new()
        } else {
            format!("b{}", i % 3)
        };
        let v = if i % 13 == 0 {
            String::new()
        } else {
            format!("{}", i % 29)
        };
        csv.push_str(&format!("{},{}\n", bucket, v));
    }

    let mut analyzer = SchemaAnalyzer::new().with_chunk_capacity(64);
    let schema = analyzer.analyze(csv.as_bytes()).unwrap();
    let table = analyzer.build_table(csv.as_bytes(), &schema).unwrap();
    let bytes = table.to_bytes().unwrap();

    let config = AggregateConfig {
        groupby: vec!["bucket".to_string()],
        ops: vec![
            AggregateOp::Count,
            AggregateOp::Valid,
            AggregateOp::Missing,
            AggregateOp::Sum,
            AggregateOp::Mean,
            AggregateOp::Variance,
            AggregateOp::Stdevp,
            AggregateOp::Min,
            AggregateOp::Max,
            AggregateOp::Distinct,
        ],
        fields: vec![
            "".to_string(),
            "v".to_string(),
            "v".to_string(),
            "v".to_string(),
            "v".to_string(),
            "v".to_string(),
            "v".to_string(),
            "v".to_string(),
            "v".to_string(),
            "v".to_string(),
        ],
        ..AggregateConfig::default()
    };
    let full = aggregate::aggregate(&table, &config).unwrap();

    for split in [0, 1, 63, 64, 65, 200, 399, 400] {
        let left = aggregate_range(&bytes, 0, split, &config).unwrap();
        let right = aggregate_range(&bytes, split, 400, &config).unwrap();
        let merged = finalize_partial(&merge_partials(&left, &right).unwrap());
        assert_eq!(merged, full, "split at {}", split);
    }

    // Three-way splits merge in any association order
    let a = aggregate_range(&bytes, 0, 100, &config).unwrap();
    let b = aggregate_range(&bytes, 100, 250, &config).unwrap();
    let c = aggregate_range(&bytes, 250, 400, &config).unwrap();
    let left_assoc =
        finalize_partial(&merge_partials(&merge_partials(&a, &b).unwrap(), &c).unwrap());
    let right_assoc =
        finalize_partial(&merge_partials(&a, &merge_partials(&b, &c).unwrap()).unwrap());
    assert_eq!(left_assoc, full);
    assert_eq!(right_assoc, full);
}

#[test]
fn test_lazy_chart_aggregation_over_file_bytes() {
    let csv = b"x,y,color\n1,10,r\n2,20,b\n1,30,r\n2,40,b\n";
    let table = table_from_csv(csv);
    let bytes = table.to_bytes().unwrap();

    let lazy = aggregate_lazy(&bytes, "x", Some("y"), Some("color"), AggregateOp::Mean).unwrap();
    let eager =
        aggregate_for_chart(&table, "x", Some("y"), Some("color"), AggregateOp::Mean).unwrap();

    assert_eq!(lazy.x, eager.x);
    assert_eq!(lazy.y, vec![20.0, 30.0]);
    assert_eq!(lazy.counts, vec![2, 2]);
    assert_eq!(lazy.group_names, eager.group_names);
}

#[test]
fn test_filter_sort_aggregate_pipeline() {
    let mut csv = String::from("region,amount\n");
    for i in 0..300 {
        csv.push_str(&format!("r{},{}\n", i % 4, i));
    }
    let table = table_from_csv(csv.as_bytes());

    let bitmap = filter::filter_range(&table, "amount", 100.0, 199.0).unwrap();
    assert_eq!(bitmap.count_ones(), 100);
    let filtered = filter::apply_bitmap(&table, &bitmap).unwrap();

    let perm = sort(
        &filtered,
        &[
            SortKey::ascending("region"),
            SortKey::descending("amount"),
        ],
    )
    .unwrap();
    let sorted = apply_permutation(&filtered, &perm).unwrap();

    // First row: lowest region, highest amount within it
    assert_eq!(sorted.get_string("region", 0).unwrap(), "r0");
    assert_eq!(sorted.get_integer("amount", 0).unwrap(), Some(196));

    let config = AggregateConfig {
        groupby: vec!["region".to_string()],
        ops: vec![AggregateOp::Count],
        fields: vec!["".to_string()],
        ..AggregateConfig::default()
    };
    let rows = aggregate::aggregate(&sorted, &config).unwrap();
    assert_eq!(rows.len(), 4);
    for row in &rows {
        assert_eq!(row["count"], 25);
    }
}

#[test]
fn test_lookup_then_aggregate() {
    let mut orders = Table::new();
    orders
        .add_column(integer_column("customer_id", &[1, 2, 1, 3, 2, 1]))
        .unwrap();
    orders
        .add_column(integer_column("amount", &[10, 20, 30, 40, 50, 60]))
        .unwrap();

    let mut customers = Table::new();
    customers
        .add_column(integer_column("id", &[1, 2]))
        .unwrap();
    let tiers: Vec<Value> = ["gold", "silver"]
        .iter()
        .map(|s| Value::String(s.to_string()))
        .collect();
    customers
        .add_column(Column::from_values("tier", ColumnType::String, 64, &tiers).unwrap())
        .unwrap();

    let joined = lookup(
        &orders,
        &customers,
        &LookupConfig {
            on: "customer_id".to_string(),
            from_key: "id".to_string(),
            fields: vec!["tier".to_string()],
            output_names: Vec::new(),
        },
    )
    .unwrap();

    let config = AggregateConfig {
        groupby: vec!["tier".to_string()],
        ops: vec![AggregateOp::Sum],
        fields: vec!["amount".to_string()],
        ..AggregateConfig::default()
    };
    let rows = aggregate::aggregate(&joined, &config).unwrap();

    // Customer 3 has no match; its tier is the empty string
    assert_eq!(rows.len(), 3);
    assert_eq!(rows[0]["tier"], "gold");
    assert_eq!(rows[0]["sum_amount"].as_f64().unwrap(), 100.0);
    assert_eq!(rows[1]["tier"], "silver");
    assert_eq!(rows[1]["sum_amount"].as_f64().unwrap(), 70.0);
    assert_eq!(rows[2]["tier"], "");
    assert_eq!(rows[2]["sum_amount"].as_f64().unwrap(), 40.0);
}

#[test]
fn test_fold_then_pivot_is_identity_shaped() {
    let csv = b"name,q1,q2\nann,10,20\nbob,30,40\n";
    let table = table_from_csv(csv);

    let folded = reshape::fold(
        &table,
        &["q1".to_string(), "q2".to_string()],
        None,
        None,
    )
    .unwrap();
    assert_eq!(folded.row_count(), 4);

    let back = reshape::pivot(
        &folded,
        &PivotConfig {
            groupby: vec!["name".to_string()],
            field: "key".to_string(),
            value: Some("value".to_string()),
            op: Some(AggregateOp::Sum),
        },
    )
    .unwrap();

    assert_eq!(back.row_count(), 2);
    assert_eq!(back.column_names(), vec!["name", "q1", "q2"]);
    assert_eq!(back.get_float("q1", 0).unwrap(), Some(10.0));
    assert_eq!(back.get_float("q2", 1).unwrap(), Some(40.0));
}

#[test]
fn test_stack_offsets_agree_on_totals() {
    let csv = b"x,y\n1,10\n1,30\n2,20\n";
    let table = table_from_csv(csv);

    let zero = reshape::stack(
        &table,
        &StackConfig {
            groupby: vec!["x".to_string()],
            field: "y".to_string(),
            sort: Vec::new(),
            offset: StackOffset::Zero,
        },
    )
    .unwrap();
    assert_eq!(zero.get_float("y1", 1).unwrap(), Some(40.0));

    let normalized = reshape::stack(
        &table,
        &StackConfig {
            groupby: vec!["x".to_string()],
            field: "y".to_string(),
            sort: Vec::new(),
            offset: StackOffset::Normalize,
        },
    )
    .unwrap();
    assert_eq!(normalized.get_float("y1", 1).unwrap(), Some(1.0));
    assert_eq!(normalized.get_float("y0", 1).unwrap(), Some(0.25));
}

#[test]
fn test_binning_and_quantiles_on_csv_data() {
    let mut csv = String::from("v\n");
    for i in 0..200 {
        csv.push_str(&format!("{}\n", i));
    }
    let table = table_from_csv(csv.as_bytes());

    let binned = stats::bin(&table, "v", 10).unwrap();
    // span 199 over 10 bins -> step 20
    assert_eq!(binned.get_float("bin0", 0).unwrap(), Some(0.0));
    assert_eq!(binned.get_float("bin1", 0).unwrap(), Some(20.0));
    assert_eq!(binned.get_float("bin0", 199).unwrap(), Some(180.0));

    let quantiles = stats::quantile(&table, "v", &[0.5, 0.9]).unwrap();
    assert_eq!(quantiles[0].1, 99.5);
    assert!((quantiles[1].1 - 179.1).abs() < 1e-9);
}

#[test]
fn test_seeded_sampling_is_reproducible_across_tables() {
    let mut csv = String::from("v\n");
    for i in 0..500 {
        csv.push_str(&format!("{}\n", i));
    }
    let table = table_from_csv(csv.as_bytes());

    let first = stats::sample(&table, 50, Some(1234)).unwrap();
    let second = stats::sample(&table, 50, Some(1234)).unwrap();
    let different = stats::sample(&table, 50, Some(99)).unwrap();

    assert_eq!(
        first.get_column_dense("v").unwrap(),
        second.get_column_dense("v").unwrap()
    );
    assert_ne!(
        first.get_column_dense("v").unwrap(),
        different.get_column_dense("v").unwrap()
    );
}

#[test]
fn test_running_window_over_multi_chunk_table() {
    let mut csv = String::from("g,v\n");
    for i in 0..300 {
        csv.push_str(&format!("g{},{}\n", i % 2, 1));
    }
    let mut analyzer = SchemaAnalyzer::new().with_chunk_capacity(64);
    let schema = analyzer.analyze(csv.as_bytes()).unwrap();
    let table = analyzer.build_table(csv.as_bytes(), &schema).unwrap();

    let mut config = WindowConfig::new(WindowOp::Sum);
    config.groupby = vec!["g".to_string()];
    config.sort = vec![SortKey::ascending("v")];
    config.field = Some("v".to_string());
    let sums = window_values(&table, &config).unwrap();

    // Constant v: within each group the running sum orders by input position
    assert_eq!(sums[0], Value::Float(1.0));
    assert_eq!(sums[1], Value::Float(1.0));
    assert_eq!(sums[2], Value::Float(2.0));
    assert_eq!(sums[298], Value::Float(150.0));
    assert_eq!(sums[299], Value::Float(150.0));
}
