/*
 * Copyright (c) 2025-present Dawid Pawlik
 *
 * For educational use only by employees and students of MIMUW.
 * See LICENSE file for details.
 */

//! # Window functions
//!
//! Rows partition by the group-by key and are ordered within each partition
//! by the sort keys; the op computes one value per row in that order and the
//! results scatter back to original row positions. Ranking ops follow SQL
//! semantics (`rank` leaves gaps after ties, `dense_rank` does not). The
//! aggregate ops run over a sliding frame `[lo, hi]` of row offsets relative
//! to the current row, `null` meaning unbounded on that side; the default
//! frame `[null, 0]` is the running prefix.

use crate::ColumnType;
use crate::Table;
use crate::Value;
use crate::chunk::DEFAULT_CHUNK_CAPACITY;
use crate::column::Column;
use crate::error::EngineError;
use crate::error::Result;
use crate::ops::aggregate::AggregateOp;
use crate::ops::aggregate::compute_numeric;
use crate::ops::aggregate::group_rows;
use crate::ops::sort::SortKey;
use crate::ops::sort::compare_with_direction;
use serde::Deserialize;
use serde::Serialize;
use std::cmp::Ordering;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WindowOp {
    RowNumber,
    Rank,
    DenseRank,
    PercentRank,
    CumeDist,
    Ntile,
    Lag,
    Lead,
    FirstValue,
    LastValue,
    Count,
    Valid,
    Missing,
    Sum,
    Mean,
    Variance,
    Variancep,
    Stdev,
    Stdevp,
    Median,
    Q1,
    Q3,
    Min,
    Max,
}

impl WindowOp {
    /// Ranking ops derive from row position alone
    fn is_ranking(self) -> bool {
        matches!(
            self,
            WindowOp::RowNumber
                | WindowOp::Rank
                | WindowOp::DenseRank
                | WindowOp::PercentRank
                | WindowOp::CumeDist
                | WindowOp::Ntile
        )
    }

    /// Ops that copy a field value from another row of the partition/frame
    fn is_positional(self) -> bool {
        matches!(
            self,
            WindowOp::Lag | WindowOp::Lead | WindowOp::FirstValue | WindowOp::LastValue
        )
    }

    fn aggregate_op(self) -> Option<AggregateOp> {
        match self {
            WindowOp::Sum => Some(AggregateOp::Sum),
            WindowOp::Mean => Some(AggregateOp::Mean),
            WindowOp::Variance => Some(AggregateOp::Variance),
            WindowOp::Variancep => Some(AggregateOp::Variancep),
            WindowOp::Stdev => Some(AggregateOp::Stdev),
            WindowOp::Stdevp => Some(AggregateOp::Stdevp),
            WindowOp::Median => Some(AggregateOp::Median),
            WindowOp::Q1 => Some(AggregateOp::Q1),
            WindowOp::Q3 => Some(AggregateOp::Q3),
            WindowOp::Min => Some(AggregateOp::Min),
            WindowOp::Max => Some(AggregateOp::Max),
            _ => None,
        }
    }

    fn name(self) -> &'static str {
        match self {
            WindowOp::RowNumber => "row_number",
            WindowOp::Rank => "rank",
            WindowOp::DenseRank => "dense_rank",
            WindowOp::PercentRank => "percent_rank",
            WindowOp::CumeDist => "cume_dist",
            WindowOp::Ntile => "ntile",
            WindowOp::Lag => "lag",
            WindowOp::Lead => "lead",
            WindowOp::FirstValue => "first_value",
            WindowOp::LastValue => "last_value",
            WindowOp::Count => "count",
            WindowOp::Valid => "valid",
            WindowOp::Missing => "missing",
            WindowOp::Sum => "sum",
            WindowOp::Mean => "mean",
            WindowOp::Variance => "variance",
            WindowOp::Variancep => "variancep",
            WindowOp::Stdev => "stdev",
            WindowOp::Stdevp => "stdevp",
            WindowOp::Median => "median",
            WindowOp::Q1 => "q1",
            WindowOp::Q3 => "q3",
            WindowOp::Min => "min",
            WindowOp::Max => "max",
        }
    }
}

impl fmt::Display for WindowOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct WindowConfig {
    #[serde(default)]
    pub groupby: Vec<String>,
    #[serde(default)]
    pub sort: Vec<SortKey>,
    pub op: WindowOp,
    #[serde(default)]
    pub field: Option<String>,
    #[serde(default, rename = "as")]
    pub output_name: Option<String>,
    /// `[lo, hi]` row offsets; a `None` start is unbounded preceding and a
    /// `None` end is the current row
    #[serde(default = "default_frame")]
    pub frame: [Option<i64>; 2],
    /// Tile count for ntile (default 4), offset for lag/lead (default 1)
    #[serde(default)]
    pub param: Option<i64>,
}

fn default_frame() -> [Option<i64>; 2] {
    [None, Some(0)]
}

impl WindowConfig {
    pub fn new(op: WindowOp) -> Self {
        WindowConfig {
            groupby: Vec::new(),
            sort: Vec::new(),
            op,
            field: None,
            output_name: None,
            frame: default_frame(),
            param: None,
        }
    }

    fn resolved_output_name(&self) -> String {
        if let Some(name) = &self.output_name {
            return name.clone();
        }
        match &self.field {
            Some(field) => format!("{}_{}", self.op, field),
            None => self.op.to_string(),
        }
    }
}

/// Compute the window column and return a new table with it appended
pub fn window(table: &Table, config: &WindowConfig) -> Result<Table> {
    let values = window_values(table, config)?;
    let column_type = output_column_type(table, config)?;
    let capacity = table
        .columns()
        .first()
        .map(|c| c.chunk_capacity())
        .unwrap_or(DEFAULT_CHUNK_CAPACITY);

    let mut out = table.clone();
    out.add_column(Column::from_values(
        config.resolved_output_name(),
        column_type,
        capacity,
        &values,
    )?)?;
    Ok(out)
}

/// Compute the window column as values in original row order
pub fn window_values(table: &Table, config: &WindowConfig) -> Result<Vec<Value>> {
    let field_values = validate(table, config)?;

    let key_columns: Vec<Vec<Value>> = config
        .groupby
        .iter()
        .map(|name| table.get_column_dense(name))
        .collect::<Result<_>>()?;
    let sort_columns: Vec<Vec<Value>> = config
        .sort
        .iter()
        .map(|key| table.get_column_dense(&key.field))
        .collect::<Result<_>>()?;

    let (_, groups) = group_rows(&key_columns, table.row_count());
    let mut out = vec![Value::Null; table.row_count()];

    for members in &groups {
        let mut order = members.clone();
        order.sort_by(|&a, &b| compare_rows(&sort_columns, &config.sort, a, b));

        let partition = Partition {
            order: &order,
            sort_columns: &sort_columns,
            sort_keys: &config.sort,
            field_values: field_values.as_deref(),
        };
        partition.compute(config, &mut out)?;
    }

    Ok(out)
}

fn validate(table: &Table, config: &WindowConfig) -> Result<Option<Vec<Value>>> {
    let needs_field = config.op.is_positional()
        || config.op.aggregate_op().is_some()
        || matches!(config.op, WindowOp::Valid | WindowOp::Missing);
    if needs_field && config.field.is_none() {
        return Err(EngineError::invalid_config(format!(
            "Window op '{}' requires a field",
            config.op
        )));
    }

    let Some(field) = &config.field else {
        return Ok(None);
    };
    let column_type = table.column_type(field)?;
    if config.op.aggregate_op().is_some() && !column_type.is_numeric() {
        return Err(EngineError::Type {
            field: field.clone(),
            op: config.op.to_string(),
            expected: "a numeric column".to_string(),
            actual: column_type.to_string(),
        });
    }
    Ok(Some(table.get_column_dense(field)?))
}

fn compare_rows(sort_columns: &[Vec<Value>], keys: &[SortKey], a: usize, b: usize) -> Ordering {
    for (column, key) in sort_columns.iter().zip(keys) {
        let ord = compare_with_direction(&column[a], &column[b], key.ascending);
        if ord != Ordering::Equal {
            return ord;
        }
    }
    Ordering::Equal
}

/// One sorted partition with everything needed to evaluate the op
struct Partition<'a> {
    order: &'a [usize],
    sort_columns: &'a [Vec<Value>],
    sort_keys: &'a [SortKey],
    field_values: Option<&'a [Value]>,
}

impl Partition<'_> {
    fn compute(&self, config: &WindowConfig, out: &mut [Value]) -> Result<()> {
        let n = self.order.len();
        if n == 0 {
            return Ok(());
        }

        if config.op.is_ranking() {
            return self.compute_ranking(config, out);
        }
        if config.op.is_positional() {
            return self.compute_positional(config, out);
        }
        self.compute_frame_aggregate(config, out)
    }

    /// For each sorted position, the exclusive end of its peer group; with
    /// no sort keys every row is a peer of every other
    fn peer_ends(&self) -> Vec<usize> {
        let n = self.order.len();
        if self.sort_keys.is_empty() {
            return vec![n; n];
        }

        let mut ends = vec![0usize; n];
        let mut start = 0;
        while start < n {
            let mut end = start + 1;
            while end < n
                && compare_rows(
                    self.sort_columns,
                    self.sort_keys,
                    self.order[start],
                    self.order[end],
                ) == Ordering::Equal
            {
                end += 1;
            }
            for i in start..end {
                ends[i] = end;
            }
            start = end;
        }
        ends
    }

    fn compute_ranking(&self, config: &WindowConfig, out: &mut [Value]) -> Result<()> {
        let n = self.order.len();
        let ends = self.peer_ends();

        let mut rank = vec![0usize; n];
        let mut dense = vec![0usize; n];
        let mut dense_value = 0;
        let mut start = 0;
        while start < n {
            let end = ends[start];
            dense_value += 1;
            for i in start..end {
                rank[i] = start + 1;
                dense[i] = dense_value;
            }
            start = end;
        }

        for (i, &row) in self.order.iter().enumerate() {
            out[row] = match config.op {
                WindowOp::RowNumber => Value::Integer(i as i64 + 1),
                WindowOp::Rank => Value::Integer(rank[i] as i64),
                WindowOp::DenseRank => Value::Integer(dense[i] as i64),
                WindowOp::PercentRank => {
                    if n == 1 {
                        Value::Float(0.0)
                    } else {
                        Value::Float((rank[i] - 1) as f64 / (n - 1) as f64)
                    }
                }
                WindowOp::CumeDist => Value::Float(ends[i] as f64 / n as f64),
                WindowOp::Ntile => {
                    let tiles = config.param.unwrap_or(4);
                    if tiles <= 0 {
                        return Err(EngineError::invalid_config(format!(
                            "ntile requires a positive tile count, got {}",
                            tiles
                        )));
                    }
                    Value::Integer(((i + 1) * tiles as usize).div_ceil(n) as i64)
                }
                _ => unreachable!(),
            };
        }
        Ok(())
    }

    fn compute_positional(&self, config: &WindowConfig, out: &mut [Value]) -> Result<()> {
        let n = self.order.len();
        let values = self.require_field(config)?;

        for (i, &row) in self.order.iter().enumerate() {
            let source = match config.op {
                WindowOp::Lag => i as i64 - config.param.unwrap_or(1),
                WindowOp::Lead => i as i64 + config.param.unwrap_or(1),
                WindowOp::FirstValue => frame_bounds(config.frame, i, n).0 as i64,
                WindowOp::LastValue => frame_bounds(config.frame, i, n).1 as i64,
                _ => unreachable!(),
            };
            out[row] = if source >= 0 && (source as usize) < n {
                values[self.order[source as usize]].clone()
            } else {
                Value::Null
            };
        }
        Ok(())
    }

    fn compute_frame_aggregate(&self, config: &WindowConfig, out: &mut [Value]) -> Result<()> {
        let n = self.order.len();

        for (i, &row) in self.order.iter().enumerate() {
            let (lo, hi) = frame_bounds(config.frame, i, n);
            let frame_rows = &self.order[lo..=hi];

            out[row] = match config.op {
                WindowOp::Count => Value::Integer(frame_rows.len() as i64),
                WindowOp::Valid | WindowOp::Missing => {
                    let values = self.require_field(config)?;
                    let nulls = frame_rows.iter().filter(|&&r| values[r].is_null()).count();
                    let count = if config.op == WindowOp::Missing {
                        nulls
                    } else {
                        frame_rows.len() - nulls
                    };
                    Value::Integer(count as i64)
                }
                op => {
                    let values = self.require_field(config)?;
                    let numeric: Vec<f64> = frame_rows
                        .iter()
                        .filter_map(|&r| values[r].as_f64())
                        .collect();
                    let aggregate_op = op.aggregate_op().ok_or_else(|| {
                        EngineError::invalid_config(format!(
                            "'{}' is not a window aggregate",
                            op
                        ))
                    })?;
                    match compute_numeric(aggregate_op, &numeric) {
                        Some(v) => Value::Float(v),
                        None => Value::Null,
                    }
                }
            };
        }
        Ok(())
    }

    fn require_field(&self, config: &WindowConfig) -> Result<&[Value]> {
        self.field_values.ok_or_else(|| {
            EngineError::invalid_config(format!("Window op '{}' requires a field", config.op))
        })
    }
}

fn frame_bounds(frame: [Option<i64>; 2], i: usize, n: usize) -> (usize, usize) {
    let last = n as i64 - 1;
    let lo = match frame[0] {
        Some(offset) => (i as i64).saturating_add(offset).clamp(0, last) as usize,
        None => 0,
    };
    let hi = match frame[1] {
        Some(offset) => (i as i64).saturating_add(offset).clamp(0, last) as usize,
        None => i,
    };
    (lo.min(hi), hi.max(lo))
}

fn output_column_type(table: &Table, config: &WindowConfig) -> Result<ColumnType> {
    let column_type = match config.op {
        WindowOp::RowNumber
        | WindowOp::Rank
        | WindowOp::DenseRank
        | WindowOp::Ntile
        | WindowOp::Count
        | WindowOp::Valid
        | WindowOp::Missing => ColumnType::Integer,
        WindowOp::Lag | WindowOp::Lead | WindowOp::FirstValue | WindowOp::LastValue => {
            match &config.field {
                Some(field) => table.column_type(field)?,
                None => ColumnType::Float,
            }
        }
        _ => ColumnType::Float,
    };
    Ok(column_type)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scores_table() -> Table {
        // Two groups; group "a" has a tie at 10
        let groups: Vec<Value> = ["a", "a", "a", "b", "b"]
            .iter()
            .map(|s| Value::String(s.to_string()))
            .collect();
        let scores: Vec<Value> = [10, 10, 20, 5, 15]
            .iter()
            .map(|&v| Value::Integer(v))
            .collect();

        let mut table = Table::new();
        table
            .add_column(Column::from_values("g", ColumnType::String, 64, &groups).unwrap())
            .unwrap();
        table
            .add_column(Column::from_values("score", ColumnType::Integer, 64, &scores).unwrap())
            .unwrap();
        table
    }

    fn config(op: WindowOp) -> WindowConfig {
        WindowConfig {
            groupby: vec!["g".to_string()],
            sort: vec![SortKey::ascending("score")],
            ..WindowConfig::new(op)
        }
    }

    #[test]
    fn test_rank_leaves_gaps_and_dense_rank_does_not() {
        let table = scores_table();

        let ranks = window_values(&table, &config(WindowOp::Rank)).unwrap();
        assert_eq!(
            ranks,
            vec![
                Value::Integer(1),
                Value::Integer(1),
                Value::Integer(3),
                Value::Integer(1),
                Value::Integer(2),
            ]
        );

        let dense = window_values(&table, &config(WindowOp::DenseRank)).unwrap();
        assert_eq!(
            dense,
            vec![
                Value::Integer(1),
                Value::Integer(1),
                Value::Integer(2),
                Value::Integer(1),
                Value::Integer(2),
            ]
        );
    }

    #[test]
    fn test_row_number_breaks_ties_by_input_order() {
        let table = scores_table();
        let numbers = window_values(&table, &config(WindowOp::RowNumber)).unwrap();
        assert_eq!(
            numbers,
            vec![
                Value::Integer(1),
                Value::Integer(2),
                Value::Integer(3),
                Value::Integer(1),
                Value::Integer(2),
            ]
        );
    }

    #[test]
    fn test_percent_rank_and_cume_dist() {
        let table = scores_table();

        let percent = window_values(&table, &config(WindowOp::PercentRank)).unwrap();
        assert_eq!(percent[0], Value::Float(0.0));
        assert_eq!(percent[2], Value::Float(1.0));

        let cume = window_values(&table, &config(WindowOp::CumeDist)).unwrap();
        // In group "a" the 10-tie covers 2 of 3 rows
        assert_eq!(cume[0], Value::Float(2.0 / 3.0));
        assert_eq!(cume[1], Value::Float(2.0 / 3.0));
        assert_eq!(cume[2], Value::Float(1.0));
    }

    #[test]
    fn test_running_sum_with_default_frame() {
        let table = scores_table();
        let mut cfg = config(WindowOp::Sum);
        cfg.field = Some("score".to_string());

        let sums = window_values(&table, &cfg).unwrap();
        assert_eq!(sums[0], Value::Float(10.0));
        assert_eq!(sums[1], Value::Float(20.0));
        assert_eq!(sums[2], Value::Float(40.0));
        assert_eq!(sums[3], Value::Float(5.0));
        assert_eq!(sums[4], Value::Float(20.0));
    }

    #[test]
    fn test_open_frame_end_means_current_row() {
        let values: Vec<Value> = [1, 2, 3].iter().map(|&v| Value::Integer(v)).collect();
        let mut table = Table::new();
        table
            .add_column(Column::from_values("v", ColumnType::Integer, 64, &values).unwrap())
            .unwrap();

        let mut cfg = WindowConfig::new(WindowOp::Sum);
        cfg.sort = vec![SortKey::ascending("v")];
        cfg.field = Some("v".to_string());
        cfg.frame = [None, None];

        // A null frame end is the current row, so this stays a running sum
        // rather than a whole-partition aggregate
        let sums = window_values(&table, &cfg).unwrap();
        assert_eq!(
            sums,
            vec![Value::Float(1.0), Value::Float(3.0), Value::Float(6.0)]
        );
    }

    #[test]
    fn test_centered_moving_mean() {
        let values: Vec<Value> = [1, 2, 3, 4, 5].iter().map(|&v| Value::Integer(v)).collect();
        let mut table = Table::new();
        table
            .add_column(Column::from_values("v", ColumnType::Integer, 64, &values).unwrap())
            .unwrap();

        let mut cfg = WindowConfig::new(WindowOp::Mean);
        cfg.sort = vec![SortKey::ascending("v")];
        cfg.field = Some("v".to_string());
        cfg.frame = [Some(-1), Some(1)];

        let means = window_values(&table, &cfg).unwrap();
        // Edges clamp to the partition
        assert_eq!(means[0], Value::Float(1.5));
        assert_eq!(means[1], Value::Float(2.0));
        assert_eq!(means[2], Value::Float(3.0));
        assert_eq!(means[4], Value::Float(4.5));
    }

    #[test]
    fn test_lag_and_lead_null_at_boundaries() {
        let table = scores_table();
        let mut cfg = config(WindowOp::Lag);
        cfg.field = Some("score".to_string());

        let lagged = window_values(&table, &cfg).unwrap();
        assert_eq!(lagged[0], Value::Null);
        assert_eq!(lagged[1], Value::Integer(10));
        assert_eq!(lagged[2], Value::Integer(10));
        assert_eq!(lagged[3], Value::Null);
        assert_eq!(lagged[4], Value::Integer(5));

        let mut cfg = config(WindowOp::Lead);
        cfg.field = Some("score".to_string());
        let led = window_values(&table, &cfg).unwrap();
        assert_eq!(led[2], Value::Null);
        assert_eq!(led[3], Value::Integer(15));
        assert_eq!(led[4], Value::Null);
    }

    #[test]
    fn test_ntile_splits_evenly() {
        let values: Vec<Value> = (1..=8).map(Value::Integer).collect();
        let mut table = Table::new();
        table
            .add_column(Column::from_values("v", ColumnType::Integer, 64, &values).unwrap())
            .unwrap();

        let mut cfg = WindowConfig::new(WindowOp::Ntile);
        cfg.sort = vec![SortKey::ascending("v")];
        cfg.param = Some(4);

        let tiles = window_values(&table, &cfg).unwrap();
        let expected: Vec<Value> = [1, 1, 2, 2, 3, 3, 4, 4]
            .iter()
            .map(|&v| Value::Integer(v))
            .collect();
        assert_eq!(tiles, expected);
    }

    #[test]
    fn test_window_appends_column() {
        let table = scores_table();
        let mut cfg = config(WindowOp::Rank);
        cfg.output_name = Some("score_rank".to_string());

        let out = window(&table, &cfg).unwrap();
        assert_eq!(out.column_count(), 3);
        assert_eq!(out.get_integer("score_rank", 2).unwrap(), Some(3));
        // The input table is untouched
        assert_eq!(table.column_count(), 2);
    }

    #[test]
    fn test_aggregate_on_string_field_is_type_error() {
        let table = scores_table();
        let mut cfg = config(WindowOp::Sum);
        cfg.field = Some("g".to_string());
        assert!(matches!(
            window_values(&table, &cfg),
            Err(EngineError::Type { .. })
        ));
    }

    #[test]
    fn test_missing_field_rejected() {
        let table = scores_table();
        let cfg = config(WindowOp::Sum);
        assert!(matches!(
            window_values(&table, &cfg),
            Err(EngineError::InvalidConfig { .. })
        ));
    }
}
