/*
 * Copyright (c) 2025-present Dawid Pawlik
 *
 * For educational use only by employees and students of MIMUW.
 * See LICENSE file for details.
 */

//! # Grouped aggregation
//!
//! Rows group by the tuple of group-by column values (by-value key equality;
//! Null forms its own group), and each requested `(op, field)` measure is
//! computed per group. Output rows come back in first-encountered group order
//! as JSON row objects — the shape host collaborators expect on non-bulk
//! paths. The `cross` flag expands to the full cartesian product of group-by
//! domains including empty groups; `drop` removes groups with a Null key.
//!
//! Three more paths share the same formulas: chart-oriented aggregation
//! returning typed parallel arrays, a lazy variant over raw file bytes that
//! only decompresses the chunks of the columns it needs, and range-partitioned
//! partial aggregation whose results merge associatively so an external
//! scheduler can fan work out across threads or processes. There is exactly
//! one implementation of each formula here — every path goes through
//! [`NumericStats`] and [`quantile_sorted`].

use crate::Table;
use crate::Value;
use crate::error::EngineError;
use crate::error::Result;
use crate::ops::Key;
use crate::ops::value_to_json;
use serde::Deserialize;
use serde::Serialize;
use std::collections::HashMap;
use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;
use tracing::debug;

pub type JsonRow = serde_json::Map<String, serde_json::Value>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AggregateOp {
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
    Distinct,
    Values,
}

impl AggregateOp {
    /// Ops that only make sense over numeric (or datetime) fields
    pub fn numeric_only(self) -> bool {
        matches!(
            self,
            AggregateOp::Sum
                | AggregateOp::Mean
                | AggregateOp::Variance
                | AggregateOp::Variancep
                | AggregateOp::Stdev
                | AggregateOp::Stdevp
                | AggregateOp::Median
                | AggregateOp::Q1
                | AggregateOp::Q3
                | AggregateOp::Min
                | AggregateOp::Max
        )
    }

    /// Ops whose partial results merge associatively across row ranges
    pub fn mergeable(self) -> bool {
        !matches!(
            self,
            AggregateOp::Median | AggregateOp::Q1 | AggregateOp::Q3 | AggregateOp::Values
        )
    }

    fn name(self) -> &'static str {
        match self {
            AggregateOp::Count => "count",
            AggregateOp::Valid => "valid",
            AggregateOp::Missing => "missing",
            AggregateOp::Sum => "sum",
            AggregateOp::Mean => "mean",
            AggregateOp::Variance => "variance",
            AggregateOp::Variancep => "variancep",
            AggregateOp::Stdev => "stdev",
            AggregateOp::Stdevp => "stdevp",
            AggregateOp::Median => "median",
            AggregateOp::Q1 => "q1",
            AggregateOp::Q3 => "q3",
            AggregateOp::Min => "min",
            AggregateOp::Max => "max",
            AggregateOp::Distinct => "distinct",
            AggregateOp::Values => "values",
        }
    }
}

impl fmt::Display for AggregateOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl FromStr for AggregateOp {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "count" => Ok(AggregateOp::Count),
            "valid" => Ok(AggregateOp::Valid),
            "missing" => Ok(AggregateOp::Missing),
            "sum" => Ok(AggregateOp::Sum),
            "mean" | "average" => Ok(AggregateOp::Mean),
            "variance" => Ok(AggregateOp::Variance),
            "variancep" => Ok(AggregateOp::Variancep),
            "stdev" => Ok(AggregateOp::Stdev),
            "stdevp" => Ok(AggregateOp::Stdevp),
            "median" => Ok(AggregateOp::Median),
            "q1" => Ok(AggregateOp::Q1),
            "q3" => Ok(AggregateOp::Q3),
            "min" => Ok(AggregateOp::Min),
            "max" => Ok(AggregateOp::Max),
            "distinct" => Ok(AggregateOp::Distinct),
            "values" => Ok(AggregateOp::Values),
            other => Err(EngineError::invalid_config(format!(
                "Unknown aggregation op '{}'",
                other
            ))),
        }
    }
}

/// Aggregation request: parallel `ops`/`fields`/`as` arrays plus group-by
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AggregateConfig {
    #[serde(default)]
    pub groupby: Vec<String>,
    #[serde(default)]
    pub ops: Vec<AggregateOp>,
    #[serde(default)]
    pub fields: Vec<String>,
    #[serde(default, rename = "as")]
    pub output_names: Vec<String>,
    #[serde(default)]
    pub cross: bool,
    #[serde(default)]
    pub drop: bool,
}

/// One resolved `(op, field) -> output` measure
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MeasureSpec {
    pub op: AggregateOp,
    pub field: String,
    pub output: String,
}

impl AggregateConfig {
    /// Validate the parallel arrays and resolve output names
    pub fn resolve(&self) -> Result<Vec<MeasureSpec>> {
        if self.ops.len() != self.fields.len() {
            return Err(EngineError::invalid_config(format!(
                "Mismatched ops/fields lengths: {} vs {}",
                self.ops.len(),
                self.fields.len()
            )));
        }
        if !self.output_names.is_empty() && self.output_names.len() != self.ops.len() {
            return Err(EngineError::invalid_config(format!(
                "Mismatched ops/as lengths: {} vs {}",
                self.ops.len(),
                self.output_names.len()
            )));
        }

        let mut measures = Vec::with_capacity(self.ops.len());
        for (i, (&op, field)) in self.ops.iter().zip(&self.fields).enumerate() {
            if field.is_empty() && op != AggregateOp::Count {
                return Err(EngineError::invalid_config(format!(
                    "Op '{}' requires a field",
                    op
                )));
            }
            let output = self
                .output_names
                .get(i)
                .cloned()
                .unwrap_or_else(|| default_output_name(op, field));
            measures.push(MeasureSpec {
                op,
                field: field.clone(),
                output,
            });
        }
        Ok(measures)
    }
}

fn default_output_name(op: AggregateOp, field: &str) -> String {
    if field.is_empty() {
        op.to_string()
    } else {
        format!("{}_{}", op, field)
    }
}

// ====== Canonical numeric formulas ======

/// Associative numeric accumulator: count plus sum and sum of squares
///
/// This is the single implementation behind full, chart, windowed and
/// partial aggregation; the variance family computes from (valid, sum,
/// sum_sq) so partials merge exactly.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct NumericStats {
    pub valid: u64,
    pub sum: f64,
    pub sum_sq: f64,
    pub min: f64,
    pub max: f64,
}

impl Default for NumericStats {
    fn default() -> Self {
        NumericStats {
            valid: 0,
            sum: 0.0,
            sum_sq: 0.0,
            min: f64::INFINITY,
            max: f64::NEG_INFINITY,
        }
    }
}

impl NumericStats {
    pub fn push(&mut self, v: f64) {
        self.valid += 1;
        self.sum += v;
        self.sum_sq += v * v;
        self.min = self.min.min(v);
        self.max = self.max.max(v);
    }

    /// Count a non-null value, accumulating sums when it is numeric
    pub fn observe(&mut self, value: &Value) {
        if value.is_null() {
            return;
        }
        match value.as_f64() {
            Some(v) => self.push(v),
            None => self.valid += 1,
        }
    }

    pub fn merge(&mut self, other: &NumericStats) {
        self.valid += other.valid;
        self.sum += other.sum;
        self.sum_sq += other.sum_sq;
        self.min = self.min.min(other.min);
        self.max = self.max.max(other.max);
    }

    pub fn mean(&self) -> Option<f64> {
        (self.valid > 0).then(|| self.sum / self.valid as f64)
    }

    pub fn min_value(&self) -> Option<f64> {
        (self.valid > 0).then_some(self.min)
    }

    pub fn max_value(&self) -> Option<f64> {
        (self.valid > 0).then_some(self.max)
    }

    /// Sample (ddof = 1) or population (ddof = 0) variance
    pub fn variance(&self, ddof: u64) -> Option<f64> {
        if self.valid <= ddof {
            return None;
        }
        let n = self.valid as f64;
        let raw = (self.sum_sq - self.sum * self.sum / n) / (n - ddof as f64);
        Some(raw.max(0.0))
    }

    pub fn stdev(&self, ddof: u64) -> Option<f64> {
        self.variance(ddof).map(f64::sqrt)
    }
}

/// Linear-interpolation quantile over a sorted slice: index = p·(n−1)
pub fn quantile_sorted(sorted: &[f64], p: f64) -> Option<f64> {
    if sorted.is_empty() {
        return None;
    }
    let index = p * (sorted.len() - 1) as f64;
    let lo = index.floor() as usize;
    let hi = index.ceil() as usize;
    if lo == hi {
        return Some(sorted[lo]);
    }
    Some(sorted[lo] * (hi as f64 - index) + sorted[hi] * (index - lo as f64))
}

/// One canonical numeric computation per op; `None` means no valid input
pub(crate) fn compute_numeric(op: AggregateOp, values: &[f64]) -> Option<f64> {
    let mut stats = NumericStats::default();
    for &v in values {
        stats.push(v);
    }

    match op {
        AggregateOp::Count | AggregateOp::Valid => Some(values.len() as f64),
        AggregateOp::Missing => Some(0.0),
        AggregateOp::Sum => (stats.valid > 0).then_some(stats.sum),
        AggregateOp::Mean => stats.mean(),
        AggregateOp::Min => stats.min_value(),
        AggregateOp::Max => stats.max_value(),
        AggregateOp::Variance => stats.variance(1),
        AggregateOp::Variancep => stats.variance(0),
        AggregateOp::Stdev => stats.stdev(1),
        AggregateOp::Stdevp => stats.stdev(0),
        AggregateOp::Median | AggregateOp::Q1 | AggregateOp::Q3 => {
            let mut sorted = values.to_vec();
            sorted.sort_by(|a, b| crate::ops::compare_f64(*a, *b));
            let p = match op {
                AggregateOp::Q1 => 0.25,
                AggregateOp::Q3 => 0.75,
                _ => 0.5,
            };
            quantile_sorted(&sorted, p)
        }
        AggregateOp::Distinct | AggregateOp::Values => None,
    }
}

// ====== Grouping ======

/// Group rows by key tuple; keys come back in first-encountered order
pub(crate) fn group_rows(
    key_columns: &[Vec<Value>],
    row_count: usize,
) -> (Vec<Vec<Key>>, Vec<Vec<usize>>) {
    if key_columns.is_empty() {
        return (vec![Vec::new()], vec![(0..row_count).collect()]);
    }

    let mut index: HashMap<Vec<Key>, usize> = HashMap::new();
    let mut keys: Vec<Vec<Key>> = Vec::new();
    let mut groups: Vec<Vec<usize>> = Vec::new();

    for row in 0..row_count {
        let key: Vec<Key> = key_columns
            .iter()
            .map(|column| Key::from_value(&column[row]))
            .collect();
        let slot = *index.entry(key.clone()).or_insert_with(|| {
            keys.push(key);
            groups.push(Vec::new());
            keys.len() - 1
        });
        groups[slot].push(row);
    }

    (keys, groups)
}

/// Expand to the full cartesian product of per-column observed domains
fn cross_groups(
    key_columns: &[Vec<Value>],
    keys: Vec<Vec<Key>>,
    groups: Vec<Vec<usize>>,
) -> (Vec<Vec<Key>>, Vec<Vec<usize>>) {
    let domains: Vec<Vec<Key>> = key_columns
        .iter()
        .map(|column| {
            let mut seen = HashSet::new();
            let mut domain = Vec::new();
            for value in column {
                let key = Key::from_value(value);
                if seen.insert(key.clone()) {
                    domain.push(key);
                }
            }
            domain
        })
        .collect();

    let index: HashMap<&Vec<Key>, usize> =
        keys.iter().enumerate().map(|(i, k)| (k, i)).collect();

    let mut out_keys = Vec::new();
    let mut out_groups = Vec::new();
    let mut cursor = vec![0usize; domains.len()];

    'product: loop {
        let key: Vec<Key> = cursor
            .iter()
            .zip(&domains)
            .map(|(&i, domain)| domain[i].clone())
            .collect();
        let members = index
            .get(&key)
            .map(|&slot| groups[slot].clone())
            .unwrap_or_default();
        out_keys.push(key);
        out_groups.push(members);

        // Advance odometer, last column fastest
        for position in (0..cursor.len()).rev() {
            cursor[position] += 1;
            if cursor[position] < domains[position].len() {
                continue 'product;
            }
            cursor[position] = 0;
            if position == 0 {
                break 'product;
            }
        }
    }

    (out_keys, out_groups)
}

// ====== Full aggregation ======

/// Grouped aggregation over a table, returning JSON row objects
pub fn aggregate(table: &Table, config: &AggregateConfig) -> Result<Vec<JsonRow>> {
    let measures = config.resolve()?;
    validate_field_types(table, &measures)?;

    let key_columns: Vec<Vec<Value>> = config
        .groupby
        .iter()
        .map(|name| table.get_column_dense(name))
        .collect::<Result<_>>()?;
    let field_data = load_fields(table, &measures)?;

    let (mut keys, mut groups) = group_rows(&key_columns, table.row_count());
    if config.cross && !key_columns.is_empty() {
        (keys, groups) = cross_groups(&key_columns, keys, groups);
    }

    let mut rows = Vec::with_capacity(keys.len());
    for (key, members) in keys.iter().zip(&groups) {
        if config.drop && key.iter().any(Key::is_null) {
            continue;
        }

        let mut row = JsonRow::new();
        for (name, k) in config.groupby.iter().zip(key) {
            row.insert(name.clone(), value_to_json(&k.to_value()));
        }
        for measure in &measures {
            row.insert(
                measure.output.clone(),
                compute_measure(measure, members, &field_data),
            );
        }
        rows.push(row);
    }

    debug!(groups = rows.len(), measures = measures.len(), "aggregated table");
    Ok(rows)
}

fn validate_field_types(table: &Table, measures: &[MeasureSpec]) -> Result<()> {
    for measure in measures {
        if measure.field.is_empty() {
            continue;
        }
        let column_type = table.column_type(&measure.field)?;
        if measure.op.numeric_only() && !column_type.is_numeric() {
            return Err(EngineError::Type {
                field: measure.field.clone(),
                op: measure.op.to_string(),
                expected: "a numeric column".to_string(),
                actual: column_type.to_string(),
            });
        }
    }
    Ok(())
}

fn load_fields(table: &Table, measures: &[MeasureSpec]) -> Result<HashMap<String, Vec<Value>>> {
    let mut data = HashMap::new();
    for measure in measures {
        if !measure.field.is_empty() && !data.contains_key(&measure.field) {
            data.insert(measure.field.clone(), table.get_column_dense(&measure.field)?);
        }
    }
    Ok(data)
}

fn compute_measure(
    measure: &MeasureSpec,
    members: &[usize],
    field_data: &HashMap<String, Vec<Value>>,
) -> serde_json::Value {
    if measure.op == AggregateOp::Count {
        return serde_json::Value::from(members.len());
    }

    let values = &field_data[&measure.field];
    match measure.op {
        AggregateOp::Valid => {
            let valid = members.iter().filter(|&&i| !values[i].is_null()).count();
            serde_json::Value::from(valid)
        }
        AggregateOp::Missing => {
            let missing = members.iter().filter(|&&i| values[i].is_null()).count();
            serde_json::Value::from(missing)
        }
        AggregateOp::Distinct => {
            let distinct: HashSet<Key> = members
                .iter()
                .map(|&i| Key::from_value(&values[i]))
                .collect();
            serde_json::Value::from(distinct.len())
        }
        AggregateOp::Values => serde_json::Value::Array(
            members.iter().map(|&i| value_to_json(&values[i])).collect(),
        ),
        op => {
            let numeric: Vec<f64> = members
                .iter()
                .filter_map(|&i| values[i].as_f64())
                .collect();
            match compute_numeric(op, &numeric) {
                Some(v) => serde_json::Number::from_f64(v)
                    .map(serde_json::Value::Number)
                    .unwrap_or(serde_json::Value::Null),
                None => serde_json::Value::Null,
            }
        }
    }
}

// ====== Chart-oriented aggregation ======

/// Ephemeral parallel-array bundle for chart consumers
#[derive(Debug, Clone, Serialize)]
pub struct AggregatedResult {
    pub x: Vec<f64>,
    pub y: Vec<f64>,
    pub counts: Vec<u32>,
    pub group_ids: Vec<u32>,
    pub group_names: Vec<String>,
}

/// Aggregate straight into typed arrays keyed by `(x, color)` pairs
///
/// `op` must be accumulable (count/sum/mean/min/max). Rows whose x is Null
/// or NaN are skipped — they have no chart position.
pub fn aggregate_for_chart(
    table: &Table,
    x_field: &str,
    y_field: Option<&str>,
    color_field: Option<&str>,
    op: AggregateOp,
) -> Result<AggregatedResult> {
    chart_op_supported(op)?;

    let xs = table.get_column_f64(x_field)?;
    let ys = y_field.map(|name| table.get_column_f64(name)).transpose()?;
    let colors = color_field
        .map(|name| table.get_column_dense(name))
        .transpose()?;

    let mut index: HashMap<(u64, Key), usize> = HashMap::new();
    let mut color_ids: HashMap<Key, u32> = HashMap::new();
    let mut result = AggregatedResult {
        x: Vec::new(),
        y: Vec::new(),
        counts: Vec::new(),
        group_ids: Vec::new(),
        group_names: Vec::new(),
    };
    let mut stats: Vec<NumericStats> = Vec::new();

    for row in 0..table.row_count() {
        let x = xs[row];
        if x.is_nan() {
            continue;
        }

        let color_key = colors
            .as_ref()
            .map(|c| Key::from_value(&c[row]))
            .unwrap_or(Key::Null);
        let slot = match index.get(&(x.to_bits(), color_key.clone())) {
            Some(&slot) => slot,
            None => {
                let slot = stats.len();
                index.insert((x.to_bits(), color_key.clone()), slot);
                let next_id = color_ids.len() as u32;
                let id = *color_ids.entry(color_key.clone()).or_insert(next_id);
                result.x.push(x);
                result.counts.push(0);
                result.group_ids.push(id);
                result
                    .group_names
                    .push(color_key.to_value().to_string());
                stats.push(NumericStats::default());
                slot
            }
        };

        result.counts[slot] += 1;
        if let Some(ys) = &ys {
            let y = ys[row];
            if !y.is_nan() {
                stats[slot].push(y);
            }
        }
    }

    result.y = stats
        .iter()
        .zip(&result.counts)
        .map(|(s, &count)| match op {
            AggregateOp::Count => count as f64,
            AggregateOp::Sum => s.sum,
            AggregateOp::Mean => s.mean().unwrap_or(f64::NAN),
            AggregateOp::Min => s.min_value().unwrap_or(f64::NAN),
            AggregateOp::Max => s.max_value().unwrap_or(f64::NAN),
            _ => unreachable!("validated above"),
        })
        .collect();

    Ok(result)
}

/// Chart aggregation over raw file bytes
///
/// Loads with the compressed-at-rest strategy, so only the chunks of the x,
/// y and color columns are ever decompressed; the rest of the file stays as
/// opaque blocks.
pub fn aggregate_lazy(
    bytes: &[u8],
    x_field: &str,
    y_field: Option<&str>,
    color_field: Option<&str>,
    op: AggregateOp,
) -> Result<AggregatedResult> {
    let table = Table::from_bytes_with_strategy(bytes, true)?;
    aggregate_for_chart(&table, x_field, y_field, color_field, op)
}

fn chart_op_supported(op: AggregateOp) -> Result<()> {
    match op {
        AggregateOp::Count
        | AggregateOp::Sum
        | AggregateOp::Mean
        | AggregateOp::Min
        | AggregateOp::Max => Ok(()),
        other => Err(EngineError::invalid_config(format!(
            "Chart aggregation supports count/sum/mean/min/max, not '{}'",
            other
        ))),
    }
}

// ====== Range-partitioned partial aggregation ======

/// Associative partial result over one row range
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PartialAggregate {
    pub groupby: Vec<String>,
    pub measures: Vec<MeasureSpec>,
    pub drop: bool,
    pub groups: Vec<PartialGroup>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PartialGroup {
    pub key: Vec<Key>,
    pub count: u64,
    pub measures: Vec<PartialMeasure>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum PartialMeasure {
    Numeric(NumericStats),
    Distinct(Vec<Key>),
}

/// Aggregate the rows in `start_row..end_row` of a stored table
///
/// Only chunks overlapping the range (of the referenced columns) are
/// decompressed. The result merges associatively and commutatively with
/// other ranges' partials; median/q1/q3 and `values` cannot be merged
/// exactly from partials and are rejected here — compute them on the full
/// path instead.
pub fn aggregate_range(
    bytes: &[u8],
    start_row: usize,
    end_row: usize,
    config: &AggregateConfig,
) -> Result<PartialAggregate> {
    let measures = config.resolve()?;
    if config.cross {
        return Err(EngineError::invalid_config(
            "cross is not supported under range partitioning",
        ));
    }
    for measure in &measures {
        if !measure.op.mergeable() {
            return Err(EngineError::invalid_config(format!(
                "Op '{}' cannot be merged exactly from partials; use the full aggregation path",
                measure.op
            )));
        }
    }

    let table = Table::from_bytes_with_strategy(bytes, true)?;
    if start_row > end_row || end_row > table.row_count() {
        return Err(EngineError::invalid_config(format!(
            "Row range {}..{} out of bounds ({} rows)",
            start_row,
            end_row,
            table.row_count()
        )));
    }
    validate_field_types(&table, &measures)?;

    let key_columns: Vec<Vec<Value>> = config
        .groupby
        .iter()
        .map(|name| table.column(name)?.decode_rows(start_row, end_row))
        .collect::<Result<_>>()?;
    let mut field_data: HashMap<String, Vec<Value>> = HashMap::new();
    for measure in &measures {
        if !measure.field.is_empty() && !field_data.contains_key(&measure.field) {
            field_data.insert(
                measure.field.clone(),
                table.column(&measure.field)?.decode_rows(start_row, end_row)?,
            );
        }
    }

    let (keys, groups) = group_rows(&key_columns, end_row - start_row);
    let mut out_groups = Vec::with_capacity(keys.len());

    for (key, members) in keys.into_iter().zip(&groups) {
        let partial_measures = measures
            .iter()
            .map(|measure| match measure.op {
                AggregateOp::Distinct => {
                    let values = &field_data[&measure.field];
                    let mut seen = HashSet::new();
                    let mut distinct = Vec::new();
                    for &i in members {
                        let k = Key::from_value(&values[i]);
                        if seen.insert(k.clone()) {
                            distinct.push(k);
                        }
                    }
                    PartialMeasure::Distinct(distinct)
                }
                AggregateOp::Count => PartialMeasure::Numeric(NumericStats::default()),
                _ => {
                    let values = &field_data[&measure.field];
                    let mut stats = NumericStats::default();
                    for &i in members {
                        stats.observe(&values[i]);
                    }
                    PartialMeasure::Numeric(stats)
                }
            })
            .collect();

        out_groups.push(PartialGroup {
            key,
            count: members.len() as u64,
            measures: partial_measures,
        });
    }

    Ok(PartialAggregate {
        groupby: config.groupby.clone(),
        measures,
        drop: config.drop,
        groups: out_groups,
    })
}

/// Merge two partials; associative and commutative up to group order
pub fn merge_partials(a: &PartialAggregate, b: &PartialAggregate) -> Result<PartialAggregate> {
    if a.groupby != b.groupby || a.measures != b.measures {
        return Err(EngineError::invalid_config(
            "Cannot merge partial aggregates produced by different configurations",
        ));
    }

    let mut merged = a.clone();
    let mut index: HashMap<Vec<Key>, usize> = merged
        .groups
        .iter()
        .enumerate()
        .map(|(i, g)| (g.key.clone(), i))
        .collect();

    for group in &b.groups {
        match index.get(&group.key) {
            Some(&slot) => {
                let target = &mut merged.groups[slot];
                target.count += group.count;
                for (left, right) in target.measures.iter_mut().zip(&group.measures) {
                    match (left, right) {
                        (PartialMeasure::Numeric(l), PartialMeasure::Numeric(r)) => l.merge(r),
                        (PartialMeasure::Distinct(l), PartialMeasure::Distinct(r)) => {
                            let seen: HashSet<Key> = l.iter().cloned().collect();
                            l.extend(r.iter().filter(|k| !seen.contains(k)).cloned());
                        }
                        _ => {
                            return Err(EngineError::invalid_config(
                                "Partial measure kinds do not line up",
                            ));
                        }
                    }
                }
            }
            None => {
                index.insert(group.key.clone(), merged.groups.len());
                merged.groups.push(group.clone());
            }
        }
    }

    Ok(merged)
}

/// Produce the final JSON rows from a (merged) partial
pub fn finalize_partial(partial: &PartialAggregate) -> Vec<JsonRow> {
    let mut rows = Vec::with_capacity(partial.groups.len());

    for group in &partial.groups {
        if partial.drop && group.key.iter().any(Key::is_null) {
            continue;
        }

        let mut row = JsonRow::new();
        for (name, key) in partial.groupby.iter().zip(&group.key) {
            row.insert(name.clone(), value_to_json(&key.to_value()));
        }
        for (measure, partial_measure) in partial.measures.iter().zip(&group.measures) {
            let value = match (measure.op, partial_measure) {
                (AggregateOp::Count, _) => serde_json::Value::from(group.count),
                (AggregateOp::Distinct, PartialMeasure::Distinct(keys)) => {
                    serde_json::Value::from(keys.len())
                }
                (op, PartialMeasure::Numeric(stats)) => {
                    let result = match op {
                        AggregateOp::Valid => Some(stats.valid as f64),
                        AggregateOp::Missing => Some((group.count - stats.valid) as f64),
                        AggregateOp::Sum => (stats.valid > 0).then_some(stats.sum),
                        AggregateOp::Mean => stats.mean(),
                        AggregateOp::Min => stats.min_value(),
                        AggregateOp::Max => stats.max_value(),
                        AggregateOp::Variance => stats.variance(1),
                        AggregateOp::Variancep => stats.variance(0),
                        AggregateOp::Stdev => stats.stdev(1),
                        AggregateOp::Stdevp => stats.stdev(0),
                        _ => None,
                    };
                    result
                        .and_then(serde_json::Number::from_f64)
                        .map(serde_json::Value::Number)
                        .unwrap_or(serde_json::Value::Null)
                }
                _ => serde_json::Value::Null,
            };
            row.insert(measure.output.clone(), value);
        }
        rows.push(row);
    }

    rows
}
