/*
 * Copyright (c) 2025-present Dawid Pawlik
 *
 * For educational use only by employees and students of MIMUW.
 * See LICENSE file for details.
 */

//! # Statistical transforms
//!
//! Binning with "nice" step sizes, quantile extraction, kernel density
//! estimation, least-squares regression, loess smoothing and seeded random
//! sampling. Except for `sample` (which selects rows), every transform here
//! either appends columns or returns plain `(x, y)` point vectors.

use crate::ColumnType;
use crate::Table;
use crate::Value;
use crate::chunk::DEFAULT_CHUNK_CAPACITY;
use crate::column::Column;
use crate::error::EngineError;
use crate::error::Result;
use crate::ops::aggregate::NumericStats;
use crate::ops::aggregate::quantile_sorted;
use crate::ops::compare_f64;
use crate::ops::sort::apply_permutation;
use rand::SeedableRng;
use rand::rngs::StdRng;
use serde::Deserialize;
use serde::Serialize;
use std::f64::consts::PI;
use tracing::debug;

fn table_capacity(table: &Table) -> usize {
    table
        .columns()
        .first()
        .map(|c| c.chunk_capacity())
        .unwrap_or(DEFAULT_CHUNK_CAPACITY)
}

fn numeric_column(table: &Table, field: &str, op: &str) -> Result<Vec<f64>> {
    let column_type = table.column_type(field)?;
    if !column_type.is_numeric() {
        return Err(EngineError::Type {
            field: field.to_string(),
            op: op.to_string(),
            expected: "a numeric column".to_string(),
            actual: column_type.to_string(),
        });
    }
    table.get_column_f64(field)
}

/// Finite values only, as the transforms below need them
fn finite_values(values: &[f64]) -> Vec<f64> {
    values.iter().copied().filter(|v| v.is_finite()).collect()
}

// ====== Binning ======

/// Pick a human-friendly bin step: the smallest 1/2/5/10 × 10^k covering
/// `span / maxbins`
fn nice_step(span: f64, maxbins: usize) -> f64 {
    if span <= 0.0 {
        return 1.0;
    }
    let target = span / maxbins as f64;
    let magnitude = 10f64.powf(target.log10().floor());
    for multiplier in [1.0, 2.0, 5.0, 10.0] {
        let step = multiplier * magnitude;
        if step >= target {
            return step;
        }
    }
    10.0 * magnitude
}

/// Bin a numeric field, appending `bin0`/`bin1` columns with the bin extents
///
/// The step is chosen so at most `maxbins` bins cover the data, aligned to
/// a multiple of the step. Null and NaN rows get Null extents.
pub fn bin(table: &Table, field: &str, maxbins: usize) -> Result<Table> {
    if maxbins == 0 {
        return Err(EngineError::invalid_config("maxbins must be positive"));
    }
    let values = numeric_column(table, field, "bin")?;
    let finite = finite_values(&values);

    let (start, step) = match (
        finite.iter().copied().reduce(f64::min),
        finite.iter().copied().reduce(f64::max),
    ) {
        (Some(min), Some(max)) => {
            let step = nice_step(max - min, maxbins);
            ((min / step).floor() * step, step)
        }
        _ => (0.0, 1.0),
    };

    let mut bin0 = Vec::with_capacity(values.len());
    let mut bin1 = Vec::with_capacity(values.len());
    for &v in &values {
        if v.is_finite() {
            let lo = start + ((v - start) / step).floor() * step;
            bin0.push(Value::Float(lo));
            bin1.push(Value::Float(lo + step));
        } else {
            bin0.push(Value::Null);
            bin1.push(Value::Null);
        }
    }

    let capacity = table_capacity(table);
    let mut out = table.clone();
    out.add_column(Column::from_values("bin0", ColumnType::Float, capacity, &bin0)?)?;
    out.add_column(Column::from_values("bin1", ColumnType::Float, capacity, &bin1)?)?;
    debug!(field, step, start, "binned column");
    Ok(out)
}

// ====== Quantiles ======

/// Evaluate quantiles of a numeric field at the given probabilities
///
/// Returns `(p, value)` pairs using linear interpolation between order
/// statistics.
pub fn quantile(table: &Table, field: &str, probs: &[f64]) -> Result<Vec<(f64, f64)>> {
    for &p in probs {
        if !(0.0..=1.0).contains(&p) {
            return Err(EngineError::invalid_config(format!(
                "Quantile probability {} outside [0, 1]",
                p
            )));
        }
    }

    let mut values = finite_values(&numeric_column(table, field, "quantile")?);
    if values.is_empty() {
        return Err(EngineError::invalid_config(format!(
            "Column '{}' has no finite values to take quantiles of",
            field
        )));
    }
    values.sort_by(|a, b| compare_f64(*a, *b));

    Ok(probs
        .iter()
        .map(|&p| (p, quantile_sorted(&values, p).unwrap_or(f64::NAN)))
        .collect())
}

// ====== Kernel density ======

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DensityConfig {
    pub field: String,
    /// Evaluation grid resolution
    #[serde(default = "default_steps")]
    pub steps: usize,
    /// Kernel bandwidth; Silverman's rule when absent
    #[serde(default)]
    pub bandwidth: Option<f64>,
    /// Grid range; data extent when absent
    #[serde(default)]
    pub extent: Option<(f64, f64)>,
    /// Emit the running integral instead of the density
    #[serde(default)]
    pub cumulative: bool,
    /// Scale by the sample count (expected counts rather than probability)
    #[serde(default)]
    pub counts: bool,
}

fn default_steps() -> usize {
    100
}

/// Gaussian kernel density estimate over an evenly spaced grid
pub fn density(table: &Table, config: &DensityConfig) -> Result<Vec<(f64, f64)>> {
    if config.steps < 2 {
        return Err(EngineError::invalid_config("density needs at least 2 steps"));
    }
    let mut values = finite_values(&numeric_column(table, &config.field, "density")?);
    if values.is_empty() {
        return Err(EngineError::invalid_config(format!(
            "Column '{}' has no finite values for density estimation",
            config.field
        )));
    }
    values.sort_by(|a, b| compare_f64(*a, *b));

    let n = values.len() as f64;
    let bandwidth = match config.bandwidth {
        Some(h) if h > 0.0 => h,
        Some(h) => {
            return Err(EngineError::invalid_config(format!(
                "Bandwidth must be positive, got {}",
                h
            )));
        }
        None => silverman_bandwidth(&values),
    };

    let (lo, hi) = config
        .extent
        .unwrap_or((values[0], values[values.len() - 1]));
    let dx = (hi - lo) / (config.steps - 1) as f64;
    let norm = 1.0 / ((2.0 * PI).sqrt() * bandwidth * n);

    let mut points = Vec::with_capacity(config.steps);
    let mut integral = 0.0;
    for i in 0..config.steps {
        let x = lo + i as f64 * dx;
        let mut y: f64 = values
            .iter()
            .map(|&v| {
                let u = (x - v) / bandwidth;
                norm * (-0.5 * u * u).exp()
            })
            .sum();

        if config.cumulative {
            // Trapezoid-integrated CDF over the grid
            integral += y * dx;
            y = integral.min(1.0);
        }
        if config.counts {
            y *= n;
        }
        points.push((x, y));
    }

    Ok(points)
}

/// Silverman's rule of thumb: `0.9 · min(σ, iqr / 1.34) · n^(−1/5)`
fn silverman_bandwidth(sorted: &[f64]) -> f64 {
    let mut stats = NumericStats::default();
    for &v in sorted {
        stats.push(v);
    }
    let sigma = stats.stdev(1).unwrap_or(0.0);
    let iqr = match (
        quantile_sorted(sorted, 0.75),
        quantile_sorted(sorted, 0.25),
    ) {
        (Some(q3), Some(q1)) => q3 - q1,
        _ => 0.0,
    };

    let spread = match (sigma > 0.0, iqr > 0.0) {
        (true, true) => sigma.min(iqr / 1.34),
        (true, false) => sigma,
        (false, true) => iqr / 1.34,
        (false, false) => 1.0,
    };
    0.9 * spread * (sorted.len() as f64).powf(-0.2)
}

// ====== Regression ======

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RegressionMethod {
    /// y = a + b·x
    Linear,
    /// y = a + b·ln(x), x > 0
    Log,
    /// y = a·e^(b·x), y > 0
    Exp,
    /// y = a·x^b, x > 0 and y > 0
    Pow,
    /// y = a + b·x + c·x²
    Quad,
}

#[derive(Debug, Clone, Serialize)]
pub struct RegressionResult {
    pub method: RegressionMethod,
    /// `[a, b]`, or `[a, b, c]` for quad
    pub coefficients: Vec<f64>,
    /// Coefficient of determination against the original y values
    pub r_squared: f64,
    /// The fitted curve sampled over the x extent
    pub points: Vec<(f64, f64)>,
}

const REGRESSION_CURVE_POINTS: usize = 50;

/// Least-squares fit of `y` on `x` under the chosen model
///
/// The non-linear models fit in transformed coordinates; rows violating a
/// model's domain (for example x ≤ 0 under `log`) are excluded from the
/// fit. R² is computed in the original y space.
pub fn regression(
    table: &Table,
    x_field: &str,
    y_field: &str,
    method: RegressionMethod,
) -> Result<RegressionResult> {
    let xs = numeric_column(table, x_field, "regression")?;
    let ys = numeric_column(table, y_field, "regression")?;

    let pairs: Vec<(f64, f64)> = xs
        .iter()
        .zip(&ys)
        .filter(|(x, y)| x.is_finite() && y.is_finite() && in_domain(method, **x, **y))
        .map(|(&x, &y)| (x, y))
        .collect();
    let minimum = if method == RegressionMethod::Quad { 3 } else { 2 };
    if pairs.len() < minimum {
        return Err(EngineError::invalid_config(format!(
            "Regression '{:?}' needs at least {} in-domain points, got {}",
            method,
            minimum,
            pairs.len()
        )));
    }

    let coefficients = match method {
        RegressionMethod::Quad => fit_quadratic(&pairs)?,
        _ => {
            let transformed: Vec<(f64, f64)> = pairs
                .iter()
                .map(|&(x, y)| transform(method, x, y))
                .collect();
            let (a, b) = fit_line(&transformed)?;
            match method {
                // ln a was fitted; report a itself
                RegressionMethod::Exp | RegressionMethod::Pow => vec![a.exp(), b],
                _ => vec![a, b],
            }
        }
    };

    let predict = |x: f64| predict(method, &coefficients, x);

    let mut ss_res = 0.0;
    let mut stats = NumericStats::default();
    for &(_, y) in &pairs {
        stats.push(y);
    }
    let mean = stats.mean().unwrap_or(0.0);
    let mut ss_tot = 0.0;
    for &(x, y) in &pairs {
        ss_res += (y - predict(x)) * (y - predict(x));
        ss_tot += (y - mean) * (y - mean);
    }
    let r_squared = if ss_tot == 0.0 {
        1.0
    } else {
        1.0 - ss_res / ss_tot
    };

    let lo = pairs.iter().map(|p| p.0).reduce(f64::min).unwrap_or(0.0);
    let hi = pairs.iter().map(|p| p.0).reduce(f64::max).unwrap_or(0.0);
    let dx = (hi - lo) / (REGRESSION_CURVE_POINTS - 1) as f64;
    let points = (0..REGRESSION_CURVE_POINTS)
        .map(|i| {
            let x = lo + i as f64 * dx;
            (x, predict(x))
        })
        .collect();

    Ok(RegressionResult {
        method,
        coefficients,
        r_squared,
        points,
    })
}

fn in_domain(method: RegressionMethod, x: f64, y: f64) -> bool {
    match method {
        RegressionMethod::Linear | RegressionMethod::Quad => true,
        RegressionMethod::Log => x > 0.0,
        RegressionMethod::Exp => y > 0.0,
        RegressionMethod::Pow => x > 0.0 && y > 0.0,
    }
}

fn transform(method: RegressionMethod, x: f64, y: f64) -> (f64, f64) {
    match method {
        RegressionMethod::Linear | RegressionMethod::Quad => (x, y),
        RegressionMethod::Log => (x.ln(), y),
        RegressionMethod::Exp => (x, y.ln()),
        RegressionMethod::Pow => (x.ln(), y.ln()),
    }
}

fn predict(method: RegressionMethod, coefficients: &[f64], x: f64) -> f64 {
    match method {
        RegressionMethod::Linear => coefficients[0] + coefficients[1] * x,
        RegressionMethod::Log => coefficients[0] + coefficients[1] * x.ln(),
        RegressionMethod::Exp => coefficients[0] * (coefficients[1] * x).exp(),
        RegressionMethod::Pow => coefficients[0] * x.powf(coefficients[1]),
        RegressionMethod::Quad => {
            coefficients[0] + coefficients[1] * x + coefficients[2] * x * x
        }
    }
}

/// Ordinary least squares for y = a + b·x; returns (a, b)
fn fit_line(points: &[(f64, f64)]) -> Result<(f64, f64)> {
    let n = points.len() as f64;
    let sum_x: f64 = points.iter().map(|p| p.0).sum();
    let sum_y: f64 = points.iter().map(|p| p.1).sum();
    let sum_xx: f64 = points.iter().map(|p| p.0 * p.0).sum();
    let sum_xy: f64 = points.iter().map(|p| p.0 * p.1).sum();

    let denom = n * sum_xx - sum_x * sum_x;
    if denom.abs() < f64::EPSILON {
        return Err(EngineError::invalid_config(
            "Regression is degenerate: all x values coincide",
        ));
    }
    let b = (n * sum_xy - sum_x * sum_y) / denom;
    let a = (sum_y - b * sum_x) / n;
    Ok((a, b))
}

/// Normal-equation fit for y = a + b·x + c·x²; returns [a, b, c]
fn fit_quadratic(points: &[(f64, f64)]) -> Result<Vec<f64>> {
    let n = points.len() as f64;
    let (mut sx, mut sx2, mut sx3, mut sx4) = (0.0, 0.0, 0.0, 0.0);
    let (mut sy, mut sxy, mut sx2y) = (0.0, 0.0, 0.0);
    for &(x, y) in points {
        sx += x;
        sx2 += x * x;
        sx3 += x * x * x;
        sx4 += x * x * x * x;
        sy += y;
        sxy += x * y;
        sx2y += x * x * y;
    }

    let m = [[n, sx, sx2], [sx, sx2, sx3], [sx2, sx3, sx4]];
    let rhs = [sy, sxy, sx2y];

    let det = det3(&m);
    if det.abs() < f64::EPSILON {
        return Err(EngineError::invalid_config(
            "Quadratic regression is degenerate: x values are not distinct enough",
        ));
    }

    // Cramer's rule
    let mut coefficients = Vec::with_capacity(3);
    for i in 0..3 {
        let mut replaced = m;
        for row in 0..3 {
            replaced[row][i] = rhs[row];
        }
        coefficients.push(det3(&replaced) / det);
    }
    Ok(coefficients)
}

fn det3(m: &[[f64; 3]; 3]) -> f64 {
    m[0][0] * (m[1][1] * m[2][2] - m[1][2] * m[2][1])
        - m[0][1] * (m[1][0] * m[2][2] - m[1][2] * m[2][0])
        + m[0][2] * (m[1][0] * m[2][1] - m[1][1] * m[2][0])
}

// ====== Loess ======

/// Locally weighted linear smoothing (tricube weights)
///
/// `bandwidth` is the fraction of points in each local neighborhood,
/// in (0, 1]. Returns smoothed points in ascending x order.
pub fn loess(table: &Table, x_field: &str, y_field: &str, bandwidth: f64) -> Result<Vec<(f64, f64)>> {
    if !(0.0..=1.0).contains(&bandwidth) || bandwidth == 0.0 {
        return Err(EngineError::invalid_config(format!(
            "Loess bandwidth must be in (0, 1], got {}",
            bandwidth
        )));
    }

    let xs = numeric_column(table, x_field, "loess")?;
    let ys = numeric_column(table, y_field, "loess")?;
    let mut pairs: Vec<(f64, f64)> = xs
        .iter()
        .zip(&ys)
        .filter(|(x, y)| x.is_finite() && y.is_finite())
        .map(|(&x, &y)| (x, y))
        .collect();
    if pairs.len() < 2 {
        return Err(EngineError::invalid_config(
            "Loess needs at least 2 finite points",
        ));
    }
    pairs.sort_by(|a, b| compare_f64(a.0, b.0));

    let n = pairs.len();
    let k = ((bandwidth * n as f64).ceil() as usize).clamp(2, n);

    let mut smoothed = Vec::with_capacity(n);
    for i in 0..n {
        let x0 = pairs[i].0;

        // Nearest k points in x: slide a window around i
        let (mut lo, mut hi) = (i, i);
        while hi - lo + 1 < k {
            let extend_left =
                lo > 0 && (hi + 1 >= n || x0 - pairs[lo - 1].0 <= pairs[hi + 1].0 - x0);
            if extend_left {
                lo -= 1;
            } else {
                hi += 1;
            }
        }

        let d_max = (x0 - pairs[lo].0).abs().max((pairs[hi].0 - x0).abs());
        let (mut sw, mut swx, mut swy, mut swxx, mut swxy) = (0.0, 0.0, 0.0, 0.0, 0.0);
        for &(x, y) in &pairs[lo..=hi] {
            let d = if d_max > 0.0 { (x - x0).abs() / d_max } else { 0.0 };
            let w = {
                let t = 1.0 - d * d * d;
                t * t * t
            };
            sw += w;
            swx += w * x;
            swy += w * y;
            swxx += w * x * x;
            swxy += w * x * y;
        }

        let denom = sw * swxx - swx * swx;
        let y0 = if denom.abs() < f64::EPSILON {
            // Collapsed neighborhood: weighted mean
            swy / sw
        } else {
            let b = (sw * swxy - swx * swy) / denom;
            let a = (swy - b * swx) / sw;
            a + b * x0
        };
        smoothed.push((x0, y0));
    }

    Ok(smoothed)
}

// ====== Sampling ======

/// Sample `n` rows without replacement, preserving original row order
///
/// The same seed always selects the same rows; with `None` a random seed
/// is drawn. Asking for at least the full row count returns a copy.
pub fn sample(table: &Table, n: usize, seed: Option<u64>) -> Result<Table> {
    if n >= table.row_count() {
        return Ok(table.clone());
    }

    let seed = seed.unwrap_or_else(rand::random);
    let mut rng = StdRng::seed_from_u64(seed);
    let mut selected: Vec<u32> = rand::seq::index::sample(&mut rng, table.row_count(), n)
        .into_iter()
        .map(|i| i as u32)
        .collect();
    selected.sort_unstable();

    debug!(rows = n, seed, "sampled table");
    apply_permutation(table, &selected)
}
