//! Systematic resampling.

use rand::Rng;

use crate::error::{EngineError, Result};

/// Draw `n_out` indices into `weights` with systematic resampling.
///
/// A single offset `u0 ~ U[0, 1)` places the points `(u0 + k) / n_out`;
/// each point picks the first index whose cumulative weight exceeds it.
/// Indices repeat when a particle carries more than `1 / n_out` of the
/// weight, and `n_out` may be larger than the number of weights.
///
/// Weights need not be normalized. They must be non-negative with a
/// positive, finite sum; NaN entries count as zero.
pub fn systematic_resample<R: Rng + ?Sized>(
    weights: &[f64],
    n_out: usize,
    rng: &mut R,
) -> Result<Vec<usize>> {
    let total: f64 = weights.iter().filter(|w| !w.is_nan()).sum();
    if weights.is_empty() || !(total > 0.) || !total.is_finite() {
        return Err(EngineError::DegenerateWeights);
    }

    let mut cumulative: Vec<f64> = weights
        .iter()
        .scan(0f64, |acc, &w| {
            if !w.is_nan() {
                *acc += w.max(0.) / total;
            }
            Some(*acc)
        })
        .collect();
    if let Some(last) = cumulative.last_mut() {
        *last = 1.;
    }

    let u0: f64 = rng.random();
    let last = weights.len() - 1;
    Ok((0..n_out)
        .map(|k| {
            let u = (u0 + k as f64) / n_out as f64;
            cumulative.partition_point(|&c| c <= u).min(last)
        })
        .collect())
}
