use itertools::izip;
use multiversion::multiversion;

/// `ln(sum(exp(values)))`, stable for large magnitudes.
///
/// Returns `-inf` for an empty slice or when every value is `-inf`.
pub(crate) fn logsumexp(values: &[f64]) -> f64 {
    let max = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    if max == f64::NEG_INFINITY {
        return f64::NEG_INFINITY;
    }
    if max == f64::INFINITY {
        return f64::INFINITY;
    }
    let sum: f64 = values.iter().map(|&val| (val - max).exp()).sum();
    max + sum.ln()
}

/// Turn unnormalized log weights into probabilities.
///
/// The largest finite log weight is subtracted before exponentiating.
/// NaN weights become zero. Returns `None` when nothing carries any
/// weight, which callers treat as a degenerate round.
pub(crate) fn normalize_log_weights(log_weights: &[f64]) -> Option<Vec<f64>> {
    let max = log_weights
        .iter()
        .copied()
        .filter(|val| !val.is_nan())
        .fold(f64::NEG_INFINITY, f64::max);

    if max == f64::NEG_INFINITY {
        return None;
    }

    let mut weights: Vec<f64> = if max == f64::INFINITY {
        log_weights
            .iter()
            .map(|&val| if val == f64::INFINITY { 1. } else { 0. })
            .collect()
    } else {
        log_weights
            .iter()
            .map(|&val| {
                let w = (val - max).exp();
                if w.is_nan() {
                    0.
                } else {
                    w
                }
            })
            .collect()
    };

    let total: f64 = weights.iter().sum();
    if !(total > 0.) || !total.is_finite() {
        return None;
    }
    weights.iter_mut().for_each(|w| *w /= total);
    Some(weights)
}

/// Effective sample size of normalized weights.
pub(crate) fn effective_sample_size(weights: &[f64]) -> f64 {
    let sum_sq: f64 = weights.iter().map(|w| w * w).sum();
    if sum_sq > 0. {
        sum_sq.recip()
    } else {
        0.
    }
}

/// Log density of a normal distribution with the given mean and std.
#[inline]
pub(crate) fn normal_logpdf(x: f64, mean: f64, std: f64) -> f64 {
    let z = (x - mean) / std;
    -0.5 * z * z - std.ln() - 0.5 * (2. * std::f64::consts::PI).ln()
}

/// `mean(x ln x)` with the convention `0 ln 0 = 0`.
#[multiversion(targets("x86_64+avx+avx2", "x86+sse"))]
pub(crate) fn mean_xlogx(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.;
    }
    let sum: f64 = values
        .iter()
        .map(|&x| if x == 0. { 0. } else { x * x.ln() })
        .sum();
    sum / values.len() as f64
}

#[multiversion(targets("x86_64+avx+avx2", "x86+sse"))]
pub(crate) fn squared_distance(a: &[f64], b: &[f64]) -> f64 {
    assert!(a.len() == b.len());
    izip!(a, b)
        .map(|(x, y)| {
            let diff = x - y;
            diff * diff
        })
        .sum()
}

#[multiversion(targets("x86_64+avx+avx2", "x86+sse"))]
pub(crate) fn vector_dot(a: &[f64], b: &[f64]) -> f64 {
    assert!(a.len() == b.len());
    izip!(a, b).map(|(x, y)| x * y).sum()
}

pub(crate) fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return f64::NAN;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

/// Sample standard deviation (one degree of freedom removed).
///
/// A single value has standard deviation zero.
pub(crate) fn sample_std(values: impl Iterator<Item = f64> + Clone) -> f64 {
    let (count, sum) = values
        .clone()
        .fold((0usize, 0f64), |(count, sum), val| (count + 1, sum + val));
    if count < 2 {
        return 0.;
    }
    let mean = sum / count as f64;
    let sum_sq: f64 = values.map(|val| (val - mean) * (val - mean)).sum();
    (sum_sq / (count - 1) as f64).sqrt()
}
