//! Gaussian process regression with a fixed squared exponential kernel.
//!
//! This is the surrogate of the design search: it interpolates the mutual
//! information observed at already evaluated designs. The kernel
//! hyperparameters are fixed, the prior mean is zero.

use faer::linalg::solvers::{Llt, Solve};
use faer::linalg::triangular_solve::solve_lower_triangular_in_place;
use faer::{ColMut, ColRef, Mat, Par, Side};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{EngineError, Result};
use crate::math::{squared_distance, vector_dot};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GpSettings {
    /// Length scale of the squared exponential kernel.
    pub length_scale: f64,
    /// Prior variance of the process.
    pub signal_variance: f64,
    /// Variance added to the diagonal of the kernel matrix.
    pub noise: f64,
    /// How often the diagonal term is multiplied by ten before the kernel
    /// matrix is declared singular.
    pub max_jitter_attempts: usize,
}

impl Default for GpSettings {
    fn default() -> Self {
        Self {
            length_scale: 1.,
            signal_variance: 1.,
            noise: 1e-10,
            max_jitter_attempts: 8,
        }
    }
}

impl GpSettings {
    pub(crate) fn validate(&self) -> Result<()> {
        if !(self.length_scale > 0.) || !self.length_scale.is_finite() {
            return Err(EngineError::InvalidSettings(
                "length_scale must be positive".into(),
            ));
        }
        if !(self.signal_variance > 0.) || !self.signal_variance.is_finite() {
            return Err(EngineError::InvalidSettings(
                "signal_variance must be positive".into(),
            ));
        }
        if !(self.noise > 0.) || !self.noise.is_finite() {
            return Err(EngineError::InvalidSettings("noise must be positive".into()));
        }
        Ok(())
    }

    fn kernel(&self, a: &[f64], b: &[f64]) -> f64 {
        let scale = self.length_scale * self.length_scale;
        self.signal_variance * (-0.5 * squared_distance(a, b) / scale).exp()
    }
}

/// A fitted Gaussian process.
#[derive(Debug, Clone)]
pub struct GaussianProcess {
    settings: GpSettings,
    points: Vec<Vec<f64>>,
    /// Cholesky factorization of the kernel matrix.
    llt: Llt<f64>,
    alpha: Vec<f64>,
}

impl GaussianProcess {
    /// Condition the process on `targets` observed at `points`.
    ///
    /// If the kernel matrix cannot be factorized, the diagonal term is
    /// increased tenfold until it can.
    pub fn fit(points: Vec<Vec<f64>>, targets: &[f64], settings: &GpSettings) -> Result<Self> {
        settings.validate()?;
        let n = points.len();
        if n == 0 {
            return Err(EngineError::InvalidSettings(
                "a gaussian process needs at least one observation".into(),
            ));
        }
        if targets.len() != n {
            return Err(EngineError::DimensionMismatch {
                expected: n,
                found: targets.len(),
            });
        }
        let dim = points[0].len();
        if let Some(point) = points.iter().find(|point| point.len() != dim) {
            return Err(EngineError::DimensionMismatch {
                expected: dim,
                found: point.len(),
            });
        }

        let kernel = Mat::from_fn(n, n, |i, j| settings.kernel(&points[i], &points[j]));

        let mut jitter = settings.noise;
        let mut factor = None;
        for _ in 0..=settings.max_jitter_attempts {
            let mut matrix = kernel.clone();
            for i in 0..n {
                matrix[(i, i)] += jitter;
            }
            if let Ok(llt) = matrix.llt(Side::Lower) {
                factor = Some(llt);
                break;
            }
            debug!(jitter, "kernel matrix is not positive definite, increasing jitter");
            jitter *= 10.;
        }
        let Some(llt) = factor else {
            return Err(EngineError::SingularKernel);
        };

        let solved = llt.solve(ColRef::from_slice(targets));
        let alpha: Vec<f64> = (0..n).map(|i| solved[i]).collect();
        if alpha.iter().any(|a| !a.is_finite()) {
            return Err(EngineError::SingularKernel);
        }

        Ok(Self {
            settings: settings.clone(),
            points,
            llt,
            alpha,
        })
    }

    /// Posterior mean and variance at `x`.
    pub fn predict(&self, x: &[f64]) -> (f64, f64) {
        let mut k: Vec<f64> = self
            .points
            .iter()
            .map(|point| self.settings.kernel(point, x))
            .collect();
        let mean = vector_dot(&k, &self.alpha);
        solve_lower_triangular_in_place(
            self.llt.L(),
            ColMut::from_slice_mut(&mut k).as_mat_mut(),
            Par::Seq,
        );
        let variance = (self.settings.signal_variance - vector_dot(&k, &k)).max(0.);
        (mean, variance)
    }

    /// Posterior mean and standard deviation at `x`.
    pub fn predict_std(&self, x: &[f64]) -> (f64, f64) {
        let (mean, variance) = self.predict(x);
        (mean, variance.sqrt())
    }
}
