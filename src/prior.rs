//! Prior distributions over the preference parameters and the particle
//! sampler built on them.

use std::fmt;

use rand::{Rng, RngCore};
use rand_distr::Distribution;
use statrs::distribution::Continuous;

use crate::error::{EngineError, Result};
use crate::particles::Particles;

/// A univariate distribution that can be used as the prior of a parameter.
///
/// Densities must return `0` (and `-inf` on the log scale) outside the
/// support instead of failing, the filter proposes values anywhere on the
/// real line.
pub trait PriorDistribution: Send + Sync {
    fn sample(&self, n: usize, rng: &mut dyn RngCore) -> Vec<f64>;

    fn density(&self, x: f64) -> f64;

    fn log_density(&self, x: f64) -> f64 {
        self.density(x).ln()
    }

    /// The sorted support of a discrete distribution. The filter only
    /// proposes these values for the parameter.
    fn levels(&self) -> Option<Vec<f64>> {
        None
    }
}

#[derive(Debug, Clone)]
pub struct Uniform {
    low: f64,
    high: f64,
    inner: statrs::distribution::Uniform,
}

impl Uniform {
    pub fn new(low: f64, high: f64) -> Result<Self> {
        let inner = statrs::distribution::Uniform::new(low, high)
            .map_err(|err| EngineError::InvalidDistribution(format!("uniform: {err}")))?;
        Ok(Self { low, high, inner })
    }
}

impl PriorDistribution for Uniform {
    fn sample(&self, n: usize, rng: &mut dyn RngCore) -> Vec<f64> {
        (0..n).map(|_| rng.random_range(self.low..self.high)).collect()
    }

    fn density(&self, x: f64) -> f64 {
        self.inner.pdf(x)
    }

    fn log_density(&self, x: f64) -> f64 {
        self.inner.ln_pdf(x)
    }
}

#[derive(Debug, Clone)]
pub struct Normal {
    sampler: rand_distr::Normal<f64>,
    inner: statrs::distribution::Normal,
}

impl Normal {
    pub fn new(mean: f64, std: f64) -> Result<Self> {
        let sampler = rand_distr::Normal::new(mean, std)
            .map_err(|err| EngineError::InvalidDistribution(format!("normal: {err}")))?;
        let inner = statrs::distribution::Normal::new(mean, std)
            .map_err(|err| EngineError::InvalidDistribution(format!("normal: {err}")))?;
        Ok(Self { sampler, inner })
    }
}

impl PriorDistribution for Normal {
    fn sample(&self, n: usize, rng: &mut dyn RngCore) -> Vec<f64> {
        (0..n).map(|_| self.sampler.sample(rng)).collect()
    }

    fn density(&self, x: f64) -> f64 {
        self.inner.pdf(x)
    }

    fn log_density(&self, x: f64) -> f64 {
        self.inner.ln_pdf(x)
    }
}

/// A finite set of values with given probabilities.
///
/// The density is the probability mass at `x`, so proposals that fall
/// between the values get zero weight.
#[derive(Debug, Clone)]
pub struct Categorical {
    values: Vec<f64>,
    probabilities: Vec<f64>,
    cumulative: Vec<f64>,
}

impl Categorical {
    pub fn new(values: Vec<f64>, weights: Vec<f64>) -> Result<Self> {
        if values.is_empty() || values.len() != weights.len() {
            return Err(EngineError::InvalidDistribution(
                "categorical needs one weight per value".into(),
            ));
        }
        if values.iter().any(|x| !x.is_finite()) {
            return Err(EngineError::InvalidDistribution(
                "categorical values must be finite".into(),
            ));
        }
        if weights.iter().any(|w| !w.is_finite() || *w < 0.) {
            return Err(EngineError::InvalidDistribution(
                "categorical weights must be finite and non-negative".into(),
            ));
        }
        let total: f64 = weights.iter().sum();
        if !(total > 0.) {
            return Err(EngineError::InvalidDistribution(
                "categorical weights sum to zero".into(),
            ));
        }
        let probabilities: Vec<f64> = weights.iter().map(|w| w / total).collect();
        let mut cumulative: Vec<f64> = probabilities
            .iter()
            .scan(0f64, |acc, p| {
                *acc += p;
                Some(*acc)
            })
            .collect();
        if let Some(last) = cumulative.last_mut() {
            *last = 1.;
        }
        Ok(Self {
            values,
            probabilities,
            cumulative,
        })
    }

    /// Equal probability for every value.
    pub fn uniform(values: Vec<f64>) -> Result<Self> {
        let weights = vec![1f64; values.len()];
        Self::new(values, weights)
    }
}

impl PriorDistribution for Categorical {
    fn sample(&self, n: usize, rng: &mut dyn RngCore) -> Vec<f64> {
        (0..n)
            .map(|_| {
                let u: f64 = rng.random();
                let idx = self
                    .cumulative
                    .partition_point(|&c| c <= u)
                    .min(self.values.len() - 1);
                self.values[idx]
            })
            .collect()
    }

    fn density(&self, x: f64) -> f64 {
        self.values
            .iter()
            .zip(self.probabilities.iter())
            .filter(|(&val, _)| val == x)
            .map(|(_, &p)| p)
            .sum()
    }

    fn levels(&self) -> Option<Vec<f64>> {
        let mut levels = self.values.clone();
        levels.sort_unstable_by(|a, b| a.total_cmp(b));
        levels.dedup();
        Some(levels)
    }
}

type SampleFn = Box<dyn Fn(&mut dyn RngCore) -> f64 + Send + Sync>;
type DensityFn = Box<dyn Fn(f64) -> f64 + Send + Sync>;

/// A prior given by user supplied closures.
pub struct CustomDistribution {
    sample: SampleFn,
    density: DensityFn,
    log_density: Option<DensityFn>,
}

impl CustomDistribution {
    pub fn new(
        sample: impl Fn(&mut dyn RngCore) -> f64 + Send + Sync + 'static,
        density: impl Fn(f64) -> f64 + Send + Sync + 'static,
    ) -> Self {
        Self {
            sample: Box::new(sample),
            density: Box::new(density),
            log_density: None,
        }
    }

    /// Use a dedicated log density instead of `ln(density)`.
    pub fn with_log_density(
        mut self,
        log_density: impl Fn(f64) -> f64 + Send + Sync + 'static,
    ) -> Self {
        self.log_density = Some(Box::new(log_density));
        self
    }
}

impl PriorDistribution for CustomDistribution {
    fn sample(&self, n: usize, rng: &mut dyn RngCore) -> Vec<f64> {
        (0..n).map(|_| (self.sample)(rng)).collect()
    }

    fn density(&self, x: f64) -> f64 {
        (self.density)(x)
    }

    fn log_density(&self, x: f64) -> f64 {
        match &self.log_density {
            Some(log_density) => log_density(x),
            None => (self.density)(x).ln(),
        }
    }
}

/// Independent priors for a list of named parameters.
///
/// The order of the parameters is the column order of every particle
/// population drawn from or checked against this prior.
#[derive(Default)]
pub struct Prior {
    params: Vec<(String, Box<dyn PriorDistribution>)>,
}

impl fmt::Debug for Prior {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Prior")
            .field("params", &self.names())
            .finish()
    }
}

impl Prior {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, name: impl Into<String>, dist: impl PriorDistribution + 'static) -> Self {
        self.push(name, dist);
        self
    }

    pub fn push(&mut self, name: impl Into<String>, dist: impl PriorDistribution + 'static) {
        self.params.push((name.into(), Box::new(dist)));
    }

    pub fn names(&self) -> Vec<String> {
        self.params.iter().map(|(name, _)| name.clone()).collect()
    }

    pub fn dim(&self) -> usize {
        self.params.len()
    }

    /// Draw `n` i.i.d. particles.
    pub fn sample<R: Rng + ?Sized>(&self, n: usize, rng: &mut R) -> Result<Particles> {
        let mut rng: &mut R = rng;
        let columns = self
            .params
            .iter()
            .map(|(name, dist)| (name.clone(), dist.sample(n, &mut rng)))
            .collect();
        Particles::from_columns(columns)
    }

    /// Fail unless the particles carry exactly the prior parameters, in order.
    pub fn check_particles(&self, particles: &Particles) -> Result<()> {
        let matches = particles.dim() == self.params.len()
            && particles
                .names()
                .iter()
                .zip(self.params.iter())
                .all(|(found, (expected, _))| found == expected);
        if matches {
            Ok(())
        } else {
            Err(EngineError::ParameterMismatch {
                expected: self.names(),
                found: particles.names().to_vec(),
            })
        }
    }

    /// Discrete support of every parameter, `None` for continuous ones.
    pub(crate) fn levels(&self) -> Vec<Option<Vec<f64>>> {
        self.params.iter().map(|(_, dist)| dist.levels()).collect()
    }

    /// Joint log density of every particle.
    pub fn log_density(&self, particles: &Particles) -> Result<Vec<f64>> {
        self.check_particles(particles)?;
        let mut out = vec![0f64; particles.len()];
        for (j, (_, dist)) in self.params.iter().enumerate() {
            out.iter_mut()
                .zip(particles.column(j))
                .for_each(|(acc, x)| *acc += dist.log_density(x));
        }
        Ok(out)
    }
}
