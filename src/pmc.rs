//! Posterior updates with adaptive-mixture population Monte Carlo.
//!
//! Every call runs a fixed number of importance sampling rounds. Each round
//! perturbs the current centers with a Gaussian whose scale is drawn from a
//! small catalog of multipliers of the population standard deviation,
//! weights the proposals against prior times likelihood of the full answer
//! history, and resamples new centers. The probabilities of the multipliers
//! are re-estimated from the multipliers of the surviving particles, so the
//! proposal spread adapts to the posterior (Cappé et al. 2004). The result
//! is a systematic resample of all proposals of all rounds.
//!
//! Parameters with a discrete prior are moved to the nearest level after
//! the Gaussian step. Their proposal density is the Gaussian mass of the
//! interval that rounds to the level.

use itertools::izip;
use rand::Rng;
use rand_distr::StandardNormal;
use serde::{Deserialize, Serialize};
use statrs::distribution::{ContinuousCDF, Normal};
use tracing::{debug, warn};

use crate::design::Design;
use crate::error::{EngineError, Result};
use crate::likelihood::{history_log_likelihood, Answer, Likelihood};
use crate::math::{effective_sample_size, logsumexp, normal_logpdf, normalize_log_weights};
use crate::particles::Particles;
use crate::prior::Prior;
use crate::resample::systematic_resample;

/// What to do when every pooled importance weight is zero, for example
/// because the answer history is impossible under every proposal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum DegeneracyPolicy {
    /// Resample the pooled proposals inside the prior support uniformly
    /// and log a warning. Without any, the incoming population is
    /// resampled.
    #[default]
    FallbackUniform,
    /// Return [`EngineError::DegeneratePosterior`].
    Fail,
}

/// Settings for the population Monte Carlo filter
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PmcSettings {
    /// Number of importance sampling rounds per update.
    pub num_rounds: usize,
    /// Multipliers of the population standard deviation that make up the
    /// proposal mixture.
    pub scale_factors: Vec<f64>,
    /// Pseudo count added to every multiplier when the mixture weights are
    /// re-estimated. Defaults to `round(n / 100)`.
    pub scale_smoothing: Option<f64>,
    /// Lower bound for the per-parameter standard deviation of the proposal.
    pub min_proposal_std: f64,
    pub degeneracy: DegeneracyPolicy,
}

impl Default for PmcSettings {
    fn default() -> Self {
        Self {
            num_rounds: 5,
            scale_factors: vec![0.1, 0.5, 1., 2., 10.],
            scale_smoothing: None,
            min_proposal_std: 1e-8,
            degeneracy: DegeneracyPolicy::default(),
        }
    }
}

impl PmcSettings {
    fn validate(&self) -> Result<()> {
        if self.num_rounds == 0 {
            return Err(EngineError::InvalidSettings(
                "num_rounds must be at least 1".into(),
            ));
        }
        if self.scale_factors.is_empty()
            || self.scale_factors.iter().any(|f| !f.is_finite() || *f <= 0.)
        {
            return Err(EngineError::InvalidSettings(
                "scale_factors must be positive and finite".into(),
            ));
        }
        if let Some(smoothing) = self.scale_smoothing {
            if !smoothing.is_finite() || smoothing < 0. {
                return Err(EngineError::InvalidSettings(
                    "scale_smoothing must be non-negative".into(),
                ));
            }
        }
        if !(self.min_proposal_std > 0.) || !self.min_proposal_std.is_finite() {
            return Err(EngineError::InvalidSettings(
                "min_proposal_std must be positive".into(),
            ));
        }
        Ok(())
    }
}

/// Diagnostics of one posterior update.
#[derive(Debug, Clone, PartialEq)]
pub struct PmcStats {
    /// Effective sample size of the importance weights of every round.
    pub round_ess: Vec<f64>,
    /// Rounds in which no proposal had positive weight.
    pub degenerate_rounds: usize,
    /// Mixture weights of the scale factors after the last round.
    pub scale_weights: Vec<f64>,
    /// Effective sample size of the pooled weights.
    pub pooled_ess: f64,
}

/// Update the particle posterior against the full answer history.
///
/// Without `particles` the update starts from `n` draws of the prior.
/// Returns `n` particles.
#[allow(clippy::too_many_arguments)]
pub fn update_posterior<R, L>(
    particles: Option<Particles>,
    designs: &[Design],
    answers: &[Answer],
    prior: &Prior,
    likelihood: &L,
    n: usize,
    settings: &PmcSettings,
    rng: &mut R,
) -> Result<Particles>
where
    R: Rng + ?Sized,
    L: Likelihood + ?Sized,
{
    update_posterior_with_stats(
        particles, designs, answers, prior, likelihood, n, settings, rng,
    )
    .map(|(particles, _)| particles)
}

/// Like [`update_posterior`], but also returns the filter diagnostics.
#[allow(clippy::too_many_arguments)]
pub fn update_posterior_with_stats<R, L>(
    particles: Option<Particles>,
    designs: &[Design],
    answers: &[Answer],
    prior: &Prior,
    likelihood: &L,
    n: usize,
    settings: &PmcSettings,
    rng: &mut R,
) -> Result<(Particles, PmcStats)>
where
    R: Rng + ?Sized,
    L: Likelihood + ?Sized,
{
    settings.validate()?;
    if n == 0 {
        return Err(EngineError::InvalidSettings(
            "the number of particles must be at least 1".into(),
        ));
    }
    if designs.len() != answers.len() {
        return Err(EngineError::HistoryLengthMismatch {
            designs: designs.len(),
            answers: answers.len(),
        });
    }

    let particles = match particles {
        Some(particles) => {
            prior.check_particles(&particles)?;
            if particles.is_empty() {
                return Err(EngineError::InvalidSettings(
                    "the particle population is empty".into(),
                ));
            }
            particles
        }
        None => prior.sample(n, rng)?,
    };

    let levels = prior.levels();
    let stds: Vec<f64> = particles
        .column_std()
        .into_iter()
        .zip(levels.iter())
        .map(|(std, levels)| {
            let floor = levels
                .as_deref()
                .and_then(smallest_gap)
                .unwrap_or(settings.min_proposal_std);
            if std.is_finite() {
                std.max(floor)
            } else {
                floor
            }
        })
        .collect();

    let factors = &settings.scale_factors;
    let num_scales = factors.len();
    let smoothing = settings
        .scale_smoothing
        .unwrap_or_else(|| (n as f64 / 100.).round());

    let mut centers = particles.clone();
    let mut scale_weights = vec![(num_scales as f64).recip(); num_scales];
    let mut pool = centers.empty_like(n * settings.num_rounds);
    let mut pool_weights: Vec<f64> = Vec::with_capacity(n * settings.num_rounds);
    let mut pool_log_prior: Vec<f64> = Vec::with_capacity(n * settings.num_rounds);
    let mut round_ess = Vec::with_capacity(settings.num_rounds);
    let mut degenerate_rounds = 0;

    for round in 0..settings.num_rounds {
        let scale_indices = draw_scale_indices(&scale_weights, centers.len(), rng);
        let proposals = propose(&centers, &stds, &levels, factors, &scale_indices, rng);

        let log_q = proposal_log_density(
            &proposals,
            &centers,
            &stds,
            &levels,
            factors,
            &scale_weights,
        );
        let log_prior = prior.log_density(&proposals)?;
        let log_lik = history_log_likelihood(likelihood, &proposals, designs, answers)?;

        let log_weights: Vec<f64> = izip!(log_lik.iter(), log_prior.iter(), log_q.iter())
            .map(|(lik, prior, q)| lik + prior - q)
            .collect();

        let weights = match normalize_log_weights(&log_weights) {
            Some(weights) => weights,
            None => {
                warn!(round, "no proposal has positive weight, resampling supported proposals");
                degenerate_rounds += 1;
                vec![0f64; proposals.len()]
            }
        };

        let ess = effective_sample_size(&weights);
        round_ess.push(ess);

        let survivors = if ess > 0. {
            Some(systematic_resample(&weights, n, rng)?)
        } else {
            resample_supported(&log_prior, n, rng)?
        };

        if let Some(survivors) = survivors {
            let mut counts = vec![smoothing; num_scales];
            for &i in survivors.iter() {
                counts[scale_indices[i]] += 1.;
            }
            let total: f64 = counts.iter().sum();
            scale_weights = counts.into_iter().map(|c| c / total).collect();
            centers = proposals.select(&survivors);
        }

        debug!(round, ess, ?scale_weights, "population Monte Carlo round finished");

        pool.extend(&proposals);
        pool_weights.extend(weights);
        pool_log_prior.extend(log_prior);
    }

    let total: f64 = pool_weights.iter().sum();
    let pooled_ess = if total > 0. {
        let normalized: Vec<f64> = pool_weights.iter().map(|w| w / total).collect();
        effective_sample_size(&normalized)
    } else {
        0.
    };

    let posterior = match systematic_resample(&pool_weights, n, rng) {
        Ok(indices) => pool.select(&indices),
        Err(EngineError::DegenerateWeights) => match settings.degeneracy {
            DegeneracyPolicy::FallbackUniform => {
                match resample_supported(&pool_log_prior, n, rng)? {
                    Some(indices) => {
                        warn!(
                            pooled = pool.len(),
                            "every pooled weight is zero, falling back to uniform weights"
                        );
                        pool.select(&indices)
                    }
                    None => {
                        warn!(
                            pooled = pool.len(),
                            "no pooled proposal has prior support, keeping the incoming population"
                        );
                        let indices = systematic_resample(&vec![1f64; particles.len()], n, rng)?;
                        particles.select(&indices)
                    }
                }
            }
            DegeneracyPolicy::Fail => return Err(EngineError::DegeneratePosterior),
        },
        Err(err) => return Err(err),
    };

    let stats = PmcStats {
        round_ess,
        degenerate_rounds,
        scale_weights,
        pooled_ess,
    };
    Ok((posterior, stats))
}

/// Independent draws from the mixture weights of the scale factors.
fn draw_scale_indices<R: Rng + ?Sized>(weights: &[f64], n: usize, rng: &mut R) -> Vec<usize> {
    let mut cumulative: Vec<f64> = weights
        .iter()
        .scan(0f64, |acc, &w| {
            *acc += w;
            Some(*acc)
        })
        .collect();
    if let Some(last) = cumulative.last_mut() {
        *last = 1.;
    }
    let last = weights.len() - 1;
    (0..n)
        .map(|_| {
            let u: f64 = rng.random();
            cumulative.partition_point(|&c| c <= u).min(last)
        })
        .collect()
}

/// Uniform resample of the proposals with finite prior density, `None`
/// if there are none.
fn resample_supported<R: Rng + ?Sized>(
    log_prior: &[f64],
    n: usize,
    rng: &mut R,
) -> Result<Option<Vec<usize>>> {
    let supported: Vec<f64> = log_prior
        .iter()
        .map(|lp| if lp.is_finite() { 1. } else { 0. })
        .collect();
    match systematic_resample(&supported, n, rng) {
        Ok(indices) => Ok(Some(indices)),
        Err(EngineError::DegenerateWeights) => Ok(None),
        Err(err) => Err(err),
    }
}

fn smallest_gap(levels: &[f64]) -> Option<f64> {
    levels
        .windows(2)
        .map(|w| w[1] - w[0])
        .filter(|gap| *gap > 0.)
        .reduce(f64::min)
}

/// Index of the level closest to `x` in sorted `levels`. Midpoints round
/// down.
fn nearest_level(levels: &[f64], x: f64) -> usize {
    levels
        .windows(2)
        .take_while(|w| 0.5 * (w[0] + w[1]) < x)
        .count()
}

/// Log probability that a Gaussian step from `center` rounds to level `k`.
fn level_log_mass(levels: &[f64], k: usize, center: f64, std: f64) -> f64 {
    let lower = if k == 0 {
        f64::NEG_INFINITY
    } else {
        0.5 * (levels[k - 1] + levels[k])
    };
    let upper = if k + 1 == levels.len() {
        f64::INFINITY
    } else {
        0.5 * (levels[k] + levels[k + 1])
    };
    let standard = Normal::standard();
    let a = (lower - center) / std;
    let b = (upper - center) / std;
    let mass = if a > 0. {
        standard.sf(a) - standard.sf(b)
    } else {
        standard.cdf(b) - standard.cdf(a)
    };
    mass.max(f64::MIN_POSITIVE).ln()
}

fn propose<R: Rng + ?Sized>(
    centers: &Particles,
    stds: &[f64],
    levels: &[Option<Vec<f64>>],
    factors: &[f64],
    scale_indices: &[usize],
    rng: &mut R,
) -> Particles {
    let mut proposals = centers.empty_like(centers.len());
    let mut row = vec![0f64; centers.dim()];
    for (center, &k) in centers.rows().zip(scale_indices) {
        for (out, &c, &std, levels) in izip!(row.iter_mut(), center, stds, levels) {
            let z: f64 = rng.sample(StandardNormal);
            *out = c + factors[k] * std * z;
            if let Some(levels) = levels {
                *out = levels[nearest_level(levels, *out)];
            }
        }
        proposals.push_row(&row);
    }
    proposals
}

/// Log density of every proposal under the full scale mixture around its
/// own center.
fn proposal_log_density(
    proposals: &Particles,
    centers: &Particles,
    stds: &[f64],
    levels: &[Option<Vec<f64>>],
    factors: &[f64],
    scale_weights: &[f64],
) -> Vec<f64> {
    let mut components = vec![0f64; factors.len()];
    proposals
        .rows()
        .zip(centers.rows())
        .map(|(x, center)| {
            let terms = izip!(components.iter_mut(), factors, scale_weights);
            for (component, &factor, &weight) in terms {
                let log_kernel: f64 = izip!(x, center, stds, levels)
                    .map(|(&x, &c, &std, levels)| match levels {
                        Some(levels) => {
                            level_log_mass(levels, nearest_level(levels, x), c, factor * std)
                        }
                        None => normal_logpdf(x, c, factor * std),
                    })
                    .sum();
                *component = weight.ln() + log_kernel;
            }
            logsumexp(&components)
        })
        .collect()
}
