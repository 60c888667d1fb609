//! Choice of the next design.
//!
//! The objective is the mutual information between the answer and the
//! parameters under the current particle population. It is either
//! evaluated on a catalog (grid search) or optimized with a Gaussian
//! process surrogate under a wall-clock budget (Bayesian search).

use std::time::{Duration, Instant};

use rand::Rng;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::acquisition::expected_improvement;
use crate::adam::{maximize, AdamOptions, Ascent, AscentError};
use crate::design::{Bounds, Design, DesignSpace};
use crate::error::{EngineError, Result};
use crate::gaussian_process::{GaussianProcess, GpSettings};
use crate::information::mutual_information;
use crate::likelihood::{Answer, Likelihood};
use crate::particles::Particles;

/// Rounds of fresh local search starts before the acquisition
/// maximization gives up on converged results.
const PROPOSAL_ROUNDS: usize = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum SearchMode {
    /// Evaluate every catalog design, or a random share of them.
    Grid,
    /// Gaussian process surrogate with expected improvement.
    #[default]
    Bayesian,
    /// A single random design, without optimization.
    Random,
}

/// Settings for the design search
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StrategyConfig {
    pub mode: SearchMode,
    /// Share of the catalog evaluated by grid search, in percent.
    pub sample_percentage: f64,
    /// Random designs evaluated before the surrogate is used.
    pub n_starting_points: usize,
    /// Maximum number of surrogate proposals.
    pub n_iterations: usize,
    /// Wall-clock budget of one Bayesian search.
    pub max_time: Duration,
    /// Exploration parameter of the expected improvement.
    pub exploration_xi: f64,
    /// Local search starts per proposal.
    pub n_restarts: usize,
    pub gp: GpSettings,
    pub local_search: AdamOptions,
}

impl Default for StrategyConfig {
    fn default() -> Self {
        Self {
            mode: SearchMode::default(),
            sample_percentage: 100.,
            n_starting_points: 10,
            n_iterations: 15,
            max_time: Duration::from_secs(10),
            exploration_xi: 0.,
            n_restarts: 3,
            gp: GpSettings::default(),
            local_search: AdamOptions::default(),
        }
    }
}

impl StrategyConfig {
    fn validate(&self) -> Result<()> {
        match self.mode {
            SearchMode::Grid => {
                if !(1. ..=100.).contains(&self.sample_percentage) {
                    return Err(EngineError::InvalidSettings(format!(
                        "sample_percentage must be in [1, 100], got {}",
                        self.sample_percentage
                    )));
                }
            }
            SearchMode::Bayesian => {
                self.gp.validate()?;
                if self.n_starting_points == 0 {
                    return Err(EngineError::InvalidSettings(
                        "n_starting_points must be at least 1".into(),
                    ));
                }
                if self.n_restarts == 0 {
                    return Err(EngineError::InvalidSettings(
                        "n_restarts must be at least 1".into(),
                    ));
                }
                if !self.exploration_xi.is_finite() {
                    return Err(EngineError::InvalidSettings(
                        "exploration_xi must be finite".into(),
                    ));
                }
            }
            SearchMode::Random => (),
        }
        Ok(())
    }
}

/// The selected design and how it was found.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DesignChoice {
    pub design: Design,
    /// Position in the catalog, if the design space is a catalog.
    pub index: Option<usize>,
    pub mutual_information: f64,
    /// Number of mutual information evaluations.
    pub evaluations: usize,
    /// Whether the time budget ended the search.
    pub stopped_early: bool,
}

struct Observations {
    points: Vec<Vec<f64>>,
    values: Vec<f64>,
    choices: Vec<(Option<usize>, Design)>,
}

impl Observations {
    fn new() -> Self {
        Self {
            points: Vec::new(),
            values: Vec::new(),
            choices: Vec::new(),
        }
    }

    fn push(&mut self, index: Option<usize>, design: Design, value: f64) {
        self.points.push(design.values().to_vec());
        self.values.push(value);
        self.choices.push((index, design));
    }

    fn len(&self) -> usize {
        self.values.len()
    }

    fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// The first observation with the largest value.
    fn best(self, stopped_early: bool) -> Result<DesignChoice> {
        let evaluations = self.len();
        let best = self
            .values
            .iter()
            .enumerate()
            .fold(None, |best: Option<(usize, f64)>, (i, &value)| match best {
                Some((_, best_value)) if best_value >= value => best,
                _ => Some((i, value)),
            });
        let Some((i, mutual_information)) = best else {
            return Err(EngineError::NoProgress);
        };
        let (index, design) = self.choices.into_iter().nth(i).ok_or(EngineError::NoProgress)?;
        Ok(DesignChoice {
            design,
            index,
            mutual_information,
            evaluations,
            stopped_early,
        })
    }
}

/// Pick the design with the largest expected information gain.
pub fn select_next_design<R, L>(
    particles: &Particles,
    space: &DesignSpace,
    answers: &[Answer],
    likelihood: &L,
    config: &StrategyConfig,
    rng: &mut R,
) -> Result<DesignChoice>
where
    R: Rng + ?Sized,
    L: Likelihood + ?Sized,
{
    if answers.is_empty() {
        return Err(EngineError::EmptyAnswerSet);
    }
    if particles.is_empty() {
        return Err(EngineError::InvalidSettings(
            "the particle population is empty".into(),
        ));
    }
    config.validate()?;

    match config.mode {
        SearchMode::Grid => grid_search(particles, space, answers, likelihood, config, rng),
        SearchMode::Bayesian => bayesian_search(particles, space, answers, likelihood, config, rng),
        SearchMode::Random => random_design(particles, space, answers, likelihood, rng),
    }
}

fn grid_search<R, L>(
    particles: &Particles,
    space: &DesignSpace,
    answers: &[Answer],
    likelihood: &L,
    config: &StrategyConfig,
    rng: &mut R,
) -> Result<DesignChoice>
where
    R: Rng + ?Sized,
    L: Likelihood + ?Sized,
{
    let DesignSpace::Catalog(catalog) = space else {
        return Err(EngineError::GridRequiresCatalog);
    };

    let indices: Vec<usize> = if config.sample_percentage < 100. {
        let n = (config.sample_percentage / 100. * catalog.len() as f64).round() as usize;
        let n = n.clamp(1, catalog.len());
        let mut indices = rand::seq::index::sample(rng, catalog.len(), n).into_vec();
        indices.sort_unstable();
        indices
    } else {
        (0..catalog.len()).collect()
    };

    let mut observations = Observations::new();
    for i in indices {
        let design = &catalog.designs()[i];
        let value = mutual_information(particles, answers, likelihood, design);
        observations.push(Some(i), design.clone(), value);
    }
    debug!(evaluations = observations.len(), "grid search finished");
    observations.best(false)
}

fn random_design<R, L>(
    particles: &Particles,
    space: &DesignSpace,
    answers: &[Answer],
    likelihood: &L,
    rng: &mut R,
) -> Result<DesignChoice>
where
    R: Rng + ?Sized,
    L: Likelihood + ?Sized,
{
    let mut observations = Observations::new();
    for (index, design) in space.sample(1, rng) {
        let value = mutual_information(particles, answers, likelihood, &design);
        observations.push(index, design, value);
    }
    observations.best(false)
}

fn bayesian_search<R, L>(
    particles: &Particles,
    space: &DesignSpace,
    answers: &[Answer],
    likelihood: &L,
    config: &StrategyConfig,
    rng: &mut R,
) -> Result<DesignChoice>
where
    R: Rng + ?Sized,
    L: Likelihood + ?Sized,
{
    let start = Instant::now();
    let deadline = start + config.max_time;
    let mut stopped_early = false;
    let mut observations = Observations::new();

    for (index, design) in space.sample(config.n_starting_points, rng) {
        if !observations.is_empty() && Instant::now() >= deadline {
            stopped_early = true;
            break;
        }
        let value = mutual_information(particles, answers, likelihood, &design);
        observations.push(index, design, value);
    }
    if observations.is_empty() {
        return Err(EngineError::NoProgress);
    }

    let bounds = space.bounds();
    for iteration in 0..config.n_iterations {
        if stopped_early || Instant::now() >= deadline {
            stopped_early = true;
            break;
        }

        let points = observations.points.clone();
        let gp = match GaussianProcess::fit(points, &observations.values, &config.gp) {
            Ok(gp) => gp,
            Err(err) => {
                warn!(%err, iteration, "could not fit the surrogate, stopping the design search");
                break;
            }
        };
        let incumbent = observations
            .points
            .iter()
            .map(|point| gp.predict(point).0)
            .fold(f64::NEG_INFINITY, f64::max);

        let acquisition = |x: &[f64]| {
            let (mean, std) = gp.predict_std(x);
            expected_improvement(mean, std, incumbent, config.exploration_xi)
        };
        let Some(proposal) = propose_location(acquisition, &bounds, space, config, deadline, rng)
        else {
            warn!(iteration, "acquisition maximization failed, stopping the design search");
            break;
        };

        let (index, design) = space.snap(&proposal.point);
        let value = mutual_information(particles, answers, likelihood, &design);
        debug!(
            iteration,
            expected_improvement = proposal.value,
            mutual_information = value,
            "evaluated surrogate proposal"
        );
        observations.push(index, design, value);
    }

    if stopped_early {
        info!(
            evaluations = observations.len(),
            elapsed = ?start.elapsed(),
            "design search stopped by its time budget"
        );
    }
    observations.best(stopped_early)
}

/// Maximize the acquisition function from random starts.
///
/// Returns the best converged local maximum. If no attempt converges
/// within the allowed rounds of fresh starts, the best point of the
/// unconverged attempts is used.
fn propose_location<F, R>(
    acquisition: F,
    bounds: &[Bounds],
    space: &DesignSpace,
    config: &StrategyConfig,
    deadline: Instant,
    rng: &mut R,
) -> Option<Ascent>
where
    F: Fn(&[f64]) -> f64,
    R: Rng + ?Sized,
{
    let mut fallback: Option<Ascent> = None;
    for round in 0..PROPOSAL_ROUNDS {
        let mut converged: Option<Ascent> = None;
        let mut out_of_time = false;
        for (_, start) in space.sample(config.n_restarts, rng) {
            if start.dim() != bounds.len() {
                continue;
            }
            match maximize(&acquisition, start.values(), bounds, &config.local_search) {
                Ok(ascent) => {
                    if converged.as_ref().map_or(true, |best| ascent.value > best.value) {
                        converged = Some(ascent);
                    }
                }
                Err(AscentError::NotConverged { best, .. }) => {
                    if fallback.as_ref().map_or(true, |prev| best.value > prev.value) {
                        fallback = Some(best);
                    }
                }
                Err(AscentError::NonFinite) => (),
            }
            if Instant::now() >= deadline {
                out_of_time = true;
                break;
            }
        }
        if converged.is_some() {
            return converged;
        }
        if out_of_time {
            break;
        }
        debug!(round, "no local search converged, retrying with fresh starts");
    }

    if fallback.is_some() {
        warn!("no local search converged, using the best unconverged point");
    }
    fallback
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::design::DesignDimension;
    use crate::likelihood::test_likelihoods::logistic;
    use pretty_assertions::assert_eq;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    fn linspace(n: usize) -> Particles {
        let values = (0..n).map(|i| i as f64 / (n - 1) as f64).collect();
        Particles::from_columns(vec![("x".to_string(), values)]).unwrap()
    }

    fn line_catalog(n: usize) -> DesignSpace {
        let designs = (0..n)
            .map(|i| Design::new(vec![i as f64 / (n - 1) as f64]))
            .collect();
        DesignSpace::catalog(designs).unwrap()
    }

    fn grid_config() -> StrategyConfig {
        StrategyConfig {
            mode: SearchMode::Grid,
            ..StrategyConfig::default()
        }
    }

    #[test]
    fn grid_picks_the_most_ambiguous_design() {
        let mut rng = ChaCha8Rng::seed_from_u64(42);
        let choice = select_next_design(
            &linspace(101),
            &line_catalog(3),
            &[0, 1],
            &logistic(1.),
            &grid_config(),
            &mut rng,
        )
        .unwrap();
        assert_eq!(choice.index, Some(1));
        assert_eq!(choice.design, Design::new(vec![0.5]));
        assert_eq!(choice.evaluations, 3);
        assert!(!choice.stopped_early);
    }

    #[test]
    fn grid_sampling_evaluates_a_share_of_the_catalog() {
        let mut rng = ChaCha8Rng::seed_from_u64(42);
        let config = StrategyConfig {
            sample_percentage: 25.,
            ..grid_config()
        };
        let choice = select_next_design(
            &linspace(51),
            &line_catalog(21),
            &[0, 1],
            &logistic(4.),
            &config,
            &mut rng,
        )
        .unwrap();
        assert_eq!(choice.evaluations, 5);

        let config = StrategyConfig {
            sample_percentage: 1.,
            ..grid_config()
        };
        let choice = select_next_design(
            &linspace(51),
            &line_catalog(21),
            &[0, 1],
            &logistic(4.),
            &config,
            &mut rng,
        )
        .unwrap();
        assert_eq!(choice.evaluations, 1);
    }

    #[test]
    fn grid_ties_go_to_the_first_design() {
        let flat = crate::likelihood::FnLikelihood::new(|_a, _t: &[f64], _d: &Design| 0.5);
        let mut rng = ChaCha8Rng::seed_from_u64(1);
        let (particles, catalog) = (linspace(5), line_catalog(4));
        let choice =
            select_next_design(&particles, &catalog, &[0, 1], &flat, &grid_config(), &mut rng)
                .unwrap();
        assert_eq!(choice.index, Some(0));
    }

    #[test]
    fn configuration_errors() {
        let mut rng = ChaCha8Rng::seed_from_u64(1);
        let particles = linspace(5);
        let lik = logistic(1.);
        let bounded = DesignSpace::bounded(vec![DesignDimension::continuous(0., 1.)]).unwrap();
        let catalog = line_catalog(3);
        let grid = grid_config();

        let result = select_next_design(&particles, &bounded, &[0, 1], &lik, &grid, &mut rng);
        assert_eq!(result.unwrap_err(), EngineError::GridRequiresCatalog);

        let result = select_next_design(&particles, &catalog, &[], &lik, &grid, &mut rng);
        assert_eq!(result.unwrap_err(), EngineError::EmptyAnswerSet);

        let config = StrategyConfig {
            sample_percentage: 0.5,
            ..grid_config()
        };
        let result = select_next_design(&particles, &catalog, &[0, 1], &lik, &config, &mut rng);
        assert!(matches!(result, Err(EngineError::InvalidSettings(_))));

        let config = StrategyConfig {
            n_starting_points: 0,
            ..StrategyConfig::default()
        };
        let result = select_next_design(&particles, &catalog, &[0, 1], &lik, &config, &mut rng);
        assert!(matches!(result, Err(EngineError::InvalidSettings(_))));
    }

    #[test]
    fn bayesian_search_on_a_catalog() {
        let mut rng = ChaCha8Rng::seed_from_u64(7);
        let config = StrategyConfig {
            n_starting_points: 4,
            n_iterations: 6,
            ..StrategyConfig::default()
        };
        let space = line_catalog(41);
        let particles = linspace(101);
        let choice =
            select_next_design(&particles, &space, &[0, 1], &logistic(8.), &config, &mut rng)
                .unwrap();

        let index = choice.index.unwrap();
        let DesignSpace::Catalog(catalog) = &space else {
            unreachable!()
        };
        assert_eq!(catalog.designs()[index], choice.design);
        assert!(choice.evaluations <= 10);
        let edge = mutual_information(&particles, &[0, 1], &logistic(8.), &catalog.designs()[0]);
        assert!(choice.mutual_information >= edge);
        assert!(choice.mutual_information > 0.);
    }

    #[test]
    fn bayesian_search_in_a_bounded_space() {
        let mut rng = ChaCha8Rng::seed_from_u64(11);
        let space = DesignSpace::bounded(vec![
            DesignDimension::continuous(-1., 2.),
            DesignDimension::Categorical(vec![0., 1., 2.]),
        ])
        .unwrap();
        let config = StrategyConfig {
            n_starting_points: 5,
            n_iterations: 5,
            ..StrategyConfig::default()
        };
        let choice =
            select_next_design(&linspace(51), &space, &[0, 1], &logistic(4.), &config, &mut rng)
                .unwrap();
        assert_eq!(choice.index, None);
        assert!((-1. ..=2.).contains(&choice.design[0]));
        assert!([0., 1., 2.].contains(&choice.design[1]));
    }

    #[test]
    fn exhausted_budget_keeps_the_first_evaluation() {
        let mut rng = ChaCha8Rng::seed_from_u64(3);
        let config = StrategyConfig {
            max_time: Duration::ZERO,
            n_iterations: 1000,
            ..StrategyConfig::default()
        };
        let (particles, catalog) = (linspace(21), line_catalog(11));
        let choice =
            select_next_design(&particles, &catalog, &[0, 1], &logistic(2.), &config, &mut rng)
                .unwrap();
        assert!(choice.stopped_early);
        assert_eq!(choice.evaluations, 1);
    }

    #[test]
    fn random_mode_draws_one_design() {
        let mut rng = ChaCha8Rng::seed_from_u64(3);
        let config = StrategyConfig {
            mode: SearchMode::Random,
            ..StrategyConfig::default()
        };
        let (particles, catalog) = (linspace(21), line_catalog(11));
        let choice =
            select_next_design(&particles, &catalog, &[0, 1], &logistic(2.), &config, &mut rng)
                .unwrap();
        assert_eq!(choice.evaluations, 1);
        assert!(choice.index.unwrap() < 11);
    }

    #[test]
    fn unconverged_local_searches_fall_back_to_their_best_point() {
        let mut rng = ChaCha8Rng::seed_from_u64(4);
        let space = DesignSpace::bounded(vec![DesignDimension::continuous(0., 1.)]).unwrap();
        let config = StrategyConfig {
            local_search: AdamOptions {
                max_steps: 1,
                ..AdamOptions::default()
            },
            ..StrategyConfig::default()
        };
        let deadline = Instant::now() + Duration::from_secs(60);
        let proposal =
            propose_location(|x: &[f64]| x[0], &space.bounds(), &space, &config, deadline, &mut rng)
                .unwrap();
        assert_eq!(proposal.steps, 1);
        assert_eq!(proposal.value, proposal.point[0]);
        assert!((0. ..=1.).contains(&proposal.point[0]));
    }

    #[test]
    fn non_finite_acquisition_gives_no_proposal() {
        let mut rng = ChaCha8Rng::seed_from_u64(4);
        let space = DesignSpace::bounded(vec![DesignDimension::continuous(0., 1.)]).unwrap();
        let config = StrategyConfig::default();
        let deadline = Instant::now() + Duration::from_secs(60);
        let proposal = propose_location(
            |_: &[f64]| f64::NAN,
            &space.bounds(),
            &space,
            &config,
            deadline,
            &mut rng,
        );
        assert_eq!(proposal, None);
    }

    #[test]
    fn surrogate_failure_keeps_the_starting_points() {
        // identical starting points and no room for jitter make the
        // kernel matrix singular
        let mut rng = ChaCha8Rng::seed_from_u64(2);
        let config = StrategyConfig {
            n_starting_points: 5,
            n_iterations: 10,
            gp: GpSettings {
                noise: 1e-300,
                max_jitter_attempts: 0,
                ..GpSettings::default()
            },
            ..StrategyConfig::default()
        };
        let space = DesignSpace::catalog(vec![Design::new(vec![0.5])]).unwrap();
        let choice =
            select_next_design(&linspace(11), &space, &[0, 1], &logistic(2.), &config, &mut rng)
                .unwrap();
        assert_eq!(choice.evaluations, 5);
        assert_eq!(choice.index, Some(0));
        assert!(!choice.stopped_early);
    }

    #[test]
    fn invalid_surrogate_settings_are_rejected() {
        let mut rng = ChaCha8Rng::seed_from_u64(2);
        let config = StrategyConfig {
            gp: GpSettings {
                length_scale: 0.,
                ..GpSettings::default()
            },
            ..StrategyConfig::default()
        };
        let (particles, catalog) = (linspace(5), line_catalog(3));
        let result =
            select_next_design(&particles, &catalog, &[0, 1], &logistic(1.), &config, &mut rng);
        assert!(matches!(result, Err(EngineError::InvalidSettings(_))));
    }

    #[test]
    fn config_round_trips_through_json() {
        let config = StrategyConfig::default();
        let json = serde_json::to_string(&config).unwrap();
        let back: StrategyConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(back, config);
    }
}
