//! Bayesian adaptive choice experiments.
//!
//! A respondent answers a sequence of questions (designs). After every
//! answer the belief about the respondent's preference parameters is
//! updated with a population Monte Carlo filter, and the next design is
//! the one whose answer is expected to be most informative about them.
//!
//! ```ignore
//! use bace_rs::{
//!     select_next_design, update_posterior, Design, DesignSpace, FnLikelihood,
//!     PmcSettings, Prior, StrategyConfig, Uniform,
//! };
//! use rand::SeedableRng;
//!
//! let prior = Prior::new().with("x", Uniform::new(0., 1.)?);
//! let likelihood = FnLikelihood::new(|answer, theta: &[f64], design: &Design| {
//!     let p = 1. / (1. + (design[0] - theta[0]).exp());
//!     if answer == 1 { p } else { 1. - p }
//! });
//! let space = DesignSpace::catalog(vec![Design::new(vec![0.]), Design::new(vec![0.5])])?;
//! let mut rng = rand_chacha::ChaCha8Rng::seed_from_u64(42);
//!
//! let particles = update_posterior(
//!     None, &[], &[], &prior, &likelihood, 1000, &PmcSettings::default(), &mut rng,
//! )?;
//! let choice = select_next_design(
//!     &particles, &space, &[0, 1], &likelihood, &StrategyConfig::default(), &mut rng,
//! )?;
//! ```

pub(crate) mod acquisition;
pub(crate) mod adam;
pub(crate) mod design;
pub(crate) mod design_optimizer;
pub(crate) mod error;
pub(crate) mod estimates;
pub(crate) mod experiment;
pub(crate) mod gaussian_process;
pub(crate) mod information;
pub(crate) mod likelihood;
pub(crate) mod math;
pub(crate) mod particles;
pub(crate) mod pmc;
pub(crate) mod prior;
pub(crate) mod resample;
pub mod simulation;

pub use acquisition::expected_improvement;
pub use adam::{maximize, Adam, AdamOptions, Ascent, AscentError};
pub use design::{
    Bounds, BoundedSpace, Design, DesignCatalog, DesignDimension, DesignSampler, DesignSpace,
};
pub use design_optimizer::{select_next_design, DesignChoice, SearchMode, StrategyConfig};
pub use error::{EngineError, Result};
pub use estimates::{Estimates, ParameterSummary};
pub use experiment::{Experiment, ExperimentSettings, Profile};
pub use gaussian_process::{GaussianProcess, GpSettings};
pub use information::mutual_information;
pub use likelihood::{history_log_likelihood, Answer, FnLikelihood, Likelihood};
pub use particles::Particles;
pub use pmc::{
    update_posterior, update_posterior_with_stats, DegeneracyPolicy, PmcSettings, PmcStats,
};
pub use prior::{Categorical, CustomDistribution, Normal, Prior, PriorDistribution, Uniform};
pub use resample::systematic_resample;
pub use simulation::{
    run_simulation, DesignSelection, RoundRecord, SimulationSettings, SimulationTrace,
};
