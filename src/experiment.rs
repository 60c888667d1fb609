//! One adaptive survey: the plugins and settings shared by every
//! respondent, and the per-respondent operations a web layer calls.
//!
//! The experiment holds no respondent state. A [`Profile`] is owned by
//! the caller, stored wherever it likes, and passed back in.

use rand::Rng;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::design::{Design, DesignSpace};
use crate::design_optimizer::{select_next_design, DesignChoice, SearchMode, StrategyConfig};
use crate::error::{EngineError, Result};
use crate::estimates::Estimates;
use crate::likelihood::{Answer, Likelihood};
use crate::particles::Particles;
use crate::pmc::{update_posterior, PmcSettings};
use crate::prior::Prior;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExperimentSettings {
    /// Particles per posterior update.
    pub num_particles: usize,
    pub pmc: PmcSettings,
    pub strategy: StrategyConfig,
    /// Final estimates use this many times more particles.
    pub estimate_particle_factor: usize,
    /// Rounds of the filter for final estimates.
    pub estimate_rounds: usize,
}

impl Default for ExperimentSettings {
    fn default() -> Self {
        Self {
            num_particles: 1000,
            pmc: PmcSettings::default(),
            strategy: StrategyConfig::default(),
            estimate_particle_factor: 10,
            estimate_rounds: 10,
        }
    }
}

/// Design and answer history of one respondent, with the latest
/// particle population.
///
/// The design history may be one longer than the answer history: the
/// last design has been shown but not answered yet. Each posterior update
/// starts from the stored particles and replaces them.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Profile {
    pub design_history: Vec<Design>,
    pub answer_history: Vec<Answer>,
    #[serde(default)]
    pub particles: Option<Particles>,
}

impl Profile {
    /// The design waiting for an answer.
    pub fn pending_design(&self) -> Option<&Design> {
        if self.design_history.len() > self.answer_history.len() {
            self.design_history.last()
        } else {
            None
        }
    }

    /// Designs that have an answer.
    pub fn answered_designs(&self) -> &[Design] {
        let n = self.answer_history.len().min(self.design_history.len());
        &self.design_history[..n]
    }
}

pub struct Experiment<L> {
    prior: Prior,
    likelihood: L,
    space: DesignSpace,
    answers: Vec<Answer>,
    settings: ExperimentSettings,
}

impl<L: Likelihood> Experiment<L> {
    pub fn new(
        prior: Prior,
        likelihood: L,
        space: DesignSpace,
        answers: Vec<Answer>,
        settings: ExperimentSettings,
    ) -> Result<Self> {
        if answers.is_empty() {
            return Err(EngineError::EmptyAnswerSet);
        }
        if prior.dim() == 0 {
            return Err(EngineError::InvalidSettings(
                "the prior has no parameters".into(),
            ));
        }
        if settings.num_particles == 0 || settings.estimate_particle_factor == 0 {
            return Err(EngineError::InvalidSettings(
                "the number of particles must be at least 1".into(),
            ));
        }
        let catalog = matches!(space, DesignSpace::Catalog(_));
        if settings.strategy.mode == SearchMode::Grid && !catalog {
            return Err(EngineError::GridRequiresCatalog);
        }
        Ok(Self {
            prior,
            likelihood,
            space,
            answers,
            settings,
        })
    }

    pub fn settings(&self) -> &ExperimentSettings {
        &self.settings
    }

    pub fn prior(&self) -> &Prior {
        &self.prior
    }

    pub fn likelihood(&self) -> &L {
        &self.likelihood
    }

    pub fn space(&self) -> &DesignSpace {
        &self.space
    }

    pub fn answers(&self) -> &[Answer] {
        &self.answers
    }

    /// Start a respondent: the first design is optimized against the prior.
    pub fn create_profile<R: Rng + ?Sized>(
        &self,
        rng: &mut R,
    ) -> Result<(Profile, DesignChoice)> {
        let particles = self.prior.sample(self.settings.num_particles, rng)?;
        let choice = self.next_design(&particles, rng)?;
        let profile = Profile {
            design_history: vec![choice.design.clone()],
            answer_history: Vec::new(),
            particles: Some(particles),
        };
        Ok((profile, choice))
    }

    /// Update the posterior over the parameters given the answered part of
    /// the history, starting from the particles stored in the profile.
    ///
    /// The new population is stored back into the profile.
    pub fn posterior<'a, R: Rng + ?Sized>(
        &self,
        profile: &'a mut Profile,
        rng: &mut R,
    ) -> Result<&'a Particles> {
        let particles = update_posterior(
            profile.particles.take(),
            profile.answered_designs(),
            &profile.answer_history,
            &self.prior,
            &self.likelihood,
            self.settings.num_particles,
            &self.settings.pmc,
            rng,
        )?;
        Ok(profile.particles.insert(particles))
    }

    pub fn next_design<R: Rng + ?Sized>(
        &self,
        particles: &Particles,
        rng: &mut R,
    ) -> Result<DesignChoice> {
        select_next_design(
            particles,
            &self.space,
            &self.answers,
            &self.likelihood,
            &self.settings.strategy,
            rng,
        )
    }

    /// Record the answer to the pending design and return the next design.
    ///
    /// Without an answer the pending design is returned again.
    pub fn record_answer<R: Rng + ?Sized>(
        &self,
        profile: &mut Profile,
        answer: Option<Answer>,
        rng: &mut R,
    ) -> Result<Design> {
        let Some(answer) = answer else {
            if let Some(design) = profile.pending_design() {
                return Ok(design.clone());
            }
            let particles = self.posterior(profile, rng)?;
            let choice = self.next_design(particles, rng)?;
            profile.design_history.push(choice.design.clone());
            return Ok(choice.design);
        };

        if !self.answers.contains(&answer) {
            return Err(EngineError::UnknownAnswer(answer));
        }
        if profile.pending_design().is_none() {
            return Err(EngineError::HistoryLengthMismatch {
                designs: profile.design_history.len(),
                answers: profile.answer_history.len() + 1,
            });
        }
        profile.answer_history.push(answer);

        let particles = self.posterior(profile, rng)?;
        let choice = self.next_design(particles, rng)?;
        debug!(
            questions = profile.answer_history.len(),
            mutual_information = choice.mutual_information,
            "selected next design"
        );
        profile.design_history.push(choice.design.clone());
        Ok(choice.design)
    }

    /// A design drawn at random from the design space.
    pub fn random_design<R: Rng + ?Sized>(&self, rng: &mut R) -> Result<Design> {
        self.space
            .sample(1, rng)
            .into_iter()
            .next()
            .map(|(_, design)| design)
            .ok_or(EngineError::NoProgress)
    }

    /// Summaries from a larger posterior run than the one used between
    /// questions.
    pub fn estimates<R: Rng + ?Sized>(
        &self,
        profile: &Profile,
        rng: &mut R,
    ) -> Result<Estimates> {
        let settings = PmcSettings {
            num_rounds: self.settings.estimate_rounds,
            ..self.settings.pmc.clone()
        };
        let particles = update_posterior(
            None,
            profile.answered_designs(),
            &profile.answer_history,
            &self.prior,
            &self.likelihood,
            self.settings.num_particles * self.settings.estimate_particle_factor,
            &settings,
            rng,
        )?;
        Ok(Estimates::from_particles(&particles))
    }
}
