//! Simulated respondents with known parameters.
//!
//! Every respondent draws its true parameters from the prior, answers the
//! designs chosen by the experiment with the probabilities of the
//! likelihood, and the posterior estimates after each answer are
//! recorded. Respondents run in parallel on a rayon thread pool, each
//! with its own random stream, so a run is reproducible for a fixed seed
//! independently of the number of threads.

use std::collections::BTreeMap;
use std::time::Instant;

use anyhow::{Context, Result};
use arrow::{
    array::{ArrayBuilder, ArrayRef, PrimitiveBuilder, StructArray},
    datatypes::{DataType, Field, Float64Type, Int64Type, UInt64Type},
};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use rayon::prelude::*;
use rayon::ThreadPoolBuilder;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::design::Design;
use crate::estimates::Estimates;
use crate::experiment::{Experiment, Profile};
use crate::likelihood::{evaluate, Answer, Likelihood};
use crate::particles::Particles;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum DesignSelection {
    /// Designs chosen by the experiment's search strategy.
    #[default]
    Optimized,
    /// Designs drawn at random from the design space.
    Random,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimulationSettings {
    pub num_respondents: usize,
    pub num_questions: usize,
    pub seed: u64,
    /// Worker threads. `None` uses one per core.
    pub num_threads: Option<usize>,
    pub design_selection: DesignSelection,
}

impl Default for SimulationSettings {
    fn default() -> Self {
        Self {
            num_respondents: 10,
            num_questions: 10,
            seed: 42,
            num_threads: None,
            design_selection: DesignSelection::default(),
        }
    }
}

/// The state after one simulated answer.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RoundRecord {
    pub respondent: u64,
    /// Number of the answered question, starting at zero.
    pub question: u64,
    pub design: Design,
    pub answer: Answer,
    /// The most likely answer under the true parameters.
    pub true_answer: Answer,
    /// Mutual information of the design when it was chosen.
    pub mutual_information: f64,
    /// Wall time of choosing the design and updating the posterior.
    pub round_seconds: f64,
    pub truth: Vec<f64>,
    pub estimates: Estimates,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SimulationTrace {
    pub parameter_names: Vec<String>,
    pub design_dim: usize,
    pub records: Vec<RoundRecord>,
}

/// Probabilities of every answer for a single particle. The last answer
/// takes the remaining mass.
fn answer_probabilities<L>(
    likelihood: &L,
    answers: &[Answer],
    truth: &Particles,
    design: &Design,
) -> Vec<f64>
where
    L: Likelihood + ?Sized,
{
    let mut probs = Vec::with_capacity(answers.len());
    let mut prob = [0f64];
    if let Some((_, rest)) = answers.split_last() {
        for &answer in rest {
            evaluate(likelihood, answer, truth, design, &mut prob);
            probs.push(prob[0]);
        }
        let total: f64 = probs.iter().sum();
        probs.push((1. - total).max(0.));
    }
    probs
}

/// Draw an answer for a single particle by inverting the cumulative
/// answer probabilities. Also returns the most likely answer, the first
/// one on ties.
fn simulate_answer<L, R>(
    likelihood: &L,
    answers: &[Answer],
    truth: &Particles,
    design: &Design,
    rng: &mut R,
) -> (Answer, Answer)
where
    L: Likelihood + ?Sized,
    R: Rng + ?Sized,
{
    let probs = answer_probabilities(likelihood, answers, truth, design);
    let Some(&last) = answers.last() else {
        return (0, 0);
    };

    let most_likely = answers
        .iter()
        .zip(probs.iter())
        .fold(None, |best: Option<(Answer, f64)>, (&answer, &p)| match best {
            Some((_, best_p)) if best_p >= p => best,
            _ => Some((answer, p)),
        })
        .map_or(last, |(answer, _)| answer);

    let u: f64 = rng.random();
    let mut cumulative = 0f64;
    for (&answer, &p) in answers.iter().zip(probs.iter()) {
        cumulative += p;
        if u < cumulative {
            return (answer, most_likely);
        }
    }
    (last, most_likely)
}

fn simulate_respondent<L: Likelihood>(
    experiment: &Experiment<L>,
    settings: &SimulationSettings,
    respondent: u64,
) -> Result<Vec<RoundRecord>> {
    let mut rng = ChaCha8Rng::seed_from_u64(settings.seed);
    rng.set_stream(respondent);

    let truth = experiment
        .prior()
        .sample(1, &mut rng)
        .context("Could not draw the true parameters")?;

    let mut round_start = Instant::now();
    let (mut profile, mut mutual_information) = match settings.design_selection {
        DesignSelection::Optimized => {
            let (profile, choice) = experiment
                .create_profile(&mut rng)
                .context("Could not choose the first design")?;
            (profile, choice.mutual_information)
        }
        DesignSelection::Random => {
            let design = experiment.random_design(&mut rng)?;
            let profile = Profile {
                design_history: vec![design],
                ..Profile::default()
            };
            (profile, f64::NAN)
        }
    };

    let mut records = Vec::with_capacity(settings.num_questions);
    for question in 0..settings.num_questions {
        let design = profile
            .pending_design()
            .cloned()
            .context("Profile has no pending design")?;
        let (answer, true_answer) = simulate_answer(
            experiment.likelihood(),
            experiment.answers(),
            &truth,
            &design,
            &mut rng,
        );
        profile.answer_history.push(answer);

        let particles = experiment
            .posterior(&mut profile, &mut rng)
            .with_context(|| format!("Posterior update failed after question {question}"))?;
        records.push(RoundRecord {
            respondent,
            question: question as u64,
            design,
            answer,
            true_answer,
            mutual_information,
            round_seconds: round_start.elapsed().as_secs_f64(),
            truth: truth.row(0).to_vec(),
            estimates: Estimates::from_particles(particles),
        });
        round_start = Instant::now();

        if question + 1 < settings.num_questions {
            let (next, info) = match settings.design_selection {
                DesignSelection::Optimized => {
                    let choice = experiment
                        .next_design(particles, &mut rng)
                        .with_context(|| {
                            format!("Design search failed after question {question}")
                        })?;
                    (choice.design, choice.mutual_information)
                }
                DesignSelection::Random => (experiment.random_design(&mut rng)?, f64::NAN),
            };
            profile.design_history.push(next);
            mutual_information = info;
        }
    }
    Ok(records)
}

/// Simulate `settings.num_respondents` respondents answering
/// `settings.num_questions` questions each.
pub fn run_simulation<L: Likelihood>(
    experiment: &Experiment<L>,
    settings: &SimulationSettings,
) -> Result<SimulationTrace> {
    let pool = ThreadPoolBuilder::new()
        .num_threads(settings.num_threads.unwrap_or(0))
        .thread_name(|i| format!("bace-respondent-{}", i))
        .build()
        .context("Could not start thread pool")?;

    let results: Vec<Result<Vec<RoundRecord>>> = pool.install(|| {
        (0..settings.num_respondents as u64)
            .into_par_iter()
            .map(|respondent| {
                simulate_respondent(experiment, settings, respondent)
                    .with_context(|| format!("Respondent {respondent} failed"))
            })
            .collect()
    });

    let mut records = Vec::with_capacity(settings.num_respondents * settings.num_questions);
    for result in results {
        records.extend(result?);
    }
    info!(
        respondents = settings.num_respondents,
        questions = settings.num_questions,
        "simulation finished"
    );

    Ok(SimulationTrace {
        parameter_names: experiment.prior().names(),
        design_dim: experiment.space().dim(),
        records,
    })
}

impl SimulationTrace {
    /// Mean over respondents of the squared error of the posterior means,
    /// summed over parameters, for every question.
    pub fn mse_by_question(&self) -> Vec<f64> {
        let mut sums: BTreeMap<u64, (f64, usize)> = BTreeMap::new();
        for record in self.records.iter() {
            let truth: BTreeMap<String, f64> = self
                .parameter_names
                .iter()
                .cloned()
                .zip(record.truth.iter().copied())
                .collect();
            let error: f64 = record.estimates.squared_errors(&truth).values().sum();
            let entry = sums.entry(record.question).or_insert((0., 0));
            entry.0 += error;
            entry.1 += 1;
        }
        sums.into_values()
            .map(|(sum, count)| sum / count as f64)
            .collect()
    }

    /// One row per answered question.
    ///
    /// Columns: `respondent`, `question`, `answer`, `true_answer`,
    /// `mutual_information`, `round_seconds`, `design_<j>` for every design
    /// attribute, then `true_<name>`, `mean_<name>` and `std_<name>` for
    /// every parameter.
    pub fn to_arrow(&self) -> Result<StructArray> {
        let mut respondent = PrimitiveBuilder::<UInt64Type>::new();
        let mut question = PrimitiveBuilder::<UInt64Type>::new();
        let mut answer = PrimitiveBuilder::<Int64Type>::new();
        let mut true_answer = PrimitiveBuilder::<Int64Type>::new();
        let mut mutual_information = PrimitiveBuilder::<Float64Type>::new();
        let mut round_seconds = PrimitiveBuilder::<Float64Type>::new();
        let mut designs: Vec<PrimitiveBuilder<Float64Type>> =
            (0..self.design_dim).map(|_| PrimitiveBuilder::new()).collect();
        let num_params = self.parameter_names.len();
        let mut truths: Vec<PrimitiveBuilder<Float64Type>> =
            (0..num_params).map(|_| PrimitiveBuilder::new()).collect();
        let mut means: Vec<PrimitiveBuilder<Float64Type>> =
            (0..num_params).map(|_| PrimitiveBuilder::new()).collect();
        let mut stds: Vec<PrimitiveBuilder<Float64Type>> =
            (0..num_params).map(|_| PrimitiveBuilder::new()).collect();

        for record in self.records.iter() {
            respondent.append_value(record.respondent);
            question.append_value(record.question);
            answer.append_value(record.answer);
            true_answer.append_value(record.true_answer);
            mutual_information.append_value(record.mutual_information);
            round_seconds.append_value(record.round_seconds);
            anyhow::ensure!(
                record.design.dim() == self.design_dim,
                "Design of respondent {} has {} attributes, expected {}",
                record.respondent,
                record.design.dim(),
                self.design_dim
            );
            for (builder, &value) in designs.iter_mut().zip(record.design.values()) {
                builder.append_value(value);
            }
            anyhow::ensure!(
                record.truth.len() == num_params && record.estimates.parameters.len() == num_params,
                "Record of respondent {} does not match the parameters",
                record.respondent
            );
            for (builder, &value) in truths.iter_mut().zip(record.truth.iter()) {
                builder.append_value(value);
            }
            for (j, param) in record.estimates.parameters.iter().enumerate() {
                means[j].append_value(param.mean);
                stds[j].append_value(param.std);
            }
        }

        let mut fields = vec![
            Field::new("respondent", DataType::UInt64, false),
            Field::new("question", DataType::UInt64, false),
            Field::new("answer", DataType::Int64, false),
            Field::new("true_answer", DataType::Int64, false),
            Field::new("mutual_information", DataType::Float64, false),
            Field::new("round_seconds", DataType::Float64, false),
        ];
        let mut arrays: Vec<ArrayRef> = vec![
            ArrayBuilder::finish(&mut respondent),
            ArrayBuilder::finish(&mut question),
            ArrayBuilder::finish(&mut answer),
            ArrayBuilder::finish(&mut true_answer),
            ArrayBuilder::finish(&mut mutual_information),
            ArrayBuilder::finish(&mut round_seconds),
        ];
        for (j, builder) in designs.iter_mut().enumerate() {
            fields.push(Field::new(format!("design_{j}"), DataType::Float64, false));
            arrays.push(ArrayBuilder::finish(builder));
        }
        let groups = [("true", &mut truths), ("mean", &mut means), ("std", &mut stds)];
        for (prefix, builders) in groups {
            for (name, builder) in self.parameter_names.iter().zip(builders.iter_mut()) {
                fields.push(Field::new(format!("{prefix}_{name}"), DataType::Float64, false));
                arrays.push(ArrayBuilder::finish(builder));
            }
        }

        StructArray::try_new(fields.into(), arrays, None).context("Could not assemble the trace")
    }
}
