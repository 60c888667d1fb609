//! The boundary to the user supplied answer model.

use crate::design::Design;
use crate::error::{EngineError, Result};
use crate::particles::Particles;

/// An observed answer, one element of a fixed finite answer set.
pub type Answer = i64;

/// Probability of an answer given every particle and a design.
///
/// Implementations write `P(answer | theta_i, design)` into `out[i]` for
/// every particle `i`. Values should lie in `[0, 1]`; the engine repairs
/// NaNs and out of range values, but it does not check that the
/// probabilities of all answers sum to one.
pub trait Likelihood: Send + Sync {
    fn likelihood(&self, answer: Answer, particles: &Particles, design: &Design, out: &mut [f64]);
}

/// A likelihood given by a closure over a single particle.
///
/// The closure receives the parameter values of one particle in the column
/// order of the population.
pub struct FnLikelihood<F> {
    func: F,
}

impl<F> FnLikelihood<F>
where
    F: Fn(Answer, &[f64], &Design) -> f64 + Send + Sync,
{
    pub fn new(func: F) -> Self {
        Self { func }
    }
}

impl<F> Likelihood for FnLikelihood<F>
where
    F: Fn(Answer, &[f64], &Design) -> f64 + Send + Sync,
{
    fn likelihood(&self, answer: Answer, particles: &Particles, design: &Design, out: &mut [f64]) {
        particles
            .rows()
            .zip(out.iter_mut())
            .for_each(|(theta, out)| *out = (self.func)(answer, theta, design));
    }
}

impl<L: Likelihood + ?Sized> Likelihood for &L {
    fn likelihood(&self, answer: Answer, particles: &Particles, design: &Design, out: &mut [f64]) {
        (**self).likelihood(answer, particles, design, out)
    }
}

impl<L: Likelihood + ?Sized> Likelihood for Box<L> {
    fn likelihood(&self, answer: Answer, particles: &Particles, design: &Design, out: &mut [f64]) {
        (**self).likelihood(answer, particles, design, out)
    }
}

impl<L: Likelihood + ?Sized> Likelihood for std::sync::Arc<L> {
    fn likelihood(&self, answer: Answer, particles: &Particles, design: &Design, out: &mut [f64]) {
        (**self).likelihood(answer, particles, design, out)
    }
}

#[inline]
fn sanitize(p: f64) -> f64 {
    if p.is_nan() {
        0.
    } else {
        p.clamp(0., 1.)
    }
}

/// Evaluate the likelihood of one answer with NaNs mapped to zero and
/// values clamped into `[0, 1]`.
pub(crate) fn evaluate<L: Likelihood + ?Sized>(
    likelihood: &L,
    answer: Answer,
    particles: &Particles,
    design: &Design,
    out: &mut [f64],
) {
    assert!(out.len() == particles.len());
    out.fill(f64::NAN);
    likelihood.likelihood(answer, particles, design, out);
    out.iter_mut().for_each(|p| *p = sanitize(*p));
}

/// `ln P(answers | theta_i, designs)` for every particle.
///
/// Answers are treated as independent given theta. A zero probability
/// gives `-inf`, never an error.
pub fn history_log_likelihood<L: Likelihood + ?Sized>(
    likelihood: &L,
    particles: &Particles,
    designs: &[Design],
    answers: &[Answer],
) -> Result<Vec<f64>> {
    if designs.len() != answers.len() {
        return Err(EngineError::HistoryLengthMismatch {
            designs: designs.len(),
            answers: answers.len(),
        });
    }

    let mut total = vec![0f64; particles.len()];
    let mut buffer = vec![0f64; particles.len()];
    for (design, &answer) in designs.iter().zip(answers) {
        evaluate(likelihood, answer, particles, design, &mut buffer);
        total
            .iter_mut()
            .zip(buffer.iter())
            .for_each(|(acc, &p)| *acc += p.ln());
    }
    Ok(total)
}

#[cfg(test)]
pub(crate) mod test_likelihoods {
    use super::*;

    /// `P(1 | x, d) = sigmoid(slope * (x - d))` on the first parameter and
    /// the first design attribute.
    pub(crate) fn logistic(slope: f64) -> impl Likelihood {
        FnLikelihood::new(move |answer, theta: &[f64], design: &Design| {
            let p = 1. / (1. + (-slope * (theta[0] - design[0])).exp());
            if answer == 1 {
                p
            } else {
                1. - p
            }
        })
    }
}
