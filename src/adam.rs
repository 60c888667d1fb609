//! Bounded Adam ascent with finite difference gradients.
//!
//! The design search maximizes the acquisition function with this. The
//! search runs in coordinates scaled to the unit box, so one learning rate
//! fits every design dimension, and each step is projected back into the
//! box. Dimensions with zero width stay fixed.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::design::Bounds;

/// Settings for the local ascent
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AdamOptions {
    /// First moment decay rate (default: 0.9)
    pub beta1: f64,
    /// Second moment decay rate (default: 0.999)
    pub beta2: f64,
    /// Small constant for numerical stability (default: 1e-8)
    pub epsilon: f64,
    /// Learning rate as a fraction of the bound width (default: 0.05)
    pub learning_rate: f64,
    /// Maximum number of steps of one ascent
    pub max_steps: usize,
    /// Relative improvement below which a step counts as stalled
    pub tolerance: f64,
    /// Number of consecutive stalled steps that count as converged
    pub patience: usize,
    /// Finite difference step as a fraction of the bound width
    pub gradient_step: f64,
}

impl Default for AdamOptions {
    fn default() -> Self {
        Self {
            beta1: 0.9,
            beta2: 0.999,
            epsilon: 1e-8,
            learning_rate: 0.05,
            max_steps: 200,
            tolerance: 1e-9,
            patience: 10,
            gradient_step: 1e-4,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Ascent {
    pub point: Vec<f64>,
    pub value: f64,
    pub steps: usize,
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum AscentError {
    /// The step limit was reached while the objective still improved. The
    /// best point seen so far is kept.
    #[error("Local ascent did not converge after {steps} steps")]
    NotConverged { best: Ascent, steps: usize },
    #[error("The objective is not finite at the starting point or along the path")]
    NonFinite,
}

/// Adam state over the unit box.
#[derive(Clone)]
pub struct Adam {
    m: Vec<f64>,
    v: Vec<f64>,
    t: u64,
    settings: AdamOptions,
}

impl Adam {
    pub fn new(settings: AdamOptions, dim: usize) -> Self {
        Self {
            m: vec![0.; dim],
            v: vec![0.; dim],
            t: 0,
            settings,
        }
    }

    /// Take one ascent step along `gradient` and project `point` back into
    /// the unit box. Returns the largest coordinate change.
    pub fn advance(&mut self, gradient: &[f64], point: &mut [f64]) -> f64 {
        assert!(gradient.len() == point.len());
        self.t += 1;
        let s = &self.settings;
        let correction1 = 1. - s.beta1.powi(self.t as i32);
        let correction2 = 1. - s.beta2.powi(self.t as i32);

        let mut largest = 0f64;
        for (((m, v), &g), x) in self
            .m
            .iter_mut()
            .zip(self.v.iter_mut())
            .zip(gradient)
            .zip(point.iter_mut())
        {
            *m = s.beta1 * *m + (1. - s.beta1) * g;
            *v = s.beta2 * *v + (1. - s.beta2) * g * g;
            let m_hat = *m / correction1;
            let v_hat = *v / correction2;
            let new = (*x + s.learning_rate * m_hat / (v_hat.sqrt() + s.epsilon)).clamp(0., 1.);
            largest = largest.max((new - *x).abs());
            *x = new;
        }
        largest
    }
}

struct UnitBox<'a> {
    bounds: &'a [Bounds],
    buffer: Vec<f64>,
}

impl UnitBox<'_> {
    fn to_unit(&self, x: &[f64]) -> Vec<f64> {
        x.iter()
            .zip(self.bounds)
            .map(|(&x, b)| {
                if b.width() > 0. {
                    ((x - b.low) / b.width()).clamp(0., 1.)
                } else {
                    0.
                }
            })
            .collect()
    }

    fn to_design(&mut self, u: &[f64]) -> &[f64] {
        self.buffer.clear();
        self.buffer
            .extend(u.iter().zip(self.bounds).map(|(&u, b)| b.low + u * b.width()));
        &self.buffer
    }
}

/// Maximize `objective` inside `bounds`, starting from `start`.
pub fn maximize<F>(
    mut objective: F,
    start: &[f64],
    bounds: &[Bounds],
    options: &AdamOptions,
) -> Result<Ascent, AscentError>
where
    F: FnMut(&[f64]) -> f64,
{
    assert!(start.len() == bounds.len());
    let dim = bounds.len();
    let mut unit = UnitBox {
        bounds,
        buffer: Vec::with_capacity(dim),
    };
    let mut u = unit.to_unit(start);

    let mut value = objective(unit.to_design(&u));
    if !value.is_finite() {
        return Err(AscentError::NonFinite);
    }
    let mut best = Ascent {
        point: unit.to_design(&u).to_vec(),
        value,
        steps: 0,
    };

    let mut adam = Adam::new(*options, dim);
    let mut gradient = vec![0f64; dim];
    let mut stalled = 0;
    let h = options.gradient_step;

    for step in 1..=options.max_steps {
        for j in 0..dim {
            if !(bounds[j].width() > 0.) {
                gradient[j] = 0.;
                continue;
            }
            let center = u[j];
            let upper = (center + h).min(1.);
            let lower = (center - h).max(0.);
            u[j] = upper;
            let f_upper = objective(unit.to_design(&u));
            u[j] = lower;
            let f_lower = objective(unit.to_design(&u));
            u[j] = center;
            gradient[j] = (f_upper - f_lower) / (upper - lower);
        }
        if gradient.iter().any(|g| !g.is_finite()) {
            return Err(AscentError::NonFinite);
        }

        let moved = adam.advance(&gradient, &mut u);
        let new_value = objective(unit.to_design(&u));
        if !new_value.is_finite() {
            return Err(AscentError::NonFinite);
        }

        let improvement = new_value - value;
        value = new_value;
        if value > best.value {
            best = Ascent {
                point: unit.to_design(&u).to_vec(),
                value,
                steps: step,
            };
        }

        if moved == 0. || improvement.abs() <= options.tolerance * value.abs().max(1.) {
            stalled += 1;
        } else {
            stalled = 0;
        }
        if stalled >= options.patience {
            best.steps = step;
            return Ok(best);
        }
    }

    Err(AscentError::NotConverged {
        best,
        steps: options.max_steps,
    })
}
