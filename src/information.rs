//! Expected information gain of a design.

use crate::design::Design;
use crate::likelihood::{evaluate, Answer, Likelihood};
use crate::math::{mean, mean_xlogx};
use crate::particles::Particles;

#[inline]
fn xlogx(x: f64) -> f64 {
    if x == 0. {
        0.
    } else {
        x * x.ln()
    }
}

/// Mutual information between the answer to `design` and the parameters,
/// estimated over the particle population.
///
/// For every answer `a`, with `L_i = P(a | theta_i, design)` and `m` the
/// mean of `L`, the contribution is `mean(L ln L) - m ln m`. The last
/// answer is not evaluated; its probabilities are the complement of the
/// others, with non-positive values raised to machine epsilon. The sum is
/// floored at zero.
pub fn mutual_information<L: Likelihood + ?Sized>(
    particles: &Particles,
    answers: &[Answer],
    likelihood: &L,
    design: &Design,
) -> f64 {
    let Some((_, evaluated)) = answers.split_last() else {
        return 0.;
    };
    if particles.is_empty() {
        return 0.;
    }

    let mut buffer = vec![0f64; particles.len()];
    let mut final_likelihood = vec![1f64; particles.len()];
    let mut final_mean = 1f64;
    let mut info = 0f64;

    for &answer in evaluated {
        evaluate(likelihood, answer, particles, design, &mut buffer);
        let m = mean(&buffer);
        info += mean_xlogx(&buffer) - xlogx(m);

        final_likelihood
            .iter_mut()
            .zip(buffer.iter())
            .for_each(|(last, p)| *last -= p);
        final_mean -= m;
    }

    final_likelihood
        .iter_mut()
        .filter(|p| **p <= 0.)
        .for_each(|p| *p = f64::EPSILON);
    if final_mean <= 0. {
        final_mean = f64::EPSILON;
    }
    info += mean_xlogx(&final_likelihood) - xlogx(final_mean);

    if info.is_nan() {
        0.
    } else {
        info.max(0.)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::likelihood::test_likelihoods::logistic;
    use crate::likelihood::FnLikelihood;
    use approx::assert_abs_diff_eq;
    use proptest::prelude::*;

    fn linspace(n: usize) -> Particles {
        let values = (0..n).map(|i| i as f64 / (n - 1) as f64).collect();
        Particles::from_columns(vec![("x".to_string(), values)]).unwrap()
    }

    proptest! {
        #[test]
        fn is_never_negative(
            values in prop::collection::vec(-5f64..5f64, 1..40),
            slope in 0.1f64..20f64,
            d in -5f64..5f64,
        ) {
            let particles = Particles::from_columns(vec![("x".to_string(), values)]).unwrap();
            let design = Design::new(vec![d]);
            let info = mutual_information(&particles, &[0, 1], &logistic(slope), &design);
            prop_assert!(info >= 0.);
            prop_assert!(info <= 2f64.ln() + 1e-9);
        }
    }

    #[test]
    fn binary_answer_matches_closed_form() {
        // half the particles answer 1 for sure, the rest answer 0
        let particles =
            Particles::from_columns(vec![("x".to_string(), vec![0., 0., 1., 1.])]).unwrap();
        let certain = FnLikelihood::new(|answer, theta: &[f64], _design: &Design| {
            if (answer == 1) == (theta[0] > 0.5) {
                1.
            } else {
                0.
            }
        });
        let info = mutual_information(&particles, &[0, 1], &certain, &Design::new(vec![0.]));
        assert_abs_diff_eq!(info, 2f64.ln(), epsilon = 1e-12);
    }

    #[test]
    fn uninformative_design() {
        let flat = FnLikelihood::new(|_answer, _theta: &[f64], _design: &Design| 0.5);
        let info = mutual_information(&linspace(11), &[0, 1], &flat, &Design::new(vec![0.]));
        assert_abs_diff_eq!(info, 0., epsilon = 1e-12);
    }

    #[test]
    fn most_ambiguous_design_is_most_informative() {
        let particles = linspace(101);
        let likelihood = logistic(1.);
        let info: Vec<f64> = [0., 0.5, 1.]
            .iter()
            .map(|&d| mutual_information(&particles, &[0, 1], &likelihood, &Design::new(vec![d])))
            .collect();
        assert!(info[1] > info[0]);
        assert!(info[1] > info[2]);
    }

    #[test]
    fn three_answers_match_the_direct_sum() {
        fn prob(answer: Answer, x: f64) -> f64 {
            match answer {
                0 => 0.6 * (1. - x) + 0.1,
                1 => 0.6 * x + 0.1,
                _ => 0.2,
            }
        }
        let particles = linspace(21);
        let three_way =
            FnLikelihood::new(|answer, theta: &[f64], _design: &Design| prob(answer, theta[0]));
        let design = Design::new(vec![0.]);

        let mut expected = 0.;
        for answer in [0, 1, 2] {
            let probs: Vec<f64> = particles.column(0).map(|x| prob(answer, x)).collect();
            let m = mean(&probs);
            let mean_xlogx = probs.iter().map(|&p| xlogx(p)).sum::<f64>() / probs.len() as f64;
            expected += mean_xlogx - xlogx(m);
        }

        let info = mutual_information(&particles, &[0, 1, 2], &three_way, &design);
        assert!(info > 0.);
        assert_abs_diff_eq!(info, expected, epsilon = 1e-12);
    }

    #[test]
    fn exhausted_last_answer_adds_nothing() {
        // the first two answers already take all the mass
        let particles = linspace(5);
        let binary = FnLikelihood::new(|answer, theta: &[f64], _design: &Design| match answer {
            0 => theta[0],
            1 => 1. - theta[0],
            _ => 0.,
        });
        let design = Design::new(vec![0.]);
        let two = mutual_information(&particles, &[0, 1], &binary, &design);
        let three = mutual_information(&particles, &[0, 1, 2], &binary, &design);
        assert!(two > 0.);
        assert_abs_diff_eq!(three, two, epsilon = 1e-12);
    }

    #[test]
    fn overfull_probabilities_are_clamped() {
        let overfull = FnLikelihood::new(|_answer, _theta: &[f64], _design: &Design| 0.7);
        let info = mutual_information(&linspace(5), &[0, 1, 2], &overfull, &Design::new(vec![0.]));
        assert!(info.is_finite());
        assert_abs_diff_eq!(info, 0., epsilon = 1e-12);
    }

    #[test]
    fn single_answer_carries_no_information() {
        let design = Design::new(vec![0.5]);
        let info = mutual_information(&linspace(5), &[1], &logistic(3.), &design);
        assert_eq!(info, 0.);
        assert_eq!(mutual_information(&linspace(5), &[], &logistic(3.), &design), 0.);
    }
}
