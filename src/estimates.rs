//! Point estimates of the parameters from a particle population.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::math::sample_std;
use crate::particles::Particles;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParameterSummary {
    pub name: String,
    pub mean: f64,
    pub median: f64,
    pub std: f64,
}

/// Mean, median and standard deviation of every parameter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Estimates {
    pub parameters: Vec<ParameterSummary>,
}

fn median(mut values: Vec<f64>) -> f64 {
    if values.is_empty() {
        return f64::NAN;
    }
    values.sort_unstable_by(|a, b| a.total_cmp(b));
    let mid = values.len() / 2;
    if values.len() % 2 == 0 {
        0.5 * (values[mid - 1] + values[mid])
    } else {
        values[mid]
    }
}

impl Estimates {
    pub fn from_particles(particles: &Particles) -> Self {
        let means = particles.column_mean();
        let parameters = particles
            .names()
            .iter()
            .zip(means)
            .enumerate()
            .map(|(j, (name, mean))| ParameterSummary {
                name: name.clone(),
                mean,
                median: median(particles.column(j).collect()),
                std: sample_std(particles.column(j)),
            })
            .collect();
        Self { parameters }
    }

    pub fn get(&self, name: &str) -> Option<&ParameterSummary> {
        self.parameters.iter().find(|p| p.name == name)
    }

    /// Flat `mean_<name>`, `median_<name>` and `std_<name>` entries.
    pub fn to_map(&self) -> BTreeMap<String, f64> {
        let mut map = BTreeMap::new();
        for param in self.parameters.iter() {
            map.insert(format!("mean_{}", param.name), param.mean);
            map.insert(format!("median_{}", param.name), param.median);
            map.insert(format!("std_{}", param.name), param.std);
        }
        map
    }

    /// Squared error of the posterior means against known values, per
    /// parameter. Parameters missing from `truth` are skipped.
    pub fn squared_errors(&self, truth: &BTreeMap<String, f64>) -> BTreeMap<String, f64> {
        self.parameters
            .iter()
            .filter_map(|param| {
                truth
                    .get(&param.name)
                    .map(|value| (param.name.clone(), (param.mean - value).powi(2)))
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use pretty_assertions::assert_eq;

    fn particles() -> Particles {
        Particles::from_columns(vec![
            ("alpha".to_string(), vec![1., 2., 3., 10.]),
            ("beta".to_string(), vec![0., 0., 0., 0.]),
        ])
        .unwrap()
    }

    #[test]
    fn summaries() {
        let estimates = Estimates::from_particles(&particles());
        let alpha = estimates.get("alpha").unwrap();
        assert_eq!(alpha.mean, 4.);
        assert_eq!(alpha.median, 2.5);
        assert_abs_diff_eq!(alpha.std, (50f64 / 3.).sqrt(), epsilon = 1e-12);
        assert_eq!(estimates.get("beta").unwrap().std, 0.);
        assert!(estimates.get("gamma").is_none());
    }

    #[test]
    fn flat_keys() {
        let map = Estimates::from_particles(&particles()).to_map();
        let keys: Vec<&str> = map.keys().map(|k| k.as_str()).collect();
        assert_eq!(
            keys,
            vec!["mean_alpha", "mean_beta", "median_alpha", "median_beta", "std_alpha", "std_beta"]
        );
    }

    #[test]
    fn errors_against_truth() {
        let truth = BTreeMap::from([("alpha".to_string(), 3.)]);
        let errors = Estimates::from_particles(&particles()).squared_errors(&truth);
        assert_eq!(errors, BTreeMap::from([("alpha".to_string(), 1.)]));
    }

    #[test]
    fn odd_median() {
        assert_eq!(median(vec![3., 1., 2.]), 2.);
        assert!(median(vec![]).is_nan());
    }
}
