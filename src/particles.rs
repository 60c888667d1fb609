//! Particle populations over the preference parameters.

use serde::{Deserialize, Serialize};

use crate::error::{EngineError, Result};
use crate::math::sample_std;

/// A population of particles, each one a value of every named parameter.
///
/// Values are stored row-major: particle `i` occupies
/// `values[i * dim..(i + 1) * dim]`, in the order of `names`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Particles {
    names: Vec<String>,
    values: Vec<f64>,
}

impl Particles {
    pub fn new(names: Vec<String>, values: Vec<f64>) -> Result<Self> {
        let dim = names.len();
        if dim == 0 {
            return Err(EngineError::InvalidSettings(
                "particles need at least one parameter".into(),
            ));
        }
        if values.len() % dim != 0 {
            return Err(EngineError::DimensionMismatch {
                expected: dim,
                found: values.len() % dim,
            });
        }
        Ok(Self { names, values })
    }

    /// Build a population from named columns of equal length.
    pub fn from_columns(columns: Vec<(String, Vec<f64>)>) -> Result<Self> {
        let Some(len) = columns.first().map(|(_, col)| col.len()) else {
            return Err(EngineError::InvalidSettings(
                "particles need at least one parameter".into(),
            ));
        };
        if let Some((_, col)) = columns.iter().find(|(_, col)| col.len() != len) {
            return Err(EngineError::DimensionMismatch {
                expected: len,
                found: col.len(),
            });
        }
        let dim = columns.len();
        let mut values = vec![0f64; len * dim];
        for (j, (_, col)) in columns.iter().enumerate() {
            for (i, &val) in col.iter().enumerate() {
                values[i * dim + j] = val;
            }
        }
        let names = columns.into_iter().map(|(name, _)| name).collect();
        Ok(Self { names, values })
    }

    pub(crate) fn empty_like(&self, capacity: usize) -> Self {
        Self {
            names: self.names.clone(),
            values: Vec::with_capacity(capacity * self.dim()),
        }
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }

    pub fn dim(&self) -> usize {
        self.names.len()
    }

    pub fn len(&self) -> usize {
        self.values.len().checked_div(self.dim()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Position of a parameter in every row.
    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.names.iter().position(|n| n == name)
    }

    pub fn row(&self, i: usize) -> &[f64] {
        let dim = self.dim();
        &self.values[i * dim..(i + 1) * dim]
    }

    pub fn rows(&self) -> impl Iterator<Item = &[f64]> + '_ {
        self.values.chunks_exact(self.dim())
    }

    pub fn values(&self) -> &[f64] {
        &self.values
    }

    /// Iterate over one parameter across all particles.
    pub fn column(&self, j: usize) -> impl Iterator<Item = f64> + Clone + '_ {
        self.values.iter().skip(j).step_by(self.dim()).copied()
    }

    /// Iterate over a named parameter across all particles.
    pub fn column_by_name(&self, name: &str) -> Option<impl Iterator<Item = f64> + Clone + '_> {
        self.index_of(name).map(|j| self.column(j))
    }

    pub(crate) fn push_row(&mut self, row: &[f64]) {
        assert!(row.len() == self.dim());
        self.values.extend_from_slice(row);
    }

    pub(crate) fn extend(&mut self, other: &Particles) {
        assert!(other.names == self.names);
        self.values.extend_from_slice(&other.values);
    }

    /// Particles at the given indices, repeats allowed.
    pub fn select(&self, indices: &[usize]) -> Particles {
        let mut out = self.empty_like(indices.len());
        for &i in indices {
            out.push_row(self.row(i));
        }
        out
    }

    /// Sample standard deviation of every parameter.
    pub fn column_std(&self) -> Vec<f64> {
        (0..self.dim()).map(|j| sample_std(self.column(j))).collect()
    }

    pub fn column_mean(&self) -> Vec<f64> {
        let n = self.len() as f64;
        (0..self.dim())
            .map(|j| self.column(j).sum::<f64>() / n)
            .collect()
    }
}
