//! Designs and the spaces they are chosen from.

use std::{fmt, sync::Arc};

use rand::{Rng, RngCore};
use serde::{Deserialize, Serialize};

use crate::error::{EngineError, Result};
use crate::math::squared_distance;

/// One question shown to a respondent, as a tuple of attribute values.
///
/// Categorical attributes are encoded by their numeric level.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Design(Box<[f64]>);

impl Design {
    pub fn new(values: impl Into<Box<[f64]>>) -> Self {
        Self(values.into())
    }

    pub fn values(&self) -> &[f64] {
        &self.0
    }

    pub fn dim(&self) -> usize {
        self.0.len()
    }
}

impl From<Vec<f64>> for Design {
    fn from(values: Vec<f64>) -> Self {
        Self::new(values)
    }
}

impl std::ops::Index<usize> for Design {
    type Output = f64;

    fn index(&self, index: usize) -> &f64 {
        &self.0[index]
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Bounds {
    pub low: f64,
    pub high: f64,
}

impl Bounds {
    pub fn new(low: f64, high: f64) -> Self {
        Self { low, high }
    }

    pub fn width(&self) -> f64 {
        self.high - self.low
    }

    pub fn clamp(&self, x: f64) -> f64 {
        x.clamp(self.low, self.high)
    }
}

/// One attribute of a bounded design space.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum DesignDimension {
    Continuous(Bounds),
    /// A finite set of numeric levels.
    Categorical(Vec<f64>),
}

impl DesignDimension {
    pub fn continuous(low: f64, high: f64) -> Self {
        Self::Continuous(Bounds::new(low, high))
    }

    fn validate(&self) -> Result<()> {
        match self {
            Self::Continuous(bounds) => {
                if bounds.low.is_finite() && bounds.high.is_finite() && bounds.low < bounds.high {
                    Ok(())
                } else {
                    Err(EngineError::InvalidSettings(format!(
                        "invalid design bounds [{}, {}]",
                        bounds.low, bounds.high
                    )))
                }
            }
            Self::Categorical(levels) => {
                if !levels.is_empty() && levels.iter().all(|x| x.is_finite()) {
                    Ok(())
                } else {
                    Err(EngineError::InvalidSettings(
                        "categorical design dimension needs finite levels".into(),
                    ))
                }
            }
        }
    }

    /// Continuous relaxation used by the local optimizer.
    pub fn bounds(&self) -> Bounds {
        match self {
            Self::Continuous(bounds) => *bounds,
            Self::Categorical(levels) => {
                let low = levels.iter().copied().fold(f64::INFINITY, f64::min);
                let high = levels.iter().copied().fold(f64::NEG_INFINITY, f64::max);
                Bounds::new(low, high)
            }
        }
    }

    fn snap(&self, x: f64) -> f64 {
        match self {
            Self::Continuous(bounds) => bounds.clamp(x),
            Self::Categorical(levels) => levels
                .iter()
                .copied()
                .min_by(|a, b| (a - x).abs().total_cmp(&(b - x).abs()))
                .unwrap_or(x),
        }
    }

    fn sample(&self, rng: &mut dyn RngCore) -> f64 {
        match self {
            Self::Continuous(bounds) => rng.random_range(bounds.low..bounds.high),
            Self::Categorical(levels) => levels[rng.random_range(0..levels.len())],
        }
    }
}

/// Custom generator of random designs for a bounded space.
pub trait DesignSampler: Send + Sync {
    fn sample(&self, n: usize, rng: &mut dyn RngCore) -> Vec<Design>;
}

impl<F> DesignSampler for F
where
    F: Fn(usize, &mut dyn RngCore) -> Vec<Design> + Send + Sync,
{
    fn sample(&self, n: usize, rng: &mut dyn RngCore) -> Vec<Design> {
        self(n, rng)
    }
}

/// A fixed, ordered list of designs.
#[derive(Debug, Clone, PartialEq)]
pub struct DesignCatalog {
    designs: Vec<Design>,
    bounds: Vec<Bounds>,
}

impl DesignCatalog {
    pub fn new(designs: Vec<Design>) -> Result<Self> {
        let Some(first) = designs.first() else {
            return Err(EngineError::EmptyCatalog);
        };
        let dim = first.dim();
        if dim == 0 {
            return Err(EngineError::InvalidSettings(
                "designs need at least one attribute".into(),
            ));
        }
        if let Some(bad) = designs.iter().find(|d| d.dim() != dim) {
            return Err(EngineError::DimensionMismatch {
                expected: dim,
                found: bad.dim(),
            });
        }
        let bounds = (0..dim)
            .map(|j| {
                let low = designs.iter().map(|d| d[j]).fold(f64::INFINITY, f64::min);
                let high = designs.iter().map(|d| d[j]).fold(f64::NEG_INFINITY, f64::max);
                Bounds::new(low, high)
            })
            .collect();
        Ok(Self { designs, bounds })
    }

    pub fn len(&self) -> usize {
        self.designs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.designs.is_empty()
    }

    pub fn dim(&self) -> usize {
        self.bounds.len()
    }

    pub fn designs(&self) -> &[Design] {
        &self.designs
    }

    /// Per-attribute minimum and maximum over the catalog.
    pub fn bounds(&self) -> &[Bounds] {
        &self.bounds
    }

    /// Index of the catalog design closest to `point` (Euclidean).
    pub fn nearest(&self, point: &[f64]) -> usize {
        self.designs
            .iter()
            .enumerate()
            .map(|(i, d)| (i, squared_distance(d.values(), point)))
            .min_by(|(_, a), (_, b)| a.total_cmp(b))
            .map(|(i, _)| i)
            .unwrap_or(0)
    }

    /// Random catalog indices, without replacement unless more are
    /// requested than the catalog holds.
    pub fn sample_indices<R: Rng + ?Sized>(&self, n: usize, rng: &mut R) -> Vec<usize> {
        if n > self.len() {
            (0..n).map(|_| rng.random_range(0..self.len())).collect()
        } else {
            rand::seq::index::sample(rng, self.len(), n).into_vec()
        }
    }
}

/// Per-attribute bounds or levels, with an optional custom sampler.
#[derive(Clone)]
pub struct BoundedSpace {
    dimensions: Vec<DesignDimension>,
    sampler: Option<Arc<dyn DesignSampler>>,
}

impl fmt::Debug for BoundedSpace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BoundedSpace")
            .field("dimensions", &self.dimensions)
            .field("custom_sampler", &self.sampler.is_some())
            .finish()
    }
}

impl BoundedSpace {
    pub fn new(dimensions: Vec<DesignDimension>) -> Result<Self> {
        if dimensions.is_empty() {
            return Err(EngineError::InvalidSettings(
                "designs need at least one attribute".into(),
            ));
        }
        for dimension in dimensions.iter() {
            dimension.validate()?;
        }
        Ok(Self {
            dimensions,
            sampler: None,
        })
    }

    pub fn with_sampler(mut self, sampler: impl DesignSampler + 'static) -> Self {
        self.sampler = Some(Arc::new(sampler));
        self
    }

    pub fn dimensions(&self) -> &[DesignDimension] {
        &self.dimensions
    }

    pub fn bounds(&self) -> Vec<Bounds> {
        self.dimensions.iter().map(|d| d.bounds()).collect()
    }

    /// Clamp continuous attributes and move categorical ones to the
    /// nearest level.
    pub fn snap(&self, point: &[f64]) -> Design {
        assert!(point.len() == self.dimensions.len());
        self.dimensions
            .iter()
            .zip(point)
            .map(|(dim, &x)| dim.snap(x))
            .collect::<Vec<_>>()
            .into()
    }

    pub fn sample<R: Rng + ?Sized>(&self, n: usize, rng: &mut R) -> Vec<Design> {
        let mut rng: &mut R = rng;
        if let Some(sampler) = self.sampler.as_ref() {
            return sampler.sample(n, &mut rng);
        }
        (0..n)
            .map(|_| {
                self.dimensions
                    .iter()
                    .map(|dim| dim.sample(&mut rng))
                    .collect::<Vec<_>>()
                    .into()
            })
            .collect()
    }
}

/// Where designs come from: a fixed catalog or a bounded space.
#[derive(Debug, Clone)]
pub enum DesignSpace {
    Catalog(DesignCatalog),
    Bounded(BoundedSpace),
}

impl DesignSpace {
    pub fn catalog(designs: Vec<Design>) -> Result<Self> {
        Ok(Self::Catalog(DesignCatalog::new(designs)?))
    }

    pub fn bounded(dimensions: Vec<DesignDimension>) -> Result<Self> {
        Ok(Self::Bounded(BoundedSpace::new(dimensions)?))
    }

    /// Build a space from the two optional pieces of a survey configuration.
    ///
    /// Exactly one of them must be present.
    pub fn from_parts(
        designs: Option<Vec<Design>>,
        dimensions: Option<Vec<DesignDimension>>,
    ) -> Result<Self> {
        match (designs, dimensions) {
            (Some(designs), None) => Self::catalog(designs),
            (None, Some(dimensions)) => Self::bounded(dimensions),
            (None, None) => Err(EngineError::MissingDesignSpace),
            (Some(_), Some(_)) => Err(EngineError::AmbiguousDesignSpace),
        }
    }

    pub fn dim(&self) -> usize {
        match self {
            Self::Catalog(catalog) => catalog.dim(),
            Self::Bounded(space) => space.dimensions.len(),
        }
    }

    pub fn bounds(&self) -> Vec<Bounds> {
        match self {
            Self::Catalog(catalog) => catalog.bounds().to_vec(),
            Self::Bounded(space) => space.bounds(),
        }
    }

    /// `n` random designs, with their catalog index when there is one.
    pub fn sample<R: Rng + ?Sized>(&self, n: usize, rng: &mut R) -> Vec<(Option<usize>, Design)> {
        match self {
            Self::Catalog(catalog) => catalog
                .sample_indices(n, rng)
                .into_iter()
                .map(|i| (Some(i), catalog.designs[i].clone()))
                .collect(),
            Self::Bounded(space) => space.sample(n, rng).into_iter().map(|d| (None, d)).collect(),
        }
    }

    /// Map a point of the continuous relaxation back into the space.
    pub fn snap(&self, point: &[f64]) -> (Option<usize>, Design) {
        match self {
            Self::Catalog(catalog) => {
                let index = catalog.nearest(point);
                (Some(index), catalog.designs[index].clone())
            }
            Self::Bounded(space) => (None, space.snap(point)),
        }
    }
}
