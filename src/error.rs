use thiserror::Error;

/// Errors returned by the public entry points.
///
/// Configuration problems are reported immediately. Numerical trouble
/// inside the filter and the optimizer is recovered locally where
/// possible, so only [`EngineError::DegenerateWeights`],
/// [`EngineError::DegeneratePosterior`] and [`EngineError::NoProgress`]
/// come out of a run that was configured correctly.
#[non_exhaustive]
#[derive(Error, Debug, Clone, PartialEq)]
pub enum EngineError {
    #[error("Neither a design catalog nor design bounds were supplied")]
    MissingDesignSpace,
    #[error("Both a design catalog and design bounds were supplied")]
    AmbiguousDesignSpace,
    #[error("The design catalog is empty")]
    EmptyCatalog,
    #[error("Expected {expected} dimensions but got {found}")]
    DimensionMismatch { expected: usize, found: usize },
    #[error("Design history has {designs} entries but answer history has {answers}")]
    HistoryLengthMismatch { designs: usize, answers: usize },
    #[error("Particle parameters {found:?} do not match prior parameters {expected:?}")]
    ParameterMismatch {
        expected: Vec<String>,
        found: Vec<String>,
    },
    #[error("The answer set is empty")]
    EmptyAnswerSet,
    #[error("Answer {0} is not one of the possible answers")]
    UnknownAnswer(i64),
    #[error("Grid search needs a design catalog")]
    GridRequiresCatalog,
    #[error("Invalid settings: {0}")]
    InvalidSettings(String),
    #[error("Invalid distribution: {0}")]
    InvalidDistribution(String),
    #[error("Weights are empty, all zero or not finite")]
    DegenerateWeights,
    #[error("Every pooled importance weight is zero")]
    DegeneratePosterior,
    #[error("The kernel matrix is not positive definite even with jitter")]
    SingularKernel,
    #[error("No design could be evaluated")]
    NoProgress,
}

pub type Result<T> = std::result::Result<T, EngineError>;
