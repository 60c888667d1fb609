use statrs::distribution::{Continuous, ContinuousCDF, Normal};

/// Expected improvement over `best` of a normal posterior with the given
/// mean and standard deviation, for maximization.
///
/// `xi` trades exploration against exploitation. Points without posterior
/// uncertainty have no expected improvement.
pub fn expected_improvement(mean: f64, std: f64, best: f64, xi: f64) -> f64 {
    if !(std > 0.) || !std.is_finite() || !mean.is_finite() {
        return 0.;
    }
    let standard = Normal::standard();
    let improvement = mean - best - xi;
    let z = improvement / std;
    let ei = improvement * standard.cdf(z) + std * standard.pdf(z);
    ei.max(0.)
}
