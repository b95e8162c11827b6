//! Negative-Binomial distribution in the (mean, dispersion) parameterization.
//!
//! `mu` is the expected demand and `k` the dispersion: the variance is
//! `mu + mu²/k`, so a small `k` means a wide, overdispersed forecast and
//! `k → ∞` recovers the Poisson limit. Every function here is pure and
//! validates its parameters; randomness always comes from the caller's RNG.

use rand::Rng;
use rand_distr::{Distribution, Gamma, Poisson};
use serde::{Deserialize, Serialize};
use statrs::function::gamma::ln_gamma;

use crate::error::{EngineResult, ForecastError};

/// Added inside the logarithms of `log_pmf` so that `ln(0)` is never taken.
pub const LOG_EPSILON: f64 = 1e-10;

/// Upper bound on the number of support points walked by `cdf`/`quantile`.
const MAX_SUPPORT_WALK: u64 = 10_000_000;

/// Validated `(mu, k)` pair. Both are finite and strictly positive.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DistributionParams {
    mu: f64,
    k: f64,
}

impl DistributionParams {
    pub fn new(mu: f64, k: f64) -> EngineResult<Self> {
        validate(mu, k)?;
        Ok(Self { mu, k })
    }

    pub fn mu(&self) -> f64 {
        self.mu
    }

    pub fn k(&self) -> f64 {
        self.k
    }

    pub fn variance(&self) -> f64 {
        self.mu + self.mu * self.mu / self.k
    }

    pub fn std(&self) -> f64 {
        self.variance().sqrt()
    }
}

/// Fail with `InvariantViolation` unless `mu > 0` and `k > 0` (both finite).
pub fn validate(mu: f64, k: f64) -> EngineResult<()> {
    if !(mu.is_finite() && mu > 0.0) {
        return Err(ForecastError::invariant(format!(
            "negative binomial mean must be finite and > 0, got {mu}"
        )));
    }
    if !(k.is_finite() && k > 0.0) {
        return Err(ForecastError::invariant(format!(
            "negative binomial dispersion must be finite and > 0, got {k}"
        )));
    }
    Ok(())
}

pub fn mean(mu: f64, k: f64) -> EngineResult<f64> {
    validate(mu, k)?;
    Ok(mu)
}

/// `mu + mu²/k`; strictly greater than `mu` for any finite `k`.
pub fn variance(mu: f64, k: f64) -> EngineResult<f64> {
    validate(mu, k)?;
    Ok(mu + mu * mu / k)
}

/// Log-probability of observing `y` units of demand.
pub fn log_pmf(y: u64, mu: f64, k: f64) -> EngineResult<f64> {
    validate(mu, k)?;
    Ok(log_pmf_unchecked(y as f64, mu, k))
}

pub(crate) fn log_pmf_unchecked(y: f64, mu: f64, k: f64) -> f64 {
    ln_gamma(y + k) - ln_gamma(k) - ln_gamma(y + 1.0)
        + k * (k / (k + mu) + LOG_EPSILON).ln()
        + y * (mu / (k + mu) + LOG_EPSILON).ln()
}

pub fn pmf(y: u64, mu: f64, k: f64) -> EngineResult<f64> {
    Ok(log_pmf(y, mu, k)?.exp())
}

/// `P(Y <= y)`.
pub fn cdf(y: u64, mu: f64, k: f64) -> EngineResult<f64> {
    validate(mu, k)?;
    let mut total = 0.0;
    for (support, p) in SupportWalk::new(mu, k) {
        total += p;
        if support >= y {
            break;
        }
    }
    Ok(total.min(1.0))
}

/// Smallest `y` with `P(Y <= y) >= p`.
///
/// The inverse CDF has no closed form, so this walks the support with the
/// pmf recurrence `P(y+1) = P(y) · (y+k)/(y+1) · mu/(k+mu)`.
pub fn quantile(p: f64, mu: f64, k: f64) -> EngineResult<u64> {
    validate(mu, k)?;
    if !(p > 0.0 && p < 1.0) {
        return Err(ForecastError::invalid_input(format!(
            "quantile level must lie in (0, 1), got {p}"
        )));
    }

    let mut total = 0.0;
    let mut last = 0;
    for (support, mass) in SupportWalk::new(mu, k) {
        total += mass;
        last = support;
        if total >= p {
            return Ok(support);
        }
    }
    // Accumulated mass stalled below `p` (rounding in the far tail).
    Ok(last)
}

/// Draw one demand value from the Gamma–Poisson mixture.
///
/// `λ ~ Gamma(shape = k, scale = mu/k)`, then `y ~ Poisson(λ)`.
pub fn sample<R: Rng + ?Sized>(mu: f64, k: f64, rng: &mut R) -> EngineResult<u64> {
    validate(mu, k)?;
    let gamma = Gamma::new(k, mu / k)
        .map_err(|e| ForecastError::invariant(format!("gamma(k={k}, scale={}): {e}", mu / k)))?;
    Ok(sample_from(&gamma, rng))
}

/// Draw `n` independent values with a single validated Gamma.
pub fn sample_n<R: Rng + ?Sized>(mu: f64, k: f64, n: usize, rng: &mut R) -> EngineResult<Vec<u64>> {
    validate(mu, k)?;
    let gamma = Gamma::new(k, mu / k)
        .map_err(|e| ForecastError::invariant(format!("gamma(k={k}, scale={}): {e}", mu / k)))?;
    Ok((0..n).map(|_| sample_from(&gamma, rng)).collect())
}

fn sample_from<R: Rng + ?Sized>(gamma: &Gamma<f64>, rng: &mut R) -> u64 {
    let lambda = gamma.sample(rng);
    // Tiny shapes can underflow the Gamma draw to exactly zero.
    if !(lambda.is_finite() && lambda > 0.0) {
        return 0;
    }
    match Poisson::new(lambda) {
        Ok(poisson) => {
            let y: f64 = poisson.sample(rng);
            y as u64
        }
        Err(_) => 0,
    }
}

/// Nearest-rank percentile of an ascending slice.
pub fn empirical_quantile(sorted: &[u64], p: f64) -> EngineResult<u64> {
    if sorted.is_empty() {
        return Err(ForecastError::invalid_input("cannot take a quantile of zero samples"));
    }
    if !(0.0..=1.0).contains(&p) {
        return Err(ForecastError::invalid_input(format!(
            "quantile level must lie in [0, 1], got {p}"
        )));
    }
    let rank = (p * sorted.len() as f64).ceil() as usize;
    Ok(sorted[rank.clamp(1, sorted.len()) - 1])
}

/// Iterator over `(y, P(Y = y))` for y = 0, 1, 2, ...
struct SupportWalk {
    y: u64,
    log_mass: f64,
    k: f64,
    log_ratio: f64,
}

impl SupportWalk {
    fn new(mu: f64, k: f64) -> Self {
        Self {
            y: 0,
            log_mass: k * (-mu / (k + mu)).ln_1p(),
            k,
            log_ratio: (mu / (k + mu)).ln(),
        }
    }
}

impl Iterator for SupportWalk {
    type Item = (u64, f64);

    fn next(&mut self) -> Option<Self::Item> {
        if self.y > MAX_SUPPORT_WALK {
            return None;
        }
        let item = (self.y, self.log_mass.exp());
        let y = self.y as f64;
        self.log_mass += ((y + self.k) / (y + 1.0)).ln() + self.log_ratio;
        self.y += 1;
        Some(item)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    #[test]
    fn rejects_non_positive_parameters() {
        for (mu, k) in [(0.0, 1.0), (1.0, 0.0), (-3.0, 2.0), (f64::NAN, 1.0), (1.0, f64::INFINITY)] {
            match variance(mu, k) {
                Err(ForecastError::InvariantViolation(_)) => {}
                other => panic!("expected invariant violation for ({mu}, {k}), got {other:?}"),
            }
        }
        assert!(DistributionParams::new(0.0, 1.0).is_err());
    }

    #[test]
    fn geometric_special_case_matches_closed_form() {
        // k = 1 is the geometric distribution: P(y) = (1/(1+mu)) · (mu/(1+mu))^y.
        let mu: f64 = 4.0;
        for y in 0..20u64 {
            let expected = (1.0 / (1.0 + mu)) * (mu / (1.0 + mu)).powi(y as i32);
            let got = pmf(y, mu, 1.0).unwrap();
            assert!((got - expected).abs() < 1e-8, "y={y}: {got} vs {expected}");
        }
    }

    #[test]
    fn pmf_sums_to_one() {
        let total: f64 = (0..2_000u64).map(|y| pmf(y, 10.0, 2.0).unwrap()).sum();
        assert!((total - 1.0).abs() < 1e-6, "total mass {total}");
    }

    #[test]
    fn cdf_and_quantile_agree() {
        let (mu, k) = (22.3, 1.5);
        for p in [0.05, 0.25, 0.5, 0.9, 0.95] {
            let q = quantile(p, mu, k).unwrap();
            assert!(cdf(q, mu, k).unwrap() >= p);
            if q > 0 {
                assert!(cdf(q - 1, mu, k).unwrap() < p);
            }
        }
    }

    #[test]
    fn quantile_rejects_degenerate_levels() {
        assert!(quantile(0.0, 5.0, 1.0).is_err());
        assert!(quantile(1.0, 5.0, 1.0).is_err());
    }

    #[test]
    fn monte_carlo_moments_converge() {
        let (mu, k) = (20.0, 3.0);
        let mut rng = StdRng::seed_from_u64(7);
        let draws = sample_n(mu, k, 20_000, &mut rng).unwrap();
        let n = draws.len() as f64;
        let m = draws.iter().map(|&y| y as f64).sum::<f64>() / n;
        let v = draws.iter().map(|&y| (y as f64 - m).powi(2)).sum::<f64>() / (n - 1.0);
        let analytic = variance(mu, k).unwrap();
        assert!((m - mu).abs() < 0.5, "sample mean {m}");
        assert!((v - analytic).abs() / analytic < 0.08, "sample variance {v} vs {analytic}");
    }

    #[test]
    fn sampling_tiny_dispersion_does_not_fail() {
        let mut rng = StdRng::seed_from_u64(1);
        for _ in 0..100 {
            sample(1e-3, 1e-3, &mut rng).unwrap();
        }
    }

    #[test]
    fn empirical_quantile_uses_nearest_rank() {
        let sorted: Vec<u64> = (1..=100).collect();
        assert_eq!(empirical_quantile(&sorted, 0.05).unwrap(), 5);
        assert_eq!(empirical_quantile(&sorted, 0.95).unwrap(), 95);
        assert_eq!(empirical_quantile(&sorted, 0.0).unwrap(), 1);
        assert_eq!(empirical_quantile(&sorted, 1.0).unwrap(), 100);
        assert!(empirical_quantile(&[], 0.5).is_err());
    }

    #[test]
    fn variance_approaches_mean_for_large_dispersion() {
        let mu = 12.0;
        let v = variance(mu, 1e12).unwrap();
        assert!(v > mu);
        assert!(v / mu - 1.0 < 1e-9);
    }

    #[test]
    fn huge_dispersion_walks_the_poisson_support() {
        // Poisson(20): P(Y <= 20) = 0.55909, 95% quantile 28.
        for k in [1e12, 1e15, 1e17, 1e20] {
            let c = cdf(20, 20.0, k).unwrap();
            assert!((c - 0.559_092_584).abs() < 1e-6, "k={k} cdf={c}");
            assert_eq!(quantile(0.95, 20.0, k).unwrap(), 28, "k={k}");
        }
    }

    proptest! {
        #![proptest_config(ProptestConfig {
            cases: 256,
            ..ProptestConfig::default()
        })]

        /// Property: the distribution is always overdispersed.
        #[test]
        fn variance_exceeds_mean(mu in 0.01f64..10_000.0, k in 0.01f64..10_000.0) {
            prop_assert!(variance(mu, k).unwrap() > mean(mu, k).unwrap());
        }

        /// Property: log-probabilities are finite and never positive.
        #[test]
        fn log_pmf_is_a_log_probability(y in 0u64..500, mu in 0.01f64..500.0, k in 0.01f64..500.0) {
            let lp = log_pmf(y, mu, k).unwrap();
            prop_assert!(lp.is_finite());
            prop_assert!(lp <= 1e-9);
        }
    }
}
