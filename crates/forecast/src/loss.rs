//! Negative log-likelihood and its closed-form gradients w.r.t. `(mu, k)`.

use statrs::function::gamma::digamma;

use crate::distribution::{self, DistributionParams};
use crate::error::{ensure_finite, EngineResult, ForecastError};

/// Batch loss plus per-example gradients, already scaled by `1 / batch_size`.
#[derive(Debug, Clone, PartialEq)]
pub struct BatchLoss {
    pub loss: f64,
    pub d_mu: Vec<f64>,
    pub d_k: Vec<f64>,
}

/// `∂NLL/∂mu` for a single observation.
pub fn grad_mu(y: u64, mu: f64, k: f64) -> f64 {
    (mu - y as f64) * k / (mu * (k + mu))
}

/// `∂NLL/∂k` for a single observation.
///
/// Derived from `log_pmf`: `ψ(k) − ψ(y+k) − ln(k/(k+mu)) + (y − mu)/(k+mu)`.
pub fn grad_k(y: u64, mu: f64, k: f64) -> f64 {
    let y = y as f64;
    digamma(k) - digamma(y + k) - (k / (k + mu)).ln() + (y - mu) / (k + mu)
}

/// Mean negative log-likelihood of `targets` under `params`.
pub fn nll(params: &[DistributionParams], targets: &[u64]) -> EngineResult<f64> {
    check_batch(params, targets)?;
    let total: f64 = params
        .iter()
        .zip(targets)
        .map(|(p, &y)| distribution::log_pmf_unchecked(y as f64, p.mu(), p.k()))
        .sum();
    let loss = -total / params.len() as f64;
    if !loss.is_finite() {
        return Err(ForecastError::fatal_training(format!("loss evaluated to {loss}")));
    }
    Ok(loss)
}

/// Loss and averaged gradients for one batch.
///
/// Any non-finite loss or gradient aborts with `FatalTrainingError`.
pub fn nll_with_gradients(params: &[DistributionParams], targets: &[u64]) -> EngineResult<BatchLoss> {
    let loss = nll(params, targets)?;
    let scale = 1.0 / params.len() as f64;

    let d_mu: Vec<f64> = params
        .iter()
        .zip(targets)
        .map(|(p, &y)| grad_mu(y, p.mu(), p.k()) * scale)
        .collect();
    let d_k: Vec<f64> = params
        .iter()
        .zip(targets)
        .map(|(p, &y)| grad_k(y, p.mu(), p.k()) * scale)
        .collect();

    ensure_finite(&d_mu, "d_nll/d_mu")?;
    ensure_finite(&d_k, "d_nll/d_k")?;

    Ok(BatchLoss { loss, d_mu, d_k })
}

fn check_batch(params: &[DistributionParams], targets: &[u64]) -> EngineResult<()> {
    if params.is_empty() {
        return Err(ForecastError::invalid_input("loss over an empty batch"));
    }
    if params.len() != targets.len() {
        return Err(ForecastError::shape("loss batch", params.len(), targets.len()));
    }
    Ok(())
}
