//! Dual Softplus heads mapping the final hidden state to `(mu, k)`.

use rand::Rng;
use rand_distr::{Distribution, Normal};
use serde::{Deserialize, Serialize};

use super::activation::{inverse_softplus, sigmoid, softplus};
use crate::distribution::DistributionParams;
use crate::error::{EngineResult, ForecastError};

/// Linear map `[width] → scalar`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LinearHead {
    weight: Vec<f64>,
    bias: f64,
}

impl LinearHead {
    pub fn zeros(width: usize) -> Self {
        Self {
            weight: vec![0.0; width],
            bias: 0.0,
        }
    }

    pub fn weight(&self) -> &[f64] {
        &self.weight
    }

    pub fn bias(&self) -> f64 {
        self.bias
    }

    pub(crate) fn bias_slice(&self) -> &[f64] {
        std::slice::from_ref(&self.bias)
    }

    pub(crate) fn parts_mut(&mut self) -> (&mut [f64], &mut f64) {
        (&mut self.weight, &mut self.bias)
    }

    fn pre_activation(&self, hidden: &[f64]) -> f64 {
        self.bias + self.weight.iter().zip(hidden).map(|(w, h)| w * h).sum::<f64>()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DistributionHead {
    mu: LinearHead,
    k: LinearHead,
    epsilon: f64,
}

#[derive(Debug, Clone)]
pub struct HeadCache {
    hidden: Vec<f64>,
    z_mu: f64,
    z_k: f64,
}

impl DistributionHead {
    pub fn initialized<R: Rng + ?Sized>(width: usize, epsilon: f64, scale: f64, rng: &mut R) -> EngineResult<Self> {
        let std = scale * (1.0 / width as f64).sqrt();
        let normal = Normal::new(0.0, std)
            .map_err(|e| ForecastError::invalid_config(format!("head init std {std}: {e}")))?;
        let mut head = Self::zeros(width, epsilon);
        for w in head.mu.weight.iter_mut().chain(head.k.weight.iter_mut()) {
            *w = normal.sample(rng);
        }
        Ok(head)
    }

    pub fn zeros(width: usize, epsilon: f64) -> Self {
        Self {
            mu: LinearHead::zeros(width),
            k: LinearHead::zeros(width),
            epsilon,
        }
    }

    pub fn zeros_like(&self) -> Self {
        Self::zeros(self.mu.weight.len(), self.epsilon)
    }

    pub fn width(&self) -> usize {
        self.mu.weight.len()
    }

    pub fn mu_head(&self) -> &LinearHead {
        &self.mu
    }

    pub fn k_head(&self) -> &LinearHead {
        &self.k
    }

    pub(crate) fn heads_mut(&mut self) -> (&mut LinearHead, &mut LinearHead) {
        (&mut self.mu, &mut self.k)
    }

    /// `softplus(z) + ε`: strictly positive for every real `z`.
    pub fn positive(&self, z: f64) -> f64 {
        softplus(z) + self.epsilon
    }

    /// Start both heads at a constant prediction: zero weights, biases at
    /// `inverse_softplus(value − ε)`.
    pub fn warm_start(&mut self, mu: f64, k: f64) -> EngineResult<()> {
        let target = DistributionParams::new(mu, k)?;
        if let Some(value) = [target.mu(), target.k()].into_iter().find(|v| *v <= self.epsilon) {
            return Err(ForecastError::invalid_input(format!(
                "warm start value {value} is not above the positivity floor {}",
                self.epsilon
            )));
        }
        for (head, value) in [(&mut self.mu, target.mu()), (&mut self.k, target.k())] {
            head.weight.iter_mut().for_each(|w| *w = 0.0);
            head.bias = inverse_softplus(value - self.epsilon);
        }
        Ok(())
    }

    /// `(z_mu, z_k)`, the head outputs before Softplus.
    pub fn pre_activations(&self, hidden: &[f64]) -> EngineResult<(f64, f64)> {
        if hidden.len() != self.width() {
            return Err(ForecastError::shape("distribution head input", self.width(), hidden.len()));
        }
        Ok((self.mu.pre_activation(hidden), self.k.pre_activation(hidden)))
    }

    pub fn forward(&self, hidden: &[f64]) -> EngineResult<(DistributionParams, HeadCache)> {
        let (z_mu, z_k) = self.pre_activations(hidden)?;
        let params = DistributionParams::new(self.positive(z_mu), self.positive(z_k))?;
        Ok((
            params,
            HeadCache {
                hidden: hidden.to_vec(),
                z_mu,
                z_k,
            },
        ))
    }

    /// Chain `∂L/∂mu`, `∂L/∂k` through Softplus and the linear maps.
    ///
    /// Returns the gradient w.r.t. the hidden state and the head gradients.
    pub fn backward(&self, cache: &HeadCache, d_mu: f64, d_k: f64) -> EngineResult<(Vec<f64>, DistributionHead)> {
        if cache.hidden.len() != self.width() {
            return Err(ForecastError::shape("distribution head cache", self.width(), cache.hidden.len()));
        }
        let dz_mu = d_mu * sigmoid(cache.z_mu);
        let dz_k = d_k * sigmoid(cache.z_k);

        let mut grads = self.zeros_like();
        grads.mu.bias = dz_mu;
        grads.k.bias = dz_k;
        let mut grad_hidden = vec![0.0; self.width()];
        for (i, h) in cache.hidden.iter().enumerate() {
            grads.mu.weight[i] = dz_mu * h;
            grads.k.weight[i] = dz_k * h;
            grad_hidden[i] = dz_mu * self.mu.weight[i] + dz_k * self.k.weight[i];
        }
        Ok((grad_hidden, grads))
    }
}
