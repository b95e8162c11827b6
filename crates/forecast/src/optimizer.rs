//! Adam: first/second raw-moment gradient descent with bias correction.
//!
//! ```text
//! m = β1·m + (1−β1)·g
//! v = β2·v + (1−β2)·g²
//! m̂ = m/(1−β1^t);  v̂ = v/(1−β2^t)
//! θ = θ − lr · m̂ / (√v̂ + ε)
//! ```

use serde::{Deserialize, Serialize};

use crate::error::{EngineResult, ForecastError};

/// A collection of flat parameter tensors.
///
/// Gradients are represented with the same type as the parameters, so the
/// optimizer can pair tensor `i` of one with tensor `i` of the other.
pub trait ParamSet {
    fn tensors(&self) -> Vec<&[f64]>;
    fn tensors_mut(&mut self) -> Vec<&mut [f64]>;

    fn parameter_count(&self) -> usize {
        self.tensors().iter().map(|t| t.len()).sum()
    }
}

impl ParamSet for Vec<f64> {
    fn tensors(&self) -> Vec<&[f64]> {
        vec![self.as_slice()]
    }

    fn tensors_mut(&mut self) -> Vec<&mut [f64]> {
        vec![self.as_mut_slice()]
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AdamConfig {
    pub learning_rate: f64,
    pub beta1: f64,
    pub beta2: f64,
    pub epsilon: f64,
}

impl Default for AdamConfig {
    fn default() -> Self {
        Self {
            learning_rate: 1e-3,
            beta1: 0.9,
            beta2: 0.999,
            epsilon: 1e-8,
        }
    }
}

impl AdamConfig {
    pub fn with_learning_rate(mut self, learning_rate: f64) -> Self {
        self.learning_rate = learning_rate;
        self
    }

    pub fn with_betas(mut self, beta1: f64, beta2: f64) -> Self {
        self.beta1 = beta1;
        self.beta2 = beta2;
        self
    }

    pub fn validate(&self) -> EngineResult<()> {
        if !(self.learning_rate.is_finite() && self.learning_rate > 0.0) {
            return Err(ForecastError::invalid_config("learning_rate must be finite and > 0"));
        }
        for (name, beta) in [("beta1", self.beta1), ("beta2", self.beta2)] {
            if !(0.0..1.0).contains(&beta) {
                return Err(ForecastError::invalid_config(format!("{name} must lie in [0, 1), got {beta}")));
            }
        }
        if !(self.epsilon.is_finite() && self.epsilon > 0.0) {
            return Err(ForecastError::invalid_config("epsilon must be finite and > 0"));
        }
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct Adam {
    config: AdamConfig,
    /// First moment estimates, one buffer per tensor.
    m: Vec<Vec<f64>>,
    /// Second moment estimates, one buffer per tensor.
    v: Vec<Vec<f64>>,
    /// Steps taken so far (bias-correction exponent).
    t: u64,
}

impl Adam {
    pub fn new(config: AdamConfig) -> EngineResult<Self> {
        config.validate()?;
        Ok(Self {
            config,
            m: Vec::new(),
            v: Vec::new(),
            t: 0,
        })
    }

    pub fn config(&self) -> &AdamConfig {
        &self.config
    }

    pub fn steps(&self) -> u64 {
        self.t
    }

    pub fn set_learning_rate(&mut self, learning_rate: f64) -> EngineResult<()> {
        let config = self.config.with_learning_rate(learning_rate);
        config.validate()?;
        self.config = config;
        Ok(())
    }

    /// Apply one update to every tensor of `params`.
    ///
    /// Shapes are checked before anything is written, so a mismatch leaves
    /// both the parameters and the moment buffers untouched.
    pub fn step<P: ParamSet>(&mut self, params: &mut P, grads: &P) -> EngineResult<()> {
        let grad_tensors = grads.tensors();
        {
            let param_tensors = params.tensors();
            if param_tensors.len() != grad_tensors.len() {
                return Err(ForecastError::shape("adam tensor count", param_tensors.len(), grad_tensors.len()));
            }
            for (p, g) in param_tensors.iter().zip(&grad_tensors) {
                if p.len() != g.len() {
                    return Err(ForecastError::shape("adam tensor length", p.len(), g.len()));
                }
            }
            if self.m.is_empty() {
                self.m = param_tensors.iter().map(|p| vec![0.0; p.len()]).collect();
                self.v = self.m.clone();
            } else if self.m.len() != param_tensors.len() {
                return Err(ForecastError::shape("adam moment buffers", self.m.len(), param_tensors.len()));
            } else if let Some((m, p)) = self.m.iter().zip(&param_tensors).find(|(m, p)| m.len() != p.len()) {
                return Err(ForecastError::shape("adam moment buffer length", m.len(), p.len()));
            }
        }

        self.t += 1;
        let AdamConfig {
            learning_rate,
            beta1,
            beta2,
            epsilon,
        } = self.config;
        let bias1 = 1.0 - beta1.powf(self.t as f64);
        let bias2 = 1.0 - beta2.powf(self.t as f64);

        for (idx, theta) in params.tensors_mut().into_iter().enumerate() {
            let g = grad_tensors[idx];
            let m = &mut self.m[idx];
            let v = &mut self.v[idx];
            for j in 0..theta.len() {
                m[j] = beta1 * m[j] + (1.0 - beta1) * g[j];
                v[j] = beta2 * v[j] + (1.0 - beta2) * g[j] * g[j];
                let m_hat = m[j] / bias1;
                let v_hat = v[j] / bias2;
                theta[j] -= learning_rate * m_hat / (v_hat.sqrt() + epsilon);
            }
        }
        Ok(())
    }
}
