//! Sequence model: temporal convolutional network + distribution heads.
//!
//! Every component is a pair of pure functions, `forward(input)` returning
//! the output plus a cache and `backward(cache, grad_output)` returning the
//! input gradient plus parameter gradients. Gradients use the same types as
//! the parameters, so the optimizer can walk both in lockstep.

pub mod activation;
pub mod block;
pub mod conv;
pub mod head;
pub mod tcn;

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::config::ModelConfig;
use crate::distribution::DistributionParams;
use crate::error::{ensure_finite, EngineResult};
use crate::optimizer::ParamSet;
use crate::series::Series;

pub use block::ResidualBlock;
pub use conv::{CausalConv1d, Projection};
pub use head::{DistributionHead, LinearHead};
pub use tcn::TemporalConvNet;

/// All trainable tensors of the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelParameters {
    pub tcn: TemporalConvNet,
    pub head: DistributionHead,
}

/// Parameter gradients share the parameter layout.
pub type ModelGradients = ModelParameters;

impl ModelParameters {
    pub fn zeros_like(&self) -> Self {
        Self {
            tcn: self.tcn.zeros_like(),
            head: self.head.zeros_like(),
        }
    }

    pub fn is_finite(&self) -> bool {
        self.tensors().iter().all(|t| t.iter().all(|v| v.is_finite()))
    }

    /// Element-wise `self += other` (gradient accumulation).
    pub fn accumulate(&mut self, other: &ModelParameters) -> EngineResult<()> {
        let src = other.tensors();
        let mut dst = self.tensors_mut();
        if src.len() != dst.len() {
            return Err(crate::error::ForecastError::shape("gradient tensors", dst.len(), src.len()));
        }
        for (d, s) in dst.iter_mut().zip(&src) {
            if d.len() != s.len() {
                return Err(crate::error::ForecastError::shape("gradient tensor", d.len(), s.len()));
            }
            for (a, b) in d.iter_mut().zip(s.iter()) {
                *a += b;
            }
        }
        Ok(())
    }
}

impl ParamSet for ModelParameters {
    fn tensors(&self) -> Vec<&[f64]> {
        let mut out: Vec<&[f64]> = Vec::new();
        for block in self.tcn.blocks() {
            out.push(block.conv().weight());
            out.push(block.conv().bias());
            if let Some(p) = block.projection() {
                out.push(p.weight());
                out.push(p.bias());
            }
        }
        for head in [self.head.mu_head(), self.head.k_head()] {
            out.push(head.weight());
            out.push(head.bias_slice());
        }
        out
    }

    fn tensors_mut(&mut self) -> Vec<&mut [f64]> {
        let mut out: Vec<&mut [f64]> = Vec::new();
        for block in self.tcn.blocks_mut() {
            let (conv, projection) = block.parts_mut();
            let (w, b) = conv.params_mut();
            out.push(w);
            out.push(b);
            if let Some(p) = projection {
                let (w, b) = p.params_mut();
                out.push(w);
                out.push(b);
            }
        }
        let (mu, k) = self.head.heads_mut();
        for head in [mu, k] {
            let (w, b) = head.parts_mut();
            out.push(w);
            out.push(std::slice::from_mut(b));
        }
        out
    }
}

/// Intermediate values of one forward pass, consumed by `backward`.
#[derive(Debug, Clone)]
pub struct ForwardCache {
    tcn: tcn::TcnCache,
    head: head::HeadCache,
}

/// The trained artefact: validated configuration plus parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SequenceModel {
    config: ModelConfig,
    params: ModelParameters,
}

impl SequenceModel {
    /// Build a freshly initialized model. The configuration is validated here
    /// and never changes afterwards.
    pub fn new<R: Rng + ?Sized>(config: ModelConfig, rng: &mut R) -> EngineResult<Self> {
        config.validate()?;
        let tcn = TemporalConvNet::initialized(&config, rng)?;
        let head = DistributionHead::initialized(config.hidden_width, config.positivity_epsilon, config.init_scale, rng)?;
        Ok(Self {
            config,
            params: ModelParameters { tcn, head },
        })
    }

    pub fn config(&self) -> &ModelConfig {
        &self.config
    }

    pub fn params(&self) -> &ModelParameters {
        &self.params
    }

    pub(crate) fn params_mut(&mut self) -> &mut ModelParameters {
        &mut self.params
    }

    pub fn receptive_field(&self) -> usize {
        self.params.tcn.receptive_field()
    }

    pub fn predict(&self, input: &Series) -> EngineResult<DistributionParams> {
        Ok(self.forward(input)?.0)
    }

    pub fn forward(&self, input: &Series) -> EngineResult<(DistributionParams, ForwardCache)> {
        let (hidden, tcn_cache) = self.params.tcn.final_hidden(input)?;
        let (params, head_cache) = self.params.head.forward(&hidden)?;
        Ok((
            params,
            ForwardCache {
                tcn: tcn_cache,
                head: head_cache,
            },
        ))
    }

    /// `forward` for a training step: a non-finite hidden state or head
    /// pre-activation is a `FatalTrainingError` rather than an invalid
    /// distribution.
    pub(crate) fn training_forward(&self, input: &Series) -> EngineResult<(DistributionParams, ForwardCache)> {
        let (hidden, tcn_cache) = self.params.tcn.final_hidden(input)?;
        ensure_finite(&hidden, "final hidden state")?;
        let (z_mu, z_k) = self.params.head.pre_activations(&hidden)?;
        ensure_finite(&[z_mu, z_k], "head pre-activations")?;
        let (params, head_cache) = self.params.head.forward(&hidden)?;
        Ok((
            params,
            ForwardCache {
                tcn: tcn_cache,
                head: head_cache,
            },
        ))
    }

    /// Parameter gradients for upstream `∂L/∂mu`, `∂L/∂k`.
    pub fn backward(&self, cache: &ForwardCache, d_mu: f64, d_k: f64) -> EngineResult<ModelGradients> {
        let (grad_hidden, head_grads) = self.params.head.backward(&cache.head, d_mu, d_k)?;
        ensure_finite(&grad_hidden, "hidden-state gradient")?;
        let (_, tcn_grads) = self.params.tcn.backward(&cache.tcn, &grad_hidden)?;
        Ok(ModelParameters {
            tcn: tcn_grads,
            head: head_grads,
        })
    }
}
