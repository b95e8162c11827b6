//! Stack of residual causal-convolution blocks.

use rand::Rng;
use serde::{Deserialize, Serialize};

use super::block::{BlockCache, ResidualBlock};
use crate::config::ModelConfig;
use crate::error::{EngineResult, ForecastError};
use crate::series::Series;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TemporalConvNet {
    input_width: usize,
    blocks: Vec<ResidualBlock>,
}

#[derive(Debug, Clone)]
pub struct TcnCache {
    steps: usize,
    blocks: Vec<BlockCache>,
}

impl TemporalConvNet {
    /// Block `i` uses dilation `config.dilations[i]`; only the first block
    /// changes width (`input_width → hidden_width`).
    pub fn initialized<R: Rng + ?Sized>(config: &ModelConfig, rng: &mut R) -> EngineResult<Self> {
        config.validate()?;
        let mut blocks = Vec::with_capacity(config.dilations.len());
        let mut in_width = config.input_width;
        for &dilation in &config.dilations {
            blocks.push(ResidualBlock::initialized(
                in_width,
                config.hidden_width,
                config.kernel_size,
                dilation,
                config.init_scale,
                rng,
            )?);
            in_width = config.hidden_width;
        }
        Ok(Self {
            input_width: config.input_width,
            blocks,
        })
    }

    pub fn zeros_like(&self) -> Self {
        Self {
            input_width: self.input_width,
            blocks: self.blocks.iter().map(ResidualBlock::zeros_like).collect(),
        }
    }

    pub fn blocks(&self) -> &[ResidualBlock] {
        &self.blocks
    }

    pub(crate) fn blocks_mut(&mut self) -> &mut [ResidualBlock] {
        &mut self.blocks
    }

    pub fn input_width(&self) -> usize {
        self.input_width
    }

    pub fn output_width(&self) -> usize {
        self.blocks.last().map(ResidualBlock::out_width).unwrap_or(self.input_width)
    }

    /// Number of input steps that can influence one output step.
    pub fn receptive_field(&self) -> usize {
        1 + self
            .blocks
            .iter()
            .map(|b| b.conv().left_padding())
            .sum::<usize>()
    }

    pub fn forward(&self, input: &Series) -> EngineResult<(Series, TcnCache)> {
        if input.width() != self.input_width {
            return Err(ForecastError::shape("tcn input width", self.input_width, input.width()));
        }
        if input.steps() == 0 {
            return Err(ForecastError::shape("tcn input steps", 1, 0));
        }
        let mut caches = Vec::with_capacity(self.blocks.len());
        let mut x = input.clone();
        for block in &self.blocks {
            let (out, cache) = block.forward(&x)?;
            caches.push(cache);
            x = out;
        }
        Ok((
            x,
            TcnCache {
                steps: input.steps(),
                blocks: caches,
            },
        ))
    }

    /// Hidden state of every timestep after the last block.
    pub fn hidden_states(&self, input: &Series) -> EngineResult<Series> {
        Ok(self.forward(input)?.0)
    }

    /// Hidden state of the final timestep (sequence-to-point).
    pub fn final_hidden(&self, input: &Series) -> EngineResult<(Vec<f64>, TcnCache)> {
        let (states, cache) = self.forward(input)?;
        let last = states
            .last_row()
            .ok_or_else(|| ForecastError::shape("tcn output steps", 1, 0))?
            .to_vec();
        Ok((last, cache))
    }

    /// Backpropagate a gradient that is non-zero only at the final timestep.
    pub fn backward(&self, cache: &TcnCache, grad_last: &[f64]) -> EngineResult<(Series, TemporalConvNet)> {
        if grad_last.len() != self.output_width() {
            return Err(ForecastError::shape("tcn grad width", self.output_width(), grad_last.len()));
        }
        if cache.blocks.len() != self.blocks.len() {
            return Err(ForecastError::shape("tcn cache blocks", self.blocks.len(), cache.blocks.len()));
        }

        let mut grad = Series::zeros(cache.steps, self.output_width());
        grad.row_mut(cache.steps - 1).copy_from_slice(grad_last);

        let mut grads = self.zeros_like();
        for (idx, block) in self.blocks.iter().enumerate().rev() {
            let (grad_input, block_grads) = block.backward(&cache.blocks[idx], &grad)?;
            grads.blocks[idx] = block_grads;
            grad = grad_input;
        }
        Ok((grad, grads))
    }
}
