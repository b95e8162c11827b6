//! Residual TCN block: `relu(conv(x) + residual(x))`.

use rand::Rng;
use serde::{Deserialize, Serialize};

use super::activation::{relu, relu_grad};
use super::conv::{CausalConv1d, Projection};
use crate::error::{EngineResult, ForecastError};
use crate::series::Series;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResidualBlock {
    conv: CausalConv1d,
    /// Present only when the block changes the channel count.
    projection: Option<Projection>,
}

/// What `backward` needs from the forward pass.
#[derive(Debug, Clone)]
pub struct BlockCache {
    input: Series,
    pre_activation: Series,
}

impl ResidualBlock {
    pub fn initialized<R: Rng + ?Sized>(
        in_width: usize,
        out_width: usize,
        kernel_size: usize,
        dilation: usize,
        scale: f64,
        rng: &mut R,
    ) -> EngineResult<Self> {
        let conv = CausalConv1d::initialized(in_width, out_width, kernel_size, dilation, scale, rng)?;
        let projection = if in_width == out_width {
            None
        } else {
            Some(Projection::initialized(in_width, out_width, scale, rng)?)
        };
        Ok(Self { conv, projection })
    }

    pub fn zeros_like(&self) -> Self {
        Self {
            conv: self.conv.zeros_like(),
            projection: self.projection.as_ref().map(Projection::zeros_like),
        }
    }

    pub fn conv(&self) -> &CausalConv1d {
        &self.conv
    }

    pub fn projection(&self) -> Option<&Projection> {
        self.projection.as_ref()
    }

    pub(crate) fn parts_mut(&mut self) -> (&mut CausalConv1d, Option<&mut Projection>) {
        (&mut self.conv, self.projection.as_mut())
    }

    pub fn out_width(&self) -> usize {
        self.conv.out_width()
    }

    pub fn forward(&self, input: &Series) -> EngineResult<(Series, BlockCache)> {
        let mut pre_activation = self.conv.forward(input)?;
        match &self.projection {
            Some(p) => pre_activation.add_assign(&p.forward(input)?)?,
            None => pre_activation.add_assign(input)?,
        }
        let output = pre_activation.map(relu);
        Ok((
            output,
            BlockCache {
                input: input.clone(),
                pre_activation,
            },
        ))
    }

    pub fn backward(&self, cache: &BlockCache, grad_output: &Series) -> EngineResult<(Series, ResidualBlock)> {
        let pre = &cache.pre_activation;
        grad_output.ensure_shape("residual block grad_output", pre.steps(), pre.width())?;

        let masked: Vec<f64> = grad_output
            .as_slice()
            .iter()
            .zip(pre.as_slice())
            .map(|(g, z)| g * relu_grad(*z))
            .collect();
        let grad_pre = Series::from_flat(pre.steps(), pre.width(), masked)?;

        let (mut grad_input, conv_grads) = self.conv.backward(&cache.input, &grad_pre)?;
        let projection_grads = match &self.projection {
            Some(p) => {
                let (grad_residual, grads) = p.backward(&cache.input, &grad_pre)?;
                grad_input.add_assign(&grad_residual)?;
                Some(grads)
            }
            None => {
                if cache.input.width() != grad_pre.width() {
                    return Err(ForecastError::shape(
                        "identity residual",
                        cache.input.width(),
                        grad_pre.width(),
                    ));
                }
                grad_input.add_assign(&grad_pre)?;
                None
            }
        };

        Ok((
            grad_input,
            ResidualBlock {
                conv: conv_grads,
                projection: projection_grads,
            },
        ))
    }
}
