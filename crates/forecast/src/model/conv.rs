//! Dilated causal 1-D convolution and the per-timestep linear projection.

use rand::Rng;
use rand_distr::{Distribution, Normal};
use serde::{Deserialize, Serialize};

use crate::error::{EngineResult, ForecastError};
use crate::series::Series;

/// Causal convolution over time.
///
/// Tap `j` of the kernel reads timestep `t − (K−1−j)·d`, so the last tap is
/// the current step and the rest look strictly backwards. Reads before the
/// start of the sequence hit implicit zero padding on the left; nothing is
/// ever padded on the right.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CausalConv1d {
    in_width: usize,
    out_width: usize,
    kernel_size: usize,
    dilation: usize,
    /// `[out][in][kernel]`, row-major.
    weight: Vec<f64>,
    bias: Vec<f64>,
}

impl CausalConv1d {
    pub fn zeros(in_width: usize, out_width: usize, kernel_size: usize, dilation: usize) -> Self {
        Self {
            in_width,
            out_width,
            kernel_size,
            dilation,
            weight: vec![0.0; out_width * in_width * kernel_size],
            bias: vec![0.0; out_width],
        }
    }

    /// He-normal weights scaled by `scale`, zero bias.
    pub fn initialized<R: Rng + ?Sized>(
        in_width: usize,
        out_width: usize,
        kernel_size: usize,
        dilation: usize,
        scale: f64,
        rng: &mut R,
    ) -> EngineResult<Self> {
        let mut conv = Self::zeros(in_width, out_width, kernel_size, dilation);
        let std = scale * (2.0 / (in_width * kernel_size) as f64).sqrt();
        fill_normal(&mut conv.weight, std, rng)?;
        Ok(conv)
    }

    pub fn zeros_like(&self) -> Self {
        Self::zeros(self.in_width, self.out_width, self.kernel_size, self.dilation)
    }

    pub fn in_width(&self) -> usize {
        self.in_width
    }

    pub fn out_width(&self) -> usize {
        self.out_width
    }

    pub fn dilation(&self) -> usize {
        self.dilation
    }

    pub fn kernel_size(&self) -> usize {
        self.kernel_size
    }

    /// Number of zero steps implicitly prepended to the input.
    pub fn left_padding(&self) -> usize {
        (self.kernel_size - 1) * self.dilation
    }

    pub(crate) fn weight(&self) -> &[f64] {
        &self.weight
    }

    #[cfg(test)]
    pub(crate) fn weight_mut(&mut self) -> &mut [f64] {
        &mut self.weight
    }

    pub(crate) fn bias(&self) -> &[f64] {
        &self.bias
    }

    pub(crate) fn params_mut(&mut self) -> (&mut [f64], &mut [f64]) {
        (&mut self.weight, &mut self.bias)
    }

    #[inline]
    fn w_index(&self, o: usize, i: usize, j: usize) -> usize {
        (o * self.in_width + i) * self.kernel_size + j
    }

    /// Source timestep read by tap `j` at output step `t`, `None` inside the padding.
    #[inline]
    fn source(&self, t: usize, j: usize) -> Option<usize> {
        t.checked_sub((self.kernel_size - 1 - j) * self.dilation)
    }

    pub fn forward(&self, input: &Series) -> EngineResult<Series> {
        if input.width() != self.in_width {
            return Err(ForecastError::shape("causal conv input width", self.in_width, input.width()));
        }
        let steps = input.steps();
        let mut out = Series::zeros(steps, self.out_width);
        for t in 0..steps {
            let row = out.row_mut(t);
            row.copy_from_slice(&self.bias);
            for j in 0..self.kernel_size {
                let Some(src) = self.source(t, j) else {
                    continue;
                };
                let x = input.row(src);
                for (o, acc) in row.iter_mut().enumerate() {
                    for (i, xi) in x.iter().enumerate() {
                        *acc += self.weight[self.w_index(o, i, j)] * xi;
                    }
                }
            }
        }
        Ok(out)
    }

    /// Gradient w.r.t. the input and the parameters, given the forward input.
    pub fn backward(&self, input: &Series, grad_output: &Series) -> EngineResult<(Series, CausalConv1d)> {
        if input.width() != self.in_width {
            return Err(ForecastError::shape("causal conv input width", self.in_width, input.width()));
        }
        grad_output.ensure_shape("causal conv grad_output", input.steps(), self.out_width)?;

        let mut grads = self.zeros_like();
        let mut grad_input = Series::zeros(input.steps(), self.in_width);

        for t in 0..input.steps() {
            let g = grad_output.row(t);
            for (b, go) in grads.bias.iter_mut().zip(g) {
                *b += go;
            }
            for j in 0..self.kernel_size {
                let Some(src) = self.source(t, j) else {
                    continue;
                };
                let x = input.row(src);
                for (o, &go) in g.iter().enumerate() {
                    if go == 0.0 {
                        continue;
                    }
                    for i in 0..self.in_width {
                        let w = self.w_index(o, i, j);
                        grads.weight[w] += go * x[i];
                        grad_input.row_mut(src)[i] += go * self.weight[w];
                    }
                }
            }
        }
        Ok((grad_input, grads))
    }
}

/// Per-timestep affine map `[in] → [out]` used on the residual path when
/// block widths differ.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Projection {
    in_width: usize,
    out_width: usize,
    /// `[out][in]`, row-major.
    weight: Vec<f64>,
    bias: Vec<f64>,
}

impl Projection {
    pub fn zeros(in_width: usize, out_width: usize) -> Self {
        Self {
            in_width,
            out_width,
            weight: vec![0.0; out_width * in_width],
            bias: vec![0.0; out_width],
        }
    }

    pub fn initialized<R: Rng + ?Sized>(
        in_width: usize,
        out_width: usize,
        scale: f64,
        rng: &mut R,
    ) -> EngineResult<Self> {
        let mut proj = Self::zeros(in_width, out_width);
        let std = scale * (1.0 / in_width as f64).sqrt();
        fill_normal(&mut proj.weight, std, rng)?;
        Ok(proj)
    }

    pub fn zeros_like(&self) -> Self {
        Self::zeros(self.in_width, self.out_width)
    }

    pub(crate) fn weight(&self) -> &[f64] {
        &self.weight
    }

    #[cfg(test)]
    pub(crate) fn weight_mut(&mut self) -> &mut [f64] {
        &mut self.weight
    }

    pub(crate) fn bias(&self) -> &[f64] {
        &self.bias
    }

    pub(crate) fn params_mut(&mut self) -> (&mut [f64], &mut [f64]) {
        (&mut self.weight, &mut self.bias)
    }

    pub fn forward(&self, input: &Series) -> EngineResult<Series> {
        if input.width() != self.in_width {
            return Err(ForecastError::shape("projection input width", self.in_width, input.width()));
        }
        let mut out = Series::zeros(input.steps(), self.out_width);
        for t in 0..input.steps() {
            let x = input.row(t);
            for (o, y) in out.row_mut(t).iter_mut().enumerate() {
                let w = &self.weight[o * self.in_width..(o + 1) * self.in_width];
                *y = self.bias[o] + w.iter().zip(x).map(|(a, b)| a * b).sum::<f64>();
            }
        }
        Ok(out)
    }

    pub fn backward(&self, input: &Series, grad_output: &Series) -> EngineResult<(Series, Projection)> {
        if input.width() != self.in_width {
            return Err(ForecastError::shape("projection input width", self.in_width, input.width()));
        }
        grad_output.ensure_shape("projection grad_output", input.steps(), self.out_width)?;

        let mut grads = self.zeros_like();
        let mut grad_input = Series::zeros(input.steps(), self.in_width);
        for t in 0..input.steps() {
            let x = input.row(t);
            let g = grad_output.row(t);
            for (o, &go) in g.iter().enumerate() {
                grads.bias[o] += go;
                if go == 0.0 {
                    continue;
                }
                for i in 0..self.in_width {
                    grads.weight[o * self.in_width + i] += go * x[i];
                    grad_input.row_mut(t)[i] += go * self.weight[o * self.in_width + i];
                }
            }
        }
        Ok((grad_input, grads))
    }
}

fn fill_normal<R: Rng + ?Sized>(values: &mut [f64], std: f64, rng: &mut R) -> EngineResult<()> {
    let normal = Normal::new(0.0, std)
        .map_err(|e| ForecastError::invalid_config(format!("weight init std {std}: {e}")))?;
    for v in values.iter_mut() {
        *v = normal.sample(rng);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    fn ramp(steps: usize, width: usize) -> Series {
        let data = (0..steps * width).map(|x| (x as f64 * 0.37).sin()).collect();
        Series::from_flat(steps, width, data).unwrap()
    }

    /// Σ grad_output ⊙ output, the scalar whose gradient `backward` computes.
    fn weighted_sum(out: &Series, weights: &Series) -> f64 {
        out.as_slice().iter().zip(weights.as_slice()).map(|(a, b)| a * b).sum()
    }

    #[test]
    fn dilated_taps_read_backwards_only() {
        // Single channel, kernel [1, 10, 100], dilation 2: y[t] = x[t] * 100 + x[t-2] * 10 + x[t-4].
        let mut conv = CausalConv1d::zeros(1, 1, 3, 2);
        conv.weight_mut().copy_from_slice(&[1.0, 10.0, 100.0]);
        let input = Series::from_flat(6, 1, vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0]).unwrap();
        let out = conv.forward(&input).unwrap();
        assert_eq!(out.as_slice(), &[100.0, 200.0, 310.0, 420.0, 531.0, 642.0]);
        assert_eq!(conv.left_padding(), 4);
    }

    #[test]
    fn conv_backward_matches_finite_differences() {
        let mut rng = StdRng::seed_from_u64(3);
        let conv = CausalConv1d::initialized(3, 2, 3, 2, 1.0, &mut rng).unwrap();
        let input = ramp(7, 3);
        let g = ramp(7, 2).map(|v| v + 0.5);

        let (grad_input, grads) = conv.backward(&input, &g).unwrap();
        let h = 1e-6;

        for idx in [0, 5, 11, 17] {
            let mut plus = conv.clone();
            plus.weight_mut()[idx] += h;
            let mut minus = conv.clone();
            minus.weight_mut()[idx] -= h;
            let fd = (weighted_sum(&plus.forward(&input).unwrap(), &g) - weighted_sum(&minus.forward(&input).unwrap(), &g)) / (2.0 * h);
            assert!((grads.weight()[idx] - fd).abs() < 1e-6, "weight {idx}");
        }

        for idx in [0, 4, 10, 20] {
            let mut plus = input.clone();
            plus.as_mut_slice()[idx] += h;
            let mut minus = input.clone();
            minus.as_mut_slice()[idx] -= h;
            let fd = (weighted_sum(&conv.forward(&plus).unwrap(), &g) - weighted_sum(&conv.forward(&minus).unwrap(), &g)) / (2.0 * h);
            assert!((grad_input.as_slice()[idx] - fd).abs() < 1e-6, "input {idx}");
        }

        let bias_sum: f64 = (0..7).map(|t| g.row(t)[1]).sum();
        assert!((grads.bias()[1] - bias_sum).abs() < 1e-12);
    }

    #[test]
    fn projection_backward_matches_finite_differences() {
        let mut rng = StdRng::seed_from_u64(9);
        let proj = Projection::initialized(4, 3, 1.0, &mut rng).unwrap();
        let input = ramp(5, 4);
        let g = ramp(5, 3);
        let (grad_input, grads) = proj.backward(&input, &g).unwrap();
        let h = 1e-6;

        for idx in [0, 6, 11] {
            let mut plus = proj.clone();
            plus.weight_mut()[idx] += h;
            let mut minus = proj.clone();
            minus.weight_mut()[idx] -= h;
            let fd = (weighted_sum(&plus.forward(&input).unwrap(), &g) - weighted_sum(&minus.forward(&input).unwrap(), &g)) / (2.0 * h);
            assert!((grads.weight()[idx] - fd).abs() < 1e-6);
        }
        for idx in [1, 9, 19] {
            let mut plus = input.clone();
            plus.as_mut_slice()[idx] += h;
            let mut minus = input.clone();
            minus.as_mut_slice()[idx] -= h;
            let fd = (weighted_sum(&proj.forward(&plus).unwrap(), &g) - weighted_sum(&proj.forward(&minus).unwrap(), &g)) / (2.0 * h);
            assert!((grad_input.as_slice()[idx] - fd).abs() < 1e-6);
        }
    }

    #[test]
    fn wrong_input_width_is_a_shape_mismatch() {
        let conv = CausalConv1d::zeros(14, 32, 3, 1);
        let err = conv.forward(&Series::zeros(28, 13)).unwrap_err();
        assert_eq!(err, ForecastError::shape("causal conv input width", 14, 13));
    }
}
