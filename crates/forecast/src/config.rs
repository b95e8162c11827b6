//! Engine configuration.
//!
//! Every struct has a `Default` matching the reference design, `with_*`
//! builders, and a `validate()` that is run once when the component using it
//! is constructed. After that the configuration is never mutated.

use serde::{Deserialize, Serialize};

use crate::error::{EngineResult, ForecastError};
use crate::features::FEATURE_WIDTH;

/// Shape of the temporal convolutional network and its output heads.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelConfig {
    /// Features per timestep (1..=256).
    pub input_width: usize,
    /// Channels of every residual block (1..=1024).
    pub hidden_width: usize,
    /// Taps per causal convolution (2..=16).
    pub kernel_size: usize,
    /// One entry per residual block (1..=16 blocks, each dilation 1..=1024).
    pub dilations: Vec<usize>,
    /// Added after Softplus so `mu` and `k` are never exactly zero.
    pub positivity_epsilon: f64,
    /// Multiplier on the He-normal init standard deviation.
    pub init_scale: f64,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            input_width: FEATURE_WIDTH,
            hidden_width: 32,
            kernel_size: 3,
            dilations: vec![1, 2, 4, 8],
            positivity_epsilon: 1e-4,
            init_scale: 1.0,
        }
    }
}

impl ModelConfig {
    pub fn with_hidden_width(mut self, hidden_width: usize) -> Self {
        self.hidden_width = hidden_width;
        self
    }

    pub fn with_kernel_size(mut self, kernel_size: usize) -> Self {
        self.kernel_size = kernel_size;
        self
    }

    pub fn with_dilations(mut self, dilations: Vec<usize>) -> Self {
        self.dilations = dilations;
        self
    }

    pub fn with_input_width(mut self, input_width: usize) -> Self {
        self.input_width = input_width;
        self
    }

    pub fn with_init_scale(mut self, init_scale: f64) -> Self {
        self.init_scale = init_scale;
        self
    }

    /// `1 + Σ (kernel_size − 1) · dilation_i`.
    pub fn receptive_field(&self) -> usize {
        1 + self
            .dilations
            .iter()
            .map(|d| (self.kernel_size - 1) * d)
            .sum::<usize>()
    }

    pub fn validate(&self) -> EngineResult<()> {
        if !(1..=256).contains(&self.input_width) {
            return Err(ForecastError::invalid_config(format!(
                "input_width must lie in 1..=256, got {}",
                self.input_width
            )));
        }
        if !(1..=1024).contains(&self.hidden_width) {
            return Err(ForecastError::invalid_config(format!(
                "hidden_width must lie in 1..=1024, got {}",
                self.hidden_width
            )));
        }
        if !(2..=16).contains(&self.kernel_size) {
            return Err(ForecastError::invalid_config(format!(
                "kernel_size must lie in 2..=16, got {}",
                self.kernel_size
            )));
        }
        if !(1..=16).contains(&self.dilations.len()) {
            return Err(ForecastError::invalid_config(format!(
                "dilation schedule must have 1..=16 entries, got {}",
                self.dilations.len()
            )));
        }
        if let Some(d) = self.dilations.iter().find(|d| !(1..=1024).contains(*d)) {
            return Err(ForecastError::invalid_config(format!(
                "every dilation must lie in 1..=1024, got {d}"
            )));
        }
        if !(self.positivity_epsilon.is_finite() && self.positivity_epsilon > 0.0) {
            return Err(ForecastError::invalid_config("positivity_epsilon must be finite and > 0"));
        }
        if !(self.init_scale.is_finite() && self.init_scale > 0.0) {
            return Err(ForecastError::invalid_config("init_scale must be finite and > 0"));
        }
        Ok(())
    }
}

/// How raw usage is scaled before it enters the feature vector.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum NormalizationScheme {
    #[default]
    ZScore,
    MinMax,
}

impl core::str::FromStr for NormalizationScheme {
    type Err = ForecastError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "z_score" | "zscore" => Ok(Self::ZScore),
            "min_max" | "minmax" => Ok(Self::MinMax),
            other => Err(ForecastError::invalid_config(format!("unknown normalization scheme: {other}"))),
        }
    }
}

/// Window and target layout of the feature encoder.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FeatureConfig {
    /// Contiguous days per input sequence.
    pub window_days: usize,
    /// Days between the window's last day and the day being predicted.
    pub horizon_days: usize,
    /// Scheme used when fitting usage statistics from a history.
    pub normalization: NormalizationScheme,
}

impl Default for FeatureConfig {
    fn default() -> Self {
        Self {
            window_days: 28,
            horizon_days: 7,
            normalization: NormalizationScheme::ZScore,
        }
    }
}

impl FeatureConfig {
    pub fn with_window_days(mut self, window_days: usize) -> Self {
        self.window_days = window_days;
        self
    }

    pub fn with_horizon_days(mut self, horizon_days: usize) -> Self {
        self.horizon_days = horizon_days;
        self
    }

    pub fn with_normalization(mut self, normalization: NormalizationScheme) -> Self {
        self.normalization = normalization;
        self
    }

    pub fn validate(&self) -> EngineResult<()> {
        if !(1..=366).contains(&self.window_days) {
            return Err(ForecastError::invalid_config(format!(
                "window_days must lie in 1..=366, got {}",
                self.window_days
            )));
        }
        if !(1..=90).contains(&self.horizon_days) {
            return Err(ForecastError::invalid_config(format!(
                "horizon_days must lie in 1..=90, got {}",
                self.horizon_days
            )));
        }
        Ok(())
    }
}

/// How `[lower_bound, upper_bound]` is derived from `(mu, k)`.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "method")]
pub enum BoundsMethod {
    /// Empirical percentiles of `samples` Gamma–Poisson draws.
    MonteCarlo { samples: usize },
    /// Numerical inversion of the Negative-Binomial CDF.
    Exact,
}

impl Default for BoundsMethod {
    fn default() -> Self {
        BoundsMethod::MonteCarlo { samples: 1000 }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ForecastConfig {
    pub bounds: BoundsMethod,
    pub lower_quantile: f64,
    pub upper_quantile: f64,
    /// Attach the raw Monte Carlo draws to the result.
    pub keep_samples: bool,
}

impl Default for ForecastConfig {
    fn default() -> Self {
        Self {
            bounds: BoundsMethod::default(),
            lower_quantile: 0.05,
            upper_quantile: 0.95,
            keep_samples: false,
        }
    }
}

impl ForecastConfig {
    pub fn with_bounds(mut self, bounds: BoundsMethod) -> Self {
        self.bounds = bounds;
        self
    }

    pub fn with_quantiles(mut self, lower: f64, upper: f64) -> Self {
        self.lower_quantile = lower;
        self.upper_quantile = upper;
        self
    }

    pub fn with_keep_samples(mut self, keep_samples: bool) -> Self {
        self.keep_samples = keep_samples;
        self
    }

    pub fn validate(&self) -> EngineResult<()> {
        if let BoundsMethod::MonteCarlo { samples } = self.bounds {
            if !(10..=100_000).contains(&samples) {
                return Err(ForecastError::invalid_config(format!(
                    "monte carlo sample count must lie in 10..=100000, got {samples}"
                )));
            }
        }
        let ordered = 0.0 < self.lower_quantile
            && self.lower_quantile < self.upper_quantile
            && self.upper_quantile < 1.0;
        if !ordered {
            return Err(ForecastError::invalid_config(format!(
                "quantiles must satisfy 0 < lower < upper < 1, got ({}, {})",
                self.lower_quantile, self.upper_quantile
            )));
        }
        if self.keep_samples && self.bounds == BoundsMethod::Exact {
            return Err(ForecastError::invalid_config("keep_samples requires monte carlo bounds"));
        }
        Ok(())
    }
}
