//! `larder-forecast`
//!
//! **Responsibility:** probabilistic ingredient demand forecasting.
//!
//! A causal temporal convolutional network reads a window of daily usage and
//! exogenous signals and predicts the `(mu, k)` parameters of a
//! Negative-Binomial distribution for demand `horizon_days` ahead.
//!
//! - Gradients are derived by hand: every layer is a `forward`/`backward` pair.
//! - The optimizer (Adam) is generic over any `ParamSet`.
//! - Randomness is always passed in explicitly as an `Rng`.
//! - Forecasts are *insights*: nothing here stores history or results.

pub mod config;
pub mod distribution;
pub mod error;
pub mod features;
pub mod forecaster;
pub mod loss;
pub mod model;
pub mod optimizer;
pub mod provider;
pub mod registry;
pub mod result;
pub mod series;
pub mod settings;
pub mod training;

pub use config::{BoundsMethod, FeatureConfig, ForecastConfig, ModelConfig, NormalizationScheme};
pub use distribution::DistributionParams;
pub use error::{EngineResult, ForecastError};
pub use features::{DailyRecord, FeatureEncoder, FeatureVector, Sequence, TrainingExample, UsageNormalization, FEATURE_WIDTH};
pub use forecaster::Forecaster;
pub use loss::BatchLoss;
pub use model::{ModelParameters, SequenceModel};
pub use optimizer::{Adam, AdamConfig, ParamSet};
pub use provider::{FixedNormalization, HistoryProvider, InMemoryHistory, NormalizationProvider};
pub use registry::{ModelRegistry, ServingModel};
pub use result::ForecastResult;
pub use series::Series;
pub use settings::EngineSettings;
pub use training::{LossPlateau, MaxEpochs, StoppingCriterion, Trainer, TrainingReport, TrainingState};
