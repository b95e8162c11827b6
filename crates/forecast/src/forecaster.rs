//! Serving path: history → `Sequence` → `(mu, k)` → bounds → `ForecastResult`.

use std::sync::Arc;

use larder_core::IngredientId;
use rand::Rng;
use tracing::{debug, warn};

use crate::config::{BoundsMethod, ForecastConfig};
use crate::distribution::{self, DistributionParams};
use crate::error::{EngineResult, ForecastError};
use crate::features::{FeatureEncoder, Sequence};
use crate::provider::{HistoryProvider, NormalizationProvider};
use crate::registry::{ModelRegistry, ServingModel};
use crate::result::ForecastResult;

/// Read-only forecasting front end.
///
/// Every request pins the current serving snapshot for its whole duration,
/// so a concurrent publication never mixes two parameter sets.
pub struct Forecaster {
    encoder: FeatureEncoder,
    registry: Arc<ModelRegistry>,
    config: ForecastConfig,
    history: Arc<dyn HistoryProvider>,
    normalization: Arc<dyn NormalizationProvider>,
}

impl std::fmt::Debug for Forecaster {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Forecaster")
            .field("encoder", &self.encoder)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl Forecaster {
    pub fn new(
        encoder: FeatureEncoder,
        registry: Arc<ModelRegistry>,
        config: ForecastConfig,
        history: Arc<dyn HistoryProvider>,
        normalization: Arc<dyn NormalizationProvider>,
    ) -> EngineResult<Self> {
        config.validate()?;
        Ok(Self {
            encoder,
            registry,
            config,
            history,
            normalization,
        })
    }

    pub fn config(&self) -> &ForecastConfig {
        &self.config
    }

    pub fn encoder(&self) -> &FeatureEncoder {
        &self.encoder
    }

    /// Forecast the horizon day of an already encoded window.
    pub fn forecast_sequence<R: Rng + ?Sized>(&self, sequence: &Sequence, rng: &mut R) -> EngineResult<ForecastResult> {
        let serving = self.registry.current()?;
        self.forecast_with(&serving, sequence, rng)
    }

    /// Fetch, encode and forecast the latest window of one ingredient.
    pub fn forecast<R: Rng + ?Sized>(&self, ingredient_id: IngredientId, rng: &mut R) -> EngineResult<ForecastResult> {
        self.try_forecast(ingredient_id, rng)
            .inspect_err(|err| warn!(ingredient_id = %ingredient_id, error = %err, "forecast request failed"))
    }

    fn try_forecast<R: Rng + ?Sized>(&self, ingredient_id: IngredientId, rng: &mut R) -> EngineResult<ForecastResult> {
        let serving = self.registry.current()?;
        let history = self.history.get_history(ingredient_id, self.encoder.window_days())?;
        let window = self.encoder.trailing_window(&history);
        let normalization = self.normalization.usage_normalization(ingredient_id)?;
        let sequence = self.encoder.encode(window, &normalization)?;
        Ok(self.forecast_with(&serving, &sequence, rng)?.with_ingredient(ingredient_id))
    }

    fn forecast_with<R: Rng + ?Sized>(
        &self,
        serving: &ServingModel,
        sequence: &Sequence,
        rng: &mut R,
    ) -> EngineResult<ForecastResult> {
        if sequence.len() != self.encoder.window_days() {
            return Err(ForecastError::InsufficientHistory {
                required: self.encoder.window_days(),
                available: sequence.len(),
            });
        }
        let params = serving.model.predict(sequence.as_series())?;
        let result = self.with_bounds(params, rng)?;
        debug!(
            version = serving.version,
            end_date = %sequence.end_date(),
            mu = result.mu,
            k = result.k,
            lower = result.lower_bound,
            upper = result.upper_bound,
            "forecast"
        );
        Ok(result)
    }

    fn with_bounds<R: Rng + ?Sized>(&self, params: DistributionParams, rng: &mut R) -> EngineResult<ForecastResult> {
        let (lq, uq) = (self.config.lower_quantile, self.config.upper_quantile);
        let quantiles = (lq, uq);
        match self.config.bounds {
            BoundsMethod::MonteCarlo { samples } => {
                let mut draws = distribution::sample_n(params.mu(), params.k(), samples, rng)?;
                draws.sort_unstable();
                let bounds = (
                    distribution::empirical_quantile(&draws, lq)?,
                    distribution::empirical_quantile(&draws, uq)?,
                );
                let result = ForecastResult::new(params, bounds, quantiles);
                Ok(if self.config.keep_samples { result.with_samples(draws) } else { result })
            }
            BoundsMethod::Exact => {
                let bounds = (
                    distribution::quantile(lq, params.mu(), params.k())?,
                    distribution::quantile(uq, params.mu(), params.k())?,
                );
                Ok(ForecastResult::new(params, bounds, quantiles))
            }
        }
    }
}
