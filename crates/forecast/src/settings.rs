//! Process-level settings read from `LARDER_*` environment variables.
//!
//! | variable | default |
//! |---|---|
//! | `LARDER_WINDOW_DAYS` | 28 |
//! | `LARDER_HORIZON_DAYS` | 7 |
//! | `LARDER_NORMALIZATION` | `z_score` (`min_max`) |
//! | `LARDER_BOUNDS` | `monte_carlo` (`exact`) |
//! | `LARDER_MC_SAMPLES` | 1000 |
//! | `LARDER_LOWER_QUANTILE` / `LARDER_UPPER_QUANTILE` | 0.05 / 0.95 |
//! | `LARDER_LEARNING_RATE` | 1e-3 |
//! | `LARDER_SEED` | 42 |

use core::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::config::{BoundsMethod, FeatureConfig, ForecastConfig, ModelConfig};
use crate::error::{EngineResult, ForecastError};
use crate::optimizer::AdamConfig;

const DEFAULT_SEED: u64 = 42;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineSettings {
    pub model: ModelConfig,
    pub features: FeatureConfig,
    pub forecast: ForecastConfig,
    pub adam: AdamConfig,
    /// Seed for parameter init, shuffling and sampling.
    pub seed: u64,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            model: ModelConfig::default(),
            features: FeatureConfig::default(),
            forecast: ForecastConfig::default(),
            adam: AdamConfig::default(),
            seed: DEFAULT_SEED,
        }
    }
}

impl EngineSettings {
    pub fn from_env() -> EngineResult<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build settings from any key lookup; unset keys keep their defaults,
    /// malformed values are rejected.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> EngineResult<Self> {
        let mut settings = Self::default();

        if let Some(v) = parse(&lookup, "LARDER_WINDOW_DAYS")? {
            settings.features.window_days = v;
        }
        if let Some(v) = parse(&lookup, "LARDER_HORIZON_DAYS")? {
            settings.features.horizon_days = v;
        }
        if let Some(v) = parse(&lookup, "LARDER_NORMALIZATION")? {
            settings.features.normalization = v;
        }

        let samples = parse::<usize>(&lookup, "LARDER_MC_SAMPLES")?;
        match lookup("LARDER_BOUNDS").as_deref().map(str::trim) {
            None | Some("monte_carlo") => {
                if let Some(samples) = samples {
                    settings.forecast.bounds = BoundsMethod::MonteCarlo { samples };
                }
            }
            Some("exact") => settings.forecast.bounds = BoundsMethod::Exact,
            Some(other) => {
                return Err(ForecastError::invalid_config(format!("LARDER_BOUNDS: unknown method {other}")));
            }
        }
        if let Some(v) = parse(&lookup, "LARDER_LOWER_QUANTILE")? {
            settings.forecast.lower_quantile = v;
        }
        if let Some(v) = parse(&lookup, "LARDER_UPPER_QUANTILE")? {
            settings.forecast.upper_quantile = v;
        }
        if let Some(v) = parse(&lookup, "LARDER_LEARNING_RATE")? {
            settings.adam.learning_rate = v;
        }
        if let Some(v) = parse(&lookup, "LARDER_SEED")? {
            settings.seed = v;
        }

        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> EngineResult<()> {
        self.model.validate()?;
        self.features.validate()?;
        self.forecast.validate()?;
        self.adam.validate()
    }
}

fn parse<T>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> EngineResult<Option<T>>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match lookup(key) {
        None => Ok(None),
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|e| ForecastError::invalid_config(format!("{key}={raw}: {e}"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::NormalizationScheme;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn unset_variables_keep_defaults() {
        let settings = EngineSettings::from_lookup(lookup(&[])).unwrap();
        assert_eq!(settings, EngineSettings::default());
    }

    #[test]
    fn overrides_are_applied() {
        let settings = EngineSettings::from_lookup(lookup(&[
            ("LARDER_WINDOW_DAYS", "35"),
            ("LARDER_HORIZON_DAYS", "3"),
            ("LARDER_NORMALIZATION", "min_max"),
            ("LARDER_MC_SAMPLES", "2500"),
            ("LARDER_LOWER_QUANTILE", "0.1"),
            ("LARDER_UPPER_QUANTILE", "0.9"),
            ("LARDER_LEARNING_RATE", "0.005"),
            ("LARDER_SEED", "7"),
        ]))
        .unwrap();
        assert_eq!(settings.features.window_days, 35);
        assert_eq!(settings.features.horizon_days, 3);
        assert_eq!(settings.features.normalization, NormalizationScheme::MinMax);
        assert_eq!(settings.forecast.bounds, BoundsMethod::MonteCarlo { samples: 2500 });
        assert_eq!(settings.forecast.lower_quantile, 0.1);
        assert_eq!(settings.adam.learning_rate, 0.005);
        assert_eq!(settings.seed, 7);

        let exact = EngineSettings::from_lookup(lookup(&[("LARDER_BOUNDS", "exact")])).unwrap();
        assert_eq!(exact.forecast.bounds, BoundsMethod::Exact);
    }

    #[test]
    fn malformed_or_invalid_values_are_rejected() {
        for pairs in [
            [("LARDER_WINDOW_DAYS", "many")],
            [("LARDER_WINDOW_DAYS", "0")],
            [("LARDER_MC_SAMPLES", "3")],
            [("LARDER_BOUNDS", "guess")],
            [("LARDER_LOWER_QUANTILE", "0.99")],
        ] {
            let err = EngineSettings::from_lookup(lookup(&pairs)).unwrap_err();
            assert!(matches!(err, ForecastError::InvalidConfig(_)), "{pairs:?}: {err:?}");
        }
    }
}
