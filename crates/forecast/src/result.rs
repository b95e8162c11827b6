use larder_core::IngredientId;
use serde::{Deserialize, Serialize};

use crate::distribution::DistributionParams;

/// A probabilistic demand forecast for one ingredient over the horizon day.
///
/// This is an *insight*, not stored state. Risk, reorder and supplier
/// collaborators consume it as-is (usually as JSON).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForecastResult {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ingredient_id: Option<IngredientId>,

    /// Expected demand (units).
    pub mu: f64,

    /// Negative-Binomial dispersion; small values mean a heavy right tail.
    pub k: f64,

    /// `mu + mu² / k`.
    pub variance: f64,

    pub std: f64,

    pub lower_bound: u64,
    pub upper_bound: u64,

    /// Probability levels the bounds were taken at.
    pub lower_quantile: f64,
    pub upper_quantile: f64,

    /// Raw Monte Carlo draws, sorted ascending, when requested.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub samples: Option<Vec<u64>>,
}

impl ForecastResult {
    pub fn new(params: DistributionParams, bounds: (u64, u64), quantiles: (f64, f64)) -> Self {
        Self {
            ingredient_id: None,
            mu: params.mu(),
            k: params.k(),
            variance: params.variance(),
            std: params.std(),
            lower_bound: bounds.0,
            upper_bound: bounds.1,
            lower_quantile: quantiles.0,
            upper_quantile: quantiles.1,
            samples: None,
        }
    }

    pub fn with_ingredient(mut self, ingredient_id: IngredientId) -> Self {
        self.ingredient_id = Some(ingredient_id);
        self
    }

    pub fn with_samples(mut self, samples: Vec<u64>) -> Self {
        self.samples = Some(samples);
        self
    }

    /// Whether `demand` lies inside `[lower_bound, upper_bound]`.
    pub fn contains(&self, demand: u64) -> bool {
        (self.lower_bound..=self.upper_bound).contains(&demand)
    }

    /// Days the current stock lasts at the expected demand rate.
    pub fn days_of_cover(&self, current_stock: f64) -> f64 {
        current_stock.max(0.0) / self.mu
    }

    /// Order-up-to level `mu + z·std`, never negative.
    pub fn reorder_quantity(&self, z: f64) -> f64 {
        (self.mu + z * self.std).max(0.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn result() -> ForecastResult {
        let params = DistributionParams::new(20.0, 4.0).unwrap();
        ForecastResult::new(params, (6, 40), (0.05, 0.95))
    }

    #[test]
    fn moments_follow_the_parameters() {
        let r = result();
        assert_eq!(r.variance, 120.0);
        assert!((r.std - 120f64.sqrt()).abs() < 1e-12);
        assert!(r.contains(6) && r.contains(40) && !r.contains(41));
    }

    #[test]
    fn reorder_helpers() {
        let r = result();
        assert_eq!(r.days_of_cover(50.0), 2.5);
        assert_eq!(r.days_of_cover(-3.0), 0.0);
        assert!((r.reorder_quantity(1.0) - (20.0 + 120f64.sqrt())).abs() < 1e-12);
        assert_eq!(r.reorder_quantity(-10.0), 0.0);
    }

    #[test]
    fn json_omits_absent_optionals() {
        let json = serde_json::to_value(result()).unwrap();
        assert!(json.get("samples").is_none());
        assert!(json.get("ingredient_id").is_none());

        let id = IngredientId::new();
        let with = result().with_ingredient(id).with_samples(vec![1, 2]);
        let back: ForecastResult = serde_json::from_str(&serde_json::to_string(&with).unwrap()).unwrap();
        assert_eq!(back, with);
    }
}
