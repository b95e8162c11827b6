//! Seams to the application around the engine.
//!
//! The engine stays storage-agnostic: history and normalization statistics
//! are supplied by callers through these traits.

use std::collections::HashMap;
use std::sync::RwLock;

use larder_core::IngredientId;

use crate::error::{EngineResult, ForecastError};
use crate::features::{DailyRecord, UsageNormalization};

/// Source of per-ingredient daily history.
pub trait HistoryProvider: Send + Sync {
    /// The most recent `window_days` records, oldest first.
    ///
    /// Fewer records may be returned when less history exists; failures to
    /// reach the backing store map to `HistoryUnavailable`.
    fn get_history(&self, ingredient_id: IngredientId, window_days: usize) -> EngineResult<Vec<DailyRecord>>;
}

/// Source of the usage statistics a model was trained with.
pub trait NormalizationProvider: Send + Sync {
    fn usage_normalization(&self, ingredient_id: IngredientId) -> EngineResult<UsageNormalization>;
}

/// The same statistics for every ingredient.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FixedNormalization(pub UsageNormalization);

impl NormalizationProvider for FixedNormalization {
    fn usage_normalization(&self, _ingredient_id: IngredientId) -> EngineResult<UsageNormalization> {
        Ok(self.0)
    }
}

/// In-memory history store for tests and the command-line runner.
#[derive(Debug, Default)]
pub struct InMemoryHistory {
    inner: RwLock<HashMap<IngredientId, Vec<DailyRecord>>>,
}

impl InMemoryHistory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the stored history of one ingredient. Records are kept sorted by date.
    pub fn insert(&self, ingredient_id: IngredientId, mut records: Vec<DailyRecord>) -> EngineResult<()> {
        records.sort_by_key(|r| r.date);
        self.inner
            .write()
            .map_err(|_| ForecastError::invariant("history store lock poisoned"))?
            .insert(ingredient_id, records);
        Ok(())
    }
}

impl HistoryProvider for InMemoryHistory {
    fn get_history(&self, ingredient_id: IngredientId, window_days: usize) -> EngineResult<Vec<DailyRecord>> {
        let guard = self
            .inner
            .read()
            .map_err(|_| ForecastError::HistoryUnavailable("history store lock poisoned".to_string()))?;
        let records = guard
            .get(&ingredient_id)
            .ok_or_else(|| ForecastError::HistoryUnavailable(format!("no history for ingredient {ingredient_id}")))?;
        Ok(records[records.len().saturating_sub(window_days)..].to_vec())
    }
}
