use std::sync::{Arc, RwLock};

use crate::error::{EngineResult, ForecastError};
use crate::model::SequenceModel;

/// An immutable, published model. Forecasts hold an `Arc` to one of these
/// for the duration of a request.
#[derive(Debug)]
pub struct ServingModel {
    pub model: SequenceModel,
    /// Monotonic publication counter, starting at 1.
    pub version: u64,
    /// Optimizer steps the parameters had seen when published.
    pub trained_steps: u64,
}

/// Holder of the current serving snapshot.
///
/// Readers clone the `Arc` and drop the lock immediately; publication swaps
/// the whole snapshot in a single write, so no reader sees a partial update.
#[derive(Debug, Default)]
pub struct ModelRegistry {
    current: RwLock<Option<Arc<ServingModel>>>,
}

impl ModelRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// The current snapshot, or `ModelNotTrained` when nothing was published yet.
    pub fn current(&self) -> EngineResult<Arc<ServingModel>> {
        let guard = self
            .current
            .read()
            .map_err(|_| ForecastError::invariant("model registry lock poisoned"))?;
        guard.as_ref().map(Arc::clone).ok_or(ForecastError::ModelNotTrained)
    }

    pub fn is_serving(&self) -> bool {
        self.current.read().map(|g| g.is_some()).unwrap_or(false)
    }

    /// Publish a copy of `model`; returns the new version.
    pub fn publish(&self, model: SequenceModel, trained_steps: u64) -> EngineResult<u64> {
        let mut guard = self
            .current
            .write()
            .map_err(|_| ForecastError::invariant("model registry lock poisoned"))?;
        let version = guard.as_ref().map_or(1, |m| m.version + 1);
        *guard = Some(Arc::new(ServingModel {
            model,
            version,
            trained_steps,
        }));
        Ok(version)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ModelConfig;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    fn model() -> SequenceModel {
        SequenceModel::new(ModelConfig::default(), &mut StdRng::seed_from_u64(1)).unwrap()
    }

    #[test]
    fn empty_registry_is_not_trained() {
        let registry = ModelRegistry::new();
        assert!(!registry.is_serving());
        assert!(matches!(registry.current(), Err(ForecastError::ModelNotTrained)));
    }

    #[test]
    fn readers_keep_their_snapshot_across_publication() {
        let registry = ModelRegistry::new();
        assert_eq!(registry.publish(model(), 10).unwrap(), 1);
        let held = registry.current().unwrap();
        assert_eq!(registry.publish(model(), 20).unwrap(), 2);

        assert_eq!(held.version, 1);
        assert_eq!(held.trained_steps, 10);
        assert_eq!(registry.current().unwrap().version, 2);
    }

    #[test]
    fn registry_is_shareable_across_threads() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<ModelRegistry>();
    }
}
