use std::sync::Arc;
use std::thread;

use chrono::NaiveDate;
use larder_core::IngredientId;
use larder_forecast::{
    AdamConfig, BoundsMethod, DailyRecord, FeatureConfig, FeatureEncoder, FixedNormalization, ForecastConfig,
    ForecastError, ForecastResult, Forecaster, InMemoryHistory, MaxEpochs, ModelConfig, ModelRegistry, Trainer,
    TrainingState, UsageNormalization,
};
use rand::SeedableRng;
use rand::rngs::StdRng;

/// Weekly usage pattern, Monday first.
const CYCLE: [f64; 7] = [5.0, 25.0, 8.0, 30.0, 45.0, 40.0, 3.0];
const DAYS: usize = 140;

fn cycle_history() -> Vec<DailyRecord> {
    // 2024-01-01 is a Monday.
    let start = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();
    (0..DAYS)
        .map(|i| DailyRecord::usage_only(start + chrono::Duration::days(i as i64), CYCLE[i % 7]))
        .collect()
}

struct Engine {
    forecaster: Forecaster,
    registry: Arc<ModelRegistry>,
    history: Arc<InMemoryHistory>,
    trainer: Trainer,
    encoder: FeatureEncoder,
    normalization: UsageNormalization,
}

fn engine(bounds: BoundsMethod) -> Engine {
    let records = cycle_history();
    let encoder = FeatureEncoder::new(FeatureConfig::default()).unwrap();
    let normalization = encoder.fit_normalization(&records).unwrap();
    let registry = Arc::new(ModelRegistry::new());
    let history = Arc::new(InMemoryHistory::new());
    let forecaster = Forecaster::new(
        encoder,
        registry.clone(),
        ForecastConfig::default().with_bounds(bounds),
        history.clone(),
        Arc::new(FixedNormalization(normalization)),
    )
    .unwrap();
    let trainer = Trainer::new(
        ModelConfig::default(),
        AdamConfig::default().with_learning_rate(1e-4),
        &mut StdRng::seed_from_u64(2024),
    )
    .unwrap();
    Engine {
        forecaster,
        registry,
        history,
        trainer,
        encoder,
        normalization,
    }
}

fn train_and_publish(e: &mut Engine) {
    let examples = e.encoder.training_examples(&cycle_history(), &e.normalization).unwrap();
    assert_eq!(examples.len(), DAYS - 28 - 7 + 1);

    // The dispersion bound in the forecast tests rests on the warm start.
    // Long cold training memorises the weekday cycle and drives k far above 10.
    let start = e.trainer.warm_start(&examples).unwrap();
    assert!(start.k() > 1.2 && start.k() < 1.9, "warm start k = {}", start.k());
    let report = e
        .trainer
        .fit(&examples, 16, &mut MaxEpochs(2), &mut StdRng::seed_from_u64(7))
        .unwrap();
    assert_eq!(report.epochs, 2);
    assert!(report.epoch_losses.iter().all(|l| l.is_finite()));

    e.trainer.publish(&e.registry).unwrap();
    assert_eq!(e.trainer.state(), TrainingState::Serving);
}

fn coverage(result: &ForecastResult, records: &[DailyRecord]) -> f64 {
    let covered = records.iter().filter(|r| result.contains(r.usage as u64)).count();
    covered as f64 / records.len() as f64
}

#[test]
fn weekly_cycle_forecast_matches_the_marginal_demand() {
    let mut e = engine(BoundsMethod::Exact);
    let id = IngredientId::new();
    e.history.insert(id, cycle_history()).unwrap();
    train_and_publish(&mut e);

    let result = e.forecaster.forecast(id, &mut StdRng::seed_from_u64(11)).unwrap();
    // Mean of the cycle is 156 / 7 ≈ 22.3.
    assert!(result.mu > 18.0 && result.mu < 27.0, "mu = {}", result.mu);
    assert!(result.k < 10.0, "k = {}", result.k);
    assert!(result.variance > result.mu);
    let covered = coverage(&result, &cycle_history());
    assert!(covered >= 0.9, "coverage {covered} for [{}, {}]", result.lower_bound, result.upper_bound);
}

#[test]
fn monte_carlo_bounds_cover_the_history() {
    let mut e = engine(BoundsMethod::MonteCarlo { samples: 5000 });
    let id = IngredientId::new();
    e.history.insert(id, cycle_history()).unwrap();
    train_and_publish(&mut e);

    let result = e.forecaster.forecast(id, &mut StdRng::seed_from_u64(12)).unwrap();
    assert!(result.lower_bound <= result.upper_bound);
    assert!(coverage(&result, &cycle_history()) >= 0.9);
}

#[test]
fn requests_before_publication_are_not_trained() {
    let e = engine(BoundsMethod::Exact);
    let id = IngredientId::new();
    e.history.insert(id, cycle_history()).unwrap();
    let err = e.forecaster.forecast(id, &mut StdRng::seed_from_u64(1)).unwrap_err();
    assert_eq!(err, ForecastError::ModelNotTrained);
    assert!(err.is_recoverable());
}

#[test]
fn bad_history_is_reported_as_recoverable() {
    let mut e = engine(BoundsMethod::Exact);
    train_and_publish(&mut e);

    let short = IngredientId::new();
    e.history.insert(short, cycle_history()[..20].to_vec()).unwrap();
    let err = e.forecaster.forecast(short, &mut StdRng::seed_from_u64(2)).unwrap_err();
    assert_eq!(err, ForecastError::InsufficientHistory { required: 28, available: 20 });

    let gappy = IngredientId::new();
    let mut records = cycle_history();
    let missing = records.remove(DAYS - 5).date;
    e.history.insert(gappy, records).unwrap();
    let err = e.forecaster.forecast(gappy, &mut StdRng::seed_from_u64(3)).unwrap_err();
    assert_eq!(err, ForecastError::MissingDay { date: missing });
    assert!(err.is_recoverable());

    let unknown = e.forecaster.forecast(IngredientId::new(), &mut StdRng::seed_from_u64(4)).unwrap_err();
    assert!(matches!(unknown, ForecastError::HistoryUnavailable(_)));
}

#[test]
fn concurrent_readers_see_a_complete_snapshot() {
    let mut e = engine(BoundsMethod::Exact);
    let id = IngredientId::new();
    e.history.insert(id, cycle_history()).unwrap();
    train_and_publish(&mut e);

    let expected = e.forecaster.forecast(id, &mut StdRng::seed_from_u64(5)).unwrap();
    let forecaster = Arc::new(e.forecaster);
    let handles: Vec<_> = (0..4)
        .map(|seed| {
            let forecaster = Arc::clone(&forecaster);
            thread::spawn(move || forecaster.forecast(id, &mut StdRng::seed_from_u64(seed)).unwrap())
        })
        .collect();
    for handle in handles {
        assert_eq!(handle.join().unwrap(), expected);
    }
}
