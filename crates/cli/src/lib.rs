//! `larder-cli`
//!
//! Train on one ingredient's daily history and forecast its next horizon day.
//! Input is a JSON array of `DailyRecord`s; output is a `ForecastResult` as JSON.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context};
use larder_core::IngredientId;
use larder_forecast::{
    DailyRecord, EngineSettings, FeatureEncoder, FixedNormalization, ForecastResult, Forecaster, InMemoryHistory,
    LossPlateau, ModelRegistry, Trainer,
};
use rand::SeedableRng;
use rand::rngs::StdRng;

const BATCH_SIZE: usize = 16;
const PLATEAU_PATIENCE: usize = 3;
const PLATEAU_MIN_DELTA: f64 = 1e-4;
const MAX_EPOCHS: usize = 20;

/// Parsed command line: `larder <history.json> [--ingredient <uuid>]`.
#[derive(Debug, Clone, PartialEq)]
pub struct Args {
    pub history_path: PathBuf,
    pub ingredient_id: IngredientId,
}

impl Args {
    pub fn parse<I: IntoIterator<Item = String>>(args: I) -> anyhow::Result<Self> {
        let mut history_path = None;
        let mut ingredient_id = None;
        let mut iter = args.into_iter();
        while let Some(arg) = iter.next() {
            match arg.as_str() {
                "--ingredient" => {
                    let raw = iter.next().context("--ingredient needs a value")?;
                    ingredient_id = Some(raw.parse::<IngredientId>()?);
                }
                flag if flag.starts_with("--") => bail!("unknown flag {flag}"),
                path if history_path.is_none() => history_path = Some(PathBuf::from(path)),
                extra => bail!("unexpected argument {extra}"),
            }
        }
        Ok(Self {
            history_path: history_path.context("usage: larder <history.json> [--ingredient <uuid>]")?,
            ingredient_id: ingredient_id.unwrap_or_default(),
        })
    }
}

pub fn read_history(path: &Path) -> anyhow::Result<Vec<DailyRecord>> {
    let raw = std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    serde_json::from_str(&raw).with_context(|| format!("parsing {}", path.display()))
}

/// Warm-start, train until the loss plateaus, publish, then forecast the
/// window at the end of `records`.
pub fn forecast_history(
    records: Vec<DailyRecord>,
    ingredient_id: IngredientId,
    settings: &EngineSettings,
) -> anyhow::Result<ForecastResult> {
    let encoder = FeatureEncoder::new(settings.features)?;
    let normalization = encoder.fit_normalization(&records)?;
    let examples = encoder.training_examples(&records, &normalization)?;

    let mut rng = StdRng::seed_from_u64(settings.seed);
    let registry = Arc::new(ModelRegistry::new());
    let mut trainer = Trainer::new(settings.model.clone(), settings.adam, &mut rng)?;
    trainer.warm_start(&examples)?;
    let mut criterion = LossPlateau::new(PLATEAU_PATIENCE, PLATEAU_MIN_DELTA, MAX_EPOCHS);
    let report = trainer.fit(&examples, BATCH_SIZE, &mut criterion, &mut rng)?;
    tracing::info!(
        ingredient_id = %ingredient_id,
        examples = examples.len(),
        epochs = report.epochs,
        "model trained"
    );
    trainer.publish(&registry)?;

    let history = Arc::new(InMemoryHistory::new());
    history.insert(ingredient_id, records)?;
    let forecaster = Forecaster::new(
        encoder,
        registry,
        settings.forecast,
        history,
        Arc::new(FixedNormalization(normalization)),
    )?;
    Ok(forecaster.forecast(ingredient_id, &mut rng)?)
}
