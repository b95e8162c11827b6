//! Training loop: forward → loss → backward → Adam, then atomic publication.

use rand::Rng;
use rand::seq::SliceRandom;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::config::ModelConfig;
use crate::distribution::DistributionParams;
use crate::error::{EngineResult, ForecastError};
use crate::features::TrainingExample;
use crate::loss::{self, grad_k};
use crate::model::SequenceModel;
use crate::optimizer::{Adam, AdamConfig};
use crate::registry::ModelRegistry;

/// Dispersion search range for the warm start.
const K_MIN: f64 = 1e-3;
const K_MAX: f64 = 1e3;
const K_BISECTIONS: usize = 100;
/// Smallest mean used to warm-start `mu` (all-zero targets).
const MU_FLOOR: f64 = 1e-2;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrainingState {
    /// Freshly initialized parameters, never trained.
    Uninitialized,
    /// Trained (or warm-started) since the last publication.
    Trained,
    /// The current parameters are the published snapshot.
    Serving,
}

/// Decides after each epoch whether `Trainer::fit` should stop.
pub trait StoppingCriterion {
    /// `epoch` counts completed epochs, starting at 1.
    fn should_stop(&mut self, epoch: usize, loss: f64) -> bool;
}

/// Stop after a fixed number of epochs (at least one always runs).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MaxEpochs(pub usize);

impl StoppingCriterion for MaxEpochs {
    fn should_stop(&mut self, epoch: usize, _loss: f64) -> bool {
        epoch >= self.0
    }
}

/// Stop once the epoch loss failed to improve by `min_delta` for `patience`
/// consecutive epochs, or after `max_epochs`.
#[derive(Debug, Clone, PartialEq)]
pub struct LossPlateau {
    patience: usize,
    min_delta: f64,
    max_epochs: usize,
    best: f64,
    stale: usize,
}

impl LossPlateau {
    pub fn new(patience: usize, min_delta: f64, max_epochs: usize) -> Self {
        Self {
            patience,
            min_delta,
            max_epochs,
            best: f64::INFINITY,
            stale: 0,
        }
    }

    pub fn best_loss(&self) -> f64 {
        self.best
    }
}

impl StoppingCriterion for LossPlateau {
    fn should_stop(&mut self, epoch: usize, loss: f64) -> bool {
        if loss < self.best - self.min_delta {
            self.best = loss;
            self.stale = 0;
        } else {
            self.best = self.best.min(loss);
            self.stale += 1;
        }
        self.stale >= self.patience || epoch >= self.max_epochs
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainingReport {
    pub epochs: usize,
    /// Optimizer steps taken during this `fit` call.
    pub steps: u64,
    /// Mean batch loss of each epoch.
    pub epoch_losses: Vec<f64>,
}

impl TrainingReport {
    pub fn final_loss(&self) -> Option<f64> {
        self.epoch_losses.last().copied()
    }
}

/// Owns the private, mutable copy of the model and its optimizer state.
///
/// Serving never sees these parameters directly: `publish` hands a clone to
/// the registry.
#[derive(Debug, Clone)]
pub struct Trainer {
    model: SequenceModel,
    optimizer: Adam,
    state: TrainingState,
}

impl Trainer {
    pub fn new<R: Rng + ?Sized>(model_config: ModelConfig, adam_config: AdamConfig, rng: &mut R) -> EngineResult<Self> {
        Ok(Self {
            model: SequenceModel::new(model_config, rng)?,
            optimizer: Adam::new(adam_config)?,
            state: TrainingState::Uninitialized,
        })
    }

    pub fn model(&self) -> &SequenceModel {
        &self.model
    }

    pub fn state(&self) -> TrainingState {
        self.state
    }

    pub fn steps(&self) -> u64 {
        self.optimizer.steps()
    }

    pub fn optimizer(&self) -> &Adam {
        &self.optimizer
    }

    pub fn set_learning_rate(&mut self, learning_rate: f64) -> EngineResult<()> {
        self.optimizer.set_learning_rate(learning_rate)
    }

    /// One optimizer step on `batch`; returns the batch loss before the update.
    ///
    /// On any error the parameters and optimizer state are left untouched.
    pub fn train_step(&mut self, batch: &[TrainingExample]) -> EngineResult<f64> {
        let refs: Vec<&TrainingExample> = batch.iter().collect();
        self.step_refs(&refs)
    }

    fn step_refs(&mut self, batch: &[&TrainingExample]) -> EngineResult<f64> {
        match self.try_step(batch) {
            Ok(loss) => {
                self.state = TrainingState::Trained;
                debug!(step = self.optimizer.steps(), loss, batch = batch.len(), "training step");
                Ok(loss)
            }
            Err(err) => {
                warn!(step = self.optimizer.steps() + 1, error = %err, "training step aborted");
                Err(err)
            }
        }
    }

    fn try_step(&mut self, batch: &[&TrainingExample]) -> EngineResult<f64> {
        if batch.is_empty() {
            return Err(ForecastError::invalid_input("training batch is empty"));
        }

        let mut params = Vec::with_capacity(batch.len());
        let mut caches = Vec::with_capacity(batch.len());
        let mut targets = Vec::with_capacity(batch.len());
        for example in batch {
            let (p, cache) = self.model.training_forward(example.sequence.as_series())?;
            params.push(p);
            caches.push(cache);
            targets.push(example.target);
        }

        let batch_loss = loss::nll_with_gradients(&params, &targets)?;

        let mut grads = self.model.params().zeros_like();
        for (i, cache) in caches.iter().enumerate() {
            let g = self.model.backward(cache, batch_loss.d_mu[i], batch_loss.d_k[i])?;
            grads.accumulate(&g)?;
        }
        if !grads.is_finite() {
            return Err(ForecastError::fatal_training("non-finite parameter gradient"));
        }

        let mut next_params = self.model.params().clone();
        let mut next_optimizer = self.optimizer.clone();
        next_optimizer.step(&mut next_params, &grads)?;
        if !next_params.is_finite() {
            return Err(ForecastError::fatal_training("update produced non-finite parameters"));
        }

        *self.model.params_mut() = next_params;
        self.optimizer = next_optimizer;
        Ok(batch_loss.loss)
    }

    /// Start both heads at the marginal Negative-Binomial of the targets.
    ///
    /// `mu` is the target mean; `k` maximizes the likelihood at that mean,
    /// found by bisection on the mean `∂NLL/∂k` over `[K_MIN, K_MAX]`.
    pub fn warm_start(&mut self, examples: &[TrainingExample]) -> EngineResult<DistributionParams> {
        if examples.is_empty() {
            return Err(ForecastError::invalid_input("cannot warm start from zero examples"));
        }
        let targets: Vec<u64> = examples.iter().map(|e| e.target).collect();
        let mean = targets.iter().map(|&y| y as f64).sum::<f64>() / targets.len() as f64;
        let mu = mean.max(MU_FLOOR);
        let k = fit_dispersion(&targets, mu);

        self.model.params_mut().head.warm_start(mu, k)?;
        self.state = TrainingState::Trained;
        info!(mu, k, examples = examples.len(), "warm start");
        DistributionParams::new(mu, k)
    }

    /// Shuffled mini-batch epochs until `criterion` says stop.
    pub fn fit<R: Rng + ?Sized>(
        &mut self,
        examples: &[TrainingExample],
        batch_size: usize,
        criterion: &mut dyn StoppingCriterion,
        rng: &mut R,
    ) -> EngineResult<TrainingReport> {
        if examples.is_empty() {
            return Err(ForecastError::invalid_input("cannot fit on zero examples"));
        }
        if batch_size == 0 {
            return Err(ForecastError::invalid_config("batch_size must be > 0"));
        }

        let start_steps = self.optimizer.steps();
        let mut order: Vec<usize> = (0..examples.len()).collect();
        let mut epoch_losses = Vec::new();
        loop {
            order.shuffle(rng);
            let mut total = 0.0;
            let mut batches = 0usize;
            for chunk in order.chunks(batch_size) {
                let batch: Vec<&TrainingExample> = chunk.iter().map(|&i| &examples[i]).collect();
                total += self.step_refs(&batch)?;
                batches += 1;
            }
            let epoch_loss = total / batches as f64;
            epoch_losses.push(epoch_loss);
            let epoch = epoch_losses.len();
            debug!(epoch, loss = epoch_loss, "epoch complete");
            if criterion.should_stop(epoch, epoch_loss) {
                break;
            }
        }

        let report = TrainingReport {
            epochs: epoch_losses.len(),
            steps: self.optimizer.steps() - start_steps,
            epoch_losses,
        };
        info!(epochs = report.epochs, steps = report.steps, loss = ?report.final_loss(), "training finished");
        Ok(report)
    }

    /// Publish a snapshot of the current parameters; returns its version.
    pub fn publish(&mut self, registry: &ModelRegistry) -> EngineResult<u64> {
        if self.state == TrainingState::Uninitialized {
            return Err(ForecastError::ModelNotTrained);
        }
        let steps = self.optimizer.steps();
        let version = registry.publish(self.model.clone(), steps)?;
        self.state = TrainingState::Serving;
        info!(version, steps, "model published");
        Ok(version)
    }
}

/// Maximum-likelihood dispersion for `targets` at a fixed mean.
///
/// The mean score is negative below the optimum and positive above it.
/// Under- or equi-dispersed data has no interior optimum and lands on `K_MAX`.
fn fit_dispersion(targets: &[u64], mu: f64) -> f64 {
    let score = |k: f64| targets.iter().map(|&y| grad_k(y, mu, k)).sum::<f64>() / targets.len() as f64;
    if score(K_MAX) <= 0.0 {
        return K_MAX;
    }
    if score(K_MIN) >= 0.0 {
        return K_MIN;
    }
    let (mut lo, mut hi) = (K_MIN.ln(), K_MAX.ln());
    for _ in 0..K_BISECTIONS {
        let mid = 0.5 * (lo + hi);
        if score(mid.exp()) < 0.0 {
            lo = mid;
        } else {
            hi = mid;
        }
    }
    (0.5 * (lo + hi)).exp()
}
