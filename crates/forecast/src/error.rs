use chrono::NaiveDate;
use thiserror::Error;

/// Result type used across the forecasting engine.
pub type EngineResult<T> = Result<T, ForecastError>;

/// Everything that can go wrong between raw history and a forecast.
///
/// Recoverable variants describe a bad request (the caller may fall back to a
/// placeholder forecast). The others indicate a programming error or corrupted
/// numbers and must never reach the serving snapshot.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ForecastError {
    #[error("insufficient history: need {required} contiguous days, got {available}")]
    InsufficientHistory { required: usize, available: usize },

    #[error("insufficient history: day {date} is missing from the window")]
    MissingDay { date: NaiveDate },

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("shape mismatch in {context}: expected {expected}, got {actual}")]
    ShapeMismatch {
        context: &'static str,
        expected: usize,
        actual: usize,
    },

    #[error("invariant violated: {0}")]
    InvariantViolation(String),

    #[error("training step aborted: {0}")]
    FatalTrainingError(String),

    #[error("no trained model has been published")]
    ModelNotTrained,

    #[error("history unavailable: {0}")]
    HistoryUnavailable(String),
}

impl ForecastError {
    pub fn invalid_input(msg: impl Into<String>) -> Self {
        Self::InvalidInput(msg.into())
    }

    pub fn invalid_config(msg: impl Into<String>) -> Self {
        Self::InvalidConfig(msg.into())
    }

    pub fn invariant(msg: impl Into<String>) -> Self {
        Self::InvariantViolation(msg.into())
    }

    pub fn fatal_training(msg: impl Into<String>) -> Self {
        Self::FatalTrainingError(msg.into())
    }

    pub fn shape(context: &'static str, expected: usize, actual: usize) -> Self {
        Self::ShapeMismatch {
            context,
            expected,
            actual,
        }
    }

    /// Too little contiguous history, including a window with a missing day.
    pub fn is_insufficient_history(&self) -> bool {
        matches!(
            self,
            ForecastError::InsufficientHistory { .. } | ForecastError::MissingDay { .. }
        )
    }

    /// Whether a caller can reasonably retry or fall back to a default forecast.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            ForecastError::InsufficientHistory { .. }
                | ForecastError::MissingDay { .. }
                | ForecastError::InvalidInput(_)
                | ForecastError::ModelNotTrained
                | ForecastError::HistoryUnavailable(_)
        )
    }
}

/// Fail with `FatalTrainingError` unless every value is finite.
pub(crate) fn ensure_finite(values: &[f64], what: &str) -> EngineResult<()> {
    match values.iter().position(|v| !v.is_finite()) {
        None => Ok(()),
        Some(i) => Err(ForecastError::fatal_training(format!(
            "non-finite value {} in {what} at index {i}",
            values[i]
        ))),
    }
}
