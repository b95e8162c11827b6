//! Feature encoding: raw daily records → fixed-width vectors → `Sequence`.
//!
//! Layout of one `FeatureVector` (14 values):
//!
//! | index | feature |
//! |---|---|
//! | 0 | normalized usage |
//! | 1..=7 | day of week, one-hot, Monday first |
//! | 8, 9 | ISO week of year as `sin`, `cos` of `2π·week/52` |
//! | 10 | event flag |
//! | 11 | weather severity in [0, 1] |
//! | 12 | traffic index in [0, 1] |
//! | 13 | hazard flag |

use chrono::{Datelike, NaiveDate};
use serde::{Deserialize, Serialize};

use crate::config::{FeatureConfig, NormalizationScheme};
use crate::error::{EngineResult, ForecastError};
use crate::series::Series;

pub const FEATURE_WIDTH: usize = 14;

const USAGE: usize = 0;
const DAY_OF_WEEK: usize = 1;
const WEEK_SIN: usize = 8;
const WEEK_COS: usize = 9;
const EVENT: usize = 10;
const WEATHER: usize = 11;
const TRAFFIC: usize = 12;
const HAZARD: usize = 13;

const WEEKS_PER_YEAR: f64 = 52.0;

/// One day of raw history for one ingredient, as supplied by the history provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DailyRecord {
    pub date: NaiveDate,
    /// Units consumed that day (≥ 0).
    pub usage: f64,
    /// 0 = clear, 1 = severe.
    pub weather_severity: f64,
    pub event: bool,
    /// 0 = empty streets, 1 = peak traffic.
    pub traffic_index: f64,
    pub hazard: bool,
}

impl DailyRecord {
    /// A record with no exogenous signal set.
    pub fn usage_only(date: NaiveDate, usage: f64) -> Self {
        Self {
            date,
            usage,
            weather_severity: 0.0,
            event: false,
            traffic_index: 0.0,
            hazard: false,
        }
    }

    fn validate(&self) -> EngineResult<()> {
        if !(self.usage.is_finite() && self.usage >= 0.0) {
            return Err(ForecastError::invalid_input(format!(
                "usage on {} must be finite and >= 0, got {}",
                self.date, self.usage
            )));
        }
        for (name, value) in [("weather_severity", self.weather_severity), ("traffic_index", self.traffic_index)] {
            if !(0.0..=1.0).contains(&value) {
                return Err(ForecastError::invalid_input(format!(
                    "{name} on {} must lie in [0, 1], got {value}",
                    self.date
                )));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FeatureVector([f64; FEATURE_WIDTH]);

impl FeatureVector {
    pub fn as_slice(&self) -> &[f64] {
        &self.0
    }

    pub fn usage(&self) -> f64 {
        self.0[USAGE]
    }

    pub fn day_of_week(&self) -> &[f64] {
        &self.0[DAY_OF_WEEK..DAY_OF_WEEK + 7]
    }

    pub fn week_of_year(&self) -> (f64, f64) {
        (self.0[WEEK_SIN], self.0[WEEK_COS])
    }
}

/// Exactly `window_days` feature vectors for contiguous calendar days.
#[derive(Debug, Clone, PartialEq)]
pub struct Sequence {
    series: Series,
    end_date: NaiveDate,
}

impl Sequence {
    pub fn new(vectors: &[FeatureVector], end_date: NaiveDate, window_days: usize) -> EngineResult<Self> {
        if vectors.len() != window_days {
            return Err(ForecastError::InsufficientHistory {
                required: window_days,
                available: vectors.len(),
            });
        }
        let rows: Vec<&[f64]> = vectors.iter().map(FeatureVector::as_slice).collect();
        Ok(Self {
            series: Series::from_rows(&rows)?,
            end_date,
        })
    }

    pub fn len(&self) -> usize {
        self.series.steps()
    }

    pub fn is_empty(&self) -> bool {
        self.series.steps() == 0
    }

    /// Date of the last day in the window.
    pub fn end_date(&self) -> NaiveDate {
        self.end_date
    }

    pub fn as_series(&self) -> &Series {
        &self.series
    }
}

/// `(sequence, y_true)`: the demand `horizon_days` after the window's last day.
#[derive(Debug, Clone, PartialEq)]
pub struct TrainingExample {
    pub sequence: Sequence,
    pub target: u64,
}

/// Affine usage scaling, `(x − offset) / scale`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct UsageNormalization {
    offset: f64,
    scale: f64,
}

impl UsageNormalization {
    pub fn new(offset: f64, scale: f64) -> EngineResult<Self> {
        if !offset.is_finite() {
            return Err(ForecastError::invalid_input(format!("normalization offset must be finite, got {offset}")));
        }
        if !(scale.is_finite() && scale > 0.0) {
            return Err(ForecastError::invalid_input(format!(
                "normalization scale must be finite and > 0, got {scale}"
            )));
        }
        Ok(Self { offset, scale })
    }

    pub fn identity() -> Self {
        Self { offset: 0.0, scale: 1.0 }
    }

    pub fn z_score(mean: f64, std: f64) -> EngineResult<Self> {
        Self::new(mean, std)
    }

    pub fn min_max(min: f64, max: f64) -> EngineResult<Self> {
        Self::new(min, max - min)
    }

    /// Fit the statistics of `scheme` to a usage history.
    ///
    /// A constant history keeps its offset and falls back to scale 1.
    pub fn fit(scheme: NormalizationScheme, usage: &[f64]) -> EngineResult<Self> {
        if usage.is_empty() {
            return Err(ForecastError::invalid_input("cannot fit normalization to an empty history"));
        }
        let (offset, spread) = match scheme {
            NormalizationScheme::ZScore => {
                let m = mean(usage);
                (m, stddev_sample(usage, m))
            }
            NormalizationScheme::MinMax => {
                let min = usage.iter().copied().fold(f64::INFINITY, f64::min);
                let max = usage.iter().copied().fold(f64::NEG_INFINITY, f64::max);
                (min, max - min)
            }
        };
        let scale = if spread > f64::EPSILON { spread } else { 1.0 };
        Self::new(offset, scale)
    }

    pub fn offset(&self) -> f64 {
        self.offset
    }

    pub fn scale(&self) -> f64 {
        self.scale
    }

    pub fn apply(&self, usage: f64) -> f64 {
        (usage - self.offset) / self.scale
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FeatureEncoder {
    config: FeatureConfig,
}

impl FeatureEncoder {
    pub fn new(config: FeatureConfig) -> EngineResult<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &FeatureConfig {
        &self.config
    }

    pub fn window_days(&self) -> usize {
        self.config.window_days
    }

    pub fn horizon_days(&self) -> usize {
        self.config.horizon_days
    }

    /// Encode exactly one window of contiguous records.
    pub fn encode(&self, records: &[DailyRecord], normalization: &UsageNormalization) -> EngineResult<Sequence> {
        if records.len() != self.config.window_days {
            return Err(ForecastError::InsufficientHistory {
                required: self.config.window_days,
                available: records.len(),
            });
        }
        check_contiguous(records)?;
        let vectors = records
            .iter()
            .map(|r| self.encode_record(r, normalization))
            .collect::<EngineResult<Vec<_>>>()?;
        // `records` is non-empty here: window_days >= 1 is validated.
        let end_date = records[records.len() - 1].date;
        Sequence::new(&vectors, end_date, self.config.window_days)
    }

    pub fn encode_record(&self, record: &DailyRecord, normalization: &UsageNormalization) -> EngineResult<FeatureVector> {
        record.validate()?;
        let mut v = [0.0; FEATURE_WIDTH];
        v[USAGE] = normalization.apply(record.usage);
        v[DAY_OF_WEEK + record.date.weekday().num_days_from_monday() as usize] = 1.0;
        let angle = 2.0 * std::f64::consts::PI * f64::from(record.date.iso_week().week()) / WEEKS_PER_YEAR;
        v[WEEK_SIN] = angle.sin();
        v[WEEK_COS] = angle.cos();
        v[EVENT] = flag(record.event);
        v[WEATHER] = record.weather_severity;
        v[TRAFFIC] = record.traffic_index;
        v[HAZARD] = flag(record.hazard);
        Ok(FeatureVector(v))
    }

    /// The last `window_days` records of a longer history.
    pub fn trailing_window<'a>(&self, records: &'a [DailyRecord]) -> &'a [DailyRecord] {
        &records[records.len().saturating_sub(self.config.window_days)..]
    }

    /// Usage statistics of `records` under the configured scheme.
    pub fn fit_normalization(&self, records: &[DailyRecord]) -> EngineResult<UsageNormalization> {
        let usage: Vec<f64> = records.iter().map(|r| r.usage).collect();
        UsageNormalization::fit(self.config.normalization, &usage)
    }

    /// Slide the window over a contiguous history.
    ///
    /// Example `i` covers `records[i..i + window]` and targets the usage of
    /// `records[i + window − 1 + horizon]`, rounded to whole units.
    pub fn training_examples(
        &self,
        records: &[DailyRecord],
        normalization: &UsageNormalization,
    ) -> EngineResult<Vec<TrainingExample>> {
        let window = self.config.window_days;
        let horizon = self.config.horizon_days;
        if records.len() < window + horizon {
            return Err(ForecastError::InsufficientHistory {
                required: window + horizon,
                available: records.len(),
            });
        }
        check_contiguous(records)?;

        let count = records.len() - window - horizon + 1;
        let mut examples = Vec::with_capacity(count);
        for start in 0..count {
            let sequence = self.encode(&records[start..start + window], normalization)?;
            let target_record = &records[start + window - 1 + horizon];
            target_record.validate()?;
            examples.push(TrainingExample {
                sequence,
                target: target_record.usage.round() as u64,
            });
        }
        Ok(examples)
    }
}

fn flag(value: bool) -> f64 {
    if value { 1.0 } else { 0.0 }
}

/// Every record must be exactly one day after the previous one.
///
/// A gap names the first missing day; a repeated or backwards date reports
/// how many leading records were contiguous.
fn check_contiguous(records: &[DailyRecord]) -> EngineResult<()> {
    for (i, pair) in records.windows(2).enumerate() {
        let expected = pair[0]
            .date
            .succ_opt()
            .ok_or_else(|| ForecastError::invalid_input(format!("no day after {}", pair[0].date)))?;
        if pair[1].date == expected {
            continue;
        }
        if pair[1].date > expected {
            return Err(ForecastError::MissingDay { date: expected });
        }
        return Err(ForecastError::InsufficientHistory {
            required: records.len(),
            available: i + 1,
        });
    }
    Ok(())
}

fn mean(xs: &[f64]) -> f64 {
    if xs.is_empty() {
        return 0.0;
    }
    xs.iter().sum::<f64>() / (xs.len() as f64)
}

/// Sample standard deviation (n-1), deterministic.
fn stddev_sample(xs: &[f64], mean: f64) -> f64 {
    if xs.len() < 2 {
        return 0.0;
    }
    let var = xs
        .iter()
        .map(|x| {
            let d = x - mean;
            d * d
        })
        .sum::<f64>()
        / ((xs.len() - 1) as f64);
    var.sqrt()
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn day(offset: i64) -> NaiveDate {
        // 2024-01-01 is a Monday.
        NaiveDate::from_ymd_opt(2024, 1, 1).unwrap() + chrono::Duration::days(offset)
    }

    fn history(len: usize) -> Vec<DailyRecord> {
        (0..len).map(|i| DailyRecord::usage_only(day(i as i64), (i % 7) as f64 * 3.0)).collect()
    }

    fn encoder() -> FeatureEncoder {
        FeatureEncoder::new(FeatureConfig::default()).unwrap()
    }

    #[test]
    fn encodes_a_full_window() {
        let seq = encoder().encode(&history(28), &UsageNormalization::identity()).unwrap();
        assert_eq!(seq.len(), 28);
        assert_eq!(seq.as_series().width(), FEATURE_WIDTH);
        assert_eq!(seq.end_date(), day(27));
    }

    #[test]
    fn short_window_is_insufficient_history() {
        let err = encoder().encode(&history(27), &UsageNormalization::identity()).unwrap_err();
        assert_eq!(err, ForecastError::InsufficientHistory { required: 28, available: 27 });
        assert!(err.is_recoverable());
    }

    #[test]
    fn gap_names_the_missing_day() {
        let mut records = history(29);
        records.remove(10);
        let err = encoder().encode(&records, &UsageNormalization::identity()).unwrap_err();
        assert_eq!(err, ForecastError::MissingDay { date: day(10) });
        assert!(err.is_insufficient_history());
    }

    #[test]
    fn duplicated_day_breaks_the_window() {
        let mut records = history(28);
        records[5].date = records[4].date;
        let err = encoder().encode(&records, &UsageNormalization::identity()).unwrap_err();
        assert_eq!(err, ForecastError::InsufficientHistory { required: 28, available: 5 });
        assert!(err.is_insufficient_history());
    }

    #[test]
    fn out_of_range_signals_are_rejected() {
        let mut records = history(28);
        records[3].weather_severity = 1.5;
        assert!(encoder().encode(&records, &UsageNormalization::identity()).is_err());
        let mut records = history(28);
        records[3].usage = -1.0;
        assert!(encoder().encode(&records, &UsageNormalization::identity()).is_err());
    }

    #[test]
    fn calendar_features_are_deterministic() {
        let enc = encoder();
        let norm = UsageNormalization::identity();
        let mut record = DailyRecord::usage_only(day(2), 4.0); // Wednesday
        record.event = true;
        record.hazard = true;
        record.traffic_index = 0.25;
        let v = enc.encode_record(&record, &norm).unwrap();
        assert_eq!(v.day_of_week(), &[0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 0.0]);
        let (s, c) = v.week_of_year();
        let angle = 2.0 * std::f64::consts::PI / 52.0;
        assert!((s - angle.sin()).abs() < 1e-12 && (c - angle.cos()).abs() < 1e-12);
        assert_eq!(v.as_slice()[10], 1.0);
        assert_eq!(v.as_slice()[12], 0.25);
        assert_eq!(v.as_slice()[13], 1.0);
        assert_eq!(v, enc.encode_record(&record, &norm).unwrap());
    }

    #[test]
    fn normalization_schemes() {
        let usage = [2.0, 4.0, 6.0];
        let z = UsageNormalization::fit(NormalizationScheme::ZScore, &usage).unwrap();
        assert_eq!(z.offset(), 4.0);
        assert_eq!(z.scale(), 2.0);
        assert_eq!(z.apply(8.0), 2.0);

        let mm = UsageNormalization::fit(NormalizationScheme::MinMax, &usage).unwrap();
        assert_eq!(mm.apply(6.0), 1.0);
        assert_eq!(mm.apply(2.0), 0.0);

        let flat = UsageNormalization::fit(NormalizationScheme::ZScore, &[5.0, 5.0]).unwrap();
        assert_eq!(flat.scale(), 1.0);
        assert!(UsageNormalization::fit(NormalizationScheme::MinMax, &[]).is_err());
        assert!(UsageNormalization::z_score(1.0, 0.0).is_err());
    }

    #[test]
    fn training_examples_slide_over_history() {
        let records = history(40);
        let examples = encoder().training_examples(&records, &UsageNormalization::identity()).unwrap();
        assert_eq!(examples.len(), 40 - 28 - 7 + 1);
        // First window ends on day 27; its target is day 34.
        assert_eq!(examples[0].sequence.end_date(), day(27));
        assert_eq!(examples[0].target, records[34].usage as u64);
        assert_eq!(examples.last().unwrap().sequence.end_date(), day(32));

        assert!(matches!(
            encoder().training_examples(&history(34), &UsageNormalization::identity()),
            Err(ForecastError::InsufficientHistory { required: 35, available: 34 })
        ));
    }

    #[test]
    fn trailing_window_keeps_latest_days() {
        let records = history(45);
        let tail = encoder().trailing_window(&records);
        assert_eq!(tail.len(), 28);
        assert_eq!(tail[0].date, day(17));
        assert_eq!(encoder().trailing_window(&records[..5]).len(), 5);
    }

    proptest! {
        #![proptest_config(ProptestConfig {
            cases: 128,
            ..ProptestConfig::default()
        })]

        /// Property: exactly one weekday slot is hot and the week encoding lies on the unit circle.
        #[test]
        fn calendar_encoding_invariants(offset in 0i64..3_000, usage in 0.0f64..500.0) {
            let record = DailyRecord::usage_only(day(offset), usage);
            let v = encoder().encode_record(&record, &UsageNormalization::identity()).unwrap();
            prop_assert_eq!(v.day_of_week().iter().sum::<f64>(), 1.0);
            let (s, c) = v.week_of_year();
            prop_assert!((s * s + c * c - 1.0).abs() < 1e-12);
            prop_assert_eq!(v.usage(), usage);
        }
    }
}
