//! Time horizon and per-period configuration values.

use chrono::{DateTime, FixedOffset, Timelike};
use serde::{Deserialize, Serialize};

use crate::error::ModelError;
use crate::reactive::{Param, Tracker};

/// A per-period (or per-boundary) value: one scalar broadcast over the horizon, or an
/// explicit list that must match it exactly.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Series {
    Scalar(f64),
    Values(Vec<f64>),
}

impl Series {
    /// Expands to `len` values. A list of any other length is a configuration error.
    pub fn resolve(&self, name: &'static str, len: usize) -> Result<Vec<f64>, ModelError> {
        match self {
            Series::Scalar(value) => Ok(vec![*value; len]),
            Series::Values(values) if values.len() == len => Ok(values.clone()),
            Series::Values(values) => Err(ModelError::LengthMismatch {
                name,
                expected: len,
                actual: values.len(),
            }),
        }
    }

    pub fn first(&self) -> Option<f64> {
        match self {
            Series::Scalar(value) => Some(*value),
            Series::Values(values) => values.first().copied(),
        }
    }
}

impl From<f64> for Series {
    fn from(value: f64) -> Self {
        Series::Scalar(value)
    }
}

impl From<Vec<f64>> for Series {
    fn from(values: Vec<f64>) -> Self {
        Series::Values(values)
    }
}

impl Param<Series> {
    /// Tracked read expanded to `len` values; `None` while unset.
    pub fn resolve(
        &self,
        tracker: &mut dyn Tracker,
        len: usize,
    ) -> Result<Option<Vec<f64>>, ModelError> {
        self.get_opt(tracker)
            .map(|series| series.resolve(self.name(), len))
            .transpose()
    }

    /// Untracked variant for outputs.
    pub fn resolve_untracked(&self, len: usize) -> Result<Option<Vec<f64>>, ModelError> {
        self.peek()
            .map(|series| series.resolve(self.name(), len))
            .transpose()
    }
}

/// Period durations (hours) and the local wall-clock start of the first period.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Horizon {
    pub periods: Vec<f64>,
    pub start: DateTime<FixedOffset>,
}

impl Horizon {
    pub fn new(periods: Vec<f64>, start: DateTime<FixedOffset>) -> Result<Self, ModelError> {
        validate_periods(&periods)?;
        Ok(Self { periods, start })
    }

    pub fn len(&self) -> usize {
        self.periods.len()
    }

    pub fn is_empty(&self) -> bool {
        self.periods.is_empty()
    }

    pub fn boundaries(&self) -> Vec<f64> {
        boundaries(&self.periods)
    }

    pub fn start_offset(&self) -> f64 {
        hours_since_midnight(&self.start)
    }
}

pub fn validate_periods(periods: &[f64]) -> Result<(), ModelError> {
    if periods.is_empty() {
        return Err(ModelError::invalid("periods", "horizon needs at least one period"));
    }
    if let Some(bad) = periods.iter().find(|d| !d.is_finite() || **d <= 0.0) {
        return Err(ModelError::invalid(
            "periods",
            format!("period durations must be positive, got {bad}"),
        ));
    }
    Ok(())
}

/// Hours elapsed at each boundary, starting at 0 (length `n + 1`).
pub fn boundaries(periods: &[f64]) -> Vec<f64> {
    let mut times = Vec::with_capacity(periods.len() + 1);
    let mut elapsed = 0.0;
    times.push(elapsed);
    for duration in periods {
        elapsed += duration;
        times.push(elapsed);
    }
    times
}

/// Length of the intersection of `[a_start, a_end)` and `[b_start, b_end)`.
pub fn overlap(a_start: f64, a_end: f64, b_start: f64, b_end: f64) -> f64 {
    (a_end.min(b_end) - a_start.max(b_start)).max(0.0)
}

pub fn hours_since_midnight(time: &DateTime<FixedOffset>) -> f64 {
    let seconds = time.num_seconds_from_midnight() as f64 + time.nanosecond() as f64 * 1e-9;
    seconds / 3600.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_series_resolve() {
        assert_eq!(Series::Scalar(2.0).resolve("cap", 3).unwrap(), vec![2.0; 3]);
        assert_eq!(
            Series::Values(vec![1.0, 2.0]).resolve("cap", 2).unwrap(),
            vec![1.0, 2.0]
        );
        assert!(matches!(
            Series::Values(vec![1.0]).resolve("cap", 2),
            Err(ModelError::LengthMismatch { name: "cap", expected: 2, actual: 1 })
        ));
    }

    #[test]
    fn test_series_deserializes_untagged() {
        let scalar: Series = serde_json::from_str("4.5").unwrap();
        let list: Series = serde_json::from_str("[1, 2]").unwrap();
        assert_eq!(scalar, Series::Scalar(4.5));
        assert_eq!(list, Series::Values(vec![1.0, 2.0]));
    }

    #[test]
    fn test_boundaries_and_overlap() {
        assert_eq!(boundaries(&[0.5, 1.0, 0.25]), vec![0.0, 0.5, 1.5, 1.75]);
        assert_eq!(overlap(0.0, 1.0, 0.5, 2.0), 0.5);
        assert_eq!(overlap(0.0, 1.0, 1.0, 2.0), 0.0);
    }

    #[test]
    fn test_start_offset() {
        let start = DateTime::parse_from_rfc3339("2025-01-06T13:30:00+01:00").unwrap();
        let horizon = Horizon::new(vec![1.0; 4], start).unwrap();
        assert_eq!(horizon.start_offset(), 13.5);
        assert!(Horizon::new(vec![1.0, 0.0], start).is_err());
    }
}
