//! Parameter values for series runs.

use std::convert::TryFrom;

use crate::error::BenchError;

/// An ordered list of parameter values, computed once.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SweepPlan {
    values: Vec<i64>,
}

impl SweepPlan {
    /// `steps` points spaced linearly over `[min, max]`, both ends included:
    /// `min + (max - min) * i / (steps - 1)` with floor division.
    pub fn linear(min: i64, max: i64, steps: usize) -> Result<Self, BenchError> {
        if steps == 0 {
            return Err(BenchError::InvalidConfig("a series needs at least one step".into()));
        }
        if max < min {
            return Err(BenchError::InvalidConfig(format!(
                "series maximum {} is below the minimum {}",
                max, min
            )));
        }

        if steps == 1 {
            return Ok(SweepPlan { values: vec![min] });
        }

        let overflow = || {
            BenchError::InvalidConfig(format!(
                "series from {} to {} in {} steps is out of range",
                min, max, steps
            ))
        };

        let span = max.checked_sub(min).ok_or_else(overflow)?;
        let steps = i64::try_from(steps).map_err(|_| overflow())?;
        let last = steps - 1;
        let values = (0..steps)
            .map(|i| {
                span.checked_mul(i)
                    .map(|scaled| min + scaled.div_euclid(last))
                    .ok_or_else(overflow)
            })
            .collect::<Result<_, _>>()?;

        Ok(SweepPlan { values })
    }

    /// Every `interval`-th value in `[min, max)`.
    pub fn interval(min: i64, max: i64, interval: i64) -> Result<Self, BenchError> {
        if interval <= 0 {
            return Err(BenchError::InvalidConfig(format!(
                "sweep interval must be positive, got {}",
                interval
            )));
        }

        let mut values = vec![];
        let mut value = min;
        while value < max {
            values.push(value);
            value = match value.checked_add(interval) {
                Some(next) => next,
                None => break,
            };
        }

        Ok(SweepPlan { values })
    }

    pub fn values(&self) -> &[i64] {
        &self.values
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

impl IntoIterator for SweepPlan {
    type Item = i64;
    type IntoIter = std::vec::IntoIter<i64>;

    fn into_iter(self) -> Self::IntoIter {
        self.values.into_iter()
    }
}
