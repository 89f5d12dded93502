//! Timestamped value series with explicit missing values.
//!
//! Missing observations are stored as `f64::NAN` so that every nominal slot
//! of a regular grid can be represented, present or not.

use crate::error::{LakeError, Result};
use chrono::NaiveDateTime;
use itertools::Itertools;
use std::collections::BTreeMap;

/// An ordered sequence of `(timestamp, value)` pairs.
#[derive(Debug, Clone, Default)]
pub struct TimeSeries {
    times: Vec<NaiveDateTime>,
    values: Vec<f64>,
}

impl TimeSeries {
    /// Create a series from parallel arrays.
    ///
    /// Fails with a validation error when the arrays differ in length.
    pub fn new(times: Vec<NaiveDateTime>, values: Vec<f64>) -> Result<Self> {
        if times.len() != values.len() {
            return Err(LakeError::Validation(format!(
                "time array has {} entries but value array has {}",
                times.len(),
                values.len()
            )));
        }
        Ok(TimeSeries { times, values })
    }

    /// Create a series of missing values over a time grid.
    pub fn missing(times: Vec<NaiveDateTime>) -> Self {
        let values = vec![f64::NAN; times.len()];
        TimeSeries { times, values }
    }

    /// Create a series from `(timestamp, value)` pairs in any order.
    pub fn from_pairs(pairs: impl IntoIterator<Item = (NaiveDateTime, f64)>) -> Self {
        let (times, values) = pairs.into_iter().unzip();
        TimeSeries { times, values }
    }

    pub fn times(&self) -> &[NaiveDateTime] {
        &self.times
    }

    pub fn values(&self) -> &[f64] {
        &self.values
    }

    pub fn values_mut(&mut self) -> &mut [f64] {
        &mut self.values
    }

    pub fn into_values(self) -> Vec<f64> {
        self.values
    }

    pub fn len(&self) -> usize {
        self.times.len()
    }

    pub fn is_empty(&self) -> bool {
        self.times.is_empty()
    }

    pub fn first_time(&self) -> Option<NaiveDateTime> {
        self.times.first().copied()
    }

    pub fn last_time(&self) -> Option<NaiveDateTime> {
        self.times.last().copied()
    }

    /// Iterate over `(timestamp, value)` pairs.
    pub fn iter(&self) -> impl Iterator<Item = (NaiveDateTime, f64)> + '_ {
        self.times.iter().copied().zip(self.values.iter().copied())
    }

    /// Number of missing values.
    pub fn missing_count(&self) -> usize {
        self.values.iter().filter(|v| v.is_nan()).count()
    }

    /// Drop missing values, sort by time and keep the first value seen for
    /// each duplicated timestamp.
    pub fn cleaned(&self) -> TimeSeries {
        let pairs = self
            .iter()
            .filter(|(_, v)| v.is_finite())
            .sorted_by_key(|(t, _)| *t)
            .dedup_by(|a, b| a.0 == b.0);
        TimeSeries::from_pairs(pairs)
    }

    /// Timestamps that carry an observation.
    pub fn observed_times(&self) -> Vec<NaiveDateTime> {
        self.iter()
            .filter(|(_, v)| v.is_finite())
            .map(|(t, _)| t)
            .collect()
    }

    /// Values whose timestamp lies within `[start, end]`.
    pub fn between(&self, start: NaiveDateTime, end: NaiveDateTime) -> TimeSeries {
        TimeSeries::from_pairs(self.iter().filter(|(t, _)| *t >= start && *t <= end))
    }

    /// Left join onto a time grid: every grid slot is kept, slots without
    /// an observation become missing.
    pub fn align(&self, grid: &[NaiveDateTime]) -> TimeSeries {
        let lookup: BTreeMap<NaiveDateTime, f64> = self
            .times
            .iter()
            .zip(self.values.iter())
            .rev()
            .filter(|(_, v)| v.is_finite())
            .map(|(t, v)| (*t, *v))
            .collect();
        let values = grid
            .iter()
            .map(|t| lookup.get(t).copied().unwrap_or(f64::NAN))
            .collect();
        TimeSeries {
            times: grid.to_vec(),
            values,
        }
    }

    /// Outer join with `other`, preferring values already present in `self`.
    /// Missing values are dropped from the result, which is sorted by time.
    pub fn combine_first(&self, other: &TimeSeries) -> TimeSeries {
        let mut merged: BTreeMap<NaiveDateTime, f64> = other
            .iter()
            .filter(|(_, v)| v.is_finite())
            .collect();
        for (t, v) in self.cleaned().iter() {
            merged.insert(t, v);
        }
        TimeSeries::from_pairs(merged)
    }

    /// Prefix this series with the part of `prior` that lies strictly before
    /// its first timestamp.
    pub fn extended_with(&self, prior: &TimeSeries) -> TimeSeries {
        let cutoff = match self.first_time() {
            Some(t) => t,
            None => return prior.clone(),
        };
        let pairs = prior
            .iter()
            .filter(|(t, _)| *t < cutoff)
            .chain(self.iter());
        TimeSeries::from_pairs(pairs)
    }

    /// Apply `f` to every present value.
    pub fn map_values(&self, f: impl Fn(f64) -> f64) -> TimeSeries {
        let values = self
            .values
            .iter()
            .map(|v| if v.is_nan() { *v } else { f(*v) })
            .collect();
        TimeSeries {
            times: self.times.clone(),
            values,
        }
    }

    /// Mean of the present values.
    pub fn mean(&self) -> Option<f64> {
        mean(&self.values)
    }

    /// Sample standard deviation (n - 1) of the present values.
    pub fn std(&self) -> Option<f64> {
        std(&self.values)
    }
}

/// Mean of the finite values in `values`.
pub fn mean(values: &[f64]) -> Option<f64> {
    let (sum, count) = values
        .iter()
        .filter(|v| v.is_finite())
        .fold((0.0, 0usize), |(s, n), v| (s + v, n + 1));
    if count == 0 {
        None
    } else {
        Some(sum / count as f64)
    }
}

/// Sample standard deviation (n - 1) of the finite values in `values`.
pub fn std(values: &[f64]) -> Option<f64> {
    let m = mean(values)?;
    let (sq, count) = values
        .iter()
        .filter(|v| v.is_finite())
        .fold((0.0, 0usize), |(s, n), v| (s + (v - m).powi(2), n + 1));
    if count < 2 {
        None
    } else {
        Some((sq / (count - 1) as f64).sqrt())
    }
}
