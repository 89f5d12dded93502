//! Filling long gaps from historical statistics.

use chrono::NaiveDateTime;
use lake_series::time_series::mean;
use lake_series::{LakeError, Result, TimeSeries};
use lake_utils::dates::day_of_year;

/// Where fill statistics come from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HistoryMode {
    /// Only the current window is available.
    Window,
    /// Continuing from a previous run: the previously produced series must
    /// be prepended to the current window.
    Continuation,
}

/// Build the series fill statistics are computed from.
///
/// In continuation mode the prior series is required; its absence is a
/// `MissingHistory` error. `label` names the quantity in the error.
pub fn resolve_history(
    current: &TimeSeries,
    prior: Option<&TimeSeries>,
    mode: HistoryMode,
    label: &str,
) -> Result<TimeSeries> {
    match (mode, prior) {
        (HistoryMode::Window, _) => Ok(current.clone()),
        (HistoryMode::Continuation, Some(prior)) => Ok(current.extended_with(prior)),
        (HistoryMode::Continuation, None) => Err(LakeError::MissingHistory(format!(
            "no previous series for {label}, cannot continue from snapshot"
        ))),
    }
}

/// Mean value per day of year (1-366).
#[derive(Debug, Clone)]
pub struct DayOfYearTable {
    means: Vec<Option<f64>>,
    overall: Option<f64>,
}

impl DayOfYearTable {
    pub fn from_history(history: &TimeSeries) -> Self {
        let mut sums = vec![(0.0, 0usize); 367];
        for (t, v) in history.iter() {
            if v.is_finite() {
                let slot = &mut sums[day_of_year(&t) as usize];
                slot.0 += v;
                slot.1 += 1;
            }
        }
        let means = sums
            .into_iter()
            .map(|(sum, n)| if n == 0 { None } else { Some(sum / n as f64) })
            .collect();
        DayOfYearTable {
            means,
            overall: history.mean(),
        }
    }

    /// Mean for `doy`, falling back to the overall history mean when that
    /// day never occurs in the history.
    pub fn get(&self, doy: u32) -> Option<f64> {
        self.means
            .get(doy as usize)
            .copied()
            .flatten()
            .or(self.overall)
    }
}

/// Replace missing values with the day-of-year mean of the history.
pub fn fill_by_day_of_year(
    times: &[NaiveDateTime],
    values: &[f64],
    history_times: &[NaiveDateTime],
    history_values: &[f64],
) -> Vec<f64> {
    let history = TimeSeries::from_pairs(
        history_times
            .iter()
            .copied()
            .zip(history_values.iter().copied()),
    );
    let table = DayOfYearTable::from_history(&history);
    times
        .iter()
        .zip(values)
        .map(|(t, v)| {
            if v.is_nan() {
                table.get(day_of_year(t)).unwrap_or(f64::NAN)
            } else {
                *v
            }
        })
        .collect()
}

/// Replace missing values with the scalar mean of the history.
pub fn fill_by_mean(values: &[f64], history_values: &[f64]) -> Vec<f64> {
    let fill = mean(history_values).unwrap_or(f64::NAN);
    values
        .iter()
        .map(|v| if v.is_nan() { fill } else { *v })
        .collect()
}
