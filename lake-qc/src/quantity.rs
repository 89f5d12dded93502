//! The per-quantity transformation from raw multi-source readings to a
//! complete array on the simulation's time grid.
//!
//! Stages, in order: reconcile sources, align to the grid, clamp, interpolate
//! short gaps, fill long gaps from history. Every stage emits one value per
//! grid slot.

use crate::climatology::{fill_by_day_of_year, fill_by_mean, resolve_history, HistoryMode};
use crate::gaps::default_tolerance;
use crate::interpolation::interpolate;
use crate::policy::{FillMode, QuantityPolicy};
use crate::reconcile::{reconcile, Fallback};
use chrono::{NaiveDateTime, TimeDelta};
use lake_series::{LakeError, Result, TimeSeries};
use log::{debug, info};

/// Raw inputs for one quantity at one site.
#[derive(Debug)]
pub struct ReconciliationContext {
    /// Label used in logs and errors (e.g. `Tair` or `inflow 1 Q`).
    pub label: String,
    pub primary: TimeSeries,
    pub fallbacks: Vec<Fallback>,
    /// Previously produced series when continuing from a snapshot.
    pub prior: Option<TimeSeries>,
}

impl ReconciliationContext {
    pub fn new(label: &str, primary: TimeSeries) -> Self {
        ReconciliationContext {
            label: label.to_string(),
            primary,
            fallbacks: Vec::new(),
            prior: None,
        }
    }

    pub fn with_fallbacks(mut self, fallbacks: Vec<Fallback>) -> Self {
        self.fallbacks = fallbacks;
        self
    }

    pub fn with_prior(mut self, prior: Option<TimeSeries>) -> Self {
        self.prior = prior;
        self
    }
}

/// Runs one quantity's policy over a fixed time grid.
#[derive(Debug)]
pub struct QuantityPipeline<'a> {
    policy: &'a QuantityPolicy,
    grid: &'a [NaiveDateTime],
    tolerance: TimeDelta,
    mode: HistoryMode,
}

impl<'a> QuantityPipeline<'a> {
    pub fn new(policy: &'a QuantityPolicy, grid: &'a [NaiveDateTime], mode: HistoryMode) -> Self {
        QuantityPipeline {
            policy,
            grid,
            tolerance: default_tolerance(),
            mode,
        }
    }

    pub fn with_tolerance(mut self, tolerance: TimeDelta) -> Self {
        self.tolerance = tolerance;
        self
    }

    /// Run every stage. The result holds exactly one value per grid slot.
    ///
    /// Fails with `MissingHistory` in continuation mode without a prior
    /// series, and with `Validation` if values remain missing after a fill
    /// mode other than `None`.
    pub fn run(&self, context: ReconciliationContext) -> Result<TimeSeries> {
        let (start, end) = match (self.grid.first(), self.grid.last()) {
            (Some(s), Some(e)) => (*s, *e),
            _ => return Ok(TimeSeries::default()),
        };
        let label = context.label.as_str();

        let reconciled = reconcile(&context.primary, &context.fallbacks, start, end, self.tolerance);
        if !reconciled.remaining_gaps.is_empty() {
            info!(
                "{}: {} gaps longer than {}h remain after reconciliation",
                label,
                reconciled.remaining_gaps.len(),
                self.tolerance.num_hours()
            );
        }

        let mut series = reconciled.series.align(self.grid);
        self.policy.clamp(series.values_mut());
        debug!("{}: {} missing after clamping", label, series.missing_count());

        let interpolated = interpolate(self.grid, series.values(), self.policy.max_interpolate_gap);
        let series = TimeSeries::new(self.grid.to_vec(), interpolated)?;

        let missing = series.missing_count();
        if missing == 0 || self.policy.fill == FillMode::None {
            return Ok(series);
        }

        let history = resolve_history(&series, context.prior.as_ref(), self.mode, label)?;
        info!(
            "{}: filling {} missing values ({:?}) from {} history values",
            label,
            missing,
            self.policy.fill,
            history.len()
        );
        let filled = match self.policy.fill {
            FillMode::DayOfYear => {
                fill_by_day_of_year(self.grid, series.values(), history.times(), history.values())
            }
            FillMode::Mean => fill_by_mean(series.values(), history.values()),
            FillMode::None => series.values().to_vec(),
        };
        let series = TimeSeries::new(self.grid.to_vec(), filled)?;

        let remaining = series.missing_count();
        if remaining > 0 {
            return Err(LakeError::Validation(format!(
                "{}: {} values still missing after {:?} fill",
                label, remaining, self.policy.fill
            )));
        }
        Ok(series)
    }
}
