//! Merging a primary observation source with fallback sources.
//!
//! Stations differ systematically (elevation, instrument bias), so a fallback
//! is rebased onto the primary's mean and standard deviation before its values
//! are spliced into the primary's gaps.

use crate::gaps::{detect_gaps, Gap};
use chrono::{NaiveDateTime, TimeDelta};
use lake_series::{LakeError, TimeSeries};
use log::{info, warn};
use std::collections::BTreeSet;

/// A secondary source for the same quantity.
#[derive(Debug)]
pub struct Fallback {
    pub source_id: String,
    /// First timestamp the source is valid for.
    pub valid_from: NaiveDateTime,
    /// Last timestamp the source is valid for.
    pub valid_to: NaiveDateTime,
    /// Outcome of fetching the source; a failed fetch is skipped.
    pub series: Result<TimeSeries, LakeError>,
}

/// Result of a reconciliation.
#[derive(Debug)]
pub struct Reconciled {
    /// Merged, sorted observations without missing values.
    pub series: TimeSeries,
    /// Gaps that no source could close.
    pub remaining_gaps: Vec<Gap>,
    /// Fallback sources that contributed at least one value.
    pub contributors: Vec<String>,
}

/// Rebase `values` so their mean and standard deviation match the target.
///
/// `(x - mean(values)) / std(values) * target_std + target_mean`. When either
/// standard deviation is zero or undefined the values are returned unmodified.
pub fn rebase(values: &TimeSeries, target_mean: Option<f64>, target_std: Option<f64>) -> TimeSeries {
    let (mean, std) = match (values.mean(), values.std()) {
        (Some(m), Some(s)) if s > 0.0 => (m, s),
        _ => return values.clone(),
    };
    match (target_mean, target_std) {
        (Some(tm), Some(ts)) if ts > 0.0 => values.map_values(|x| (x - mean) / std * ts + tm),
        _ => values.clone(),
    }
}

/// Merge `primary` with `fallbacks` (in priority order) over the window.
///
/// The primary is deduplicated, cleaned of missing values and sorted. For each
/// gap in the primary, the first fallback whose valid range intersects the gap
/// contributes its rebased values at the timestamps of that intersection the
/// merged series does not already hold, so primary values are never replaced.
/// Gaps are recomputed after every fallback and the loop stops as soon as
/// none remain.
pub fn reconcile(
    primary: &TimeSeries,
    fallbacks: &[Fallback],
    window_start: NaiveDateTime,
    window_end: NaiveDateTime,
    tolerance: TimeDelta,
) -> Reconciled {
    let mut merged = primary.cleaned();
    let target_mean = merged.mean();
    let target_std = merged.std();
    let mut gaps = detect_gaps(merged.times(), window_start, window_end, tolerance);
    let mut contributors = Vec::new();

    for fallback in fallbacks {
        if gaps.is_empty() {
            break;
        }
        let series = match &fallback.series {
            Ok(series) => series.cleaned(),
            Err(e) => {
                warn!("Fallback {} unavailable, skipping: {}", fallback.source_id, e);
                continue;
            }
        };

        let mut contributed = false;
        for gap in &gaps {
            let from = gap.start.max(fallback.valid_from);
            let to = gap.end.min(fallback.valid_to);
            if from > to {
                continue;
            }
            let present: BTreeSet<NaiveDateTime> = merged.times().iter().copied().collect();
            let segment = TimeSeries::from_pairs(
                series
                    .between(from, to)
                    .iter()
                    .filter(|(t, _)| !present.contains(t)),
            );
            if segment.is_empty() {
                continue;
            }
            info!(
                "Completing gap {} - {} with {} values from {}",
                gap.start,
                gap.end,
                segment.len(),
                fallback.source_id
            );
            let rebased = rebase(&segment, target_mean, target_std);
            merged = merged.combine_first(&rebased);
            contributed = true;
        }

        if contributed {
            contributors.push(fallback.source_id.clone());
            gaps = detect_gaps(merged.times(), window_start, window_end, tolerance);
        }
    }

    Reconciled {
        series: merged,
        remaining_gaps: gaps,
        contributors,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn hour(h: i64) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2022, 6, 1)
            .unwrap()
            .and_hms_opt(0, 0, 0)
            .unwrap()
            + TimeDelta::hours(h)
    }

    fn signal(h: i64) -> f64 {
        10.0 + 5.0 * ((h as f64) * std::f64::consts::PI / 12.0).sin()
    }

    /// Hourly primary over ten days with days 3-6 missing.
    fn gappy_primary() -> TimeSeries {
        TimeSeries::from_pairs(
            (0..240)
                .filter(|h| !(72..144).contains(h))
                .map(|h| (hour(h), signal(h))),
        )
    }

    fn fallback(id: &str, from: i64, to: i64, f: impl Fn(i64) -> f64) -> Fallback {
        Fallback {
            source_id: id.to_string(),
            valid_from: hour(from),
            valid_to: hour(to),
            series: Ok(TimeSeries::from_pairs((from..=to).map(|h| (hour(h), f(h))))),
        }
    }

    #[test]
    fn test_rebase_matches_primary_statistics() {
        let primary = gappy_primary();
        let fallbacks = vec![fallback("B", 0, 239, |h| 3.0 * signal(h) - 7.0)];
        let result = reconcile(&primary, &fallbacks, hour(0), hour(239), TimeDelta::days(1));

        assert!(result.remaining_gaps.is_empty());
        assert_eq!(result.contributors, vec!["B".to_string()]);

        let spliced = result.series.between(hour(72), hour(143));
        assert_eq!(spliced.len(), 72);
        let (pm, ps) = (primary.mean().unwrap(), primary.std().unwrap());
        assert!((spliced.mean().unwrap() - pm).abs() < 1e-9);
        assert!((spliced.std().unwrap() - ps).abs() < 1e-9);
    }

    #[test]
    fn test_primary_values_are_preferred() {
        let primary = gappy_primary();
        let fallbacks = vec![fallback("B", 0, 239, |_| 1000.0)];
        let result = reconcile(&primary, &fallbacks, hour(0), hour(239), TimeDelta::days(1));
        let merged: Vec<_> = result.series.iter().collect();
        for (t, v) in primary.iter() {
            assert!(merged.contains(&(t, v)));
        }
    }

    #[test]
    fn test_constant_fallback_is_not_rebased() {
        let values = TimeSeries::from_pairs((0..5).map(|h| (hour(h), 4.0)));
        let rebased = rebase(&values, Some(10.0), Some(2.0));
        assert_eq!(rebased.values(), values.values());
    }

    #[test]
    fn test_failed_fallback_is_skipped() {
        let primary = gappy_primary();
        let fallbacks = vec![
            Fallback {
                source_id: "DOWN".to_string(),
                valid_from: hour(0),
                valid_to: hour(239),
                series: Err(LakeError::fetch("tre200h0", "DOWN", "bad response 503")),
            },
            fallback("C", 0, 239, signal),
        ];
        let result = reconcile(&primary, &fallbacks, hour(0), hour(239), TimeDelta::days(1));
        assert!(result.remaining_gaps.is_empty());
        assert_eq!(result.contributors, vec!["C".to_string()]);
    }

    #[test]
    fn test_fallback_outside_gap_leaves_gap_open() {
        let primary = gappy_primary();
        let fallbacks = vec![fallback("D", 200, 239, signal)];
        let result = reconcile(&primary, &fallbacks, hour(0), hour(239), TimeDelta::days(1));
        assert_eq!(result.remaining_gaps.len(), 1);
        assert!(result.contributors.is_empty());
    }

    #[test]
    fn test_priority_order_and_early_stop() {
        let primary = gappy_primary();
        let fallbacks = vec![fallback("B", 0, 239, signal), fallback("C", 0, 239, signal)];
        let result = reconcile(&primary, &fallbacks, hour(0), hour(239), TimeDelta::days(1));
        assert_eq!(result.contributors, vec!["B".to_string()]);
    }
}
