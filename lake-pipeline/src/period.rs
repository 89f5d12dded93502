//! Simulation run period: from the forcing extent, restart snapshots and
//! explicit overrides.

use crate::files::snapshot_file;
use crate::params::ForcingStation;
use chrono::{NaiveDate, NaiveDateTime, TimeDelta, Timelike};
use lake_qc::Quantity;
use lake_series::source::{ObservationSource, StationMetadata};
use lake_series::{LakeError, Result};
use itertools::Itertools;
use lake_utils::dates::{format_date_compact, midnight, parse_date_compact};
use log::info;
use std::path::Path;

/// Period over which every required forcing quantity is available somewhere.
#[derive(Debug, Clone)]
pub struct ForcingExtent {
    pub start: NaiveDateTime,
    pub end: NaiveDateTime,
    /// Metadata of every forcing station, in priority order.
    pub stations: Vec<StationMetadata>,
}

/// Query every forcing station and intersect the per-quantity availability.
///
/// For each quantity the earliest start and latest end across stations is
/// taken; the extent is the latest of those starts and the earliest of those
/// ends. A quantity no station records is a configuration error.
pub fn forcing_extent(source: &dyn ObservationSource, stations: &[ForcingStation]) -> Result<ForcingExtent> {
    let mut metadata = Vec::with_capacity(stations.len());
    for station in stations {
        metadata.push(source.metadata(&station.id)?);
    }

    let mut start: Option<NaiveDateTime> = None;
    let mut end: Option<NaiveDateTime> = None;
    for quantity in Quantity::FORCING {
        let id = quantity.meteo_id().unwrap_or_default();
        let extents: Vec<_> = metadata.iter().filter_map(|m| m.extent(id)).collect();
        let (q_start, q_end) = match (
            extents.iter().map(|e| e.start).min(),
            extents.iter().map(|e| e.end).max(),
        ) {
            (Some(s), Some(e)) => (s, e),
            _ => {
                return Err(LakeError::Configuration(format!(
                    "{id} ({quantity:?}) is required but no forcing station records it"
                )))
            }
        };
        start = Some(start.map_or(q_start, |s| s.max(q_start)));
        end = Some(end.map_or(q_end, |e| e.min(q_end)));
    }

    match (start, end) {
        (Some(start), Some(end)) => Ok(ForcingExtent {
            start: ceil_hour(start),
            end: floor_hour(end),
            stations: metadata,
        }),
        _ => Err(LakeError::Configuration("no forcing quantities configured".to_string())),
    }
}

fn floor_hour(t: NaiveDateTime) -> NaiveDateTime {
    t.date().and_hms_opt(t.hour(), 0, 0).unwrap_or(t)
}

fn ceil_hour(t: NaiveDateTime) -> NaiveDateTime {
    let floor = floor_hour(t);
    if floor == t {
        t
    } else {
        floor + TimeDelta::hours(1)
    }
}

/// Dates of every `simulation-snapshot_<YYYYMMDD>.dat` in `dir`, ascending.
pub fn list_snapshots(dir: &Path) -> Result<Vec<NaiveDate>> {
    let mut dates = Vec::new();
    if !dir.exists() {
        return Ok(dates);
    }
    for entry in std::fs::read_dir(dir)? {
        let name = entry?.file_name();
        let name = name.to_string_lossy();
        if let Some(date) = name
            .strip_prefix("simulation-snapshot_")
            .and_then(|rest| rest.strip_suffix(".dat"))
            .and_then(|raw| parse_date_compact(raw).ok())
        {
            dates.push(date);
        }
    }
    Ok(dates.into_iter().sorted().dedup().collect())
}

/// Run-period related options of one run.
#[derive(Debug, Clone, Default)]
pub struct PeriodRequest {
    /// Continue from a snapshot when one is available.
    pub snapshot: bool,
    /// Specific snapshot to continue from; the latest when unset.
    pub snapshot_date: Option<NaiveDate>,
    pub overwrite_start_date: Option<NaiveDate>,
    pub overwrite_end_date: Option<NaiveDate>,
    /// Days past `today` covered by the forecast, when forecasting.
    pub forecast_days: Option<i64>,
    pub today: NaiveDate,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunPeriod {
    pub start: NaiveDateTime,
    pub end: NaiveDateTime,
    /// Snapshot the run continues from, if any.
    pub snapshot: Option<NaiveDate>,
}

impl RunPeriod {
    pub fn is_continuation(&self) -> bool {
        self.snapshot.is_some()
    }
}

/// Resolve the start and end of the run.
///
/// Start, in priority order: explicit override (never a continuation), the
/// requested or latest snapshot, the forcing start. A start before the
/// reference epoch is raised to it, unless it came from the override, which
/// is an error. End: forcing end, extended by the forecast horizon, capped by
/// the end override.
pub fn resolve_run_period(
    site_dir: &Path,
    reference: NaiveDateTime,
    forcing: &ForcingExtent,
    request: &PeriodRequest,
) -> Result<RunPeriod> {
    let mut snapshot = None;
    let mut start = if let Some(date) = request.overwrite_start_date {
        let start = midnight(date);
        if start < forcing.start {
            return Err(LakeError::Configuration(format!(
                "overwrite start date {date} is before available forcing data ({})",
                forcing.start
            )));
        }
        if start < reference {
            return Err(LakeError::Configuration(format!(
                "overwrite start date {date} is before the reference date {reference}"
            )));
        }
        info!("Setting start date from overwrite start date {}", date);
        start
    } else if request.snapshot {
        match select_snapshot(site_dir, request.snapshot_date)? {
            Some(date) => {
                snapshot = Some(date);
                midnight(date)
            }
            None => forcing.start,
        }
    } else {
        forcing.start
    };

    if start < reference {
        info!("Start {} precedes reference date, using {}", start, reference);
        start = reference;
    }

    let mut end = forcing.end;
    if let Some(days) = request.forecast_days {
        end = midnight(request.today) + TimeDelta::days(days);
        info!("Using forecast to extend end date by {} days", days);
    }
    if let Some(date) = request.overwrite_end_date {
        let overwrite = midnight(date);
        if overwrite > end {
            return Err(LakeError::Configuration(format!(
                "overwrite end date {date} is after available forcing data ({end})"
            )));
        }
        info!("Setting end date from overwrite end date {}", date);
        end = overwrite;
    }

    if start >= end {
        return Err(LakeError::Validation(format!(
            "start date {start} must be before end date {end}"
        )));
    }
    info!("Model timeframe: {} - {}", start, end);
    Ok(RunPeriod { start, end, snapshot })
}

fn select_snapshot(site_dir: &Path, requested: Option<NaiveDate>) -> Result<Option<NaiveDate>> {
    match requested {
        Some(date) => {
            let name = snapshot_file(&format_date_compact(&date));
            if site_dir.join(&name).exists() {
                info!("Snapshot {} located", name);
                Ok(Some(date))
            } else {
                info!("Snapshot {} cannot be found, reverting to forcing period", name);
                Ok(None)
            }
        }
        None => {
            let latest = list_snapshots(site_dir)?.pop();
            match latest {
                Some(date) => info!("Continuing from most recent snapshot {}", date),
                None => info!("No snapshots available, reverting to forcing period"),
            }
            Ok(latest)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lake_series::source::StaticSource;
    use lake_series::TimeSeries;
    use tempfile::tempdir;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn extent(start: NaiveDate, end: NaiveDate) -> ForcingExtent {
        ForcingExtent {
            start: midnight(start),
            end: midnight(end),
            stations: Vec::new(),
        }
    }

    fn request() -> PeriodRequest {
        PeriodRequest {
            today: date(2024, 6, 1),
            ..Default::default()
        }
    }

    #[test]
    fn test_forcing_extent_intersects_quantities() {
        let mut source = StaticSource::new();
        for quantity in Quantity::FORCING {
            let id = quantity.meteo_id().unwrap();
            let (from, to) = if id == "gre000h0" {
                (midnight(date(2000, 1, 1)), midnight(date(2020, 1, 1)))
            } else {
                (midnight(date(1990, 1, 1)), midnight(date(2024, 1, 1)))
            };
            source.insert("AAA", id, TimeSeries::from_pairs(vec![(from, 1.0), (to, 1.0)]));
        }
        // A second station extends radiation into the future
        source.insert(
            "BBB",
            "gre000h0",
            TimeSeries::from_pairs(vec![(midnight(date(2010, 1, 1)), 1.0), (midnight(date(2023, 1, 1)), 1.0)]),
        );
        let stations = vec![ForcingStation { id: "AAA".into() }, ForcingStation { id: "BBB".into() }];
        let extent = forcing_extent(&source, &stations).unwrap();
        assert_eq!(extent.start, midnight(date(2000, 1, 1)));
        assert_eq!(extent.end, midnight(date(2023, 1, 1)));
        assert_eq!(extent.stations.len(), 2);
    }

    #[test]
    fn test_forcing_extent_missing_quantity() {
        let mut source = StaticSource::new();
        source.insert(
            "AAA",
            "tre200h0",
            TimeSeries::from_pairs(vec![(midnight(date(2000, 1, 1)), 1.0)]),
        );
        let err = forcing_extent(&source, &[ForcingStation { id: "AAA".into() }]).unwrap_err();
        assert!(matches!(err, LakeError::Configuration(_)));
    }

    #[test]
    fn test_latest_snapshot_is_used() {
        let dir = tempdir().unwrap();
        for name in ["simulation-snapshot_20230101.dat", "simulation-snapshot_20230601.dat", "notes.txt"] {
            std::fs::write(dir.path().join(name), "").unwrap();
        }
        let req = PeriodRequest {
            snapshot: true,
            ..request()
        };
        let period = resolve_run_period(
            dir.path(),
            midnight(date(1981, 1, 1)),
            &extent(date(1990, 1, 1), date(2024, 1, 1)),
            &req,
        )
        .unwrap();
        assert_eq!(period.start, midnight(date(2023, 6, 1)));
        assert_eq!(period.snapshot, Some(date(2023, 6, 1)));
        assert!(period.is_continuation());
    }

    #[test]
    fn test_missing_requested_snapshot_falls_back_to_forcing() {
        let dir = tempdir().unwrap();
        let req = PeriodRequest {
            snapshot: true,
            snapshot_date: Some(date(2023, 3, 1)),
            ..request()
        };
        let period = resolve_run_period(
            dir.path(),
            midnight(date(1981, 1, 1)),
            &extent(date(1990, 1, 1), date(2024, 1, 1)),
            &req,
        )
        .unwrap();
        assert_eq!(period.start, midnight(date(1990, 1, 1)));
        assert!(!period.is_continuation());
    }

    #[test]
    fn test_start_clamped_to_reference() {
        let dir = tempdir().unwrap();
        let period = resolve_run_period(
            dir.path(),
            midnight(date(1995, 1, 1)),
            &extent(date(1990, 1, 1), date(2024, 1, 1)),
            &request(),
        )
        .unwrap();
        assert_eq!(period.start, midnight(date(1995, 1, 1)));
    }

    #[test]
    fn test_override_before_reference_is_fatal() {
        let dir = tempdir().unwrap();
        let req = PeriodRequest {
            overwrite_start_date: Some(date(1992, 1, 1)),
            snapshot: true,
            ..request()
        };
        let err = resolve_run_period(
            dir.path(),
            midnight(date(1995, 1, 1)),
            &extent(date(1990, 1, 1), date(2024, 1, 1)),
            &req,
        )
        .unwrap_err();
        assert!(matches!(err, LakeError::Configuration(_)));
    }

    #[test]
    fn test_forecast_and_end_override() {
        let dir = tempdir().unwrap();
        let forcing = extent(date(1990, 1, 1), date(2024, 5, 30));
        let req = PeriodRequest {
            forecast_days: Some(5),
            ..request()
        };
        let period = resolve_run_period(dir.path(), midnight(date(1981, 1, 1)), &forcing, &req).unwrap();
        assert_eq!(period.end, midnight(date(2024, 6, 6)));

        let req = PeriodRequest {
            overwrite_end_date: Some(date(2025, 1, 1)),
            ..request()
        };
        let err = resolve_run_period(dir.path(), midnight(date(1981, 1, 1)), &forcing, &req).unwrap_err();
        assert!(matches!(err, LakeError::Configuration(_)));

        let req = PeriodRequest {
            overwrite_start_date: Some(date(2000, 1, 1)),
            overwrite_end_date: Some(date(1999, 1, 1)),
            ..request()
        };
        let err = resolve_run_period(dir.path(), midnight(date(1981, 1, 1)), &forcing, &req).unwrap_err();
        assert!(matches!(err, LakeError::Validation(_)));
    }
}
