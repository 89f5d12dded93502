//! Meteorological forcing: one quantity pipeline per variable, then derived
//! wind components, rain in m/h and cloud cover from radiation.

use crate::files::ForcingTable;
use crate::geometry::air_pressure;
use chrono::{Datelike, NaiveDateTime, Timelike};
use lake_qc::climatology::HistoryMode;
use lake_qc::gaps::{default_tolerance, detect_gaps};
use lake_qc::reconcile::Fallback;
use lake_qc::{Quantity, QuantityPipeline, ReconciliationContext};
use lake_series::source::{ObservationSource, StationMetadata};
use lake_series::time_series::mean;
use lake_series::{LakeError, Result, TimeSeries};
use lake_utils::dates::{from_model_time, round_to_hour, to_model_time};
use log::info;
use std::collections::BTreeMap;
use std::f64::consts::PI;

/// Air temperature lapse rate (K/m).
pub const LAPSE_RATE: f64 = -0.0065;

/// Hours in the centred rolling window used for cloud cover.
const CLOUD_WINDOW: usize = 24;

/// Everything needed to build the forcing of one site.
pub struct ForcingInputs<'a> {
    pub source: &'a dyn ObservationSource,
    /// Forcing stations in priority order.
    pub stations: &'a [StationMetadata],
    /// Lake elevation (m a.s.l.).
    pub elevation: f64,
    pub latitude: f64,
    pub longitude: f64,
    pub reference: NaiveDateTime,
    /// Hourly grid covering the run period.
    pub grid: &'a [NaiveDateTime],
    pub mode: HistoryMode,
    /// Forcing produced by the previous run, for continuation fills.
    pub prior: Option<&'a ForcingTable>,
}

/// Correct station air temperature to lake altitude.
pub fn adjust_for_altitude(series: &TimeSeries, station_elevation: f64, lake_elevation: f64) -> TimeSeries {
    let offset = LAPSE_RATE * (lake_elevation - station_elevation);
    series.map_values(|t| t + offset)
}

pub fn assemble_forcing(inputs: &ForcingInputs) -> Result<ForcingTable> {
    let (start, end) = match (inputs.grid.first(), inputs.grid.last()) {
        (Some(s), Some(e)) => (*s, *e),
        _ => return Err(LakeError::Validation("empty forcing grid".to_string())),
    };

    let mut processed: BTreeMap<Quantity, Vec<f64>> = BTreeMap::new();
    for quantity in Quantity::FORCING {
        let context = collect(inputs, quantity, start, end)?;
        let policy = quantity.policy();
        let series = QuantityPipeline::new(&policy, inputs.grid, inputs.mode).run(context)?;
        processed.insert(quantity, series.into_values());
    }
    let mut take = |q: Quantity| processed.remove(&q).unwrap_or_default();
    let speed = take(Quantity::WindSpeed);
    let direction = take(Quantity::WindDirection);
    let tair = take(Quantity::AirTemperature);
    let sol = take(Quantity::GlobalRadiation);
    let vap = take(Quantity::VapourPressure);
    let rain_mm = take(Quantity::Precipitation);

    info!("Processing wind from magnitude and direction to components");
    let (u, v) = wind_components(&speed, &direction)?;

    info!("Estimating cloud cover from measured and clear-sky radiation");
    let pressure = air_pressure(inputs.elevation);
    let cssr: Vec<f64> = inputs
        .grid
        .iter()
        .zip(vap.iter().zip(&tair))
        .map(|(t, (e, ta))| {
            clear_sky_radiation(t, inputs.latitude, inputs.longitude, pressure, *e, *ta)
        })
        .collect();
    let cloud = cloud_cover(&sol, &cssr);

    Ok(ForcingTable {
        time: inputs
            .grid
            .iter()
            .map(|t| to_model_time(t, &inputs.reference))
            .collect(),
        u,
        v,
        tair,
        sol,
        vap,
        cloud,
        rain: rain_mm.iter().map(|mm| mm * 0.001).collect(),
    })
}

/// Primary, fallbacks and prior history of one quantity.
fn collect(
    inputs: &ForcingInputs,
    quantity: Quantity,
    start: NaiveDateTime,
    end: NaiveDateTime,
) -> Result<ReconciliationContext> {
    let id = quantity.meteo_id().unwrap_or_default();
    let offering: Vec<&StationMetadata> = inputs
        .stations
        .iter()
        .filter(|s| s.extent(id).is_some())
        .collect();
    let (primary_station, others) = match offering.split_first() {
        Some((first, rest)) => (*first, rest),
        None => {
            return Err(LakeError::fetch(id, "any", "no forcing station offers this quantity"))
        }
    };

    let fetch = |station: &StationMetadata| -> Result<(TimeSeries, NaiveDateTime, NaiveDateTime)> {
        let extent = station
            .extent(id)
            .ok_or_else(|| LakeError::fetch(id, &station.source_id, "quantity not recorded"))?;
        let from = start.max(extent.start);
        let to = end.min(extent.end);
        let series = inputs
            .source
            .fetch(id, &station.source_id, from.date(), to.date())?;
        let series = if quantity == Quantity::AirTemperature {
            adjust_for_altitude(&series, station.elevation, inputs.elevation)
        } else {
            series
        };
        Ok((series, from, to))
    };

    info!("{}: using data from station {}", id, primary_station.source_id);
    let (primary, _, _) = fetch(primary_station)?;

    let gaps = detect_gaps(&primary.observed_times(), start, end, default_tolerance());
    let fallbacks = if gaps.is_empty() {
        Vec::new()
    } else {
        others
            .iter()
            .map(|station| {
                let fetched = fetch(station);
                let (valid_from, valid_to) = match &fetched {
                    Ok((_, from, to)) => (*from, *to),
                    Err(_) => (start, end),
                };
                Fallback {
                    source_id: station.source_id.clone(),
                    valid_from,
                    valid_to,
                    series: fetched.map(|(series, _, _)| series),
                }
            })
            .collect()
    };

    let prior = inputs
        .prior
        .map(|table| prior_series(table, quantity, &inputs.reference));
    Ok(ReconciliationContext::new(id, primary)
        .with_fallbacks(fallbacks)
        .with_prior(prior))
}

/// Recover a raw quantity from a previously written forcing table.
fn prior_series(table: &ForcingTable, quantity: Quantity, reference: &NaiveDateTime) -> TimeSeries {
    let times = table
        .time
        .iter()
        .map(|d| round_to_hour(&from_model_time(*d, reference)));
    let values: Vec<f64> = match quantity {
        Quantity::WindSpeed => table.u.iter().zip(&table.v).map(|(u, v)| u.hypot(*v)).collect(),
        Quantity::WindDirection => table
            .u
            .iter()
            .zip(&table.v)
            .map(|(u, v)| ((-u).atan2(-v).to_degrees() + 360.0) % 360.0)
            .collect(),
        Quantity::AirTemperature => table.tair.clone(),
        Quantity::GlobalRadiation => table.sol.clone(),
        Quantity::VapourPressure => table.vap.clone(),
        Quantity::Precipitation => table.rain.iter().map(|m| m * 1000.0).collect(),
        _ => vec![f64::NAN; table.time.len()],
    };
    TimeSeries::from_pairs(times.zip(values))
}

/// Circular mean of the present directions (degrees).
pub fn circular_mean(directions: &[f64]) -> Option<f64> {
    let radians: Vec<f64> = directions
        .iter()
        .filter(|d| d.is_finite())
        .map(|d| d.to_radians())
        .collect();
    let sin = mean(&radians.iter().map(|r| r.sin()).collect::<Vec<_>>())?;
    let cos = mean(&radians.iter().map(|r| r.cos()).collect::<Vec<_>>())?;
    Some((sin.atan2(cos).to_degrees() + 360.0) % 360.0)
}

/// Wind components from speed and the direction the wind blows from.
///
/// Missing directions take the circular mean direction.
pub fn wind_components(speed: &[f64], direction: &[f64]) -> Result<(Vec<f64>, Vec<f64>)> {
    let fallback = circular_mean(direction)
        .ok_or_else(|| LakeError::Validation("no wind direction observations".to_string()))?;
    let (u, v) = speed
        .iter()
        .zip(direction)
        .map(|(w, d)| {
            let d = if d.is_finite() { *d } else { fallback };
            let rad = d * PI / 180.0;
            (-w * rad.sin(), -w * rad.cos())
        })
        .unzip();
    Ok((u, v))
}

/// Clear-sky shortwave radiation (W/m2) at the surface.
///
/// Solar geometry from declination, equation of time and hour angle (UTC
/// timestamps); transmittances for Rayleigh scattering and permanent gases,
/// water vapour (precipitable water from vapour pressure and air temperature)
/// and aerosols as in Meyers and Dale (1983).
pub fn clear_sky_radiation(
    time: &NaiveDateTime,
    latitude: f64,
    longitude: f64,
    pressure: f64,
    vapour_pressure: f64,
    air_temperature: f64,
) -> f64 {
    let doy = time.ordinal() as f64;
    let hours = time.hour() as f64 + time.minute() as f64 / 60.0;

    let declination = (23.45 * (2.0 * PI * (284.0 + doy) / 365.0).sin()).to_radians();
    let b = 2.0 * PI * (doy - 81.0) / 364.0;
    let equation_of_time = 9.87 * (2.0 * b).sin() - 7.53 * b.cos() - 1.5 * b.sin();
    let solar_time = hours + longitude / 15.0 + equation_of_time / 60.0;
    let hour_angle = (15.0 * (solar_time - 12.0)).to_radians();
    let phi = latitude.to_radians();
    let cos_zenith = phi.sin() * declination.sin() + phi.cos() * declination.cos() * hour_angle.cos();
    if cos_zenith <= 0.0 {
        return 0.0;
    }

    let extraterrestrial = 1361.0 * (1.0 + 0.034 * (2.0 * PI * doy / 365.0).cos());
    let air_mass = 35.0 / (1224.0 * cos_zenith * cos_zenith + 1.0).sqrt();
    let rayleigh_gas = 1.021 - 0.084 * (air_mass * (949e-6 * pressure + 0.051)).sqrt();
    let vapour = if vapour_pressure.is_finite() && vapour_pressure > 0.0 {
        vapour_pressure
    } else {
        10.0
    };
    let kelvin = if air_temperature.is_finite() {
        air_temperature + 273.15
    } else {
        283.15
    };
    let precipitable_water = 46.5 * vapour / kelvin;
    let water = 1.0 - 0.077 * (precipitable_water * air_mass).powf(0.3);
    let aerosol = 0.935_f64.powf(air_mass);
    (extraterrestrial * cos_zenith * rayleigh_gas * water * aerosol).max(0.0)
}

/// Centred rolling mean; edges use the part of the window inside the series.
pub fn rolling_mean(values: &[f64], window: usize) -> Vec<f64> {
    let n = values.len();
    let before = window / 2;
    let after = window.saturating_sub(before + 1);
    (0..n)
        .map(|i| {
            let lo = i.saturating_sub(before);
            let hi = (i + after).min(n.saturating_sub(1));
            mean(&values[lo..=hi]).unwrap_or(f64::NAN)
        })
        .collect()
}

/// Cloud cover `1 - clamp(swr_24h / cssr_24h, 0, 1)`.
///
/// Where the clear-sky mean is zero the previous cloud value is carried
/// forward, starting from 0.5.
pub fn cloud_cover(measured: &[f64], clear_sky: &[f64]) -> Vec<f64> {
    let swr = rolling_mean(measured, CLOUD_WINDOW);
    let cssr = rolling_mean(clear_sky, CLOUD_WINDOW);
    let mut last = 0.5;
    swr.iter()
        .zip(&cssr)
        .map(|(s, c)| {
            if *c > 0.0 && s.is_finite() {
                last = 1.0 - (s / c).clamp(0.0, 1.0);
            }
            last
        })
        .collect()
}
