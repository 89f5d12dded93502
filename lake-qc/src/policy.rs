//! Per-quantity quality-control policy.

use chrono::TimeDelta;
use lake_series::{LakeError, Result};

/// How remaining long gaps are filled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FillMode {
    /// Leave missing.
    None,
    /// Scalar mean of the history.
    Mean,
    /// Day-of-year climatology of the history.
    DayOfYear,
}

/// Physical quantities handled by the forcing and inflow pipelines.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Quantity {
    WindSpeed,
    WindDirection,
    AirTemperature,
    GlobalRadiation,
    VapourPressure,
    Precipitation,
    Discharge,
    WaterTemperature,
    Salinity,
}

impl Quantity {
    /// Meteorological quantities a site needs to build its forcing.
    pub const FORCING: [Quantity; 6] = [
        Quantity::WindSpeed,
        Quantity::WindDirection,
        Quantity::Precipitation,
        Quantity::AirTemperature,
        Quantity::GlobalRadiation,
        Quantity::VapourPressure,
    ];

    pub const ALL: [Quantity; 9] = [
        Quantity::WindSpeed,
        Quantity::WindDirection,
        Quantity::AirTemperature,
        Quantity::GlobalRadiation,
        Quantity::VapourPressure,
        Quantity::Precipitation,
        Quantity::Discharge,
        Quantity::WaterTemperature,
        Quantity::Salinity,
    ];

    /// Parameter id used by the meteorological station API.
    pub fn meteo_id(&self) -> Option<&'static str> {
        match self {
            Quantity::WindSpeed => Some("fkl010h0"),
            Quantity::WindDirection => Some("dkl010h0"),
            Quantity::Precipitation => Some("rre150h0"),
            Quantity::AirTemperature => Some("tre200h0"),
            Quantity::GlobalRadiation => Some("gre000h0"),
            Quantity::VapourPressure => Some("pva200h0"),
            _ => None,
        }
    }

    pub fn policy(&self) -> QuantityPolicy {
        QuantityPolicy::for_quantity(*self)
    }
}

/// Immutable QC configuration for one quantity, shared by every site.
#[derive(Debug, Clone, PartialEq)]
pub struct QuantityPolicy {
    pub quantity: Quantity,
    pub unit: &'static str,
    /// Negative readings become zero before range checks.
    pub negative_to_zero: bool,
    /// Readings outside `[min, max]` become missing.
    pub bounds: Option<(f64, f64)>,
    /// Longest stretch (between present values) filled by interpolation.
    pub max_interpolate_gap: TimeDelta,
    pub fill: FillMode,
}

impl QuantityPolicy {
    pub fn for_quantity(quantity: Quantity) -> QuantityPolicy {
        let (unit, negative_to_zero, bounds, max_interpolate_gap, fill) = match quantity {
            Quantity::WindSpeed => ("m/s", false, Some((0.0, 20.0)), TimeDelta::hours(6), FillMode::DayOfYear),
            Quantity::WindDirection => ("°", false, Some((0.0, 360.0)), TimeDelta::hours(6), FillMode::None),
            Quantity::AirTemperature => ("°C", false, Some((-42.0, 42.0)), TimeDelta::days(2), FillMode::DayOfYear),
            Quantity::GlobalRadiation => ("W/m2", true, Some((0.0, 1000.0)), TimeDelta::hours(3), FillMode::DayOfYear),
            Quantity::VapourPressure => ("mbar", false, Some((1.0, 70.0)), TimeDelta::days(2), FillMode::DayOfYear),
            Quantity::Precipitation => ("mm/h", true, None, TimeDelta::hours(6), FillMode::DayOfYear),
            Quantity::Discharge => ("m3/s", true, None, TimeDelta::days(2), FillMode::DayOfYear),
            Quantity::WaterTemperature => ("°C", false, Some((0.0, 35.0)), TimeDelta::days(2), FillMode::DayOfYear),
            Quantity::Salinity => ("ppt", true, Some((0.0, 5.0)), TimeDelta::days(2), FillMode::Mean),
        };
        QuantityPolicy {
            quantity,
            unit,
            negative_to_zero,
            bounds,
            max_interpolate_gap,
            fill,
        }
    }

    /// Check the policy is internally consistent.
    pub fn validate(&self) -> Result<()> {
        if let Some((min, max)) = self.bounds {
            if !(min <= max) {
                return Err(LakeError::Configuration(format!(
                    "{:?}: lower bound {} exceeds upper bound {}",
                    self.quantity, min, max
                )));
            }
        }
        if self.max_interpolate_gap < TimeDelta::zero() {
            return Err(LakeError::Configuration(format!(
                "{:?}: negative interpolation gap",
                self.quantity
            )));
        }
        Ok(())
    }

    /// Validate the policy of every known quantity.
    pub fn validate_all() -> Result<()> {
        Quantity::ALL.iter().try_for_each(|q| q.policy().validate())
    }

    /// Apply the negative-to-zero clamp and the range check in place.
    pub fn clamp(&self, values: &mut [f64]) {
        for v in values.iter_mut() {
            if v.is_nan() {
                continue;
            }
            if self.negative_to_zero && *v < 0.0 {
                *v = 0.0;
            }
            if let Some((min, max)) = self.bounds {
                if *v < min || *v > max {
                    *v = f64::NAN;
                }
            }
        }
    }
}
