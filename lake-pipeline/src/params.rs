//! Site catalogue entries (`lake_parameters.json`).

use chrono::{NaiveDate, NaiveDateTime};
use lake_series::{LakeError, Result};
use lake_utils::dates::{midnight, parse_date_compact};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Map, Value};

/// A meteorological station providing forcing data, in priority order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForcingStation {
    pub id: String,
}

/// Hypsometric profile: lake area (m2) at each depth (m, positive down).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bathymetry {
    pub depth: Vec<f64>,
    pub area: Vec<f64>,
}

impl Bathymetry {
    /// Two-point profile from the surface area (km2) down to the maximum depth.
    pub fn two_point(surface_area: f64, max_depth: f64) -> Self {
        Bathymetry {
            depth: vec![0.0, max_depth],
            area: vec![surface_area * 1e6, 0.0],
        }
    }

    pub fn max_depth(&self) -> Option<f64> {
        self.depth
            .iter()
            .map(|d| d.abs())
            .fold(None, |acc: Option<f64>, d| Some(acc.map_or(d, |m| m.max(d))))
    }
}

/// One hydrological station quantity: station id and parameter id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StationQuantity {
    pub id: String,
    pub parameter: String,
}

/// A river or upstream lake feeding the site.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Inflow {
    /// River gauged at a hydrological station; salinity is optional.
    HydroStation {
        #[serde(rename = "Q")]
        discharge: StationQuantity,
        #[serde(rename = "T")]
        temperature: StationQuantity,
        #[serde(rename = "S", default)]
        salinity: Option<StationQuantity>,
    },
    /// Outflow of another simulated site.
    ModelOutflow {
        /// Key of the upstream site.
        id: String,
        /// Depth (m) over which the outflow enters the surface layer.
        #[serde(default = "default_surface_inflow_depth")]
        depth: f64,
    },
}

fn default_surface_inflow_depth() -> f64 {
    5.0
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForcingForecast {
    pub days: i64,
}

/// Static description of one site.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SiteParameters {
    pub key: String,
    #[serde(default)]
    pub name: String,
    /// m a.s.l.
    pub elevation: f64,
    /// km2
    pub surface_area: f64,
    pub trophic_state: String,
    pub latitude: f64,
    pub longitude: f64,
    pub forcing: Vec<ForcingStation>,
    #[serde(default)]
    pub bathymetry: Option<Bathymetry>,
    #[serde(default)]
    pub max_depth: Option<f64>,
    #[serde(default)]
    pub grid_resolution: Option<f64>,
    #[serde(default)]
    pub inflows: Vec<Inflow>,
    #[serde(default)]
    pub forcing_forecast: Option<ForcingForecast>,
    /// Light absorption coefficient (m-1) used instead of the trophic default.
    #[serde(default)]
    pub absorption: Option<f64>,
    #[serde(
        default = "default_reference_date",
        serialize_with = "serialize_compact",
        deserialize_with = "deserialize_compact"
    )]
    pub reference_date: NaiveDate,
    /// Model timestep (s).
    #[serde(default = "default_model_time_resolution")]
    pub model_time_resolution: i64,
    /// Output timestep (s); must be a multiple of the model timestep.
    #[serde(default = "default_output_time_resolution")]
    pub output_time_resolution: i64,
    /// Default salinity (ppt) for initial conditions and unmeasured inflows.
    #[serde(default = "default_salinity")]
    pub salinity: f64,
    /// Calibrated model parameters overriding the control template.
    #[serde(default)]
    pub model_parameters: Map<String, Value>,
}

fn default_reference_date() -> NaiveDate {
    NaiveDate::from_ymd_opt(1981, 1, 1).unwrap_or_default()
}

fn default_model_time_resolution() -> i64 {
    300
}

fn default_output_time_resolution() -> i64 {
    10800
}

fn default_salinity() -> f64 {
    0.15
}

fn serialize_compact<S: Serializer>(date: &NaiveDate, serializer: S) -> std::result::Result<S::Ok, S::Error> {
    serializer.serialize_str(&lake_utils::dates::format_date_compact(date))
}

fn deserialize_compact<'de, D: Deserializer<'de>>(deserializer: D) -> std::result::Result<NaiveDate, D::Error> {
    let raw = String::deserialize(deserializer)?;
    parse_date_compact(&raw).map_err(serde::de::Error::custom)
}

impl SiteParameters {
    /// Parse the whole catalogue.
    pub fn parse_catalogue(json: &str) -> Result<Vec<SiteParameters>> {
        let sites: Vec<SiteParameters> = serde_json::from_str(json)?;
        for site in &sites {
            site.validate()?;
        }
        Ok(sites)
    }

    /// Model reference epoch at midnight.
    pub fn reference_time(&self) -> NaiveDateTime {
        midnight(self.reference_date)
    }

    /// Keys of the sites whose outputs this site consumes.
    pub fn upstream_keys(&self) -> Vec<String> {
        self.inflows
            .iter()
            .filter_map(|inflow| match inflow {
                Inflow::ModelOutflow { id, .. } => Some(id.clone()),
                Inflow::HydroStation { .. } => None,
            })
            .collect()
    }

    pub fn validate(&self) -> Result<()> {
        let fail = |msg: String| Err(LakeError::Configuration(format!("{}: {}", self.key, msg)));
        if self.key.trim().is_empty() {
            return Err(LakeError::Configuration("site key must not be empty".to_string()));
        }
        if self.forcing.is_empty() {
            return fail("at least one forcing station is required".to_string());
        }
        if !(-90.0..=90.0).contains(&self.latitude) {
            return fail(format!("latitude {} out of range", self.latitude));
        }
        if self.model_time_resolution <= 0 || self.output_time_resolution <= 0 {
            return fail("time resolutions must be positive".to_string());
        }
        if let Some(resolution) = self.grid_resolution {
            if resolution <= 0.0 {
                return fail(format!("grid resolution {resolution} must be positive"));
            }
        }
        if let Some(bathymetry) = &self.bathymetry {
            if bathymetry.depth.len() != bathymetry.area.len() || bathymetry.depth.is_empty() {
                return fail("bathymetry depth and area must be non-empty and of equal length".to_string());
            }
        }
        if self.upstream_keys().iter().any(|k| *k == self.key) {
            return fail("a site cannot consume its own outflow".to_string());
        }
        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) const CATALOGUE: &str = r#"[
        {
            "key": "upper",
            "name": "Upper Lake",
            "elevation": 1200.0,
            "surface_area": 2.5,
            "trophic_state": "Oligotrophic",
            "latitude": 46.5,
            "longitude": 8.2,
            "max_depth": 30.0,
            "forcing": [{"id": "AAA"}, {"id": "BBB"}]
        },
        {
            "key": "lower",
            "name": "Lower Lake",
            "elevation": 430.0,
            "surface_area": 40.0,
            "trophic_state": "Eutrophic",
            "latitude": 47.1,
            "longitude": 8.4,
            "bathymetry": {"depth": [0, 10, 48], "area": [40000000, 30000000, 0]},
            "forcing": [{"id": "CCC"}],
            "reference_date": "19900101",
            "inflows": [
                {"type": "hydro_station", "Q": {"id": "2009", "parameter": "AbflussPneumatikunten"},
                 "T": {"id": "2009", "parameter": "Wassertemperatur"}},
                {"type": "model_outflow", "id": "upper"}
            ],
            "model_parameters": {"f_wind": 1.3}
        }
    ]"#;

    #[test]
    fn test_parse_catalogue_with_defaults() {
        let sites = SiteParameters::parse_catalogue(CATALOGUE).unwrap();
        assert_eq!(sites.len(), 2);
        let upper = &sites[0];
        assert_eq!(upper.reference_date, NaiveDate::from_ymd_opt(1981, 1, 1).unwrap());
        assert_eq!(upper.model_time_resolution, 300);
        assert_eq!(upper.output_time_resolution, 10800);
        assert_eq!(upper.salinity, 0.15);
        assert!(upper.inflows.is_empty());
        assert!(upper.upstream_keys().is_empty());

        let lower = &sites[1];
        assert_eq!(lower.reference_date, NaiveDate::from_ymd_opt(1990, 1, 1).unwrap());
        assert_eq!(lower.upstream_keys(), vec!["upper".to_string()]);
        assert_eq!(lower.bathymetry.as_ref().unwrap().max_depth(), Some(48.0));
        match &lower.inflows[0] {
            Inflow::HydroStation { salinity, discharge, .. } => {
                assert!(salinity.is_none());
                assert_eq!(discharge.id, "2009");
            }
            other => panic!("unexpected inflow {other:?}"),
        }
        assert!(matches!(lower.inflows[1], Inflow::ModelOutflow { depth, .. } if depth == 5.0));
    }

    #[test]
    fn test_missing_required_field_is_rejected() {
        let json = r#"[{"key": "x", "elevation": 1.0, "forcing": []}]"#;
        assert!(matches!(
            SiteParameters::parse_catalogue(json),
            Err(LakeError::JsonParse(_))
        ));
    }

    #[test]
    fn test_empty_forcing_is_configuration_error() {
        let mut site = SiteParameters::parse_catalogue(CATALOGUE).unwrap().remove(0);
        site.forcing.clear();
        assert!(matches!(site.validate(), Err(LakeError::Configuration(_))));
    }

    #[test]
    fn test_two_point_bathymetry() {
        let bathymetry = Bathymetry::two_point(2.5, 30.0);
        assert_eq!(bathymetry.area, vec![2.5e6, 0.0]);
        assert_eq!(bathymetry.max_depth(), Some(30.0));
    }
}
