//! Simulation control file, built from a versioned JSON template.

use crate::files::CONTROL_FILE;
use crate::geometry::air_pressure;
use crate::params::SiteParameters;
use crate::period::RunPeriod;
use chrono::{Datelike, TimeDelta};
use lake_series::{LakeError, Result};
use lake_utils::dates::to_model_time;
use log::info;
use serde::Serialize;
use serde_json::ser::PrettyFormatter;
use serde_json::{Map, Value};
use std::fs;
use std::path::{Path, PathBuf};

/// Model versions a control template is known for.
pub const SUPPORTED_VERSIONS: [&str; 2] = ["3.0.3", "3.0.4"];

/// Run-specific values written into the template.
#[derive(Debug, Clone)]
pub struct ControlSettings<'a> {
    pub site: &'a SiteParameters,
    pub period: &'a RunPeriod,
    pub grid_cells: u32,
    pub inflow_mode: u8,
    pub couple_aed2: bool,
}

pub fn template_path(template_dir: &Path, version: &str) -> PathBuf {
    template_dir.join(format!("simstrat_{version}.par"))
}

fn section<'a>(par: &'a mut Value, name: &str) -> Result<&'a mut Map<String, Value>> {
    par.get_mut(name)
        .and_then(Value::as_object_mut)
        .ok_or_else(|| LakeError::Configuration(format!("control template has no {name} section")))
}

/// Fill a parsed template with the settings of one run.
pub fn build_control(mut par: Value, settings: &ControlSettings) -> Result<Value> {
    let site = settings.site;
    let reference = site.reference_time();

    let input = section(&mut par, "Input")?;
    input.insert("Grid".into(), settings.grid_cells.into());

    let config = section(&mut par, "ModelConfig")?;
    config.insert("InflowMode".into(), settings.inflow_mode.into());
    config.insert("CoupleAED2".into(), settings.couple_aed2.into());

    let simulation = section(&mut par, "Simulation")?;
    let start = settings.period.start + TimeDelta::hours(1);
    let end = settings.period.end - TimeDelta::hours(1);
    simulation.insert("Start d".into(), to_model_time(&start, &reference).into());
    simulation.insert("End d".into(), to_model_time(&end, &reference).into());
    simulation.insert(
        "Continue from last snapshot".into(),
        settings.period.is_continuation().into(),
    );
    simulation.insert("Reference year".into(), site.reference_date.year().into());

    let parameters = section(&mut par, "ModelParameters")?;
    parameters.insert("lat".into(), site.latitude.into());
    parameters.insert("p_air".into(), air_pressure(site.elevation).into());
    // a_seiche keeps its template value unless calibrated; there is no
    // estimate from surface area.
    for (key, value) in &site.model_parameters {
        if let Some(slot) = parameters.get_mut(key) {
            info!("Overwriting default {} value with calibrated value: {}", key, value);
            *slot = value.clone();
        }
    }
    Ok(par)
}

/// Build the control file of one run and write it to `dir`.
pub fn write_control(template_dir: &Path, version: &str, dir: &Path, settings: &ControlSettings) -> Result<()> {
    if !SUPPORTED_VERSIONS.contains(&version) {
        return Err(LakeError::Configuration(format!(
            "control file creation not implemented for model version {version}"
        )));
    }
    let path = template_path(template_dir, version);
    if !path.exists() {
        return Err(LakeError::Configuration(format!(
            "unable to locate control template {}",
            path.display()
        )));
    }
    let template: Value = serde_json::from_str(&fs::read_to_string(&path)?)?;
    let par = build_control(template, settings)?;

    let mut buffer = Vec::new();
    let mut serializer = serde_json::Serializer::with_formatter(&mut buffer, PrettyFormatter::with_indent(b"    "));
    par.serialize(&mut serializer)?;
    fs::write(dir.join(CONTROL_FILE), buffer)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::params::tests::CATALOGUE;
    use chrono::NaiveDate;
    use lake_utils::dates::midnight;
    use tempfile::tempdir;

    const TEMPLATE: &str = r#"{
        "Input": {"Grid": 0, "Forcing": "Forcing.dat"},
        "ModelConfig": {"InflowMode": 0, "CoupleAED2": false},
        "Simulation": {"Start d": 0, "End d": 0, "Continue from last snapshot": false, "Reference year": 1981},
        "ModelParameters": {"lat": 0, "p_air": 1000, "f_wind": 1.0, "a_seiche": 0.001}
    }"#;

    fn period(snapshot: bool) -> RunPeriod {
        let day = |d| NaiveDate::from_ymd_opt(2023, 1, d).unwrap();
        RunPeriod {
            start: midnight(day(1)),
            end: midnight(day(11)),
            snapshot: snapshot.then(|| day(1)),
        }
    }

    #[test]
    fn test_build_control() {
        let sites = SiteParameters::parse_catalogue(CATALOGUE).unwrap();
        let lower = &sites[1];
        let period = period(true);
        let settings = ControlSettings {
            site: lower,
            period: &period,
            grid_cells: 96,
            inflow_mode: 2,
            couple_aed2: false,
        };
        let par = build_control(serde_json::from_str(TEMPLATE).unwrap(), &settings).unwrap();
        assert_eq!(par["Input"]["Grid"], 96);
        assert_eq!(par["Input"]["Forcing"], "Forcing.dat");
        assert_eq!(par["ModelConfig"]["InflowMode"], 2);
        assert_eq!(par["Simulation"]["Reference year"], 1990);
        assert_eq!(par["Simulation"]["Continue from last snapshot"], true);
        let start = par["Simulation"]["Start d"].as_f64().unwrap();
        let end = par["Simulation"]["End d"].as_f64().unwrap();
        let reference = midnight(NaiveDate::from_ymd_opt(1990, 1, 1).unwrap());
        let expected_start = to_model_time(&(period.start + TimeDelta::hours(1)), &reference);
        assert!((start - expected_start).abs() < 1e-9);
        assert!((end - start - (10.0 - 2.0 / 24.0)).abs() < 1e-9);
        assert_eq!(par["ModelParameters"]["lat"], 47.1);
        assert_eq!(par["ModelParameters"]["f_wind"], 1.3);
        assert_eq!(par["ModelParameters"]["a_seiche"], 0.001);
        let p_air = par["ModelParameters"]["p_air"].as_f64().unwrap();
        assert!((p_air - air_pressure(430.0)).abs() < 1e-9);
    }

    #[test]
    fn test_template_without_section() {
        let sites = SiteParameters::parse_catalogue(CATALOGUE).unwrap();
        let period = period(false);
        let settings = ControlSettings {
            site: &sites[0],
            period: &period,
            grid_cells: 60,
            inflow_mode: 0,
            couple_aed2: false,
        };
        let template = serde_json::json!({"Input": {}});
        assert!(matches!(
            build_control(template, &settings),
            Err(LakeError::Configuration(_))
        ));
    }

    #[test]
    fn test_write_control_versions() {
        let templates = tempdir().unwrap();
        let run = tempdir().unwrap();
        fs::write(template_path(templates.path(), "3.0.4"), TEMPLATE).unwrap();
        let sites = SiteParameters::parse_catalogue(CATALOGUE).unwrap();
        let period = period(false);
        let settings = ControlSettings {
            site: &sites[0],
            period: &period,
            grid_cells: 60,
            inflow_mode: 0,
            couple_aed2: true,
        };
        write_control(templates.path(), "3.0.4", run.path(), &settings).unwrap();
        let written: Value =
            serde_json::from_str(&fs::read_to_string(run.path().join(CONTROL_FILE)).unwrap()).unwrap();
        assert_eq!(written["ModelConfig"]["CoupleAED2"], true);
        assert_eq!(written["Simulation"]["Continue from last snapshot"], false);

        // Supported but no template on disk
        assert!(matches!(
            write_control(templates.path(), "3.0.3", run.path(), &settings),
            Err(LakeError::Configuration(_))
        ));
        assert!(matches!(
            write_control(templates.path(), "2.1", run.path(), &settings),
            Err(LakeError::Configuration(_))
        ));
    }
}
