//! Run configuration: a JSON arguments file plus `key=value` overrides.

use chrono::NaiveDate;
use lake_pipeline::control::SUPPORTED_VERSIONS;
use lake_pipeline::PipelineOptions;
use lake_series::{LakeError, Result};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fs;
use std::path::{Path, PathBuf};

/// Every option of a run. Missing keys take their defaults.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RunConfig {
    /// Site keys to run; empty runs the whole catalogue.
    pub lakes: Vec<String>,
    pub simulation_dir: PathBuf,
    pub simstrat_version: String,
    pub couple_aed2: bool,
    pub forecast: bool,
    pub max_workers: usize,
    pub snapshot: bool,
    #[serde(with = "compact_date")]
    pub snapshot_date: Option<NaiveDate>,
    pub data_api: String,
    /// Write a log file per site.
    pub log: bool,
    pub run: bool,
    pub post_process: bool,
    pub upload: bool,
    /// Stop at the first failing site.
    pub debug: bool,
    pub overwrite_simulation: bool,
    #[serde(with = "compact_date")]
    pub overwrite_start_date: Option<NaiveDate>,
    #[serde(with = "compact_date")]
    pub overwrite_end_date: Option<NaiveDate>,
    pub docker_image: String,
    pub control_template_dir: PathBuf,
    /// Site catalogue (`lake_parameters.json`).
    pub lake_parameters: PathBuf,
}

impl Default for RunConfig {
    fn default() -> Self {
        RunConfig {
            lakes: Vec::new(),
            simulation_dir: PathBuf::from("runs"),
            simstrat_version: "3.0.4".to_string(),
            couple_aed2: true,
            forecast: true,
            max_workers: 5,
            snapshot: true,
            snapshot_date: None,
            data_api: "http://localhost:8000".to_string(),
            log: true,
            run: true,
            post_process: true,
            upload: false,
            debug: false,
            overwrite_simulation: false,
            overwrite_start_date: None,
            overwrite_end_date: None,
            docker_image: "eawag/simstrat:3.0.4".to_string(),
            control_template_dir: PathBuf::from("par"),
            lake_parameters: PathBuf::from("static/lake_parameters.json"),
        }
    }
}

/// `YYYYMMDD` strings for optional dates; `false` and `null` mean unset.
mod compact_date {
    use chrono::NaiveDate;
    use lake_utils::dates::{format_date_compact, parse_date_compact};
    use serde::{Deserialize, Deserializer, Serializer};
    use serde_json::Value;

    pub fn serialize<S: Serializer>(date: &Option<NaiveDate>, serializer: S) -> Result<S::Ok, S::Error> {
        match date {
            Some(date) => serializer.serialize_str(&format_date_compact(date)),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<NaiveDate>, D::Error> {
        match Value::deserialize(deserializer)? {
            Value::Null | Value::Bool(false) => Ok(None),
            Value::String(raw) => parse_date_compact(&raw)
                .map(Some)
                .map_err(serde::de::Error::custom),
            Value::Number(n) => parse_date_compact(&n.to_string())
                .map(Some)
                .map_err(serde::de::Error::custom),
            other => Err(serde::de::Error::custom(format!("expected a YYYYMMDD date, got {other}"))),
        }
    }
}

fn configuration(message: impl ToString) -> LakeError {
    LakeError::Configuration(message.to_string())
}

/// Split `key=value` arguments.
pub fn parse_overrides(arguments: &[String]) -> Result<Vec<(String, String)>> {
    arguments
        .iter()
        .map(|argument| match argument.split_once('=') {
            Some((key, value)) if !key.trim().is_empty() => {
                Ok((key.trim().to_string(), value.trim().to_string()))
            }
            _ => Err(configuration(format!(
                "argument {argument:?} is not in key=value format"
            ))),
        })
        .collect()
}

/// Interpret an override value against the type of the field it replaces.
fn override_value(key: &str, current: &Value, raw: &str) -> Result<Value> {
    match current {
        Value::Bool(_) => match raw.to_lowercase().as_str() {
            "true" => Ok(Value::Bool(true)),
            "false" => Ok(Value::Bool(false)),
            _ => Err(configuration(format!("{key} must be true or false, got {raw:?}"))),
        },
        Value::Number(_) => raw
            .parse::<u64>()
            .map(Value::from)
            .map_err(|_| configuration(format!("{key} must be a non-negative integer, got {raw:?}"))),
        Value::Array(_) => Ok(Value::Array(
            raw.split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(|s| Value::String(s.to_string()))
                .collect(),
        )),
        _ if raw.eq_ignore_ascii_case("false") => Ok(Value::Null),
        _ => Ok(Value::String(raw.to_string())),
    }
}

impl RunConfig {
    /// Parse an arguments file body.
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(|e| configuration(format!("invalid arguments file: {e}")))
    }

    pub fn load(path: &Path) -> Result<Self> {
        let body = fs::read_to_string(path)
            .map_err(|e| configuration(format!("cannot read arguments file {}: {e}", path.display())))?;
        Self::from_json(&body)
    }

    /// Apply `key=value` overrides, type-checked against each field.
    pub fn apply_overrides(&mut self, overrides: &[(String, String)]) -> Result<()> {
        let mut fields: Map<String, Value> = match serde_json::to_value(&*self)? {
            Value::Object(fields) => fields,
            _ => return Err(configuration("run configuration is not an object")),
        };
        for (key, raw) in overrides {
            let current = fields
                .get(key)
                .ok_or_else(|| configuration(format!("unknown argument {key}")))?;
            let value = override_value(key, current, raw)?;
            fields.insert(key.clone(), value);
        }
        *self = serde_json::from_value(Value::Object(fields))
            .map_err(|e| configuration(format!("invalid override: {e}")))?;
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_workers == 0 {
            return Err(configuration("max_workers must be at least 1"));
        }
        if !SUPPORTED_VERSIONS.contains(&self.simstrat_version.as_str()) {
            return Err(configuration(format!(
                "simstrat_version {} is not supported ({})",
                self.simstrat_version,
                SUPPORTED_VERSIONS.join(", ")
            )));
        }
        if let (Some(start), Some(end)) = (self.overwrite_start_date, self.overwrite_end_date) {
            if start >= end {
                return Err(configuration(format!(
                    "overwrite_start_date {start} must be before overwrite_end_date {end}"
                )));
            }
        }
        if self.run && self.docker_image.trim().is_empty() {
            return Err(configuration("docker_image is required to run simulations"));
        }
        Ok(())
    }

    /// Per-site pipeline options for a run started on `today`.
    pub fn pipeline_options(&self, today: NaiveDate) -> PipelineOptions {
        PipelineOptions {
            simulation_dir: self.simulation_dir.clone(),
            control_template_dir: self.control_template_dir.clone(),
            simstrat_version: self.simstrat_version.clone(),
            couple_aed2: self.couple_aed2,
            snapshot: self.snapshot && self.overwrite_start_date.is_none(),
            snapshot_date: self.snapshot_date,
            overwrite_start_date: self.overwrite_start_date,
            overwrite_end_date: self.overwrite_end_date,
            forecast: self.forecast,
            overwrite_simulation: self.overwrite_simulation,
            run: self.run,
            post_process: self.post_process,
            upload: self.upload,
            today,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn overrides(args: &[&str]) -> Vec<(String, String)> {
        parse_overrides(&args.iter().map(|s| s.to_string()).collect::<Vec<_>>()).unwrap()
    }

    #[test]
    fn test_defaults_fill_missing_keys() {
        let config = RunConfig::from_json(r#"{"lakes": ["upper"], "max_workers": 2}"#).unwrap();
        assert_eq!(config.lakes, vec!["upper"]);
        assert_eq!(config.max_workers, 2);
        assert_eq!(config.simstrat_version, "3.0.4");
        assert!(config.snapshot);
        assert!(config.snapshot_date.is_none());
        config.validate().unwrap();
    }

    #[test]
    fn test_dates_accept_false_and_compact() {
        let config = RunConfig::from_json(
            r#"{"snapshot_date": false, "overwrite_start_date": "20230101", "overwrite_end_date": 20230201}"#,
        )
        .unwrap();
        assert!(config.snapshot_date.is_none());
        assert_eq!(config.overwrite_start_date, NaiveDate::from_ymd_opt(2023, 1, 1));
        assert_eq!(config.overwrite_end_date, NaiveDate::from_ymd_opt(2023, 2, 1));
        assert!(RunConfig::from_json(r#"{"snapshot_date": "2023-01-01"}"#).is_err());
    }

    #[test]
    fn test_unknown_key_in_file_is_rejected() {
        assert!(matches!(
            RunConfig::from_json(r#"{"max_wrokers": 2}"#),
            Err(LakeError::Configuration(_))
        ));
    }

    #[test]
    fn test_overrides_are_typed() {
        let mut config = RunConfig::default();
        config
            .apply_overrides(&overrides(&[
                "lakes=upper, lower",
                "debug=TRUE",
                "max_workers=3",
                "snapshot_date=20240105",
                "simulation_dir=/tmp/runs",
            ]))
            .unwrap();
        assert_eq!(config.lakes, vec!["upper", "lower"]);
        assert!(config.debug);
        assert_eq!(config.max_workers, 3);
        assert_eq!(config.snapshot_date, NaiveDate::from_ymd_opt(2024, 1, 5));
        assert_eq!(config.simulation_dir, PathBuf::from("/tmp/runs"));

        config.apply_overrides(&overrides(&["snapshot_date=false"])).unwrap();
        assert!(config.snapshot_date.is_none());
    }

    #[test]
    fn test_bad_overrides() {
        let mut config = RunConfig::default();
        for bad in ["debug=yes", "max_workers=-1", "colour=blue", "snapshot_date=tomorrow"] {
            assert!(
                matches!(config.apply_overrides(&overrides(&[bad])), Err(LakeError::Configuration(_))),
                "{bad}"
            );
        }
        assert!(parse_overrides(&["no-equals".to_string()]).is_err());
        assert_eq!(config, RunConfig::default());
    }

    #[test]
    fn test_validate() {
        let mut config = RunConfig::default();
        config.max_workers = 0;
        assert!(config.validate().is_err());

        let mut config = RunConfig::default();
        config.simstrat_version = "2.4".to_string();
        assert!(config.validate().is_err());

        let mut config = RunConfig::default();
        config.overwrite_start_date = NaiveDate::from_ymd_opt(2023, 2, 1);
        config.overwrite_end_date = NaiveDate::from_ymd_opt(2023, 1, 1);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_overwrite_start_disables_snapshot() {
        let mut config = RunConfig::default();
        config.overwrite_start_date = NaiveDate::from_ymd_opt(2023, 1, 1);
        let today = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();
        let options = config.pipeline_options(today);
        assert!(!options.snapshot);
        assert_eq!(options.today, today);
    }
}
