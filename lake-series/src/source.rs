//! Observation source API.
//!
//! Sources answer two questions: which quantities a station records and over
//! which period (`metadata`), and the readings for one quantity over a date
//! window (`fetch`). The live implementation talks JSON over HTTP; the static
//! implementation serves pre-loaded series for offline replays.

use crate::error::{LakeError, Result};
use crate::time_series::TimeSeries;
use chrono::{NaiveDate, NaiveDateTime};
use lake_utils::dates::parse_timestamp;
use serde::Deserialize;
use serde_json::Value;
use std::collections::HashMap;

/// Date format used for API path parameters: "YYYYMMDD"
pub const PATH_DATE_FORMAT: &str = "%Y%m%d";

/// Availability of one quantity at one station.
#[derive(Debug, Clone, PartialEq)]
pub struct ParameterExtent {
    pub quantity_id: String,
    pub start: NaiveDateTime,
    pub end: NaiveDateTime,
}

/// Station description returned by the metadata endpoint.
#[derive(Debug, Clone, PartialEq)]
pub struct StationMetadata {
    pub source_id: String,
    /// Station elevation in m a.s.l.
    pub elevation: f64,
    pub parameters: Vec<ParameterExtent>,
}

impl StationMetadata {
    /// Extent of `quantity_id` at this station, if recorded.
    pub fn extent(&self, quantity_id: &str) -> Option<&ParameterExtent> {
        self.parameters.iter().find(|p| p.quantity_id == quantity_id)
    }
}

/// A provider of observational records.
pub trait ObservationSource: Send + Sync {
    /// Readings of `quantity_id` at `source_id` between `start` and `end`
    /// (inclusive, whole days).
    fn fetch(
        &self,
        quantity_id: &str,
        source_id: &str,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<TimeSeries>;

    /// Station elevation and per-quantity availability.
    fn metadata(&self, source_id: &str) -> Result<StationMetadata>;
}

#[derive(Debug, Deserialize)]
struct RawMetadata {
    #[serde(default)]
    elevation: f64,
    #[serde(default)]
    parameters: Vec<RawParameter>,
}

#[derive(Debug, Deserialize)]
struct RawParameter {
    id: String,
    start_date: String,
    end_date: String,
}

/// Parse a measurement body: `{"time": [...], "<quantity>": [...]}`.
///
/// The time key may be `time` or `Time`; the value key is the quantity id,
/// falling back to `values`. Nulls and non-numeric entries become missing.
pub fn parse_measurement_body(body: &str, quantity_id: &str, source_id: &str) -> Result<TimeSeries> {
    let json: Value = serde_json::from_str(body)?;
    let times = json
        .get("time")
        .or_else(|| json.get("Time"))
        .and_then(Value::as_array)
        .ok_or_else(|| LakeError::fetch(quantity_id, source_id, "response has no time array"))?;
    let values = json
        .get(quantity_id)
        .or_else(|| json.get("values"))
        .and_then(Value::as_array)
        .ok_or_else(|| LakeError::fetch(quantity_id, source_id, "response has no value array"))?;
    if times.len() != values.len() {
        return Err(LakeError::Validation(format!(
            "{} at {}: {} timestamps but {} values",
            quantity_id,
            source_id,
            times.len(),
            values.len()
        )));
    }
    let mut pairs = Vec::with_capacity(times.len());
    for (t, v) in times.iter().zip(values) {
        let raw = t
            .as_str()
            .ok_or_else(|| LakeError::fetch(quantity_id, source_id, "non-string timestamp"))?;
        let time = parse_timestamp(raw)
            .map_err(|e| LakeError::fetch(quantity_id, source_id, format!("bad timestamp {raw}: {e}")))?;
        pairs.push((time, coerce_numeric(v)));
    }
    Ok(TimeSeries::from_pairs(pairs))
}

fn coerce_numeric(value: &Value) -> f64 {
    match value {
        Value::Number(n) => n.as_f64().unwrap_or(f64::NAN),
        Value::String(s) => s.trim().parse().unwrap_or(f64::NAN),
        _ => f64::NAN,
    }
}

/// Parse a metadata body: `{"elevation": .., "parameters": [{id, start_date, end_date}]}`.
pub fn parse_metadata_body(body: &str, source_id: &str) -> Result<StationMetadata> {
    let raw: RawMetadata = serde_json::from_str(body)?;
    let mut parameters = Vec::with_capacity(raw.parameters.len());
    for p in raw.parameters {
        let start = parse_timestamp(&p.start_date)
            .map_err(|e| LakeError::fetch(&p.id, source_id, format!("bad start date: {e}")))?;
        let end = parse_timestamp(&p.end_date)
            .map_err(|e| LakeError::fetch(&p.id, source_id, format!("bad end date: {e}")))?;
        parameters.push(ParameterExtent {
            quantity_id: p.id,
            start,
            end,
        });
    }
    Ok(StationMetadata {
        source_id: source_id.to_string(),
        elevation: raw.elevation,
        parameters,
    })
}

/// Serves pre-loaded series and metadata, keyed by station and quantity.
#[derive(Debug, Default, Clone)]
pub struct StaticSource {
    series: HashMap<(String, String), TimeSeries>,
    metadata: HashMap<String, StationMetadata>,
}

impl StaticSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a series; the station's metadata extent is widened to cover it.
    pub fn insert(&mut self, source_id: &str, quantity_id: &str, series: TimeSeries) {
        if let (Some(start), Some(end)) = (series.first_time(), series.last_time()) {
            let meta = self
                .metadata
                .entry(source_id.to_string())
                .or_insert_with(|| StationMetadata {
                    source_id: source_id.to_string(),
                    elevation: 0.0,
                    parameters: Vec::new(),
                });
            match meta
                .parameters
                .iter_mut()
                .find(|p| p.quantity_id == quantity_id)
            {
                Some(extent) => {
                    extent.start = extent.start.min(start);
                    extent.end = extent.end.max(end);
                }
                None => meta.parameters.push(ParameterExtent {
                    quantity_id: quantity_id.to_string(),
                    start,
                    end,
                }),
            }
        }
        self.series
            .insert((source_id.to_string(), quantity_id.to_string()), series);
    }

    pub fn set_elevation(&mut self, source_id: &str, elevation: f64) {
        if let Some(meta) = self.metadata.get_mut(source_id) {
            meta.elevation = elevation;
        }
    }
}

impl ObservationSource for StaticSource {
    fn fetch(
        &self,
        quantity_id: &str,
        source_id: &str,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<TimeSeries> {
        let series = self
            .series
            .get(&(source_id.to_string(), quantity_id.to_string()))
            .ok_or_else(|| LakeError::fetch(quantity_id, source_id, "no such series"))?;
        let from = lake_utils::dates::midnight(start);
        let to = lake_utils::dates::midnight(end) + chrono::TimeDelta::days(1);
        Ok(TimeSeries::from_pairs(
            series.iter().filter(|(t, _)| *t >= from && *t < to),
        ))
    }

    fn metadata(&self, source_id: &str) -> Result<StationMetadata> {
        self.metadata
            .get(source_id)
            .cloned()
            .ok_or_else(|| LakeError::fetch("metadata", source_id, "unknown station"))
    }
}

/// Which family of endpoints a live source queries.
#[cfg(feature = "api")]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Network {
    /// Meteorological stations: `/meteoswiss/meteodata/...`
    Meteo,
    /// Hydrological stations: `/bafu/hydrodata/...`, resampled hourly
    Hydro,
}

/// Live observation source backed by the data API.
///
/// Requests use the blocking client, built per request so that a source can
/// be created and dropped from async code while fetches run on worker threads.
#[cfg(feature = "api")]
pub struct HttpSource {
    api: String,
    network: Network,
    timeout: std::time::Duration,
}

#[cfg(feature = "api")]
impl HttpSource {
    pub fn new(api: &str, network: Network) -> Result<Self> {
        if !(api.starts_with("http://") || api.starts_with("https://")) {
            return Err(LakeError::Configuration(format!(
                "data api {api:?} must be an http(s) URL"
            )));
        }
        Ok(HttpSource {
            api: api.trim_end_matches('/').to_string(),
            network,
            timeout: std::time::Duration::from_secs(120),
        })
    }

    fn client(&self) -> Result<reqwest::blocking::Client> {
        reqwest::blocking::Client::builder()
            .timeout(self.timeout)
            .build()
            .map_err(|e| LakeError::Configuration(format!("cannot build HTTP client: {e}")))
    }

    fn measured_url(&self, quantity_id: &str, source_id: &str, start: NaiveDate, end: NaiveDate) -> String {
        let start = start.format(PATH_DATE_FORMAT);
        let end = end.format(PATH_DATE_FORMAT);
        match self.network {
            Network::Meteo => format!(
                "{}/meteoswiss/meteodata/measured/{}/{}/{}/{}",
                self.api, source_id, quantity_id, start, end
            ),
            Network::Hydro => format!(
                "{}/bafu/hydrodata/measured/{}/{}/{}/{}?resample=hourly",
                self.api, source_id, quantity_id, start, end
            ),
        }
    }

    fn metadata_url(&self, source_id: &str) -> String {
        match self.network {
            Network::Meteo => format!("{}/meteoswiss/meteodata/metadata/{}", self.api, source_id),
            Network::Hydro => format!("{}/bafu/hydrodata/metadata/{}", self.api, source_id),
        }
    }

    fn get_body(&self, url: &str, quantity_id: &str, source_id: &str) -> Result<String> {
        log::debug!("GET {}", url);
        let response = self
            .client()?
            .get(url)
            .send()
            .map_err(|e| LakeError::fetch(quantity_id, source_id, e))?;
        let status = response.status();
        if !status.is_success() {
            return Err(LakeError::fetch(
                quantity_id,
                source_id,
                format!("bad response {} from {}", status, url),
            ));
        }
        response
            .text()
            .map_err(|e| LakeError::fetch(quantity_id, source_id, e))
    }
}

#[cfg(feature = "api")]
impl ObservationSource for HttpSource {
    fn fetch(
        &self,
        quantity_id: &str,
        source_id: &str,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<TimeSeries> {
        let url = self.measured_url(quantity_id, source_id, start, end);
        let body = self.get_body(&url, quantity_id, source_id)?;
        parse_measurement_body(&body, quantity_id, source_id)
    }

    fn metadata(&self, source_id: &str) -> Result<StationMetadata> {
        let url = self.metadata_url(source_id);
        let body = self.get_body(&url, "metadata", source_id)?;
        parse_metadata_body(&body, source_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeDelta;

    const MEASURED: &str = r#"{
        "time": ["2024-01-01T00:00:00+00:00", "2024-01-01T01:00:00+00:00", "2024-01-01T02:00:00+00:00"],
        "tre200h0": [1.5, null, "2.5"]
    }"#;

    const METADATA: &str = r#"{
        "elevation": 1120.0,
        "parameters": [
            {"id": "tre200h0", "start_date": "1981-01-01T00:00:00+0000", "end_date": "2024-06-01T00:00:00+0000"}
        ]
    }"#;

    #[test]
    fn test_parse_measurement_body() {
        let series = parse_measurement_body(MEASURED, "tre200h0", "PIL").unwrap();
        assert_eq!(series.len(), 3);
        assert_eq!(series.values()[0], 1.5);
        assert!(series.values()[1].is_nan());
        assert_eq!(series.values()[2], 2.5);
        assert_eq!(series.times()[1] - series.times()[0], TimeDelta::hours(1));
    }

    #[test]
    fn test_parse_measurement_body_missing_values() {
        let body = r#"{"time": ["2024-01-01T00:00:00+00:00"]}"#;
        let err = parse_measurement_body(body, "tre200h0", "PIL").unwrap_err();
        assert!(matches!(err, LakeError::Fetch { .. }));
    }

    #[test]
    fn test_parse_metadata_body() {
        let meta = parse_metadata_body(METADATA, "PIL").unwrap();
        assert_eq!(meta.elevation, 1120.0);
        let extent = meta.extent("tre200h0").unwrap();
        assert_eq!(extent.start.format("%Y%m%d").to_string(), "19810101");
        assert!(meta.extent("gre000h0").is_none());
    }

    #[test]
    fn test_static_source_window() {
        let start = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();
        let base = lake_utils::dates::midnight(start);
        let series = TimeSeries::from_pairs((0..72).map(|h| (base + TimeDelta::hours(h), h as f64)));
        let mut source = StaticSource::new();
        source.insert("PIL", "tre200h0", series);
        let day_two = NaiveDate::from_ymd_opt(2024, 1, 2).unwrap();
        let fetched = source.fetch("tre200h0", "PIL", day_two, day_two).unwrap();
        assert_eq!(fetched.len(), 24);
        assert_eq!(fetched.values()[0], 24.0);
        let meta = source.metadata("PIL").unwrap();
        assert_eq!(meta.extent("tre200h0").unwrap().end, base + TimeDelta::hours(71));
        assert!(source.fetch("gre000h0", "PIL", start, start).is_err());
    }

    #[cfg(feature = "api")]
    #[test]
    fn test_http_source_urls() {
        let day = NaiveDate::from_ymd_opt(2024, 1, 2).unwrap();
        let meteo = HttpSource::new("http://localhost:8000/", Network::Meteo).unwrap();
        assert_eq!(
            meteo.measured_url("tre200h0", "PIL", day, day),
            "http://localhost:8000/meteoswiss/meteodata/measured/PIL/tre200h0/20240102/20240102"
        );
        assert_eq!(
            meteo.metadata_url("PIL"),
            "http://localhost:8000/meteoswiss/meteodata/metadata/PIL"
        );
        let hydro = HttpSource::new("http://localhost:8000", Network::Hydro).unwrap();
        assert!(hydro
            .measured_url("Wassertemperatur", "2009", day, day)
            .ends_with("/bafu/hydrodata/measured/2009/Wassertemperatur/20240102/20240102?resample=hourly"));
        assert!(matches!(
            HttpSource::new("localhost", Network::Meteo),
            Err(LakeError::Configuration(_))
        ));
    }
}
