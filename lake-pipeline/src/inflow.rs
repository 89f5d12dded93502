//! River and upstream-lake inflows.
//!
//! Gauged rivers enter as deep inflows at the surface (one column per river).
//! Upstream sites enter as surface inflows spread over their configured depth,
//! with temperature and salinity given as fluxes (value times discharge).

use crate::files::{
    inflow_file, read_inflow, read_result_surface, write_inflow, write_outflow, InflowTable,
    RESULTS_DIR,
};
use crate::params::{Inflow, StationQuantity};
use chrono::NaiveDateTime;
use lake_qc::climatology::HistoryMode;
use lake_qc::{Quantity, QuantityPipeline, ReconciliationContext};
use lake_series::source::ObservationSource;
use lake_series::{LakeError, Result, TimeSeries};
use lake_utils::dates::{from_model_time, round_to_hour, to_model_time};
use log::info;
use std::collections::BTreeMap;
use std::path::Path;

/// Inflow mode written to the control file when no inflow is configured.
pub const MODE_NONE: u8 = 0;
/// Inflow mode for explicit deep and surface inflows.
pub const MODE_INFLOWS: u8 = 2;

const DISCHARGE_LABEL: &str = "Q [m3/s]";
const TEMPERATURE_LABEL: &str = "T [°C]";
const SALINITY_LABEL: &str = "S [‰]";

/// Discharge, temperature and salinity inflow files of one site.
#[derive(Debug, Clone, PartialEq)]
pub struct InflowSet {
    pub mode: u8,
    pub discharge: InflowTable,
    pub temperature: InflowTable,
    pub salinity: InflowTable,
}

impl InflowSet {
    /// Zero inflow over `[start, end]` (model days).
    pub fn none(start: f64, end: f64) -> Self {
        InflowSet {
            mode: MODE_NONE,
            discharge: InflowTable::empty(start, end),
            temperature: InflowTable::empty(start, end),
            salinity: InflowTable::empty(start, end),
        }
    }

    fn tables_mut(&mut self) -> [&mut InflowTable; 3] {
        [&mut self.discharge, &mut self.temperature, &mut self.salinity]
    }
}

/// Inflow files written by the previous run, for continuation fills.
#[derive(Debug, Clone, PartialEq)]
pub struct PriorInflows {
    pub discharge: InflowTable,
    pub temperature: InflowTable,
    pub salinity: InflowTable,
}

impl PriorInflows {
    /// Read `Qin.dat`, `Tin.dat` and `Sin.dat` from `dir` if all are present.
    pub fn read(dir: &Path) -> Result<Option<PriorInflows>> {
        let paths: Vec<_> = ["Q", "T", "S"]
            .iter()
            .map(|q| dir.join(inflow_file(q)))
            .collect();
        if !paths.iter().all(|p| p.exists()) {
            return Ok(None);
        }
        Ok(Some(PriorInflows {
            discharge: read_inflow(&paths[0])?,
            temperature: read_inflow(&paths[1])?,
            salinity: read_inflow(&paths[2])?,
        }))
    }

    fn column(&self, quantity: Quantity, index: usize, reference: &NaiveDateTime) -> Option<TimeSeries> {
        let table = match quantity {
            Quantity::Discharge => &self.discharge,
            Quantity::WaterTemperature => &self.temperature,
            Quantity::Salinity => &self.salinity,
            _ => return None,
        };
        let (_, values) = table.deep.get(index)?;
        Some(series_from_model_time(&table.time, values, reference))
    }
}

/// Everything needed to build the inflows of one site.
pub struct InflowInputs<'a> {
    /// Hydrological station source.
    pub source: &'a dyn ObservationSource,
    /// Root holding one directory per site.
    pub simulation_dir: &'a Path,
    pub reference: NaiveDateTime,
    /// Reference epochs of upstream sites, by key.
    pub upstream_references: &'a BTreeMap<String, NaiveDateTime>,
    /// Hourly grid covering the run period.
    pub grid: &'a [NaiveDateTime],
    pub mode: HistoryMode,
    /// Salinity (ppt) of rivers without a salinity station.
    pub salinity: f64,
    pub prior: Option<&'a PriorInflows>,
}

fn series_from_model_time(time: &[f64], values: &[f64], reference: &NaiveDateTime) -> TimeSeries {
    TimeSeries::from_pairs(
        time.iter()
            .map(|d| round_to_hour(&from_model_time(*d, reference)))
            .zip(values.iter().copied()),
    )
}

pub fn assemble_inflows(inflows: &[Inflow], inputs: &InflowInputs) -> Result<InflowSet> {
    let (start, end) = match (inputs.grid.first(), inputs.grid.last()) {
        (Some(s), Some(e)) => (*s, *e),
        _ => return Err(LakeError::Validation("empty inflow grid".to_string())),
    };
    let time: Vec<f64> = inputs
        .grid
        .iter()
        .map(|t| to_model_time(t, &inputs.reference))
        .collect();
    if inflows.is_empty() {
        info!("No inflows, producing default files");
        return Ok(InflowSet::none(
            to_model_time(&start, &inputs.reference),
            to_model_time(&end, &inputs.reference),
        ));
    }

    info!("Processing {} inflows", inflows.len());
    let mut set = InflowSet {
        mode: MODE_INFLOWS,
        discharge: InflowTable::default(),
        temperature: InflowTable::default(),
        salinity: InflowTable::default(),
    };
    for table in set.tables_mut() {
        table.time = time.clone();
    }

    let mut river = 0;
    for inflow in inflows {
        match inflow {
            Inflow::HydroStation {
                discharge,
                temperature,
                salinity,
            } => {
                info!("Collecting hydrological data from station {}", discharge.id);
                let q = gauged(inputs, Quantity::Discharge, discharge, river)?;
                let t = gauged(inputs, Quantity::WaterTemperature, temperature, river)?;
                let s = match salinity {
                    Some(station) => gauged(inputs, Quantity::Salinity, station, river)?,
                    None => vec![inputs.salinity; inputs.grid.len()],
                };
                set.discharge.deep.push((0.0, q));
                set.temperature.deep.push((0.0, t));
                set.salinity.deep.push((0.0, s));
                river += 1;
            }
            Inflow::ModelOutflow { id, depth } => {
                info!("Collecting simulated outflow of {}", id);
                let (q, t, s) = upstream_outflow(inputs, id)?;
                let heat: Vec<f64> = t.iter().zip(&q).map(|(t, q)| t * q).collect();
                let salt: Vec<f64> = s.iter().zip(&q).map(|(s, q)| s * q).collect();
                let zero = vec![0.0; q.len()];
                for (table, flux) in set.tables_mut().into_iter().zip([q, heat, salt]) {
                    table.surface.push((*depth, zero.clone()));
                    table.surface.push((*depth, flux.clone()));
                    table.surface.push((0.0, flux));
                }
            }
        }
    }
    Ok(set)
}

/// One gauged quantity through its quality-control pipeline.
fn gauged(
    inputs: &InflowInputs,
    quantity: Quantity,
    station: &StationQuantity,
    river: usize,
) -> Result<Vec<f64>> {
    let (start, end) = match (inputs.grid.first(), inputs.grid.last()) {
        (Some(s), Some(e)) => (*s, *e),
        _ => return Ok(Vec::new()),
    };
    let series = inputs
        .source
        .fetch(&station.parameter, &station.id, start.date(), end.date())?;
    let label = format!("{}/{}", station.id, station.parameter);
    let prior = inputs
        .prior
        .and_then(|p| p.column(quantity, river, &inputs.reference));
    let context = ReconciliationContext::new(&label, series).with_prior(prior);
    let policy = quantity.policy();
    let processed = QuantityPipeline::new(&policy, inputs.grid, inputs.mode).run(context)?;
    Ok(processed.into_values())
}

/// Discharge, temperature and salinity leaving an upstream site.
///
/// Discharge is the total of the upstream inflow file; temperature and
/// salinity are the surface values of the upstream results.
fn upstream_outflow(inputs: &InflowInputs, key: &str) -> Result<(Vec<f64>, Vec<f64>, Vec<f64>)> {
    let upstream = inputs.simulation_dir.join(key);
    let reference = inputs
        .upstream_references
        .get(key)
        .copied()
        .unwrap_or(inputs.reference);
    let required = [
        upstream.join(inflow_file("Q")),
        upstream.join(RESULTS_DIR).join("T_out.dat"),
        upstream.join(RESULTS_DIR).join("S_out.dat"),
    ];
    if let Some(missing) = required.iter().find(|p| !p.exists()) {
        return Err(LakeError::Validation(format!(
            "outputs of upstream site {key} not found: {}",
            missing.display()
        )));
    }

    let qin = read_inflow(&required[0])?;
    let discharge = series_from_model_time(&qin.time, &qin.total(), &reference);
    let (t_time, t_values) = read_result_surface(&required[1])?;
    let (s_time, s_values) = read_result_surface(&required[2])?;
    let temperature = series_from_model_time(&t_time, &t_values, &reference);
    let salinity = series_from_model_time(&s_time, &s_values, &reference);

    let mut out = Vec::with_capacity(3);
    for (quantity, series) in [
        (Quantity::Discharge, discharge),
        (Quantity::WaterTemperature, temperature),
        (Quantity::Salinity, salinity),
    ] {
        let label = format!("{key}/{quantity:?}");
        let policy = quantity.policy();
        let context = ReconciliationContext::new(&label, series);
        let processed = QuantityPipeline::new(&policy, inputs.grid, HistoryMode::Window).run(context)?;
        out.push(processed.into_values());
    }
    let s = out.pop().unwrap_or_default();
    let t = out.pop().unwrap_or_default();
    let q = out.pop().unwrap_or_default();
    Ok((q, t, s))
}

/// Write `Qin.dat`, `Tin.dat`, `Sin.dat` and a zero `Qout.dat`.
pub fn write_inflows(dir: &Path, set: &InflowSet) -> Result<()> {
    write_inflow(&dir.join(inflow_file("Q")), DISCHARGE_LABEL, &set.discharge)?;
    write_inflow(&dir.join(inflow_file("T")), TEMPERATURE_LABEL, &set.temperature)?;
    write_inflow(&dir.join(inflow_file("S")), SALINITY_LABEL, &set.salinity)?;
    let (start, end) = match (set.discharge.time.first(), set.discharge.time.last()) {
        (Some(s), Some(e)) => (*s, *e),
        _ => return Err(LakeError::Validation("inflow files need a time axis".to_string())),
    };
    write_outflow(&dir.join(crate::files::OUTFLOW_FILE), start, end)
}
