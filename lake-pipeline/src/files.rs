//! Readers and writers for the simulation's input and result files.
//!
//! Input files are tab-delimited tables with a header line; the first column
//! of every time-dependent table is model time in days since the site's
//! reference date. Result tables written by the model are comma-delimited with
//! a `Datetime` column followed by one column per depth.

use crate::geometry::Profile;
use crate::params::Bathymetry;
use csv::{ReaderBuilder, StringRecord, Trim, Writer, WriterBuilder};
use lake_series::{LakeError, Result};
use std::fs::File;
use std::path::Path;

pub const BATHYMETRY_FILE: &str = "Bathymetry.dat";
pub const GRID_FILE: &str = "Grid.dat";
pub const OUTPUT_DEPTHS_FILE: &str = "z_out.dat";
pub const OUTPUT_TIME_FILE: &str = "t_out.dat";
pub const INITIAL_CONDITIONS_FILE: &str = "InitialConditions.dat";
pub const ABSORPTION_FILE: &str = "Absorption.dat";
pub const FORCING_FILE: &str = "Forcing.dat";
pub const OUTFLOW_FILE: &str = "Qout.dat";
pub const CONTROL_FILE: &str = "Settings.par";
pub const SNAPSHOT_FILE: &str = "simulation-snapshot.dat";
pub const RESULTS_DIR: &str = "Results";

/// Inflow file for one of the `Q`, `T` or `S` quantities.
pub fn inflow_file(quantity: &str) -> String {
    format!("{quantity}in.dat")
}

/// Dated snapshot kept next to the simulation inputs.
pub fn snapshot_file(date: &str) -> String {
    format!("simulation-snapshot_{date}.dat")
}

fn table_writer(path: &Path) -> Result<Writer<File>> {
    Ok(WriterBuilder::new()
        .delimiter(b'\t')
        .has_headers(false)
        .flexible(true)
        .from_path(path)?)
}

fn table_records(path: &Path, delimiter: u8) -> Result<Vec<StringRecord>> {
    let mut reader = ReaderBuilder::new()
        .delimiter(delimiter)
        .has_headers(false)
        .flexible(true)
        .trim(Trim::All)
        .from_path(path)?;
    let mut records = Vec::new();
    for record in reader.records() {
        records.push(record?);
    }
    Ok(records)
}

fn parse_field(record: &StringRecord, index: usize, path: &Path) -> Result<f64> {
    record
        .get(index)
        .and_then(|s| s.parse::<f64>().ok())
        .ok_or_else(|| {
            LakeError::Validation(format!(
                "{}: expected a number in column {} of {:?}",
                path.display(),
                index + 1,
                record
            ))
        })
}

fn check_lengths(label: &str, expected: usize, columns: &[(&str, &[f64])]) -> Result<()> {
    for (name, values) in columns {
        if values.len() != expected {
            return Err(LakeError::Validation(format!(
                "{label}: column {name} has {} values, expected {expected}",
                values.len()
            )));
        }
        if let Some(i) = values.iter().position(|v| !v.is_finite()) {
            return Err(LakeError::Validation(format!(
                "{label}: column {name} has a missing value at row {i}"
            )));
        }
    }
    Ok(())
}

fn fmt(value: f64, precision: usize) -> String {
    format!("{value:.precision$}")
}

pub fn write_grid(path: &Path, cells: u32) -> Result<()> {
    let mut w = table_writer(path)?;
    w.write_record(["Number of grid points"])?;
    w.write_record([cells.to_string()])?;
    w.flush()?;
    Ok(())
}

pub fn read_grid(path: &Path) -> Result<u32> {
    let records = table_records(path, b'\t')?;
    let cells = records
        .get(1)
        .map(|r| parse_field(r, 0, path))
        .transpose()?
        .ok_or_else(|| LakeError::Validation(format!("{}: missing grid size", path.display())))?;
    Ok(cells as u32)
}

pub fn write_bathymetry(path: &Path, bathymetry: &Bathymetry) -> Result<()> {
    check_lengths(
        BATHYMETRY_FILE,
        bathymetry.depth.len(),
        &[("area", bathymetry.area.as_slice())],
    )?;
    let mut w = table_writer(path)?;
    w.write_record(["Depth [m]", "Area [m2]"])?;
    for (depth, area) in bathymetry.depth.iter().zip(&bathymetry.area) {
        w.write_record([fmt(-depth.abs(), 1), fmt(*area, 0)])?;
    }
    w.flush()?;
    Ok(())
}

pub fn read_bathymetry(path: &Path) -> Result<Bathymetry> {
    let records = table_records(path, b'\t')?;
    let mut bathymetry = Bathymetry {
        depth: Vec::new(),
        area: Vec::new(),
    };
    for record in records.iter().skip(1) {
        bathymetry.depth.push(parse_field(record, 0, path)?.abs());
        bathymetry.area.push(parse_field(record, 1, path)?);
    }
    Ok(bathymetry)
}

pub fn write_output_depths(path: &Path, depths: &[f64]) -> Result<()> {
    let mut w = table_writer(path)?;
    w.write_record(["Depths [m]"])?;
    for z in depths {
        w.write_record([fmt(-z.abs(), 2)])?;
    }
    w.flush()?;
    Ok(())
}

pub fn write_output_time_steps(path: &Path, steps: i64) -> Result<()> {
    let mut w = table_writer(path)?;
    w.write_record(["Number of time steps"])?;
    w.write_record([steps.to_string()])?;
    w.flush()?;
    Ok(())
}

pub fn write_initial_conditions(path: &Path, profile: &Profile) -> Result<()> {
    check_lengths(
        INITIAL_CONDITIONS_FILE,
        profile.depth.len(),
        &[("T", profile.temperature.as_slice()), ("S", profile.salinity.as_slice())],
    )?;
    let mut w = table_writer(path)?;
    w.write_record([
        "Depth [m]",
        "U [m/s]",
        "V [m/s]",
        "T [°C]",
        "S [‰]",
        "k [J/kg]",
        "eps [W/kg]",
    ])?;
    for i in 0..profile.depth.len() {
        w.write_record([
            fmt(-profile.depth[i].abs(), 2),
            fmt(0.0, 3),
            fmt(0.0, 3),
            fmt(profile.temperature[i], 3),
            fmt(profile.salinity[i], 3),
            "3E-6".to_string(),
            "5E-10".to_string(),
        ])?;
    }
    w.flush()?;
    Ok(())
}

/// Constant-depth absorption series.
pub fn write_absorption(path: &Path, time: &[f64], absorption: &[f64]) -> Result<()> {
    check_lengths(ABSORPTION_FILE, time.len(), &[("time", time), ("absorption", absorption)])?;
    let mut w = table_writer(path)?;
    w.write_record(["Time [d] (1.col)", "z [m] (1.row)", "Absorption [m-1] (rest)"])?;
    w.write_record(["1"])?;
    w.write_record(["-1", "-1.00"])?;
    for (t, a) in time.iter().zip(absorption) {
        w.write_record([fmt(*t, 4), fmt(*a, 3)])?;
    }
    w.flush()?;
    Ok(())
}

/// Meteorological forcing on the hourly grid.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ForcingTable {
    /// Model days
    pub time: Vec<f64>,
    /// m/s, west to east
    pub u: Vec<f64>,
    /// m/s, south to north
    pub v: Vec<f64>,
    /// °C at lake altitude
    pub tair: Vec<f64>,
    /// W/m2
    pub sol: Vec<f64>,
    /// mbar
    pub vap: Vec<f64>,
    /// 0-1
    pub cloud: Vec<f64>,
    /// m/h
    pub rain: Vec<f64>,
}

const FORCING_HEADER: [&str; 8] = [
    "Time [d]",
    "u [m/s]",
    "v [m/s]",
    "Tair [°C]",
    "sol [W/m2]",
    "vap [mbar]",
    "cloud [-]",
    "rain [m/hr]",
];

impl ForcingTable {
    fn columns(&self) -> [&[f64]; 8] {
        [
            self.time.as_slice(),
            self.u.as_slice(),
            self.v.as_slice(),
            self.tair.as_slice(),
            self.sol.as_slice(),
            self.vap.as_slice(),
            self.cloud.as_slice(),
            self.rain.as_slice(),
        ]
    }
}

pub fn write_forcing(path: &Path, table: &ForcingTable) -> Result<()> {
    let columns = table.columns();
    let named: Vec<(&str, &[f64])> = FORCING_HEADER.iter().copied().zip(columns).collect();
    check_lengths(FORCING_FILE, table.time.len(), &named)?;
    let mut w = table_writer(path)?;
    w.write_record(FORCING_HEADER)?;
    for i in 0..table.time.len() {
        let row: Vec<String> = columns
            .iter()
            .enumerate()
            .map(|(c, col)| fmt(col[i], if c == 0 { 4 } else if c == 7 { 6 } else { 3 }))
            .collect();
        w.write_record(&row)?;
    }
    w.flush()?;
    Ok(())
}

pub fn read_forcing(path: &Path) -> Result<ForcingTable> {
    let records = table_records(path, b'\t')?;
    let mut table = ForcingTable::default();
    for record in records.iter().skip(1) {
        let mut values = [0.0; 8];
        for (c, value) in values.iter_mut().enumerate() {
            *value = parse_field(record, c, path)?;
        }
        table.time.push(values[0]);
        table.u.push(values[1]);
        table.v.push(values[2]);
        table.tair.push(values[3]);
        table.sol.push(values[4]);
        table.vap.push(values[5]);
        table.cloud.push(values[6]);
        table.rain.push(values[7]);
    }
    Ok(table)
}

/// One inflow quantity file: deep inflows enter at a depth, surface inflows
/// are spread over the column above their depth.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct InflowTable {
    /// Model days
    pub time: Vec<f64>,
    /// (depth m, positive down; values)
    pub deep: Vec<(f64, Vec<f64>)>,
    pub surface: Vec<(f64, Vec<f64>)>,
}

impl InflowTable {
    /// Zero inflow at the surface over `[start, end]`.
    pub fn empty(start: f64, end: f64) -> Self {
        InflowTable {
            time: vec![start, end],
            deep: vec![(0.0, vec![0.0, 0.0])],
            surface: Vec::new(),
        }
    }

    /// Sum of all deep inflows and the surface value of all surface inflows.
    pub fn total(&self) -> Vec<f64> {
        (0..self.time.len())
            .map(|i| {
                self.deep
                    .iter()
                    .chain(self.surface.iter().filter(|(depth, _)| *depth == 0.0))
                    .map(|(_, values)| values.get(i).copied().unwrap_or(0.0))
                    .sum()
            })
            .collect()
    }
}

pub fn write_inflow(path: &Path, label: &str, table: &InflowTable) -> Result<()> {
    let named: Vec<(&str, &[f64])> = table
        .deep
        .iter()
        .chain(&table.surface)
        .map(|(_, values)| ("inflow", values.as_slice()))
        .collect();
    check_lengths(label, table.time.len(), &named)?;

    let mut w = table_writer(path)?;
    w.write_record(["Time [d]", label])?;
    w.write_record([table.deep.len().to_string(), table.surface.len().to_string()])?;
    let mut depths = vec!["-1".to_string()];
    depths.extend(
        table
            .deep
            .iter()
            .chain(&table.surface)
            .map(|(depth, _)| fmt(-depth.abs(), 2)),
    );
    w.write_record(&depths)?;
    for i in 0..table.time.len() {
        let mut row = vec![fmt(table.time[i], 4)];
        row.extend(
            table
                .deep
                .iter()
                .chain(&table.surface)
                .map(|(_, values)| fmt(values[i], 3)),
        );
        w.write_record(&row)?;
    }
    w.flush()?;
    Ok(())
}

pub fn read_inflow(path: &Path) -> Result<InflowTable> {
    let records = table_records(path, b'\t')?;
    if records.len() < 3 {
        return Err(LakeError::Validation(format!(
            "{}: inflow file needs a header, counts and depths",
            path.display()
        )));
    }
    let n_deep = parse_field(&records[1], 0, path)? as usize;
    let n_surface = parse_field(&records[1], 1, path)? as usize;
    let mut depths = Vec::with_capacity(n_deep + n_surface);
    for c in 1..=n_deep + n_surface {
        depths.push(parse_field(&records[2], c, path)?.abs());
    }
    let mut columns = vec![Vec::new(); n_deep + n_surface];
    let mut time = Vec::new();
    for record in records.iter().skip(3) {
        time.push(parse_field(record, 0, path)?);
        for (c, column) in columns.iter_mut().enumerate() {
            column.push(parse_field(record, c + 1, path)?);
        }
    }
    let mut pairs = depths.into_iter().zip(columns);
    let deep = pairs.by_ref().take(n_deep).collect();
    let surface = pairs.collect();
    Ok(InflowTable {
        time,
        deep,
        surface,
    })
}

/// Zero outflow at the surface over `[start, end]`.
pub fn write_outflow(path: &Path, start: f64, end: f64) -> Result<()> {
    write_inflow(path, "Q_out [m3/s]", &InflowTable::empty(start, end))
}

/// Surface column of a model result table (`Results/<X>_out.dat`).
///
/// Returns model times and the values of the column closest to the surface.
pub fn read_result_surface(path: &Path) -> Result<(Vec<f64>, Vec<f64>)> {
    let records = table_records(path, b',')?;
    let header = records
        .first()
        .ok_or_else(|| LakeError::Validation(format!("{}: empty result file", path.display())))?;
    let surface = header
        .iter()
        .enumerate()
        .skip(1)
        .filter_map(|(c, name)| name.parse::<f64>().ok().map(|depth| (c, depth)))
        .max_by(|a, b| a.1.total_cmp(&b.1))
        .map(|(c, _)| c)
        .ok_or_else(|| LakeError::Validation(format!("{}: no depth columns", path.display())))?;
    let mut time = Vec::new();
    let mut values = Vec::new();
    for record in records.iter().skip(1) {
        time.push(parse_field(record, 0, path)?);
        values.push(record.get(surface).and_then(|s| s.parse().ok()).unwrap_or(f64::NAN));
    }
    Ok((time, values))
}
