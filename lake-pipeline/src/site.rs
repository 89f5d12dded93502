//! Per-site pipeline: strictly ordered stages from geometry to upload.
//!
//! Stages whose output does not depend on the run period (bathymetry, grid,
//! output specification) are skipped when their file already exists. Every
//! other stage rewrites its files on each run.

use crate::control::{write_control, ControlSettings};
use crate::files::{
    read_bathymetry, read_forcing, read_grid, snapshot_file, write_absorption, write_bathymetry,
    write_forcing, write_grid, write_initial_conditions, write_output_depths,
    write_output_time_steps, BATHYMETRY_FILE, FORCING_FILE, GRID_FILE, INITIAL_CONDITIONS_FILE,
    OUTPUT_DEPTHS_FILE, OUTPUT_TIME_FILE, SNAPSHOT_FILE, ABSORPTION_FILE,
};
use crate::forcing::{assemble_forcing, ForcingInputs};
use crate::geometry::{
    default_absorption, default_grid_resolution, default_profile, grid_cells,
    output_depth_resolution, output_depths, output_time_steps,
};
use crate::inflow::{assemble_inflows, write_inflows, InflowInputs, PriorInflows};
use crate::params::{Bathymetry, SiteParameters};
use crate::period::{forcing_extent, resolve_run_period, PeriodRequest, RunPeriod};
use crate::runner::{PostProcessor, SimulationRunner, Uploader};
use chrono::{NaiveDate, NaiveDateTime};
use lake_qc::climatology::HistoryMode;
use lake_series::date_range::TimeRange;
use lake_series::source::{ObservationSource, StationMetadata};
use lake_series::{LakeError, Result};
use lake_utils::dates::{day_of_year, format_date_compact, to_model_time};
use log::info;
use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Stage {
    Geometry,
    Grid,
    OutputSpec,
    RunPeriod,
    InitialState,
    Absorption,
    Forcing,
    Inflows,
    ControlFile,
    Run,
    PostProcess,
    Upload,
}

impl Stage {
    pub const ORDER: [Stage; 12] = [
        Stage::Geometry,
        Stage::Grid,
        Stage::OutputSpec,
        Stage::RunPeriod,
        Stage::InitialState,
        Stage::Absorption,
        Stage::Forcing,
        Stage::Inflows,
        Stage::ControlFile,
        Stage::Run,
        Stage::PostProcess,
        Stage::Upload,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Stage::Geometry => "geometry",
            Stage::Grid => "grid",
            Stage::OutputSpec => "output_spec",
            Stage::RunPeriod => "run_period",
            Stage::InitialState => "initial_state",
            Stage::Absorption => "absorption",
            Stage::Forcing => "forcing",
            Stage::Inflows => "inflows",
            Stage::ControlFile => "control_file",
            Stage::Run => "run",
            Stage::PostProcess => "post_process",
            Stage::Upload => "upload",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Run options shared by every site of a run.
#[derive(Debug, Clone)]
pub struct PipelineOptions {
    /// Root holding one directory per site.
    pub simulation_dir: PathBuf,
    pub control_template_dir: PathBuf,
    pub simstrat_version: String,
    pub couple_aed2: bool,
    pub snapshot: bool,
    pub snapshot_date: Option<NaiveDate>,
    pub overwrite_start_date: Option<NaiveDate>,
    pub overwrite_end_date: Option<NaiveDate>,
    /// Extend the run by each site's forecast horizon.
    pub forecast: bool,
    /// Remove the site directory before starting.
    pub overwrite_simulation: bool,
    pub run: bool,
    pub post_process: bool,
    pub upload: bool,
    pub today: NaiveDate,
}

impl Default for PipelineOptions {
    fn default() -> Self {
        PipelineOptions {
            simulation_dir: PathBuf::from("runs"),
            control_template_dir: PathBuf::from("par"),
            simstrat_version: "3.0.4".to_string(),
            couple_aed2: false,
            snapshot: true,
            snapshot_date: None,
            overwrite_start_date: None,
            overwrite_end_date: None,
            forecast: false,
            overwrite_simulation: false,
            run: true,
            post_process: true,
            upload: false,
            today: chrono::Utc::now().date_naive(),
        }
    }
}

/// Data sources and injected collaborators.
#[derive(Clone)]
pub struct PipelineContext {
    pub meteo: Arc<dyn ObservationSource>,
    pub hydro: Arc<dyn ObservationSource>,
    pub runner: Option<Arc<dyn SimulationRunner>>,
    pub post_processor: Option<Arc<dyn PostProcessor>>,
    pub uploader: Option<Arc<dyn Uploader>>,
    /// Reference epochs of every catalogued site, for reading upstream outputs.
    pub references: BTreeMap<String, NaiveDateTime>,
}

impl PipelineContext {
    pub fn new(meteo: Arc<dyn ObservationSource>, hydro: Arc<dyn ObservationSource>) -> Self {
        PipelineContext {
            meteo,
            hydro,
            runner: None,
            post_processor: None,
            uploader: None,
            references: BTreeMap::new(),
        }
    }

    pub fn with_runner(mut self, runner: Arc<dyn SimulationRunner>) -> Self {
        self.runner = Some(runner);
        self
    }

    pub fn with_post_processor(mut self, post_processor: Arc<dyn PostProcessor>) -> Self {
        self.post_processor = Some(post_processor);
        self
    }

    pub fn with_uploader(mut self, uploader: Arc<dyn Uploader>) -> Self {
        self.uploader = Some(uploader);
        self
    }

    pub fn with_references<'a>(mut self, sites: impl IntoIterator<Item = &'a SiteParameters>) -> Self {
        self.references = sites
            .into_iter()
            .map(|s| (s.key.clone(), s.reference_time()))
            .collect();
        self
    }
}

/// One site's pipeline. Stages run in [`Stage::ORDER`]; each stage reads the
/// state left by the previous ones.
pub struct SitePipeline<'a> {
    site: &'a SiteParameters,
    options: &'a PipelineOptions,
    context: &'a PipelineContext,
    dir: PathBuf,
    max_depth: f64,
    grid_cells: u32,
    stations: Vec<StationMetadata>,
    period: Option<RunPeriod>,
    inflow_mode: u8,
    completed: Vec<Stage>,
}

impl<'a> SitePipeline<'a> {
    pub fn new(site: &'a SiteParameters, options: &'a PipelineOptions, context: &'a PipelineContext) -> Self {
        SitePipeline {
            site,
            options,
            context,
            dir: options.simulation_dir.join(&site.key),
            max_depth: 0.0,
            grid_cells: 0,
            stations: Vec::new(),
            period: None,
            inflow_mode: 0,
            completed: Vec::new(),
        }
    }

    /// Directory holding this site's input and output files.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn completed(&self) -> &[Stage] {
        &self.completed
    }

    pub fn period(&self) -> Option<&RunPeriod> {
        self.period.as_ref()
    }

    /// Run every stage in order, stopping at the first failure.
    pub fn run(&mut self) -> Result<()> {
        if self.options.overwrite_simulation && self.dir.exists() {
            info!("{}: clearing existing simulation directory {}", self.site.key, self.dir.display());
            clear_site_dir(&self.dir)?;
        }
        fs::create_dir_all(&self.dir)?;

        for stage in Stage::ORDER {
            let started = Instant::now();
            info!("{}: {} ...", self.site.key, stage);
            self.execute(stage)?;
            self.completed.push(stage);
            info!(
                "{}: {} complete ({:.2}s)",
                self.site.key,
                stage,
                started.elapsed().as_secs_f64()
            );
        }
        Ok(())
    }

    fn execute(&mut self, stage: Stage) -> Result<()> {
        match stage {
            Stage::Geometry => self.geometry(),
            Stage::Grid => self.grid(),
            Stage::OutputSpec => self.output_spec(),
            Stage::RunPeriod => self.run_period(),
            Stage::InitialState => self.initial_state(),
            Stage::Absorption => self.absorption(),
            Stage::Forcing => self.forcing(),
            Stage::Inflows => self.inflows(),
            Stage::ControlFile => self.control_file(),
            Stage::Run => self.simulate(),
            Stage::PostProcess => self.post_process(),
            Stage::Upload => self.upload(),
        }
    }

    fn period_or_err(&self) -> Result<&RunPeriod> {
        self.period
            .as_ref()
            .ok_or_else(|| LakeError::Validation("run period not resolved".to_string()))
    }

    fn geometry(&mut self) -> Result<()> {
        let path = self.dir.join(BATHYMETRY_FILE);
        let bathymetry = if path.exists() {
            info!("Bathymetry file already exists");
            read_bathymetry(&path)?
        } else {
            let bathymetry = match (&self.site.bathymetry, self.site.max_depth) {
                (Some(bathymetry), _) => bathymetry.clone(),
                (None, Some(max_depth)) if self.site.surface_area > 0.0 => {
                    info!("Using surface_area and max_depth for a two-point bathymetry");
                    Bathymetry::two_point(self.site.surface_area, max_depth)
                }
                _ => {
                    return Err(LakeError::Configuration(format!(
                        "{}: bathymetry required, provide bathymetry or max_depth and surface_area",
                        self.site.key
                    )))
                }
            };
            write_bathymetry(&path, &bathymetry)?;
            bathymetry
        };
        self.max_depth = bathymetry
            .max_depth()
            .filter(|d| *d > 0.0)
            .ok_or_else(|| LakeError::Configuration(format!("{}: bathymetry has no depth", self.site.key)))?;
        Ok(())
    }

    fn grid(&mut self) -> Result<()> {
        let path = self.dir.join(GRID_FILE);
        if path.exists() {
            info!("Grid file already exists");
            self.grid_cells = read_grid(&path)?;
            return Ok(());
        }
        let resolution = self
            .site
            .grid_resolution
            .unwrap_or_else(|| default_grid_resolution(self.max_depth));
        self.grid_cells = grid_cells(self.max_depth, resolution)?;
        info!("Grid of {} cells at {} m resolution", self.grid_cells, resolution);
        write_grid(&path, self.grid_cells)
    }

    fn output_spec(&mut self) -> Result<()> {
        let steps = output_time_steps(
            self.site.output_time_resolution,
            self.site.model_time_resolution,
        )?;
        let depths_path = self.dir.join(OUTPUT_DEPTHS_FILE);
        if depths_path.exists() {
            info!("Output depths file already exists");
        } else {
            let resolution = output_depth_resolution(self.max_depth);
            write_output_depths(&depths_path, &output_depths(self.max_depth, resolution))?;
        }
        let time_path = self.dir.join(OUTPUT_TIME_FILE);
        if time_path.exists() {
            info!("Output time resolution file already exists");
            return Ok(());
        }
        write_output_time_steps(&time_path, steps)
    }

    fn run_period(&mut self) -> Result<()> {
        let extent = forcing_extent(self.context.meteo.as_ref(), &self.site.forcing)?;
        let forecast_days = match (&self.site.forcing_forecast, self.options.forecast) {
            (Some(forecast), true) => Some(forecast.days),
            _ => None,
        };
        let request = PeriodRequest {
            snapshot: self.options.snapshot,
            snapshot_date: self.options.snapshot_date,
            overwrite_start_date: self.options.overwrite_start_date,
            overwrite_end_date: self.options.overwrite_end_date,
            forecast_days,
            today: self.options.today,
        };
        let period = resolve_run_period(&self.dir, self.site.reference_time(), &extent, &request)?;
        self.stations = extent.stations;
        self.period = Some(period);
        Ok(())
    }

    fn initial_state(&mut self) -> Result<()> {
        let period = self.period_or_err()?;
        if let Some(date) = period.snapshot {
            let source = self.dir.join(snapshot_file(&format_date_compact(&date)));
            info!("Model will be initialised from snapshot {}", source.display());
            fs::copy(&source, self.dir.join(SNAPSHOT_FILE))?;
            return Ok(());
        }
        info!("Synthesizing initial conditions from the default profile");
        let profile = default_profile(
            day_of_year(&period.start),
            self.site.elevation,
            self.max_depth,
            self.site.salinity,
        );
        write_initial_conditions(&self.dir.join(INITIAL_CONDITIONS_FILE), &profile)
    }

    fn absorption(&mut self) -> Result<()> {
        let period = self.period_or_err()?;
        let reference = self.site.reference_time();
        let value = match self.site.absorption {
            Some(value) => value,
            None => default_absorption(&self.site.trophic_state, self.site.elevation),
        };
        info!("Absorption {} m-1", value);
        let time = [
            to_model_time(&period.start, &reference),
            to_model_time(&period.end, &reference),
        ];
        write_absorption(&self.dir.join(ABSORPTION_FILE), &time, &[value, value])
    }

    fn history_mode(&self) -> HistoryMode {
        match &self.period {
            Some(period) if period.is_continuation() => HistoryMode::Continuation,
            _ => HistoryMode::Window,
        }
    }

    fn hourly_grid(&self) -> Result<Vec<NaiveDateTime>> {
        let period = self.period_or_err()?;
        Ok(TimeRange::hourly(period.start, period.end).collect())
    }

    fn forcing(&mut self) -> Result<()> {
        let grid = self.hourly_grid()?;
        let mode = self.history_mode();
        let path = self.dir.join(FORCING_FILE);
        let prior = if mode == HistoryMode::Continuation && path.exists() {
            Some(read_forcing(&path)?)
        } else {
            None
        };
        let inputs = ForcingInputs {
            source: self.context.meteo.as_ref(),
            stations: &self.stations,
            elevation: self.site.elevation,
            latitude: self.site.latitude,
            longitude: self.site.longitude,
            reference: self.site.reference_time(),
            grid: &grid,
            mode,
            prior: prior.as_ref(),
        };
        let table = assemble_forcing(&inputs)?;
        write_forcing(&path, &table)
    }

    fn inflows(&mut self) -> Result<()> {
        let grid = self.hourly_grid()?;
        let mode = self.history_mode();
        let prior = if mode == HistoryMode::Continuation {
            PriorInflows::read(&self.dir)?
        } else {
            None
        };
        let inputs = InflowInputs {
            source: self.context.hydro.as_ref(),
            simulation_dir: &self.options.simulation_dir,
            reference: self.site.reference_time(),
            upstream_references: &self.context.references,
            grid: &grid,
            mode,
            salinity: self.site.salinity,
            prior: prior.as_ref(),
        };
        let set = assemble_inflows(&self.site.inflows, &inputs)?;
        write_inflows(&self.dir, &set)?;
        self.inflow_mode = set.mode;
        Ok(())
    }

    fn control_file(&mut self) -> Result<()> {
        let period = self.period_or_err()?;
        let settings = ControlSettings {
            site: self.site,
            period,
            grid_cells: self.grid_cells,
            inflow_mode: self.inflow_mode,
            couple_aed2: self.options.couple_aed2,
        };
        write_control(
            &self.options.control_template_dir,
            &self.options.simstrat_version,
            &self.dir,
            &settings,
        )
    }

    fn simulate(&mut self) -> Result<()> {
        let runner = match (&self.context.runner, self.options.run) {
            (Some(runner), true) => runner,
            _ => {
                info!("Simulation run disabled");
                return Ok(());
            }
        };
        runner.run(&self.dir)?;

        let produced = self.dir.join(SNAPSHOT_FILE);
        if produced.exists() {
            let end = self.period_or_err()?.end.date();
            let archived = self.dir.join(snapshot_file(&format_date_compact(&end)));
            info!("Archiving snapshot as {}", archived.display());
            fs::copy(&produced, &archived)?;
        }
        Ok(())
    }

    fn post_process(&mut self) -> Result<()> {
        match (&self.context.post_processor, self.options.post_process) {
            (Some(processor), true) => processor.process(&self.dir, self.site),
            _ => {
                info!("Post-processing disabled");
                Ok(())
            }
        }
    }

    fn upload(&mut self) -> Result<()> {
        match (&self.context.uploader, self.options.upload) {
            (Some(uploader), true) => uploader.upload(&self.dir, self.site),
            _ => {
                info!("Upload disabled");
                Ok(())
            }
        }
    }
}

fn is_site_log(name: &str) -> bool {
    name.starts_with("log_") && name.ends_with(".txt")
}

/// Remove everything in a site directory except its log files, which may be
/// open for the run that is clearing it.
fn clear_site_dir(dir: &Path) -> Result<()> {
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        if entry.file_type()?.is_dir() {
            fs::remove_dir_all(&path)?;
        } else if !is_site_log(&entry.file_name().to_string_lossy()) {
            fs::remove_file(&path)?;
        }
    }
    Ok(())
}
