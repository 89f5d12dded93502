//! Preparation and execution of one lake simulation.
//!
//! A [`site::SitePipeline`] walks a site through every stage: bathymetry and
//! grid, output specification, run period, initial state, absorption,
//! meteorological forcing, inflows and the control file, then hands the
//! prepared directory to the injected runner, post-processor and uploader.

pub mod control;
pub mod files;
pub mod forcing;
pub mod geometry;
pub mod inflow;
pub mod params;
pub mod period;
pub mod runner;
pub mod site;

pub use params::{Inflow, SiteParameters};
pub use runner::{DockerRunner, PostProcessor, SimulationRunner, Uploader};
pub use site::{PipelineContext, PipelineOptions, SitePipeline, Stage};
