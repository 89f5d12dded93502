//! External collaborators: the simulation process, post-processing and upload.

use crate::files::CONTROL_FILE;
use crate::params::SiteParameters;
use lake_series::{LakeError, Result};
use log::info;
use std::path::Path;
use std::process::Command;

/// Runs the model in a prepared site directory.
pub trait SimulationRunner: Send + Sync {
    fn run(&self, dir: &Path) -> Result<()>;
}

/// Turns raw model results into published products.
pub trait PostProcessor: Send + Sync {
    fn process(&self, dir: &Path, site: &SiteParameters) -> Result<()>;
}

/// Publishes the products of one site.
pub trait Uploader: Send + Sync {
    fn upload(&self, dir: &Path, site: &SiteParameters) -> Result<()>;
}

/// Runs the model image with the site directory mounted as its working directory.
#[derive(Debug, Clone)]
pub struct DockerRunner {
    program: String,
    image: String,
}

impl DockerRunner {
    pub fn new(image: &str) -> Self {
        DockerRunner {
            program: "docker".to_string(),
            image: image.to_string(),
        }
    }

    /// Use another container runtime binary.
    pub fn with_program(mut self, program: &str) -> Self {
        self.program = program.to_string();
        self
    }

    pub fn arguments(&self, dir: &Path) -> Vec<String> {
        vec![
            "run".to_string(),
            "--rm".to_string(),
            "-v".to_string(),
            format!("{}:/simstrat/run", dir.display()),
            self.image.clone(),
            CONTROL_FILE.to_string(),
        ]
    }
}

impl SimulationRunner for DockerRunner {
    fn run(&self, dir: &Path) -> Result<()> {
        let arguments = self.arguments(dir);
        let command = format!("{} {}", self.program, arguments.join(" "));
        info!("Running: {}", command);
        let output = Command::new(&self.program).args(&arguments).output()?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            if !stderr.trim().is_empty() {
                log::error!("{}", stderr.trim());
            }
            return Err(LakeError::RunFailure {
                status: output.status.to_string(),
                command,
            });
        }
        Ok(())
    }
}
