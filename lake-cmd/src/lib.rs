//! Run a set of lake simulations.
//!
//! Loads the run configuration and the site catalogue, derives one task per
//! site with its upstream sites as dependencies, and executes the site
//! pipelines on the scheduler. Each site logs into its own file while its
//! pipeline runs.

use anyhow::Context;
use chrono::{NaiveDate, Utc};
use clap::Args;
use lake_log::SiteScope;
use lake_pipeline::{DockerRunner, PipelineContext, PipelineOptions, SiteParameters, SitePipeline};
use lake_sched::{Summary, Task};
use lake_series::source::{HttpSource, Network};
use lake_series::LakeError;
use log::{error, info};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

pub mod config;

pub use config::RunConfig;

/// Positional arguments of a run.
#[derive(Args, Debug, Clone)]
pub struct RunArgs {
    /// JSON arguments file
    pub args_file: PathBuf,

    /// Additional arguments in key=value format, overriding the file
    #[arg(value_name = "KEY=VALUE")]
    pub overrides: Vec<String>,
}

/// Load the arguments file, apply overrides and validate.
pub fn load_config(args: &RunArgs) -> anyhow::Result<RunConfig> {
    let mut config = RunConfig::load(&args.args_file)?;
    let overrides = config::parse_overrides(&args.overrides)?;
    config.apply_overrides(&overrides)?;
    config.validate()?;
    Ok(config)
}

pub fn load_catalogue(path: &Path) -> anyhow::Result<Vec<SiteParameters>> {
    let body = fs::read_to_string(path)
        .with_context(|| format!("Failed to read site catalogue {}", path.display()))?;
    Ok(SiteParameters::parse_catalogue(&body)?)
}

/// Sites requested by `lakes`, in catalogue order; all sites when empty.
///
/// Upstream sites are not added implicitly. A selected site whose upstream
/// site is left out ends blocked, even when the upstream outputs from an
/// earlier run are already on disk.
pub fn select_sites(catalogue: &[SiteParameters], lakes: &[String]) -> Result<Vec<SiteParameters>, LakeError> {
    if let Some(unknown) = lakes.iter().find(|k| !catalogue.iter().any(|s| s.key == **k)) {
        return Err(LakeError::Configuration(format!(
            "lake key {unknown:?} does not exist in the site catalogue"
        )));
    }
    Ok(catalogue
        .iter()
        .filter(|s| lakes.is_empty() || lakes.contains(&s.key))
        .cloned()
        .collect())
}

/// One task per site; a site depends on every site whose outflow it consumes.
pub fn build_tasks(sites: &[SiteParameters]) -> Vec<Task> {
    sites
        .iter()
        .map(|site| Task::new(&site.key, site.upstream_keys()))
        .collect()
}

/// Run the selected sites with live data sources and the container runner.
///
/// No post-processor or uploader is attached here, so the `post_process` and
/// `upload` settings only take effect for callers that pass their own
/// collaborators to [`run_sites`] through [`PipelineContext`].
pub async fn run(config: RunConfig) -> anyhow::Result<Summary> {
    let catalogue = load_catalogue(&config.lake_parameters)?;
    let meteo = Arc::new(HttpSource::new(&config.data_api, Network::Meteo)?);
    let hydro = Arc::new(HttpSource::new(&config.data_api, Network::Hydro)?);
    let mut context = PipelineContext::new(meteo, hydro).with_references(&catalogue);
    if config.run {
        context = context.with_runner(Arc::new(DockerRunner::new(&config.docker_image)));
    }
    run_sites(&config, &catalogue, context, Utc::now().date_naive()).await
}

/// Schedule the pipelines of the selected sites with the given collaborators.
pub async fn run_sites(
    config: &RunConfig,
    catalogue: &[SiteParameters],
    context: PipelineContext,
    today: NaiveDate,
) -> anyhow::Result<Summary> {
    let sites = select_sites(catalogue, &config.lakes)?;
    info!("Running {} sites with {} workers", sites.len(), config.max_workers);
    let tasks = build_tasks(&sites);
    let sites: BTreeMap<String, SiteParameters> =
        sites.into_iter().map(|s| (s.key.clone(), s)).collect();
    let options = config.pipeline_options(today);
    let site_logs = config.log;

    let execute = move |key: &str| -> anyhow::Result<()> {
        let site = sites
            .get(key)
            .with_context(|| format!("no parameters for site {key}"))?;
        run_site(site, &options, &context, site_logs)
    };
    let summary = lake_sched::run(tasks, config.max_workers, config.debug, execute).await?;
    summary.log();
    Ok(summary)
}

fn run_site(
    site: &SiteParameters,
    options: &PipelineOptions,
    context: &PipelineContext,
    site_logs: bool,
) -> anyhow::Result<()> {
    let _scope = if site_logs {
        SiteScope::enter(&options.simulation_dir, &site.key, &Utc::now())
            .with_context(|| format!("Failed to open log file for {}", site.key))?
    } else {
        SiteScope::disabled()
    };
    info!("{}: processing {}", site.key, site.name);
    let mut pipeline = SitePipeline::new(site, options, context);
    pipeline.run().map_err(|e| {
        error!("{}: {}", site.key, e);
        anyhow::Error::new(e).context(format!("site {}", site.key))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use lake_series::source::StaticSource;

    const CATALOGUE: &str = r#"[
        {"key": "a", "elevation": 400, "surface_area": 1, "trophic_state": "Mesotrophic",
         "latitude": 46, "longitude": 7, "max_depth": 10, "forcing": [{"id": "X"}]},
        {"key": "b", "elevation": 380, "surface_area": 1, "trophic_state": "Mesotrophic",
         "latitude": 46, "longitude": 7, "max_depth": 10, "forcing": [{"id": "X"}],
         "inflows": [{"type": "model_outflow", "id": "a"}]},
        {"key": "c", "elevation": 350, "surface_area": 1, "trophic_state": "Mesotrophic",
         "latitude": 46, "longitude": 7, "max_depth": 10, "forcing": [{"id": "X"}],
         "inflows": [{"type": "model_outflow", "id": "b"}]}
    ]"#;

    fn catalogue() -> Vec<SiteParameters> {
        SiteParameters::parse_catalogue(CATALOGUE).unwrap()
    }

    #[test]
    fn test_build_tasks_from_inflows() {
        let tasks = build_tasks(&catalogue());
        assert_eq!(tasks.len(), 3);
        assert!(tasks[0].dependencies.is_empty());
        assert!(tasks[1].dependencies.contains("a"));
        assert!(tasks[2].dependencies.contains("b"));
    }

    #[test]
    fn test_select_sites() {
        let catalogue = catalogue();
        assert_eq!(select_sites(&catalogue, &[]).unwrap().len(), 3);
        let selected = select_sites(&catalogue, &["c".to_string(), "a".to_string()]).unwrap();
        assert_eq!(selected.iter().map(|s| s.key.as_str()).collect::<Vec<_>>(), vec!["a", "c"]);
        assert!(matches!(
            select_sites(&catalogue, &["z".to_string()]),
            Err(LakeError::Configuration(_))
        ));
    }

    #[test]
    fn test_load_config_with_overrides() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("args.json");
        fs::write(&file, r#"{"lakes": ["a"], "log": false}"#).unwrap();
        let args = RunArgs {
            args_file: file,
            overrides: vec!["max_workers=2".to_string(), "run=false".to_string()],
        };
        let config = load_config(&args).unwrap();
        assert_eq!(config.max_workers, 2);
        assert!(!config.run && !config.log);

        let bad = RunArgs {
            args_file: dir.path().join("args.json"),
            overrides: vec!["max_workers=0".to_string()],
        };
        assert!(load_config(&bad).is_err());
    }

    #[tokio::test]
    async fn test_failed_upstream_blocks_dependents() {
        // No forcing data anywhere: site a fails at the run period stage
        let dir = tempfile::tempdir().unwrap();
        let config = RunConfig {
            simulation_dir: dir.path().join("runs"),
            max_workers: 2,
            ..RunConfig::default()
        };
        let source = Arc::new(StaticSource::new());
        let context = PipelineContext::new(source.clone(), source);
        let today = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();
        let summary = run_sites(&config, &catalogue(), context, today).await.unwrap();
        assert_eq!(summary.succeeded.len(), 0);
        assert_eq!(summary.failed, vec!["a"]);
        assert_eq!(summary.blocked, vec!["b", "c"]);

        let log = fs::read_dir(dir.path().join("runs").join("a"))
            .unwrap()
            .filter_map(|e| e.ok())
            .find(|e| e.file_name().to_string_lossy().starts_with("log_"))
            .unwrap();
        assert!(fs::metadata(log.path()).is_ok());
    }

    #[tokio::test]
    async fn test_overwrite_keeps_site_log() {
        let dir = tempfile::tempdir().unwrap();
        let site_dir = dir.path().join("runs").join("a");
        fs::create_dir_all(&site_dir).unwrap();
        fs::write(site_dir.join("Forcing.dat"), "stale").unwrap();
        let config = RunConfig {
            simulation_dir: dir.path().join("runs"),
            lakes: vec!["a".to_string()],
            overwrite_simulation: true,
            ..RunConfig::default()
        };
        let source = Arc::new(StaticSource::new());
        let context = PipelineContext::new(source.clone(), source);
        let today = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();
        let summary = run_sites(&config, &catalogue(), context, today).await.unwrap();
        assert_eq!(summary.failed, vec!["a"]);

        assert!(!site_dir.join("Forcing.dat").exists());
        let logs = fs::read_dir(&site_dir)
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().starts_with("log_"))
            .count();
        assert_eq!(logs, 1);
    }

    #[tokio::test]
    async fn test_downstream_without_selected_upstream_is_blocked() {
        let dir = tempfile::tempdir().unwrap();
        let config = RunConfig {
            simulation_dir: dir.path().join("runs"),
            lakes: vec!["b".to_string()],
            log: false,
            ..RunConfig::default()
        };
        let source = Arc::new(StaticSource::new());
        let context = PipelineContext::new(source.clone(), source);
        let today = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();
        let summary = run_sites(&config, &catalogue(), context, today).await.unwrap();
        assert!(summary.failed.is_empty());
        assert_eq!(summary.blocked, vec!["b"]);
    }

    #[tokio::test]
    async fn test_debug_mode_returns_first_failure() {
        let dir = tempfile::tempdir().unwrap();
        let config = RunConfig {
            simulation_dir: dir.path().join("runs"),
            lakes: vec!["a".to_string()],
            debug: true,
            log: false,
            ..RunConfig::default()
        };
        let source = Arc::new(StaticSource::new());
        let context = PipelineContext::new(source.clone(), source);
        let today = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();
        assert!(run_sites(&config, &catalogue(), context, today).await.is_err());
    }
}
