//! lake-cli - run operational lake simulations.

use clap::Parser;
use lake_log::SiteLogger;
use log::info;

#[derive(Parser)]
#[command(
    name = "lake-cli",
    version,
    about = "Prepare, run and publish operational lake simulations"
)]
struct Cli {
    #[command(flatten)]
    args: lake_cmd::RunArgs,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    SiteLogger::new().init()?;
    let cli = Cli::parse();
    let config = lake_cmd::load_config(&cli.args)?;
    info!("Arguments: {:?}", config);
    let summary = lake_cmd::run(config).await?;
    if !summary.is_success() {
        std::process::exit(1);
    }
    Ok(())
}
