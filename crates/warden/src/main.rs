//! Warden node entry point.

mod app;
mod cli;
mod config;
mod logging;
mod signals;

use app::Application;
use cli::CliArgs;
use config::AppConfig;
use tracing::info;

#[tokio::main]
async fn main() {
    let args = CliArgs::parse();
    if let Err(err) = run(args).await {
        eprintln!("fatal: {err}");
        std::process::exit(1);
    }
}

async fn run(args: CliArgs) -> Result<(), Box<dyn std::error::Error>> {
    let mut config = AppConfig::load_from_file(&args.config_path).await?;
    config.apply_cli_overrides(&args);
    config.validate()?;

    logging::setup_logging(&config.logging)?;
    logging::display_banner();
    info!("📂 configuration: {}", args.config_path.display());

    let application = Application::new(config)?;
    application.run().await
}
