use std::str::FromStr;

use anyhow::anyhow;
use clap::Parser;
use log::{error, LevelFilter};

use cycl::cli::Cli;
use cycl::config::Settings;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // init logger
    env_logger::Builder::from_default_env()
        .filter_level(LevelFilter::from_str(&cli.log_level).unwrap_or(LevelFilter::Info))
        .init();

    let settings = match Settings::load(cli.config_paths()) {
        Ok(settings) => settings,
        Err(e) => {
            error!("Failed to load config: {:#}", e);
            std::process::exit(1);
        }
    };

    // Losing the race to Ctrl-C drops the command future and its SSH session.
    let result = tokio::select! {
        result = cli.command.execute(&settings) => result,
        _ = tokio::signal::ctrl_c() => Err(anyhow!("Interrupted")),
    };

    if let Err(e) = result {
        error!("Command failed: {:#}", e);
        std::process::exit(1);
    }
}
