use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::Context;
use clap::Parser;
use skyplate::{ApiKey, Config};

/// Plate-solve a night-sky photo on nova.astrometry.net and overlay the sky on it.
#[derive(Parser, Debug)]
#[command(name = "skyplate", version, about)]
struct Cli {
    /// YAML or JSON configuration file
    #[arg(long)]
    config: Option<PathBuf>,

    /// Directory searched for the photo
    #[arg(long)]
    dir: Option<PathBuf>,

    /// Case-insensitive substring of the photo's file name
    #[arg(long)]
    pattern: Option<String>,

    /// Directory for overlays and downloaded artifacts
    #[arg(long)]
    output_dir: Option<PathBuf>,

    /// Solver API base URL, e.g. http://nova.astrometry.net/api
    #[arg(long)]
    api_url: Option<String>,

    /// Draw the grid only, without constellation figures
    #[arg(long)]
    no_overlay: bool,

    /// Also download the solver's own annotated image (best effort)
    #[arg(long)]
    annotated: bool,

    /// Log filter, overridden by RUST_LOG
    #[arg(long, default_value = "info")]
    log_level: String,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    if let Err(err) = common::log_setup::setup_logging(&cli.log_level, Path::new("logs"), "skyplate") {
        eprintln!("Logging unavailable: {err:#}");
    }

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            tracing::error!("{:#}", err);
            let code = err
                .downcast_ref::<skyplate::Error>()
                .map(skyplate::Error::exit_code)
                .unwrap_or(1);
            ExitCode::from(code as u8)
        }
    }
}

fn run(cli: Cli) -> anyhow::Result<()> {
    let config = build_config(&cli)?;
    let api_key = ApiKey::from_env()?;

    let summary = skyplate::run(&config, &api_key)?;
    tracing::info!(
        "Solved {} as job {} ({} outputs)",
        summary.photo.display(),
        summary.job.job,
        summary.outputs.len()
    );
    Ok(())
}

fn build_config(cli: &Cli) -> anyhow::Result<Config> {
    let mut config = match &cli.config {
        Some(path) => Config::load(path)
            .with_context(|| format!("Failed to load config {}", path.display()))?,
        None => Config::default(),
    };

    if let Some(dir) = &cli.dir {
        config.discovery.dir = dir.clone();
    }
    if let Some(pattern) = &cli.pattern {
        config.discovery.pattern = pattern.clone();
    }
    if let Some(dir) = &cli.output_dir {
        config.output.dir = dir.clone();
    }
    if let Some(url) = &cli.api_url {
        config.service.set_api_url(url);
    }
    if cli.no_overlay {
        config.overlay.enabled = false;
    }
    if cli.annotated {
        config.artifact.fetch_annotated = true;
    }

    config.validate()?;
    tracing::debug!("Configuration: {:?}", config);
    Ok(config)
}
