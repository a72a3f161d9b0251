mod cli;

use std::io::Write;
use std::process;

use anyhow::{Context, Result};
use clap::Parser;
use tracing_subscriber::EnvFilter;

use obsaudit::{AuditConfig, ClassificationEngine, Collaborators, RunOptions, formatter};

use cli::Cli;

fn init_tracing(cli: &Cli) -> Result<()> {
    let level = cli.verbosity.tracing_level_filter();
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level.to_string()));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false);

    let installed = if cli.json {
        builder.json().try_init()
    } else {
        builder.try_init()
    };
    installed.map_err(|e| anyhow::anyhow!("failed to initialize tracing subscriber: {e}"))
}

/// The file (or defaults) with command line flags applied on top.
fn load_config(cli: &Cli) -> Result<AuditConfig> {
    let mut config = match &cli.config {
        Some(path) => AuditConfig::load(path)?,
        None => AuditConfig::default(),
    };
    if let Some(api) = &cli.api {
        config.api_url = api.clone();
    }
    if let Some(repo) = &cli.repo {
        config.project = repo.clone();
    }
    if let Some(dir) = &cli.work_dir {
        config.work_dir = dir.clone();
    }
    if let Some(n) = cli.max_concurrency {
        config.max_concurrency = n;
    }
    config.validate()?;
    Ok(config)
}

async fn run(cli: Cli) -> Result<()> {
    let config = load_config(&cli)?;
    let options = RunOptions {
        assume_setup: cli.assume_setup,
        advisory: cli.rustsec_id.clone(),
    };
    let collaborators = Collaborators::system(&config);
    let engine = ClassificationEngine::new(config, options, collaborators)?;

    let packages = match cli.package {
        Some(packages) => packages,
        None => engine.list_packages().await?,
    };
    tracing::info!(count = packages.len(), project = %engine.config().project, "auditing packages");

    let report = engine.run(packages).await?;

    let mut stdout = std::io::stdout().lock();
    formatter(cli.json)
        .write_report(&report, &mut stdout)
        .context("failed to write report")?;
    stdout.flush()?;
    Ok(())
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    if let Err(e) = init_tracing(&cli) {
        eprintln!("error: {e:#}");
        process::exit(1);
    }

    if let Err(e) = run(cli).await {
        eprintln!("error: {e:#}");
        process::exit(1);
    }
}
