//! Cloud cost optimization CLI
//!
//! Runs the VM right-sizing, storage tiering and database scaling runbooks
//! against a resource group, either on Azure or on a local inventory file.

mod commands;
mod config;
mod output;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use commands::run::{self, BackendKind, Backends, RunArgs};
use optimizer_lib::{OptimizerConfig, OptimizerMetrics, ResourceKind};

/// Cloud cost optimization runbooks
#[derive(Parser)]
#[command(name = "costopt")]
#[command(author, version, about = "Cloud cost optimization runbooks", long_about = None)]
pub struct Cli {
    /// Configuration file (defaults to ~/.config/costopt/config.toml if present)
    #[arg(long, env = "COSTOPT_CONFIG")]
    pub config: Option<PathBuf>,

    /// Where resources, metrics and mutations come from
    #[arg(long, value_enum, default_value = "arm")]
    pub backend: BackendKind,

    /// Inventory file for the inventory backend
    #[arg(long, env = "COSTOPT_INVENTORY")]
    pub inventory: Option<PathBuf>,

    /// Azure subscription id for the arm backend
    #[arg(long, env = "AZURE_SUBSCRIPTION_ID")]
    pub subscription: Option<String>,

    /// Output format
    #[arg(long, short, value_enum, default_value = "table")]
    pub format: output::OutputFormat,

    /// Write run metrics in Prometheus text format to this file
    #[arg(long)]
    pub metrics_file: Option<PathBuf>,

    /// Enable debug logging
    #[arg(long, short)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Right-size underutilized virtual machines
    Vm(RunArgs),

    /// Move idle blobs to cheaper access tiers
    Storage(RunArgs),

    /// Scale underutilized databases
    Database(RunArgs),
}

fn init_tracing(format: output::OutputFormat, verbose: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    // Logs go to stderr so stdout carries only the report
    let registry = tracing_subscriber::registry().with(filter);
    match format {
        output::OutputFormat::Json => registry
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .init(),
        output::OutputFormat::Table => registry
            .with(fmt::layer().with_writer(std::io::stderr))
            .init(),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.format, cli.verbose);

    let config_path = config::resolve_config_path(cli.config.as_deref())?;
    let optimizer_config =
        OptimizerConfig::load(config_path.as_deref()).context("Failed to load configuration")?;

    let backends = Backends::connect(
        cli.backend,
        cli.subscription.as_deref(),
        cli.inventory.as_deref(),
    )
    .await?;

    let (kind, args) = match &cli.command {
        Commands::Vm(args) => (ResourceKind::Compute, args),
        Commands::Storage(args) => (ResourceKind::Storage, args),
        Commands::Database(args) => (ResourceKind::Database, args),
    };

    let report = run::run_runbook(kind, &backends, &optimizer_config, args).await?;
    backends.log_inventory_mutations();

    output::print_report(&report, args.simulate, cli.format)?;

    if let Some(path) = &cli.metrics_file {
        std::fs::write(path, OptimizerMetrics::new().render())
            .with_context(|| format!("Failed to write metrics to {}", path.display()))?;
    }

    Ok(())
}
