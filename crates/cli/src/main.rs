//! Ludus Range Watch CLI - Main Entry Point
//!
//! Sizes range topologies and follows range deployments and template
//! builds against a Ludus server.

use anyhow::Context;
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};

use ludus_cli::commands::{config as config_cmd, range, templates, topology};
use ludus_cli::output::{self, print_error};
use ludus_cli::{CliConfig, LudusClient};

/// Ludus Range Watch - range sizing and deploy tracking
#[derive(Parser)]
#[command(name = "ludus-watch")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Config file
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Ludus API base URL
    #[arg(long, env = "LUDUS_API_BASE_URL", global = true)]
    api_url: Option<String>,

    /// Ludus API key
    #[arg(long, env = "LUDUS_API_KEY", hide_env_values = true, global = true)]
    api_key: Option<String>,

    /// Skip TLS certificate verification
    #[arg(long, global = true)]
    insecure: bool,

    /// Output format
    #[arg(long, default_value = "table", global = true)]
    format: output::OutputFormat,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Range status, deployment and logs
    #[command(subcommand)]
    Range(range::RangeCommands),

    /// Template build status and logs
    #[command(subcommand)]
    Templates(templates::TemplateCommands),

    /// Resource totals of a range topology
    #[command(subcommand)]
    Topology(topology::TopologyCommands),

    /// Manage the CLI config file
    #[command(subcommand)]
    Config(config_cmd::ConfigCommands),

    /// Show version information
    Version,
}

impl Cli {
    /// Config file merged with command-line and environment overrides
    fn effective_config(&self, path: &Path) -> anyhow::Result<CliConfig> {
        let mut config = CliConfig::load(path)
            .with_context(|| format!("Failed to load config from {}", path.display()))?;

        if let Some(url) = &self.api_url {
            config.api_base_url = url.clone();
        }
        if let Some(key) = &self.api_key {
            config.api_key = Some(key.clone());
        }
        if self.insecure {
            config.insecure_tls = true;
        }
        config.validate()?;
        Ok(config)
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let path = cli.config.clone().unwrap_or_else(CliConfig::default_path);
    let config = cli.effective_config(&path)?;
    let format = cli.format;

    match cli.command {
        Commands::Range(cmd) => {
            let client = LudusClient::new(&config)?;
            range::execute(cmd, client, &config, format).await?
        }
        Commands::Templates(cmd) => {
            let client = LudusClient::new(&config)?;
            templates::execute(cmd, client, &config, format).await?
        }
        Commands::Topology(cmd) => {
            // Local files need no server
            let client = LudusClient::new(&config).ok();
            topology::execute(cmd, client, format).await?
        }
        Commands::Config(cmd) => config_cmd::execute(cmd, &config, &path, format)?,
        Commands::Version => {
            println!("Ludus Range Watch v{}", env!("CARGO_PKG_VERSION"));
            println!("Core library: ludus-common v{}", ludus_common::VERSION);
        }
    }

    Ok(())
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // Initialize logging
    let log_level = if cli.verbose { "debug" } else { "warn" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level)),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    if let Err(e) = run(cli).await {
        print_error(&format!("{:#}", e));
        std::process::exit(1);
    }
}
