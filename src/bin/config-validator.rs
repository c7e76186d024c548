//! # Coordinator Configuration Validator
//!
//! Command-line tool for validating coordinator configuration files before a node is
//! started with them. Applies the same layering as the coordinator: defaults, base
//! file, `<name>.<environment>` override and `COORDINATOR__*` environment variables.

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process;
use tasker_coordinator::config::ConfigManager;
use tracing::{error, info, Level};
use tracing_subscriber::FmtSubscriber;

#[derive(Parser)]
#[command(name = "config-validator")]
#[command(about = "Validate coordinator configuration files")]
#[command(version = env!("CARGO_PKG_VERSION"))]
pub struct Cli {
    /// Base configuration file (TOML or YAML)
    #[arg(short, long, default_value = "config/coordinator.toml")]
    file: PathBuf,

    /// Environment override to apply (defaults to COORDINATOR_ENV / APP_ENV)
    #[arg(short, long)]
    environment: Option<String>,

    /// Verbose output level (use multiple times for more verbosity)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Validate the merged configuration (default)
    Validate,

    /// Print the effective configuration as JSON
    Show,

    /// Print one section of the effective configuration
    Section {
        /// Section name (locks, election, execution, backoff, circuit_breakers, events, shutdown)
        name: String,
    },
}

fn main() {
    let cli = Cli::parse();

    let level = match cli.verbose {
        0 => Level::WARN,
        1 => Level::INFO,
        2 => Level::DEBUG,
        _ => Level::TRACE,
    };
    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .finish();
    if tracing::subscriber::set_global_default(subscriber).is_err() {
        eprintln!("warning: tracing subscriber already installed");
    }

    if let Err(e) = run(&cli) {
        error!("{e:#}");
        eprintln!("❌ {e:#}");
        process::exit(1);
    }
}

fn run(cli: &Cli) -> anyhow::Result<()> {
    let environment = cli
        .environment
        .clone()
        .unwrap_or_else(ConfigManager::detect_environment);

    let manager = ConfigManager::load_from_file_with_env(&cli.file, &environment)
        .with_context(|| format!("loading {}", cli.file.display()))?;
    info!(environment = %environment, "Configuration is valid");

    match cli.command.as_ref().unwrap_or(&Commands::Validate) {
        Commands::Validate => {
            println!(
                "✅ {} is valid for environment '{}'",
                cli.file.display(),
                manager.environment()
            );
        }
        Commands::Show => {
            println!("{}", serde_json::to_string_pretty(&manager.debug_config())?);
        }
        Commands::Section { name } => {
            let config = manager.debug_config();
            let Some(section) = config.get(name) else {
                bail!("unknown configuration section '{name}'");
            };
            println!("{}", serde_json::to_string_pretty(section)?);
        }
    }
    Ok(())
}
