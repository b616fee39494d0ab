//! # Runforge Configuration Validator
//!
//! Command-line tool for validating orchestrator configuration across
//! environments before starting the engine.

use clap::{Parser, Subcommand};
use runforge_core::config::{ConfigManager, OrchestratorConfig};
use std::path::{Path, PathBuf};
use std::process;
use tracing::{error, info, Level};
use tracing_subscriber::FmtSubscriber;

#[derive(Parser)]
#[command(name = "config-validator")]
#[command(about = "Validate Runforge orchestrator configuration")]
#[command(version = env!("CARGO_PKG_VERSION"))]
pub struct Cli {
    /// Environment to validate (development, test, production, ...)
    #[arg(short, long, default_value = "development")]
    environment: String,

    /// Configuration directory path (default: config)
    #[arg(short, long)]
    config_dir: Option<PathBuf>,

    /// Verbose output level (use multiple times for more verbosity)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Output format (yaml, json)
    #[arg(long, default_value = "yaml")]
    format: String,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Validate and print the effective configuration
    Validate,

    /// List environments with an overlay file
    Environments,

    /// Show the default configuration
    Defaults,
}

fn main() {
    let cli = Cli::parse();

    let level = match cli.verbose {
        0 => Level::WARN,
        1 => Level::INFO,
        2 => Level::DEBUG,
        _ => Level::TRACE,
    };
    let _subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .try_init();

    let result = match &cli.command {
        Some(Commands::Validate) | None => validate(&cli),
        Some(Commands::Environments) => list_environments(&cli),
        Some(Commands::Defaults) => print_config(&OrchestratorConfig::default(), &cli.format),
    };

    match result {
        Ok(()) => {
            info!("Configuration check completed successfully");
            process::exit(0);
        }
        Err(e) => {
            error!("Configuration check failed: {e}");
            eprintln!("❌ {e}");
            process::exit(1);
        }
    }
}

fn validate(cli: &Cli) -> Result<(), Box<dyn std::error::Error>> {
    println!("🔧 Validating Runforge Configuration");
    println!("Environment: {}", cli.environment);
    if let Some(dir) = &cli.config_dir {
        println!("Config Directory: {}", dir.display());
    }
    println!();

    let manager = ConfigManager::load_from_directory_with_env(cli.config_dir.clone(), &cli.environment)?;
    let config = manager.config();

    println!("✅ Configuration is valid");
    println!("   Runs root:           {}", config.runs_root().display());
    println!("   Trainer program:     {}", config.supervisor.trainer_program);
    println!(
        "   Stop grace period:   {}s (kill wait {}s)",
        config.supervisor.stop_grace_period_seconds, config.supervisor.kill_wait_seconds
    );
    println!(
        "   Stuck thresholds:    startup {}s / steady {}s after {}s grace",
        config.health.startup_silence_threshold_seconds,
        config.health.steady_silence_threshold_seconds,
        config.health.min_grace_period_seconds
    );
    println!();

    if cli.verbose > 0 {
        print_config(config, &cli.format)?;
    }
    Ok(())
}

fn list_environments(cli: &Cli) -> Result<(), Box<dyn std::error::Error>> {
    let base = cli.config_dir.clone().unwrap_or_else(|| PathBuf::from("config"));
    let overlays = base.join("environments");
    println!("📂 Environments in {}", overlays.display());

    let mut names = environment_names(&overlays)?;
    names.sort();
    if names.is_empty() {
        println!("   (none)");
    }
    for name in names {
        println!("   - {name}");
    }
    Ok(())
}

fn environment_names(dir: &Path) -> std::io::Result<Vec<String>> {
    if !dir.is_dir() {
        return Ok(Vec::new());
    }
    let mut names = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        let is_yaml = matches!(
            path.extension().and_then(|ext| ext.to_str()),
            Some("yaml" | "yml")
        );
        if let (true, Some(stem)) = (is_yaml, path.file_stem().and_then(|s| s.to_str())) {
            names.push(stem.to_string());
        }
    }
    Ok(names)
}

fn print_config(config: &OrchestratorConfig, format: &str) -> Result<(), Box<dyn std::error::Error>> {
    let rendered = match format {
        "json" => serde_json::to_string_pretty(config)?,
        _ => serde_yaml::to_string(config)?,
    };
    println!("{rendered}");
    Ok(())
}
