//! Heirloom server — headless daemon for the inheritance engine.
//!
//! Runs the distribution scheduler and proof-of-life monitor against the
//! shared SQLite store, calling out to the escrow ledger bridge and the
//! email channel.
//!
//! # Usage
//!
//! ```bash
//! heirloom-server --config /path/to/heirloom.toml
//! heirloom-server --check    # Run one cycle and exit
//! heirloom-server --validate # Validate config and exit
//! ```

mod activity;
mod config;
mod daemon;
mod ledger;

use anyhow::{Context, Result};
use std::path::PathBuf;

fn main() -> Result<()> {
    // Parse CLI args (minimal, no clap dependency needed)
    let args: Vec<String> = std::env::args().collect();

    let mut config_path = PathBuf::from("/config/heirloom.toml");
    let mut one_shot = false;
    let mut validate_only = false;

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--config" | "-c" => {
                i += 1;
                if i < args.len() {
                    config_path = PathBuf::from(&args[i]);
                } else {
                    anyhow::bail!("--config requires a path argument");
                }
            }
            "--check" | "--once" => {
                one_shot = true;
            }
            "--validate" => {
                validate_only = true;
            }
            "--help" | "-h" => {
                print_help();
                return Ok(());
            }
            "--version" | "-V" => {
                println!("heirloom-server {}", env!("CARGO_PKG_VERSION"));
                return Ok(());
            }
            other => {
                anyhow::bail!("Unknown argument: {}", other);
            }
        }
        i += 1;
    }

    // Load config, apply env overrides, validate
    let mut server_config = config::ServerConfig::from_file(&config_path)
        .with_context(|| format!("Failed to load config from {}", config_path.display()))?;
    server_config.apply_env_overrides();
    server_config
        .validate()
        .context("Configuration validation failed")?;

    // Init logger
    std::env::set_var("RUST_LOG", &server_config.server.log_level);
    env_logger::init();

    if validate_only {
        println!("Configuration is valid.");
        println!("  Data dir:      {}", server_config.server.data_dir.display());
        println!(
            "  Tick interval: {} secs",
            server_config.server.tick_interval_secs
        );
        println!("  Worker id:     {}", server_config.server.worker_id);
        println!("  Ledger mode:   {}", server_config.ledger.mode);
        println!(
            "  Email notify:  {}",
            server_config.notifications.email.is_some()
        );
        return Ok(());
    }

    let rt = tokio::runtime::Runtime::new().context("Failed to create Tokio runtime")?;

    if one_shot {
        log::info!("Running single cycle");
        rt.block_on(daemon::run_once(server_config))?;
        log::info!("Done.");
    } else {
        let outcome = rt.block_on(async {
            tokio::select! {
                result = daemon::run(server_config) => result,
                _ = tokio::signal::ctrl_c() => {
                    log::info!("Received shutdown signal. Exiting.");
                    Ok(())
                }
            }
        });

        if let Err(e) = outcome {
            log::error!("Server error: {e:#}");
            std::process::exit(1);
        }
    }

    Ok(())
}

fn print_help() {
    println!(
        r#"Heirloom server — inheritance distribution and claim engine daemon

USAGE:
    heirloom-server [OPTIONS]

OPTIONS:
    -c, --config <PATH>   Config file path (default: /config/heirloom.toml)
    --check, --once       Run a single cycle and exit
    --validate            Validate config file and exit
    -h, --help            Show this help message
    -V, --version         Show version

ENVIRONMENT VARIABLES (override config file):
    HEIRLOOM_DATA_DIR         Data directory path
    HEIRLOOM_TICK_INTERVAL    Tick interval in seconds
    HEIRLOOM_LOG_LEVEL        Log level (error/warn/info/debug/trace)
    HEIRLOOM_WORKER_ID        Worker identity for lock rows
    HEIRLOOM_CIPHER_KEY       Claim-code cipher key (64 hex chars)
    HEIRLOOM_LEDGER_MODE      Ledger mode (http/dry_run)
    HEIRLOOM_LEDGER_ENDPOINT  Ledger bridge base URL
    HEIRLOOM_LEDGER_TOKEN     Ledger bridge bearer token

EXAMPLES:
    # Run as daemon with config file
    heirloom-server --config /path/to/heirloom.toml

    # Single cycle (useful for cron jobs)
    heirloom-server --config heirloom.toml --check

    # Validate configuration
    heirloom-server --config heirloom.toml --validate
"#
    );
}
