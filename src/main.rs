//! # Outreach — Campaign Dispatch Server
//!
//! Serves the worker polling API and runs one-off maintenance passes
//! against the same dispatch store.
//!
//! Usage:
//!   outreach serve                        # Start the gateway (default 127.0.0.1:3000)
//!   outreach serve --port 8080            # Custom port
//!   outreach process <campaign-id>        # One orchestration pass
//!   outreach sweep                        # Reclaim stale and orphaned claims
//!   outreach init-config                  # Write a default config file

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use outreach_core::config::OutreachConfig;
use outreach_gateway::AppState;
use outreach_scheduler::DispatchEngine;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(
    name = "outreach",
    version,
    about = "📨 Outreach — rate-limited campaign dispatcher"
)]
struct Cli {
    /// Config file (default: ~/.outreach/config.toml)
    #[arg(short, long, global = true)]
    config: Option<String>,

    /// Database path, overrides `store.path`
    #[arg(long, global = true)]
    db: Option<String>,

    /// Verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    json_logs: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Start the HTTP gateway
    Serve {
        #[arg(short, long)]
        port: Option<u16>,
        #[arg(long)]
        host: Option<String>,
    },
    /// Run one orchestration pass for a campaign
    Process { campaign_id: String },
    /// Reclaim expired claims and release disconnected accounts
    Sweep,
    /// Print campaign stats as JSON
    Stats { campaign_id: String },
    /// Write the default config file
    InitConfig {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

fn expand_path(p: &str) -> PathBuf {
    PathBuf::from(shellexpand::tilde(p).to_string())
}

fn init_logging(cli: &Cli) {
    let filter = if cli.verbose {
        "outreach=debug,outreach_scheduler=debug,outreach_gateway=debug,tower_http=debug"
    } else {
        "outreach=info,outreach_scheduler=info,outreach_gateway=info"
    };
    let builder = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)))
        .with_target(false);
    if cli.json_logs {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn load_config(path: &Path) -> Result<OutreachConfig> {
    if path.exists() {
        OutreachConfig::load_from(path).with_context(|| format!("loading {}", path.display()))
    } else {
        tracing::debug!("No config at {}, using defaults", path.display());
        Ok(OutreachConfig::default())
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(&cli);

    let config_path = cli
        .config
        .as_deref()
        .map(expand_path)
        .unwrap_or_else(OutreachConfig::default_path);

    if let Command::InitConfig { force } = cli.command {
        if config_path.exists() && !force {
            println!("⚠️  Config already exists at {} (use --force to overwrite)", config_path.display());
            return Ok(());
        }
        OutreachConfig::default().save_to(&config_path)?;
        println!("✅ Wrote default config to {}", config_path.display());
        return Ok(());
    }

    let mut config = load_config(&config_path)?;
    if let Some(db) = &cli.db {
        config.store.path = db.clone();
    }
    let db_path = expand_path(&config.store.path);
    let engine = DispatchEngine::open(&db_path, &config)?;

    match cli.command {
        Command::Serve { port, host } => {
            if let Some(port) = port {
                config.gateway.port = port;
            }
            if let Some(host) = host {
                config.gateway.host = host;
            }
            println!("📨 Outreach v{}", env!("CARGO_PKG_VERSION"));
            println!("   🌐 Gateway:  http://{}:{}", config.gateway.host, config.gateway.port);
            println!("   🗄️  Database: {}", db_path.display());
            println!();
            outreach_gateway::start(AppState::new(engine, &config)).await?;
        }
        Command::Process { campaign_id } => {
            let status = tokio::task::spawn_blocking(move || engine.process(&campaign_id)).await??;
            println!("{status}");
        }
        Command::Sweep => {
            let report = tokio::task::spawn_blocking(move || engine.sweep()).await??;
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        Command::Stats { campaign_id } => {
            let lookup = campaign_id.clone();
            let stats = tokio::task::spawn_blocking(move || engine.stats(&lookup))
                .await??
                .with_context(|| format!("campaign {campaign_id} not found"))?;
            println!("{}", serde_json::to_string_pretty(&stats)?);
        }
        Command::InitConfig { .. } => {}
    }

    Ok(())
}
