//! guardctl - operator CLI for mesh VPN guard gateways
//!
//! ## Commands
//!
//! - `guardctl create --config <path|->` - provision a guard
//! - `guardctl status <id>` / `guardctl list` - live discovery
//! - `guardctl teardown <id>` - delete a guard and everything it owns
//! - `guardctl peer <id> --vnet <id> [--subnet <id>]` / `guardctl unpeer` - workload peering
//! - `guardctl config show|path` - local configuration

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use guard_core::GuardConfig;
use std::path::PathBuf;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

mod commands;
mod output;

/// Provision, discover and peer mesh VPN guard gateways
#[derive(Parser)]
#[command(name = "guardctl")]
#[command(version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Path to the configuration file
    #[arg(long, global = true, env = "GUARDCTL_CONFIG", value_name = "FILE")]
    config_file: Option<PathBuf>,

    /// Debug-level logging (RUST_LOG takes precedence)
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit logs as JSON lines on stderr
    #[arg(long, global = true)]
    log_json: bool,

    /// Abandon the operation after this many seconds
    #[arg(long, global = true, value_name = "SECS")]
    timeout: Option<u64>,

    /// Print results as JSON on stdout
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Provision a new guard
    Create {
        /// WireGuard configuration file, or '-' for stdin
        #[arg(long, value_name = "PATH")]
        config: String,

        /// CIDRs reachable through the mesh
        #[arg(long, value_delimiter = ',', value_name = "CIDR,...")]
        mesh_cidrs: Vec<String>,

        /// Cloud location (defaults to cloud.default_location)
        #[arg(long)]
        location: Option<String>,

        /// Operator metadata stored on the guard, as key=value
        #[arg(long = "meta", value_name = "KEY=VALUE", value_parser = parse_key_value)]
        metadata: Vec<(String, String)>,

        /// Resume a partially created guard instead of generating a new id
        #[arg(long, value_name = "GUARD_ID")]
        guard_id: Option<String>,
    },

    /// Show one guard, reconstructed from live resources
    Status {
        guard_id: String,
    },

    /// List every guard under the management marker
    List,

    /// Delete a guard and every resource it owns
    Teardown {
        guard_id: String,

        /// Skip the interactive confirmation
        #[arg(long)]
        yes: bool,
    },

    /// Peer a guard's network with a workload network
    Peer {
        guard_id: String,

        /// Resource id of the workload network
        #[arg(long, value_name = "NETWORK_ID")]
        vnet: String,

        /// Workload subnet that should route mesh traffic through the guard
        #[arg(long, value_name = "SUBNET_ID")]
        subnet: Option<String>,
    },

    /// Remove a guard's peering with a workload network
    Unpeer {
        guard_id: String,

        #[arg(long, value_name = "NETWORK_ID")]
        vnet: String,
    },

    /// Inspect the local configuration
    Config {
        #[command(subcommand)]
        command: ConfigCommand,
    },
}

#[derive(Subcommand)]
enum ConfigCommand {
    /// Print the effective configuration
    Show,
    /// Print the configuration file location
    Path,
}

fn parse_key_value(s: &str) -> std::result::Result<(String, String), String> {
    let (key, value) = s
        .split_once('=')
        .ok_or_else(|| format!("expected KEY=VALUE, got '{}'", s))?;
    if key.trim().is_empty() {
        return Err(format!("empty key in '{}'", s));
    }
    Ok((key.trim().to_string(), value.to_string()))
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose, cli.log_json)?;

    let path = cli.config_file.clone().unwrap_or_else(GuardConfig::default_path);
    let config = GuardConfig::load_or_create(&path)
        .with_context(|| format!("Failed to load configuration from {}", path.display()))?;
    config.validate().context("Invalid configuration")?;
    debug!(path = %path.display(), "Configuration loaded");

    let cancel = cancellation(cli.timeout);
    let ctx = commands::Context {
        config,
        config_path: path,
        json: cli.json,
        cancel,
    };

    match cli.command {
        Commands::Create {
            config,
            mesh_cidrs,
            location,
            metadata,
            guard_id,
        } => {
            let args = commands::CreateArgs {
                wireguard_config: config,
                mesh_cidrs,
                location,
                metadata: metadata.into_iter().collect(),
                guard_id,
            };
            commands::create(&ctx, args).await
        }
        Commands::Status { guard_id } => commands::status(&ctx, &guard_id).await,
        Commands::List => commands::list(&ctx).await,
        Commands::Teardown { guard_id, yes } => commands::teardown(&ctx, &guard_id, yes).await,
        Commands::Peer {
            guard_id,
            vnet,
            subnet,
        } => commands::peer(&ctx, &guard_id, &vnet, subnet).await,
        Commands::Unpeer { guard_id, vnet } => commands::unpeer(&ctx, &guard_id, &vnet).await,
        Commands::Config { command } => match command {
            ConfigCommand::Show => commands::config_show(&ctx),
            ConfigCommand::Path => {
                println!("{}", ctx.config_path.display());
                Ok(())
            }
        },
    }
}

/// Cancelled on Ctrl-C, and when `timeout` elapses if one is given
fn cancellation(timeout: Option<u64>) -> CancellationToken {
    let token = CancellationToken::new();

    let on_signal = token.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted; stopping after the current cloud call");
            on_signal.cancel();
        }
    });

    if let Some(secs) = timeout {
        let on_timeout = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(secs)).await;
            warn!("Timed out after {}s", secs);
            on_timeout.cancel();
        });
    }

    token
}

/// Logs go to stderr so stdout stays parseable
fn init_logging(verbose: bool, json: bool) -> Result<()> {
    let level = if verbose { "debug" } else { "info" };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .or_else(|_| tracing_subscriber::EnvFilter::try_new(level))
        .context("Failed to create log filter")?;

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false);

    if json {
        builder.json().init();
    } else {
        builder.compact().init();
    }
    Ok(())
}
