//! appdashd: the dashboard daemon.
//!
//! Single binary that assembles the dashboard:
//! - Cache store (redb)
//! - Control plane and roster clients
//! - Refresh controller + periodic refresh loop
//! - REST API + log viewer
//!
//! # Usage
//!
//! ```text
//! appdashd serve --config /etc/appdash/appdash.toml --port 1080
//! appdashd print-config > appdash.toml
//! ```

mod config;
mod serve;

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use config::DashboardConfig;

#[derive(Parser)]
#[command(name = "appdashd", about = "Cluster dashboard daemon")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Serve the dashboard and keep its cache fresh.
    Serve {
        /// Path to appdash.toml. Defaults apply when omitted.
        #[arg(long)]
        config: Option<PathBuf>,

        /// Port to listen on (overrides the config file).
        #[arg(long)]
        port: Option<u16>,

        /// Data directory for the cache database (overrides the config file).
        #[arg(long)]
        data_dir: Option<PathBuf>,

        /// Control plane `host:port` (overrides the config file).
        #[arg(long)]
        control_plane: Option<String>,

        /// Roster service `host:port` (overrides the config file).
        #[arg(long)]
        roster: Option<String>,
    },

    /// Print the default configuration as TOML.
    PrintConfig,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .or_else(|_| tracing_subscriber::EnvFilter::try_new("info,appdashd=debug,appdash=debug"))?;
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let cli = Cli::parse();

    match cli.command {
        Command::Serve {
            config,
            port,
            data_dir,
            control_plane,
            roster,
        } => {
            let mut config = match config {
                Some(path) => DashboardConfig::from_file(&path)?,
                None => DashboardConfig::default(),
            };
            if let Some(port) = port {
                config.server.port = port;
            }
            if let Some(data_dir) = data_dir {
                config.server.data_dir = data_dir;
            }
            if let Some(addr) = control_plane {
                config.upstream.control_plane = addr;
            }
            if let Some(addr) = roster {
                config.upstream.roster = addr;
            }
            serve::run_serve(config).await
        }
        Command::PrintConfig => {
            print!("{}", DashboardConfig::default().to_toml_string()?);
            Ok(())
        }
    }
}
