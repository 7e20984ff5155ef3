use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

mod commands;

#[derive(Parser, Debug)]
#[command(name = "apsync", version, about = "Access Provider sync for SQL warehouses")]
struct Cli {
    /// Path to the YAML configuration file.
    #[arg(long, short, global = true, default_value = "apsync.yaml")]
    config: PathBuf,

    /// Warehouse URL. Overrides the connection section of the configuration.
    #[arg(long, global = true, env = "APSYNC_DATABASE_URL")]
    database_url: Option<String>,

    #[command(subcommand)]
    cmd: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Apply Access Providers to the warehouse and write feedback as JSON.
    Export {
        /// Access Providers, as YAML or JSON.
        input: PathBuf,

        /// Feedback output file. Defaults to stdout.
        #[arg(long, short)]
        output: Option<PathBuf>,
    },

    /// Read roles and policies from the warehouse as Access Providers.
    Import {
        /// Output file. Defaults to stdout.
        #[arg(long, short)]
        output: Option<PathBuf>,
    },

    /// Validate the configuration without connecting.
    CheckConfig,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.cmd {
        Command::Export { input, output } => {
            commands::export::run(&cli.config, cli.database_url, &input, output.as_deref()).await?
        }
        Command::Import { output } => {
            commands::import::run(&cli.config, cli.database_url, output.as_deref()).await?
        }
        Command::CheckConfig => commands::check::run(&cli.config)?,
    }

    Ok(())
}
