use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use oofs_config::logging::{init_logging, LogLevel};
use oofs_config::Config;
use oofs_daemon::Server;

#[derive(Parser)]
#[command(name = "oofsd")]
#[command(version, about = "OOFS session server", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Port to listen on (overrides config and OOFS_PORT)
    #[arg(long, global = true)]
    port: Option<u16>,

    /// Address to bind
    #[arg(long, global = true)]
    listen: Option<String>,

    /// Increase log verbosity (-v info, -vv debug)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the server (default)
    Start,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(LogLevel::from_verbosity(cli.verbose.saturating_add(1)));

    let mut config = Config::load().context("Failed to load configuration")?;
    if let Some(port) = cli.port {
        config.server.port = port;
    }
    if let Some(listen) = cli.listen {
        config.server.listen = listen;
    }

    match cli.command.unwrap_or(Commands::Start) {
        Commands::Start => {
            let server = Server::bind(config).await?;
            server.run().await?;
        }
    }
    Ok(())
}
