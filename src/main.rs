use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::EnvFilter;

use apdhcpd::{Config, DhcpServer, LoggingLink, Result};

#[derive(Parser)]
#[command(name = "apdhcpd")]
#[command(author, version, about = "DHCP server for a soft access point", long_about = None)]
struct Cli {
    #[arg(short, long, default_value = "apdhcpd.json")]
    config: PathBuf,

    #[arg(short, long, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Serve until Ctrl-C
    Run,
    /// Print the effective configuration as JSON
    ShowConfig,
    /// Validate the configuration and print the resolved addresses
    CheckConfig,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level)),
        )
        .init();

    let config = Config::load_or_create(&cli.config)?;

    match cli.command.unwrap_or(Commands::Run) {
        Commands::Run => {
            info!("Starting DHCP server with config: {:?}", cli.config);
            let server = DhcpServer::new(Arc::new(LoggingLink::new()));
            server.start(config).await?;

            tokio::signal::ctrl_c().await?;
            info!("Received shutdown signal, stopping server...");

            for lease in server.leases() {
                info!("Lease: {}", lease);
            }
            server.stop().await;
            Ok(())
        }
        Commands::ShowConfig => {
            println!("{}", serde_json::to_string_pretty(&config)?);
            Ok(())
        }
        Commands::CheckConfig => {
            let resolved = config.resolve()?;
            println!("{:<16} {}", "Server", resolved.server_address);
            println!("{:<16} {}", "Netmask", resolved.netmask);
            println!("{:<16} {}", "Gateway", resolved.gateway);
            println!("{:<16} {} - {}", "Pool", resolved.pool_start, resolved.pool_end);
            println!("{:<16} {}", "Pool size", resolved.pool_size());
            println!("{:<16} {}s", "Lease", resolved.lease_seconds);
            println!(
                "{:<16} {}s / {}s",
                "T1 / T2",
                resolved.renewal_seconds(),
                resolved.rebinding_seconds()
            );
            Ok(())
        }
    }
}
