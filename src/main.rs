use anyhow::Result;
use clap::{Parser, Subcommand};
use qr2fa::Config;
use std::path::PathBuf;

/// qr2fa — QR cross-device pairing server
#[derive(Parser, Debug)]
#[command(name = "qr2fa", version, about = "QR cross-device pairing server")]
struct Cli {
    /// Log level (trace, debug, info, warn, error). RUST_LOG takes precedence.
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the HTTP + WebSocket gateway
    Serve {
        /// Bind address (overrides config and QR2FA_HOST)
        #[arg(long)]
        host: Option<String>,

        /// Listen port (overrides config and PORT)
        #[arg(short, long)]
        port: Option<u16>,

        /// Config file path
        #[arg(long)]
        config: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    use tracing_subscriber::EnvFilter;
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level));
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .init();

    match cli.command {
        Command::Serve { host, port, config } => {
            let mut config = Config::load(config.as_deref())?;
            config.apply_env_overrides()?;
            if let Some(host) = host {
                config.gateway.host = host;
            }
            if let Some(port) = port {
                config.gateway.port = port;
            }

            tracing::info!(
                version = env!("CARGO_PKG_VERSION"),
                host = %config.gateway.host,
                port = config.gateway.port,
                "starting qr2fa"
            );
            qr2fa::gateway::run_gateway(config).await
        }
    }
}
