//! Room relay process.
//!
//! ```text
//! fmsocket-relay --config relay.toml --port 3000 --http-port 3001
//! ```
//!
//! `RUST_LOG` takes precedence over the configured log level.

use std::net::IpAddr;
use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use fmsocket::{RelayConfig, RelayServer};

/// fmsocket relay command-line arguments.
///
/// CLI values override settings loaded from the config file.
#[derive(Parser, Debug)]
#[command(name = "fmsocket-relay", about = "fmsocket room relay", version)]
struct CliArgs {
    /// TOML config file.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Address to bind.
    #[arg(long)]
    bind: Option<IpAddr>,

    /// WebSocket port.
    #[arg(long)]
    port: Option<u16>,

    /// Lobby HTTP port.
    #[arg(long, conflicts_with = "no_http")]
    http_port: Option<u16>,

    /// Disable the lobby HTTP server.
    #[arg(long)]
    no_http: bool,

    /// Log level (error, warn, info, debug, trace).
    #[arg(long)]
    log_level: Option<String>,
}

impl CliArgs {
    fn apply(&self, config: &mut RelayConfig) {
        if let Some(bind) = self.bind {
            config.bind = bind;
        }
        if let Some(port) = self.port {
            config.port = port;
        }
        if self.no_http {
            config.http_port = None;
        } else if let Some(http_port) = self.http_port {
            config.http_port = Some(http_port);
        }
        if let Some(ref level) = self.log_level {
            config.log_level = level.clone();
        }
    }
}

fn init_logging(level: &str) {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let console_layer = fmt::layer()
        .with_target(true)
        .with_thread_names(true)
        .with_level(true)
        .with_timer(fmt::time::uptime());

    tracing_subscriber::registry()
        .with(env_filter)
        .with(console_layer)
        .init();
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = CliArgs::parse();

    let mut config = match args.config.as_deref() {
        Some(path) => match RelayConfig::load(path) {
            Ok(config) => config,
            Err(e) => {
                eprintln!("fmsocket-relay: {e}");
                return ExitCode::FAILURE;
            }
        },
        None => RelayConfig::default(),
    };
    args.apply(&mut config);

    init_logging(&config.log_level);

    let server = match RelayServer::bind(config).await {
        Ok(server) => server,
        Err(e) => {
            error!(error = %e, "Relay failed to start");
            return ExitCode::FAILURE;
        }
    };

    info!(url = %server.ws_url(), lobby = ?server.lobby_addr(), "Relay ready");

    tokio::select! {
        result = tokio::signal::ctrl_c() => {
            if let Err(e) = result {
                error!(error = %e, "Failed to listen for shutdown signal");
            }
        }
        _ = server.closed() => {}
    }

    server.shutdown().await;
    ExitCode::SUCCESS
}
