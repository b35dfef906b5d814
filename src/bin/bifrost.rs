//! bifrost — serve or probe gRPC endpoints from a settings file.
//!
//! `serve` runs the standard gRPC health service with the compiled
//! `[server]` options; `probe` checks a server's health with the compiled
//! `[client]` options.

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tonic::codec::CompressionEncoding;
use tonic_health::pb::HealthCheckRequest;
use tonic_health::pb::health_client::HealthClient;
use tonic_health::server::health_reporter;
use tracing::info;

use bifrost::config::Config;
use bifrost::{BifrostError, TelemetrySettings};

/// Bifrost gRPC settings tool
#[derive(Parser)]
#[command(name = "bifrost")]
#[command(version)]
#[command(about = "Serve or probe gRPC endpoints described by a settings file")]
struct Args {
    /// Path to configuration file.
    #[arg(short, long, env = "BIFROST_CONFIG", default_value = "bifrost.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Serve the gRPC health service using the [server] settings
    Serve,

    /// Check a server's health using the [client] settings
    Probe {
        /// Service name to check (empty for the whole server)
        #[arg(short, long, default_value = "")]
        service: String,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .init();

    let args = Args::parse();
    let config = Config::load(&args.config)?;
    let host = config.host()?;

    match args.command {
        Command::Serve => {
            let settings = config.server.ok_or_else(|| missing_section("server"))?;
            let telemetry = TelemetrySettings::new("bifrost-serve");
            let options = settings.to_server_options(&host, &telemetry)?;
            let listener = settings.to_listener().await?;
            let (_reporter, health) = health_reporter();
            let health = health
                .accept_compressed(CompressionEncoding::Gzip)
                .accept_compressed(CompressionEncoding::Zstd);
            let health = match options.max_decoding_message_size() {
                Some(limit) => health.max_decoding_message_size(limit),
                None => health,
            };

            info!(addr = ?listener.local_addr().ok(), "bifrost serving");
            options
                .builder()?
                .add_service(health)
                .serve_with_incoming_shutdown(options.incoming(listener), async {
                    let _ = tokio::signal::ctrl_c().await;
                })
                .await?;
        }
        Command::Probe { service } => {
            let settings = config.client.ok_or_else(|| missing_section("client"))?;
            let telemetry = TelemetrySettings::new("bifrost-probe");
            let options = settings.to_dial_options(&host, &telemetry)?;
            let channel = options.dial(&settings.endpoint).await?;

            let mut client = HealthClient::new(channel);
            if let Some(encoding) = options.compression() {
                client = client.send_compressed(encoding).accept_compressed(encoding);
            }
            let response = client.check(HealthCheckRequest { service }).await?;
            println!("{:?}", response.into_inner().status());
        }
    }

    Ok(())
}

fn missing_section(name: &str) -> BifrostError {
    BifrostError::Configuration(format!("missing [{name}] section"))
}
