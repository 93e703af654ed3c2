use std::{env, process::ExitCode};

use telemetry_core::shutdown_token;
use telemetry_server::ServerConfig;
use tracing::{error, info};
use tracing_subscriber::{filter::LevelFilter, EnvFilter};

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::builder().with_default_directive(LevelFilter::INFO.into()).from_env_lossy(),
        )
        .init();

    let args: Vec<String> = env::args().collect();
    let program = args.first().map_or("telemetry-server", String::as_str);
    let config = match ServerConfig::load(program, args.get(1..).unwrap_or_default(), |name| {
        env::var(name).ok()
    }) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("{e}");
            return ExitCode::FAILURE;
        }
    };

    info!(version = env!("CARGO_PKG_VERSION"), "Starting telemetry server.");

    match telemetry_server::run(config, shutdown_token()).await {
        Ok(()) => {
            info!("Telemetry server stopped.");
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!(error = %e, "Telemetry server failed.");
            ExitCode::FAILURE
        }
    }
}
