use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use relayer_chain::ChainError;
use relayer_config::{Config, ConfigLoader};
use relayer_core::EventBus;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod api;
mod service;

#[derive(Parser)]
#[command(name = "gas-station")]
#[command(about = "Gasless ERC20 transfer relayer", long_about = None)]
struct Cli {
	#[command(subcommand)]
	command: Option<Commands>,

	#[arg(short, long, value_name = "FILE", default_value = "config/local.toml")]
	config: PathBuf,

	#[arg(long, env = "GAS_STATION_LOG_LEVEL")]
	log_level: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
	/// Start the gas station service
	Start,
	/// Validate the configuration file
	Validate,
	/// Print the relayer account status and exit
	Status,
}

#[tokio::main]
async fn main() -> Result<()> {
	let cli = Cli::parse();

	let config = load_config(&cli.config).await?;
	setup_tracing(effective_log_level(
		cli.log_level.as_deref(),
		&config.service.log_level,
	))?;
	info!("Loaded configuration from: {:?}", cli.config);

	match cli.command {
		Some(Commands::Start) | None => start_service(config).await,
		Some(Commands::Validate) => validate_config(config),
		Some(Commands::Status) => print_status(config).await,
	}
}

async fn load_config(path: &Path) -> Result<Config> {
	ConfigLoader::new()
		.with_file(path)
		.load()
		.await
		.context("Failed to load configuration")
}

/// The command line wins over the configured level.
fn effective_log_level<'a>(cli: Option<&'a str>, configured: &'a str) -> &'a str {
	cli.unwrap_or(configured)
}

async fn start_service(config: Config) -> Result<()> {
	info!("Starting gas station");
	info!("Service name: {}", config.service.name);
	info!("HTTP port: {}", config.service.http_port);

	let chain = Arc::new(service::build_chain_client(&config)?);
	match chain.verify_chain_id().await {
		Ok(()) => info!("Connected to chain {}", config.relayer.chain_id),
		Err(e @ ChainError::Configuration(_)) => {
			return Err(e).context("Endpoint serves the wrong chain");
		}
		Err(e) => warn!("Could not verify chain ID at startup: {}", e),
	}

	let events = EventBus::default();
	let logger_handle = service::spawn_event_logger(&events);
	let station = Arc::new(service::build_gas_station(&config, chain.clone(), events)?);

	let status = station.status().await;
	if status.is_ready {
		info!(
			relayer = %status.address,
			balance = %status.native_balance,
			"Relayer account ready"
		);
	} else {
		warn!(
			relayer = %status.address,
			"Relayer account not ready: {}",
			status.error.as_deref().unwrap_or("unknown")
		);
	}

	let reset_handle = service::spawn_endpoint_reset(
		chain,
		Duration::from_secs(config.timeouts.endpoint_reset_secs),
	);

	let state = api::AppState {
		station,
		token_decimals: config.relayer.token_decimals,
	};
	let port = config.service.http_port;
	let http_handle = tokio::spawn(async move { api::start_http_server(state, port).await });

	info!("Gas station started successfully");

	tokio::select! {
		_ = setup_shutdown_signal() => {
			info!("Shutdown signal received, stopping services...");
		}
		result = http_handle => {
			match result {
				Ok(Ok(())) => warn!("HTTP server exited"),
				Ok(Err(e)) => error!("HTTP server failed: {}", e),
				Err(e) => error!("HTTP server task panicked: {}", e),
			}
		}
	}

	reset_handle.abort();
	logger_handle.abort();

	info!("Gas station stopped");
	Ok(())
}

fn validate_config(config: Config) -> Result<()> {
	info!("Configuration is valid");
	info!("Chain ID: {}", config.relayer.chain_id);
	info!("Token: {}", config.relayer.token_address);
	for endpoint in config.endpoints() {
		info!(
			"  Endpoint: {} ({:?}, read {:?}, write {:?})",
			endpoint.display_url(),
			endpoint.kind,
			endpoint.read_timeout,
			endpoint.write_timeout
		);
	}

	Ok(())
}

async fn print_status(config: Config) -> Result<()> {
	let chain = Arc::new(service::build_chain_client(&config)?);
	let station = service::build_gas_station(&config, chain, EventBus::default())?;

	let status = station.status().await;
	println!("{}", serde_json::to_string_pretty(&status)?);
	Ok(())
}

fn setup_tracing(log_level: &str) -> Result<()> {
	let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
		.unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level));

	tracing_subscriber::registry()
		.with(env_filter)
		.with(tracing_subscriber::fmt::layer())
		.try_init()
		.context("Failed to initialize tracing")?;

	Ok(())
}

async fn setup_shutdown_signal() {
	let ctrl_c = async {
		if let Err(e) = signal::ctrl_c().await {
			error!("Failed to listen for Ctrl+C: {}", e);
			std::future::pending::<()>().await;
		}
	};

	#[cfg(unix)]
	let terminate = async {
		match signal::unix::signal(signal::unix::SignalKind::terminate()) {
			Ok(mut stream) => {
				stream.recv().await;
			}
			Err(e) => {
				error!("Failed to install SIGTERM handler: {}", e);
				std::future::pending::<()>().await;
			}
		}
	};

	#[cfg(not(unix))]
	let terminate = std::future::pending::<()>();

	tokio::select! {
		_ = ctrl_c => {},
		_ = terminate => {},
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_log_level_falls_back_to_config() {
		assert_eq!(effective_log_level(None, "warn"), "warn");
		assert_eq!(effective_log_level(Some("debug"), "warn"), "debug");
	}
}
