//! Main entry point for the campus market service.
//!
//! Loads configuration, builds the market engine with the configured storage
//! and identity backends, and serves the HTTP API until interrupted.

use clap::Parser;
use market_config::Config;
use std::path::PathBuf;
use std::sync::Arc;

mod apis;
mod auth;
mod factory_registry;
mod server;

/// Command-line arguments for the market service.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
	/// Path to configuration file
	#[arg(short, long, default_value = "config/market.toml")]
	config: PathBuf,

	/// Log level (trace, debug, info, warn, error)
	#[arg(short, long, default_value = "info")]
	log_level: String,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
	let args = Args::parse();

	use tracing_subscriber::{fmt, EnvFilter};

	let env_filter =
		EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level));
	fmt()
		.with_env_filter(env_filter)
		.with_thread_ids(true)
		.with_target(true)
		.init();

	tracing::info!("Started market service");

	let config_path = args
		.config
		.to_str()
		.ok_or("configuration path is not valid UTF-8")?;
	let config = Config::from_file(config_path).await?;
	tracing::info!(market_id = %config.market.id, "Loaded configuration");

	let engine = Arc::new(factory_registry::build_market_from_config(config.clone()).await?);

	match config.api.clone().filter(|api| api.enabled) {
		Some(api_config) => {
			let api_engine = Arc::clone(&engine);
			tokio::select! {
				result = engine.run() => {
					tracing::info!("Engine finished");
					result?;
				}
				result = server::start_server(api_config, api_engine) => {
					tracing::info!("API server finished");
					result?;
				}
			}
		}
		None => {
			tracing::warn!("API disabled; running background tasks only");
			engine.run().await?;
		}
	}

	tracing::info!("Stopped market service");
	Ok(())
}
