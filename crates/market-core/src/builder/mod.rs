//! Builder for constructing a market engine.
//!
//! Backends are chosen by name: every `[storage.implementations.*]` and
//! `[account.implementations.*]` table with a registered factory is built,
//! and the one named `primary` is used.

use crate::engine::{event_bus::EventBus, MarketEngine};
use market_account::{AccountError, IdentityInterface, IdentityService};
use market_config::Config;
use market_storage::{StorageError, StorageInterface, StorageService};
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;

/// Errors that can occur during engine construction.
#[derive(Debug, Error)]
pub enum BuilderError {
	#[error("Configuration error: {0}")]
	Config(String),
	#[error("Missing required component: {0}")]
	MissingComponent(String),
}

/// Factory functions for each pluggable component, keyed by implementation name.
/// Factories for each pluggable component, keyed by implementation name.
pub struct MarketFactories<SF, IF> {
	pub storage_factories: HashMap<String, SF>,
	pub identity_factories: HashMap<String, IF>,
}

/// Assembles a [`MarketEngine`] from configuration.
///
/// For each component the builder runs the factory named by the section's
/// `primary` key, passing that implementation's config table. A component
/// with no buildable implementation fails the whole build.
pub struct MarketBuilder {
	config: Config,
}

impl MarketBuilder {
	pub fn new(config: Config) -> Self {
		Self { config }
	}

	/// Builds storage and identity from `factories` and wires the engine.
	pub async fn build<SF, IF>(
		self,
		factories: MarketFactories<SF, IF>,
	) -> Result<MarketEngine, BuilderError>
	where
		SF: Fn(&toml::Value) -> Result<Box<dyn StorageInterface>, StorageError>,
		IF: Fn(&toml::Value) -> Result<Box<dyn IdentityInterface>, AccountError>,
	{
		let storage_backend = select_primary(
			"storage",
			&self.config.storage.primary,
			&self.config.storage.implementations,
			&factories.storage_factories,
		)?;
		let identity_backend = select_primary(
			"account",
			&self.config.account.primary,
			&self.config.account.implementations,
			&factories.identity_factories,
		)?;

		Ok(MarketEngine::new(
			self.config,
			Arc::new(StorageService::new(storage_backend)),
			Arc::new(IdentityService::new(identity_backend)),
			EventBus::default(),
		))
	}
}

/// Builds every configured implementation that has a factory and returns
/// the primary one. A configured implementation that fails to build is an
/// error even when it is not the primary.
fn select_primary<T, E, F>(
	component: &'static str,
	primary: &str,
	configured: &HashMap<String, toml::Value>,
	factories: &HashMap<String, F>,
) -> Result<T, BuilderError>
where
	E: std::fmt::Display,
	F: Fn(&toml::Value) -> Result<T, E>,
{
	let mut built = HashMap::new();
	for (name, config) in configured {
		let Some(factory) = factories.get(name) else {
			tracing::warn!(component, implementation = %name, "No factory registered, skipping");
			continue;
		};
		match factory(config) {
			Ok(implementation) => {
				let is_primary = primary == name;
				tracing::info!(component, implementation = %name, enabled = %is_primary, "Loaded");
				built.insert(name.clone(), implementation);
			}
			Err(e) => {
				tracing::error!(
					component,
					implementation = %name,
					error = %e,
					"Failed to create implementation"
				);
				return Err(BuilderError::Config(format!(
					"Failed to create {} implementation '{}': {}",
					component, name, e
				)));
			}
		}
	}

	if built.is_empty() {
		return Err(BuilderError::MissingComponent(format!(
			"no valid {} implementations available",
			component
		)));
	}

	built.remove(primary).ok_or_else(|| {
		BuilderError::Config(format!(
			"Primary {} '{}' failed to load or has invalid configuration",
			component, primary
		))
	})
}
