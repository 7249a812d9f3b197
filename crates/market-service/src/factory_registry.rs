//! Registry of every backend compiled into the binary.
//!
//! Configuration names backends by string; this maps those names to the
//! factory functions the builder calls.

use market_account::IdentityFactory;
use market_config::Config;
use market_core::{MarketBuilder, MarketEngine, MarketFactories};
use market_storage::StorageFactory;
use std::collections::HashMap;
use std::sync::OnceLock;

/// Every backend factory compiled into the binary, by implementation name.
pub struct FactoryRegistry {
	pub storage: HashMap<String, StorageFactory>,
	pub identity: HashMap<String, IdentityFactory>,
}

impl FactoryRegistry {
	pub fn new() -> Self {
		Self {
			storage: HashMap::new(),
			identity: HashMap::new(),
		}
	}

	pub fn register_storage(&mut self, name: impl Into<String>, factory: StorageFactory) {
		self.storage.insert(name.into(), factory);
	}

	pub fn register_identity(&mut self, name: impl Into<String>, factory: IdentityFactory) {
		self.identity.insert(name.into(), factory);
	}
}

static REGISTRY: OnceLock<FactoryRegistry> = OnceLock::new();

/// Returns the global registry, populating it on first use.
pub fn get_registry() -> &'static FactoryRegistry {
	REGISTRY.get_or_init(|| {
		let mut registry = FactoryRegistry::new();

		for (name, factory) in market_storage::get_all_implementations() {
			tracing::debug!(implementation = name, "Registering storage backend");
			registry.register_storage(name, factory);
		}
		for (name, factory) in market_account::get_all_implementations() {
			tracing::debug!(implementation = name, "Registering identity backend");
			registry.register_identity(name, factory);
		}

		registry
	})
}

/// Picks the factories for the implementations named in a config section.
/// An unknown name is an error listing what is available.
macro_rules! build_factories {
	($registry:expr, $config_impls:expr, $registry_field:ident, $type_name:literal) => {{
		let mut factories = HashMap::new();
		for name in $config_impls.keys() {
			if let Some(factory) = $registry.$registry_field.get(name) {
				factories.insert(name.clone(), *factory);
			} else {
				let mut available: Vec<_> = $registry.$registry_field.keys().cloned().collect();
				available.sort();
				return Err(format!(
					"Unknown {} implementation '{}'. Available: [{}]",
					$type_name,
					name,
					available.join(", ")
				)
				.into());
			}
		}
		factories
	}};
}

/// Builds the engine from configuration using the registered backends.
pub async fn build_market_from_config(
	config: Config,
) -> Result<MarketEngine, Box<dyn std::error::Error>> {
	let registry = get_registry();

	let storage_factories =
		build_factories!(registry, config.storage.implementations, storage, "storage");
	let identity_factories =
		build_factories!(registry, config.account.implementations, identity, "account");

	let factories = MarketFactories {
		storage_factories,
		identity_factories,
	};
	Ok(MarketBuilder::new(config).build(factories).await?)
}
