//! Fluent construction of [`Config`] values for tests and local tooling.
//!
//! Defaults describe a self-contained market: in-memory storage and a JWT
//! backend with a fixed development secret. The result is not validated.

use crate::{AccountConfig, ApiConfig, ChatConfig, Config, MarketConfig, StorageConfig};
use std::collections::HashMap;

/// Signing secret used by default. Only for tests and local development.
pub const DEV_JWT_SECRET: &str = "dev-only-jwt-secret-0123456789abcdef";

#[derive(Debug, Clone)]
pub struct ConfigBuilder {
	market_id: String,
	write_attempts: u32,
	storage_primary: String,
	storage_implementations: HashMap<String, toml::Value>,
	storage_cleanup_interval_seconds: u64,
	jwt: toml::Table,
	chat: ChatConfig,
	api: Option<ApiConfig>,
}

impl Default for ConfigBuilder {
	fn default() -> Self {
		Self::new()
	}
}

impl ConfigBuilder {
	pub fn new() -> Self {
		let mut jwt = toml::Table::new();
		jwt.insert("secret".into(), toml::Value::String(DEV_JWT_SECRET.into()));
		jwt.insert("leeway_seconds".into(), toml::Value::Integer(0));

		Self {
			market_id: "test-market".to_string(),
			write_attempts: 3,
			storage_primary: "memory".to_string(),
			storage_implementations: HashMap::from([(
				"memory".to_string(),
				toml::Value::Table(toml::Table::new()),
			)]),
			storage_cleanup_interval_seconds: 60,
			jwt,
			chat: ChatConfig::default(),
			api: None,
		}
	}

	pub fn market_id(mut self, id: impl Into<String>) -> Self {
		self.market_id = id.into();
		self
	}

	pub fn write_attempts(mut self, attempts: u32) -> Self {
		self.write_attempts = attempts;
		self
	}

	/// Uses the file backend rooted at `path` as primary storage.
	pub fn file_storage(mut self, path: impl Into<String>) -> Self {
		let mut table = toml::Table::new();
		table.insert("storage_path".into(), toml::Value::String(path.into()));
		self.storage_implementations
			.insert("file".to_string(), toml::Value::Table(table));
		self.storage_primary = "file".to_string();
		self
	}

	pub fn storage_cleanup_interval_seconds(mut self, interval: u64) -> Self {
		self.storage_cleanup_interval_seconds = interval;
		self
	}

	pub fn jwt_secret(mut self, secret: impl Into<String>) -> Self {
		self.jwt
			.insert("secret".into(), toml::Value::String(secret.into()));
		self
	}

	pub fn jwt_issuer(mut self, issuer: impl Into<String>) -> Self {
		self.jwt
			.insert("issuer".into(), toml::Value::String(issuer.into()));
		self
	}

	pub fn poll_timeout_seconds(mut self, seconds: u64) -> Self {
		self.chat.poll_timeout_seconds = seconds;
		self
	}

	pub fn poll_interval_ms(mut self, millis: u64) -> Self {
		self.chat.poll_interval_ms = millis;
		self
	}

	pub fn api(mut self, api: Option<ApiConfig>) -> Self {
		self.api = api;
		self
	}

	pub fn build(self) -> Config {
		Config {
			market: MarketConfig {
				id: self.market_id,
				write_attempts: self.write_attempts,
			},
			storage: StorageConfig {
				primary: self.storage_primary,
				implementations: self.storage_implementations,
				cleanup_interval_seconds: self.storage_cleanup_interval_seconds,
			},
			account: AccountConfig {
				primary: "jwt".to_string(),
				implementations: HashMap::from([("jwt".to_string(), toml::Value::Table(self.jwt))]),
			},
			chat: self.chat,
			api: self.api,
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_built_config_passes_validation() {
		let config = ConfigBuilder::new()
			.market_id("campus")
			.poll_timeout_seconds(5)
			.build();
		assert!(config.validate().is_ok());
		assert_eq!(config.market.id, "campus");
		assert_eq!(config.poll_timeout(), std::time::Duration::from_secs(5));
		assert!(config.account.implementations["jwt"].get("secret").is_some());
	}

	#[test]
	fn test_file_storage_becomes_primary() {
		let config = ConfigBuilder::new().file_storage("/tmp/market").build();
		assert_eq!(config.storage.primary, "file");
		assert_eq!(
			config.storage.implementations["file"]["storage_path"].as_str(),
			Some("/tmp/market")
		);
	}
}
