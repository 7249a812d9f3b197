//! Configuration for the market service.
//!
//! Configuration is read from TOML. String values may reference environment
//! variables as `${VAR}` or `${VAR:-default}`. A file can pull in others with
//! `include = ["storage.toml", "api.toml"]`; every top-level section must then
//! appear in exactly one file.

mod loader;

#[cfg(any(test, feature = "testing"))]
pub mod builders;

pub use loader::ConfigLoader;

#[cfg(any(test, feature = "testing"))]
pub use builders::config::{ConfigBuilder, DEV_JWT_SECRET};

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::str::FromStr;
use thiserror::Error;

/// Errors that can occur during configuration operations.
#[derive(Debug, Error)]
pub enum ConfigError {
	#[error("IO error: {0}")]
	Io(#[from] std::io::Error),
	#[error("Configuration error: {0}")]
	Parse(String),
	#[error("Validation error: {0}")]
	Validation(String),
}

impl From<toml::de::Error> for ConfigError {
	fn from(err: toml::de::Error) -> Self {
		// The full error embeds the whole input; keep only the message.
		ConfigError::Parse(err.message().to_string())
	}
}

/// Top-level configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
	pub market: MarketConfig,
	pub storage: StorageConfig,
	pub account: AccountConfig,
	#[serde(default)]
	pub chat: ChatConfig,
	pub api: Option<ApiConfig>,
}

/// Settings for this service instance and its order handling.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct MarketConfig {
	/// Instance name, used in logs.
	pub id: String,
	/// Compare-and-swap attempts for a status change or stock decrement
	/// before the request fails with a conflict.
	#[serde(default = "default_write_attempts")]
	pub write_attempts: u32,
}

fn default_write_attempts() -> u32 {
	3
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StorageConfig {
	/// Which implementation to use as primary.
	pub primary: String,
	/// Implementation name to its raw TOML table.
	pub implementations: HashMap<String, toml::Value>,
	/// Interval in seconds between sweeps of expired entries.
	pub cleanup_interval_seconds: u64,
}

/// Token verification backends.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AccountConfig {
	pub primary: String,
	pub implementations: HashMap<String, toml::Value>,
}

/// Chat transport limits.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ChatConfig {
	/// How long a poll request waits for new messages before returning empty.
	#[serde(default = "default_poll_timeout_seconds")]
	pub poll_timeout_seconds: u64,
	/// Re-check cadence while a poll request waits.
	#[serde(default = "default_poll_interval_ms")]
	pub poll_interval_ms: u64,
	/// Maximum message length in characters, after trimming.
	#[serde(default = "default_max_message_length")]
	pub max_message_length: usize,
}

impl Default for ChatConfig {
	fn default() -> Self {
		Self {
			poll_timeout_seconds: default_poll_timeout_seconds(),
			poll_interval_ms: default_poll_interval_ms(),
			max_message_length: default_max_message_length(),
		}
	}
}

fn default_poll_timeout_seconds() -> u64 {
	30
}

fn default_poll_interval_ms() -> u64 {
	1000
}

fn default_max_message_length() -> usize {
	1000
}

/// HTTP listener settings. Unknown keys are refused so settings the
/// service does not implement (such as rate limits) cannot pass silently.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct ApiConfig {
	#[serde(default)]
	pub enabled: bool,
	#[serde(default = "default_api_host")]
	pub host: String,
	#[serde(default = "default_api_port")]
	pub port: u16,
	/// Maximum request body size in bytes.
	#[serde(default = "default_max_request_size")]
	pub max_request_size: usize,
	/// Permissive CORS when absent.
	pub cors: Option<CorsConfig>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CorsConfig {
	pub allowed_origins: Vec<String>,
	#[serde(default)]
	pub allowed_headers: Vec<String>,
	#[serde(default)]
	pub allowed_methods: Vec<String>,
}

fn default_api_host() -> String {
	"127.0.0.1".to_string()
}

fn default_api_port() -> u16 {
	3000
}

fn default_max_request_size() -> usize {
	1024 * 1024
}

/// Replaces `${VAR}` and `${VAR:-default}` with environment values.
///
/// Inputs over 1MB are rejected before the regex runs.
pub(crate) fn resolve_env_vars(input: &str) -> Result<String, ConfigError> {
	const MAX_INPUT_SIZE: usize = 1024 * 1024;
	if input.len() > MAX_INPUT_SIZE {
		return Err(ConfigError::Validation(format!(
			"Configuration file too large: {} bytes (max: {} bytes)",
			input.len(),
			MAX_INPUT_SIZE
		)));
	}

	let re = Regex::new(r"\$\{([A-Z_][A-Z0-9_]{0,127})(?::-([^}]{0,256}))?\}")
		.map_err(|e| ConfigError::Parse(format!("Regex error: {}", e)))?;

	let mut result = String::with_capacity(input.len());
	let mut last = 0;
	for cap in re.captures_iter(input) {
		let (Some(whole), Some(name)) = (cap.get(0), cap.get(1)) else {
			continue;
		};
		let value = match (std::env::var(name.as_str()), cap.get(2)) {
			(Ok(v), _) => v,
			(Err(_), Some(default)) => default.as_str().to_string(),
			(Err(_), None) => {
				return Err(ConfigError::Validation(format!(
					"Environment variable '{}' not found",
					name.as_str()
				)))
			},
		};
		result.push_str(&input[last..whole.start()]);
		result.push_str(&value);
		last = whole.end();
	}
	result.push_str(&input[last..]);

	Ok(result)
}

fn invalid(message: impl Into<String>) -> ConfigError {
	ConfigError::Validation(message.into())
}

/// Checks a `primary` + `implementations` pair shared by several sections.
fn validate_primary(
	section: &str,
	primary: &str,
	implementations: &HashMap<String, toml::Value>,
) -> Result<(), ConfigError> {
	if implementations.is_empty() {
		return Err(invalid(format!(
			"At least one {} implementation must be configured",
			section
		)));
	}
	if primary.is_empty() {
		return Err(invalid(format!(
			"{} primary implementation cannot be empty",
			section
		)));
	}
	if !implementations.contains_key(primary) {
		return Err(invalid(format!(
			"Primary {} '{}' not found in implementations",
			section, primary
		)));
	}
	Ok(())
}

impl Config {
	/// Loads a configuration file together with its includes.
	pub async fn from_file(path: &str) -> Result<Self, ConfigError> {
		let path_buf = Path::new(path);
		let base_dir = path_buf.parent().unwrap_or_else(|| Path::new("."));
		let file_name = path_buf
			.file_name()
			.ok_or_else(|| invalid(format!("Invalid path: {}", path)))?;

		ConfigLoader::new(base_dir).load_config(file_name).await
	}

	/// Builds a config from an already env-resolved TOML value and validates it.
	pub(crate) fn from_value(value: toml::Value) -> Result<Self, ConfigError> {
		let config: Config = value.try_into()?;
		config.validate()?;
		Ok(config)
	}

	/// Poll wait window as a duration.
	pub fn poll_timeout(&self) -> std::time::Duration {
		std::time::Duration::from_secs(self.chat.poll_timeout_seconds)
	}

	/// Poll re-check interval as a duration.
	pub fn poll_interval(&self) -> std::time::Duration {
		std::time::Duration::from_millis(self.chat.poll_interval_ms)
	}

	fn validate(&self) -> Result<(), ConfigError> {
		if self.market.id.is_empty() {
			return Err(invalid("Market ID cannot be empty"));
		}
		if !(1..=10).contains(&self.market.write_attempts) {
			return Err(invalid("market.write_attempts must be between 1 and 10"));
		}

		validate_primary(
			"storage",
			&self.storage.primary,
			&self.storage.implementations,
		)?;
		if !(1..=86400).contains(&self.storage.cleanup_interval_seconds) {
			return Err(invalid(
				"Storage cleanup_interval_seconds must be between 1 and 86400",
			));
		}

		validate_primary(
			"account",
			&self.account.primary,
			&self.account.implementations,
		)?;

		let chat = &self.chat;
		if !(1..=300).contains(&chat.poll_timeout_seconds) {
			return Err(invalid("chat.poll_timeout_seconds must be between 1 and 300"));
		}
		if chat.poll_interval_ms == 0 || chat.poll_interval_ms > chat.poll_timeout_seconds * 1000 {
			return Err(invalid(
				"chat.poll_interval_ms must be positive and no longer than the poll timeout",
			));
		}
		if chat.max_message_length == 0 {
			return Err(invalid("chat.max_message_length must be at least 1"));
		}

		if let Some(api) = self.api.as_ref().filter(|api| api.enabled) {
			if api.host.is_empty() {
				return Err(invalid("api.host cannot be empty"));
			}
			if api.max_request_size == 0 {
				return Err(invalid("api.max_request_size must be greater than 0"));
			}
			if let Some(cors) = &api.cors {
				if cors.allowed_origins.iter().any(|o| o.is_empty()) {
					return Err(invalid("api.cors.allowed_origins cannot contain empty entries"));
				}
			}
		}

		Ok(())
	}
}

/// Parses a single TOML document: resolves environment variables, then
/// deserializes and validates.
impl FromStr for Config {
	type Err = ConfigError;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		let resolved = resolve_env_vars(s)?;
		Config::from_value(toml::from_str(&resolved)?)
	}
}
