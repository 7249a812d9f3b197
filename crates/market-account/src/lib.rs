//! Caller identity for the market service.
//!
//! Every request carries a bearer token. An [`IdentityInterface`]
//! implementation verifies it and yields the [`Caller`] the rest of the
//! service trusts. The HS256 JWT backend matches the tokens issued by the
//! marketplace's login flow.

use async_trait::async_trait;
use market_types::{Caller, ConfigSchema, ImplementationRegistry};
use std::time::Duration;
use thiserror::Error;

pub mod implementations {
	pub mod jwt;
}

/// Errors that can occur while verifying or issuing tokens.
#[derive(Debug, Error)]
pub enum AccountError {
	/// The token is malformed, has a bad signature or fails a claim check.
	#[error("Invalid token: {0}")]
	InvalidToken(String),
	#[error("Token expired")]
	ExpiredToken,
	#[error("Configuration error: {0}")]
	Configuration(String),
}

/// Interface implemented by every identity backend.
#[async_trait]
pub trait IdentityInterface: Send + Sync {
	/// Returns the configuration schema for this backend.
	fn config_schema(&self) -> Box<dyn ConfigSchema>;

	/// Verifies a bearer token and returns the caller it identifies.
	async fn verify(&self, token: &str) -> Result<Caller, AccountError>;

	/// Issues a token for `caller` valid for `ttl`. Used by tooling and tests;
	/// end-user login lives outside this service.
	fn issue(&self, caller: &Caller, ttl: Duration) -> Result<String, AccountError>;
}

/// Builds a backend from its `[account.implementations.<name>]` table.
pub type IdentityFactory = fn(&toml::Value) -> Result<Box<dyn IdentityInterface>, AccountError>;

pub trait IdentityRegistry: ImplementationRegistry<Factory = IdentityFactory> {}

/// Every identity backend compiled into the service, as (name, factory).
pub fn get_all_implementations() -> Vec<(&'static str, IdentityFactory)> {
	use implementations::jwt;

	vec![(jwt::Registry::NAME, jwt::Registry::factory())]
}

/// Wraps the configured identity backend.
pub struct IdentityService {
	implementation: Box<dyn IdentityInterface>,
}

impl IdentityService {
	pub fn new(implementation: Box<dyn IdentityInterface>) -> Self {
		Self { implementation }
	}

	/// Verifies `token` with the configured backend.
	pub async fn verify(&self, token: &str) -> Result<Caller, AccountError> {
		self.implementation.verify(token).await
	}

	pub fn issue(&self, caller: &Caller, ttl: Duration) -> Result<String, AccountError> {
		self.implementation.issue(caller, ttl)
	}
}
