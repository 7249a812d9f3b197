//! HS256 JSON Web Token identity backend.
//!
//! Tokens carry the claims written by the marketplace login flow:
//! `{ id, userName, iat, exp }`, optionally with `iss`. Only HS256 is
//! accepted and `exp` is mandatory.

use crate::{AccountError, IdentityFactory, IdentityInterface, IdentityRegistry};
use async_trait::async_trait;
use chrono::Utc;
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use market_types::{
	Caller, ConfigSchema, Field, FieldType, ImplementationRegistry, Schema, SecretString,
	ValidationError,
};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Shortest accepted signing secret, in bytes.
const MIN_SECRET_LEN: usize = 32;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
	/// User id.
	pub id: String,
	#[serde(rename = "userName")]
	pub user_name: String,
	pub iat: i64,
	pub exp: i64,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub iss: Option<String>,
}

pub struct JwtIdentity {
	secret: SecretString,
	issuer: Option<String>,
	leeway_seconds: u64,
	encoding_key: EncodingKey,
	decoding_key: DecodingKey,
}

impl JwtIdentity {
	pub fn new(
		secret: SecretString,
		issuer: Option<String>,
		leeway_seconds: u64,
	) -> Result<Self, AccountError> {
		if secret.len() < MIN_SECRET_LEN {
			return Err(AccountError::Configuration(format!(
				"JWT secret must be at least {} bytes",
				MIN_SECRET_LEN
			)));
		}
		let (encoding_key, decoding_key) = secret.with_exposed(|s| {
			(
				EncodingKey::from_secret(s.as_bytes()),
				DecodingKey::from_secret(s.as_bytes()),
			)
		});
		Ok(Self {
			secret,
			issuer,
			leeway_seconds,
			encoding_key,
			decoding_key,
		})
	}

	fn validation(&self) -> Validation {
		let mut validation = Validation::new(Algorithm::HS256);
		validation.leeway = self.leeway_seconds;
		validation.set_required_spec_claims(&["exp"]);
		if let Some(issuer) = &self.issuer {
			validation.set_issuer(&[issuer]);
		}
		validation
	}

	fn encode_claims(&self, claims: &Claims) -> Result<String, AccountError> {
		encode(&Header::new(Algorithm::HS256), claims, &self.encoding_key)
			.map_err(|e| AccountError::InvalidToken(e.to_string()))
	}

	pub fn decode_claims(&self, token: &str) -> Result<Claims, AccountError> {
		decode::<Claims>(token, &self.decoding_key, &self.validation())
			.map(|data| data.claims)
			.map_err(|e| match e.kind() {
				ErrorKind::ExpiredSignature => AccountError::ExpiredToken,
				_ => AccountError::InvalidToken(e.to_string()),
			})
	}
}

impl std::fmt::Debug for JwtIdentity {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("JwtIdentity")
			.field("secret", &self.secret)
			.field("issuer", &self.issuer)
			.field("leeway_seconds", &self.leeway_seconds)
			.finish()
	}
}

#[async_trait]
impl IdentityInterface for JwtIdentity {
	fn config_schema(&self) -> Box<dyn ConfigSchema> {
		Box::new(JwtIdentitySchema)
	}

	async fn verify(&self, token: &str) -> Result<Caller, AccountError> {
		let claims = self.decode_claims(token)?;
		if claims.id.is_empty() {
			return Err(AccountError::InvalidToken("empty id claim".into()));
		}
		Ok(Caller::new(claims.id, claims.user_name))
	}

	fn issue(&self, caller: &Caller, ttl: Duration) -> Result<String, AccountError> {
		let now = Utc::now().timestamp();
		let ttl = i64::try_from(ttl.as_secs()).unwrap_or(i64::MAX);
		self.encode_claims(&Claims {
			id: caller.id.clone(),
			user_name: caller.name.clone(),
			iat: now,
			exp: now.saturating_add(ttl),
			iss: self.issuer.clone(),
		})
	}
}

/// Requires `secret`; accepts `issuer` and `leeway_seconds`.
pub struct JwtIdentitySchema;

impl ConfigSchema for JwtIdentitySchema {
	fn validate(&self, config: &toml::Value) -> Result<(), ValidationError> {
		let schema = Schema::new(
			vec![Field::new("secret", FieldType::String).with_validator(|value| {
				match value.as_str() {
					Some(s) if s.len() >= MIN_SECRET_LEN => Ok(()),
					_ => Err(format!("must be at least {} characters", MIN_SECRET_LEN)),
				}
			})],
			vec![
				Field::new("issuer", FieldType::String),
				Field::new(
					"leeway_seconds",
					FieldType::Integer {
						min: Some(0),
						max: Some(300),
					},
				),
			],
		);
		schema.validate(config)
	}
}

/// Builds the JWT backend.
///
/// Configuration parameters:
/// - `secret`: HS256 signing secret, at least 32 characters (required)
/// - `issuer`: expected and issued `iss` claim (optional)
/// - `leeway_seconds`: clock skew tolerance for `exp` (default: 60)
pub fn create_identity(config: &toml::Value) -> Result<Box<dyn IdentityInterface>, AccountError> {
	JwtIdentitySchema
		.validate(config)
		.map_err(|e| AccountError::Configuration(e.to_string()))?;

	let secret = config
		.get("secret")
		.and_then(|v| v.as_str())
		.map(SecretString::from)
		.ok_or_else(|| AccountError::Configuration("secret is required".into()))?;
	let issuer = config
		.get("issuer")
		.and_then(|v| v.as_str())
		.map(str::to_string);
	let leeway_seconds = config
		.get("leeway_seconds")
		.and_then(|v| v.as_integer())
		.map(|v| v as u64)
		.unwrap_or(60);

	Ok(Box::new(JwtIdentity::new(secret, issuer, leeway_seconds)?))
}

pub struct Registry;

impl ImplementationRegistry for Registry {
	const NAME: &'static str = "jwt";
	type Factory = IdentityFactory;

	fn factory() -> Self::Factory {
		create_identity
	}
}

impl IdentityRegistry for Registry {}

#[cfg(test)]
mod tests {
	use super::*;

	const SECRET: &str = "a-very-long-test-secret-of-32-bytes!!";

	fn identity(issuer: Option<&str>) -> JwtIdentity {
		JwtIdentity::new(SecretString::from(SECRET), issuer.map(str::to_string), 0).unwrap()
	}

	#[tokio::test]
	async fn test_issue_and_verify() {
		let jwt = identity(None);
		let caller = Caller::new("65f1a2b3c4d5e6f7a8b9c0d1", "asha");
		let token = jwt.issue(&caller, Duration::from_secs(3600)).unwrap();
		assert_eq!(jwt.verify(&token).await.unwrap(), caller);
	}

	#[tokio::test]
	async fn test_rejects_foreign_signature() {
		let other = JwtIdentity::new(
			SecretString::from("another-secret-that-is-long-enough-too"),
			None,
			0,
		)
		.unwrap();
		let token = other
			.issue(&Caller::new("u1", "mallory"), Duration::from_secs(3600))
			.unwrap();
		assert!(matches!(
			identity(None).verify(&token).await,
			Err(AccountError::InvalidToken(_))
		));
	}

	#[tokio::test]
	async fn test_rejects_expired() {
		let jwt = identity(None);
		let now = Utc::now().timestamp();
		let token = jwt
			.encode_claims(&Claims {
				id: "u1".into(),
				user_name: "asha".into(),
				iat: now - 7200,
				exp: now - 3600,
				iss: None,
			})
			.unwrap();
		assert!(matches!(
			jwt.verify(&token).await,
			Err(AccountError::ExpiredToken)
		));
	}

	#[tokio::test]
	async fn test_rejects_garbage_and_wrong_issuer() {
		let jwt = identity(Some("campus-market"));
		assert!(matches!(
			jwt.verify("not.a.token").await,
			Err(AccountError::InvalidToken(_))
		));

		let token = identity(Some("someone-else"))
			.issue(&Caller::new("u1", "asha"), Duration::from_secs(60))
			.unwrap();
		assert!(matches!(
			jwt.verify(&token).await,
			Err(AccountError::InvalidToken(_))
		));
	}

	#[test]
	fn test_factory_validates_secret() {
		let short: toml::Value = toml::from_str("secret = \"short\"").unwrap();
		assert!(matches!(
			create_identity(&short),
			Err(AccountError::Configuration(_))
		));

		let ok: toml::Value =
			toml::from_str(&format!("secret = \"{}\"\nissuer = \"campus-market\"", SECRET)).unwrap();
		assert!(create_identity(&ok).is_ok());
	}

	#[test]
	fn test_debug_redacts_secret() {
		let debug = format!("{:?}", identity(None));
		assert!(!debug.contains(SECRET));
	}
}
