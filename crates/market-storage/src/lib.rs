//! Persistence layer for the market service.
//!
//! Records are stored as JSON under namespaced keys (`<namespace>:<id>`) in a
//! pluggable key/value backend. Backends provide ordered prefix listing and
//! an atomic compare-and-swap, which the order state machine and the stock
//! decrement at placement rely on.

use async_trait::async_trait;
use market_types::{ConfigSchema, ImplementationRegistry};
use serde::{de::DeserializeOwned, Serialize};
use std::time::Duration;
use thiserror::Error;

pub mod implementations {
	pub mod file;
	pub mod memory;
}

/// Errors that can occur during storage operations.
#[derive(Debug, Error)]
pub enum StorageError {
	#[error("Not found")]
	NotFound,
	#[error("Serialization error: {0}")]
	Serialization(String),
	#[error("Backend error: {0}")]
	Backend(String),
	#[error("Configuration error: {0}")]
	Configuration(String),
}

/// Low-level byte interface implemented by every storage backend.
#[async_trait]
pub trait StorageInterface: Send + Sync {
	/// Retrieves raw bytes for the given key.
	async fn get_bytes(&self, key: &str) -> Result<Vec<u8>, StorageError>;

	/// Stores raw bytes with optional time-to-live.
	async fn set_bytes(
		&self,
		key: &str,
		value: Vec<u8>,
		ttl: Option<Duration>,
	) -> Result<(), StorageError>;

	/// Deletes the value associated with the given key. Deleting a missing
	/// key is not an error.
	async fn delete(&self, key: &str) -> Result<(), StorageError>;

	async fn exists(&self, key: &str) -> Result<bool, StorageError>;

	/// Lists live keys starting with `prefix`, sorted ascending.
	async fn list_keys(&self, prefix: &str) -> Result<Vec<String>, StorageError>;

	/// Replaces the value at `key` with `new` only if the stored bytes equal
	/// `expected`. Returns `Ok(false)` when the value differs, and
	/// `Err(StorageError::NotFound)` when the key does not exist.
	async fn compare_and_swap(
		&self,
		key: &str,
		expected: &[u8],
		new: Vec<u8>,
	) -> Result<bool, StorageError>;

	/// Returns the configuration schema for validation.
	fn config_schema(&self) -> Box<dyn ConfigSchema>;

	/// Removes expired entries and returns how many were removed.
	async fn cleanup_expired(&self) -> Result<usize, StorageError> {
		Ok(0)
	}
}

/// Builds a backend from its `[storage.implementations.<name>]` table.
pub type StorageFactory = fn(&toml::Value) -> Result<Box<dyn StorageInterface>, StorageError>;

pub trait StorageRegistry: ImplementationRegistry<Factory = StorageFactory> {}

/// Every storage backend compiled into the service, as (name, factory).
pub fn get_all_implementations() -> Vec<(&'static str, StorageFactory)> {
	use implementations::{file, memory};

	vec![
		(file::Registry::NAME, file::Registry::factory()),
		(memory::Registry::NAME, memory::Registry::factory()),
	]
}

/// A decoded value together with the exact bytes it was decoded from.
///
/// Pass `raw` back to [`StorageService::compare_and_swap`]; records written
/// by other processes need not match this crate's serialization.
#[derive(Debug, Clone)]
pub struct Versioned<T> {
	pub value: T,
	pub raw: Vec<u8>,
}

/// Typed JSON access on top of a [`StorageInterface`].
pub struct StorageService {
	backend: Box<dyn StorageInterface>,
}

fn key_for(namespace: &str, id: &str) -> String {
	format!("{}:{}", namespace, id)
}

fn to_json<T: Serialize>(data: &T) -> Result<Vec<u8>, StorageError> {
	serde_json::to_vec(data).map_err(|e| StorageError::Serialization(e.to_string()))
}

fn from_json<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, StorageError> {
	serde_json::from_slice(bytes).map_err(|e| StorageError::Serialization(e.to_string()))
}

impl StorageService {
	pub fn new(backend: Box<dyn StorageInterface>) -> Self {
		Self { backend }
	}

	/// Stores a value, creating or overwriting it.
	pub async fn store<T: Serialize>(
		&self,
		namespace: &str,
		id: &str,
		data: &T,
	) -> Result<(), StorageError> {
		self.backend
			.set_bytes(&key_for(namespace, id), to_json(data)?, None)
			.await
	}

	/// Retrieves and deserializes a value. `NotFound` if absent or expired.
	pub async fn retrieve<T: DeserializeOwned>(
		&self,
		namespace: &str,
		id: &str,
	) -> Result<T, StorageError> {
		let bytes = self.backend.get_bytes(&key_for(namespace, id)).await?;
		from_json(&bytes)
	}

	/// Retrieves a value along with its stored bytes, for a later
	/// [`compare_and_swap`](Self::compare_and_swap).
	pub async fn retrieve_versioned<T: DeserializeOwned>(
		&self,
		namespace: &str,
		id: &str,
	) -> Result<Versioned<T>, StorageError> {
		let raw = self.backend.get_bytes(&key_for(namespace, id)).await?;
		let value = from_json(&raw)?;
		Ok(Versioned { value, raw })
	}

	/// Ids under `namespace` whose id starts with `prefix`, in ascending order.
	pub async fn list_ids(&self, namespace: &str, prefix: &str) -> Result<Vec<String>, StorageError> {
		let key_prefix = key_for(namespace, prefix);
		let strip = namespace.len() + 1;
		Ok(self
			.backend
			.list_keys(&key_prefix)
			.await?
			.into_iter()
			.map(|key| key[strip..].to_string())
			.collect())
	}

	/// Values whose id starts with `prefix`, in ascending id order.
	///
	/// Entries that vanish between listing and reading are skipped.
	pub async fn retrieve_prefixed<T: DeserializeOwned>(
		&self,
		namespace: &str,
		prefix: &str,
	) -> Result<Vec<T>, StorageError> {
		let keys = self.backend.list_keys(&key_for(namespace, prefix)).await?;
		let mut values = Vec::with_capacity(keys.len());
		for key in keys {
			match self.backend.get_bytes(&key).await {
				Ok(bytes) => values.push(from_json(&bytes)?),
				Err(StorageError::NotFound) => continue,
				Err(e) => return Err(e),
			}
		}
		Ok(values)
	}

	/// Every value in `namespace`, in ascending id order.
	pub async fn retrieve_all<T: DeserializeOwned>(
		&self,
		namespace: &str,
	) -> Result<Vec<T>, StorageError> {
		self.retrieve_prefixed(namespace, "").await
	}

	pub async fn remove(&self, namespace: &str, id: &str) -> Result<(), StorageError> {
		self.backend.delete(&key_for(namespace, id)).await
	}

	/// Overwrites an existing value. Fails with `NotFound` if absent.
	pub async fn update<T: Serialize>(
		&self,
		namespace: &str,
		id: &str,
		data: &T,
	) -> Result<(), StorageError> {
		let key = key_for(namespace, id);
		if !self.backend.exists(&key).await? {
			return Err(StorageError::NotFound);
		}
		self.backend.set_bytes(&key, to_json(data)?, None).await
	}

	/// Writes `new` only if the stored bytes still equal `expected`, as read
	/// by [`retrieve_versioned`](Self::retrieve_versioned). Returns whether
	/// the write happened.
	pub async fn compare_and_swap<T: Serialize>(
		&self,
		namespace: &str,
		id: &str,
		expected: &[u8],
		new: &T,
	) -> Result<bool, StorageError> {
		self.backend
			.compare_and_swap(&key_for(namespace, id), expected, to_json(new)?)
			.await
	}

	pub async fn exists(&self, namespace: &str, id: &str) -> Result<bool, StorageError> {
		self.backend.exists(&key_for(namespace, id)).await
	}

	/// Removes expired entries. A no-op for backends without TTL support.
	pub async fn cleanup_expired(&self) -> Result<usize, StorageError> {
		self.backend.cleanup_expired().await
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use implementations::memory::MemoryStorage;
	use serde::Deserialize;

	#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
	struct Record {
		name: String,
		count: u32,
	}

	fn record(name: &str, count: u32) -> Record {
		Record {
			name: name.to_string(),
			count,
		}
	}

	fn service() -> StorageService {
		StorageService::new(Box::new(MemoryStorage::new()))
	}

	#[tokio::test]
	async fn test_typed_round_trip_and_update() {
		let storage = service();
		storage.store("stores", "s1", &record("a", 1)).await.unwrap();
		let loaded: Record = storage.retrieve("stores", "s1").await.unwrap();
		assert_eq!(loaded, record("a", 1));

		storage.update("stores", "s1", &record("a", 2)).await.unwrap();
		let loaded: Record = storage.retrieve("stores", "s1").await.unwrap();
		assert_eq!(loaded.count, 2);

		let missing = storage.update("stores", "nope", &record("x", 0)).await;
		assert!(matches!(missing, Err(StorageError::NotFound)));
	}

	#[tokio::test]
	async fn test_prefix_listing_is_namespaced_and_ordered() {
		let storage = service();
		storage.store("messages", "c1:0002", &record("b", 2)).await.unwrap();
		storage.store("messages", "c1:0001", &record("a", 1)).await.unwrap();
		storage.store("messages", "c2:0001", &record("z", 9)).await.unwrap();
		storage.store("orders", "c1:0000", &record("o", 0)).await.unwrap();

		let ids = storage.list_ids("messages", "c1:").await.unwrap();
		assert_eq!(ids, vec!["c1:0001".to_string(), "c1:0002".to_string()]);

		let values: Vec<Record> = storage.retrieve_prefixed("messages", "c1:").await.unwrap();
		assert_eq!(values, vec![record("a", 1), record("b", 2)]);

		let all: Vec<Record> = storage.retrieve_all("messages").await.unwrap();
		assert_eq!(all.len(), 3);
	}

	#[tokio::test]
	async fn test_typed_compare_and_swap() {
		let storage = service();
		storage.store("products", "p1", &record("stock", 5)).await.unwrap();
		let read: Versioned<Record> = storage.retrieve_versioned("products", "p1").await.unwrap();
		assert_eq!(read.value, record("stock", 5));

		let swapped = storage
			.compare_and_swap("products", "p1", &read.raw, &record("stock", 4))
			.await
			.unwrap();
		assert!(swapped);

		// Stale expectation is refused and leaves the value untouched.
		let swapped = storage
			.compare_and_swap("products", "p1", &read.raw, &record("stock", 3))
			.await
			.unwrap();
		assert!(!swapped);
		let current: Record = storage.retrieve("products", "p1").await.unwrap();
		assert_eq!(current.count, 4);
	}

	#[tokio::test]
	async fn test_swap_on_foreign_serialization() {
		let storage = service();
		// Written by another process: odd key order, whitespace, extra field.
		let foreign = br#"{ "count": 7, "note": null,  "name": "stock" }"#.to_vec();
		storage
			.backend
			.set_bytes("products:p1", foreign, None)
			.await
			.unwrap();

		let read: Versioned<Record> = storage.retrieve_versioned("products", "p1").await.unwrap();
		assert_eq!(read.value, record("stock", 7));
		let swapped = storage
			.compare_and_swap("products", "p1", &read.raw, &record("stock", 6))
			.await
			.unwrap();
		assert!(swapped);
		let current: Record = storage.retrieve("products", "p1").await.unwrap();
		assert_eq!(current.count, 6);
	}
}
