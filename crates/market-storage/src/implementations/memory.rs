//! In-memory storage backend.
//!
//! Keeps everything in an ordered map, so prefix scans come back sorted
//! without extra work. Nothing survives a restart and TTLs are ignored. Used
//! for tests and local development.

use crate::{StorageError, StorageFactory, StorageInterface, StorageRegistry};
use async_trait::async_trait;
use market_types::{ConfigSchema, ImplementationRegistry, Schema, ValidationError};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;

pub struct MemoryStorage {
	store: Arc<RwLock<BTreeMap<String, Vec<u8>>>>,
}

impl MemoryStorage {
	pub fn new() -> Self {
		Self {
			store: Arc::new(RwLock::new(BTreeMap::new())),
		}
	}
}

impl Default for MemoryStorage {
	fn default() -> Self {
		Self::new()
	}
}

#[async_trait]
impl StorageInterface for MemoryStorage {
	async fn get_bytes(&self, key: &str) -> Result<Vec<u8>, StorageError> {
		let store = self.store.read().await;
		store.get(key).cloned().ok_or(StorageError::NotFound)
	}

	async fn set_bytes(
		&self,
		key: &str,
		value: Vec<u8>,
		_ttl: Option<Duration>,
	) -> Result<(), StorageError> {
		let mut store = self.store.write().await;
		store.insert(key.to_string(), value);
		Ok(())
	}

	async fn delete(&self, key: &str) -> Result<(), StorageError> {
		let mut store = self.store.write().await;
		store.remove(key);
		Ok(())
	}

	async fn exists(&self, key: &str) -> Result<bool, StorageError> {
		let store = self.store.read().await;
		Ok(store.contains_key(key))
	}

	async fn list_keys(&self, prefix: &str) -> Result<Vec<String>, StorageError> {
		let store = self.store.read().await;
		Ok(store
			.range(prefix.to_string()..)
			.take_while(|(key, _)| key.starts_with(prefix))
			.map(|(key, _)| key.clone())
			.collect())
	}

	async fn compare_and_swap(
		&self,
		key: &str,
		expected: &[u8],
		new: Vec<u8>,
	) -> Result<bool, StorageError> {
		let mut store = self.store.write().await;
		match store.get_mut(key) {
			None => Err(StorageError::NotFound),
			Some(current) if current.as_slice() == expected => {
				*current = new;
				Ok(true)
			},
			Some(_) => Ok(false),
		}
	}

	fn config_schema(&self) -> Box<dyn ConfigSchema> {
		Box::new(MemoryStorageSchema)
	}
}

/// The memory backend takes no options.
pub struct MemoryStorageSchema;

impl ConfigSchema for MemoryStorageSchema {
	fn validate(&self, config: &toml::Value) -> Result<(), ValidationError> {
		Schema::new(vec![], vec![]).validate(config)
	}
}

pub fn create_storage(config: &toml::Value) -> Result<Box<dyn StorageInterface>, StorageError> {
	MemoryStorageSchema
		.validate(config)
		.map_err(|e| StorageError::Configuration(e.to_string()))?;
	Ok(Box::new(MemoryStorage::new()))
}

pub struct Registry;

impl ImplementationRegistry for Registry {
	const NAME: &'static str = "memory";
	type Factory = StorageFactory;

	fn factory() -> Self::Factory {
		create_storage
	}
}

impl StorageRegistry for Registry {}

#[cfg(test)]
mod tests {
	use super::*;

	#[tokio::test]
	async fn test_basic_operations() {
		let storage = MemoryStorage::new();

		let key = "orders:abc";
		let value = b"{}".to_vec();
		storage.set_bytes(key, value.clone(), None).await.unwrap();
		assert_eq!(storage.get_bytes(key).await.unwrap(), value);
		assert!(storage.exists(key).await.unwrap());

		storage.delete(key).await.unwrap();
		assert!(!storage.exists(key).await.unwrap());
		assert!(matches!(
			storage.get_bytes(key).await,
			Err(StorageError::NotFound)
		));
	}

	#[tokio::test]
	async fn test_list_keys_stops_at_prefix_boundary() {
		let storage = MemoryStorage::new();
		for key in ["messages:a:2", "messages:a:1", "messages:b:1", "orders:a"] {
			storage.set_bytes(key, vec![], None).await.unwrap();
		}

		let keys = storage.list_keys("messages:a:").await.unwrap();
		assert_eq!(keys, vec!["messages:a:1", "messages:a:2"]);
		assert!(storage.list_keys("stores:").await.unwrap().is_empty());
	}

	#[tokio::test]
	async fn test_compare_and_swap() {
		let storage = MemoryStorage::new();
		assert!(matches!(
			storage.compare_and_swap("k", b"x", b"y".to_vec()).await,
			Err(StorageError::NotFound)
		));

		storage.set_bytes("k", b"x".to_vec(), None).await.unwrap();
		assert!(!storage
			.compare_and_swap("k", b"other", b"y".to_vec())
			.await
			.unwrap());
		assert!(storage
			.compare_and_swap("k", b"x", b"y".to_vec())
			.await
			.unwrap());
		assert_eq!(storage.get_bytes("k").await.unwrap(), b"y".to_vec());
	}

	#[tokio::test]
	async fn test_concurrent_swaps_single_winner() {
		let storage = Arc::new(MemoryStorage::new());
		storage.set_bytes("k", b"v0".to_vec(), None).await.unwrap();

		let mut handles = Vec::new();
		for i in 0..16 {
			let storage = storage.clone();
			handles.push(tokio::spawn(async move {
				storage
					.compare_and_swap("k", b"v0", format!("v{}", i + 1).into_bytes())
					.await
					.unwrap()
			}));
		}

		let mut winners = 0;
		for handle in handles {
			if handle.await.unwrap() {
				winners += 1;
			}
		}
		assert_eq!(winners, 1);
	}
}
