//! File-backed storage.
//!
//! Each namespace is a directory under the storage path and each key one
//! file in it (`orders:<id>` lives at `orders/<id>.bin`). Files start with a
//! fixed 64-byte header carrying an optional expiry, followed by the value.
//! Only callers passing an explicit TTL to `set_bytes` get an expiring
//! entry; market records are always written without one. Writes go to a
//! temp file that is renamed into place, and every mutation (plain writes,
//! deletes and compare-and-swap) runs under an exclusive lock on
//! `<storage_path>/.lock`, so a swap cannot interleave with another write
//! even across processes sharing the directory.

use crate::{StorageError, StorageFactory, StorageInterface, StorageRegistry};
use async_trait::async_trait;
use fs2::FileExt;
use market_types::{
	ConfigSchema, Field, FieldType, ImplementationRegistry, Schema, ValidationError,
};
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::fs;
use tokio::io::AsyncReadExt;

const LOCK_FILE: &str = ".lock";
const EXTENSION: &str = "bin";

fn now_secs() -> u64 {
	SystemTime::now()
		.duration_since(UNIX_EPOCH)
		.map(|d| d.as_secs())
		.unwrap_or(0)
}

fn backend_err(e: impl std::fmt::Display) -> StorageError {
	StorageError::Backend(e.to_string())
}

/// Fixed-size file header.
///
/// Binary layout (64 bytes total):
/// - [0-3]: magic bytes "CMKT"
/// - [4-5]: version (u16, little-endian)
/// - [6-13]: expiry (u64, little-endian, Unix seconds, 0 = never)
/// - [14-63]: reserved, zero
#[derive(Debug, Clone, Copy)]
struct FileHeader {
	version: u16,
	expires_at: u64,
}

impl FileHeader {
	const MAGIC: &'static [u8; 4] = b"CMKT";
	const VERSION: u16 = 1;
	const SIZE: usize = 64;

	fn new(ttl: Duration) -> Self {
		let expires_at = if ttl.is_zero() {
			0
		} else {
			now_secs().saturating_add(ttl.as_secs())
		};
		Self {
			version: Self::VERSION,
			expires_at,
		}
	}

	fn serialize(&self) -> [u8; Self::SIZE] {
		let mut bytes = [0u8; Self::SIZE];
		bytes[0..4].copy_from_slice(Self::MAGIC);
		bytes[4..6].copy_from_slice(&self.version.to_le_bytes());
		bytes[6..14].copy_from_slice(&self.expires_at.to_le_bytes());
		bytes
	}

	fn deserialize(bytes: &[u8]) -> Result<Self, StorageError> {
		if bytes.len() < Self::SIZE {
			return Err(backend_err("file too small for header"));
		}
		if &bytes[0..4] != Self::MAGIC {
			return Err(backend_err("bad magic bytes"));
		}
		let version = u16::from_le_bytes([bytes[4], bytes[5]]);
		if version > Self::VERSION {
			return Err(backend_err(format!("unsupported file version: {}", version)));
		}
		let mut expires = [0u8; 8];
		expires.copy_from_slice(&bytes[6..14]);
		Ok(Self {
			version,
			expires_at: u64::from_le_bytes(expires),
		})
	}

	fn is_expired(&self) -> bool {
		self.expires_at != 0 && now_secs() >= self.expires_at
	}
}

/// Splits a stored file into its header and value, treating expired
/// entries as absent.
fn live_entry(data: &[u8]) -> Result<Option<(FileHeader, &[u8])>, StorageError> {
	let header = FileHeader::deserialize(data)?;
	if header.is_expired() {
		return Ok(None);
	}
	Ok(Some((header, &data[FileHeader::SIZE..])))
}

/// Reads just the header of an entry file.
async fn read_header(path: &Path) -> Result<FileHeader, StorageError> {
	let mut file = fs::File::open(path).await.map_err(backend_err)?;
	let mut bytes = [0u8; FileHeader::SIZE];
	file.read_exact(&mut bytes).await.map_err(backend_err)?;
	FileHeader::deserialize(&bytes)
}

/// Maps a key to a file name. Reversible, so directory listings yield keys.
fn encode_key(key: &str) -> String {
	let mut out = String::with_capacity(key.len() + 8);
	for c in key.chars() {
		match c {
			'%' => out.push_str("%25"),
			'/' => out.push_str("%2F"),
			'\\' => out.push_str("%5C"),
			':' => out.push_str("%3A"),
			c => out.push(c),
		}
	}
	out
}

fn decode_key(name: &str) -> String {
	name.replace("%3A", ":")
		.replace("%5C", "\\")
		.replace("%2F", "/")
		.replace("%25", "%")
}

/// Exclusive lock on the storage directory, released on drop.
struct DirLock(File);

impl DirLock {
	fn acquire(base: &Path) -> Result<Self, StorageError> {
		std::fs::create_dir_all(base).map_err(backend_err)?;
		let file = OpenOptions::new()
			.create(true)
			.truncate(false)
			.write(true)
			.open(base.join(LOCK_FILE))
			.map_err(backend_err)?;
		file.lock_exclusive().map_err(backend_err)?;
		Ok(Self(file))
	}
}

impl Drop for DirLock {
	fn drop(&mut self) {
		let _ = FileExt::unlock(&self.0);
	}
}

fn write_entry(path: &Path, header: FileHeader, value: &[u8]) -> Result<(), StorageError> {
	let mut file_data = Vec::with_capacity(FileHeader::SIZE + value.len());
	file_data.extend_from_slice(&header.serialize());
	file_data.extend_from_slice(value);

	if let Some(parent) = path.parent() {
		std::fs::create_dir_all(parent).map_err(backend_err)?;
	}
	let temp_path = path.with_extension("tmp");
	std::fs::write(&temp_path, file_data).map_err(backend_err)?;
	std::fs::rename(&temp_path, path).map_err(backend_err)
}

pub struct FileStorage {
	base_path: PathBuf,
}

impl FileStorage {
	pub fn new(base_path: PathBuf) -> Self {
		Self { base_path }
	}

	/// `<base>/<namespace>/<rest>.bin`, both parts encoded. Keys without a
	/// namespace sit directly under the base directory.
	fn file_path(&self, key: &str) -> PathBuf {
		match key.split_once(':') {
			Some((namespace, rest)) => self
				.base_path
				.join(encode_key(namespace))
				.join(format!("{}.{}", encode_key(rest), EXTENSION)),
			None => self
				.base_path
				.join(format!("{}.{}", encode_key(key), EXTENSION)),
		}
	}

	/// Runs a mutation on the blocking pool while holding the directory lock.
	async fn locked<F, R>(&self, op: F) -> Result<R, StorageError>
	where
		F: FnOnce() -> Result<R, StorageError> + Send + 'static,
		R: Send + 'static,
	{
		let base = self.base_path.clone();
		tokio::task::spawn_blocking(move || {
			let _lock = DirLock::acquire(&base)?;
			op()
		})
		.await
		.map_err(backend_err)?
	}

	/// (key, path) for every entry file directly under `dir`. File names are
	/// decoded and prefixed with `namespace:` when one is given.
	async fn entries_in(
		&self,
		dir: &Path,
		namespace: Option<&str>,
	) -> Result<Vec<(String, PathBuf)>, StorageError> {
		let mut read_dir = match fs::read_dir(dir).await {
			Ok(read_dir) => read_dir,
			Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
			Err(e) => return Err(backend_err(e)),
		};

		let mut found = Vec::new();
		while let Some(entry) = read_dir.next_entry().await.map_err(backend_err)? {
			let path = entry.path();
			if path.extension() != Some(std::ffi::OsStr::new(EXTENSION)) {
				continue;
			}
			if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
				let key = match namespace {
					Some(namespace) => format!("{}:{}", namespace, decode_key(stem)),
					None => decode_key(stem),
				};
				found.push((key, path.clone()));
			}
		}
		Ok(found)
	}

	/// Entries of every namespace directory plus any at the top level.
	async fn all_entries(&self) -> Result<Vec<(String, PathBuf)>, StorageError> {
		let mut found = self.entries_in(&self.base_path, None).await?;
		let mut read_dir = match fs::read_dir(&self.base_path).await {
			Ok(read_dir) => read_dir,
			Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(found),
			Err(e) => return Err(backend_err(e)),
		};
		while let Some(entry) = read_dir.next_entry().await.map_err(backend_err)? {
			if !entry.file_type().await.map_err(backend_err)?.is_dir() {
				continue;
			}
			if let Some(name) = entry.file_name().to_str() {
				let namespace = decode_key(name);
				found.extend(self.entries_in(&entry.path(), Some(namespace.as_str())).await?);
			}
		}
		Ok(found)
	}

	async fn cleanup_expired_files(&self) -> Result<usize, StorageError> {
		let mut removed = 0;
		for (key, path) in self.all_entries().await? {
			match read_header(&path).await {
				Ok(header) if header.is_expired() => match fs::remove_file(&path).await {
					Ok(()) => removed += 1,
					Err(e) => tracing::warn!(key = %key, "Failed to remove expired entry: {}", e),
				},
				Ok(_) => {},
				Err(e) => tracing::debug!(key = %key, "Skipping unreadable entry: {}", e),
			}
		}
		Ok(removed)
	}
}

#[async_trait]
impl StorageInterface for FileStorage {
	async fn get_bytes(&self, key: &str) -> Result<Vec<u8>, StorageError> {
		let data = match fs::read(self.file_path(key)).await {
			Ok(data) => data,
			Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
				return Err(StorageError::NotFound)
			},
			Err(e) => return Err(backend_err(e)),
		};
		live_entry(&data)?
			.map(|(_, value)| value.to_vec())
			.ok_or(StorageError::NotFound)
	}

	async fn set_bytes(
		&self,
		key: &str,
		value: Vec<u8>,
		ttl: Option<Duration>,
	) -> Result<(), StorageError> {
		let path = self.file_path(key);
		let header = FileHeader::new(ttl.unwrap_or(Duration::ZERO));
		self.locked(move || write_entry(&path, header, &value)).await
	}

	async fn delete(&self, key: &str) -> Result<(), StorageError> {
		let path = self.file_path(key);
		self.locked(move || match std::fs::remove_file(&path) {
			Ok(()) => Ok(()),
			Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
			Err(e) => Err(backend_err(e)),
		})
		.await
	}

	async fn exists(&self, key: &str) -> Result<bool, StorageError> {
		match self.get_bytes(key).await {
			Ok(_) => Ok(true),
			Err(StorageError::NotFound) => Ok(false),
			Err(e) => Err(e),
		}
	}

	async fn list_keys(&self, prefix: &str) -> Result<Vec<String>, StorageError> {
		let entries = match prefix.split_once(':') {
			Some((namespace, _)) => {
				self.entries_in(&self.base_path.join(encode_key(namespace)), Some(namespace))
					.await?
			},
			None => self.all_entries().await?,
		};

		let mut keys = Vec::new();
		for (key, path) in entries {
			if !key.starts_with(prefix) {
				continue;
			}
			// Entries can expire or disappear between listing and reading.
			if matches!(read_header(&path).await, Ok(header) if !header.is_expired()) {
				keys.push(key);
			}
		}
		keys.sort();
		Ok(keys)
	}

	async fn compare_and_swap(
		&self,
		key: &str,
		expected: &[u8],
		new: Vec<u8>,
	) -> Result<bool, StorageError> {
		let path = self.file_path(key);
		let expected = expected.to_vec();
		self.locked(move || {
			let data = match std::fs::read(&path) {
				Ok(data) => data,
				Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
					return Err(StorageError::NotFound)
				},
				Err(e) => return Err(backend_err(e)),
			};
			let (header, current) = live_entry(&data)?.ok_or(StorageError::NotFound)?;
			if current != expected.as_slice() {
				return Ok(false);
			}
			// The swap keeps whatever expiry the entry was written with.
			write_entry(&path, header, &new)?;
			Ok(true)
		})
		.await
	}

	fn config_schema(&self) -> Box<dyn ConfigSchema> {
		Box::new(FileStorageSchema)
	}

	async fn cleanup_expired(&self) -> Result<usize, StorageError> {
		self.cleanup_expired_files().await
	}
}

/// Accepts `storage_path`. Per-namespace expiry keys (`ttl_<namespace>`)
/// are refused: orders and chat messages are kept forever.
pub struct FileStorageSchema;

impl ConfigSchema for FileStorageSchema {
	fn validate(&self, config: &toml::Value) -> Result<(), ValidationError> {
		if let Some(key) = config
			.as_table()
			.and_then(|table| table.keys().find(|key| key.starts_with("ttl_")))
		{
			return Err(ValidationError::InvalidValue {
				field: key.clone(),
				message: "stored records do not expire".into(),
			});
		}
		Schema::new(vec![], vec![Field::new("storage_path", FieldType::String)]).validate(config)
	}
}

/// Builds a file backend.
///
/// Configuration parameters:
/// - `storage_path`: base directory (default: "./data/storage")
pub fn create_storage(config: &toml::Value) -> Result<Box<dyn StorageInterface>, StorageError> {
	FileStorageSchema
		.validate(config)
		.map_err(|e| StorageError::Configuration(e.to_string()))?;

	let storage_path = config
		.get("storage_path")
		.and_then(|v| v.as_str())
		.unwrap_or("./data/storage");

	Ok(Box::new(FileStorage::new(PathBuf::from(storage_path))))
}

pub struct Registry;

impl ImplementationRegistry for Registry {
	const NAME: &'static str = "file";
	type Factory = StorageFactory;

	fn factory() -> Self::Factory {
		create_storage
	}
}

impl StorageRegistry for Registry {}
