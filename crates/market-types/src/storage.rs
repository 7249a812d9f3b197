//! Storage namespaces.

use std::str::FromStr;

/// Namespaces under which records are persisted.
///
/// Keys take the form `<namespace>:<id>`. Chat messages use a compound id,
/// `<chatId>:<messageId>`, so that a chat's messages share a key prefix and
/// list in id order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StorageKey {
	/// Orders keyed by order id.
	Orders,
	/// Stores keyed by store id.
	Stores,
	/// Products keyed by product id.
	Products,
	/// Chat messages keyed by `<chatId>:<messageId>`.
	Messages,
}

impl StorageKey {
	pub fn as_str(&self) -> &'static str {
		match self {
			StorageKey::Orders => "orders",
			StorageKey::Stores => "stores",
			StorageKey::Products => "products",
			StorageKey::Messages => "messages",
		}
	}

	/// Every namespace, in declaration order.
	pub fn all() -> impl Iterator<Item = Self> {
		[Self::Orders, Self::Stores, Self::Products, Self::Messages].into_iter()
	}
}

impl FromStr for StorageKey {
	type Err = ();

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		Self::all().find(|key| key.as_str() == s).ok_or(())
	}
}

impl From<StorageKey> for &'static str {
	fn from(key: StorageKey) -> Self {
		key.as_str()
	}
}
